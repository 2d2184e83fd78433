//! Subscription status derivation and the transition table
//!
//! The stored `subscription_status` column is a cache. [`derive_status`] is the
//! one place that decides what a club's status is; every engine write refreshes
//! the cache from it.
//!
//! # Transition table
//!
//! | From              | To                                   |
//! |-------------------|--------------------------------------|
//! | Trial             | PendingUpgrade, Cancelled, Blocked   |
//! | PendingUpgrade    | AwaitingPayment, Trial, Active,      |
//! |                   | Cancelled, Blocked                   |
//! | AwaitingPayment   | Active, Trial, Cancelled, Blocked    |
//! | Active            | PendingUpgrade, Cancelled, Blocked   |
//! | Cancelled         | Expired                              |
//! | Blocked / Expired | (admin restore or unblock only)      |
//! | *any*             | Same status                          |
//!
//! Administrative operations (override activation, unblock, restore, archive)
//! are overrides and do not consult this table.

use clubboard_shared::SubscriptionStatus;

use crate::error::{BillingError, BillingResult};
use crate::models::Tenant;

/// Resolve the effective status from the stored markers.
///
/// Priority: blocked > cancelled > expired > awaiting payment > pending
/// upgrade > trial > active. A cancelled club keeps `cancelled` until the
/// runner stamps `expired_at` at the end of its paid term.
pub fn derive_status(tenant: &Tenant, has_pending_request: bool) -> SubscriptionStatus {
    if tenant.blocked_at.is_some() {
        return SubscriptionStatus::Blocked;
    }
    if tenant.cancelled_at.is_some() && tenant.expired_at.is_none() {
        return SubscriptionStatus::Cancelled;
    }
    if tenant.expired_at.is_some() {
        return SubscriptionStatus::Expired;
    }
    if tenant.pending_package.is_some() {
        return SubscriptionStatus::AwaitingPayment;
    }
    if has_pending_request {
        return SubscriptionStatus::PendingUpgrade;
    }
    if !tenant.has_been_activated() {
        return SubscriptionStatus::Trial;
    }
    SubscriptionStatus::Active
}

/// Targets reachable from `status` through a normal (non-administrative) transition
pub fn allowed_transitions(status: SubscriptionStatus) -> &'static [SubscriptionStatus] {
    match status {
        SubscriptionStatus::Trial => &[
            SubscriptionStatus::PendingUpgrade,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Blocked,
        ],
        SubscriptionStatus::PendingUpgrade => &[
            SubscriptionStatus::AwaitingPayment,
            SubscriptionStatus::Trial,
            SubscriptionStatus::Active,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Blocked,
        ],
        SubscriptionStatus::AwaitingPayment => &[
            SubscriptionStatus::Active,
            SubscriptionStatus::Trial,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Blocked,
        ],
        SubscriptionStatus::Active => &[
            SubscriptionStatus::PendingUpgrade,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Blocked,
        ],
        SubscriptionStatus::Cancelled => &[SubscriptionStatus::Expired],
        SubscriptionStatus::Blocked | SubscriptionStatus::Expired => &[],
    }
}

/// Validate a normal transition, failing with `InvalidTransition`
pub fn ensure_transition(
    operation: &'static str,
    from: SubscriptionStatus,
    to: SubscriptionStatus,
) -> BillingResult<()> {
    if from == to || allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(BillingError::InvalidTransition {
            operation,
            status: from,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clubboard_shared::Package;
    use time::macros::datetime;
    use uuid::Uuid;

    fn trial() -> Tenant {
        Tenant::new_trial(
            Uuid::new_v4(),
            "SV Test",
            None,
            datetime!(2026-01-01 0:00 UTC),
            30,
        )
    }

    #[test]
    fn test_fresh_club_is_trial() {
        assert_eq!(derive_status(&trial(), false), SubscriptionStatus::Trial);
    }

    #[test]
    fn test_pending_request_shows_pending_upgrade() {
        assert_eq!(
            derive_status(&trial(), true),
            SubscriptionStatus::PendingUpgrade
        );
    }

    #[test]
    fn test_unpaid_approval_shadows_trial() {
        let mut tenant = trial();
        tenant.pending_package = Some(Package::Pro);
        assert_eq!(
            derive_status(&tenant, false),
            SubscriptionStatus::AwaitingPayment
        );
    }

    #[test]
    fn test_blocked_shadows_everything() {
        let mut tenant = trial();
        tenant.activated_at = Some(datetime!(2026-01-02 0:00 UTC));
        tenant.cancelled_at = Some(datetime!(2026-01-03 0:00 UTC));
        tenant.pending_package = Some(Package::Pro);
        tenant.blocked_at = Some(datetime!(2026-01-04 0:00 UTC));
        assert_eq!(derive_status(&tenant, true), SubscriptionStatus::Blocked);
    }

    #[test]
    fn test_cancelled_until_expiry_is_stamped() {
        let mut tenant = trial();
        tenant.activated_at = Some(datetime!(2026-01-02 0:00 UTC));
        tenant.cancelled_at = Some(datetime!(2026-01-03 0:00 UTC));
        assert_eq!(derive_status(&tenant, false), SubscriptionStatus::Cancelled);

        tenant.expired_at = Some(datetime!(2027-01-02 0:00 UTC));
        assert_eq!(derive_status(&tenant, false), SubscriptionStatus::Expired);
    }

    #[test]
    fn test_admin_override_counts_as_activated() {
        let mut tenant = trial();
        tenant.admin_override = true;
        assert_eq!(derive_status(&tenant, false), SubscriptionStatus::Active);
    }

    #[test]
    fn test_transition_table() {
        assert!(ensure_transition(
            "cancel",
            SubscriptionStatus::Active,
            SubscriptionStatus::Cancelled
        )
        .is_ok());
        assert!(ensure_transition(
            "renew",
            SubscriptionStatus::Active,
            SubscriptionStatus::Active
        )
        .is_ok());
        assert!(matches!(
            ensure_transition(
                "cancel",
                SubscriptionStatus::Expired,
                SubscriptionStatus::Cancelled
            ),
            Err(BillingError::InvalidTransition { .. })
        ));
        assert!(allowed_transitions(SubscriptionStatus::Blocked).is_empty());
    }

    #[test]
    fn test_review_state_does_not_hide_lifecycle() {
        let mut tenant = trial();
        tenant.pending_package = Some(Package::Pro);
        assert_eq!(derive_status(&tenant, false), SubscriptionStatus::AwaitingPayment);
        assert!(tenant.is_trialing());
        assert!(!tenant.is_in_paid_term());

        tenant.activated_at = Some(datetime!(2026-01-02 0:00 UTC));
        assert!(tenant.is_in_paid_term());

        tenant.blocked_at = Some(datetime!(2026-01-04 0:00 UTC));
        assert!(!tenant.is_in_paid_term());
        assert!(!tenant.is_trialing());
        assert!(ensure_transition(
            "block",
            SubscriptionStatus::AwaitingPayment,
            SubscriptionStatus::Blocked
        )
        .is_ok());
    }
}
