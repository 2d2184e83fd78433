//! Club and upgrade request records

use clubboard_shared::{Package, SubscriptionStatus, UpgradeRequestStatus};
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Subscription state of one club.
///
/// `subscription_status` is a cache of [`crate::status::derive_status`] and is
/// only written by the lifecycle engine and the transition runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub billing_email: Option<String>,
    pub active_package: Package,
    pub subscription_status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_end: Option<OffsetDateTime>,
    pub admin_override: bool,
    /// Approved upgrade target that has not been paid yet
    pub pending_package: Option<Package>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub activated_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub blocked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expired_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub archived_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_notice_14d_sent_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_notice_7d_sent_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_notice_0d_sent_at: Option<OffsetDateTime>,
    /// Optimistic concurrency token, bumped by every write
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Tenant {
    /// A freshly approved club on the basic package with a running trial
    pub fn new_trial(
        id: Uuid,
        name: impl Into<String>,
        billing_email: Option<String>,
        now: OffsetDateTime,
        trial_days: i64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            billing_email,
            active_package: Package::Basic,
            subscription_status: SubscriptionStatus::Trial,
            subscription_start: Some(now),
            subscription_end: Some(now + Duration::days(trial_days)),
            admin_override: false,
            pending_package: None,
            activated_at: None,
            blocked_at: None,
            cancelled_at: None,
            expired_at: None,
            archived_at: None,
            trial_notice_14d_sent_at: None,
            trial_notice_7d_sent_at: None,
            trial_notice_0d_sent_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Whether the club has ever been activated by payment or by an admin
    pub fn has_been_activated(&self) -> bool {
        self.activated_at.is_some() || self.admin_override
    }

    fn is_live(&self) -> bool {
        !self.is_archived()
            && self.blocked_at.is_none()
            && self.cancelled_at.is_none()
            && self.expired_at.is_none()
    }

    /// On the free trial. An upgrade request under review does not end it.
    pub fn is_trialing(&self) -> bool {
        self.is_live() && !self.has_been_activated()
    }

    /// In a paid or overridden term. An upgrade request under review does not end it.
    pub fn is_in_paid_term(&self) -> bool {
        self.is_live() && self.has_been_activated()
    }

    /// Whole days until `subscription_end`, negative once it has passed
    pub fn days_remaining(&self, now: OffsetDateTime) -> Option<i64> {
        self.subscription_end.map(|end| (end - now).whole_days())
    }
}

/// One attempt by a club to move to a higher package
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeRequest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub current_package: Package,
    pub requested_package: Package,
    pub status: UpgradeRequestStatus,
    pub review_note: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reviewed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl UpgradeRequest {
    pub fn new_pending(
        tenant_id: Uuid,
        current_package: Package,
        requested_package: Package,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            current_package,
            requested_package,
            status: UpgradeRequestStatus::Pending,
            review_note: None,
            created_at: now,
            reviewed_at: None,
            completed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == UpgradeRequestStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_new_trial_defaults() {
        let now = datetime!(2026-03-01 12:00 UTC);
        let tenant = Tenant::new_trial(Uuid::new_v4(), "FC Example", None, now, 30);

        assert_eq!(tenant.active_package, Package::Basic);
        assert_eq!(tenant.subscription_status, SubscriptionStatus::Trial);
        assert_eq!(tenant.subscription_end, Some(datetime!(2026-03-31 12:00 UTC)));
        assert!(!tenant.has_been_activated());
    }

    #[test]
    fn test_days_remaining_goes_negative_after_end() {
        let now = datetime!(2026-03-01 12:00 UTC);
        let tenant = Tenant::new_trial(Uuid::new_v4(), "FC Example", None, now, 30);

        assert_eq!(tenant.days_remaining(now), Some(30));
        assert_eq!(tenant.days_remaining(now + Duration::days(38)), Some(-8));
    }
}
