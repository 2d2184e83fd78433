//! Subscription Invariants Module
//!
//! Runnable consistency checks over the subscription store. They can be run
//! after any incident, manual data fix or payment callback replay to confirm
//! the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Read-only**: checks never write
//! 2. **Explanatory**: violations include enough context to debug
//! 3. **Engine-agnostic**: checks read the store, not engine internals

use std::collections::HashSet;
use std::sync::Arc;

use clubboard_shared::{SubscriptionStatus, UpgradeRequestStatus};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::{EventType, SubscriptionEvent};
use crate::models::{Tenant, UpgradeRequest};
use crate::status::derive_status;
use crate::store::SubscriptionStore;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Club(s) affected
    pub tenant_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationSeverity {
    /// Entitlements or billing may be wrong right now
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Potential issue, should investigate
    Medium,
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

/// Everything the checks need to know about one club
struct TenantRecord {
    tenant: Tenant,
    requests: Vec<UpgradeRequest>,
    events: Vec<SubscriptionEvent>,
}

impl TenantRecord {
    fn has_pending_request(&self) -> bool {
        self.requests.iter().any(|r| r.is_pending())
    }
}

type Check = fn(&[TenantRecord]) -> Vec<InvariantViolation>;

const CHECKS: [(&str, Check); 6] = [
    ("single_pending_request", check_single_pending_request),
    ("upgrade_order", check_upgrade_order),
    ("status_matches_derivation", check_status_matches_derivation),
    ("activation_audited", check_activation_audited),
    ("cancelled_has_period_end", check_cancelled_has_period_end),
    (
        "awaiting_payment_has_approved_request",
        check_awaiting_payment_has_approved_request,
    ),
];

/// Service for running subscription invariant checks
pub struct InvariantChecker {
    store: Arc<dyn SubscriptionStore>,
}

impl InvariantChecker {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    async fn load(&self) -> BillingResult<Vec<TenantRecord>> {
        let tenants = self.store.list_tenants().await?;
        let mut records = Vec::with_capacity(tenants.len());
        for tenant in tenants {
            let requests = self.store.requests_for_tenant(tenant.id).await?;
            let events = self.store.events_for_tenant(tenant.id).await?;
            records.push(TenantRecord {
                tenant,
                requests,
                events,
            });
        }
        Ok(records)
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let records = self.load().await?;

        let violations: Vec<InvariantViolation> = CHECKS
            .iter()
            .flat_map(|(_, check)| check(&records))
            .collect();

        let checks_run = CHECKS.len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<HashSet<_>>()
            .len();

        if !violations.is_empty() {
            tracing::warn!(
                violations = violations.len(),
                checks_failed = checks_failed,
                "Subscription invariant violations found"
            );
        }

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        let Some((_, check)) = CHECKS.iter().find(|(check_name, _)| *check_name == name) else {
            return Ok(vec![]);
        };
        let records = self.load().await?;
        Ok(check(&records))
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        CHECKS.iter().map(|(name, _)| *name).collect()
    }
}

/// Invariant 1: At most one pending upgrade request per club
fn check_single_pending_request(records: &[TenantRecord]) -> Vec<InvariantViolation> {
    records
        .iter()
        .filter_map(|record| {
            let pending: Vec<Uuid> = record
                .requests
                .iter()
                .filter(|r| r.is_pending())
                .map(|r| r.id)
                .collect();
            (pending.len() > 1).then(|| InvariantViolation {
                invariant: "single_pending_request".to_string(),
                tenant_ids: vec![record.tenant.id],
                description: format!(
                    "Club has {} pending upgrade requests (expected at most 1)",
                    pending.len()
                ),
                context: serde_json::json!({ "request_ids": pending }),
                severity: ViolationSeverity::Critical,
            })
        })
        .collect()
}

/// Invariant 2: Every request asks for a strictly higher package
fn check_upgrade_order(records: &[TenantRecord]) -> Vec<InvariantViolation> {
    records
        .iter()
        .flat_map(|record| {
            record
                .requests
                .iter()
                .filter(|r| r.requested_package <= r.current_package)
                .map(|r| InvariantViolation {
                    invariant: "upgrade_order".to_string(),
                    tenant_ids: vec![record.tenant.id],
                    description: format!(
                        "Upgrade request {} goes from {} to {}",
                        r.id, r.current_package, r.requested_package
                    ),
                    context: serde_json::json!({
                        "request_id": r.id,
                        "current_package": r.current_package,
                        "requested_package": r.requested_package,
                    }),
                    severity: ViolationSeverity::High,
                })
        })
        .collect()
}

/// Invariant 3: The cached status column equals the derived status
fn check_status_matches_derivation(records: &[TenantRecord]) -> Vec<InvariantViolation> {
    records
        .iter()
        .filter_map(|record| {
            let derived = derive_status(&record.tenant, record.has_pending_request());
            (derived != record.tenant.subscription_status).then(|| InvariantViolation {
                invariant: "status_matches_derivation".to_string(),
                tenant_ids: vec![record.tenant.id],
                description: format!(
                    "Club '{}' is stored as {} but derives to {}",
                    record.tenant.name, record.tenant.subscription_status, derived
                ),
                context: serde_json::json!({
                    "stored_status": record.tenant.subscription_status,
                    "derived_status": derived,
                }),
                severity: ViolationSeverity::High,
            })
        })
        .collect()
}

/// Invariant 4: Activation and override flags are backed by audit events
fn check_activation_audited(records: &[TenantRecord]) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for record in records {
        let tenant = &record.tenant;
        if tenant.activated_at.is_some()
            && !record
                .events
                .iter()
                .any(|e| e.kind().is_some_and(|k| k.is_activation()))
        {
            violations.push(InvariantViolation {
                invariant: "activation_audited".to_string(),
                tenant_ids: vec![tenant.id],
                description: format!("Club '{}' was activated without an audit event", tenant.name),
                context: serde_json::json!({ "activated_at": tenant.activated_at.map(|t| t.unix_timestamp()) }),
                severity: ViolationSeverity::Medium,
            });
        }

        if tenant.admin_override
            && !record.events.iter().any(|e| {
                e.is(EventType::AdminOverrideActivated) || e.is(EventType::AdminOverrideEnabled)
            })
        {
            violations.push(InvariantViolation {
                invariant: "activation_audited".to_string(),
                tenant_ids: vec![tenant.id],
                description: format!(
                    "Club '{}' has an admin override without an audit event",
                    tenant.name
                ),
                context: serde_json::json!({ "admin_override": true }),
                severity: ViolationSeverity::Medium,
            });
        }
    }

    violations
}

/// Invariant 5: Cancelled subscriptions know when access ends
fn check_cancelled_has_period_end(records: &[TenantRecord]) -> Vec<InvariantViolation> {
    records
        .iter()
        .filter(|r| {
            r.tenant.subscription_status == SubscriptionStatus::Cancelled
                && r.tenant.subscription_end.is_none()
        })
        .map(|r| InvariantViolation {
            invariant: "cancelled_has_period_end".to_string(),
            tenant_ids: vec![r.tenant.id],
            description: format!("Cancelled club '{}' has no subscription end", r.tenant.name),
            context: serde_json::json!({}),
            severity: ViolationSeverity::Medium,
        })
        .collect()
}

/// Invariant 6: An unpaid approval is backed by exactly one approved request
/// for the same package, and vice versa
fn check_awaiting_payment_has_approved_request(records: &[TenantRecord]) -> Vec<InvariantViolation> {
    records
        .iter()
        .filter_map(|record| {
            let approved: Vec<&UpgradeRequest> = record
                .requests
                .iter()
                .filter(|r| r.status == UpgradeRequestStatus::Approved)
                .collect();

            let consistent = match record.tenant.pending_package {
                Some(package) => approved.len() == 1 && approved[0].requested_package == package,
                None => approved.is_empty(),
            };

            (!consistent).then(|| InvariantViolation {
                invariant: "awaiting_payment_has_approved_request".to_string(),
                tenant_ids: vec![record.tenant.id],
                description: format!(
                    "Club '{}' has pending package {:?} but {} approved request(s)",
                    record.tenant.name,
                    record.tenant.pending_package,
                    approved.len()
                ),
                context: serde_json::json!({
                    "pending_package": record.tenant.pending_package,
                    "approved_request_ids": approved.iter().map(|r| r.id).collect::<Vec<_>>(),
                }),
                severity: ViolationSeverity::High,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clubboard_shared::Package;

    fn record(tenant: Tenant) -> TenantRecord {
        TenantRecord {
            tenant,
            requests: vec![],
            events: vec![],
        }
    }

    fn trial() -> Tenant {
        Tenant::new_trial(Uuid::new_v4(), "SG Nord", None, OffsetDateTime::now_utc(), 30)
    }

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"single_pending_request"));
        assert!(checks.contains(&"status_matches_derivation"));
    }

    #[test]
    fn test_stale_status_cache_is_reported() {
        let mut tenant = trial();
        tenant.blocked_at = Some(OffsetDateTime::now_utc());
        let violations = check_status_matches_derivation(&[record(tenant)]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].context["derived_status"], "blocked");
    }

    #[test]
    fn test_pending_package_without_approval_is_reported() {
        let mut tenant = trial();
        tenant.pending_package = Some(Package::Pro);
        tenant.subscription_status = SubscriptionStatus::AwaitingPayment;
        let violations = check_awaiting_payment_has_approved_request(&[record(tenant)]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, ViolationSeverity::High);
    }

    #[test]
    fn test_unaudited_activation_is_reported() {
        let mut tenant = trial();
        tenant.activated_at = Some(OffsetDateTime::now_utc());
        assert_eq!(check_activation_audited(&[record(tenant)]).len(), 1);
    }

    #[test]
    fn test_fresh_trial_is_clean() {
        let records = [record(trial())];
        for (name, check) in CHECKS {
            assert!(check(&records).is_empty(), "{name} flagged a fresh trial");
        }
    }
}
