//! Scheduled transition runner
//!
//! Time-driven transitions: trial reminders and blocking, yearly renewal of
//! paid subscriptions, and expiry of cancelled ones. Every procedure takes
//! `now` explicitly and is idempotent; guards are re-checked against a fresh
//! snapshot inside each commit, so overlapping runs cannot double-apply.

use clubboard_shared::SubscriptionStatus;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::{ActorType, EventType, SubscriptionEventBuilder};
use crate::lifecycle::{one_year_after, refresh_status, LifecycleEngine, Plan, Step, TransitionOutcome};
use crate::models::Tenant;
use crate::notify::NotificationTemplate;
use crate::status::ensure_transition;
use crate::store::TenantWrite;

/// Upper bound on renewal years applied to one club in one run
const MAX_RENEWAL_YEARS: usize = 50;

/// Cached statuses a trialing club can show while an upgrade is under review
const TRIAL_STATUSES: [SubscriptionStatus; 3] = [
    SubscriptionStatus::Trial,
    SubscriptionStatus::PendingUpgrade,
    SubscriptionStatus::AwaitingPayment,
];

/// Cached statuses a paying club can show while an upgrade is under review
const PAID_STATUSES: [SubscriptionStatus; 3] = [
    SubscriptionStatus::Active,
    SubscriptionStatus::PendingUpgrade,
    SubscriptionStatus::AwaitingPayment,
];

/// Trial reminder thresholds, latest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrialMilestone {
    FourteenDays,
    SevenDays,
    Ended,
}

impl TrialMilestone {
    /// The most advanced milestone reached, if any
    fn reached(end: OffsetDateTime, now: OffsetDateTime) -> Option<Self> {
        if now >= end {
            return Some(TrialMilestone::Ended);
        }
        match (end - now).whole_days() {
            0..=7 => Some(TrialMilestone::SevenDays),
            8..=14 => Some(TrialMilestone::FourteenDays),
            _ => None,
        }
    }

    fn template(&self) -> NotificationTemplate {
        match self {
            TrialMilestone::FourteenDays => NotificationTemplate::TrialEndsIn14Days,
            TrialMilestone::SevenDays => NotificationTemplate::TrialEndsIn7Days,
            TrialMilestone::Ended => NotificationTemplate::TrialEnded,
        }
    }

    fn already_sent(&self, tenant: &Tenant) -> bool {
        match self {
            TrialMilestone::FourteenDays => tenant.trial_notice_14d_sent_at.is_some(),
            TrialMilestone::SevenDays => tenant.trial_notice_7d_sent_at.is_some(),
            TrialMilestone::Ended => tenant.trial_notice_0d_sent_at.is_some(),
        }
    }

    /// Set this marker and every earlier one that is still unset
    fn mark(&self, tenant: &mut Tenant, now: OffsetDateTime) {
        tenant.trial_notice_14d_sent_at.get_or_insert(now);
        if matches!(self, TrialMilestone::SevenDays | TrialMilestone::Ended) {
            tenant.trial_notice_7d_sent_at.get_or_insert(now);
        }
        if matches!(self, TrialMilestone::Ended) {
            tenant.trial_notice_0d_sent_at.get_or_insert(now);
        }
    }
}

/// Counts from one runner pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub trial_reminders_sent: usize,
    pub trials_blocked: usize,
    pub subscriptions_renewed: usize,
    /// One per year advanced; a club renewed late can count several
    pub renewal_events: usize,
    pub cancellations_expired: usize,
    pub failures: usize,
}

impl RunSummary {
    pub fn transitions(&self) -> usize {
        self.trials_blocked + self.renewal_events + self.cancellations_expired
    }

    fn merge(&mut self, other: RunSummary) {
        self.trial_reminders_sent += other.trial_reminders_sent;
        self.trials_blocked += other.trials_blocked;
        self.subscriptions_renewed += other.subscriptions_renewed;
        self.renewal_events += other.renewal_events;
        self.cancellations_expired += other.cancellations_expired;
        self.failures += other.failures;
    }
}

#[derive(Clone)]
pub struct TransitionRunner {
    engine: LifecycleEngine,
}

impl TransitionRunner {
    pub fn new(engine: LifecycleEngine) -> Self {
        Self { engine }
    }

    /// Run every procedure once. Failures are counted, never propagated.
    pub async fn run_all(&self, now: OffsetDateTime) -> RunSummary {
        let mut summary = RunSummary::default();

        for (procedure, result) in [
            ("trial_monitor", self.trial_monitor(now).await),
            ("renewals", self.renew_subscriptions(now).await),
            ("cancellation_expiry", self.expire_cancellations(now).await),
        ] {
            match result {
                Ok(partial) => summary.merge(partial),
                Err(e) => {
                    tracing::error!(procedure = procedure, error = %e, "Lifecycle procedure failed");
                    summary.failures += 1;
                }
            }
        }

        tracing::info!(
            reminders = summary.trial_reminders_sent,
            blocked = summary.trials_blocked,
            renewed = summary.subscriptions_renewed,
            expired = summary.cancellations_expired,
            failures = summary.failures,
            "Lifecycle run complete"
        );
        summary
    }

    /// Send trial reminders at 14, 7 and 0 days and block clubs that stayed
    /// unconverted past the grace period
    pub async fn trial_monitor(&self, now: OffsetDateTime) -> BillingResult<RunSummary> {
        let mut summary = RunSummary::default();
        let trials = self.tenants_in(&TRIAL_STATUSES).await?;

        for tenant in trials
            .iter()
            .filter(|t| t.is_trialing() && t.subscription_end.is_some())
        {
            match self.check_trial(tenant.id, now).await {
                Ok(outcome) => match outcome.notification {
                    Some(NotificationTemplate::AccountBlocked) => summary.trials_blocked += 1,
                    Some(_) => summary.trial_reminders_sent += 1,
                    None => {}
                },
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant.id, error = %e, "Trial check failed");
                    summary.failures += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn check_trial(&self, tenant_id: Uuid, now: OffsetDateTime) -> BillingResult<TransitionOutcome> {
        let block_after = Duration::days(self.engine.config().block_after_days);

        self.engine
            .transition(tenant_id, "trial_monitor", |snapshot| {
                let mut tenant = snapshot.tenant;
                let end = match tenant.subscription_end {
                    Some(end) if tenant.is_trialing() => end,
                    _ => return Ok(Step::unchanged(tenant)),
                };

                if now > end + block_after {
                    let from = tenant.subscription_status;
                    tenant.blocked_at = Some(now);
                    TrialMilestone::Ended.mark(&mut tenant, now);
                    refresh_status(&mut tenant, false);
                    ensure_transition("block", from, tenant.subscription_status)?;

                    let event = SubscriptionEventBuilder::new(tenant.id, EventType::SubscriptionBlocked)
                        .period(tenant.subscription_start, tenant.subscription_end)
                        .actor(ActorType::System)
                        .meta("days_past_trial_end", serde_json::json!((now - end).whole_days()))
                        .build();

                    return Ok(Step::Commit(
                        Plan::new(TenantWrite::new(tenant).with_event(event))
                            .notify(NotificationTemplate::AccountBlocked, serde_json::json!({})),
                    ));
                }

                let Some(milestone) = TrialMilestone::reached(end, now) else {
                    return Ok(Step::unchanged(tenant));
                };
                if milestone.already_sent(&tenant) {
                    return Ok(Step::unchanged(tenant));
                }

                milestone.mark(&mut tenant, now);
                let context = serde_json::json!({
                    "days_remaining": (end - now).whole_days().max(0),
                    "trial_end": end.unix_timestamp(),
                });

                // Marker update only; reminders are not status transitions
                Ok(Step::Commit(
                    Plan::new(TenantWrite::new(tenant)).notify(milestone.template(), context),
                ))
            })
            .await
    }

    /// Advance paid periods that have ended by whole calendar years from the
    /// old end, one audit event per year
    pub async fn renew_subscriptions(&self, now: OffsetDateTime) -> BillingResult<RunSummary> {
        let mut summary = RunSummary::default();
        let active = self.tenants_in(&PAID_STATUSES).await?;

        for tenant in active
            .iter()
            .filter(|t| t.is_in_paid_term() && t.subscription_end.is_some_and(|end| end <= now))
        {
            match self.renew(tenant.id, now).await {
                Ok(0) => {}
                Ok(years) => {
                    summary.subscriptions_renewed += 1;
                    summary.renewal_events += years;
                }
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant.id, error = %e, "Renewal failed");
                    summary.failures += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Returns the number of years advanced
    async fn renew(&self, tenant_id: Uuid, now: OffsetDateTime) -> BillingResult<usize> {
        let mut years = 0;

        while years < MAX_RENEWAL_YEARS {
            let outcome = self
                .engine
                .transition(tenant_id, "renewal", |snapshot| {
                    let mut tenant = snapshot.tenant;
                    let old_end = match tenant.subscription_end {
                        Some(end) if end <= now && tenant.is_in_paid_term() => end,
                        _ => return Ok(Step::unchanged(tenant)),
                    };

                    tenant.subscription_start = Some(old_end);
                    tenant.subscription_end = Some(one_year_after(old_end));

                    let event = SubscriptionEventBuilder::new(tenant.id, EventType::Renewal)
                        .packages(tenant.active_package, tenant.active_package)
                        .period(tenant.subscription_start, tenant.subscription_end)
                        .actor(ActorType::System)
                        .build();

                    Ok(Step::Commit(Plan::new(
                        TenantWrite::new(tenant).with_event(event),
                    )))
                })
                .await?;

            if outcome.already_processed {
                return Ok(years);
            }
            years += 1;
        }

        tracing::warn!(
            tenant_id = %tenant_id,
            years = years,
            "Renewal cap reached; the next run continues the catch-up"
        );
        Ok(years)
    }

    /// Clubs cached in any of `statuses`
    async fn tenants_in(&self, statuses: &[SubscriptionStatus]) -> BillingResult<Vec<Tenant>> {
        let mut tenants = Vec::new();
        for status in statuses {
            tenants.extend(self.engine.store().tenants_in_status(*status).await?);
        }
        Ok(tenants)
    }

    /// Mark cancelled subscriptions expired once their paid period has ended
    pub async fn expire_cancellations(&self, now: OffsetDateTime) -> BillingResult<RunSummary> {
        let mut summary = RunSummary::default();
        let cancelled = self
            .engine
            .store()
            .tenants_in_status(SubscriptionStatus::Cancelled)
            .await?;

        for tenant in cancelled
            .iter()
            .filter(|t| t.subscription_end.map_or(true, |end| end <= now))
        {
            match self.expire(tenant.id, now).await {
                Ok(outcome) if !outcome.already_processed => summary.cancellations_expired += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(tenant_id = %tenant.id, error = %e, "Cancellation expiry failed");
                    summary.failures += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn expire(&self, tenant_id: Uuid, now: OffsetDateTime) -> BillingResult<TransitionOutcome> {
        self.engine
            .transition(tenant_id, "expire", |snapshot| {
                let mut tenant = snapshot.tenant;
                let due = tenant.subscription_end.map_or(true, |end| end <= now);
                if !due
                    || tenant.is_archived()
                    || tenant.subscription_status != SubscriptionStatus::Cancelled
                {
                    return Ok(Step::unchanged(tenant));
                }

                tenant.expired_at = Some(now);
                refresh_status(&mut tenant, false);
                ensure_transition("expire", SubscriptionStatus::Cancelled, tenant.subscription_status)?;

                let event = SubscriptionEventBuilder::new(tenant.id, EventType::SubscriptionExpired)
                    .period(tenant.subscription_start, tenant.subscription_end)
                    .actor(ActorType::System)
                    .build();

                Ok(Step::Commit(
                    Plan::new(TenantWrite::new(tenant).with_event(event))
                        .notify(NotificationTemplate::SubscriptionExpired, serde_json::json!({})),
                ))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_milestones() {
        let end = datetime!(2026-05-31 00:00 UTC);
        assert_eq!(TrialMilestone::reached(end, datetime!(2026-05-01 00:00 UTC)), None);
        assert_eq!(
            TrialMilestone::reached(end, datetime!(2026-05-17 00:00 UTC)),
            Some(TrialMilestone::FourteenDays)
        );
        assert_eq!(
            TrialMilestone::reached(end, datetime!(2026-05-24 00:00 UTC)),
            Some(TrialMilestone::SevenDays)
        );
        assert_eq!(
            TrialMilestone::reached(end, datetime!(2026-05-30 23:00 UTC)),
            Some(TrialMilestone::SevenDays)
        );
        assert_eq!(
            TrialMilestone::reached(end, datetime!(2026-06-02 00:00 UTC)),
            Some(TrialMilestone::Ended)
        );
    }

    #[test]
    fn test_marking_a_late_milestone_fills_earlier_markers() {
        let now = datetime!(2026-06-01 06:00 UTC);
        let mut tenant = Tenant::new_trial(Uuid::new_v4(), "VfL", None, now, 30);
        TrialMilestone::Ended.mark(&mut tenant, now);
        assert_eq!(tenant.trial_notice_14d_sent_at, Some(now));
        assert_eq!(tenant.trial_notice_7d_sent_at, Some(now));
        assert_eq!(tenant.trial_notice_0d_sent_at, Some(now));
    }

    #[test]
    fn test_summary_merge() {
        let mut total = RunSummary {
            renewal_events: 2,
            ..Default::default()
        };
        total.merge(RunSummary {
            trials_blocked: 1,
            failures: 1,
            ..Default::default()
        });
        assert_eq!(total.transitions(), 3);
        assert_eq!(total.failures, 1);
    }
}
