//! Subscription lifecycle engine
//!
//! Every operation follows the same shape: read a [`Snapshot`] of the club,
//! validate the guard against it, plan the new row, then commit with a
//! version check. A lost race re-reads and re-validates, so a guard is always
//! evaluated against the state the write actually lands on.
//!
//! Notifications go out only after the commit succeeded. A failed send is
//! logged and does not affect the outcome.

use std::sync::Arc;

use clubboard_shared::{Package, SubscriptionStatus, UpgradeRequestStatus};
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, EventType, SubscriptionEventBuilder};
use crate::models::{Tenant, UpgradeRequest};
use crate::notify::{NotificationTemplate, Notifier};
use crate::status::{derive_status, ensure_transition};
use crate::store::{CommitOutcome, RequestWrite, SubscriptionStore, TenantWrite};

/// Attempts per operation before giving up with `ConcurrentModification`
pub const MAX_COMMIT_ATTEMPTS: usize = 3;

/// The same calendar date one year later. Feb 29 maps to Feb 28.
pub fn one_year_after(at: OffsetDateTime) -> OffsetDateTime {
    let year = at.year() + 1;
    at.replace_year(year)
        .or_else(|_| at.replace_day(28).and_then(|d| d.replace_year(year)))
        .unwrap_or(at + Duration::days(365))
}

/// Loose sanity check for billing contacts; deliverability is Resend's problem
pub fn validate_billing_email(raw: &str) -> BillingResult<String> {
    let email = raw.trim();
    let invalid = || BillingError::Validation(format!("'{email}' is not a valid email address"));

    if email.is_empty() || email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(email.to_string())
}

/// A club row together with its upgrade requests, read at one point in time
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub tenant: Tenant,
    pub requests: Vec<UpgradeRequest>,
}

impl Snapshot {
    pub fn pending_request(&self) -> Option<&UpgradeRequest> {
        self.requests.iter().find(|r| r.is_pending())
    }

    pub fn approved_request(&self) -> Option<&UpgradeRequest> {
        self.requests
            .iter()
            .find(|r| r.status == UpgradeRequestStatus::Approved)
    }

    pub fn request(&self, request_id: Uuid) -> Option<&UpgradeRequest> {
        self.requests.iter().find(|r| r.id == request_id)
    }
}

/// A planned write plus the notification to send once it is committed
pub(crate) struct Plan {
    pub write: TenantWrite,
    pub notification: Option<(NotificationTemplate, serde_json::Value)>,
}

impl Plan {
    pub fn new(write: TenantWrite) -> Self {
        Self {
            write,
            notification: None,
        }
    }

    pub fn notify(mut self, template: NotificationTemplate, context: serde_json::Value) -> Self {
        self.notification = Some((template, context));
        self
    }
}

pub(crate) enum Step {
    /// The operation already took effect; nothing is written
    Unchanged {
        tenant: Tenant,
        request: Option<UpgradeRequest>,
    },
    Commit(Plan),
}

impl Step {
    pub fn unchanged(tenant: Tenant) -> Self {
        Step::Unchanged {
            tenant,
            request: None,
        }
    }
}

/// Result of a lifecycle operation
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    /// The club as stored after the operation
    pub tenant: Tenant,
    /// The upgrade request the operation created or changed
    pub request: Option<UpgradeRequest>,
    /// True when the operation was a no-op because it had already happened
    pub already_processed: bool,
    /// Notification attempted after the commit, if any
    pub notification: Option<NotificationTemplate>,
}

/// Refresh the cached status column from the markers
pub(crate) fn refresh_status(tenant: &mut Tenant, has_pending_request: bool) {
    tenant.subscription_status = derive_status(tenant, has_pending_request);
}

pub(crate) fn ensure_not_archived(tenant: &Tenant, operation: &'static str) -> BillingResult<()> {
    if tenant.is_archived() {
        return Err(BillingError::InvalidTransition {
            operation,
            status: tenant.subscription_status,
        });
    }
    Ok(())
}

/// State machine core over a [`SubscriptionStore`]
#[derive(Clone)]
pub struct LifecycleEngine {
    store: Arc<dyn SubscriptionStore>,
    notifier: Arc<dyn Notifier>,
    config: LifecycleConfig,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        notifier: Arc<dyn Notifier>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    pub fn config(&self) -> LifecycleConfig {
        self.config
    }

    pub async fn tenant(&self, tenant_id: Uuid) -> BillingResult<Tenant> {
        self.store
            .tenant(tenant_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Club {tenant_id}")))
    }

    pub async fn upgrade_requests(&self, tenant_id: Uuid) -> BillingResult<Vec<UpgradeRequest>> {
        self.store.requests_for_tenant(tenant_id).await
    }

    pub(crate) async fn snapshot(&self, tenant_id: Uuid) -> BillingResult<Snapshot> {
        let tenant = self.tenant(tenant_id).await?;
        let requests = self.store.requests_for_tenant(tenant_id).await?;
        Ok(Snapshot { tenant, requests })
    }

    /// Run `planner` against fresh snapshots until its write commits
    pub(crate) async fn transition<F>(
        &self,
        tenant_id: Uuid,
        operation: &'static str,
        mut planner: F,
    ) -> BillingResult<TransitionOutcome>
    where
        F: FnMut(Snapshot) -> BillingResult<Step> + Send,
    {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let snapshot = self.snapshot(tenant_id).await?;

            let Plan {
                write,
                notification,
            } = match planner(snapshot)? {
                Step::Unchanged { tenant, request } => {
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        operation = operation,
                        "Operation already applied, nothing to do"
                    );
                    return Ok(TransitionOutcome {
                        tenant,
                        request,
                        already_processed: true,
                        notification: None,
                    });
                }
                Step::Commit(plan) => plan,
            };

            let request = write.request.as_ref().map(|r| r.request().clone());
            let event_type = write.event.as_ref().map(|e| e.event_type);

            match self.store.commit(write).await? {
                CommitOutcome::Applied(tenant) => {
                    tracing::info!(
                        tenant_id = %tenant_id,
                        operation = operation,
                        status = %tenant.subscription_status,
                        package = %tenant.active_package,
                        event = ?event_type,
                        "Subscription transition committed"
                    );

                    let sent = match notification {
                        Some((template, context)) => {
                            self.notify(&tenant, template, context).await;
                            Some(template)
                        }
                        None => None,
                    };

                    return Ok(TransitionOutcome {
                        tenant,
                        request,
                        already_processed: false,
                        notification: sent,
                    });
                }
                CommitOutcome::Conflict => {
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        operation = operation,
                        attempt = attempt,
                        "Club changed concurrently, re-validating"
                    );
                }
            }
        }

        tracing::warn!(
            tenant_id = %tenant_id,
            operation = operation,
            attempts = MAX_COMMIT_ATTEMPTS,
            "Giving up after repeated write conflicts"
        );
        Err(BillingError::ConcurrentModification(format!(
            "Club {tenant_id} was modified by another process during {operation}. Please retry."
        )))
    }

    async fn notify(&self, tenant: &Tenant, template: NotificationTemplate, context: serde_json::Value) {
        if let Err(e) = self.notifier.send(tenant, template, context).await {
            tracing::warn!(
                tenant_id = %tenant.id,
                template = %template,
                error = %e,
                "Failed to send notification, state change is kept"
            );
        }
    }

    // =========================================================================
    // Club lifecycle
    // =========================================================================

    /// Register an approved club and start its trial on the basic package
    pub async fn start_trial(
        &self,
        tenant_id: Uuid,
        name: &str,
        billing_email: Option<String>,
    ) -> BillingResult<Tenant> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BillingError::Validation(
                "Club name must not be empty".to_string(),
            ));
        }
        let billing_email = billing_email
            .as_deref()
            .map(validate_billing_email)
            .transpose()?;

        let now = OffsetDateTime::now_utc();
        let tenant = Tenant::new_trial(tenant_id, name, billing_email, now, self.config.trial_days);
        let event = SubscriptionEventBuilder::new(tenant_id, EventType::TrialStarted)
            .period(tenant.subscription_start, tenant.subscription_end)
            .actor(ActorType::Admin)
            .meta("package", serde_json::json!(tenant.active_package))
            .build();

        self.store.insert_tenant(&tenant, event).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            trial_days = self.config.trial_days,
            "Club trial started"
        );
        Ok(tenant)
    }

    /// Activate the approved package once the payment collaborator confirms it.
    ///
    /// Redelivered confirmations for a club that is already active on the
    /// confirmed package succeed without effect.
    pub async fn confirm_payment(
        &self,
        tenant_id: Uuid,
        confirmed_package: Package,
        payment_reference: Option<String>,
    ) -> BillingResult<TransitionOutcome> {
        let now = OffsetDateTime::now_utc();

        self.transition(tenant_id, "confirm_payment", |snapshot| {
            let mut tenant = snapshot.tenant.clone();
            ensure_not_archived(&tenant, "confirm_payment")?;

            if tenant.is_in_paid_term()
                && tenant.pending_package.is_none()
                && tenant.active_package == confirmed_package
            {
                return Ok(Step::unchanged(tenant));
            }
            if tenant.subscription_status != SubscriptionStatus::AwaitingPayment {
                return Err(BillingError::InvalidState(tenant.subscription_status));
            }
            let expected = tenant
                .pending_package
                .ok_or(BillingError::InvalidState(tenant.subscription_status))?;
            if expected != confirmed_package {
                return Err(BillingError::PackageMismatch {
                    expected,
                    confirmed: confirmed_package,
                });
            }

            let old_package = tenant.active_package;
            tenant.active_package = expected;
            tenant.pending_package = None;
            tenant.activated_at.get_or_insert(now);
            tenant.subscription_start = Some(now);
            tenant.subscription_end = Some(one_year_after(now));
            refresh_status(&mut tenant, false);
            ensure_transition(
                "confirm_payment",
                snapshot.tenant.subscription_status,
                tenant.subscription_status,
            )?;

            let mut write = TenantWrite::new(tenant.clone());
            if let Some(approved) = snapshot.approved_request() {
                let mut completed = approved.clone();
                completed.status = UpgradeRequestStatus::Completed;
                completed.completed_at = Some(now);
                write = write.with_request(RequestWrite::Update {
                    expected: UpgradeRequestStatus::Approved,
                    request: completed,
                });
            }

            let mut event = SubscriptionEventBuilder::new(tenant.id, EventType::SubscriptionActivated)
                .packages(old_package, expected)
                .period(tenant.subscription_start, tenant.subscription_end)
                .actor(ActorType::PaymentProvider);
            if let Some(reference) = &payment_reference {
                event = event.meta("payment_reference", serde_json::json!(reference));
            }

            Ok(Step::Commit(
                Plan::new(write.with_event(event.build())).notify(
                    NotificationTemplate::SubscriptionActivated,
                    serde_json::json!({ "package": expected }),
                ),
            ))
        })
        .await
    }

    /// Cancel an active or trialing subscription. Access continues until
    /// `subscription_end`, when the runner marks it expired.
    ///
    /// An upgrade request still under review or awaiting payment is withdrawn.
    pub async fn cancel(&self, tenant_id: Uuid, actor: ActorType) -> BillingResult<TransitionOutcome> {
        let now = OffsetDateTime::now_utc();

        self.transition(tenant_id, "cancel", |snapshot| {
            let mut tenant = snapshot.tenant.clone();
            ensure_not_archived(&tenant, "cancel")?;

            if tenant.subscription_status == SubscriptionStatus::Cancelled {
                return Ok(Step::unchanged(tenant));
            }
            if !(tenant.is_trialing() || tenant.is_in_paid_term()) {
                return Err(BillingError::InvalidTransition {
                    operation: "cancel",
                    status: tenant.subscription_status,
                });
            }

            let from = tenant.subscription_status;
            tenant.cancelled_at = Some(now);
            tenant.pending_package = None;
            if tenant.subscription_end.is_none() {
                tenant.subscription_end = Some(now);
            }
            refresh_status(&mut tenant, false);
            ensure_transition("cancel", from, tenant.subscription_status)?;

            let mut write = TenantWrite::new(tenant.clone());
            let mut event = SubscriptionEventBuilder::new(tenant.id, EventType::SubscriptionCancelled)
                .period(tenant.subscription_start, tenant.subscription_end)
                .actor(actor)
                .meta("previous_status", serde_json::json!(from));

            if let Some(open) = snapshot.approved_request().or_else(|| snapshot.pending_request()) {
                let mut withdrawn = open.clone();
                withdrawn.status = UpgradeRequestStatus::Rejected;
                withdrawn.review_note = Some("Withdrawn by cancellation".to_string());
                withdrawn.reviewed_at = Some(now);
                event = event.meta("withdrawn_request_id", serde_json::json!(open.id));
                write = write.with_request(RequestWrite::Update {
                    expected: open.status,
                    request: withdrawn,
                });
            }

            Ok(Step::Commit(
                Plan::new(write.with_event(event.build())).notify(
                    NotificationTemplate::SubscriptionCancelled,
                    serde_json::json!({ "period_end": tenant.subscription_end.map(|e| e.unix_timestamp()) }),
                ),
            ))
        })
        .await
    }

    /// Update the billing contact. Not a status transition, so no audit event.
    pub async fn set_billing_contact(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> BillingResult<TransitionOutcome> {
        let email = validate_billing_email(email)?;

        self.transition(tenant_id, "set_billing_contact", |snapshot| {
            let mut tenant = snapshot.tenant;
            ensure_not_archived(&tenant, "set_billing_contact")?;

            if tenant.billing_email.as_deref() == Some(email.as_str()) {
                return Ok(Step::unchanged(tenant));
            }
            tenant.billing_email = Some(email.clone());
            Ok(Step::Commit(Plan::new(TenantWrite::new(tenant))))
        })
        .await
    }

    // =========================================================================
    // Administrative overrides
    // =========================================================================

    /// Activate a club without payment, e.g. for partner clubs.
    ///
    /// Clears block, cancellation and expiry, grants any approved-but-unpaid
    /// package and starts a one-year period. A still-pending request is
    /// rejected as superseded.
    pub async fn admin_override_activate(&self, tenant_id: Uuid) -> BillingResult<TransitionOutcome> {
        let now = OffsetDateTime::now_utc();

        self.transition(tenant_id, "admin_override_activate", |snapshot| {
            let mut tenant = snapshot.tenant.clone();
            ensure_not_archived(&tenant, "admin_override_activate")?;

            let old_package = tenant.active_package;
            tenant.admin_override = true;
            tenant.blocked_at = None;
            tenant.cancelled_at = None;
            tenant.expired_at = None;
            if let Some(approved) = tenant.pending_package.take() {
                tenant.active_package = approved;
            }
            tenant.subscription_start = Some(now);
            tenant.subscription_end = Some(one_year_after(now));
            refresh_status(&mut tenant, false);

            let mut write = TenantWrite::new(tenant.clone());
            if let Some(approved) = snapshot.approved_request() {
                let mut completed = approved.clone();
                completed.status = UpgradeRequestStatus::Completed;
                completed.completed_at = Some(now);
                write = write.with_request(RequestWrite::Update {
                    expected: UpgradeRequestStatus::Approved,
                    request: completed,
                });
            } else if let Some(pending) = snapshot.pending_request() {
                let mut superseded = pending.clone();
                superseded.status = UpgradeRequestStatus::Rejected;
                superseded.review_note = Some("Superseded by admin activation".to_string());
                superseded.reviewed_at = Some(now);
                write = write.with_request(RequestWrite::Update {
                    expected: UpgradeRequestStatus::Pending,
                    request: superseded,
                });
            }

            let event = SubscriptionEventBuilder::new(tenant.id, EventType::AdminOverrideActivated)
                .packages(old_package, tenant.active_package)
                .period(tenant.subscription_start, tenant.subscription_end)
                .actor(ActorType::Admin)
                .meta("previous_status", serde_json::json!(snapshot.tenant.subscription_status))
                .build();

            Ok(Step::Commit(
                Plan::new(write.with_event(event)).notify(
                    NotificationTemplate::SubscriptionActivated,
                    serde_json::json!({ "package": tenant.active_package }),
                ),
            ))
        })
        .await
    }

    /// Toggle the override flag without touching the period
    pub async fn set_admin_override(
        &self,
        tenant_id: Uuid,
        enabled: bool,
    ) -> BillingResult<TransitionOutcome> {
        self.transition(tenant_id, "set_admin_override", |snapshot| {
            let has_pending = snapshot.pending_request().is_some();
            let mut tenant = snapshot.tenant;
            ensure_not_archived(&tenant, "set_admin_override")?;

            if tenant.admin_override == enabled {
                return Ok(Step::unchanged(tenant));
            }
            tenant.admin_override = enabled;
            refresh_status(&mut tenant, has_pending);

            let event_type = if enabled {
                EventType::AdminOverrideEnabled
            } else {
                EventType::AdminOverrideDisabled
            };
            let event = SubscriptionEventBuilder::new(tenant.id, event_type)
                .actor(ActorType::Admin)
                .build();

            Ok(Step::Commit(Plan::new(
                TenantWrite::new(tenant).with_event(event),
            )))
        })
        .await
    }

    /// Lift a block. A club whose period has run out gets a fresh year.
    pub async fn unblock(&self, tenant_id: Uuid) -> BillingResult<TransitionOutcome> {
        let now = OffsetDateTime::now_utc();

        self.transition(tenant_id, "unblock", |snapshot| {
            let has_pending = snapshot.pending_request().is_some();
            let mut tenant = snapshot.tenant;
            ensure_not_archived(&tenant, "unblock")?;

            if tenant.subscription_status != SubscriptionStatus::Blocked {
                return Err(BillingError::InvalidTransition {
                    operation: "unblock",
                    status: tenant.subscription_status,
                });
            }

            tenant.blocked_at = None;
            tenant.cancelled_at = None;
            tenant.expired_at = None;
            tenant.activated_at.get_or_insert(now);
            let period_over = tenant.subscription_end.map_or(true, |end| end <= now);
            if period_over {
                tenant.subscription_start = Some(now);
                tenant.subscription_end = Some(one_year_after(now));
            }
            refresh_status(&mut tenant, has_pending);

            let event = SubscriptionEventBuilder::new(tenant.id, EventType::Unblocked)
                .period(tenant.subscription_start, tenant.subscription_end)
                .actor(ActorType::Admin)
                .meta("new_period", serde_json::json!(period_over))
                .build();

            Ok(Step::Commit(Plan::new(
                TenantWrite::new(tenant).with_event(event),
            )))
        })
        .await
    }

    /// Bring back an archived, blocked or expired club as active with a fresh year
    pub async fn restore(&self, tenant_id: Uuid) -> BillingResult<TransitionOutcome> {
        let now = OffsetDateTime::now_utc();

        self.transition(tenant_id, "restore", |snapshot| {
            let has_pending = snapshot.pending_request().is_some();
            let mut tenant = snapshot.tenant;

            let recoverable = tenant.is_archived()
                || matches!(
                    tenant.subscription_status,
                    SubscriptionStatus::Blocked | SubscriptionStatus::Expired
                );
            if !recoverable {
                return Err(BillingError::InvalidTransition {
                    operation: "restore",
                    status: tenant.subscription_status,
                });
            }

            let was_archived = tenant.is_archived();
            let previous_status = tenant.subscription_status;
            tenant.archived_at = None;
            tenant.blocked_at = None;
            tenant.cancelled_at = None;
            tenant.expired_at = None;
            tenant.activated_at.get_or_insert(now);
            tenant.subscription_start = Some(now);
            tenant.subscription_end = Some(one_year_after(now));
            refresh_status(&mut tenant, has_pending);

            let event = SubscriptionEventBuilder::new(tenant.id, EventType::Restored)
                .period(tenant.subscription_start, tenant.subscription_end)
                .actor(ActorType::Admin)
                .meta("previous_status", serde_json::json!(previous_status))
                .meta("was_archived", serde_json::json!(was_archived))
                .build();

            Ok(Step::Commit(Plan::new(
                TenantWrite::new(tenant).with_event(event),
            )))
        })
        .await
    }

    /// Soft-delete a club. Archived clubs are skipped by the runner and
    /// refuse everything except `restore`.
    pub async fn archive(&self, tenant_id: Uuid) -> BillingResult<TransitionOutcome> {
        let now = OffsetDateTime::now_utc();

        self.transition(tenant_id, "archive", |snapshot| {
            let mut tenant = snapshot.tenant;
            if tenant.is_archived() {
                return Ok(Step::unchanged(tenant));
            }

            tenant.archived_at = Some(now);
            let event = SubscriptionEventBuilder::new(tenant.id, EventType::Archived)
                .actor(ActorType::Admin)
                .meta("status", serde_json::json!(tenant.subscription_status))
                .build();

            Ok(Step::Commit(Plan::new(
                TenantWrite::new(tenant).with_event(event),
            )))
        })
        .await
    }
}
