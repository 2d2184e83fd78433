//! Upgrade request workflow
//!
//! A club asks for a higher package, an admin approves or rejects, and the
//! payment collaborator confirms (see [`LifecycleEngine::confirm_payment`]).
//! There is at most one pending request per club and requests are never
//! queued: a second request for a different package is refused.

use clubboard_shared::{Package, SubscriptionStatus, UpgradeRequestStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, EventType, SubscriptionEventBuilder};
use crate::lifecycle::{ensure_not_archived, refresh_status, LifecycleEngine, Plan, Step, TransitionOutcome};
use crate::models::{Tenant, UpgradeRequest};
use crate::notify::NotificationTemplate;
use crate::status::ensure_transition;
use crate::store::{RequestWrite, TenantWrite};

impl LifecycleEngine {
    /// Open an upgrade request for `requested_package`.
    ///
    /// Retrying with the same package while the first request is still pending
    /// returns that request unchanged.
    pub async fn request_upgrade(
        &self,
        tenant_id: Uuid,
        requested_package: Package,
    ) -> BillingResult<TransitionOutcome> {
        let now = OffsetDateTime::now_utc();

        self.transition(tenant_id, "request_upgrade", |snapshot| {
            let mut tenant = snapshot.tenant.clone();
            let status = tenant.subscription_status;

            if tenant.is_archived()
                || status.is_locked_for_self_service()
                || status == SubscriptionStatus::AwaitingPayment
            {
                return Err(BillingError::InvalidTransition {
                    operation: "request_upgrade",
                    status,
                });
            }
            if requested_package <= tenant.active_package {
                return Err(BillingError::DowngradeNotAllowed {
                    current: tenant.active_package,
                    requested: requested_package,
                });
            }
            if let Some(pending) = snapshot.pending_request() {
                if pending.requested_package == requested_package {
                    return Ok(Step::Unchanged {
                        tenant,
                        request: Some(pending.clone()),
                    });
                }
                return Err(BillingError::DuplicateRequest(pending.id));
            }
            ensure_transition("request_upgrade", status, SubscriptionStatus::PendingUpgrade)?;

            let request =
                UpgradeRequest::new_pending(tenant.id, tenant.active_package, requested_package, now);
            refresh_status(&mut tenant, true);

            let event = SubscriptionEventBuilder::new(tenant.id, EventType::UpgradeRequested)
                .packages(tenant.active_package, requested_package)
                .actor(ActorType::Club)
                .meta("request_id", serde_json::json!(request.id))
                .build();

            Ok(Step::Commit(Plan::new(
                TenantWrite::new(tenant)
                    .with_request(RequestWrite::Insert(request))
                    .with_event(event),
            )))
        })
        .await
    }

    /// Approve a pending request. The club keeps its current entitlements
    /// until payment for the new package is confirmed.
    pub async fn approve_upgrade(&self, request_id: Uuid) -> BillingResult<TransitionOutcome> {
        let tenant_id = self.request_owner(request_id).await?;
        let now = OffsetDateTime::now_utc();

        self.transition(tenant_id, "approve_upgrade", |snapshot| {
            let request = snapshot
                .request(request_id)
                .ok_or_else(|| BillingError::NotFound(format!("Upgrade request {request_id}")))?;
            if !request.is_pending() {
                return Err(BillingError::AlreadyProcessed(format!(
                    "Upgrade request {request_id} is {}",
                    request.status
                )));
            }

            let mut tenant = snapshot.tenant.clone();
            check_reviewable(&tenant, "approve_upgrade")?;
            if request.requested_package <= tenant.active_package {
                return Err(BillingError::DowngradeNotAllowed {
                    current: tenant.active_package,
                    requested: request.requested_package,
                });
            }

            let mut approved = request.clone();
            approved.status = UpgradeRequestStatus::Approved;
            approved.reviewed_at = Some(now);

            let from = tenant.subscription_status;
            tenant.pending_package = Some(approved.requested_package);
            refresh_status(&mut tenant, false);
            ensure_transition("approve_upgrade", from, tenant.subscription_status)?;

            let event = SubscriptionEventBuilder::new(tenant.id, EventType::UpgradeApproved)
                .packages(tenant.active_package, approved.requested_package)
                .actor(ActorType::Admin)
                .meta("request_id", serde_json::json!(request_id))
                .build();
            let context = serde_json::json!({
                "package": approved.requested_package,
                "price_cents": approved.requested_package.definition().yearly_price_cents,
            });

            Ok(Step::Commit(
                Plan::new(
                    TenantWrite::new(tenant)
                        .with_request(RequestWrite::Update {
                            expected: UpgradeRequestStatus::Pending,
                            request: approved,
                        })
                        .with_event(event),
                )
                .notify(NotificationTemplate::UpgradeApproved, context),
            ))
        })
        .await
    }

    /// Reject a pending request, or withdraw an approved one that was never paid
    pub async fn reject_upgrade(
        &self,
        request_id: Uuid,
        reason: Option<String>,
    ) -> BillingResult<TransitionOutcome> {
        let tenant_id = self.request_owner(request_id).await?;
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        let now = OffsetDateTime::now_utc();

        self.transition(tenant_id, "reject_upgrade", |snapshot| {
            let request = snapshot
                .request(request_id)
                .ok_or_else(|| BillingError::NotFound(format!("Upgrade request {request_id}")))?;
            if request.status.is_final() {
                return Err(BillingError::AlreadyProcessed(format!(
                    "Upgrade request {request_id} is {}",
                    request.status
                )));
            }

            let mut tenant = snapshot.tenant.clone();
            ensure_not_archived(&tenant, "reject_upgrade")?;

            let expected = request.status;
            let mut rejected = request.clone();
            rejected.status = UpgradeRequestStatus::Rejected;
            rejected.review_note = reason.clone();
            rejected.reviewed_at = Some(now);

            let from = tenant.subscription_status;
            if expected == UpgradeRequestStatus::Approved {
                tenant.pending_package = None;
            }
            refresh_status(&mut tenant, false);
            ensure_transition("reject_upgrade", from, tenant.subscription_status)?;

            let mut event = SubscriptionEventBuilder::new(tenant.id, EventType::UpgradeRejected)
                .packages(tenant.active_package, rejected.requested_package)
                .actor(ActorType::Admin)
                .meta("request_id", serde_json::json!(request_id))
                .meta("request_status", serde_json::json!(expected));
            if let Some(reason) = &reason {
                event = event.meta("reason", serde_json::json!(reason));
            }
            let context = serde_json::json!({
                "package": rejected.requested_package,
                "reason": reason,
            });

            Ok(Step::Commit(
                Plan::new(
                    TenantWrite::new(tenant)
                        .with_request(RequestWrite::Update {
                            expected,
                            request: rejected,
                        })
                        .with_event(event.build()),
                )
                .notify(NotificationTemplate::UpgradeRejected, context),
            ))
        })
        .await
    }

    async fn request_owner(&self, request_id: Uuid) -> BillingResult<Uuid> {
        self.store()
            .upgrade_request(request_id)
            .await?
            .map(|r| r.tenant_id)
            .ok_or_else(|| BillingError::NotFound(format!("Upgrade request {request_id}")))
    }
}

/// Guards an admin decision on a request
fn check_reviewable(tenant: &Tenant, operation: &'static str) -> BillingResult<()> {
    ensure_not_archived(tenant, operation)?;
    match tenant.subscription_status {
        SubscriptionStatus::Blocked => Err(BillingError::TenantBlocked),
        SubscriptionStatus::Cancelled => Err(BillingError::TenantCancelled),
        SubscriptionStatus::Expired => Err(BillingError::InvalidTransition {
            operation,
            status: tenant.subscription_status,
        }),
        _ => Ok(()),
    }
}
