//! HTTP routes
//!
//! Handlers are thin adapters: authorise, parse, call the lifecycle engine,
//! translate the outcome. No business rule lives here.

pub mod admin;
pub mod club;
pub mod cron;
pub mod payments;

#[cfg(test)]
mod router_tests;

use axum::{
    http::HeaderMap,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use clubboard_billing::{BillingError, BillingResult, TransitionOutcome};
use clubboard_shared::SubscriptionStatus;
use serde::Serialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{
    auth::{require_admin, require_club},
    error::ApiResult,
    state::AppState,
};

/// Response for every state-changing operation
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub tenant_id: Uuid,
    pub status: SubscriptionStatus,
    pub already_processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl From<TransitionOutcome> for ActionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            tenant_id: outcome.tenant.id,
            status: outcome.tenant.subscription_status,
            already_processed: outcome.already_processed,
            request_id: outcome.request.map(|r| r.id),
        }
    }
}

/// Report a replay of a finished operation as success with the current status
pub(crate) async fn settle(
    state: &AppState,
    tenant_id: Uuid,
    result: BillingResult<TransitionOutcome>,
) -> ApiResult<Json<ActionResponse>> {
    match result {
        Ok(outcome) => Ok(Json(outcome.into())),
        Err(BillingError::AlreadyProcessed(detail)) => {
            tracing::debug!(tenant_id = %tenant_id, detail = %detail, "Replayed operation");
            let tenant = state.billing.engine.tenant(tenant_id).await?;
            Ok(Json(ActionResponse {
                tenant_id,
                status: tenant.subscription_status,
                already_processed: true,
                request_id: None,
            }))
        }
        Err(e) => Err(e.into()),
    }
}

/// Compare a header against a configured secret in constant time.
/// An unset secret matches nothing.
pub(crate) fn header_matches_secret(headers: &HeaderMap, name: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|provided| bool::from(provided.as_bytes().ct_eq(secret.as_bytes())))
}

pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/clubs", post(admin::create_club))
        .route("/clubs/{id}", get(admin::get_club))
        .route("/clubs/{id}/events", get(admin::club_events))
        .route("/clubs/{id}/activate", post(admin::activate_club))
        .route("/clubs/{id}/override", post(admin::set_override))
        .route("/clubs/{id}/unblock", post(admin::unblock_club))
        .route("/clubs/{id}/cancel", post(admin::cancel_club))
        .route("/clubs/{id}/archive", post(admin::archive_club))
        .route("/clubs/{id}/restore", post(admin::restore_club))
        .route("/upgrade-requests/{id}/approve", post(admin::approve_request))
        .route("/upgrade-requests/{id}/reject", post(admin::reject_request))
        .route("/billing/invariants", get(admin::run_invariants))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_admin,
        ));

    let club = Router::new()
        .route("/subscription", get(club::get_subscription))
        .route("/upgrade-requests", post(club::request_upgrade))
        .route("/cancel", post(club::cancel_subscription))
        .route("/billing-contact", put(club::set_billing_contact))
        .route("/entitlements/{resource}", get(club::check_entitlement))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_club,
        ));

    let api = Router::new()
        .nest("/admin", admin)
        .nest("/club", club)
        .route("/webhooks/payments", post(payments::payment_callback))
        .route("/internal/cron/lifecycle", post(cron::run_lifecycle));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
