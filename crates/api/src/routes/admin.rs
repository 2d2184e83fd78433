//! Platform admin routes
//!
//! Club registration, upgrade review, overrides and recovery. Protected by
//! the `require_admin` middleware.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use clubboard_billing::{
    derive_status, ActorType, BillingError, InvariantCheckSummary, SubscriptionEvent, Tenant,
    UpgradeRequest,
};
use clubboard_shared::SubscriptionStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    routes::{settle, ActionResponse},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateClubRequest {
    /// Id assigned by the club directory; generated when absent
    pub club_id: Option<Uuid>,
    pub name: String,
    pub billing_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClubDetailResponse {
    pub tenant: Tenant,
    /// Status recomputed from the markers, for comparison with the cached column
    pub derived_status: SubscriptionStatus,
    pub upgrade_requests: Vec<UpgradeRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequestBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetOverrideRequest {
    pub enabled: bool,
}

// =============================================================================
// Clubs
// =============================================================================

/// Register an approved club and start its trial
pub async fn create_club(
    State(state): State<AppState>,
    Json(req): Json<CreateClubRequest>,
) -> ApiResult<(StatusCode, Json<Tenant>)> {
    let club_id = req.club_id.unwrap_or_else(Uuid::new_v4);
    let tenant = state
        .billing
        .engine
        .start_trial(club_id, &req.name, req.billing_email)
        .await?;

    Ok((StatusCode::CREATED, Json(tenant)))
}

pub async fn get_club(
    State(state): State<AppState>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<Json<ClubDetailResponse>> {
    let engine = &state.billing.engine;
    let tenant = engine.tenant(club_id).await?;
    let upgrade_requests = engine.upgrade_requests(club_id).await?;
    let derived_status = derive_status(&tenant, upgrade_requests.iter().any(|r| r.is_pending()));

    Ok(Json(ClubDetailResponse {
        tenant,
        derived_status,
        upgrade_requests,
    }))
}

pub async fn club_events(
    State(state): State<AppState>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SubscriptionEvent>>> {
    // 404 for unknown clubs rather than an empty log
    state.billing.engine.tenant(club_id).await?;
    let events = state.billing.audit.events_for_tenant(club_id).await?;
    Ok(Json(events))
}

pub async fn activate_club(
    State(state): State<AppState>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let result = state.billing.engine.admin_override_activate(club_id).await;
    settle(&state, club_id, result).await
}

pub async fn set_override(
    State(state): State<AppState>,
    Path(club_id): Path<Uuid>,
    Json(req): Json<SetOverrideRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let result = state
        .billing
        .engine
        .set_admin_override(club_id, req.enabled)
        .await;
    settle(&state, club_id, result).await
}

pub async fn unblock_club(
    State(state): State<AppState>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let result = state.billing.engine.unblock(club_id).await;
    settle(&state, club_id, result).await
}

pub async fn cancel_club(
    State(state): State<AppState>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let result = state.billing.engine.cancel(club_id, ActorType::Admin).await;
    settle(&state, club_id, result).await
}

pub async fn archive_club(
    State(state): State<AppState>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let result = state.billing.engine.archive(club_id).await;
    settle(&state, club_id, result).await
}

pub async fn restore_club(
    State(state): State<AppState>,
    Path(club_id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let result = state.billing.engine.restore(club_id).await;
    settle(&state, club_id, result).await
}

// =============================================================================
// Upgrade review
// =============================================================================

async fn request_owner(state: &AppState, request_id: Uuid) -> ApiResult<Uuid> {
    state
        .billing
        .engine
        .store()
        .upgrade_request(request_id)
        .await?
        .map(|r| r.tenant_id)
        .ok_or_else(|| ApiError::NotFound(format!("Upgrade request {request_id}")))
}

pub async fn approve_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let result = state.billing.engine.approve_upgrade(request_id).await;
    if let Err(BillingError::AlreadyProcessed(_)) = &result {
        let owner = request_owner(&state, request_id).await?;
        return settle(&state, owner, result).await;
    }
    Ok(Json(result?.into()))
}

pub async fn reject_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<RejectRequestBody>,
) -> ApiResult<Json<ActionResponse>> {
    let result = state
        .billing
        .engine
        .reject_upgrade(request_id, body.reason)
        .await;
    if let Err(BillingError::AlreadyProcessed(_)) = &result {
        let owner = request_owner(&state, request_id).await?;
        return settle(&state, owner, result).await;
    }
    Ok(Json(result?.into()))
}

// =============================================================================
// Invariants
// =============================================================================

pub async fn run_invariants(
    State(state): State<AppState>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let summary = state.billing.invariants.run_all_checks().await?;
    Ok(Json(summary))
}
