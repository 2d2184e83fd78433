//! Club self-service routes
//!
//! The club is always the one named in the caller's token.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use clubboard_billing::{ActorType, EntitlementDecision, Resource, Tenant, UpgradeRequest};
use clubboard_shared::{Package, PackageDefinition};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    routes::{settle, ActionResponse},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub tenant: Tenant,
    pub package: PackageDefinition,
    pub days_remaining: Option<i64>,
    pub entitlements: Vec<EntitlementDecision>,
    pub upgrade_requests: Vec<UpgradeRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeRequestBody {
    pub package: Package,
}

#[derive(Debug, Deserialize)]
pub struct BillingContactBody {
    pub email: String,
}

fn club_id(user: &AuthUser) -> ApiResult<uuid::Uuid> {
    user.require_club_id().map_err(|_| ApiError::Forbidden)
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionResponse>> {
    let club_id = club_id(&user)?;
    let tenant = state.billing.engine.tenant(club_id).await?;

    let mut entitlements = Vec::with_capacity(2);
    for resource in [Resource::Advertisement, Resource::Vacancy] {
        entitlements.push(state.billing.entitlements.check(club_id, resource).await?);
    }

    Ok(Json(SubscriptionResponse {
        package: tenant.active_package.definition(),
        days_remaining: tenant.days_remaining(time::OffsetDateTime::now_utc()),
        upgrade_requests: state.billing.engine.upgrade_requests(club_id).await?,
        entitlements,
        tenant,
    }))
}

pub async fn request_upgrade(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UpgradeRequestBody>,
) -> ApiResult<Json<ActionResponse>> {
    let club_id = club_id(&user)?;
    let result = state
        .billing
        .engine
        .request_upgrade(club_id, body.package)
        .await;
    settle(&state, club_id, result).await
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<ActionResponse>> {
    let club_id = club_id(&user)?;
    let result = state.billing.engine.cancel(club_id, ActorType::Club).await;
    settle(&state, club_id, result).await
}

pub async fn set_billing_contact(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<BillingContactBody>,
) -> ApiResult<Json<ActionResponse>> {
    let club_id = club_id(&user)?;
    let result = state
        .billing
        .engine
        .set_billing_contact(club_id, &body.email)
        .await;
    settle(&state, club_id, result).await
}

pub async fn check_entitlement(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(resource): Path<String>,
) -> ApiResult<Json<EntitlementDecision>> {
    let club_id = club_id(&user)?;
    let resource: Resource = resource
        .parse()
        .map_err(|e: clubboard_shared::ParseTagError| ApiError::Validation(e.to_string()))?;

    let decision = state.billing.entitlements.check(club_id, resource).await?;
    Ok(Json(decision))
}
