//! Internal cron trigger
//!
//! Lets an external scheduler drive the lifecycle runner when the worker
//! binary is not deployed. Guarded by `x-cron-secret`.

use axum::{extract::State, http::HeaderMap, Json};
use clubboard_billing::RunSummary;
use time::OffsetDateTime;

use crate::{
    error::{ApiError, ApiResult},
    routes::header_matches_secret,
    state::AppState,
};

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub async fn run_lifecycle(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<RunSummary>> {
    if !header_matches_secret(&headers, CRON_SECRET_HEADER, &state.config.cron_secret) {
        tracing::warn!("Lifecycle cron trigger rejected");
        return Err(ApiError::Unauthorized);
    }

    let summary = state.billing.runner.run_all(OffsetDateTime::now_utc()).await;
    Ok(Json(summary))
}
