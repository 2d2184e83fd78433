//! Payment provider callback
//!
//! The provider POSTs `{ club_id, package, event_id? }` once a yearly invoice
//! is paid, signed with `x-payment-signature: hex(hmac_sha256(secret, body))`.
//! Redeliveries are expected and answered with `already_processed: true`.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use clubboard_shared::Package;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    routes::{settle, ActionResponse},
    state::AppState,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

#[derive(Debug, Deserialize)]
pub struct PaymentConfirmation {
    pub club_id: Uuid,
    pub package: Package,
    /// Provider event id, recorded on the activation event
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Hex HMAC-SHA256 of `payload`
pub fn sign_payload(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn verify_signature(secret: &str, payload: &[u8], headers: &HeaderMap) -> Result<(), ApiError> {
    if secret.is_empty() {
        tracing::error!("Payment callback received but PAYMENT_WEBHOOK_SECRET is not configured");
        return Err(ApiError::Unauthorized);
    }

    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| hex::decode(v.trim()).ok())
        .ok_or_else(|| {
            tracing::warn!("Payment callback without a readable signature");
            ApiError::Unauthorized
        })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiError::Internal("invalid webhook secret".to_string()))?;
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        Ok(())
    } else {
        tracing::warn!("Payment callback signature mismatch");
        Err(ApiError::Unauthorized)
    }
}

pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ActionResponse>> {
    verify_signature(&state.config.payment_webhook_secret, &body, &headers)?;

    let confirmation: PaymentConfirmation = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid payment callback body: {e}")))?;

    tracing::info!(
        club_id = %confirmation.club_id,
        package = %confirmation.package,
        event_id = ?confirmation.event_id,
        "Payment confirmation received"
    );

    let result = state
        .billing
        .engine
        .confirm_payment(
            confirmation.club_id,
            confirmation.package,
            confirmation.event_id,
        )
        .await;
    settle(&state, confirmation.club_id, result).await
}
