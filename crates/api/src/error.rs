//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clubboard_billing::{BillingError, ErrorKind};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_reason(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ApiError::Billing(e) => {
                let status = match (e.kind(), e) {
                    (_, BillingError::ConcurrentModification(_))
                    | (_, BillingError::DuplicateRequest(_))
                    | (_, BillingError::AlreadyExists(_))
                    | (ErrorKind::AlreadyProcessed, _) => StatusCode::CONFLICT,
                    (ErrorKind::Validation, _) => StatusCode::BAD_REQUEST,
                    (ErrorKind::GuardViolation, _) => StatusCode::UNPROCESSABLE_ENTITY,
                    (ErrorKind::NotFound, _) => StatusCode::NOT_FOUND,
                    (ErrorKind::Dependency, _) | (ErrorKind::Fatal, _) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.reason_code())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = self.status_and_reason();

        // Storage details stay in the logs
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, reason = reason, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16(),
            "reason": reason,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clubboard_shared::{Package, SubscriptionStatus};
    use uuid::Uuid;

    #[test]
    fn test_guard_violations_are_unprocessable() {
        let err = ApiError::from(BillingError::DowngradeNotAllowed {
            current: Package::Pro,
            requested: Package::Plus,
        });
        assert_eq!(
            err.status_and_reason(),
            (StatusCode::UNPROCESSABLE_ENTITY, "downgrade_not_allowed")
        );

        let err = ApiError::from(BillingError::InvalidState(SubscriptionStatus::Trial));
        assert_eq!(err.status_and_reason().0, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_conflicts() {
        let err = ApiError::from(BillingError::DuplicateRequest(Uuid::new_v4()));
        assert_eq!(err.status_and_reason(), (StatusCode::CONFLICT, "duplicate_request"));

        let err = ApiError::from(BillingError::ConcurrentModification("retry".into()));
        assert_eq!(err.status_and_reason().0, StatusCode::CONFLICT);
    }

    #[test]
    fn test_storage_errors_are_opaque() {
        let response = ApiError::from(BillingError::Database("connection reset".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
