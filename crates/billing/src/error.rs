//! Billing error taxonomy

use clubboard_shared::{Package, SubscriptionStatus};
use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

/// Coarse classification used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any state read
    Validation,
    /// A state machine precondition failed; user-correctable
    GuardViolation,
    /// Idempotent no-op; callers report success
    AlreadyProcessed,
    NotFound,
    /// A collaborator (notification, payment) failed; state is unaffected
    Dependency,
    /// Storage or internal failure; nothing was written
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Cannot {operation} while subscription is {status}")]
    InvalidTransition {
        operation: &'static str,
        status: SubscriptionStatus,
    },

    #[error("Requested package {requested} does not exceed current package {current}")]
    DowngradeNotAllowed {
        current: Package,
        requested: Package,
    },

    #[error("Upgrade request {0} is already pending")]
    DuplicateRequest(Uuid),

    #[error("Club is blocked")]
    TenantBlocked,

    #[error("Club subscription is cancelled")]
    TenantCancelled,

    #[error("Payment cannot be confirmed while subscription is {0}")]
    InvalidState(SubscriptionStatus),

    #[error("Confirmed package {confirmed} does not match approved package {expected}")]
    PackageMismatch {
        expected: Package,
        confirmed: Package,
    },

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::Validation(_) => ErrorKind::Validation,
            BillingError::InvalidTransition { .. }
            | BillingError::DowngradeNotAllowed { .. }
            | BillingError::DuplicateRequest(_)
            | BillingError::TenantBlocked
            | BillingError::TenantCancelled
            | BillingError::InvalidState(_)
            | BillingError::PackageMismatch { .. }
            | BillingError::AlreadyExists(_) => ErrorKind::GuardViolation,
            BillingError::AlreadyProcessed(_) => ErrorKind::AlreadyProcessed,
            BillingError::NotFound(_) => ErrorKind::NotFound,
            BillingError::Notification(_) => ErrorKind::Dependency,
            BillingError::ConcurrentModification(_)
            | BillingError::Database(_)
            | BillingError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Stable machine-readable reason, surfaced to API clients
    pub fn reason_code(&self) -> &'static str {
        match self {
            BillingError::Validation(_) => "validation_failed",
            BillingError::InvalidTransition { .. } => "invalid_transition",
            BillingError::DowngradeNotAllowed { .. } => "downgrade_not_allowed",
            BillingError::DuplicateRequest(_) => "duplicate_request",
            BillingError::TenantBlocked => "tenant_blocked",
            BillingError::TenantCancelled => "tenant_cancelled",
            BillingError::InvalidState(_) => "invalid_state",
            BillingError::PackageMismatch { .. } => "package_mismatch",
            BillingError::AlreadyProcessed(_) => "already_processed",
            BillingError::AlreadyExists(_) => "already_exists",
            BillingError::NotFound(_) => "not_found",
            BillingError::Notification(_) => "notification_failed",
            BillingError::ConcurrentModification(_) => "concurrent_modification",
            BillingError::Database(_) => "database_error",
            BillingError::Internal(_) => "internal_error",
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<clubboard_shared::ParseTagError> for BillingError {
    fn from(e: clubboard_shared::ParseTagError) -> Self {
        BillingError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_violations_are_classified() {
        let err = BillingError::DowngradeNotAllowed {
            current: Package::Pro,
            requested: Package::Plus,
        };
        assert_eq!(err.kind(), ErrorKind::GuardViolation);
        assert_eq!(err.reason_code(), "downgrade_not_allowed");
        assert_eq!(
            err.to_string(),
            "Requested package plus does not exceed current package pro"
        );
    }

    #[test]
    fn test_already_processed_is_not_fatal() {
        let err = BillingError::AlreadyProcessed("request approved".to_string());
        assert_eq!(err.kind(), ErrorKind::AlreadyProcessed);
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = BillingError::InvalidTransition {
            operation: "cancel",
            status: SubscriptionStatus::Expired,
        };
        assert_eq!(err.to_string(), "Cannot cancel while subscription is expired");
    }
}
