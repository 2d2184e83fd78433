// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries status and package context
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Clubboard Billing Module
//!
//! Subscription and entitlement lifecycle for clubs on the job board.
//!
//! ## Features
//!
//! - **State Machine**: trial, upgrade, payment, cancellation, blocking and recovery
//! - **Upgrade Requests**: one pending request per club, strictly upward, admin reviewed
//! - **Entitlements**: package limits checked against live usage counts
//! - **Scheduled Transitions**: trial reminders and blocking, renewals, expiry
//! - **Audit Log**: one append-only event per transition
//! - **Invariants**: read-only consistency checks over the store
//! - **Email Notifications**: Resend-backed, sent after each committed transition

pub mod config;
pub mod email;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod invariants;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod runner;
pub mod status;
pub mod store;
pub mod upgrades;
pub mod usage;


// Config
pub use config::LifecycleConfig;

// Email
pub use email::{BillingEmailService, EmailConfig};

// Entitlement
pub use entitlement::{
    can_consume, can_consume_resource, DecisionReason, EntitlementDecision, EntitlementService,
    Resource,
};

// Error
pub use error::{BillingError, BillingResult, ErrorKind};

// Events
pub use events::{ActorType, AuditLog, EventType, SubscriptionEvent, SubscriptionEventBuilder};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Lifecycle
pub use lifecycle::{one_year_after, LifecycleEngine, TransitionOutcome};

// Models
pub use models::{Tenant, UpgradeRequest};

// Notifications
pub use notify::{NotificationTemplate, Notifier};

// Runner
pub use runner::{RunSummary, TransitionRunner};

// Status
pub use status::derive_status;

// Store
pub use store::{InMemoryStore, PgSubscriptionStore, SubscriptionStore};

// Usage
pub use usage::{PgUsageCounter, UsageCounter};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all lifecycle functionality
#[derive(Clone)]
pub struct BillingService {
    pub engine: LifecycleEngine,
    pub runner: TransitionRunner,
    pub entitlements: EntitlementService,
    pub audit: AuditLog,
    pub invariants: Arc<InvariantChecker>,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> Self {
        let email_service = BillingEmailService::from_env();
        if !email_service.is_enabled() {
            tracing::warn!("RESEND_API_KEY not set - billing emails will only be logged");
        }

        Self::new(
            Arc::new(PgSubscriptionStore::new(pool.clone())),
            Arc::new(email_service),
            Arc::new(PgUsageCounter::new(pool)),
            LifecycleConfig::from_env(),
        )
    }

    /// Create a new billing service with explicit collaborators
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        notifier: Arc<dyn Notifier>,
        usage: Arc<dyn UsageCounter>,
        config: LifecycleConfig,
    ) -> Self {
        let engine = LifecycleEngine::new(store.clone(), notifier, config);

        Self {
            runner: TransitionRunner::new(engine.clone()),
            entitlements: EntitlementService::new(store.clone(), usage),
            audit: AuditLog::new(store.clone()),
            invariants: Arc::new(InvariantChecker::new(store)),
            engine,
        }
    }
}
