//! Subscription audit log
//!
//! Every lifecycle transition appends exactly one [`SubscriptionEvent`],
//! committed in the same store write as the club row. Events are never
//! updated or deleted; they exist to answer "how did we get here" for support
//! and billing history, not to drive current state.

use std::sync::Arc;

use clubboard_shared::Package;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::SubscriptionStore;

/// Tag stored in `subscription_events.event_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TrialStarted,
    UpgradeRequested,
    UpgradeApproved,
    UpgradeRejected,
    SubscriptionActivated,
    AdminOverrideActivated,
    AdminOverrideEnabled,
    AdminOverrideDisabled,
    SubscriptionCancelled,
    Renewal,
    SubscriptionBlocked,
    SubscriptionExpired,
    Unblocked,
    Restored,
    Archived,
}

impl EventType {
    pub const ALL: [EventType; 15] = [
        EventType::TrialStarted,
        EventType::UpgradeRequested,
        EventType::UpgradeApproved,
        EventType::UpgradeRejected,
        EventType::SubscriptionActivated,
        EventType::AdminOverrideActivated,
        EventType::AdminOverrideEnabled,
        EventType::AdminOverrideDisabled,
        EventType::SubscriptionCancelled,
        EventType::Renewal,
        EventType::SubscriptionBlocked,
        EventType::SubscriptionExpired,
        EventType::Unblocked,
        EventType::Restored,
        EventType::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TrialStarted => "trial_started",
            EventType::UpgradeRequested => "upgrade_requested",
            EventType::UpgradeApproved => "upgrade_approved",
            EventType::UpgradeRejected => "upgrade_rejected",
            EventType::SubscriptionActivated => "subscription_activated",
            EventType::AdminOverrideActivated => "admin_override_activated",
            EventType::AdminOverrideEnabled => "admin_override_enabled",
            EventType::AdminOverrideDisabled => "admin_override_disabled",
            EventType::SubscriptionCancelled => "subscription_cancelled",
            EventType::Renewal => "renewal",
            EventType::SubscriptionBlocked => "subscription_blocked",
            EventType::SubscriptionExpired => "subscription_expired",
            EventType::Unblocked => "unblocked",
            EventType::Restored => "restored",
            EventType::Archived => "archived",
        }
    }

    /// Event types that mark a club becoming active
    pub fn is_activation(&self) -> bool {
        matches!(
            self,
            EventType::SubscriptionActivated
                | EventType::AdminOverrideActivated
                | EventType::Unblocked
                | EventType::Restored
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who triggered a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Admin,
    Club,
    PaymentProvider,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Admin => "admin",
            ActorType::Club => "club",
            ActorType::PaymentProvider => "payment_provider",
            ActorType::System => "system",
        }
    }
}

/// A persisted audit record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Free-form tag; engine-written rows use [`EventType::as_str`]
    pub event_type: String,
    pub old_package: Option<Package>,
    pub new_package: Option<Package>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_end: Option<OffsetDateTime>,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SubscriptionEvent {
    pub fn is(&self, event_type: EventType) -> bool {
        self.event_type == event_type.as_str()
    }

    /// The typed tag, `None` for rows written outside the engine
    pub fn kind(&self) -> Option<EventType> {
        EventType::ALL.into_iter().find(|t| self.is(*t))
    }
}

/// An event waiting to be committed alongside a club write
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscriptionEvent {
    pub tenant_id: Uuid,
    pub event_type: EventType,
    pub old_package: Option<Package>,
    pub new_package: Option<Package>,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub metadata: serde_json::Value,
}

impl NewSubscriptionEvent {
    /// Materialize the record with a fresh id and timestamp
    pub fn into_event(self, created_at: OffsetDateTime) -> SubscriptionEvent {
        SubscriptionEvent {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            event_type: self.event_type.as_str().to_string(),
            old_package: self.old_package,
            new_package: self.new_package,
            period_start: self.period_start,
            period_end: self.period_end,
            metadata: self.metadata,
            created_at,
        }
    }
}

/// Builder for audit events
#[derive(Debug, Clone)]
pub struct SubscriptionEventBuilder {
    event: NewSubscriptionEvent,
}

impl SubscriptionEventBuilder {
    pub fn new(tenant_id: Uuid, event_type: EventType) -> Self {
        Self {
            event: NewSubscriptionEvent {
                tenant_id,
                event_type,
                old_package: None,
                new_package: None,
                period_start: None,
                period_end: None,
                metadata: serde_json::json!({}),
            },
        }
    }

    pub fn packages(mut self, old: Package, new: Package) -> Self {
        self.event.old_package = Some(old);
        self.event.new_package = Some(new);
        self
    }

    pub fn period(mut self, start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> Self {
        self.event.period_start = start;
        self.event.period_end = end;
        self
    }

    pub fn actor(self, actor: ActorType) -> Self {
        self.meta("actor", serde_json::json!(actor.as_str()))
    }

    pub fn meta(mut self, key: &str, value: serde_json::Value) -> Self {
        if let Some(map) = self.event.metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self) -> NewSubscriptionEvent {
        self.event
    }
}

/// Read side of the audit log
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn SubscriptionStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    /// All events for a club, oldest first
    pub async fn events_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<SubscriptionEvent>> {
        self.store.events_for_tenant(tenant_id).await
    }
}
