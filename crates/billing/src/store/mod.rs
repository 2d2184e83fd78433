//! Persistence seam for the lifecycle engine
//!
//! Every state change goes through [`SubscriptionStore::commit`], a guarded
//! conditional write: the club row is only updated if its `version` still
//! equals the version the engine read, and the optional upgrade request and
//! audit event are written atomically with it. A lost race yields
//! [`CommitOutcome::Conflict`] and nothing is written.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgSubscriptionStore;

use async_trait::async_trait;
use clubboard_shared::{SubscriptionStatus, UpgradeRequestStatus};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::{NewSubscriptionEvent, SubscriptionEvent};
use crate::models::{Tenant, UpgradeRequest};

/// Change to an upgrade request committed with a club write
#[derive(Debug, Clone, PartialEq)]
pub enum RequestWrite {
    /// Insert a new pending request. Fails with `DuplicateRequest` if the
    /// club already has one pending.
    Insert(UpgradeRequest),
    /// Replace a request, only if its stored status still equals `expected`
    Update {
        expected: UpgradeRequestStatus,
        request: UpgradeRequest,
    },
}

impl RequestWrite {
    pub fn request(&self) -> &UpgradeRequest {
        match self {
            RequestWrite::Insert(request) => request,
            RequestWrite::Update { request, .. } => request,
        }
    }
}

/// A guarded write of one club row
#[derive(Debug, Clone, PartialEq)]
pub struct TenantWrite {
    /// Desired row; `version` is the version the caller read
    pub tenant: Tenant,
    pub request: Option<RequestWrite>,
    pub event: Option<NewSubscriptionEvent>,
}

impl TenantWrite {
    pub fn new(tenant: Tenant) -> Self {
        Self {
            tenant,
            request: None,
            event: None,
        }
    }

    pub fn with_request(mut self, request: RequestWrite) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_event(mut self, event: NewSubscriptionEvent) -> Self {
        self.event = Some(event);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The write was applied; carries the stored row with its new version
    Applied(Tenant),
    /// The row or request changed since it was read; nothing was written
    Conflict,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a new club together with its opening audit event
    async fn insert_tenant(&self, tenant: &Tenant, event: NewSubscriptionEvent)
        -> BillingResult<()>;

    async fn tenant(&self, tenant_id: Uuid) -> BillingResult<Option<Tenant>>;

    /// Every club, archived ones included
    async fn list_tenants(&self) -> BillingResult<Vec<Tenant>>;

    /// Non-archived clubs whose cached status equals `status`
    async fn tenants_in_status(&self, status: SubscriptionStatus) -> BillingResult<Vec<Tenant>>;

    async fn upgrade_request(&self, request_id: Uuid) -> BillingResult<Option<UpgradeRequest>>;

    /// Requests of a club, oldest first
    async fn requests_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<UpgradeRequest>>;

    async fn commit(&self, write: TenantWrite) -> BillingResult<CommitOutcome>;

    /// Audit events of a club in append order
    async fn events_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<SubscriptionEvent>>;
}
