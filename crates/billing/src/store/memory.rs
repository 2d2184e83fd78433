//! In-memory store for tests and local development

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use clubboard_shared::SubscriptionStatus;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CommitOutcome, RequestWrite, SubscriptionStore, TenantWrite};
use crate::error::{BillingError, BillingResult};
use crate::events::{NewSubscriptionEvent, SubscriptionEvent};
use crate::models::{Tenant, UpgradeRequest};

#[derive(Default)]
struct Inner {
    tenants: HashMap<Uuid, Tenant>,
    requests: HashMap<Uuid, UpgradeRequest>,
    /// Append-only, in commit order
    events: Vec<SubscriptionEvent>,
}

/// Store backed by maps behind one async mutex; commits are serialized, which
/// gives the same compare-and-swap semantics as the Postgres store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a club row directly, bypassing the engine (test seeding)
    pub async fn put_tenant(&self, tenant: Tenant) {
        let mut inner = self.inner.lock().await;
        inner.tenants.insert(tenant.id, tenant);
    }

    /// Total number of audit events across all clubs
    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.len()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn insert_tenant(
        &self,
        tenant: &Tenant,
        event: NewSubscriptionEvent,
    ) -> BillingResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.tenants.contains_key(&tenant.id) {
            return Err(BillingError::AlreadyExists(format!("Club {}", tenant.id)));
        }
        inner.tenants.insert(tenant.id, tenant.clone());
        inner.events.push(event.into_event(OffsetDateTime::now_utc()));
        Ok(())
    }

    async fn tenant(&self, tenant_id: Uuid) -> BillingResult<Option<Tenant>> {
        Ok(self.inner.lock().await.tenants.get(&tenant_id).cloned())
    }

    async fn list_tenants(&self) -> BillingResult<Vec<Tenant>> {
        let inner = self.inner.lock().await;
        let mut tenants: Vec<Tenant> = inner.tenants.values().cloned().collect();
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants)
    }

    async fn tenants_in_status(&self, status: SubscriptionStatus) -> BillingResult<Vec<Tenant>> {
        let inner = self.inner.lock().await;
        let mut tenants: Vec<Tenant> = inner
            .tenants
            .values()
            .filter(|t| t.subscription_status == status && !t.is_archived())
            .cloned()
            .collect();
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants)
    }

    async fn upgrade_request(&self, request_id: Uuid) -> BillingResult<Option<UpgradeRequest>> {
        Ok(self.inner.lock().await.requests.get(&request_id).cloned())
    }

    async fn requests_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<UpgradeRequest>> {
        let inner = self.inner.lock().await;
        let mut requests: Vec<UpgradeRequest> = inner
            .requests
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn commit(&self, write: TenantWrite) -> BillingResult<CommitOutcome> {
        let mut inner = self.inner.lock().await;
        let TenantWrite {
            mut tenant,
            request,
            event,
        } = write;

        let stored_version = match inner.tenants.get(&tenant.id) {
            Some(stored) => stored.version,
            None => return Err(BillingError::NotFound(format!("Club {}", tenant.id))),
        };
        if stored_version != tenant.version {
            return Ok(CommitOutcome::Conflict);
        }

        // Validate the request write before touching anything
        match &request {
            Some(RequestWrite::Insert(new_request)) => {
                if let Some(existing) = inner
                    .requests
                    .values()
                    .find(|r| r.tenant_id == new_request.tenant_id && r.is_pending())
                {
                    return Err(BillingError::DuplicateRequest(existing.id));
                }
            }
            Some(RequestWrite::Update { expected, request }) => {
                match inner.requests.get(&request.id) {
                    Some(stored) if stored.status == *expected => {}
                    Some(_) => return Ok(CommitOutcome::Conflict),
                    None => {
                        return Err(BillingError::NotFound(format!(
                            "Upgrade request {}",
                            request.id
                        )))
                    }
                }
            }
            None => {}
        }

        let now = OffsetDateTime::now_utc();
        if let Some(request) = request {
            let request = match request {
                RequestWrite::Insert(r) => r,
                RequestWrite::Update { request, .. } => request,
            };
            inner.requests.insert(request.id, request);
        }
        if let Some(event) = event {
            inner.events.push(event.into_event(now));
        }

        tenant.version += 1;
        tenant.updated_at = now;
        inner.tenants.insert(tenant.id, tenant.clone());

        Ok(CommitOutcome::Applied(tenant))
    }

    async fn events_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<SubscriptionEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventType, SubscriptionEventBuilder};
    use clubboard_shared::Package;

    async fn seeded() -> (InMemoryStore, Tenant) {
        let store = InMemoryStore::new();
        let tenant = Tenant::new_trial(
            Uuid::new_v4(),
            "TSV Demo",
            None,
            OffsetDateTime::now_utc(),
            30,
        );
        store
            .insert_tenant(
                &tenant,
                SubscriptionEventBuilder::new(tenant.id, EventType::TrialStarted).build(),
            )
            .await
            .unwrap();
        (store, tenant)
    }

    #[tokio::test]
    async fn test_commit_bumps_version() {
        let (store, tenant) = seeded().await;

        let outcome = store.commit(TenantWrite::new(tenant.clone())).await.unwrap();
        match outcome {
            CommitOutcome::Applied(stored) => assert_eq!(stored.version, tenant.version + 1),
            CommitOutcome::Conflict => panic!("expected the write to apply"),
        }
    }

    #[tokio::test]
    async fn test_stale_version_conflicts_without_writing() {
        let (store, tenant) = seeded().await;
        store.commit(TenantWrite::new(tenant.clone())).await.unwrap();

        // Second writer still holds version 0
        let stale = TenantWrite::new(tenant.clone()).with_event(
            SubscriptionEventBuilder::new(tenant.id, EventType::Renewal).build(),
        );
        assert_eq!(store.commit(stale).await.unwrap(), CommitOutcome::Conflict);
        assert_eq!(store.events_for_tenant(tenant.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_pending_request_is_rejected() {
        let (store, tenant) = seeded().await;
        let now = OffsetDateTime::now_utc();

        let first = UpgradeRequest::new_pending(tenant.id, Package::Basic, Package::Plus, now);
        let applied = store
            .commit(TenantWrite::new(tenant.clone()).with_request(RequestWrite::Insert(first.clone())))
            .await
            .unwrap();
        let CommitOutcome::Applied(tenant) = applied else {
            panic!("expected the first request to apply");
        };

        let second = UpgradeRequest::new_pending(tenant.id, Package::Basic, Package::Pro, now);
        let result = store
            .commit(TenantWrite::new(tenant).with_request(RequestWrite::Insert(second)))
            .await;
        assert!(matches!(result, Err(BillingError::DuplicateRequest(id)) if id == first.id));
    }

    #[tokio::test]
    async fn test_events_come_back_in_append_order() {
        let (store, tenant) = seeded().await;
        let mut current = tenant;

        for event_type in [EventType::Renewal, EventType::SubscriptionCancelled, EventType::SubscriptionExpired] {
            let write = TenantWrite::new(current.clone())
                .with_event(SubscriptionEventBuilder::new(current.id, event_type).build());
            let CommitOutcome::Applied(stored) = store.commit(write).await.unwrap() else {
                panic!("expected the write to apply");
            };
            current = stored;
        }

        let types: Vec<String> = store
            .events_for_tenant(current.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec!["trial_started", "renewal", "subscription_cancelled", "subscription_expired"]
        );
    }
}
