//! Entitlement calculation
//!
//! Package limits come from the static table in `clubboard_shared`; usage is
//! always counted fresh by a [`UsageCounter`]. The calculator itself is a pure
//! function so it can be reused by callers that already hold a count.

use std::str::FromStr;
use std::sync::Arc;

use clubboard_shared::{Limit, Package, ParseTagError, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::Tenant;
use crate::store::SubscriptionStore;
use crate::usage::UsageCounter;

/// Entitlement-consuming resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Advertisement,
    Vacancy,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Advertisement => "advertisement",
            Resource::Vacancy => "vacancy",
        }
    }

    /// The configured limit of `package` for this resource
    pub fn limit(&self, package: Package) -> Limit {
        let definition = package.definition();
        match self {
            Resource::Advertisement => definition.advertisement_slots,
            Resource::Vacancy => definition.vacancy_slots,
        }
    }
}

impl FromStr for Resource {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advertisement" | "advertisements" | "ads" => Ok(Resource::Advertisement),
            "vacancy" | "vacancies" => Ok(Resource::Vacancy),
            _ => Err(ParseTagError {
                kind: "resource",
                value: s.to_string(),
            }),
        }
    }
}

/// Whether one more advertisement may be created
pub fn can_consume(package: Package, current_usage: u64, admin_override: bool) -> bool {
    can_consume_resource(package, Resource::Advertisement, current_usage, admin_override)
}

pub fn can_consume_resource(
    package: Package,
    resource: Resource,
    current_usage: u64,
    admin_override: bool,
) -> bool {
    admin_override || resource.limit(package).allows(current_usage)
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    AdminOverride,
    WithinLimit,
    LimitReached,
    AccountBlocked,
    SubscriptionExpired,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitlementDecision {
    pub allowed: bool,
    pub resource: Resource,
    pub package: Package,
    /// `None` when the package is unlimited
    pub limit: Option<u32>,
    pub usage: u64,
    pub reason: DecisionReason,
}

/// Decide for a loaded club and a fresh usage count
pub fn decide(tenant: &Tenant, resource: Resource, usage: u64) -> EntitlementDecision {
    let limit = resource.limit(tenant.active_package);

    let (allowed, reason) = if tenant.admin_override {
        (true, DecisionReason::AdminOverride)
    } else if tenant.is_archived() {
        (false, DecisionReason::Archived)
    } else if tenant.subscription_status == SubscriptionStatus::Blocked {
        (false, DecisionReason::AccountBlocked)
    } else if tenant.subscription_status == SubscriptionStatus::Expired {
        (false, DecisionReason::SubscriptionExpired)
    } else if can_consume_resource(tenant.active_package, resource, usage, false) {
        (true, DecisionReason::WithinLimit)
    } else {
        (false, DecisionReason::LimitReached)
    };

    EntitlementDecision {
        allowed,
        resource,
        package: tenant.active_package,
        limit: limit.as_option(),
        usage,
        reason,
    }
}

/// Entitlement checks against stored clubs
#[derive(Clone)]
pub struct EntitlementService {
    store: Arc<dyn SubscriptionStore>,
    usage: Arc<dyn UsageCounter>,
}

impl EntitlementService {
    pub fn new(store: Arc<dyn SubscriptionStore>, usage: Arc<dyn UsageCounter>) -> Self {
        Self { store, usage }
    }

    pub async fn check(&self, tenant_id: Uuid, resource: Resource) -> BillingResult<EntitlementDecision> {
        let tenant = self
            .store
            .tenant(tenant_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Club {tenant_id}")))?;

        let usage = self.usage.count(tenant_id, resource).await?;
        let decision = decide(&tenant, resource, usage);

        tracing::debug!(
            tenant_id = %tenant_id,
            resource = resource.as_str(),
            usage = usage,
            allowed = decision.allowed,
            "Entitlement checked"
        );

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::usage::MockUsageCounter;
    use crate::events::{EventType, SubscriptionEventBuilder};
    use time::OffsetDateTime;

    #[test]
    fn test_basic_has_no_advertisement_slots() {
        assert!(!can_consume(Package::Basic, 0, false));
        assert!(can_consume(Package::Basic, 0, true));
    }

    #[test]
    fn test_limit_is_exclusive() {
        assert!(can_consume(Package::Pro, 2, false));
        assert!(!can_consume(Package::Pro, 3, false));
        assert!(!can_consume(Package::Plus, 1, false));
    }

    #[test]
    fn test_override_lifts_a_reached_limit() {
        assert!(can_consume(Package::Plus, 1, true));
        assert!(can_consume(Package::Pro, 3, true));
    }

    #[test]
    fn test_unlimited_always_allows() {
        assert!(can_consume(Package::Unlimited, u64::MAX, false));
        assert!(can_consume_resource(Package::Unlimited, Resource::Vacancy, 10_000, false));
    }

    #[test]
    fn test_vacancy_limits() {
        assert!(can_consume_resource(Package::Basic, Resource::Vacancy, 2, false));
        assert!(!can_consume_resource(Package::Basic, Resource::Vacancy, 3, false));
    }

    #[test]
    fn test_resource_parsing() {
        assert_eq!("ads".parse::<Resource>().unwrap(), Resource::Advertisement);
        assert_eq!("vacancies".parse::<Resource>().unwrap(), Resource::Vacancy);
        assert!("banners".parse::<Resource>().is_err());
    }

    #[test]
    fn test_blocked_club_is_denied_within_limits() {
        let mut tenant = Tenant::new_trial(Uuid::new_v4(), "FC", None, OffsetDateTime::now_utc(), 30);
        tenant.active_package = Package::Pro;
        tenant.subscription_status = SubscriptionStatus::Blocked;

        let decision = decide(&tenant, Resource::Advertisement, 0);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::AccountBlocked);
        assert_eq!(decision.limit, Some(3));
    }

    #[tokio::test]
    async fn test_check_counts_usage_fresh() {
        let store = Arc::new(InMemoryStore::new());
        let mut tenant =
            Tenant::new_trial(Uuid::new_v4(), "TuS", None, OffsetDateTime::now_utc(), 30);
        tenant.active_package = Package::Plus;
        store
            .insert_tenant(
                &tenant,
                SubscriptionEventBuilder::new(tenant.id, EventType::TrialStarted).build(),
            )
            .await
            .unwrap();

        let mut usage = MockUsageCounter::new();
        let tenant_id = tenant.id;
        usage
            .expect_count()
            .withf(move |id, resource| *id == tenant_id && *resource == Resource::Advertisement)
            .times(2)
            .returning({
                let mut calls = 0u64;
                move |_, _| {
                    calls += 1;
                    Ok(calls - 1)
                }
            });

        let service = EntitlementService::new(store, Arc::new(usage));

        let first = service.check(tenant_id, Resource::Advertisement).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.usage, 0);

        let second = service.check(tenant_id, Resource::Advertisement).await.unwrap();
        assert!(!second.allowed);
        assert_eq!(second.reason, DecisionReason::LimitReached);
    }

    #[tokio::test]
    async fn test_check_unknown_club() {
        let service = EntitlementService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(MockUsageCounter::new()),
        );
        let result = service.check(Uuid::new_v4(), Resource::Vacancy).await;
        assert!(matches!(result, Err(BillingError::NotFound(_))));
    }
}
