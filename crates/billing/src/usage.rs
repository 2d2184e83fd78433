//! Live usage counts owned by the advertisement subsystem

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entitlement::Resource;
use crate::error::BillingResult;

/// Counts resources a club currently has in use.
///
/// Implementations must count at call time; entitlement decisions are never
/// made against a cached number.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageCounter: Send + Sync {
    async fn count(&self, tenant_id: Uuid, resource: Resource) -> BillingResult<u64>;
}

/// Counts rows in the advertisement subsystem's tables
#[derive(Clone)]
pub struct PgUsageCounter {
    pool: PgPool,
}

impl PgUsageCounter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageCounter for PgUsageCounter {
    async fn count(&self, tenant_id: Uuid, resource: Resource) -> BillingResult<u64> {
        let query = match resource {
            Resource::Advertisement => {
                "SELECT COUNT(*) FROM advertisements WHERE club_id = $1 AND status = 'active'"
            }
            Resource::Vacancy => {
                "SELECT COUNT(*) FROM vacancies WHERE club_id = $1 AND status = 'open'"
            }
        };

        let count: i64 = sqlx::query_scalar(query)
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}
