//! Postgres-backed subscription store

use async_trait::async_trait;
use clubboard_shared::{Package, SubscriptionStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{CommitOutcome, RequestWrite, SubscriptionStore, TenantWrite};
use crate::error::{BillingError, BillingResult};
use crate::events::{NewSubscriptionEvent, SubscriptionEvent};
use crate::models::{Tenant, UpgradeRequest};

const TENANT_COLUMNS: &str = r#"
    id, name, billing_email, active_package, subscription_status,
    subscription_start, subscription_end, admin_override, pending_package,
    activated_at, blocked_at, cancelled_at, expired_at, archived_at,
    trial_notice_14d_sent_at, trial_notice_7d_sent_at, trial_notice_0d_sent_at,
    version, created_at, updated_at
"#;

const REQUEST_COLUMNS: &str = r#"
    id, club_id, current_package, requested_package, status, review_note,
    created_at, reviewed_at, completed_at
"#;

/// Row type for the clubs table
#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    billing_email: Option<String>,
    active_package: String,
    subscription_status: String,
    subscription_start: Option<OffsetDateTime>,
    subscription_end: Option<OffsetDateTime>,
    admin_override: bool,
    pending_package: Option<String>,
    activated_at: Option<OffsetDateTime>,
    blocked_at: Option<OffsetDateTime>,
    cancelled_at: Option<OffsetDateTime>,
    expired_at: Option<OffsetDateTime>,
    archived_at: Option<OffsetDateTime>,
    trial_notice_14d_sent_at: Option<OffsetDateTime>,
    trial_notice_7d_sent_at: Option<OffsetDateTime>,
    trial_notice_0d_sent_at: Option<OffsetDateTime>,
    version: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = BillingError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        Ok(Tenant {
            id: row.id,
            name: row.name,
            billing_email: row.billing_email,
            active_package: row.active_package.parse()?,
            subscription_status: row.subscription_status.parse()?,
            subscription_start: row.subscription_start,
            subscription_end: row.subscription_end,
            admin_override: row.admin_override,
            pending_package: row
                .pending_package
                .as_deref()
                .map(str::parse::<Package>)
                .transpose()?,
            activated_at: row.activated_at,
            blocked_at: row.blocked_at,
            cancelled_at: row.cancelled_at,
            expired_at: row.expired_at,
            archived_at: row.archived_at,
            trial_notice_14d_sent_at: row.trial_notice_14d_sent_at,
            trial_notice_7d_sent_at: row.trial_notice_7d_sent_at,
            trial_notice_0d_sent_at: row.trial_notice_0d_sent_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row type for the upgrade_requests table
#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: Uuid,
    club_id: Uuid,
    current_package: String,
    requested_package: String,
    status: String,
    review_note: Option<String>,
    created_at: OffsetDateTime,
    reviewed_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<RequestRow> for UpgradeRequest {
    type Error = BillingError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(UpgradeRequest {
            id: row.id,
            tenant_id: row.club_id,
            current_package: row.current_package.parse()?,
            requested_package: row.requested_package.parse()?,
            status: row.status.parse()?,
            review_note: row.review_note,
            created_at: row.created_at,
            reviewed_at: row.reviewed_at,
            completed_at: row.completed_at,
        })
    }
}

/// Row type for the subscription_events table
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    club_id: Uuid,
    event_type: String,
    old_package: Option<String>,
    new_package: Option<String>,
    period_start: Option<OffsetDateTime>,
    period_end: Option<OffsetDateTime>,
    metadata: serde_json::Value,
    created_at: OffsetDateTime,
}

impl TryFrom<EventRow> for SubscriptionEvent {
    type Error = BillingError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(SubscriptionEvent {
            id: row.id,
            tenant_id: row.club_id,
            event_type: row.event_type,
            old_package: row.old_package.as_deref().map(str::parse).transpose()?,
            new_package: row.new_package.as_deref().map(str::parse).transpose()?,
            period_start: row.period_start,
            period_end: row.period_end,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

/// Store over the `clubs`, `upgrade_requests` and `subscription_events` tables
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_event(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: NewSubscriptionEvent,
    ) -> BillingResult<()> {
        let event = event.into_event(OffsetDateTime::now_utc());
        sqlx::query(
            r#"
            INSERT INTO subscription_events
                (id, club_id, event_type, old_package, new_package,
                 period_start, period_end, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(&event.event_type)
        .bind(event.old_package.map(|p| p.as_str()))
        .bind(event.new_package.map(|p| p.as_str()))
        .bind(event.period_start)
        .bind(event.period_end)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn pending_request_id(&self, tenant_id: Uuid) -> BillingResult<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM upgrade_requests WHERE club_id = $1 AND status = 'pending'",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn insert_tenant(
        &self,
        tenant: &Tenant,
        event: NewSubscriptionEvent,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO clubs
                (id, name, billing_email, active_package, subscription_status,
                 subscription_start, subscription_end, admin_override,
                 version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.billing_email)
        .bind(tenant.active_package.as_str())
        .bind(tenant.subscription_status.as_str())
        .bind(tenant.subscription_start)
        .bind(tenant.subscription_end)
        .bind(tenant.admin_override)
        .bind(tenant.created_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::AlreadyExists(format!("Club {}", tenant.id)));
        }

        Self::insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn tenant(&self, tenant_id: Uuid) -> BillingResult<Option<Tenant>> {
        let row: Option<TenantRow> =
            sqlx::query_as(&format!("SELECT {TENANT_COLUMNS} FROM clubs WHERE id = $1"))
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Tenant::try_from).transpose()
    }

    async fn list_tenants(&self) -> BillingResult<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as(&format!(
            "SELECT {TENANT_COLUMNS} FROM clubs ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Tenant::try_from).collect()
    }

    async fn tenants_in_status(&self, status: SubscriptionStatus) -> BillingResult<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as(&format!(
            r#"
            SELECT {TENANT_COLUMNS} FROM clubs
            WHERE subscription_status = $1 AND archived_at IS NULL
            ORDER BY created_at
            "#
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Tenant::try_from).collect()
    }

    async fn upgrade_request(&self, request_id: Uuid) -> BillingResult<Option<UpgradeRequest>> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM upgrade_requests WHERE id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UpgradeRequest::try_from).transpose()
    }

    async fn requests_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<UpgradeRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            "SELECT {REQUEST_COLUMNS} FROM upgrade_requests WHERE club_id = $1 ORDER BY created_at"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UpgradeRequest::try_from).collect()
    }

    async fn commit(&self, write: TenantWrite) -> BillingResult<CommitOutcome> {
        let TenantWrite {
            tenant,
            request,
            event,
        } = write;

        let mut tx = self.pool.begin().await?;

        // Guarded update: only applies if nobody else wrote since we read
        let updated: Option<TenantRow> = sqlx::query_as(&format!(
            r#"
            UPDATE clubs SET
                name = $3,
                billing_email = $4,
                active_package = $5,
                subscription_status = $6,
                subscription_start = $7,
                subscription_end = $8,
                admin_override = $9,
                pending_package = $10,
                activated_at = $11,
                blocked_at = $12,
                cancelled_at = $13,
                expired_at = $14,
                archived_at = $15,
                trial_notice_14d_sent_at = $16,
                trial_notice_7d_sent_at = $17,
                trial_notice_0d_sent_at = $18,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {TENANT_COLUMNS}
            "#
        ))
        .bind(tenant.id)
        .bind(tenant.version)
        .bind(&tenant.name)
        .bind(&tenant.billing_email)
        .bind(tenant.active_package.as_str())
        .bind(tenant.subscription_status.as_str())
        .bind(tenant.subscription_start)
        .bind(tenant.subscription_end)
        .bind(tenant.admin_override)
        .bind(tenant.pending_package.map(|p| p.as_str()))
        .bind(tenant.activated_at)
        .bind(tenant.blocked_at)
        .bind(tenant.cancelled_at)
        .bind(tenant.expired_at)
        .bind(tenant.archived_at)
        .bind(tenant.trial_notice_14d_sent_at)
        .bind(tenant.trial_notice_7d_sent_at)
        .bind(tenant.trial_notice_0d_sent_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            let exists: Option<bool> = sqlx::query_scalar("SELECT TRUE FROM clubs WHERE id = $1")
                .bind(tenant.id)
                .fetch_optional(&self.pool)
                .await?;
            if exists.is_none() {
                return Err(BillingError::NotFound(format!("Club {}", tenant.id)));
            }
            return Ok(CommitOutcome::Conflict);
        };

        match request {
            Some(RequestWrite::Insert(new_request)) => {
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO upgrade_requests
                        (id, club_id, current_package, requested_package, status, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(new_request.id)
                .bind(new_request.tenant_id)
                .bind(new_request.current_package.as_str())
                .bind(new_request.requested_package.as_str())
                .bind(new_request.status.as_str())
                .bind(new_request.created_at)
                .execute(&mut *tx)
                .await;

                if let Err(e) = inserted {
                    let is_unique_violation = e
                        .as_database_error()
                        .map(|db| db.is_unique_violation())
                        .unwrap_or(false);
                    tx.rollback().await?;
                    if is_unique_violation {
                        let existing = self.pending_request_id(new_request.tenant_id).await?;
                        return Err(BillingError::DuplicateRequest(
                            existing.unwrap_or(new_request.id),
                        ));
                    }
                    return Err(e.into());
                }
            }
            Some(RequestWrite::Update { expected, request }) => {
                let result = sqlx::query(
                    r#"
                    UPDATE upgrade_requests SET
                        status = $3,
                        review_note = $4,
                        reviewed_at = $5,
                        completed_at = $6
                    WHERE id = $1 AND status = $2
                    "#,
                )
                .bind(request.id)
                .bind(expected.as_str())
                .bind(request.status.as_str())
                .bind(&request.review_note)
                .bind(request.reviewed_at)
                .bind(request.completed_at)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    tx.rollback().await?;
                    return Ok(CommitOutcome::Conflict);
                }
            }
            None => {}
        }

        if let Some(event) = event {
            Self::insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;

        Ok(CommitOutcome::Applied(Tenant::try_from(updated)?))
    }

    async fn events_for_tenant(&self, tenant_id: Uuid) -> BillingResult<Vec<SubscriptionEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, club_id, event_type, old_package, new_package,
                   period_start, period_end, metadata, created_at
            FROM subscription_events
            WHERE club_id = $1
            ORDER BY seq
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SubscriptionEvent::try_from).collect()
    }
}

