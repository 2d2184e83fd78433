//! Clubboard Background Worker
//!
//! Handles scheduled jobs including:
//! - Subscription lifecycle pass (daily at 06:00 UTC by default): trial
//!   reminders and blocking, yearly renewals, expiry of cancellations
//! - Subscription invariant checks (daily at 06:30 UTC)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use clubboard_billing::{BillingService, RunSummary};
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const DEFAULT_LIFECYCLE_CRON: &str = "0 0 6 * * *";

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Log results of a lifecycle pass
fn log_run_summary(summary: &RunSummary) {
    info!(
        reminders = summary.trial_reminders_sent,
        blocked = summary.trials_blocked,
        renewed = summary.subscriptions_renewed,
        renewal_events = summary.renewal_events,
        expired = summary.cancellations_expired,
        "Lifecycle pass complete"
    );

    if summary.failures > 0 {
        warn!(
            failures = summary.failures,
            "Lifecycle pass had failures; they will be retried on the next run"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,clubboard_billing=debug")),
        )
        .init();

    info!("Starting Clubboard Worker");

    let pool = create_db_pool().await?;
    clubboard_shared::run_migrations(&pool).await?;

    let billing = Arc::new(BillingService::from_env(pool));
    let scheduler = JobScheduler::new().await?;

    // Job 1: Lifecycle pass
    // Every procedure is idempotent, so a missed or repeated run is harmless
    let lifecycle_cron =
        std::env::var("LIFECYCLE_CRON").unwrap_or_else(|_| DEFAULT_LIFECYCLE_CRON.to_string());
    let lifecycle_billing = billing.clone();
    scheduler
        .add(Job::new_async(lifecycle_cron.as_str(), move |_uuid, _l| {
            let billing = lifecycle_billing.clone();
            Box::pin(async move {
                info!("Running scheduled subscription lifecycle pass");
                let summary = billing.runner.run_all(OffsetDateTime::now_utc()).await;
                log_run_summary(&summary);
            })
        })?)
        .await?;
    info!(cron = %lifecycle_cron, "Scheduled: Subscription lifecycle pass");

    // Job 2: Invariant checks after the lifecycle pass
    let invariant_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 30 6 * * *", move |_uuid, _l| {
            let billing = invariant_billing.clone();
            Box::pin(async move {
                match billing.invariants.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(checks = summary.checks_run, "Subscription invariants hold");
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            error!(
                                invariant = %violation.invariant,
                                severity = %violation.severity,
                                tenants = ?violation.tenant_ids,
                                "{}",
                                violation.description
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant check failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Subscription invariant checks (06:30 UTC)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker scheduler started");

    // Keep the worker running
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
