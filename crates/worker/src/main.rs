//! Membergate Background Worker
//!
//! Handles scheduled jobs including:
//! - Pending crypto claim verification (every minute)
//! - Subscription expiry sweep (daily at 0:10 UTC)
//! - Payments invariant checks (every 6 hours)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use membergate_payments::PaymentsService;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Membergate Worker");

    let pool = create_db_pool().await?;

    PaymentsService::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    info!("Migrations applied");

    let payments = match PaymentsService::from_env(pool.clone()) {
        Ok(svc) => Arc::new(svc),
        Err(e) => {
            warn!(error = %e, "Payments service not configured - running in minimal mode");

            // Keep running with minimal functionality
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Verify pending crypto claims every minute
    let verify_payments = payments.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let payments = verify_payments.clone();
            Box::pin(async move {
                match payments.engine.poll_pending_claims().await {
                    Ok(resolved) if !resolved.is_empty() => {
                        info!(count = resolved.len(), "Verification cycle resolved claims");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Verification cycle failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Pending claim verification (every minute)");

    // Job 2: Expire lapsed subscriptions (daily at 0:10 UTC)
    let expire_payments = payments.clone();
    scheduler
        .add(Job::new_async("0 10 0 * * *", move |_uuid, _l| {
            let payments = expire_payments.clone();
            Box::pin(async move {
                match payments.ledger.expire_outdated_subscriptions().await {
                    Ok(count) => info!(count = count, "Subscription expiry sweep complete"),
                    Err(e) => error!(error = %e, "Subscription expiry sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Subscription expiry sweep (daily at 0:10 UTC)");

    // Job 3: Invariant checks every 6 hours
    let invariant_payments = payments.clone();
    scheduler
        .add(Job::new_async("0 0 */6 * * *", move |_uuid, _l| {
            let payments = invariant_payments.clone();
            Box::pin(async move {
                match payments.invariants.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(checks = summary.checks_run, "Invariant checks passed");
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            error!(
                                invariant = %violation.invariant,
                                severity = %violation.severity,
                                description = %violation.description,
                                "Invariant violation"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant checks failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Invariant checks (every 6 hours)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker started");

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutting down worker");

    Ok(())
}
