//! Mailcade - email scheduling service entry point

use anyhow::Result;
use mailcade_api::{AppState, GoogleProvider};
use mailcade_common::config::Config;
use mailcade_core::{
    JobQueue, MemoryCounterStore, PreviewTransport, RateLimitConfig, RateLimiter, RetryPolicy,
    ScheduleCoordinator, SmtpSettings, SmtpTransport, SystemClock, Transport, WorkerConfig,
    WorkerPool,
};
use mailcade_storage::repository::{MessageRepository, RateCounterRepository};
use mailcade_storage::DatabasePool;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration is read once and frozen.
    let config = Arc::new(Config::from_env()?);

    init_logging(&config.logging.level);
    info!("Starting mailcade...");

    // Durable store
    let db_pool = DatabasePool::new(&config.database).await?;
    db_pool.migrate().await?;

    let clock = Arc::new(SystemClock);
    let pool = db_pool.pool().clone();

    // Persistent queue
    let queue = Arc::new(JobQueue::new(
        db_pool.clone(),
        RetryPolicy {
            max_attempts: config.delivery.max_retries,
            initial_delay_ms: config.delivery.initial_retry_delay_ms,
        },
        clock.clone(),
    ));

    // Rate limiter: in-process fast path + durable counters
    let rate_limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryCounterStore::new(clock.clone())),
        RateCounterRepository::new(pool.clone()),
        MessageRepository::new(pool.clone()),
        clock.clone(),
        RateLimitConfig {
            global_hourly_limit: config.delivery.global_hourly_limit,
            sender_hourly_limit: config.delivery.sender_hourly_limit,
        },
    ));

    // Outbound transport; without credentials, sends go to the preview
    // transport instead of a real SMTP hop.
    let default_transport = SmtpSettings::from_config(&config.transport);
    let transport: Arc<dyn Transport> = if config.transport.user.is_some() {
        Arc::new(SmtpTransport::new())
    } else {
        info!("No SMTP credentials configured; using preview transport");
        Arc::new(PreviewTransport)
    };

    // Coordinator for the write path
    let coordinator = Arc::new(ScheduleCoordinator::new(
        &db_pool,
        queue.clone(),
        clock.clone(),
        config.delivery.bucket_clock,
        config.delivery.max_retries,
    ));

    // Worker pool
    let worker = WorkerPool::new(
        &db_pool,
        queue.clone(),
        rate_limiter.clone(),
        transport.clone(),
        default_transport,
        clock.clone(),
        WorkerConfig {
            concurrency: config.delivery.worker_concurrency,
            ..WorkerConfig::default()
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = {
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        })
    };

    // HTTP API
    let state = Arc::new(AppState::new(
        db_pool.clone(),
        config.clone(),
        coordinator,
        Arc::new(GoogleProvider::new(&config.auth)),
    ));
    let app = mailcade_api::create_router(state);

    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.server.port)).await?;
    info!(port = config.server.port, "API server listening");

    let api_handle = {
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("API server error: {}", e);
            }
        })
    };

    info!("mailcade started");

    // Shutdown sequencing: stop dequeuing, drain in-flight sends, then
    // close transport and store.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;
    let _ = api_handle.await;

    transport.close().await;
    db_pool.close().await;

    info!("mailcade shutdown complete");
    Ok(())
}

fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
