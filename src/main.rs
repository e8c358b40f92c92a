//! Application entry point for the `fieldeyes-ingest` service.
//!
//! This binary orchestrates the full startup sequence for the telemetry
//! ingestion pipeline, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Connecting the Redis cache used for invalidation (optional)
//! - Starting the MQTT subscriber and the reassembly sweeper
//! - Binding the Axum HTTP server (health + trusted ingress)
//! - Draining background work on SIGINT/SIGTERM
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `LOG_SPAN_EVENTS` (optional) – span event mode for tracing
//! - see `config.rs` for the rest
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Result;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use fieldeyes_ingest::{
    config, join_with_timeout, reassembly, routes, schema, BackgroundTasks, Cache,
    CacheInvalidator, FrameHandler, IngestPipeline, MqttSubscriber, NoopCache, PgStore,
    ReassemblyTable, RedisCache, TopicLayout,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let cache: Arc<dyn Cache> = match &cfg.redis_url {
        Some(url) => {
            let cache = RedisCache::connect(url).await?;
            tracing::info!("Connected to Redis, cache invalidation enabled");
            Arc::new(cache)
        }
        None => {
            tracing::warn!("REDIS_URL not set, cache invalidation disabled");
            Arc::new(NoopCache)
        }
    };

    // --- Ingestion components ---
    let invalidator = CacheInvalidator::new(cache, BackgroundTasks::new());
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::new(PgStore::new(pool.clone())),
        invalidator.clone(),
    ));
    let table = Arc::new(ReassemblyTable::new());
    let handler = Arc::new(FrameHandler::new(
        TopicLayout::new(cfg.mqtt_topic_root.clone()),
        Arc::clone(&table),
        Arc::clone(&pipeline),
    ));

    let cancel = CancellationToken::new();

    let sweeper_handle = tokio::spawn(reassembly::run_sweeper(
        Arc::clone(&table),
        cfg.sweep_interval(),
        cfg.stale_after(),
        cfg.completed_retention(),
        cancel.clone(),
    ));

    let subscriber = MqttSubscriber::new(cfg.mqtt_settings()?, handler);
    let subscriber_handle = tokio::spawn(subscriber.run(cancel.clone(), cfg.shutdown_grace()));

    // --- HTTP ---
    let app = routes::router(Arc::clone(&pipeline));
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = cfg.shutdown_grace();

    // Frame handlers first: they may still enqueue invalidations.
    cancel.cancel();
    // The subscriber bounds its own disconnect and handler drain by `grace`.
    join_with_timeout("mqtt-subscriber", subscriber_handle, grace * 3).await;
    join_with_timeout("reassembly-sweeper", sweeper_handle, grace).await;

    invalidator.tasks().shutdown(grace).await;
    pool.close().await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `LOG_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("LOG_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    // ---
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
