//! Queue Service
//!
//! # Startup Flow
//!
//! 1. Initialize tracing and load configuration
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to PostgreSQL and run migrations, or fall back to the
//!    in-memory store when `DATABASE_URL` is unset
//! 4. Start the hub actor, the ledger and the lifecycle scheduler
//! 5. Serve HTTP and WebSocket routes until SIGINT/SIGTERM

use queue_service::config::Config;
use queue_service::hub::HubHandle;
use queue_service::ledger::PositionLedger;
use queue_service::observability::metrics::init_metrics_recorder;
use queue_service::repositories::{InMemoryQueueStore, PgQueueStore, QueueStore};
use queue_service::routes::{self, AppState};
use queue_service::tasks::start_scheduler;

use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound on waiting for background tasks after shutdown.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_filter.clone().into());
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Queue Service");
    info!(
        bind_address = %config.bind_address,
        persistent = config.database_url.is_some(),
        ping_interval_secs = config.connection.ping_interval.as_secs(),
        read_timeout_secs = config.connection.read_timeout.as_secs(),
        mailbox_capacity = config.connection.mailbox_capacity,
        "Configuration loaded successfully"
    );

    info!("Initializing Prometheus metrics recorder...");
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let store: Arc<dyn QueueStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800))
                .connect(&add_query_timeout(url.expose_secret(), 5))
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to database");
                    e
                })?;

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to run database migrations");
                    e
                })?;
            info!("Database connection established");

            Arc::new(PgQueueStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store; state is lost on restart");
            Arc::new(InMemoryQueueStore::new())
        }
    };

    let root_token = CancellationToken::new();
    let hub = HubHandle::new(root_token.child_token());
    let ledger = Arc::new(PositionLedger::new(Arc::clone(&store), hub.clone()));

    let scheduler_handles = start_scheduler(
        Arc::clone(&store),
        Arc::clone(&ledger),
        &config.scheduler,
        &root_token,
    );
    info!("Lifecycle scheduler started");

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        e
    })?;
    let drain_seconds = config.drain_seconds;

    let state = Arc::new(AppState {
        store,
        ledger,
        hub,
        config,
    });
    let app = routes::build_routes(state, metrics_handle);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        e
    })?;
    info!(addr = %addr, "Queue Service listening");

    let server_token = root_token.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal(drain_seconds).await;
        // Stops the scheduler and the hub; open sockets close with it.
        server_token.cancel();
    })
    .await?;

    root_token.cancel();
    for handle in scheduler_handles {
        match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Scheduler job panicked"),
            Err(_) => warn!("Scheduler job did not stop in time"),
        }
    }

    info!("Queue Service shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT), then waits out the drain
/// period.
async fn shutdown_signal(drain_seconds: u64) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    if drain_seconds > 0 {
        warn!("Draining connections for {} seconds...", drain_seconds);
        tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
        info!("Drain period complete");
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-c%20statement_timeout%3D{timeout_secs}s")
}
