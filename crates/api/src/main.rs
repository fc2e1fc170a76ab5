//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::routes::CheckoutBackend;
use checkout::{HttpOrderCollector, LoggingCollector, OrderCollector};
use lock::{InMemoryLockManager, LockManager, PostgresLockManager};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{LogPublisher, OutboxRelay};
use store::{InMemoryStore, OutboxStore, PostgresStore};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

fn build_collector(config: &Config) -> Arc<dyn OrderCollector> {
    match &config.collector_url {
        Some(url) => {
            let collector = HttpOrderCollector::new(url.as_str(), config.collector_timeout)
                .expect("failed to build collector client");
            tracing::info!(url = %url, "posting paid orders to collector");
            Arc::new(collector)
        }
        None => Arc::new(LoggingCollector),
    }
}

/// Serves the API and runs the outbox relay until shutdown.
async fn run<S, L>(config: Config, store: S, locks: L, metrics_handle: PrometheusHandle)
where
    S: CheckoutBackend + OutboxStore,
    L: LockManager + 'static,
{
    let state = api::create_default_state(
        store.clone(),
        locks,
        build_collector(&config),
        config.coordinator_config(),
    );
    let app = api::create_app(state, metrics_handle);

    // The relay stops once the server has drained.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = OutboxRelay::new(store, LogPublisher, config.relay_config());
    let relay_task = tokio::spawn(async move { relay.run(shutdown_rx).await });

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = relay_task.await {
        tracing::error!(error = %e, "outbox relay task failed");
    }

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick backends and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresStore::new(pool.clone());
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL backends");
            run(config, store, PostgresLockManager::new(pool), metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory backends");
            run(
                config,
                InMemoryStore::new(),
                InMemoryLockManager::new(),
                metrics_handle,
            )
            .await;
        }
    }
}
