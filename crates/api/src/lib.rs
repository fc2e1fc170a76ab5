//! HTTP API server with observability for the checkout system.
//!
//! Exposes order sheet staging, order creation and payment over REST, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{CoordinatorConfig, OrderCollector, OrderPaymentCoordinator};
use lock::LockManager;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::{AppState, CheckoutBackend};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CheckoutBackend, L: LockManager + 'static>(
    state: Arc<AppState<S, L>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/order-sheets", post(routes::order_sheets::stage::<S, L>))
        .route("/order-sheets/{id}", get(routes::order_sheets::get::<S, L>))
        .route("/orders", post(routes::orders::create::<S, L>))
        .route("/orders/{id}", get(routes::orders::get::<S, L>))
        .route(
            "/orders/{id}/payment",
            post(routes::orders::pay::<S, L>).get(routes::orders::payment::<S, L>),
        )
        .route("/buyers/{id}/balance", get(routes::buyers::balance::<S, L>))
        .route(
            "/buyers/{id}/balance/charge",
            post(routes::buyers::charge::<S, L>),
        )
        .route("/products/{id}/stock", get(routes::products::stock::<S, L>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over one backend serving every store
/// contract.
pub fn create_default_state<S: CheckoutBackend, L: LockManager + 'static>(
    store: S,
    locks: L,
    collector: Arc<dyn OrderCollector>,
    config: CoordinatorConfig,
) -> Arc<AppState<S, L>> {
    let coordinator =
        OrderPaymentCoordinator::new(store.clone(), store.clone(), store, locks, collector, config);
    Arc::new(AppState { coordinator })
}
