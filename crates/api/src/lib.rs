//! HTTP API server with observability for the cart service.
//!
//! Provides REST endpoints for carts and their line items, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use cart::{CartService, CartStore, OpContext};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use config::Config;
use routes::carts::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CartStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/carts", post(routes::carts::create::<S>))
        .route(
            "/carts/{id}",
            get(routes::carts::get::<S>).delete(routes::carts::delete::<S>),
        )
        .route(
            "/carts/{id}/items",
            post(routes::carts::add_product::<S>).delete(routes::carts::empty::<S>),
        )
        .route(
            "/carts/{id}/items/{product_id}",
            delete(routes::carts::delete_product::<S>),
        )
        .route("/users/{id}/carts", get(routes::carts::user_carts::<S>))
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

/// Creates the application state around a cart store.
///
/// Request contexts derive from `shutdown`, so cancelling it aborts every
/// in-flight cart operation with a rollback.
pub fn create_state<S: CartStore + 'static>(
    store: S,
    config: &Config,
    shutdown: CancellationToken,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        carts: CartService::new(store),
        root: OpContext::with_token(shutdown),
        request_timeout: config.request_timeout,
    })
}
