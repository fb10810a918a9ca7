//! Message worker for the character saga and the quest progress consumer.
//!
//! Messages arrive as JSON envelopes on `POST /messages` and are dispatched
//! on their own task. The process also serves health, Prometheus metrics and
//! read-only saga and progress lookups, and runs the saga reconciliation loop.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use dispatcher::{Dispatcher, Handled};
pub use error::{Result, WorkerError};
pub use state::{AppState, Backends};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/messages", post(routes::messages::deliver))
        .route("/sagas/{key}", get(routes::sagas::get))
        .route(
            "/subjects/{id}/quests",
            get(routes::progress::list_for_subject),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}
