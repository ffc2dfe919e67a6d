pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod products;
pub mod queue;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Build the HTTP router. `/metrics` is mounted only when a recorder handle is given.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let api = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job))
        .route("/api/v1/queue", get(queue::queue_status))
        .route("/api/v1/queue/clear", post(queue::clear_queue))
        .route("/api/v1/queue/pause", post(queue::pause_queue))
        .route("/api/v1/queue/resume", post(queue::resume_queue))
        .route("/api/v1/products", get(products::list_products))
        .route("/api/v1/products/{short_code}", get(products::get_product))
        .with_state(state);

    let app = match prometheus {
        Some(handle) => api.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        ),
        None => api,
    };

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024))
}
