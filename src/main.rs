use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use product_fetch::app_state::AppState;
use product_fetch::config::{AppConfig, StoreBackend};
use product_fetch::db;
use product_fetch::db::queries::PgJobStore;
use product_fetch::routes;
use product_fetch::services::{
    details::HttpDetailFetcher,
    notifier::{CompletionNotifier, NoopNotifier, WebhookNotifier},
    queue::{JobQueueManager, Pipeline, QueueSettings},
    readiness::{HttpReadinessProbe, ReadinessPoller},
    resolver::HttpResolver,
    store::{JobStore, MemoryJobStore},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing product-fetch server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("product_jobs_submitted_total", "Jobs admitted to the queue");
    metrics::describe_counter!("product_jobs_completed_total", "Jobs that finished with details");
    metrics::describe_counter!("product_jobs_failed_total", "Jobs that ended in failure");
    metrics::describe_counter!("product_jobs_cancelled_total", "Jobs cancelled before starting");
    metrics::describe_counter!("product_cache_hits_total", "Submissions answered from the cache");
    metrics::describe_counter!("product_queue_rejected_total", "Submissions rejected by a full queue");
    metrics::describe_gauge!("product_queue_depth", "Jobs waiting in the queue");
    metrics::describe_histogram!("product_job_duration_seconds", "Time to run one job end to end");

    let store: Arc<dyn JobStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL is required for the postgres store backend");

            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(database_url, config.max_concurrent_jobs)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            Arc::new(PgJobStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store, jobs are lost on restart");
            Arc::new(MemoryJobStore::new())
        }
    };

    let request_timeout = Duration::from_secs(config.request_timeout_secs);

    let resolver = HttpResolver::new(&config.resolver_base_url, request_timeout)
        .expect("Failed to build resolver client");
    let probe = HttpReadinessProbe::new(
        &config.readiness_api_url,
        config.readiness_api_key.as_deref(),
        request_timeout,
    )
    .expect("Failed to build readiness client");
    let fetcher = HttpDetailFetcher::new(&config.details_base_url, request_timeout)
        .expect("Failed to build detail fetch client");

    let notifier: Arc<dyn CompletionNotifier> = match config.webhook_url.as_deref() {
        Some(url) => {
            tracing::info!(webhook_url = url, "Completion webhook enabled");
            Arc::new(WebhookNotifier::new(url, request_timeout).expect("Failed to build webhook client"))
        }
        None => Arc::new(NoopNotifier),
    };

    let pipeline = Pipeline {
        resolver: Arc::new(resolver),
        poller: ReadinessPoller::new(Arc::new(probe)).with_call_timeout(request_timeout),
        fetcher: Arc::new(fetcher),
        notifier,
    };

    let manager = JobQueueManager::new(store, pipeline, QueueSettings::from(&config));
    manager.start().await;

    let app = routes::router(AppState::new(manager.clone()), Some(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Draining job queue");
    manager.shutdown().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
