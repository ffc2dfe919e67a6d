use serde::Deserialize;

/// Which `JobStore` implementation backs the service.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Required for the postgres backend.
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,

    /// Public site that redirects a product link to its detail page.
    #[serde(default = "default_resolver_base_url")]
    pub resolver_base_url: String,

    /// Endpoint reporting how far a detail page has been prepared.
    #[serde(default = "default_readiness_api_url")]
    pub readiness_api_url: String,

    /// Optional `x-api-key` sent to the readiness endpoint.
    #[serde(default)]
    pub readiness_api_key: Option<String>,

    /// Detail page, queried with `?pageId=<short code>`.
    #[serde(default = "default_details_base_url")]
    pub details_base_url: String,

    /// Completion webhook. Notifications are skipped when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Pause per worker slot after each job, in seconds.
    #[serde(default = "default_job_cooldown_secs")]
    pub job_cooldown_secs: u64,

    /// Upper bound on every upstream call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_freshness_window_hours")]
    pub freshness_window_hours: i64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Postgres
}

fn default_resolver_base_url() -> String {
    "https://flash.co".to_string()
}

fn default_readiness_api_url() -> String {
    "https://apiv3.flash.tech/agents/product-detail-steps".to_string()
}

fn default_details_base_url() -> String {
    "https://webapp.flash.co/product-details".to_string()
}

fn default_max_queue_size() -> usize {
    100
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_job_cooldown_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    180
}

fn default_freshness_window_hours() -> i64 {
    24
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
