//! Readiness of an upstream detail page, and the bounded poll that waits for it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tokio::time::sleep;

/// Delay between probe calls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on probe calls for one short code, the first call included.
pub const MAX_POLL_ATTEMPTS: u32 = 60;

/// Percentage at which the page is fetched.
pub const READY_THRESHOLD: u8 = 90;

/// Upstream message meaning the page has no staged preparation.
const NO_STEPS_MESSAGE: &str = "No product detail steps found";

/// One probe answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Percent(u8),
    /// No readiness tracking applies; treated as 100%.
    NoSteps,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Readiness request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Readiness endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Readiness endpoint reported: {0}")]
    Upstream(String),

    #[error("Readiness request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid readiness API key header")]
    InvalidApiKey,
}

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn check(&self, short_code: &str) -> Result<Readiness, ProbeError>;
}

#[derive(Deserialize)]
struct StepsResponse {
    message: Option<String>,
    data: Option<StepsData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepsData {
    progress_bar: Option<ProgressBar>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressBar {
    progress_percentage: Option<ProgressValue>,
}

#[derive(Deserialize)]
struct ProgressValue {
    value: Option<f64>,
}

/// Interpret a product-detail-steps body.
fn readiness_from_body(body: StepsResponse) -> Result<Readiness, ProbeError> {
    if let Some(message) = body.message.filter(|m| !m.is_empty()) {
        if message == NO_STEPS_MESSAGE {
            return Ok(Readiness::NoSteps);
        }
        return Err(ProbeError::Upstream(message));
    }

    // Missing progress means nothing prepared yet.
    let value = body
        .data
        .and_then(|d| d.progress_bar)
        .and_then(|p| p.progress_percentage)
        .and_then(|p| p.value)
        .unwrap_or(0.0);

    Ok(Readiness::Percent(value.clamp(0.0, 100.0).round() as u8))
}

/// Probe backed by the product-detail-steps endpoint.
pub struct HttpReadinessProbe {
    http: reqwest::Client,
    api_url: String,
}

impl HttpReadinessProbe {
    pub fn new(api_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, ProbeError> {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("channel-type", HeaderValue::from_static("web"));
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key).map_err(|_| ProbeError::InvalidApiKey)?;
            headers.insert("x-api-key", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.to_string(),
        })
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn check(&self, short_code: &str) -> Result<Readiness, ProbeError> {
        let response = self
            .http
            .get(&self.api_url)
            .query(&[("product_detail_hash", short_code)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status().as_u16()));
        }

        let body: StepsResponse = response.json().await?;
        readiness_from_body(body)
    }
}

/// How a poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Last observed percentage; 100 for `NoSteps`.
    pub percentage: u8,
    /// Probe calls made.
    pub attempts: u32,
    /// Stopped at the attempt cap below the threshold.
    pub timed_out: bool,
}

/// Calls a `ReadinessProbe` until the threshold, the sentinel, or the attempt cap.
///
/// Reaching the cap is not an error: the caller fetches whatever is there.
/// Probe errors are returned as-is.
#[derive(Clone)]
pub struct ReadinessPoller {
    probe: Arc<dyn ReadinessProbe>,
    interval: Duration,
    max_attempts: u32,
    threshold: u8,
    call_timeout: Option<Duration>,
}

impl ReadinessPoller {
    pub fn new(probe: Arc<dyn ReadinessProbe>) -> Self {
        Self {
            probe,
            interval: POLL_INTERVAL,
            max_attempts: MAX_POLL_ATTEMPTS,
            threshold: READY_THRESHOLD,
            call_timeout: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Bound every probe call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    async fn check(&self, short_code: &str) -> Result<Readiness, ProbeError> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.probe.check(short_code))
                .await
                .map_err(|_| ProbeError::Timeout(limit))?,
            None => self.probe.check(short_code).await,
        }
    }

    pub async fn poll(&self, short_code: &str) -> Result<PollOutcome, ProbeError> {
        let mut percentage = match self.check(short_code).await? {
            Readiness::NoSteps => {
                tracing::debug!(short_code, "No readiness steps, treating as ready");
                return Ok(PollOutcome {
                    percentage: 100,
                    attempts: 1,
                    timed_out: false,
                });
            }
            Readiness::Percent(p) => p,
        };
        let mut attempts = 1;

        while percentage < self.threshold && attempts < self.max_attempts {
            tracing::debug!(short_code, percentage, attempts, "Waiting for detail page");
            sleep(self.interval).await;

            percentage = match self.check(short_code).await? {
                Readiness::NoSteps => 100,
                Readiness::Percent(p) => p,
            };
            attempts += 1;
        }

        let timed_out = percentage < self.threshold;
        if timed_out {
            tracing::warn!(
                short_code,
                percentage,
                attempts,
                "Readiness poll hit attempt cap, continuing with partial page"
            );
        }

        Ok(PollOutcome {
            percentage,
            attempts,
            timed_out,
        })
    }
}
