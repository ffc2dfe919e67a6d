use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Best-effort, one-shot completion notice. Never fails the job.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Returns whether the notice was accepted.
    async fn notify(&self, short_code: &str, product_url: &str) -> bool;
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl CompletionNotifier for NoopNotifier {
    async fn notify(&self, _short_code: &str, _product_url: &str) -> bool {
        true
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    short_code: &'a str,
    product_url: &'a str,
}

/// POSTs `{"short_code", "product_url"}` to a webhook.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl CompletionNotifier for WebhookNotifier {
    async fn notify(&self, short_code: &str, product_url: &str) -> bool {
        let payload = WebhookPayload {
            short_code,
            product_url,
        };

        match self.http.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(
                    short_code,
                    status = response.status().as_u16(),
                    "Completion webhook rejected notice"
                );
                false
            }
            Err(e) => {
                tracing::warn!(short_code, error = %e, "Completion webhook unreachable");
                false
            }
        }
    }
}
