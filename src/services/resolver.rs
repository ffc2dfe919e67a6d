//! Resolves a product link to the short code of its detail page.
//!
//! The public site answers `<base>/<product link>` by sending the visitor on to
//! `.../product-details?pageId=<short code>`. Redirects are followed; when the
//! hop happens client-side instead, the code is read from the returned HTML.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use scraper::{Html, Selector};

/// Marker path segment of the detail page.
const DETAILS_MARKER: &str = "product-details";

/// Query parameter carrying the short code.
const PAGE_ID_PARAM: &str = "pageId";

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("HTTP request to product site failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid product link: {0}")]
    InvalidUrl(String),

    #[error("No short code found for {0}")]
    NotFound(String),
}

#[async_trait]
pub trait ResolutionService: Send + Sync {
    async fn resolve(&self, product_url: &str) -> Result<String, ResolutionError>;
}

/// Resolver that follows the product site's redirects over plain HTTP.
pub struct HttpResolver {
    http: reqwest::Client,
    base_url: String,
}

impl HttpResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ResolutionError> {
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn entry_url(&self, product_url: &str) -> String {
        format!("{}/{}", self.base_url, product_url.trim_start_matches('/'))
    }
}

#[async_trait]
impl ResolutionService for HttpResolver {
    async fn resolve(&self, product_url: &str) -> Result<String, ResolutionError> {
        let entry = self.entry_url(product_url);
        let entry = Url::parse(&entry).map_err(|e| ResolutionError::InvalidUrl(e.to_string()))?;

        tracing::debug!(product_url, entry = %entry, "Resolving short code");

        let response = self.http.get(entry).send().await?;
        let landed = response.url().clone();

        if let Some(code) = short_code_from_url(&landed) {
            tracing::info!(product_url, short_code = %code, "Resolved via redirect");
            return Ok(code);
        }

        let html = response.text().await?;
        match short_code_from_html(&html) {
            Some(code) => {
                tracing::info!(product_url, short_code = %code, "Resolved via page content");
                Ok(code)
            }
            None => Err(ResolutionError::NotFound(product_url.to_string())),
        }
    }
}

/// Short code from a detail-page address, if `url` is one.
pub fn short_code_from_url(url: &Url) -> Option<String> {
    if !url.path().contains(DETAILS_MARKER) {
        return None;
    }
    url.query_pairs()
        .find(|(key, _)| key == PAGE_ID_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|code| !code.is_empty())
}

/// Looks for a detail-page address in links, the canonical link, or a meta refresh.
pub fn short_code_from_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let link_sel = Selector::parse("a[href], link[rel=canonical]").expect("valid selector");
    let refresh_sel = Selector::parse("meta[http-equiv]").expect("valid selector");

    let hrefs = document
        .select(&link_sel)
        .filter_map(|el| el.value().attr("href"))
        .map(str::to_string);

    let refreshes = document
        .select(&refresh_sel)
        .filter(|el| {
            el.value()
                .attr("http-equiv")
                .is_some_and(|v| v.eq_ignore_ascii_case("refresh"))
        })
        .filter_map(|el| el.value().attr("content"))
        .filter_map(|content| {
            // "0; url=https://..."
            let lower = content.to_ascii_lowercase();
            lower
                .find("url=")
                .map(|idx| content[idx + 4..].trim_matches(|c| c == '\'' || c == '"').to_string())
        });

    hrefs.chain(refreshes).find_map(|href| {
        let absolute = if href.starts_with("http") {
            href
        } else {
            format!("https://placeholder.invalid/{}", href.trim_start_matches('/'))
        };
        Url::parse(&absolute).ok().and_then(|url| short_code_from_url(&url))
    })
}
