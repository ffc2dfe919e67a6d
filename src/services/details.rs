//! Product detail fetcher.
//!
//! The detail page is a Next.js app: product data ships inside a
//! `self.__next_f.push([1,"5:..."])` script chunk as an escaped JSON string.
//! We decode that chunk and cut out the `{"productId": ...}` object.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::{Captures, Regex};
use scraper::{Html, Selector};
use serde_json::{json, Value};

/// Start of the script chunk that carries product data.
const PUSH_PREFIX: &str = r#"self.__next_f.push([1,"5:"#;

/// Start of the product object inside the decoded chunk.
const PRODUCT_MARKER: &str = r#"{"productId":"#;

/// A comma directly followed (modulo whitespace) by `}` or `]`.
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("valid regex"));

/// Any backslash escape, valid or not.
static ESCAPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\\(.)").expect("valid regex"));

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request for product details failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Product details returned HTTP {0}")]
    Status(u16),

    #[error("Failed to extract product details: {0}")]
    Parse(String),
}

#[async_trait]
pub trait DetailFetcher: Send + Sync {
    async fn fetch(&self, short_code: &str) -> Result<Value, FetchError>;
}

/// Fetches and decodes the public detail page.
pub struct HttpDetailFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDetailFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Linux; Android 6.0; Nexus 5 Build/MRA58N) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Mobile Safari/537.36")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }
}

#[async_trait]
impl DetailFetcher for HttpDetailFetcher {
    async fn fetch(&self, short_code: &str) -> Result<Value, FetchError> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[("pageId", short_code)])
            .header("accept", "text/html,application/xhtml+xml")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let html = response.text().await?;
        let details = extract_product_details(&html)?;

        tracing::debug!(short_code, html_bytes = html.len(), "Extracted product details");
        Ok(details)
    }
}

/// Pull the product object out of a detail page.
///
/// Falls back to a `partial_parse` payload when the object is found but
/// cannot be parsed even after repair.
pub fn extract_product_details(html: &str) -> Result<Value, FetchError> {
    let chunk = find_payload_chunk(html)
        .ok_or_else(|| FetchError::Parse("No script content found in response".to_string()))?;

    let start = chunk
        .find(PRODUCT_MARKER)
        .ok_or_else(|| FetchError::Parse("No JSON object found in response".to_string()))?;
    let object = balanced_object(&chunk[start..]);

    if let Ok(value) = serde_json::from_str::<Value>(object) {
        return Ok(value);
    }
    if let Ok(value) = serde_json::from_str::<Value>(&repair_json(object)) {
        return Ok(value);
    }

    tracing::warn!(raw_length = object.len(), "Product JSON unparsable, returning partial payload");
    Ok(json!({
        "productId": product_id_hint(object).unwrap_or_else(|| "unknown".to_string()),
        "status": "partial_parse",
        "message": "Full JSON parsing failed, but basic info extracted",
        "raw_length": object.len(),
    }))
}

/// The decoded string literal of the first product-data script chunk.
fn find_payload_chunk(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let script_sel = Selector::parse("script").expect("valid selector");

    document.select(&script_sel).find_map(|script| {
        let text: String = script.text().collect();
        let start = text.find(PUSH_PREFIX)? + PUSH_PREFIX.len();
        let literal = string_literal_body(&text[start..])?;
        Some(decode_literal(literal))
    })
}

/// Body of a JS string literal up to its closing unescaped quote.
fn string_literal_body(s: &str) -> Option<&str> {
    let mut escaped = false;
    for (idx, ch) in s.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(&s[..idx]),
            _ => {}
        }
    }
    None
}

/// Unescape a JS string literal body.
fn decode_literal(body: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", body)).unwrap_or_else(|_| {
        body.replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\t", "\t")
            .replace("\\r", "\r")
            .replace("\\\\", "\\")
    })
}

/// Prefix of `s` up to the brace closing its first `{`, skipping braces in strings.
fn balanced_object(s: &str) -> &str {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &s[..=idx];
                }
            }
            _ => {}
        }
    }
    s
}

/// Drop trailing commas, then unescape characters JSON does not allow
/// to be escaped (`\'` becomes `'`).
fn repair_json(object: &str) -> String {
    let without_commas = TRAILING_COMMA.replace_all(object, "$1");
    ESCAPE
        .replace_all(&without_commas, |caps: &Captures| {
            let escaped = &caps[1];
            if matches!(escaped, "\"" | "\\" | "/" | "b" | "f" | "n" | "r" | "t" | "u") {
                caps[0].to_string()
            } else {
                escaped.to_string()
            }
        })
        .into_owned()
}

fn product_id_hint(object: &str) -> Option<String> {
    let rest = &object[object.find(PRODUCT_MARKER)? + PRODUCT_MARKER.len()..];
    let rest = rest.trim_start().strip_prefix('"')?;
    rest.find('"').map(|end| rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(chunk: &str) -> String {
        format!(
            r#"<html><body>
            <script>self.__next_f.push([1,"0:[\"$\",\"html\"]"])</script>
            <script>self.__next_f.push([1,"5:{chunk}"])</script>
            </body></html>"#
        )
    }

    #[test]
    fn test_extracts_product_object() {
        let html = page(
            r#"[\"$\",\"div\",null,{\"product\":{\"productId\":\"p-1\",\"title\":\"Desk \\\"Pro\\\"\",\"price\":{\"value\":499}},\"tail\":1}]"#,
        );
        let value = extract_product_details(&html).unwrap();
        assert_eq!(value["productId"], "p-1");
        assert_eq!(value["title"], "Desk \"Pro\"");
        assert_eq!(value["price"]["value"], 499);
        assert!(value.get("tail").is_none());
    }

    #[test]
    fn test_braces_inside_strings() {
        let html = page(r#"{\"productId\":\"p-2\",\"note\":\"{not a brace}\"}"#);
        let value = extract_product_details(&html).unwrap();
        assert_eq!(value["note"], "{not a brace}");
    }

    #[test]
    fn test_repairs_trailing_commas() {
        let html = page(r#"{\"productId\":\"p-3\",\"tags\":[\"a\",\"b\",],}"#);
        let value = extract_product_details(&html).unwrap();
        assert_eq!(value["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_partial_parse_fallback() {
        let html = page(r#"{\"productId\":\"p-4\",\"price\":NaN}"#);
        let value = extract_product_details(&html).unwrap();
        assert_eq!(value["productId"], "p-4");
        assert_eq!(value["status"], "partial_parse");
    }

    #[test]
    fn test_missing_script_is_error() {
        let err = extract_product_details("<html><body><p>Loading</p></body></html>").unwrap_err();
        assert!(matches!(err, FetchError::Parse(msg) if msg.contains("No script content")));
    }

    #[test]
    fn test_missing_product_object_is_error() {
        let html = page(r#"[\"$\",\"div\",null,{}]"#);
        let err = extract_product_details(&html).unwrap_err();
        assert!(matches!(err, FetchError::Parse(msg) if msg.contains("No JSON object")));
    }

    #[test]
    fn test_repairs_invalid_escapes() {
        let html = page(r#"{\"productId\":\"p-5\",\"title\":\"Bob\\'s \\$5 desk\",\"path\":\"a\\\\b\",}"#);
        let value = extract_product_details(&html).unwrap();
        assert_eq!(value["productId"], "p-5");
        assert_eq!(value["title"], "Bob's $5 desk");
        assert_eq!(value["path"], "a\\b");
        assert!(value.get("status").is_none());
    }

    #[test]
    fn test_repair_json_keeps_valid_escapes() {
        assert_eq!(
            repair_json(r#"{"a":"x\"y\\z\n\u00e9\%",}"#),
            r#"{"a":"x\"y\\z\n\u00e9%"}"#
        );
    }
}
