//! End-to-end tests against a running server
//!
//! These tests require:
//! 1. The server running (any store backend)
//! 2. Network access to the product site
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:3000) and
//! E2E_PRODUCT_URL to choose the product link to fetch.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::sleep;

/// Get base URL from env or default to localhost
fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

async fn wait_for_terminal(client: &reqwest::Client, base_url: &str, job_id: &str) -> Value {
    // Readiness polling alone can take a minute; allow for the cooldown too.
    for _ in 0..120 {
        let job: Value = client
            .get(format!("{}/api/v1/jobs/{}", base_url, job_id))
            .send()
            .await
            .expect("Job lookup failed")
            .json()
            .await
            .expect("Job body was not JSON");

        match job["status"].as_str() {
            Some("completed") | Some("failed") | Some("cancelled") => return job,
            _ => sleep(Duration::from_secs(2)).await,
        }
    }
    panic!("Job {} did not finish in time", job_id);
}

#[tokio::test]
#[ignore] // Requires a running server
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );

    let body: Value = response.json().await.unwrap();
    assert!(body["queue"]["max_queue_size"].as_u64().unwrap() > 0);
}

#[tokio::test]
#[ignore] // Requires a running server and the live product site
async fn test_e2e_fetch_product() {
    let product_url = match std::env::var("E2E_PRODUCT_URL") {
        Ok(url) => url,
        Err(_) => {
            println!("E2E_PRODUCT_URL not set, skipping");
            return;
        }
    };
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .json(&json!({ "url": product_url }))
        .send()
        .await
        .expect("Submit failed");
    assert!(response.status().is_success(), "Submit returned {}", response.status());

    let submitted: Value = response.json().await.unwrap();
    println!("Submit outcome: {}", submitted["outcome"]);

    if submitted["outcome"] == "cached" {
        assert!(submitted["short_code"].is_string());
        return;
    }

    let job_id = submitted["job_id"].as_str().expect("job_id missing").to_string();
    let job = wait_for_terminal(&client, &base_url, &job_id).await;

    assert_eq!(job["status"], "completed", "Job ended with error: {}", job["error"]);
    assert!(job["page_id"].is_string());
    assert!(job["result"]["productId"].is_string());
}

#[tokio::test]
#[ignore] // Requires a running server
async fn test_e2e_rejects_empty_url() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .json(&json!({ "url": "" }))
        .send()
        .await
        .expect("Submit failed");

    assert_eq!(response.status().as_u16(), 400);
}
