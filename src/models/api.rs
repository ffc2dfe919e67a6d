use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};
use crate::models::product::ProductCacheEntry;

/// Request to fetch details for a product link.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(length(min = 1, max = 2048))]
    pub url: String,
}

/// Response after submitting a product link.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// One of `created`, `duplicate`, `cached`.
    pub outcome: String,
    pub job_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub short_code: Option<String>,
    pub message: String,
}

impl SubmitResponse {
    pub fn created(job: &Job) -> Self {
        Self {
            outcome: "created".to_string(),
            job_id: Some(job.id),
            status: Some(job.status),
            short_code: None,
            message: "Product fetch queued".to_string(),
        }
    }

    pub fn duplicate(job: &Job) -> Self {
        Self {
            outcome: "duplicate".to_string(),
            job_id: Some(job.id),
            status: Some(job.status),
            short_code: job.page_id.clone(),
            message: "A fetch for this product is already in progress".to_string(),
        }
    }

    pub fn cached(entry: &ProductCacheEntry) -> Self {
        Self {
            outcome: "cached".to_string(),
            job_id: None,
            status: None,
            short_code: Some(entry.short_code.clone()),
            message: format!("Product already resolved at {}", entry.resolved_at.to_rfc3339()),
        }
    }
}

/// Query parameters for listing jobs.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductListResponse {
    pub products: Vec<ProductCacheEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Query parameters for listing cached products.
#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    pub limit: Option<usize>,
}

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

/// Clamp a caller-supplied page size.
pub fn effective_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}
