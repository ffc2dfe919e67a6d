//! Persistence contract for jobs and the product cache.
//!
//! `PgJobStore` (in `db::queries`) is the durable implementation; `MemoryJobStore`
//! keeps everything in process and is used by tests and `STORE_BACKEND=memory`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, JobUpdate};
use crate::models::product::ProductCacheEntry;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Connectivity check for health endpoints.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// The Pending/Queued/Processing job for `product_url`, if any.
    async fn find_active_job_by_url(&self, product_url: &str) -> Result<Option<Job>, StoreError>;

    /// Compare-and-set transition. Fails with `InvalidTransition` when the
    /// job's current status may not move to `update.status`.
    async fn update_job_status(&self, job_id: Uuid, update: JobUpdate) -> Result<Job, StoreError>;

    /// Newest first.
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// Move every Pending/Queued job to Cancelled in one step; returns their ids.
    async fn cancel_pending_jobs(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Queued jobs, oldest first.
    async fn list_queued_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Move every Pending/Processing job to Failed with `error` in one step;
    /// returns their ids. Only safe while no worker owns those jobs.
    async fn fail_interrupted_jobs(&self, error: &str) -> Result<Vec<Uuid>, StoreError>;

    async fn get_fresh_cache_entry(
        &self,
        product_url: &str,
        max_age: Duration,
    ) -> Result<Option<ProductCacheEntry>, StoreError>;

    async fn upsert_cache_entry(
        &self,
        product_url: &str,
        short_code: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<ProductCacheEntry, StoreError>;

    /// Newest first.
    async fn list_cache_entries(&self, limit: usize) -> Result<Vec<ProductCacheEntry>, StoreError>;

    async fn get_cache_entry_by_short_code(
        &self,
        short_code: &str,
    ) -> Result<Option<ProductCacheEntry>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    cache: HashMap<String, ProductCacheEntry>,
}

/// In-process `JobStore`. Each operation holds the lock for its whole
/// read-modify-write, so record updates are atomic.
#[derive(Default)]
pub struct MemoryJobStore {
    state: RwLock<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        let mut state = self.state.write().await;
        state.jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.state.read().await.jobs.get(&job_id).cloned())
    }

    async fn find_active_job_by_url(&self, product_url: &str) -> Result<Option<Job>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .find(|job| job.product_url == product_url && job.status.is_active())
            .cloned())
    }

    async fn update_job_status(&self, job_id: Uuid, update: JobUpdate) -> Result<Job, StoreError> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;

        if !job.status.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to: update.status,
            });
        }

        job.apply(&update, Utc::now());
        Ok(job.clone())
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        newest_first(&mut jobs, |job| job.created_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn cancel_pending_jobs(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let update = JobUpdate::cancelled();

        let mut cancelled = Vec::new();
        for job in state.jobs.values_mut() {
            if job.status.can_transition_to(JobStatus::Cancelled) {
                job.apply(&update, now);
                cancelled.push(job.id);
            }
        }
        Ok(cancelled)
    }

    async fn list_queued_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn fail_interrupted_jobs(&self, error: &str) -> Result<Vec<Uuid>, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let update = JobUpdate::failed(error, None);

        let mut failed = Vec::new();
        for job in state.jobs.values_mut() {
            if matches!(job.status, JobStatus::Pending | JobStatus::Processing) {
                job.apply(&update, now);
                failed.push(job.id);
            }
        }
        Ok(failed)
    }

    async fn get_fresh_cache_entry(
        &self,
        product_url: &str,
        max_age: Duration,
    ) -> Result<Option<ProductCacheEntry>, StoreError> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .cache
            .get(product_url)
            .filter(|entry| entry.is_fresh(max_age, now))
            .cloned())
    }

    async fn upsert_cache_entry(
        &self,
        product_url: &str,
        short_code: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<ProductCacheEntry, StoreError> {
        let entry = ProductCacheEntry {
            product_url: product_url.to_string(),
            short_code: short_code.to_string(),
            resolved_at,
        };
        self.state
            .write()
            .await
            .cache
            .insert(product_url.to_string(), entry.clone());
        Ok(entry)
    }

    async fn list_cache_entries(&self, limit: usize) -> Result<Vec<ProductCacheEntry>, StoreError> {
        let state = self.state.read().await;
        let mut entries: Vec<ProductCacheEntry> = state.cache.values().cloned().collect();
        newest_first(&mut entries, |entry| entry.resolved_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn get_cache_entry_by_short_code(
        &self,
        short_code: &str,
    ) -> Result<Option<ProductCacheEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .cache
            .values()
            .find(|entry| entry.short_code == short_code)
            .cloned())
    }
}
