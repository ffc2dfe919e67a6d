use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, JobUpdate};
use crate::models::product::ProductCacheEntry;
use crate::services::store::{JobStore, StoreError};

const JOB_COLUMNS: &str = "id, product_url, status, result, page_id, error, created_at, updated_at, completed_at";

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<JobStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Job {
        id: row.try_get("id")?,
        product_url: row.try_get("product_url")?,
        status,
        result: row.try_get("result")?,
        page_id: row.try_get("page_id")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn cache_entry_from_row(row: &PgRow) -> Result<ProductCacheEntry, sqlx::Error> {
    Ok(ProductCacheEntry {
        product_url: row.try_get("product_url")?,
        short_code: row.try_get("short_code")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn status_names(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.to_string()).collect()
}

/// PostgreSQL-backed `JobStore`.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO product_jobs (id, product_url, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(&job.product_url)
        .bind(job.status.as_ref())
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(job_from_row(&row)?)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM product_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    async fn find_active_job_by_url(&self, product_url: &str) -> Result<Option<Job>, StoreError> {
        let active = status_names(&[JobStatus::Pending, JobStatus::Queued, JobStatus::Processing]);
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM product_jobs
            WHERE product_url = $1 AND status = ANY($2)
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(product_url)
        .bind(&active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    async fn update_job_status(&self, job_id: Uuid, update: JobUpdate) -> Result<Job, StoreError> {
        let from = status_names(&update.status.predecessors());

        let row = sqlx::query(&format!(
            r#"
            UPDATE product_jobs
            SET status = $2,
                result = COALESCE($3, result),
                page_id = COALESCE($4, page_id),
                error = COALESCE($5, error),
                updated_at = NOW(),
                completed_at = CASE WHEN $6 THEN NOW() ELSE completed_at END
            WHERE id = $1 AND status = ANY($7)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(update.status.as_ref())
        .bind(&update.result)
        .bind(&update.page_id)
        .bind(&update.error)
        .bind(update.status.is_terminal())
        .bind(&from)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(job_from_row(&row)?);
        }

        // Nothing matched: either unknown id or an illegal transition.
        match self.get_job(job_id).await? {
            Some(current) => Err(StoreError::InvalidTransition {
                job_id,
                from: current.status,
                to: update.status,
            }),
            None => Err(StoreError::NotFound(job_id)),
        }
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM product_jobs
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.to_string()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(job_from_row).collect::<Result<_, _>>()?)
    }

    async fn cancel_pending_jobs(&self) -> Result<Vec<Uuid>, StoreError> {
        let from = status_names(&JobStatus::Cancelled.predecessors());
        let rows = sqlx::query(
            r#"
            UPDATE product_jobs
            SET status = $1, updated_at = NOW(), completed_at = NOW()
            WHERE status = ANY($2)
            RETURNING id
            "#,
        )
        .bind(JobStatus::Cancelled.as_ref())
        .bind(&from)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<_, _>>()?)
    }

    async fn list_queued_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM product_jobs
            WHERE status = $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(JobStatus::Queued.as_ref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(job_from_row).collect::<Result<_, _>>()?)
    }

    async fn fail_interrupted_jobs(&self, error: &str) -> Result<Vec<Uuid>, StoreError> {
        let from = status_names(&[JobStatus::Pending, JobStatus::Processing]);
        let rows = sqlx::query(
            r#"
            UPDATE product_jobs
            SET status = $1, error = $2, updated_at = NOW(), completed_at = NOW()
            WHERE status = ANY($3)
            RETURNING id
            "#,
        )
        .bind(JobStatus::Failed.as_ref())
        .bind(error)
        .bind(&from)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<_, _>>()?)
    }

    async fn get_fresh_cache_entry(
        &self,
        product_url: &str,
        max_age: Duration,
    ) -> Result<Option<ProductCacheEntry>, StoreError> {
        let cutoff = Utc::now() - max_age;
        let row = sqlx::query(
            r#"
            SELECT product_url, short_code, resolved_at
            FROM product_cache
            WHERE product_url = $1 AND resolved_at > $2
            "#,
        )
        .bind(product_url)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(cache_entry_from_row).transpose()?)
    }

    async fn upsert_cache_entry(
        &self,
        product_url: &str,
        short_code: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<ProductCacheEntry, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO product_cache (product_url, short_code, resolved_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_url)
            DO UPDATE SET short_code = EXCLUDED.short_code, resolved_at = EXCLUDED.resolved_at
            RETURNING product_url, short_code, resolved_at
            "#,
        )
        .bind(product_url)
        .bind(short_code)
        .bind(resolved_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(cache_entry_from_row(&row)?)
    }

    async fn list_cache_entries(&self, limit: usize) -> Result<Vec<ProductCacheEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_url, short_code, resolved_at
            FROM product_cache
            ORDER BY resolved_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(cache_entry_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn get_cache_entry_by_short_code(
        &self,
        short_code: &str,
    ) -> Result<Option<ProductCacheEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT product_url, short_code, resolved_at
            FROM product_cache
            WHERE short_code = $1
            ORDER BY resolved_at DESC
            LIMIT 1
            "#,
        )
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(cache_entry_from_row).transpose()?)
    }
}
