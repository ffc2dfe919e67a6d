use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::models::product::ProductCacheEntry;

/// Status of a product fetch job.
///
/// Legal transitions: `Pending -> Queued -> Processing -> {Completed | Failed}`,
/// `{Pending | Queued} -> Cancelled`, and `Pending -> Failed` for a job whose
/// admission was cut short by a restart.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Queued, Cancelled)
        )
    }

    /// Statuses from which `self` may be reached.
    pub fn predecessors(self) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(self))
            .collect()
    }

    /// Counts toward the one-active-job-per-URL rule.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Queued | JobStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// A product fetch job. Never deleted; terminal jobs are the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub product_url: String,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub page_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(product_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_url: product_url.into(),
            status: JobStatus::Pending,
            result: None,
            page_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply an update in place. Callers check the transition first.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        if update.result.is_some() {
            self.result = update.result.clone();
        }
        if update.page_id.is_some() {
            self.page_id = update.page_id.clone();
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }
        self.updated_at = now;
        if update.status.is_terminal() {
            self.completed_at = Some(now);
        }
    }
}

/// A status transition together with the fields it sets.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub page_id: Option<String>,
    pub error: Option<String>,
}

impl JobUpdate {
    fn status(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            page_id: None,
            error: None,
        }
    }

    pub fn queued() -> Self {
        Self::status(JobStatus::Queued)
    }

    pub fn processing() -> Self {
        Self::status(JobStatus::Processing)
    }

    pub fn cancelled() -> Self {
        Self::status(JobStatus::Cancelled)
    }

    pub fn completed(page_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            status: JobStatus::Completed,
            result: Some(result),
            page_id: Some(page_id.into()),
            error: None,
        }
    }

    /// `page_id` is kept when resolution succeeded before a later stage failed.
    pub fn failed(error: impl Into<String>, page_id: Option<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result: None,
            page_id,
            error: Some(error.into()),
        }
    }
}

/// Result of an admission request.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// A new job was created and queued.
    Created(Job),
    /// A job for the same URL is already in flight.
    Duplicate(Job),
    /// The URL was resolved within the freshness window; no job was created.
    Cached(ProductCacheEntry),
    /// The queue is full; nothing was created. Retry later.
    CapacityExceeded { max_queue_size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transition_table() {
        use JobStatus::*;
        let allowed = [
            (Pending, Queued),
            (Queued, Processing),
            (Processing, Completed),
            (Processing, Failed),
            (Pending, Failed),
            (Pending, Cancelled),
            (Queued, Cancelled),
        ];

        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in JobStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(JobStatus::ALL.iter().all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn test_predecessors() {
        assert_eq!(
            JobStatus::Cancelled.predecessors(),
            vec![JobStatus::Pending, JobStatus::Queued]
        );
        assert_eq!(JobStatus::Processing.predecessors(), vec![JobStatus::Queued]);
        assert_eq!(
            JobStatus::Failed.predecessors(),
            vec![JobStatus::Pending, JobStatus::Processing]
        );
        assert!(JobStatus::Pending.predecessors().is_empty());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(JobStatus::Cancelled.as_ref(), "cancelled");
        assert_eq!(JobStatus::from_str("queued").unwrap(), JobStatus::Queued);
        assert!(JobStatus::from_str("new").is_err());
    }

    #[test]
    fn test_apply_terminal_sets_completed_at() {
        let mut job = Job::new("http://x/a");
        let now = Utc::now();
        job.apply(&JobUpdate::queued(), now);
        assert!(job.completed_at.is_none());

        job.apply(&JobUpdate::processing(), now);
        job.apply(
            &JobUpdate::failed("upstream down", Some("SC1".to_string())),
            now,
        );
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.page_id.as_deref(), Some("SC1"));
        assert_eq!(job.error.as_deref(), Some("upstream down"));
        assert_eq!(job.completed_at, Some(now));
    }
}
