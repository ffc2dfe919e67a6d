//! Job orchestration: admission, the bounded FIFO queue, and the worker loop.
//!
//! One worker loop owns dequeueing. It takes a slot from a semaphore sized
//! `max_concurrent_jobs` before popping a job, so up to that many jobs run at
//! once. A slot is held for the cooldown after its job finishes, which spaces
//! out calls to the upstream site per slot.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::job::{Job, JobStatus, JobUpdate, SubmitOutcome};
use crate::services::details::{DetailFetcher, FetchError};
use crate::services::notifier::CompletionNotifier;
use crate::services::readiness::{ProbeError, ReadinessPoller};
use crate::services::resolver::{ResolutionError, ResolutionService};
use crate::services::store::{JobStore, StoreError};

/// Longest the loop waits before re-checking pause and shutdown.
pub const DEQUEUE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long shutdown waits for in-flight jobs.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Recorded on jobs a previous process left Pending or Processing.
pub const INTERRUPTED_ERROR: &str = "Job interrupted by service restart";

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_queue_size: usize,
    pub max_concurrent_jobs: usize,
    /// Held per slot after each job.
    pub cooldown: Duration,
    /// Bound on each upstream call.
    pub request_timeout: Duration,
    pub freshness_window: chrono::Duration,
    pub poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_concurrent_jobs: 2,
            cooldown: Duration::from_secs(30),
            request_timeout: Duration::from_secs(180),
            freshness_window: chrono::Duration::hours(24),
            poll_interval: DEQUEUE_POLL_INTERVAL,
        }
    }
}

impl From<&AppConfig> for QueueSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            cooldown: Duration::from_secs(config.job_cooldown_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            freshness_window: chrono::Duration::hours(config.freshness_window_hours),
            poll_interval: DEQUEUE_POLL_INTERVAL,
        }
    }
}

/// The external collaborators a job runs through.
#[derive(Clone)]
pub struct Pipeline {
    pub resolver: Arc<dyn ResolutionService>,
    pub poller: ReadinessPoller,
    pub fetcher: Arc<dyn DetailFetcher>,
    pub notifier: Arc<dyn CompletionNotifier>,
}

/// Why a job ended in `Failed`. The `Display` text is stored in `Job.error`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Readiness check failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("Detail fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{stage} timed out after {limit:?}")]
    Timeout {
        stage: &'static str,
        limit: Duration,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_depth: usize,
    pub max_queue_size: usize,
    pub running_count: usize,
    pub max_concurrent_jobs: usize,
    pub running_job_ids: Vec<Uuid>,
    pub paused: bool,
    pub worker_running: bool,
}

struct Shared {
    store: Arc<dyn JobStore>,
    pipeline: Pipeline,
    settings: QueueSettings,
    /// Serialises cache check, dedup, create and enqueue.
    admission: Mutex<()>,
    queue: Mutex<VecDeque<Uuid>>,
    running: Mutex<HashSet<Uuid>>,
    job_ready: Notify,
    slots: Arc<Semaphore>,
    paused: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Set once store state has been reconciled with the in-memory queue.
    recovered: AtomicBool,
}

/// Owns job lifecycle, deduplication, bounded admission and the worker loop.
#[derive(Clone)]
pub struct JobQueueManager {
    inner: Arc<Shared>,
}

impl JobQueueManager {
    /// The worker loop is not started until `start` or `resume`.
    pub fn new(store: Arc<dyn JobStore>, pipeline: Pipeline, settings: QueueSettings) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        let (paused, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Shared {
                store,
                pipeline,
                settings,
                admission: Mutex::new(()),
                queue: Mutex::new(VecDeque::new()),
                running: Mutex::new(HashSet::new()),
                job_ready: Notify::new(),
                slots,
                paused,
                shutdown,
                worker: Mutex::new(None),
                recovered: AtomicBool::new(false),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    /// Admit a fetch request for `product_url`.
    pub async fn submit(&self, product_url: &str) -> Result<SubmitOutcome, StoreError> {
        let shared = &self.inner;
        let _admission = shared.admission.lock().await;

        if let Some(entry) = shared
            .store
            .get_fresh_cache_entry(product_url, shared.settings.freshness_window)
            .await?
        {
            tracing::info!(product_url, short_code = %entry.short_code, "Fresh cache hit, no job created");
            metrics::counter!("product_cache_hits_total").increment(1);
            return Ok(SubmitOutcome::Cached(entry));
        }

        if let Some(existing) = shared.store.find_active_job_by_url(product_url).await? {
            tracing::info!(
                product_url,
                job_id = %existing.id,
                status = %existing.status,
                "Fetch already in progress"
            );
            return Ok(SubmitOutcome::Duplicate(existing));
        }

        let depth = shared.queue.lock().await.len();
        if depth >= shared.settings.max_queue_size {
            tracing::warn!(product_url, depth, "Queue full, rejecting submission");
            metrics::counter!("product_queue_rejected_total").increment(1);
            return Ok(SubmitOutcome::CapacityExceeded {
                max_queue_size: shared.settings.max_queue_size,
            });
        }

        let job = shared.store.create_job(&Job::new(product_url)).await?;
        let job = match shared.store.update_job_status(job.id, JobUpdate::queued()).await {
            Ok(job) => job,
            Err(e) => {
                // Do not leave an active record behind that nothing will run.
                if let Err(cancel_err) = shared
                    .store
                    .update_job_status(job.id, JobUpdate::cancelled())
                    .await
                {
                    tracing::error!(job_id = %job.id, error = %cancel_err, "Failed to cancel unqueued job");
                }
                return Err(e);
            }
        };

        let depth = {
            let mut queue = shared.queue.lock().await;
            queue.push_back(job.id);
            queue.len()
        };
        shared.job_ready.notify_one();

        metrics::counter!("product_jobs_submitted_total").increment(1);
        metrics::gauge!("product_queue_depth").set(depth as f64);
        tracing::info!(job_id = %job.id, product_url, depth, "Job queued");

        Ok(SubmitOutcome::Created(job))
    }

    pub async fn job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.store.get_job(job_id).await
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        self.inner.store.list_jobs(status, limit).await
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let queue_depth = self.inner.queue.lock().await.len();
        let running_job_ids: Vec<Uuid> = self.inner.running.lock().await.iter().copied().collect();
        let worker_running = self
            .inner
            .worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());

        QueueStatus {
            queue_depth,
            max_queue_size: self.inner.settings.max_queue_size,
            running_count: running_job_ids.len(),
            max_concurrent_jobs: self.inner.settings.max_concurrent_jobs,
            running_job_ids,
            paused: *self.inner.paused.borrow(),
            worker_running,
        }
    }

    /// Drop every not-yet-started entry and mark Pending/Queued jobs Cancelled.
    /// Processing jobs run to completion.
    pub async fn cancel_all_pending(&self) -> Result<Vec<Uuid>, StoreError> {
        let _admission = self.inner.admission.lock().await;
        let mut queue = self.inner.queue.lock().await;

        let cancelled = self.inner.store.cancel_pending_jobs().await?;
        let drained = queue.len();
        queue.clear();
        drop(queue);

        metrics::counter!("product_jobs_cancelled_total").increment(cancelled.len() as u64);
        metrics::gauge!("product_queue_depth").set(0.0);
        tracing::info!(drained, cancelled = cancelled.len(), "Cleared pending jobs");

        Ok(cancelled)
    }

    /// Stop taking new jobs. Running jobs continue.
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
        tracing::info!("Queue paused");
    }

    /// Resume taking jobs, starting the worker loop if needed. Idempotent.
    pub async fn resume(&self) {
        self.inner.paused.send_replace(false);
        tracing::info!("Queue resumed");
        self.start().await;
    }

    /// Start the worker loop unless it is already running.
    ///
    /// The first start also recovers jobs left behind by a previous process.
    pub async fn start(&self) {
        let mut worker = self.inner.worker.lock().await;
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        if !self.inner.recovered.load(Ordering::SeqCst) {
            match self.recover().await {
                Ok(()) => self.inner.recovered.store(true, Ordering::SeqCst),
                Err(e) => tracing::error!(error = %e, "Failed to recover jobs from store, retrying on next start"),
            }
        }
        *worker = Some(tokio::spawn(Arc::clone(&self.inner).run()));
    }

    /// Fail jobs no worker will ever finish and requeue stored Queued jobs
    /// ahead of anything admitted since, oldest first.
    ///
    /// Runs before this manager's worker has started, so any Processing row
    /// belongs to a dead process. The admission lock keeps in-flight
    /// submissions, the only source of Pending rows, out of the way.
    async fn recover(&self) -> Result<(), StoreError> {
        let shared = &self.inner;
        let _admission = shared.admission.lock().await;

        let failed = shared.store.fail_interrupted_jobs(INTERRUPTED_ERROR).await?;
        let stored = shared.store.list_queued_jobs().await?;

        let mut queue = shared.queue.lock().await;
        let known: HashSet<Uuid> = queue.iter().copied().collect();
        let mut rebuilt: VecDeque<Uuid> = stored
            .iter()
            .map(|job| job.id)
            .filter(|id| !known.contains(id))
            .collect();
        let restored = rebuilt.len();
        rebuilt.extend(queue.drain(..));
        *queue = rebuilt;
        let depth = queue.len();
        drop(queue);

        if !failed.is_empty() {
            metrics::counter!("product_jobs_failed_total").increment(failed.len() as u64);
        }
        metrics::gauge!("product_queue_depth").set(depth as f64);
        if restored > 0 {
            shared.job_ready.notify_one();
        }
        tracing::info!(interrupted = failed.len(), restored, depth, "Recovered jobs from store");

        Ok(())
    }

    /// Stop the loop and wait for in-flight jobs, up to a bound.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);

        let handle = self.inner.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker loop ended abnormally");
            }
        }

        let slots = self.inner.settings.max_concurrent_jobs.max(1) as u32;
        match timeout(SHUTDOWN_DRAIN_TIMEOUT, self.inner.slots.acquire_many(slots)).await {
            Ok(Ok(_)) => tracing::info!("All in-flight jobs finished"),
            _ => tracing::warn!("Shutdown drain timed out with jobs still running"),
        }
    }
}

impl Shared {
    async fn run(self: Arc<Self>) {
        let mut paused = self.paused.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        let poll = self.settings.poll_interval;

        tracing::info!(
            max_concurrent_jobs = self.settings.max_concurrent_jobs,
            cooldown_secs = self.settings.cooldown.as_secs(),
            "Worker loop started"
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            if *paused.borrow_and_update() {
                tokio::select! {
                    _ = paused.changed() => {}
                    _ = shutdown.changed() => {}
                    _ = sleep(poll) => {}
                }
                continue;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = paused.changed() => continue,
                _ = shutdown.changed() => continue,
                _ = sleep(poll) => continue,
            };

            let Some(job_id) = self.next_queued(poll).await else {
                continue;
            };

            if *paused.borrow() || *shutdown.borrow() {
                self.queue.lock().await.push_front(job_id);
                continue;
            }

            self.dispatch(job_id, permit).await;
        }

        tracing::info!("Worker loop stopped");
    }

    /// Pop the head of the queue, waiting up to `wait` for one to arrive.
    async fn next_queued(&self, wait: Duration) -> Option<Uuid> {
        if let Some(job_id) = self.queue.lock().await.pop_front() {
            return Some(job_id);
        }
        let _ = timeout(wait, self.job_ready.notified()).await;
        self.queue.lock().await.pop_front()
    }

    async fn dispatch(self: &Arc<Self>, job_id: Uuid, permit: OwnedSemaphorePermit) {
        let job = match self.store.update_job_status(job_id, JobUpdate::processing()).await {
            Ok(job) => job,
            Err(StoreError::InvalidTransition { from, .. }) => {
                tracing::info!(job_id = %job_id, status = %from, "Skipping job that is no longer queued");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to start job, requeueing");
                self.queue.lock().await.push_front(job_id);
                sleep(self.settings.poll_interval).await;
                return;
            }
        };

        self.running.lock().await.insert(job_id);
        metrics::gauge!("product_queue_depth").set(self.queue.lock().await.len() as f64);
        tracing::info!(job_id = %job_id, product_url = %job.product_url, "Job processing");

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            let mut shutdown = shared.shutdown.subscribe();

            let worker = Arc::clone(&shared);
            let execution = tokio::spawn(async move { worker.execute(job).await });
            if let Err(e) = execution.await {
                tracing::error!(job_id = %job_id, error = %e, "Job execution panicked");
                let update = JobUpdate::failed(format!("Job execution aborted: {}", e), None);
                if let Err(e) = shared.store.update_job_status(job_id, update).await {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record aborted job");
                }
            }
            shared.running.lock().await.remove(&job_id);

            if !*shutdown.borrow_and_update() {
                tokio::select! {
                    _ = sleep(shared.settings.cooldown) => {}
                    _ = shutdown.changed() => {}
                }
            }
        });
    }

    async fn execute(&self, job: Job) {
        let started = Instant::now();
        let mut page_id = None;

        let outcome = match self.run_pipeline(&job, &mut page_id).await {
            Ok((short_code, details)) => self
                .store
                .update_job_status(job.id, JobUpdate::completed(&short_code, details))
                .await
                .map(|_| short_code)
                .map_err(JobError::from),
            Err(e) => Err(e),
        };

        metrics::histogram!("product_job_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(short_code) => {
                metrics::counter!("product_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %job.id,
                    short_code = %short_code,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                self.notify(&job, &short_code).await;
            }
            Err(e) => {
                metrics::counter!("product_jobs_failed_total").increment(1);
                tracing::error!(job_id = %job.id, product_url = %job.product_url, error = %e, "Job failed");
                let update = JobUpdate::failed(e.to_string(), page_id);
                if let Err(store_err) = self.store.update_job_status(job.id, update).await {
                    tracing::error!(job_id = %job.id, error = %store_err, "Failed to record job failure");
                }
            }
        }
    }

    /// Resolve, wait for readiness, fetch, record the mapping.
    async fn run_pipeline(
        &self,
        job: &Job,
        page_id: &mut Option<String>,
    ) -> Result<(String, serde_json::Value), JobError> {
        let pipeline = &self.pipeline;

        if let Some(entry) = self
            .store
            .get_fresh_cache_entry(&job.product_url, self.settings.freshness_window)
            .await?
        {
            tracing::info!(job_id = %job.id, short_code = %entry.short_code, "Resolved since admission, using cache");
            *page_id = Some(entry.short_code.clone());
            let details = self
                .bounded("Detail fetch", pipeline.fetcher.fetch(&entry.short_code))
                .await?;
            return Ok((entry.short_code, details));
        }

        let short_code = self
            .bounded("Resolution", pipeline.resolver.resolve(&job.product_url))
            .await?;
        *page_id = Some(short_code.clone());
        tracing::info!(job_id = %job.id, short_code = %short_code, "Short code resolved");

        let readiness = pipeline.poller.poll(&short_code).await?;
        tracing::info!(
            job_id = %job.id,
            percentage = readiness.percentage,
            attempts = readiness.attempts,
            timed_out = readiness.timed_out,
            "Readiness settled"
        );

        let details = self
            .bounded("Detail fetch", pipeline.fetcher.fetch(&short_code))
            .await?;

        self.store
            .upsert_cache_entry(&job.product_url, &short_code, Utc::now())
            .await?;

        Ok((short_code, details))
    }

    /// Best effort; failure is logged only.
    async fn notify(&self, job: &Job, short_code: &str) {
        let notifier = &self.pipeline.notifier;
        match timeout(
            self.settings.request_timeout,
            notifier.notify(short_code, &job.product_url),
        )
        .await
        {
            Ok(true) => tracing::debug!(job_id = %job.id, "Completion notice sent"),
            Ok(false) => tracing::warn!(job_id = %job.id, "Completion notice not delivered"),
            Err(_) => tracing::warn!(job_id = %job.id, "Completion notice timed out"),
        }
    }

    async fn bounded<T, E>(
        &self,
        stage: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, JobError>
    where
        JobError: From<E>,
    {
        let limit = self.settings.request_timeout;
        match timeout(limit, call).await {
            Ok(result) => result.map_err(JobError::from),
            Err(_) => Err(JobError::Timeout { stage, limit }),
        }
    }
}
