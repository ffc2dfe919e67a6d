//! Test doubles for the upstream collaborators plus a manager harness.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use uuid::Uuid;

use product_fetch::models::job::{Job, JobStatus, SubmitOutcome};
use product_fetch::services::details::{DetailFetcher, FetchError};
use product_fetch::services::notifier::CompletionNotifier;
use product_fetch::services::queue::{JobQueueManager, Pipeline, QueueSettings};
use product_fetch::services::readiness::{ProbeError, Readiness, ReadinessPoller, ReadinessProbe};
use product_fetch::services::resolver::{ResolutionError, ResolutionService};
use product_fetch::services::store::{JobStore, MemoryJobStore};

const OPEN_PERMITS: usize = 1 << 20;

/// Blocks callers until opened. Starts open unless built with `closed()`.
pub struct Gate {
    permits: Semaphore,
}

impl Gate {
    pub fn open_gate() -> Self {
        Self {
            permits: Semaphore::new(OPEN_PERMITS),
        }
    }

    pub fn closed() -> Self {
        Self {
            permits: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.permits.add_permits(OPEN_PERMITS);
    }

    pub async fn pass(&self) {
        // Permit goes straight back, so an open gate stays open.
        let _ = self.permits.acquire().await;
    }
}

pub struct FakeResolver {
    codes: Mutex<HashMap<String, Result<String, String>>>,
    pub gate: Gate,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub call_times: Mutex<Vec<Instant>>,
}

impl FakeResolver {
    pub fn new(gate: Gate) -> Self {
        Self {
            codes: Mutex::new(HashMap::new()),
            gate,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn with_code(self, url: &str, code: &str) -> Self {
        self.codes.lock().unwrap().insert(url.to_string(), Ok(code.to_string()));
        self
    }

    pub fn with_failure(self, url: &str) -> Self {
        self.codes.lock().unwrap().insert(url.to_string(), Err(url.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Short code used for links without an explicit mapping.
pub fn default_code(url: &str) -> String {
    format!("SC-{}", url.rsplit('/').next().unwrap_or(url))
}

#[async_trait]
impl ResolutionService for FakeResolver {
    async fn resolve(&self, product_url: &str) -> Result<String, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.gate.pass().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let outcome = self.codes.lock().unwrap().get(product_url).cloned();
        match outcome {
            Some(Ok(code)) => Ok(code),
            Some(Err(url)) => Err(ResolutionError::NotFound(url)),
            None => Ok(default_code(product_url)),
        }
    }
}

/// Reports the same readiness on every call.
pub struct FakeProbe {
    answer: Readiness,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(answer: Readiness) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadinessProbe for FakeProbe {
    async fn check(&self, _short_code: &str) -> Result<Readiness, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer)
    }
}

pub struct FakeFetcher {
    payload: Value,
    fail: bool,
    pub fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn returning(payload: Value) -> Self {
        Self {
            payload,
            fail: false,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            payload: Value::Null,
            fail: true,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl DetailFetcher for FakeFetcher {
    async fn fetch(&self, short_code: &str) -> Result<Value, FetchError> {
        self.fetched.lock().unwrap().push(short_code.to_string());
        if self.fail {
            return Err(FetchError::Parse("No script content found in response".to_string()));
        }
        Ok(self.payload.clone())
    }
}

pub struct FakeNotifier {
    accept: AtomicBool,
    pub notices: Mutex<Vec<(String, String)>>,
}

impl FakeNotifier {
    pub fn new(accept: bool) -> Self {
        Self {
            accept: AtomicBool::new(accept),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn notices(&self) -> Vec<(String, String)> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionNotifier for FakeNotifier {
    async fn notify(&self, short_code: &str, product_url: &str) -> bool {
        self.notices
            .lock()
            .unwrap()
            .push((short_code.to_string(), product_url.to_string()));
        self.accept.load(Ordering::SeqCst)
    }
}

/// A manager wired to fakes, with fast timings.
pub struct Harness {
    pub manager: JobQueueManager,
    pub store: Arc<MemoryJobStore>,
    pub resolver: Arc<FakeResolver>,
    pub probe: Arc<FakeProbe>,
    pub fetcher: Arc<FakeFetcher>,
    pub notifier: Arc<FakeNotifier>,
}

pub struct HarnessBuilder {
    settings: QueueSettings,
    resolver: FakeResolver,
    probe: FakeProbe,
    fetcher: FakeFetcher,
    notifier: FakeNotifier,
    store: Option<Arc<MemoryJobStore>>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            settings: QueueSettings {
                max_queue_size: 100,
                max_concurrent_jobs: 2,
                cooldown: Duration::ZERO,
                request_timeout: Duration::from_secs(5),
                freshness_window: chrono::Duration::hours(24),
                poll_interval: Duration::from_millis(10),
            },
            resolver: FakeResolver::new(Gate::open_gate()),
            probe: FakeProbe::new(Readiness::NoSteps),
            fetcher: FakeFetcher::returning(json!({"title": "t"})),
            notifier: FakeNotifier::new(true),
            store: None,
        }
    }

    pub fn settings(mut self, f: impl FnOnce(&mut QueueSettings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub fn resolver(mut self, resolver: FakeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn probe(mut self, probe: FakeProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn fetcher(mut self, fetcher: FakeFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn notifier(mut self, notifier: FakeNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share an existing store, as a restarted process would.
    pub fn store(mut self, store: Arc<MemoryJobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Harness {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryJobStore::new()));
        let resolver = Arc::new(self.resolver);
        let probe = Arc::new(self.probe);
        let fetcher = Arc::new(self.fetcher);
        let notifier = Arc::new(self.notifier);

        let pipeline = Pipeline {
            resolver: resolver.clone(),
            poller: ReadinessPoller::new(probe.clone()).with_interval(Duration::from_millis(1)),
            fetcher: fetcher.clone(),
            notifier: notifier.clone(),
        };
        let manager = JobQueueManager::new(store.clone(), pipeline, self.settings);

        Harness {
            manager,
            store,
            resolver,
            probe,
            fetcher,
            notifier,
        }
    }
}

impl Harness {
    pub async fn submit_created(&self, url: &str) -> Job {
        match self.manager.submit(url).await.unwrap() {
            SubmitOutcome::Created(job) => job,
            other => panic!("expected a new job for {url}, got {other:?}"),
        }
    }

    pub async fn job(&self, job_id: Uuid) -> Job {
        self.store.get_job(job_id).await.unwrap().expect("job exists")
    }

    /// Poll until the job reaches `status`, failing after five seconds.
    pub async fn wait_for(&self, job_id: Uuid, status: JobStatus) -> Job {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let job = self.job(job_id).await;
            if job.status == status {
                return job;
            }
            assert!(
                Instant::now() < deadline,
                "job {job_id} stuck in {} waiting for {status}",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until `check` holds for the queue status, failing after five seconds.
    pub async fn wait_until(&self, what: &str, check: impl Fn(usize, usize) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = self.manager.queue_status().await;
            if check(status.queue_depth, status.running_count) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {what}: {status:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn count(&self, status: JobStatus) -> usize {
        self.store.list_jobs(Some(status), 1000).await.unwrap().len()
    }
}
