//! Worker Pool for processing jobs

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backend::{JobStore, StoreError};
use crate::extractor::{ExtractionError, ExtractionResult, Extractor};
use crate::job::{deadline, Document, Expected, FailureAction, JobEntry, Transition};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Independent claim loops
    pub workers: usize,
    /// First idle wait after an empty claim
    pub poll_interval: Duration,
    /// Ceiling for the doubling idle wait
    pub max_idle_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_millis(100),
            max_idle_backoff: Duration::from_secs(2),
        }
    }
}

/// Why a single attempt did not produce a result
#[derive(Debug, thiserror::Error)]
pub enum AttemptFailure {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("Attempt timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Extractor panicked: {0}")]
    Panicked(String),
}

/// How an attempt was settled in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Finished,
    Retrying { delay: Duration },
    Failed,
    /// Someone else (the reaper) finalized the attempt first
    Discarded,
}

/// Settle a failed attempt according to the job's retry policy.
///
/// Shared by workers and the reaper; the CAS on `(Started, attempt)` makes
/// sure only one of them wins.
pub async fn record_failure<S: JobStore + ?Sized>(
    store: &S,
    job: &JobEntry,
    error: String,
) -> Result<AttemptOutcome, StoreError> {
    let expected = Expected::started(job.attempt);

    let (transition, outcome) = match job.policy.on_failure(job.attempt) {
        FailureAction::Retry(delay) => (
            Transition::Retry {
                error,
                eligible_at: deadline(Utc::now(), delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
            AttemptOutcome::Retrying { delay },
        ),
        FailureAction::Exhausted => (Transition::Fail(error), AttemptOutcome::Failed),
    };

    if store.compare_and_swap(job.id, expected, transition).await? {
        Ok(outcome)
    } else {
        Ok(AttemptOutcome::Discarded)
    }
}

/// A single claim/execute/settle loop
pub struct Worker<S: JobStore + ?Sized> {
    id: usize,
    store: Arc<S>,
    extractor: Arc<dyn Extractor>,
    config: WorkerConfig,
}

impl<S: JobStore + ?Sized + 'static> Worker<S> {
    pub fn new(id: usize, store: Arc<S>, extractor: Arc<dyn Extractor>, config: WorkerConfig) -> Self {
        Self {
            id,
            store,
            extractor,
            config,
        }
    }

    /// Run until `shutdown` flips to true. In-flight attempts are never interrupted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut idle = self.config.poll_interval;

        while !*shutdown.borrow() {
            let wait = match self.run_once().await {
                Ok(Some(_)) => {
                    idle = self.config.poll_interval;
                    continue;
                }
                Ok(None) => {
                    let wait = idle;
                    idle = (idle * 2).min(self.config.max_idle_backoff);
                    wait
                }
                Err(e) => {
                    error!(worker = self.id, error = %e, "Job store error");
                    Duration::from_secs(1)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    // Sender dropped, treat as shutdown
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(worker = self.id, "Worker stopped");
    }

    /// Claim and process at most one job
    pub async fn run_once(&self) -> Result<Option<AttemptOutcome>, StoreError> {
        match self.store.claim_next().await? {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute a claimed job and settle the attempt
    pub async fn process(&self, mut job: JobEntry) -> Result<AttemptOutcome, StoreError> {
        info!(
            worker = self.id,
            job_id = %job.id,
            attempt = job.attempt,
            kind = job.document.kind.as_str(),
            "Processing job"
        );

        let document = Document {
            kind: job.document.kind,
            bytes: std::mem::take(&mut job.document.bytes),
        };

        match self.execute(document, job.policy.timeout).await {
            Ok(result) => {
                let pages = result.pages;
                let swapped = self
                    .store
                    .compare_and_swap(job.id, Expected::started(job.attempt), Transition::Finish(result))
                    .await?;

                if swapped {
                    info!(job_id = %job.id, attempt = job.attempt, pages, "Job finished");
                    Ok(AttemptOutcome::Finished)
                } else {
                    warn!(job_id = %job.id, attempt = job.attempt, "Attempt already finalized, discarding late result");
                    Ok(AttemptOutcome::Discarded)
                }
            }
            Err(failure) => {
                let outcome = record_failure(self.store.as_ref(), &job, failure.to_string()).await?;
                match outcome {
                    AttemptOutcome::Retrying { delay } => info!(
                        job_id = %job.id,
                        attempt = job.attempt,
                        delay_secs = delay.as_secs(),
                        error = %failure,
                        "Job failed, scheduling retry with backoff"
                    ),
                    AttemptOutcome::Failed => error!(
                        job_id = %job.id,
                        attempt = job.attempt,
                        error = %failure,
                        "Job failed permanently"
                    ),
                    _ => warn!(job_id = %job.id, attempt = job.attempt, "Attempt already finalized"),
                }
                Ok(outcome)
            }
        }
    }

    /// Run the extractor in its own task under a deadline. On expiry the task
    /// is aborted; extractors doing blocking work may keep running, but their
    /// output is dropped with the handle.
    async fn execute(&self, document: Document, timeout: Duration) -> Result<ExtractionResult, AttemptFailure> {
        let extractor = self.extractor.clone();
        let mut handle = tokio::spawn(async move { extractor.extract(&document).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(pages))) => Ok(ExtractionResult::from_pages(pages)?),
            Ok(Ok(Err(e))) => Err(AttemptFailure::Extraction(e)),
            Ok(Err(join_error)) => Err(AttemptFailure::Panicked(join_error.to_string())),
            Err(_) => {
                handle.abort();
                Err(AttemptFailure::TimedOut(timeout))
            }
        }
    }
}

/// Fixed set of workers sharing one store and extractor
pub struct WorkerPool<S: JobStore + ?Sized> {
    store: Arc<S>,
    extractor: Arc<dyn Extractor>,
    config: WorkerConfig,
}

impl<S: JobStore + ?Sized + 'static> WorkerPool<S> {
    pub fn new(store: Arc<S>, extractor: Arc<dyn Extractor>, config: WorkerConfig) -> Self {
        Self {
            store,
            extractor,
            config,
        }
    }

    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    pub fn config(&self) -> WorkerConfig {
        self.config
    }

    pub fn worker(&self, id: usize) -> Worker<S> {
        Worker::new(id, self.store.clone(), self.extractor.clone(), self.config)
    }

    /// Spawn all workers and wait for them to drain after shutdown
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.config.workers,
            store = self.store.name(),
            extractor = self.extractor.name(),
            "Worker pool started"
        );

        let handles: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| {
                let worker = self.worker(id);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run(shutdown).await })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task terminated abnormally");
            }
        }

        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{MockExtractor, PageText};
    use crate::job::{JobPolicy, JobState};
    use crate::memory::MemoryStore;
    use async_trait::async_trait;

    struct PanickingExtractor;

    #[async_trait]
    impl Extractor for PanickingExtractor {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn extract(&self, _document: &Document) -> Result<Vec<PageText>, ExtractionError> {
            panic!("page decoder crashed")
        }
    }

    fn policy(max_attempts: u32) -> JobPolicy {
        JobPolicy {
            max_attempts,
            backoff_schedule: vec![Duration::ZERO],
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn submit(store: &MemoryStore, bytes: &[u8], policy: JobPolicy) -> crate::JobId {
        let job = JobEntry::new(Document::new(bytes.to_vec()), policy);
        let id = job.id;
        store.enqueue(job).await.unwrap();
        id
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert!(config.workers > 0);
        assert!(config.poll_interval <= config.max_idle_backoff);
    }

    #[tokio::test]
    async fn test_success_stores_result() {
        let store = Arc::new(MemoryStore::new());
        let id = submit(&store, b"%PDF-1.7", policy(3)).await;
        let extractor = Arc::new(MockExtractor::new().with_pdf_pages(3));
        let worker = Worker::new(0, store.clone(), extractor, WorkerConfig::default());

        assert_eq!(worker.run_once().await.unwrap(), Some(AttemptOutcome::Finished));

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Finished);
        let result = job.result.unwrap();
        assert_eq!(result.pages, 3);
        let pages: Vec<u32> = result.content.iter().map(|p| p.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_retries_then_fails() {
        let store = Arc::new(MemoryStore::new());
        let id = submit(&store, b"img", policy(1)).await;
        let extractor = Arc::new(MockExtractor::always_failing());
        let worker = Worker::new(0, store.clone(), extractor.clone(), WorkerConfig::default());

        assert_eq!(
            worker.run_once().await.unwrap(),
            Some(AttemptOutcome::Retrying { delay: Duration::ZERO })
        );
        assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Queued);

        assert_eq!(worker.run_once().await.unwrap(), Some(AttemptOutcome::Failed));
        assert_eq!(worker.run_once().await.unwrap(), None);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt, 2);
        assert!(job.error.unwrap().contains("mock failure"));
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn test_extractor_panic_is_failed_attempt() {
        let store = Arc::new(MemoryStore::new());
        let id = submit(&store, b"img", policy(1)).await;
        let worker = Worker::new(0, store.clone(), Arc::new(PanickingExtractor), WorkerConfig::default());

        assert_eq!(
            worker.run_once().await.unwrap(),
            Some(AttemptOutcome::Retrying { delay: Duration::ZERO })
        );
        assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Queued);

        assert_eq!(worker.run_once().await.unwrap(), Some(AttemptOutcome::Failed));

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt, 2);
        assert!(job.result.is_none());
        let error = job.error.unwrap();
        assert!(error.contains("panicked"));
        assert!(error.contains("page decoder crashed"));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let store = Arc::new(MemoryStore::new());
        let mut p = policy(0);
        p.timeout = Duration::from_millis(50);
        let id = submit(&store, b"img", p).await;
        let extractor = Arc::new(MockExtractor::new().with_latency(Duration::from_secs(5)));
        let worker = Worker::new(0, store.clone(), extractor, WorkerConfig::default());

        assert_eq!(worker.run_once().await.unwrap(), Some(AttemptOutcome::Failed));

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.unwrap().contains("timed out"));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_late_result_discarded_after_external_finalization() {
        let store = Arc::new(MemoryStore::new());
        let id = submit(&store, b"img", policy(3)).await;
        let claimed = store.claim_next().await.unwrap().unwrap();

        // Reaper fails the attempt while the worker is still busy
        let reaped = record_failure(store.as_ref(), &claimed, "deadline exceeded".into())
            .await
            .unwrap();
        assert_eq!(reaped, AttemptOutcome::Retrying { delay: Duration::ZERO });

        let worker = Worker::new(0, store.clone(), Arc::new(MockExtractor::new()), WorkerConfig::default());
        assert_eq!(worker.process(claimed).await.unwrap(), AttemptOutcome::Discarded);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_pool_drains_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(submit(&store, b"img", policy(0)).await);
        }

        let pool = WorkerPool::new(
            store.clone(),
            Arc::new(MockExtractor::new()),
            WorkerConfig {
                workers: 3,
                poll_interval: Duration::from_millis(10),
                max_idle_backoff: Duration::from_millis(20),
            },
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { pool.run(rx).await });

        for _ in 0..100 {
            let mut done = 0;
            for id in &ids {
                if store.get(*id).await.unwrap().unwrap().state == JobState::Finished {
                    done += 1;
                }
            }
            if done == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("pool should stop")
            .unwrap();

        for id in ids {
            assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Finished);
        }
    }
}
