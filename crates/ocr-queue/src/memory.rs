//! In-memory job store with eligibility-ordered scheduling

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tokio::sync::RwLock;

use crate::backend::{JobStore, StoreError};
use crate::job::{Expected, JobEntry, JobId, JobState, Transition};

/// Heap entry - orders by eligibility time, then enqueue sequence (FIFO)
#[derive(Debug, Clone, Eq, PartialEq)]
struct PendingEntry {
    eligible_at: DateTime<Utc>,
    seq: u64,
    id: JobId,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap
        other
            .eligible_at
            .cmp(&self.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, JobEntry>,
    pending: BinaryHeap<PendingEntry>,
    seq: u64,
}

impl Inner {
    fn push_pending(&mut self, id: JobId, eligible_at: DateTime<Utc>) {
        self.seq += 1;
        self.pending.push(PendingEntry {
            eligible_at,
            seq: self.seq,
            id,
        });
    }
}

/// Process-local store. Records and the pending heap sit behind one lock so
/// every primitive is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn enqueue(&self, job: JobEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }

        let (id, eligible_at) = (job.id, job.eligible_at);
        inner.jobs.insert(id, job);
        inner.push_pending(id, eligible_at);
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<JobEntry>, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        while let Some(head) = inner.pending.peek() {
            if head.eligible_at > now {
                return Ok(None);
            }
            let Some(entry) = inner.pending.pop() else {
                break;
            };

            // Entries can outlive their record (expired) or its queued state
            if let Some(job) = inner.jobs.get_mut(&entry.id) {
                if job.state == JobState::Queued && job.eligible_at == entry.eligible_at {
                    job.start(now)?;
                    return Ok(Some(job.clone()));
                }
            }
        }

        Ok(None)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobEntry>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn compare_and_swap(
        &self,
        id: JobId,
        expected: Expected,
        transition: Transition,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !job.matches(expected) {
            return Ok(false);
        }

        job.apply(transition, Utc::now())?;

        if job.state == JobState::Queued {
            let eligible_at = job.eligible_at;
            tracing::debug!(
                job_id = %id,
                attempt = job.attempt,
                eligible_at = %eligible_at,
                "Re-queuing job with backoff"
            );
            inner.push_pending(id, eligible_at);
        }

        Ok(true)
    }

    async fn started(&self) -> Result<Vec<JobEntry>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|job| job.state == JobState::Started)
            .cloned()
            .collect())
    }

    async fn expire(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| !job.is_expired(now));
        Ok(before - inner.jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractionResult, PageText};
    use crate::job::{Document, JobPolicy};
    use std::time::Duration;

    fn job() -> JobEntry {
        JobEntry::new(Document::new(b"image".to_vec()), JobPolicy::default())
    }

    fn finished() -> Transition {
        Transition::Finish(ExtractionResult::from_pages(vec![PageText::new(1, "ok")]).unwrap())
    }

    #[tokio::test]
    async fn test_enqueue_claim() {
        let store = MemoryStore::new();
        let entry = job();
        let id = entry.id;
        store.enqueue(entry).await.unwrap();

        let queued = store.get(id).await.unwrap().expect("Should have job");
        assert_eq!(queued.state, JobState::Queued);
        assert_eq!(queued.attempt, 0);

        let claimed = store.claim_next().await.unwrap().expect("Should claim job");
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.state, JobState::Started);
        assert_eq!(claimed.attempt, 1);
        assert!(claimed.started_at.is_some());

        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_rejected() {
        let store = MemoryStore::new();
        let entry = job();
        store.enqueue(entry.clone()).await.unwrap();
        assert!(matches!(
            store.enqueue(entry).await,
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_fifo_for_same_eligibility() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut entry = job();
            entry.eligible_at = now;
            ids.push(entry.id);
            store.enqueue(entry).await.unwrap();
        }

        for id in ids {
            assert_eq!(store.claim_next().await.unwrap().unwrap().id, id);
        }
    }

    #[tokio::test]
    async fn test_delayed_job_not_claimable_early() {
        let store = MemoryStore::new();
        let mut entry = job();
        entry.eligible_at = Utc::now() + chrono::Duration::milliseconds(200);
        let id = entry.id;
        store.enqueue(entry).await.unwrap();

        assert!(store.claim_next().await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.claim_next().await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_attempt() {
        let store = MemoryStore::new();
        let entry = job();
        let id = entry.id;
        store.enqueue(entry).await.unwrap();
        let claimed = store.claim_next().await.unwrap().unwrap();

        // First finalizer wins
        let swapped = store
            .compare_and_swap(id, Expected::started(claimed.attempt), Transition::Fail("timeout".into()))
            .await
            .unwrap();
        assert!(swapped);

        // Late success is discarded
        let swapped = store
            .compare_and_swap(id, Expected::started(claimed.attempt), finished())
            .await
            .unwrap();
        assert!(!swapped);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_retry_requeues_with_eligibility() {
        let store = MemoryStore::new();
        let entry = job();
        let id = entry.id;
        store.enqueue(entry).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        let eligible_at = Utc::now() + chrono::Duration::milliseconds(150);
        let swapped = store
            .compare_and_swap(
                id,
                Expected::started(1),
                Transition::Retry {
                    error: "flaky".into(),
                    eligible_at,
                },
            )
            .await
            .unwrap();
        assert!(swapped);
        assert!(store.claim_next().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let again = store.claim_next().await.unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn test_retry_entries_queue_behind_fresh_jobs() {
        let store = MemoryStore::new();
        let first = job();
        let first_id = first.id;
        store.enqueue(first).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        let fresh = job();
        let fresh_id = fresh.id;
        store.enqueue(fresh).await.unwrap();

        store
            .compare_and_swap(
                first_id,
                Expected::started(1),
                Transition::Retry {
                    error: "flaky".into(),
                    eligible_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        assert_eq!(store.claim_next().await.unwrap().unwrap().id, fresh_id);
        assert_eq!(store.claim_next().await.unwrap().unwrap().id, first_id);
    }

    #[tokio::test]
    async fn test_expire_removes_only_terminal_records() {
        let store = MemoryStore::new();
        let policy = JobPolicy {
            result_ttl: Duration::from_secs(1),
            ..Default::default()
        };
        let done = JobEntry::new(Document::new(vec![1]), policy.clone());
        let done_id = done.id;
        let waiting = JobEntry::new(Document::new(vec![2]), policy);
        let waiting_id = waiting.id;

        store.enqueue(done).await.unwrap();
        store.claim_next().await.unwrap().unwrap();
        store
            .compare_and_swap(done_id, Expected::started(1), finished())
            .await
            .unwrap();
        store.enqueue(waiting).await.unwrap();

        let removed = store
            .expire(Utc::now() + chrono::Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(done_id).await.unwrap().is_none());
        assert!(store.get(waiting_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_store_returns_none() {
        let store = MemoryStore::new();
        assert!(store.claim_next().await.unwrap().is_none());
        assert!(store.is_empty().await);
    }
}
