//! Job definitions and lifecycle state machine

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::extractor::ExtractionResult;

/// Job Identifier
pub type JobId = Uuid;

/// Stored lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the pending order for a worker
    Queued,
    /// Claimed by exactly one worker
    Started,
    /// Extraction succeeded (terminal)
    Finished,
    /// Attempts exhausted (terminal)
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Edges of the lifecycle graph. Everything else is rejected.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Started)
                | (Self::Started, Self::Finished)
                | (Self::Started, Self::Queued)
                | (Self::Started, Self::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "started" => Ok(Self::Started),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// Client-facing status. `NotFound` is a query-time projection and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    NotFound,
}

impl From<JobState> for JobStatus {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => Self::Queued,
            JobState::Started => Self::Started,
            JobState::Finished => Self::Finished,
            JobState::Failed => Self::Failed,
        }
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::NotFound => "not_found",
        }
    }
}

/// Kind of document carried by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Single raster image
    Image,
    /// Multi-page PDF
    Pdf,
}

impl DocumentKind {
    const PDF_MAGIC: &'static [u8] = b"%PDF";

    /// Sniff the kind from the leading bytes
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(Self::PDF_MAGIC) {
            Self::Pdf
        } else {
            Self::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf => "pdf",
        }
    }
}

impl std::str::FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!("unknown document kind: {}", other)),
        }
    }
}

/// Opaque job input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            kind: DocumentKind::detect(&bytes),
            bytes,
        }
    }
}

/// Per-job execution policy, copied onto the record at submission time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPolicy {
    /// Retries allowed after the first attempt (3 ⇒ 4 attempts total)
    pub max_attempts: u32,
    /// Waits between attempts; the last value repeats
    pub backoff_schedule: Vec<Duration>,
    /// Wall-clock bound on a single attempt
    pub timeout: Duration,
    /// Retention of finished records
    pub result_ttl: Duration,
    /// Retention of failed records
    pub failure_ttl: Duration,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_schedule: vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(60),
            ],
            timeout: Duration::from_secs(1000),
            result_ttl: Duration::from_secs(86_400),
            failure_ttl: Duration::from_secs(365 * 86_400),
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Re-enter the queue once `delay` has elapsed
    Retry(Duration),
    /// No attempts left
    Exhausted,
}

impl JobPolicy {
    /// Backoff before the attempt following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff_schedule.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff_schedule.len() - 1);
        self.backoff_schedule[idx]
    }

    pub fn on_failure(&self, attempt: u32) -> FailureAction {
        if attempt <= self.max_attempts {
            FailureAction::Retry(self.delay_for(attempt))
        } else {
            FailureAction::Exhausted
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_attempts + 1
    }
}

/// Guard for a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub state: JobState,
    pub attempt: u32,
}

impl Expected {
    /// Matches the attempt a worker (or the reaper) currently observes as running
    pub fn started(attempt: u32) -> Self {
        Self {
            state: JobState::Started,
            attempt,
        }
    }
}

/// Finalization of a started attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Finish(ExtractionResult),
    Retry {
        error: String,
        eligible_at: DateTime<Utc>,
    },
    Fail(String),
}

impl Transition {
    pub fn target(&self) -> JobState {
        match self {
            Self::Finish(_) => JobState::Finished,
            Self::Retry { .. } => JobState::Queued,
            Self::Fail(_) => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// A persisted job record
#[derive(Debug, Clone)]
pub struct JobEntry {
    pub id: JobId,
    pub document: Document,
    pub state: JobState,
    pub attempt: u32,
    pub policy: JobPolicy,
    pub result: Option<ExtractionResult>,
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub eligible_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobEntry {
    /// New queued job, eligible immediately
    pub fn new(document: Document, policy: JobPolicy) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document,
            state: JobState::Queued,
            attempt: 0,
            policy,
            result: None,
            error: None,
            enqueued_at: now,
            eligible_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Queued → Started, consuming one attempt
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(JobState::Started)?;
        self.state = JobState::Started;
        self.attempt += 1;
        self.started_at = Some(now);
        Ok(())
    }

    /// Apply a finalization of the current attempt
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.check(transition.target())?;
        match transition {
            Transition::Finish(result) => {
                self.state = JobState::Finished;
                self.result = Some(result);
                self.error = None;
                self.finished_at = Some(now);
            }
            Transition::Retry { error, eligible_at } => {
                self.state = JobState::Queued;
                self.error = Some(error);
                self.eligible_at = eligible_at;
            }
            Transition::Fail(error) => {
                self.state = JobState::Failed;
                self.error = Some(error);
                self.finished_at = Some(now);
            }
        }
        Ok(())
    }

    fn check(&self, to: JobState) -> Result<(), TransitionError> {
        if self.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.state,
                to,
            })
        }
    }

    pub fn matches(&self, expected: Expected) -> bool {
        self.state == expected.state && self.attempt == expected.attempt
    }

    /// Retention window that applies to the current state, if terminal
    pub fn ttl(&self) -> Option<Duration> {
        match self.state {
            JobState::Finished => Some(self.policy.result_ttl),
            JobState::Failed => Some(self.policy.failure_ttl),
            _ => None,
        }
    }

    /// Terminal and past its retention window
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.ttl(), self.finished_at) {
            (Some(ttl), Some(finished_at)) => deadline(finished_at, ttl).is_some_and(|at| at <= now),
            _ => false,
        }
    }

    /// Started and past `timeout + grace` without finalizing
    pub fn is_overdue(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        match (self.state, self.started_at) {
            (JobState::Started, Some(started_at)) => {
                deadline(started_at, self.policy.timeout.saturating_add(grace)).is_some_and(|at| at <= now)
            }
            _ => false,
        }
    }
}

/// std → chrono duration, saturating instead of failing on huge values
pub fn to_chrono(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::MAX)
}

/// `at + d`, or `None` past the representable range
pub fn deadline(at: DateTime<Utc>, d: Duration) -> Option<DateTime<Utc>> {
    at.checked_add_signed(to_chrono(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PageText;

    fn result() -> ExtractionResult {
        ExtractionResult::from_pages(vec![PageText::new(1, "hello")]).unwrap()
    }

    #[test]
    fn test_detect_document_kind() {
        assert_eq!(DocumentKind::detect(b"%PDF-1.7\n..."), DocumentKind::Pdf);
        assert_eq!(DocumentKind::detect(b"\x89PNG\r\n"), DocumentKind::Image);
        assert_eq!(DocumentKind::detect(b""), DocumentKind::Image);
    }

    #[test]
    fn test_backoff_schedule_repeats_last_value() {
        let policy = JobPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(30));
        assert_eq!(policy.delay_for(3), Duration::from_secs(60));
        assert_eq!(policy.delay_for(7), Duration::from_secs(60));
    }

    #[test]
    fn test_empty_backoff_schedule_means_no_delay() {
        let policy = JobPolicy {
            backoff_schedule: vec![],
            ..Default::default()
        };
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_failure_action_boundary() {
        let policy = JobPolicy::default();
        assert_eq!(policy.total_attempts(), 4);
        assert!(matches!(policy.on_failure(3), FailureAction::Retry(_)));
        assert_eq!(policy.on_failure(4), FailureAction::Exhausted);
    }

    #[test]
    fn test_lifecycle_success() {
        let mut job = JobEntry::new(Document::new(b"img".to_vec()), JobPolicy::default());
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempt, 0);

        job.start(Utc::now()).unwrap();
        assert_eq!(job.state, JobState::Started);
        assert_eq!(job.attempt, 1);
        assert!(job.result.is_none());

        job.apply(Transition::Finish(result()), Utc::now()).unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert!(job.result.is_some());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_never_regress() {
        let mut job = JobEntry::new(Document::new(vec![]), JobPolicy::default());
        job.start(Utc::now()).unwrap();
        job.apply(Transition::Fail("boom".into()), Utc::now()).unwrap();

        let err = job.start(Utc::now()).unwrap_err();
        assert_eq!(err.from, JobState::Failed);
        assert!(job.apply(Transition::Finish(result()), Utc::now()).is_err());
        assert!(job.result.is_none());
    }

    #[test]
    fn test_cannot_finalize_queued_job() {
        let mut job = JobEntry::new(Document::new(vec![]), JobPolicy::default());
        assert!(job.apply(Transition::Finish(result()), Utc::now()).is_err());
        assert_eq!(job.state, JobState::Queued);
    }

    #[test]
    fn test_retry_keeps_attempt_and_sets_eligibility() {
        let mut job = JobEntry::new(Document::new(vec![]), JobPolicy::default());
        job.start(Utc::now()).unwrap();
        let eligible_at = Utc::now() + ChronoDuration::seconds(10);
        job.apply(
            Transition::Retry {
                error: "flaky".into(),
                eligible_at,
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.eligible_at, eligible_at);
        assert_eq!(job.error.as_deref(), Some("flaky"));
    }

    #[test]
    fn test_expiry_uses_state_specific_ttl() {
        let policy = JobPolicy {
            result_ttl: Duration::from_secs(10),
            failure_ttl: Duration::from_secs(100),
            ..Default::default()
        };
        let now = Utc::now();

        let mut finished = JobEntry::new(Document::new(vec![]), policy.clone());
        finished.start(now).unwrap();
        finished.apply(Transition::Finish(result()), now).unwrap();
        assert!(!finished.is_expired(now + ChronoDuration::seconds(5)));
        assert!(finished.is_expired(now + ChronoDuration::seconds(10)));

        let mut failed = JobEntry::new(Document::new(vec![]), policy);
        failed.start(now).unwrap();
        failed.apply(Transition::Fail("x".into()), now).unwrap();
        assert!(!failed.is_expired(now + ChronoDuration::seconds(50)));
        assert!(failed.is_expired(now + ChronoDuration::seconds(100)));
    }

    #[test]
    fn test_overdue_only_when_started() {
        let policy = JobPolicy {
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let now = Utc::now();
        let mut job = JobEntry::new(Document::new(vec![]), policy);
        assert!(!job.is_overdue(now + ChronoDuration::seconds(60), Duration::ZERO));

        job.start(now).unwrap();
        assert!(!job.is_overdue(now + ChronoDuration::seconds(4), Duration::ZERO));
        assert!(job.is_overdue(now + ChronoDuration::seconds(5), Duration::ZERO));
        assert!(!job.is_overdue(now + ChronoDuration::seconds(5), Duration::from_secs(1)));
    }

    #[test]
    fn test_status_projection_strings() {
        assert_eq!(JobStatus::from(JobState::Started).as_str(), "started");
        assert_eq!(JobStatus::NotFound.as_str(), "not_found");
        assert_eq!(
            serde_json::to_string(&JobStatus::NotFound).unwrap(),
            "\"not_found\""
        );
        assert_eq!("finished".parse::<JobState>().unwrap(), JobState::Finished);
    }
}
