//! Upload task record: the single source of truth for one submission.

use tokio::time::Instant;

use super::UploadState;
use crate::domain::{AttemptError, UploadError, UploadId};

/// One upload attempt sequence for a source URL.
///
/// Design:
/// - Queue structures (pending/scheduled) hold `UploadId` only.
/// - All state transitions happen here, under the manager's lock.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: UploadId,
    pub source_url: String,
    pub state: UploadState,

    /// Attempts made so far (0-based index of the next attempt).
    pub attempt: u32,

    pub submitted_at: Instant,

    /// When the task last entered the pending list (submission or retry).
    pub queued_at: Instant,

    /// Earliest start for a retry whose backoff has not elapsed yet.
    pub next_run_at: Option<Instant>,

    /// Present only when `Succeeded`.
    pub result_url: Option<String>,

    /// Present only when `Failed`.
    pub last_error: Option<UploadError>,

    /// Most recent attempt failure, kept across retries.
    pub last_attempt_error: Option<AttemptError>,
}

impl UploadTask {
    pub fn new(source_url: impl Into<String>, now: Instant) -> Self {
        Self {
            id: UploadId::generate(),
            source_url: source_url.into(),
            state: UploadState::Queued,
            attempt: 0,
            submitted_at: now,
            queued_at: now,
            next_run_at: None,
            result_url: None,
            last_error: None,
            last_attempt_error: None,
        }
    }

    fn transition(&mut self, next: UploadState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?} for {}",
            self.state,
            next,
            self.id
        );
        self.state = next;
    }

    /// Queued -> Uploading.
    pub fn start_attempt(&mut self) {
        self.transition(UploadState::Uploading);
        self.next_run_at = None;
    }

    /// Uploading -> Succeeded.
    pub fn mark_succeeded(&mut self, result_url: String) {
        self.transition(UploadState::Succeeded);
        self.attempt += 1;
        self.result_url = Some(result_url);
    }

    /// Uploading -> Queued, eligible again at `next_run_at`.
    pub fn schedule_retry(&mut self, next_run_at: Instant, cause: AttemptError) {
        self.transition(UploadState::Queued);
        self.attempt += 1;
        self.next_run_at = Some(next_run_at);
        self.last_attempt_error = Some(cause);
    }

    /// Backoff elapsed: back on the pending list as of `now`.
    pub fn requeue(&mut self, now: Instant) {
        debug_assert_eq!(self.state, UploadState::Queued);
        self.queued_at = now;
        self.next_run_at = None;
    }

    /// Uploading -> Failed, counting the attempt that just ended.
    pub fn fail_attempt(&mut self, error: UploadError, cause: AttemptError) {
        self.attempt += 1;
        self.last_attempt_error = Some(cause);
        self.mark_failed(error);
    }

    /// Any non-terminal state -> Failed.
    pub fn mark_failed(&mut self, error: UploadError) {
        self.transition(UploadState::Failed);
        self.next_run_at = None;
        self.last_error = Some(error);
    }

    /// The outcome delivered to waiters once the task is terminal.
    pub fn outcome(&self) -> Option<Result<String, UploadError>> {
        match self.state {
            UploadState::Succeeded => self.result_url.clone().map(Ok),
            UploadState::Failed => self.last_error.clone().map(Err),
            UploadState::Queued | UploadState::Uploading => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retry_passes_back_through_queued() {
        let now = Instant::now();
        let mut task = UploadTask::new("https://a.example/1.png", now);
        task.start_attempt();
        assert_eq!(task.state, UploadState::Uploading);

        let later = now + Duration::from_secs(3);
        task.schedule_retry(later, AttemptError::status(503, "busy"));
        assert_eq!(task.state, UploadState::Queued);
        assert_eq!(task.attempt, 1);
        assert_eq!(task.next_run_at, Some(later));
        assert!(task.outcome().is_none());

        task.requeue(later);
        assert_eq!(task.queued_at, later);
        assert!(task.next_run_at.is_none());

        task.start_attempt();
        task.mark_succeeded("https://cdn.example/1.png".to_string());
        assert_eq!(task.attempt, 2);
        assert_eq!(task.outcome(), Some(Ok("https://cdn.example/1.png".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn queue_timeout_fails_without_attempt() {
        let now = Instant::now();
        let mut task = UploadTask::new("https://a.example/1.png", now);
        let err = UploadError::QueueTimeout {
            waited: Duration::from_secs(120),
        };
        task.mark_failed(err.clone());

        assert_eq!(task.attempt, 0);
        assert_eq!(task.outcome(), Some(Err(err)));
        assert!(task.result_url.is_none());
    }
}
