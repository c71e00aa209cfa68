//! Upload task state machine.

use serde::{Deserialize, Serialize};

/// Upload task state.
///
/// State transitions:
/// - Queued -> Uploading -> Succeeded
/// - Queued -> Uploading -> Queued (retry, back at the tail of the pending list)
/// - Queued -> Uploading -> Failed (fatal error or retries exhausted)
/// - Queued -> Failed (queue timeout, never attempted)
///
/// `Uploading` is never re-entered directly; every retry passes through `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Waiting for a worker slot (or for its retry backoff to elapse).
    Queued,

    /// Held by a worker; an attempt is in progress.
    Uploading,

    /// Destination URL obtained.
    Succeeded,

    /// Gave up.
    Failed,
}

impl UploadState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Succeeded | UploadState::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Queued, Uploading)
                | (Queued, Failed)
                | (Uploading, Queued)
                | (Uploading, Succeeded)
                | (Uploading, Failed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(UploadState::Queued, UploadState::Uploading, true)]
    #[case(UploadState::Queued, UploadState::Failed, true)]
    #[case(UploadState::Uploading, UploadState::Queued, true)]
    #[case(UploadState::Uploading, UploadState::Succeeded, true)]
    #[case(UploadState::Uploading, UploadState::Failed, true)]
    #[case(UploadState::Queued, UploadState::Succeeded, false)]
    #[case(UploadState::Uploading, UploadState::Uploading, false)]
    #[case(UploadState::Succeeded, UploadState::Queued, false)]
    #[case(UploadState::Failed, UploadState::Uploading, false)]
    fn transitions(#[case] from: UploadState, #[case] to: UploadState, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn terminal_states() {
        assert!(UploadState::Succeeded.is_terminal());
        assert!(UploadState::Failed.is_terminal());
        assert!(!UploadState::Queued.is_terminal());
        assert!(!UploadState::Uploading.is_terminal());
    }
}
