//! Errors - アップロード失敗の分類
//!
//! 2 段構成:
//! - `AttemptError`: Upload Client 1 回分の失敗（Classifier の入力）
//! - `UploadError`: タスクとしての最終失敗（Rewriter に届くもの）

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classifier の判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retrying cannot plausibly succeed (bad auth, resource gone).
    Fatal,
    /// Plausibly transient (rate limiting, overload, network blip).
    Retryable,
}

/// Failure of a single upload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// No response at all (connect failure, reset, attempt timeout).
    #[error("transport error: {message}")]
    Transport { message: String, timed_out: bool },

    /// A response arrived but was not a success payload.
    #[error("protocol error (status={status:?}, code={code:?}): {message}")]
    Protocol {
        status: Option<u16>,
        code: Option<i64>,
        message: String,
    },
}

impl AttemptError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::Transport {
            message: format!("attempt timed out after {}ms", after.as_millis()),
            timed_out: true,
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            status: Some(status),
            code: None,
            message: message.into(),
        }
    }

    pub fn upstream(status: Option<u16>, code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            status,
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Transport { .. } => None,
            Self::Protocol { status, .. } => *status,
        }
    }

    pub fn upstream_code(&self) -> Option<i64> {
        match self {
            Self::Transport { .. } => None,
            Self::Protocol { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message, .. } | Self::Protocol { message, .. } => message,
        }
    }
}

/// Terminal failure of an upload task.
///
/// Clone できるようにしているのは、重複 submit した全員に同じ結果を配るため。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("fatal upload error after {attempts} attempt(s): {cause}")]
    Fatal {
        attempts: u32,
        #[source]
        cause: AttemptError,
    },

    #[error("retries exhausted after {attempts} attempt(s): {cause}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        cause: AttemptError,
    },

    #[error("waited {}ms in queue without a free worker", .waited.as_millis())]
    QueueTimeout { waited: Duration },

    #[error("upload queue shut down before the task resolved")]
    Shutdown,
}

impl UploadError {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Fatal { .. } => FailureReason::Fatal,
            Self::RetryExhausted { .. } => FailureReason::RetryExhausted,
            Self::QueueTimeout { .. } => FailureReason::QueueTimeout,
            Self::Shutdown => FailureReason::Shutdown,
        }
    }
}

/// Why a task ended `Failed`; kept in the manifest for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Fatal,
    RetryExhausted,
    QueueTimeout,
    Shutdown,
}
