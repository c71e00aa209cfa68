//! Events - 進捗通知
//!
//! ProgressSink に流すイベント。配送はベストエフォートで、
//! コアの正しさはイベントが消費されたかどうかに依存しない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UploadId;
use crate::observability::QueueStats;
use crate::queue::UploadState;

/// Per-task state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: UploadId,
    pub source_url: String,
    pub state: UploadState,

    /// Attempts completed when the event was emitted.
    pub attempt: u32,

    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Task(TaskEvent),
    Snapshot(QueueStats),
}

impl ProgressEvent {
    pub fn task(
        task_id: UploadId,
        source_url: impl Into<String>,
        state: UploadState,
        attempt: u32,
    ) -> Self {
        Self::Task(TaskEvent {
            task_id,
            source_url: source_url.into(),
            state,
            attempt,
            at: Utc::now(),
        })
    }
}
