//! ProgressSink の実装
//!
//! - `TracingProgressSink`: ログに流すだけ（CLI 用）
//! - `ChannelProgressSink`: bounded channel に流す（UI 用）。満杯なら捨てる

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::ProgressEvent;
use crate::ports::ProgressSink;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Task(task) => debug!(
                task_id = %task.task_id,
                source_url = %task.source_url,
                state = ?task.state,
                attempt = task.attempt,
                "upload task transition"
            ),
            ProgressEvent::Snapshot(stats) => info!(
                total = stats.total,
                succeeded = stats.succeeded,
                failed = stats.failed,
                active = stats.active,
                queued = stats.queued,
                cached = stats.cached,
                cache_hits = stats.cache_hits,
                "upload progress"
            ),
        }
    }
}

/// Forwards events to a bounded channel without blocking the queue.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::trace!(error = %e, "progress event dropped");
        }
    }
}
