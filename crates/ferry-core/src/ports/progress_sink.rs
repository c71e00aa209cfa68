//! ProgressSink port - 進捗の通知先
//!
//! UI（進捗ダイアログなど）は外部コラボレータ。コアはイベントを投げるだけ。

use crate::domain::ProgressEvent;

/// Receives task transitions and aggregate snapshots.
///
/// `emit` is called outside the manager's lock and must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}
