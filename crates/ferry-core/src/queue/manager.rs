//! UploadQueue - Task Queue Manager
//!
//! # 構成
//! - 固定サイズの worker（`max_concurrent_uploads` 本）が pending から FIFO で取り出す
//! - reaper が backoff 明けのリトライを pending の末尾に戻し、queue timeout を刈り取る
//! - 状態（pending / scheduled / cache / stats）は `Mutex<QueueState>` の中だけで更新する
//! - ロック中に await しない。イベント送信と結果配送はロック解放後に行う

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use super::{BackoffPolicy, ErrorClassifier, RateLimiter, ResultCache, UploadState, UploadTask};
use crate::config::UploadConfig;
use crate::domain::{AttemptError, ErrorKind, ProgressEvent, UploadError, UploadId};
use crate::observability::QueueStats;
use crate::ports::{ProgressSink, Uploader};

type UploadResult = Result<String, UploadError>;

/// Smallest step past the queue timeout at which a wait counts as exceeded.
const EXPIRY_GRANULARITY: Duration = Duration::from_millis(1);

/// Retry waiting for its backoff to elapse.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    next_run_at: Instant,
    task_id: UploadId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .next_run_at
            .cmp(&self.next_run_at)
            .then_with(|| other.task_id.cmp(&self.task_id))
    }
}

struct TaskEntry {
    task: UploadTask,
    waiters: Vec<oneshot::Sender<UploadResult>>,
}

/// Work handed to a worker.
#[derive(Debug, Clone)]
struct Lease {
    task_id: UploadId,
    source_url: String,
    attempt: u32,
}

/// Side effects collected under the lock and performed after it is released.
#[derive(Default)]
struct Effects {
    events: Vec<ProgressEvent>,
    deliveries: Vec<(oneshot::Sender<UploadResult>, UploadResult)>,
}

impl Effects {
    fn task_event(&mut self, task: &UploadTask, attempt: u32) {
        self.events.push(ProgressEvent::task(
            task.id,
            task.source_url.clone(),
            task.state,
            attempt,
        ));
    }

    fn snapshot(&mut self, stats: QueueStats) {
        self.events.push(ProgressEvent::Snapshot(stats));
    }

    fn resolve(&mut self, entry: &mut TaskEntry) {
        if let Some(outcome) = entry.task.outcome() {
            for tx in entry.waiters.drain(..) {
                self.deliveries.push((tx, outcome.clone()));
            }
        }
    }

    fn flush(self, sink: &dyn ProgressSink) {
        for (tx, outcome) in self.deliveries {
            // The waiter may have given up; nothing to do then.
            let _ = tx.send(outcome);
        }
        for event in self.events {
            sink.emit(event);
        }
    }
}

struct QueueState {
    tasks: HashMap<UploadId, TaskEntry>,
    by_source: HashMap<String, UploadId>,

    /// FIFO of runnable tasks, sorted by `queued_at`.
    pending: VecDeque<UploadId>,

    /// Retries whose backoff has not elapsed.
    scheduled: BinaryHeap<ScheduledTask>,

    cache: ResultCache,
    stats: QueueStats,
    accepting: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            by_source: HashMap::new(),
            pending: VecDeque::new(),
            scheduled: BinaryHeap::new(),
            cache: ResultCache::new(),
            stats: QueueStats::default(),
            accepting: true,
        }
    }

    fn snapshot(&self) -> QueueStats {
        debug_assert!(self.stats.succeeded + self.stats.failed <= self.stats.total);
        QueueStats {
            cached: self.cache.len(),
            cache_hits: self.cache.hits(),
            ..self.stats
        }
    }

    /// Move retries whose backoff elapsed to the tail of the pending list.
    fn promote_due_retries(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while let Some(entry) = self.scheduled.peek() {
            if entry.next_run_at > now {
                break;
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(task_entry) = self.tasks.get_mut(&entry.task_id)
                && task_entry.task.state == UploadState::Queued
            {
                task_entry.task.requeue(now);
                self.pending.push_back(entry.task_id);
                promoted += 1;
            }
        }
        promoted
    }

    /// Fail pending tasks that waited longer than `timeout` for a worker.
    fn expire_overdue(&mut self, now: Instant, timeout: Duration, fx: &mut Effects) {
        while let Some(&task_id) = self.pending.front() {
            let Some(entry) = self.tasks.get_mut(&task_id) else {
                self.pending.pop_front();
                continue;
            };
            let waited = now.saturating_duration_since(entry.task.queued_at);
            if waited <= timeout {
                break;
            }
            self.pending.pop_front();

            warn!(
                task_id = %task_id,
                source_url = %entry.task.source_url,
                waited_ms = waited.as_millis() as u64,
                "upload task timed out in queue"
            );
            entry.task.mark_failed(UploadError::QueueTimeout { waited });
            let attempt = entry.task.attempt;
            fx.task_event(&entry.task, attempt);
            fx.resolve(entry);

            self.stats.queued -= 1;
            self.stats.failed += 1;
            fx.snapshot(self.snapshot());
        }
    }

    /// Earliest instant at which the reaper has something to do.
    fn next_deadline(&self, timeout: Duration) -> Option<Instant> {
        let retry_due = self.scheduled.peek().map(|s| s.next_run_at);
        let timeout_due = self
            .pending
            .front()
            .and_then(|id| self.tasks.get(id))
            .map(|entry| entry.task.queued_at + timeout + EXPIRY_GRANULARITY);
        match (retry_due, timeout_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

struct Shared {
    state: Mutex<QueueState>,

    /// Wakes idle workers when the pending list grows.
    work_available: Notify,

    /// Wakes the reaper when a new deadline appears.
    reaper_wake: Notify,

    uploader: Arc<dyn Uploader>,
    sink: Arc<dyn ProgressSink>,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
    classifier: ErrorClassifier,
    queue_timeout: Duration,
    attempt_timeout: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lease(&self) -> Option<Lease> {
        let now = Instant::now();
        let mut fx = Effects::default();
        let lease = {
            let mut state = self.lock();
            state.promote_due_retries(now);
            state.expire_overdue(now, self.queue_timeout, &mut fx);

            let mut lease = None;
            while let Some(task_id) = state.pending.pop_front() {
                let Some(entry) = state.tasks.get_mut(&task_id) else {
                    continue;
                };
                entry.task.start_attempt();
                let attempt = entry.task.attempt;
                fx.task_event(&entry.task, attempt);
                lease = Some(Lease {
                    task_id,
                    source_url: entry.task.source_url.clone(),
                    attempt,
                });

                state.stats.queued -= 1;
                state.stats.active += 1;
                let snapshot = state.snapshot();
                fx.snapshot(snapshot);
                break;
            }
            lease
        };
        fx.flush(self.sink.as_ref());
        lease
    }

    /// Wait until a task can be handed out.
    async fn next_lease(&self) -> Lease {
        loop {
            let notified = self.work_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_lease() {
                return lease;
            }
            notified.await;
        }
    }

    /// Run one attempt: rate gate, then the upload call under the attempt timeout.
    async fn run_attempt(&self, lease: &Lease) -> Result<String, AttemptError> {
        self.limiter.acquire().await;
        debug!(
            task_id = %lease.task_id,
            source_url = %lease.source_url,
            attempt = lease.attempt + 1,
            max_attempts = self.backoff.max_attempts(),
            "upload attempt"
        );
        // own task: a panicking uploader fails the attempt instead of the worker
        let uploader = Arc::clone(&self.uploader);
        let source_url = lease.source_url.clone();
        let mut call = tokio::spawn(async move { uploader.upload(&source_url).await });

        match tokio::time::timeout(self.attempt_timeout, &mut call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!(
                    task_id = %lease.task_id,
                    source_url = %lease.source_url,
                    error = %join_err,
                    "uploader panicked"
                );
                Err(AttemptError::transport(format!("uploader panicked: {join_err}")))
            }
            Err(_) => {
                call.abort();
                Err(AttemptError::timed_out(self.attempt_timeout))
            }
        }
    }

    /// Fold an attempt's result back into the queue state.
    fn complete(&self, lease: Lease, result: Result<String, AttemptError>) {
        let now = Instant::now();
        let mut fx = Effects::default();
        let mut retry_scheduled = false;
        {
            let mut state = self.lock();
            let QueueState {
                tasks,
                scheduled,
                cache,
                stats,
                ..
            } = &mut *state;
            let Some(entry) = tasks.get_mut(&lease.task_id) else {
                return;
            };
            stats.active -= 1;

            match result {
                Ok(result_url) => {
                    info!(
                        task_id = %lease.task_id,
                        source_url = %lease.source_url,
                        result_url = %result_url,
                        attempts = lease.attempt + 1,
                        "upload succeeded"
                    );
                    cache.insert(lease.source_url.clone(), result_url.clone());
                    entry.task.mark_succeeded(result_url);
                    stats.succeeded += 1;
                }
                Err(cause) => {
                    let attempts = lease.attempt + 1;
                    match self.classifier.classify(&cause) {
                        ErrorKind::Fatal => {
                            error!(
                                task_id = %lease.task_id,
                                source_url = %lease.source_url,
                                error = %cause,
                                "fatal upload error, not retrying"
                            );
                            let err = UploadError::Fatal {
                                attempts,
                                cause: cause.clone(),
                            };
                            entry.task.fail_attempt(err, cause);
                            stats.failed += 1;
                        }
                        ErrorKind::Retryable if self.backoff.allows_retry(attempts) => {
                            let delay = self.backoff.delay(lease.attempt);
                            warn!(
                                task_id = %lease.task_id,
                                source_url = %lease.source_url,
                                attempt = attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = %cause,
                                "upload attempt failed, retry scheduled"
                            );
                            let next_run_at = now + delay;
                            entry.task.schedule_retry(next_run_at, cause);
                            scheduled.push(ScheduledTask {
                                next_run_at,
                                task_id: lease.task_id,
                            });
                            stats.queued += 1;
                            retry_scheduled = true;
                        }
                        ErrorKind::Retryable => {
                            error!(
                                task_id = %lease.task_id,
                                source_url = %lease.source_url,
                                attempts,
                                error = %cause,
                                "upload retries exhausted"
                            );
                            let err = UploadError::RetryExhausted {
                                attempts,
                                cause: cause.clone(),
                            };
                            entry.task.fail_attempt(err, cause);
                            stats.failed += 1;
                        }
                    }
                }
            }

            let attempt = entry.task.attempt;
            fx.task_event(&entry.task, attempt);
            fx.resolve(entry);
            let snapshot = state.snapshot();
            fx.snapshot(snapshot);
        }
        if retry_scheduled {
            self.reaper_wake.notify_one();
        }
        fx.flush(self.sink.as_ref());
    }

    /// Promote due retries and expire overdue tasks; returns the next deadline.
    fn sweep(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut fx = Effects::default();
        let (promoted, next) = {
            let mut state = self.lock();
            let promoted = state.promote_due_retries(now);
            state.expire_overdue(now, self.queue_timeout, &mut fx);
            (promoted, state.next_deadline(self.queue_timeout))
        };
        if promoted > 0 {
            self.work_available.notify_waiters();
        }
        fx.flush(self.sink.as_ref());
        next
    }

    /// Fail everything still unresolved once workers are gone.
    fn abandon_remaining(&self) {
        let mut fx = Effects::default();
        {
            let mut state = self.lock();
            state.accepting = false;
            state.pending.clear();
            state.scheduled.clear();

            let QueueState { tasks, stats, .. } = &mut *state;
            for entry in tasks.values_mut() {
                match entry.task.state {
                    UploadState::Queued => stats.queued -= 1,
                    UploadState::Uploading => stats.active -= 1,
                    UploadState::Succeeded | UploadState::Failed => continue,
                }
                entry.task.mark_failed(UploadError::Shutdown);
                stats.failed += 1;
                let attempt = entry.task.attempt;
                fx.task_event(&entry.task, attempt);
                fx.resolve(entry);
            }
            let snapshot = state.snapshot();
            fx.snapshot(snapshot);
        }
        fx.flush(self.sink.as_ref());
    }
}

/// Pending result of one `submit`.
#[derive(Debug)]
pub struct UploadHandle {
    rx: oneshot::Receiver<UploadResult>,
}

impl UploadHandle {
    /// Wait for the task to reach a terminal state.
    pub async fn wait(self) -> Result<String, UploadError> {
        self.rx.await.unwrap_or(Err(UploadError::Shutdown))
    }
}

/// Task Queue Manager: one instance per document-rewrite call.
///
/// Owns the pending list, the result cache and the counters; drives every
/// task through `Queued -> Uploading -> (Succeeded | Queued | Failed)` with a
/// fixed pool of workers. Must be started inside a tokio runtime.
pub struct UploadQueue {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl UploadQueue {
    /// Spawn `max_concurrent_uploads` workers plus the reaper.
    pub fn start(
        config: &UploadConfig,
        uploader: Arc<dyn Uploader>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::new()),
            work_available: Notify::new(),
            reaper_wake: Notify::new(),
            uploader,
            sink,
            limiter: RateLimiter::new(config.min_request_interval()),
            backoff: BackoffPolicy::from_config(config),
            classifier: ErrorClassifier::new(config.classification.clone()),
            queue_timeout: config.queue_timeout(),
            attempt_timeout: config.attempt_timeout(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = config.max_concurrent_uploads.max(1);
        let mut joins = Vec::with_capacity(workers + 1);
        for worker_id in 0..workers {
            let shared = Arc::clone(&shared);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker_loop(worker_id, shared, rx)));
        }
        joins.push(tokio::spawn(reaper_loop(Arc::clone(&shared), shutdown_rx)));

        debug!(
            workers,
            min_interval_ms = shared.limiter.min_interval().as_millis() as u64,
            "upload queue started"
        );
        Self {
            shared,
            shutdown_tx,
            joins,
        }
    }

    /// Submit a source URL.
    ///
    /// A URL that is cached, in flight or already failed does not start a
    /// second transfer; the handle resolves to the same result.
    pub fn submit(&self, source_url: &str) -> UploadHandle {
        let (tx, rx) = oneshot::channel();
        let mut fx = Effects::default();
        let mut admitted = false;
        {
            let mut state = self.shared.lock();
            if !state.accepting {
                fx.deliveries.push((tx, Err(UploadError::Shutdown)));
            } else if let Some(result_url) = state.cache.lookup(source_url) {
                debug!(source_url, "reusing cached upload");
                fx.deliveries.push((tx, Ok(result_url)));
            } else if let Some(task_id) = state.by_source.get(source_url).copied() {
                if let Some(entry) = state.tasks.get_mut(&task_id) {
                    debug!(source_url, task_id = %task_id, "joining existing upload task");
                    entry.waiters.push(tx);
                    fx.resolve(entry);
                }
            } else {
                let task = UploadTask::new(source_url, Instant::now());
                let task_id = task.id;
                fx.task_event(&task, 0);

                state.by_source.insert(source_url.to_string(), task_id);
                state.tasks.insert(
                    task_id,
                    TaskEntry {
                        task,
                        waiters: vec![tx],
                    },
                );
                state.pending.push_back(task_id);
                state.stats.total += 1;
                state.stats.queued += 1;
                let snapshot = state.snapshot();
                fx.snapshot(snapshot);
                admitted = true;

                info!(
                    task_id = %task_id,
                    source_url,
                    queued = snapshot.queued,
                    "upload task queued"
                );
            }
        }
        if admitted {
            self.shared.work_available.notify_waiters();
            self.shared.reaper_wake.notify_one();
        }
        fx.flush(self.shared.sink.as_ref());
        UploadHandle { rx }
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.lock().snapshot()
    }

    /// Copy of the task record for a source URL, if one was submitted.
    pub fn task_for(&self, source_url: &str) -> Option<UploadTask> {
        let state = self.shared.lock();
        let task_id = state.by_source.get(source_url)?;
        state.tasks.get(task_id).map(|entry| entry.task.clone())
    }

    /// Stop taking work, wait for workers to finish their current attempt and
    /// fail whatever is left with `UploadError::Shutdown`.
    pub async fn shutdown(mut self) -> QueueStats {
        self.shared.lock().accepting = false;
        let _ = self.shutdown_tx.send(true);
        for join in std::mem::take(&mut self.joins) {
            let _ = join.await;
        }
        self.shared.abandon_remaining();
        self.stats()
    }
}

impl Drop for UploadQueue {
    fn drop(&mut self) {
        // ignore send error: workers may already be gone
        let _ = self.shutdown_tx.send(true);
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = shared.next_lease() => lease,
        };

        let result = shared.run_attempt(&lease).await;
        shared.complete(lease, result);
    }
    debug!(worker_id, "upload worker stopped");
}

async fn reaper_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let wake = shared.reaper_wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();

        let next_deadline = shared.sweep();
        let deadline = next_deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut wake => {}
            _ = sleep_until(deadline), if next_deadline.is_some() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use async_trait::async_trait;

    use super::*;
    use crate::ports::NoopProgressSink;

    /// Scripted uploader: per-URL queue of responses, optional latency.
    #[derive(Default)]
    struct ScriptedUploader {
        scripts: Mutex<HashMap<String, VecDeque<Result<String, AttemptError>>>>,
        calls: Mutex<Vec<(String, Instant)>>,
        latency: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedUploader {
        fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::default()
            }
        }

        fn script(&self, url: &str, responses: Vec<Result<String, AttemptError>>) {
            self.scripts
                .lock()
                .unwrap()
                .insert(url.to_string(), responses.into());
        }

        fn calls_for(&self, url: &str) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, _)| u == url)
                .map(|(_, at)| *at)
                .collect()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Uploader for ScriptedUploader {
        async fn upload(&self, source_url: &str) -> Result<String, AttemptError> {
            self.calls
                .lock()
                .unwrap()
                .push((source_url.to_string(), Instant::now()));
            let now_in_flight = self.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            self.max_in_flight
                .fetch_max(now_in_flight, AtomicOrdering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(source_url)
                .and_then(|q| q.pop_front());

            self.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
            scripted.unwrap_or_else(|| Ok(format!("https://cdn.example/{}", source_url.len())))
        }
    }

    fn fast_config() -> UploadConfig {
        UploadConfig {
            min_request_interval_ms: 0,
            ..UploadConfig::default()
        }
    }

    fn start(config: &UploadConfig, uploader: &Arc<ScriptedUploader>) -> UploadQueue {
        UploadQueue::start(config, uploader.clone(), Arc::new(NoopProgressSink))
    }

    #[tokio::test(start_paused = true)]
    async fn five_urls_three_workers_all_succeed() {
        let uploader = Arc::new(ScriptedUploader::with_latency(Duration::from_millis(200)));
        let queue = start(&UploadConfig::default(), &uploader);

        let urls: Vec<String> = (0..5).map(|i| format!("https://img.example/{i}.png")).collect();
        let handles: Vec<_> = urls.iter().map(|u| queue.submit(u)).collect();
        for handle in handles {
            assert!(handle.wait().await.is_ok());
        }

        assert_eq!(uploader.total_calls(), 5);
        assert!(uploader.max_in_flight.load(AtomicOrdering::SeqCst) <= 3);
        let stats = queue.stats();
        assert_eq!(
            (stats.total, stats.succeeded, stats.failed, stats.active, stats.queued),
            (5, 5, 0, 0, 0)
        );
        assert_eq!(stats.cached, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_ceiling() {
        let uploader = Arc::new(ScriptedUploader::with_latency(Duration::from_millis(50)));
        let config = UploadConfig {
            max_concurrent_uploads: 2,
            ..fast_config()
        };
        let queue = start(&config, &uploader);

        let handles: Vec<_> = (0..12)
            .map(|i| queue.submit(&format!("https://img.example/{i}.png")))
            .collect();
        for handle in handles {
            handle.wait().await.unwrap();
        }

        assert_eq!(uploader.max_in_flight.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(uploader.total_calls(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_submissions_share_one_upload() {
        let uploader = Arc::new(ScriptedUploader::with_latency(Duration::from_millis(100)));
        let queue = start(&fast_config(), &uploader);

        let url = "https://img.example/dup.png";
        let first = queue.submit(url);
        let second = queue.submit(url);
        let (a, b) = (first.wait().await, second.wait().await);

        assert_eq!(a, b);
        assert!(a.is_ok());
        assert_eq!(uploader.total_calls(), 1);

        // after completion the cache answers
        let third = queue.submit(url).wait().await;
        assert_eq!(third, a);
        assert_eq!(uploader.total_calls(), 1);
        let stats = queue.stats();
        assert_eq!((stats.total, stats.cache_hits), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_of_failed_url_gets_same_failure() {
        let uploader = Arc::new(ScriptedUploader::default());
        let url = "https://img.example/missing.png";
        uploader.script(url, vec![Err(AttemptError::status(404, "HTTP 404"))]);
        let queue = start(&fast_config(), &uploader);

        let first = queue.submit(url).wait().await;
        let second = queue.submit(url).wait().await;

        assert!(matches!(first, Err(UploadError::Fatal { attempts: 1, .. })));
        assert_eq!(first, second);
        assert_eq!(uploader.total_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let uploader = Arc::new(ScriptedUploader::default());
        let url = "https://img.example/private.png";
        uploader.script(url, vec![Err(AttemptError::status(403, "HTTP 403"))]);
        let queue = start(&fast_config(), &uploader);

        let result = queue.submit(url).wait().await;

        assert!(matches!(result, Err(UploadError::Fatal { .. })));
        assert_eq!(uploader.calls_for(url).len(), 1);
        let task = queue.task_for(url).unwrap();
        assert_eq!(task.state, UploadState::Failed);
        assert_eq!(task.attempt, 1);
        let stats = queue.stats();
        assert_eq!((stats.total, stats.failed), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn two_503s_then_success_backs_off() {
        let uploader = Arc::new(ScriptedUploader::default());
        let url = "https://img.example/flaky.png";
        uploader.script(
            url,
            vec![
                Err(AttemptError::status(503, "busy")),
                Err(AttemptError::status(503, "busy")),
                Ok("https://cdn.example/flaky.png".to_string()),
            ],
        );
        let queue = start(&fast_config(), &uploader);

        let result = queue.submit(url).wait().await;
        assert_eq!(result.as_deref(), Ok("https://cdn.example/flaky.png"));

        let calls = uploader.calls_for(url);
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_millis(1000), "{first_gap:?}");
        assert!(first_gap <= Duration::from_millis(2000), "{first_gap:?}");
        assert!(second_gap >= Duration::from_millis(2000), "{second_gap:?}");
        assert!(second_gap <= Duration::from_millis(3000), "{second_gap:?}");

        let task = queue.task_for(url).unwrap();
        assert_eq!(task.state, UploadState::Succeeded);
        assert_eq!(task.attempt, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_exhausts_after_max_attempts() {
        let uploader = Arc::new(ScriptedUploader::default());
        let url = "https://img.example/down.png";
        uploader.script(
            url,
            (0..10).map(|_| Err(AttemptError::status(500, "boom"))).collect(),
        );
        let queue = start(&fast_config(), &uploader);

        let result = queue.submit(url).wait().await;

        assert!(matches!(
            result,
            Err(UploadError::RetryExhausted { attempts: 4, .. })
        ));
        assert_eq!(uploader.calls_for(url).len(), 4);
        let stats = queue.stats();
        assert_eq!(stats.succeeded + stats.failed, stats.total);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_retries() {
        let uploader = Arc::new(ScriptedUploader::with_latency(Duration::from_secs(60)));
        let config = UploadConfig {
            max_retry_attempts: 1,
            ..fast_config()
        };
        let queue = start(&config, &uploader);

        let result = queue.submit("https://img.example/slow.png").wait().await;

        match result {
            Err(UploadError::RetryExhausted { attempts, cause }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(cause, AttemptError::Transport { timed_out: true, .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn queue_timeout_fails_without_calling_uploader() {
        let uploader = Arc::new(ScriptedUploader::with_latency(Duration::from_secs(20)));
        let config = UploadConfig {
            max_concurrent_uploads: 1,
            queue_timeout_ms: 5_000,
            attempt_timeout_ms: 60_000,
            ..fast_config()
        };
        let queue = start(&config, &uploader);

        let busy = queue.submit("https://img.example/big.png");
        let starved_url = "https://img.example/starved.png";
        let starved = queue.submit(starved_url);

        let t0 = Instant::now();
        let result = starved.wait().await;
        assert!(matches!(result, Err(UploadError::QueueTimeout { .. })));
        assert!(t0.elapsed() < Duration::from_secs(20));
        assert!(uploader.calls_for(starved_url).is_empty());

        assert!(busy.wait().await.is_ok());
        let stats = queue.stats();
        assert_eq!((stats.total, stats.succeeded, stats.failed), (2, 1, 1));
        assert_eq!(queue.task_for(starved_url).unwrap().attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_goes_to_tail_of_pending() {
        let uploader = Arc::new(ScriptedUploader::with_latency(Duration::from_millis(10)));
        let flaky = "https://img.example/flaky.png";
        uploader.script(flaky, vec![Err(AttemptError::status(503, "busy"))]);
        let config = UploadConfig {
            max_concurrent_uploads: 1,
            base_delay_ms: 1,
            max_delay_ms: 1,
            ..fast_config()
        };
        let queue = start(&config, &uploader);

        let mut handles = vec![queue.submit(flaky)];
        for i in 0..3 {
            handles.push(queue.submit(&format!("https://img.example/{i}.png")));
        }
        for handle in handles {
            handle.wait().await.unwrap();
        }

        let order: Vec<String> = uploader
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(u, _)| u.clone())
            .collect();
        assert_eq!(order.first().map(String::as_str), Some(flaky));
        assert_eq!(order.last().map(String::as_str), Some(flaky));
        assert_eq!(order.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_spaced_by_rate_limiter() {
        let uploader = Arc::new(ScriptedUploader::default());
        let queue = start(&UploadConfig::default(), &uploader);

        let handles: Vec<_> = (0..4)
            .map(|i| queue.submit(&format!("https://img.example/{i}.png")))
            .collect();
        for handle in handles {
            handle.wait().await.unwrap();
        }

        let mut starts: Vec<Instant> = uploader
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| *at)
            .collect();
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_fails_unresolved_tasks() {
        let uploader = Arc::new(ScriptedUploader::with_latency(Duration::from_secs(1)));
        let config = UploadConfig {
            max_concurrent_uploads: 1,
            ..fast_config()
        };
        let queue = start(&config, &uploader);

        let first = queue.submit("https://img.example/a.png");
        let second = queue.submit("https://img.example/b.png");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stats = queue.shutdown().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.succeeded + stats.failed, 2);
        assert_eq!((stats.active, stats.queued), (0, 0));

        assert!(first.wait().await.is_ok());
        assert_eq!(second.wait().await, Err(UploadError::Shutdown));
    }

    /// Panics on one URL and succeeds on every other.
    struct PanicsOn(&'static str);

    #[async_trait]
    impl Uploader for PanicsOn {
        async fn upload(&self, source_url: &str) -> Result<String, AttemptError> {
            if source_url == self.0 {
                panic!("decoder bug");
            }
            Ok("https://cdn.example/ok.png".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_uploader_fails_the_task_and_keeps_the_worker() {
        let bad = "https://img.example/bad.png";
        let config = UploadConfig {
            max_concurrent_uploads: 1,
            max_retry_attempts: 1,
            ..fast_config()
        };
        let queue = UploadQueue::start(
            &config,
            Arc::new(PanicsOn(bad)),
            Arc::new(NoopProgressSink),
        );

        let failing = queue.submit(bad);
        let healthy = queue.submit("https://img.example/good.png");

        let result = tokio::time::timeout(Duration::from_secs(30), failing.wait())
            .await
            .expect("handle resolves");
        match result {
            Err(UploadError::RetryExhausted { attempts, cause }) => {
                assert_eq!(attempts, 2);
                assert!(cause.message().contains("panicked"), "{cause}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(healthy.wait().await.as_deref(), Ok("https://cdn.example/ok.png"));

        let stats = queue.shutdown().await;
        assert_eq!((stats.succeeded, stats.failed, stats.active), (1, 1, 0));
    }

    #[test]
    fn queue_timeout_expires_only_after_strictly_longer_wait() {
        let base = Instant::now();
        let timeout = Duration::from_secs(5);
        let mut state = QueueState::new();
        let task = UploadTask::new("https://img.example/a.png", base);
        let task_id = task.id;
        state.tasks.insert(
            task_id,
            TaskEntry {
                task,
                waiters: Vec::new(),
            },
        );
        state.pending.push_back(task_id);
        state.stats.total = 1;
        state.stats.queued = 1;

        let mut fx = Effects::default();
        state.expire_overdue(base + timeout, timeout, &mut fx);
        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.tasks[&task_id].task.state, UploadState::Queued);
        assert!(state.next_deadline(timeout).unwrap() > base + timeout);

        state.expire_overdue(base + timeout + EXPIRY_GRANULARITY, timeout, &mut fx);
        assert!(state.pending.is_empty());
        assert_eq!(state.tasks[&task_id].task.state, UploadState::Failed);
        assert_eq!((state.stats.queued, state.stats.failed), (0, 1));
    }

    #[test]
    fn scheduled_heap_pops_earliest_first() {
        let base = Instant::now();
        let mut heap = BinaryHeap::new();
        for secs in [5, 1, 3] {
            heap.push(ScheduledTask {
                next_run_at: base + Duration::from_secs(secs),
                task_id: UploadId::generate(),
            });
        }
        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|s| (s.next_run_at - base).as_secs())
            .collect();
        assert_eq!(order, vec![1, 3, 5]);
    }
}
