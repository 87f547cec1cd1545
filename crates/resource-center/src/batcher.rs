//! Debounced coalescing of eligible asynchronous calls
//!
//! One shared flush timer serves every batch key. The timer is armed when
//! the queue goes from empty to non-empty; calls arriving while it is armed
//! join the pending flush. Flushes are serialized, so at most one flush
//! cycle is ever in flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use mobisync_core_types::OperationId;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::errors::BatchError;
use crate::policy::BatchingOptions;

pub type BatchFuture = BoxFuture<'static, Result<Value, BatchError>>;

/// Executes one call with its own arguments
pub type BatchExecutor = Arc<dyn Fn(Value) -> BatchFuture + Send + Sync>;

/// Specialized path executing every call of one batch key in a single round trip.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Return exactly one result per call, in call order
    async fn execute_batch(&self, calls: Vec<Value>) -> Result<Vec<Value>, BatchError>;
}

/// Wrap an async closure as a [`BatchExecutor`]
pub fn executor<F, Fut>(f: F) -> BatchExecutor
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, BatchError>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// Batch key: operation name plus primary argument
pub fn batch_key(operation: &str, args: &Value) -> String {
    let primary = match args {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    let primary = match primary {
        Value::String(text) => text,
        other => other.to_string(),
    };
    format!("{operation}:{primary}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPhase {
    Idle,
    Armed,
    Firing,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchPhase::Idle => "idle",
            BatchPhase::Armed => "armed",
            BatchPhase::Firing => "firing",
        };
        f.write_str(name)
    }
}

struct PendingCall {
    id: OperationId,
    operation: String,
    args: Value,
    executor: BatchExecutor,
    completion: oneshot::Sender<Result<Value, BatchError>>,
    enqueued_at: Instant,
}

impl PendingCall {
    fn settle(self, result: Result<Value, BatchError>) {
        // the caller may have stopped waiting
        let _ = self.completion.send(result);
    }
}

struct BatchState {
    queue: HashMap<String, Vec<PendingCall>>,
    pending: usize,
    phase: BatchPhase,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl BatchState {
    fn new() -> Self {
        Self {
            queue: HashMap::new(),
            pending: 0,
            phase: BatchPhase::Idle,
            timer: None,
            generation: 0,
        }
    }

    fn cancel_timer(&mut self) -> bool {
        self.generation += 1;
        match self.timer.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct BatchCounters {
    submitted: AtomicU64,
    bypassed: AtomicU64,
    flushes: AtomicU64,
    coalesced: AtomicU64,
    specialized_calls: AtomicU64,
    failures: AtomicU64,
    resets: AtomicU64,
}

impl BatchCounters {
    fn zero(&self) {
        for counter in [
            &self.submitted,
            &self.bypassed,
            &self.flushes,
            &self.coalesced,
            &self.specialized_calls,
            &self.failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Calls routed through the queue
    pub submitted: u64,
    /// Calls executed immediately because batching did not apply
    pub bypassed: u64,
    pub flushes: u64,
    /// Calls that shared their key with at least one other call in a flush
    pub coalesced: u64,
    /// Invocations of a specialized batch handler
    pub specialized_calls: u64,
    pub failures: u64,
    /// Resets since construction; not zeroed by a reset
    pub resets: u64,
}

/// Outcome of [`OperationBatcher::reset`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchReset {
    pub rejected: usize,
    pub timer_cancelled: bool,
}

struct BatcherInner {
    options: BatchingOptions,
    state: Mutex<BatchState>,
    handlers: DashMap<String, Arc<dyn BatchHandler>>,
    flush_lock: tokio::sync::Mutex<()>,
    counters: BatchCounters,
}

#[derive(Clone)]
pub struct OperationBatcher {
    inner: Arc<BatcherInner>,
}

impl OperationBatcher {
    pub fn new(options: BatchingOptions) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                options,
                state: Mutex::new(BatchState::new()),
                handlers: DashMap::new(),
                flush_lock: tokio::sync::Mutex::new(()),
                counters: BatchCounters::default(),
            }),
        }
    }

    pub fn options(&self) -> &BatchingOptions {
        &self.inner.options
    }

    /// Install the batch-capable path for one operation name
    pub fn register_batch_handler(&self, operation: impl Into<String>, handler: Arc<dyn BatchHandler>) {
        let operation = operation.into();
        debug!(operation = %operation, "Registered batch handler");
        self.inner.handlers.insert(operation, handler);
    }

    pub fn phase(&self) -> BatchPhase {
        self.inner.state.lock().phase
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending
    }

    /// Execute `executor(args)`, coalesced with same-key calls when batching applies
    pub async fn submit(
        &self,
        operation: &str,
        args: Value,
        executor: BatchExecutor,
    ) -> Result<Value, BatchError> {
        if !self.inner.options.covers(operation) {
            self.inner.counters.bypassed.fetch_add(1, Ordering::Relaxed);
            return executor(args).await;
        }
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let key = batch_key(operation, &args);
        let (completion, receiver) = oneshot::channel();
        let call = PendingCall {
            id: OperationId::new(),
            operation: operation.to_string(),
            args,
            executor,
            completion,
            enqueued_at: Instant::now(),
        };
        self.inner.enqueue(key, call);

        receiver
            .await
            .unwrap_or_else(|_| Err(BatchError::Cancelled(format!("{operation} was dropped by its flush"))))
    }

    /// Flush whatever is queued now, without waiting for the timer
    pub async fn flush_now(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            state.cancel_timer();
            state.generation
        };
        self.inner.flush(generation).await;
    }

    /// Reject every queued call with [`BatchError::Reset`] and return how many were rejected
    pub fn reset(&self) -> usize {
        self.reset_with_report().rejected
    }

    pub fn reset_with_report(&self) -> BatchReset {
        let (drained, timer_cancelled) = {
            let mut state = self.inner.state.lock();
            let timer_cancelled = state.cancel_timer();
            state.pending = 0;
            state.phase = BatchPhase::Idle;
            (std::mem::take(&mut state.queue), timer_cancelled)
        };

        let mut rejected = 0;
        for call in drained.into_values().flatten() {
            rejected += 1;
            call.settle(Err(BatchError::Reset));
        }
        self.inner.counters.zero();
        self.inner.counters.resets.fetch_add(1, Ordering::Relaxed);
        info!(rejected, timer_cancelled, "Operation batcher reset");
        BatchReset {
            rejected,
            timer_cancelled,
        }
    }

    pub fn stats(&self) -> BatchStats {
        let counters = &self.inner.counters;
        BatchStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            bypassed: counters.bypassed.load(Ordering::Relaxed),
            flushes: counters.flushes.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            specialized_calls: counters.specialized_calls.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            resets: counters.resets.load(Ordering::Relaxed),
        }
    }
}

impl BatcherInner {
    fn enqueue(self: &Arc<Self>, key: String, call: PendingCall) {
        let mut state = self.state.lock();
        let queued = {
            let calls = state.queue.entry(key.clone()).or_default();
            calls.push(call);
            calls.len()
        };
        state.pending += 1;

        if queued >= self.options.max_batch_size.max(1) {
            debug!(key = %key, queued, "Batch size reached, flushing immediately");
            state.cancel_timer();
            let generation = state.generation;
            state.phase = BatchPhase::Armed;
            let inner = Arc::clone(self);
            state.timer = Some(tokio::spawn(async move {
                inner.flush(generation).await;
            }));
        } else if state.phase != BatchPhase::Armed {
            state.generation += 1;
            let generation = state.generation;
            let delay = Duration::from_millis(self.options.batch_timeout_ms);
            state.phase = BatchPhase::Armed;
            let inner = Arc::clone(self);
            state.timer = Some(tokio::spawn(async move {
                sleep(delay).await;
                inner.flush(generation).await;
            }));
            debug!(key = %key, delay_ms = self.options.batch_timeout_ms, "Armed batch flush timer");
        }
    }

    async fn flush(self: &Arc<Self>, generation: u64) {
        let _in_flight = self.flush_lock.lock().await;
        let batch = {
            let mut state = self.state.lock();
            if state.generation != generation {
                // superseded by a reset, a size-triggered flush or a manual flush
                return;
            }
            // detach rather than abort: this task may be the timer itself
            state.timer = None;
            state.pending = 0;
            let batch = std::mem::take(&mut state.queue);
            state.phase = if batch.is_empty() {
                BatchPhase::Idle
            } else {
                BatchPhase::Firing
            };
            batch
        };

        if !batch.is_empty() {
            let calls: usize = batch.values().map(Vec::len).sum();
            self.counters.flushes.fetch_add(1, Ordering::Relaxed);
            info!(keys = batch.len(), calls, "Flushing operation batch");
            join_all(
                batch
                    .into_iter()
                    .map(|(key, calls)| self.execute_key(key, calls)),
            )
            .await;
        }

        let mut state = self.state.lock();
        if state.phase == BatchPhase::Firing {
            state.phase = BatchPhase::Idle;
        }
    }

    async fn execute_key(&self, key: String, calls: Vec<PendingCall>) {
        if calls.len() == 1 {
            self.execute_sequential(calls).await;
            return;
        }
        self.counters
            .coalesced
            .fetch_add(calls.len() as u64, Ordering::Relaxed);

        // calls under one key share an operation name; keep groups in enqueue order anyway
        let mut groups: Vec<(String, Vec<PendingCall>)> = Vec::new();
        for call in calls {
            match groups.iter_mut().find(|(operation, _)| *operation == call.operation) {
                Some((_, group)) => group.push(call),
                None => groups.push((call.operation.clone(), vec![call])),
            }
        }

        for (operation, group) in groups {
            let handler = self
                .handlers
                .get(&operation)
                .map(|handler| Arc::clone(handler.value()));
            match handler {
                Some(handler) if group.len() > 1 => {
                    self.execute_specialized(&key, &operation, handler, group).await
                }
                _ => self.execute_sequential(group).await,
            }
        }
    }

    async fn execute_specialized(
        &self,
        key: &str,
        operation: &str,
        handler: Arc<dyn BatchHandler>,
        group: Vec<PendingCall>,
    ) {
        self.counters
            .specialized_calls
            .fetch_add(1, Ordering::Relaxed);
        let size = group.len();
        let args: Vec<Value> = group.iter().map(|call| call.args.clone()).collect();

        let failure = match handler.execute_batch(args).await {
            Ok(results) if results.len() == size => {
                debug!(key, operation, size, "Specialized batch succeeded");
                for (call, result) in group.into_iter().zip(results) {
                    call.settle(Ok(result));
                }
                return;
            }
            Ok(results) => format!("expected {size} results, got {}", results.len()),
            Err(err) => err.to_string(),
        };

        if self.options.fallback_on_batch_failure {
            warn!(key, operation, size, reason = %failure, "Specialized batch failed, executing calls one by one");
            self.execute_sequential(group).await;
        } else {
            warn!(key, operation, size, reason = %failure, "Specialized batch failed, rejecting every call");
            self.counters
                .failures
                .fetch_add(size as u64, Ordering::Relaxed);
            let error = BatchError::BatchFailed {
                operation: operation.to_string(),
                size,
                reason: failure,
            };
            for call in group {
                call.settle(Err(error.clone()));
            }
        }
    }

    async fn execute_sequential(&self, calls: Vec<PendingCall>) {
        for call in calls {
            let result = (call.executor)(call.args.clone()).await;
            if let Err(err) = &result {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                debug!(
                    id = %call.id.0,
                    operation = %call.operation,
                    waited_ms = call.enqueued_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Batched call failed"
                );
            }
            call.settle(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn echo(counter: Arc<AtomicUsize>) -> BatchExecutor {
        executor(move |args| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "echo": args }))
            }
        })
    }

    struct CountingHandler {
        invocations: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BatchHandler for CountingHandler {
        async fn execute_batch(&self, calls: Vec<Value>) -> Result<Vec<Value>, BatchError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BatchError::execution("getText", "driver rejected batch"));
            }
            Ok(calls.into_iter().map(|args| json!({ "batched": args })).collect())
        }
    }

    #[test]
    fn batch_keys_use_primary_argument() {
        assert_eq!(batch_key("getText", &json!(["el-1", {"x": 1}])), "getText:el-1");
        assert_eq!(batch_key("getText", &json!("el-2")), "getText:el-2");
        assert_eq!(batch_key("getText", &json!([])), "getText:null");
        assert_eq!(batch_key("tap", &json!({"x": 1})), r#"tap:{"x":1}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_calls_settle_in_one_flush_through_the_handler() {
        let batcher = OperationBatcher::new(BatchingOptions::default());
        let handler = Arc::new(CountingHandler {
            invocations: AtomicUsize::new(0),
            fail: false,
        });
        batcher.register_batch_handler("getText", handler.clone());
        let direct = Arc::new(AtomicUsize::new(0));

        let calls = (0..5).map(|i| {
            let batcher = batcher.clone();
            let exec = echo(direct.clone());
            async move { batcher.submit("getText", json!(["el-1", i]), exec).await }
        });
        let results = join_all(calls).await;

        assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(direct.load(Ordering::SeqCst), 0);
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap(), json!({ "batched": ["el-1", i] }));
        }
        let stats = batcher.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.coalesced, 5);
        assert_eq!(stats.specialized_calls, 1);
        assert_eq!(batcher.phase(), BatchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn uncovered_operations_bypass_the_queue() {
        let batcher = OperationBatcher::new(BatchingOptions::default());
        let direct = Arc::new(AtomicUsize::new(0));
        let result = batcher
            .submit("tap", json!([10, 20]), echo(direct.clone()))
            .await
            .unwrap();
        assert_eq!(result, json!({ "echo": [10, 20] }));
        assert_eq!(batcher.stats().bypassed, 1);
        assert_eq!(batcher.phase(), BatchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated_per_call() {
        let batcher = OperationBatcher::new(BatchingOptions::default());
        let flaky = executor(|args: Value| async move {
            if args[1] == json!(1) {
                Err(BatchError::execution("getAttribute", "stale element"))
            } else {
                Ok(args)
            }
        });

        let results = join_all((0..3).map(|i| {
            let batcher = batcher.clone();
            let flaky = flaky.clone();
            async move { batcher.submit("getAttribute", json!(["el-9", i]), flaky).await }
        }))
        .await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(BatchError::Execution { .. })));
        assert!(results[2].is_ok());
        assert_eq!(batcher.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handler_falls_back_or_rejects_the_unit() {
        let handler = Arc::new(CountingHandler {
            invocations: AtomicUsize::new(0),
            fail: true,
        });

        let fallback = OperationBatcher::new(BatchingOptions::default());
        fallback.register_batch_handler("getText", handler.clone());
        let direct = Arc::new(AtomicUsize::new(0));
        let results = join_all((0..3).map(|i| {
            let batcher = fallback.clone();
            let exec = echo(direct.clone());
            async move { batcher.submit("getText", json!(["el-1", i]), exec).await }
        }))
        .await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(direct.load(Ordering::SeqCst), 3);

        let strict = OperationBatcher::new(BatchingOptions {
            fallback_on_batch_failure: false,
            ..BatchingOptions::default()
        });
        strict.register_batch_handler("getText", handler.clone());
        let results = join_all((0..3).map(|i| {
            let batcher = strict.clone();
            let exec = echo(direct.clone());
            async move { batcher.submit("getText", json!(["el-1", i]), exec).await }
        }))
        .await;
        assert!(results
            .iter()
            .all(|result| matches!(result, Err(BatchError::BatchFailed { size: 3, .. }))));
        assert_eq!(direct.load(Ordering::SeqCst), 3);
        assert_eq!(strict.stats().failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_max_batch_size_flushes_without_the_timer() {
        let batcher = OperationBatcher::new(BatchingOptions {
            max_batch_size: 2,
            batch_timeout_ms: 60_000,
            ..BatchingOptions::default()
        });
        let direct = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        let results = join_all((0..2).map(|i| {
            let batcher = batcher.clone();
            let exec = echo(direct.clone());
            async move { batcher.submit("isEnabled", json!(["el-3", i]), exec).await }
        }))
        .await;
        assert!(results.iter().all(Result::is_ok));
        assert!(started.elapsed() < Duration::from_millis(60_000));
        assert_eq!(batcher.stats().flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_rejects_everything_queued() {
        let batcher = OperationBatcher::new(BatchingOptions {
            batch_timeout_ms: 1_000,
            ..BatchingOptions::default()
        });
        let direct = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let batcher = batcher.clone();
                let exec = echo(direct.clone());
                tokio::spawn(async move {
                    batcher
                        .submit("findElement", json!([format!("sel-{}", i % 2)]), exec)
                        .await
                })
            })
            .collect();

        while batcher.pending_count() < 4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(batcher.phase(), BatchPhase::Armed);

        let report = batcher.reset_with_report();
        assert_eq!(report.rejected, 4);
        assert!(report.timer_cancelled);
        assert_eq!(batcher.pending_count(), 0);
        assert_eq!(batcher.phase(), BatchPhase::Idle);

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err(BatchError::Reset));
        }
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(direct.load(Ordering::SeqCst), 0);
        assert_eq!(batcher.stats().resets, 1);
        assert_eq!(batcher.stats().flushes, 0);
    }
}
