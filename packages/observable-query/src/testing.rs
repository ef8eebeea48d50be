//! Test doubles for operations and their collaborators.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! observable-query = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use observable_query::testing::Harness;
//!
//! let harness = Harness::new();
//! let operation = harness.operation(OperationOptions::new("query Q { q }"));
//!
//! let mut results = operation.subscribe();          // triggers a fetch
//! harness.executor.resolve_next(ResultValue::network(json!({ "q": 1 })));
//! assert!(results.next_result().await.is_some());
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use crate::core::OperationId;
use crate::error::OperationError;
use crate::executor::{MultiSourceResult, RequestExecutor, ResultFuture};
use crate::manager::CloseNotifier;
use crate::operation::{Operation, OperationDeps};
use crate::options::OperationOptions;
use crate::poll::PollScheduler;
use crate::result::{OperationException, ResultValue};
use crate::stream::ResultSubscription;

// =============================================================================
// Mock Executor
// =============================================================================

#[derive(Default)]
struct MockState {
    eager: Option<ResultValue>,
    respond_with: Option<ResultValue>,
    pending: VecDeque<oneshot::Sender<ResultValue>>,
    known: HashSet<OperationId>,
    fetches: Vec<(OperationId, OperationOptions)>,
    refetches: usize,
    query_responses: VecDeque<ResultValue>,
    queries: Vec<OperationOptions>,
}

/// Scriptable [`RequestExecutor`].
///
/// By default every fetch and refetch returns a future that stays pending
/// until the test calls [`resolve_next`](Self::resolve_next), oldest first.
/// After [`respond_with`](Self::respond_with) they resolve immediately with
/// a freshly timestamped copy of the given value instead.
///
/// # Example
///
/// ```ignore
/// let executor = Arc::new(MockExecutor::new());
/// let operation = Operation::new(options, OperationDeps::new(executor.clone(), scheduler));
///
/// let pending = operation.fetch_results().network.unwrap();
/// executor.resolve_next(ResultValue::network(json!({ "ok": true })));
/// pending.wait().await?;
/// ```
#[derive(Default)]
pub struct MockExecutor {
    state: Mutex<MockState>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eager value returned by every subsequent fetch.
    pub fn with_eager(self, eager: ResultValue) -> Self {
        self.set_eager(Some(eager));
        self
    }

    pub fn set_eager(&self, eager: Option<ResultValue>) {
        self.state.lock().unwrap().eager = eager;
    }

    /// Resolve all subsequent fetches and refetches immediately.
    pub fn respond_with(&self, value: ResultValue) {
        self.state.lock().unwrap().respond_with = Some(value);
    }

    /// Resolve the oldest outstanding fetch. Returns `false` if none was
    /// waiting.
    pub fn resolve_next(&self, value: ResultValue) -> bool {
        let mut state = self.state.lock().unwrap();
        let mut value = value;
        while let Some(sender) = state.pending.pop_front() {
            match sender.send(value) {
                Ok(()) => return true,
                // Receiver went away (aborted route); try the next one
                Err(returned) => value = returned,
            }
        }
        false
    }

    /// Fetches waiting for [`resolve_next`](Self::resolve_next).
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Number of `fetch_as_multi_source` calls.
    pub fn fetch_count(&self) -> usize {
        self.state.lock().unwrap().fetches.len()
    }

    /// Options passed to each `fetch_as_multi_source` call, in order.
    pub fn fetches(&self) -> Vec<(OperationId, OperationOptions)> {
        self.state.lock().unwrap().fetches.clone()
    }

    pub fn refetch_count(&self) -> usize {
        self.state.lock().unwrap().refetches
    }

    /// Queue a response for the next one-shot `query`.
    pub fn push_query_response(&self, value: ResultValue) {
        self.state.lock().unwrap().query_responses.push_back(value);
    }

    /// Options passed to each one-shot `query`, in order.
    pub fn queries(&self) -> Vec<OperationOptions> {
        self.state.lock().unwrap().queries.clone()
    }

    fn next_future(state: &mut MockState) -> ResultFuture {
        if let Some(template) = state.respond_with.clone() {
            return Box::pin(async move { template.with_timestamp(Utc::now()) });
        }

        let (sender, receiver) = oneshot::channel();
        state.pending.push_back(sender);
        Box::pin(async move {
            receiver
                .await
                .unwrap_or_else(|_| ResultValue::failed(OperationException::link("request dropped")))
        })
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    fn fetch_as_multi_source(&self, id: OperationId, options: &OperationOptions) -> MultiSourceResult {
        let mut state = self.state.lock().unwrap();
        state.known.insert(id);
        state.fetches.push((id, options.clone()));
        let eager = state.eager.clone();
        MultiSourceResult::new(eager, Some(Self::next_future(&mut state)))
    }

    fn refetch(&self, id: OperationId) -> Result<ResultFuture, OperationError> {
        let mut state = self.state.lock().unwrap();
        if !state.known.contains(&id) {
            return Err(OperationError::UnknownOperation { operation: id });
        }
        state.refetches += 1;
        Ok(Self::next_future(&mut state))
    }

    async fn query(&self, options: OperationOptions) -> ResultValue {
        let mut state = self.state.lock().unwrap();
        state.queries.push(options);
        state
            .query_responses
            .pop_front()
            .unwrap_or_else(|| ResultValue::new(None))
    }
}

// =============================================================================
// Spy Scheduler
// =============================================================================

/// A call recorded by [`SpyScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCall {
    Start {
        operation: OperationId,
        interval: Option<Duration>,
    },
    Stop {
        operation: OperationId,
    },
}

/// Poll scheduler that records calls and never ticks.
#[derive(Debug, Clone, Default)]
pub struct SpyScheduler {
    calls: Arc<Mutex<Vec<SchedulerCall>>>,
}

impl SpyScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded calls, in order.
    pub fn calls(&self) -> Vec<SchedulerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn start_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, SchedulerCall::Start { .. }))
            .count()
    }

    pub fn stop_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, SchedulerCall::Stop { .. }))
            .count()
    }

    /// Clear all recorded calls.
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl PollScheduler for SpyScheduler {
    fn start_polling(&self, options: &OperationOptions, operation: OperationId) {
        self.calls.lock().unwrap().push(SchedulerCall::Start {
            operation,
            interval: options.poll_interval,
        });
    }

    fn stop_polling(&self, operation: OperationId) {
        self.calls
            .lock()
            .unwrap()
            .push(SchedulerCall::Stop { operation });
    }
}

// =============================================================================
// Spy Notifier
// =============================================================================

/// Close notifier that records which operations announced closing.
#[derive(Debug, Clone, Default)]
pub struct SpyNotifier {
    closed: Arc<Mutex<Vec<OperationId>>>,
}

impl SpyNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closed(&self) -> Vec<OperationId> {
        self.closed.lock().unwrap().clone()
    }

    pub fn was_notified(&self, operation: OperationId) -> bool {
        self.closed.lock().unwrap().contains(&operation)
    }
}

impl CloseNotifier for SpyNotifier {
    fn notify_closing(&self, operation: OperationId) {
        self.closed.lock().unwrap().push(operation);
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A mock executor, spy scheduler and spy notifier wired together.
pub struct Harness {
    pub executor: Arc<MockExecutor>,
    pub scheduler: Arc<SpyScheduler>,
    pub notifier: Arc<SpyNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            executor: Arc::new(MockExecutor::new()),
            scheduler: Arc::new(SpyScheduler::new()),
            notifier: Arc::new(SpyNotifier::new()),
        }
    }

    pub fn deps(&self) -> OperationDeps {
        OperationDeps::new(self.executor.clone(), self.scheduler.clone())
            .with_notifier(self.notifier.clone())
    }

    pub fn operation(&self, options: OperationOptions) -> Operation {
        Operation::new(options, self.deps())
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Yield to other tasks until `condition` holds.
///
/// # Panics
///
/// Panics if the condition is still false after many scheduler turns.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not met after 10000 yields");
}

/// Every result already queued on `subscription`, without waiting.
pub fn drain_ready(subscription: &mut ResultSubscription) -> Vec<ResultValue> {
    let mut ready = Vec::new();
    while let Some(value) = subscription.try_next() {
        ready.push(value);
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_manual_resolution_is_fifo() {
        let executor = MockExecutor::new();
        let id = OperationId::new();
        let options = OperationOptions::new("query Q { q }");

        let first = executor.fetch_as_multi_source(id, &options).network.unwrap();
        let second = executor.refetch(id).unwrap();
        assert_eq!(executor.pending_count(), 2);

        assert!(executor.resolve_next(ResultValue::network(json!(1))));
        assert!(executor.resolve_next(ResultValue::network(json!(2))));
        assert!(!executor.resolve_next(ResultValue::network(json!(3))));

        assert_eq!(first.await.data(), Some(&json!(1)));
        assert_eq!(second.await.data(), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_refetch_unknown_operation() {
        let executor = MockExecutor::new();
        let err = executor.refetch(OperationId::new()).err().unwrap();
        assert!(matches!(err, OperationError::UnknownOperation { .. }));
    }

    #[tokio::test]
    async fn test_dropped_request_becomes_link_error() {
        let executor = MockExecutor::new();
        let future = executor
            .fetch_as_multi_source(OperationId::new(), &OperationOptions::new("query Q { q }"))
            .network
            .unwrap();
        executor.state.lock().unwrap().pending.clear();

        let value = future.await;
        assert!(value.exception().unwrap().link_error.is_some());
    }

    #[test]
    fn test_spy_scheduler_records_calls() {
        let spy = SpyScheduler::new();
        let id = OperationId::new();
        spy.start_polling(
            &OperationOptions::new("query Q { q }").with_poll_interval(Duration::from_secs(2)),
            id,
        );
        spy.stop_polling(id);

        assert_eq!(spy.start_count(), 1);
        assert_eq!(spy.stop_count(), 1);
        assert_eq!(
            spy.calls()[0],
            SchedulerCall::Start {
                operation: id,
                interval: Some(Duration::from_secs(2))
            }
        );
    }
}
