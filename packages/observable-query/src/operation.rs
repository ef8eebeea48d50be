//! The observable operation: lifecycle, ordering gate, side effects,
//! polling and the close protocol.
//!
//! ```text
//! executor ──► eager value ──────────────┐
//!    │                                   ▼
//!    └──► async value ──► route task ──► add_result ──► ordering gate ──► stream ──► subscribers
//!                                        ▲                                  │
//! refetch / poll / fetch_more ───────────┘                                  └──► on_data registrations
//! ```
//!
//! # Concurrency
//!
//! All state lives behind one mutex that is only held for short synchronous
//! sections, never across an `.await` or a call into a collaborator. Async
//! completions (executor futures, poll ticks, callback chains) run as tokio
//! tasks and re-enter through the operation's own methods.
//!
//! Operations that fetch (eagerly, on subscribe, on refetch or poll) must be
//! used inside a tokio runtime.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::core::OperationId;
use crate::error::OperationError;
use crate::executor::{MultiSourceResult, RequestExecutor, ResultFuture};
use crate::fetch_more::{FetchMore, FetchMoreRequest, MergeFetchMore};
use crate::lifecycle::Lifecycle;
use crate::manager::CloseNotifier;
use crate::options::{FetchMoreOptions, FetchPolicy, OperationOptions, Variables};
use crate::poll::PollScheduler;
use crate::result::ResultValue;
use crate::side_effect::{self, OnData, SideEffectRegistry, ACTIVE_REGISTRATION};
use crate::stream::{ResultStream, ResultSubscription};

/// Collaborators an operation calls out to.
#[derive(Clone)]
pub struct OperationDeps {
    pub executor: Arc<dyn RequestExecutor>,
    pub scheduler: Arc<dyn PollScheduler>,
    pub fetch_more: Arc<dyn FetchMore>,
    /// Told when the operation closes, unless the close came from it.
    pub notifier: Option<Arc<dyn CloseNotifier>>,
}

impl OperationDeps {
    /// Deps with the default fetch-more merger and no close notifier.
    pub fn new(executor: Arc<dyn RequestExecutor>, scheduler: Arc<dyn PollScheduler>) -> Self {
        Self {
            executor,
            scheduler,
            fetch_more: Arc::new(MergeFetchMore),
            notifier: None,
        }
    }

    pub fn with_fetch_more(mut self, fetch_more: Arc<dyn FetchMore>) -> Self {
        self.fetch_more = fetch_more;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CloseNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

/// Output of [`Operation::fetch_results`].
#[derive(Debug)]
pub struct FetchResults {
    /// Value available immediately, if the executor had one.
    pub eager: Option<ResultValue>,
    /// Completion of the asynchronous half, if there is one.
    pub network: Option<PendingResult>,
}

/// Handle to an asynchronous result that is being routed into an operation.
///
/// The value has already been offered to the operation's ordering gate when
/// [`wait`](Self::wait) returns. Dropping the handle does not cancel routing.
#[derive(Debug)]
pub struct PendingResult {
    operation: OperationId,
    task: JoinHandle<ResultValue>,
}

impl PendingResult {
    pub async fn wait(self) -> Result<ResultValue, OperationError> {
        self.task.await.map_err(|_| OperationError::Interrupted {
            operation: self.operation,
        })
    }
}

struct State {
    lifecycle: Lifecycle,
    options: OperationOptions,
    latest: Option<ResultValue>,
    latest_was_eager: bool,
    /// Set once a close has committed to tearing down.
    closing: bool,
    stream: ResultStream,
    side_effects: SideEffectRegistry,
}

impl State {
    fn transition(&mut self, operation: OperationId, next: Lifecycle) -> bool {
        let current = self.lifecycle;
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(operation = %operation, from = %current, to = %next, "refusing lifecycle transition");
            return false;
        }
        debug!(operation = %operation, from = %current, to = %next, "lifecycle transition");
        self.lifecycle = next;
        true
    }

    /// The ordering gate. Returns whether `value` was accepted.
    fn accept(&mut self, operation: OperationId, mut value: ResultValue) -> bool {
        if let Some(latest) = &self.latest {
            if latest.timestamp() > value.timestamp() {
                trace!(
                    operation = %operation,
                    latest = %latest.timestamp(),
                    incoming = %value.timestamp(),
                    "dropping stale result"
                );
                return false;
            }
            value.inherit_origin(latest.origin());
        }

        if self.lifecycle == Lifecycle::Pending && !value.is_optimistic() {
            self.transition(operation, Lifecycle::Completed);
        }

        let delivered = self.stream.publish(&value);
        trace!(operation = %operation, delivered, loading = value.is_loading(), "result accepted");
        self.latest = Some(value);
        true
    }
}

struct Shared {
    id: OperationId,
    deps: OperationDeps,
    state: Mutex<State>,
}

/// One live GraphQL query or mutation, observed as a stream of results.
///
/// Cheap to clone; clones share the same state.
///
/// # Example
///
/// ```ignore
/// let operation = Operation::new(
///     OperationOptions::new("query Posts { posts { id title } }")
///         .with_fetch_policy(FetchPolicy::NetworkOnly),
///     deps,
/// );
///
/// // First subscriber triggers the fetch (fetch_on_subscribe defaults to true)
/// let mut results = operation.subscribe();
/// while let Some(result) = results.next_result().await {
///     render(result.data());
/// }
/// ```
#[derive(Clone)]
pub struct Operation {
    inner: Arc<Shared>,
}

/// Non-owning handle to an [`Operation`].
#[derive(Clone)]
pub struct WeakOperation {
    inner: Weak<Shared>,
}

impl WeakOperation {
    pub fn upgrade(&self) -> Option<Operation> {
        self.inner.upgrade().map(|inner| Operation { inner })
    }

    /// Whether any strong handle to the operation still exists.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl Operation {
    /// Create an operation with a fresh identity.
    ///
    /// Fetches immediately when `options.eagerly_fetch` is set.
    pub fn new(options: OperationOptions, deps: OperationDeps) -> Self {
        Self::with_id(OperationId::new(), options, deps)
    }

    /// Create an operation with a caller-chosen identity.
    pub fn with_id(id: OperationId, options: OperationOptions, deps: OperationDeps) -> Self {
        let eager = options.eagerly_fetch;
        let operation = Self {
            inner: Arc::new(Shared {
                id,
                deps,
                state: Mutex::new(State {
                    lifecycle: Lifecycle::Unexecuted,
                    options,
                    latest: None,
                    latest_was_eager: false,
                    closing: false,
                    stream: ResultStream::new(),
                    side_effects: SideEffectRegistry::default(),
                }),
            }),
        };

        if eager {
            operation.fetch_results();
            operation.state().latest_was_eager = true;
        }
        operation
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn downgrade(&self) -> WeakOperation {
        WeakOperation {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state().lifecycle
    }

    /// A copy of the current options.
    pub fn options(&self) -> OperationOptions {
        self.state().options.clone()
    }

    /// A copy of the latest accepted result.
    pub fn latest_result(&self) -> Option<ResultValue> {
        self.state().latest.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.lifecycle() == Lifecycle::Polling
    }

    pub fn is_stream_closed(&self) -> bool {
        self.state().stream.is_closed()
    }

    /// Live subscribers, including side-effect registrations.
    pub fn subscriber_count(&self) -> usize {
        self.state().stream.subscriber_count()
    }

    /// Outstanding side-effect registrations.
    pub fn side_effect_count(&self) -> usize {
        self.state().side_effects.len()
    }

    /// Replace the variables used by subsequent fetches. Does not fetch.
    pub fn set_variables(&self, variables: Variables) {
        self.state().options.variables = variables;
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Subscribe to results.
    ///
    /// The first subscriber after an eager fetch receives the stored result
    /// once, on attachment. Otherwise, when `fetch_on_subscribe` is set, the
    /// first subscriber starts a fetch.
    pub fn subscribe(&self) -> ResultSubscription {
        let (subscription, fetch) = {
            let mut state = self.state();
            self.attach(&mut state)
        };
        if fetch {
            self.fetch_results();
        }
        subscription
    }

    /// Attach a subscriber. Returns whether a fetch should follow.
    fn attach(&self, state: &mut State) -> (ResultSubscription, bool) {
        let first = state.stream.subscriber_count() == 0;

        if first && state.latest_was_eager {
            state.latest_was_eager = false;
            let replay = state.latest.clone();
            trace!(operation = %self.id(), replay = replay.is_some(), "replaying eager result");
            return (state.stream.subscribe(replay), false);
        }

        let fetch = first
            && state.options.fetch_on_subscribe
            && state.lifecycle.has_fetch_edge()
            && !state.stream.is_closed();
        (state.stream.subscribe(None), fetch)
    }

    /// Ask the executor for the current options' results.
    ///
    /// When there is an asynchronous value, the eager value becomes the latest
    /// result if there is none yet and the asynchronous value is routed
    /// through [`add_result`](Self::add_result). An eager value without an
    /// asynchronous one (e.g. a `cache-only` hit) is the final answer and goes
    /// through `add_result` itself.
    pub fn fetch_results(&self) -> FetchResults {
        let id = self.id();
        let options = self.options();
        let MultiSourceResult { eager, network } =
            self.inner.deps.executor.fetch_as_multi_source(id, &options);

        {
            let mut state = self.state();
            if network.is_some() && state.latest.is_none() {
                state.latest = eager.clone();
            }
            if state.lifecycle.has_fetch_edge() {
                let next = if state.side_effects.is_empty() {
                    Lifecycle::Pending
                } else {
                    Lifecycle::SideEffectsPending
                };
                state.transition(id, next);
            }
        }

        if network.is_none() {
            if let Some(value) = &eager {
                self.add_result(value.clone());
            }
        }

        if let Some(interval) = options.active_poll_interval() {
            if let Err(error) = self.start_polling(interval) {
                warn!(operation = %id, %error, "poll interval ignored");
            }
        }

        FetchResults {
            eager,
            network: network.map(|future| self.route(future)),
        }
    }

    /// Spawn a task that feeds `future`'s value through the ordering gate.
    fn route(&self, future: ResultFuture) -> PendingResult {
        let operation = self.id();
        let target = self.downgrade();
        let task = tokio::spawn(async move {
            let value = future.await;
            match target.upgrade() {
                Some(target) => {
                    target.add_result(value.clone());
                }
                None => trace!(operation = %operation, "operation dropped before result arrived"),
            }
            value
        });
        PendingResult { operation, task }
    }

    /// The single ingestion point for results.
    ///
    /// Rejects (returns `false`) a value older than the latest accepted one.
    /// Otherwise inherits the latest origin when the value has none,
    /// completes a pending operation on a non-optimistic value, stores it and
    /// publishes it to current subscribers.
    pub fn add_result(&self, value: ResultValue) -> bool {
        let id = self.id();
        self.state().accept(id, value)
    }

    /// Replay an externally produced value (e.g. a cache update) if the
    /// lifecycle is rebroadcast-safe and the policy allows cache results.
    pub fn rebroadcast(&self, value: ResultValue) -> bool {
        let id = self.id();
        let mut state = self.state();
        if !state.lifecycle.is_rebroadcast_safe() || state.options.fetch_policy == FetchPolicy::NoCache {
            trace!(operation = %id, lifecycle = %state.lifecycle, "rebroadcast suppressed");
            return false;
        }
        state.accept(id, value)
    }

    // =========================================================================
    // Refetch / fetch-more / poll
    // =========================================================================

    /// Re-run the operation.
    ///
    /// Only legal when [`Lifecycle::is_refetch_safe`]. Publishes a loading
    /// placeholder carrying the previous payload, then routes the executor's
    /// answer through the ordering gate.
    pub fn refetch(&self) -> Result<PendingResult, OperationError> {
        let id = self.id();
        let (lifecycle, previous) = {
            let state = self.state();
            (
                state.lifecycle,
                state.latest.as_ref().and_then(|latest| latest.data().cloned()),
            )
        };
        if !lifecycle.is_refetch_safe() {
            return Err(OperationError::IllegalState {
                operation: id,
                lifecycle,
                action: "refetch",
            });
        }

        let future = self.inner.deps.executor.refetch(id)?;
        debug!(operation = %id, "refetching");
        self.add_result(ResultValue::loading(previous));
        Ok(self.route(future))
    }

    /// Load another page and merge it into the current payload.
    ///
    /// Fails with [`OperationError::Validation`] when `update_query` is not
    /// set. The merged value goes through the ordering gate and is returned.
    pub async fn fetch_more(&self, fetch_more: FetchMoreOptions) -> Result<ResultValue, OperationError> {
        if fetch_more.update_query.is_none() {
            return Err(OperationError::validation("fetch_more requires an update_query merge function"));
        }

        let id = self.id();
        let (original, previous) = {
            let state = self.state();
            (state.options.clone(), state.latest.clone())
        };
        self.add_result(ResultValue::loading(
            previous.as_ref().and_then(|latest| latest.data().cloned()),
        ));

        debug!(operation = %id, "fetching more");
        let request = FetchMoreRequest {
            operation: id,
            fetch_more,
            original,
            executor: Arc::clone(&self.inner.deps.executor),
            previous,
        };
        let merged = self.inner.deps.fetch_more.fetch_more(request).await;
        self.add_result(merged.clone());
        Ok(merged)
    }

    /// Begin polling every `interval`.
    ///
    /// Replaces any running poll registration.
    pub fn start_polling(&self, interval: Duration) -> Result<(), OperationError> {
        let id = self.id();
        let (options, was_polling) = {
            let mut state = self.state();
            if state.lifecycle.is_terminal() {
                return Err(OperationError::IllegalState {
                    operation: id,
                    lifecycle: state.lifecycle,
                    action: "start polling",
                });
            }
            let policy = state.options.fetch_policy;
            if !policy.supports_polling() {
                return Err(OperationError::configuration(format!(
                    "fetch policy {policy} does not support polling"
                )));
            }
            if interval.is_zero() {
                return Err(OperationError::configuration("poll interval must be positive"));
            }

            let was_polling = state.lifecycle == Lifecycle::Polling;
            state.options.poll_interval = Some(interval);
            state.transition(id, Lifecycle::Polling);
            (state.options.clone(), was_polling)
        };

        let scheduler = &self.inner.deps.scheduler;
        if was_polling {
            scheduler.stop_polling(id);
        }
        scheduler.start_polling(&options, id);
        info!(operation = %id, ?interval, "polling started");
        Ok(())
    }

    /// Stop polling. No-op unless currently polling.
    pub fn stop_polling(&self) {
        let id = self.id();
        {
            let mut state = self.state();
            if state.lifecycle != Lifecycle::Polling {
                return;
            }
            state.options.poll_interval = None;
            state.transition(id, Lifecycle::PollingStopped);
        }
        self.inner.deps.scheduler.stop_polling(id);
        info!(operation = %id, "polling stopped");
    }

    /// One poll tick. Ignored unless polling; does not change the lifecycle.
    pub fn poll(&self) -> Option<PendingResult> {
        let id = self.id();
        let options = {
            let state = self.state();
            if state.lifecycle != Lifecycle::Polling {
                trace!(operation = %id, lifecycle = %state.lifecycle, "ignoring poll tick");
                return None;
            }
            state.options.clone()
        };

        let MultiSourceResult { eager, network } =
            self.inner.deps.executor.fetch_as_multi_source(id, &options);
        match network {
            Some(future) => Some(self.route(future)),
            None => {
                if let Some(value) = eager {
                    self.add_result(value);
                }
                None
            }
        }
    }

    // =========================================================================
    // Side effects
    // =========================================================================

    /// Register a chain of callbacks run on every non-loading result until
    /// the first concrete one.
    ///
    /// While the registration is outstanding a non-forced close is deferred.
    /// Registering on a closed operation does nothing.
    pub fn on_data<I>(&self, callbacks: I)
    where
        I: IntoIterator<Item = Arc<dyn OnData>>,
    {
        let callbacks: Arc<[Arc<dyn OnData>]> = callbacks.into_iter().collect();
        if callbacks.is_empty() {
            return;
        }

        let id = self.id();
        let fetch = {
            let mut state = self.state();
            if state.lifecycle.is_terminal() || state.closing {
                debug!(operation = %id, "ignoring side effects on closed operation");
                return;
            }

            let registration = state.side_effects.reserve();
            let (subscription, fetch) = self.attach(&mut state);
            let chain = run_chain(self.downgrade(), registration, subscription, callbacks);
            let task = tokio::spawn(ACTIVE_REGISTRATION.scope((id, registration), chain));
            state.side_effects.insert(registration, task);
            debug!(operation = %id, registration, "side effects registered");
            fetch
        };

        if fetch {
            self.fetch_results();
        }
    }

    /// Called by a registration after its chain ran on a concrete result.
    async fn settle_side_effect(&self, registration: u64) {
        let id = self.id();
        let finalize = {
            let mut state = self.state();
            state.side_effects.remove(registration);
            let lifecycle = state.lifecycle;
            if !state.side_effects.is_empty() {
                false
            } else {
                match lifecycle {
                    Lifecycle::SideEffectsBlocking => state.transition(id, Lifecycle::Completed),
                    Lifecycle::SideEffectsPending => {
                        state.transition(id, Lifecycle::Completed);
                        false
                    }
                    _ => false,
                }
            }
        };

        debug!(operation = %id, registration, finalize, "side effects settled");
        if finalize {
            self.close(false, false).await;
        }
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Close the operation.
    ///
    /// Without `force`, a close requested while side effects are pending is
    /// deferred: the lifecycle becomes `SideEffectsBlocking` and the close
    /// finishes by itself once they settle. Otherwise the manager is notified
    /// (unless `from_manager`), registrations are cancelled, polling stops and
    /// the stream closes.
    ///
    /// Returns the resulting lifecycle. Closing twice is a no-op, including
    /// while another close is still tearing down.
    pub async fn close(&self, force: bool, from_manager: bool) -> Lifecycle {
        let id = self.id();
        let registrations = {
            let mut state = self.state();
            let lifecycle = state.lifecycle;
            if state.closing {
                // Another close is already tearing down
                return Lifecycle::Closed;
            }
            match lifecycle {
                Lifecycle::Closed => return Lifecycle::Closed,
                Lifecycle::SideEffectsPending | Lifecycle::SideEffectsBlocking
                    if !force && !state.side_effects.is_empty() =>
                {
                    state.transition(id, Lifecycle::SideEffectsBlocking);
                    debug!(operation = %id, pending = state.side_effects.len(), "close deferred");
                    return Lifecycle::SideEffectsBlocking;
                }
                _ => {}
            }
            state.closing = true;
            state.side_effects.drain()
        };

        if !from_manager {
            if let Some(notifier) = &self.inner.deps.notifier {
                notifier.notify_closing(id);
            }
        }

        for (registration, task) in registrations {
            side_effect::cancel(id, registration, task).await;
        }

        self.stop_polling();

        {
            let mut state = self.state();
            state.transition(id, Lifecycle::Closed);
            state.stream.close();
        }
        info!(operation = %id, force, "operation closed");
        Lifecycle::Closed
    }
}

/// Body of one side-effect registration.
async fn run_chain(
    operation: WeakOperation,
    registration: u64,
    mut subscription: ResultSubscription,
    callbacks: Arc<[Arc<dyn OnData>]>,
) {
    while let Some(result) = subscription.next_result().await {
        if result.is_loading() {
            continue;
        }

        for callback in callbacks.iter() {
            if let Err(error) = callback.on_data(&result).await {
                warn!(registration, error = %error, "side-effect callback failed");
            }
        }

        if result.is_concrete() {
            subscription.cancel();
            if let Some(operation) = operation.upgrade() {
                operation.settle_side_effect(registration).await;
            }
            return;
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
