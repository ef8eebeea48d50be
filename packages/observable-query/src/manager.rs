//! Operation registry and manager.
//!
//! The manager hands out operations that share one executor, poll scheduler
//! and fetch-more merger, and keeps a registry of them keyed by identity.
//! The registry only holds weak handles: callers own their operations, and
//! dropping the last handle is enough to release one.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::core::OperationId;
use crate::executor::RequestExecutor;
use crate::fetch_more::{FetchMore, MergeFetchMore};
use crate::lifecycle::Lifecycle;
use crate::operation::{Operation, OperationDeps, WeakOperation};
use crate::options::OperationOptions;
use crate::poll::{IntervalPollScheduler, PollScheduler};
use crate::result::ResultValue;

/// Receives the closing notification of an operation.
pub trait CloseNotifier: Send + Sync + 'static {
    /// Called once when `operation` starts closing on its own.
    fn notify_closing(&self, operation: OperationId);
}

/// Weak, identity-keyed index of live operations.
#[derive(Default)]
pub struct OperationRegistry {
    operations: DashMap<OperationId, WeakOperation>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, operation: &Operation) {
        self.operations.insert(operation.id(), operation.downgrade());
    }

    /// Look up a live operation. Entries whose operation was dropped are
    /// pruned on the way.
    pub fn get(&self, id: OperationId) -> Option<Operation> {
        let weak = self.operations.get(&id).map(|entry| entry.value().clone())?;
        let operation = weak.upgrade();
        if operation.is_none() {
            self.operations.remove_if(&id, |_, weak| !weak.is_alive());
        }
        operation
    }

    pub fn remove(&self, id: OperationId) -> bool {
        self.operations.remove(&id).is_some()
    }

    /// Number of live operations.
    pub fn len(&self) -> usize {
        self.operations.retain(|_, weak| weak.is_alive());
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Strong handles to every live operation.
    pub fn operations(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    /// Empty the registry, returning the operations that were still alive.
    pub fn drain(&self) -> Vec<Operation> {
        let ids: Vec<OperationId> = self.operations.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.operations.remove(&id))
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }
}

impl CloseNotifier for OperationRegistry {
    fn notify_closing(&self, operation: OperationId) {
        if self.remove(operation) {
            debug!(operation = %operation, "operation unregistered");
        }
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("entries", &self.operations.len())
            .finish()
    }
}

/// Creates and tracks operations.
///
/// # Example
///
/// ```ignore
/// let manager = OperationManager::new(Arc::new(HttpExecutor::new(client)), ManagerConfig::from_env()?);
///
/// let posts = manager.watch(manager.options("query Posts { posts { id } }"));
/// let mut results = posts.subscribe();
///
/// // After a mutation updates the normalized cache:
/// manager.rebroadcast(|operation| cache.read(&operation.options()));
/// ```
pub struct OperationManager {
    config: ManagerConfig,
    registry: Arc<OperationRegistry>,
    executor: Arc<dyn RequestExecutor>,
    scheduler: Arc<dyn PollScheduler>,
    fetch_more: Arc<dyn FetchMore>,
}

impl OperationManager {
    /// Manager with an [`IntervalPollScheduler`] and the default merger.
    ///
    /// Must be called inside a tokio runtime if operations will poll.
    pub fn new(executor: Arc<dyn RequestExecutor>, config: ManagerConfig) -> Self {
        let registry = Arc::new(OperationRegistry::new());
        let scheduler = Arc::new(IntervalPollScheduler::new(Arc::clone(&registry)));
        Self {
            config,
            registry,
            executor,
            scheduler,
            fetch_more: Arc::new(MergeFetchMore),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn PollScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_fetch_more(mut self, fetch_more: Arc<dyn FetchMore>) -> Self {
        self.fetch_more = fetch_more;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Options for `document` with the configured defaults.
    pub fn options(&self, document: impl Into<String>) -> OperationOptions {
        self.config.options(document)
    }

    /// Create and register an operation.
    pub fn watch(&self, options: OperationOptions) -> Operation {
        let deps = OperationDeps {
            executor: Arc::clone(&self.executor),
            scheduler: Arc::clone(&self.scheduler),
            fetch_more: Arc::clone(&self.fetch_more),
            notifier: Some(Arc::clone(&self.registry) as Arc<dyn CloseNotifier>),
        };
        let policy = options.fetch_policy;
        let operation = Operation::new(options, deps);
        self.registry.insert(&operation);
        info!(operation = %operation.id(), policy = %policy, "operation registered");
        operation
    }

    pub fn get(&self, id: OperationId) -> Option<Operation> {
        self.registry.get(id)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Feed an externally produced result into operation `id`.
    ///
    /// Returns whether the value was accepted. Unknown ids are ignored.
    pub fn deliver(&self, id: OperationId, value: ResultValue) -> bool {
        match self.registry.get(id) {
            Some(operation) => operation.add_result(value),
            None => {
                debug!(operation = %id, "dropping result for unknown operation");
                false
            }
        }
    }

    /// Offer every operation a fresh value from `resolve`, subject to each
    /// operation's rebroadcast rules. Returns how many accepted one.
    pub fn rebroadcast<F>(&self, mut resolve: F) -> usize
    where
        F: FnMut(&Operation) -> Option<ResultValue>,
    {
        let mut accepted = 0;
        for operation in self.registry.operations() {
            if let Some(value) = resolve(&operation) {
                if operation.rebroadcast(value) {
                    accepted += 1;
                }
            }
        }
        debug!(accepted, "rebroadcast finished");
        accepted
    }

    /// Close every registered operation and clear the registry.
    ///
    /// Returns how many reached [`Lifecycle::Closed`]. Without `force`,
    /// operations with pending side effects defer and finish closing once
    /// those settle.
    pub async fn close_all(&self, force: bool) -> usize {
        let operations = self.registry.drain();
        let mut closed = 0;
        for operation in operations {
            if operation.close(force, true).await == Lifecycle::Closed {
                closed += 1;
            }
        }
        info!(closed, force, "closed all operations");
        closed
    }
}

impl std::fmt::Debug for OperationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationManager")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
