//! Poll scheduling.
//!
//! The operation decides *whether* it is polling; a [`PollScheduler`] decides
//! *when* ticks fire. Schedulers never mutate operation state directly, they
//! call [`Operation::poll`](crate::Operation::poll).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::core::OperationId;
use crate::manager::OperationRegistry;
use crate::options::OperationOptions;

/// Periodic re-fetch driver.
pub trait PollScheduler: Send + Sync + 'static {
    /// Begin polling `operation` every `options.poll_interval`.
    fn start_polling(&self, options: &OperationOptions, operation: OperationId);

    /// Stop polling `operation`. Idempotent.
    fn stop_polling(&self, operation: OperationId);
}

struct TickTask {
    generation: u64,
    handle: JoinHandle<()>,
}

/// One tokio interval task per polling operation.
///
/// The first tick fires one interval after `start_polling`. A task ends on
/// its own, and drops its table entry, once its operation is no longer
/// registered.
pub struct IntervalPollScheduler {
    registry: Arc<OperationRegistry>,
    tasks: Arc<DashMap<OperationId, TickTask>>,
    generation: AtomicU64,
}

impl IntervalPollScheduler {
    /// Ticks are delivered by looking operations up in `registry`. An
    /// operation that was never inserted there (e.g. built with
    /// `Operation::new` instead of `OperationManager::watch`) is not polled.
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            tasks: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Whether a tick task exists for `operation`.
    pub fn is_scheduled(&self, operation: OperationId) -> bool {
        self.tasks
            .get(&operation)
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Number of tick tasks still running.
    pub fn scheduled_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| !task.handle.is_finished())
            .count()
    }

    /// Entries in the task table, finished or not.
    #[cfg(test)]
    fn tracked_count(&self) -> usize {
        self.tasks.len()
    }
}

impl PollScheduler for IntervalPollScheduler {
    fn start_polling(&self, options: &OperationOptions, operation: OperationId) {
        let Some(period) = options.active_poll_interval() else {
            debug!(operation = %operation, "no poll interval set, not scheduling");
            return;
        };

        // Entries whose task ended before it could remove them
        self.tasks.retain(|_, task| !task.handle.is_finished());

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        let tasks = Arc::clone(&self.tasks);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(target) = registry.get(operation) else {
                    debug!(
                        operation = %operation,
                        "polled operation is dropped or not registered, stopping ticks"
                    );
                    break;
                };
                trace!(operation = %operation, "poll tick");
                target.poll();
            }
            tasks.remove_if(&operation, |_, task| task.generation == generation);
        });

        if let Some(previous) = self
            .tasks
            .insert(operation, TickTask { generation, handle })
        {
            previous.handle.abort();
        }
        debug!(operation = %operation, ?period, "polling scheduled");
    }

    fn stop_polling(&self, operation: OperationId) {
        if let Some((_, task)) = self.tasks.remove(&operation) {
            task.handle.abort();
            debug!(operation = %operation, "polling unscheduled");
        }
    }
}

impl Drop for IntervalPollScheduler {
    fn drop(&mut self) {
        for task in self.tasks.iter() {
            task.handle.abort();
        }
    }
}

impl std::fmt::Debug for IntervalPollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalPollScheduler")
            .field("scheduled", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::lifecycle::Lifecycle;
    use crate::operation::{Operation, OperationDeps};
    use crate::options::FetchPolicy;
    use crate::result::ResultValue;
    use crate::testing::{wait_until, MockExecutor};

    fn polling_setup() -> (Arc<MockExecutor>, Arc<IntervalPollScheduler>, Operation) {
        let registry = Arc::new(OperationRegistry::new());
        let executor = Arc::new(MockExecutor::new());
        executor.respond_with(ResultValue::network(json!({ "tick": true })));
        let scheduler = Arc::new(IntervalPollScheduler::new(registry.clone()));
        let deps = OperationDeps::new(executor.clone(), scheduler.clone())
            .with_notifier(registry.clone());
        let operation = Operation::new(
            OperationOptions::new("query Clock { now }")
                .with_fetch_policy(FetchPolicy::NetworkOnly)
                .with_fetch_on_subscribe(false),
            deps,
        );
        registry.insert(&operation);
        (executor, scheduler, operation)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_poll_the_operation() {
        let (executor, scheduler, operation) = polling_setup();

        operation.start_polling(Duration::from_millis(100)).unwrap();
        assert!(scheduler.is_scheduled(operation.id()));
        assert_eq!(executor.fetch_count(), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(executor.fetch_count(), 2);
        assert_eq!(operation.lifecycle(), Lifecycle::Polling);

        wait_until(|| operation.latest_result().is_some()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_polling_stops_ticks() {
        let (executor, scheduler, operation) = polling_setup();

        operation.start_polling(Duration::from_millis(100)).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(executor.fetch_count(), 1);

        operation.stop_polling();
        assert!(!scheduler.is_scheduled(operation.id()));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(executor.fetch_count(), 1);
        assert_eq!(operation.lifecycle(), Lifecycle::PollingStopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_task() {
        let (executor, scheduler, operation) = polling_setup();

        operation.start_polling(Duration::from_millis(100)).unwrap();
        operation.start_polling(Duration::from_millis(300)).unwrap();
        assert_eq!(scheduler.scheduled_count(), 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(executor.fetch_count(), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(executor.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ends_when_operation_is_dropped() {
        let (_executor, scheduler, operation) = polling_setup();
        let id = operation.id();

        operation.start_polling(Duration::from_millis(100)).unwrap();
        drop(operation);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!scheduler.is_scheduled(id));
        assert_eq!(scheduler.tracked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_operation_is_not_polled() {
        let registry = Arc::new(OperationRegistry::new());
        let executor = Arc::new(MockExecutor::new());
        executor.respond_with(ResultValue::network(json!({ "tick": true })));
        let scheduler = Arc::new(IntervalPollScheduler::new(registry));
        let operation = Operation::new(
            OperationOptions::new("query Clock { now }")
                .with_fetch_policy(FetchPolicy::NetworkOnly)
                .with_fetch_on_subscribe(false),
            OperationDeps::new(executor.clone(), scheduler.clone()),
        );

        operation.start_polling(Duration::from_millis(100)).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(executor.fetch_count(), 0);
        assert_eq!(scheduler.tracked_count(), 0);
        assert_eq!(operation.lifecycle(), Lifecycle::Polling);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let registry = Arc::new(OperationRegistry::new());
        let scheduler = IntervalPollScheduler::new(registry);
        let id = OperationId::new();
        scheduler.stop_polling(id);
        scheduler.stop_polling(id);
        assert_eq!(scheduler.scheduled_count(), 0);
    }
}
