//! Side-effect callbacks and their registry.
//!
//! A side effect is a caller-supplied action that must observe an
//! operation's result before the operation may fully close (cache writes
//! after a mutation, user callbacks, ...). Each `Operation::on_data` call
//! creates one registration: a tokio task that runs its callback chain on
//! every non-loading result and removes itself after the first concrete one.
//!
//! # Key Properties
//!
//! - **Sequential**: callbacks in a chain run one after another, each awaited
//! - **Self-cancelling**: a registration ends after a concrete result
//! - **Cooperative cancellation**: closing aborts the task and awaits it

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::core::OperationId;
use crate::result::ResultValue;

/// A callback run against qualifying results.
///
/// Errors are logged and do not stop the rest of the chain.
///
/// # Example
///
/// ```ignore
/// struct WriteThrough { cache: Arc<MyCache> }
///
/// #[async_trait]
/// impl OnData for WriteThrough {
///     async fn on_data(&self, result: &ResultValue) -> anyhow::Result<()> {
///         if let Some(data) = result.data() {
///             self.cache.write(data.clone()).await?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait OnData: Send + Sync + 'static {
    async fn on_data(&self, result: &ResultValue) -> Result<()>;
}

#[async_trait]
impl<F, Fut> OnData for F
where
    F: Fn(ResultValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_data(&self, result: &ResultValue) -> Result<()> {
        (self)(result.clone()).await
    }
}

/// Box an async closure as a side-effect callback.
///
/// ```ignore
/// operation.on_data([callback(|result| async move {
///     tracing::info!(data = ?result.data(), "mutation applied");
///     Ok(())
/// })]);
/// ```
pub fn callback<F, Fut>(f: F) -> Arc<dyn OnData>
where
    F: Fn(ResultValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(f)
}

tokio::task_local! {
    /// Set while a registration's chain is running, so that a callback which
    /// closes its own operation does not wait on itself.
    pub(crate) static ACTIVE_REGISTRATION: (OperationId, u64);
}

/// Outstanding registrations of one operation.
#[derive(Debug, Default)]
pub(crate) struct SideEffectRegistry {
    next_id: u64,
    active: HashMap<u64, JoinHandle<()>>,
}

impl SideEffectRegistry {
    pub(crate) fn reserve(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn insert(&mut self, registration: u64, handle: JoinHandle<()>) {
        self.active.insert(registration, handle);
    }

    /// Drops the handle, detaching the task. Returns whether it was present.
    pub(crate) fn remove(&mut self, registration: u64) -> bool {
        self.active.remove(&registration).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<(u64, JoinHandle<()>)> {
        self.active.drain().collect()
    }
}

/// Abort a registration and wait for it to stop.
pub(crate) async fn cancel(operation: OperationId, registration: u64, handle: JoinHandle<()>) {
    let is_current = ACTIVE_REGISTRATION
        .try_with(|active| *active == (operation, registration))
        .unwrap_or(false);
    if is_current {
        // Dropping the handle detaches it; the chain ends when the stream closes.
        return;
    }

    handle.abort();
    if let Err(error) = handle.await {
        if error.is_panic() {
            warn!(
                operation = %operation,
                registration,
                "side-effect registration panicked before cancellation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_closure_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cb = callback({
            let calls = calls.clone();
            move |result: ResultValue| {
                let calls = calls.clone();
                async move {
                    assert!(result.data().is_some());
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        });

        cb.on_data(&ResultValue::network(json!({ "ok": true })))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registry_bookkeeping() {
        let mut registry = SideEffectRegistry::default();
        let first = registry.reserve();
        let second = registry.reserve();
        assert_ne!(first, second);

        registry.insert(first, tokio::spawn(async {}));
        registry.insert(second, tokio::spawn(std::future::pending::<()>()));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(first));
        assert!(!registry.remove(first));

        let operation = OperationId::new();
        for (registration, handle) in registry.drain() {
            cancel(operation, registration, handle).await;
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_task() {
        let handle = tokio::spawn(std::future::pending::<()>());
        let abort = handle.abort_handle();
        cancel(OperationId::new(), 1, handle).await;
        assert!(abort.is_finished());
    }
}
