//! # Observable Query
//!
//! Client-side state machine for one live GraphQL operation: a lifecycle,
//! a multicast result stream, timestamp ordering, side effects that hold
//! back teardown, and polling.
//!
//! ## Core Concepts
//!
//! An [`Operation`] does no IO. It asks a [`RequestExecutor`] for results and
//! decides *when* and *in what order* they reach subscribers:
//! - [`ResultValue`] = one observed state (payload, errors, flags, timestamp)
//! - [`Lifecycle`] = which actions are currently legal
//!
//! ## Architecture
//!
//! ```text
//! OperationManager ── watch() ──► Operation ◄── poll() ── IntervalPollScheduler
//!        │                            │
//!        │ deliver()/rebroadcast()    ├─► RequestExecutor.fetch_as_multi_source()
//!        │                            │        │
//!        └──────────────────────────► │        ▼ eager + network
//!                                     │   add_result() ─► ordering gate
//!                                     │                        │
//!                                     │                        ▼
//!                                     │                  ResultStream ─► subscribers
//!                                     │                        │
//!                                     │                        └─► on_data registrations
//!                                     ▼
//!                                  close() ─► CloseNotifier
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Monotonic results** - A result older than the latest accepted one is dropped
//! 2. **Closed is final** - The stream closes once, after the lifecycle reaches `Closed`
//! 3. **Guarded transitions** - The lifecycle only moves along legal edges
//! 4. **Side effects hold teardown** - A non-forced close waits for pending registrations
//! 5. **Safe refetch** - Refetch only from `Completed`, `Polling` or `PollingStopped`
//!
//! ## Example
//!
//! ```ignore
//! use observable_query::{ManagerConfig, OperationManager, callback};
//!
//! let manager = OperationManager::new(Arc::new(HttpExecutor::new(client)), ManagerConfig::from_env()?);
//!
//! // Queries: subscribe and render
//! let posts = manager.watch(manager.options("query Posts { posts { id title } }"));
//! let mut results = posts.subscribe();
//!
//! // Mutations: keep the operation alive until the cache is updated
//! let create = manager.watch(manager.options(CREATE_POST).with_fetch_on_subscribe(false));
//! create.on_data([callback(move |result| async move {
//!     cache.write(result.data()).await
//! })]);
//! create.fetch_results();
//! create.close(false, false).await;  // SideEffectsBlocking until the write lands
//! ```

mod config;
mod core;
mod error;
mod executor;
mod fetch_more;
mod lifecycle;
mod manager;
mod operation;
mod options;
mod poll;
mod result;
mod side_effect;
mod stream;

// Testing utilities (available with "testing" feature)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Identity
pub use crate::core::OperationId;

// Errors
pub use crate::error::OperationError;

// Lifecycle
pub use lifecycle::{Lifecycle, ParseLifecycleError};

// Options
pub use options::{FetchMoreOptions, FetchPolicy, OperationOptions, UpdateQuery, Variables};

// Results
pub use result::{GraphQLError, GraphQLErrorLocation, OperationException, ResultOrigin, ResultValue};
pub use stream::ResultSubscription;

// Collaborators
pub use executor::{MultiSourceResult, RequestExecutor, ResultFuture};
pub use fetch_more::{FetchMore, FetchMoreRequest, MergeFetchMore};
pub use poll::{IntervalPollScheduler, PollScheduler};
pub use side_effect::{callback, OnData};

// Operation
pub use operation::{FetchResults, Operation, OperationDeps, PendingResult, WeakOperation};

// Manager
pub use config::ManagerConfig;
pub use manager::{CloseNotifier, OperationManager, OperationRegistry};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
