//! Request executor boundary.
//!
//! The executor performs the actual network and/or cache resolution. This
//! crate never does IO itself: it asks the executor for values and decides
//! *when* and *in what order* they reach subscribers.

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::core::OperationId;
use crate::error::OperationError;
use crate::options::OperationOptions;
use crate::result::ResultValue;

/// The asynchronous half of a fetch.
pub type ResultFuture = BoxFuture<'static, ResultValue>;

/// What one fetch produces: a value available right now (typically a cache
/// hit or a loading placeholder) and a value that arrives later.
#[derive(Default)]
pub struct MultiSourceResult {
    pub eager: Option<ResultValue>,
    pub network: Option<ResultFuture>,
}

impl MultiSourceResult {
    pub fn new(eager: Option<ResultValue>, network: Option<ResultFuture>) -> Self {
        Self { eager, network }
    }

    /// Only an eager value (e.g. a `cache-only` hit).
    pub fn eager(value: ResultValue) -> Self {
        Self::new(Some(value), None)
    }

    /// Only an asynchronous value.
    pub fn network(future: ResultFuture) -> Self {
        Self::new(None, Some(future))
    }
}

impl fmt::Debug for MultiSourceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiSourceResult")
            .field("eager", &self.eager)
            .field("has_network", &self.network.is_some())
            .finish()
    }
}

/// Performs fetches on behalf of operations.
///
/// Request failures are reported inside the returned [`ResultValue`], not as
/// `Err`.
///
/// # Example
///
/// ```ignore
/// struct HttpExecutor { client: GraphQLClient, known: DashMap<OperationId, OperationOptions> }
///
/// #[async_trait]
/// impl RequestExecutor for HttpExecutor {
///     fn fetch_as_multi_source(&self, id: OperationId, options: &OperationOptions) -> MultiSourceResult {
///         self.known.insert(id, options.clone());
///         let client = self.client.clone();
///         let options = options.clone();
///         MultiSourceResult::network(Box::pin(async move { client.execute(options).await }))
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait RequestExecutor: Send + Sync + 'static {
    /// Start a fetch for `id` with `options`.
    fn fetch_as_multi_source(&self, id: OperationId, options: &OperationOptions) -> MultiSourceResult;

    /// Re-run the last fetch issued for `id`.
    ///
    /// Fails with [`OperationError::UnknownOperation`] if `id` was never
    /// fetched.
    fn refetch(&self, id: OperationId) -> Result<ResultFuture, OperationError>;

    /// Run a one-shot fetch not tied to any operation. Used for fetch-more
    /// pages.
    async fn query(&self, options: OperationOptions) -> ResultValue;
}
