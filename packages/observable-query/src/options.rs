//! Operation options and fetch-more options.
//!
//! [`OperationOptions`] is owned by its operation and only mutated through the
//! operation's own setters (`set_variables`, `start_polling`,
//! `stop_polling`). Anything reading them from outside gets a clone.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OperationError;

/// GraphQL variables, keyed by name.
pub type Variables = serde_json::Map<String, Value>;

/// Whether a fetch consults the cache, the network, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Answer from cache when possible, otherwise hit the network.
    CacheFirst,
    /// Answer from cache, then refresh from the network.
    #[default]
    CacheAndNetwork,
    /// Always hit the network, write the answer to the cache.
    NetworkOnly,
    /// Never hit the network.
    CacheOnly,
    /// Always hit the network, never touch the cache.
    NoCache,
}

impl FetchPolicy {
    /// Every policy, in declaration order.
    pub const ALL: [FetchPolicy; 5] = [
        FetchPolicy::CacheFirst,
        FetchPolicy::CacheAndNetwork,
        FetchPolicy::NetworkOnly,
        FetchPolicy::CacheOnly,
        FetchPolicy::NoCache,
    ];

    /// Canonical kebab-case spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchPolicy::CacheFirst => "cache-first",
            FetchPolicy::CacheAndNetwork => "cache-and-network",
            FetchPolicy::NetworkOnly => "network-only",
            FetchPolicy::CacheOnly => "cache-only",
            FetchPolicy::NoCache => "no-cache",
        }
    }

    /// Polling only makes sense for policies that reach the network on
    /// every fetch.
    pub fn supports_polling(&self) -> bool {
        !matches!(self, FetchPolicy::CacheFirst | FetchPolicy::CacheOnly)
    }
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchPolicy {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FetchPolicy::ALL
            .into_iter()
            .find(|policy| policy.as_str() == s)
            .ok_or_else(|| OperationError::configuration(format!("unknown fetch policy '{s}'")))
    }
}

/// Configuration for one observable operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOptions {
    /// GraphQL document text.
    pub document: String,
    /// Operation to run when the document holds several.
    pub operation_name: Option<String>,
    /// Variables sent with every fetch.
    pub variables: Variables,
    /// Cache/network policy.
    pub fetch_policy: FetchPolicy,
    /// Re-fetch period while polling. Zero is treated as unset.
    pub poll_interval: Option<Duration>,
    /// Fetch as soon as the operation is created.
    pub eagerly_fetch: bool,
    /// Fetch when the first subscriber attaches (ignored after an eager fetch).
    pub fetch_on_subscribe: bool,
}

impl OperationOptions {
    /// Options for `document` with default policy and no variables.
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            operation_name: None,
            variables: Variables::new(),
            fetch_policy: FetchPolicy::default(),
            poll_interval: None,
            eagerly_fetch: false,
            fetch_on_subscribe: true,
        }
    }

    /// Set the operation name.
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Replace all variables.
    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    /// Set a single variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Set the fetch policy.
    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    /// Set the poll interval. Polling starts on the next fetch.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Fetch as soon as the operation is created.
    pub fn with_eager_fetch(mut self, eager: bool) -> Self {
        self.eagerly_fetch = eager;
        self
    }

    /// Fetch when the first subscriber attaches.
    pub fn with_fetch_on_subscribe(mut self, fetch: bool) -> Self {
        self.fetch_on_subscribe = fetch;
        self
    }

    /// The poll interval, if it is set and positive.
    pub fn active_poll_interval(&self) -> Option<Duration> {
        self.poll_interval.filter(|interval| !interval.is_zero())
    }
}

/// Combines the previous payload with a freshly fetched page.
///
/// Called as `update_query(previous, fetched)`; the return value becomes the
/// payload of the merged result.
pub type UpdateQuery = Arc<dyn Fn(Option<&Value>, Option<&Value>) -> Option<Value> + Send + Sync>;

/// Arguments for `Operation::fetch_more`.
#[derive(Clone, Default)]
pub struct FetchMoreOptions {
    /// Replacement document for the page query; the original is used if unset.
    pub document: Option<String>,
    /// Variables overlaid on the original operation's variables.
    pub variables: Variables,
    /// Merge function. Required.
    pub update_query: Option<UpdateQuery>,
}

impl FetchMoreOptions {
    /// Fetch-more options with the given merge function.
    pub fn new<F>(update_query: F) -> Self
    where
        F: Fn(Option<&Value>, Option<&Value>) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            document: None,
            variables: Variables::new(),
            update_query: Some(Arc::new(update_query)),
        }
    }

    /// Use a different document for the page query.
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// Set a single page variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

impl fmt::Debug for FetchMoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchMoreOptions")
            .field("document", &self.document)
            .field("variables", &self.variables)
            .field("has_update_query", &self.update_query.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_polling_support_by_policy() {
        assert!(!FetchPolicy::CacheOnly.supports_polling());
        assert!(!FetchPolicy::CacheFirst.supports_polling());
        assert!(FetchPolicy::NetworkOnly.supports_polling());
        assert!(FetchPolicy::CacheAndNetwork.supports_polling());
        assert!(FetchPolicy::NoCache.supports_polling());
    }

    #[test]
    fn test_fetch_policy_parse() {
        for policy in FetchPolicy::ALL {
            assert_eq!(policy.as_str().parse::<FetchPolicy>(), Ok(policy));
        }
        assert!(matches!(
            "cacheOnly".parse::<FetchPolicy>(),
            Err(OperationError::Configuration { .. })
        ));
    }

    #[test]
    fn test_builder_defaults() {
        let options = OperationOptions::new("query Q { q }");
        assert_eq!(options.fetch_policy, FetchPolicy::CacheAndNetwork);
        assert!(options.fetch_on_subscribe);
        assert!(!options.eagerly_fetch);
        assert!(options.variables.is_empty());
        assert_eq!(options.active_poll_interval(), None);
    }

    #[test]
    fn test_zero_poll_interval_is_inactive() {
        let options = OperationOptions::new("query Q { q }").with_poll_interval(Duration::ZERO);
        assert_eq!(options.active_poll_interval(), None);

        let options = options.with_poll_interval(Duration::from_millis(500));
        assert_eq!(options.active_poll_interval(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_variables() {
        let options = OperationOptions::new("query Q($id: ID!) { q(id: $id) }")
            .with_variable("id", "42")
            .with_variable("limit", 10);
        assert_eq!(options.variables.get("id"), Some(&json!("42")));
        assert_eq!(options.variables.get("limit"), Some(&json!(10)));
    }

    #[test]
    fn test_fetch_more_debug_hides_closure() {
        let options = FetchMoreOptions::new(|_, next| next.cloned()).with_variable("page", 2);
        let debug = format!("{options:?}");
        assert!(debug.contains("has_update_query: true"));
        assert!(FetchMoreOptions::default().update_query.is_none());
    }
}
