//! Result values observed over an operation's lifetime.
//!
//! A [`ResultValue`] is an immutable snapshot: payload, error, loading and
//! optimistic flags, a timestamp and an origin tag. Timestamps drive the
//! ordering gate in `Operation::add_result`: a value older than the latest
//! accepted one is dropped.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultOrigin {
    /// Resolved from the client cache.
    Cache,
    /// Resolved from the network.
    Network,
}

/// Source location of a GraphQL error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQLErrorLocation {
    pub line: i32,
    pub column: i32,
}

/// One entry of a GraphQL response's `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<GraphQLErrorLocation>>,
    /// Path segments are field names or list indices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
}

impl GraphQLError {
    /// An error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: None,
            path: None,
        }
    }
}

/// Errors attached to a result: GraphQL errors from the response and/or a
/// link (transport) failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationException {
    #[serde(default)]
    pub graphql_errors: Vec<GraphQLError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_error: Option<String>,
}

impl OperationException {
    /// An exception carrying GraphQL errors.
    pub fn graphql(errors: Vec<GraphQLError>) -> Self {
        Self {
            graphql_errors: errors,
            link_error: None,
        }
    }

    /// An exception carrying a link failure.
    pub fn link(message: impl Into<String>) -> Self {
        Self {
            graphql_errors: Vec::new(),
            link_error: Some(message.into()),
        }
    }

    /// True when there is nothing to report.
    pub fn is_empty(&self) -> bool {
        self.graphql_errors.is_empty() && self.link_error.is_none()
    }

    /// Merge two exceptions: GraphQL errors are concatenated (earlier
    /// first), the newer link error wins. Returns `None` when both are empty.
    pub fn coalesce(
        earlier: Option<&OperationException>,
        later: Option<&OperationException>,
    ) -> Option<OperationException> {
        let mut merged = OperationException::default();
        for exception in [earlier, later].into_iter().flatten() {
            merged
                .graphql_errors
                .extend(exception.graphql_errors.iter().cloned());
            if exception.link_error.is_some() {
                merged.link_error = exception.link_error.clone();
            }
        }
        (!merged.is_empty()).then_some(merged)
    }
}

impl fmt::Display for OperationException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(link) = &self.link_error {
            parts.push(format!("link error: {link}"));
        }
        if let Some(first) = self.graphql_errors.first() {
            parts.push(format!(
                "{} graphql error(s), first: {}",
                self.graphql_errors.len(),
                first.message
            ));
        }
        if parts.is_empty() {
            f.write_str("no errors")
        } else {
            f.write_str(&parts.join("; "))
        }
    }
}

impl std::error::Error for OperationException {}

/// One observed state of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultValue {
    data: Option<Value>,
    exception: Option<OperationException>,
    loading: bool,
    optimistic: bool,
    timestamp: DateTime<Utc>,
    origin: Option<ResultOrigin>,
}

impl ResultValue {
    /// A settled value with no origin tag, stamped now.
    pub fn new(data: Option<Value>) -> Self {
        Self {
            data,
            exception: None,
            loading: false,
            optimistic: false,
            timestamp: Utc::now(),
            origin: None,
        }
    }

    /// A loading placeholder that keeps showing `data` while a fetch runs.
    pub fn loading(data: Option<Value>) -> Self {
        Self {
            loading: true,
            ..Self::new(data)
        }
    }

    /// A provisional value assumed before the server confirms it.
    pub fn optimistic(data: Value) -> Self {
        Self {
            optimistic: true,
            ..Self::new(Some(data))
        }
    }

    /// A value resolved from the network.
    pub fn network(data: Value) -> Self {
        Self::new(Some(data)).with_origin(ResultOrigin::Network)
    }

    /// A value resolved from the cache.
    pub fn cache(data: Value) -> Self {
        Self::new(Some(data)).with_origin(ResultOrigin::Cache)
    }

    /// A failed value with no payload.
    pub fn failed(exception: OperationException) -> Self {
        Self::new(None).with_exception(exception)
    }

    /// Tag the origin.
    pub fn with_origin(mut self, origin: ResultOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Attach errors.
    pub fn with_exception(mut self, exception: OperationException) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Replace the payload.
    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.data = data;
        self
    }

    /// Override the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn exception(&self) -> Option<&OperationException> {
        self.exception.as_ref()
    }

    pub fn has_exception(&self) -> bool {
        self.exception.as_ref().is_some_and(|e| !e.is_empty())
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    /// A settled answer: neither a loading placeholder nor optimistic.
    pub fn is_concrete(&self) -> bool {
        !self.loading && !self.optimistic
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn origin(&self) -> Option<ResultOrigin> {
        self.origin
    }

    pub(crate) fn inherit_origin(&mut self, origin: Option<ResultOrigin>) {
        if self.origin.is_none() {
            self.origin = origin;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_concrete_flags() {
        assert!(ResultValue::network(json!({})).is_concrete());
        assert!(ResultValue::cache(json!({})).is_concrete());
        assert!(!ResultValue::loading(None).is_concrete());
        assert!(!ResultValue::optimistic(json!({})).is_concrete());
        assert!(ResultValue::failed(OperationException::link("offline")).is_concrete());
    }

    #[test]
    fn test_inherit_origin_only_when_unset() {
        let mut value = ResultValue::new(None);
        value.inherit_origin(Some(ResultOrigin::Cache));
        assert_eq!(value.origin(), Some(ResultOrigin::Cache));

        let mut value = ResultValue::network(json!(1));
        value.inherit_origin(Some(ResultOrigin::Cache));
        assert_eq!(value.origin(), Some(ResultOrigin::Network));
    }

    #[test]
    fn test_coalesce_concatenates_errors() {
        let earlier = OperationException::graphql(vec![GraphQLError::new("first")]);
        let later = OperationException {
            graphql_errors: vec![GraphQLError::new("second")],
            link_error: Some("timeout".into()),
        };

        let merged = OperationException::coalesce(Some(&earlier), Some(&later)).unwrap();
        let messages: Vec<_> = merged.graphql_errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(merged.link_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_coalesce_empty_is_none() {
        assert_eq!(OperationException::coalesce(None, None), None);
        let empty = OperationException::default();
        assert_eq!(OperationException::coalesce(Some(&empty), None), None);
    }

    #[test]
    fn test_graphql_error_deserializes_response_shape() {
        let error: GraphQLError = serde_json::from_value(json!({
            "message": "Cannot query field",
            "locations": [{ "line": 2, "column": 3 }],
            "path": ["posts", 0, "title"]
        }))
        .unwrap();
        assert_eq!(error.message, "Cannot query field");
        assert_eq!(error.locations.unwrap()[0].column, 3);
        assert_eq!(error.path.unwrap().len(), 3);
    }

    #[test]
    fn test_exception_display() {
        let exception = OperationException {
            graphql_errors: vec![GraphQLError::new("boom")],
            link_error: Some("reset".into()),
        };
        assert_eq!(
            exception.to_string(),
            "link error: reset; 1 graphql error(s), first: boom"
        );
    }
}
