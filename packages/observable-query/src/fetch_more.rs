//! Fetch-more: load another page and merge it into the existing payload.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::core::OperationId;
use crate::executor::RequestExecutor;
use crate::options::{FetchMoreOptions, OperationOptions};
use crate::result::{OperationException, ResultValue};

/// Everything a [`FetchMore`] implementation gets to work with.
pub struct FetchMoreRequest {
    pub operation: OperationId,
    pub fetch_more: FetchMoreOptions,
    pub original: OperationOptions,
    pub executor: Arc<dyn RequestExecutor>,
    pub previous: Option<ResultValue>,
}

/// Fetches an additional page and combines it with the previous result.
///
/// The returned value is fed back through the operation's ordering gate.
#[async_trait]
pub trait FetchMore: Send + Sync + 'static {
    async fn fetch_more(&self, request: FetchMoreRequest) -> ResultValue;
}

/// Default merger: one-shot query with overlaid variables, then
/// `update_query(previous, fetched)`.
///
/// When the page comes back with errors the previous payload is kept and the
/// errors are coalesced onto it, so a failing page never blanks existing
/// data.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeFetchMore;

#[async_trait]
impl FetchMore for MergeFetchMore {
    async fn fetch_more(&self, request: FetchMoreRequest) -> ResultValue {
        let FetchMoreRequest {
            operation,
            fetch_more,
            original,
            executor,
            previous,
        } = request;

        let mut combined = original;
        combined.variables.extend(fetch_more.variables);
        if let Some(document) = fetch_more.document {
            combined.document = document;
        }

        let fetched = executor.query(combined).await;
        let previous_data = previous.as_ref().and_then(ResultValue::data);

        if fetched.has_exception() {
            debug!(operation = %operation, "fetch-more page failed, keeping previous data");
            let exception = OperationException::coalesce(
                previous.as_ref().and_then(ResultValue::exception),
                fetched.exception(),
            );
            let mut kept = ResultValue::new(previous_data.cloned());
            if let Some(exception) = exception {
                kept = kept.with_exception(exception);
            }
            if let Some(origin) = previous.as_ref().and_then(ResultValue::origin) {
                kept = kept.with_origin(origin);
            }
            return kept;
        }

        let merged = match &fetch_more.update_query {
            Some(update_query) => update_query(previous_data, fetched.data()),
            None => fetched.data().cloned(),
        };
        // Stamped now so it is not older than the loading placeholder.
        fetched.with_data(merged).with_timestamp(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{GraphQLError, ResultOrigin};
    use crate::testing::MockExecutor;
    use serde_json::{json, Value};

    fn append_items(previous: Option<&Value>, fetched: Option<&Value>) -> Option<Value> {
        let mut items = previous
            .and_then(|p| p["items"].as_array().cloned())
            .unwrap_or_default();
        items.extend(
            fetched
                .and_then(|f| f["items"].as_array().cloned())
                .unwrap_or_default(),
        );
        Some(json!({ "items": items }))
    }

    #[tokio::test]
    async fn test_merges_page_into_previous_data() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_query_response(ResultValue::network(json!({ "items": [3, 4] })));

        let original = OperationOptions::new("query Items($page: Int) { items }")
            .with_variable("page", 1)
            .with_variable("limit", 2);
        let request = FetchMoreRequest {
            operation: OperationId::new(),
            fetch_more: FetchMoreOptions::new(append_items).with_variable("page", 2),
            original,
            executor: executor.clone(),
            previous: Some(ResultValue::network(json!({ "items": [1, 2] }))),
        };

        let merged = MergeFetchMore.fetch_more(request).await;
        assert_eq!(merged.data(), Some(&json!({ "items": [1, 2, 3, 4] })));
        assert_eq!(merged.origin(), Some(ResultOrigin::Network));

        let queries = executor.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].variables.get("page"), Some(&json!(2)));
        assert_eq!(queries[0].variables.get("limit"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_document_override() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_query_response(ResultValue::network(json!({ "items": [] })));

        let request = FetchMoreRequest {
            operation: OperationId::new(),
            fetch_more: FetchMoreOptions::new(append_items).with_document("query Next { items }"),
            original: OperationOptions::new("query First { items }"),
            executor: executor.clone(),
            previous: None,
        };

        MergeFetchMore.fetch_more(request).await;
        assert_eq!(executor.queries()[0].document, "query Next { items }");
    }

    #[tokio::test]
    async fn test_failed_page_keeps_previous_data_and_coalesces_errors() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_query_response(ResultValue::failed(OperationException::graphql(vec![
            GraphQLError::new("page out of range"),
        ])));

        let previous = ResultValue::cache(json!({ "items": [1] })).with_exception(
            OperationException::graphql(vec![GraphQLError::new("partial data")]),
        );
        let request = FetchMoreRequest {
            operation: OperationId::new(),
            fetch_more: FetchMoreOptions::new(append_items),
            original: OperationOptions::new("query Items { items }"),
            executor,
            previous: Some(previous),
        };

        let kept = MergeFetchMore.fetch_more(request).await;
        assert_eq!(kept.data(), Some(&json!({ "items": [1] })));
        assert_eq!(kept.origin(), Some(ResultOrigin::Cache));
        let messages: Vec<_> = kept
            .exception()
            .unwrap()
            .graphql_errors
            .iter()
            .map(|e| e.message.clone())
            .collect();
        assert_eq!(messages, vec!["partial data", "page out of range"]);
    }
}
