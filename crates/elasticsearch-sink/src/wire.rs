//! Request bodies and response parsing for the Elasticsearch REST API.

use document_sink::{BulkItemResult, BulkOperation, BulkResponse, SearchHit, SearchRequest};
use serde_json::{json, Value};

use crate::error::ElasticsearchError;

/// Newline-delimited bulk body: one action line and one source line per
/// operation.
pub(crate) fn bulk_body(operations: &[BulkOperation]) -> Vec<String> {
    let mut lines = Vec::with_capacity(operations.len() * 2);
    for op in operations {
        lines.push(op.action_line());
        lines.push(op.source.clone());
    }
    lines
}

pub(crate) fn parse_bulk_response(body: &Value) -> Result<BulkResponse, ElasticsearchError> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| ElasticsearchError::Response {
            operation: "bulk",
            reason: "missing 'items' array".to_string(),
        })?;

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        // Each item is keyed by its action verb: {"index": {...}}
        let Some((_, result)) = item.as_object().and_then(|o| o.iter().next()) else {
            return Err(ElasticsearchError::Response {
                operation: "bulk",
                reason: format!("malformed item {item}"),
            });
        };
        let status = result
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(0);
        results.push(BulkItemResult {
            index: string_field(result, "_index"),
            id: string_field(result, "_id"),
            status,
            error: result.get("error").map(describe_error),
        });
    }

    Ok(BulkResponse {
        errors: body.get("errors").and_then(Value::as_bool).unwrap_or(false)
            || results.iter().any(BulkItemResult::is_failure),
        items: results,
    })
}

pub(crate) fn search_body(request: &SearchRequest) -> Value {
    let order = if request.descending { "desc" } else { "asc" };
    let query = match &request.filter {
        Some(filter) => json!({
            "bool": { "filter": [ { "term": { filter.field.as_str(): filter.value } } ] }
        }),
        None => json!({ "match_all": {} }),
    };
    json!({
        "size": request.size,
        "query": query,
        "sort": [
            { request.sort_field.as_str(): { "order": order, "unmapped_type": "date" } }
        ]
    })
}

pub(crate) fn parse_search_hits(body: &Value) -> Result<Vec<SearchHit>, ElasticsearchError> {
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| ElasticsearchError::Response {
            operation: "search",
            reason: "missing 'hits.hits' array".to_string(),
        })?;

    Ok(hits
        .iter()
        .map(|hit| SearchHit {
            index: string_field(hit, "_index"),
            id: string_field(hit, "_id"),
            source: hit.get("_source").cloned().unwrap_or(Value::Null),
        })
        .collect())
}

fn string_field(value: &Value, field: &str) -> String {
    match value.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn describe_error(error: &Value) -> String {
    match (
        error.get("type").and_then(Value::as_str),
        error.get("reason").and_then(Value::as_str),
    ) {
        (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
        (Some(kind), None) => kind.to_string(),
        _ => error.to_string(),
    }
}
