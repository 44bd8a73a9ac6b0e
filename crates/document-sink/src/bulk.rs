//! Bulk request and response shapes.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::action::BulkAction;

/// One document write inside a bulk request.
///
/// The source is kept pre-serialized so its size is known when the queue
/// accounts bytes and when a batch is split to fit a maximum request size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOperation {
    pub action: BulkAction,
    pub index: String,
    pub id: String,
    pub source: String,
}

impl BulkOperation {
    pub fn new(
        action: BulkAction,
        index: impl Into<String>,
        id: impl ToString,
        source: impl Into<String>,
    ) -> Self {
        Self {
            action,
            index: index.into(),
            id: id.to_string(),
            source: source.into(),
        }
    }

    /// The action/metadata line preceding the source line.
    pub fn action_line(&self) -> String {
        json!({ self.action.as_str(): { "_index": self.index, "_id": self.id } }).to_string()
    }

    /// Bytes this operation adds to a newline-delimited bulk body.
    pub fn encoded_len(&self) -> usize {
        self.action_line().len() + self.source.len() + 2
    }
}

/// Outcome of one operation in a bulk response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub index: String,
    pub id: String,
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItemResult {
    pub fn ok(index: impl Into<String>, id: impl Into<String>, status: u16) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
            status,
            error: None,
        }
    }

    pub fn failed(
        index: impl Into<String>,
        id: impl Into<String>,
        status: u16,
        error: impl Into<String>,
    ) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.status >= 300
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }
}

/// Response of a bulk request that reached the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResponse {
    /// Store-reported flag: at least one item failed
    pub errors: bool,
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    pub fn from_items(items: Vec<BulkItemResult>) -> Self {
        Self {
            errors: items.iter().any(BulkItemResult::is_failure),
            items,
        }
    }

    /// Items that did not end up in the store.
    ///
    /// With [`BulkAction::Create`] a conflict means the document already
    /// exists, which is the idempotent outcome, so conflicts are not counted.
    pub fn failures(&self, action: BulkAction) -> Vec<&BulkItemResult> {
        if !self.errors {
            return Vec::new();
        }
        self.items
            .iter()
            .filter(|item| item.is_failure())
            .filter(|item| !(action == BulkAction::Create && item.is_conflict()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_line() {
        let op = BulkOperation::new(BulkAction::Create, "audit-users", 42, r#"{"a":1}"#);
        let line: serde_json::Value = serde_json::from_str(&op.action_line()).unwrap();
        assert_eq!(line["create"]["_index"], "audit-users");
        assert_eq!(line["create"]["_id"], "42");
    }

    #[test]
    fn test_encoded_len_counts_both_lines_and_newlines() {
        let op = BulkOperation::new(BulkAction::Index, "i", 1, "{}");
        assert_eq!(op.encoded_len(), op.action_line().len() + 2 + 2);
    }

    #[test]
    fn test_conflicts_are_tolerated_for_create() {
        let response = BulkResponse::from_items(vec![
            BulkItemResult::ok("i", "1", 201),
            BulkItemResult::failed("i", "2", 409, "version_conflict_engine_exception"),
        ]);
        assert!(response.errors);
        assert!(response.failures(BulkAction::Create).is_empty());
        assert_eq!(response.failures(BulkAction::Index).len(), 1);
    }

    #[test]
    fn test_failures_on_item_errors() {
        let response = BulkResponse::from_items(vec![
            BulkItemResult::ok("i", "1", 201),
            BulkItemResult::failed("i", "2", 400, "mapper_parsing_exception"),
        ]);
        let failures = response.failures(BulkAction::Create);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "2");
    }

    #[test]
    fn test_no_failures_when_clean() {
        let response = BulkResponse::from_items(vec![BulkItemResult::ok("i", "1", 200)]);
        assert!(!response.errors);
        assert!(response.failures(BulkAction::Index).is_empty());
    }
}
