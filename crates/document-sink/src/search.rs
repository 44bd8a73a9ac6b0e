//! Search request and hit shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exact-match restriction on one document attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermFilter {
    pub field: String,
    pub value: Value,
}

/// A sorted, size-limited search over an index pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Index name or wildcard pattern (`audit*`)
    pub index_pattern: String,
    pub sort_field: String,
    pub descending: bool,
    pub size: usize,
    pub filter: Option<TermFilter>,
}

impl SearchRequest {
    /// Most recent document by `sort_field`.
    pub fn latest(index_pattern: impl Into<String>, sort_field: impl Into<String>) -> Self {
        Self {
            index_pattern: index_pattern.into(),
            sort_field: sort_field.into(),
            descending: true,
            size: 1,
            filter: None,
        }
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filter = Some(TermFilter {
            field: field.into(),
            value,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub index: String,
    pub id: String,
    pub source: Value,
}
