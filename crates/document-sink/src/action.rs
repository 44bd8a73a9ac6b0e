//! Bulk action verb.
//!
//! Provides the `BulkAction` enum selecting how documents are written.

use serde::{Deserialize, Serialize};

/// Action verb used for each document of a bulk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    /// Write the document, replacing any existing one with the same id
    Index,
    /// Write the document only if its id is not present yet
    ///
    /// The store answers `409` for ids that already exist.
    Create,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Create => "create",
        }
    }
}

impl Default for BulkAction {
    fn default() -> Self {
        // Overwrite keeps re-indexed keys idempotent
        Self::Index
    }
}

impl std::fmt::Display for BulkAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BulkAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "index" => Ok(Self::Index),
            "create" => Ok(Self::Create),
            _ => Err(anyhow::anyhow!(
                "Invalid bulk action: '{s}'. Expected 'index' or 'create'"
            )),
        }
    }
}
