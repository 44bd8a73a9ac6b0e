use std::time::Duration;

use document_sink::BulkAction;
use serde_json::Value;
use sync_core::ContainerNaming;

/// Fixed attribute stamped on every written document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLabel {
    pub name: String,
    pub value: String,
}

/// Batch flush engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum items per flushed batch; reaching it triggers a flush
    pub max_items: usize,
    /// Pending serialized bytes that trigger a flush
    pub max_pending_bytes: Option<usize>,
    /// Maximum serialized size of one bulk request
    pub max_post_bytes: Option<usize>,
    /// Idle time after which queued items are flushed
    pub flush_interval: Duration,
    pub bulk_action: BulkAction,
    pub naming: ContainerNaming,
    pub label: Option<DocumentLabel>,
    /// Mapping applied to containers this engine creates
    pub mapping: Option<Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_items: 500,
            max_pending_bytes: None,
            max_post_bytes: None,
            flush_interval: Duration::from_secs(120),
            bulk_action: BulkAction::default(),
            naming: ContainerNaming {
                prefix: "audit".to_string(),
                append_stream_name: false,
                date_suffix_format: None,
            },
            label: None,
            mapping: None,
        }
    }
}

impl EngineConfig {
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_max_pending_bytes(mut self, bytes: usize) -> Self {
        self.max_pending_bytes = Some(bytes);
        self
    }

    pub fn with_max_post_bytes(mut self, bytes: usize) -> Self {
        self.max_post_bytes = Some(bytes);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_bulk_action(mut self, action: BulkAction) -> Self {
        self.bulk_action = action;
        self
    }

    pub fn with_naming(mut self, naming: ContainerNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.label = Some(DocumentLabel {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_mapping(mut self, mapping: Value) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// Whether a queue of `items` entries and `bytes` pending bytes holds a
    /// full batch.
    pub(crate) fn batch_ready(&self, items: usize, bytes: usize) -> bool {
        items >= self.max_items || self.max_pending_bytes.is_some_and(|limit| bytes >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_items, 500);
        assert_eq!(config.flush_interval, Duration::from_secs(120));
        assert_eq!(config.bulk_action, BulkAction::Index);
        assert!(config.label.is_none());
    }

    #[test]
    fn test_batch_ready() {
        let config = EngineConfig::default().with_max_items(3);
        assert!(!config.batch_ready(2, 1_000_000));
        assert!(config.batch_ready(3, 0));

        let config = config.with_max_pending_bytes(100);
        assert!(config.batch_ready(1, 100));
        assert!(!config.batch_ready(1, 99));
    }
}
