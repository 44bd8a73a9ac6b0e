//! Pending items, batches and deletion jobs.

use crate::event::ChangeEvent;

/// A change event routed to its destination container.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    /// Destination container the document is written to
    pub container: String,
    /// Document identity, always the source primary key
    pub document_id: i64,
    pub event: ChangeEvent,
}

impl PendingItem {
    pub fn new(container: String, event: ChangeEvent) -> Self {
        Self {
            container,
            document_id: event.primary_key(),
            event,
        }
    }
}

/// Ordered slice of pending items written (and confirmed) together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    items: Vec<PendingItem>,
}

impl Batch {
    pub fn new(items: Vec<PendingItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[PendingItem] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingItem> {
        self.items.iter()
    }

    /// Primary keys in batch order.
    pub fn keys(&self) -> Vec<i64> {
        self.items.iter().map(|item| item.document_id).collect()
    }

    /// Distinct containers in order of first appearance.
    pub fn containers(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for item in &self.items {
            if !seen.iter().any(|c| c == &item.container) {
                seen.push(item.container.clone());
            }
        }
        seen
    }

    pub fn into_items(self) -> Vec<PendingItem> {
        self.items
    }
}

impl From<Vec<PendingItem>> for Batch {
    fn from(items: Vec<PendingItem>) -> Self {
        Self::new(items)
    }
}

/// Source rows to delete once they are confirmed indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionJob {
    /// Exactly these keys
    Keys(Vec<i64>),
    /// Every key in `(low_exclusive, high_inclusive]`; no lower bound when
    /// the previous watermark was unknown
    Range {
        low_exclusive: Option<i64>,
        high_inclusive: i64,
    },
}

impl DeletionJob {
    /// Range job for a drained backlog, or `None` when the scan saw no rows
    /// above the previous watermark.
    pub fn for_drained_backlog(previous: Option<i64>, scanned_max: Option<i64>) -> Option<Self> {
        let high_inclusive = scanned_max?;
        if previous.is_some_and(|low| high_inclusive <= low) {
            return None;
        }
        Some(Self::Range {
            low_exclusive: previous,
            high_inclusive,
        })
    }
}
