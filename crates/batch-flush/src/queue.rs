//! Pending queue.
//!
//! Routing metadata and encoded documents are kept in two parallel queues so
//! a batch can be re-inserted without re-encoding. Both must always have the
//! same length.

use std::collections::VecDeque;

use document_sink::BulkOperation;
use sync_core::PendingItem;

#[derive(Debug, Clone)]
pub(crate) struct QueuedDocument {
    pub(crate) operation: BulkOperation,
    pub(crate) encoded_len: usize,
}

impl QueuedDocument {
    pub(crate) fn new(operation: BulkOperation) -> Self {
        let encoded_len = operation.encoded_len();
        Self {
            operation,
            encoded_len,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    items: VecDeque<PendingItem>,
    documents: VecDeque<QueuedDocument>,
    bytes: usize,
}

impl PendingQueue {
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn push_back(&mut self, item: PendingItem, document: QueuedDocument) {
        self.bytes += document.encoded_len;
        self.items.push_back(item);
        self.documents.push_back(document);
    }

    /// Remove up to `limit` entries from the front, in order.
    pub(crate) fn take_front(&mut self, limit: usize) -> (Vec<PendingItem>, Vec<QueuedDocument>) {
        let n = limit.min(self.items.len());
        let items: Vec<PendingItem> = self.items.drain(..n).collect();
        let n = limit.min(self.documents.len());
        let documents: Vec<QueuedDocument> = self.documents.drain(..n).collect();
        self.bytes -= documents.iter().map(|d| d.encoded_len).sum::<usize>();
        (items, documents)
    }

    /// Put a removed batch back at the front, keeping its order.
    pub(crate) fn restore_front(&mut self, items: Vec<PendingItem>, documents: Vec<QueuedDocument>) {
        self.bytes += documents.iter().map(|d| d.encoded_len).sum::<usize>();
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
        for document in documents.into_iter().rev() {
            self.documents.push_front(document);
        }
    }

    pub(crate) fn keys(&self) -> Vec<i64> {
        self.items.iter().map(|item| item.document_id).collect()
    }

    /// `Err((items, documents))` when the two queues disagree in length.
    pub(crate) fn check_aligned(&self) -> Result<(), (usize, usize)> {
        if self.items.len() == self.documents.len() {
            Ok(())
        } else {
            Err((self.items.len(), self.documents.len()))
        }
    }
}

/// Split encoded lengths into consecutive ranges whose bulk body stays under
/// `max_bytes`. An item larger than the limit on its own gets a range of one.
pub(crate) fn split_by_post_bytes(
    lengths: &[usize],
    max_bytes: Option<usize>,
) -> Vec<std::ops::Range<usize>> {
    let Some(max_bytes) = max_bytes else {
        return if lengths.is_empty() {
            Vec::new()
        } else {
            vec![0..lengths.len()]
        };
    };

    let mut ranges = Vec::new();
    let mut start = 0;
    let mut size = 0;
    for (i, len) in lengths.iter().enumerate() {
        if i > start && size + len > max_bytes {
            ranges.push(start..i);
            start = i;
            size = 0;
        }
        size += len;
    }
    if start < lengths.len() {
        ranges.push(start..lengths.len());
    }
    ranges
}
