use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Documents confirmed written since startup
    pub indexed_total: u64,
    /// Successful flushes
    pub flushes: u64,
    pub failed_flushes: u64,
    pub pending_items: usize,
    pub pending_bytes: usize,
}

#[derive(Debug, Default)]
pub(crate) struct AtomicEngineStats {
    indexed_total: AtomicU64,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
}

impl AtomicEngineStats {
    pub(crate) fn record_flush(&self, items: u64) {
        self.indexed_total.fetch_add(items, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending_items: usize, pending_bytes: usize) -> EngineStats {
        EngineStats {
            indexed_total: self.indexed_total.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            pending_items,
            pending_bytes,
        }
    }
}
