//! Per-container single-flight creation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// Containers known to exist, keyed by name.
///
/// Each name maps to a `OnceCell` so concurrent callers share one creation
/// attempt. A failed attempt leaves the cell empty and the next caller
/// retries.
#[derive(Debug, Default)]
pub struct ContainerCache {
    cells: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl ContainerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `create` for `name` unless it already succeeded in this process.
    pub async fn get_or_create<F, Fut>(&self, name: &str, create: F) -> anyhow::Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let cell = self
            .cells
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        cell.get_or_try_init(create).await?;
        Ok(())
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.cells
            .lock()
            .get(name)
            .is_some_and(|cell| cell.initialized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let cache = ContainerCache::new();
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let create = move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        };

        let (a, b, c) = tokio::join!(
            cache.get_or_create("x", create),
            cache.get_or_create("x", create),
            cache.get_or_create("x", create),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(cache.is_known("x"));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = ContainerCache::new();
        let failed = cache
            .get_or_create("x", || async { Err(anyhow::anyhow!("boom")) })
            .await;
        assert!(failed.is_err());
        assert!(!cache.is_known("x"));

        cache.get_or_create("x", || async { Ok(()) }).await.unwrap();
        assert!(cache.is_known("x"));
    }
}
