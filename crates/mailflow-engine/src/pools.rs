use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use mailflow_core::config::SUMMARY_POOL_SIZE;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

/// Bounds for the single-item pool.
const SINGLE_MIN: usize = 2;
const SINGLE_MAX: usize = 20;
/// Bounds for the batch pool.
const BATCH_MIN: usize = 4;
const BATCH_MAX: usize = 30;

/// Three disjoint worker pools: single-item requests, bulk sweeps, and
/// best-effort summarisation.
///
/// Isolation keeps a long "process all" from starving single-click actions
/// and summaries from eating pipeline capacity. The two dynamic pools grow
/// on demand by swapping in a fresh semaphore — permits already held drain
/// against the old one, and a submission never waits on a resize.
pub struct WorkerPools {
    single: ResizablePool,
    batch: ResizablePool,
    summary: Arc<Semaphore>,
}

struct ResizablePool {
    semaphore: RwLock<Arc<Semaphore>>,
    size: AtomicUsize,
    label: &'static str,
}

impl ResizablePool {
    fn new(label: &'static str, size: usize) -> Self {
        Self {
            semaphore: RwLock::new(Arc::new(Semaphore::new(size))),
            size: AtomicUsize::new(size),
            label,
        }
    }

    fn ensure(&self, desired: usize) {
        let current = self.size.load(Ordering::Acquire);
        if desired <= current {
            return;
        }
        let mut guard = self.semaphore.write().unwrap();
        // Re-check under the lock; another caller may have grown it.
        if desired > self.size.load(Ordering::Acquire) {
            *guard = Arc::new(Semaphore::new(desired));
            self.size.store(desired, Ordering::Release);
            info!(pool = self.label, size = desired, "pool grown");
        }
    }

    fn handle(&self) -> Arc<Semaphore> {
        self.semaphore.read().unwrap().clone()
    }

    fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }
}

impl Default for WorkerPools {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPools {
    pub fn new() -> Self {
        Self {
            single: ResizablePool::new("single", SINGLE_MIN),
            batch: ResizablePool::new("batch", BATCH_MIN),
            summary: Arc::new(Semaphore::new(SUMMARY_POOL_SIZE)),
        }
    }

    /// Grow the single-item pool toward the configured concurrency.
    pub fn ensure_single(&self, configured: usize) {
        self.single.ensure(configured.clamp(SINGLE_MIN, SINGLE_MAX));
    }

    /// Grow the batch pool toward the configured batch size.
    pub fn ensure_batch(&self, configured: usize) {
        self.batch.ensure(configured.clamp(BATCH_MIN, BATCH_MAX));
    }

    pub async fn acquire_single(&self) -> OwnedSemaphorePermit {
        // A closed semaphore is unreachable: pools are never closed.
        self.single.handle().acquire_owned().await.expect("pool closed")
    }

    pub async fn acquire_batch(&self) -> OwnedSemaphorePermit {
        self.batch.handle().acquire_owned().await.expect("pool closed")
    }

    pub async fn acquire_summary(&self) -> OwnedSemaphorePermit {
        self.summary.clone().acquire_owned().await.expect("pool closed")
    }

    pub fn single_size(&self) -> usize {
        self.single.size()
    }

    pub fn batch_size(&self) -> usize {
        self.batch.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_clamped() {
        let pools = WorkerPools::new();
        pools.ensure_single(100);
        assert_eq!(pools.single_size(), SINGLE_MAX);
        pools.ensure_batch(1);
        assert_eq!(pools.batch_size(), BATCH_MIN);
    }

    #[test]
    fn pools_only_grow() {
        let pools = WorkerPools::new();
        pools.ensure_batch(12);
        assert_eq!(pools.batch_size(), 12);
        pools.ensure_batch(6);
        assert_eq!(pools.batch_size(), 12);
    }

    #[tokio::test]
    async fn growth_unblocks_waiting_submissions() {
        let pools = WorkerPools::new();
        // Exhaust the initial single pool.
        let mut held = Vec::new();
        for _ in 0..pools.single_size() {
            held.push(pools.acquire_single().await);
        }
        // Growing swaps in a fresh semaphore; the next acquire succeeds
        // immediately even while the old permits are still held.
        pools.ensure_single(8);
        let extra = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            pools.acquire_single(),
        )
        .await;
        assert!(extra.is_ok(), "acquire should not block after growth");
    }

    #[tokio::test]
    async fn summary_pool_is_fixed_at_fifteen() {
        let pools = WorkerPools::new();
        let mut held = Vec::new();
        for _ in 0..SUMMARY_POOL_SIZE {
            held.push(pools.acquire_summary().await);
        }
        let extra = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            pools.acquire_summary(),
        )
        .await;
        assert!(extra.is_err(), "sixteenth summary task must wait");
    }
}
