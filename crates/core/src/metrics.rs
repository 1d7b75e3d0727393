use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight counters for pool behaviour under producer/consumer skew.
///
/// # Example
/// ```rust
/// use lumix_core::metrics::Metrics;
///
/// let metrics = Metrics::default();
/// metrics.hit();
/// metrics.exhausted();
/// assert_eq!(metrics.snapshot().hits, 1);
/// assert_eq!(metrics.snapshot().exhausted, 1);
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    allocations: AtomicU64,
    exhausted: AtomicU64,
}

impl Metrics {
    /// A recycled buffer was reused.
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// No recycled buffer was available.
    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A fresh buffer was allocated.
    pub fn alloc(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// An acquire was refused (capacity reached or allocator failure).
    pub fn exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub allocations: u64,
    pub exhausted: u64,
}
