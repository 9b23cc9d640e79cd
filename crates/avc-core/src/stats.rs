//! Cache statistics counters and the hash-table occupancy dump.
//!
//! Counters are relaxed atomics: they order nothing and exist purely for
//! observability. The occupancy dump walks every bucket from the read
//! side and is therefore a point-in-time approximation under concurrent
//! mutation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event counters for one cache instance.
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    lookups: AtomicU64,
    misses: AtomicU64,
    allocations: AtomicU64,
    reclaims: AtomicU64,
    frees: AtomicU64,
}

impl CacheStats {
    pub(crate) fn inc_lookups(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_misses(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_allocations(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_reclaims(&self) {
        self.reclaims.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_frees(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            reclaims: self.reclaims.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    /// Probe attempts.
    pub lookups: u64,
    /// Probes that found no entry.
    pub misses: u64,
    /// Nodes allocated (linked or not).
    pub allocations: u64,
    /// Nodes unlinked by the evictor.
    pub reclaims: u64,
    /// Nodes released (handed to the reclaimer, or freed immediately when
    /// never linked).
    pub frees: u64,
}

/// Renders the hash-table occupancy dump.
pub(crate) fn format_hash_stats(
    entries: usize,
    slots_used: usize,
    slots_total: usize,
    longest_chain: usize,
) -> String {
    format!("entries: {entries}\nbuckets used: {slots_used}/{slots_total}\nlongest chain: {longest_chain}\n")
}
