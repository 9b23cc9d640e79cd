//! The bounded, hash-bucketed, concurrent decision cache.
//!
//! Readers never lock: lookup traverses a bucket chain inside an epoch
//! reader section ([`crossbeam_epoch::pin`]) and the nodes it returns
//! stay readable until the section ends. Writers serialise per bucket on
//! a small mutex held only across linked-list surgery. Linked nodes are
//! immutable; every update clones, modifies, and replaces, handing the
//! old node to the epoch reclaimer so no reader ever observes freed
//! memory.
//!
//! Size is bounded approximately: when the node count passes the
//! configured threshold, an eviction pass walks buckets from a rotating
//! hint, skipping contended locks, and unlinks up to a fixed batch.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::AvcError;
use crate::operation::OperationNode;
use crate::stats::CacheStats;
use crate::types::{AvDecision, ObjectClass, SecurityId};

/// Number of hash buckets. Must be a power of two.
pub(crate) const CACHE_SLOTS: usize = 512;

/// Default node-count threshold above which eviction runs.
pub const DEFAULT_CACHE_THRESHOLD: usize = 512;

/// Maximum nodes unlinked by one eviction pass.
pub(crate) const RECLAIM_BATCH: usize = 16;

/// One cache entry. Lives in exactly one bucket chain at a time and is
/// never mutated while linked; `next` is only written under the owning
/// bucket's lock.
pub(crate) struct AvcNode {
    pub(crate) ssid: SecurityId,
    pub(crate) tsid: SecurityId,
    pub(crate) tclass: ObjectClass,
    pub(crate) avd: AvDecision,
    pub(crate) ops: Option<Box<OperationNode>>,
    next: Atomic<AvcNode>,
}

impl AvcNode {
    fn new(ssid: SecurityId, tsid: SecurityId, tclass: ObjectClass) -> Self {
        Self {
            ssid,
            tsid,
            tclass,
            avd: AvDecision::default(),
            ops: None,
            next: Atomic::null(),
        }
    }

    pub(crate) fn matches_key(&self, ssid: SecurityId, tsid: SecurityId, tclass: ObjectClass) -> bool {
        self.ssid == ssid && self.tclass == tclass && self.tsid == tsid
    }
}

struct Bucket {
    head: Atomic<AvcNode>,
    lock: Mutex<()>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            head: Atomic::null(),
            lock: Mutex::new(()),
        }
    }
}

/// The cache proper: the bucket table, its counters, and the latest
/// observed policy sequence number.
pub(crate) struct AvcCache {
    slots: Box<[Bucket]>,
    active_nodes: AtomicUsize,
    lru_hint: AtomicUsize,
    latest_seqno: Mutex<u32>,
    cache_threshold: usize,
    pub(crate) stats: CacheStats,
}

impl AvcCache {
    pub(crate) fn new(cache_threshold: usize) -> Self {
        Self {
            slots: (0..CACHE_SLOTS).map(|_| Bucket::new()).collect(),
            active_nodes: AtomicUsize::new(0),
            lru_hint: AtomicUsize::new(0),
            latest_seqno: Mutex::new(0),
            cache_threshold,
            stats: CacheStats::default(),
        }
    }

    fn bucket_index(ssid: SecurityId, tsid: SecurityId, tclass: ObjectClass) -> usize {
        let h = ssid.raw() ^ (tsid.raw() << 2) ^ (u32::from(tclass.raw()) << 4);
        (h as usize) & (CACHE_SLOTS - 1)
    }

    /// Number of currently linked nodes.
    pub(crate) fn active_nodes(&self) -> usize {
        self.active_nodes.load(Ordering::Relaxed)
    }

    /// Latest policy sequence number observed by a reset.
    pub(crate) fn latest_seqno(&self) -> u32 {
        *self.latest_seqno.lock()
    }

    /// Records a reset's sequence number; bumps are monotonic-max.
    pub(crate) fn note_reset_seqno(&self, seqno: u32) {
        let mut latest = self.latest_seqno.lock();
        if seqno > *latest {
            *latest = seqno;
        }
    }

    /// Insert-side gate: a candidate older than the latest observed
    /// reset is known-stale and must not enter the cache.
    fn admit_seqno(&self, seqno: u32) -> bool {
        let latest = self.latest_seqno.lock();
        if seqno < *latest {
            warn!(target: "avc", seqno, latest = *latest, "refusing stale decision");
            return false;
        }
        true
    }

    /// Probes the cache. The returned reference stays valid for the
    /// lifetime of `guard`'s reader section.
    pub(crate) fn lookup<'g>(
        &self,
        guard: &'g Guard,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
    ) -> Option<&'g AvcNode> {
        self.stats.inc_lookups();
        let found = self.search(guard, ssid, tsid, tclass);
        if found.is_none() {
            self.stats.inc_misses();
        }
        found
    }

    fn search<'g>(
        &self,
        guard: &'g Guard,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
    ) -> Option<&'g AvcNode> {
        let bucket = &self.slots[Self::bucket_index(ssid, tsid, tclass)];
        let mut cur = bucket.head.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.as_ref() } {
            if node.matches_key(ssid, tsid, tclass) {
                return Some(node);
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        None
    }

    /// Allocates an unlinked node, running an eviction pass first when
    /// the count crosses the threshold.
    fn alloc_node(
        &self,
        guard: &Guard,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
    ) -> Owned<AvcNode> {
        self.stats.inc_allocations();
        if self.active_nodes.fetch_add(1, Ordering::Relaxed) + 1 > self.cache_threshold {
            self.reclaim(guard);
        }
        Owned::new(AvcNode::new(ssid, tsid, tclass))
    }

    /// Frees a node that was allocated but never linked. No deferral:
    /// no reader can hold a reference to it.
    fn kill_node(&self, node: Owned<AvcNode>) {
        drop(node);
        self.stats.inc_frees();
        self.active_nodes.fetch_sub(1, Ordering::Relaxed);
    }

    /// Unlinks are complete; hand the node to the reclaimer. The node is
    /// freed only after every reader section concurrent with the unlink
    /// has ended.
    ///
    /// # Safety
    ///
    /// `node` must have just been unlinked under the owning bucket's
    /// lock and must not be reachable from any chain.
    unsafe fn retire_node(&self, guard: &Guard, node: Shared<'_, AvcNode>) {
        self.stats.inc_frees();
        self.active_nodes.fetch_sub(1, Ordering::Relaxed);
        unsafe { guard.defer_destroy(node) };
    }

    /// Installs a decision for a key: replaces the existing node for the
    /// key if one is linked, otherwise prepends a new one.
    ///
    /// Returns `None` (and installs nothing) when `avd.seqno` predates
    /// the latest observed reset. The caller proceeds with its computed
    /// decision either way.
    pub(crate) fn insert<'g>(
        &self,
        guard: &'g Guard,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        avd: &AvDecision,
        ops: &OperationNode,
    ) -> Option<Shared<'g, AvcNode>> {
        if !self.admit_seqno(avd.seqno) {
            return None;
        }

        let mut node = self.alloc_node(guard, ssid, tsid, tclass);
        node.avd = *avd;
        node.ops = ops
            .has_constraints()
            .then(|| Box::new(ops.clone()));

        let bucket = &self.slots[Self::bucket_index(ssid, tsid, tclass)];
        let locked = bucket.lock.lock();

        let mut link = &bucket.head;
        loop {
            let cur = link.load(Ordering::Acquire, guard);
            match unsafe { cur.as_ref() } {
                Some(existing) if existing.matches_key(ssid, tsid, tclass) => {
                    // Replace in place: a concurrent traversal sees the
                    // old node or the new one, never neither.
                    node.next
                        .store(existing.next.load(Ordering::Acquire, guard), Ordering::Relaxed);
                    let new = node.into_shared(guard);
                    link.store(new, Ordering::Release);
                    unsafe { self.retire_node(guard, cur) };
                    drop(locked);
                    return Some(new);
                }
                Some(existing) => link = &existing.next,
                None => break,
            }
        }

        node.next
            .store(bucket.head.load(Ordering::Relaxed, guard), Ordering::Relaxed);
        let new = node.into_shared(guard);
        bucket.head.store(new, Ordering::Release);
        drop(locked);
        Some(new)
    }

    /// Clone-modify-replace update of the entry matching the key *and*
    /// `seqno` (so a concurrent newer insert is never clobbered).
    ///
    /// `apply` receives the candidate after the original's decision and
    /// operation subtree have been deep-copied into it.
    pub(crate) fn update<F>(
        &self,
        guard: &Guard,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        seqno: u32,
        apply: F,
    ) -> Result<(), AvcError>
    where
        F: FnOnce(&mut AvcNode),
    {
        let mut node = self.alloc_node(guard, ssid, tsid, tclass);

        let bucket = &self.slots[Self::bucket_index(ssid, tsid, tclass)];
        let locked = bucket.lock.lock();

        let mut link = &bucket.head;
        let orig = loop {
            let cur = link.load(Ordering::Acquire, guard);
            match unsafe { cur.as_ref() } {
                Some(existing)
                    if existing.matches_key(ssid, tsid, tclass)
                        && existing.avd.seqno == seqno =>
                {
                    break cur;
                }
                Some(existing) => link = &existing.next,
                None => {
                    drop(locked);
                    self.kill_node(node);
                    return Err(AvcError::NotFound);
                }
            }
        };

        let orig_ref = unsafe { orig.deref() };
        node.avd = orig_ref.avd;
        node.ops = orig_ref.ops.clone();
        apply(&mut node);

        node.next
            .store(orig_ref.next.load(Ordering::Acquire, guard), Ordering::Relaxed);
        let new = node.into_shared(guard);
        link.store(new, Ordering::Release);
        unsafe { self.retire_node(guard, orig) };
        drop(locked);
        Ok(())
    }

    /// One eviction pass: walk buckets from the rotating hint, skip
    /// contended locks, unlink whole chains until the batch is met.
    /// Bounded work, no allocation, no external calls.
    fn reclaim(&self, guard: &Guard) {
        let mut reclaimed = 0usize;
        for _ in 0..CACHE_SLOTS {
            let which = self.lru_hint.fetch_add(1, Ordering::Relaxed) & (CACHE_SLOTS - 1);
            let bucket = &self.slots[which];
            let Some(locked) = bucket.lock.try_lock() else {
                continue;
            };
            loop {
                let cur = bucket.head.load(Ordering::Acquire, guard);
                let Some(node) = (unsafe { cur.as_ref() }) else {
                    break;
                };
                bucket
                    .head
                    .store(node.next.load(Ordering::Acquire, guard), Ordering::Release);
                self.stats.inc_reclaims();
                unsafe { self.retire_node(guard, cur) };
                reclaimed += 1;
                if reclaimed >= RECLAIM_BATCH {
                    drop(locked);
                    debug!(target: "avc", reclaimed, "eviction pass complete");
                    return;
                }
            }
            drop(locked);
        }
        debug!(target: "avc", reclaimed, "eviction pass complete");
    }

    /// Unlinks every node in every bucket. Touches nothing else;
    /// `latest_seqno` is advanced separately by the reset protocol.
    pub(crate) fn flush(&self, guard: &Guard) {
        for bucket in self.slots.iter() {
            let locked = bucket.lock.lock();
            loop {
                let cur = bucket.head.load(Ordering::Acquire, guard);
                let Some(node) = (unsafe { cur.as_ref() }) else {
                    break;
                };
                bucket
                    .head
                    .store(node.next.load(Ordering::Acquire, guard), Ordering::Release);
                unsafe { self.retire_node(guard, cur) };
            }
            drop(locked);
        }
    }

    /// Read-side occupancy walk: `(entries, buckets used, longest chain)`.
    pub(crate) fn hash_stats(&self, guard: &Guard) -> (usize, usize, usize) {
        let mut used = 0;
        let mut longest = 0;
        for bucket in self.slots.iter() {
            let mut len = 0;
            let mut cur = bucket.head.load(Ordering::Acquire, guard);
            while let Some(node) = unsafe { cur.as_ref() } {
                len += 1;
                cur = node.next.load(Ordering::Acquire, guard);
            }
            if len > 0 {
                used += 1;
                longest = longest.max(len);
            }
        }
        (self.active_nodes(), used, longest)
    }
}

impl Drop for AvcCache {
    fn drop(&mut self) {
        // Exclusive access: no reader section can be live. Free the
        // chains directly instead of deferring.
        let guard = unsafe { epoch::unprotected() };
        for bucket in self.slots.iter() {
            let mut cur = bucket.head.load(Ordering::Relaxed, guard);
            while let Some(node) = unsafe { cur.as_ref() } {
                let next = node.next.load(Ordering::Relaxed, guard);
                drop(unsafe { cur.into_owned() });
                cur = next;
            }
        }
    }
}
