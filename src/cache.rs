//! Permission cache: (target, grantee, right) -> last verdict
//!
//! Two LRU levels: target id -> bucket, and within a bucket grantee key ->
//! packed byte array. Each cacheable right owns a nibble of that array
//! (byte = cache index / 2, nibble = cache index % 2) holding a 2-bit state.
//! A full flush is lazy: it bumps a global generation and every bucket
//! resets itself the next time it is touched.
//!
//! Every invalidation also advances an epoch. A verdict is stored only if no
//! invalidation happened since the caller read the epoch, so an evaluation
//! that raced with a grant never caches what it saw before the grant.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::PermissionCacheConfig;
use crate::preset::Verdict;
use crate::right::Right;
use crate::target::{Target, TargetGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CacheEntry {
    NotCached,
    NoMatchingAcl,
    Allowed,
    Denied,
}

impl CacheEntry {
    const ALL: [CacheEntry; 4] = [CacheEntry::NotCached, CacheEntry::NoMatchingAcl, CacheEntry::Allowed, CacheEntry::Denied];

    #[inline]
    fn code(self) -> usize {
        match self {
            CacheEntry::NotCached => 0,
            CacheEntry::NoMatchingAcl => 1,
            CacheEntry::Allowed => 2,
            CacheEntry::Denied => 3,
        }
    }

    pub fn verdict(self) -> Option<Verdict> {
        match self {
            CacheEntry::NotCached => None,
            CacheEntry::NoMatchingAcl => Some(Verdict::NoDecision),
            CacheEntry::Allowed => Some(Verdict::Allowed),
            CacheEntry::Denied => Some(Verdict::Denied),
        }
    }
}

impl From<Verdict> for CacheEntry {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Allowed => CacheEntry::Allowed,
            Verdict::Denied => CacheEntry::Denied,
            Verdict::NoDecision => CacheEntry::NoMatchingAcl,
        }
    }
}

// State masks per nibble, indexed by CacheEntry::code
const MASKS: [[u8; 4]; 2] = [[0x00, 0x01, 0x02, 0x03], [0x00, 0x10, 0x20, 0x30]];
const NIBBLE: [u8; 2] = [0x0F, 0xF0];

#[inline]
fn slot(idx: usize) -> (usize, usize) {
    (idx / 2, idx % 2)
}

/// Read the state of slot `idx`
pub fn read_slot(bytes: &[u8], idx: usize) -> CacheEntry {
    let (b, n) = slot(idx);
    let Some(byte) = bytes.get(b) else { return CacheEntry::NotCached };
    let v = byte & NIBBLE[n];
    MASKS[n].iter().position(|m| *m == v).map(|i| CacheEntry::ALL[i]).unwrap_or(CacheEntry::NotCached)
}

/// Write the state of slot `idx`
pub fn write_slot(bytes: &mut [u8], idx: usize, e: CacheEntry) {
    let (b, n) = slot(idx);
    if let Some(byte) = bytes.get_mut(b) {
        *byte = (*byte & !NIBBLE[n]) | MASKS[n][e.code()];
    }
}

#[inline]
pub fn bytes_for(slots: usize) -> usize {
    slots.div_ceil(2)
}

// ============================================================================
// Buckets
// ============================================================================

struct Bucket {
    generation: u64,
    created: Instant,
    grantees: LruCache<Vec<u8>, Box<[u8]>>,
}

impl Bucket {
    fn new(generation: u64, per_target: NonZeroUsize) -> Self {
        Bucket { generation, created: Instant::now(), grantees: LruCache::new(per_target) }
    }

    /// Reset if flushed or expired since creation
    fn refresh(&mut self, generation: u64, ttl: Option<Duration>) {
        if self.generation < generation || ttl.is_some_and(|t| self.created.elapsed() >= t) {
            self.grantees.clear();
            self.generation = generation;
            self.created = Instant::now();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub buckets: usize,
}

/// Bounded two-level verdict cache
pub struct PermissionCache {
    buckets: Mutex<LruCache<String, Arc<Mutex<Bucket>>>>,
    generation: AtomicU64,
    epoch: AtomicU64,
    slots: usize,
    per_target: NonZeroUsize,
    ttl: Option<Duration>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PermissionCache {
    /// `slots` is the number of cacheable rights in the catalog
    pub fn new(slots: usize, cfg: &PermissionCacheConfig) -> Self {
        PermissionCache {
            buckets: Mutex::new(LruCache::new(NonZeroUsize::new(cfg.max_targets).unwrap_or(NonZeroUsize::MIN))),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            slots,
            per_target: NonZeroUsize::new(cfg.max_grantees_per_target).unwrap_or(NonZeroUsize::MIN),
            ttl: cfg.bucket_ttl(),
            enabled: cfg.enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn bucket(&self, target_id: &str, create: bool) -> Option<Arc<Mutex<Bucket>>> {
        let mut b = self.buckets.lock();
        if let Some(bucket) = b.get(target_id) {
            return Some(Arc::clone(bucket));
        }
        if !create {
            return None;
        }
        let bucket = Arc::new(Mutex::new(Bucket::new(self.generation.load(Ordering::Acquire), self.per_target)));
        b.put(target_id.to_string(), Arc::clone(&bucket));
        Some(bucket)
    }

    #[inline]
    fn index_of(&self, right: &Right) -> Option<usize> {
        right.cache_index.filter(|i| self.enabled && *i < self.slots)
    }

    pub fn get(&self, target: &Target, grantee_key: &[u8], right: &Right) -> CacheEntry {
        let Some(idx) = self.index_of(right) else { return CacheEntry::NotCached };
        let entry = self
            .bucket(&target.id, false)
            .map(|bucket| {
                let mut bucket = bucket.lock();
                bucket.refresh(self.generation.load(Ordering::Acquire), self.ttl);
                bucket.grantees.get(grantee_key).map(|bytes| read_slot(bytes, idx)).unwrap_or(CacheEntry::NotCached)
            })
            .unwrap_or(CacheEntry::NotCached);
        if entry == CacheEntry::NotCached {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    /// Invalidation counter to read before evaluating a verdict for `put`
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Store a verdict computed after `epoch` was read. Returns false, storing
    /// nothing, if any invalidation happened since.
    pub fn put(&self, target: &Target, grantee_key: &[u8], right: &Right, entry: CacheEntry, epoch: u64) -> bool {
        let Some(idx) = self.index_of(right) else { return false };
        if self.epoch() != epoch {
            return false;
        }
        let Some(bucket) = self.bucket(&target.id, true) else { return false };
        let mut bucket = bucket.lock();
        bucket.refresh(self.generation.load(Ordering::Acquire), self.ttl);
        // invalidations bump the epoch before they pop or flush
        if self.epoch() != epoch {
            debug!(target = %target, right = %right, "invalidated during evaluation, verdict not cached");
            return false;
        }
        if bucket.grantees.get(grantee_key).is_none() {
            bucket.grantees.put(grantee_key.to_vec(), vec![0u8; bytes_for(self.slots)].into_boxed_slice());
        }
        if let Some(bytes) = bucket.grantees.get_mut(grantee_key) {
            write_slot(bytes, idx, entry);
        }
        true
    }

    /// Reset the bucket of `target`, or everything if other targets inherit from it
    pub fn invalidate(&self, target: &Target) {
        if TargetGraph::is_inheritance_source(target.kind) {
            debug!(target = %target, "inheritance source changed, flushing permission cache");
            self.invalidate_all();
        } else {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            self.buckets.lock().pop(&target.id);
        }
    }

    pub fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            buckets: self.buckets.lock().len(),
        }
    }
}
