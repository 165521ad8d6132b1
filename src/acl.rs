//! ACL: the ACEs on one target, kept deny-first, and the per-target ACL cache

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::ace::Ace;
use crate::catalog::RightCatalog;
use crate::error::Result;
use crate::store::GrantStore;
use crate::target::Target;

/// ACEs of one target partitioned into denials, delegable allows and plain allows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    denied: Vec<Ace>,
    allowed_delegable: Vec<Ace>,
    allowed: Vec<Ace>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse stored ACE lines. Any malformed line fails the whole ACL.
    pub fn parse<S: AsRef<str>>(lines: &[S], catalog: &RightCatalog) -> Result<Self> {
        let mut acl = Acl::new();
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() {
                continue;
            }
            acl.grant(Ace::parse(line, catalog)?);
        }
        Ok(acl)
    }

    /// Text form, deny-first
    pub fn to_lines(&self) -> Vec<String> {
        self.iter().map(|a| a.to_string()).collect()
    }

    /// Denials, then delegable allows, then allows
    pub fn iter(&self) -> impl Iterator<Item = &Ace> {
        self.denied.iter().chain(self.allowed_delegable.iter()).chain(self.allowed.iter())
    }

    pub fn denied(&self) -> &[Ace] {
        &self.denied
    }

    pub fn allowed_delegable(&self) -> &[Ace] {
        &self.allowed_delegable
    }

    pub fn allowed(&self) -> &[Ace] {
        &self.allowed
    }

    pub fn len(&self) -> usize {
        self.denied.len() + self.allowed_delegable.len() + self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bucket(&mut self, ace: &Ace) -> &mut Vec<Ace> {
        if ace.deny() {
            &mut self.denied
        } else if ace.can_delegate() {
            &mut self.allowed_delegable
        } else {
            &mut self.allowed
        }
    }

    /// Add a grant. An existing grant for the same grantee and right is
    /// replaced; returns false if an identical grant was already present.
    pub fn grant(&mut self, ace: Ace) -> bool {
        if self.iter().any(|a| a == &ace) {
            return false;
        }
        for list in [&mut self.denied, &mut self.allowed_delegable, &mut self.allowed] {
            list.retain(|a| !a.same_grantee_and_right(&ace));
        }
        self.bucket(&ace).push(ace);
        true
    }

    /// Remove an exact grant (modifier included); returns whether it existed
    pub fn revoke(&mut self, ace: &Ace) -> bool {
        let list = self.bucket(ace);
        let before = list.len();
        list.retain(|a| a != ace);
        list.len() != before
    }
}

// ============================================================================
// Per-target cache
// ============================================================================

struct CachedAcl {
    target: Target,
    revision: u64,
    acl: Arc<Acl>,
}

/// Parsed ACLs keyed by target id, loaded lazily from the grant store.
/// A load that overlaps a write is returned but not cached.
pub struct AclCache {
    store: Arc<dyn GrantStore>,
    catalog: Arc<RightCatalog>,
    cache: Mutex<LruCache<String, CachedAcl>>,
    epoch: AtomicU64,
}

impl AclCache {
    pub fn new(store: Arc<dyn GrantStore>, catalog: Arc<RightCatalog>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        AclCache { store, catalog, cache: Mutex::new(LruCache::new(cap)), epoch: AtomicU64::new(0) }
    }

    pub fn store(&self) -> &Arc<dyn GrantStore> {
        &self.store
    }

    /// ACL of `target`, empty if nothing is stored
    pub fn get(&self, target: &Target) -> Result<Arc<Acl>> {
        if let Some(c) = self.cache.lock().get(&target.id) {
            return Ok(Arc::clone(&c.acl));
        }
        let epoch = self.epoch.load(Ordering::Acquire);
        let revision = self.store.revision(target)?;
        let lines = self.store.load_acl(target)?;
        let acl = Arc::new(Acl::parse(&lines, &self.catalog)?);
        let mut cache = self.cache.lock();
        if self.epoch.load(Ordering::Acquire) == epoch {
            debug!(target = %target, aces = acl.len(), revision, "loaded acl");
            cache.put(target.id.clone(), CachedAcl { target: target.clone(), revision, acl: Arc::clone(&acl) });
        } else {
            debug!(target = %target, "acl written while loading, not cached");
        }
        Ok(acl)
    }

    /// Persist a new ACL, possibly empty; the next `get` reloads it
    pub fn save(&self, target: &Target, acl: &Acl) -> Result<()> {
        self.store.save_acl(target, &acl.to_lines())?;
        self.invalidate(&target.id);
        Ok(())
    }

    pub fn invalidate(&self, target_id: &str) {
        let mut cache = self.cache.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        cache.pop(target_id);
    }

    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        cache.clear();
    }

    /// Drop cached ACLs whose stored revision moved since they were loaded,
    /// which happens when another process writes the store
    pub fn drop_changed(&self) -> Result<Vec<Target>> {
        let cached: Vec<(Target, u64)> = self.cache.lock().iter().map(|(_, c)| (c.target.clone(), c.revision)).collect();
        let mut changed = Vec::new();
        for (target, revision) in cached {
            if self.store.revision(&target)? != revision {
                self.invalidate(&target.id);
                changed.push(target);
            }
        }
        Ok(changed)
    }
}
