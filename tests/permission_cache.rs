//! Permission cache behavior, standalone and behind the access manager

mod common;

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use common::{catalog, setup, setup_with, who};
use parking_lot::Mutex;
use rightgate::config::PermissionCacheConfig;
use rightgate::{
    AccessManager, Ace, AttrType, CacheEntry, Directory, EngineConfig, GroupMembership, Identity, LookupBy, MemoryDirectory,
    MemoryGrantStore, PermissionCache, Result, Target, TargetType,
};

fn account(id: &str) -> Target {
    Target::new(TargetType::Account, id, format!("{}@example.com", id), Some("domain-0001".into()))
}

#[test]
fn test_put_then_get() {
    let cat = catalog();
    let cache = PermissionCache::new(cat.cacheable_count(), &PermissionCacheConfig::default());
    let t = account("a");
    let vfb = cat.right("viewFreeBusy").unwrap();
    let inv = cat.right("invite").unwrap();

    assert_eq!(cache.get(&t, b"u1", &vfb), CacheEntry::NotCached);
    cache.put(&t, b"u1", &vfb, CacheEntry::Allowed, cache.epoch());
    cache.put(&t, b"u1", &inv, CacheEntry::Denied, cache.epoch());
    cache.put(&t, b"u2", &vfb, CacheEntry::NoMatchingAcl, cache.epoch());

    assert_eq!(cache.get(&t, b"u1", &vfb), CacheEntry::Allowed);
    assert_eq!(cache.get(&t, b"u1", &inv), CacheEntry::Denied);
    assert_eq!(cache.get(&t, b"u2", &vfb), CacheEntry::NoMatchingAcl);
    assert_eq!(cache.get(&t, b"u2", &inv), CacheEntry::NotCached);

    let stats = cache.stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 2);
}

#[test]
fn test_admin_rights_not_cached() {
    let cat = catalog();
    let cache = PermissionCache::new(cat.cacheable_count(), &PermissionCacheConfig::default());
    let t = account("a");
    let del = cat.right("deleteAccount").unwrap();
    assert!(!del.is_cacheable());
    cache.put(&t, b"u1", &del, CacheEntry::Allowed, cache.epoch());
    assert_eq!(cache.get(&t, b"u1", &del), CacheEntry::NotCached);

    // adminLoginAs is the cacheable exception
    let login = cat.right("adminLoginAs").unwrap();
    cache.put(&t, b"u1", &login, CacheEntry::Allowed, cache.epoch());
    assert_eq!(cache.get(&t, b"u1", &login), CacheEntry::Allowed);
}

#[test]
fn test_invalidate_leaf_target_only() {
    let cat = catalog();
    let cache = PermissionCache::new(cat.cacheable_count(), &PermissionCacheConfig::default());
    let a = account("a");
    let b = account("b");
    let vfb = cat.right("viewFreeBusy").unwrap();
    cache.put(&a, b"u1", &vfb, CacheEntry::Allowed, cache.epoch());
    cache.put(&b, b"u1", &vfb, CacheEntry::Allowed, cache.epoch());

    cache.invalidate(&a);
    assert_eq!(cache.get(&a, b"u1", &vfb), CacheEntry::NotCached);
    assert_eq!(cache.get(&b, b"u1", &vfb), CacheEntry::Allowed);
}

#[test]
fn test_invalidate_inheritance_source_flushes_everything() {
    let cat = catalog();
    let cache = PermissionCache::new(cat.cacheable_count(), &PermissionCacheConfig::default());
    let a = account("a");
    let b = account("b");
    let vfb = cat.right("viewFreeBusy").unwrap();
    cache.put(&a, b"u1", &vfb, CacheEntry::Allowed, cache.epoch());
    cache.put(&b, b"u1", &vfb, CacheEntry::Denied, cache.epoch());

    let dom = Target::new(TargetType::Domain, "domain-0001", "example.com", Some("domain-0001".into()));
    cache.invalidate(&dom);
    assert_eq!(cache.get(&a, b"u1", &vfb), CacheEntry::NotCached);
    assert_eq!(cache.get(&b, b"u1", &vfb), CacheEntry::NotCached);

    // buckets keep working after a flush
    cache.put(&a, b"u1", &vfb, CacheEntry::Denied, cache.epoch());
    assert_eq!(cache.get(&a, b"u1", &vfb), CacheEntry::Denied);
}

#[test]
fn test_bounded_buckets_evict_least_recent() {
    let cat = catalog();
    let cfg = PermissionCacheConfig { max_targets: 2, max_grantees_per_target: 1, ..Default::default() };
    let cache = PermissionCache::new(cat.cacheable_count(), &cfg);
    let vfb = cat.right("viewFreeBusy").unwrap();
    let (a, b, c) = (account("a"), account("b"), account("c"));
    cache.put(&a, b"u1", &vfb, CacheEntry::Allowed, cache.epoch());
    cache.put(&b, b"u1", &vfb, CacheEntry::Allowed, cache.epoch());
    cache.put(&c, b"u1", &vfb, CacheEntry::Allowed, cache.epoch());
    assert_eq!(cache.get(&a, b"u1", &vfb), CacheEntry::NotCached);
    assert_eq!(cache.stats().buckets, 2);

    cache.put(&c, b"u2", &vfb, CacheEntry::Denied, cache.epoch());
    assert_eq!(cache.get(&c, b"u1", &vfb), CacheEntry::NotCached);
    assert_eq!(cache.get(&c, b"u2", &vfb), CacheEntry::Denied);
}

#[test]
fn test_put_after_invalidation_is_dropped() {
    let cat = catalog();
    let cache = PermissionCache::new(cat.cacheable_count(), &PermissionCacheConfig::default());
    let a = account("a");
    let b = account("b");
    let dom = Target::new(TargetType::Domain, "domain-0001", "example.com", Some("domain-0001".into()));
    let vfb = cat.right("viewFreeBusy").unwrap();

    // the bucket of `a` is popped and recreated by the late put
    let epoch = cache.epoch();
    cache.invalidate(&a);
    assert!(!cache.put(&a, b"u1", &vfb, CacheEntry::Allowed, epoch));
    assert_eq!(cache.get(&a, b"u1", &vfb), CacheEntry::NotCached);

    let epoch = cache.epoch();
    cache.invalidate(&b);
    assert!(!cache.put(&a, b"u1", &vfb, CacheEntry::Allowed, epoch));

    let epoch = cache.epoch();
    cache.invalidate(&dom);
    assert!(!cache.put(&a, b"u1", &vfb, CacheEntry::Allowed, epoch));
    assert_eq!(cache.get(&a, b"u1", &vfb), CacheEntry::NotCached);

    assert!(cache.put(&a, b"u1", &vfb, CacheEntry::Denied, cache.epoch()));
    assert_eq!(cache.get(&a, b"u1", &vfb), CacheEntry::Denied);
}

#[test]
fn test_bucket_ttl() {
    let cat = catalog();
    let cfg = PermissionCacheConfig { bucket_ttl_secs: Some(0), ..Default::default() };
    let cache = PermissionCache::new(cat.cacheable_count(), &cfg);
    let a = account("a");
    let vfb = cat.right("viewFreeBusy").unwrap();
    cache.put(&a, b"u1", &vfb, CacheEntry::Allowed, cache.epoch());
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(cache.get(&a, b"u1", &vfb), CacheEntry::NotCached);
}

#[test]
fn test_disabled_cache() {
    let cat = catalog();
    let cfg = PermissionCacheConfig { enabled: false, ..Default::default() };
    let cache = PermissionCache::new(cat.cacheable_count(), &cfg);
    let a = account("a");
    let vfb = cat.right("viewFreeBusy").unwrap();
    cache.put(&a, b"u1", &vfb, CacheEntry::Allowed, cache.epoch());
    assert_eq!(cache.get(&a, b"u1", &vfb), CacheEntry::NotCached);
}

// ============================================================================
// Through the access manager
// ============================================================================

#[test]
fn test_grant_on_domain_is_seen_by_cached_accounts() {
    let f = setup();
    let dom = f.domain("example.com");
    let u = f.account("u@example.com");
    let a = f.account("a@example.com");

    assert!(!f.mgr.can_do(&who(&u), &a, "invite", false, false).unwrap());
    assert!(!f.mgr.can_do(&who(&u), &a, "invite", false, false).unwrap());
    assert_eq!(f.mgr.stats().hits, 1);

    f.grant(&dom, &format!("{} usr invite", u.id));
    assert!(f.mgr.can_do(&who(&u), &a, "invite", false, false).unwrap());

    let ace = f.ace(&format!("{} usr invite", u.id));
    f.mgr.revoke_right(None, &dom, &ace).unwrap();
    assert!(!f.mgr.can_do(&who(&u), &a, "invite", false, false).unwrap());
}

#[test]
fn test_membership_change_flushes() {
    let f = setup();
    f.domain("example.com");
    let g = f.group("g@example.com");
    let u = f.account("u@example.com");
    let a = f.account("a@example.com");
    f.grant(&a, &format!("{} grp viewFreeBusy", g.id));

    assert!(!f.mgr.can_do(&who(&u), &a, "viewFreeBusy", false, false).unwrap());
    f.member(&g, &u);
    assert!(f.mgr.can_do(&who(&u), &a, "viewFreeBusy", false, false).unwrap());
}

#[test]
fn test_verdicts_identical_with_cache_disabled() {
    let mut cfg = EngineConfig::default();
    cfg.permission_cache.enabled = false;
    let f = setup_with(cfg);
    let dom = f.domain("example.com");
    let u = f.account("u@example.com");
    let a = f.account("a@example.com");
    f.grant(&dom, &format!("{} usr invite", u.id));
    for _ in 0..3 {
        assert!(f.mgr.can_do(&who(&u), &a, "invite", false, false).unwrap());
    }
    assert_eq!(f.mgr.stats().hits, 0);
}

// ============================================================================
// Grants landing in the middle of an evaluation
// ============================================================================

type Hook = Box<dyn FnOnce() + Send>;

/// Memory directory that runs a hook the first time the group membership of
/// one entry is looked up, i.e. partway through walking its chain
struct HookedDirectory {
    inner: Arc<MemoryDirectory>,
    hook: Mutex<Option<(String, Hook)>>,
}

impl HookedDirectory {
    fn arm(&self, entry: &Target, hook: Hook) {
        *self.hook.lock() = Some((entry.id.clone(), hook));
    }
}

impl Directory for HookedDirectory {
    fn lookup_entry(&self, kind: TargetType, by: LookupBy, value: &str) -> Result<Option<Target>> {
        self.inner.lookup_entry(kind, by, value)
    }

    fn group_membership(&self, entry: &Target, admin_only: bool) -> Result<Vec<GroupMembership>> {
        let hook = {
            let mut h = self.hook.lock();
            if h.as_ref().is_some_and(|(id, _)| *id == entry.id) {
                h.take().map(|(_, f)| f)
            } else {
                None
            }
        };
        if let Some(f) = hook {
            f();
        }
        self.inner.group_membership(entry, admin_only)
    }

    fn parent_domain(&self, domain: &Target) -> Result<Option<Target>> {
        self.inner.parent_domain(domain)
    }

    fn constraint_source(&self, target: &Target) -> Result<Option<Target>> {
        self.inner.constraint_source(target)
    }

    fn attribute_type(&self, attr: &str) -> AttrType {
        self.inner.attribute_type(attr)
    }

    fn attr_values(&self, target: &Target, attr: &str) -> Result<Vec<String>> {
        self.inner.attr_values(target, attr)
    }

    fn attrs_in_class(&self, kind: TargetType) -> Result<BTreeSet<String>> {
        self.inner.attrs_in_class(kind)
    }

    fn group_members(&self, group: &Target) -> Result<Vec<Target>> {
        self.inner.group_members(group)
    }
}

#[test]
fn test_grant_during_evaluation_is_not_hidden_by_cache() {
    common::init_tracing();
    let inner = Arc::new(MemoryDirectory::new());
    let dom = inner.add_domain("example.com").unwrap();
    let u = inner.add_account("u@example.com").unwrap();
    let a = inner.add_account("a@example.com").unwrap();
    let dir = Arc::new(HookedDirectory { inner, hook: Mutex::new(None) });
    let directory: Arc<dyn Directory> = dir.clone();
    let cat = catalog();
    let mgr = Arc::new(AccessManager::new(Arc::clone(&cat), directory, Arc::new(MemoryGrantStore::new()), EngineConfig::default()).unwrap());
    let me = Identity::Account(u.id.clone());

    mgr.grant_right(None, &dom, Ace::parse(&format!("{} usr viewFreeBusy", u.id), &cat).unwrap()).unwrap();

    // the deny on `a` is committed after a's own grants were read but
    // before the domain allow decides
    let weak: Weak<AccessManager> = Arc::downgrade(&mgr);
    let deny = Ace::parse(&format!("{} usr -viewFreeBusy", u.id), &cat).unwrap();
    let on = a.clone();
    dir.arm(&a, Box::new(move || {
        if let Some(m) = weak.upgrade() {
            m.grant_right(None, &on, deny).unwrap();
        }
    }));

    assert!(mgr.can_do(&me, &a, "viewFreeBusy", false, false).unwrap());
    assert_eq!(mgr.acl(&a).unwrap().len(), 1);

    assert!(!mgr.can_do(&me, &a, "viewFreeBusy", false, false).unwrap());
    assert!(!mgr.can_do(&me, &a, "viewFreeBusy", false, false).unwrap());
    assert_eq!(mgr.stats().hits, 1);
}
