//! Access manager: the checks callers use
//!
//! Resolves identities, decomposes combo rights, consults the permission
//! cache, and falls back to registered predicates and right defaults when no
//! grant decides. `can_*` entry points fail closed: evaluation errors are
//! logged and become `false`; configuration errors still propagate.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::ace::Ace;
use crate::acl::{Acl, AclCache};
use crate::attrs::{actual_attr_name, check_set_attrs, AllowedAttrs, AttrRightEvaluator, AttrValues, ConstraintCache};
use crate::cache::{CacheEntry, CacheStats, PermissionCache};
use crate::catalog::RightCatalog;
use crate::config::EngineConfig;
use crate::constants::{A_IS_SYSTEM_ADMIN_ACCOUNT, RIGHT_CROSS_DOMAIN_ADMIN};
use crate::directory::{Directory, LookupBy};
use crate::effective::{EffectiveRights, EffectiveRightsEvaluator, ShapeRights};
use crate::error::{AclError, Result};
use crate::grantee::{Grantee, GranteeResolver, GranteeType, Identity};
use crate::preset::{Decision, PresetRightEvaluator, Verdict};
use crate::right::{AttrOp, Right, RightClass, RightKind};
use crate::store::GrantStore;
use crate::target::{Target, TargetType};

/// Right-specific predicate consulted when no grant decides.
/// `None` leaves the decision to the right's default.
pub trait CheckRightFallback: Send + Sync {
    fn check(&self, grantee: &Grantee, target: &Target, right: &Right) -> Option<bool>;
}

impl<F> CheckRightFallback for F
where
    F: Fn(&Grantee, &Target, &Right) -> Option<bool> + Send + Sync,
{
    fn check(&self, grantee: &Grantee, target: &Target, right: &Right) -> Option<bool> {
        self(grantee, target, right)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOptions {
    pub as_admin: bool,
    pub can_delegate: bool,
}

impl CheckOptions {
    pub fn user() -> Self {
        Self::default()
    }

    pub fn admin() -> Self {
        CheckOptions { as_admin: true, can_delegate: false }
    }

    pub fn delegate(self) -> Self {
        CheckOptions { can_delegate: true, ..self }
    }
}

pub struct AccessManager {
    catalog: Arc<RightCatalog>,
    directory: Arc<dyn Directory>,
    acls: AclCache,
    resolver: GranteeResolver,
    perms: PermissionCache,
    constraints: ConstraintCache,
    fallbacks: RwLock<HashMap<String, Arc<dyn CheckRightFallback>>>,
    grant_lock: Mutex<()>,
    config: EngineConfig,
}

impl AccessManager {
    pub fn new(catalog: Arc<RightCatalog>, directory: Arc<dyn Directory>, store: Arc<dyn GrantStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let acls = AclCache::new(store, Arc::clone(&catalog), config.acl_cache_size);
        let resolver = GranteeResolver::new(Arc::clone(&directory), &config.grantee_cache);
        let perms = PermissionCache::new(catalog.cacheable_count(), &config.permission_cache);
        info!(rights = catalog.len(), cacheable = catalog.cacheable_count(), "access manager ready");
        Ok(AccessManager {
            catalog,
            directory,
            acls,
            resolver,
            perms,
            constraints: ConstraintCache::new(),
            fallbacks: RwLock::new(HashMap::new()),
            grant_lock: Mutex::new(()),
            config,
        })
    }

    pub fn catalog(&self) -> &Arc<RightCatalog> {
        &self.catalog
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register the predicate named by rights' `fallback` field
    pub fn register_fallback(&self, name: &str, f: impl CheckRightFallback + 'static) {
        self.fallbacks.write().insert(name.to_string(), Arc::new(f));
    }

    /// Stored grants on `target`
    pub fn acl(&self, target: &Target) -> Result<Arc<Acl>> {
        self.acls.get(target)
    }

    pub fn stats(&self) -> CacheStats {
        self.perms.stats()
    }

    #[inline]
    fn class_for(as_admin: bool) -> RightClass {
        if as_admin { RightClass::Admin } else { RightClass::User }
    }

    pub fn resolve(&self, identity: &Identity, as_admin: bool) -> Result<Grantee> {
        self.resolver.resolve(identity, Self::class_for(as_admin))
    }

    /// Resolve for a check of `right`: group membership is admin-filtered
    /// only when an admin right is checked as an admin
    fn resolve_for(&self, identity: &Identity, right: &Right, as_admin: bool) -> Result<Grantee> {
        self.resolve(identity, as_admin && right.class == RightClass::Admin)
    }

    // ========================================================================
    // Preset / combo checks
    // ========================================================================

    /// Whether `identity` may exercise `right` on `target`. `default` applies
    /// when neither a grant, a fallback nor the right's own default decides.
    pub fn can_do(&self, identity: &Identity, target: &Target, right: &str, as_admin: bool, default: bool) -> Result<bool> {
        let opts = CheckOptions { as_admin, can_delegate: false };
        fail_closed("can_do", identity, target, right, self.decide(identity, target, right, opts, default))
    }

    /// Whether `identity` may grant `right` on `target` to others
    pub fn can_delegate(&self, identity: &Identity, target: &Target, right: &str, as_admin: bool) -> Result<bool> {
        let opts = CheckOptions { as_admin, can_delegate: true };
        fail_closed("can_delegate", identity, target, right, self.decide(identity, target, right, opts, false))
    }

    /// Like `can_do` but errors are returned instead of denied
    pub fn check_right(&self, identity: &Identity, target: &Target, right: &str, opts: CheckOptions, default: bool) -> Result<bool> {
        self.decide(identity, target, right, opts, default)
    }

    /// The decision for one preset right together with the grant behind it
    pub fn explain(&self, identity: &Identity, target: &Target, right: &str, as_admin: bool) -> Result<Decision> {
        let right = self.catalog.right(right)?;
        let grantee = self.resolve_for(identity, &right, as_admin)?;
        PresetRightEvaluator::new(&*self.directory, &self.acls).check(&grantee, target, &right, false)
    }

    fn decide(&self, identity: &Identity, target: &Target, right: &str, opts: CheckOptions, default: bool) -> Result<bool> {
        let right = self.catalog.right(right)?;
        if right.class == RightClass::Admin && !opts.as_admin {
            return Err(AclError::InvalidRequest(format!("admin right {} checked without admin privileges", right.name)));
        }
        let grantee = self.resolve_for(identity, &right, opts.as_admin)?;
        if opts.as_admin && grantee.is_system_admin {
            debug!(grantee = %grantee.id, right = %right, "system admin");
            return Ok(true);
        }
        let verdict = self.evaluate(&grantee, target, &right, opts)?;
        if verdict != Verdict::NoDecision {
            return Ok(verdict == Verdict::Allowed);
        }
        Ok(self.fallback(&grantee, target, &right).unwrap_or(default))
    }

    /// Registered fallback, then the right's default
    fn fallback(&self, grantee: &Grantee, target: &Target, right: &Right) -> Option<bool> {
        let registered = right.fallback.as_deref().and_then(|n| self.fallbacks.read().get(n).cloned());
        if let Some(f) = registered {
            if let Some(v) = f.check(grantee, target, right) {
                debug!(right = %right, target = %target, allowed = v, "decided by fallback");
                return Some(v);
            }
        }
        right.default
    }

    /// Verdict for any kind of right; combos are decomposed
    pub fn evaluate(&self, grantee: &Grantee, target: &Target, right: &Arc<Right>, opts: CheckOptions) -> Result<Verdict> {
        match &right.kind {
            RightKind::Preset { .. } => self.check_preset(grantee, target, right, opts),
            RightKind::Attrs { op, attrs, .. } => {
                if !right.applicable_on(target.kind, opts.can_delegate) {
                    return Ok(Verdict::NoDecision);
                }
                let allowed = AttrRightEvaluator::new(&*self.directory, &self.acls).accessible_attrs(grantee, target, *op, opts.can_delegate)?;
                Ok(match allowed {
                    a if a.covers(attrs) => Verdict::Allowed,
                    AllowedAttrs::AllowSome(s) if s.is_empty() => Verdict::NoDecision,
                    _ => Verdict::Denied,
                })
            }
            RightKind::Combo { presets, attrs, .. } => {
                let mut any = false;
                let mut undecided = false;
                for member in presets.iter().chain(attrs.iter()).filter(|r| r.applicable_on(target.kind, opts.can_delegate)) {
                    any = true;
                    match self.evaluate(grantee, target, member, opts)? {
                        Verdict::Denied => return Ok(Verdict::Denied),
                        Verdict::NoDecision => undecided = true,
                        Verdict::Allowed => {}
                    }
                }
                Ok(if !any || undecided { Verdict::NoDecision } else { Verdict::Allowed })
            }
        }
    }

    /// Preset verdict, memoized for cacheable rights
    fn check_preset(&self, grantee: &Grantee, target: &Target, right: &Right, opts: CheckOptions) -> Result<Verdict> {
        let key = grantee.cache_key(opts.as_admin, opts.can_delegate);
        let epoch = self.perms.epoch();
        if let Some(v) = self.perms.get(target, &key, right).verdict() {
            return Ok(v);
        }
        let d = PresetRightEvaluator::new(&*self.directory, &self.acls).check(grantee, target, right, opts.can_delegate)?;
        self.perms.put(target, &key, right, CacheEntry::from(d.verdict), epoch);
        Ok(d.verdict)
    }

    // ========================================================================
    // Attribute checks
    // ========================================================================

    pub fn accessible_attrs(&self, identity: &Identity, target: &Target, op: AttrOp, as_admin: bool) -> Result<AllowedAttrs> {
        let grantee = self.resolve(identity, as_admin)?;
        if as_admin && grantee.is_system_admin {
            return Ok(AllowedAttrs::AllowAll);
        }
        AttrRightEvaluator::new(&*self.directory, &self.acls).accessible_attrs(&grantee, target, op, false)
    }

    /// Fails with PermissionDenied naming the first attribute not readable
    pub fn check_get_attrs<S: AsRef<str>>(&self, identity: &Identity, target: &Target, attrs: &[S], as_admin: bool) -> Result<()> {
        self.accessible_attrs(identity, target, AttrOp::Get, as_admin)?.check(attrs)
    }

    pub fn can_get_attrs<S: AsRef<str>>(&self, identity: &Identity, target: &Target, attrs: &[S], as_admin: bool) -> Result<bool> {
        let r = self.accessible_attrs(identity, target, AttrOp::Get, as_admin).map(|a| a.can_access(attrs));
        fail_closed("can_get_attrs", identity, target, "getAttrs", r)
    }

    /// Whether `identity` may set `values` on `target`, value constraints
    /// included. ConstraintViolated is returned to the caller.
    pub fn can_set_attrs(&self, identity: &Identity, target: &Target, values: &AttrValues, as_admin: bool) -> Result<bool> {
        let r = self.set_attrs_allowed(identity, target, values, as_admin);
        match r {
            Err(e @ AclError::ConstraintViolated(_)) => Err(e),
            r => fail_closed("can_set_attrs", identity, target, "setAttrs", r),
        }
    }

    fn set_attrs_allowed(&self, identity: &Identity, target: &Target, values: &AttrValues, as_admin: bool) -> Result<bool> {
        let grantee = self.resolve(identity, as_admin)?;
        if as_admin && grantee.is_system_admin {
            return Ok(true);
        }
        let evaluator = AttrRightEvaluator::new(&*self.directory, &self.acls);
        check_set_attrs(&evaluator, &self.constraints, &grantee, target, values)
    }

    /// Single entry point: preset and combo rights go through `can_do`;
    /// attribute rights check their attributes, with `values` required for
    /// (and only for) set-attribute rights.
    pub fn can_perform(&self, identity: &Identity, target: &Target, right: &str, values: Option<&AttrValues>, as_admin: bool) -> Result<bool> {
        let r = match self.catalog.right(right) {
            Ok(r) => r,
            Err(e) => return fail_closed("can_perform", identity, target, right, Err(e)),
        };
        match (r.attr_op(), values) {
            (Some(AttrOp::Set), None) => Err(AclError::InvalidRequest(format!("{} needs attribute values", r.name))),
            (Some(AttrOp::Set), Some(values)) => {
                let (_, _, attrs) = r.as_attrs()?;
                if let Some(a) = values.keys().find(|a| !attrs.contains(actual_attr_name(a))) {
                    debug!(right = %r, attr = %a, "attribute outside the right");
                    return Ok(false);
                }
                self.can_set_attrs(identity, target, values, as_admin)
            }
            (_, Some(_)) => Err(AclError::InvalidRequest(format!("{} takes no attribute values", r.name))),
            (_, None) => self.can_do(identity, target, right, as_admin, false),
        }
    }

    // ========================================================================
    // Reports
    // ========================================================================

    pub fn effective_rights(&self, identity: &Identity, target: &Target, as_admin: bool) -> Result<EffectiveRights> {
        let grantee = self.resolve(identity, as_admin)?;
        EffectiveRightsEvaluator::new(&*self.directory, &self.acls, &self.catalog).effective_rights(&grantee, target)
    }

    pub fn group_shape_rights(&self, identity: &Identity, groups: &[Target], as_admin: bool) -> Result<Vec<ShapeRights>> {
        let grantee = self.resolve(identity, as_admin)?;
        EffectiveRightsEvaluator::new(&*self.directory, &self.acls, &self.catalog).group_shape_rights(&grantee, groups)
    }

    // ========================================================================
    // Grants
    // ========================================================================

    /// Add a grant on `target`. With `authed`, the grantor must be able to
    /// delegate the right there (or own the target, for user rights).
    pub fn grant_right(&self, authed: Option<&Identity>, target: &Target, ace: Ace) -> Result<()> {
        self.verify_grant(target, &ace)?;
        if let Some(who) = authed {
            self.verify_grantor(who, target, ace.right())?;
        }
        let _g = self.grant_lock.lock();
        let mut acl = (*self.acls.get(target)?).clone();
        if acl.grant(ace.clone()) {
            self.acls.save(target, &acl)?;
            self.perms.invalidate(target);
            info!(target = %target, ace = %ace, "granted");
        }
        Ok(())
    }

    /// Remove an exact grant; NoSuchGrant if it is not there
    pub fn revoke_right(&self, authed: Option<&Identity>, target: &Target, ace: &Ace) -> Result<()> {
        if let Some(who) = authed {
            self.verify_grantor(who, target, ace.right())?;
        }
        let _g = self.grant_lock.lock();
        let mut acl = (*self.acls.get(target)?).clone();
        if !acl.revoke(ace) {
            return Err(AclError::NoSuchGrant(format!("{} on {}", ace, target)));
        }
        self.acls.save(target, &acl)?;
        self.perms.invalidate(target);
        info!(target = %target, ace = %ace, "revoked");
        Ok(())
    }

    /// Every stored grant naming this grantee, with the target it is on.
    /// Grants on entries no longer in the directory are skipped.
    pub fn grants_held_by(&self, grantee_type: GranteeType, grantee_id: &str) -> Result<Vec<(Target, Ace)>> {
        let mut out = Vec::new();
        for (kind, id) in self.acls.store().targets_with_grants()? {
            let Some(target) = self.directory.lookup_entry(kind, LookupBy::Id, &id)? else {
                debug!(kind = %kind, id = %id, "grants on a missing entry skipped");
                continue;
            };
            let acl = self.acls.get(&target)?;
            out.extend(
                acl.iter()
                    .filter(|a| a.grantee_type() == grantee_type && a.grantee_id() == grantee_id)
                    .map(|a| (target.clone(), a.clone())),
            );
        }
        Ok(out)
    }

    fn verify_grant(&self, target: &Target, ace: &Ace) -> Result<()> {
        let right = ace.right();
        if !right.grantable_on(target.kind) {
            return Err(AclError::InvalidRequest(format!("{} cannot be granted on {}", right.name, target.kind)));
        }
        if right.name == RIGHT_CROSS_DOMAIN_ADMIN {
            if ace.grantee_type() != GranteeType::Domain || target.kind != TargetType::Domain {
                return Err(AclError::InvalidRequest(format!("{} is granted to a domain on a domain", RIGHT_CROSS_DOMAIN_ADMIN)));
            }
            return Ok(());
        }
        if right.is_user_right() {
            return Ok(());
        }
        let invalid = || AclError::InvalidGrantee(format!("{} {} cannot hold admin right {}", ace.grantee_type(), ace.grantee_id(), right.name));
        match ace.grantee_type() {
            GranteeType::User => {
                self.resolver.resolve(&Identity::Account(ace.grantee_id().to_string()), RightClass::Admin).map_err(|_| invalid())?;
            }
            GranteeType::Group => {
                self.resolver.resolve(&Identity::Group(ace.grantee_id().to_string()), RightClass::Admin).map_err(|_| invalid())?;
            }
            _ => return Err(invalid()),
        }
        Ok(())
    }

    fn verify_grantor(&self, who: &Identity, target: &Target, right: &Right) -> Result<()> {
        if right.is_user_right() {
            if let Identity::Account(id) = who {
                if *id == target.id {
                    return Ok(());
                }
            }
        }
        let as_admin = !right.is_user_right() || self.is_admin(who)?;
        if self.can_delegate(who, target, &right.name, as_admin)? {
            return Ok(());
        }
        warn!(grantor = %who, target = %target, right = %right, "grantor cannot delegate right");
        Err(AclError::PermissionDenied(right.name.clone()))
    }

    fn is_admin(&self, who: &Identity) -> Result<bool> {
        let Identity::Account(id) = who else { return Ok(false) };
        match self.directory.lookup_entry(TargetType::Account, LookupBy::Id, id)? {
            Some(entry) => Ok(self.resolver.is_admin_account(&entry)? || self.directory.bool_attr(&entry, A_IS_SYSTEM_ADMIN_ACCOUNT)?),
            None => Ok(false),
        }
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Group membership of `entry` changed
    pub fn on_membership_changed(&self, entry: &Target) {
        debug!(entry = %entry, "group membership changed");
        self.resolver.clear();
        self.perms.invalidate_all();
    }

    pub fn on_entry_renamed(&self, entry: &Target) {
        self.acls.invalidate(&entry.id);
        self.resolver.invalidate(&entry.id);
        self.constraints.invalidate(&entry.id);
        self.perms.invalidate(entry);
    }

    /// Drop everything held about a deleted entry, its stored grants included
    pub fn on_entry_deleted(&self, entry: &Target) -> Result<()> {
        self.acls.store().delete_acl(entry)?;
        self.on_entry_renamed(entry);
        self.resolver.clear();
        Ok(())
    }

    /// Drop cached grants another process rewrote in the shared store.
    /// Returns how many targets were affected.
    pub fn sync_acls(&self) -> Result<usize> {
        let changed = self.acls.drop_changed()?;
        for t in &changed {
            self.perms.invalidate(t);
        }
        if !changed.is_empty() {
            info!(targets = changed.len(), "stored grants changed, cached copies dropped");
        }
        Ok(changed.len())
    }

    /// Constraint definitions on `source` changed
    pub fn on_constraints_changed(&self, source: &Target) {
        self.constraints.invalidate(&source.id);
    }

    pub fn flush_all(&self) {
        self.acls.clear();
        self.constraints.clear();
        self.resolver.clear();
        self.perms.invalidate_all();
        debug!("all caches flushed");
    }
}

/// Evaluation errors become a logged `false`; configuration errors propagate
fn fail_closed(op: &str, identity: &Identity, target: &Target, right: &str, r: Result<bool>) -> Result<bool> {
    match r {
        Ok(v) => Ok(v),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(op, identity = %identity, target = %target, right, error = %e, "check failed, denying");
            Ok(false)
        }
    }
}
