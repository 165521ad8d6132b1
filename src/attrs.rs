//! Attribute right evaluation
//!
//! Unlike preset rights, every applicable ACE along the chain contributes.
//! Each named attribute remembers the relativity (smaller is more specific)
//! at which it was first allowed and first denied; a conflict stays denied
//! when the denial is at least as specific as the allow.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::acl::AclCache;
use crate::constants::{A_CONSTRAINT, IGNORED_CONSTRAINT_ATTRS};
use crate::constraint::{parse_all, AttributeConstraint};
use crate::directory::Directory;
use crate::error::{AclError, Result};
use crate::grantee::{Grantee, GranteeType};
use crate::iter::{AclSegments, Grant, Segment};
use crate::right::{AttrOp, AttrSet};
use crate::target::Target;

/// Proposed attribute values, attribute name -> values
pub type AttrValues = BTreeMap<String, Vec<String>>;

/// Attributes a grantee may get or set on a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowedAttrs {
    AllowAll,
    DenyAll,
    AllowSome(BTreeSet<String>),
}

impl AllowedAttrs {
    pub fn contains(&self, attr: &str) -> bool {
        match self {
            AllowedAttrs::AllowAll => true,
            AllowedAttrs::DenyAll => false,
            AllowedAttrs::AllowSome(s) => s.contains(actual_attr_name(attr)),
        }
    }

    /// Fails with PermissionDenied naming the first requested attribute not allowed
    pub fn check<S: AsRef<str>>(&self, requested: &[S]) -> Result<()> {
        match self {
            AllowedAttrs::AllowAll => Ok(()),
            AllowedAttrs::DenyAll => {
                let first = requested.first().map(|s| actual_attr_name(s.as_ref()).to_string()).unwrap_or_else(|| "*".into());
                Err(AclError::PermissionDenied(first))
            }
            AllowedAttrs::AllowSome(s) => {
                for r in requested {
                    let name = actual_attr_name(r.as_ref());
                    if !s.contains(name) {
                        return Err(AclError::PermissionDenied(name.to_string()));
                    }
                }
                Ok(())
            }
        }
    }

    /// `check` as a boolean
    pub fn can_access<S: AsRef<str>>(&self, requested: &[S]) -> bool {
        self.check(requested).is_ok()
    }

    /// Every attribute in `set` is allowed
    pub fn covers(&self, set: &AttrSet) -> bool {
        match set {
            AttrSet::All => *self == AllowedAttrs::AllowAll,
            AttrSet::Some(m) => m.keys().all(|a| self.contains(a)),
        }
    }
}

/// Strip a leading `+` (add value) or `-` (remove value) modifier
#[inline]
pub fn actual_attr_name(attr: &str) -> &str {
    attr.strip_prefix(['+', '-']).unwrap_or(attr)
}

// ============================================================================
// Evaluator
// ============================================================================

#[derive(Debug, Default)]
struct Collected {
    allow: HashMap<String, u32>,
    deny: HashMap<String, u32>,
}

impl Collected {
    /// Allowed names after conflicts: a denial at relativity <= the allow wins
    fn resolve(&self, below: Option<u32>) -> BTreeSet<String> {
        self.allow
            .iter()
            .filter(|&(_, &ar)| below.map_or(true, |b| ar < b))
            .filter(|&(a, &ar)| self.deny.get(a).map_or(true, |&dr| dr > ar))
            .map(|(a, _)| a.clone())
            .collect()
    }
}

pub struct AttrRightEvaluator<'a> {
    directory: &'a dyn Directory,
    acls: &'a AclCache,
}

impl<'a> AttrRightEvaluator<'a> {
    pub fn new(directory: &'a dyn Directory, acls: &'a AclCache) -> Self {
        AttrRightEvaluator { directory, acls }
    }

    /// Attributes `grantee` may access with `op` on `target`
    pub fn accessible_attrs(&self, grantee: &Grantee, target: &Target, op: AttrOp, can_delegate_needed: bool) -> Result<AllowedAttrs> {
        let segments = AclSegments::new(self.directory, self.acls, target, grantee.domain_id.as_deref());
        self.accessible_attrs_over(segments, grantee, target, op, can_delegate_needed)
    }

    /// Same as `accessible_attrs`, over an explicit segment sequence
    pub fn accessible_attrs_over<I>(&self, segments: I, grantee: &Grantee, target: &Target, op: AttrOp, can_delegate_needed: bool) -> Result<AllowedAttrs>
    where
        I: IntoIterator<Item = Result<Segment>>,
    {
        let mut c = Collected::default();
        let mut rel = 1u32;
        for seg in segments {
            let seg = seg?;
            if let Some(r) = self.collect(&seg, grantee, target, op, can_delegate_needed, GranteeType::is_individual, rel, &mut c)? {
                return Ok(r);
            }
            if let Some(r) = self.collect(&seg, grantee, target, op, can_delegate_needed, |t| t == GranteeType::Group, rel + 1, &mut c)? {
                return Ok(r);
            }
            rel += 2;
        }
        let allowed = c.resolve(None);
        debug!(grantee = %grantee.id, target = %target, op = ?op, allowed = allowed.len(), "accessible attrs");
        Ok(AllowedAttrs::AllowSome(allowed))
    }

    /// Fold one tier of a segment into `c`; Some on an all-attributes short circuit
    #[allow(clippy::too_many_arguments)]
    fn collect<F: Fn(GranteeType) -> bool>(
        &self,
        seg: &Segment,
        grantee: &Grantee,
        target: &Target,
        op: AttrOp,
        cd: bool,
        in_tier: F,
        rel: u32,
        c: &mut Collected,
    ) -> Result<Option<AllowedAttrs>> {
        for g in seg.grants.iter().filter(|g| in_tier(g.ace.grantee_type())) {
            if !applies(g, seg.sub_domain, cd) || !grantee.matches(&g.ace) {
                continue;
            }
            for ar in g.ace.right().expand_attr_rights() {
                if !ar.applicable_on(target.kind, cd) {
                    continue;
                }
                let (aop, _, attrs) = ar.as_attrs()?;
                if g.ace.deny() {
                    // a denial only ever negates its own kind
                    if aop != op {
                        continue;
                    }
                    match attrs {
                        AttrSet::All => {
                            let layered = c.resolve(Some(rel));
                            debug!(via = %g.on, right = %ar, "all attributes denied");
                            return Ok(Some(if layered.is_empty() { AllowedAttrs::DenyAll } else { AllowedAttrs::AllowSome(layered) }));
                        }
                        AttrSet::Some(m) => {
                            for a in m.keys() {
                                c.deny.entry(a.clone()).or_insert(rel);
                            }
                        }
                    }
                } else {
                    if !aop.suitable_for(op) {
                        continue;
                    }
                    match attrs {
                        AttrSet::All => {
                            debug!(via = %g.on, right = %ar, "all attributes allowed");
                            return Ok(Some(self.allow_all(target, c)?));
                        }
                        AttrSet::Some(m) => {
                            for a in m.keys() {
                                c.allow.entry(a.clone()).or_insert(rel);
                            }
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// All attributes of the target's class minus every name already denied.
    /// A denial recorded before the allow-all wins even over a closer allow.
    fn allow_all(&self, target: &Target, c: &Collected) -> Result<AllowedAttrs> {
        if c.deny.is_empty() {
            return Ok(AllowedAttrs::AllowAll);
        }
        let mut all = self.directory.attrs_in_class(target.kind)?;
        all.retain(|a| !c.deny.contains_key(a));
        Ok(AllowedAttrs::AllowSome(all))
    }
}

#[inline]
fn applies(g: &Grant, sub_domain: bool, cd: bool) -> bool {
    if !g.ace.deny() && g.ace.sub_domain() != sub_domain {
        return false;
    }
    !(cd && g.ace.can_execute_only())
}

// ============================================================================
// Constraints
// ============================================================================

/// Parsed constraints per constraint-source entry
#[derive(Default)]
pub struct ConstraintCache {
    cache: Mutex<HashMap<String, Arc<Vec<AttributeConstraint>>>>,
}

impl ConstraintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, directory: &dyn Directory, source: &Target) -> Result<Arc<Vec<AttributeConstraint>>> {
        if let Some(c) = self.cache.lock().get(&source.id) {
            return Ok(Arc::clone(c));
        }
        let lines = directory.attr_values(source, A_CONSTRAINT)?;
        let parsed = Arc::new(parse_all(&lines, |a| directory.attribute_type(a)));
        self.cache.lock().insert(source.id.clone(), Arc::clone(&parsed));
        Ok(parsed)
    }

    pub fn invalidate(&self, source_id: &str) {
        self.cache.lock().remove(source_id);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

/// Set-attributes check with value constraints.
/// Ok(false) when an attribute is not settable; ConstraintViolated is surfaced.
pub fn check_set_attrs(
    evaluator: &AttrRightEvaluator<'_>,
    constraints: &ConstraintCache,
    grantee: &Grantee,
    target: &Target,
    values: &AttrValues,
) -> Result<bool> {
    let allowed = evaluator.accessible_attrs(grantee, target, AttrOp::Set, false)?;
    if allowed == AllowedAttrs::DenyAll {
        return Ok(false);
    }
    let names: Vec<&str> = values.keys().map(|k| k.as_str()).collect();
    if let Err(e) = allowed.check(&names) {
        debug!(grantee = %grantee.id, target = %target, error = %e, "set attrs not allowed");
        return Ok(false);
    }

    let Some(source) = evaluator.directory.constraint_source(target)? else {
        return Ok(true);
    };
    let list = constraints.get(evaluator.directory, &source)?;
    let mut applicable = Vec::new();
    for (attr, vals) in values {
        let name = actual_attr_name(attr);
        let Some(c) = list.iter().find(|c| c.attr() == name && !c.is_empty()) else { continue };
        if IGNORED_CONSTRAINT_ATTRS.contains(&name) {
            warn!(attr = name, source = %source, "constraint on this attribute is ignored");
            continue;
        }
        applicable.push((c, vals));
    }
    if applicable.is_empty() {
        return Ok(true);
    }

    // whoever may set the constraints themselves is not bound by them
    let on_source = evaluator.accessible_attrs(grantee, &source, AttrOp::Set, false)?;
    if on_source.contains(A_CONSTRAINT) {
        debug!(grantee = %grantee.id, source = %source, "grantee can set constraints, constraints skipped");
        return Ok(true);
    }
    for (c, vals) in applicable {
        c.check(vals)?;
    }
    Ok(true)
}
