//! Effective rights reports
//!
//! Everything a grantee holds on one target, and the rights members of
//! grant-carrying groups inherit from them. Members that belong to exactly
//! the same subset of those groups form one shape and share one report.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::acl::AclCache;
use crate::attrs::{AllowedAttrs, AttrRightEvaluator};
use crate::catalog::RightCatalog;
use crate::constants::RIGHT_CROSS_DOMAIN_ADMIN;
use crate::cross_domain::CrossDomainGuard;
use crate::directory::{Directory, LookupBy};
use crate::error::Result;
use crate::grantee::Grantee;
use crate::iter::{AclSegments, Segment};
use crate::preset::{check_segment, Verdict};
use crate::right::{AttrOp, Right, RightClass};
use crate::target::{Target, TargetType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveRights {
    pub target: Target,
    pub grantee_id: String,
    pub preset_rights: BTreeSet<String>,
    pub get_attrs: AllowedAttrs,
    pub set_attrs: AllowedAttrs,
}

/// Members that belong to exactly `groups` among the groups considered
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GroupShape {
    pub groups: BTreeSet<String>,
    pub members: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapeRights {
    pub shape: GroupShape,
    pub rights: EffectiveRights,
}

/// Partition the account members of `groups` by the subset of `groups` they belong to
pub fn shape_members(directory: &dyn Directory, groups: &[Target]) -> Result<Vec<GroupShape>> {
    let mut member_of: HashMap<String, BTreeSet<String>> = HashMap::new();
    for g in groups {
        for m in directory.group_members(g)? {
            if m.kind.is_group_member() && m.kind != TargetType::Group {
                member_of.entry(m.id).or_default().insert(g.id.clone());
            }
        }
    }
    let mut shapes: BTreeMap<BTreeSet<String>, BTreeSet<String>> = BTreeMap::new();
    for (member, in_groups) in member_of {
        shapes.entry(in_groups).or_default().insert(member);
    }
    Ok(shapes.into_iter().map(|(groups, members)| GroupShape { groups, members }).collect())
}

pub struct EffectiveRightsEvaluator<'a> {
    directory: &'a dyn Directory,
    acls: &'a AclCache,
    catalog: &'a RightCatalog,
}

impl<'a> EffectiveRightsEvaluator<'a> {
    pub fn new(directory: &'a dyn Directory, acls: &'a AclCache, catalog: &'a RightCatalog) -> Self {
        EffectiveRightsEvaluator { directory, acls, catalog }
    }

    fn candidates(&self, grantee: &Grantee, kind: TargetType) -> Vec<Arc<Right>> {
        self.catalog
            .executable_presets_on(kind)
            .into_iter()
            .filter(|r| grantee.class == RightClass::Admin || r.is_user_right())
            .collect()
    }

    pub fn effective_rights(&self, grantee: &Grantee, target: &Target) -> Result<EffectiveRights> {
        if grantee.is_system_admin {
            let preset_rights = self.candidates(grantee, target.kind).iter().map(|r| r.name.clone()).collect();
            return Ok(EffectiveRights {
                target: target.clone(),
                grantee_id: grantee.id.clone(),
                preset_rights,
                get_attrs: AllowedAttrs::AllowAll,
                set_attrs: AllowedAttrs::AllowAll,
            });
        }
        let segments = || AclSegments::new(self.directory, self.acls, target, grantee.domain_id.as_deref());
        let mut preset_rights = self.presets_over(segments(), grantee, target)?;
        if target.kind == TargetType::Domain && self.catalog.contains(RIGHT_CROSS_DOMAIN_ADMIN) {
            let guard = CrossDomainGuard::new(self.directory, self.acls);
            if guard.check_cross_domain_admin_right(grantee.domain_id.as_deref(), target, false)? == Verdict::Allowed {
                preset_rights.insert(RIGHT_CROSS_DOMAIN_ADMIN.to_string());
            }
        }
        let attrs = AttrRightEvaluator::new(self.directory, self.acls);
        let get_attrs = attrs.accessible_attrs_over(segments(), grantee, target, AttrOp::Get, false)?;
        let set_attrs = attrs.accessible_attrs_over(segments(), grantee, target, AttrOp::Set, false)?;
        debug!(grantee = %grantee.id, target = %target, presets = preset_rights.len(), "effective rights");
        Ok(EffectiveRights { target: target.clone(), grantee_id: grantee.id.clone(), preset_rights, get_attrs, set_attrs })
    }

    /// Preset rights allowed over `segments`, one pass for every candidate right
    fn presets_over<I>(&self, segments: I, grantee: &Grantee, target: &Target) -> Result<BTreeSet<String>>
    where
        I: IntoIterator<Item = Result<Segment>>,
    {
        let mut pending: Vec<(Arc<Right>, bool)> = self
            .candidates(grantee, target.kind)
            .into_iter()
            .filter(|r| r.name != RIGHT_CROSS_DOMAIN_ADMIN)
            .map(|r| (r, false))
            .collect();
        let mut allowed = BTreeSet::new();
        for seg in segments {
            if pending.is_empty() {
                break;
            }
            let seg = seg?;
            pending.retain_mut(|(r, seen)| match check_segment(&seg, grantee, &**r, false, seen) {
                Some(d) => {
                    if d.verdict == Verdict::Allowed {
                        allowed.insert(r.name.clone());
                    }
                    false
                }
                None => true,
            });
        }
        Ok(allowed)
    }

    /// Rights members of each shape inherit from the groups of that shape.
    /// Evaluated on the first member of each shape as a representative.
    pub fn group_shape_rights(&self, grantee: &Grantee, groups: &[Target]) -> Result<Vec<ShapeRights>> {
        let by_id: HashMap<&str, &Target> = groups.iter().map(|g| (g.id.as_str(), g)).collect();
        let guard = CrossDomainGuard::new(self.directory, self.acls);
        let mut out = Vec::new();
        for shape in shape_members(self.directory, groups)? {
            let Some(rep) = shape.members.iter().next() else { continue };
            let Some(rep) = self.lookup_member(rep)? else { continue };
            let mut run = Vec::with_capacity(shape.groups.len());
            for gid in &shape.groups {
                if let Some(g) = by_id.get(gid.as_str()) {
                    run.push((self.acls.get(g)?, Arc::new((*g).clone()), 1));
                }
            }
            let merged = || {
                Segment::merge_groups(0, &run, |g| guard.group_grant_honored(grantee.domain_id.as_deref(), &rep, g))
            };
            let preset_rights = self.presets_over([merged()], grantee, &rep)?;
            let attrs = AttrRightEvaluator::new(self.directory, self.acls);
            let get_attrs = attrs.accessible_attrs_over([merged()], grantee, &rep, AttrOp::Get, false)?;
            let set_attrs = attrs.accessible_attrs_over([merged()], grantee, &rep, AttrOp::Set, false)?;
            let rights = EffectiveRights { target: rep, grantee_id: grantee.id.clone(), preset_rights, get_attrs, set_attrs };
            out.push(ShapeRights { shape, rights });
        }
        Ok(out)
    }

    fn lookup_member(&self, id: &str) -> Result<Option<Target>> {
        for kind in [TargetType::Account, TargetType::CalResource] {
            if let Some(t) = self.directory.lookup_entry(kind, LookupBy::Id, id)? {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }
}
