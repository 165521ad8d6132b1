//! Preset right evaluation
//!
//! For the target and then each segment of its chain, grantee tiers are tried
//! in order: individual, group, and for user rights also domain,
//! authenticated user and public. The first candidate ACE naming the grantee
//! decides. Candidates that name someone else still count as "seen": a chain
//! with candidates but no match denies, a chain with none gives no decision.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::acl::AclCache;
use crate::constants::RIGHT_CROSS_DOMAIN_ADMIN;
use crate::cross_domain::CrossDomainGuard;
use crate::directory::Directory;
use crate::error::{AclError, Result};
use crate::grantee::{Grantee, GranteeType};
use crate::iter::{AclSegments, Grant, Segment};
use crate::right::Right;
use crate::target::Target;

/// Outcome of a preset check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Allowed,
    Denied,
    NoDecision,
}

impl Verdict {
    /// Collapse with a default for no decision
    #[inline]
    pub fn or(self, default: bool) -> bool {
        match self {
            Verdict::Allowed => true,
            Verdict::Denied => false,
            Verdict::NoDecision => default,
        }
    }
}

/// The grant that decided a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    pub target: Target,
    pub grantee_type: GranteeType,
    pub grantee_id: String,
    pub right: String,
    pub deny: bool,
}

impl Via {
    fn of(g: &Grant) -> Self {
        Via {
            target: (*g.on).clone(),
            grantee_type: g.ace.grantee_type(),
            grantee_id: g.ace.grantee_id().to_string(),
            right: g.ace.right().name.clone(),
            deny: g.ace.deny(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub via: Option<Via>,
}

impl Decision {
    pub fn of(verdict: Verdict) -> Self {
        Decision { verdict, via: None }
    }

    fn by(g: &Grant) -> Self {
        let verdict = if g.ace.deny() { Verdict::Denied } else { Verdict::Allowed };
        Decision { verdict, via: Some(Via::of(g)) }
    }
}

/// Tiers in specificity order; the last three apply to user rights only
const TIERS: [&[GranteeType]; 5] = [
    &[GranteeType::User, GranteeType::Guest, GranteeType::Key],
    &[GranteeType::Group],
    &[GranteeType::Domain],
    &[GranteeType::AuthUser],
    &[GranteeType::Public],
];

pub struct PresetRightEvaluator<'a> {
    directory: &'a dyn Directory,
    acls: &'a AclCache,
}

impl<'a> PresetRightEvaluator<'a> {
    pub fn new(directory: &'a dyn Directory, acls: &'a AclCache) -> Self {
        PresetRightEvaluator { directory, acls }
    }

    /// Decide whether `grantee` holds `right` on `target`
    pub fn check(&self, grantee: &Grantee, target: &Target, right: &Right, can_delegate_needed: bool) -> Result<Decision> {
        if right.is_combo() {
            return Err(AclError::InvalidRequest(format!("combo right {} must be checked through its members", right.name)));
        }
        if !right.is_preset() {
            return Err(AclError::InvalidRequest(format!("{} is not a preset right", right.name)));
        }
        if right.name == RIGHT_CROSS_DOMAIN_ADMIN {
            let guard = CrossDomainGuard::new(self.directory, self.acls);
            return Ok(Decision::of(guard.check_cross_domain_admin_right(grantee.domain_id.as_deref(), target, can_delegate_needed)?));
        }
        if !right.applicable_on(target.kind, can_delegate_needed) {
            debug!(right = %right, target = %target, can_delegate_needed, "right not applicable on target type");
            return Ok(Decision::of(Verdict::NoDecision));
        }

        let mut seen = false;
        for seg in AclSegments::new(self.directory, self.acls, target, grantee.domain_id.as_deref()) {
            let seg = seg?;
            if let Some(d) = check_segment(&seg, grantee, right, can_delegate_needed, &mut seen) {
                debug!(grantee = %grantee.id, target = %target, right = %right, verdict = ?d.verdict,
                       via = ?d.via.as_ref().map(|v| v.target.to_string()), "preset right decided");
                return Ok(d);
            }
        }
        let verdict = if seen { Verdict::Denied } else { Verdict::NoDecision };
        debug!(grantee = %grantee.id, target = %target, right = %right, verdict = ?verdict, "no matching grant");
        Ok(Decision::of(verdict))
    }
}

/// ACE is relevant to a check of `right` at this chain position
#[inline]
fn is_candidate(g: &Grant, right: &Right, sub_domain: bool, can_delegate_needed: bool) -> bool {
    if !g.ace.right().covers_preset(right) {
        return false;
    }
    // denials apply at every position; positive grants only where their
    // sub-domain flag matches
    if !g.ace.deny() && g.ace.sub_domain() != sub_domain {
        return false;
    }
    !(can_delegate_needed && g.ace.can_execute_only())
}

/// Evaluate the tiers of one segment
pub(crate) fn check_segment(seg: &Segment, grantee: &Grantee, right: &Right, cd: bool, seen: &mut bool) -> Option<Decision> {
    let tiers = if right.is_user_right() { &TIERS[..] } else { &TIERS[..2] };
    for tier in tiers {
        let candidates = seg
            .grants
            .iter()
            .filter(|g| tier.contains(&g.ace.grantee_type()))
            .filter(|g| is_candidate(g, right, seg.sub_domain, cd));
        if tier[0] == GranteeType::Group {
            if let Some(d) = closest_group(candidates, grantee, seen) {
                return Some(d);
            }
            continue;
        }
        for g in candidates {
            *seen = true;
            if grantee.matches(&g.ace) {
                return Some(Decision::by(g));
            }
        }
    }
    None
}

/// Among group candidates the grantee is a member of, the closest group wins;
/// at equal distance a denial wins
fn closest_group<'g, I: Iterator<Item = &'g Grant>>(candidates: I, grantee: &Grantee, seen: &mut bool) -> Option<Decision> {
    let mut best: Option<(u32, &Grant)> = None;
    for g in candidates {
        *seen = true;
        let Some(d) = grantee.group_distance(g.ace.grantee_id()) else { continue };
        best = match best {
            Some((bd, bg)) if bd < d || (bd == d && (bg.ace.deny() || !g.ace.deny())) => Some((bd, bg)),
            _ => Some((d, g)),
        };
    }
    best.map(|(_, g)| Decision::by(g))
}
