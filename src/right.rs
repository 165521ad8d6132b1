//! Right definitions: a closed sum of preset, attribute and combo rights

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AclError, Result};
use crate::target::{TargetGraph, TargetType};

/// User rights are held by end users on their own objects; admin rights by admins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RightClass {
    User,
    Admin,
}

/// Direction of an attribute right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttrOp {
    #[serde(rename = "getAttrs")]
    Get,
    #[serde(rename = "setAttrs")]
    Set,
}

impl AttrOp {
    pub fn code(self) -> &'static str {
        match self {
            AttrOp::Get => "get",
            AttrOp::Set => "set",
        }
    }

    /// A grant of `self` also grants `needed`.
    /// setAttrs implies getAttrs, never the other way round.
    #[inline]
    pub fn suitable_for(self, needed: AttrOp) -> bool {
        self == needed || (self == AttrOp::Set && needed == AttrOp::Get)
    }
}

/// Attribute coverage of an attr right. The map value is the "limit" flag,
/// carried for callers that describe rights; evaluation applies value
/// constraints to every attribute whether flagged or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrSet {
    All,
    Some(BTreeMap<String, bool>),
}

impl AttrSet {
    pub fn contains(&self, attr: &str) -> bool {
        match self {
            AttrSet::All => true,
            AttrSet::Some(m) => m.contains_key(attr),
        }
    }

    /// Attributes flagged "limit" in the right's definition
    pub fn limited(&self) -> impl Iterator<Item = &str> {
        let named = match self {
            AttrSet::All => None,
            AttrSet::Some(m) => Some(m),
        };
        named.into_iter().flatten().filter(|(_, limit)| **limit).map(|(a, _)| a.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum RightKind {
    Preset {
        target: TargetType,
    },
    Attrs {
        op: AttrOp,
        targets: Vec<TargetType>,
        attrs: AttrSet,
    },
    Combo {
        /// Directly contained right names, in definition order
        direct: Vec<String>,
        /// Every preset right reachable through containment
        presets: Vec<Arc<Right>>,
        /// Every attr right reachable through containment
        attrs: Vec<Arc<Right>>,
    },
}

/// An immutable, named capability
#[derive(Debug, Clone)]
pub struct Right {
    pub name: String,
    pub class: RightClass,
    pub kind: RightKind,
    /// Verdict when nothing matched: Some(true) allow, Some(false) deny
    pub default: Option<bool>,
    /// Slot in the permission cache, for cacheable rights
    pub cache_index: Option<usize>,
    /// Name of a registered fallback predicate
    pub fallback: Option<String>,
    pub description: String,
}

impl PartialEq for Right {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Right {}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Right {
    #[inline] pub fn is_preset(&self) -> bool { matches!(self.kind, RightKind::Preset { .. }) }
    #[inline] pub fn is_attr(&self) -> bool { matches!(self.kind, RightKind::Attrs { .. }) }
    #[inline] pub fn is_combo(&self) -> bool { matches!(self.kind, RightKind::Combo { .. }) }
    #[inline] pub fn is_user_right(&self) -> bool { self.class == RightClass::User }
    #[inline] pub fn is_cacheable(&self) -> bool { self.cache_index.is_some() }

    pub fn attr_op(&self) -> Option<AttrOp> {
        match &self.kind {
            RightKind::Attrs { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Kinds this right names as its own targets (preset/attr), or the union over a combo
    pub fn target_types(&self) -> Vec<TargetType> {
        let mut out = match &self.kind {
            RightKind::Preset { target } => vec![*target],
            RightKind::Attrs { targets, .. } => targets.clone(),
            RightKind::Combo { presets, attrs, .. } => presets.iter().chain(attrs.iter()).flat_map(|r| r.target_types()).collect(),
        };
        out.sort();
        out.dedup();
        out
    }

    /// Can be evaluated against a target of `kind`
    pub fn executable_on(&self, kind: TargetType) -> bool {
        match &self.kind {
            RightKind::Preset { target } => TargetGraph::executable_on(*target, kind),
            RightKind::Attrs { targets, .. } => targets.iter().any(|t| TargetGraph::executable_on(*t, kind)),
            RightKind::Combo { presets, attrs, .. } => presets.iter().chain(attrs.iter()).any(|r| r.executable_on(kind)),
        }
    }

    /// Can be granted on a target of `kind`
    pub fn grantable_on(&self, kind: TargetType) -> bool {
        match &self.kind {
            RightKind::Preset { target } => TargetGraph::grantable_on(*target).contains(&kind),
            RightKind::Attrs { targets, .. } => targets.iter().any(|t| TargetGraph::grantable_on(*t).contains(&kind)),
            RightKind::Combo { presets, attrs, .. } => {
                let mut all = presets.iter().chain(attrs.iter()).peekable();
                all.peek().is_some() && all.all(|r| r.grantable_on(kind))
            }
        }
    }

    /// Executable when acting, grantable when delegating
    #[inline]
    pub fn applicable_on(&self, kind: TargetType, can_delegate_needed: bool) -> bool {
        if can_delegate_needed { self.grantable_on(kind) } else { self.executable_on(kind) }
    }

    /// `self` is `preset`, or a combo that transitively contains it
    pub fn covers_preset(&self, preset: &Right) -> bool {
        match &self.kind {
            RightKind::Preset { .. } => self.name == preset.name,
            RightKind::Combo { presets, .. } => presets.iter().any(|r| r.name == preset.name),
            RightKind::Attrs { .. } => false,
        }
    }

    /// Attr rights granted by an ACE on this right
    pub fn expand_attr_rights(self: &Arc<Self>) -> Vec<Arc<Right>> {
        match &self.kind {
            RightKind::Attrs { .. } => vec![Arc::clone(self)],
            RightKind::Combo { attrs, .. } => attrs.clone(),
            RightKind::Preset { .. } => Vec::new(),
        }
    }

    /// Fails with InternalInconsistency unless this is an attr right
    pub fn as_attrs(&self) -> Result<(AttrOp, &[TargetType], &AttrSet)> {
        match &self.kind {
            RightKind::Attrs { op, targets, attrs } => Ok((*op, targets.as_slice(), attrs)),
            _ => Err(AclError::InternalInconsistency(format!("{} is not an attribute right", self.name))),
        }
    }
}
