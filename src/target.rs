//! Target kinds, the inheritance graph between them, and concrete targets

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AclError, Result};

/// Kind of entry a right can be checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Account,
    #[serde(rename = "calresource", alias = "resource")]
    CalResource,
    #[serde(rename = "dl", alias = "group")]
    Group,
    Domain,
    Cos,
    Server,
    Config,
    Global,
}

impl TargetType {
    pub const ALL: [TargetType; 8] = [
        TargetType::Account,
        TargetType::CalResource,
        TargetType::Group,
        TargetType::Domain,
        TargetType::Cos,
        TargetType::Server,
        TargetType::Config,
        TargetType::Global,
    ];

    pub fn code(self) -> &'static str {
        match self {
            TargetType::Account => "account",
            TargetType::CalResource => "calresource",
            TargetType::Group => "dl",
            TargetType::Domain => "domain",
            TargetType::Cos => "cos",
            TargetType::Server => "server",
            TargetType::Config => "config",
            TargetType::Global => "global",
        }
    }

    pub fn from_code(s: &str) -> Result<Self> {
        Ok(match s {
            "account" => TargetType::Account,
            "calresource" | "resource" => TargetType::CalResource,
            "dl" | "group" => TargetType::Group,
            "domain" => TargetType::Domain,
            "cos" => TargetType::Cos,
            "server" => TargetType::Server,
            "config" => TargetType::Config,
            "global" => TargetType::Global,
            _ => return Err(AclError::InvalidRequest(format!("unknown target type: {}", s))),
        })
    }

    /// Entries of this kind live inside a domain
    #[inline]
    pub fn is_domained(self) -> bool {
        matches!(self, TargetType::Account | TargetType::CalResource | TargetType::Group)
    }

    /// Entries of this kind can be members of groups
    #[inline]
    pub fn is_group_member(self) -> bool {
        self.is_domained()
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// Inheritance graph
// ============================================================================

/// Static inheritance edges between target kinds.
///
/// `account`/`calresource` -> `dl` -> `domain` -> `global`;
/// `cos`, `server`, `config` -> `global`.
pub struct TargetGraph;

impl TargetGraph {
    /// Kinds a concrete target of `kind` inherits grants from, nearest first
    pub fn inherits_from(kind: TargetType) -> &'static [TargetType] {
        use TargetType::*;
        match kind {
            Account | CalResource => &[Group, Domain, Global],
            Group => &[Group, Domain, Global],
            Domain => &[Domain, Global],
            Cos | Server | Config => &[Global],
            Global => &[],
        }
    }

    /// Kinds on which a right executable on `kind` may be granted
    pub fn grantable_on(kind: TargetType) -> &'static [TargetType] {
        use TargetType::*;
        match kind {
            Account => &[Account, CalResource, Group, Domain, Global],
            CalResource => &[CalResource, Group, Domain, Global],
            Group => &[Group, Domain, Global],
            Domain => &[Domain, Global],
            Cos => &[Cos, Global],
            Server => &[Server, Global],
            Config => &[Config, Global],
            Global => &[Global],
        }
    }

    /// A right whose home kind is `right_kind` can be executed on a target of `kind`
    #[inline]
    pub fn executable_on(right_kind: TargetType, kind: TargetType) -> bool {
        right_kind == kind || (right_kind == TargetType::Account && kind == TargetType::CalResource)
    }

    /// Other targets may inherit grants placed on a target of this kind
    pub fn is_inheritance_source(kind: TargetType) -> bool {
        TargetType::ALL.iter().any(|k| Self::inherits_from(*k).contains(&kind))
    }
}

// ============================================================================
// Concrete target
// ============================================================================

/// A directory entry a right is checked on (or granted on)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub kind: TargetType,
    /// Owning domain id; for a domain, its own id
    pub domain_id: Option<String>,
}

pub const GLOBAL_GRANT_ID: &str = "globalgrant";

impl Target {
    pub fn new(kind: TargetType, id: impl Into<String>, name: impl Into<String>, domain_id: Option<String>) -> Self {
        Target { id: id.into(), name: name.into(), kind, domain_id }
    }

    /// The root every chain ends at
    pub fn global() -> Self {
        Target::new(TargetType::Global, GLOBAL_GRANT_ID, "globalacltarget", None)
    }

    #[inline]
    pub fn is_global(&self) -> bool {
        self.kind == TargetType::Global
    }

    /// Domain the target belongs to, for domained kinds and domains themselves
    pub fn owning_domain(&self) -> Option<&str> {
        match self.kind {
            TargetType::Domain => Some(self.id.as_str()),
            k if k.is_domained() => self.domain_id.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}
