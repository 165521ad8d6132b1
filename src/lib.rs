//! Rightgate - directory authorization engine
//!
//! Rights (preset, attribute, combo) are granted as ACEs on directory
//! entries and inherited down a target chain: the entry, its groups, its
//! domain and super-domains, then the global grant entry. `AccessManager` is
//! the front door; the evaluators underneath are usable on their own.

pub mod ace;
pub mod acl;
pub mod attrs;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod constraint;
pub mod cross_domain;
pub mod directory;
pub mod effective;
pub mod engine;
pub mod error;
pub mod grantee;
pub mod iter;
pub mod keys;
pub mod preset;
pub mod right;
pub mod store;
pub mod target;

pub use ace::{Ace, RightModifier};
pub use acl::{Acl, AclCache};
pub use attrs::{AllowedAttrs, AttrRightEvaluator, AttrValues};
pub use cache::{CacheEntry, CacheStats, PermissionCache};
pub use catalog::RightCatalog;
pub use config::EngineConfig;
pub use constraint::{AttrType, AttributeConstraint};
pub use cross_domain::CrossDomainGuard;
pub use directory::{Directory, GroupMembership, LookupBy, MemoryDirectory};
pub use effective::{EffectiveRights, GroupShape, ShapeRights};
pub use engine::{AccessManager, CheckOptions, CheckRightFallback};
pub use error::{AclError, Result};
pub use grantee::{Grantee, GranteeResolver, GranteeType, Identity};
pub use iter::{ChainEntry, EntryRole, TargetIterator};
pub use preset::{Decision, PresetRightEvaluator, Verdict, Via};
pub use right::{AttrOp, AttrSet, Right, RightClass, RightKind};
pub use store::{GrantStore, LmdbGrantStore, MemoryGrantStore};
pub use target::{Target, TargetGraph, TargetType};
