//! Grantee types, resolved grantees, and the resolver that builds them

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ace::Ace;
use crate::config::GranteeCacheConfig;
use crate::constants::*;
use crate::directory::{Directory, GroupMembership, LookupBy};
use crate::error::{AclError, Result};
use crate::keys::grantee_cache_key;
use crate::right::RightClass;
use crate::target::{Target, TargetType};

/// Grantee type of an ACE, with its three-letter code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GranteeType {
    /// `usr`: one internal account
    #[serde(rename = "usr")]
    User,
    /// `grp`: members of a group, transitively
    #[serde(rename = "grp")]
    Group,
    /// `gst`: external user identified by email and password
    #[serde(rename = "gst")]
    Guest,
    /// `key`: external user identified by name and access key
    #[serde(rename = "key")]
    Key,
    /// `all`: any authenticated internal account
    #[serde(rename = "all")]
    AuthUser,
    /// `pub`: anyone, including anonymous
    #[serde(rename = "pub")]
    Public,
    /// `dom`: any internal account of a domain
    #[serde(rename = "dom")]
    Domain,
}

impl GranteeType {
    pub const ALL: [GranteeType; 7] = [
        GranteeType::User,
        GranteeType::Group,
        GranteeType::Guest,
        GranteeType::Key,
        GranteeType::AuthUser,
        GranteeType::Public,
        GranteeType::Domain,
    ];

    pub fn code(self) -> &'static str {
        match self {
            GranteeType::User => "usr",
            GranteeType::Group => "grp",
            GranteeType::Guest => "gst",
            GranteeType::Key => "key",
            GranteeType::AuthUser => "all",
            GranteeType::Public => "pub",
            GranteeType::Domain => "dom",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        GranteeType::ALL.into_iter().find(|t| t.code() == s)
    }

    /// Grantee id carries `:<secret>`
    #[inline]
    pub fn has_secret(self) -> bool {
        matches!(self, GranteeType::Guest | GranteeType::Key)
    }

    /// Matched in the individual tier
    #[inline]
    pub fn is_individual(self) -> bool {
        matches!(self, GranteeType::User | GranteeType::Guest | GranteeType::Key)
    }

    /// Can be granted admin rights
    #[inline]
    pub fn allowed_for_admin_rights(self) -> bool {
        matches!(self, GranteeType::User | GranteeType::Group)
    }
}

impl fmt::Display for GranteeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// Identity and resolved grantee
// ============================================================================

/// Raw identity handed to the engine by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// Internal account or calendar resource, by id
    Account(String),
    /// A group evaluated as the bearer of rights
    Group(String),
    Guest { email: String, password: String },
    Key { name: String, access_key: String },
    Anonymous,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Account(id) => write!(f, "account:{}", id),
            Identity::Group(id) => write!(f, "group:{}", id),
            Identity::Guest { email, .. } => write!(f, "guest:{}", email),
            Identity::Key { name, .. } => write!(f, "key:{}", name),
            Identity::Anonymous => f.write_str("anonymous"),
        }
    }
}

/// Resolved identity: own id, type, domain and assumable group ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grantee {
    pub id: String,
    pub grantee_type: GranteeType,
    pub secret: Option<String>,
    pub domain_id: Option<String>,
    /// Group ids this grantee can act as, with membership distance
    pub groups: HashMap<String, u32>,
    pub class: RightClass,
    pub is_system_admin: bool,
}

impl Grantee {
    pub fn public() -> Self {
        Grantee {
            id: GUID_PUBLIC.to_string(),
            grantee_type: GranteeType::Public,
            secret: None,
            domain_id: None,
            groups: HashMap::new(),
            class: RightClass::User,
            is_system_admin: false,
        }
    }

    /// Internal authenticated account
    #[inline]
    pub fn is_internal_user(&self) -> bool {
        self.grantee_type == GranteeType::User
    }

    /// Distance of a group ACE's grantee, if this grantee can act as that group
    #[inline]
    pub fn group_distance(&self, group_id: &str) -> Option<u32> {
        self.groups.get(group_id).copied()
    }

    /// The ACE's grantee designates this grantee
    pub fn matches(&self, ace: &Ace) -> bool {
        match ace.grantee_type() {
            GranteeType::User => self.grantee_type == GranteeType::User && ace.grantee_id() == self.id,
            GranteeType::Group => self.groups.contains_key(ace.grantee_id()),
            GranteeType::Guest | GranteeType::Key => {
                self.grantee_type == ace.grantee_type()
                    && ace.grantee_id().eq_ignore_ascii_case(&self.id)
                    && ace.secret().is_some()
                    && ace.secret() == self.secret.as_deref()
            }
            GranteeType::AuthUser => self.is_internal_user(),
            GranteeType::Domain => self.is_internal_user() && self.domain_id.as_deref() == Some(ace.grantee_id()),
            GranteeType::Public => true,
        }
    }

    /// Key under which this grantee's verdicts are cached
    pub fn cache_key(&self, as_admin: bool, can_delegate: bool) -> Vec<u8> {
        grantee_cache_key(&self.id, self.secret.as_deref(), as_admin, can_delegate)
    }
}

/// Grantee id stored on `all` ACEs
pub const GUID_AUTHUSER: &str = "00000000-0000-0000-0000-000000000000";
/// Grantee id stored on `pub` ACEs
pub const GUID_PUBLIC: &str = "99999999-9999-9999-9999-999999999999";

// ============================================================================
// Resolver
// ============================================================================

type MembershipKey = (String, bool);

/// Builds `Grantee` values, caching group membership for a short TTL
pub struct GranteeResolver {
    directory: Arc<dyn Directory>,
    cache: Mutex<LruCache<MembershipKey, (Instant, Arc<Vec<GroupMembership>>)>>,
    ttl: Duration,
}

impl GranteeResolver {
    pub fn new(directory: Arc<dyn Directory>, cfg: &GranteeCacheConfig) -> Self {
        let cap = NonZeroUsize::new(cfg.capacity).unwrap_or(NonZeroUsize::MIN);
        GranteeResolver { directory, cache: Mutex::new(LruCache::new(cap)), ttl: cfg.ttl() }
    }

    /// Resolve `identity` for a check of a right of `class`.
    /// Fails with InvalidGrantee if the identity cannot hold that class of right.
    pub fn resolve(&self, identity: &Identity, class: RightClass) -> Result<Grantee> {
        let admin = class == RightClass::Admin;
        match identity {
            Identity::Account(id) => {
                let entry = self.lookup_account(id)?;
                let is_system_admin = self.directory.bool_attr(&entry, A_IS_SYSTEM_ADMIN_ACCOUNT)?;
                if admin && !is_system_admin && !self.is_admin_account(&entry)? {
                    return Err(AclError::InvalidGrantee(format!("{} is not an admin account", entry.name)));
                }
                let groups = self.memberships(&entry, admin)?;
                Ok(Grantee {
                    id: entry.id.clone(),
                    grantee_type: GranteeType::User,
                    secret: None,
                    domain_id: entry.domain_id.clone(),
                    groups: groups.iter().map(|m| (m.id.clone(), m.distance)).collect(),
                    class,
                    is_system_admin,
                })
            }
            Identity::Group(id) => {
                let entry = self
                    .directory
                    .lookup_entry(TargetType::Group, LookupBy::Id, id)?
                    .ok_or_else(|| AclError::InvalidGrantee(format!("no such group: {}", id)))?;
                if admin && !self.directory.bool_attr(&entry, A_IS_ADMIN_GROUP)? {
                    return Err(AclError::InvalidGrantee(format!("{} is not an admin group", entry.name)));
                }
                let mut groups: HashMap<String, u32> =
                    self.memberships(&entry, admin)?.iter().map(|m| (m.id.clone(), m.distance)).collect();
                groups.insert(entry.id.clone(), 0);
                Ok(Grantee {
                    id: entry.id.clone(),
                    grantee_type: GranteeType::Group,
                    secret: None,
                    domain_id: entry.domain_id.clone(),
                    groups,
                    class,
                    is_system_admin: false,
                })
            }
            Identity::Guest { email, password } => self.external(GranteeType::Guest, email, password, class),
            Identity::Key { name, access_key } => self.external(GranteeType::Key, name, access_key, class),
            Identity::Anonymous => {
                if admin {
                    return Err(AclError::InvalidGrantee("anonymous cannot hold admin rights".into()));
                }
                Ok(Grantee::public())
            }
        }
    }

    fn external(&self, t: GranteeType, id: &str, secret: &str, class: RightClass) -> Result<Grantee> {
        if class == RightClass::Admin {
            return Err(AclError::InvalidGrantee(format!("external grantee {} cannot hold admin rights", id)));
        }
        if id.is_empty() || secret.is_empty() {
            return Err(AclError::InvalidGrantee("external grantee needs an id and a secret".into()));
        }
        Ok(Grantee {
            id: id.to_string(),
            grantee_type: t,
            secret: Some(secret.to_string()),
            domain_id: None,
            groups: HashMap::new(),
            class,
            is_system_admin: false,
        })
    }

    fn lookup_account(&self, id: &str) -> Result<Target> {
        if let Some(t) = self.directory.lookup_entry(TargetType::Account, LookupBy::Id, id)? {
            return Ok(t);
        }
        self.directory
            .lookup_entry(TargetType::CalResource, LookupBy::Id, id)?
            .ok_or_else(|| AclError::InvalidGrantee(format!("no such account: {}", id)))
    }

    /// Admin or delegated admin account
    pub fn is_admin_account(&self, entry: &Target) -> Result<bool> {
        Ok(self.directory.bool_attr(entry, A_IS_ADMIN_ACCOUNT)?
            || self.directory.bool_attr(entry, A_IS_DELEGATED_ADMIN_ACCOUNT)?)
    }

    /// Group membership of `entry`, served from cache while fresh
    pub fn memberships(&self, entry: &Target, admin_only: bool) -> Result<Arc<Vec<GroupMembership>>> {
        let key = (entry.id.clone(), admin_only);
        {
            let mut c = self.cache.lock();
            if let Some((at, groups)) = c.get(&key) {
                if at.elapsed() < self.ttl {
                    return Ok(Arc::clone(groups));
                }
            }
        }
        let groups = Arc::new(self.directory.group_membership(entry, admin_only)?);
        debug!(entry = %entry, admin_only, groups = groups.len(), "resolved group membership");
        self.cache.lock().put(key, (Instant::now(), Arc::clone(&groups)));
        Ok(groups)
    }

    /// Drop cached membership of one entry
    pub fn invalidate(&self, entry_id: &str) {
        let mut c = self.cache.lock();
        c.pop(&(entry_id.to_string(), false));
        c.pop(&(entry_id.to_string(), true));
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}
