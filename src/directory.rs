//! Directory collaborator: entry lookup, group membership, attributes
//!
//! The engine only reads the directory. `MemoryDirectory` is a complete
//! in-process implementation for embedding and tests.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::constraint::AttrType;
use crate::error::{AclError, Result};
use crate::target::{Target, TargetType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupBy {
    Id,
    Name,
}

/// A group an entry belongs to, directly (distance 1) or through nesting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    pub id: String,
    pub distance: u32,
}

/// Read-only view of the directory the engine evaluates against
pub trait Directory: Send + Sync {
    fn lookup_entry(&self, kind: TargetType, by: LookupBy, value: &str) -> Result<Option<Target>>;

    /// Groups `entry` belongs to, closest first. With `admin_only`, only admin groups.
    fn group_membership(&self, entry: &Target, admin_only: bool) -> Result<Vec<GroupMembership>>;

    /// Nearest existing domain above `domain`
    fn parent_domain(&self, domain: &Target) -> Result<Option<Target>>;

    /// Entry whose `zimbraConstraint` values govern writes to `target`
    fn constraint_source(&self, target: &Target) -> Result<Option<Target>>;

    fn attribute_type(&self, attr: &str) -> AttrType;

    fn attr_values(&self, target: &Target, attr: &str) -> Result<Vec<String>>;

    /// Every attribute an entry of `kind` can carry
    fn attrs_in_class(&self, kind: TargetType) -> Result<BTreeSet<String>>;

    /// Accounts, resources and groups inside `group`, transitively
    fn group_members(&self, group: &Target) -> Result<Vec<Target>>;

    fn bool_attr(&self, target: &Target, attr: &str) -> Result<bool> {
        Ok(self.attr_values(target, attr)?.first().is_some_and(|v| is_true(v)))
    }
}

// ============================================================================
// In-memory directory
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    target: Target,
    attrs: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    entries: HashMap<String, Entry>,
    names: HashMap<(TargetType, String), String>,
    /// member id -> direct group ids
    member_of: HashMap<String, Vec<String>>,
    attr_types: HashMap<String, AttrType>,
    class_attrs: HashMap<TargetType, BTreeSet<String>>,
}

impl Inner {
    fn insert(&mut self, kind: TargetType, name: &str, domain_id: Option<String>) -> Result<Target> {
        let key = (kind, name.to_lowercase());
        if self.names.contains_key(&key) {
            return Err(AclError::Directory(format!("{} {} already exists", kind, name)));
        }
        self.next_id += 1;
        let id = format!("{}-{:04}", kind.code(), self.next_id);
        let target = Target::new(kind, id.clone(), name, domain_id);
        self.names.insert(key, id.clone());
        self.entries.insert(id, Entry { target: target.clone(), attrs: HashMap::new() });
        Ok(target)
    }

    fn by_name(&self, kind: TargetType, name: &str) -> Option<&Entry> {
        self.names.get(&(kind, name.to_lowercase())).and_then(|id| self.entries.get(id))
    }

    fn domain_of(&self, addr: &str) -> Result<String> {
        let (_, dom) = addr.split_once('@').ok_or_else(|| AclError::Directory(format!("not an address: {}", addr)))?;
        self.by_name(TargetType::Domain, dom)
            .map(|e| e.target.id.clone())
            .ok_or_else(|| AclError::Directory(format!("no such domain: {}", dom)))
    }

    fn is_true(&self, id: &str, attr: &str) -> bool {
        self.entries
            .get(id)
            .and_then(|e| e.attrs.get(attr))
            .and_then(|v| v.first())
            .is_some_and(|v| is_true(v))
    }
}

/// Thread-safe in-memory directory
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    inner: RwLock<Inner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_domain(&self, name: &str) -> Result<Target> {
        let mut g = self.inner.write();
        let t = g.insert(TargetType::Domain, name, None)?;
        // a domain is its own owning domain
        let fixed = Target { domain_id: Some(t.id.clone()), ..t };
        if let Some(e) = g.entries.get_mut(&fixed.id) {
            e.target = fixed.clone();
        }
        Ok(fixed)
    }

    pub fn add_account(&self, addr: &str) -> Result<Target> {
        self.add_domained(TargetType::Account, addr)
    }

    pub fn add_calresource(&self, addr: &str) -> Result<Target> {
        self.add_domained(TargetType::CalResource, addr)
    }

    pub fn add_group(&self, addr: &str) -> Result<Target> {
        self.add_domained(TargetType::Group, addr)
    }

    fn add_domained(&self, kind: TargetType, addr: &str) -> Result<Target> {
        let mut g = self.inner.write();
        let dom = g.domain_of(addr)?;
        g.insert(kind, addr, Some(dom))
    }

    pub fn add_cos(&self, name: &str) -> Result<Target> {
        self.inner.write().insert(TargetType::Cos, name, None)
    }

    pub fn add_server(&self, name: &str) -> Result<Target> {
        self.inner.write().insert(TargetType::Server, name, None)
    }

    /// The global config entry, created on first use
    pub fn config(&self) -> Target {
        let mut g = self.inner.write();
        if let Some(e) = g.by_name(TargetType::Config, "config") {
            return e.target.clone();
        }
        let t = Target::new(TargetType::Config, "config", "config", None);
        g.names.insert((TargetType::Config, "config".into()), t.id.clone());
        g.entries.insert(t.id.clone(), Entry { target: t.clone(), attrs: HashMap::new() });
        t
    }

    /// Direct membership of `member` in `group`
    pub fn add_member(&self, group: &Target, member: &Target) -> Result<()> {
        if group.kind != TargetType::Group {
            return Err(AclError::Directory(format!("{} is not a group", group)));
        }
        if !member.kind.is_group_member() {
            return Err(AclError::Directory(format!("{} cannot be a group member", member)));
        }
        let mut g = self.inner.write();
        let list = g.member_of.entry(member.id.clone()).or_default();
        if !list.contains(&group.id) {
            list.push(group.id.clone());
        }
        Ok(())
    }

    pub fn remove_member(&self, group: &Target, member: &Target) {
        if let Some(list) = self.inner.write().member_of.get_mut(&member.id) {
            list.retain(|g| g != &group.id);
        }
    }

    pub fn set_attr(&self, target: &Target, attr: &str, values: &[&str]) -> Result<()> {
        let mut g = self.inner.write();
        let e = g.entries.get_mut(&target.id).ok_or_else(|| AclError::Directory(format!("no such entry: {}", target)))?;
        if values.is_empty() {
            e.attrs.remove(attr);
        } else {
            e.attrs.insert(attr.to_string(), values.iter().map(|v| v.to_string()).collect());
        }
        Ok(())
    }

    pub fn add_attr_value(&self, target: &Target, attr: &str, value: &str) -> Result<()> {
        let mut g = self.inner.write();
        let e = g.entries.get_mut(&target.id).ok_or_else(|| AclError::Directory(format!("no such entry: {}", target)))?;
        e.attrs.entry(attr.to_string()).or_default().push(value.to_string());
        Ok(())
    }

    /// Declare an attribute's type and the kinds that carry it
    pub fn declare_attr(&self, attr: &str, attr_type: AttrType, kinds: &[TargetType]) {
        let mut g = self.inner.write();
        g.attr_types.insert(attr.to_string(), attr_type);
        for k in kinds {
            g.class_attrs.entry(*k).or_default().insert(attr.to_string());
        }
    }

    pub fn rename_entry(&self, target: &Target, new_name: &str) -> Result<Target> {
        let mut g = self.inner.write();
        let e = g.entries.get(&target.id).cloned().ok_or_else(|| AclError::Directory(format!("no such entry: {}", target)))?;
        g.names.remove(&(e.target.kind, e.target.name.to_lowercase()));
        g.names.insert((e.target.kind, new_name.to_lowercase()), e.target.id.clone());
        let renamed = Target { name: new_name.to_string(), ..e.target };
        if let Some(e) = g.entries.get_mut(&renamed.id) {
            e.target = renamed.clone();
        }
        Ok(renamed)
    }

    pub fn delete_entry(&self, target: &Target) {
        let mut g = self.inner.write();
        if let Some(e) = g.entries.remove(&target.id) {
            g.names.remove(&(e.target.kind, e.target.name.to_lowercase()));
        }
        g.member_of.remove(&target.id);
        for list in g.member_of.values_mut() {
            list.retain(|x| x != &target.id);
        }
    }
}

impl Directory for MemoryDirectory {
    fn lookup_entry(&self, kind: TargetType, by: LookupBy, value: &str) -> Result<Option<Target>> {
        if kind == TargetType::Global {
            return Ok(Some(Target::global()));
        }
        let g = self.inner.read();
        let e = match by {
            LookupBy::Id => g.entries.get(value).filter(|e| e.target.kind == kind),
            LookupBy::Name => g.by_name(kind, value),
        };
        Ok(e.map(|e| e.target.clone()))
    }

    fn group_membership(&self, entry: &Target, admin_only: bool) -> Result<Vec<GroupMembership>> {
        let g = self.inner.read();
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
        queue.push_back((entry.id.as_str(), 0));
        while let Some((id, dist)) = queue.pop_front() {
            if dist as usize >= MAX_INHERITANCE_DEPTH {
                continue;
            }
            for parent in g.member_of.get(id).into_iter().flatten() {
                if parent == &entry.id || !seen.insert(parent.as_str()) {
                    continue;
                }
                if !admin_only || g.is_true(parent, A_IS_ADMIN_GROUP) {
                    out.push(GroupMembership { id: parent.clone(), distance: dist + 1 });
                }
                queue.push_back((parent.as_str(), dist + 1));
            }
        }
        Ok(out)
    }

    fn parent_domain(&self, domain: &Target) -> Result<Option<Target>> {
        let g = self.inner.read();
        let mut name = domain.name.as_str();
        while let Some((_, rest)) = name.split_once('.') {
            if let Some(e) = g.by_name(TargetType::Domain, rest) {
                return Ok(Some(e.target.clone()));
            }
            name = rest;
        }
        Ok(None)
    }

    fn constraint_source(&self, target: &Target) -> Result<Option<Target>> {
        match target.kind {
            TargetType::Account | TargetType::CalResource => {
                let g = self.inner.read();
                let first = |id: &str, attr: &str| g.entries.get(id).and_then(|e| e.attrs.get(attr)).and_then(|v| v.first()).cloned();
                let cos_id = first(&target.id, A_COS_ID)
                    .or_else(|| target.domain_id.as_deref().and_then(|d| first(d, A_DOMAIN_DEFAULT_COS_ID)));
                let cos = match cos_id {
                    Some(id) => g.entries.get(&id).filter(|e| e.target.kind == TargetType::Cos),
                    None => g.by_name(TargetType::Cos, "default"),
                };
                Ok(cos.map(|e| e.target.clone()))
            }
            TargetType::Domain | TargetType::Server => Ok(Some(self.config())),
            _ => Ok(None),
        }
    }

    fn attribute_type(&self, attr: &str) -> AttrType {
        self.inner.read().attr_types.get(attr).copied().unwrap_or(AttrType::String)
    }

    fn attr_values(&self, target: &Target, attr: &str) -> Result<Vec<String>> {
        let g = self.inner.read();
        Ok(g.entries.get(&target.id).and_then(|e| e.attrs.get(attr)).cloned().unwrap_or_default())
    }

    fn attrs_in_class(&self, kind: TargetType) -> Result<BTreeSet<String>> {
        let g = self.inner.read();
        let mut out = g.class_attrs.get(&kind).cloned().unwrap_or_default();
        // a calendar resource is an account
        if kind == TargetType::CalResource {
            out.extend(g.class_attrs.get(&TargetType::Account).into_iter().flatten().cloned());
        }
        Ok(out)
    }

    fn group_members(&self, group: &Target) -> Result<Vec<Target>> {
        let g = self.inner.read();
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for (member, groups) in &g.member_of {
            for grp in groups {
                children.entry(grp.as_str()).or_default().push(member.as_str());
            }
        }
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([group.id.as_str()]);
        while let Some(id) = queue.pop_front() {
            let mut kids = children.get(id).cloned().unwrap_or_default();
            kids.sort_unstable();
            for kid in kids {
                if kid == group.id || !seen.insert(kid) {
                    continue;
                }
                if let Some(e) = g.entries.get(kid) {
                    out.push(e.target.clone());
                    if e.target.kind == TargetType::Group {
                        queue.push_back(kid);
                    }
                }
            }
        }
        Ok(out)
    }
}
