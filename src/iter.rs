//! Target inheritance chain
//!
//! `TargetIterator` yields, in specificity order: the target itself, the
//! groups it belongs to (closest first), its domain, the super-domains of that
//! domain, and finally the global grant entry. Which of those stages apply to
//! a target follows `TargetGraph::inherits_from` for its kind. `AclSegments` turns that chain
//! into ACE lists: one per entry, except that a run of group entries is merged
//! into a single list (denials, then delegable allows, then allows).

use std::collections::HashSet;
use std::sync::Arc;

use crate::ace::Ace;
use crate::acl::{Acl, AclCache};
use crate::constants::MAX_INHERITANCE_DEPTH;
use crate::cross_domain::CrossDomainGuard;
use crate::directory::{Directory, LookupBy};
use crate::error::{AclError, Result};
use crate::target::{Target, TargetGraph, TargetType};

/// Why an entry is on the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRole {
    /// Position 0
    Target,
    /// Group the target belongs to, with membership distance
    Group(u32),
    /// The target's own domain
    Domain,
    /// A domain above the target's domain
    SuperDomain,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub target: Target,
    pub role: EntryRole,
}

impl ChainEntry {
    #[inline]
    pub fn is_group(&self) -> bool {
        matches!(self.role, EntryRole::Group(_))
    }

    /// Positions where only sub-domain grants apply positively
    #[inline]
    pub fn sub_domain(&self) -> bool {
        self.role == EntryRole::SuperDomain
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    Groups(usize),
    Domain,
    SuperDomains,
    Global,
    Done,
}

/// Lazily walks the inheritance chain of one target. Restartable; never infinite.
pub struct TargetIterator<'a> {
    directory: &'a dyn Directory,
    target: Target,
    expand_groups: bool,
    groups: Option<Vec<(Target, u32)>>,
    stage: Stage,
    domain: Option<Target>,
    seen_domains: HashSet<String>,
}

impl<'a> TargetIterator<'a> {
    pub fn new(directory: &'a dyn Directory, target: Target, expand_groups: bool) -> Self {
        TargetIterator {
            directory,
            target,
            expand_groups,
            groups: None,
            stage: Stage::Start,
            domain: None,
            seen_domains: HashSet::new(),
        }
    }

    /// Start over from position 0. Group membership already loaded is reused.
    pub fn restart(&mut self) {
        self.stage = Stage::Start;
        self.domain = None;
        self.seen_domains.clear();
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The target's kind inherits grants from entries of `kind`
    #[inline]
    fn inherits(&self, kind: TargetType) -> bool {
        TargetGraph::inherits_from(self.target.kind).contains(&kind)
    }

    fn load_groups(&mut self) -> Result<()> {
        if self.groups.is_some() {
            return Ok(());
        }
        let mut out = Vec::new();
        if self.expand_groups && self.inherits(TargetType::Group) {
            for m in self.directory.group_membership(&self.target, false)? {
                match self.directory.lookup_entry(TargetType::Group, LookupBy::Id, &m.id)? {
                    Some(g) => out.push((g, m.distance)),
                    None => tracing::warn!(group = %m.id, target = %self.target, "group in membership not found, skipped"),
                }
            }
            out.sort_by_key(|(_, d)| *d);
        }
        self.groups = Some(out);
        Ok(())
    }

    fn own_domain(&self) -> Result<Option<Target>> {
        match self.target.kind {
            TargetType::Domain => Ok(Some(self.target.clone())),
            k if k.is_domained() => match &self.target.domain_id {
                Some(id) => self
                    .directory
                    .lookup_entry(TargetType::Domain, LookupBy::Id, id)?
                    .map(Some)
                    .ok_or_else(|| AclError::Directory(format!("domain {} of {} not found", id, self.target))),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn step(&mut self) -> Result<Option<ChainEntry>> {
        loop {
            match self.stage {
                Stage::Start => {
                    self.stage = if TargetGraph::inherits_from(self.target.kind).is_empty() { Stage::Done } else { Stage::Groups(0) };
                    return Ok(Some(ChainEntry { target: self.target.clone(), role: EntryRole::Target }));
                }
                Stage::Groups(i) => {
                    self.load_groups()?;
                    match self.groups.as_ref().and_then(|g| g.get(i)) {
                        Some((g, d)) => {
                            let entry = ChainEntry { target: g.clone(), role: EntryRole::Group(*d) };
                            self.stage = Stage::Groups(i + 1);
                            return Ok(Some(entry));
                        }
                        None => self.stage = Stage::Domain,
                    }
                }
                Stage::Domain => {
                    self.stage = Stage::SuperDomains;
                    let dom = if self.inherits(TargetType::Domain) { self.own_domain()? } else { None };
                    if let Some(d) = &dom {
                        self.seen_domains.insert(d.id.clone());
                    }
                    self.domain = dom.clone();
                    // a domain target was already yielded at position 0
                    if let Some(d) = dom.filter(|_| self.target.kind != TargetType::Domain) {
                        return Ok(Some(ChainEntry { target: d, role: EntryRole::Domain }));
                    }
                }
                Stage::SuperDomains => {
                    let parent = match &self.domain {
                        Some(d) if self.seen_domains.len() <= MAX_INHERITANCE_DEPTH => self.directory.parent_domain(d)?,
                        _ => None,
                    };
                    match parent {
                        Some(p) if !self.seen_domains.contains(&p.id) => {
                            self.seen_domains.insert(p.id.clone());
                            self.domain = Some(p.clone());
                            return Ok(Some(ChainEntry { target: p, role: EntryRole::SuperDomain }));
                        }
                        _ => self.stage = Stage::Global,
                    }
                }
                Stage::Global => {
                    self.stage = Stage::Done;
                    if self.inherits(TargetType::Global) {
                        return Ok(Some(ChainEntry { target: Target::global(), role: EntryRole::Global }));
                    }
                }
                Stage::Done => return Ok(None),
            }
        }
    }
}

impl<'a> Iterator for TargetIterator<'a> {
    type Item = Result<ChainEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(e) => e.map(Ok),
            Err(e) => {
                self.stage = Stage::Done;
                Some(Err(e))
            }
        }
    }
}

// ============================================================================
// ACE segments
// ============================================================================

/// An ACE together with the entry it was granted on
#[derive(Debug, Clone)]
pub struct Grant {
    pub ace: Ace,
    pub on: Arc<Target>,
}

/// ACEs evaluated together: one chain entry, or a merged run of groups
#[derive(Debug, Clone)]
pub struct Segment {
    /// Index of the segment along the chain, 0 for the target itself
    pub position: usize,
    pub role: EntryRole,
    pub sub_domain: bool,
    pub grants: Vec<Grant>,
}

impl Segment {
    pub fn single(position: usize, entry: &ChainEntry, acl: &Acl) -> Self {
        let on = Arc::new(entry.target.clone());
        Segment {
            position,
            role: entry.role,
            sub_domain: entry.sub_domain(),
            grants: acl.iter().map(|a| Grant { ace: a.clone(), on: Arc::clone(&on) }).collect(),
        }
    }

    /// Merge group ACLs: every denial, then delegable and plain allows of the
    /// groups whose positive grants are honored
    pub fn merge_groups<F>(position: usize, run: &[(Arc<Acl>, Arc<Target>, u32)], mut honored: F) -> Result<Self>
    where
        F: FnMut(&Target) -> Result<bool>,
    {
        let mut denied = Vec::new();
        let mut delegable = Vec::new();
        let mut allowed = Vec::new();
        for (acl, on, _) in run {
            denied.extend(acl.denied().iter().map(|a| Grant { ace: a.clone(), on: Arc::clone(on) }));
            if acl.allowed_delegable().is_empty() && acl.allowed().is_empty() {
                continue;
            }
            if !honored(on)? {
                tracing::debug!(group = %on, "positive grants on cross-domain group not honored");
                continue;
            }
            delegable.extend(acl.allowed_delegable().iter().map(|a| Grant { ace: a.clone(), on: Arc::clone(on) }));
            allowed.extend(acl.allowed().iter().map(|a| Grant { ace: a.clone(), on: Arc::clone(on) }));
        }
        denied.extend(delegable);
        denied.extend(allowed);
        let closest = run.iter().map(|(_, _, d)| *d).min().unwrap_or(1);
        Ok(Segment { position, role: EntryRole::Group(closest), sub_domain: false, grants: denied })
    }
}

/// Chain of a target turned into ACE segments
pub struct AclSegments<'a> {
    chain: TargetIterator<'a>,
    acls: &'a AclCache,
    guard: CrossDomainGuard<'a>,
    grantee_domain: Option<String>,
    pending: Option<ChainEntry>,
    position: usize,
    done: bool,
}

impl<'a> AclSegments<'a> {
    pub fn new(directory: &'a dyn Directory, acls: &'a AclCache, target: &Target, grantee_domain: Option<&str>) -> Self {
        AclSegments {
            chain: TargetIterator::new(directory, target.clone(), true),
            acls,
            guard: CrossDomainGuard::new(directory, acls),
            grantee_domain: grantee_domain.map(str::to_string),
            pending: None,
            position: 0,
            done: false,
        }
    }

    fn single(&mut self, entry: ChainEntry) -> Result<Segment> {
        let acl = self.acls.get(&entry.target)?;
        let seg = Segment::single(self.position, &entry, &acl);
        self.position += 1;
        Ok(seg)
    }

    fn merged(&mut self, run: Vec<(Arc<Acl>, Arc<Target>, u32)>) -> Result<Segment> {
        let target = self.chain.target().clone();
        let guard = &self.guard;
        let grantee_domain = self.grantee_domain.as_deref();
        let seg = Segment::merge_groups(self.position, &run, |g| guard.group_grant_honored(grantee_domain, &target, g))?;
        self.position += 1;
        Ok(seg)
    }

    fn step(&mut self) -> Result<Option<Segment>> {
        if let Some(e) = self.pending.take() {
            return self.single(e).map(Some);
        }
        let mut run = Vec::new();
        loop {
            match self.chain.next() {
                None if run.is_empty() => return Ok(None),
                None => return self.merged(run).map(Some),
                Some(Err(e)) => return Err(e),
                Some(Ok(entry)) => {
                    if let EntryRole::Group(d) = entry.role {
                        let acl = self.acls.get(&entry.target)?;
                        run.push((acl, Arc::new(entry.target), d));
                    } else if run.is_empty() {
                        return self.single(entry).map(Some);
                    } else {
                        self.pending = Some(entry);
                        return self.merged(run).map(Some);
                    }
                }
            }
        }
    }
}

impl<'a> Iterator for AclSegments<'a> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(s)) => Some(Ok(s)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
