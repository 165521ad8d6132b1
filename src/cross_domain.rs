//! Cross-domain guard
//!
//! The cross-domain-admin right lives on a domain and is held by a `dom`
//! grantee: every admin of that grantee domain may manage entries of the
//! target domain through groups owned elsewhere.

use tracing::debug;

use crate::acl::AclCache;
use crate::constants::RIGHT_CROSS_DOMAIN_ADMIN;
use crate::directory::{Directory, LookupBy};
use crate::error::Result;
use crate::grantee::GranteeType;
use crate::preset::Verdict;
use crate::target::{Target, TargetType};

pub struct CrossDomainGuard<'a> {
    directory: &'a dyn Directory,
    acls: &'a AclCache,
}

impl<'a> CrossDomainGuard<'a> {
    pub fn new(directory: &'a dyn Directory, acls: &'a AclCache) -> Self {
        CrossDomainGuard { directory, acls }
    }

    /// Whether admins of `grantee_domain` hold the cross-domain-admin right on `target`.
    /// Only a domain target can carry it.
    pub fn check_cross_domain_admin_right(
        &self,
        grantee_domain: Option<&str>,
        target: &Target,
        can_delegate_needed: bool,
    ) -> Result<Verdict> {
        if target.kind != TargetType::Domain {
            debug!(target = %target, "cross domain admin right checked on a non-domain target");
            return Ok(Verdict::Denied);
        }
        let Some(grantee_domain) = grantee_domain else {
            return Ok(Verdict::Denied);
        };
        let acl = self.acls.get(target)?;
        let mut seen = false;
        for ace in acl.iter() {
            if ace.right().name != RIGHT_CROSS_DOMAIN_ADMIN || ace.grantee_type() != GranteeType::Domain {
                continue;
            }
            if can_delegate_needed && ace.can_execute_only() {
                continue;
            }
            seen = true;
            if ace.grantee_id() != grantee_domain {
                continue;
            }
            return Ok(if ace.deny() { Verdict::Denied } else { Verdict::Allowed });
        }
        Ok(if seen { Verdict::Denied } else { Verdict::NoDecision })
    }

    /// Whether positive grants found on `group` apply when checking `target`.
    /// A group owned by the target's domain or by the grantee's domain is
    /// always honored; any other needs the cross-domain-admin right on the
    /// target's domain.
    pub fn group_grant_honored(&self, grantee_domain: Option<&str>, target: &Target, group: &Target) -> Result<bool> {
        let Some(target_domain) = target.owning_domain() else {
            return Ok(true);
        };
        let Some(group_domain) = group.domain_id.as_deref() else {
            return Ok(false);
        };
        if group_domain == target_domain || Some(group_domain) == grantee_domain {
            return Ok(true);
        }
        let Some(dom) = self.directory.lookup_entry(TargetType::Domain, LookupBy::Id, target_domain)? else {
            return Ok(false);
        };
        let ok = self.check_cross_domain_admin_right(grantee_domain, &dom, false)? == Verdict::Allowed;
        debug!(group = %group, target = %target, ok, "cross domain group grant");
        Ok(ok)
    }
}
