//! Well-known rights, attribute names and limits

// Rights with special handling
pub const RIGHT_CROSS_DOMAIN_ADMIN: &str = "crossDomainAdmin";
pub const RIGHT_ADMIN_LOGIN_AS: &str = "adminLoginAs";

// Attributes the engine reads from directory entries
pub const A_CONSTRAINT: &str = "zimbraConstraint";
pub const A_COS_ID: &str = "zimbraCOSId";
pub const A_DOMAIN_DEFAULT_COS_ID: &str = "zimbraDomainDefaultCOSId";
pub const A_IS_ADMIN_ACCOUNT: &str = "zimbraIsAdminAccount";
pub const A_IS_DELEGATED_ADMIN_ACCOUNT: &str = "zimbraIsDelegatedAdminAccount";
pub const A_IS_SYSTEM_ADMIN_ACCOUNT: &str = "zimbraIsSystemAdminAccount";
pub const A_IS_ADMIN_GROUP: &str = "zimbraIsAdminGroup";

/// Attributes whose constraints are never enforced
pub const IGNORED_CONSTRAINT_ATTRS: &[&str] = &[A_COS_ID, A_DOMAIN_DEFAULT_COS_ID];

// Maximum super-domain / group nesting walked (prevents infinite loops)
pub const MAX_INHERITANCE_DEPTH: usize = 32;

// Cache defaults
pub const DEFAULT_PERM_CACHE_TARGETS: usize = 1024;
pub const DEFAULT_PERM_CACHE_GRANTEES: usize = 64;
pub const DEFAULT_GRANTEE_CACHE_SIZE: usize = 512;
pub const DEFAULT_GRANTEE_CACHE_TTL_SECS: u64 = 30;
pub const DEFAULT_ACL_CACHE_SIZE: usize = 4096;

/// Directory boolean attribute value
pub const TRUE: &str = "TRUE";

#[inline]
pub fn is_true(v: &str) -> bool {
    v.eq_ignore_ascii_case(TRUE)
}
