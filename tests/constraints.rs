//! Attribute value constraints on set-attribute checks

mod common;

use std::sync::Arc;

use common::{catalog, setup, values, who, Fixture};
use parking_lot::Mutex;
use rightgate::constants::{A_CONSTRAINT, A_COS_ID, A_IS_DELEGATED_ADMIN_ACCOUNT};
use rightgate::{
    AccessManager, Ace, AclError, AttrType, Directory, EngineConfig, GrantStore, MemoryDirectory, MemoryGrantStore, Result, Target,
    TargetType,
};

/// Domain with a default cos carrying a password-length constraint, an admin
/// allowed to set it on the domain's accounts, and one account
fn policy() -> (Fixture, Target, Target, Target) {
    let f = setup();
    let dom = f.domain("example.com");
    let cos = f.dir.add_cos("default").unwrap();
    f.dir.set_attr(&cos, A_CONSTRAINT, &["zimbraPasswordMinLength:min=6:max=10"]).unwrap();
    let adm = f.admin("adm@example.com");
    let a = f.account("a@example.com");
    f.grant(&dom, &format!("{} usr setPasswordPolicy", adm.id));
    (f, adm, a, cos)
}

#[test]
fn test_value_outside_range_is_reported() {
    let (f, adm, a, _) = policy();
    let r = f.mgr.can_set_attrs(&who(&adm), &a, &values(&[("zimbraPasswordMinLength", "5")]), true);
    assert_eq!(r, Err(AclError::ConstraintViolated("zimbraPasswordMinLength".into())));

    let r = f.mgr.can_set_attrs(&who(&adm), &a, &values(&[("zimbraPasswordMinLength", "11")]), true);
    assert!(matches!(r, Err(AclError::ConstraintViolated(_))));
}

#[test]
fn test_value_inside_range_is_allowed() {
    let (f, adm, a, _) = policy();
    assert!(f.mgr.can_set_attrs(&who(&adm), &a, &values(&[("zimbraPasswordMinLength", "8")]), true).unwrap());
    assert!(f
        .mgr
        .can_perform(&who(&adm), &a, "setPasswordPolicy", Some(&values(&[("zimbraPasswordMinLength", "6")])), true)
        .unwrap());
}

#[test]
fn test_not_settable_is_false_not_violation() {
    let (f, adm, a, _) = policy();
    let other = f.admin("other@example.com");
    assert_eq!(f.mgr.can_set_attrs(&who(&other), &a, &values(&[("zimbraPasswordMinLength", "5")]), true), Ok(false));
    // description is outside the admin's grant
    assert_eq!(f.mgr.can_set_attrs(&who(&adm), &a, &values(&[("description", "x")]), true), Ok(false));
}

#[test]
fn test_constraint_setter_is_exempt() {
    let (f, adm, a, cos) = policy();
    f.grant(&cos, &format!("{} usr setCosConstraint", adm.id));
    f.mgr.flush_all();
    assert!(f.mgr.can_set_attrs(&who(&adm), &a, &values(&[("zimbraPasswordMinLength", "3")]), true).unwrap());
}

#[test]
fn test_account_cos_selects_constraints() {
    let (f, adm, a, _) = policy();
    let loose = f.dir.add_cos("loose").unwrap();
    f.dir.set_attr(&loose, A_CONSTRAINT, &["zimbraPasswordMinLength:min=1"]).unwrap();
    f.dir.set_attr(&a, A_COS_ID, &[loose.id.as_str()]).unwrap();
    assert!(f.mgr.can_set_attrs(&who(&adm), &a, &values(&[("zimbraPasswordMinLength", "3")]), true).unwrap());
}

#[test]
fn test_changed_constraints_need_invalidation() {
    let (f, adm, a, cos) = policy();
    let v = values(&[("zimbraPasswordMinLength", "12")]);
    assert!(f.mgr.can_set_attrs(&who(&adm), &a, &v, true).is_err());

    f.dir.set_attr(&cos, A_CONSTRAINT, &["zimbraPasswordMinLength:min=6:max=20"]).unwrap();
    f.mgr.on_constraints_changed(&cos);
    assert!(f.mgr.can_set_attrs(&who(&adm), &a, &v, true).unwrap());
}

#[test]
fn test_system_admin_not_bound() {
    let (f, _, a, _) = policy();
    let root = f.system_admin("root@example.com");
    assert!(f.mgr.can_set_attrs(&who(&root), &a, &values(&[("zimbraPasswordMinLength", "2")]), true).unwrap());
}

/// Memory store whose ACL for one target cannot be read
#[derive(Default)]
struct UnreadableStore {
    inner: MemoryGrantStore,
    broken: Mutex<Option<String>>,
}

impl GrantStore for UnreadableStore {
    fn load_acl(&self, target: &Target) -> Result<Vec<String>> {
        if self.broken.lock().as_deref() == Some(target.id.as_str()) {
            return Err(AclError::Storage(format!("{} unreadable", target)));
        }
        self.inner.load_acl(target)
    }

    fn save_acl(&self, target: &Target, aces: &[String]) -> Result<()> {
        self.inner.save_acl(target, aces)
    }

    fn delete_acl(&self, target: &Target) -> Result<()> {
        self.inner.delete_acl(target)
    }

    fn revision(&self, target: &Target) -> Result<u64> {
        self.inner.revision(target)
    }

    fn targets_with_grants(&self) -> Result<Vec<(TargetType, String)>> {
        self.inner.targets_with_grants()
    }
}

#[test]
fn test_source_grants_read_only_when_a_constraint_applies() {
    common::init_tracing();
    let dir = Arc::new(MemoryDirectory::new());
    let dom = dir.add_domain("example.com").unwrap();
    let cos = dir.add_cos("default").unwrap();
    dir.declare_attr("zimbraPasswordMinLength", AttrType::Integer, &[TargetType::Account, TargetType::Cos]);
    dir.set_attr(&cos, A_CONSTRAINT, &["zimbraPasswordMinLength:min=6"]).unwrap();
    let adm = dir.add_account("adm@example.com").unwrap();
    dir.set_attr(&adm, A_IS_DELEGATED_ADMIN_ACCOUNT, &["TRUE"]).unwrap();
    let a = dir.add_account("a@example.com").unwrap();

    let store = Arc::new(UnreadableStore::default());
    let directory: Arc<dyn Directory> = dir.clone();
    let mgr = AccessManager::new(catalog(), directory, store.clone(), EngineConfig::default()).unwrap();
    for line in [format!("{} usr setDescription", adm.id), format!("{} usr setPasswordPolicy", adm.id)] {
        mgr.grant_right(None, &dom, Ace::parse(&line, mgr.catalog()).unwrap()).unwrap();
    }
    *store.broken.lock() = Some(cos.id.clone());

    // nothing constrains description, so the cos grants are never consulted
    assert!(mgr.can_set_attrs(&who(&adm), &a, &values(&[("description", "x")]), true).unwrap());
    // a constrained attribute needs them, and an unreadable ACL fails closed
    assert!(!mgr.can_set_attrs(&who(&adm), &a, &values(&[("zimbraPasswordMinLength", "8")]), true).unwrap());
}
