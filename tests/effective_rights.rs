//! Effective rights and group shape reports

mod common;

use common::{setup, who};
use rightgate::AllowedAttrs;

#[test]
fn test_admin_effective_rights_on_account() {
    let f = setup();
    let dom = f.domain("example.com");
    let adm = f.admin("adm@example.com");
    let a = f.account("a@example.com");
    f.grant(&dom, &format!("{} usr domainAdminRights", adm.id));
    f.grant(&a, &format!("{} usr -renameAccount", adm.id));
    f.grant(&a, &format!("{} usr setDescription", adm.id));

    let r = f.mgr.effective_rights(&who(&adm), &a, true).unwrap();
    assert_eq!(r.grantee_id, adm.id);
    assert_eq!(r.preset_rights.iter().cloned().collect::<Vec<_>>(), vec!["deleteAccount"]);
    for attr in ["displayName", "zimbraMailQuota", "description"] {
        assert!(r.get_attrs.contains(attr), "{}", attr);
    }
    assert!(r.set_attrs.contains("description"));
    assert!(!r.set_attrs.contains("displayName"));

    // agrees with single checks
    assert!(f.mgr.can_do(&who(&adm), &a, "deleteAccount", true, false).unwrap());
    assert!(!f.mgr.can_do(&who(&adm), &a, "renameAccount", true, true).unwrap());

    let on_domain = f.mgr.effective_rights(&who(&adm), &dom, true).unwrap();
    assert!(on_domain.preset_rights.contains("createAccount"));
    assert!(on_domain.preset_rights.contains("listDomain"));
}

#[test]
fn test_user_effective_rights() {
    let f = setup();
    f.domain("example.com");
    let u = f.account("u@example.com");
    let a = f.account("a@example.com");
    f.grant(&a, &format!("{} usr viewFreeBusy", u.id));
    f.grant(&a, "00000000-0000-0000-0000-000000000000 all invite");
    f.grant(&a, &format!("{} usr -invite", u.id));

    let r = f.mgr.effective_rights(&who(&u), &a, false).unwrap();
    assert_eq!(r.preset_rights.iter().cloned().collect::<Vec<_>>(), vec!["viewFreeBusy"]);
    assert_eq!(r.get_attrs, AllowedAttrs::AllowSome(Default::default()));
}

#[test]
fn test_system_admin_gets_everything() {
    let f = setup();
    f.domain("example.com");
    let root = f.system_admin("root@example.com");
    let a = f.account("a@example.com");
    let r = f.mgr.effective_rights(&who(&root), &a, true).unwrap();
    for right in ["adminLoginAs", "deleteAccount", "renameAccount", "viewFreeBusy"] {
        assert!(r.preset_rights.contains(right), "{}", right);
    }
    assert!(!r.preset_rights.contains("createAccount"));
    assert_eq!(r.get_attrs, AllowedAttrs::AllowAll);
    assert_eq!(r.set_attrs, AllowedAttrs::AllowAll);
}

#[test]
fn test_cross_domain_admin_reported_on_domain() {
    let f = setup();
    let d1 = f.domain("one.com");
    let d2 = f.domain("two.com");
    let adm = f.admin("adm@one.com");
    f.grant(&d2, &format!("{} dom crossDomainAdmin", d1.id));
    let r = f.mgr.effective_rights(&who(&adm), &d2, true).unwrap();
    assert!(r.preset_rights.contains("crossDomainAdmin"));
    let r = f.mgr.effective_rights(&who(&adm), &d1, true).unwrap();
    assert!(!r.preset_rights.contains("crossDomainAdmin"));
}

#[test]
fn test_group_shapes() {
    let f = setup();
    f.domain("example.com");
    let adm = f.admin("adm@example.com");
    let sales = f.group("sales@example.com");
    let leads = f.group("leads@example.com");
    let x = f.account("x@example.com");
    let y = f.account("y@example.com");
    let z = f.account("z@example.com");
    f.member(&sales, &x);
    f.member(&sales, &y);
    f.member(&sales, &z);
    f.member(&leads, &y);
    f.member(&leads, &z);
    f.grant(&sales, &format!("{} usr renameAccount", adm.id));
    f.grant(&sales, &format!("{} usr getAccountInfo", adm.id));
    f.grant(&leads, &format!("{} usr -renameAccount", adm.id));
    f.grant(&leads, &format!("{} usr deleteAccount", adm.id));

    let shapes = f.mgr.group_shape_rights(&who(&adm), &[sales.clone(), leads.clone()], true).unwrap();
    assert_eq!(shapes.len(), 2);

    let only_sales = shapes.iter().find(|s| s.shape.groups.len() == 1).unwrap();
    assert!(only_sales.shape.groups.contains(&sales.id));
    assert_eq!(only_sales.shape.members.iter().cloned().collect::<Vec<_>>(), vec![x.id.clone()]);
    assert!(only_sales.rights.preset_rights.contains("renameAccount"));
    assert!(!only_sales.rights.preset_rights.contains("deleteAccount"));
    assert!(only_sales.rights.get_attrs.contains("displayName"));

    let both = shapes.iter().find(|s| s.shape.groups.len() == 2).unwrap();
    assert_eq!(both.shape.members.len(), 2);
    assert!(both.shape.members.contains(&y.id) && both.shape.members.contains(&z.id));
    assert!(!both.rights.preset_rights.contains("renameAccount"));
    assert!(both.rights.preset_rights.contains("deleteAccount"));

    // the report agrees with a direct check on a member
    assert!(!f.mgr.can_do(&who(&adm), &y, "renameAccount", true, true).unwrap());
    assert!(f.mgr.can_do(&who(&adm), &x, "renameAccount", true, false).unwrap());
}
