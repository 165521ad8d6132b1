//! Right catalog loading and validation

mod common;

use std::fs;

use common::catalog;
use rightgate::{AclError, RightCatalog, RightKind, TargetType};
use tempfile::TempDir;

fn names(rs: &[std::sync::Arc<rightgate::Right>]) -> Vec<String> {
    let mut v: Vec<_> = rs.iter().map(|r| r.name.clone()).collect();
    v.sort();
    v
}

#[test]
fn test_combo_closure() {
    let cat = catalog();
    let r = cat.right("domainAdminRights").unwrap();
    let RightKind::Combo { direct, presets, attrs } = &r.kind else { panic!("not a combo") };
    assert_eq!(direct, &vec!["domainAdminAccountRights".to_string(), "createAccount".into(), "listDomain".into()]);
    assert_eq!(names(presets), vec!["createAccount", "deleteAccount", "listDomain", "renameAccount"]);
    assert_eq!(names(attrs), vec!["getAccountInfo"]);

    assert!(cat.is_contained_in("deleteAccount", "domainAdminRights").unwrap());
    assert!(!cat.is_contained_in("adminLoginAs", "domainAdminRights").unwrap());
    assert_eq!(r.target_types(), vec![TargetType::Account, TargetType::Domain]);
    assert!(r.grantable_on(TargetType::Domain));
    assert!(!r.grantable_on(TargetType::Account));
}

#[test]
fn test_classes_and_defaults() {
    let cat = catalog();
    assert_eq!(names(&cat.user_rights()), vec!["checkQuota", "invite", "ownerPolicy", "sendAs", "viewFreeBusy"]);
    assert_eq!(cat.right("checkQuota").unwrap().default, Some(true));
    assert_eq!(cat.right("viewFreeBusy").unwrap().default, None);
    assert_eq!(cat.right("ownerPolicy").unwrap().fallback.as_deref(), Some("owner"));
    // five user rights plus adminLoginAs
    assert_eq!(cat.cacheable_count(), 6);
}

#[test]
fn test_limit_flag_carried() {
    let cat = RightCatalog::from_json(
        r#"{"rights": [
        {"name": "setQuota", "type": "setAttrs", "targetTypes": ["account"],
         "attrs": [{"name": "zimbraMailQuota", "limit": true}, "description", {"name": "displayName"}]}
    ]}"#,
    )
    .unwrap();
    let r = cat.right("setQuota").unwrap();
    let (_, _, attrs) = r.as_attrs().unwrap();
    assert_eq!(attrs.limited().collect::<Vec<_>>(), vec!["zimbraMailQuota"]);
    assert!(attrs.contains("description") && attrs.contains("displayName"));
}

#[test]
fn test_invalid_definitions() {
    let bad = [
        r#"{"rights": [{"name": "a", "type": "combo", "rights": ["b"]}, {"name": "b", "type": "combo", "rights": ["a"]}]}"#,
        r#"{"rights": [{"name": "a", "type": "combo", "rights": ["nosuch"]}]}"#,
        r#"{"rights": [{"name": "a", "type": "preset", "userRight": true}, {"name": "c", "type": "combo", "rights": ["a"]}]}"#,
        r#"{"rights": [{"name": "a", "type": "preset", "targetTypes": ["account"]}, {"name": "a", "type": "preset", "targetTypes": ["account"]}]}"#,
        r#"{"rights": [{"name": "a.b", "type": "preset", "targetTypes": ["account"]}]}"#,
        r#"{"rights": [{"name": "a", "type": "preset", "targetTypes": ["account", "domain"]}]}"#,
        r#"{"rights": [{"name": "a", "type": "getAttrs", "userRight": true, "targetTypes": ["account"]}]}"#,
        r#"{"rights": [{"name": "crossDomainAdmin", "type": "preset", "targetTypes": ["account"]}]}"#,
        r#"{"rights": [], "extra": 1}"#,
        r#"{"rights": [{"name": "a", "type": "frob"}]}"#,
    ];
    for doc in bad {
        assert!(matches!(RightCatalog::from_json(doc), Err(AclError::Catalog(_))), "{}", doc);
    }
}

#[test]
fn test_cycle_reports_path() {
    let doc = r#"{"rights": [
        {"name": "a", "type": "combo", "rights": ["b"]},
        {"name": "b", "type": "combo", "rights": ["c"]},
        {"name": "c", "type": "combo", "rights": ["a"]}
    ]}"#;
    let Err(AclError::Catalog(msg)) = RightCatalog::from_json(doc) else { panic!("expected a catalog error") };
    assert!(msg.contains("a -> b -> c -> a"), "{}", msg);
}

#[test]
fn test_load_dir_honors_includes() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("admin.json"),
        r#"{"include": ["base.json"], "rights": [
            {"name": "accountAdmin", "type": "combo", "rights": ["deleteAccount", "getAccountInfo"]}
        ]}"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("base.json"),
        r#"{"rights": [
            {"name": "deleteAccount", "type": "preset", "targetTypes": ["account"]},
            {"name": "getAccountInfo", "type": "getAttrs", "targetTypes": ["account"], "attrs": ["displayName"]}
        ]}"#,
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let cat = RightCatalog::load_dir(dir.path()).unwrap();
    assert_eq!(cat.len(), 3);
    let order: Vec<_> = cat.iter().map(|r| r.name.clone()).collect();
    assert_eq!(order, vec!["deleteAccount", "getAccountInfo", "accountAdmin"]);
}

#[test]
fn test_load_dir_unresolvable_include() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.json"), r#"{"include": ["missing.json"], "rights": []}"#).unwrap();
    assert!(matches!(RightCatalog::load_dir(dir.path()), Err(AclError::Catalog(_))));
    assert!(RightCatalog::load_dir(dir.path().join("nope")).is_err());
}
