//! Shared fixture: an in-memory directory, a small right catalog and an
//! access manager over a memory grant store.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use rightgate::constants::*;
use rightgate::{
    AccessManager, Ace, AttrType, Directory, EngineConfig, Identity, MemoryDirectory, MemoryGrantStore, RightCatalog,
    Target, TargetType,
};

pub const CATALOG: &str = r#"{
  "rights": [
    {"name": "viewFreeBusy", "type": "preset", "userRight": true, "targetTypes": ["account"]},
    {"name": "invite", "type": "preset", "userRight": true, "targetTypes": ["account"]},
    {"name": "sendAs", "type": "preset", "userRight": true, "targetTypes": ["account"]},
    {"name": "checkQuota", "type": "preset", "userRight": true, "targetTypes": ["account"], "default": "allow"},
    {"name": "ownerPolicy", "type": "preset", "userRight": true, "targetTypes": ["account"], "fallback": "owner"},
    {"name": "adminLoginAs", "type": "preset", "targetTypes": ["account"]},
    {"name": "deleteAccount", "type": "preset", "targetTypes": ["account"]},
    {"name": "renameAccount", "type": "preset", "targetTypes": ["account"]},
    {"name": "createAccount", "type": "preset", "targetTypes": ["domain"]},
    {"name": "listDomain", "type": "preset", "targetTypes": ["domain"]},
    {"name": "crossDomainAdmin", "type": "preset", "targetTypes": ["domain"]},
    {"name": "getAccountInfo", "type": "getAttrs", "targetTypes": ["account"], "attrs": ["displayName", "zimbraMailQuota"]},
    {"name": "getAccount", "type": "getAttrs", "targetTypes": ["account"]},
    {"name": "modifyAccount", "type": "setAttrs", "targetTypes": ["account"]},
    {"name": "configureQuota", "type": "setAttrs", "targetTypes": ["account", "cos"], "attrs": ["zimbraMailQuota"]},
    {"name": "setPasswordPolicy", "type": "setAttrs", "targetTypes": ["account"], "attrs": ["zimbraPasswordMinLength"]},
    {"name": "setDescription", "type": "setAttrs", "targetTypes": ["account"], "attrs": ["description"]},
    {"name": "setCosConstraint", "type": "setAttrs", "targetTypes": ["cos"], "attrs": ["zimbraConstraint"]},
    {"name": "domainAdminAccountRights", "type": "combo", "rights": ["deleteAccount", "renameAccount", "getAccountInfo"]},
    {"name": "domainAdminRights", "type": "combo", "rights": ["domainAdminAccountRights", "createAccount", "listDomain"]}
  ]
}"#;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn catalog() -> Arc<RightCatalog> {
    Arc::new(RightCatalog::from_json(CATALOG).unwrap())
}

pub struct Fixture {
    pub dir: Arc<MemoryDirectory>,
    pub store: Arc<MemoryGrantStore>,
    pub catalog: Arc<RightCatalog>,
    pub mgr: AccessManager,
}

pub fn setup() -> Fixture {
    setup_with(EngineConfig::default())
}

pub fn setup_with(config: EngineConfig) -> Fixture {
    init_tracing();
    let dir = Arc::new(MemoryDirectory::new());
    for attr in ["displayName", "description", "zimbraMailQuota"] {
        dir.declare_attr(attr, AttrType::String, &[TargetType::Account]);
    }
    dir.declare_attr("zimbraPasswordMinLength", AttrType::Integer, &[TargetType::Account, TargetType::Cos]);
    dir.declare_attr(A_CONSTRAINT, AttrType::String, &[TargetType::Cos, TargetType::Config]);
    let store = Arc::new(MemoryGrantStore::new());
    let catalog = catalog();
    let directory: Arc<dyn Directory> = dir.clone();
    let mgr = AccessManager::new(Arc::clone(&catalog), directory, store.clone(), config).unwrap();
    Fixture { dir, store, catalog, mgr }
}

impl Fixture {
    pub fn domain(&self, name: &str) -> Target {
        self.dir.add_domain(name).unwrap()
    }

    pub fn account(&self, addr: &str) -> Target {
        self.dir.add_account(addr).unwrap()
    }

    /// Delegated admin account
    pub fn admin(&self, addr: &str) -> Target {
        let t = self.account(addr);
        self.dir.set_attr(&t, A_IS_DELEGATED_ADMIN_ACCOUNT, &[TRUE]).unwrap();
        t
    }

    pub fn system_admin(&self, addr: &str) -> Target {
        let t = self.account(addr);
        self.dir.set_attr(&t, A_IS_ADMIN_ACCOUNT, &[TRUE]).unwrap();
        self.dir.set_attr(&t, A_IS_SYSTEM_ADMIN_ACCOUNT, &[TRUE]).unwrap();
        t
    }

    pub fn group(&self, addr: &str) -> Target {
        self.dir.add_group(addr).unwrap()
    }

    pub fn admin_group(&self, addr: &str) -> Target {
        let g = self.group(addr);
        self.dir.set_attr(&g, A_IS_ADMIN_GROUP, &[TRUE]).unwrap();
        g
    }

    pub fn member(&self, group: &Target, member: &Target) {
        self.dir.add_member(group, member).unwrap();
        self.mgr.on_membership_changed(member);
    }

    /// Grant from the text form, without grantor verification
    pub fn grant(&self, target: &Target, line: &str) {
        let ace = Ace::parse(line, &self.catalog).unwrap();
        self.mgr.grant_right(None, target, ace).unwrap();
    }

    pub fn ace(&self, line: &str) -> Ace {
        Ace::parse(line, &self.catalog).unwrap()
    }

    pub fn global(&self) -> Target {
        Target::global()
    }
}

pub fn who(t: &Target) -> Identity {
    match t.kind {
        TargetType::Group => Identity::Group(t.id.clone()),
        _ => Identity::Account(t.id.clone()),
    }
}

pub fn values(pairs: &[(&str, &str)]) -> rightgate::AttrValues {
    let mut m = rightgate::AttrValues::new();
    for (k, v) in pairs {
        m.entry(k.to_string()).or_default().push(v.to_string());
    }
    m
}
