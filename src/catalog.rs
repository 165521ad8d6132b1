//! Right catalog: immutable set of right definitions, built once at startup
//!
//! Definitions are JSON documents:
//! ```json
//! { "include": ["core.json"],
//!   "rights": [
//!     { "name": "viewFreeBusy", "type": "preset", "userRight": true, "default": "allow" },
//!     { "name": "domainAdminRights", "type": "combo", "rights": ["deleteAccount", "setAccountAttrs"] }
//!   ] }
//! ```
//! Combo rights are closed at build time into every preset and attr right
//! they transitively contain. Cycles fail the build.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::constants::{RIGHT_ADMIN_LOGIN_AS, RIGHT_CROSS_DOMAIN_ADMIN};
use crate::error::{config_err, AclError, Result};
use crate::right::{AttrOp, AttrSet, Right, RightClass, RightKind};
use crate::target::TargetType;

// ============================================================================
// Definition documents
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DefKind {
    #[serde(rename = "preset")]
    Preset,
    #[serde(rename = "getAttrs")]
    GetAttrs,
    #[serde(rename = "setAttrs")]
    SetAttrs,
    #[serde(rename = "combo")]
    Combo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultVerdict {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AttrDef {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        limit: bool,
    },
}

impl AttrDef {
    fn into_parts(self) -> (String, bool) {
        match self {
            AttrDef::Name(n) => (n, false),
            AttrDef::Full { name, limit } => (name, limit),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RightDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DefKind,
    #[serde(default)]
    pub user_right: bool,
    #[serde(default)]
    pub target_types: Vec<TargetType>,
    #[serde(default)]
    pub default: Option<DefaultVerdict>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub cacheable: Option<bool>,
    /// Absent on an attr right means every attribute
    #[serde(default)]
    pub attrs: Option<Vec<AttrDef>>,
    #[serde(default)]
    pub rights: Vec<String>,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RightDocument {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub rights: Vec<RightDef>,
}

// ============================================================================
// Catalog
// ============================================================================

/// Immutable catalog of rights, shared by `Arc`
#[derive(Debug, Default)]
pub struct RightCatalog {
    rights: HashMap<String, Arc<Right>>,
    order: Vec<String>,
    cacheable: usize,
}

impl RightCatalog {
    /// Build from a single JSON document
    pub fn from_json(s: &str) -> Result<Self> {
        Self::from_documents(vec![("<inline>".to_string(), s.to_string())])
    }

    /// Load one file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(config_err)?;
        Self::from_documents(vec![(file_name(path), body)])
    }

    /// Load every `*.json` file in a directory, honoring `include` order
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let mut docs = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref()).map_err(config_err)? {
            let path = entry.map_err(config_err)?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let body = std::fs::read_to_string(&path).map_err(config_err)?;
                docs.push((file_name(&path), body));
            }
        }
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_documents(docs)
    }

    /// Build from named documents. A document is processed only after
    /// every document it includes.
    pub fn from_documents(docs: Vec<(String, String)>) -> Result<Self> {
        let mut pending = Vec::with_capacity(docs.len());
        for (name, body) in docs {
            let doc: RightDocument = serde_json::from_str(&body)
                .map_err(|e| AclError::Catalog(format!("{}: {}", name, e)))?;
            pending.push((name, doc));
        }

        let mut done: HashSet<String> = HashSet::new();
        let mut defs = Vec::new();
        while !pending.is_empty() {
            let before = pending.len();
            let mut rest = Vec::new();
            for (name, doc) in pending {
                if doc.include.iter().all(|i| done.contains(i)) {
                    debug!(file = %name, rights = doc.rights.len(), "processing right definitions");
                    defs.extend(doc.rights);
                    done.insert(name);
                } else {
                    rest.push((name, doc));
                }
            }
            if rest.len() == before {
                let names: Vec<_> = rest.iter().map(|(n, _)| n.as_str()).collect();
                return Err(AclError::Catalog(format!("unresolvable includes in: {}", names.join(", "))));
            }
            pending = rest;
        }
        Self::build(defs)
    }

    /// Validate definitions, close combos and assign cache slots
    pub fn build(defs: Vec<RightDef>) -> Result<Self> {
        let mut by_name: HashMap<String, RightDef> = HashMap::with_capacity(defs.len());
        let mut order = Vec::with_capacity(defs.len());
        for def in defs {
            validate_def(&def)?;
            if by_name.contains_key(&def.name) {
                return Err(AclError::Catalog(format!("right {} is already defined", def.name)));
            }
            order.push(def.name.clone());
            by_name.insert(def.name.clone(), def);
        }

        // Cache slots follow definition order
        let mut slots = HashMap::new();
        for name in &order {
            let def = &by_name[name];
            let cacheable = def.cacheable.unwrap_or(def.user_right || def.name == RIGHT_ADMIN_LOGIN_AS);
            if cacheable && def.kind == DefKind::Preset {
                let idx = slots.len();
                slots.insert(name.clone(), idx);
            }
        }

        let mut built: HashMap<String, Arc<Right>> = HashMap::with_capacity(order.len());
        for name in &order {
            let mut path = Vec::new();
            resolve(name, &by_name, &slots, &mut built, &mut path)?;
        }

        let cacheable = slots.len();
        info!(rights = built.len(), cacheable, "right catalog loaded");
        Ok(RightCatalog { rights: built, order, cacheable })
    }

    /// Look up a right by name. `get.<type>.<attr>` and `set.<type>.<attr>`
    /// resolve to single-attribute rights.
    pub fn right(&self, name: &str) -> Result<Arc<Right>> {
        if let Some(r) = self.rights.get(name) {
            return Ok(Arc::clone(r));
        }
        if name.contains('.') {
            return inline_attr_right(name).map(Arc::new);
        }
        Err(AclError::UnknownRight(name.to_string()))
    }

    /// Preset right `preset` is `combo` or transitively contained in it
    pub fn is_contained_in(&self, preset: &str, combo: &str) -> Result<bool> {
        let p = self.right(preset)?;
        let c = self.right(combo)?;
        if !p.is_preset() {
            return Err(AclError::InvalidRequest(format!("{} is not a preset right", preset)));
        }
        Ok(c.covers_preset(&p))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rights.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rights.is_empty()
    }

    /// Number of permission-cache slots
    pub fn cacheable_count(&self) -> usize {
        self.cacheable
    }

    /// Every right, in definition order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Right>> {
        self.order.iter().filter_map(move |n| self.rights.get(n))
    }

    pub fn user_rights(&self) -> Vec<Arc<Right>> {
        self.iter().filter(|r| r.is_user_right()).cloned().collect()
    }

    pub fn admin_rights(&self) -> Vec<Arc<Right>> {
        self.iter().filter(|r| !r.is_user_right()).cloned().collect()
    }

    /// Preset rights that can be evaluated against `kind`
    pub fn executable_presets_on(&self, kind: TargetType) -> Vec<Arc<Right>> {
        self.iter().filter(|r| r.is_preset() && r.executable_on(kind)).cloned().collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string()
}

fn validate_def(def: &RightDef) -> Result<()> {
    let bad = |msg: &str| Err(AclError::Catalog(format!("right {}: {}", def.name, msg)));
    if def.name.is_empty() {
        return bad("empty name");
    }
    if def.name.contains('.') {
        return bad("name cannot contain '.'");
    }
    if def.name.starts_with(['-', '+', '*']) {
        return bad("name cannot start with a modifier character");
    }
    if def.name.contains(char::is_whitespace) {
        return bad("name cannot contain whitespace");
    }
    match def.kind {
        DefKind::Preset => {
            if def.user_right {
                if def.target_types.len() > 1 {
                    return bad("user right must have exactly one target type");
                }
            } else if def.target_types.len() != 1 {
                return bad("preset right must have exactly one target type");
            }
            if def.attrs.is_some() || !def.rights.is_empty() {
                return bad("preset right cannot list attrs or rights");
            }
        }
        DefKind::GetAttrs | DefKind::SetAttrs => {
            if def.user_right {
                return bad("attribute rights are admin rights");
            }
            if def.target_types.is_empty() {
                return bad("attribute right needs at least one target type");
            }
            if !def.rights.is_empty() {
                return bad("attribute right cannot list rights");
            }
        }
        DefKind::Combo => {
            if def.user_right {
                return bad("combo rights are admin rights");
            }
            if def.rights.is_empty() {
                return bad("combo right must contain at least one right");
            }
            if !def.target_types.is_empty() || def.attrs.is_some() {
                return bad("combo right cannot list target types or attrs");
            }
        }
    }
    if def.name == RIGHT_CROSS_DOMAIN_ADMIN && (def.kind != DefKind::Preset || def.target_types != [TargetType::Domain]) {
        return bad("must be a preset right on domain");
    }
    Ok(())
}

/// Depth-first build; `path` holds combos being resolved, for cycle reports
fn resolve(
    name: &str,
    defs: &HashMap<String, RightDef>,
    slots: &HashMap<String, usize>,
    built: &mut HashMap<String, Arc<Right>>,
    path: &mut Vec<String>,
) -> Result<Arc<Right>> {
    if let Some(r) = built.get(name) {
        return Ok(Arc::clone(r));
    }
    if path.iter().any(|p| p == name) {
        path.push(name.to_string());
        return Err(AclError::Catalog(format!("cyclic combo right: {}", path.join(" -> "))));
    }
    let def = defs.get(name).ok_or_else(|| AclError::Catalog(format!("unknown right: {}", name)))?;
    let class = if def.user_right { RightClass::User } else { RightClass::Admin };

    let kind = match def.kind {
        DefKind::Preset => RightKind::Preset { target: def.target_types.first().copied().unwrap_or(TargetType::Account) },
        DefKind::GetAttrs | DefKind::SetAttrs => {
            let op = if def.kind == DefKind::GetAttrs { AttrOp::Get } else { AttrOp::Set };
            let attrs = match &def.attrs {
                None => AttrSet::All,
                Some(list) => AttrSet::Some(list.iter().cloned().map(AttrDef::into_parts).collect::<BTreeMap<_, _>>()),
            };
            RightKind::Attrs { op, targets: def.target_types.clone(), attrs }
        }
        DefKind::Combo => {
            path.push(name.to_string());
            let mut presets: Vec<Arc<Right>> = Vec::new();
            let mut attrs: Vec<Arc<Right>> = Vec::new();
            for member in &def.rights {
                let m = defs.get(member.as_str()).ok_or_else(|| {
                    AclError::Catalog(format!("combo right {} contains unknown right {}", name, member))
                })?;
                if m.user_right {
                    return Err(AclError::Catalog(format!("combo right {} cannot contain user right {}", name, member)));
                }
                if member == RIGHT_CROSS_DOMAIN_ADMIN {
                    return Err(AclError::Catalog(format!("combo right {} cannot contain {}", name, member)));
                }
                let r = resolve(member, defs, slots, built, path)?;
                let (p, a) = match &r.kind {
                    RightKind::Preset { .. } => (vec![Arc::clone(&r)], Vec::new()),
                    RightKind::Attrs { .. } => (Vec::new(), vec![Arc::clone(&r)]),
                    RightKind::Combo { presets, attrs, .. } => (presets.clone(), attrs.clone()),
                };
                for x in p {
                    if !presets.iter().any(|e| e.name == x.name) { presets.push(x); }
                }
                for x in a {
                    if !attrs.iter().any(|e| e.name == x.name) { attrs.push(x); }
                }
            }
            path.pop();
            RightKind::Combo { direct: def.rights.clone(), presets, attrs }
        }
    };

    let right = Arc::new(Right {
        name: def.name.clone(),
        class,
        kind,
        default: def.default.map(|d| d == DefaultVerdict::Allow),
        cache_index: slots.get(name).copied(),
        fallback: def.fallback.clone(),
        description: def.desc.clone(),
    });
    built.insert(name.to_string(), Arc::clone(&right));
    Ok(right)
}

/// `get.account.displayName` -> getAttrs right on one attribute of one kind
fn inline_attr_right(name: &str) -> Result<Right> {
    let mut parts = name.splitn(3, '.');
    let (op, kind, attr) = match (parts.next(), parts.next(), parts.next()) {
        (Some(o), Some(k), Some(a)) if !a.is_empty() => (o, k, a),
        _ => return Err(AclError::UnknownRight(name.to_string())),
    };
    let op = match op {
        "get" => AttrOp::Get,
        "set" => AttrOp::Set,
        _ => return Err(AclError::UnknownRight(name.to_string())),
    };
    let kind = TargetType::from_code(kind).map_err(|_| AclError::UnknownRight(name.to_string()))?;
    let mut attrs = BTreeMap::new();
    attrs.insert(attr.to_string(), false);
    Ok(Right {
        name: name.to_string(),
        class: RightClass::Admin,
        kind: RightKind::Attrs { op, targets: vec![kind], attrs: AttrSet::Some(attrs) },
        default: None,
        cache_index: None,
        fallback: None,
        description: String::new(),
    })
}
