//! Access control entries and their one-line text form
//!
//! `<grantee-id> <grantee-type> [modifier]<right>`, for example
//! `acct-0001 usr -viewFreeBusy` or `bob@ext.com:s3cret gst invite`.
//! Modifiers: `-` deny, `+` can delegate, `*` sub-domains only.

use std::fmt;
use std::sync::Arc;

use crate::catalog::RightCatalog;
use crate::error::{AclError, Result};
use crate::grantee::{GranteeType, GUID_AUTHUSER, GUID_PUBLIC};
use crate::right::Right;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RightModifier {
    #[default]
    None,
    Deny,
    CanDelegate,
    SubDomain,
}

impl RightModifier {
    pub fn prefix(self) -> Option<char> {
        match self {
            RightModifier::None => None,
            RightModifier::Deny => Some('-'),
            RightModifier::CanDelegate => Some('+'),
            RightModifier::SubDomain => Some('*'),
        }
    }

    pub fn from_prefix(c: char) -> Option<Self> {
        match c {
            '-' => Some(RightModifier::Deny),
            '+' => Some(RightModifier::CanDelegate),
            '*' => Some(RightModifier::SubDomain),
            _ => None,
        }
    }
}

/// One grant or denial on a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ace {
    grantee_type: GranteeType,
    grantee_id: String,
    secret: Option<String>,
    right: Arc<Right>,
    modifier: RightModifier,
}

impl Ace {
    pub fn new(grantee_type: GranteeType, grantee_id: &str, right: Arc<Right>, modifier: RightModifier) -> Result<Self> {
        if grantee_type.has_secret() {
            return Err(AclError::MalformedAce(format!("{} grantee needs a secret", grantee_type)));
        }
        Self::build(grantee_type, grantee_id, None, right, modifier)
    }

    /// External grantee (`gst` or `key`) with its secret
    pub fn with_secret(grantee_type: GranteeType, grantee_id: &str, secret: &str, right: Arc<Right>, modifier: RightModifier) -> Result<Self> {
        if !grantee_type.has_secret() {
            return Err(AclError::MalformedAce(format!("{} grantee takes no secret", grantee_type)));
        }
        Self::build(grantee_type, grantee_id, Some(secret), right, modifier)
    }

    /// Grant to every authenticated internal account
    pub fn auth_user(right: Arc<Right>, modifier: RightModifier) -> Result<Self> {
        Self::new(GranteeType::AuthUser, GUID_AUTHUSER, right, modifier)
    }

    /// Grant to anyone
    pub fn public(right: Arc<Right>, modifier: RightModifier) -> Result<Self> {
        Self::new(GranteeType::Public, GUID_PUBLIC, right, modifier)
    }

    fn build(grantee_type: GranteeType, id: &str, secret: Option<&str>, right: Arc<Right>, modifier: RightModifier) -> Result<Self> {
        let bad_token = |s: &str| s.is_empty() || s.contains(char::is_whitespace);
        if bad_token(id) || (grantee_type.has_secret() && id.contains(':')) {
            return Err(AclError::MalformedAce(format!("invalid grantee id: {:?}", id)));
        }
        if secret.is_some_and(bad_token) {
            return Err(AclError::MalformedAce("invalid grantee secret".into()));
        }
        Ok(Ace { grantee_type, grantee_id: id.to_string(), secret: secret.map(str::to_string), right, modifier })
    }

    /// Parse the text form, resolving the right through `catalog`
    pub fn parse(line: &str, catalog: &RightCatalog) -> Result<Self> {
        let malformed = |why: &str| AclError::MalformedAce(format!("{}: {:?}", why, line));
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [id, code, right] = fields.as_slice() else {
            return Err(malformed("expected 3 fields"));
        };
        let gt = GranteeType::from_code(code).ok_or_else(|| malformed("unknown grantee type"))?;

        let mut chars = right.chars();
        let (modifier, name) = match chars.next().and_then(RightModifier::from_prefix) {
            Some(m) => (m, chars.as_str()),
            None => (RightModifier::None, *right),
        };
        if name.is_empty() {
            return Err(malformed("missing right"));
        }
        let right = catalog.right(name).map_err(|_| malformed("unknown right"))?;

        if gt.has_secret() {
            let (id, secret) = id.split_once(':').ok_or_else(|| malformed("missing secret"))?;
            if secret.is_empty() {
                return Err(malformed("missing secret"));
            }
            Self::build(gt, id, Some(secret), right, modifier)
        } else {
            Self::build(gt, id, None, right, modifier)
        }
    }

    #[inline] pub fn grantee_type(&self) -> GranteeType { self.grantee_type }
    #[inline] pub fn grantee_id(&self) -> &str { &self.grantee_id }
    #[inline] pub fn secret(&self) -> Option<&str> { self.secret.as_deref() }
    #[inline] pub fn right(&self) -> &Arc<Right> { &self.right }
    #[inline] pub fn modifier(&self) -> RightModifier { self.modifier }
    #[inline] pub fn deny(&self) -> bool { self.modifier == RightModifier::Deny }
    #[inline] pub fn can_delegate(&self) -> bool { self.modifier == RightModifier::CanDelegate }
    #[inline] pub fn sub_domain(&self) -> bool { self.modifier == RightModifier::SubDomain }

    /// Positive grant that does not carry the delegation modifier
    #[inline]
    pub fn can_execute_only(&self) -> bool {
        !self.deny() && !self.can_delegate()
    }

    /// Same grantee and right, modifier ignored
    pub fn same_grantee_and_right(&self, other: &Ace) -> bool {
        self.grantee_type == other.grantee_type
            && self.grantee_id == other.grantee_id
            && self.secret == other.secret
            && self.right.name == other.right.name
    }
}

impl fmt::Display for Ace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.grantee_id)?;
        if let Some(s) = &self.secret {
            write!(f, ":{}", s)?;
        }
        write!(f, " {} ", self.grantee_type.code())?;
        if let Some(p) = self.modifier.prefix() {
            write!(f, "{}", p)?;
        }
        f.write_str(&self.right.name)
    }
}
