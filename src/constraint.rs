//! Attribute value constraints
//!
//! Text form: `<attr>:min=<v>:max=<v>:values=<v1>,<v2>`. Every part after the
//! attribute name is optional. min/max apply to integer, long, duration and
//! generalized-time attributes; `values` applies to every type.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AclError, Result};

/// Declared syntax of a directory attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrType {
    Boolean,
    Integer,
    Long,
    Duration,
    #[serde(rename = "gentime")]
    GenTime,
    Enum,
    String,
}

impl AttrType {
    #[inline]
    pub fn supports_range(self) -> bool {
        matches!(self, AttrType::Integer | AttrType::Long | AttrType::Duration | AttrType::GenTime)
    }

    /// Comparable form of a value: the number, milliseconds, or epoch milliseconds
    pub fn ordinal(self, v: &str) -> Option<i64> {
        match self {
            AttrType::Integer => v.trim().parse::<i32>().ok().map(i64::from),
            AttrType::Long => v.trim().parse::<i64>().ok(),
            AttrType::Duration => parse_duration_ms(v),
            AttrType::GenTime => parse_gentime_ms(v),
            _ => None,
        }
    }
}

// ============================================================================
// Value parsers
// ============================================================================

/// `\d+[dhms]?` or `\d+ms`, default unit seconds; result in milliseconds
pub fn parse_duration_ms(v: &str) -> Option<i64> {
    let v = v.trim();
    let (digits, mult) = if let Some(d) = v.strip_suffix("ms") {
        (d, 1)
    } else {
        match v.as_bytes().last()? {
            b'd' => (&v[..v.len() - 1], 86_400_000),
            b'h' => (&v[..v.len() - 1], 3_600_000),
            b'm' => (&v[..v.len() - 1], 60_000),
            b's' => (&v[..v.len() - 1], 1_000),
            _ => (v, 1_000),
        }
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<i64>().ok()?.checked_mul(mult)
}

/// `YYYYMMDDHHMMSS[.fff]Z` -> epoch milliseconds
pub fn parse_gentime_ms(v: &str) -> Option<i64> {
    let v = v.trim();
    let body = v.strip_suffix('Z').or_else(|| v.strip_suffix('z'))?;
    if body.len() < 14 || !body.is_char_boundary(14) {
        return None;
    }
    let (stamp, frac) = body.split_at(14);
    let base = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S").ok()?.and_utc().timestamp_millis();
    let extra = match frac.strip_prefix('.') {
        None if frac.is_empty() => 0,
        Some(f) if !f.is_empty() && f.len() <= 3 && f.bytes().all(|b| b.is_ascii_digit()) => {
            format!("{:0<3}", f).parse::<i64>().ok()?
        }
        _ => return None,
    };
    Some(base + extra)
}

// ============================================================================
// Constraint
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    raw: String,
    ordinal: i64,
}

/// Restriction on the values a delegated admin may set for one attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeConstraint {
    attr: String,
    attr_type: AttrType,
    min: Option<Bound>,
    max: Option<Bound>,
    values: Vec<String>,
}

impl AttributeConstraint {
    pub fn new(attr: impl Into<String>, attr_type: AttrType) -> Self {
        AttributeConstraint { attr: attr.into(), attr_type, min: None, max: None, values: Vec::new() }
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }

    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    pub fn min(&self) -> Option<&str> {
        self.min.as_ref().map(|b| b.raw.as_str())
    }

    pub fn max(&self) -> Option<&str> {
        self.max.as_ref().map(|b| b.raw.as_str())
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.values.is_empty()
    }

    pub fn set_min(&mut self, v: &str) -> Result<()> {
        self.min = self.bound("min", v)?;
        Ok(())
    }

    pub fn set_max(&mut self, v: &str) -> Result<()> {
        self.max = self.bound("max", v)?;
        Ok(())
    }

    pub fn add_value(&mut self, v: &str) {
        if !self.values.iter().any(|e| e == v) {
            self.values.push(v.to_string());
        }
    }

    /// Unsupported dimension is an error; an unparseable bound is dropped
    fn bound(&self, which: &str, v: &str) -> Result<Option<Bound>> {
        if !self.attr_type.supports_range() {
            return Err(AclError::InvalidRequest(format!("{} constraint not supported for attribute {}", which, self.attr)));
        }
        match self.attr_type.ordinal(v) {
            Some(ordinal) => Ok(Some(Bound { raw: v.to_string(), ordinal })),
            None => {
                warn!(attr = %self.attr, which, value = v, "unable to parse constraint bound, ignored");
                Ok(None)
            }
        }
    }

    /// Parse the text form. `attr_type` supplies the declared type of the attribute.
    pub fn parse<F: Fn(&str) -> AttrType>(s: &str, attr_type: F) -> Result<Self> {
        let mut parts = s.split(':');
        let attr = parts.next().unwrap_or_default().trim();
        let rest: Vec<&str> = parts.collect();
        if attr.is_empty() || rest.is_empty() {
            return Err(AclError::InvalidRequest(format!("invalid constraint: {}", s)));
        }
        let mut c = AttributeConstraint::new(attr, attr_type(attr));
        for part in rest {
            match part.split_once('=') {
                Some(("min", v)) => c.set_min(v)?,
                Some(("max", v)) => c.set_max(v)?,
                Some(("values", v)) => v.split(',').filter(|x| !x.is_empty()).for_each(|x| c.add_value(x)),
                _ => return Err(AclError::InvalidRequest(format!("invalid constraint: {}", s))),
            }
        }
        Ok(c)
    }

    /// A value violates the constraint
    pub fn violated_by(&self, v: &str) -> bool {
        if !self.values.is_empty() && !self.values.iter().any(|e| e == v) {
            return true;
        }
        if self.min.is_none() && self.max.is_none() {
            return false;
        }
        let Some(n) = self.attr_type.ordinal(v) else { return true };
        self.min.as_ref().is_some_and(|b| n < b.ordinal) || self.max.as_ref().is_some_and(|b| n > b.ordinal)
    }

    /// Check every proposed value
    pub fn check<S: AsRef<str>>(&self, values: &[S]) -> Result<()> {
        match values.iter().find(|v| self.violated_by(v.as_ref())) {
            Some(_) => Err(AclError::ConstraintViolated(self.attr.clone())),
            None => Ok(()),
        }
    }
}

impl fmt::Display for AttributeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.attr)?;
        if let Some(b) = &self.min {
            write!(f, ":min={}", b.raw)?;
        }
        if let Some(b) = &self.max {
            write!(f, ":max={}", b.raw)?;
        }
        if !self.values.is_empty() {
            write!(f, ":values={}", self.values.join(","))?;
        }
        Ok(())
    }
}

/// Parse a multi-valued constraint attribute, skipping (with a warning) lines that fail
pub fn parse_all<F: Fn(&str) -> AttrType>(lines: &[String], attr_type: F) -> Vec<AttributeConstraint> {
    lines
        .iter()
        .filter_map(|l| match AttributeConstraint::parse(l, &attr_type) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(constraint = %l, error = %e, "skipping invalid constraint");
                None
            }
        })
        .collect()
}
