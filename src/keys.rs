//! Length-prefixed key encoding for cache and storage keys.
//!
//! Keys are encoded as: [len1][bytes1][len2][bytes2]...
//! - No delimiters, no escaping, any bytes allowed
//! - Parts longer than 255 bytes are replaced by their SHA-256 digest

use sha2::{Digest, Sha256};

/// Build a length-prefixed key from parts
#[inline]
pub fn build_key(parts: &[&str]) -> Vec<u8> {
    let total_len: usize = parts.iter().map(|p| 1 + p.len().min(64)).sum();
    let mut key = Vec::with_capacity(total_len);
    for part in parts {
        if part.len() > u8::MAX as usize {
            let d = digest_hex(part);
            key.push(d.len() as u8);
            key.extend_from_slice(d.as_bytes());
        } else {
            key.push(part.len() as u8);
            key.extend_from_slice(part.as_bytes());
        }
    }
    key
}

/// Parse a length-prefixed key into parts
pub fn parse_key(bytes: &[u8]) -> Vec<&str> {
    let mut parts = Vec::with_capacity(4);
    let mut i = 0;
    while i < bytes.len() {
        let len = bytes[i] as usize;
        if i + 1 + len > bytes.len() {
            break;
        }
        match std::str::from_utf8(&bytes[i + 1..i + 1 + len]) {
            Ok(part) => parts.push(part),
            Err(_) => break,
        }
        i += 1 + len;
    }
    parts
}

/// Lowercase hex SHA-256 of a string
pub fn digest_hex(s: &str) -> String {
    let d = Sha256::digest(s.as_bytes());
    hex::encode(&d)
}

mod hex {
    const HEX: &[u8; 16] = b"0123456789abcdef";

    pub fn encode(bytes: &[u8]) -> String {
        let mut s = String::with_capacity(bytes.len() * 2);
        for &b in bytes {
            s.push(HEX[(b >> 4) as usize] as char);
            s.push(HEX[(b & 0xf) as usize] as char);
        }
        s
    }
}

// ============================================================================
// Grantee cache keys
// ============================================================================

/// Permission-cache key for a grantee: stable id (or a digest of id and
/// secret for external grantees), admin flag, delegation flag.
pub fn grantee_cache_key(id: &str, secret: Option<&str>, as_admin: bool, can_delegate: bool) -> Vec<u8> {
    let ident = match secret {
        Some(s) => digest_hex(&format!("{}:{}", id, s)),
        None => id.to_string(),
    };
    let flags = match (as_admin, can_delegate) {
        (false, false) => "u",
        (false, true) => "ud",
        (true, false) => "a",
        (true, true) => "ad",
    };
    build_key(&[&ident, flags])
}

// ============================================================================
// Storage keys
// ============================================================================

/// Grant-store key for a target: [kind][id]
#[inline]
pub fn target_key(kind: &str, id: &str) -> Vec<u8> {
    build_key(&[kind, id])
}

/// Parse a target key into (kind, id)
pub fn parse_target_key(bytes: &[u8]) -> Option<(&str, &str)> {
    match *parse_key(bytes).as_slice() {
        [kind, id] => Some((kind, id)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse() {
        let key = build_key(&["account", "acct-0001"]);
        assert_eq!(parse_key(&key), vec!["account", "acct-0001"]);
        assert_eq!(parse_target_key(&key), Some(("account", "acct-0001")));
    }

    #[test]
    fn test_special_chars() {
        let key = build_key(&["a b", "x:y", ""]);
        assert_eq!(parse_key(&key), vec!["a b", "x:y", ""]);
    }

    #[test]
    fn test_long_part_digested() {
        let long = "x".repeat(300);
        let key = build_key(&[&long]);
        assert_eq!(parse_key(&key), vec![digest_hex(&long).as_str()]);
    }

    #[test]
    fn test_grantee_keys_distinct() {
        let plain = grantee_cache_key("u1", None, false, false);
        assert_ne!(plain, grantee_cache_key("u1", None, true, false));
        assert_ne!(plain, grantee_cache_key("u1", None, false, true));
        let g1 = grantee_cache_key("guest@x.com", Some("pw1"), false, false);
        let g2 = grantee_cache_key("guest@x.com", Some("pw2"), false, false);
        assert_ne!(g1, g2);
        // secret never appears in the key
        assert!(!String::from_utf8_lossy(&g1).contains("pw1"));
    }

    #[test]
    fn test_digest_hex() {
        assert_eq!(digest_hex("abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }
}
