//! Grant storage: where each target's ACE lines live
//!
//! `MemoryGrantStore` keeps everything in a map; `LmdbGrantStore` persists
//! the lines in LMDB together with a per-target revision counter.

use std::collections::HashMap;
use std::path::Path;

use heed::types::{Bytes, Str, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use parking_lot::RwLock;

use crate::error::{err, Result};
use crate::keys::{parse_target_key, target_key};
use crate::target::{Target, TargetType};

/// Storage collaborator the ACL cache loads from and writes to
pub trait GrantStore: Send + Sync {
    /// Stored ACE lines of `target`, in stored order; empty if none
    fn load_acl(&self, target: &Target) -> Result<Vec<String>>;

    /// Replace the stored ACE lines of `target`
    fn save_acl(&self, target: &Target, aces: &[String]) -> Result<()>;

    /// Drop everything stored for `target`
    fn delete_acl(&self, target: &Target) -> Result<()>;

    /// Number of writes to `target`'s ACL so far; 0 once deleted
    fn revision(&self, target: &Target) -> Result<u64>;

    /// (kind, id) of every target that has grants
    fn targets_with_grants(&self) -> Result<Vec<(TargetType, String)>>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryGrantStore {
    acls: RwLock<HashMap<(TargetType, String), (u64, Vec<String>)>>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GrantStore for MemoryGrantStore {
    fn load_acl(&self, target: &Target) -> Result<Vec<String>> {
        Ok(self.acls.read().get(&(target.kind, target.id.clone())).map(|(_, l)| l.clone()).unwrap_or_default())
    }

    fn save_acl(&self, target: &Target, aces: &[String]) -> Result<()> {
        let mut m = self.acls.write();
        let e = m.entry((target.kind, target.id.clone())).or_insert((0, Vec::new()));
        e.0 += 1;
        e.1 = aces.to_vec();
        Ok(())
    }

    fn delete_acl(&self, target: &Target) -> Result<()> {
        self.acls.write().remove(&(target.kind, target.id.clone()));
        Ok(())
    }

    fn revision(&self, target: &Target) -> Result<u64> {
        Ok(self.acls.read().get(&(target.kind, target.id.clone())).map(|(r, _)| *r).unwrap_or(0))
    }

    fn targets_with_grants(&self) -> Result<Vec<(TargetType, String)>> {
        let mut out: Vec<_> = self.acls.read().iter().filter(|(_, (_, l))| !l.is_empty()).map(|(k, _)| k.clone()).collect();
        out.sort();
        Ok(out)
    }
}

// ============================================================================
// LMDB store
// ============================================================================

type AclDb = Database<Bytes, Str>;
type RevDb = Database<Bytes, U64<byteorder::BigEndian>>;

struct Dbs {
    acl: AclDb,
    rev: RevDb,
}

/// Grant store backed by LMDB
pub struct LmdbGrantStore {
    env: Env,
    dbs: Dbs,
}

impl LmdbGrantStore {
    /// Open (creating if needed) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(err)?;
        // SAFETY: LMDB requires no other processes access this path concurrently during open.
        let env = unsafe { EnvOpenOptions::new().map_size(1 << 30).max_dbs(2).open(path).map_err(err)? };
        let mut tx = env.write_txn().map_err(err)?;
        let dbs = Dbs {
            acl: env.create_database(&mut tx, Some("acl")).map_err(err)?,
            rev: env.create_database(&mut tx, Some("rev")).map_err(err)?,
        };
        tx.commit().map_err(err)?;
        Ok(LmdbGrantStore { env, dbs })
    }

    #[inline]
    fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        f(&self.dbs, &self.env.read_txn().map_err(err)?)
    }

    #[inline]
    fn write<T, F: FnOnce(&Dbs, &mut RwTxn) -> Result<T>>(&self, f: F) -> Result<T> {
        let mut txn = self.env.write_txn().map_err(err)?;
        let r = f(&self.dbs, &mut txn)?;
        txn.commit().map_err(err)?;
        Ok(r)
    }
}

#[inline]
fn key_of(target: &Target) -> Vec<u8> {
    target_key(target.kind.code(), &target.id)
}

impl GrantStore for LmdbGrantStore {
    fn load_acl(&self, target: &Target) -> Result<Vec<String>> {
        self.read(|d, tx| {
            Ok(d.acl
                .get(tx, &key_of(target))
                .map_err(err)?
                .map(|s| s.lines().map(str::to_string).collect())
                .unwrap_or_default())
        })
    }

    fn save_acl(&self, target: &Target, aces: &[String]) -> Result<()> {
        let k = key_of(target);
        self.write(|d, tx| {
            let rev = d.rev.get(tx, &k).map_err(err)?.unwrap_or(0);
            if aces.is_empty() {
                d.acl.delete(tx, &k).map_err(err)?;
            } else {
                d.acl.put(tx, &k, &aces.join("\n")).map_err(err)?;
            }
            d.rev.put(tx, &k, &(rev + 1)).map_err(err)
        })
    }

    fn delete_acl(&self, target: &Target) -> Result<()> {
        let k = key_of(target);
        self.write(|d, tx| {
            d.acl.delete(tx, &k).map_err(err)?;
            d.rev.delete(tx, &k).map_err(err)?;
            Ok(())
        })
    }

    fn revision(&self, target: &Target) -> Result<u64> {
        self.read(|d, tx| Ok(d.rev.get(tx, &key_of(target)).map_err(err)?.unwrap_or(0)))
    }

    fn targets_with_grants(&self) -> Result<Vec<(TargetType, String)>> {
        self.read(|d, tx| {
            let mut out = Vec::new();
            for item in d.acl.iter(tx).map_err(err)? {
                let (k, _) = item.map_err(err)?;
                if let Some((kind, id)) = parse_target_key(k) {
                    if let Ok(kind) = TargetType::from_code(kind) {
                        out.push((kind, id.to_string()));
                    }
                }
            }
            out.sort();
            Ok(out)
        })
    }
}
