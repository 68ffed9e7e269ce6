//! LMDB-backed set store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep filter sets in a
//! memory-mapped file that survives restarts and can be opened by several
//! processes on the same host.
//!
//! # Layout
//!
//! Two named databases:
//! - `members`: one row per set member, keyed by `sha256(set key) ++ member`
//!   with an empty value. The members of a set are the rows under its
//!   32-byte digest, so row keys stay within LMDB's 511-byte key limit no
//!   matter how long the set key is.
//! - `sets`: `sha256(set key)` to the set key itself, one entry per
//!   non-empty set. `scan_prefix` reads names from here.
//!
//! Members are decimal ids in practice; a member longer than 479 bytes is
//! rejected by LMDB.
//!
//! # Transactions
//!
//! - Read transactions for `cardinality`, `exists`, `members`, `intersect`, `scan_prefix`
//! - One write transaction per `replace`, `add`, `remove`, `delete`
//!
//! `intersect` runs inside a single read transaction, so it sees one
//! snapshot even while warms are writing.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use sha2::{Digest, Sha256};
use sieve_core::{SetKey, SieveConfig, StoreError};
use tracing::debug;

use crate::{SetStore, StoreResult};

const EMPTY: &[u8] = &[];
const DIGEST_LEN: usize = 32;

/// Fixed-size row prefix of one set.
type SetId = [u8; DIGEST_LEN];

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// No LMDB directory configured.
    #[error("No LMDB path configured")]
    MissingPath,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        StoreError::Backend {
            reason: e.to_string(),
        }
    }
}

fn txn_err(e: heed::Error) -> StoreError {
    LmdbStoreError::Transaction(e.to_string()).into()
}

fn set_id(key: &SetKey) -> SetId {
    let digest = Sha256::digest(key.as_str().as_bytes());
    let mut id = [0u8; DIGEST_LEN];
    id.copy_from_slice(&digest);
    id
}

fn member_row(id: &SetId, member: &str) -> Vec<u8> {
    let mut row = Vec::with_capacity(DIGEST_LEN + member.len());
    row.extend_from_slice(id);
    row.extend_from_slice(member.as_bytes());
    row
}

/// LMDB-backed set store.
///
/// # Example
///
/// ```ignore
/// use sieve_storage::{LmdbSetStore, SetStore};
/// use sieve_core::SetKey;
///
/// let store = LmdbSetStore::new("/var/lib/sieve", 256)?;
/// let key = SetKey::index("region_filter_US");
/// store.add(&key, &["1".to_string(), "2".to_string()]).await?;
/// assert_eq!(store.cardinality(&key).await?, 2);
/// ```
#[derive(Clone)]
pub struct LmdbSetStore {
    env: Env,
    members: Database<Bytes, Bytes>,
    sets: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbSetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbSetStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbSetStore {
    /// Open (or create) an LMDB set store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Databases cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store and never
        // reopened with different options while mapped.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let members: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("members"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let sets: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("sets"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        debug!(path = %path.as_ref().display(), max_size_mb, "opened LMDB set store");

        Ok(Self { env, members, sets })
    }

    /// Open the store described by `config.lmdb_path` and `config.lmdb_map_size_mb`.
    pub fn from_config(config: &SieveConfig) -> Result<Self, LmdbStoreError> {
        let path = config
            .lmdb_path
            .as_ref()
            .ok_or(LmdbStoreError::MissingPath)?;
        Self::new(path, config.lmdb_map_size_mb)
    }

    /// Member rows currently stored under `id`.
    fn rows(&self, txn: &RoTxn, id: &SetId) -> StoreResult<Vec<Vec<u8>>> {
        let iter = self.members.prefix_iter(txn, id.as_slice()).map_err(txn_err)?;
        let mut rows = Vec::new();
        for result in iter {
            let (row, _) = result.map_err(txn_err)?;
            rows.push(row.to_vec());
        }
        Ok(rows)
    }

    fn has_rows(&self, txn: &RoTxn, id: &SetId) -> StoreResult<bool> {
        let mut iter = self.members.prefix_iter(txn, id.as_slice()).map_err(txn_err)?;
        match iter.next() {
            Some(result) => result.map(|_| true).map_err(txn_err),
            None => Ok(false),
        }
    }

    /// Decoded members of `key` within an open transaction.
    fn read_members(
        &self,
        txn: &RoTxn,
        key: &SetKey,
        id: &SetId,
    ) -> StoreResult<HashSet<String>> {
        self.rows(txn, id)?
            .into_iter()
            .map(|row| {
                String::from_utf8(row[DIGEST_LEN..].to_vec()).map_err(|_| {
                    StoreError::CorruptMember {
                        key: key.to_string(),
                        member: String::from_utf8_lossy(&row[DIGEST_LEN..]).into_owned(),
                    }
                })
            })
            .collect()
    }

    /// Index of the smallest of the given sets.
    ///
    /// Steps every set's rows in lockstep and stops at the first one to run
    /// out, so the cost is bounded by the smallest set rather than the
    /// largest. `ids` must not be empty.
    fn smallest(&self, txn: &RoTxn, ids: &[SetId]) -> StoreResult<usize> {
        let mut iters = ids
            .iter()
            .map(|id| self.members.prefix_iter(txn, id.as_slice()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(txn_err)?;
        loop {
            for (i, iter) in iters.iter_mut().enumerate() {
                match iter.next() {
                    None => return Ok(i),
                    Some(result) => {
                        result.map_err(txn_err)?;
                    }
                }
            }
        }
    }

    /// Keep the `sets` catalog in step with whether `id` still has rows.
    fn sync_catalog(&self, wtxn: &mut RwTxn, key: &SetKey, id: &SetId) -> StoreResult<()> {
        if self.has_rows(wtxn, id)? {
            self.sets
                .put(wtxn, id.as_slice(), key.as_str().as_bytes())
                .map_err(txn_err)?;
        } else {
            self.sets.delete(wtxn, id.as_slice()).map_err(txn_err)?;
        }
        Ok(())
    }

    fn delete_rows(&self, wtxn: &mut RwTxn, id: &SetId) -> StoreResult<usize> {
        let existing = self.rows(wtxn, id)?;
        for row in &existing {
            self.members.delete(wtxn, row).map_err(txn_err)?;
        }
        Ok(existing.len())
    }
}

#[async_trait]
impl SetStore for LmdbSetStore {
    async fn replace(&self, key: &SetKey, members: &HashSet<String>) -> StoreResult<()> {
        let id = set_id(key);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        self.delete_rows(&mut wtxn, &id)?;
        for member in members {
            self.members
                .put(&mut wtxn, &member_row(&id, member), EMPTY)
                .map_err(txn_err)?;
        }
        self.sync_catalog(&mut wtxn, key, &id)?;

        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn add(&self, key: &SetKey, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let id = set_id(key);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut added = 0u64;
        for member in members {
            let row = member_row(&id, member);
            if self.members.get(&wtxn, &row).map_err(txn_err)?.is_none() {
                self.members.put(&mut wtxn, &row, EMPTY).map_err(txn_err)?;
                added += 1;
            }
        }
        self.sync_catalog(&mut wtxn, key, &id)?;

        wtxn.commit().map_err(txn_err)?;
        Ok(added)
    }

    async fn remove(&self, key: &SetKey, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let id = set_id(key);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut removed = 0u64;
        for member in members {
            if self
                .members
                .delete(&mut wtxn, &member_row(&id, member))
                .map_err(txn_err)?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            self.sync_catalog(&mut wtxn, key, &id)?;
        }

        wtxn.commit().map_err(txn_err)?;
        Ok(removed)
    }

    async fn cardinality(&self, key: &SetKey) -> StoreResult<u64> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let id = set_id(key);
        let iter = self.members.prefix_iter(&rtxn, id.as_slice()).map_err(txn_err)?;
        let mut count = 0u64;
        for result in iter {
            result.map_err(txn_err)?;
            count += 1;
        }
        Ok(count)
    }

    async fn exists(&self, key: &SetKey) -> StoreResult<bool> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.has_rows(&rtxn, &set_id(key))
    }

    async fn members(&self, key: &SetKey) -> StoreResult<HashSet<String>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.read_members(&rtxn, key, &set_id(key))
    }

    async fn intersect(&self, keys: &[SetKey]) -> StoreResult<HashSet<String>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let ids: Vec<SetId> = keys.iter().map(set_id).collect();
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        // Walk the smallest set and look each member up in the others.
        let base = self.smallest(&rtxn, &ids)?;
        let candidates = self.read_members(&rtxn, &keys[base], &ids[base])?;

        let mut result = HashSet::with_capacity(candidates.len());
        'members: for member in candidates {
            for (i, id) in ids.iter().enumerate() {
                if i == base {
                    continue;
                }
                let row = member_row(id, &member);
                if self.members.get(&rtxn, &row).map_err(txn_err)?.is_none() {
                    continue 'members;
                }
            }
            result.insert(member);
        }
        Ok(result)
    }

    async fn delete(&self, key: &SetKey) -> StoreResult<bool> {
        let id = set_id(key);
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let deleted = self.delete_rows(&mut wtxn, &id)?;
        self.sets.delete(&mut wtxn, id.as_slice()).map_err(txn_err)?;

        wtxn.commit().map_err(txn_err)?;
        Ok(deleted > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<SetKey>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let iter = self.sets.iter(&rtxn).map_err(txn_err)?;

        let mut keys = BTreeSet::new();
        for result in iter {
            let (_, name) = result.map_err(txn_err)?;
            let key = std::str::from_utf8(name)
                .ok()
                .and_then(|name| SetKey::parse(name).ok())
                .ok_or_else(|| StoreError::CorruptMember {
                    key: "catalog".to_string(),
                    member: String::from_utf8_lossy(name).into_owned(),
                })?;
            if key.as_str().starts_with(prefix) {
                keys.insert(key);
            }
        }
        Ok(keys.into_iter().collect())
    }
}
