//! Sieve Storage - Set Store Trait and Implementations
//!
//! Defines the key-value collaborator the filter index runs against: a store
//! of named string sets. Two implementations are provided:
//!
//! - [`MemorySetStore`]: process-local, shared between clones; used in tests
//!   and single-process deployments.
//! - [`LmdbSetStore`]: persistent, memory-mapped LMDB environment that
//!   several processes on one host can share.
//!
//! # Set Semantics
//!
//! Stores follow the usual set-store conventions: a key that does not exist
//! behaves as the empty set, and writing an empty set removes the key.

pub mod lmdb_backend;
pub mod memory;

pub use lmdb_backend::{LmdbSetStore, LmdbStoreError};
pub use memory::MemorySetStore;

use std::collections::HashSet;

use async_trait::async_trait;
use sieve_core::{SetKey, StoreError};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A store of named sets of strings.
///
/// Every method is one round trip to the store; implementations must be
/// safe to call concurrently from many tasks. Individual operations are
/// atomic per key, sequences of operations are not.
#[async_trait]
pub trait SetStore: Send + Sync + 'static {
    /// Replace the set at `key` with `members`. An empty `members` deletes it.
    async fn replace(&self, key: &SetKey, members: &HashSet<String>) -> StoreResult<()>;

    /// Add members, returning how many were not already present.
    async fn add(&self, key: &SetKey, members: &[String]) -> StoreResult<u64>;

    /// Remove members, returning how many were present.
    async fn remove(&self, key: &SetKey, members: &[String]) -> StoreResult<u64>;

    /// Number of members in the set at `key` (0 if absent).
    async fn cardinality(&self, key: &SetKey) -> StoreResult<u64>;

    /// All members of the set at `key`.
    async fn members(&self, key: &SetKey) -> StoreResult<HashSet<String>>;

    /// Members present in every one of `keys`.
    ///
    /// A single key yields its own members; any absent key yields the empty
    /// set; no keys yields the empty set.
    async fn intersect(&self, keys: &[SetKey]) -> StoreResult<HashSet<String>>;

    /// Delete the set at `key`, returning whether it existed.
    async fn delete(&self, key: &SetKey) -> StoreResult<bool>;

    /// Keys of all non-empty sets whose name starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<SetKey>>;

    /// Whether the set at `key` has at least one member.
    async fn exists(&self, key: &SetKey) -> StoreResult<bool> {
        Ok(self.cardinality(key).await? > 0)
    }
}

#[async_trait]
impl<S: SetStore + ?Sized> SetStore for std::sync::Arc<S> {
    async fn replace(&self, key: &SetKey, members: &HashSet<String>) -> StoreResult<()> {
        (**self).replace(key, members).await
    }

    async fn add(&self, key: &SetKey, members: &[String]) -> StoreResult<u64> {
        (**self).add(key, members).await
    }

    async fn remove(&self, key: &SetKey, members: &[String]) -> StoreResult<u64> {
        (**self).remove(key, members).await
    }

    async fn cardinality(&self, key: &SetKey) -> StoreResult<u64> {
        (**self).cardinality(key).await
    }

    async fn members(&self, key: &SetKey) -> StoreResult<HashSet<String>> {
        (**self).members(key).await
    }

    async fn intersect(&self, keys: &[SetKey]) -> StoreResult<HashSet<String>> {
        (**self).intersect(keys).await
    }

    async fn delete(&self, key: &SetKey) -> StoreResult<bool> {
        (**self).delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<SetKey>> {
        (**self).scan_prefix(prefix).await
    }

    async fn exists(&self, key: &SetKey) -> StoreResult<bool> {
        (**self).exists(key).await
    }
}

/// Intersect already-fetched sets, smallest first.
pub(crate) fn intersect_all(mut sets: Vec<HashSet<String>>) -> HashSet<String> {
    if sets.is_empty() {
        return HashSet::new();
    }
    sets.sort_by_key(|s| s.len());
    let mut iter = sets.into_iter();
    let mut acc = iter.next().unwrap_or_default();
    for set in iter {
        if acc.is_empty() {
            break;
        }
        acc.retain(|m| set.contains(m));
    }
    acc
}
