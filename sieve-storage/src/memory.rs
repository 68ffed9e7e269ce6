//! In-memory set store.
//!
//! Clones share the same underlying map, so one `MemorySetStore` handed to
//! several engines behaves like a single shared remote store.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sieve_core::{SetKey, StoreError};

use crate::{intersect_all, SetStore, StoreResult};

/// In-memory set store.
#[derive(Debug, Default, Clone)]
pub struct MemorySetStore {
    sets: Arc<RwLock<HashMap<SetKey, HashSet<String>>>>,
}

impl MemorySetStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every set.
    pub fn clear(&self) -> StoreResult<()> {
        self.sets
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .clear();
        Ok(())
    }

    /// Number of keys currently held.
    pub fn key_count(&self) -> StoreResult<usize> {
        Ok(self
            .sets
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .len())
    }
}

#[async_trait]
impl SetStore for MemorySetStore {
    async fn replace(&self, key: &SetKey, members: &HashSet<String>) -> StoreResult<()> {
        let mut sets = self.sets.write().map_err(|_| StoreError::LockPoisoned)?;
        if members.is_empty() {
            sets.remove(key);
        } else {
            sets.insert(key.clone(), members.clone());
        }
        Ok(())
    }

    async fn add(&self, key: &SetKey, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut sets = self.sets.write().map_err(|_| StoreError::LockPoisoned)?;
        let set = sets.entry(key.clone()).or_default();
        let added = members
            .iter()
            .filter(|m| set.insert((*m).clone()))
            .count();
        Ok(added as u64)
    }

    async fn remove(&self, key: &SetKey, members: &[String]) -> StoreResult<u64> {
        let mut sets = self.sets.write().map_err(|_| StoreError::LockPoisoned)?;
        let Some(set) = sets.get_mut(key) else {
            return Ok(0);
        };
        let removed = members.iter().filter(|m| set.remove(m.as_str())).count();
        if set.is_empty() {
            sets.remove(key);
        }
        Ok(removed as u64)
    }

    async fn cardinality(&self, key: &SetKey) -> StoreResult<u64> {
        let sets = self.sets.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sets.get(key).map_or(0, |s| s.len() as u64))
    }

    async fn members(&self, key: &SetKey) -> StoreResult<HashSet<String>> {
        let sets = self.sets.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sets.get(key).cloned().unwrap_or_default())
    }

    async fn intersect(&self, keys: &[SetKey]) -> StoreResult<HashSet<String>> {
        let sets = self.sets.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut fetched = Vec::with_capacity(keys.len());
        for key in keys {
            match sets.get(key) {
                Some(set) => fetched.push(set.clone()),
                None => return Ok(HashSet::new()),
            }
        }
        Ok(intersect_all(fetched))
    }

    async fn delete(&self, key: &SetKey) -> StoreResult<bool> {
        let mut sets = self.sets.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sets.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<SetKey>> {
        let sets = self.sets.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut keys: Vec<SetKey> = sets
            .keys()
            .filter(|k| k.as_str().starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_replace_and_members() {
        let store = MemorySetStore::new();
        let key = SetKey::index("region_filter_US");

        store.replace(&key, &members(&["1", "2"])).await.unwrap();
        assert_eq!(store.members(&key).await.unwrap(), members(&["1", "2"]));

        store.replace(&key, &members(&["3"])).await.unwrap();
        assert_eq!(store.members(&key).await.unwrap(), members(&["3"]));
    }

    #[tokio::test]
    async fn test_replace_with_empty_deletes() {
        let store = MemorySetStore::new();
        let key = SetKey::index("a");
        store.replace(&key, &members(&["1"])).await.unwrap();
        store.replace(&key, &HashSet::new()).await.unwrap();
        assert_eq!(store.key_count().unwrap(), 0);
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_and_remove_counts() {
        let store = MemorySetStore::new();
        let key = SetKey::index("a");

        assert_eq!(store.add(&key, &strings(&["1", "2"])).await.unwrap(), 2);
        assert_eq!(store.add(&key, &strings(&["2", "3"])).await.unwrap(), 1);
        assert_eq!(store.cardinality(&key).await.unwrap(), 3);

        assert_eq!(store.remove(&key, &strings(&["3", "4"])).await.unwrap(), 1);
        assert_eq!(store.cardinality(&key).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove_last_member_deletes_key() {
        let store = MemorySetStore::new();
        let key = SetKey::index("a");
        store.add(&key, &strings(&["1"])).await.unwrap();
        store.remove(&key, &strings(&["1"])).await.unwrap();
        assert!(store.scan_prefix("idx_").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_empty() {
        let store = MemorySetStore::new();
        let key = SetKey::index("missing");
        assert_eq!(store.cardinality(&key).await.unwrap(), 0);
        assert!(store.members(&key).await.unwrap().is_empty());
        assert!(!store.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_intersect() {
        let store = MemorySetStore::new();
        let a = SetKey::index("a");
        let b = SetKey::index("b");
        let missing = SetKey::index("missing");
        store.replace(&a, &members(&["1", "2", "3"])).await.unwrap();
        store.replace(&b, &members(&["2", "3", "4"])).await.unwrap();

        assert_eq!(
            store.intersect(&[a.clone(), b.clone()]).await.unwrap(),
            members(&["2", "3"])
        );
        assert_eq!(
            store.intersect(&[a.clone()]).await.unwrap(),
            members(&["1", "2", "3"])
        );
        assert!(store.intersect(&[a, missing]).await.unwrap().is_empty());
        assert!(store.intersect(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemorySetStore::new();
        let other = store.clone();
        let key = SetKey::index("shared");
        store.add(&key, &strings(&["7"])).await.unwrap();
        assert_eq!(other.members(&key).await.unwrap(), members(&["7"]));
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = MemorySetStore::new();
        store
            .add(&SetKey::index("b"), &strings(&["1"]))
            .await
            .unwrap();
        store
            .add(&SetKey::index("a"), &strings(&["1"]))
            .await
            .unwrap();
        store
            .add(&SetKey::ephemeral("tmp_"), &strings(&["1"]))
            .await
            .unwrap();

        let keys = store.scan_prefix("idx_").await.unwrap();
        assert_eq!(keys, vec![SetKey::index("a"), SetKey::index("b")]);
        assert_eq!(store.scan_prefix("tmp_").await.unwrap().len(), 1);
    }
}
