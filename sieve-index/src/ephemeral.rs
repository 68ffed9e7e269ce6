//! Scoped candidate set for one query.
//!
//! An [`EphemeralSet`] owns a randomly keyed set in the store for the
//! lifetime of a single `filter()` call. Call [`EphemeralSet::release`] to
//! delete it; if the value is dropped first (early return, panic, or the
//! query future being cancelled), `Drop` schedules the deletion on the
//! current tokio runtime.

use std::sync::Arc;

use sieve_core::{EntityId, SetKey, SieveResult};
use sieve_storage::SetStore;
use tracing::{debug, warn};

use crate::codec::encode_ids;

/// A transient set of candidate ids, deleted when released or dropped.
pub struct EphemeralSet<S: SetStore + ?Sized> {
    store: Arc<S>,
    key: SetKey,
    released: bool,
}

impl<S: SetStore + ?Sized> EphemeralSet<S> {
    /// Store `ids` under a fresh key starting with `prefix`.
    pub async fn create(store: Arc<S>, prefix: &str, ids: &[EntityId]) -> SieveResult<Self> {
        let set = Self {
            store,
            key: SetKey::ephemeral(prefix),
            released: false,
        };
        // On failure `set` drops here and cleans up anything partially written.
        set.store.replace(&set.key, &encode_ids(ids)).await?;
        Ok(set)
    }

    pub fn key(&self) -> &SetKey {
        &self.key
    }

    /// Delete the set now.
    ///
    /// If the delete fails, the drop fallback still retries it once.
    pub async fn release(mut self) -> SieveResult<()> {
        self.store.delete(&self.key).await?;
        self.released = true;
        Ok(())
    }
}

impl<S: SetStore + ?Sized> Drop for EphemeralSet<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "deleting abandoned candidate set in background");
                handle.spawn(async move {
                    if let Err(e) = store.delete(&key).await {
                        warn!(key = %key, error = %e, "failed to delete abandoned candidate set");
                    }
                });
            }
            Err(_) => {
                warn!(key = %key, "no async runtime available, candidate set leaked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_storage::MemorySetStore;

    async fn settle(store: &MemorySetStore, prefix: &str) -> usize {
        for _ in 0..100 {
            let left = store.scan_prefix(prefix).await.unwrap().len();
            if left == 0 {
                return 0;
            }
            tokio::task::yield_now().await;
        }
        store.scan_prefix(prefix).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_create_and_release() {
        let store = Arc::new(MemorySetStore::new());
        let set = EphemeralSet::create(Arc::clone(&store), "q_", &[1, 2, 3])
            .await
            .unwrap();

        assert!(set.key().as_str().starts_with("q_"));
        assert_eq!(store.cardinality(set.key()).await.unwrap(), 3);

        set.release().await.unwrap();
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drop_without_release_cleans_up() {
        let store = Arc::new(MemorySetStore::new());
        {
            let _set = EphemeralSet::create(Arc::clone(&store), "q_", &[1, 2])
                .await
                .unwrap();
        }
        assert_eq!(settle(&store, "q_").await, 0);
    }

    #[tokio::test]
    async fn test_empty_candidates_leave_no_key() {
        let store = Arc::new(MemorySetStore::new());
        let set = EphemeralSet::create(Arc::clone(&store), "q_", &[])
            .await
            .unwrap();
        assert_eq!(store.key_count().unwrap(), 0);
        set.release().await.unwrap();
    }

    #[test]
    fn test_drop_outside_runtime_does_not_panic() {
        let store = Arc::new(MemorySetStore::new());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let set = runtime
            .block_on(EphemeralSet::create(Arc::clone(&store), "q_", &[1]))
            .unwrap();
        drop(runtime);
        drop(set);
        assert_eq!(store.key_count().unwrap(), 1);
    }
}
