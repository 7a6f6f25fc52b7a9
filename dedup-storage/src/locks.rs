use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::hash::ContentHash;

/// One async mutex per key. Entries are created on first use and dropped by
/// [`KeyLocks::prune`] once nobody holds or waits on them.
pub struct KeyLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

/// Serializes every change to a hash group.
pub type HashLocks = KeyLocks<ContentHash>;

/// Serializes every change to one bucket-qualified path.
pub type PathLocks = KeyLocks<String>;

/// Held while the keyed resource is being changed. Dropping it releases the lock.
pub struct KeyGuard<K> {
    key: K,
    _guard: OwnedMutexGuard<()>,
}

impl<K> KeyGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Default for KeyLocks<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyGuard { key, _guard: guard }
    }

    /// Drops lock entries nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_hash_is_exclusive() {
        let locks = Arc::new(HashLocks::new());
        let hash = ContentHash::compute(b"x");

        let guard = locks.lock(hash).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock(hash).await.key().to_hex() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), hash.to_hex());
    }

    #[tokio::test]
    async fn different_hashes_do_not_block() {
        let locks = HashLocks::new();
        let _a = locks.lock(ContentHash::compute(b"a")).await;
        let _b = locks.lock(ContentHash::compute(b"b")).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn same_path_is_exclusive() {
        let locks = Arc::new(PathLocks::new());
        let guard = locks.lock("user-a-bucket/f".to_string()).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guard = locks.lock("user-a-bucket/f".to_string()).await;
                guard.key().clone()
            })
        };
        let _other = locks.lock("user-a-bucket/g".to_string()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), "user-a-bucket/f");
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = HashLocks::new();
        let held = locks.lock(ContentHash::compute(b"held")).await;
        drop(locks.lock(ContentHash::compute(b"free")).await);
        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
