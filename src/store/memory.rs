use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{check_key, is_prefix, BlobStore, StoreError};

/// In-process store for dry runs and tests. Clones share their contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects held.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        check_key(key)?;
        self.objects.write().insert(key.to_owned(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_key(key)?;
        Ok(self.objects.read().get(key).cloned())
    }

    async fn exists(&self, prefix: &str) -> Result<bool, StoreError> {
        check_key(prefix)?;
        let objects = self.objects.read();
        if is_prefix(prefix) {
            Ok(objects
                .range(prefix.to_owned()..)
                .next()
                .map_or(false, |(k, _)| k.starts_with(prefix)))
        } else {
            Ok(objects.contains_key(prefix))
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        check_key(prefix)?;
        Ok(self
            .objects
            .read()
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        check_key(key)?;
        self.objects.write().remove(key);
        Ok(())
    }
}

/// Backend whose calls never complete, like a request stuck on a dead peer.
#[cfg(test)]
pub(crate) struct StalledStore;

#[cfg(test)]
#[async_trait]
impl BlobStore for StalledStore {
    async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<(), StoreError> {
        futures_util::future::pending().await
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        futures_util::future::pending().await
    }

    async fn exists(&self, _prefix: &str) -> Result<bool, StoreError> {
        futures_util::future::pending().await
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
        futures_util::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        futures_util::future::pending().await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn memory_put_get_test() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k/a").await.unwrap(), None);
        store.put("k/a", b"one".to_vec()).await.unwrap();
        store.put("k/a", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("k/a").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_exists_prefix_test() {
        let store = MemoryStore::new();
        assert!(!store.exists("boot/masters/").await.unwrap());
        store.put("boot/mastersx", b"".to_vec()).await.unwrap();
        assert!(!store.exists("boot/masters/").await.unwrap());
        store.put("boot/masters/marker", b"".to_vec()).await.unwrap();
        assert!(store.exists("boot/masters/").await.unwrap());
        assert!(store.exists("boot/masters/marker").await.unwrap());
        assert!(!store.exists("boot/masters/cert_key").await.unwrap());
    }

    #[tokio::test]
    async fn memory_list_delete_test() {
        let store = MemoryStore::new();
        for key in ["p/b", "p/a", "q/a"] {
            store.put(key, vec![1]).await.unwrap();
        }
        assert_eq!(store.list("p/").await.unwrap(), vec!["p/a", "p/b"]);
        store.delete("p/a").await.unwrap();
        store.delete("p/missing").await.unwrap();
        assert_eq!(store.list("p/").await.unwrap(), vec!["p/b"]);
    }

    #[tokio::test]
    async fn memory_clones_share_test() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.put("x/y", vec![7]).await.unwrap();
        assert_eq!(other.get("x/y").await.unwrap(), Some(vec![7]));
    }
}
