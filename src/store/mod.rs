//! The coordination store: the only channel nodes use to talk to each other.
//!
//! Backends implement [`BlobStore`], a plain keyed object API. Bootstrap code
//! never talks to a backend directly and goes through [`CoordinationStore`],
//! which owns the key layout and retries every remote call.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::cluster_ops::StoreBackend;

mod coordination;
mod error;
mod etcd;
mod memory;
mod s3;

pub use coordination::*;
pub use error::*;
pub use etcd::EtcdStore;
pub use memory::MemoryStore;
#[cfg(test)]
pub(crate) use memory::StalledStore;
pub use s3::S3Store;

/// Keyed object storage shared by every node of the group.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `value` at `key`, replacing any previous object.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Read the object at `key`. `None` when nothing was written there.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// A key ending in `/` is a prefix and exists when any object lives under it,
    /// any other key exists when that exact object does.
    async fn exists(&self, prefix: &str) -> Result<bool, StoreError>;

    /// Keys of every object under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove the object at `key`. Removing a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub(crate) fn is_prefix(key: &str) -> bool {
    key.ends_with('/')
}

pub(crate) fn check_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('/') {
        return Err(StoreError::InvalidKey {
            key: key.to_owned(),
            reason: "keys are relative and non-empty".to_owned(),
        });
    }
    Ok(())
}

/// Connect to the backend named in the configuration. `call_timeout` bounds
/// backend-level requests where the client supports it.
pub async fn open(
    backend: &StoreBackend,
    call_timeout: Duration,
) -> Result<Arc<dyn BlobStore>, StoreError> {
    let store: Arc<dyn BlobStore> = match backend {
        StoreBackend::S3 {
            bucket,
            region,
            endpoint,
            root,
        } => Arc::new(S3Store::new(
            bucket,
            region.as_deref(),
            endpoint.as_deref(),
            root,
        )?),
        StoreBackend::Etcd { endpoints } => {
            Arc::new(EtcdStore::connect(endpoints, call_timeout).await?)
        },
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}
