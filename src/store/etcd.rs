use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions};
use tracing::info;

use super::{check_key, is_prefix, BlobStore, StoreError};

/// etcd backend, for sites that already run an etcd cluster outside the
/// control plane being bootstrapped.
#[derive(Clone)]
pub struct EtcdStore {
    /// Client for the etcd cluster.
    client: Client,
}

impl EtcdStore {
    /// Every request, and the initial connection, is bounded by `call_timeout`.
    pub async fn connect(endpoints: &[String], call_timeout: Duration) -> Result<Self, StoreError> {
        let options = ConnectOptions::new()
            .with_connect_timeout(call_timeout)
            .with_timeout(call_timeout);
        let client = Client::connect(endpoints, Some(options)).await?;
        info!(?endpoints, "connected to etcd coordination store");
        Ok(Self { client })
    }
}

#[async_trait]
impl BlobStore for EtcdStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        check_key(key)?;
        let mut client = self.client.clone();
        client.put(key, value, None).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_key(key)?;
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn exists(&self, prefix: &str) -> Result<bool, StoreError> {
        check_key(prefix)?;
        let mut getoptions = GetOptions::new().with_keys_only().with_limit(1);
        if is_prefix(prefix) {
            getoptions = getoptions.with_prefix();
        }
        let mut client = self.client.clone();
        let resp = client.get(prefix, Some(getoptions)).await?;
        Ok(!resp.kvs().is_empty())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        check_key(prefix)?;
        let getoptions = GetOptions::new().with_prefix().with_keys_only();
        let mut client = self.client.clone();
        let resp = client.get(prefix, Some(getoptions)).await?;
        let mut keys = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let key = kv.key_str().map_err(|e| StoreError::Corrupt {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                reason: e.to_string(),
            })?;
            keys.push(key.to_owned());
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        check_key(key)?;
        let mut client = self.client.clone();
        client.delete(key, None).await?;
        Ok(())
    }
}
