use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    cluster_ops::BootstrapConfig,
    credential::{BootstrapMarker, JoinCredential},
    retry::RetryPolicy,
};

use super::{BlobStore, StoreError};

/// Result of reading the join credential pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Complete(JoinCredential),
    /// At least one half is missing or blank. Not an error, the reader waits.
    Incomplete,
}

/// Typed view of the store for one cluster. Owns the key layout and retries
/// every call under a per-call deadline, so neither a transient failure nor
/// a stalled request is read as "not published yet".
#[derive(Clone)]
pub struct CoordinationStore {
    store: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    marker_key: String,
    join_command_key: String,
    cert_key_key: String,
}

impl CoordinationStore {
    pub fn new(store: Arc<dyn BlobStore>, config: &BootstrapConfig) -> Self {
        Self {
            store,
            retry: config.store_retry_policy(),
            marker_key: config.marker_key(),
            join_command_key: config.join_command_key(),
            cert_key_key: config.cert_key_key(),
        }
    }

    pub fn marker_key(&self) -> &str {
        &self.marker_key
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.retry
            .run("store put", || self.store.put(key, value.clone()))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.retry.run("store get", || self.store.get(key)).await
    }

    async fn get_text(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_owned(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.retry.run("store delete", || self.store.delete(key)).await
    }

    /// Raw prefix or key presence check.
    pub async fn exists(&self, prefix: &str) -> Result<bool, StoreError> {
        self.retry
            .run("store exists", || self.store.exists(prefix))
            .await
    }

    /// Whether the initial bootstrap of this cluster has been published.
    pub async fn marker_exists(&self) -> Result<bool, StoreError> {
        self.exists(&self.marker_key).await
    }

    pub async fn read_marker(&self) -> Result<Option<BootstrapMarker>, StoreError> {
        match self.get(&self.marker_key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: self.marker_key.clone(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Overwrite both halves of the join credential. Used by rotation, and by
    /// [`Self::publish`] before the marker goes out.
    pub async fn write_credential(&self, credential: &JoinCredential) -> Result<(), StoreError> {
        self.put(
            &self.cert_key_key,
            credential.certificate_key.as_bytes().to_vec(),
        )
        .await?;
        self.put(
            &self.join_command_key,
            credential.join_command.as_bytes().to_vec(),
        )
        .await?;
        debug!(?credential, "join credential written");
        Ok(())
    }

    /// Write the credential, confirm both halves read back intact, then write
    /// the marker. A reader that sees the marker always finds a full pair.
    pub async fn publish(
        &self,
        credential: &JoinCredential,
        marker: &BootstrapMarker,
    ) -> Result<(), StoreError> {
        self.write_credential(credential).await?;

        match self.fetch_credential().await? {
            FetchOutcome::Complete(stored) if stored == *credential => {}
            _ => {
                return Err(StoreError::Corrupt {
                    key: self.join_command_key.clone(),
                    reason: "credential did not read back as written".to_owned(),
                })
            }
        }

        let body = serde_json::to_vec(marker).map_err(|e| StoreError::Corrupt {
            key: self.marker_key.clone(),
            reason: e.to_string(),
        })?;
        self.put(&self.marker_key, body).await?;
        info!(cycle_id = %marker.cycle_id, key = %self.marker_key, "bootstrap marker published");
        Ok(())
    }

    /// Read the credential pair. A missing or blank half is `Incomplete`.
    pub async fn fetch_credential(&self) -> Result<FetchOutcome, StoreError> {
        let join_command = self.get_text(&self.join_command_key).await?;
        let certificate_key = self.get_text(&self.cert_key_key).await?;
        match (join_command, certificate_key) {
            (Some(join_command), Some(certificate_key)) => {
                let credential = JoinCredential {
                    join_command,
                    certificate_key,
                };
                if credential.is_complete() {
                    Ok(FetchOutcome::Complete(credential))
                } else {
                    Ok(FetchOutcome::Incomplete)
                }
            }
            (jc, ck) => {
                debug!(
                    join_command = jc.is_some(),
                    cert_key = ck.is_some(),
                    "join credential incomplete"
                );
                Ok(FetchOutcome::Incomplete)
            }
        }
    }

    /// Remove the marker and then the credentials, so a new cycle can start.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.delete(&self.marker_key).await?;
        self.delete(&self.join_command_key).await?;
        self.delete(&self.cert_key_key).await?;
        warn!(key = %self.marker_key, "bootstrap state cleared");
        Ok(())
    }
}
