use std::time::Duration;

use thiserror::Error;

use crate::retry::AttemptTimeout;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    ObjectStorage(#[from] opendal::Error),
    #[error(transparent)]
    Etcd(#[from] etcd_client::Error),
    #[error("Invalid key {key}: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("Corrupt object at {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("store call did not complete within {0:?}")]
    Timeout(Duration),
}

impl From<AttemptTimeout> for StoreError {
    fn from(e: AttemptTimeout) -> Self {
        Self::Timeout(e.0)
    }
}
