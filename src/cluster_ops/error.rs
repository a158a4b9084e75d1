use std::time::Duration;

use thiserror::Error;

use crate::{cloud::CloudError, kubeadm::ToolError, store::StoreError};

use super::ConfigError;

#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The coordination store kept failing after bounded retries.
    #[error("coordination store unavailable: {0}")]
    TransientStore(#[from] StoreError),
    #[error(transparent)]
    Subprocess(#[from] ToolError),
    #[error("load balancer reported no healthy target within {0:?}")]
    HealthTimeout(Duration),
    #[error("join credentials did not appear within {0:?}")]
    WaitTimeout(Duration),
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cluster {0} has not been bootstrapped yet")]
    NotBootstrapped(String),
    #[error("Invalid join credential: {0}")]
    InvalidCredential(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
