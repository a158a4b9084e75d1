//! Cloud APIs the bootstrap consumes: instance metadata, autoscaling group
//! membership, and load balancer target health.

use std::{fmt::Display, net::Ipv4Addr};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::cluster_ops::ClusterMember;

mod aws;
mod error;
mod imds;

pub use aws::AwsCli;
pub use error::*;
pub use imds::Imds;

/// Who this node is, as seen by the local metadata service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub instance_id: String,
    pub private_ip: Ipv4Addr,
}

/// Health of one load balancer target. Transient, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown,
    Unhealthy,
    Healthy,
}

impl HealthState {
    /// Map an ELBv2 target health state.
    pub fn from_elb(state: &str) -> Self {
        match state {
            "healthy" => Self::Healthy,
            "unhealthy" | "draining" | "unavailable" => Self::Unhealthy,
            // "initial", "unused", and anything newer
            _ => Self::Unknown,
        }
    }
}

impl Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Unhealthy => f.write_str("unhealthy"),
            Self::Healthy => f.write_str("healthy"),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetadataApi: Send + Sync {
    async fn local_identity(&self) -> Result<LocalIdentity, CloudError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Instance ids currently in the autoscaling group.
    async fn group_instances(&self, group: &str) -> Result<Vec<String>, CloudError>;

    /// Private addresses for `ids`. Instances that are not pending or running,
    /// or have no private address yet, are left out.
    async fn describe_instances(&self, ids: &[String]) -> Result<Vec<ClusterMember>, CloudError>;

    /// Autoscaling group `instance_id` belongs to, if any.
    async fn group_of(&self, instance_id: &str) -> Result<Option<String>, CloudError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn target_health(&self, target_group: &str) -> Result<Vec<HealthState>, CloudError>;
}
