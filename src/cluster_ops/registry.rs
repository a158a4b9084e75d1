use std::net::Ipv4Addr;

use tracing::{debug, info};

use crate::cloud::{CloudError, ComputeApi};

use super::{BootstrapRole, ClusterMember};

/// Snapshot of the nodes in the autoscaling group, ordered by private address.
/// Taken once per bootstrap attempt and never refreshed, so every role
/// decision made from it agrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    group: String,
    registry: Vec<ClusterMember>,
}

impl Registry {
    pub fn from_members(group: impl Into<String>, mut members: Vec<ClusterMember>) -> Self {
        members.sort_by(|a, b| {
            a.private_ip
                .cmp(&b.private_ip)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        members.dedup();
        Self {
            group: group.into(),
            registry: members,
        }
    }

    /// Query the group and the private address of each of its instances.
    pub async fn snapshot(compute: &dyn ComputeApi, group: &str) -> Result<Self, CloudError> {
        let ids = compute.group_instances(group).await?;
        debug!(group, instances = ids.len(), "autoscaling group listed");
        let members = compute.describe_instances(&ids).await?;
        let registry = Self::from_members(group, members);
        info!(
            group,
            members = %registry
                .registry
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            "group snapshot taken"
        );
        Ok(registry)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn members(&self) -> &[ClusterMember] {
        &self.registry
    }

    /// Get the number of nodes in the group
    pub fn member_count(&self) -> usize {
        self.registry.len()
    }

    pub fn contains(&self, private_ip: Ipv4Addr) -> bool {
        self.registry.iter().any(|m| m.private_ip == private_ip)
    }

    /// The member with the lowest private address.
    pub fn leader(&self) -> Option<&ClusterMember> {
        self.registry.first()
    }

    /// Leader only for the lowest address in the snapshot. A node missing from
    /// the snapshot (it raced a scaling event) is always a follower.
    pub fn role_of(&self, private_ip: Ipv4Addr) -> BootstrapRole {
        match self.leader() {
            Some(leader) if leader.private_ip == private_ip => BootstrapRole::Leader,
            _ => BootstrapRole::Follower,
        }
    }
}
