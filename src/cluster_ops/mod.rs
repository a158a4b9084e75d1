use std::{fmt::Display, net::Ipv4Addr};

use serde::{Deserialize, Serialize};

mod config;
mod error;
mod node;
mod registry;

pub use config::*;
pub use error::*;
pub use node::*;
pub use registry::*;

/// The part a node plays in the current bootstrap cycle.
/// Derived from the group snapshot, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapRole {
    Follower,
    Leader,
}

impl Display for BootstrapRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follower => f.write_str("follower"),
            Self::Leader => f.write_str("leader"),
        }
    }
}

#[macro_export]
macro_rules! masters_prefix_gen {
    ($prefix:expr, $cluster:expr) => {
        format!("{}/{}/masters/", $prefix, $cluster)
    };
}

#[macro_export]
macro_rules! marker_key_gen {
    ($prefix:expr, $cluster:expr) => {
        format!("{}marker", $crate::masters_prefix_gen!($prefix, $cluster))
    };
}

#[macro_export]
macro_rules! join_command_key_gen {
    ($prefix:expr, $cluster:expr) => {
        format!("{}join_command", $crate::masters_prefix_gen!($prefix, $cluster))
    };
}

#[macro_export]
macro_rules! cert_key_key_gen {
    ($prefix:expr, $cluster:expr) => {
        format!("{}cert_key", $crate::masters_prefix_gen!($prefix, $cluster))
    };
}

/// One instance of the autoscaling group.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ClusterMember {
    pub instance_id: String,
    pub private_ip: Ipv4Addr,
}

impl ClusterMember {
    pub fn new(instance_id: impl Into<String>, private_ip: Ipv4Addr) -> Self {
        Self {
            instance_id: instance_id.into(),
            private_ip,
        }
    }
}

impl Display for ClusterMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.instance_id, self.private_ip)
    }
}

#[cfg(test)]
mod test {
    #[test]
    fn key_layout_test() {
        assert_eq!(
            masters_prefix_gen!("bootstrap", "prod"),
            "bootstrap/prod/masters/"
        );
        assert_eq!(
            marker_key_gen!("bootstrap", "prod"),
            "bootstrap/prod/masters/marker"
        );
        assert_eq!(
            join_command_key_gen!("bootstrap", "prod"),
            "bootstrap/prod/masters/join_command"
        );
        assert_eq!(
            cert_key_key_gen!("bootstrap", "prod"),
            "bootstrap/prod/masters/cert_key"
        );
    }
}
