//! Bootstrap of a highly available Kubernetes control plane on an
//! autoscaling group, with no coordinator beyond a shared object store.

pub mod bootstrap;
pub mod cloud;
pub mod cluster_ops;
pub mod credential;
pub mod kubeadm;
pub mod retry;
pub mod store;

pub use cluster_ops::{
    BootstrapConfig, BootstrapError, BootstrapReport, BootstrapRole, Node, RoleDecision,
};
pub use credential::{BootstrapMarker, JoinCredential};
