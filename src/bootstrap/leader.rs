use std::{path::PathBuf, sync::Arc, time::Duration};

use tracing::{error, info, warn};

use crate::{
    cloud::LocalIdentity,
    cluster_ops::BootstrapError,
    credential::{BootstrapMarker, JoinCredential},
    kubeadm::{ClusterTool, InitSettings},
    store::CoordinationStore,
};

use super::{HealthOutcome, HealthPoller};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    CheckExisting,
    Init,
    AwaitHealthy,
    Publish,
    /// Another node already bootstrapped the cluster and this one has no
    /// control plane of its own. It has to join like a follower.
    JoinExisting,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct InitializerSettings {
    pub init: InitSettings,
    pub target_group: String,
    pub health_poll_interval: Duration,
    pub health_timeout: Duration,
    pub kubeconfig_home: Option<PathBuf>,
}

/// Leader side of the bootstrap: create the cluster once, wait until it is
/// reachable through the load balancer, then publish join credentials.
pub struct ClusterInitializer {
    store: CoordinationStore,
    tool: Arc<dyn ClusterTool>,
    health: HealthPoller,
    identity: LocalIdentity,
    settings: InitializerSettings,
}

impl ClusterInitializer {
    pub fn new(
        store: CoordinationStore,
        tool: Arc<dyn ClusterTool>,
        health: HealthPoller,
        identity: LocalIdentity,
        settings: InitializerSettings,
    ) -> Self {
        Self {
            store,
            tool,
            health,
            identity,
            settings,
        }
    }

    /// Drive the machine to `Done` or `JoinExisting`. Returns the states
    /// visited, in order. Any error leaves the machine in `Failed` and is
    /// returned as is.
    pub async fn run(&self) -> Result<Vec<LeaderState>, BootstrapError> {
        let mut state = LeaderState::CheckExisting;
        let mut visited = Vec::new();
        loop {
            visited.push(state);
            if matches!(state, LeaderState::Done | LeaderState::JoinExisting) {
                return Ok(visited);
            }
            match self.step(state).await {
                Ok(next) => {
                    info!(from = ?state, to = ?next, "leader transition");
                    state = next;
                }
                Err(e) => {
                    error!(from = ?state, to = ?LeaderState::Failed, error = %e, "leader bootstrap failed");
                    return Err(e);
                }
            }
        }
    }

    async fn step(&self, state: LeaderState) -> Result<LeaderState, BootstrapError> {
        match state {
            LeaderState::CheckExisting => self.check_existing().await,
            LeaderState::Init => self.init().await,
            LeaderState::AwaitHealthy => self.await_healthy().await,
            LeaderState::Publish => self.publish().await,
            LeaderState::JoinExisting | LeaderState::Done | LeaderState::Failed => Ok(state),
        }
    }

    async fn check_existing(&self) -> Result<LeaderState, BootstrapError> {
        let initialized = self.tool.is_initialized().await;
        if self.store.marker_exists().await? {
            if initialized {
                info!(key = %self.store.marker_key(), "cluster already bootstrapped");
                return Ok(LeaderState::Done);
            }
            // Lowest address now, but the cluster was created by someone else.
            warn!(key = %self.store.marker_key(), "cluster bootstrapped elsewhere, joining it");
            return Ok(LeaderState::JoinExisting);
        }
        if initialized {
            // Crashed between init and publish last time.
            warn!("control plane initialized locally but never published");
            return Ok(LeaderState::AwaitHealthy);
        }
        Ok(LeaderState::Init)
    }

    async fn init(&self) -> Result<LeaderState, BootstrapError> {
        self.tool.init(&self.settings.init).await?;
        if let Some(home) = &self.settings.kubeconfig_home {
            self.tool.install_kubeconfig(home).await?;
        }
        Ok(LeaderState::AwaitHealthy)
    }

    async fn await_healthy(&self) -> Result<LeaderState, BootstrapError> {
        match self
            .health
            .wait_until_healthy(
                &self.settings.target_group,
                self.settings.health_poll_interval,
                self.settings.health_timeout,
            )
            .await
        {
            HealthOutcome::Healthy => Ok(LeaderState::Publish),
            HealthOutcome::TimedOut => {
                Err(BootstrapError::HealthTimeout(self.settings.health_timeout))
            }
        }
    }

    async fn publish(&self) -> Result<LeaderState, BootstrapError> {
        let join_command = self.tool.issue_join_command().await?;
        let certificate_key = self.tool.issue_certificate_key().await?;
        let credential = JoinCredential {
            join_command,
            certificate_key,
        };
        if !credential.is_complete() {
            return Err(BootstrapError::InvalidCredential(
                "cluster tool issued an empty credential".to_owned(),
            ));
        }
        let marker = BootstrapMarker::new(
            self.identity.instance_id.clone(),
            self.identity.private_ip,
        );
        self.store.publish(&credential, &marker).await?;
        Ok(LeaderState::Done)
    }
}
