use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::{
    cloud::LocalIdentity,
    cluster_ops::BootstrapError,
    credential::JoinCredential,
    kubeadm::ClusterTool,
    store::{CoordinationStore, FetchOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerState {
    Wait,
    Fetch,
    Join,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct JoinerSettings {
    pub poll_interval: Duration,
    /// Total budget for the marker and a complete credential to show up.
    pub timeout: Duration,
    pub kubeconfig_home: Option<PathBuf>,
}

/// Follower side of the bootstrap: wait for the leader's marker, fetch the
/// credential pair, then join as an additional control plane member.
pub struct ClusterJoiner {
    store: CoordinationStore,
    tool: Arc<dyn ClusterTool>,
    identity: LocalIdentity,
    settings: JoinerSettings,
}

struct Progress {
    deadline: Instant,
    credential: Option<JoinCredential>,
    retry_fetch: bool,
}

impl ClusterJoiner {
    pub fn new(
        store: CoordinationStore,
        tool: Arc<dyn ClusterTool>,
        identity: LocalIdentity,
        settings: JoinerSettings,
    ) -> Self {
        Self {
            store,
            tool,
            identity,
            settings,
        }
    }

    /// Drive the machine to `Done`. Returns the states visited, in order.
    /// A node that already runs a control plane member goes straight to `Done`.
    pub async fn run(&self) -> Result<Vec<FollowerState>, BootstrapError> {
        if self.tool.is_initialized().await {
            info!("control plane already running on this node");
            return Ok(vec![FollowerState::Done]);
        }

        let mut progress = Progress {
            deadline: super::deadline_after(self.settings.timeout),
            credential: None,
            retry_fetch: false,
        };
        let mut state = FollowerState::Wait;
        let mut visited = Vec::new();
        loop {
            visited.push(state);
            if state == FollowerState::Done {
                return Ok(visited);
            }
            match self.step(state, &mut progress).await {
                Ok(next) => {
                    info!(from = ?state, to = ?next, "follower transition");
                    state = next;
                }
                Err(e) => {
                    error!(from = ?state, to = ?FollowerState::Failed, error = %e, "follower bootstrap failed");
                    return Err(e);
                }
            }
        }
    }

    async fn step(
        &self,
        state: FollowerState,
        progress: &mut Progress,
    ) -> Result<FollowerState, BootstrapError> {
        match state {
            FollowerState::Wait => self.wait(progress).await,
            FollowerState::Fetch => self.fetch(progress).await,
            FollowerState::Join => self.join(progress).await,
            FollowerState::Done | FollowerState::Failed => Ok(state),
        }
    }

    /// Sleep one poll interval, or fail if the budget is spent.
    async fn nap(&self, deadline: Instant) -> Result<(), BootstrapError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BootstrapError::WaitTimeout(self.settings.timeout));
        }
        sleep(self.settings.poll_interval.min(remaining)).await;
        Ok(())
    }

    async fn wait(&self, progress: &mut Progress) -> Result<FollowerState, BootstrapError> {
        if progress.retry_fetch {
            progress.retry_fetch = false;
            self.nap(progress.deadline).await?;
        }
        let mut polls = 0u32;
        loop {
            polls += 1;
            // A stalled store must not outlive the wait budget.
            let remaining = progress.deadline.saturating_duration_since(Instant::now());
            let found = timeout(remaining, self.store.marker_exists())
                .await
                .map_err(|_| BootstrapError::WaitTimeout(self.settings.timeout))??;
            if found {
                debug!(polls, "bootstrap marker found");
                return Ok(FollowerState::Fetch);
            }
            debug!(polls, key = %self.store.marker_key(), "bootstrap marker not published yet");
            self.nap(progress.deadline).await?;
        }
    }

    async fn fetch(&self, progress: &mut Progress) -> Result<FollowerState, BootstrapError> {
        match self.store.fetch_credential().await? {
            FetchOutcome::Complete(credential) => {
                progress.credential = Some(credential);
                Ok(FollowerState::Join)
            }
            FetchOutcome::Incomplete => {
                warn!("marker present but join credential incomplete");
                progress.retry_fetch = true;
                Ok(FollowerState::Wait)
            }
        }
    }

    async fn join(&self, progress: &mut Progress) -> Result<FollowerState, BootstrapError> {
        let credential = progress.credential.take().ok_or_else(|| {
            BootstrapError::InvalidCredential("join attempted before fetch".to_owned())
        })?;
        self.tool
            .join(&credential, Some(self.identity.private_ip))
            .await?;
        if let Some(home) = &self.settings.kubeconfig_home {
            self.tool.install_kubeconfig(home).await?;
        }
        Ok(FollowerState::Done)
    }
}
