use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::{
    cluster_ops::BootstrapError, credential::JoinCredential, kubeadm::ClusterTool,
    store::CoordinationStore,
};

/// Source of rotation ticks. `next` resolves when a rotation is due and
/// returns `false` once no more are coming.
#[async_trait]
pub trait Trigger: Send {
    async fn next(&mut self) -> bool;
}

/// Fires every `period`, first one `period` after creation. Never ends.
pub struct IntervalTrigger {
    interval: Interval,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(super::deadline_after(period), period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn next(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RotationStats {
    pub succeeded: u64,
    pub failed: u64,
}

/// Keeps the published join credential fresh after bootstrap. Only the
/// credential objects are rewritten, the marker is left alone.
#[derive(Clone)]
pub struct RotationScheduler {
    store: CoordinationStore,
    tool: Arc<dyn ClusterTool>,
}

impl RotationScheduler {
    pub fn new(store: CoordinationStore, tool: Arc<dyn ClusterTool>) -> Self {
        Self { store, tool }
    }

    pub async fn rotate_once(&self) -> Result<(), BootstrapError> {
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
        self.store.write_credential(&credential).await?;
        Ok(())
    }

    /// Rotate on every tick until the trigger runs dry. A failed rotation is
    /// logged and the next tick tries again.
    pub async fn run(&self, trigger: &mut dyn Trigger) -> RotationStats {
        let mut stats = RotationStats::default();
        while trigger.next().await {
            match self.rotate_once().await {
                Ok(()) => {
                    stats.succeeded += 1;
                    info!(rotations = stats.succeeded, "join credential rotated");
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(error = %e, failures = stats.failed, "credential rotation failed");
                }
            }
        }
        stats
    }
}
