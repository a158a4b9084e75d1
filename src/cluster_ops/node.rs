use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    bootstrap::{
        ClusterInitializer, ClusterJoiner, FollowerState, HealthPoller, InitializerSettings,
        IntervalTrigger, JoinerSettings, LeaderState, RotationScheduler,
    },
    cloud::{AwsCli, CloudError, ComputeApi, Imds, LoadBalancerApi, LocalIdentity, MetadataApi},
    kubeadm::{ClusterTool, InitSettings, Kubeadm},
    store::{self, BlobStore, CoordinationStore},
};

use super::{BootstrapConfig, BootstrapError, BootstrapRole, Registry};

/// Outcome of the role election for this node.
#[derive(Debug, Clone)]
pub struct RoleDecision {
    pub identity: LocalIdentity,
    pub registry: Registry,
    pub role: BootstrapRole,
}

/// States visited by whichever machine this node ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapReport {
    Leader(Vec<LeaderState>),
    Follower(Vec<FollowerState>),
    /// Elected leader, but the cluster already existed and this node joined it.
    Rejoined {
        leader: Vec<LeaderState>,
        follower: Vec<FollowerState>,
    },
}

impl BootstrapReport {
    fn elected(&self) -> bool {
        !matches!(self, BootstrapReport::Follower(_))
    }
}

/// One control plane instance taking part in the bootstrap.
#[derive(Clone)]
pub struct Node {
    /// The cluster configuration.
    config: BootstrapConfig,
    /// Local instance metadata.
    metadata: Arc<dyn MetadataApi>,
    /// Autoscaling group and instance queries.
    compute: Arc<dyn ComputeApi>,
    /// Target health of the control plane load balancer.
    lb: Arc<dyn LoadBalancerApi>,
    /// The only channel shared with the other nodes.
    store: CoordinationStore,
    /// The cluster-init/join executable.
    tool: Arc<dyn ClusterTool>,
}

impl Node {
    /// Wire the node against the real cloud, store and kubeadm.
    pub async fn new(config: BootstrapConfig) -> Result<Self, BootstrapError> {
        let aws = Arc::new(AwsCli::new(
            config.aws_cli_path.clone(),
            config.region.clone(),
        ));
        let metadata = Arc::new(Imds::new()?);
        let blobs = store::open(
            &config.store,
            config.store_retry_policy().attempt_timeout,
        )
        .await?;
        let tool = Arc::new(Kubeadm::new(&config));
        Ok(Self::with_parts(
            config,
            metadata,
            aws.clone(),
            aws,
            blobs,
            tool,
        ))
    }

    pub fn with_parts(
        config: BootstrapConfig,
        metadata: Arc<dyn MetadataApi>,
        compute: Arc<dyn ComputeApi>,
        lb: Arc<dyn LoadBalancerApi>,
        blobs: Arc<dyn BlobStore>,
        tool: Arc<dyn ClusterTool>,
    ) -> Self {
        let store = CoordinationStore::new(blobs, &config);
        Self {
            config,
            metadata,
            compute,
            lb,
            store,
            tool,
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    async fn group(&self, identity: &LocalIdentity) -> Result<String, BootstrapError> {
        if let Some(group) = &self.config.autoscaling_group {
            return Ok(group.clone());
        }
        match self.compute.group_of(&identity.instance_id).await? {
            Some(group) => Ok(group),
            None => Err(CloudError::NoGroup(identity.instance_id.clone()).into()),
        }
    }

    /// Take one snapshot of the group and decide this node's role from it.
    pub async fn determine_role(&self) -> Result<RoleDecision, BootstrapError> {
        let identity = self.metadata.local_identity().await?;
        let group = self.group(&identity).await?;
        let registry = Registry::snapshot(self.compute.as_ref(), &group).await?;
        if !registry.contains(identity.private_ip) {
            warn!(ip = %identity.private_ip, %group, "this node is missing from the group snapshot");
        }
        let role = registry.role_of(identity.private_ip);
        info!(
            instance = %identity.instance_id,
            ip = %identity.private_ip,
            %role,
            "role decided"
        );
        Ok(RoleDecision {
            identity,
            registry,
            role,
        })
    }

    fn initializer(&self, identity: LocalIdentity) -> ClusterInitializer {
        let settings = InitializerSettings {
            init: InitSettings::from_config(&self.config, identity.private_ip),
            target_group: self.config.target_group_arn.clone(),
            health_poll_interval: self.config.health_poll_interval(),
            health_timeout: self.config.health_timeout(),
            kubeconfig_home: self.config.kubeconfig_home.clone(),
        };
        ClusterInitializer::new(
            self.store.clone(),
            self.tool.clone(),
            HealthPoller::new(self.lb.clone()),
            identity,
            settings,
        )
    }

    fn joiner(&self, identity: LocalIdentity) -> ClusterJoiner {
        let settings = JoinerSettings {
            poll_interval: self.config.wait_poll_interval(),
            timeout: self.config.wait_timeout(),
            kubeconfig_home: self.config.kubeconfig_home.clone(),
        };
        ClusterJoiner::new(self.store.clone(), self.tool.clone(), identity, settings)
    }

    /// Elect, then run the leader or follower machine to completion.
    pub async fn run_bootstrap(&self) -> Result<BootstrapReport, BootstrapError> {
        let decision = self.determine_role().await?;
        match decision.role {
            BootstrapRole::Leader => {
                let leader = self.initializer(decision.identity.clone()).run().await?;
                if leader.last() != Some(&LeaderState::JoinExisting) {
                    return Ok(BootstrapReport::Leader(leader));
                }
                let follower = self.joiner(decision.identity).run().await?;
                Ok(BootstrapReport::Rejoined { leader, follower })
            }
            BootstrapRole::Follower => {
                let states = self.joiner(decision.identity).run().await?;
                Ok(BootstrapReport::Follower(states))
            }
        }
    }

    pub fn rotation_scheduler(&self) -> RotationScheduler {
        RotationScheduler::new(self.store.clone(), self.tool.clone())
    }

    /// Rotate the published credential once. Refused until the cluster has
    /// been bootstrapped.
    pub async fn rotate_once(&self) -> Result<(), BootstrapError> {
        if !self.store.marker_exists().await? {
            return Err(BootstrapError::NotBootstrapped(
                self.config.cluster_name.clone(),
            ));
        }
        self.rotation_scheduler().rotate_once().await
    }

    /// Delete the marker and credentials of this cluster.
    pub async fn reset(&self) -> Result<(), BootstrapError> {
        self.store.clear().await?;
        Ok(())
    }

    /// Only the elected node rotates, and only once it runs a control plane
    /// that can issue credentials.
    async fn should_rotate(&self, report: &BootstrapReport) -> bool {
        if !report.elected() {
            return false;
        }
        if !self.tool.is_initialized().await {
            warn!("no local control plane after bootstrap, not rotating credentials");
            return false;
        }
        true
    }

    /// Bootstrap this node. A leader then keeps rotating the join credential
    /// on the configured interval, unless `rotate` is false.
    pub async fn run_cluster_node(&self, rotate: bool) -> Result<(), BootstrapError> {
        let report = self.run_bootstrap().await?;
        info!(?report, "bootstrap complete");
        if rotate && self.should_rotate(&report).await {
            let interval = self.config.rotation_interval();
            info!(?interval, "starting credential rotation");
            let mut trigger = IntervalTrigger::new(interval);
            let stats = self.rotation_scheduler().run(&mut trigger).await;
            info!(?stats, "credential rotation stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use crate::{
        cloud::{HealthState, MockComputeApi, MockLoadBalancerApi, MockMetadataApi},
        cluster_ops::{test_config, ClusterMember},
        kubeadm::MockClusterTool,
        store::{FetchOutcome, MemoryStore},
    };

    use super::*;

    const LEADER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
    const FOLLOWER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);
    const JOIN: &str = "kubeadm join cp.example:6443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:aa";

    fn metadata(id: &'static str, ip: Ipv4Addr) -> Arc<MockMetadataApi> {
        let mut metadata = MockMetadataApi::new();
        metadata.expect_local_identity().returning(move || {
            Ok(LocalIdentity {
                instance_id: id.to_owned(),
                private_ip: ip,
            })
        });
        Arc::new(metadata)
    }

    fn compute() -> Arc<MockComputeApi> {
        let mut compute = MockComputeApi::new();
        compute
            .expect_group_instances()
            .returning(|_| Ok(vec!["i-b".to_owned(), "i-a".to_owned()]));
        compute.expect_describe_instances().returning(|_| {
            Ok(vec![
                ClusterMember::new("i-b", FOLLOWER_IP),
                ClusterMember::new("i-a", LEADER_IP),
            ])
        });
        Arc::new(compute)
    }

    fn healthy_lb() -> Arc<MockLoadBalancerApi> {
        let mut lb = MockLoadBalancerApi::new();
        lb.expect_target_health()
            .returning(|_| Ok(vec![HealthState::Healthy]));
        Arc::new(lb)
    }

    #[tokio::test]
    async fn leader_then_follower_test() {
        let memory = MemoryStore::new();

        let mut leader_tool = MockClusterTool::new();
        leader_tool.expect_is_initialized().returning(|| false);
        leader_tool.expect_init().times(1).returning(|_| Ok(()));
        leader_tool
            .expect_issue_join_command()
            .returning(|| Ok(JOIN.to_owned()));
        leader_tool
            .expect_issue_certificate_key()
            .returning(|| Ok("c0ffee".to_owned()));
        let leader = Node::with_parts(
            test_config(),
            metadata("i-a", LEADER_IP),
            compute(),
            healthy_lb(),
            Arc::new(memory.clone()),
            Arc::new(leader_tool),
        );

        let mut follower_tool = MockClusterTool::new();
        follower_tool.expect_is_initialized().returning(|| false);
        follower_tool.expect_init().never();
        follower_tool
            .expect_join()
            .withf(|credential, ip| credential.join_command == JOIN && *ip == Some(FOLLOWER_IP))
            .times(1)
            .returning(|_, _| Ok(()));
        let follower = Node::with_parts(
            test_config(),
            metadata("i-b", FOLLOWER_IP),
            compute(),
            Arc::new(MockLoadBalancerApi::new()),
            Arc::new(memory.clone()),
            Arc::new(follower_tool),
        );

        assert_eq!(
            leader.determine_role().await.unwrap().role,
            BootstrapRole::Leader
        );
        assert_eq!(
            follower.determine_role().await.unwrap().role,
            BootstrapRole::Follower
        );

        let report = leader.run_bootstrap().await.unwrap();
        assert!(matches!(report, BootstrapReport::Leader(ref s) if s.last() == Some(&LeaderState::Done)));
        let report = follower.run_bootstrap().await.unwrap();
        assert_eq!(
            report,
            BootstrapReport::Follower(vec![
                FollowerState::Wait,
                FollowerState::Fetch,
                FollowerState::Join,
                FollowerState::Done
            ])
        );
    }

    #[tokio::test]
    async fn late_lowest_node_joins_existing_cluster_test() {
        const LATE_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);
        let memory = MemoryStore::new();
        let store = CoordinationStore::new(Arc::new(memory.clone()), &test_config());
        store
            .publish(
                &crate::credential::JoinCredential::new(JOIN, "c0ffee"),
                &crate::credential::BootstrapMarker::new("i-a", LEADER_IP),
            )
            .await
            .unwrap();

        let mut compute = MockComputeApi::new();
        compute
            .expect_group_instances()
            .returning(|_| Ok(vec!["i-a".to_owned(), "i-late".to_owned()]));
        compute.expect_describe_instances().returning(|_| {
            Ok(vec![
                ClusterMember::new("i-a", LEADER_IP),
                ClusterMember::new("i-late", LATE_IP),
            ])
        });

        let initialized = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = initialized.clone();
        let mut tool = MockClusterTool::new();
        tool.expect_is_initialized()
            .returning(move || flag.load(std::sync::atomic::Ordering::SeqCst));
        tool.expect_init().never();
        tool.expect_issue_join_command().never();
        let flag = initialized.clone();
        tool.expect_join()
            .withf(|credential, ip| credential.join_command == JOIN && *ip == Some(LATE_IP))
            .times(1)
            .returning(move |_, _| {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            });

        let node = Node::with_parts(
            test_config(),
            metadata("i-late", LATE_IP),
            Arc::new(compute),
            Arc::new(MockLoadBalancerApi::new()),
            Arc::new(memory.clone()),
            Arc::new(tool),
        );
        assert_eq!(
            node.determine_role().await.unwrap().role,
            BootstrapRole::Leader
        );

        let report = node.run_bootstrap().await.unwrap();
        assert_eq!(
            report,
            BootstrapReport::Rejoined {
                leader: vec![LeaderState::CheckExisting, LeaderState::JoinExisting],
                follower: vec![
                    FollowerState::Wait,
                    FollowerState::Fetch,
                    FollowerState::Join,
                    FollowerState::Done
                ],
            }
        );
        // Joined now, so this node may rotate from here on.
        assert!(node.should_rotate(&report).await);
        assert_eq!(
            store.read_marker().await.unwrap().unwrap().leader_ip,
            LEADER_IP
        );
    }

    #[tokio::test]
    async fn no_rotation_without_local_control_plane_test() {
        let mut tool = MockClusterTool::new();
        tool.expect_is_initialized().returning(|| false);
        let node = Node::with_parts(
            test_config(),
            metadata("i-a", LEADER_IP),
            compute(),
            healthy_lb(),
            Arc::new(MemoryStore::new()),
            Arc::new(tool),
        );
        let done = vec![LeaderState::CheckExisting, LeaderState::Done];
        assert!(!node.should_rotate(&BootstrapReport::Leader(done)).await);
        assert!(
            !node
                .should_rotate(&BootstrapReport::Follower(vec![FollowerState::Done]))
                .await
        );
    }

    #[tokio::test]
    async fn group_looked_up_when_not_configured_test() {
        let mut config = test_config();
        config.autoscaling_group = None;

        let mut compute = MockComputeApi::new();
        compute
            .expect_group_of()
            .withf(|id| id == "i-a")
            .returning(|_| Ok(Some("discovered-asg".to_owned())));
        compute
            .expect_group_instances()
            .withf(|group| group == "discovered-asg")
            .returning(|_| Ok(vec!["i-a".to_owned()]));
        compute
            .expect_describe_instances()
            .returning(|_| Ok(vec![ClusterMember::new("i-a", LEADER_IP)]));

        let node = Node::with_parts(
            config,
            metadata("i-a", LEADER_IP),
            Arc::new(compute),
            Arc::new(MockLoadBalancerApi::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MockClusterTool::new()),
        );
        let decision = node.determine_role().await.unwrap();
        assert_eq!(decision.registry.group(), "discovered-asg");
        assert_eq!(decision.role, BootstrapRole::Leader);
    }

    #[tokio::test]
    async fn instance_outside_any_group_test() {
        let mut config = test_config();
        config.autoscaling_group = None;
        let mut compute = MockComputeApi::new();
        compute.expect_group_of().returning(|_| Ok(None));

        let node = Node::with_parts(
            config,
            metadata("i-a", LEADER_IP),
            Arc::new(compute),
            Arc::new(MockLoadBalancerApi::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MockClusterTool::new()),
        );
        assert!(matches!(
            node.determine_role().await,
            Err(BootstrapError::Cloud(CloudError::NoGroup(_)))
        ));
    }

    #[tokio::test]
    async fn rotate_and_reset_test() {
        let memory = MemoryStore::new();
        let mut tool = MockClusterTool::new();
        tool.expect_issue_join_command()
            .returning(|| Ok(JOIN.to_owned()));
        tool.expect_issue_certificate_key()
            .returning(|| Ok("beef".to_owned()));
        let node = Node::with_parts(
            test_config(),
            metadata("i-a", LEADER_IP),
            compute(),
            healthy_lb(),
            Arc::new(memory.clone()),
            Arc::new(tool),
        );

        // Nothing published yet.
        assert!(matches!(
            node.rotate_once().await,
            Err(BootstrapError::NotBootstrapped(ref name)) if name == &node.config().cluster_name
        ));
        assert!(memory.is_empty());

        let store = CoordinationStore::new(Arc::new(memory.clone()), node.config());
        store
            .publish(
                &crate::credential::JoinCredential::new(JOIN, "old"),
                &crate::credential::BootstrapMarker::new("i-a", LEADER_IP),
            )
            .await
            .unwrap();
        node.rotate_once().await.unwrap();
        assert_eq!(
            store.fetch_credential().await.unwrap(),
            FetchOutcome::Complete(crate::credential::JoinCredential::new(JOIN, "beef"))
        );

        node.reset().await.unwrap();
        assert!(memory.is_empty());
    }
}
