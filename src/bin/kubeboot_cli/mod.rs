use anyhow::anyhow;
use clap::Args;
use kubeboot::{BootstrapConfig, BootstrapError, BootstrapRole, Node};
use tracing::{error, info, warn};

/// Values that take precedence over the configuration file.
#[derive(Args, Debug, Default)]
pub(crate) struct Overrides {
    #[arg(long, env = "KUBEBOOT_CLUSTER_NAME")]
    pub(crate) cluster_name: Option<String>,
    #[arg(long, env = "KUBEBOOT_AUTOSCALING_GROUP")]
    pub(crate) autoscaling_group: Option<String>,
    #[arg(long, env = "KUBEBOOT_TARGET_GROUP_ARN")]
    pub(crate) target_group_arn: Option<String>,
}

impl Overrides {
    pub(crate) fn apply(&self, config: &mut BootstrapConfig) {
        if let Some(name) = &self.cluster_name {
            config.cluster_name = name.clone();
        }
        if let Some(group) = &self.autoscaling_group {
            config.autoscaling_group = Some(group.clone());
        }
        if let Some(arn) = &self.target_group_arn {
            config.target_group_arn = arn.clone();
        }
    }
}

pub(crate) async fn run(node: &Node, rotate: bool) -> anyhow::Result<()> {
    node.run_cluster_node(rotate).await?;
    Ok(())
}

pub(crate) async fn print_role(node: &Node) -> anyhow::Result<()> {
    let decision = node.determine_role().await?;
    println!(
        "{} {} {}",
        decision.role, decision.identity.instance_id, decision.identity.private_ip
    );
    for member in decision.registry.members() {
        let marker = match decision.registry.role_of(member.private_ip) {
            BootstrapRole::Leader => "*",
            BootstrapRole::Follower => " ",
        };
        println!("{marker} {member}");
    }
    Ok(())
}

/// A failed rotation is logged and the next external trigger tries again.
pub(crate) async fn rotate(node: &Node) -> anyhow::Result<()> {
    match node.rotate_once().await {
        Ok(()) => info!("join credential rotated"),
        Err(e @ BootstrapError::NotBootstrapped(_)) => warn!(error = %e, "nothing to rotate"),
        Err(e) => error!(error = %e, "credential rotation failed"),
    }
    Ok(())
}

pub(crate) async fn reset(node: &Node, confirmed: bool) -> anyhow::Result<()> {
    if !confirmed {
        return Err(anyhow!(
            "refusing to reset cluster {} without --yes",
            node.config().cluster_name
        ));
    }
    warn!(cluster = %node.config().cluster_name, "resetting bootstrap state");
    node.reset().await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overrides_apply_test() {
        let mut config = BootstrapConfig::from_yaml(
            "cluster_name: from-file\ntarget_group_arn: arn:file\nload_balancer_dns: cp.example\nstore:\n  type: memory\n",
        )
        .unwrap();
        Overrides::default().apply(&mut config);
        assert_eq!(config.cluster_name, "from-file");

        let overrides = Overrides {
            cluster_name: Some("from-cli".to_owned()),
            autoscaling_group: Some("asg-cli".to_owned()),
            target_group_arn: None,
        };
        overrides.apply(&mut config);
        assert_eq!(config.cluster_name, "from-cli");
        assert_eq!(config.autoscaling_group.as_deref(), Some("asg-cli"));
        assert_eq!(config.target_group_arn, "arn:file");
    }
}
