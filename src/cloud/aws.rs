use std::{net::Ipv4Addr, str::FromStr};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::cluster_ops::ClusterMember;

use super::{CloudError, ComputeApi, HealthState, LoadBalancerApi};

/// Compute and load balancer APIs through the AWS command line client.
/// Credentials and retries are left to the client itself.
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    region: Option<String>,
}

impl AwsCli {
    pub fn new(program: impl Into<String>, region: Option<String>) -> Self {
        Self {
            program: program.into(),
            region,
        }
    }

    async fn call(&self, args: &[&str]) -> Result<Vec<u8>, CloudError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).args(["--output", "json"]);
        if let Some(region) = &self.region {
            cmd.args(["--region", region.as_str()]);
        }
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(%command, "calling cloud api");

        let output = cmd.output().await.map_err(|source| CloudError::Spawn {
            command: command.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(CloudError::Command {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(output.stdout)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupsResponse {
    auto_scaling_groups: Vec<Group>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Group {
    #[serde(default)]
    instances: Vec<GroupInstance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupInstance {
    instance_id: String,
    lifecycle_state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstancesResponse {
    reservations: Vec<Reservation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    instances: Vec<Instance>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_id: String,
    #[serde(default)]
    private_ip_address: Option<String>,
    state: InstanceState,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceState {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupInstancesResponse {
    auto_scaling_instances: Vec<GroupMembership>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupMembership {
    auto_scaling_group_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetHealthResponse {
    target_health_descriptions: Vec<TargetHealthDescription>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetHealthDescription {
    target_health: TargetHealth,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetHealth {
    state: String,
}

/// Instances on their way out of the group would never finish a bootstrap.
fn leaving_group(lifecycle_state: &str) -> bool {
    lifecycle_state.starts_with("Terminat") || lifecycle_state.starts_with("Detach")
}

fn parse_group_instances(body: &[u8], group: &str) -> Result<Vec<String>, CloudError> {
    let resp: GroupsResponse = serde_json::from_slice(body)?;
    let group_desc = resp
        .auto_scaling_groups
        .into_iter()
        .next()
        .ok_or_else(|| CloudError::InvalidResponse {
            api: "autoscaling describe-auto-scaling-groups".to_owned(),
            reason: format!("group {group} not found"),
        })?;
    Ok(group_desc
        .instances
        .into_iter()
        .filter(|i| !leaving_group(&i.lifecycle_state))
        .map(|i| i.instance_id)
        .collect())
}

fn parse_instances(body: &[u8]) -> Result<Vec<ClusterMember>, CloudError> {
    let resp: InstancesResponse = serde_json::from_slice(body)?;
    let mut members = Vec::new();
    for instance in resp.reservations.into_iter().flat_map(|r| r.instances) {
        if !matches!(instance.state.name.as_str(), "pending" | "running") {
            debug!(instance = %instance.instance_id, state = %instance.state.name, "skipping instance");
            continue;
        }
        let Some(ip) = instance.private_ip_address else {
            warn!(instance = %instance.instance_id, "instance has no private address yet");
            continue;
        };
        let private_ip = Ipv4Addr::from_str(&ip).map_err(|e| CloudError::InvalidResponse {
            api: "ec2 describe-instances".to_owned(),
            reason: format!("{}: {ip}: {e}", instance.instance_id),
        })?;
        members.push(ClusterMember::new(instance.instance_id, private_ip));
    }
    Ok(members)
}

fn parse_group_of(body: &[u8]) -> Result<Option<String>, CloudError> {
    let resp: GroupInstancesResponse = serde_json::from_slice(body)?;
    Ok(resp
        .auto_scaling_instances
        .into_iter()
        .next()
        .map(|m| m.auto_scaling_group_name))
}

fn parse_target_health(body: &[u8]) -> Result<Vec<HealthState>, CloudError> {
    let resp: TargetHealthResponse = serde_json::from_slice(body)?;
    Ok(resp
        .target_health_descriptions
        .iter()
        .map(|d| HealthState::from_elb(&d.target_health.state))
        .collect())
}

#[async_trait]
impl ComputeApi for AwsCli {
    async fn group_instances(&self, group: &str) -> Result<Vec<String>, CloudError> {
        let body = self
            .call(&[
                "autoscaling",
                "describe-auto-scaling-groups",
                "--auto-scaling-group-names",
                group,
            ])
            .await?;
        parse_group_instances(&body, group)
    }

    async fn describe_instances(&self, ids: &[String]) -> Result<Vec<ClusterMember>, CloudError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["ec2", "describe-instances", "--instance-ids"];
        args.extend(ids.iter().map(String::as_str));
        let body = self.call(&args).await?;
        parse_instances(&body)
    }

    async fn group_of(&self, instance_id: &str) -> Result<Option<String>, CloudError> {
        let body = self
            .call(&[
                "autoscaling",
                "describe-auto-scaling-instances",
                "--instance-ids",
                instance_id,
            ])
            .await?;
        parse_group_of(&body)
    }
}

#[async_trait]
impl LoadBalancerApi for AwsCli {
    async fn target_health(&self, target_group: &str) -> Result<Vec<HealthState>, CloudError> {
        let body = self
            .call(&[
                "elbv2",
                "describe-target-health",
                "--target-group-arn",
                target_group,
            ])
            .await?;
        parse_target_health(&body)
    }
}
