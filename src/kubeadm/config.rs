use std::net::Ipv4Addr;

use serde::Serialize;

use crate::cluster_ops::BootstrapConfig;

use super::ToolError;

const KUBEADM_API_VERSION: &str = "kubeadm.k8s.io/v1beta3";

/// Everything `kubeadm init` needs to know about the cluster being created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSettings {
    pub cluster_name: String,
    pub load_balancer_dns: String,
    pub api_server_port: u16,
    pub advertise_address: Ipv4Addr,
    pub kubernetes_version: Option<String>,
    pub pod_subnet: Option<String>,
    pub service_subnet: Option<String>,
}

impl InitSettings {
    pub fn from_config(config: &BootstrapConfig, advertise_address: Ipv4Addr) -> Self {
        Self {
            cluster_name: config.cluster_name.clone(),
            load_balancer_dns: config.load_balancer_dns.clone(),
            api_server_port: config.api_server_port,
            advertise_address,
            kubernetes_version: config.kubernetes_version.clone(),
            pod_subnet: config.pod_subnet.clone(),
            service_subnet: config.service_subnet.clone(),
        }
    }

    pub fn control_plane_endpoint(&self) -> String {
        format!("{}:{}", self.load_balancer_dns, self.api_server_port)
    }

    /// The two-document kubeadm configuration file.
    pub fn render(&self) -> Result<String, ToolError> {
        let init = InitConfiguration {
            api_version: KUBEADM_API_VERSION,
            kind: "InitConfiguration",
            local_api_endpoint: ApiEndpoint {
                advertise_address: self.advertise_address.to_string(),
                bind_port: self.api_server_port,
            },
        };
        let cluster = ClusterConfiguration {
            api_version: KUBEADM_API_VERSION,
            kind: "ClusterConfiguration",
            cluster_name: &self.cluster_name,
            kubernetes_version: self.kubernetes_version.as_deref(),
            control_plane_endpoint: self.control_plane_endpoint(),
            api_server: ApiServer {
                cert_sans: vec![&self.load_balancer_dns],
            },
            networking: Networking {
                pod_subnet: self.pod_subnet.as_deref(),
                service_subnet: self.service_subnet.as_deref(),
            },
        };
        Ok(format!(
            "{}---\n{}",
            serde_yaml::to_string(&init)?,
            serde_yaml::to_string(&cluster)?
        ))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitConfiguration {
    api_version: &'static str,
    kind: &'static str,
    #[serde(rename = "localAPIEndpoint")]
    local_api_endpoint: ApiEndpoint,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiEndpoint {
    advertise_address: String,
    bind_port: u16,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterConfiguration<'a> {
    api_version: &'static str,
    kind: &'static str,
    cluster_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kubernetes_version: Option<&'a str>,
    control_plane_endpoint: String,
    api_server: ApiServer<'a>,
    networking: Networking<'a>,
}

#[derive(Serialize)]
struct ApiServer<'a> {
    #[serde(rename = "certSANs")]
    cert_sans: Vec<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Networking<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pod_subnet: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_subnet: Option<&'a str>,
}
