use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("unexpected output from {command}: {reason}")]
    InvalidOutput { command: String, reason: String },
    #[error("Invalid join command: {0}")]
    InvalidJoinCommand(String),
    #[error("failed to render kubeadm configuration: {0}")]
    Render(#[from] serde_yaml::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
