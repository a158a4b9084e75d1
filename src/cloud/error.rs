use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} exited with {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Invalid response from {api}: {reason}")]
    InvalidResponse { api: String, reason: String },
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Metadata(#[from] reqwest::Error),
    #[error("instance {0} is not a member of any autoscaling group")]
    NoGroup(String),
}
