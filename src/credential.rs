use std::{
    fmt,
    net::Ipv4Addr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a new control plane node needs to join the cluster.
/// Both fields are opaque text issued by the cluster tool and stored verbatim.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinCredential {
    pub join_command: String,
    pub certificate_key: String,
}

impl JoinCredential {
    pub fn new(join_command: impl Into<String>, certificate_key: impl Into<String>) -> Self {
        Self {
            join_command: join_command.into(),
            certificate_key: certificate_key.into(),
        }
    }

    /// Both halves are present and non-blank.
    pub fn is_complete(&self) -> bool {
        !self.join_command.trim().is_empty() && !self.certificate_key.trim().is_empty()
    }
}

// The join command embeds a bootstrap token and the key decrypts the
// uploaded control plane certificates, neither belongs in logs.
impl fmt::Debug for JoinCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinCredential")
            .field("join_command_len", &self.join_command.len())
            .field("certificate_key_len", &self.certificate_key.len())
            .finish()
    }
}

/// Body of the coordination marker. Only the marker's presence matters to
/// followers, the fields are there for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapMarker {
    pub cycle_id: Uuid,
    pub leader_instance: String,
    pub leader_ip: Ipv4Addr,
    /// Seconds since the unix epoch.
    pub published_at: u64,
}

impl BootstrapMarker {
    pub fn new(leader_instance: impl Into<String>, leader_ip: Ipv4Addr) -> Self {
        let published_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            cycle_id: Uuid::new_v4(),
            leader_instance: leader_instance.into(),
            leader_ip,
            published_at,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn credential_completeness_test() {
        assert!(JoinCredential::new("kubeadm join lb:6443 --token t", "abc").is_complete());
        assert!(!JoinCredential::new("kubeadm join lb:6443", "  ").is_complete());
        assert!(!JoinCredential::new("", "abc").is_complete());
    }

    #[test]
    fn credential_debug_hides_secrets_test() {
        let cred = JoinCredential::new("kubeadm join lb:6443 --token abcdef.0123456789abcdef", "s3cr3t");
        let debug = format!("{cred:?}");
        assert!(!debug.contains("abcdef"));
        assert!(!debug.contains("s3cr3t"));
    }

    #[test]
    fn marker_json_test() {
        let marker = BootstrapMarker::new("i-0abc", Ipv4Addr::new(10, 0, 0, 5));
        let json = serde_json::to_vec(&marker).unwrap();
        let back: BootstrapMarker = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, marker);
        assert!(marker.published_at > 0);
    }
}
