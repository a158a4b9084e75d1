use std::{net::Ipv4Addr, str::FromStr, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{CloudError, LocalIdentity, MetadataApi};

const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const TOKEN_TTL_SECS: u32 = 300;

/// EC2 instance metadata service, session-token (v2) flavour.
#[derive(Clone)]
pub struct Imds {
    client: Client,
    endpoint: String,
}

impl Imds {
    pub fn new() -> Result<Self, CloudError> {
        Self::with_endpoint(IMDS_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, CloudError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn token(&self) -> Result<String, CloudError> {
        let token = self
            .client
            .put(format!("{}/latest/api/token", self.endpoint))
            .header(
                "X-aws-ec2-metadata-token-ttl-seconds",
                TOKEN_TTL_SECS.to_string(),
            )
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(token)
    }

    async fn meta_data(&self, token: &str, path: &str) -> Result<String, CloudError> {
        let value = self
            .client
            .get(format!("{}/latest/meta-data/{}", self.endpoint, path))
            .header("X-aws-ec2-metadata-token", token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!(path, value = %value, "instance metadata");
        Ok(value.trim().to_owned())
    }
}

#[async_trait]
impl MetadataApi for Imds {
    async fn local_identity(&self) -> Result<LocalIdentity, CloudError> {
        let token = self.token().await?;
        let instance_id = self.meta_data(&token, "instance-id").await?;
        let ip = self.meta_data(&token, "local-ipv4").await?;
        let private_ip = Ipv4Addr::from_str(&ip).map_err(|e| CloudError::InvalidResponse {
            api: "instance metadata local-ipv4".to_owned(),
            reason: format!("{ip}: {e}"),
        })?;
        if instance_id.is_empty() {
            return Err(CloudError::InvalidResponse {
                api: "instance metadata instance-id".to_owned(),
                reason: "empty instance id".to_owned(),
            });
        }
        Ok(LocalIdentity {
            instance_id,
            private_ip,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn unreachable_metadata_test() {
        // Nothing listens on the discard port.
        let imds = Imds::with_endpoint("http://127.0.0.1:9").unwrap();
        assert!(matches!(
            imds.local_identity().await,
            Err(CloudError::Metadata(_))
        ));
    }
}
