use async_trait::async_trait;
use futures_util::TryStreamExt;
use opendal::{services::S3, ErrorKind, Operator};
use tracing::debug;

use super::{check_key, is_prefix, BlobStore, StoreError};

/// S3 bucket backend. Credentials come from the usual AWS sources
/// (environment, profile, instance role).
#[derive(Clone)]
pub struct S3Store {
    op: Operator,
}

impl S3Store {
    pub fn new(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        root: &str,
    ) -> Result<Self, StoreError> {
        let mut s3_builder = S3::default();
        s3_builder.root(root);
        s3_builder.bucket(bucket);
        if let Some(region) = region {
            s3_builder.region(region);
        }
        if let Some(endpoint) = endpoint {
            s3_builder.endpoint(endpoint);
        }
        let op = Operator::new(s3_builder)?.finish();
        debug!(bucket, root, "opened s3 coordination store");
        Ok(Self { op })
    }

    /// Wrap an already configured operator, any opendal service works.
    pub fn from_operator(op: Operator) -> Self {
        Self { op }
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        check_key(key)?;
        self.op.write(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_key(key)?;
        match self.op.read(key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, prefix: &str) -> Result<bool, StoreError> {
        check_key(prefix)?;
        if is_prefix(prefix) {
            Ok(!self.list(prefix).await?.is_empty())
        } else {
            Ok(self.op.is_exist(prefix).await?)
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        check_key(prefix)?;
        if !is_prefix(prefix) {
            return Err(StoreError::InvalidKey {
                key: prefix.to_owned(),
                reason: "listing needs a prefix ending in '/'".to_owned(),
            });
        }
        let mut lister = self.op.list(prefix).await?;
        let mut keys = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            let path = entry.path();
            if !is_prefix(path) {
                keys.push(path.to_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        check_key(key)?;
        self.op.delete(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use opendal::services::Memory;

    use super::*;

    fn memory_backed() -> S3Store {
        let builder = Memory::default();
        S3Store::from_operator(Operator::new(builder).unwrap().finish())
    }

    #[tokio::test]
    async fn operator_round_trip_test() {
        let store = memory_backed();
        assert_eq!(store.get("b/masters/cert_key").await.unwrap(), None);
        store
            .put("b/masters/cert_key", b"0123abcd".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.get("b/masters/cert_key").await.unwrap(),
            Some(b"0123abcd".to_vec())
        );
        assert!(store.exists("b/masters/cert_key").await.unwrap());
        assert!(!store.exists("b/masters/marker").await.unwrap());
    }

    #[tokio::test]
    async fn operator_list_requires_prefix_test() {
        let store = memory_backed();
        assert!(matches!(
            store.list("b/masters").await,
            Err(StoreError::InvalidKey { .. })
        ));
    }
}
