use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};
use thiserror::Error;
use tracing::info;

use crate::utils::config::{AppConfig, StorageKind};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("No object at key: {0}")]
    NotFound(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error occurred: {0}")]
    Io(#[from] std::io::Error),
}

/// Bucket-scoped blob storage for mirrored images and model artifacts.
///
/// The production backend speaks the S3 protocol (MinIO in the dev stack);
/// local-filesystem and in-memory backends exist for development and tests.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Check that the bucket exists and create it when the backend reports
    /// "not found". Any other probe error is fatal for the run.
    async fn ensure_bucket(&self) -> Result<(), StoreError>;

    /// Whether an object already exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Keys below `prefix`, in storage order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Externally addressable URL for an object: `{endpoint}/{bucket}/{key}`.
    fn object_url(&self, key: &str) -> String;
}

pub type DynArtifactStore = Arc<dyn ArtifactStore>;

/// Build the artifact store selected by configuration. Invalid credentials or
/// an unusable base directory surface here, before any pipeline work starts.
pub async fn create_artifact_store(cfg: &AppConfig) -> Result<DynArtifactStore, StoreError> {
    match cfg.storage {
        StorageKind::Memory => Ok(Arc::new(ObjectStoreBucket::memory(
            &cfg.s3_endpoint,
            &cfg.s3_bucket,
        ))),
        StorageKind::Local => {
            let bucket_root = resolve_base_dir(&cfg.data_dir).join(&cfg.s3_bucket);
            let store = ObjectStoreBucket::local(&cfg.s3_endpoint, &cfg.s3_bucket, bucket_root)
                .await?;
            Ok(Arc::new(store))
        }
        StorageKind::S3 => Ok(Arc::new(S3Bucket::new(cfg)?)),
    }
}

/// Resolve the local storage base directory; relative paths are taken from
/// the current working directory.
fn resolve_base_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with('/') {
        PathBuf::from(data_dir)
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(data_dir)
    }
}

/// `object_store`-backed bucket used by the memory and local backends.
pub struct ObjectStoreBucket {
    store: Arc<dyn ObjectStore>,
    endpoint: String,
    bucket: String,
}

impl ObjectStoreBucket {
    pub fn memory(endpoint: &str, bucket: &str) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
        }
    }

    pub async fn local(
        endpoint: &str,
        bucket: &str,
        bucket_root: PathBuf,
    ) -> Result<Self, StoreError> {
        if !bucket_root.exists() {
            tokio::fs::create_dir_all(&bucket_root).await?;
            info!(path = %bucket_root.display(), "Created local bucket directory");
        }
        let store = LocalFileSystem::new_with_prefix(bucket_root)?;

        Ok(Self {
            store: Arc::new(store),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl ArtifactStore for ObjectStoreBucket {
    async fn ensure_bucket(&self) -> Result<(), StoreError> {
        // Both backends provision their bucket at construction; the memory
        // bucket always exists and the local directory was created above.
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = ObjPath::from(key);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e.into()),
            })
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<(), StoreError> {
        let path = ObjPath::from(key);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = ObjPath::from(key);
        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StoreError::NotFound(key.to_string()),
            other => other.into(),
        })?;
        Ok(result.bytes().await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let prefix_path = ObjPath::from(prefix);
        let locations: Vec<ObjPath> = self
            .store
            .list(Some(&prefix_path))
            .map_ok(|meta| meta.location)
            .boxed()
            .try_collect()
            .await?;
        Ok(locations
            .into_iter()
            .map(|location| location.to_string())
            .collect())
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

/// S3-compatible bucket (MinIO in the dev stack), addressed by endpoint URL,
/// access key, secret key and region.
pub struct S3Bucket {
    client: aws_sdk_s3::Client,
    endpoint: String,
    bucket: String,
}

impl S3Bucket {
    /// Build the client from explicit configuration. Path-style addressing is
    /// required for MinIO-style endpoints.
    pub fn new(cfg: &AppConfig) -> Result<Self, StoreError> {
        if cfg.s3_access_key_id.is_empty() || cfg.s3_secret_access_key.is_empty() {
            return Err(StoreError::InvalidConfig(
                "s3_access_key_id and s3_secret_access_key must be set for the s3 backend".into(),
            ));
        }

        let credentials = Credentials::new(
            cfg.s3_access_key_id.clone(),
            cfg.s3_secret_access_key.clone(),
            None,
            None,
            "app-config",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(cfg.s3_region.clone()))
            .endpoint_url(&cfg.s3_endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            endpoint: cfg.s3_endpoint.trim_end_matches('/').to_string(),
            bucket: cfg.s3_bucket.clone(),
        })
    }
}

#[async_trait]
impl ArtifactStore for S3Bucket {
    async fn ensure_bucket(&self) -> Result<(), StoreError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let service_err = err.into_service_error();
                if !service_err.is_not_found() {
                    return Err(StoreError::S3(format!(
                        "head_bucket {}: {service_err}",
                        self.bucket
                    )));
                }
                info!(bucket = %self.bucket, "Bucket missing, creating it");
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map_err(|e| {
                        StoreError::S3(format!("create_bucket {}: {e}", self.bucket))
                    })?;
                Ok(())
            }
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StoreError::S3(format!("head_object {key}: {service_err}")))
                }
            }
        }
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("put_object {key}: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    return Err(StoreError::NotFound(key.to_string()));
                }
                return Err(StoreError::S3(format!("get_object {key}: {service_err}")));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::S3(format!("read body of {key}: {e}")))?;
        Ok(data.into_bytes())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| StoreError::S3(format!("list_objects {prefix}: {e}")))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
        }

        Ok(keys)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

/// Testing helpers: in-memory bucket with the fixture endpoint.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;

    pub fn memory_store(endpoint: &str, bucket: &str) -> DynArtifactStore {
        Arc::new(ObjectStoreBucket::memory(endpoint, bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_bucket_put_exists_get() {
        let store = ObjectStoreBucket::memory("http://localhost:9000", "images");
        store.ensure_bucket().await.expect("ensure bucket");

        assert!(!store.exists("grass/00000001.jpg").await.expect("exists"));
        store
            .put(
                "grass/00000001.jpg",
                Bytes::from_static(b"jpeg bytes"),
                "image/jpeg",
            )
            .await
            .expect("put");
        assert!(store.exists("grass/00000001.jpg").await.expect("exists"));

        let data = store.get("grass/00000001.jpg").await.expect("get");
        assert_eq!(data.as_ref(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_memory_bucket_object_url_shape() {
        let store = ObjectStoreBucket::memory("http://localhost:9000/", "images");
        assert_eq!(
            store.object_url("grass/00000005.jpg"),
            "http://localhost:9000/images/grass/00000005.jpg"
        );
    }

    #[tokio::test]
    async fn test_memory_bucket_list_by_prefix() {
        let store = ObjectStoreBucket::memory("http://localhost:9000", "images");
        for key in [
            "grass/00000001.jpg",
            "grass/00000002.jpg",
            "dandelion/00000001.jpg",
        ] {
            store
                .put(key, Bytes::from_static(b"x"), "image/jpeg")
                .await
                .expect("put");
        }

        let grass = store.list("grass").await.expect("list");
        assert_eq!(grass.len(), 2);
        assert!(grass.iter().all(|key| key.starts_with("grass/")));
    }

    #[tokio::test]
    async fn test_memory_bucket_get_missing_is_not_found() {
        let store = ObjectStoreBucket::memory("http://localhost:9000", "images");
        let result = store.get("nope/missing.jpg").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_bucket_roundtrip() {
        let base = std::env::temp_dir().join(format!("mirror_store_test_{}", Uuid::new_v4()));
        let store = ObjectStoreBucket::local("http://localhost:9000", "images", base.clone())
            .await
            .expect("local store");

        store
            .put("grass/00000001.jpg", Bytes::from_static(b"data"), "image/jpeg")
            .await
            .expect("put");
        assert!(store.exists("grass/00000001.jpg").await.expect("exists"));
        assert!(base.join("grass/00000001.jpg").exists());

        let _ = tokio::fs::remove_dir_all(&base).await;
    }

    #[tokio::test]
    async fn test_s3_backend_requires_credentials() {
        let mut cfg = AppConfig::for_tests();
        cfg.storage = StorageKind::S3;
        cfg.s3_access_key_id = String::new();
        let result = S3Bucket::new(&cfg);
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }
}
