use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::storage::artifacts::{DynArtifactStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::classifier::ModelArtifact;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Artifact serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No versions published for model '{0}'")]
    NoVersions(String),

    #[error("Model '{name}' has no version {version}")]
    NoSuchVersion { name: String, version: u32 },

    #[error("No model promoted to production for '{0}'")]
    NothingPromoted(String),
}

/// Pointer object at `models/{name}/production.json`; the serving layer loads
/// whatever it points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionPointer {
    pub name: String,
    pub version: u32,
    pub key: String,
    pub promoted_at: DateTime<Utc>,
}

fn version_key(name: &str, version: u32) -> String {
    format!("models/{name}/v{version:04}.json")
}

fn production_key(name: &str) -> String {
    format!("models/{name}/production.json")
}

/// Versioned model storage on the artifact store: immutable version objects
/// plus one mutable production pointer per model name.
pub struct ModelRegistry {
    store: DynArtifactStore,
}

impl ModelRegistry {
    pub fn new(store: DynArtifactStore) -> Self {
        Self { store }
    }

    /// Store an artifact under the next free version number.
    pub async fn publish(&self, mut artifact: ModelArtifact) -> Result<ModelArtifact, RegistryError> {
        let version = match self.latest_version(&artifact.name).await? {
            Some(latest) => latest + 1,
            None => 1,
        };
        artifact.version = version;

        let key = version_key(&artifact.name, version);
        let body = serde_json::to_vec(&artifact)?;
        self.store
            .put(&key, Bytes::from(body), mime::APPLICATION_JSON.essence_str())
            .await?;

        info!(model = %artifact.name, version, key = %key, "Published model version");
        Ok(artifact)
    }

    pub async fn latest_version(&self, name: &str) -> Result<Option<u32>, RegistryError> {
        let keys = self.store.list(&format!("models/{name}/")).await?;
        let latest = keys
            .iter()
            .filter_map(|key| {
                key.rsplit('/')
                    .next()?
                    .strip_prefix('v')?
                    .strip_suffix(".json")?
                    .parse::<u32>()
                    .ok()
            })
            .max();
        Ok(latest)
    }

    /// Point production at a version, defaulting to the latest published one.
    pub async fn promote(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> Result<ProductionPointer, RegistryError> {
        let version = match version {
            Some(requested) => {
                if !self.store.exists(&version_key(name, requested)).await? {
                    return Err(RegistryError::NoSuchVersion {
                        name: name.to_string(),
                        version: requested,
                    });
                }
                requested
            }
            None => self
                .latest_version(name)
                .await?
                .ok_or_else(|| RegistryError::NoVersions(name.to_string()))?,
        };

        let pointer = ProductionPointer {
            name: name.to_string(),
            version,
            key: version_key(name, version),
            promoted_at: Utc::now(),
        };
        let body = serde_json::to_vec(&pointer)?;
        self.store
            .put(
                &production_key(name),
                Bytes::from(body),
                mime::APPLICATION_JSON.essence_str(),
            )
            .await?;

        info!(model = %name, version, "Promoted model to production");
        Ok(pointer)
    }

    /// Load the artifact the production pointer names.
    pub async fn load_production(&self, name: &str) -> Result<ModelArtifact, RegistryError> {
        let pointer_bytes = match self.store.get(&production_key(name)).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                return Err(RegistryError::NothingPromoted(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        let pointer: ProductionPointer = serde_json::from_slice(&pointer_bytes)?;

        let artifact_bytes = self.store.get(&pointer.key).await?;
        Ok(serde_json::from_slice(&artifact_bytes)?)
    }
}
