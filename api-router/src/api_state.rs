use std::sync::Arc;

use common::{storage::artifacts::DynArtifactStore, utils::config::AppConfig};
use training_pipeline::{CentroidClassifier, ModelRegistry};
use tracing::info;

#[derive(Clone)]
pub struct ApiState {
    pub classifier: Arc<CentroidClassifier>,
    pub config: AppConfig,
}

impl ApiState {
    /// Load the promoted model from the registry. Serving without a promoted
    /// model is a configuration error, so startup fails fast here.
    pub async fn from_registry(
        config: &AppConfig,
        store: DynArtifactStore,
    ) -> anyhow::Result<Self> {
        let registry = ModelRegistry::new(store);
        let artifact = registry.load_production(&config.model_name).await?;
        info!(
            model = %artifact.name,
            version = artifact.version,
            "Loaded production model"
        );

        let classifier = Arc::new(CentroidClassifier::new(artifact)?);

        Ok(Self {
            classifier,
            config: config.clone(),
        })
    }

    pub fn with_classifier(config: &AppConfig, classifier: CentroidClassifier) -> Self {
        Self {
            classifier: Arc::new(classifier),
            config: config.clone(),
        }
    }
}
