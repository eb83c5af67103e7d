use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::{feature_vector, squared_distance, FEATURE_DIM};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model has no labels")]
    Empty,

    #[error("Model has {labels} labels but {centroids} centroids")]
    LabelCentroidMismatch { labels: usize, centroids: usize },

    #[error("Centroid for '{label}' has dimension {got}, expected {FEATURE_DIM}")]
    DimensionMismatch { label: String, got: usize },
}

/// A trained, versioned model as stored in the registry. The registry assigns
/// `version` at publish time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelArtifact {
    pub name: String,
    pub version: u32,
    pub labels: Vec<String>,
    pub centroids: Vec<Vec<f32>>,
    /// Number of mirrored images the centroids were averaged over.
    pub trained_on: usize,
    pub created_at: DateTime<Utc>,
}

/// Nearest-centroid classifier over the artifact's label vocabulary.
pub struct CentroidClassifier {
    artifact: ModelArtifact,
}

impl CentroidClassifier {
    /// Validate the artifact so `predict` can assume a well-formed model.
    pub fn new(artifact: ModelArtifact) -> Result<Self, ModelError> {
        if artifact.labels.is_empty() {
            return Err(ModelError::Empty);
        }
        if artifact.labels.len() != artifact.centroids.len() {
            return Err(ModelError::LabelCentroidMismatch {
                labels: artifact.labels.len(),
                centroids: artifact.centroids.len(),
            });
        }
        for (label, centroid) in artifact.labels.iter().zip(&artifact.centroids) {
            if centroid.len() != FEATURE_DIM {
                return Err(ModelError::DimensionMismatch {
                    label: label.clone(),
                    got: centroid.len(),
                });
            }
        }

        Ok(Self { artifact })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Label of the closest centroid.
    pub fn predict(&self, img: &DynamicImage) -> &str {
        let features = feature_vector(img);

        let mut best = 0;
        let mut best_distance = f32::INFINITY;
        for (index, centroid) in self.artifact.centroids.iter().enumerate() {
            let distance = squared_distance(&features, centroid);
            if distance < best_distance {
                best_distance = distance;
                best = index;
            }
        }

        &self.artifact.labels[best]
    }
}
