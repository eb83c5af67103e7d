use chrono::Utc;
use common::storage::artifacts::{DynArtifactStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::classifier::ModelArtifact;
use crate::features::{feature_vector, FEATURE_DIM};

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("No usable mirrored images for label '{0}'")]
    NoImages(String),
}

/// Builds a nearest-centroid model from the mirrored images, one centroid per
/// label prefix in the bucket.
pub struct Trainer {
    store: DynArtifactStore,
}

impl Trainer {
    pub fn new(store: DynArtifactStore) -> Self {
        Self { store }
    }

    /// Average the feature vectors of every decodable image under each label
    /// prefix. A label without a single usable image is fatal: the pipeline
    /// has nothing to train on and re-running ingestion is the fix.
    pub async fn train(
        &self,
        labels: &[String],
        model_name: &str,
    ) -> Result<ModelArtifact, TrainError> {
        let mut centroids = Vec::with_capacity(labels.len());
        let mut trained_on = 0usize;

        for label in labels {
            let keys = self.store.list(&format!("{label}/")).await?;
            let mut sum = vec![0f32; FEATURE_DIM];
            let mut count = 0usize;

            for key in &keys {
                let data = self.store.get(key).await?;
                let img = match image::load_from_memory(&data) {
                    Ok(img) => img,
                    Err(err) => {
                        warn!(key = %key, error = %err, "Skipping undecodable mirrored image");
                        continue;
                    }
                };
                for (slot, value) in sum.iter_mut().zip(feature_vector(&img)) {
                    *slot += value;
                }
                count += 1;
            }

            if count == 0 {
                return Err(TrainError::NoImages(label.clone()));
            }

            for value in &mut sum {
                *value /= count as f32;
            }
            centroids.push(sum);
            trained_on += count;

            info!(label = %label, images = count, "Computed label centroid");
        }

        Ok(ModelArtifact {
            name: model_name.to_string(),
            version: 0, // assigned by the registry at publish time
            labels: labels.to_vec(),
            centroids,
            trained_on,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CentroidClassifier;
    use bytes::Bytes;
    use common::storage::artifacts::testing::memory_store;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(r: u8, g: u8, b: u8) -> Bytes {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([r, g, b])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).expect("encode png");
        Bytes::from(buf.into_inner())
    }

    #[tokio::test]
    async fn test_train_builds_separating_centroids() {
        let store = memory_store("http://localhost:9000", "images");
        store
            .put("dandelion/00000000.jpg", png_bytes(230, 200, 40), "image/png")
            .await
            .expect("put");
        store
            .put("dandelion/00000001.jpg", png_bytes(240, 210, 60), "image/png")
            .await
            .expect("put");
        store
            .put("grass/00000000.jpg", png_bytes(40, 160, 40), "image/png")
            .await
            .expect("put");
        store
            .put("grass/00000001.jpg", png_bytes(30, 140, 30), "image/png")
            .await
            .expect("put");

        let labels = vec!["dandelion".to_string(), "grass".to_string()];
        let trainer = Trainer::new(store);
        let artifact = trainer
            .train(&labels, "dandelion-grass")
            .await
            .expect("train");

        assert_eq!(artifact.trained_on, 4);
        assert_eq!(artifact.labels, labels);

        let classifier = CentroidClassifier::new(artifact).expect("classifier");
        let yellowish = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            32,
            32,
            Rgb([235, 205, 50]),
        ));
        assert_eq!(classifier.predict(&yellowish), "dandelion");
    }

    #[tokio::test]
    async fn test_label_without_images_is_fatal() {
        let store = memory_store("http://localhost:9000", "images");
        store
            .put("dandelion/00000000.jpg", png_bytes(230, 200, 40), "image/png")
            .await
            .expect("put");

        let labels = vec!["dandelion".to_string(), "grass".to_string()];
        let result = Trainer::new(store).train(&labels, "dandelion-grass").await;
        assert!(matches!(result, Err(TrainError::NoImages(label)) if label == "grass"));
    }

    #[tokio::test]
    async fn test_undecodable_blobs_are_skipped() {
        let store = memory_store("http://localhost:9000", "images");
        store
            .put("grass/00000000.jpg", png_bytes(40, 160, 40), "image/png")
            .await
            .expect("put");
        store
            .put(
                "grass/00000001.jpg",
                Bytes::from_static(b"not an image"),
                "image/jpeg",
            )
            .await
            .expect("put");

        let labels = vec!["grass".to_string()];
        let artifact = Trainer::new(store)
            .train(&labels, "dandelion-grass")
            .await
            .expect("train");
        assert_eq!(artifact.trained_on, 1);
    }
}
