use std::sync::Arc;

use common::storage::{
    db::SurrealDbClient,
    types::catalog_record::{CatalogRecord, RegisterOutcome},
};
use tracing::{debug, info, warn};

use crate::source::source_url;

/// Outcome of one registration batch. Per-pair write failures never abort the
/// batch; they are surfaced here and the caller turns them into a non-zero
/// exit.
#[derive(Debug, Default)]
pub struct RegistrationReport {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: Vec<RegistrationFailure>,
}

#[derive(Debug)]
pub struct RegistrationFailure {
    pub url_source: String,
    pub reason: String,
}

/// Populates the catalog with (source url, label) pairs, skipping sources
/// that are already registered.
pub struct MetadataRegistrar {
    db: Arc<SurrealDbClient>,
}

impl MetadataRegistrar {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Register `images_per_label` source urls for every label, generated
    /// from the configured base template. Idempotent and order-independent.
    pub async fn register_catalog(
        &self,
        labels: &[String],
        images_per_label: u32,
        source_url_base: &str,
    ) -> RegistrationReport {
        let pairs: Vec<(String, String)> = labels
            .iter()
            .flat_map(|label| {
                (0..images_per_label)
                    .map(|index| (label.clone(), source_url(source_url_base, label, index)))
            })
            .collect();

        self.register_pairs(&pairs).await
    }

    /// Register explicit (label, source url) pairs. Each pair is its own
    /// transaction: a failed write rolls back that pair only and the batch
    /// continues, since a later run will retry whatever is missing.
    pub async fn register_pairs(&self, pairs: &[(String, String)]) -> RegistrationReport {
        let mut report = RegistrationReport::default();

        for (label, url) in pairs {
            match CatalogRecord::register(&self.db, url, label).await {
                Ok(RegisterOutcome::Inserted(_)) => report.inserted += 1,
                Ok(RegisterOutcome::Existing(_)) => {
                    debug!(url_source = %url, "Source already registered, skipping");
                    report.skipped += 1;
                }
                Err(err) => {
                    warn!(url_source = %url, error = %err, "Failed to register source");
                    report.failed.push(RegistrationFailure {
                        url_source: url.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Metadata registration finished"
        );

        report
    }
}
