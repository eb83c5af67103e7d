use std::sync::Arc;

use common::storage::{
    artifacts::{DynArtifactStore, StoreError},
    db::SurrealDbClient,
    types::catalog_record::{CatalogError, CatalogRecord},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::source::{storage_key, FetchError, KeyError, SourceFetcher};

/// Errors that compromise the whole run's preconditions. Anything per-record
/// is an [`ItemError`] instead and never aborts the batch.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Bucket provisioning failed: {0}")]
    Bucket(#[source] StoreError),

    #[error("Could not read the pending work batch: {0}")]
    Catalog(#[from] CatalogError),
}

/// Per-record failures: the record is logged, skipped and stays pending for
/// the next run.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Catalog update failed: {0}")]
    CatalogUpdate(#[from] CatalogError),
}

/// Outcome of one synchronizer pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Pending records picked up at the start of the run.
    pub processed: usize,
    /// Records that ended the run mirrored.
    pub mirrored: usize,
    /// Objects actually written this run.
    pub uploaded: usize,
    /// Records whose blob already existed from a partially-completed earlier
    /// run; only the catalog was updated.
    pub reused: usize,
    pub failed: Vec<ItemFailure>,
}

#[derive(Debug)]
pub struct ItemFailure {
    pub record_id: String,
    pub url_source: String,
    pub reason: String,
}

struct MirrorResult {
    mirror_url: String,
    uploaded: bool,
}

/// Copies pending source images into the artifact store and records the
/// mirror location in the catalog, one bounded pass per invocation.
///
/// Single-writer discipline is assumed: the existence-check-then-write pair
/// is not atomic against a concurrent synchronizer. Re-running the stage is
/// the retry mechanism for anything left pending.
pub struct MirrorSynchronizer {
    db: Arc<SurrealDbClient>,
    store: DynArtifactStore,
    fetcher: SourceFetcher,
}

impl MirrorSynchronizer {
    pub fn new(db: Arc<SurrealDbClient>, store: DynArtifactStore, fetcher: SourceFetcher) -> Self {
        Self { db, store, fetcher }
    }

    /// One bounded pass: provision the bucket, read the pending batch, then
    /// mirror each record independently and sequentially.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        self.store
            .ensure_bucket()
            .await
            .map_err(SyncError::Bucket)?;

        let pending = CatalogRecord::pending(&self.db).await?;
        info!(pending = pending.len(), "Starting mirror synchronization");

        let mut report = SyncReport {
            processed: pending.len(),
            ..SyncReport::default()
        };

        for record in pending {
            match self.mirror_record(&record).await {
                Ok(result) => {
                    report.mirrored += 1;
                    if result.uploaded {
                        report.uploaded += 1;
                    } else {
                        report.reused += 1;
                    }
                    info!(
                        record_id = %record.id,
                        mirror_url = %result.mirror_url,
                        "Mirrored image"
                    );
                }
                Err(err) => {
                    warn!(
                        record_id = %record.id,
                        url_source = %record.url_source,
                        error = %err,
                        "Record failed, leaving it pending for the next run"
                    );
                    report.failed.push(ItemFailure {
                        record_id: record.id.clone(),
                        url_source: record.url_source.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            processed = report.processed,
            mirrored = report.mirrored,
            uploaded = report.uploaded,
            reused = report.reused,
            failed = report.failed.len(),
            "Mirror synchronization finished"
        );

        Ok(report)
    }

    /// Mirror a single record: fetch, store under `{label}/{filename}`, then
    /// record the mirror url with an immediate per-record commit.
    ///
    /// The existence check before the write makes this safe against earlier
    /// runs that stored the blob but crashed before updating the catalog; the
    /// catalog is always updated once existence or write succeeds.
    async fn mirror_record(&self, record: &CatalogRecord) -> Result<MirrorResult, ItemError> {
        let key = storage_key(&record.label, &record.url_source)?;

        let data = self.fetcher.fetch(&record.url_source).await?;

        let uploaded = if self.store.exists(&key).await? {
            false
        } else {
            let content_type = mime_guess::from_path(&key).first_or_octet_stream();
            self.store
                .put(&key, data, content_type.essence_str())
                .await?;
            true
        };

        let mirror_url = self.store.object_url(&key);
        CatalogRecord::set_mirror_url(&self.db, &record.id, &mirror_url).await?;

        Ok(MirrorResult {
            mirror_url,
            uploaded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::MetadataRegistrar;
    use axum::{
        extract::Path,
        http::StatusCode,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use common::storage::artifacts::testing::memory_store;
    use std::time::Duration;
    use uuid::Uuid;

    const ENDPOINT: &str = "http://localhost:9000";
    const BUCKET: &str = "images";

    async fn test_db() -> Arc<SurrealDbClient> {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("schema");
        Arc::new(db)
    }

    /// Serve fixture images on an ephemeral port; `missing` returns 404 for
    /// the matching filename.
    async fn spawn_fixture(missing: Option<&'static str>) -> String {
        let app = Router::new().route(
            "/{label}/{file}",
            get(move |Path((_label, file)): Path<(String, String)>| async move {
                if Some(file.as_str()) == missing {
                    StatusCode::NOT_FOUND.into_response()
                } else {
                    (StatusCode::OK, b"fixture jpeg bytes".to_vec()).into_response()
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fixture listener");
        let addr = listener.local_addr().expect("fixture addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fixture server");
        });

        format!("http://{addr}")
    }

    fn synchronizer(db: Arc<SurrealDbClient>, store: DynArtifactStore) -> MirrorSynchronizer {
        let fetcher = SourceFetcher::new(Duration::from_secs(5)).expect("fetcher");
        MirrorSynchronizer::new(db, store, fetcher)
    }

    #[tokio::test]
    async fn test_end_to_end_mirrors_all_registered_records() {
        let db = test_db().await;
        let base = spawn_fixture(None).await;
        let labels = vec!["dandelion".to_string(), "grass".to_string()];

        let registrar = MetadataRegistrar::new(Arc::clone(&db));
        let report = registrar.register_catalog(&labels, 2, &base).await;
        assert_eq!(report.inserted, 4);
        assert_eq!(CatalogRecord::pending_count(&db).await.expect("pending"), 4);

        let store = memory_store(ENDPOINT, BUCKET);
        let report = synchronizer(Arc::clone(&db), Arc::clone(&store))
            .run()
            .await
            .expect("sync run");

        assert_eq!(report.processed, 4);
        assert_eq!(report.mirrored, 4);
        assert_eq!(report.uploaded, 4);
        assert!(report.failed.is_empty());

        let records = db
            .get_all_stored_items::<CatalogRecord>()
            .await
            .expect("records");
        assert_eq!(records.len(), 4);
        for record in &records {
            let filename = record
                .url_source
                .rsplit('/')
                .next()
                .expect("filename")
                .to_string();
            assert_eq!(
                record.url_s3.as_deref(),
                Some(format!("{ENDPOINT}/{BUCKET}/{}/{filename}", record.label).as_str())
            );
        }

        let mut keys = store.list("").await.expect("list");
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "dandelion/00000000.jpg",
                "dandelion/00000001.jpg",
                "grass/00000000.jpg",
                "grass/00000001.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_isolates_one_record() {
        let db = test_db().await;
        // Record 2 of 3 is the one that fails.
        let base = spawn_fixture(Some("00000001.jpg")).await;

        let registrar = MetadataRegistrar::new(Arc::clone(&db));
        let report = registrar
            .register_catalog(&["grass".to_string()], 3, &base)
            .await;
        assert_eq!(report.inserted, 3);

        let store = memory_store(ENDPOINT, BUCKET);
        let report = synchronizer(Arc::clone(&db), Arc::clone(&store))
            .run()
            .await
            .expect("sync run");

        assert_eq!(report.processed, 3);
        assert_eq!(report.mirrored, 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].url_source.ends_with("00000001.jpg"));
        assert!(report.failed[0].reason.contains("404"));

        let pending = CatalogRecord::pending(&db).await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert!(pending[0].url_source.ends_with("00000001.jpg"));
    }

    #[tokio::test]
    async fn test_pending_set_shrinks_and_second_run_writes_nothing() {
        let db = test_db().await;
        let base = spawn_fixture(None).await;

        let registrar = MetadataRegistrar::new(Arc::clone(&db));
        registrar
            .register_catalog(&["grass".to_string()], 2, &base)
            .await;

        let store = memory_store(ENDPOINT, BUCKET);
        let sync = synchronizer(Arc::clone(&db), Arc::clone(&store));

        let before = CatalogRecord::pending_count(&db).await.expect("pending");
        let first = sync.run().await.expect("first run");
        let after = CatalogRecord::pending_count(&db).await.expect("pending");
        assert!(after <= before);
        assert_eq!(after, 0);
        assert_eq!(first.uploaded, 2);

        let urls_after_first: Vec<Option<String>> = db
            .get_all_stored_items::<CatalogRecord>()
            .await
            .expect("records")
            .into_iter()
            .map(|record| record.url_s3)
            .collect();

        let second = sync.run().await.expect("second run");
        assert_eq!(second.processed, 0);
        assert_eq!(second.uploaded, 0);

        let urls_after_second: Vec<Option<String>> = db
            .get_all_stored_items::<CatalogRecord>()
            .await
            .expect("records")
            .into_iter()
            .map(|record| record.url_s3)
            .collect();
        assert_eq!(urls_after_first, urls_after_second);
    }

    #[tokio::test]
    async fn test_preexisting_blob_is_reused_and_catalog_still_updated() {
        let db = test_db().await;
        let base = spawn_fixture(None).await;

        let registrar = MetadataRegistrar::new(Arc::clone(&db));
        registrar
            .register_catalog(&["grass".to_string()], 1, &base)
            .await;

        // Simulate an earlier run that stored the blob but crashed before the
        // catalog update.
        let store = memory_store(ENDPOINT, BUCKET);
        store
            .put(
                "grass/00000000.jpg",
                bytes::Bytes::from_static(b"already mirrored"),
                "image/jpeg",
            )
            .await
            .expect("pre-put");

        let report = synchronizer(Arc::clone(&db), Arc::clone(&store))
            .run()
            .await
            .expect("sync run");

        assert_eq!(report.mirrored, 1);
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.reused, 1);
        assert_eq!(CatalogRecord::pending_count(&db).await.expect("pending"), 0);

        // The original blob was not overwritten.
        let data = store.get("grass/00000000.jpg").await.expect("get");
        assert_eq!(data.as_ref(), b"already mirrored");
    }
}
