use std::{sync::Arc, time::Duration};

use anyhow::Context;
use api_router::{api_routes, api_state::ApiState};
use clap::{Parser, Subcommand};
use common::{
    storage::{
        artifacts::create_artifact_store,
        db::SurrealDbClient,
        types::catalog_record::CatalogRecord,
    },
    utils::config::{get_config, AppConfig},
};
use ingestion_pipeline::{MetadataRegistrar, MirrorSynchronizer, SourceFetcher};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use training_pipeline::{ModelRegistry, Trainer};

/// Dandelion/grass image pipeline: every workflow stage is a subcommand, and
/// every stage is safe to re-run.
#[derive(Parser, Debug)]
#[command(name = "verdant", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the database connection and credentials.
    CreateDatabase,
    /// Create the catalog table and its unique source-url index.
    CreateTable,
    /// Register the configured (label, source url) pairs in the catalog.
    InsertMetadata,
    /// Download pending source images into the object store and record their
    /// mirror urls.
    SyncMirrors,
    /// Train a model on the mirrored images and publish it to the registry.
    Train,
    /// Point production at a published model version (latest by default).
    Promote {
        #[arg(long)]
        version: Option<u32>,
    },
    /// Serve the inference API with the promoted production model.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config().context("Failed to load configuration")?;

    match cli.command {
        Command::CreateDatabase => create_database(&config).await,
        Command::CreateTable => create_table(&config).await,
        Command::InsertMetadata => insert_metadata(&config).await,
        Command::SyncMirrors => sync_mirrors(&config).await,
        Command::Train => train(&config).await,
        Command::Promote { version } => promote(&config, version).await,
        Command::Serve => serve(&config).await,
    }
}

async fn connect(config: &AppConfig) -> anyhow::Result<Arc<SurrealDbClient>> {
    let db = SurrealDbClient::new(
        &config.surrealdb_address,
        &config.surrealdb_username,
        &config.surrealdb_password,
        &config.surrealdb_namespace,
        &config.surrealdb_database,
    )
    .await
    .context("Failed to connect to SurrealDB")?;

    Ok(Arc::new(db))
}

/// Connecting already selects the namespace and database, which SurrealDB
/// creates on first use. This stage exists so deployments can fail fast on
/// bad credentials before any data stage runs.
async fn create_database(config: &AppConfig) -> anyhow::Result<()> {
    connect(config).await?;
    info!(
        namespace = %config.surrealdb_namespace,
        database = %config.surrealdb_database,
        "Database is reachable"
    );
    Ok(())
}

async fn create_table(config: &AppConfig) -> anyhow::Result<()> {
    let db = connect(config).await?;
    db.ensure_initialized()
        .await
        .context("Failed to initialize the catalog schema")?;
    info!("Catalog table and indexes are in place");
    Ok(())
}

async fn insert_metadata(config: &AppConfig) -> anyhow::Result<()> {
    let db = connect(config).await?;
    db.ensure_initialized().await?;

    let registrar = MetadataRegistrar::new(db);
    let report = registrar
        .register_catalog(&config.labels, config.images_per_label, &config.source_url_base)
        .await;

    if !report.failed.is_empty() {
        anyhow::bail!(
            "{} of {} registrations failed; re-run to retry",
            report.failed.len(),
            report.inserted + report.skipped + report.failed.len()
        );
    }
    Ok(())
}

/// Per-record failures stay pending and are retried by the next run, so this
/// stage exits zero as long as the run itself could proceed.
async fn sync_mirrors(config: &AppConfig) -> anyhow::Result<()> {
    let db = connect(config).await?;
    db.ensure_initialized().await?;

    let store = create_artifact_store(config)
        .await
        .context("Failed to set up the artifact store")?;
    let fetcher = SourceFetcher::new(Duration::from_secs(config.fetch_timeout_secs))
        .context("Failed to build the download client")?;

    let report = MirrorSynchronizer::new(Arc::clone(&db), store, fetcher)
        .run()
        .await
        .context("Mirror synchronization could not start")?;

    if !report.failed.is_empty() {
        warn!(
            failed = report.failed.len(),
            pending = CatalogRecord::pending_count(&db).await?,
            "Some records failed; re-run sync-mirrors to retry them"
        );
    }
    Ok(())
}

async fn train(config: &AppConfig) -> anyhow::Result<()> {
    let store = create_artifact_store(config)
        .await
        .context("Failed to set up the artifact store")?;

    let artifact = Trainer::new(Arc::clone(&store))
        .train(&config.labels, &config.model_name)
        .await
        .context("Training failed")?;

    let published = ModelRegistry::new(store)
        .publish(artifact)
        .await
        .context("Failed to publish the trained model")?;
    info!(
        model = %published.name,
        version = published.version,
        trained_on = published.trained_on,
        "Training finished"
    );
    Ok(())
}

async fn promote(config: &AppConfig, version: Option<u32>) -> anyhow::Result<()> {
    let store = create_artifact_store(config)
        .await
        .context("Failed to set up the artifact store")?;

    let pointer = ModelRegistry::new(store)
        .promote(&config.model_name, version)
        .await
        .context("Promotion failed")?;
    info!(
        model = %pointer.name,
        version = pointer.version,
        "Production now points at the promoted version"
    );
    Ok(())
}

async fn serve(config: &AppConfig) -> anyhow::Result<()> {
    let store = create_artifact_store(config)
        .await
        .context("Failed to set up the artifact store")?;

    let state = ApiState::from_registry(config, store)
        .await
        .context("Failed to load the production model")?;

    let app = api_routes(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    info!(port = config.http_port, "Inference API listening");

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_promote_accepts_an_explicit_version() {
        let cli = Cli::parse_from(["verdant", "promote", "--version", "3"]);
        assert!(matches!(
            cli.command,
            Command::Promote {
                version: Some(3)
            }
        ));
    }
}
