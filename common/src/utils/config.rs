use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Local,
    S3,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Process-wide configuration, built once at startup and passed by reference
/// into every component constructor. Components never read the environment
/// themselves.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_s3_endpoint")]
    pub s3_endpoint: String,
    #[serde(default)]
    pub s3_access_key_id: String,
    #[serde(default)]
    pub s3_secret_access_key: String,
    #[serde(default = "default_s3_region")]
    pub s3_region: String,
    #[serde(default = "default_bucket")]
    pub s3_bucket: String,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_images_per_label")]
    pub images_per_label: u32,
    #[serde(default = "default_source_url_base")]
    pub source_url_base: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_s3_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_s3_region() -> String {
    // Arbitrary; MinIO accepts any region.
    "us-east-1".to_string()
}

fn default_bucket() -> String {
    "images".to_string()
}

fn default_labels() -> Vec<String> {
    vec!["dandelion".to_string(), "grass".to_string()]
}

fn default_images_per_label() -> u32 {
    200
}

fn default_source_url_base() -> String {
    "https://raw.githubusercontent.com/btphan95/greenr-airflow/refs/heads/master/data".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_model_name() -> String {
    "dandelion-grass".to_string()
}

fn default_http_port() -> u16 {
    8000
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Configuration for tests: in-memory database and object store, fixture
    /// friendly defaults everywhere else.
    pub fn for_tests() -> Self {
        AppConfig {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "test_ns".into(),
            surrealdb_database: "test_db".into(),
            storage: StorageKind::Memory,
            data_dir: "/tmp/unused".into(),
            s3_endpoint: "http://localhost:9000".into(),
            s3_access_key_id: "minio".into(),
            s3_secret_access_key: "minio123".into(),
            s3_region: default_s3_region(),
            s3_bucket: default_bucket(),
            labels: default_labels(),
            images_per_label: 2,
            source_url_base: "http://fixture".into(),
            fetch_timeout_secs: 5,
            model_name: default_model_name(),
            http_port: 0,
        }
    }
}
