use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Source url is not parseable: {0}")]
    InvalidUrl(String),

    #[error("Source url has no filename segment: {0}")]
    MissingFilename(String),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Source returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Canonical source location for one image: `{base}/{label}/{index:08}.jpg`.
pub fn source_url(base: &str, label: &str, index: u32) -> String {
    format!("{}/{label}/{index:08}.jpg", base.trim_end_matches('/'))
}

/// Storage key for a mirrored artifact: `{label}/{basename(source_url)}`.
pub fn storage_key(label: &str, source_url: &str) -> Result<String, KeyError> {
    let parsed =
        Url::parse(source_url).map_err(|_| KeyError::InvalidUrl(source_url.to_string()))?;
    let filename = parsed
        .path_segments()
        .and_then(|segments| segments.last().map(str::to_string))
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| KeyError::MissingFilename(source_url.to_string()))?;

    Ok(format!("{label}/{filename}"))
}

/// HTTP client for source image downloads, with one bounded timeout covering
/// the whole request.
#[derive(Clone)]
pub struct SourceFetcher {
    http: reqwest::Client,
}

impl SourceFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Download one source image. Non-2xx responses are failures; the caller
    /// decides whether to continue with the next record.
    pub async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.bytes().await?)
    }
}
