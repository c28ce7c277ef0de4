use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::config::SourceConfig;
use crate::error::{Result, SyncError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Downloads the published sheet. One attempt; any transport failure or
/// non-2xx status aborts the run.
pub async fn fetch_sheet(source: &SourceConfig) -> Result<Vec<u8>> {
    let fetch_error = |source_err: reqwest::Error| SyncError::Fetch {
        url: source.url.clone(),
        source: source_err,
    };

    let client = reqwest::Client::builder()
        .timeout(source.timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(fetch_error)?;

    let mut request = client.get(&source.url);
    if source.cache_bust {
        request = request.query(&[("_ts", Utc::now().timestamp_millis())]);
    }

    info!(url = %source.url, timeout_secs = source.timeout.as_secs(), "downloading sheet");
    let response = request.send().await.map_err(fetch_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::HttpStatus {
            url: source.url.clone(),
            status,
        });
    }

    let body = response.bytes().await.map_err(fetch_error)?;
    info!(bytes = body.len(), "sheet downloaded");
    Ok(body.to_vec())
}

/// Reads the payload from `source.input` when set, otherwise downloads it.
pub async fn load_payload(source: &SourceConfig) -> Result<Vec<u8>> {
    match &source.input {
        Some(path) => {
            info!(path = %path.display(), "reading sheet from file");
            tokio::fs::read(path).await.map_err(|err| SyncError::Io {
                path: path.clone(),
                source: err,
            })
        }
        None => fetch_sheet(source).await,
    }
}
