// crates/metasync-core/src/error.rs

use std::path::PathBuf;

use metasync_parser::NormalizeError;
use thiserror::Error;

use crate::config::ConfigError;

/// Every condition that aborts a run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to fetch sheet from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("sheet request to {url} returned HTTP {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to read sheet from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sheet rejected: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("failed to connect to Postgres: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("encoding repair needs a UTF8 database, but the server encoding is {encoding}")]
    UnsupportedEncoding { encoding: String },

    #[error("another run is already synchronizing table {table}")]
    RunInProgress { table: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;
