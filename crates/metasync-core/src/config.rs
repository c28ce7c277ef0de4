use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use metasync_parser::KeyScheme;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use thiserror::Error;

pub const DEFAULT_SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/1oS7VTEOmhaq1hZnns9unXS8qBNJq8yves0dtdZtJUlk/export?format=csv";
pub const DEFAULT_TABLE: &str = "meta_valle";
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DB_PORT: u16 = 5432;

const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingVars(Vec<&'static str>),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("invalid table name '{0}': expected letters, digits and underscores, not starting with a digit")]
    InvalidTable(String),
}

/// Everything a sync run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub database: DatabaseConfig,
    pub target: TableTarget,
    pub batch_size: usize,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database: DatabaseConfig::from_lookup(&lookup)?,
            source: SourceConfig::from_lookup(&lookup)?,
            target: TableTarget::from_lookup(&lookup)?,
            batch_size: batch_size_from_lookup(&lookup)?,
        })
    }
}

/// Where the sheet comes from.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub url: String,
    pub timeout: Duration,
    /// Append a `_ts` query parameter so intermediaries cannot serve a stale export.
    pub cache_bust: bool,
    /// Read the payload from this file instead of downloading it.
    pub input: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SHEET_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            cache_bust: false,
            input: None,
        }
    }
}

impl SourceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut source = SourceConfig::default();
        if let Some(url) = non_empty(&lookup, "SHEET_URL") {
            source.url = url;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SHEET_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "SHEET_TIMEOUT_SECS",
                    reason: "timeout must be at least one second".into(),
                });
            }
            source.timeout = Duration::from_secs(secs);
        }
        Ok(source)
    }
}

/// Postgres connection settings. Either a full URL or the individual parts
/// the scheduler exposes as secrets.
#[derive(Clone)]
pub enum DatabaseConfig {
    Url(String),
    Parts(ConnectionParts),
}

#[derive(Clone)]
pub struct ConnectionParts {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: PgSslMode,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = non_empty(&lookup, "DATABASE_URL") {
            return Ok(DatabaseConfig::Url(url));
        }

        let host = non_empty(&lookup, "DB_HOST");
        let database = non_empty(&lookup, "DB_NAME");
        let user = non_empty(&lookup, "DB_USER");
        let password = non_empty(&lookup, "DB_PASS");

        let missing: Vec<&'static str> = [
            ("DB_HOST", host.is_none()),
            ("DB_NAME", database.is_none()),
            ("DB_USER", user.is_none()),
            ("DB_PASS", password.is_none()),
        ]
        .into_iter()
        .filter_map(|(var, absent)| absent.then_some(var))
        .collect();

        let (Some(host), Some(database), Some(user), Some(password)) =
            (host, database, user, password)
        else {
            return Err(ConfigError::MissingVars(missing));
        };

        let port = parse_var::<u16, _>(&lookup, "DB_PORT")?.unwrap_or(DEFAULT_DB_PORT);
        let ssl_mode = parse_var::<PgSslMode, _>(&lookup, "DB_SSLMODE")?.unwrap_or(PgSslMode::Prefer);

        Ok(DatabaseConfig::Parts(ConnectionParts {
            host,
            port,
            database,
            user,
            password,
            ssl_mode,
        }))
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        match self {
            DatabaseConfig::Url(url) => {
                PgConnectOptions::from_str(url).map_err(|err| ConfigError::Invalid {
                    var: "DATABASE_URL",
                    reason: err.to_string(),
                })
            }
            DatabaseConfig::Parts(parts) => Ok(PgConnectOptions::new()
                .host(&parts.host)
                .port(parts.port)
                .database(&parts.database)
                .username(&parts.user)
                .password(&parts.password)
                .ssl_mode(parts.ssl_mode)),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseConfig::Url(_) => f.write_str("DatabaseConfig::Url(<redacted>)"),
            DatabaseConfig::Parts(parts) => f
                .debug_struct("DatabaseConfig::Parts")
                .field("host", &parts.host)
                .field("port", &parts.port)
                .field("database", &parts.database)
                .field("user", &parts.user)
                .field("ssl_mode", &parts.ssl_mode)
                .finish_non_exhaustive(),
        }
    }
}

/// The destination table and how it is keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    name: String,
    pub scheme: KeyScheme,
}

impl TableTarget {
    /// Validates `name` as a bare SQL identifier. It is folded to lowercase,
    /// matching what Postgres does with unquoted names.
    pub fn new(name: &str, scheme: KeyScheme) -> Result<Self, ConfigError> {
        let name = name.trim();
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            && name.len() <= MAX_IDENTIFIER_LEN;
        if !valid {
            return Err(ConfigError::InvalidTable(name.to_string()));
        }
        Ok(Self {
            name: name.to_ascii_lowercase(),
            scheme,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = non_empty(&lookup, "METASYNC_TABLE").unwrap_or_else(|| DEFAULT_TABLE.into());
        let scheme = parse_var::<KeyScheme, _>(&lookup, "METASYNC_KEY_SCHEME")?.unwrap_or_default();
        Self::new(&name, scheme)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the `UNIQUE (cooperativa, data)` constraint in the surrogate scheme.
    pub fn constraint_name(&self) -> String {
        let name = format!("{}_cooperativa_data_key", self.name);
        name.chars().take(MAX_IDENTIFIER_LEN).collect()
    }
}

pub fn batch_size_from_lookup<F>(lookup: F) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<usize, _>(&lookup, "METASYNC_BATCH_SIZE")? {
        Some(0) => Err(ConfigError::Invalid {
            var: "METASYNC_BATCH_SIZE",
            reason: "batch size must be at least 1".into(),
        }),
        Some(size) => Ok(size),
        None => Ok(DEFAULT_BATCH_SIZE),
    }
}

// Unset secrets often arrive as empty strings; treat them as absent.
fn non_empty<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, var)
        .map(|raw| {
            raw.parse::<T>().map_err(|err| ConfigError::Invalid {
                var,
                reason: format!("'{raw}': {err}"),
            })
        })
        .transpose()
}
