pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod repair;
pub mod schema;
pub mod sync;
pub mod upsert;

pub use config::{DatabaseConfig, SourceConfig, SyncConfig, TableTarget};
pub use error::{Result, SyncError};
pub use metasync_parser::{DroppedRow, GoalRecord, KeyScheme, NormalizedSheet};
