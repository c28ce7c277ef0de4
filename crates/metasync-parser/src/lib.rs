pub mod errors;
pub mod model;
mod coerce;
mod decode;
mod normalize;

pub use decode::decode_payload;
pub use errors::NormalizeError;
pub use model::{
    Column, DropReason, DroppedRow, GoalRecord, KeyScheme, NormalizedSheet, DEFAULT_STATUS,
};
pub use normalize::{normalize_payload, normalize_text};
