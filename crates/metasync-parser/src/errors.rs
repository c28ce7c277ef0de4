use thiserror::Error;

/// Fatal problems with a sheet payload. Anything reported here aborts the
/// run before the database is touched; per-row problems are reported as
/// [`crate::DropReason`] instead.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("payload is not valid UTF-8 (first invalid byte at offset {offset})")]
    InvalidEncoding { offset: usize },

    #[error("payload is empty")]
    EmptyPayload,

    #[error("required columns missing from sheet: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
