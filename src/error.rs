//! Custom error types for the pipeline.
//!
//! `SyncError` is the single error type of the library. Using `thiserror`, it
//! gives every stage of the pipeline a consistent way to report failures:
//!
//! - **`Io`**, **`Json`**, **`Csv`**: wrapped errors from file access and the
//!   serialization crates.
//! - **`Config`**: the layered configuration could not be extracted.
//! - **`Configuration`**: semantic problems found by `Settings::validate`.
//! - **`Parse`**: malformed input files (`.eit` text, recorder chunks, protocol).
//! - **`MissingInput`**: an expected file or directory does not exist.
//! - **`Processing`**: numeric stages that cannot run on the data they got,
//!   such as filtering a signal shorter than the filter padding.
//! - **`FeatureNotEnabled`**: the code path needs a cargo feature that was not
//!   compiled in.
//!
//! `#[from]` conversions let callers use `?` directly on the underlying errors.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, SyncError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Timestamp error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Data processing error: {0}")]
    Processing(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for SyncError {
    fn from(err: figment::Error) -> Self {
        SyncError::Config(Box::new(err))
    }
}
