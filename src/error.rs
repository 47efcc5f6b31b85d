//! Error kinds for the worker.
//!
//! Mask misses (a coordinate absent from the land/water legend) are not
//! errors: they are skip outcomes handled inside the accumulation engine
//! and never surface here. Everything else propagates to the caller and
//! ends the run with a generic nonzero exit.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration (non-positive resolution,
    /// unknown instance, malformed instance.json).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The compute trigger was unreachable or reported a non-success
    /// body.
    #[error("compute trigger failed: {0}")]
    Network(String),

    /// The job-scoped state marker was not in the expected state.
    #[error("job state mismatch: {0}")]
    StateMismatch(String),

    /// An object-store or database operation failed.
    #[error("storage operation failed: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(format!("bad payload: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
