//! Library error surface.
//!
//! Kind 4 invariant violations (spec.md S7) are programming errors and are
//! not represented here -- they panic (or `debug_assert!`) at the point of
//! detection instead of being threaded through `Result`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DpmError {
    #[error("malformed alignment-count file {path}: {reason}")]
    FastaParse { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DpmError>;
