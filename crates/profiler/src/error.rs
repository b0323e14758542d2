//! Error types for the profiler.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while recording or converting traces.
///
/// Only [`ProfilerError::Configuration`] escapes profiler construction; every
/// runtime failure is logged by the profiler and never reaches instrumented code.
#[derive(Debug, Error)]
pub enum ProfilerError {
    /// Invalid output directory or file name
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reading or writing a WAL or trace file failed
    #[error("IO error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize or parse JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A WAL line could not be parsed
    #[error("Malformed entry on line {line}: {reason}")]
    MalformedEntry { line: usize, reason: String },

    /// A trace event that has no entry equivalent
    #[error("Unsupported trace event: {0}")]
    UnsupportedEvent(String),
}

impl ProfilerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for profiler operations.
pub type ProfilerResult<T> = Result<T, ProfilerError>;
