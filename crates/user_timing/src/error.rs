//! Error types for timing primitives.

use thiserror::Error;

/// Errors returned by [`measure`](crate::measure).
#[derive(Debug, Error, PartialEq)]
pub enum TimingError {
    /// A measure referenced a mark that is not on the timeline
    #[error("The mark '{0}' does not exist")]
    UnknownMark(String),

    /// Start, end and duration were all supplied
    #[error("measure options cannot specify start, end and duration together")]
    OverSpecified,
}

/// Result type for timing operations.
pub type TimingResult<T> = Result<T, TimingError>;
