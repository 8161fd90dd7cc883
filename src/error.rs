//! Error types for the pipe graph compiler

use std::path::PathBuf;

use thiserror::Error;

use crate::device::CoreLocation;

/// Result type for pipe graph operations
pub type PipegenResult<T> = Result<T, PipegenError>;

/// Errors raised while compiling one epoch's pipe graph.
///
/// Every variant is fatal to the epoch being compiled; nothing is retried.
#[derive(Debug, Error)]
pub enum PipegenError {
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid specification: {message}{}", location_suffix(.location))]
    InvalidSpecification {
        message: String,
        location: Option<CoreLocation>,
    },

    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error("Config error: {message}")]
    Config { message: String },

    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn location_suffix(location: &Option<CoreLocation>) -> String {
    match location {
        Some(loc) => format!(" (at {})", loc),
        None => String::new(),
    }
}

impl PipegenError {
    pub fn parse(msg: impl Into<String>) -> Self {
        PipegenError::Parse { message: msg.into() }
    }

    pub fn invalid_spec(msg: impl Into<String>, location: Option<CoreLocation>) -> Self {
        PipegenError::InvalidSpecification {
            message: msg.into(),
            location,
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        PipegenError::InvariantViolation { message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PipegenError::Config { message: msg.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipegenError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_spec_message_carries_location() {
        let err = PipegenError::invalid_spec(
            "Pipe with id 7 has inexistent input buffer with id 999",
            Some(CoreLocation::new(0, 1, 2)),
        );
        let text = err.to_string();
        assert!(text.contains("999"));
        assert!(text.contains("(at chip 0, core 1-2)"));
    }

    #[test]
    fn test_invalid_spec_without_location() {
        let err = PipegenError::invalid_spec("Buffer with id 3 already exists", None);
        assert_eq!(
            err.to_string(),
            "Invalid specification: Buffer with id 3 already exists"
        );
    }
}
