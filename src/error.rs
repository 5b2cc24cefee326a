//! Error types for schema and data flattening

use std::fmt;
use thiserror::Error;

/// A single schema violation found in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON Pointer to the offending value
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Violation {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "'{}' {}", self.path, self.message)
        }
    }
}

/// Errors that can occur while flattening a schema or a document
#[derive(Error, Debug, Clone)]
pub enum FlattenError {
    /// Caller supplied an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Schema uses a construct that can not be flattened
    #[error("{0}")]
    SchemaDefinition(String),

    /// Document does not match the schema
    #[error("Invalid data: {}", format_violations(.violations))]
    DataValidation { violations: Vec<Violation> },

    /// Compiled reference did not resolve against the document
    #[error("Failed to resolve value for '{path}': {message}")]
    DataResolution { path: String, message: String },
}

impl FlattenError {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        FlattenError::SchemaDefinition(message.into())
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
