//! Error types for placement, fixed routing and table compression

use thiserror::Error;

/// Errors that can occur while mapping a graph onto a machine
#[derive(Debug, Error)]
pub enum MeshMapError {
    /// Unsupported constraint, missing destination vertex or invalid input
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A unique key was added twice to a collection
    #[error("{kind} with id {id} already exists")]
    AlreadyExists { kind: String, id: String },

    /// Placement failed
    #[error("Placement failed: {0}")]
    Place(String),

    /// Routing or table compression failed
    #[error("Routing failed: {0}")]
    Routing(String),

    /// Error parsing a job file
    #[error("Failed to parse job file: {0}")]
    ConfigParse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshMapError {
    pub(crate) fn already_exists(kind: &str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

/// Result type for mapping operations
pub type Result<T> = std::result::Result<T, MeshMapError>;
