//! Error types for the persistence layer

use thiserror::Error;

/// Errors that can occur in store operations
#[derive(Error, Debug)]
pub enum StateError {
    /// Filesystem error
    #[error("IO error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Document could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored document could not be decoded
    #[error("Deserialization error in {key}: {reason}")]
    Deserialization {
        /// Document key
        key: String,
        /// Decoder message
        reason: String,
    },

    /// Key cannot be mapped to a document
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl StateError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_path() {
        let err = StateError::io(
            "/tmp/store/scenes.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/store/scenes.json"));
    }
}
