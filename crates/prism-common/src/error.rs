//! Common error types for Prism.

use thiserror::Error;

/// Result type alias using Prism's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Prism protocol operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Well-formed JSON that does not describe a known message
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        use serde_json::error::Category;

        match err.classify() {
            Category::Data => Self::protocol(err),
            Category::Io | Category::Syntax | Category::Eof => Self::serialization(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_errors_map_to_serialization() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_shape_errors_map_to_protocol() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            field: u32,
        }

        let err: Error = serde_json::from_str::<Needs>(r#"{"other": 1}"#)
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
