//! Error types for the heap simulator

/// Simulator operation result type
pub type GcSimResult<T> = Result<T, GcSimError>;

/// Errors that can occur while simulating, collecting or analyzing the heap
#[derive(Debug, thiserror::Error)]
pub enum GcSimError {
    /// Persistence layer failure
    #[error("Store failure: {0}")]
    Store(String),

    /// Configuration could not be loaded or is invalid
    #[error("Invalid simulator configuration: {0}")]
    Config(String),

    /// Engine-level argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Boundary input validation failure
    #[error("Validation failed for `{field}`: {message}")]
    Validation {
        /// Offending input field
        field: String,
        /// Human readable reason
        message: String,
    },

    /// GC cycle already in progress
    #[error("GC cycle already in progress")]
    CycleInProgress,
}

impl GcSimError {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the error comes from the persistence layer
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<std::io::Error> for GcSimError {
    fn from(err: std::io::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::de::Error> for GcSimError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for GcSimError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for GcSimError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GcSimError::store("disk unavailable");
        assert!(err.to_string().contains("disk unavailable"));
        assert!(err.is_store_failure());
    }

    #[test]
    fn test_validation_display() {
        let err = GcSimError::validation("count", "Count must be at least 1");
        let msg = err.to_string();
        assert!(msg.contains("count"));
        assert!(msg.contains("at least 1"));
        assert!(!err.is_store_failure());
    }
}
