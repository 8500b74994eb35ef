//! Unified error handling for the data stream generator
//!
//! This module provides a single error type used across setup and generation,
//! with a clear split between faults that abort the whole run and faults that
//! are isolated to a single tick.

use std::fmt;
use std::io;

/// Main error type for the generator
#[derive(Debug)]
pub enum GeneratorError {
    // Configuration errors (fatal at setup)
    ConfigNotFound(String),
    ConfigParse(String),
    ConfigValidation(String),
    ConfigMissing(String),

    // Expression errors (per-tick, degraded to a sentinel value)
    ExpressionFault(String),

    // Export errors
    InsufficientHistory(String),

    // Source errors (XF files, fatal at first use)
    SourceIo(String),
    SourceParse(String),

    // Sink errors (logged, tick continues)
    PublishFault(String),
    SinkConnection(String),

    // Broker-fed (XG) subscription errors (fatal at setup)
    Subscription(String),

    // General errors
    Internal(String),
}

impl GeneratorError {
    /// Whether this error class aborts the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GeneratorError::ConfigNotFound(_)
                | GeneratorError::ConfigParse(_)
                | GeneratorError::ConfigValidation(_)
                | GeneratorError::ConfigMissing(_)
                | GeneratorError::InsufficientHistory(_)
                | GeneratorError::SourceIo(_)
                | GeneratorError::SourceParse(_)
                | GeneratorError::SinkConnection(_)
                | GeneratorError::Subscription(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            GeneratorError::ConfigNotFound(_)
            | GeneratorError::ConfigParse(_)
            | GeneratorError::ConfigValidation(_)
            | GeneratorError::ConfigMissing(_) => "config",

            GeneratorError::ExpressionFault(_) => "expression",

            GeneratorError::InsufficientHistory(_) => "export",

            GeneratorError::SourceIo(_) | GeneratorError::SourceParse(_) => "source",

            GeneratorError::PublishFault(_) | GeneratorError::SinkConnection(_) => "sink",

            GeneratorError::Subscription(_) => "subscription",

            GeneratorError::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path)
            }
            GeneratorError::ConfigParse(msg) => {
                write!(f, "Configuration parse error: {}", msg)
            }
            GeneratorError::ConfigValidation(msg) => {
                write!(f, "Configuration validation error: {}", msg)
            }
            GeneratorError::ConfigMissing(field) => {
                write!(f, "Missing required configuration: {}", field)
            }
            GeneratorError::ExpressionFault(msg) => {
                write!(f, "Expression evaluation fault: {}", msg)
            }
            GeneratorError::InsufficientHistory(msg) => {
                write!(f, "Insufficient history for export: {}", msg)
            }
            GeneratorError::SourceIo(msg) => {
                write!(f, "Source file error: {}", msg)
            }
            GeneratorError::SourceParse(msg) => {
                write!(f, "Source parse error: {}", msg)
            }
            GeneratorError::PublishFault(msg) => {
                write!(f, "Publish failed: {}", msg)
            }
            GeneratorError::SinkConnection(msg) => {
                write!(f, "Sink connection error: {}", msg)
            }
            GeneratorError::Subscription(msg) => {
                write!(f, "Subscription error: {}", msg)
            }
            GeneratorError::Internal(msg) => {
                write!(f, "Internal error: {}", msg)
            }
        }
    }
}

impl std::error::Error for GeneratorError {}

impl From<io::Error> for GeneratorError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => GeneratorError::SourceIo(err.to_string()),
            io::ErrorKind::PermissionDenied => GeneratorError::SourceIo(err.to_string()),
            _ => GeneratorError::Internal(format!("IO error: {}", err)),
        }
    }
}

impl From<toml::de::Error> for GeneratorError {
    fn from(err: toml::de::Error) -> Self {
        GeneratorError::ConfigParse(format!("TOML parse error: {}", err))
    }
}

impl From<serde_json::Error> for GeneratorError {
    fn from(err: serde_json::Error) -> Self {
        GeneratorError::Internal(format!("JSON error: {}", err))
    }
}

impl From<crate::config::ConfigError> for GeneratorError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::FileRead(msg) => GeneratorError::ConfigNotFound(msg),
            ConfigError::Parse(msg) => GeneratorError::ConfigParse(msg),
            ConfigError::Serialize(msg) => GeneratorError::Internal(msg),
            ConfigError::FileWrite(msg) => GeneratorError::Internal(msg),
            ConfigError::Validation(msg) => GeneratorError::ConfigValidation(msg),
            ConfigError::MissingField(field) => GeneratorError::ConfigMissing(field),
        }
    }
}

impl From<String> for GeneratorError {
    fn from(msg: String) -> Self {
        GeneratorError::Internal(msg)
    }
}

/// Result type alias using GeneratorError
pub type GeneratorResult<T> = Result<T, GeneratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GeneratorError::ConfigNotFound("run.toml".to_string());
        assert!(err.to_string().contains("run.toml"));
    }

    #[test]
    fn test_error_category() {
        assert_eq!(GeneratorError::ConfigValidation("x".into()).category(), "config");
        assert_eq!(GeneratorError::ExpressionFault("x".into()).category(), "expression");
        assert_eq!(GeneratorError::PublishFault("x".into()).category(), "sink");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GeneratorError::SourceIo("missing".into()).is_fatal());
        assert!(GeneratorError::InsufficientHistory("lags".into()).is_fatal());
        assert!(!GeneratorError::ExpressionFault("bad".into()).is_fatal());
        assert!(!GeneratorError::PublishFault("down".into()).is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: GeneratorError = io_err.into();
        assert!(matches!(err, GeneratorError::SourceIo(_)));
    }
}
