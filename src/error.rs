//! Error types for svncache
//!
//! All modules use `SvnCacheResult<T>` as their return type.

use crate::connector::ConnectorError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for svncache operations
pub type SvnCacheResult<T> = Result<T, SvnCacheError>;

/// All errors that can occur in svncache
#[derive(Error, Debug)]
pub enum SvnCacheError {
    // Backend errors
    #[error("SVN connector failure: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Operation cancelled")]
    Cancelled,

    // Resource errors
    #[error("Resource is inaccessible: {0}")]
    InaccessibleResource(String),

    #[error("Project {0} is not connected to an SVN repository")]
    NotConnected(String),

    // Persisted data errors
    #[error("Unknown status code in persisted record: {0}")]
    UnknownStatus(String),

    #[error("Malformed persisted record: {0}")]
    MalformedRecord(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid ignore pattern {pattern}: {reason}")]
    IgnorePattern { pattern: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SvnCacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a malformed record error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRecord(reason.into())
    }

    /// Whether the operation was cancelled, either locally or by the connector
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Connector(e) => e.is_cancelled(),
            _ => false,
        }
    }

    /// Errors that callers should not surface in a UI error report
    pub fn is_unreportable(&self) -> bool {
        matches!(self, Self::InaccessibleResource(_) | Self::NotConnected(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Connector(ConnectorError::CleanupRequired { .. }) => Some("Run: svn cleanup"),
            Self::NotConnected(_) => Some("Share the project with an SVN repository first"),
            Self::UnknownStatus(_) => Some("The persisted cache is corrupted; discard it"),
            _ => None,
        }
    }
}
