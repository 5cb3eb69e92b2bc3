//! Error types for kflash-core

use std::path::PathBuf;
use thiserror::Error;

/// Errors from registry persistence and device lookup
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read the registry file
    #[error("failed to read registry {path}: {source}")]
    RegistryRead {
        /// Registry file path
        path: PathBuf,
        /// Underlying filesystem error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the registry file
    #[error("failed to write registry {path}: {source}")]
    RegistryWrite {
        /// Registry file path
        path: PathBuf,
        /// Underlying filesystem error
        #[source]
        source: std::io::Error,
    },

    /// Registry file exists but is not valid JSON
    #[error("corrupt registry file {path}: {source}")]
    RegistryCorrupt {
        /// Registry file path
        path: PathBuf,
        /// Parse error from serde
        #[source]
        source: serde_json::Error,
    },

    /// Device key is not present in the registry
    #[error("unknown device '{0}' (see `kflash list`)")]
    UnknownDevice(String),

    /// Device key is already registered
    #[error("device '{0}' is already registered")]
    DuplicateKey(String),

    /// A stored serial pattern is not a valid glob
    #[error("invalid serial pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Glob compilation error
        #[source]
        source: glob::PatternError,
    },
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;
