//! Error types for capx-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for capx-core
#[derive(Error, Debug)]
pub enum Error {
    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Runtime errors (logging init, task failures)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Errors from the capsule store and mirrored writer
#[derive(Error, Debug)]
pub enum StorageError {
    /// A capsule file could not be read
    #[error("failed to read capsule {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One side of a mirrored write failed. The other side may have
    /// completed, leaving primary and backup divergent until the next
    /// successful write.
    #[error("mirrored write failed ({side}) for {path}: {source}")]
    Mirror {
        /// Which side failed ("primary" or "backup")
        side: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A backup snapshot could not be created
    #[error("failed to snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A config value failed validation
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_converts_to_error() {
        let err: Error = StorageError::Read {
            path: PathBuf::from("brain.x"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
        .into();
        assert!(err.to_string().contains("brain.x"));
    }

    #[test]
    fn mirror_error_names_failed_side() {
        let err = StorageError::Mirror {
            side: "backup",
            path: PathBuf::from("sysbackup/creator.x.bak"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = err.to_string();
        assert!(text.contains("backup"));
        assert!(text.contains("creator.x.bak"));
    }
}
