//! Configuration for the capsule store
//!
//! Handles loading and validation of capx.toml configuration files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::Result;

/// Capsule store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the primary capsule files
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Directory holding the mirrored backup copies. Relative paths are
    /// resolved against `root`.
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,

    /// Capsule file extension, without the dot
    #[serde(default = "default_capsule_extension")]
    pub capsule_extension: String,

    /// The protected primary-brain capsule. The mirror queue never
    /// re-transforms this file.
    #[serde(default = "default_primary_capsule")]
    pub primary_capsule: String,

    /// The distinguished interface-script artifact, mirrored raw
    #[serde(default = "default_interface_script")]
    pub interface_script: String,

    /// Core capsules that must never be deleted by maintenance
    #[serde(default = "default_essential_capsules")]
    pub essential_capsules: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            backup_root: default_backup_root(),
            capsule_extension: default_capsule_extension(),
            primary_capsule: default_primary_capsule(),
            interface_script: default_interface_script(),
            essential_capsules: default_essential_capsules(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("sysbackup")
}

fn default_capsule_extension() -> String {
    "x".to_string()
}

fn default_primary_capsule() -> String {
    "brain.x".to_string()
}

fn default_interface_script() -> String {
    "ui.js".to_string()
}

fn default_essential_capsules() -> Vec<String> {
    vec![
        "brain.x".to_string(),
        "creator.x".to_string(),
        "sharedspace.x".to_string(),
    ]
}

impl StoreConfig {
    /// Build a config rooted at `root` with defaults for everything else.
    #[must_use]
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field contents.
    pub fn validate(&self) -> Result<()> {
        if self.capsule_extension.is_empty() || self.capsule_extension.starts_with('.') {
            return Err(ConfigError::Invalid(format!(
                "capsule_extension must be a bare extension, got '{}'",
                self.capsule_extension
            ))
            .into());
        }
        if self.primary_capsule.is_empty() {
            return Err(ConfigError::Invalid("primary_capsule must not be empty".to_string()).into());
        }
        Ok(())
    }

    /// Absolute-or-root-relative backup directory.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        if self.backup_root.is_absolute() {
            self.backup_root.clone()
        } else {
            self.root.join(&self.backup_root)
        }
    }
}
