//! Capsule: one named unit of persisted bytes
//!
//! A capsule's payload, once through the transform pipeline, is the
//! canonical stored form; there is no inverse step. Reconstructing
//! "original" data is only possible from raw snapshots the caller kept
//! (see `store::CapsuleStore::snapshot_raw`).

use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::transform::FIELD_VECTOR;
use crate::Result;

/// Resolve a capsule identifier to a path under `root`.
///
/// An identifier lacking the conventional `.{extension}` suffix has it
/// appended; an empty identifier resolves to the bare default filename.
#[must_use]
pub fn resolve_identifier(root: &Path, extension: &str, identifier: &str) -> PathBuf {
    let suffix = format!(".{extension}");
    if identifier.is_empty() {
        return root.join(suffix);
    }
    if identifier.ends_with(&suffix) {
        root.join(identifier)
    } else {
        root.join(format!("{identifier}{suffix}"))
    }
}

/// An in-memory unit of stored data: identifier plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capsule {
    identifier: String,
    payload: Vec<u8>,
}

impl Capsule {
    /// New capsule with an empty payload.
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            payload: Vec::new(),
        }
    }

    /// Read a capsule from disk, yielding an empty payload when the file
    /// does not exist yet.
    pub(crate) fn from_disk(identifier: &str, path: &Path) -> Result<Self> {
        let payload = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(StorageError::Read {
                    path: path.to_path_buf(),
                    source,
                }
                .into());
            }
        };
        Ok(Self {
            identifier: identifier.to_string(),
            payload,
        })
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload. Does not persist; callers go through
    /// `CapsuleStore::save_capsule` explicitly.
    pub fn set_payload(&mut self, bytes: Vec<u8>) {
        self.payload = bytes;
    }

    /// The shared normalization descriptor attached to every capsule.
    #[must_use]
    pub fn field_vector(&self) -> &'static [u16; 5] {
        &FIELD_VECTOR
    }
}
