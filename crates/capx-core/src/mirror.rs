//! Mirrored dual-write persistence
//!
//! Writes identical content to a primary and a backup location. There is
//! no cross-write atomicity: a crash between the two writes leaves the
//! backup stale until the next completed write. This is the store's
//! documented weak-durability trade-off: availability over strict
//! consistency. Callers decide whether a failure aborts their operation;
//! the store's default policy is log-and-continue.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::error::StorageError;
use crate::Result;

/// Write `content` to both `primary` and `backup`, creating parent
/// directories as needed. Primary is written first.
pub fn write_mirrored(primary: &Path, backup: &Path, content: &[u8]) -> Result<()> {
    ensure_parent(primary, "primary")?;
    ensure_parent(backup, "backup")?;

    std::fs::write(primary, content).map_err(|source| StorageError::Mirror {
        side: "primary",
        path: primary.to_path_buf(),
        source,
    })?;
    std::fs::write(backup, content).map_err(|source| StorageError::Mirror {
        side: "backup",
        path: backup.to_path_buf(),
        source,
    })?;

    debug!(
        primary = %primary.display(),
        backup = %backup.display(),
        bytes = content.len(),
        "synchronized write"
    );
    Ok(())
}

/// Keep a raw timestamped copy of `path` under `backup_dir`, named
/// `<stem>_raw_<YYYYmmddHHMMSS>.bak`. This is the only before-the-pipeline
/// snapshot the system takes; the transform stages have no inverse.
pub fn snapshot_raw(path: &Path, backup_dir: &Path) -> Result<PathBuf> {
    let raw = std::fs::read(path).map_err(|source| StorageError::Snapshot {
        path: path.to_path_buf(),
        source,
    })?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("capsule");
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let dest = backup_dir.join(format!("{stem}_raw_{stamp}.bak"));

    std::fs::create_dir_all(backup_dir).map_err(|source| StorageError::Snapshot {
        path: dest.clone(),
        source,
    })?;
    std::fs::write(&dest, &raw).map_err(|source| StorageError::Snapshot {
        path: dest.clone(),
        source,
    })?;

    debug!(source = %path.display(), snapshot = %dest.display(), "raw snapshot kept");
    Ok(dest)
}

fn ensure_parent(path: &Path, side: &'static str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Mirror {
                side,
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_hold_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("creator.x");
        let backup = dir.path().join("sysbackup/creator.x.bak");

        write_mirrored(&primary, &backup, b"k || v\n").unwrap();

        assert_eq!(std::fs::read(&primary).unwrap(), b"k || v\n");
        assert_eq!(std::fs::read(&backup).unwrap(), b"k || v\n");
    }

    #[test]
    fn parent_directories_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("deep/nested/a.x");
        let backup = dir.path().join("mirror/deep/a.x.bak");

        write_mirrored(&primary, &backup, b"data").unwrap();
        assert!(primary.exists());
        assert!(backup.exists());
    }

    #[test]
    fn rewrite_replaces_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("a.x");
        let backup = dir.path().join("a.x.bak");

        write_mirrored(&primary, &backup, b"first").unwrap();
        write_mirrored(&primary, &backup, b"second").unwrap();

        assert_eq!(std::fs::read(&primary).unwrap(), b"second");
        assert_eq!(std::fs::read(&backup).unwrap(), b"second");
    }

    #[test]
    fn snapshot_carries_raw_infix_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("brain.x");
        std::fs::write(&source, b"original bytes").unwrap();

        let dest = snapshot_raw(&source, &dir.path().join("sysbackup")).unwrap();
        let name = dest.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("brain_raw_"));
        assert!(name.ends_with(".bak"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"original bytes");
    }

    #[test]
    fn snapshot_of_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ghost.x");
        assert!(snapshot_raw(&missing, dir.path()).is_err());
    }
}
