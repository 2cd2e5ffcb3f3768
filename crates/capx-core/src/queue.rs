//! Trigger-driven background mirror queue
//!
//! A single-consumer pending set fed by `CapsuleStore::notify_changed`.
//! The drain loop is cooperative: an empty set yields to the runtime
//! (never a timed sleep) and re-checks; a non-empty set is swapped out
//! atomically and processed as one batch. Entries queued during a drain
//! defer to the next pass; no ordering is guaranteed within a pass.
//!
//! Failures are per-entry and non-fatal: there is no failed terminal
//! state, and one bad path never stops its siblings or the loop. The
//! queue may re-mirror a file a foreground caller is rewriting at the
//! same moment; last-write-wins is accepted and documented rather than
//! locked away.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::StorageError;
use crate::mirror;
use crate::store::CapsuleStore;
use crate::transform::Payload;
use crate::Result;

const STATE_IDLE: u8 = 0;
const STATE_DRAINING: u8 = 1;

/// Drain-loop state. Errors are per-entry; the loop itself never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Draining,
}

/// Deduplicating, single-consumer re-synchronization queue.
#[derive(Debug, Default)]
pub struct MirrorQueue {
    pending: Mutex<HashSet<PathBuf>>,
    state: AtomicU8,
    shutdown: AtomicBool,
}

impl MirrorQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a path for re-mirroring. Returns `false` when the path was
    /// already pending (duplicate enqueues collapse into one attempt).
    pub fn enqueue(&self, path: impl Into<PathBuf>) -> bool {
        self.lock_pending().insert(path.into())
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    #[must_use]
    pub fn state(&self) -> QueueState {
        if self.state.load(Ordering::Acquire) == STATE_DRAINING {
            QueueState::Draining
        } else {
            QueueState::Idle
        }
    }

    /// Ask the drain loop to stop after its current pass. Production
    /// deployments never call this; embedders and tests do.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Perpetual cooperative drain loop. Runs until shutdown is requested.
    pub async fn drain_loop(&self, store: &CapsuleStore) {
        while !self.is_shutdown() {
            if self.drain_once(store) == 0 {
                // Trigger-driven: yield to the runtime, never a timed sleep.
                tokio::task::yield_now().await;
            }
        }
        debug!("mirror loop stopped");
    }

    /// Swap out and process one batch. Returns how many entries were
    /// attempted (zero when the queue was empty).
    pub fn drain_once(&self, store: &CapsuleStore) -> usize {
        let batch: Vec<PathBuf> = {
            let mut pending = self.lock_pending();
            if pending.is_empty() {
                return 0;
            }
            pending.drain().collect()
        };

        self.state.store(STATE_DRAINING, Ordering::Release);
        for path in &batch {
            if let Err(err) = self.process_entry(store, path) {
                warn!(path = %path.display(), error = %err, "live mirror failed");
            }
        }
        self.state.store(STATE_IDLE, Ordering::Release);
        batch.len()
    }

    fn process_entry(&self, store: &CapsuleStore, path: &Path) -> Result<()> {
        let config = store.config();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let is_capsule = path.extension().and_then(|e| e.to_str())
            == Some(config.capsule_extension.as_str());

        // Capsule files get the full pipeline: Align, Fold, mirrored
        // write, then one more Align as a post-write indexing pass. The
        // protected primary brain is transform-exempt but still mirrored,
        // raw, so a maintenance pass always refreshes its backup copy.
        if is_capsule {
            if name == config.primary_capsule {
                let raw = read_entry(path)?;
                mirror::write_mirrored(path, &store.backup_path(path), &raw)?;
                debug!(path = %path.display(), "updated primary capsule raw mirror");
                return Ok(());
            }

            let raw = read_entry(path)?;
            let pipeline = store.pipeline();
            let aligned = pipeline.align(Payload::Bytes(raw));
            let folded = pipeline.fold(aligned);
            let bytes = folded.into_bytes().unwrap_or_default();

            let backup = store.backup_path(path);
            mirror::write_mirrored(path, &backup, &bytes)?;
            let _ = pipeline.align(Payload::Bytes(bytes));

            store.run_maintenance_hook(path);
            debug!(path = %path.display(), "updated capsule mirror");
            return Ok(());
        }

        // The interface script is mirrored raw, no transform.
        if name == config.interface_script {
            let raw = read_entry(path)?;
            mirror::write_mirrored(path, &store.backup_path(path), &raw)?;
            debug!(path = %path.display(), "updated interface script raw mirror");
            return Ok(());
        }

        warn!(path = %path.display(), "ignored path (not watched)");
        Ok(())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_entry(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| {
        StorageError::Read {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::transform::PAD_MARKER;

    fn store() -> (tempfile::TempDir, CapsuleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CapsuleStore::open(StoreConfig::rooted_at(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn duplicate_enqueue_is_one_attempt() {
        let (dir, store) = store();
        let path = dir.path().join("sess.x");
        std::fs::write(&path, b"row\n").unwrap();

        let queue = store.queue();
        assert!(queue.enqueue(&path));
        assert!(!queue.enqueue(&path));
        assert_eq!(queue.pending_len(), 1);

        assert_eq!(queue.drain_once(&store), 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn capsule_entry_is_transformed_and_mirrored() {
        let (dir, store) = store();
        let path = dir.path().join("sess.x");
        std::fs::write(&path, b"row\n").unwrap();

        let queue = store.queue();
        queue.enqueue(&path);
        queue.drain_once(&store);

        // Align then Fold each stamp one pad marker.
        let mut expected = b"row\n".to_vec();
        expected.extend_from_slice(&PAD_MARKER);
        expected.extend_from_slice(&PAD_MARKER);

        assert_eq!(std::fs::read(&path).unwrap(), expected);
        assert_eq!(std::fs::read(store.backup_path(&path)).unwrap(), expected);
    }

    #[test]
    fn primary_brain_is_mirrored_raw_never_transformed() {
        let (dir, store) = store();
        let path = dir.path().join("brain.x");
        std::fs::write(&path, b"protected").unwrap();

        let queue = store.queue();
        queue.enqueue(&path);
        queue.drain_once(&store);

        // No pad stamps, but the backup copy is refreshed.
        assert_eq!(std::fs::read(&path).unwrap(), b"protected");
        assert_eq!(
            std::fs::read(store.backup_path(&path)).unwrap(),
            b"protected"
        );
    }

    #[test]
    fn interface_script_is_mirrored_raw() {
        let (dir, store) = store();
        let path = dir.path().join("ui.js");
        std::fs::write(&path, b"console.log('ui')").unwrap();

        let queue = store.queue();
        queue.enqueue(&path);
        queue.drain_once(&store);

        assert_eq!(std::fs::read(&path).unwrap(), b"console.log('ui')");
        assert_eq!(
            std::fs::read(store.backup_path(&path)).unwrap(),
            b"console.log('ui')"
        );
    }

    #[test]
    fn maintenance_hook_fires_when_a_capsule_is_re_mirrored() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        use crate::store::MaintenanceHooks;

        let dir = tempfile::tempdir().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = Arc::clone(&count);
        let hooks = MaintenanceHooks {
            on_maintain: Some(Box::new(move |_| {
                hook_count.fetch_add(1, Ordering::SeqCst);
            })),
        };
        let store =
            CapsuleStore::with_hooks(StoreConfig::rooted_at(dir.path()), hooks).unwrap();

        let capsule = dir.path().join("sess.x");
        let script = dir.path().join("ui.js");
        std::fs::write(&capsule, b"row\n").unwrap();
        std::fs::write(&script, b"js").unwrap();

        let queue = store.queue();
        queue.enqueue(&capsule);
        queue.enqueue(&script);
        assert_eq!(queue.drain_once(&store), 2);

        // Only the transformed capsule dispatches the hook; the raw
        // interface-script mirror does not.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unwatched_paths_are_ignored() {
        let (dir, store) = store();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"nope").unwrap();

        let queue = store.queue();
        queue.enqueue(&path);
        assert_eq!(queue.drain_once(&store), 1);
        assert!(!store.backup_path(&path).exists());
    }

    #[test]
    fn entry_failure_does_not_abort_the_batch() {
        let (dir, store) = store();
        let missing = dir.path().join("ghost.x");
        let good = dir.path().join("sess.x");
        std::fs::write(&good, b"row\n").unwrap();

        let queue = store.queue();
        queue.enqueue(&missing);
        queue.enqueue(&good);
        assert_eq!(queue.drain_once(&store), 2);

        // The good sibling was mirrored despite the failure.
        assert!(store.backup_path(&good).exists());
        assert!(!missing.exists());
    }

    #[test]
    fn entries_queued_during_a_drain_defer_to_the_next_pass() {
        let (dir, store) = store();
        let first = dir.path().join("a.x");
        std::fs::write(&first, b"a\n").unwrap();

        let queue = store.queue();
        queue.enqueue(&first);
        assert_eq!(queue.drain_once(&store), 1);

        let second = dir.path().join("b.x");
        std::fs::write(&second, b"b\n").unwrap();
        queue.enqueue(&second);
        assert_eq!(queue.drain_once(&store), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_loop_processes_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::rooted_at(dir.path());
        let store = std::sync::Arc::new(CapsuleStore::open(config).unwrap());

        let path = dir.path().join("sess.x");
        std::fs::write(&path, b"row\n").unwrap();

        let handle = store.spawn_mirror_loop();
        store.notify_changed(&path);

        let backup = store.backup_path(&path);
        for _ in 0..200 {
            if backup.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(backup.exists());

        store.queue().request_shutdown();
        handle.await.unwrap();
        assert_eq!(store.queue().state(), QueueState::Idle);
    }
}
