//! CapsuleStore: the collaborator-facing storage facade
//!
//! Chat logic, the UI layer, and the module puller all consume the store
//! through this narrow interface: load/save capsules, record-table
//! operations (see `table`), blob records, and change notifications that
//! feed the mirror queue. Every durable write goes through the mirrored
//! writer; nothing here writes a bare single location.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::capsule::{resolve_identifier, Capsule};
use crate::config::StoreConfig;
use crate::mirror;
use crate::queue::MirrorQueue;
use crate::transform::{SymbolSet, TransformPipeline, PAD_MARKER};
use crate::Result;

/// Optional capabilities injected at open time. Collaborators that want
/// to react to background maintenance register callbacks here.
#[derive(Default)]
pub struct MaintenanceHooks {
    /// Called after the mirror queue re-mirrors a capsule file.
    pub on_maintain: Option<Box<dyn Fn(&Path) + Send + Sync>>,
}

impl fmt::Debug for MaintenanceHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceHooks")
            .field("on_maintain", &self.on_maintain.is_some())
            .finish()
    }
}

/// Single-writer, append-oriented flat-file record store with a mirrored
/// backup copy. Owns the shared symbol set, the transform pipeline, and
/// the mirror queue handle.
pub struct CapsuleStore {
    config: StoreConfig,
    pipeline: TransformPipeline,
    queue: Arc<MirrorQueue>,
    hooks: MaintenanceHooks,
}

impl fmt::Debug for CapsuleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapsuleStore")
            .field("config", &self.config)
            .field("pending_mirrors", &self.queue.pending_len())
            .finish()
    }
}

impl CapsuleStore {
    /// Open a store, creating its root and backup directories.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::with_hooks(config, MaintenanceHooks::default())
    }

    /// Open a store with injected maintenance capabilities.
    pub fn with_hooks(config: StoreConfig, hooks: MaintenanceHooks) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.root)?;
        std::fs::create_dir_all(config.backup_dir())?;
        info!(
            root = %config.root.display(),
            backup = %config.backup_dir().display(),
            "capsule store opened"
        );

        let symbols = Arc::new(Mutex::new(SymbolSet::with_default_alphabet()));
        Ok(Self {
            config,
            pipeline: TransformPipeline::new(symbols),
            queue: Arc::new(MirrorQueue::new()),
            hooks,
        })
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Shared symbol set handle (append-only, grows as payloads flow).
    #[must_use]
    pub fn symbols(&self) -> Arc<Mutex<SymbolSet>> {
        self.pipeline.symbols()
    }

    #[must_use]
    pub(crate) fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    /// The mirror queue fed by `notify_changed`.
    #[must_use]
    pub fn queue(&self) -> Arc<MirrorQueue> {
        Arc::clone(&self.queue)
    }

    /// Resolve an identifier to its primary on-disk path.
    #[must_use]
    pub fn capsule_path(&self, identifier: &str) -> PathBuf {
        resolve_identifier(&self.config.root, &self.config.capsule_extension, identifier)
    }

    /// Backup location for a primary path: same file name under the backup
    /// directory, with `.bak` appended.
    #[must_use]
    pub fn backup_path(&self, primary: &Path) -> PathBuf {
        let name = primary
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("capsule");
        self.config.backup_dir().join(format!("{name}.bak"))
    }

    /// Load a capsule, yielding an empty payload when none exists yet.
    pub fn load_capsule(&self, identifier: &str) -> Result<Capsule> {
        Capsule::from_disk(identifier, &self.capsule_path(identifier))
    }

    /// Persist a capsule's payload through the mirrored writer. Durable
    /// capsules are never written to a single location.
    pub fn save_capsule(&self, capsule: &Capsule) -> Result<()> {
        let primary = self.capsule_path(capsule.identifier());
        let backup = self.backup_path(&primary);
        mirror::write_mirrored(&primary, &backup, capsule.payload())
    }

    /// Full-rewrite helper used by the record-table operations.
    pub(crate) fn rewrite(&self, identifier: &str, payload: &[u8]) -> Result<()> {
        let mut capsule = Capsule::new(identifier);
        capsule.set_payload(payload.to_vec());
        self.save_capsule(&capsule)
    }

    /// Queue a path for asynchronous re-mirroring. Idempotent under
    /// duplicate notification.
    pub fn notify_changed(&self, path: impl Into<PathBuf>) {
        self.queue.enqueue(path);
    }

    /// Spawn the perpetual mirror drain loop on the current tokio runtime.
    pub fn spawn_mirror_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let queue = store.queue();
        tokio::spawn(async move { queue.drain_loop(&store).await })
    }

    /// Startup maintenance: queue every capsule file directly under the
    /// store root for re-mirroring, so files touched while the process was
    /// down get synchronized. Returns how many paths were newly queued.
    pub fn enqueue_existing(&self) -> Result<usize> {
        let mut queued = 0;
        for entry in std::fs::read_dir(&self.config.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str())
                == Some(self.config.capsule_extension.as_str())
                && self.queue.enqueue(path)
            {
                queued += 1;
            }
        }
        debug!(queued, "startup maintenance pass queued capsules");
        Ok(queued)
    }

    /// Keep a raw timestamped snapshot of a capsule's current bytes in the
    /// backup directory. Returns `None` when the capsule has no file yet.
    pub fn snapshot_raw(&self, identifier: &str) -> Result<Option<PathBuf>> {
        let primary = self.capsule_path(identifier);
        if !primary.exists() {
            return Ok(None);
        }
        mirror::snapshot_raw(&primary, &self.config.backup_dir()).map(Some)
    }

    /// Append a pad-delimited blob record (`key PAD payload PAD`) to a
    /// capsule and persist it. The pad marker acts as the record boundary
    /// here, a distinct usage from the record-table row separator.
    pub fn append_blob(&self, identifier: &str, key: &str, raw: &[u8]) -> Result<()> {
        let mut capsule = self.load_capsule(identifier)?;
        let mut payload = capsule.payload().to_vec();
        payload.extend_from_slice(key.as_bytes());
        payload.extend_from_slice(&PAD_MARKER);
        payload.extend_from_slice(raw);
        payload.extend_from_slice(&PAD_MARKER);
        capsule.set_payload(payload);
        self.save_capsule(&capsule)?;
        debug!(identifier, key, "blob record appended");
        Ok(())
    }

    /// Split a capsule's payload on the pad marker, dropping blank
    /// segments. Yields keys and payloads interleaved, in append order.
    pub fn read_blobs(&self, identifier: &str) -> Result<Vec<Vec<u8>>> {
        let capsule = self.load_capsule(identifier)?;
        let raw = capsule.payload();
        let mut segments = Vec::new();
        let mut start = 0;
        for hit in memchr::memmem::find_iter(raw, &PAD_MARKER) {
            push_segment(&mut segments, &raw[start..hit]);
            start = hit + PAD_MARKER.len();
        }
        push_segment(&mut segments, &raw[start..]);
        Ok(segments)
    }

    /// Delete non-essential capsule files from a module staging directory
    /// (pulled-module scratch space). Essential capsules are never removed
    /// regardless of where they appear. Returns the deleted file names.
    pub fn clean_module_capsules(&self, dir: &Path) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_capsule = path.extension().and_then(|e| e.to_str())
                == Some(self.config.capsule_extension.as_str());
            if !is_capsule {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if self.config.essential_capsules.iter().any(|e| e == name) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed.push(name.to_string()),
                Err(err) => warn!(path = %path.display(), error = %err, "failed to delete capsule"),
            }
        }
        debug!(count = removed.len(), "module capsule cleanup pass");
        Ok(removed)
    }

    pub(crate) fn run_maintenance_hook(&self, path: &Path) {
        if let Some(hook) = &self.hooks.on_maintain {
            hook(path);
        }
    }
}

fn push_segment(segments: &mut Vec<Vec<u8>>, segment: &[u8]) {
    if !segment.iter().all(u8::is_ascii_whitespace) {
        segments.push(segment.to_vec());
    }
}
