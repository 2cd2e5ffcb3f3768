//! capx-core: Core library for capX
//!
//! This crate provides the capsule storage subsystem for capX: a
//! flat-file, append/rewrite record store holding all persistent state
//! (conversation history, settings, arbitrary binary payloads), designed
//! to survive partial writes, concurrent background maintenance, and
//! ad-hoc external mutation of its files.
//!
//! # Architecture
//!
//! ```text
//! raw bytes → Transform Pipeline → Capsule payload
//!                                      ↓
//!                          Record Table Codec (log / keyed)
//!                                      ↓
//!                          Mirrored Writer (primary + backup)
//!                                      ↑
//!                   Mirror Queue ← notify_changed(path)
//! ```
//!
//! # Modules
//!
//! - `transform`: Align/Fold normalization stages and the shared symbol set
//! - `capsule`: named units of persisted bytes and identifier resolution
//! - `table`: record-table codec (newest-first log, keyed upsert table)
//! - `mirror`: dual-write persistence and raw snapshots
//! - `queue`: trigger-driven background re-mirroring
//! - `store`: the collaborator-facing `CapsuleStore` facade
//! - `config`: configuration management
//! - `logging`: structured logging setup
//! - `error`: error types
//!
//! # Durability contract
//!
//! The store prioritizes availability over strict consistency: after any
//! completed write, the backup copy is never missing content the primary
//! has, and vice versa. There is no cross-write atomicity, encryption,
//! checksumming, or multi-process locking.
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod capsule;
pub mod config;
pub mod error;
pub mod logging;
pub mod mirror;
pub mod queue;
pub mod store;
pub mod table;
pub mod transform;

pub use capsule::Capsule;
pub use config::StoreConfig;
pub use error::{ConfigError, Error, Result, StorageError};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use queue::{MirrorQueue, QueueState};
pub use store::{CapsuleStore, MaintenanceHooks};
pub use transform::{Payload, SymbolSet, TransformPipeline, FIELD_VECTOR, PAD_MARKER};

/// Crate version, from Cargo metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
