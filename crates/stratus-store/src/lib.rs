//! Desired/observed state storage for stratus.
//!
//! This crate provides the storage layer: the `ResourceInstance` record with
//! its lifecycle status, the `StateStore` trait with an in-memory and a
//! checksummed file-backed implementation, `StoreLayout` for directory
//! structure and format versioning, and the `PlanJournal` write-ahead log used
//! to detect reconciliations interrupted mid-plan.

pub mod instance;
pub mod journal;
pub mod layout;
pub mod state;

pub use instance::{ErrorKind, InstanceStatus, LifecycleState, ResourceInstance};
pub use journal::{JournalEntry, PlanJournal};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use state::{
    legacy_metadata_view, validate_key, FileStateStore, MemoryStateStore, StateStore,
};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for instance '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("instance not found: {0}")]
    InstanceNotFound(String),
    #[error("journal entry not found: {0}")]
    JournalEntryNotFound(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid resource key: {0}")]
    InvalidKey(String),
    #[error("instance '{key}' already has id {existing}; refusing to reassign to {requested}")]
    IdReassigned {
        key: String,
        existing: String,
        requested: String,
    },
    #[error("instance '{key}' is {kind}, desired state declares {requested}")]
    KindChanged {
        key: String,
        kind: String,
        requested: String,
    },
}
