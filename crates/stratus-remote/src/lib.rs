//! Remote platform contract for stratus.
//!
//! This crate defines the boundary the reconciliation core talks to: the
//! `RemoteApi` trait (create/read/update/delete/query plus asynchronous task
//! polling), classified `RemoteError`s, and `SandboxPlatform`, an in-memory
//! implementation with fault injection and JSON snapshots used by tests and by
//! the CLI for dry runs.

pub mod api;
pub mod sandbox;

pub use api::{Created, DeletePolicy, QueryScope, RemoteApi, SummaryRecord, TaskStatus};
pub use sandbox::SandboxPlatform;

use thiserror::Error;

/// How the core must react to a remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The referenced object does not exist.
    NotFound,
    /// Transient; retry within the timeout budget.
    Retryable,
    Fatal,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object busy: {0}")]
    Busy(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("task {task} failed: {reason}")]
    TaskFailed { task: String, reason: String },
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RemoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::NotFound(_) => ErrorClass::NotFound,
            RemoteError::Busy(_) => ErrorClass::Retryable,
            RemoteError::Rejected(_)
            | RemoteError::Conflict(_)
            | RemoteError::TaskFailed { .. }
            | RemoteError::UnknownTask(_)
            | RemoteError::Io(_)
            | RemoteError::Serialization(_) => ErrorClass::Fatal,
        }
    }
}
