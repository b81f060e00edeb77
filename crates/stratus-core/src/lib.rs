//! Reconciliation core for stratus.
//!
//! This crate ties together the resource schema, the state store and the remote
//! API into the `Reconciler`: the central API for planning, applying,
//! refreshing, importing and destroying managed objects. It provides identity
//! resolution, the mutation planner and child-collection synchronizer, the
//! per-scope lock coordinator, retry and task-await combinators, the
//! sequential plan executor, lifecycle validation and drift reporting.

pub mod concurrency;
pub mod config;
pub mod drift;
pub mod executor;
pub mod lifecycle;
pub mod locks;
pub mod planner;
pub mod reconciler;
pub mod resolver;
pub mod retry;
pub mod sync;

pub use concurrency::{install_signal_handler, CancelToken, StoreLock};
pub use config::{ConfigError, ReconcileConfig, MAX_TIMEOUT_SECS};
pub use drift::{diff_observed, DriftReport};
pub use executor::{resolve_scope, Executor};
pub use lifecycle::validate_transition;
pub use locks::{LockCoordinator, LockToken};
pub use planner::{plan, plan_delete, plan_instance, Operation, OperationPlan, PlannedOperation};
pub use reconciler::{ApplyOptions, ApplyReport, Reconciler, StatusReport};
pub use resolver::Resolver;
pub use retry::{await_task, retry, Budget};
pub use sync::synchronize;

use stratus_remote::{ErrorClass, RemoteError};
use stratus_schema::{Attributes, ResourceKind, SchemaError, ScopeKey};
use stratus_store::{ErrorKind, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("ambiguous match: {}", .names.join(", "))]
    AmbiguousMatch { names: Vec<String> },
    #[error(
        "{kind} requires replacement, immutable attributes changed: {}",
        .attributes.join(", ")
    )]
    RequiresReplacement {
        kind: ResourceKind,
        attributes: Vec<String>,
    },
    #[error("'{failed_operation}' failed after {completed} applied operations: {cause}")]
    PartialFailure {
        completed: usize,
        failed_operation: String,
        cause: Box<CoreError>,
        /// State re-read after the failure.
        observed: Attributes,
        /// The re-read itself failed; `observed` is the last state known.
        observed_stale: bool,
    },
    #[error("timed out waiting for lock on {scope}")]
    LockTimeout { scope: ScopeKey },
    #[error("timed out: {operation}")]
    Timeout { operation: String },
    #[error("{kind} would move from lock scope {from} to {to}; a plan may lock only one scope")]
    ConflictingLockScopes {
        kind: ResourceKind,
        from: String,
        to: String,
    },
    #[error("lock on {requested} requested while holding {held}")]
    NestedLock { held: ScopeKey, requested: ScopeKey },
    #[error("invalid {set}: {reason}")]
    InvalidChildSet { set: String, reason: String },
    #[error("cancelled after {completed} applied operations")]
    Cancelled { completed: usize },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("instance '{0}' is tainted; destroy it before applying again")]
    Tainted(String),
    #[error("remote object of '{0}' vanished; re-creating it requires --allow-recreate")]
    Vanished(String),
    #[error("instance '{0}' has no parent to lock")]
    MissingParent(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Tag recorded as the instance's last error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Schema(_) | CoreError::Config(_) | CoreError::MissingParent(_) => {
                ErrorKind::Invalid
            }
            CoreError::Store(_) | CoreError::InvalidTransition { .. } | CoreError::Io(_) => {
                ErrorKind::Internal
            }
            CoreError::Remote(e) => match e.class() {
                ErrorClass::NotFound => ErrorKind::NotFound,
                ErrorClass::Retryable | ErrorClass::Fatal => ErrorKind::Remote,
            },
            CoreError::NotFound(_) | CoreError::Vanished(_) => ErrorKind::NotFound,
            CoreError::AmbiguousMatch { .. } => ErrorKind::AmbiguousMatch,
            CoreError::RequiresReplacement { .. } | CoreError::Tainted(_) => {
                ErrorKind::RequiresReplacement
            }
            CoreError::PartialFailure { .. } => ErrorKind::PartialFailure,
            CoreError::LockTimeout { .. } => ErrorKind::LockTimeout,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::ConflictingLockScopes { .. } | CoreError::NestedLock { .. } => {
                ErrorKind::ConflictingLockScopes
            }
            CoreError::InvalidChildSet { .. } => ErrorKind::InvalidChildSet,
            CoreError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            CoreError::NotFound(_) => true,
            CoreError::Remote(e) => e.class() == ErrorClass::NotFound,
            _ => false,
        }
    }
}
