use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use stratus_schema::{
    Attributes, ParentRef, Resource, ResourceId, ResourceKey, ResourceKind, ResourceSpec,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecycleState {
    /// `desired` is set; no remote object is known.
    PendingCreate,
    /// Created and awaited; `id` and `observed` are populated.
    Live,
    /// The remote accepted the create but its task failed. The object may exist
    /// in a broken state and must be destroyed before it is created again.
    Tainted,
    /// Deleted remotely; the record is about to be discarded.
    Removed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::PendingCreate => write!(f, "pending-create"),
            LifecycleState::Live => write!(f, "live"),
            LifecycleState::Tainted => write!(f, "tainted"),
            LifecycleState::Removed => write!(f, "removed"),
        }
    }
}

/// Classification of the last error a reconciliation of this instance hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AmbiguousMatch,
    RequiresReplacement,
    PartialFailure,
    LockTimeout,
    Timeout,
    ConflictingLockScopes,
    InvalidChildSet,
    Cancelled,
    Remote,
    Invalid,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::AmbiguousMatch => "ambiguous-match",
            ErrorKind::RequiresReplacement => "requires-replacement",
            ErrorKind::PartialFailure => "partial-failure",
            ErrorKind::LockTimeout => "lock-timeout",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConflictingLockScopes => "conflicting-lock-scopes",
            ErrorKind::InvalidChildSet => "invalid-child-set",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Remote => "remote",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// What the operator surface reports for an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceStatus {
    pub state: LifecycleState,
    #[serde(default)]
    pub last_error: Option<ErrorKind>,
    #[serde(default)]
    pub last_error_message: Option<String>,
    /// Immutable attributes whose change blocked the last plan.
    #[serde(default)]
    pub replacement: Vec<String>,
    /// The remote object disappeared out of band; re-creation needs operator
    /// consent.
    #[serde(default)]
    pub vanished: bool,
    /// A plan was interrupted; `observed` must be re-read before planning.
    #[serde(default)]
    pub needs_refresh: bool,
}

impl InstanceStatus {
    pub fn requires_replacement(&self) -> bool {
        !self.replacement.is_empty()
    }
}

/// One managed object: operator intent plus the last state read remotely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceInstance {
    pub key: ResourceKey,
    pub kind: ResourceKind,
    id: Option<ResourceId>,
    pub desired: ResourceSpec,
    #[serde(default)]
    pub observed: Attributes,
    #[serde(default)]
    pub parent: Option<ParentRef>,
    pub status: InstanceStatus,
    pub updated_at: String,
}

impl ResourceInstance {
    pub fn new(key: ResourceKey, desired: ResourceSpec) -> Self {
        Self {
            key,
            kind: desired.kind(),
            id: None,
            parent: desired.parent(),
            desired,
            observed: Attributes::new(),
            status: InstanceStatus {
                state: LifecycleState::PendingCreate,
                last_error: None,
                last_error_message: None,
                replacement: Vec::new(),
                vanished: false,
                needs_refresh: false,
            },
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[inline]
    pub fn id(&self) -> Option<&ResourceId> {
        self.id.as_ref()
    }

    /// Record the remote identifier. An id, once set, never changes.
    pub fn assign_id(&mut self, id: ResourceId) -> Result<(), StoreError> {
        match &self.id {
            Some(existing) if *existing != id => Err(StoreError::IdReassigned {
                key: self.key.to_string(),
                existing: existing.to_string(),
                requested: id.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    /// Forget the remote identity after the object was found missing.
    pub fn clear_identity(&mut self) {
        self.id = None;
        self.observed.clear();
    }

    /// Replace operator intent. The kind of an instance is fixed.
    pub fn set_desired(&mut self, desired: ResourceSpec) -> Result<(), StoreError> {
        if desired.kind() != self.kind {
            return Err(StoreError::KindChanged {
                key: self.key.to_string(),
                kind: self.kind.to_string(),
                requested: desired.kind().to_string(),
            });
        }
        self.parent = desired.parent();
        self.desired = desired;
        Ok(())
    }

    pub fn record_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.status.last_error = Some(kind);
        self.status.last_error_message = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.status.last_error = None;
        self.status.last_error_message = None;
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}
