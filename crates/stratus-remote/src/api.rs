use crate::RemoteError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use stratus_schema::{
    Attributes, ChildMutation, ParentRef, ResourceId, ResourceKind, TaskId, UpdateGroup,
};

/// Result of a create call. The id is not stable until `task` (if any) has
/// completed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: ResourceId,
    pub task: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed(String),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Destructive behaviour of a delete. Both fields are required; there is no
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePolicy {
    /// Delete regardless of the object's current state (e.g. powered on).
    pub force: bool,
    /// Also delete contained objects.
    pub recursive: bool,
}

impl fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "force={} recursive={}", self.force, self.recursive)
    }
}

/// Server-side narrowing of a query. Everything else is filtered by the
/// caller on the returned summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryScope {
    pub parent: Option<ResourceId>,
    pub name: Option<String>,
}

/// Short listing entry returned by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
    pub parent: Option<ResourceId>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// The remote platform as seen by the reconciliation core.
///
/// Every mutating call may return a task handle; the caller must poll
/// [`task_status`](Self::task_status) until it is terminal before treating the
/// change as applied.
pub trait RemoteApi: Send + Sync {
    fn create(
        &self,
        kind: ResourceKind,
        parent: Option<&ParentRef>,
        attributes: &Attributes,
    ) -> Result<Created, RemoteError>;

    fn read(&self, id: &ResourceId) -> Result<Attributes, RemoteError>;

    /// Apply the attributes of one update group through its endpoint.
    fn update(
        &self,
        id: &ResourceId,
        group: UpdateGroup,
        attributes: &Attributes,
    ) -> Result<Option<TaskId>, RemoteError>;

    fn mutate_child(
        &self,
        id: &ResourceId,
        set: &str,
        mutation: &ChildMutation,
    ) -> Result<Option<TaskId>, RemoteError>;

    fn delete(&self, id: &ResourceId, policy: DeletePolicy)
        -> Result<Option<TaskId>, RemoteError>;

    /// Objects of `kind` within `scope`, in creation order.
    fn query(&self, kind: ResourceKind, scope: &QueryScope)
        -> Result<Vec<SummaryRecord>, RemoteError>;

    fn task_status(&self, task: &TaskId) -> Result<TaskStatus, RemoteError>;
}
