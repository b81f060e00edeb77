use crate::concurrency::CancelToken;
use crate::config::ReconcileConfig;
use crate::lifecycle::validate_transition;
use crate::locks::LockCoordinator;
use crate::planner::{Operation, OperationPlan, PlannedOperation};
use crate::retry::{await_task, retry, Budget};
use crate::CoreError;
use stratus_remote::{RemoteApi, RemoteError};
use stratus_schema::{AttrValue, LockLevel, ParentRef, ResourceId, ResourceKind, ScopeKey};
use stratus_store::{LifecycleState, ResourceInstance};
use tracing::{debug, info, warn};

/// Determine the lock scope guarding mutations of `instance`.
///
/// For [`LockLevel::Owner`] the parent is read: a VDC that participates in a
/// VDC group is locked through the group, so siblings spread over the group's
/// VDCs still serialize.
pub fn resolve_scope(
    remote: &dyn RemoteApi,
    budget: &Budget,
    instance: &ResourceInstance,
) -> Result<Option<ScopeKey>, CoreError> {
    let lock = instance.kind.descriptor().lock;
    if lock == LockLevel::None {
        return Ok(None);
    }
    let parent = instance
        .parent
        .as_ref()
        .ok_or_else(|| CoreError::MissingParent(instance.key.to_string()))?;
    if lock == LockLevel::Parent || parent.kind != ResourceKind::Vdc {
        return Ok(Some(parent.scope_key()));
    }
    let owner = retry(budget, &format!("read owner {}", parent.id), || {
        remote.read(&parent.id)
    })?;
    match owner.get("vdc_group_id").and_then(AttrValue::as_str) {
        Some(group) => {
            let scope = ParentRef::new(ResourceKind::VdcGroup, group).scope_key();
            debug!("{}: owner {} belongs to {scope}", instance.key, parent.id);
            Ok(Some(scope))
        }
        None => Ok(Some(parent.scope_key())),
    }
}

/// Drives an [`OperationPlan`] against the remote platform.
///
/// Operations run strictly in plan order under at most one lock scope. When
/// operation k > 0 fails, the earlier operations have taken effect remotely;
/// the observed state is re-read before `PartialFailure` is returned so the
/// next plan starts from the truth. If that read fails the instance is flagged
/// `needs_refresh` instead.
pub struct Executor<'a> {
    remote: &'a dyn RemoteApi,
    locks: &'a LockCoordinator,
    config: &'a ReconcileConfig,
    cancel: &'a CancelToken,
}

impl<'a> Executor<'a> {
    pub fn new(
        remote: &'a dyn RemoteApi,
        locks: &'a LockCoordinator,
        config: &'a ReconcileConfig,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            remote,
            locks,
            config,
            cancel,
        }
    }

    /// Execute `plan` for `instance`, updating its identity, observed state and
    /// lifecycle state in place. `on_applied` runs after each operation that
    /// took effect.
    pub fn execute(
        &self,
        instance: &mut ResourceInstance,
        plan: &OperationPlan,
        on_applied: &mut dyn FnMut(&PlannedOperation),
    ) -> Result<(), CoreError> {
        if plan.is_empty() {
            return Ok(());
        }
        let budget = Budget::start(self.config);
        let scope = if plan.requires_lock() {
            resolve_scope(self.remote, &budget, instance)?
        } else {
            None
        };
        let _token = match &scope {
            Some(s) => Some(self.locks.acquire_until(s, budget.deadline())?),
            None => None,
        };

        for (k, op) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("{}: cancelled before '{op}'", instance.key);
                if k > 0 {
                    self.reread(instance, &budget);
                }
                return Err(CoreError::Cancelled { completed: k });
            }
            debug!("{}: {op}", instance.key);
            if let Err(cause) = self.apply(instance, op, &budget) {
                if k == 0 {
                    return Err(cause);
                }
                warn!(
                    "{}: '{op}' failed after {k} applied operations: {cause}",
                    instance.key
                );
                let observed_stale = !self.reread(instance, &budget);
                return Err(CoreError::PartialFailure {
                    completed: k,
                    failed_operation: op.to_string(),
                    cause: Box::new(cause),
                    observed: instance.observed.clone(),
                    observed_stale,
                });
            }
            on_applied(op);
        }

        let in_place = plan.iter().any(|o| {
            matches!(
                o.operation,
                Operation::UpdateFields { .. } | Operation::Child { .. }
            )
        });
        if in_place {
            let id = require_id(instance)?;
            match retry(&budget, &format!("read {id}"), || self.remote.read(&id)) {
                Ok(attrs) => instance.observed = attrs,
                Err(e) => {
                    warn!("{}: read after {} operations failed: {e}", instance.key, plan.len());
                    instance.status.needs_refresh = true;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn call<T>(
        &self,
        op: &PlannedOperation,
        budget: &Budget,
        mut f: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, CoreError> {
        if op.retryable {
            retry(budget, &op.to_string(), f)
        } else {
            f().map_err(CoreError::from)
        }
    }

    /// Refresh `observed` after a failure. Returns false if the read failed;
    /// the previous observed state is kept and the instance flagged for
    /// refresh.
    fn reread(&self, instance: &mut ResourceInstance, budget: &Budget) -> bool {
        let Some(id) = instance.id().cloned() else {
            return false;
        };
        match retry(budget, &format!("re-read {id}"), || self.remote.read(&id)) {
            Ok(attrs) => {
                instance.observed = attrs;
                true
            }
            Err(e) => {
                warn!("{}: re-read after failure failed: {e}", instance.key);
                instance.status.needs_refresh = true;
                false
            }
        }
    }

    fn apply(
        &self,
        instance: &mut ResourceInstance,
        op: &PlannedOperation,
        budget: &Budget,
    ) -> Result<(), CoreError> {
        let remote = self.remote;
        let label = op.to_string();
        match &op.operation {
            Operation::Create {
                kind,
                parent,
                attributes,
            } => {
                let created = self.call(op, budget, || {
                    remote.create(*kind, parent.as_ref(), attributes)
                })?;
                // Persisted with the instance even if the task fails, so the
                // object is never orphaned.
                instance.assign_id(created.id.clone())?;
                if let Err(e) = await_task(remote, budget, created.task.as_ref(), &label) {
                    validate_transition(instance.status.state, LifecycleState::Tainted)?;
                    instance.status.state = LifecycleState::Tainted;
                    warn!("{}: creation of {} did not complete: {e}", instance.key, created.id);
                    return Err(e);
                }
                let read = retry(budget, &format!("read {}", created.id), || {
                    remote.read(&created.id)
                });
                if read.is_err() {
                    instance.status.needs_refresh = true;
                }
                instance.observed = read?;
                validate_transition(instance.status.state, LifecycleState::Live)?;
                instance.status.state = LifecycleState::Live;
                info!("{}: created {kind} {}", instance.key, created.id);
            }
            Operation::UpdateFields { group, attributes } => {
                let id = require_id(instance)?;
                let task = self.call(op, budget, || remote.update(&id, *group, attributes))?;
                await_task(remote, budget, task.as_ref(), &label)?;
            }
            Operation::Child { set, mutation } => {
                let id = require_id(instance)?;
                let task = self.call(op, budget, || remote.mutate_child(&id, set, mutation))?;
                await_task(remote, budget, task.as_ref(), &label)?;
            }
            Operation::Delete { policy } => {
                if let Some(id) = instance.id().cloned() {
                    let task = match self.call(op, budget, || remote.delete(&id, *policy)) {
                        Ok(task) => task,
                        Err(e) if e.is_not_found() => {
                            debug!("{}: {id} already gone", instance.key);
                            None
                        }
                        Err(e) => return Err(e),
                    };
                    await_task(remote, budget, task.as_ref(), &label)?;
                    info!("{}: deleted {id} ({policy})", instance.key);
                }
                validate_transition(instance.status.state, LifecycleState::Removed)?;
                instance.status.state = LifecycleState::Removed;
                instance.clear_identity();
            }
        }
        Ok(())
    }
}

fn require_id(instance: &ResourceInstance) -> Result<ResourceId, CoreError> {
    instance
        .id()
        .cloned()
        .ok_or_else(|| CoreError::NotFound(format!("{} has no remote identity", instance.key)))
}
