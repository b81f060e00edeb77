use crate::concurrency::CancelToken;
use crate::config::ReconcileConfig;
use crate::drift::{diff_observed, DriftReport};
use crate::executor::Executor;
use crate::lifecycle::validate_transition;
use crate::locks::LockCoordinator;
use crate::planner::{self, plan_delete, OperationPlan, PlannedOperation};
use crate::resolver::Resolver;
use crate::retry::{retry, Budget};
use crate::CoreError;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use stratus_remote::{DeletePolicy, QueryScope, RemoteApi};
use stratus_schema::{
    Attributes, ImportPath, Lookup, Resource, ResourceId, ResourceKey, ResourceKind, ResourceSpec,
};
use stratus_store::{
    ErrorKind, FileStateStore, LifecycleState, PlanJournal, ResourceInstance, StateStore,
    StoreError, StoreLayout,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Re-create an object that vanished remotely.
    pub allow_recreate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub key: String,
    /// Operations that took effect, in order.
    pub applied: Vec<String>,
    pub state: LifecycleState,
}

/// Everything the operator surface shows about one instance.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub key: String,
    pub kind: ResourceKind,
    pub id: Option<String>,
    pub state: LifecycleState,
    pub last_error: Option<ErrorKind>,
    pub last_error_message: Option<String>,
    pub requires_replacement: bool,
    pub replacement: Vec<String>,
    pub vanished: bool,
    pub needs_refresh: bool,
}

impl From<&ResourceInstance> for StatusReport {
    fn from(inst: &ResourceInstance) -> Self {
        Self {
            key: inst.key.to_string(),
            kind: inst.kind,
            id: inst.id().map(ToString::to_string),
            state: inst.status.state,
            last_error: inst.status.last_error,
            last_error_message: inst.status.last_error_message.clone(),
            requires_replacement: inst.status.requires_replacement(),
            replacement: inst.status.replacement.clone(),
            vanished: inst.status.vanished,
            needs_refresh: inst.status.needs_refresh,
        }
    }
}

/// Central reconciliation API.
///
/// Owns the state store, the remote platform handle and the process-wide lock
/// coordinator. Every entry point loads the instance, works on it in memory and
/// writes it back, error status included.
pub struct Reconciler {
    store: Arc<dyn StateStore>,
    remote: Arc<dyn RemoteApi>,
    journal: Option<PlanJournal>,
    locks: LockCoordinator,
    config: ReconcileConfig,
    cancel: CancelToken,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn StateStore>,
        remote: Arc<dyn RemoteApi>,
        config: ReconcileConfig,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            store,
            remote,
            journal: None,
            locks: LockCoordinator::new(),
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Open a file-backed store under `root`, creating it if needed.
    ///
    /// Plans interrupted by a previous process are found in the journal and
    /// their instances flagged for refresh. The caller is expected to hold the
    /// store lock.
    pub fn open(
        root: &Path,
        remote: Arc<dyn RemoteApi>,
        config: ReconcileConfig,
    ) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(root);
        layout.initialize()?;
        let journal = PlanJournal::new(&layout);
        journal.initialize()?;
        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(layout));

        match journal.recover(store.as_ref()) {
            Ok(keys) if !keys.is_empty() => {
                info!("{} instances were interrupted mid-plan", keys.len());
            }
            Ok(_) => {}
            Err(e) => warn!("journal recovery failed: {e}"),
        }

        let mut reconciler = Self::new(store, remote, config)?;
        reconciler.journal = Some(journal);
        Ok(reconciler)
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn get(&self, key: &ResourceKey) -> Result<ResourceInstance, CoreError> {
        Ok(self.store.get(key)?)
    }

    /// Record operator intent for `key`. The core never writes `desired`
    /// anywhere else.
    pub fn upsert(
        &self,
        key: &ResourceKey,
        spec: ResourceSpec,
    ) -> Result<ResourceInstance, CoreError> {
        spec.validate()?;
        let mut instance = match self.store.get(key) {
            Ok(mut existing) => {
                existing.set_desired(spec)?;
                existing
            }
            Err(StoreError::InstanceNotFound(_)) => {
                debug!("{key}: new {} instance", spec.kind());
                ResourceInstance::new(key.clone(), spec)
            }
            Err(e) => return Err(e.into()),
        };
        instance.touch();
        self.store.put(&instance)?;
        Ok(instance)
    }

    /// Re-read the observed state of `key` and report what changed remotely.
    pub fn refresh(&self, key: &ResourceKey) -> Result<DriftReport, CoreError> {
        let mut inst = self.get(key)?;
        let result = self.refresh_instance(&mut inst);
        if let Err(e) = &result {
            inst.record_error(e.kind(), e.to_string());
        }
        inst.touch();
        self.store.put(&inst)?;
        result
    }

    /// Compute the plan for `key` without executing it.
    pub fn plan(&self, key: &ResourceKey) -> Result<OperationPlan, CoreError> {
        let mut inst = self.get(key)?;
        let result = self.plan_checked(&mut inst);
        if let Err(e) = &result {
            inst.record_error(e.kind(), e.to_string());
        }
        inst.touch();
        self.store.put(&inst)?;
        result
    }

    pub fn apply(
        &self,
        key: &ResourceKey,
        options: ApplyOptions,
    ) -> Result<ApplyReport, CoreError> {
        let mut inst = self.get(key)?;
        let result = self.apply_instance(&mut inst, options);
        match &result {
            Ok(_) => inst.clear_error(),
            Err(e) => {
                warn!("{key}: {e}");
                inst.record_error(e.kind(), e.to_string());
            }
        }
        inst.touch();
        self.store.put(&inst)?;
        result
    }

    /// Apply `keys` with up to `max_parallel` reconciliations in flight.
    /// Results are returned in input order.
    pub fn apply_all(
        &self,
        keys: &[ResourceKey],
        options: ApplyOptions,
    ) -> Vec<(ResourceKey, Result<ApplyReport, CoreError>)> {
        let workers = self.config.max_parallel.min(keys.len()).max(1);
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<Result<ApplyReport, CoreError>>>> =
            Mutex::new(keys.iter().map(|_| None).collect());

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(key) = keys.get(i) else {
                        break;
                    };
                    let result = if self.cancel.is_cancelled() {
                        Err(CoreError::Cancelled { completed: 0 })
                    } else {
                        self.apply(key, options)
                    };
                    slots.lock().unwrap_or_else(PoisonError::into_inner)[i] = Some(result);
                });
            }
        });

        let slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
        keys.iter()
            .cloned()
            .zip(slots)
            .filter_map(|(key, slot)| slot.map(|r| (key, r)))
            .collect()
    }

    /// Delete the remote object of `key` and forget the instance.
    pub fn destroy(&self, key: &ResourceKey, policy: DeletePolicy) -> Result<(), CoreError> {
        let mut inst = self.get(key)?;
        if inst.id().is_none() {
            self.store.delete(key)?;
            info!("{key}: no remote object, instance forgotten");
            return Ok(());
        }

        let plan = plan_delete(&inst, policy);
        let result = self.execute(&mut inst, &plan).map(|_| ());
        match result {
            Ok(()) => {
                self.store.delete(key)?;
                info!("{key}: destroyed");
                Ok(())
            }
            Err(e) => {
                warn!("{key}: destroy failed: {e}");
                inst.record_error(e.kind(), e.to_string());
                inst.touch();
                self.store.put(&inst)?;
                Err(e)
            }
        }
    }

    /// Adopt an existing remote object located by an import path.
    pub fn import(
        &self,
        key: &ResourceKey,
        spec: ResourceSpec,
        path: &str,
    ) -> Result<ResourceInstance, CoreError> {
        spec.validate()?;
        let mut inst = match self.store.get(key) {
            Ok(mut existing) => {
                existing.set_desired(spec)?;
                existing
            }
            Err(StoreError::InstanceNotFound(_)) => ResourceInstance::new(key.clone(), spec),
            Err(e) => return Err(e.into()),
        };

        let path = ImportPath::parse(inst.kind, path, &self.config.import_separator)?;
        let id = Resolver::new(self.remote.as_ref(), &self.config).resolve_import(&path)?;
        inst.assign_id(id.clone())?;
        let budget = Budget::start(&self.config);
        inst.observed = retry(&budget, &format!("read {id}"), || self.remote.read(&id))?;
        validate_transition(inst.status.state, LifecycleState::Live)?;
        inst.status.state = LifecycleState::Live;
        inst.status.vanished = false;
        inst.status.needs_refresh = false;
        inst.clear_error();
        inst.touch();
        self.store.put(&inst)?;
        info!(
            "{key}: imported {} {id} from '{}'",
            inst.kind,
            path.render(&self.config.import_separator)
        );
        Ok(inst)
    }

    /// Resolve an operator handle to one remote id.
    pub fn lookup(
        &self,
        kind: ResourceKind,
        lookup: &Lookup,
        scope: &QueryScope,
    ) -> Result<ResourceId, CoreError> {
        Resolver::new(self.remote.as_ref(), &self.config).resolve(kind, lookup, scope)
    }

    pub fn status(&self, key: Option<&ResourceKey>) -> Result<Vec<StatusReport>, CoreError> {
        let instances = match key {
            Some(k) => vec![self.get(k)?],
            None => self.store.list()?,
        };
        Ok(instances.iter().map(StatusReport::from).collect())
    }

    fn refresh_instance(&self, inst: &mut ResourceInstance) -> Result<DriftReport, CoreError> {
        let Some(id) = inst.id().cloned() else {
            inst.status.needs_refresh = false;
            return Ok(DriftReport::none(&inst.key));
        };
        let budget = Budget::start(&self.config);
        match retry(&budget, &format!("read {id}"), || self.remote.read(&id)) {
            Ok(current) => {
                let report = diff_observed(&inst.key, &inst.observed, &current);
                if report.has_drift {
                    info!(
                        "{}: drift detected ({} added, {} changed, {} removed)",
                        inst.key,
                        report.added.len(),
                        report.changed.len(),
                        report.removed.len()
                    );
                }
                inst.observed = current;
                inst.status.needs_refresh = false;
                Ok(report)
            }
            Err(e) if e.is_not_found() => {
                let report = diff_observed(&inst.key, &inst.observed, &Attributes::new());
                self.mark_vanished(inst, &e)?;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    /// The remote object is gone: forget its identity and wait for operator
    /// consent before creating it again.
    fn mark_vanished(
        &self,
        inst: &mut ResourceInstance,
        cause: &CoreError,
    ) -> Result<(), CoreError> {
        validate_transition(inst.status.state, LifecycleState::PendingCreate)?;
        warn!(
            "{}: remote object {} vanished",
            inst.key,
            inst.id().map_or("<none>", |id| id.as_str())
        );
        inst.clear_identity();
        inst.status.state = LifecycleState::PendingCreate;
        inst.status.vanished = true;
        inst.status.needs_refresh = false;
        inst.record_error(cause.kind(), cause.to_string());
        Ok(())
    }

    fn plan_checked(&self, inst: &mut ResourceInstance) -> Result<OperationPlan, CoreError> {
        if inst.status.needs_refresh {
            self.refresh_instance(inst)?;
        }
        if inst.status.state == LifecycleState::Tainted {
            return Err(CoreError::Tainted(inst.key.to_string()));
        }
        match planner::plan_instance(inst) {
            Ok(plan) => {
                inst.status.replacement.clear();
                Ok(plan)
            }
            Err(e) => {
                if let CoreError::RequiresReplacement { attributes, .. } = &e {
                    inst.status.replacement.clone_from(attributes);
                }
                Err(e)
            }
        }
    }

    fn apply_instance(
        &self,
        inst: &mut ResourceInstance,
        options: ApplyOptions,
    ) -> Result<ApplyReport, CoreError> {
        if inst.status.needs_refresh {
            self.refresh_instance(inst)?;
        }
        if inst.status.vanished && !options.allow_recreate {
            return Err(CoreError::Vanished(inst.key.to_string()));
        }
        let plan = self.plan_checked(inst)?;
        let applied = if plan.is_empty() {
            debug!("{}: up to date", inst.key);
            Vec::new()
        } else {
            info!("{}: applying {} operations", inst.key, plan.len());
            match self.execute(inst, &plan) {
                Ok(applied) => applied,
                Err(e) => {
                    if e.is_not_found() && inst.id().is_some() {
                        self.mark_vanished(inst, &e)?;
                    }
                    return Err(e);
                }
            }
        };
        inst.status.vanished = false;
        inst.status.needs_refresh = false;
        inst.status.replacement.clear();
        Ok(ApplyReport {
            key: inst.key.to_string(),
            applied,
            state: inst.status.state,
        })
    }

    /// Run `plan` under a journal entry. Returns the descriptions of the
    /// operations that took effect.
    fn execute(
        &self,
        inst: &mut ResourceInstance,
        plan: &OperationPlan,
    ) -> Result<Vec<String>, CoreError> {
        let key = inst.key.clone();
        let op_id = match &self.journal {
            Some(journal) => Some(journal.begin(&key, plan.descriptions())?),
            None => None,
        };

        let mut applied = Vec::new();
        let result = {
            let mut on_applied = |op: &PlannedOperation| {
                applied.push(op.to_string());
                if let (Some(journal), Some(op_id)) = (&self.journal, &op_id) {
                    if let Err(e) = journal.record_step(op_id) {
                        warn!("{key}: journal step failed: {e}");
                    }
                }
            };
            Executor::new(self.remote.as_ref(), &self.locks, &self.config, &self.cancel)
                .execute(inst, plan, &mut on_applied)
        };

        // The outcome is written to the instance by the caller either way.
        if let (Some(journal), Some(op_id)) = (&self.journal, &op_id) {
            if let Err(e) = journal.commit(op_id) {
                warn!("{key}: journal commit failed: {e}");
            }
        }
        result.map(|()| applied)
    }
}
