use crate::api::{Created, DeletePolicy, QueryScope, RemoteApi, SummaryRecord, TaskStatus};
use crate::RemoteError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use stratus_schema::{
    children_value, metadata_pairs, observed_children, AttrValue, Attributes, ChildMutation,
    ChildRecord, ChildSetDescriptor, Mutability, ParentRef, ResourceId, ResourceKind, TaskId,
    UpdateGroup,
};
use tempfile::NamedTempFile;
use tracing::debug;

const HREF_BASE: &str = "https://sandbox.invalid/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxObject {
    kind: ResourceKind,
    parent: Option<ParentRef>,
    attributes: Attributes,
    created_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxTask {
    remaining_polls: u32,
    failure: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_seq: u64,
    objects: BTreeMap<ResourceId, SandboxObject>,
    tasks: BTreeMap<TaskId, SandboxTask>,
}

#[derive(Debug, Default)]
struct Faults {
    busy: HashMap<ResourceId, u32>,
    failing_updates: HashSet<(ResourceId, UpdateGroup)>,
    next_task_failure: Option<String>,
    task_polls: u32,
    latency: Option<Duration>,
}

/// In-memory remote platform.
///
/// Enforces the same rules a real platform does where the core depends on
/// them: unique sibling names, declared and updatable attributes per update
/// group, exactly one default in exclusive child sets, and refusal to delete
/// the current default or a non-empty parent without `recursive`. Faults can be
/// injected per object and per update group; mutations can be made
/// asynchronous with tasks that finish after a number of polls.
#[derive(Default)]
pub struct SandboxPlatform {
    state: Mutex<Snapshot>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn own_name(obj: &SandboxObject) -> Option<&str> {
    obj.attributes.get("name").and_then(AttrValue::as_str)
}

/// Name shown in query summaries. Kinds without a name of their own carry the
/// name of the object they are attached to.
fn display_name(state: &Snapshot, id: &ResourceId, obj: &SandboxObject) -> String {
    if let Some(name) = own_name(obj) {
        return name.to_owned();
    }
    match &obj.parent {
        Some(p) => state
            .objects
            .get(&p.id)
            .and_then(own_name)
            .map_or_else(|| p.id.to_string(), str::to_owned),
        None => id.to_string(),
    }
}

fn refresh_computed(id: &ResourceId, obj: &mut SandboxObject) {
    let desc = obj.kind.descriptor();
    let a = &mut obj.attributes;
    if desc.attribute("href").is_some() {
        a.insert(
            "href".to_owned(),
            AttrValue::from(format!("{HREF_BASE}/{}/{id}", obj.kind)),
        );
    }
    if desc.attribute("created_at").is_some() {
        a.insert(
            "created_at".to_owned(),
            AttrValue::from(obj.created_at.to_rfc3339()),
        );
    }
    match obj.kind {
        ResourceKind::VApp | ResourceKind::Vm => {
            let on = a.get("power_on").and_then(AttrValue::as_bool).unwrap_or(false);
            let status = if on { "POWERED_ON" } else { "POWERED_OFF" };
            a.insert("status".to_owned(), AttrValue::from(status));
        }
        ResourceKind::Catalog => {
            a.entry("number_of_media".to_owned())
                .or_insert(AttrValue::Int(0));
            if a.get("publish_enabled").and_then(AttrValue::as_bool) == Some(true) {
                a.insert(
                    "publish_subscription_url".to_owned(),
                    AttrValue::from(format!("{HREF_BASE}/catalog/{id}/subscribe")),
                );
            } else {
                a.remove("publish_subscription_url");
            }
        }
        _ => {}
    }
}

fn check_exclusive(set: &ChildSetDescriptor, records: &[ChildRecord]) -> Result<(), RemoteError> {
    let Some(flag) = set.exclusive else {
        return Ok(());
    };
    if records.is_empty() {
        return Ok(());
    }
    let count = records.iter().filter(|r| r.flag(flag)).count();
    if count == 1 {
        Ok(())
    } else {
        Err(RemoteError::Rejected(format!(
            "{} must have exactly one '{flag}' member, found {count}",
            set.name
        )))
    }
}

impl SandboxPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`save`](Self::save); a missing file yields an
    /// empty platform. Faults are never persisted.
    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        Ok(Self {
            state: Mutex::new(snapshot),
            ..Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        let content = serde_json::to_string_pretty(&*lock(&self.state))?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| RemoteError::Io(e.error))?;
        Ok(())
    }

    /// Insert a pre-existing object, bypassing validation and faults.
    pub fn seed(
        &self,
        kind: ResourceKind,
        parent: Option<ParentRef>,
        attributes: Attributes,
        created_at: DateTime<Utc>,
    ) -> ResourceId {
        let mut state = lock(&self.state);
        let id = Self::allocate(&mut state, kind, parent, attributes, created_at);
        if kind == ResourceKind::VdcGroup {
            Self::sync_group_membership(&mut state);
        }
        id
    }

    /// The next `times` mutating calls that target `id` (or create children
    /// under it) fail with `Busy`.
    pub fn set_busy(&self, id: &ResourceId, times: u32) {
        lock(&self.faults).busy.insert(id.clone(), times);
    }

    /// Every update of `group` on `id` is rejected.
    pub fn fail_update(&self, id: &ResourceId, group: UpdateGroup) {
        lock(&self.faults)
            .failing_updates
            .insert((id.clone(), group));
    }

    pub fn clear_update_failures(&self) {
        lock(&self.faults).failing_updates.clear();
    }

    /// The next task started fails with `reason`. A failed create still leaves
    /// the object behind; other failed mutations take no effect.
    pub fn fail_next_task(&self, reason: impl Into<String>) {
        lock(&self.faults).next_task_failure = Some(reason.into());
    }

    /// Make mutations asynchronous: each returns a task that reports `Running`
    /// for `polls` polls. Zero makes them synchronous.
    pub fn set_task_polls(&self, polls: u32) {
        lock(&self.faults).task_polls = polls;
    }

    /// Sleep this long inside every mutating call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        lock(&self.faults).latency = latency;
    }

    /// Delete an object out of band, as another operator would.
    pub fn remove_out_of_band(&self, id: &ResourceId) -> bool {
        lock(&self.state).objects.remove(id).is_some()
    }

    /// Change an attribute out of band.
    pub fn set_attribute(&self, id: &ResourceId, name: &str, value: AttrValue) -> bool {
        let mut state = lock(&self.state);
        match state.objects.get_mut(id) {
            Some(obj) => {
                obj.attributes.insert(name.to_owned(), value);
                true
            }
            None => false,
        }
    }

    pub fn object_count(&self, kind: ResourceKind) -> usize {
        lock(&self.state)
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .count()
    }

    /// Mutating calls received so far, e.g. `update urn:...:1 publish`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn allocate(
        state: &mut Snapshot,
        kind: ResourceKind,
        parent: Option<ParentRef>,
        attributes: Attributes,
        created_at: DateTime<Utc>,
    ) -> ResourceId {
        state.next_seq += 1;
        let seq = state.next_seq;
        let id = ResourceId::new(format!("urn:sandbox:{kind}:{seq:06}"));
        let mut obj = SandboxObject {
            kind,
            parent,
            attributes,
            created_at,
            seq,
        };
        refresh_computed(&id, &mut obj);
        state.objects.insert(id.clone(), obj);
        id
    }

    /// Recompute the computed `vdc_group_id` of every VDC from the groups'
    /// participant lists.
    fn sync_group_membership(state: &mut Snapshot) {
        let mut membership: HashMap<String, ResourceId> = HashMap::new();
        for (gid, obj) in &state.objects {
            if obj.kind != ResourceKind::VdcGroup {
                continue;
            }
            let members = obj
                .attributes
                .get("participating_vdc_ids")
                .and_then(AttrValue::as_list)
                .unwrap_or_default();
            for m in members.iter().filter_map(AttrValue::as_str) {
                membership.insert(m.to_owned(), gid.clone());
            }
        }
        for (id, obj) in &mut state.objects {
            if obj.kind != ResourceKind::Vdc {
                continue;
            }
            match membership.get(id.as_str()) {
                Some(gid) => {
                    obj.attributes
                        .insert("vdc_group_id".to_owned(), AttrValue::from(gid.as_str()));
                }
                None => {
                    obj.attributes.remove("vdc_group_id");
                }
            }
        }
    }

    /// Record the call, apply latency and busy faults, and decide whether the
    /// resulting task (if any) fails.
    fn begin_call(
        &self,
        call: String,
        target: Option<&ResourceId>,
    ) -> Result<(u32, Option<String>), RemoteError> {
        debug!("sandbox: {call}");
        lock(&self.calls).push(call);
        let (latency, polls, failure) = {
            let mut faults = lock(&self.faults);
            if let Some(id) = target {
                if let Some(remaining) = faults.busy.get_mut(id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(RemoteError::Busy(format!(
                            "{id} is busy with another operation"
                        )));
                    }
                }
            }
            (
                faults.latency,
                faults.task_polls,
                faults.next_task_failure.take(),
            )
        };
        if let Some(d) = latency {
            thread::sleep(d);
        }
        Ok((polls, failure))
    }

    fn start_task(state: &mut Snapshot, polls: u32, failure: Option<String>) -> Option<TaskId> {
        if polls == 0 && failure.is_none() {
            return None;
        }
        state.next_seq += 1;
        let task = TaskId::new(format!("task-{:06}", state.next_seq));
        state.tasks.insert(
            task.clone(),
            SandboxTask {
                remaining_polls: polls,
                failure,
            },
        );
        Some(task)
    }

    fn validate_create(
        state: &Snapshot,
        kind: ResourceKind,
        parent: Option<&ParentRef>,
        attributes: &Attributes,
    ) -> Result<(), RemoteError> {
        let desc = kind.descriptor();
        if let Some(p) = parent {
            match state.objects.get(&p.id) {
                Some(obj) if obj.kind == p.kind => {}
                _ => return Err(RemoteError::NotFound(format!("parent {p}"))),
            }
        }
        for name in attributes.keys() {
            if let Some(set) = desc.child_set(name) {
                let records = observed_children(set, attributes)
                    .map_err(|e| RemoteError::Rejected(e.to_string()))?;
                check_exclusive(set, &records)?;
                continue;
            }
            match desc.attribute(name) {
                Some(a) if a.mutability == Mutability::Computed => {
                    return Err(RemoteError::Rejected(format!(
                        "computed attribute '{name}' cannot be set"
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(RemoteError::Rejected(format!(
                        "{kind} has no attribute '{name}'"
                    )));
                }
            }
        }
        if desc.unique_name {
            let name = attributes.get("name").and_then(AttrValue::as_str);
            let parent_id = parent.map(|p| &p.id);
            if let Some(name) = name {
                let taken = state.objects.values().any(|o| {
                    o.kind == kind
                        && o.parent.as_ref().map(|p| &p.id) == parent_id
                        && o.attributes.get("name").and_then(AttrValue::as_str) == Some(name)
                });
                if taken {
                    return Err(RemoteError::Conflict(format!(
                        "{kind} named '{name}' already exists"
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply_child_mutation(
        set: &ChildSetDescriptor,
        records: &mut Vec<ChildRecord>,
        mutation: &ChildMutation,
    ) -> Result<(), RemoteError> {
        let position =
            |records: &[ChildRecord], key: &str| records.iter().position(|r| r.key == key);
        match mutation {
            ChildMutation::SetDefault { key } => {
                let flag = set.exclusive.ok_or_else(|| {
                    RemoteError::Rejected(format!("{} has no default member", set.name))
                })?;
                if position(records, key).is_none() {
                    return Err(RemoteError::NotFound(format!("{} member '{key}'", set.name)));
                }
                for r in records.iter_mut() {
                    r.attributes
                        .insert(flag.to_owned(), AttrValue::Bool(r.key == *key));
                }
            }
            ChildMutation::Add { record } => {
                if position(records, &record.key).is_some() {
                    return Err(RemoteError::Conflict(format!(
                        "{} member '{}' already exists",
                        set.name, record.key
                    )));
                }
                if let Some(flag) = set.exclusive {
                    if record.flag(flag) {
                        for r in records.iter_mut() {
                            r.attributes.insert(flag.to_owned(), AttrValue::Bool(false));
                        }
                    }
                }
                records.push(record.clone());
            }
            ChildMutation::Update { record } => {
                let i = position(records, &record.key).ok_or_else(|| {
                    RemoteError::NotFound(format!("{} member '{}'", set.name, record.key))
                })?;
                // The exclusivity flag only moves through SetDefault and Add.
                let mut attrs = record.attributes.clone();
                if let Some(flag) = set.exclusive {
                    attrs.remove(flag);
                }
                records[i].attributes.extend(attrs);
            }
            ChildMutation::Remove { key } => {
                let i = position(records, key).ok_or_else(|| {
                    RemoteError::NotFound(format!("{} member '{key}'", set.name))
                })?;
                if let Some(flag) = set.exclusive {
                    if records[i].flag(flag) {
                        return Err(RemoteError::Rejected(format!(
                            "cannot remove '{key}': it is the {flag} member of {}",
                            set.name
                        )));
                    }
                }
                records.remove(i);
            }
            ChildMutation::Reorder { keys } => {
                let mut current: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
                let mut wanted: Vec<&str> = keys.iter().map(String::as_str).collect();
                current.sort_unstable();
                wanted.sort_unstable();
                if current != wanted {
                    return Err(RemoteError::Rejected(format!(
                        "reorder of {} must name every member exactly once",
                        set.name
                    )));
                }
                let mut reordered = Vec::with_capacity(records.len());
                for key in keys {
                    if let Some(i) = position(records, key) {
                        reordered.push(records.remove(i));
                    }
                }
                *records = reordered;
            }
        }
        Ok(())
    }

    fn descendants(state: &Snapshot, root: &ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut frontier = vec![root.clone()];
        while let Some(current) = frontier.pop() {
            for (id, obj) in &state.objects {
                if obj.parent.as_ref().is_some_and(|p| p.id == current) {
                    out.push(id.clone());
                    frontier.push(id.clone());
                }
            }
        }
        out
    }
}

impl RemoteApi for SandboxPlatform {
    fn create(
        &self,
        kind: ResourceKind,
        parent: Option<&ParentRef>,
        attributes: &Attributes,
    ) -> Result<Created, RemoteError> {
        let (polls, failure) =
            self.begin_call(format!("create {kind}"), parent.map(|p| &p.id))?;
        let mut state = lock(&self.state);
        Self::validate_create(&state, kind, parent, attributes)?;
        let id = Self::allocate(
            &mut state,
            kind,
            parent.cloned(),
            attributes.clone(),
            Utc::now(),
        );
        if kind == ResourceKind::VdcGroup {
            Self::sync_group_membership(&mut state);
        }
        let task = Self::start_task(&mut state, polls, failure);
        Ok(Created { id, task })
    }

    fn read(&self, id: &ResourceId) -> Result<Attributes, RemoteError> {
        let state = lock(&self.state);
        state
            .objects
            .get(id)
            .map(|o| o.attributes.clone())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn update(
        &self,
        id: &ResourceId,
        group: UpdateGroup,
        attributes: &Attributes,
    ) -> Result<Option<TaskId>, RemoteError> {
        let (polls, failure) = self.begin_call(format!("update {id} {group}"), Some(id))?;
        if lock(&self.faults)
            .failing_updates
            .contains(&(id.clone(), group))
        {
            return Err(RemoteError::Rejected(format!("{group} update of {id} failed")));
        }
        let mut state = lock(&self.state);
        let obj = state
            .objects
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        let desc = obj.kind.descriptor();
        for name in attributes.keys() {
            match desc.attribute(name) {
                Some(a) if a.mutability == Mutability::Mutable && a.group == group => {}
                _ => {
                    return Err(RemoteError::Rejected(format!(
                        "'{name}' cannot be updated through the {group} endpoint of {}",
                        obj.kind
                    )));
                }
            }
        }
        if failure.is_none() {
            obj.attributes
                .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
            if let (Some(parent_attr), Some(parent)) = (desc.parent_attr, obj.parent.as_mut()) {
                if let Some(new_id) = attributes.get(parent_attr).and_then(AttrValue::as_str) {
                    parent.id = ResourceId::new(new_id);
                }
                if let Some(kind) = attributes
                    .get("owner_kind")
                    .and_then(AttrValue::as_str)
                    .and_then(|k| k.parse::<ResourceKind>().ok())
                {
                    parent.kind = kind;
                }
            }
            refresh_computed(id, obj);
            if obj.kind == ResourceKind::VdcGroup {
                Self::sync_group_membership(&mut state);
            }
        }
        Ok(Self::start_task(&mut state, polls, failure))
    }

    fn mutate_child(
        &self,
        id: &ResourceId,
        set: &str,
        mutation: &ChildMutation,
    ) -> Result<Option<TaskId>, RemoteError> {
        let (polls, failure) = self.begin_call(format!("child {id} {set} {mutation}"), Some(id))?;
        let mut state = lock(&self.state);
        let obj = state
            .objects
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        let desc = obj
            .kind
            .descriptor()
            .child_set(set)
            .ok_or_else(|| {
                RemoteError::Rejected(format!("{} has no child set '{set}'", obj.kind))
            })?;
        let mut records = observed_children(desc, &obj.attributes)
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;
        Self::apply_child_mutation(desc, &mut records, mutation)?;
        if failure.is_none() {
            obj.attributes
                .insert(set.to_owned(), children_value(&records));
        }
        Ok(Self::start_task(&mut state, polls, failure))
    }

    fn delete(
        &self,
        id: &ResourceId,
        policy: DeletePolicy,
    ) -> Result<Option<TaskId>, RemoteError> {
        let (polls, failure) = self.begin_call(format!("delete {id} {policy}"), Some(id))?;
        let mut state = lock(&self.state);
        let obj = state
            .objects
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        let powered_on = obj.attributes.get("power_on").and_then(AttrValue::as_bool) == Some(true);
        if powered_on && !policy.force {
            return Err(RemoteError::Rejected(format!(
                "{id} is powered on; force is required"
            )));
        }
        let kind = obj.kind;
        let descendants = Self::descendants(&state, id);
        if !descendants.is_empty() && !policy.recursive {
            return Err(RemoteError::Rejected(format!(
                "{id} contains {} objects; recursive is required",
                descendants.len()
            )));
        }
        if failure.is_none() {
            for d in &descendants {
                state.objects.remove(d);
            }
            state.objects.remove(id);
            if kind == ResourceKind::VdcGroup {
                Self::sync_group_membership(&mut state);
            }
        }
        Ok(Self::start_task(&mut state, polls, failure))
    }

    fn query(
        &self,
        kind: ResourceKind,
        scope: &QueryScope,
    ) -> Result<Vec<SummaryRecord>, RemoteError> {
        let state = lock(&self.state);
        let mut matches: Vec<(&ResourceId, &SandboxObject)> = state
            .objects
            .iter()
            .filter(|(_, o)| o.kind == kind)
            .filter(|(_, o)| match &scope.parent {
                Some(p) => o.parent.as_ref().is_some_and(|op| op.id == *p),
                None => true,
            })
            .filter(|(id, o)| match &scope.name {
                Some(n) => display_name(&state, id, o) == *n,
                None => true,
            })
            .collect();
        matches.sort_by_key(|(_, o)| o.seq);
        Ok(matches
            .into_iter()
            .map(|(id, o)| SummaryRecord {
                id: id.clone(),
                kind: o.kind,
                name: display_name(&state, id, o),
                parent: o.parent.as_ref().map(|p| p.id.clone()),
                created_at: Some(o.created_at),
                metadata: metadata_pairs(&o.attributes),
            })
            .collect())
    }

    fn task_status(&self, task: &TaskId) -> Result<TaskStatus, RemoteError> {
        let mut state = lock(&self.state);
        let t = state
            .tasks
            .get_mut(task)
            .ok_or_else(|| RemoteError::UnknownTask(task.to_string()))?;
        if t.remaining_polls > 0 {
            t.remaining_polls -= 1;
            return Ok(TaskStatus::Running);
        }
        Ok(match &t.failure {
            Some(reason) => TaskStatus::Failed(reason.clone()),
            None => TaskStatus::Succeeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn profile(name: &str, default: bool) -> AttrValue {
        AttrValue::Map(attrs(&[
            ("name", AttrValue::from(name)),
            ("limit_mb", AttrValue::Int(0)),
            ("enabled", AttrValue::Bool(true)),
            ("default", AttrValue::Bool(default)),
        ]))
    }

    fn org(sandbox: &SandboxPlatform) -> ResourceId {
        sandbox
            .create(
                ResourceKind::Org,
                None,
                &attrs(&[
                    ("name", AttrValue::from("acme")),
                    ("full_name", AttrValue::from("Acme")),
                ]),
            )
            .unwrap()
            .id
    }

    fn vdc(sandbox: &SandboxPlatform, org: &ResourceId, name: &str) -> ResourceId {
        sandbox
            .create(
                ResourceKind::Vdc,
                Some(&ParentRef::new(ResourceKind::Org, org.clone())),
                &attrs(&[
                    ("name", AttrValue::from(name)),
                    ("org_id", AttrValue::from(org.as_str())),
                    ("allocation_model", AttrValue::from("Flex")),
                    (
                        "storage_profiles",
                        AttrValue::List(vec![profile("A", true), profile("B", false)]),
                    ),
                ]),
            )
            .unwrap()
            .id
    }

    #[test]
    fn create_then_read_includes_computed() {
        let s = SandboxPlatform::new();
        let id = org(&s);
        let a = s.read(&id).unwrap();
        assert!(a.contains_key("href"));
        assert!(a.contains_key("created_at"));
        assert_eq!(a["name"], AttrValue::from("acme"));
    }

    #[test]
    fn duplicate_name_conflicts() {
        let s = SandboxPlatform::new();
        org(&s);
        let err = s
            .create(
                ResourceKind::Org,
                None,
                &attrs(&[("name", AttrValue::from("acme"))]),
            )
            .unwrap_err();
        assert!(matches!(err, RemoteError::Conflict(_)));
    }

    #[test]
    fn missing_parent_is_not_found() {
        let s = SandboxPlatform::new();
        let err = s
            .create(
                ResourceKind::Vdc,
                Some(&ParentRef::new(ResourceKind::Org, "urn:nope")),
                &attrs(&[("name", AttrValue::from("v"))]),
            )
            .unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::NotFound);
    }

    #[test]
    fn computed_attribute_rejected_on_create() {
        let s = SandboxPlatform::new();
        let err = s
            .create(
                ResourceKind::Org,
                None,
                &attrs(&[("name", AttrValue::from("x")), ("href", AttrValue::from("h"))]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("computed"));
    }

    #[test]
    fn update_checks_group() {
        let s = SandboxPlatform::new();
        let o = org(&s);
        let v = vdc(&s, &o, "main");
        let wrong = attrs(&[("description", AttrValue::from("x"))]);
        assert!(s.update(&v, UpdateGroup::Metadata, &wrong).is_err());
        s.update(&v, UpdateGroup::Core, &wrong).unwrap();
        assert_eq!(s.read(&v).unwrap()["description"], AttrValue::from("x"));
        let immutable = attrs(&[("allocation_model", AttrValue::from("AllocationPool"))]);
        assert!(s.update(&v, UpdateGroup::Core, &immutable).is_err());
    }

    #[test]
    fn busy_then_succeeds() {
        let s = SandboxPlatform::new();
        let o = org(&s);
        s.set_busy(&o, 2);
        let change = attrs(&[("description", AttrValue::from("x"))]);
        assert!(matches!(
            s.update(&o, UpdateGroup::Core, &change),
            Err(RemoteError::Busy(_))
        ));
        assert!(s.update(&o, UpdateGroup::Core, &change).is_err());
        assert!(s.update(&o, UpdateGroup::Core, &change).is_ok());
    }

    #[test]
    fn cannot_remove_default_profile() {
        let s = SandboxPlatform::new();
        let o = org(&s);
        let v = vdc(&s, &o, "main");
        let remove_a = ChildMutation::Remove {
            key: "A".to_owned(),
        };
        assert!(s.mutate_child(&v, "storage_profiles", &remove_a).is_err());
        s.mutate_child(
            &v,
            "storage_profiles",
            &ChildMutation::SetDefault {
                key: "B".to_owned(),
            },
        )
        .unwrap();
        s.mutate_child(&v, "storage_profiles", &remove_a).unwrap();
        let set = ResourceKind::Vdc.descriptor().child_set("storage_profiles").unwrap();
        let remaining = observed_children(set, &s.read(&v).unwrap()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].flag("default"));
    }

    #[test]
    fn update_child_keeps_default_flag() {
        let s = SandboxPlatform::new();
        let o = org(&s);
        let v = vdc(&s, &o, "main");
        let record = ChildRecord::new(
            "A",
            attrs(&[
                ("name", AttrValue::from("A")),
                ("limit_mb", AttrValue::Int(1024)),
                ("default", AttrValue::Bool(false)),
            ]),
        );
        s.mutate_child(&v, "storage_profiles", &ChildMutation::Update { record })
            .unwrap();
        let set = ResourceKind::Vdc.descriptor().child_set("storage_profiles").unwrap();
        let records = observed_children(set, &s.read(&v).unwrap()).unwrap();
        assert!(records[0].flag("default"));
        assert_eq!(records[0].attributes["limit_mb"], AttrValue::Int(1024));
    }

    #[test]
    fn group_membership_is_computed() {
        let s = SandboxPlatform::new();
        let o = org(&s);
        let v1 = vdc(&s, &o, "a");
        let v2 = vdc(&s, &o, "b");
        let g = s
            .create(
                ResourceKind::VdcGroup,
                Some(&ParentRef::new(ResourceKind::Org, o.clone())),
                &attrs(&[
                    ("name", AttrValue::from("grp")),
                    ("org_id", AttrValue::from(o.as_str())),
                    ("starting_vdc_id", AttrValue::from(v1.as_str())),
                    ("participating_vdc_ids", AttrValue::from(vec![v1.as_str()])),
                ]),
            )
            .unwrap()
            .id;
        assert_eq!(
            s.read(&v1).unwrap()["vdc_group_id"],
            AttrValue::from(g.as_str())
        );
        assert!(!s.read(&v2).unwrap().contains_key("vdc_group_id"));
    }

    #[test]
    fn async_task_completes_after_polls() {
        let s = SandboxPlatform::new();
        s.set_task_polls(2);
        let created = s
            .create(
                ResourceKind::Org,
                None,
                &attrs(&[("name", AttrValue::from("acme"))]),
            )
            .unwrap();
        let task = created.task.unwrap();
        assert_eq!(s.task_status(&task).unwrap(), TaskStatus::Running);
        assert_eq!(s.task_status(&task).unwrap(), TaskStatus::Running);
        assert_eq!(s.task_status(&task).unwrap(), TaskStatus::Succeeded);
    }

    #[test]
    fn failed_update_task_has_no_effect() {
        let s = SandboxPlatform::new();
        let o = org(&s);
        s.fail_next_task("storage unavailable");
        let task = s
            .update(
                &o,
                UpdateGroup::Core,
                &attrs(&[("description", AttrValue::from("new"))]),
            )
            .unwrap()
            .unwrap();
        assert!(matches!(s.task_status(&task).unwrap(), TaskStatus::Failed(_)));
        assert!(!s.read(&o).unwrap().contains_key("description"));
    }

    #[test]
    fn delete_requires_recursive_and_force() {
        let s = SandboxPlatform::new();
        let o = org(&s);
        let v = vdc(&s, &o, "main");
        let app = s
            .create(
                ResourceKind::VApp,
                Some(&ParentRef::new(ResourceKind::Vdc, v.clone())),
                &attrs(&[
                    ("name", AttrValue::from("web")),
                    ("vdc_id", AttrValue::from(v.as_str())),
                    ("power_on", AttrValue::Bool(true)),
                ]),
            )
            .unwrap()
            .id;
        let gentle = DeletePolicy {
            force: false,
            recursive: false,
        };
        assert!(s.delete(&v, gentle).is_err());
        assert!(s.delete(&app, gentle).is_err());
        s.delete(
            &v,
            DeletePolicy {
                force: false,
                recursive: true,
            },
        )
        .unwrap();
        assert_eq!(s.object_count(ResourceKind::VApp), 0);
        assert_eq!(s.object_count(ResourceKind::Vdc), 0);
    }

    #[test]
    fn query_in_creation_order_with_scope() {
        let s = SandboxPlatform::new();
        let o = org(&s);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let parent = ParentRef::new(ResourceKind::Org, o.clone());
        for name in ["web-2", "web-1"] {
            s.seed(
                ResourceKind::Catalog,
                Some(parent.clone()),
                attrs(&[("name", AttrValue::from(name))]),
                t,
            );
        }
        let all = s
            .query(
                ResourceKind::Catalog,
                &QueryScope {
                    parent: Some(o.clone()),
                    name: None,
                },
            )
            .unwrap();
        let names: Vec<_> = all.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["web-2", "web-1"]);
        let one = s
            .query(
                ResourceKind::Catalog,
                &QueryScope {
                    parent: None,
                    name: Some("web-1".to_owned()),
                },
            )
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].created_at, Some(t));
    }

    #[test]
    fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.json");
        let s = SandboxPlatform::new();
        let id = org(&s);
        s.save(&path).unwrap();
        let loaded = SandboxPlatform::load(&path).unwrap();
        assert_eq!(loaded.read(&id).unwrap(), s.read(&id).unwrap());
        // Sequence numbers continue after reload.
        let next = org_named(&loaded, "other");
        assert_ne!(next, id);
    }

    fn org_named(s: &SandboxPlatform, name: &str) -> ResourceId {
        s.create(
            ResourceKind::Org,
            None,
            &attrs(&[("name", AttrValue::from(name))]),
        )
        .unwrap()
        .id
    }

    #[test]
    fn calls_are_logged() {
        let s = SandboxPlatform::new();
        let o = org(&s);
        s.update(
            &o,
            UpdateGroup::Metadata,
            &attrs(&[("metadata_entry", AttrValue::List(Vec::new()))]),
        )
        .unwrap();
        let calls = s.calls();
        assert_eq!(calls[0], "create org");
        assert_eq!(calls[1], format!("update {o} metadata"));
    }
}
