//! Crash recovery: a plan that never committed its journal entry forces a
//! refresh of the instance before anything is planned on top of it.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use stratus_core::{ApplyOptions, ReconcileConfig, Reconciler};
use stratus_remote::SandboxPlatform;
use stratus_schema::{
    parse_desired_str, AttrValue, Attributes, ResourceId, ResourceKey, ResourceKind,
};
use stratus_store::{LifecycleState, PlanJournal, StoreLayout};

fn fast_config() -> ReconcileConfig {
    ReconcileConfig {
        timeout_secs: 5,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        task_poll_interval_ms: 1,
        ..ReconcileConfig::default()
    }
}

fn seed_org(sandbox: &SandboxPlatform) -> ResourceId {
    let mut a = Attributes::new();
    a.insert("name".to_owned(), AttrValue::from("acme"));
    sandbox.seed(ResourceKind::Org, None, a, Utc::now())
}

fn open(root: &Path, sandbox: &Arc<SandboxPlatform>) -> Reconciler {
    Reconciler::open(root, sandbox.clone(), fast_config()).unwrap()
}

fn applied_catalog(root: &Path, sandbox: &Arc<SandboxPlatform>) -> (ResourceKey, ResourceId) {
    let org = seed_org(sandbox);
    let reconciler = open(root, sandbox);
    let desired = parse_desired_str(&format!(
        "[[resource]]\nkey = \"cat\"\n[resource.spec]\nkind = \"catalog\"\nname = \"templates\"\norg_id = \"{org}\"\ndescription = \"golden images\"\n"
    ))
    .unwrap()
    .remove(0);
    reconciler.upsert(&desired.key, desired.spec).unwrap();
    reconciler
        .apply(&desired.key, ApplyOptions::default())
        .unwrap();
    let id = reconciler.get(&desired.key).unwrap().id().cloned().unwrap();
    (desired.key, id)
}

#[test]
fn committed_plans_leave_nothing_to_recover() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(SandboxPlatform::new());
    let (key, _) = applied_catalog(dir.path(), &sandbox);

    let journal = PlanJournal::new(&StoreLayout::new(dir.path()));
    assert!(journal.list_incomplete().unwrap().is_empty());

    let reconciler = open(dir.path(), &sandbox);
    let status = reconciler.status(Some(&key)).unwrap();
    assert!(!status[0].needs_refresh);
    assert_eq!(status[0].state, LifecycleState::Live);
}

#[test]
fn interrupted_plan_refreshes_before_planning() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(SandboxPlatform::new());
    let (key, id) = applied_catalog(dir.path(), &sandbox);

    // A process died after the remote took the change but before commit.
    let journal = PlanJournal::new(&StoreLayout::new(dir.path()));
    journal
        .begin(&key, vec!["update core [description]".to_owned()])
        .unwrap();
    assert!(sandbox.set_attribute(&id, "description", AttrValue::from("half-written")));

    let reconciler = open(dir.path(), &sandbox);
    assert!(journal.list_incomplete().unwrap().is_empty());
    assert!(reconciler.status(Some(&key)).unwrap()[0].needs_refresh);

    let plan = reconciler.plan(&key).unwrap();
    assert_eq!(plan.descriptions(), vec!["update core [description]"]);
    let inst = reconciler.get(&key).unwrap();
    assert!(!inst.status.needs_refresh);
    assert_eq!(inst.observed["description"], AttrValue::from("half-written"));

    reconciler.apply(&key, ApplyOptions::default()).unwrap();
    assert!(reconciler.plan(&key).unwrap().is_empty());
}

#[test]
fn interrupted_plan_for_deleted_object_marks_vanished() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(SandboxPlatform::new());
    let (key, id) = applied_catalog(dir.path(), &sandbox);

    let journal = PlanJournal::new(&StoreLayout::new(dir.path()));
    journal
        .begin(&key, vec!["delete (force=false recursive=false)".to_owned()])
        .unwrap();
    assert!(sandbox.remove_out_of_band(&id));

    let reconciler = open(dir.path(), &sandbox);
    reconciler.refresh(&key).unwrap();
    let status = &reconciler.status(Some(&key)).unwrap()[0];
    assert!(status.vanished);
    assert!(status.id.is_none());
    assert_eq!(status.state, LifecycleState::PendingCreate);
}
