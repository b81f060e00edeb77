//! CLI subprocess integration tests.
//!
//! These tests invoke the `stratus` binary against a temporary state
//! directory and a sandbox snapshot, checking exit codes, output and the JSON
//! shape of reports.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const ORG: &str = r#"
[[resource]]
key = "org-acme"
[resource.spec]
kind = "org"
name = "acme"
full_name = "Acme Corp"
"#;

fn stratus_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_stratus"))
}

fn write_desired(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("desired.toml");
    std::fs::write(&path, content).unwrap();
    path
}

fn run(store: &Path, sandbox: &Path, args: &[&str]) -> Output {
    stratus_bin()
        .arg("--store")
        .arg(store)
        .arg("--sandbox")
        .arg(sandbox)
        .args(args)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn cli_version_exits_zero() {
    let output = stratus_bin().arg("--version").output().unwrap();
    assert!(output.status.success(), "stratus --version must exit 0");
    assert!(stdout(&output).contains("stratus"));
}

#[test]
fn cli_help_lists_commands() {
    let output = stratus_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let out = stdout(&output);
    for cmd in ["plan", "apply", "refresh", "destroy", "import", "status"] {
        assert!(out.contains(cmd), "help must list '{cmd}': {out}");
    }
}

#[test]
fn cli_apply_then_plan_is_up_to_date() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("state");
    let sandbox = dir.path().join("sandbox.json");
    let desired = write_desired(dir.path(), ORG);
    let desired = desired.to_string_lossy();

    let output = run(&store, &sandbox, &["--json", "apply", &desired]);
    assert!(
        output.status.success(),
        "apply must exit 0. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let entries: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(entries[0]["key"], "org-acme");
    assert_eq!(entries[0]["applied"][0], "create org");
    assert_eq!(entries[0]["state"], "Live");
    assert!(sandbox.exists(), "apply must persist the sandbox");

    let output = run(&store, &sandbox, &["plan", &desired]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("org-acme: up to date"));
}

#[test]
fn cli_status_reports_live_instance() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("state");
    let sandbox = dir.path().join("sandbox.json");
    let desired = write_desired(dir.path(), ORG);
    assert!(run(&store, &sandbox, &["apply", &desired.to_string_lossy()])
        .status
        .success());

    let output = run(&store, &sandbox, &["--json", "status"]);
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let instances = status["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["state"], "Live");
    assert_eq!(instances[0]["kind"], "org");
    assert!(instances[0]["id"].is_string());
    assert!(status["unreadable"].as_array().unwrap().is_empty());
}

#[test]
fn cli_destroy_requires_explicit_policy() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("state");
    let sandbox = dir.path().join("sandbox.json");
    let desired = write_desired(dir.path(), ORG);
    assert!(run(&store, &sandbox, &["apply", &desired.to_string_lossy()])
        .status
        .success());

    let output = run(&store, &sandbox, &["destroy", "org-acme"]);
    assert!(!output.status.success(), "destroy without flags must fail");

    let output = run(
        &store,
        &sandbox,
        &["destroy", "org-acme", "--force", "false", "--recursive", "false"],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout(&output).contains("destroyed org-acme"));

    let output = run(&store, &sandbox, &["status"]);
    assert!(stdout(&output).contains("no instances found"));
}

#[test]
fn cli_invalid_desired_file_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("state");
    let sandbox = dir.path().join("sandbox.json");
    let desired = write_desired(
        dir.path(),
        "[[resource]]\nkey = \"x\"\n[resource.spec]\nkind = \"org\"\nname = \"acme\"\nbogus = 1\n",
    );

    let output = run(&store, &sandbox, &["plan", &desired.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("desired state error"));
}

#[test]
fn cli_import_adopts_object_into_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = dir.path().join("sandbox.json");
    let desired = write_desired(dir.path(), ORG);
    let desired = desired.to_string_lossy();
    assert!(run(&dir.path().join("a"), &sandbox, &["apply", &desired])
        .status
        .success());

    let fresh = dir.path().join("b");
    let output = run(&fresh, &sandbox, &["import", &desired, "org-acme", "acme"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout(&output).contains("imported org"));

    let output = run(&fresh, &sandbox, &["plan", &desired]);
    assert!(stdout(&output).contains("org-acme: up to date"));
}

#[test]
fn cli_import_unknown_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let desired = write_desired(dir.path(), ORG);
    let output = run(
        &dir.path().join("state"),
        &dir.path().join("sandbox.json"),
        &["import", &desired.to_string_lossy(), "nope", "acme"],
    );
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_completions_bash() {
    let output = stratus_bin().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("stratus"));
}
