use super::{json_pretty, load_desired, upsert_all, Session, EXIT_FAILURE, EXIT_SUCCESS};
use serde::Serialize;
use std::path::Path;
use stratus_core::{ApplyOptions, CoreError};
use stratus_store::LifecycleState;

#[derive(Debug, Serialize)]
struct ApplyEntry {
    key: String,
    applied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<LifecycleState>,
    /// Operations that took effect before a failure or cancellation.
    #[serde(skip_serializing_if = "Option::is_none")]
    completed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(
    session: &Session,
    desired: &Path,
    allow_recreate: bool,
    json: bool,
) -> Result<u8, String> {
    let keys = upsert_all(session, load_desired(desired)?)?;
    let results = session
        .reconciler()
        .apply_all(&keys, ApplyOptions { allow_recreate });
    // Whatever reached the platform is kept, failures included.
    session.save_sandbox()?;

    let entries: Vec<ApplyEntry> = results
        .into_iter()
        .map(|(key, result)| match result {
            Ok(report) => ApplyEntry {
                key: report.key,
                applied: report.applied,
                state: Some(report.state),
                completed: None,
                error: None,
            },
            Err(e) => ApplyEntry {
                key: key.to_string(),
                applied: Vec::new(),
                state: None,
                completed: completed_before_failure(&e),
                error: Some(e.to_string()),
            },
        })
        .collect();

    if json {
        println!("{}", json_pretty(&entries)?);
    } else {
        for entry in &entries {
            match (&entry.error, entry.applied.is_empty()) {
                (None, true) => println!("{}: up to date", entry.key),
                (None, false) => {
                    println!("{}: applied {} operations", entry.key, entry.applied.len());
                    for op in &entry.applied {
                        println!("  ✓ {op}");
                    }
                }
                (Some(err), _) => println!("{}: failed: {err}", entry.key),
            }
        }
        if session.cancelled() {
            println!("run cancelled; re-run apply to continue");
        }
    }

    let failed = entries.iter().any(|e| e.error.is_some());
    Ok(if failed { EXIT_FAILURE } else { EXIT_SUCCESS })
}

fn completed_before_failure(e: &CoreError) -> Option<usize> {
    match e {
        CoreError::PartialFailure { completed, .. } | CoreError::Cancelled { completed } => {
            Some(*completed)
        }
        _ => None,
    }
}
