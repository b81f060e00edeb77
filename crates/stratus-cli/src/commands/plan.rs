use super::{json_pretty, load_desired, upsert_all, Session, EXIT_FAILURE, EXIT_SUCCESS};
use serde::Serialize;
use std::path::Path;
use stratus_core::CoreError;

#[derive(Debug, Serialize)]
struct PlanEntry {
    key: String,
    operations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requires_replacement: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(session: &Session, desired: &Path, json: bool) -> Result<u8, String> {
    let keys = upsert_all(session, load_desired(desired)?)?;

    let mut entries = Vec::with_capacity(keys.len());
    for key in &keys {
        let mut entry = PlanEntry {
            key: key.to_string(),
            operations: Vec::new(),
            requires_replacement: None,
            error: None,
        };
        match session.reconciler().plan(key) {
            Ok(plan) => entry.operations = plan.descriptions(),
            Err(CoreError::RequiresReplacement { attributes, .. }) => {
                entry.requires_replacement = Some(attributes);
            }
            Err(e) => entry.error = Some(e.to_string()),
        }
        entries.push(entry);
    }

    if json {
        println!("{}", json_pretty(&entries)?);
    } else {
        for entry in &entries {
            if let Some(attrs) = &entry.requires_replacement {
                println!(
                    "{}: requires replacement (immutable: {})",
                    entry.key,
                    attrs.join(", ")
                );
            } else if let Some(err) = &entry.error {
                println!("{}: error: {err}", entry.key);
            } else if entry.operations.is_empty() {
                println!("{}: up to date", entry.key);
            } else {
                println!("{}:", entry.key);
                for op in &entry.operations {
                    println!("  ~ {op}");
                }
            }
        }
    }

    let blocked = entries
        .iter()
        .any(|e| e.error.is_some() || e.requires_replacement.is_some());
    Ok(if blocked { EXIT_FAILURE } else { EXIT_SUCCESS })
}
