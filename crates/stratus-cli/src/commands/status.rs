use super::{json_pretty, Session, EXIT_SUCCESS};
use serde::Serialize;
use stratus_core::StatusReport;
use stratus_schema::ResourceKey;
use stratus_store::{FileStateStore, StoreLayout};

#[derive(Debug, Serialize)]
struct Unreadable {
    key: String,
    error: String,
}

pub fn run(session: &Session, key: Option<&str>, json: bool) -> Result<u8, String> {
    let (reports, unreadable) = match key {
        Some(k) => (
            session
                .reconciler()
                .status(Some(&ResourceKey::new(k)))
                .map_err(|e| e.to_string())?,
            Vec::new(),
        ),
        None => list_all(session)?,
    };

    if json {
        let payload = serde_json::json!({
            "instances": reports,
            "unreadable": unreadable,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    if reports.is_empty() && unreadable.is_empty() {
        println!("no instances found");
    } else {
        println!(
            "{:<24} {:<16} {:<15} {:<24} ID",
            "KEY", "KIND", "STATE", "LAST_ERROR"
        );
        for r in &reports {
            let last_error = r.last_error.map(|e| e.to_string()).unwrap_or_default();
            println!(
                "{:<24} {:<16} {:<15} {:<24} {}",
                r.key,
                r.kind.to_string(),
                r.state.to_string(),
                last_error,
                r.id.as_deref().unwrap_or("-")
            );
            if r.requires_replacement {
                println!("  requires replacement: {}", r.replacement.join(", "));
            }
            if r.vanished {
                println!("  remote object vanished");
            }
            if r.needs_refresh {
                println!("  interrupted plan; refreshed before the next plan");
            }
            if let Some(msg) = &r.last_error_message {
                println!("  {msg}");
            }
        }
        for u in &unreadable {
            println!("{:<24} unreadable: {}", u.key, u.error);
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Every instance on disk, keeping corrupt records visible instead of failing
/// the whole listing.
fn list_all(session: &Session) -> Result<(Vec<StatusReport>, Vec<Unreadable>), String> {
    let store = FileStateStore::new(StoreLayout::new(session.store_path()));
    let mut reports = Vec::new();
    let mut unreadable = Vec::new();
    for entry in store.list_with_errors().map_err(|e| e.to_string())? {
        match entry {
            Ok(inst) => reports.push(StatusReport::from(&inst)),
            Err((key, e)) => unreadable.push(Unreadable {
                key,
                error: e.to_string(),
            }),
        }
    }
    Ok((reports, unreadable))
}
