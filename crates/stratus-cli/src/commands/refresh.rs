use super::{json_pretty, Session, EXIT_SUCCESS};
use stratus_schema::ResourceKey;

pub fn run(session: &Session, key: &str, json: bool) -> Result<u8, String> {
    let key = ResourceKey::new(key);
    let report = session
        .reconciler()
        .refresh(&key)
        .map_err(|e| e.to_string())?;
    let vanished = session
        .reconciler()
        .get(&key)
        .map(|inst| inst.status.vanished)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else if vanished {
        println!("remote object of {key} vanished; apply --allow-recreate to create it again");
    } else if report.has_drift {
        println!("drift detected in {key}:");
        for a in &report.added {
            println!("  + {a}");
        }
        for a in &report.changed {
            println!("  ~ {a}");
        }
        for a in &report.removed {
            println!("  - {a}");
        }
    } else {
        println!("no drift detected in {key}");
    }
    Ok(EXIT_SUCCESS)
}
