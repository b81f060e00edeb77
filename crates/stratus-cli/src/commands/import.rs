use super::{json_pretty, load_desired, Session, EXIT_SUCCESS};
use std::path::Path;
use stratus_core::StatusReport;

pub fn run(
    session: &Session,
    desired: &Path,
    key: &str,
    path: &str,
    json: bool,
) -> Result<u8, String> {
    let resource = load_desired(desired)?
        .into_iter()
        .find(|r| r.key.as_str() == key)
        .ok_or_else(|| {
            format!(
                "desired state error: no resource '{key}' in {}",
                desired.display()
            )
        })?;

    let inst = session
        .reconciler()
        .import(&resource.key, resource.spec, path)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&StatusReport::from(&inst))?);
    } else {
        println!(
            "imported {} {} as {key}",
            inst.kind,
            inst.id().map_or("", |id| id.as_str())
        );
    }
    Ok(EXIT_SUCCESS)
}
