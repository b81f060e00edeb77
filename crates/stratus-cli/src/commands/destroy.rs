use super::{json_pretty, Session, EXIT_SUCCESS};
use stratus_remote::DeletePolicy;
use stratus_schema::ResourceKey;

pub fn run(
    session: &Session,
    key: &str,
    force: bool,
    recursive: bool,
    json: bool,
) -> Result<u8, String> {
    let key = ResourceKey::new(key);
    let result = session
        .reconciler()
        .destroy(&key, DeletePolicy { force, recursive });
    session.save_sandbox()?;
    result.map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "key": key,
            "status": "destroyed"
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("destroyed {key}");
    }
    Ok(EXIT_SUCCESS)
}
