use crate::instance::ResourceInstance;
use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use stratus_schema::{metadata_pairs, Attributes, ResourceKey};
use tempfile::NamedTempFile;

/// Keyed last-write-wins storage of resource instances. No cross-key
/// transactions.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &ResourceKey) -> Result<ResourceInstance, StoreError>;
    fn put(&self, instance: &ResourceInstance) -> Result<(), StoreError>;
    /// Removing an absent key is not an error.
    fn delete(&self, key: &ResourceKey) -> Result<(), StoreError>;
    fn exists(&self, key: &ResourceKey) -> Result<bool, StoreError>;
    /// All readable instances, sorted by key.
    fn list(&self) -> Result<Vec<ResourceInstance>, StoreError>;
}

pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.len() > 128 {
        return Err(StoreError::InvalidKey(
            "resource key must be 1-128 characters".to_owned(),
        ));
    }
    if key.starts_with('.')
        || !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(StoreError::InvalidKey(format!(
            "'{key}' must match [a-zA-Z0-9_.-] and not start with '.'"
        )));
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryStateStore {
    instances: Mutex<BTreeMap<ResourceKey, ResourceInstance>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &ResourceKey) -> Result<ResourceInstance, StoreError> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::InstanceNotFound(key.to_string()))
    }

    fn put(&self, instance: &ResourceInstance) -> Result<(), StoreError> {
        validate_key(&instance.key)?;
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.insert(instance.key.clone(), instance.clone());
        Ok(())
    }

    fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.remove(key);
        Ok(())
    }

    fn exists(&self, key: &ResourceKey) -> Result<bool, StoreError> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(instances.contains_key(key))
    }

    fn list(&self) -> Result<Vec<ResourceInstance>, StoreError> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(instances.values().cloned().collect())
    }
}

/// Flat `key -> value` view of the observed `metadata_entry` list, kept for
/// readers of the older state format.
pub fn legacy_metadata_view(observed: &Attributes) -> BTreeMap<String, String> {
    metadata_pairs(observed)
}

/// On-disk envelope. The checksum covers `instance` only.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    instance: ResourceInstance,
    /// Derived on write, ignored on read.
    #[serde(default, skip_deserializing, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

fn compute_checksum(instance: &ResourceInstance) -> Result<String, StoreError> {
    let json = serde_json::to_string(instance)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

/// One JSON file per instance, written atomically with an embedded blake3
/// checksum.
pub struct FileStateStore {
    layout: StoreLayout,
}

impl FileStateStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.layout.instances_dir().join(format!("{key}.json"))
    }

    fn read(&self, key: &str) -> Result<ResourceInstance, StoreError> {
        let path = self.path(key);
        if !path.exists() {
            return Err(StoreError::InstanceNotFound(key.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        let record: StoredRecord = serde_json::from_str(&content)?;

        if let Some(expected) = record.checksum {
            let actual = compute_checksum(&record.instance)?;
            if actual != expected {
                return Err(StoreError::IntegrityFailure {
                    key: key.to_owned(),
                    expected,
                    actual,
                });
            }
        }
        Ok(record.instance)
    }

    /// Like `list()`, but keeps unreadable entries as errors so a verify
    /// command can surface them.
    #[allow(clippy::type_complexity)]
    pub fn list_with_errors(
        &self,
    ) -> Result<Vec<Result<ResourceInstance, (String, StoreError)>>, StoreError> {
        let mut results = Vec::new();
        for key in self.keys()? {
            match self.read(&key) {
                Ok(inst) => results.push(Ok(inst)),
                Err(e) => results.push(Err((key, e))),
            }
        }
        Ok(results)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.instances_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_str().unwrap_or("");
            if let Some(key) = name_str.strip_suffix(".json") {
                if !key.starts_with('.') {
                    keys.push(key.to_owned());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &ResourceKey) -> Result<ResourceInstance, StoreError> {
        validate_key(key)?;
        self.read(key)
    }

    fn put(&self, instance: &ResourceInstance) -> Result<(), StoreError> {
        validate_key(&instance.key)?;
        let record = StoredRecord {
            checksum: Some(compute_checksum(instance)?),
            metadata: legacy_metadata_view(&instance.observed),
            instance: instance.clone(),
        };
        let content = serde_json::to_string_pretty(&record)?;

        let dir = self.layout.instances_dir();
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(&instance.key))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        validate_key(key)?;
        let path = self.path(key);
        if path.exists() {
            fs::remove_file(path)?;
            fsync_dir(&self.layout.instances_dir())?;
        }
        Ok(())
    }

    fn exists(&self, key: &ResourceKey) -> Result<bool, StoreError> {
        validate_key(key)?;
        Ok(self.path(key).exists())
    }

    fn list(&self) -> Result<Vec<ResourceInstance>, StoreError> {
        let mut results = Vec::new();
        for key in self.keys()? {
            match self.read(&key) {
                Ok(inst) => results.push(inst),
                Err(e) => {
                    tracing::warn!("skipping unreadable instance '{key}': {e}");
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{ErrorKind, LifecycleState};
    use stratus_schema::{parse_desired_str, AttrValue, ResourceId};

    const VAPP: &str = r#"
[[resource]]
key = "web-app"
[resource.spec]
kind = "vapp"
name = "web"
vdc_id = "urn:vcloud:vdc:1"
"#;

    fn sample() -> ResourceInstance {
        let spec = parse_desired_str(VAPP).unwrap().remove(0);
        ResourceInstance::new(spec.key, spec.spec)
    }

    fn metadata_observed() -> Attributes {
        let mut entry = Attributes::new();
        entry.insert("key".to_owned(), AttrValue::from("env"));
        entry.insert("value".to_owned(), AttrValue::from("prod"));
        entry.insert("type".to_owned(), AttrValue::from("MetadataStringValue"));
        entry.insert("is_system".to_owned(), AttrValue::Bool(false));
        let mut observed = Attributes::new();
        observed.insert("name".to_owned(), AttrValue::from("web"));
        observed.insert(
            "metadata_entry".to_owned(),
            AttrValue::List(vec![AttrValue::Map(entry)]),
        );
        observed
    }

    fn file_store() -> (tempfile::TempDir, FileStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, FileStateStore::new(layout))
    }

    #[test]
    fn validate_key_rules() {
        assert!(validate_key("vdc-main_1.eu").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key(&"x".repeat(129)).is_err());
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStateStore::new();
        let inst = sample();
        store.put(&inst).unwrap();
        assert!(store.exists(&inst.key).unwrap());
        assert_eq!(store.get(&inst.key).unwrap(), inst);
        store.delete(&inst.key).unwrap();
        assert!(matches!(
            store.get(&inst.key),
            Err(StoreError::InstanceNotFound(_))
        ));
    }

    #[test]
    fn file_store_roundtrip() {
        let (_dir, store) = file_store();
        let mut inst = sample();
        inst.assign_id(ResourceId::new("urn:vcloud:vapp:7")).unwrap();
        inst.observed = metadata_observed();
        inst.status.state = LifecycleState::Live;
        store.put(&inst).unwrap();
        assert_eq!(store.get(&inst.key).unwrap(), inst);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn tampered_record_rejected() {
        let (dir, store) = file_store();
        let inst = sample();
        store.put(&inst).unwrap();
        let path = StoreLayout::new(dir.path())
            .instances_dir()
            .join("web-app.json");
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("\"web\"", "\"evil\"")).unwrap();
        assert!(matches!(
            store.get(&inst.key),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn legacy_view_written_but_not_read() {
        let (dir, store) = file_store();
        let mut inst = sample();
        inst.observed = metadata_observed();
        store.put(&inst).unwrap();

        let path = StoreLayout::new(dir.path())
            .instances_dir()
            .join("web-app.json");
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["metadata"]["env"], "prod");

        // Editing the legacy view has no effect on the canonical list.
        let mut edited = raw.clone();
        edited["metadata"]["env"] = serde_json::json!("staging");
        fs::write(&path, serde_json::to_string(&edited).unwrap()).unwrap();
        let back = store.get(&inst.key).unwrap();
        assert_eq!(legacy_metadata_view(&back.observed)["env"], "prod");
    }

    #[test]
    fn list_skips_corrupt_entries() {
        let (dir, store) = file_store();
        store.put(&sample()).unwrap();
        fs::write(
            StoreLayout::new(dir.path())
                .instances_dir()
                .join("broken.json"),
            "NOT JSON",
        )
        .unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        let with_errors = store.list_with_errors().unwrap();
        assert_eq!(with_errors.len(), 2);
        assert_eq!(with_errors.iter().filter(|r| r.is_err()).count(), 1);
    }

    #[test]
    fn status_persists() {
        let (_dir, store) = file_store();
        let mut inst = sample();
        inst.record_error(ErrorKind::Timeout, "task did not finish");
        inst.status.needs_refresh = true;
        store.put(&inst).unwrap();
        let back = store.get(&inst.key).unwrap();
        assert_eq!(back.status.last_error, Some(ErrorKind::Timeout));
        assert!(back.status.needs_refresh);
    }

    #[test]
    fn delete_missing_is_ok() {
        let (_dir, store) = file_store();
        store.delete(&ResourceKey::new("nope")).unwrap();
    }
}
