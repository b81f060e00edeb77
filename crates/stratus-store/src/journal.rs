use crate::layout::StoreLayout;
use crate::state::StateStore;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use stratus_schema::ResourceKey;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// An in-flight plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub op_id: String,
    pub key: ResourceKey,
    pub timestamp: String,
    /// Human-readable descriptions of the planned operations, in order.
    pub operations: Vec<String>,
    /// Number of operations confirmed applied.
    pub completed: usize,
}

/// Write-ahead journal of plan executions.
///
/// An entry is written before the first remote call of a plan, advanced after
/// every applied operation and removed when the plan finishes. Remote effects
/// cannot be undone, so recovery does not roll anything back: it flags the
/// affected instances so their observed state is re-read before the next plan.
pub struct PlanJournal {
    dir: PathBuf,
}

impl PlanJournal {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            dir: layout.journal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Begin a journal entry for a plan. Returns the op_id.
    pub fn begin(&self, key: &ResourceKey, operations: Vec<String>) -> Result<String, StoreError> {
        let now = chrono::Utc::now();
        let op_id = format!(
            "{}-{}",
            now.format("%Y%m%d%H%M%S%6f"),
            &blake3::hash(key.as_bytes()).to_hex()[..8]
        );
        let entry = JournalEntry {
            op_id: op_id.clone(),
            key: key.clone(),
            timestamp: now.to_rfc3339(),
            operations,
            completed: 0,
        };
        self.write_entry(&entry)?;
        debug!("journal begin: {} ops for {key} (op_id={op_id})", entry.operations.len());
        Ok(op_id)
    }

    /// Record that one more operation of the plan took effect remotely.
    pub fn record_step(&self, op_id: &str) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.completed += 1;
        self.write_entry(&entry)
    }

    /// Remove an entry once the plan finished, successfully or with a
    /// classified error that was already written to the instance.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("journal commit: {op_id}");
        }
        Ok(())
    }

    pub fn list_incomplete(&self) -> Result<Vec<JournalEntry>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|c| serde_json::from_str::<JournalEntry>(&c).map_err(StoreError::from))
            {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("corrupt journal entry {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Flag every instance with an incomplete entry for refresh and drop the
    /// entries. Returns the affected keys.
    pub fn recover(&self, store: &dyn StateStore) -> Result<Vec<ResourceKey>, StoreError> {
        let entries = self.list_incomplete()?;
        let mut affected = Vec::new();
        for entry in &entries {
            info!(
                "journal recovery: {} was interrupted after {}/{} operations (op_id={})",
                entry.key,
                entry.completed,
                entry.operations.len(),
                entry.op_id
            );
            match store.get(&entry.key) {
                Ok(mut inst) => {
                    inst.status.needs_refresh = true;
                    inst.touch();
                    store.put(&inst)?;
                }
                Err(StoreError::InstanceNotFound(_)) => {
                    debug!("journal recovery: {} no longer tracked", entry.key);
                }
                Err(e) => return Err(e),
            }
            let _ = fs::remove_file(self.entry_path(&entry.op_id));
            if !affected.contains(&entry.key) {
                affected.push(entry.key.clone());
            }
        }
        if !affected.is_empty() {
            info!("journal recovery complete: {} instances need refresh", affected.len());
        }
        Ok(affected)
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.entry_path(&entry.op_id))
            .map_err(|e| StoreError::Io(e.error))?;
        crate::fsync_dir(&self.dir)?;
        Ok(())
    }

    fn read_entry(&self, op_id: &str) -> Result<JournalEntry, StoreError> {
        let path = self.entry_path(op_id);
        if !path.exists() {
            return Err(StoreError::JournalEntryNotFound(op_id.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::ResourceInstance;
    use crate::state::FileStateStore;
    use stratus_schema::parse_desired_str;

    fn setup() -> (tempfile::TempDir, StoreLayout, PlanJournal) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let journal = PlanJournal::new(&layout);
        journal.initialize().unwrap();
        (dir, layout, journal)
    }

    fn org_instance(key: &str) -> ResourceInstance {
        let toml = format!(
            "[[resource]]\nkey = \"{key}\"\n[resource.spec]\nkind = \"org\"\nname = \"acme\"\nfull_name = \"Acme\"\n"
        );
        let r = parse_desired_str(&toml).unwrap().remove(0);
        ResourceInstance::new(r.key, r.spec)
    }

    #[test]
    fn begin_and_commit() {
        let (_dir, _layout, journal) = setup();
        let key = ResourceKey::new("org");
        let op_id = journal.begin(&key, vec!["update core".to_owned()]).unwrap();
        assert_eq!(journal.list_incomplete().unwrap().len(), 1);
        journal.commit(&op_id).unwrap();
        assert!(journal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn record_step_advances() {
        let (_dir, _layout, journal) = setup();
        let key = ResourceKey::new("org");
        let op_id = journal
            .begin(&key, vec!["a".to_owned(), "b".to_owned()])
            .unwrap();
        journal.record_step(&op_id).unwrap();
        let entries = journal.list_incomplete().unwrap();
        assert_eq!(entries[0].completed, 1);
        assert_eq!(entries[0].operations.len(), 2);
    }

    #[test]
    fn record_step_on_unknown_entry_fails() {
        let (_dir, _layout, journal) = setup();
        assert!(matches!(
            journal.record_step("missing"),
            Err(StoreError::JournalEntryNotFound(_))
        ));
    }

    #[test]
    fn recover_flags_instances() {
        let (_dir, layout, journal) = setup();
        let store = FileStateStore::new(layout);
        let inst = org_instance("org");
        store.put(&inst).unwrap();

        let op_id = journal.begin(&inst.key, vec!["update core".to_owned()]).unwrap();
        journal.record_step(&op_id).unwrap();

        let affected = journal.recover(&store).unwrap();
        assert_eq!(affected, vec![inst.key.clone()]);
        assert!(store.get(&inst.key).unwrap().status.needs_refresh);
        assert!(journal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn recover_tolerates_forgotten_instance() {
        let (_dir, layout, journal) = setup();
        let store = FileStateStore::new(layout);
        journal.begin(&ResourceKey::new("gone"), Vec::new()).unwrap();
        let affected = journal.recover(&store).unwrap();
        assert_eq!(affected.len(), 1);
    }

    #[test]
    fn corrupt_entries_dropped() {
        let (_dir, layout, journal) = setup();
        fs::write(layout.journal_dir().join("junk.json"), "{").unwrap();
        assert!(journal.list_incomplete().unwrap().is_empty());
        assert!(!layout.journal_dir().join("junk.json").exists());
    }
}
