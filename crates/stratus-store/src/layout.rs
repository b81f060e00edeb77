use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current state directory format version.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a stratus state directory.
///
/// ```text
/// <root>/state/version
/// <root>/state/.lock
/// <root>/state/instances/<key>.json
/// <root>/state/journal/<op_id>.json
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    #[inline]
    pub fn instances_dir(&self) -> PathBuf {
        self.state_dir().join("instances")
    }

    #[inline]
    pub fn journal_dir(&self) -> PathBuf {
        self.state_dir().join("journal")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir().join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.instances_dir())?;
        fs::create_dir_all(self.journal_dir())?;

        let state_dir = self.state_dir();
        let version_path = state_dir.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&state_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&state_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.state_dir().join(VERSION_FILE))?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/tmp/stratus-test");
        assert_eq!(
            layout.instances_dir(),
            PathBuf::from("/tmp/stratus-test/state/instances")
        );
        assert_eq!(
            layout.journal_dir(),
            PathBuf::from("/tmp/stratus-test/state/journal")
        );
        assert_eq!(
            layout.lock_file(),
            PathBuf::from("/tmp/stratus-test/state/.lock")
        );
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
        assert!(layout.instances_dir().is_dir());
    }

    #[test]
    fn future_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(
            layout.state_dir().join(VERSION_FILE),
            r#"{"format_version": 99}"#,
        )
        .unwrap();
        assert!(matches!(
            layout.initialize(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}
