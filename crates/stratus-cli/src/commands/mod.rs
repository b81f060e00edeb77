pub mod apply;
pub mod completions;
pub mod destroy;
pub mod import;
pub mod plan;
pub mod refresh;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratus_core::{install_signal_handler, CancelToken, ReconcileConfig, Reconciler, StoreLock};
use stratus_remote::SandboxPlatform;
use stratus_schema::{parse_desired_file, DesiredResource, ResourceKey};
use stratus_store::StoreLayout;
use tracing::debug;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESIRED_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

/// State directory, remote side and reconciler of one CLI invocation. The
/// state directory stays locked until the session is dropped.
pub struct Session {
    reconciler: Reconciler,
    sandbox: Arc<SandboxPlatform>,
    sandbox_path: PathBuf,
    store_path: PathBuf,
    _lock: StoreLock,
}

impl Session {
    pub fn open(
        store_path: &Path,
        config_path: Option<&Path>,
        sandbox_path: &Path,
    ) -> Result<Self, String> {
        let config = match config_path {
            Some(p) => ReconcileConfig::load(p).map_err(|e| format!("config error: {e}"))?,
            None => ReconcileConfig::default(),
        };

        let layout = StoreLayout::new(store_path);
        let lock =
            StoreLock::acquire(&layout.lock_file()).map_err(|e| format!("store lock: {e}"))?;

        let sandbox = Arc::new(
            SandboxPlatform::load(sandbox_path)
                .map_err(|e| format!("failed to load sandbox {}: {e}", sandbox_path.display()))?,
        );

        debug!(
            "state directory {}, sandbox {}",
            store_path.display(),
            sandbox_path.display()
        );
        let cancel = CancelToken::new();
        install_signal_handler(cancel.clone());
        let reconciler = Reconciler::open(store_path, sandbox.clone(), config)
            .map_err(|e| e.to_string())?
            .with_cancel_token(cancel);

        Ok(Self {
            reconciler,
            sandbox,
            sandbox_path: sandbox_path.to_path_buf(),
            store_path: store_path.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Persist the sandbox after commands that may have changed it.
    pub fn save_sandbox(&self) -> Result<(), String> {
        self.sandbox
            .save(&self.sandbox_path)
            .map_err(|e| format!("failed to save sandbox: {e}"))
    }

    pub fn cancelled(&self) -> bool {
        self.reconciler.cancel_token().is_cancelled()
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn load_desired(path: &Path) -> Result<Vec<DesiredResource>, String> {
    parse_desired_file(path).map_err(|e| format!("desired state error: {e}"))
}

/// Record every desired resource in the store and return the keys in file
/// order.
pub fn upsert_all(
    session: &Session,
    desired: Vec<DesiredResource>,
) -> Result<Vec<ResourceKey>, String> {
    let mut keys = Vec::with_capacity(desired.len());
    for resource in desired {
        session
            .reconciler()
            .upsert(&resource.key, resource.spec)
            .map_err(|e| format!("{}: {e}", resource.key))?;
        keys.push(resource.key);
    }
    Ok(keys)
}
