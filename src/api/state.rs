//! Shared daemon state handed to every request handler.

use crate::catalog::{build_catalog, Catalog, CatalogSnapshot, Store};
use crate::compose::ComposeLoader;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::supervisor::Supervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub config_path: PathBuf,
    /// Held across every config-file read-modify-write window so concurrent
    /// mutating requests cannot interleave their reads and writes.
    pub config_lock: Arc<Mutex<()>>,
    pub compose: Arc<ComposeLoader>,
    pub orchestrator: Orchestrator,
    pub cancel: CancellationToken,
    pub ui_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        config_path: PathBuf,
        supervisor: Arc<dyn Supervisor>,
        ui_dir: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let config_lock = Arc::new(Mutex::new(()));
        let orchestrator = Orchestrator::new(
            supervisor,
            config_path.clone(),
            Arc::clone(&config_lock),
            cancel.clone(),
        );
        Arc::new(Self {
            config_path,
            config_lock,
            compose: ComposeLoader::new(),
            orchestrator,
            cancel,
            ui_dir,
        })
    }

    /// Fresh read-through aggregation for one request: re-read the config
    /// file, reconcile compose watchers, merge. Never cached across requests.
    pub fn snapshot(&self) -> Result<(Catalog, CatalogSnapshot)> {
        let catalog = Store::read(&self.config_path)?;
        self.compose.sync(&catalog.registered_projects);
        let merged = build_catalog(&catalog, &self.compose.services())?;
        Ok((catalog, merged))
    }
}
