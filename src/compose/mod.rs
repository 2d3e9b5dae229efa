//! Per-project compose file loading and watching.
//!
//! Each registered project may carry a `devservers-compose.yml` at its root.
//! The loader owns one debounced, non-recursive watcher per project, keeps an
//! in-memory cache of the parsed services, and hands lock-free snapshots to
//! callers. `sync` is the only mutator.

mod parse;

pub use parse::{parse_compose, ComposeService};

use crate::catalog::ProjectRef;
use notify_debouncer_full::{
    new_debouncer,
    notify::{RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// File name looked for at each project root.
pub const COMPOSE_FILE_NAME: &str = "devservers-compose.yml";

/// Debounce window for compose file change events.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(120);

struct WatchedProject {
    project: ProjectRef,
    // Dropping the debouncer tears the watch down.
    _debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
}

pub struct ComposeLoader {
    watched: Mutex<HashMap<String, WatchedProject>>,
    cache: RwLock<HashMap<String, Vec<ComposeService>>>,
}

impl ComposeLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            watched: Mutex::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Reconcile the watcher set against the given project list.
    ///
    /// Removed projects lose their watcher and cache entry, new projects gain
    /// both, and a project whose root path changed is torn down and reloaded.
    pub fn sync(self: &Arc<Self>, projects: &[ProjectRef]) {
        let mut watched = self.watched.lock();

        let keep: HashSet<&str> = projects.iter().map(|p| p.name.as_str()).collect();

        let removed: Vec<String> = watched
            .keys()
            .filter(|name| !keep.contains(name.as_str()))
            .cloned()
            .collect();
        for name in removed {
            tracing::debug!(project = %name, "Dropping compose watcher");
            watched.remove(&name);
            self.cache.write().remove(&name);
        }

        for project in projects {
            let needs_setup = match watched.get(&project.name) {
                Some(existing) => existing.project.path != project.path,
                None => true,
            };
            if !needs_setup {
                // Same root; the monorepo hint may still have changed, and
                // it is baked into the parsed services.
                if let Some(existing) = watched.get_mut(&project.name) {
                    let hint_changed = existing.project.monorepo != project.monorepo;
                    existing.project = project.clone();
                    if hint_changed {
                        self.reload(project);
                    }
                }
                continue;
            }

            let debouncer = self.spawn_watcher(project);
            watched.insert(
                project.name.clone(),
                WatchedProject {
                    project: project.clone(),
                    _debouncer: debouncer,
                },
            );
            self.reload(project);
        }
    }

    /// Snapshot of every project's compose services, flattened.
    pub fn services(&self) -> Vec<ComposeService> {
        let cache = self.cache.read();
        let mut services: Vec<ComposeService> = cache.values().flatten().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// Re-read and re-parse a project's compose file.
    ///
    /// A missing file or a parse failure reduces the project to zero services;
    /// the watcher stays so a later fix is picked up. A reload that produces
    /// the same services leaves the cache untouched.
    pub fn reload(&self, project: &ProjectRef) {
        let compose_path = project.path.join(COMPOSE_FILE_NAME);
        let monorepo = project.monorepo.unwrap_or(false);

        let services = match std::fs::read_to_string(&compose_path) {
            Ok(content) => {
                match parse_compose(&content, &project.name, &project.path, monorepo, &compose_path)
                {
                    Ok(services) => services,
                    Err(e) => {
                        tracing::error!(
                            project = %project.name,
                            path = %compose_path.display(),
                            error = %e,
                            "Failed to parse compose file"
                        );
                        Vec::new()
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::error!(
                    project = %project.name,
                    path = %compose_path.display(),
                    error = %e,
                    "Failed to read compose file"
                );
                Vec::new()
            }
        };

        let mut cache = self.cache.write();
        match cache.get(&project.name) {
            Some(existing) if *existing == services => {}
            _ => {
                tracing::debug!(
                    project = %project.name,
                    count = services.len(),
                    "Compose services reloaded"
                );
                cache.insert(project.name.clone(), services);
            }
        }
    }

    fn spawn_watcher(
        self: &Arc<Self>,
        project: &ProjectRef,
    ) -> Option<Debouncer<RecommendedWatcher, FileIdMap>> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let project_for_events = project.clone();

        let mut debouncer = match new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let touched_compose = events.iter().any(|event| {
                        event
                            .paths
                            .iter()
                            .any(|p: &PathBuf| p.file_name().is_some_and(|f| f == COMPOSE_FILE_NAME))
                    });
                    if !touched_compose {
                        return;
                    }
                    if let Some(loader) = weak.upgrade() {
                        loader.reload(&project_for_events);
                    }
                }
                Err(errors) => {
                    tracing::warn!("Compose watch error: {:?}", errors);
                }
            },
        ) {
            Ok(debouncer) => debouncer,
            Err(e) => {
                tracing::warn!(
                    project = %project.name,
                    error = %e,
                    "Failed to create compose watcher"
                );
                return None;
            }
        };

        if let Err(e) = debouncer
            .watcher()
            .watch(&project.path, RecursiveMode::NonRecursive)
        {
            tracing::warn!(
                project = %project.name,
                path = %project.path.display(),
                error = %e,
                "Failed to watch project root"
            );
            return None;
        }

        tracing::debug!(
            project = %project.name,
            path = %project.path.display(),
            "Watching project root for compose changes"
        );
        Some(debouncer)
    }
}
