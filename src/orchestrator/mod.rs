//! Start/stop/restart semantics over the merged catalog.
//!
//! The orchestrator is stateless between requests apart from two runtime
//! maps (log-detected ports, compose start stamps). Each operation receives
//! the catalog snapshot and dependency graph its request built, resolves
//! ports per service, drives the supervisor one service at a time in
//! topological order, and persists bookkeeping through the catalog store.

use crate::catalog::{Catalog, CatalogService, CatalogSnapshot, PortMode, ServiceSource, Store};
use crate::detector;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::registry::{registry_path_for, EnsurePortOptions, PortRegistry};
use crate::supervisor::{Status, Supervisor};
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Runtime-only observations, never persisted.
#[derive(Default)]
struct RuntimeMaps {
    /// Ports scraped from logs, by service name. Freshest write wins.
    detected_ports: RwLock<HashMap<String, u16>>,
    /// Start stamps for compose services (their files are not writable state).
    compose_started_at: RwLock<HashMap<String, String>>,
}

/// Derived per-service state returned to the listing endpoint.
#[derive(Debug, Clone)]
pub struct ServiceRuntime {
    pub status: Status,
    pub port: Option<u16>,
    pub last_started_at: Option<String>,
}

pub struct Orchestrator {
    supervisor: Arc<dyn Supervisor>,
    config_path: PathBuf,
    /// Serializes every read-modify-write window on the config and registry
    /// files; shared with the API layer's mutating handlers.
    config_lock: Arc<Mutex<()>>,
    runtime: Arc<RuntimeMaps>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        supervisor: Arc<dyn Supervisor>,
        config_path: PathBuf,
        config_lock: Arc<Mutex<()>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            supervisor,
            config_path,
            config_lock,
            runtime: Arc::new(RuntimeMaps::default()),
            cancel,
        }
    }

    pub fn supervisor(&self) -> &Arc<dyn Supervisor> {
        &self.supervisor
    }

    fn registry(&self) -> PortRegistry {
        PortRegistry::new(registry_path_for(&self.config_path))
    }

    /// Start `name` and everything it depends on, dependencies first.
    ///
    /// A failing service aborts the remaining targets.
    pub async fn start(
        &self,
        snapshot: &CatalogSnapshot,
        graph: &DependencyGraph,
        name: &str,
    ) -> Result<()> {
        if snapshot.get(name).is_none() {
            return Err(Error::ServiceNotFound(name.to_string()));
        }

        let order = graph.topo_sort(&graph.dependency_closure(name));
        let mut service_ports = self.known_ports(snapshot)?;

        for target in &order {
            self.start_one(snapshot, target, &mut service_ports).await?;
        }
        Ok(())
    }

    /// Stop `name` and everything that depends on it, dependents first.
    ///
    /// Individual failures are logged and do not abort the traversal.
    pub async fn stop(
        &self,
        snapshot: &CatalogSnapshot,
        graph: &DependencyGraph,
        name: &str,
    ) -> Result<()> {
        if snapshot.get(name).is_none() {
            return Err(Error::ServiceNotFound(name.to_string()));
        }

        let mut order = graph.topo_sort(&graph.dependent_closure(name));
        order.reverse();

        for target in &order {
            if let Err(e) = self.supervisor.stop(target).await {
                tracing::warn!(service = %target, error = %e, "Stop failed");
            }
        }
        Ok(())
    }

    /// Restart `name` itself after making sure its strict dependencies run.
    /// Dependents are left untouched.
    pub async fn restart(
        &self,
        snapshot: &CatalogSnapshot,
        graph: &DependencyGraph,
        name: &str,
    ) -> Result<()> {
        let service = snapshot
            .get(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;

        let order = graph.topo_sort(&graph.dependency_closure(name));
        let mut service_ports = self.known_ports(snapshot)?;

        for target in order.iter().filter(|t| t.as_str() != name) {
            self.start_one(snapshot, target, &mut service_ports).await?;
        }

        let resolved = {
            let _guard = self.config_lock.lock().await;
            self.resolve_port(snapshot, service, &mut service_ports)?
        };
        let baseline = detector::baseline_snapshot(&self.supervisor, name)
            .await
            .unwrap_or_default();
        let started = self
            .supervisor
            .restart(service, resolved, &service_ports)
            .await?;
        if started {
            self.record_started(service).await?;
            if service.port_mode == PortMode::Detect {
                self.spawn_detection(service, baseline);
            }
        }
        Ok(())
    }

    /// Derive runtime state for every cataloged service and prune runtime
    /// maps of names that fell out of the catalog.
    pub async fn runtime_for(&self, snapshot: &CatalogSnapshot) -> HashMap<String, ServiceRuntime> {
        self.prune_runtime(snapshot);

        // Listing never allocates: the registry is consulted read-only.
        let registry_ports = self.registry().read(false).unwrap_or_default();

        let mut result = HashMap::with_capacity(snapshot.services.len());
        for service in &snapshot.services {
            let status = self.supervisor.get_status(&service.name).await;
            let port = self.display_port(service, &registry_ports);
            let last_started_at = match service.source {
                ServiceSource::Config => service.last_started_at.clone(),
                ServiceSource::Compose => self
                    .runtime
                    .compose_started_at
                    .read()
                    .get(&service.name)
                    .cloned(),
            };
            result.insert(
                service.name.clone(),
                ServiceRuntime {
                    status,
                    port,
                    last_started_at,
                },
            );
        }
        result
    }

    /// One service's start path: resolve its port, hand it to the
    /// supervisor, stamp bookkeeping, schedule detection.
    async fn start_one(
        &self,
        snapshot: &CatalogSnapshot,
        name: &str,
        service_ports: &mut HashMap<String, u16>,
    ) -> Result<()> {
        let service = snapshot
            .get(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;

        // Registry allocation is a read-modify-write of a shared file; it
        // happens under the same mutex as config writes.
        let resolved = {
            let _guard = self.config_lock.lock().await;
            self.resolve_port(snapshot, service, service_ports)?
        };

        let baseline = if service.port_mode == PortMode::Detect {
            detector::baseline_snapshot(&self.supervisor, name)
                .await
                .unwrap_or_default()
        } else {
            String::new()
        };

        let started = self
            .supervisor
            .start(service, resolved, service_ports)
            .await?;

        if started {
            self.record_started(service).await?;
            if service.port_mode == PortMode::Detect {
                self.spawn_detection(service, baseline);
            }
        }
        Ok(())
    }

    /// Resolve the port a service starts with, updating the shared template
    /// map as a side effect.
    fn resolve_port(
        &self,
        snapshot: &CatalogSnapshot,
        service: &CatalogService,
        service_ports: &mut HashMap<String, u16>,
    ) -> Result<Option<u16>> {
        let resolved = match service.port_mode {
            PortMode::Static | PortMode::Detect => service.port,
            PortMode::Registry => {
                // Ports statically declared by everyone else are off limits,
                // otherwise a registry assignment could shadow them.
                let reserved: HashSet<u16> = snapshot
                    .services
                    .iter()
                    .filter(|s| s.name != service.name)
                    .filter_map(|s| s.port)
                    .collect();
                let port = self.registry().ensure_port(
                    &service.name,
                    EnsurePortOptions {
                        preferred_port: service.port,
                        base_port: None,
                        reserved,
                        create_if_missing: true,
                    },
                )?;
                Some(port)
            }
        };

        if let Some(port) = resolved {
            service_ports.insert(service.name.clone(), port);
        }
        Ok(resolved)
    }

    /// Known ports of every service, for `${PORT:name}` expansion.
    fn known_ports(&self, snapshot: &CatalogSnapshot) -> Result<HashMap<String, u16>> {
        let registry_ports = self.registry().read(false).unwrap_or_default();
        let mut ports = HashMap::new();
        for service in &snapshot.services {
            if let Some(port) = self.display_port(service, &registry_ports) {
                ports.insert(service.name.clone(), port);
            }
        }
        Ok(ports)
    }

    /// The port shown for a service: detected at runtime when available,
    /// registry assignment for registry mode, declared value otherwise.
    fn display_port(
        &self,
        service: &CatalogService,
        registry_ports: &std::collections::BTreeMap<String, u16>,
    ) -> Option<u16> {
        match service.port_mode {
            PortMode::Detect => self
                .runtime
                .detected_ports
                .read()
                .get(&service.name)
                .copied()
                .or(service.port),
            PortMode::Registry => registry_ports.get(&service.name).copied(),
            PortMode::Static => service.port,
        }
    }

    /// Stamp `lastStartedAt = now`: persisted for config services, runtime
    /// map for compose services.
    async fn record_started(&self, service: &CatalogService) -> Result<()> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        match service.source {
            ServiceSource::Config => {
                let _guard = self.config_lock.lock().await;
                let catalog = Store::read(&self.config_path)?;
                let updated = set_entry(&catalog, &service.name, |entry| {
                    entry.last_started_at = Some(stamp.clone());
                });
                if let Some(updated) = updated {
                    Store::write(&self.config_path, &updated)?;
                }
            }
            ServiceSource::Compose => {
                self.runtime
                    .compose_started_at
                    .write()
                    .insert(service.name.clone(), stamp);
            }
        }
        Ok(())
    }

    /// Launch the background detection task for a `detect`-mode service.
    ///
    /// Tasks outlive their request and are reaped only by daemon shutdown; a
    /// newer start simply spawns a fresh task and the freshest write wins.
    fn spawn_detection(&self, service: &CatalogService, baseline: String) {
        let supervisor = Arc::clone(&self.supervisor);
        let runtime = Arc::clone(&self.runtime);
        let config_path = self.config_path.clone();
        let config_lock = Arc::clone(&self.config_lock);
        let cancel = self.cancel.child_token();
        let name = service.name.clone();
        let source = service.source;

        tokio::spawn(async move {
            let Some(port) = detector::detect_port(supervisor, &name, baseline, cancel).await
            else {
                return;
            };

            runtime.detected_ports.write().insert(name.clone(), port);

            if source == ServiceSource::Config {
                let _guard = config_lock.lock().await;
                let result = Store::read(&config_path).and_then(|catalog| {
                    match set_entry(&catalog, &name, |entry| entry.port = Some(port)) {
                        Some(updated) => Store::write(&config_path, &updated),
                        None => Ok(()),
                    }
                });
                if let Err(e) = result {
                    tracing::warn!(service = %name, error = %e, "Failed to persist detected port");
                }
            }
        });
    }

    fn prune_runtime(&self, snapshot: &CatalogSnapshot) {
        let names: HashSet<&str> = snapshot.names().collect();
        self.runtime
            .detected_ports
            .write()
            .retain(|name, _| names.contains(name.as_str()));
        self.runtime
            .compose_started_at
            .write()
            .retain(|name, _| names.contains(name.as_str()));
    }
}

/// Apply a mutation to one service entry, returning the new catalog, or
/// `None` when the entry no longer exists.
fn set_entry(
    catalog: &Catalog,
    name: &str,
    mutate: impl FnOnce(&mut crate::catalog::ServiceEntry),
) -> Option<Catalog> {
    let mut next = catalog.clone();
    let entry = next.services.iter_mut().find(|s| s.name == name)?;
    mutate(entry);
    Some(next)
}
