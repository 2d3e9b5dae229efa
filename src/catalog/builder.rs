//! Building the merged catalog: config services plus compose services,
//! annotated with their source of truth.

use super::{Catalog, PortMode, ServiceEntry};
use crate::compose::ComposeService;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Which file a merged service came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceSource {
    Config,
    Compose,
}

/// A service in the merged catalog, regardless of origin.
#[derive(Debug, Clone)]
pub struct CatalogService {
    pub name: String,
    pub cwd: PathBuf,
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub port: Option<u16>,
    pub port_mode: PortMode,
    pub depends_on: Vec<String>,
    pub last_started_at: Option<String>,
    pub source: ServiceSource,
    pub project: Option<String>,
    pub monorepo: bool,
    pub compose_path: Option<PathBuf>,
    /// Untouched source definition for read-only display.
    pub definition: serde_json::Value,
}

impl CatalogService {
    fn from_config(entry: &ServiceEntry) -> Self {
        Self {
            name: entry.name.clone(),
            cwd: entry.cwd.clone(),
            command: entry.command.clone(),
            env: entry.env.clone().unwrap_or_default(),
            port: entry.port,
            port_mode: entry.port_mode(),
            depends_on: entry.depends_on.clone().unwrap_or_default(),
            last_started_at: entry.last_started_at.clone(),
            source: ServiceSource::Config,
            project: None,
            monorepo: false,
            compose_path: None,
            definition: serde_json::to_value(entry).unwrap_or(serde_json::Value::Null),
        }
    }

    fn from_compose(service: &ComposeService) -> Self {
        Self {
            name: service.name.clone(),
            cwd: service.cwd.clone(),
            command: service.command.clone(),
            env: service.env.clone(),
            port: service.port,
            port_mode: service.port_mode,
            depends_on: service.depends_on.clone(),
            last_started_at: None,
            source: ServiceSource::Compose,
            project: Some(service.project.clone()),
            monorepo: service.monorepo,
            compose_path: Some(service.compose_path.clone()),
            definition: service.definition.clone(),
        }
    }
}

/// The merged service list used transactionally inside one request.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub services: Vec<CatalogService>,
}

impl CatalogSnapshot {
    pub fn get(&self, name: &str) -> Option<&CatalogService> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.name.as_str())
    }
}

/// Merge config and compose services into one flat list.
///
/// Config services come first in insertion order, then compose services. A
/// name shared between the two sources (or between two projects) is a fatal
/// catalog error.
pub fn build_catalog(
    catalog: &Catalog,
    compose_services: &[ComposeService],
) -> Result<CatalogSnapshot> {
    let mut services = Vec::with_capacity(catalog.services.len() + compose_services.len());
    let mut seen: HashSet<&str> = HashSet::new();

    for entry in &catalog.services {
        seen.insert(entry.name.as_str());
        services.push(CatalogService::from_config(entry));
    }

    for compose in compose_services {
        if !seen.insert(compose.name.as_str()) {
            return Err(Error::Validation(format!(
                "Service name collision: '{}' is defined both in the configuration and by project '{}'",
                compose.name, compose.project
            )));
        }
        services.push(CatalogService::from_compose(compose));
    }

    Ok(CatalogSnapshot { services })
}
