//! Catalog types: the persisted configuration file schema and the merged
//! service view the rest of the daemon operates on.

mod builder;
mod store;

pub use builder::{build_catalog, CatalogService, CatalogSnapshot, ServiceSource};
pub use store::{default_config_path, resolve_config_path, Store};

pub(crate) use store::atomic_write;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

pub const CONFIG_VERSION: u64 = 1;

/// Policy for choosing a service's port at start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    /// Use the declared `port` as-is.
    #[default]
    Static,
    /// Scrape the port from the service's own startup logs.
    Detect,
    /// Assign and persist a port in the shared registry file.
    Registry,
}

/// A service as declared in the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceEntry {
    pub name: String,

    /// Absolute working directory the command runs in.
    pub cwd: PathBuf,

    /// Shell command line typed into the service's window.
    pub command: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_mode: Option<PortMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,

    /// RFC 3339 timestamp of the last successful start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<String>,
}

impl ServiceEntry {
    pub fn port_mode(&self) -> PortMode {
        self.port_mode.unwrap_or_default()
    }
}

/// A repository registered so its compose file contributes services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectRef {
    pub name: String,

    /// Absolute path to the project root directory.
    pub path: PathBuf,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monorepo: Option<bool>,
}

/// The primary configuration file. Unknown top-level keys are tolerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub version: u64,

    #[serde(default)]
    pub services: Vec<ServiceEntry>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registered_projects: Vec<ProjectRef>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            services: Vec::new(),
            registered_projects: Vec::new(),
        }
    }
}

/// Check a service or project name against the allowed charset.
///
/// Names must be non-empty and limited to alphanumerics plus `.`, `_`, `-`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

impl Catalog {
    /// Validate the catalog against the file schema.
    ///
    /// Graph-level properties (dependency targets, cycles) are checked later
    /// on the merged catalog; this only enforces what a single file can break.
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(Error::Validation(format!(
                "Unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if !is_valid_name(&service.name) {
                return Err(Error::Validation(format!(
                    "Invalid service name '{}': allowed characters are A-Z a-z 0-9 . _ -",
                    service.name
                )));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(Error::Validation(format!(
                    "Duplicate service name '{}'",
                    service.name
                )));
            }
            if !service.cwd.is_absolute() {
                return Err(Error::Validation(format!(
                    "Service '{}': cwd must be an absolute path",
                    service.name
                )));
            }
            if service.command.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "Service '{}': command cannot be empty",
                    service.name
                )));
            }
            if let Some(port) = service.port {
                if port == 0 {
                    return Err(Error::Validation(format!(
                        "Service '{}': port must be between 1 and 65535",
                        service.name
                    )));
                }
            }
        }

        let mut seen_projects = HashSet::new();
        for project in &self.registered_projects {
            if !is_valid_name(&project.name) {
                return Err(Error::Validation(format!(
                    "Invalid project name '{}': allowed characters are A-Z a-z 0-9 . _ -",
                    project.name
                )));
            }
            if !seen_projects.insert(project.name.as_str()) {
                return Err(Error::Validation(format!(
                    "Duplicate project name '{}'",
                    project.name
                )));
            }
            if !project.path.is_absolute() {
                return Err(Error::Validation(format!(
                    "Project '{}': path must be an absolute path",
                    project.name
                )));
            }
        }

        Ok(())
    }
}
