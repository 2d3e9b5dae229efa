//! The shared port registry: a versioned JSON file mapping service name to
//! assigned port, plus the next-free-port allocation that feeds it.
//!
//! Allocation is the only mutating operation. The availability probe is
//! injectable so tests can script which ports look taken; the default probe
//! attempts a loopback TCP bind.

use crate::catalog::atomic_write;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

/// Env var overriding the registry file location.
pub const REGISTRY_ENV: &str = "DEVSERVERS_PORT_REGISTRY";

/// Floor for allocation when neither a preferred nor a base port is given.
pub const DEFAULT_BASE_PORT: u16 = 3100;

const REGISTRY_VERSION: u64 = 1;

/// Resolve the registry file path: env override, else a sibling
/// `port-registry.json` next to the configuration file.
pub fn registry_path_for(config_path: &Path) -> PathBuf {
    if let Some(path) = std::env::var_os(REGISTRY_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    config_path.with_file_name("port-registry.json")
}

/// Accepts ports written as numbers or numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
struct RawRegistry {
    version: u64,
    #[serde(default)]
    services: BTreeMap<String, RawPort>,
}

/// Options for [`PortRegistry::ensure_port`].
#[derive(Debug, Default)]
pub struct EnsurePortOptions {
    /// First candidate to try; overrides `base_port`.
    pub preferred_port: Option<u16>,
    /// Scan floor when no preferred port is given (default 3100).
    pub base_port: Option<u16>,
    /// Ports declared by other services, excluded from allocation.
    pub reserved: HashSet<u16>,
    /// Write an empty registry file when none exists yet.
    pub create_if_missing: bool,
}

type Probe = Box<dyn Fn(u16) -> bool + Send + Sync>;

pub struct PortRegistry {
    path: PathBuf,
    probe: Probe,
}

impl PortRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            probe: Box::new(port_is_free),
        }
    }

    /// Replace the availability probe (tests script which ports look taken).
    pub fn with_probe(path: PathBuf, probe: impl Fn(u16) -> bool + Send + Sync + 'static) -> Self {
        Self {
            path,
            probe: Box::new(probe),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the registry map. A missing file yields an empty map; with
    /// `create_if_missing` the empty registry is also written out.
    pub fn read(&self, create_if_missing: bool) -> Result<BTreeMap<String, u16>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let empty = BTreeMap::new();
                if create_if_missing {
                    self.write(&empty)?;
                }
                return Ok(empty);
            }
            Err(e) => {
                return Err(Error::Registry(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let raw: RawRegistry = serde_json::from_str(&contents)
            .map_err(|e| Error::Registry(format!("Invalid registry file: {}", e)))?;
        if raw.version != REGISTRY_VERSION {
            return Err(Error::Registry(format!(
                "Unsupported registry version {} (expected {})",
                raw.version, REGISTRY_VERSION
            )));
        }

        let mut services = BTreeMap::new();
        for (name, port) in raw.services {
            let port = match port {
                RawPort::Number(n) => n,
                RawPort::Text(s) => s.trim().parse::<u64>().map_err(|_| {
                    Error::Registry(format!("Port for '{}' is not a number: '{}'", name, s))
                })?,
            };
            if port == 0 || port > 65535 {
                return Err(Error::Registry(format!(
                    "Port {} for '{}' is out of range",
                    port, name
                )));
            }
            services.insert(name, port as u16);
        }
        Ok(services)
    }

    /// Return the registered port for `name`, allocating one when absent.
    ///
    /// An existing entry is returned without touching the file. Otherwise the
    /// scan starts at the preferred port (else base port, else 3100) and
    /// walks upward through 65535, skipping registered and reserved ports,
    /// accepting the first one the availability probe clears.
    pub fn ensure_port(&self, name: &str, opts: EnsurePortOptions) -> Result<u16> {
        let mut services = self.read(opts.create_if_missing)?;

        if let Some(&port) = services.get(name) {
            return Ok(port);
        }

        let used: HashSet<u16> = services
            .values()
            .copied()
            .chain(opts.reserved.iter().copied())
            .collect();

        let start = opts
            .preferred_port
            .or(opts.base_port)
            .unwrap_or(DEFAULT_BASE_PORT);

        for candidate in start..=65535 {
            if used.contains(&candidate) {
                continue;
            }
            if !(self.probe)(candidate) {
                continue;
            }
            services.insert(name.to_string(), candidate);
            self.write(&services)?;
            tracing::info!(service = %name, port = candidate, "Registered port");
            return Ok(candidate);
        }

        Err(Error::NoFreePort(start))
    }

    fn write(&self, services: &BTreeMap<String, u16>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Registry(format!(
                    "Failed to create registry directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let doc = serde_json::json!({
            "version": REGISTRY_VERSION,
            "services": services,
        });
        let mut contents = serde_json::to_string_pretty(&doc)?;
        contents.push('\n');
        atomic_write(&self.path, &contents)
            .map_err(|e| Error::Registry(format!("Failed to write registry: {}", e)))
    }
}

/// Default availability probe: can we bind the port on loopback right now?
fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}
