//! Reading and writing the primary configuration file.
//!
//! The store is the only writer of `devservers.json`. Writes validate,
//! serialize pretty-printed, land in a sibling temp file and rename into
//! place so a crash mid-write never leaves a torn file behind.

use super::{Catalog, ProjectRef, ServiceEntry};
use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Env var overriding the configuration file location.
pub const CONFIG_ENV: &str = "DEVSERVERS_CONFIG";

/// Resolve the OS-dependent default config file path.
pub fn default_config_path() -> Result<PathBuf> {
    if cfg!(target_os = "macos") {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
        Ok(home
            .join("Library/Application Support/Devservers Manager")
            .join("devservers.json"))
    } else if cfg!(target_os = "windows") {
        let base = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine %APPDATA%".to_string()))?;
        Ok(base.join("Devservers Manager").join("devservers.json"))
    } else {
        let base = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = dirs::home_dir().ok_or_else(|| {
                    Error::Config("Could not determine home directory".to_string())
                })?;
                home.join(".config")
            }
        };
        Ok(base.join("devservers").join("devservers.json"))
    }
}

/// Resolve the effective config path: CLI flag, then `DEVSERVERS_CONFIG`,
/// then the OS default.
pub fn resolve_config_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path);
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    default_config_path()
}

pub struct Store;

impl Store {
    /// Read and validate the catalog. A missing file is an empty catalog.
    pub fn read(path: &Path) -> Result<Catalog> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Catalog::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let catalog: Catalog = serde_json::from_str(&contents)
            .map_err(|e| Error::Validation(format!("Invalid config file: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Validate and atomically write the catalog.
    pub fn write(path: &Path, catalog: &Catalog) -> Result<()> {
        catalog.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut contents = serde_json::to_string_pretty(catalog)?;
        contents.push('\n');
        atomic_write(path, &contents)
    }

    /// Insert or replace a service, preserving the previous `lastStartedAt`
    /// when the incoming entry carries none.
    pub fn upsert_service(catalog: &Catalog, mut service: ServiceEntry) -> Catalog {
        let mut next = catalog.clone();
        match next.services.iter_mut().find(|s| s.name == service.name) {
            Some(existing) => {
                if service.last_started_at.is_none() {
                    service.last_started_at = existing.last_started_at.clone();
                }
                *existing = service;
            }
            None => next.services.push(service),
        }
        next
    }

    pub fn remove_service(catalog: &Catalog, name: &str) -> Catalog {
        let mut next = catalog.clone();
        next.services.retain(|s| s.name != name);
        next
    }

    pub fn upsert_project(catalog: &Catalog, project: ProjectRef) -> Catalog {
        let mut next = catalog.clone();
        match next
            .registered_projects
            .iter_mut()
            .find(|p| p.name == project.name)
        {
            Some(existing) => *existing = project,
            None => next.registered_projects.push(project),
        }
        next
    }

    pub fn remove_project(catalog: &Catalog, name: &str) -> Catalog {
        let mut next = catalog.clone();
        next.registered_projects.retain(|p| p.name != name);
        next
    }
}

/// Write-then-rename so readers never observe a partially written file.
pub(crate) fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)
        .map_err(|e| Error::Config(format!("Failed to create temp file: {}", e)))?;

    file.write_all(contents.as_bytes())
        .map_err(|e| Error::Config(format!("Failed to write temp file: {}", e)))?;

    file.sync_all()
        .map_err(|e| Error::Config(format!("Failed to sync temp file: {}", e)))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| Error::Config(format!("Failed to rename temp file: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Store::read(&dir.path().join("devservers.json")).unwrap();
        assert!(catalog.services.is_empty());
        assert!(catalog.registered_projects.is_empty());
    }

    #[test]
    fn unknown_top_level_keys_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devservers.json");
        fs::write(&path, r#"{"version":1,"services":[],"futureField":true}"#).unwrap();
        Store::read(&path).unwrap();
    }

    #[test]
    fn unknown_service_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devservers.json");
        fs::write(
            &path,
            r#"{"version":1,"services":[{"name":"api","cwd":"/tmp","command":"x","bogus":1}]}"#,
        )
        .unwrap();
        assert!(Store::read(&path).is_err());
    }
}
