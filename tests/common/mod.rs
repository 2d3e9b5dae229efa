//! Shared test helpers: a recording fake supervisor and catalog builders.

#![allow(dead_code)]

use async_trait::async_trait;
use devservers::catalog::CatalogService;
use devservers::error::{Error, Result};
use devservers::supervisor::{Status, Supervisor};
use devservers::{PortMode, ServiceEntry};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

/// Supervisor double that records every call instead of touching tmux.
#[derive(Default)]
pub struct FakeSupervisor {
    /// Call log, e.g. `start:db`, `stop:web`, `restart:api`.
    pub events: Mutex<Vec<String>>,
    /// Names whose start should fail with a supervisor error.
    pub fail_start: Mutex<HashSet<String>>,
    /// Names reported as already running; their start is a no-op.
    pub running: Mutex<HashSet<String>>,
    /// Scripted capture_pane outputs, popped front first.
    pub captures: Mutex<VecDeque<String>>,
    /// Resolved port observed for each started service.
    pub started_ports: Mutex<HashMap<String, Option<u16>>>,
    /// The service-ports template map observed on the last start.
    pub last_port_map: Mutex<HashMap<String, u16>>,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn fail_start_of(&self, name: &str) {
        self.fail_start.lock().unwrap().insert(name.to_string());
    }

    pub fn mark_running(&self, name: &str) {
        self.running.lock().unwrap().insert(name.to_string());
    }

    pub fn script_capture(&self, text: &str) {
        self.captures.lock().unwrap().push_back(text.to_string());
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn ensure_session(&self) -> Result<()> {
        Ok(())
    }

    async fn list_windows(&self) -> HashSet<String> {
        self.running.lock().unwrap().clone()
    }

    async fn start(
        &self,
        service: &CatalogService,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> Result<bool> {
        if self.fail_start.lock().unwrap().contains(&service.name) {
            return Err(Error::Supervisor(format!(
                "scripted failure for '{}'",
                service.name
            )));
        }

        *self.last_port_map.lock().unwrap() = service_ports.clone();

        if self.running.lock().unwrap().contains(&service.name) {
            self.record(format!("start-noop:{}", service.name));
            return Ok(false);
        }

        self.started_ports
            .lock()
            .unwrap()
            .insert(service.name.clone(), resolved_port);
        self.running.lock().unwrap().insert(service.name.clone());
        self.record(format!("start:{}", service.name));
        Ok(true)
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.running.lock().unwrap().remove(name);
        self.record(format!("stop:{}", name));
        Ok(())
    }

    async fn restart(
        &self,
        service: &CatalogService,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> Result<bool> {
        *self.last_port_map.lock().unwrap() = service_ports.clone();
        self.started_ports
            .lock()
            .unwrap()
            .insert(service.name.clone(), resolved_port);
        self.running.lock().unwrap().insert(service.name.clone());
        self.record(format!("restart:{}", service.name));
        Ok(true)
    }

    async fn capture_pane(&self, _name: &str, _lines: u32, _ansi: bool) -> Result<String> {
        Ok(self
            .captures
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn get_status(&self, name: &str) -> Status {
        if self.running.lock().unwrap().contains(name) {
            Status::Running
        } else {
            Status::Stopped
        }
    }
}

/// A minimal config-file service entry rooted in /tmp.
pub fn entry(name: &str, deps: &[&str]) -> ServiceEntry {
    ServiceEntry {
        name: name.to_string(),
        cwd: PathBuf::from("/tmp"),
        command: format!("run-{}", name),
        env: None,
        port: None,
        port_mode: None,
        depends_on: if deps.is_empty() {
            None
        } else {
            Some(deps.iter().map(|d| d.to_string()).collect())
        },
        last_started_at: None,
    }
}

pub fn entry_with_port(name: &str, deps: &[&str], port: u16, mode: PortMode) -> ServiceEntry {
    let mut entry = entry(name, deps);
    entry.port = Some(port);
    entry.port_mode = Some(mode);
    entry
}
