//! Process supervision behind a terminal multiplexer.
//!
//! Every service maps to exactly one window of a shared session; the
//! multiplexer itself is the state. The [`Supervisor`] trait is the only
//! seam that talks to subprocesses, which keeps the orchestrator unit-
//! testable against a fake.

mod tmux;

pub use tmux::TmuxSupervisor;

use crate::catalog::CatalogService;
use crate::error::Result;
use crate::template::expand_env;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Fixed name of the shared multiplexer session.
pub const SESSION_NAME: &str = "devservers";

/// Observed runtime status of a service window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stopped,
    Running,
    Error,
}

/// Shells that indicate an idle pane rather than a running service.
const IDLE_SHELLS: [&str; 4] = ["zsh", "bash", "sh", "fish"];

pub fn is_idle_shell(command: &str) -> bool {
    IDLE_SHELLS.contains(&command)
}

/// Map raw window and pane observations onto a service status.
///
/// No window means stopped; a dead pane means the command exited with the
/// window held open (an error); a pane sitting in a shell is idle, which
/// reads as stopped; anything else is running.
pub fn status_from_observation(window_exists: bool, pane: Option<(bool, String)>) -> Status {
    if !window_exists {
        return Status::Stopped;
    }
    match pane {
        Some((true, _)) => Status::Error,
        Some((false, command)) if is_idle_shell(&command) => Status::Stopped,
        Some((false, _)) => Status::Running,
        None => Status::Stopped,
    }
}

#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Create the shared session if absent, detached.
    async fn ensure_session(&self) -> Result<()>;

    /// Names of existing windows; empty on any error.
    async fn list_windows(&self) -> HashSet<String>;

    /// Start a service in its window.
    ///
    /// Returns `false` without side effects when the window already runs a
    /// live non-shell command; otherwise replaces any stale window and types
    /// the materialized command, returning `true`.
    async fn start(
        &self,
        service: &CatalogService,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> Result<bool>;

    /// Interrupt and tear down a service window. Missing windows are a no-op.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Stop, settle, then start.
    async fn restart(
        &self,
        service: &CatalogService,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> Result<bool>;

    /// Last `lines` rows of the window's scrollback; empty string when the
    /// window does not exist. `ansi` preserves escape sequences.
    async fn capture_pane(&self, name: &str, lines: u32, ansi: bool) -> Result<String>;

    /// Observed status of the service's window.
    async fn get_status(&self, name: &str) -> Status;
}

/// Build the command line typed into a pane: template-expanded `KEY='VALUE'`
/// assignments followed by the service's command string.
pub fn materialize_command(
    service: &CatalogService,
    resolved_port: Option<u16>,
    service_ports: &HashMap<String, u16>,
) -> String {
    let env = expand_env(&service.env, resolved_port, service_ports);
    let mut parts: Vec<String> = env
        .iter()
        .map(|(key, value)| format!("{}={}", key, single_quote(value)))
        .collect();
    parts.push(service.command.clone());
    parts.join(" ")
}

/// Wrap a value in single quotes, escaping embedded single quotes with the
/// standard `'\''` dance.
fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PortMode, ServiceSource};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn service(env: &[(&str, &str)], command: &str) -> CatalogService {
        CatalogService {
            name: "api".to_string(),
            cwd: PathBuf::from("/srv/api"),
            command: command.to_string(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            port: None,
            port_mode: PortMode::Static,
            depends_on: vec![],
            last_started_at: None,
            source: ServiceSource::Config,
            project: None,
            monorepo: false,
            compose_path: None,
            definition: serde_json::Value::Null,
        }
    }

    #[test]
    fn env_prefix_is_quoted_and_sorted() {
        let svc = service(&[("B", "two words"), ("A", "x")], "npm run dev");
        let cmd = materialize_command(&svc, None, &HashMap::new());
        assert_eq!(cmd, "A='x' B='two words' npm run dev");
    }

    #[test]
    fn embedded_quote_escaped() {
        let svc = service(&[("MSG", "it's on")], "run");
        let cmd = materialize_command(&svc, None, &HashMap::new());
        assert_eq!(cmd, r"MSG='it'\''s on' run");
    }

    #[test]
    fn port_template_expanded_before_quoting() {
        let svc = service(&[("URL", "http://localhost:$PORT")], "run");
        let cmd = materialize_command(&svc, Some(4100), &HashMap::new());
        assert_eq!(cmd, "URL='http://localhost:4100' run");
    }

    #[test]
    fn idle_shell_set() {
        assert!(is_idle_shell("zsh"));
        assert!(is_idle_shell("fish"));
        assert!(!is_idle_shell("node"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_from_observation(false, None), Status::Stopped);
        assert_eq!(
            status_from_observation(true, Some((true, "node".to_string()))),
            Status::Error
        );
        for shell in ["zsh", "bash", "sh", "fish"] {
            assert_eq!(
                status_from_observation(true, Some((false, shell.to_string()))),
                Status::Stopped
            );
        }
        assert_eq!(
            status_from_observation(true, Some((false, "node".to_string()))),
            Status::Running
        );
    }
}
