//! The tmux adapter. Carries no in-memory state about services; the tmux
//! server is the source of truth for what exists and what is running.

use super::{is_idle_shell, materialize_command, Status, Supervisor, SESSION_NAME};
use crate::catalog::CatalogService;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Delay between the interrupt keystroke and the window kill.
const STOP_SETTLE: Duration = Duration::from_millis(200);

/// Delay between stop and start during a restart.
const RESTART_SETTLE: Duration = Duration::from_millis(300);

pub struct TmuxSupervisor {
    session: String,
}

impl TmuxSupervisor {
    pub fn new() -> Self {
        Self {
            session: SESSION_NAME.to_string(),
        }
    }

    fn window_target(&self, name: &str) -> String {
        format!("{}:{}", self.session, name)
    }

    async fn tmux(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("tmux")
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Supervisor(format!("Failed to run tmux: {}", e)))?;
        Ok(output)
    }

    /// Pane probe for one window: `(dead, current_command)`, or `None` when
    /// the window cannot be queried.
    async fn pane_state(&self, name: &str) -> Option<(bool, String)> {
        let target = self.window_target(name);
        let output = self
            .tmux(&[
                "display-message",
                "-p",
                "-t",
                &target,
                "-F",
                "#{pane_dead}\t#{pane_current_command}",
            ])
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let line = text.trim();
        let (dead, command) = line.split_once('\t')?;
        Some((dead == "1", command.to_string()))
    }

    async fn window_exists(&self, name: &str) -> bool {
        self.list_windows().await.contains(name)
    }

    async fn kill_window(&self, name: &str) {
        // Missing windows are fine; any other failure is logged and ignored
        // because the follow-up operation re-checks tmux state anyway.
        let target = self.window_target(name);
        match self.tmux(&["kill-window", "-t", &target]).await {
            Ok(output) if !output.status.success() => {
                tracing::debug!(
                    window = %name,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "kill-window failed"
                );
            }
            Err(e) => tracing::debug!(window = %name, error = %e, "kill-window failed"),
            _ => {}
        }
    }
}

impl Default for TmuxSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Supervisor for TmuxSupervisor {
    async fn ensure_session(&self) -> Result<()> {
        let check = self.tmux(&["has-session", "-t", &self.session]).await?;
        if check.status.success() {
            return Ok(());
        }

        let create = self
            .tmux(&["new-session", "-d", "-s", &self.session])
            .await?;
        if !create.status.success() {
            return Err(Error::Supervisor(format!(
                "Failed to create session '{}': {}",
                self.session,
                String::from_utf8_lossy(&create.stderr).trim()
            )));
        }
        tracing::info!(session = %self.session, "Created multiplexer session");
        Ok(())
    }

    async fn list_windows(&self) -> HashSet<String> {
        let result = self
            .tmux(&[
                "list-windows",
                "-t",
                &self.session,
                "-F",
                "#{window_name}",
            ])
            .await;
        match result {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(|l| l.to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            _ => HashSet::new(),
        }
    }

    async fn start(
        &self,
        service: &CatalogService,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> Result<bool> {
        self.ensure_session().await?;

        if self.window_exists(&service.name).await {
            if let Some((dead, command)) = self.pane_state(&service.name).await {
                if !dead && !is_idle_shell(&command) {
                    tracing::debug!(service = %service.name, %command, "Already running");
                    return Ok(false);
                }
            }
            self.kill_window(&service.name).await;
        }

        let cwd = service.cwd.to_string_lossy().into_owned();
        let created = self
            .tmux(&[
                "new-window",
                "-d",
                "-t",
                &format!("{}:", self.session),
                "-n",
                &service.name,
                "-c",
                &cwd,
            ])
            .await?;
        if !created.status.success() {
            return Err(Error::Supervisor(format!(
                "Failed to create window for '{}': {}",
                service.name,
                String::from_utf8_lossy(&created.stderr).trim()
            )));
        }

        let command = materialize_command(service, resolved_port, service_ports);
        let target = self.window_target(&service.name);
        let typed = self
            .tmux(&["send-keys", "-t", &target, &command, "Enter"])
            .await?;
        if !typed.status.success() {
            return Err(Error::Supervisor(format!(
                "Failed to send command to '{}': {}",
                service.name,
                String::from_utf8_lossy(&typed.stderr).trim()
            )));
        }

        tracing::info!(service = %service.name, "Started");
        Ok(true)
    }

    async fn stop(&self, name: &str) -> Result<()> {
        if !self.window_exists(name).await {
            return Ok(());
        }

        let target = self.window_target(name);
        if let Ok(output) = self.tmux(&["send-keys", "-t", &target, "C-c"]).await {
            if !output.status.success() {
                tracing::debug!(window = %name, "Interrupt keystroke failed");
            }
        }
        tokio::time::sleep(STOP_SETTLE).await;
        self.kill_window(name).await;

        tracing::info!(service = %name, "Stopped");
        Ok(())
    }

    async fn restart(
        &self,
        service: &CatalogService,
        resolved_port: Option<u16>,
        service_ports: &HashMap<String, u16>,
    ) -> Result<bool> {
        self.stop(&service.name).await?;
        tokio::time::sleep(RESTART_SETTLE).await;
        self.start(service, resolved_port, service_ports).await
    }

    async fn capture_pane(&self, name: &str, lines: u32, ansi: bool) -> Result<String> {
        if !self.window_exists(name).await {
            return Ok(String::new());
        }

        let target = self.window_target(name);
        let start = format!("-{}", lines);
        let mut args = vec!["capture-pane", "-p"];
        if ansi {
            args.push("-e");
        }
        args.extend_from_slice(&["-t", &target, "-S", &start]);

        let output = self.tmux(&args).await?;
        if !output.status.success() {
            // Window vanished between the existence check and the capture.
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn get_status(&self, service_name: &str) -> Status {
        let exists = self.window_exists(service_name).await;
        let pane = if exists {
            self.pane_state(service_name).await
        } else {
            None
        };
        super::status_from_observation(exists, pane)
    }
}
