//! Log-based port detection.
//!
//! After a `detect`-mode start the orchestrator spawns one of these tasks:
//! it polls the pane's scrollback, diffs each capture against the previous
//! one, and scans the fresh text for the first URL-like line that carries a
//! port. "Address in use" noise is ignored; the last match wins.

use crate::error::Result;
use crate::supervisor::Supervisor;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DETECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Scrollback rows considered per poll.
pub const CAPTURE_LINES: u32 = 200;

fn port_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:https?://)?(?:localhost|127\.0\.0\.1|\[::1\]|0\.0\.0\.0):(\d{2,5})")
            .unwrap()
    })
}

/// Scan text for a served port. Later matches override earlier ones; lines
/// reporting a port conflict are skipped entirely.
pub fn extract_port(text: &str) -> Option<u16> {
    let mut found = None;
    for line in text.lines() {
        let lowered = line.to_lowercase();
        if lowered.contains("in use") || lowered.contains("eaddrinuse") {
            continue;
        }
        for caps in port_line_regex().captures_iter(line) {
            if let Ok(port) = caps[1].parse::<u16>() {
                if port > 0 {
                    found = Some(port);
                }
            }
        }
    }
    found
}

/// Capture a baseline snapshot to diff later polls against.
pub async fn baseline_snapshot(supervisor: &Arc<dyn Supervisor>, name: &str) -> Result<String> {
    supervisor.capture_pane(name, CAPTURE_LINES, false).await
}

/// Poll the pane until a port shows up, the timeout elapses, or the daemon
/// shuts down. Failures stay inside the task; callers only see `None`.
pub async fn detect_port(
    supervisor: Arc<dyn Supervisor>,
    name: &str,
    baseline: String,
    cancel: CancellationToken,
) -> Option<u16> {
    let deadline = Instant::now() + DETECT_TIMEOUT;
    let mut previous = baseline;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(service = %name, "Port detection cancelled");
                return None;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        if Instant::now() >= deadline {
            tracing::debug!(service = %name, "Port detection timed out");
            return None;
        }

        let snapshot = match supervisor.capture_pane(name, CAPTURE_LINES, false).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!(service = %name, error = %e, "Capture failed during detection");
                continue;
            }
        };

        // The pane only ever appends; when the capture window scrolled past
        // the previous snapshot, consider the whole capture instead.
        let fresh = snapshot
            .strip_prefix(previous.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| snapshot.clone());
        previous = snapshot;

        if fresh.is_empty() {
            continue;
        }
        if let Some(port) = extract_port(&fresh) {
            tracing::info!(service = %name, port, "Detected port from logs");
            return Some(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_line_yields_port() {
        assert_eq!(extract_port("  Local: http://localhost:5173"), Some(5173));
    }

    #[test]
    fn bare_host_port_yields_port() {
        assert_eq!(extract_port("listening on 127.0.0.1:8080"), Some(8080));
        assert_eq!(extract_port("bound to 0.0.0.0:9000"), Some(9000));
        assert_eq!(extract_port("ipv6 [::1]:4321"), Some(4321));
    }

    #[test]
    fn in_use_noise_ignored() {
        assert_eq!(extract_port("port localhost:3000 in use, retrying"), None);
        assert_eq!(
            extract_port("Error: listen EADDRINUSE: address already in use 127.0.0.1:3000"),
            None
        );
    }

    #[test]
    fn last_match_wins() {
        let text = "tried http://localhost:3000\nnow serving http://localhost:3001\n";
        assert_eq!(extract_port(text), Some(3001));
    }

    #[test]
    fn plain_text_has_no_port() {
        assert_eq!(extract_port("compiling...\ndone in 4.2s\n"), None);
    }
}
