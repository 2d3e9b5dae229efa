use clap::Parser;
use std::path::PathBuf;

/// The devservers daemon.
#[derive(Parser, Debug)]
#[command(name = "devserversd", version, about = "Local dev-server orchestrator daemon")]
pub struct Cli {
    /// Listening port (loopback only). Falls back to DEVSERVERS_PORT, then 4141.
    #[arg(long)]
    pub port: Option<u16>,

    /// Configuration file path. Falls back to DEVSERVERS_CONFIG, then the
    /// OS default location.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port registry file path. Falls back to DEVSERVERS_PORT_REGISTRY, then
    /// a port-registry.json next to the configuration file.
    #[arg(long)]
    pub registry: Option<PathBuf>,

    /// Static UI directory served under /ui. Falls back to DEVSERVERS_UI_DIR.
    #[arg(long)]
    pub ui_dir: Option<PathBuf>,

    /// Log filter when DEVSERVERS_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
