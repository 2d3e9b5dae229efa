mod cli;

use clap::Parser;
use cli::Cli;
use devservers::api::{self, AppState};
use devservers::catalog::{resolve_config_path, Store};
use devservers::registry::REGISTRY_ENV;
use devservers::supervisor::{Supervisor, TmuxSupervisor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config_path = resolve_config_path(cli.config)?;
    if let Some(registry) = cli.registry {
        std::env::set_var(REGISTRY_ENV, registry);
    }

    let port = match cli.port {
        Some(port) => port,
        None => match std::env::var("DEVSERVERS_PORT") {
            Ok(value) => value
                .parse()
                .map_err(|_| anyhow::anyhow!("DEVSERVERS_PORT is not a valid port: {value}"))?,
            Err(_) => api::DEFAULT_PORT,
        },
    };

    let ui_dir = cli
        .ui_dir
        .or_else(|| std::env::var_os("DEVSERVERS_UI_DIR").map(Into::into));

    tracing::info!(config = %config_path.display(), "Starting devservers daemon");

    let cancel = CancellationToken::new();
    let supervisor: Arc<dyn Supervisor> = Arc::new(TmuxSupervisor::new());
    if let Err(e) = supervisor.ensure_session().await {
        // The daemon still serves listings without tmux; starts will fail
        // with a supervisor error until it is available.
        tracing::warn!(error = %e, "Could not reach tmux at startup");
    }

    let state = AppState::new(config_path, supervisor, ui_dir, cancel.clone());

    // Prime the compose cache so the first request doesn't pay for the
    // initial watcher setup.
    match Store::read(&state.config_path) {
        Ok(catalog) => state.compose.sync(&catalog.registered_projects),
        Err(e) => tracing::warn!(error = %e, "Config file unreadable at startup"),
    }

    spawn_signal_handler(cancel.clone());

    api::serve(state, port).await?;
    cancel.cancel();
    Ok(())
}

fn init_tracing(fallback_level: &str) {
    let filter = EnvFilter::try_from_env("DEVSERVERS_LOG")
        .unwrap_or_else(|_| EnvFilter::new(fallback_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("Shutdown signal received");
        cancel.cancel();
    });
}
