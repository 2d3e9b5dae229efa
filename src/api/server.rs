//! Loopback HTTP server lifecycle.

use super::routes::build_router;
use super::state::AppState;
use crate::error::Result;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 4141;

/// Bind loopback and serve until the daemon's cancellation token fires.
pub async fn serve(state: Arc<AppState>, port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let cancel = state.cancel.clone();
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
