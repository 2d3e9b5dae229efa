//! Router assembly: REST routes, the logs WebSocket, loopback-only CORS,
//! and the optional static UI directory.

use super::handlers::{
    create_service, delete_project, delete_service, get_service_config, health, list_projects,
    list_services, restart_service, start_service, stop_service, update_service, upsert_project,
};
use super::state::AppState;
use super::websocket::logs_ws;
use axum::{
    http::HeaderValue,
    response::Redirect,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/services", get(list_services).post(create_service))
        .route(
            "/services/:name",
            put(update_service).delete(delete_service),
        )
        .route("/services/:name/config", get(get_service_config))
        .route("/services/:name/start", post(start_service))
        .route("/services/:name/stop", post(stop_service))
        .route("/services/:name/restart", post(restart_service))
        .route("/services/:name/logs", get(logs_ws))
        .route("/projects", get(list_projects).post(upsert_project))
        .route("/projects/:name", delete(delete_project));

    if let Some(ui_dir) = state.ui_dir.as_ref().filter(|dir| dir.is_dir()) {
        tracing::info!(dir = %ui_dir.display(), "Serving UI directory");
        router = router
            .nest_service("/ui", ServeDir::new(ui_dir))
            .route("/", get(|| async { Redirect::permanent("/ui/") }));
    }

    router
        .layer(loopback_cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Cross-origin requests are permitted from loopback origins only; the UI
/// dev server typically runs on another localhost port.
fn loopback_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().map(is_loopback_origin).unwrap_or(false)
        }))
        .allow_methods(Any)
        .allow_headers(Any)
}

fn is_loopback_origin(origin: &str) -> bool {
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };
    let host = match rest.rfind(':') {
        // Strip a trailing port, careful not to clip an IPv6 literal.
        Some(idx) if !rest[idx + 1..].contains(']') => &rest[..idx],
        _ => rest,
    };
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

#[cfg(test)]
mod tests {
    use super::is_loopback_origin;

    #[test]
    fn loopback_origins_accepted() {
        assert!(is_loopback_origin("http://localhost:5173"));
        assert!(is_loopback_origin("http://127.0.0.1:4141"));
        assert!(is_loopback_origin("http://[::1]:3000"));
        assert!(is_loopback_origin("http://localhost"));
    }

    #[test]
    fn remote_origins_rejected() {
        assert!(!is_loopback_origin("http://example.com"));
        assert!(!is_loopback_origin("https://evil.localhost.example.com"));
        assert!(!is_loopback_origin("file://localhost"));
    }
}
