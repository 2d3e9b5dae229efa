//! The request-serving surface: REST routes plus the log-streaming
//! WebSocket, all mediated through [`AppState`].

mod error;
mod handlers;
mod routes;
mod server;
mod state;
mod websocket;

pub use error::ApiError;
pub use routes::build_router;
pub use server::{serve, DEFAULT_PORT};
pub use state::AppState;
