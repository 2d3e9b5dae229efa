//! # devservers
//!
//! A local dev-server orchestrator daemon. It keeps a declarative catalog of
//! long-running shell commands ("services") across one or more repositories,
//! runs each inside its own window of a shared tmux session, and exposes
//! controls over a loopback HTTP + WebSocket interface shared by a UI and a
//! CLI.
//!
//! ## Features
//!
//! - **Merged catalog**: hand-authored configuration plus services
//!   auto-discovered from per-project `devservers-compose.yml` files
//! - **Dependency-aware lifecycle**: starts walk dependencies first, stops
//!   walk dependents first, restarts touch only the target
//! - **Three port modes**: `static` (declared), `detect` (scraped from the
//!   service's own logs), `registry` (assigned and persisted in a shared
//!   registry file)
//! - **Port templates**: `$PORT`, `${PORT}` and `${PORT:name}` tokens in
//!   environment values link services together
//! - **tmux supervision**: the multiplexer session is the process state;
//!   the daemon itself holds no child processes
//!
//! ## Quick start
//!
//! ```no_run
//! use devservers::{api, supervisor::TmuxSupervisor};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), devservers::Error> {
//! let cancel = CancellationToken::new();
//! let state = api::AppState::new(
//!     "/home/me/.config/devservers/devservers.json".into(),
//!     Arc::new(TmuxSupervisor::new()),
//!     None,
//!     cancel.clone(),
//! );
//! api::serve(state, api::DEFAULT_PORT).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Request handlers are async and re-read all on-disk state per request.
//! Catalog- and registry-mutating paths funnel through a single in-process
//! mutex held across the whole read-modify-write window, reproducing the
//! single-threaded serialization of the original event-loop design. Log
//! detection runs in background tasks tied to the daemon-wide cancellation
//! token.

pub mod api;
pub mod catalog;
pub mod compose;
pub mod detector;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod registry;
pub mod supervisor;
pub mod template;

pub use catalog::{Catalog, CatalogService, CatalogSnapshot, PortMode, ProjectRef, ServiceEntry};
pub use error::{Error, Result};
pub use graph::DependencyGraph;
pub use orchestrator::Orchestrator;
pub use registry::PortRegistry;
pub use supervisor::{Status, Supervisor};
