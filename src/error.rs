use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    #[diagnostic(
        code(devservers::validation),
        help("Check the request body against the service schema")
    )]
    Validation(String),

    #[error("Service not found: {0}")]
    #[diagnostic(code(devservers::service::not_found))]
    ServiceNotFound(String),

    #[error("Project not found: {0}")]
    #[diagnostic(code(devservers::project::not_found))]
    ProjectNotFound(String),

    #[error("Service '{0}' is managed by a compose file and cannot be edited here")]
    #[diagnostic(
        code(devservers::service::compose_managed),
        help("Edit the devservers-compose.yml inside the owning project instead")
    )]
    ComposeManaged(String),

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    #[diagnostic(
        code(devservers::graph::circular),
        help("Services cannot depend on each other in a cycle. Review the dependsOn fields")
    )]
    CircularDependency(Vec<String>),

    #[error("Port registry error: {0}")]
    #[diagnostic(
        code(devservers::registry::error),
        help("Check that the port-registry.json next to your config file is valid JSON")
    )]
    Registry(String),

    #[error("No free port found scanning from {0} to 65535")]
    #[diagnostic(
        code(devservers::registry::exhausted),
        help("Free some local ports or choose a lower base port")
    )]
    NoFreePort(u16),

    #[error("Supervisor error: {0}")]
    #[diagnostic(
        code(devservers::supervisor::error),
        help("Check that tmux is installed and the 'devservers' session is reachable")
    )]
    Supervisor(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(devservers::config::error))]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for error kinds the HTTP layer maps to 400.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::ComposeManaged(_)
                | Error::CircularDependency(_)
                | Error::Parse(_)
        )
    }

    /// True for error kinds the HTTP layer maps to 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ServiceNotFound(_) | Error::ProjectNotFound(_))
    }
}
