//! REST handlers. Every handler re-reads the configuration file and
//! re-resolves the compose cache through [`AppState::snapshot`]; nothing is
//! cached between requests.

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::catalog::{
    build_catalog, CatalogService, PortMode, ProjectRef, ServiceEntry, ServiceSource, Store,
};
use crate::error::Error;
use crate::graph::DependencyGraph;
use crate::supervisor::Status;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    name: String,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    port_mode: PortMode,
    source: ServiceSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_name: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    monorepo: bool,
    command: String,
    cwd: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_started_at: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !b
}

pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub async fn list_services(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let (_, merged) = state.snapshot()?;
    let runtime = state.orchestrator.runtime_for(&merged).await;

    let services: Vec<ServiceInfo> = merged
        .services
        .iter()
        .map(|service| {
            let rt = runtime.get(&service.name);
            ServiceInfo {
                name: service.name.clone(),
                status: rt.map_or(Status::Stopped, |r| r.status),
                port: rt.and_then(|r| r.port),
                port_mode: service.port_mode,
                source: service.source,
                project_name: service.project.clone(),
                monorepo: service.monorepo,
                command: service.command.clone(),
                cwd: service.cwd.to_string_lossy().into_owned(),
                depends_on: service.depends_on.clone(),
                env: service.env.clone(),
                last_started_at: rt.and_then(|r| r.last_started_at.clone()),
            }
        })
        .collect();

    Ok(Json(json!({ "services": services })))
}

pub async fn get_service_config(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let (_, merged) = state.snapshot()?;
    let service = merged
        .get(&name)
        .ok_or_else(|| Error::ServiceNotFound(name.clone()))?;

    let (service_name, path) = match service.source {
        ServiceSource::Config => (service.name.clone(), state.config_path.clone()),
        ServiceSource::Compose => (
            local_name(service),
            service
                .compose_path
                .clone()
                .unwrap_or_else(|| state.config_path.clone()),
        ),
    };

    let mut body = json!({
        "source": service.source,
        "serviceName": service_name,
        "path": path.to_string_lossy(),
        "definition": service.definition,
    });
    if let Some(project) = &service.project {
        body["projectName"] = json!(project);
    }
    Ok(Json(body))
}

/// Compose names take the form `<project>_<local>`; recover the local part.
fn local_name(service: &CatalogService) -> String {
    match &service.project {
        Some(project) => service
            .name
            .strip_prefix(&format!("{}_", project))
            .unwrap_or(&service.name)
            .to_string(),
        None => service.name.clone(),
    }
}

pub async fn create_service(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let entry = parse_service_body(body)?;
    upsert_service(&state, entry).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn update_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let entry = parse_service_body(body)?;
    if entry.name != name {
        return Err(Error::Validation(format!(
            "Body name '{}' does not match path name '{}'",
            entry.name, name
        ))
        .into());
    }
    upsert_service(&state, entry).await?;
    Ok(Json(json!({ "ok": true })))
}

fn parse_service_body(body: Value) -> Result<ServiceEntry, ApiError> {
    serde_json::from_value(body)
        .map_err(|e| Error::Validation(format!("Invalid service definition: {}", e)).into())
}

async fn upsert_service(state: &AppState, entry: ServiceEntry) -> ApiResult<()> {
    let _guard = state.config_lock.lock().await;

    let catalog = Store::read(&state.config_path)?;
    state.compose.sync(&catalog.registered_projects);
    let compose_services = state.compose.services();

    if compose_services.iter().any(|s| s.name == entry.name) {
        return Err(Error::ComposeManaged(entry.name).into());
    }

    let candidate = Store::upsert_service(&catalog, entry);
    // Full graph validation over the would-be merged catalog; a broken
    // dependency or cycle never reaches the file.
    let merged = build_catalog(&candidate, &compose_services)?;
    DependencyGraph::build(&merged.services)?;

    Store::write(&state.config_path, &candidate)?;
    Ok(())
}

pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let _guard = state.config_lock.lock().await;

    let catalog = Store::read(&state.config_path)?;
    state.compose.sync(&catalog.registered_projects);

    if state.compose.services().iter().any(|s| s.name == name) {
        return Err(Error::ComposeManaged(name).into());
    }
    if !catalog.services.iter().any(|s| s.name == name) {
        return Err(Error::ServiceNotFound(name).into());
    }

    let candidate = Store::remove_service(&catalog, &name);
    Store::write(&state.config_path, &candidate)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn start_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let (_, merged) = state.snapshot()?;
    let graph = DependencyGraph::build(&merged.services)?;
    state.orchestrator.start(&merged, &graph, &name).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn stop_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let (_, merged) = state.snapshot()?;
    let graph = DependencyGraph::build(&merged.services)?;
    state.orchestrator.stop(&merged, &graph, &name).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn restart_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let (_, merged) = state.snapshot()?;
    let graph = DependencyGraph::build(&merged.services)?;
    state.orchestrator.restart(&merged, &graph, &name).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn list_projects(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let (catalog, _) = state.snapshot()?;
    Ok(Json(json!({ "projects": catalog.registered_projects })))
}

pub async fn upsert_project(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let project: ProjectRef = serde_json::from_value(body)
        .map_err(|e| Error::Validation(format!("Invalid project definition: {}", e)))?;

    let _guard = state.config_lock.lock().await;
    let catalog = Store::read(&state.config_path)?;
    let candidate = Store::upsert_project(&catalog, project);
    Store::write(&state.config_path, &candidate)?;

    state.compose.sync(&candidate.registered_projects);
    Ok(Json(json!({ "ok": true })))
}

pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let _guard = state.config_lock.lock().await;
    let catalog = Store::read(&state.config_path)?;

    if !catalog.registered_projects.iter().any(|p| p.name == name) {
        return Err(Error::ProjectNotFound(name).into());
    }

    let candidate = Store::remove_project(&catalog, &name);
    Store::write(&state.config_path, &candidate)?;

    state.compose.sync(&candidate.registered_projects);
    Ok(Json(json!({ "ok": true })))
}
