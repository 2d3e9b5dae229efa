//! Compose loading through the watcher-backed loader, and the merged
//! catalog's collision handling.

mod common;

use common::entry;
use devservers::catalog::{build_catalog, Catalog, ProjectRef};
use devservers::compose::{ComposeLoader, COMPOSE_FILE_NAME};
use std::path::Path;

fn project(name: &str, root: &Path) -> ProjectRef {
    ProjectRef {
        name: name.to_string(),
        path: root.to_path_buf(),
        monorepo: None,
    }
}

fn write_compose(root: &Path, yaml: &str) {
    std::fs::write(root.join(COMPOSE_FILE_NAME), yaml).unwrap();
}

#[test]
fn sync_loads_and_rewrites_project_services() {
    let dir = tempfile::tempdir().unwrap();
    write_compose(
        dir.path(),
        r#"
services:
  api:
    command: pnpm dev:api
    port: 4100
  web:
    command: ["pnpm", "--filter", "web", "dev"]
    dependsOn: [api]
    env:
      API_URL: http://localhost:${PORT:api}
"#,
    );

    let loader = ComposeLoader::new();
    loader.sync(&[project("academy", dir.path())]);

    let services = loader.services();
    assert_eq!(services.len(), 2);

    let web = services.iter().find(|s| s.name == "academy_web").unwrap();
    assert_eq!(web.command, "pnpm --filter web dev");
    assert_eq!(web.depends_on, vec!["academy_api".to_string()]);
    assert_eq!(web.env["API_URL"], "http://localhost:${PORT:academy_api}");
    assert_eq!(web.cwd, dir.path());
}

#[test]
fn missing_compose_file_yields_no_services() {
    let dir = tempfile::tempdir().unwrap();
    let loader = ComposeLoader::new();
    loader.sync(&[project("empty", dir.path())]);
    assert!(loader.services().is_empty());
}

#[test]
fn parse_failure_reduces_project_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    write_compose(dir.path(), "services: [not, a, mapping]\n");

    let loader = ComposeLoader::new();
    loader.sync(&[project("broken", dir.path())]);
    assert!(loader.services().is_empty());
}

#[test]
fn removed_project_drops_its_services() {
    let dir = tempfile::tempdir().unwrap();
    write_compose(dir.path(), "services:\n  api:\n    command: run\n");

    let loader = ComposeLoader::new();
    loader.sync(&[project("academy", dir.path())]);
    assert_eq!(loader.services().len(), 1);

    loader.sync(&[]);
    assert!(loader.services().is_empty());
}

#[test]
fn changed_root_path_reloads() {
    let old_root = tempfile::tempdir().unwrap();
    let new_root = tempfile::tempdir().unwrap();
    write_compose(old_root.path(), "services:\n  api:\n    command: old\n");
    write_compose(new_root.path(), "services:\n  api:\n    command: new\n");

    let loader = ComposeLoader::new();
    loader.sync(&[project("academy", old_root.path())]);
    assert_eq!(loader.services()[0].command, "old");

    loader.sync(&[project("academy", new_root.path())]);
    assert_eq!(loader.services()[0].command, "new");
}

#[test]
fn explicit_reload_picks_up_edits() {
    let dir = tempfile::tempdir().unwrap();
    write_compose(dir.path(), "services:\n  api:\n    command: one\n");

    let loader = ComposeLoader::new();
    let proj = project("academy", dir.path());
    loader.sync(&[proj.clone()]);
    assert_eq!(loader.services()[0].command, "one");

    write_compose(dir.path(), "services:\n  api:\n    command: two\n");
    loader.reload(&proj);
    assert_eq!(loader.services()[0].command, "two");
}

#[test]
fn config_compose_name_collision_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_compose(dir.path(), "services:\n  web:\n    command: run\n");

    let loader = ComposeLoader::new();
    loader.sync(&[project("academy", dir.path())]);

    let catalog = Catalog {
        services: vec![entry("academy_web", &[])],
        ..Default::default()
    };
    assert!(build_catalog(&catalog, &loader.services()).is_err());
}

#[test]
fn merged_catalog_orders_config_before_compose() {
    let dir = tempfile::tempdir().unwrap();
    write_compose(dir.path(), "services:\n  web:\n    command: run\n");

    let loader = ComposeLoader::new();
    loader.sync(&[project("academy", dir.path())]);

    let catalog = Catalog {
        services: vec![entry("db", &[])],
        ..Default::default()
    };
    let merged = build_catalog(&catalog, &loader.services()).unwrap();
    let names: Vec<&str> = merged.names().collect();
    assert_eq!(names, vec!["db", "academy_web"]);
}
