//! Catalog store round-trips, schema rejection, and upsert semantics.

mod common;

use common::entry;
use devservers::catalog::{Catalog, ProjectRef, Store};
use devservers::PortMode;
use std::collections::BTreeMap;
use std::path::PathBuf;

fn config_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("devservers.json")
}

#[test]
fn round_trip_preserves_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let path = config_path(&dir);

    let mut api = entry("api", &["db"]);
    api.port = Some(4100);
    api.port_mode = Some(PortMode::Registry);
    api.env = Some(BTreeMap::from([(
        "DATABASE_URL".to_string(),
        "postgres://localhost:${PORT:db}".to_string(),
    )]));
    api.last_started_at = Some("2026-07-01T10:00:00.000Z".to_string());

    let catalog = Catalog {
        services: vec![entry("db", &[]), api],
        registered_projects: vec![ProjectRef {
            name: "academy".to_string(),
            path: PathBuf::from("/repo/academy"),
            monorepo: Some(true),
        }],
        ..Default::default()
    };

    Store::write(&path, &catalog).unwrap();
    let read_back = Store::read(&path).unwrap();
    assert_eq!(read_back, catalog);

    // Pretty-printed with a trailing newline.
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.ends_with('\n'));
    assert!(raw.contains("\n  "));
}

#[test]
fn empty_services_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let path = config_path(&dir);
    Store::write(&path, &Catalog::default()).unwrap();
    assert!(Store::read(&path).unwrap().services.is_empty());
}

#[test]
fn bad_names_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = config_path(&dir);

    for bad in ["has space", "has/slash", ""] {
        let catalog = Catalog {
            services: vec![entry(bad, &[])],
            ..Default::default()
        };
        assert!(
            Store::write(&path, &catalog).is_err(),
            "name '{bad}' should be rejected"
        );
    }
}

#[test]
fn invalid_json_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = config_path(&dir);
    std::fs::write(&path, "{not json").unwrap();
    assert!(Store::read(&path).is_err());
}

#[test]
fn upsert_preserves_last_started_at() {
    let mut original = entry("api", &[]);
    original.last_started_at = Some("2026-07-01T10:00:00.000Z".to_string());
    let catalog = Catalog {
        services: vec![original],
        ..Default::default()
    };

    // Incoming entry without a stamp keeps the stored one.
    let mut update = entry("api", &[]);
    update.command = "npm run dev".to_string();
    let updated = Store::upsert_service(&catalog, update);
    assert_eq!(
        updated.services[0].last_started_at.as_deref(),
        Some("2026-07-01T10:00:00.000Z")
    );
    assert_eq!(updated.services[0].command, "npm run dev");

    // An explicit stamp wins.
    let mut restamped = entry("api", &[]);
    restamped.last_started_at = Some("2026-08-01T00:00:00.000Z".to_string());
    let updated = Store::upsert_service(&catalog, restamped);
    assert_eq!(
        updated.services[0].last_started_at.as_deref(),
        Some("2026-08-01T00:00:00.000Z")
    );
}

#[test]
fn upsert_and_remove_are_pure() {
    let catalog = Catalog {
        services: vec![entry("api", &[])],
        ..Default::default()
    };

    let grown = Store::upsert_service(&catalog, entry("db", &[]));
    assert_eq!(catalog.services.len(), 1);
    assert_eq!(grown.services.len(), 2);

    let shrunk = Store::remove_service(&grown, "api");
    assert_eq!(grown.services.len(), 2);
    assert_eq!(shrunk.services.len(), 1);
    assert_eq!(shrunk.services[0].name, "db");
}

#[test]
fn project_upsert_and_remove() {
    let project = ProjectRef {
        name: "academy".to_string(),
        path: PathBuf::from("/repo/academy"),
        monorepo: None,
    };
    let catalog = Store::upsert_project(&Catalog::default(), project.clone());
    assert_eq!(catalog.registered_projects.len(), 1);

    let moved = ProjectRef {
        path: PathBuf::from("/elsewhere/academy"),
        ..project
    };
    let catalog = Store::upsert_project(&catalog, moved);
    assert_eq!(catalog.registered_projects.len(), 1);
    assert_eq!(
        catalog.registered_projects[0].path,
        PathBuf::from("/elsewhere/academy")
    );

    let catalog = Store::remove_project(&catalog, "academy");
    assert!(catalog.registered_projects.is_empty());
}
