//! Normalization of docker-compose-shaped YAML into strict compose services.
//!
//! Compose files are loosely typed: commands may be strings or token lists,
//! `depends_on` may be a list or a condition map, `environment` may be a map
//! or `KEY=VALUE` lines, and several keys accept spelling variants. Parsing
//! goes through a dynamic `serde_yaml::Value` tree and validates field by
//! field, keeping the untouched entry around for read-only display.

use crate::catalog::{is_valid_name, PortMode};
use crate::error::{Error, Result};
use regex::Regex;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A service contributed by a project's `devservers-compose.yml`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeService {
    /// Prefixed name, `<project>_<localName>`.
    pub name: String,
    pub local_name: String,
    pub project: String,
    pub monorepo: bool,
    pub cwd: PathBuf,
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub port: Option<u16>,
    pub port_mode: PortMode,
    /// Rewritten dependency names (local references prefixed).
    pub depends_on: Vec<String>,
    pub compose_path: PathBuf,
    /// The untouched compose entry, for the read-only config endpoint.
    pub definition: serde_json::Value,
}

fn port_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{PORT:([A-Za-z0-9._-]+)\}").unwrap())
}

/// Parse a compose document for one project.
///
/// `project_root` anchors relative working directories. Any structural
/// failure is an error for the whole file; the loader then reduces the
/// project's service list to empty.
pub fn parse_compose(
    content: &str,
    project: &str,
    project_root: &Path,
    monorepo: bool,
    compose_path: &Path,
) -> Result<Vec<ComposeService>> {
    let doc: Value = serde_yaml::from_str(content)?;

    let services = match doc.get("services") {
        Some(Value::Mapping(map)) => map,
        Some(_) => {
            return Err(Error::Parse(
                "'services' must be a mapping of name to service".to_string(),
            ))
        }
        None => return Ok(Vec::new()),
    };

    // Local names are collected up front so dependency and port-template
    // references can be rewritten in a single pass afterwards.
    let mut local_names = BTreeSet::new();
    for (key, _) in services {
        let name = key
            .as_str()
            .ok_or_else(|| Error::Parse("Service names must be strings".to_string()))?;
        if !is_valid_name(name) {
            return Err(Error::Parse(format!(
                "Invalid compose service name '{}': allowed characters are A-Z a-z 0-9 . _ -",
                name
            )));
        }
        local_names.insert(name.to_string());
    }

    let mut result = Vec::new();
    for (key, value) in services {
        let local_name = key.as_str().unwrap_or_default().to_string();
        let entry = value.as_mapping().ok_or_else(|| {
            Error::Parse(format!("Service '{}' must be a mapping", local_name))
        })?;

        let command = parse_command(entry, &local_name)?;
        let cwd = parse_cwd(entry, project_root, &local_name)?;
        let depends_on = parse_depends_on(entry, &local_name, project, &local_names)?;
        let env = parse_env(entry, &local_name, project, &local_names)?;
        let port = parse_port(entry, &local_name)?;
        let port_mode = parse_port_mode(entry, &local_name)?;

        let definition = serde_json::to_value(value).map_err(|e| {
            Error::Parse(format!(
                "Service '{}' cannot be represented as JSON: {}",
                local_name, e
            ))
        })?;

        result.push(ComposeService {
            name: format!("{}_{}", project, local_name),
            local_name,
            project: project.to_string(),
            monorepo,
            cwd,
            command,
            env,
            port,
            port_mode,
            depends_on,
            compose_path: compose_path.to_path_buf(),
            definition,
        });
    }

    Ok(result)
}

fn lookup<'a>(entry: &'a serde_yaml::Mapping, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|wanted| {
        entry
            .iter()
            .find(|(key, _)| key.as_str() == Some(*wanted))
            .map(|(_, value)| value)
    })
}

fn parse_command(entry: &serde_yaml::Mapping, name: &str) -> Result<String> {
    match lookup(entry, &["command"]) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Sequence(tokens)) => {
            let mut parts = Vec::with_capacity(tokens.len());
            for token in tokens {
                match scalar_to_string(token) {
                    Some(s) => parts.push(s),
                    None => {
                        return Err(Error::Parse(format!(
                            "Service '{}': command list entries must be scalars",
                            name
                        )))
                    }
                }
            }
            Ok(parts.join(" "))
        }
        Some(_) => Err(Error::Parse(format!(
            "Service '{}': command must be a string or a list of tokens",
            name
        ))),
        None => Err(Error::Parse(format!(
            "Service '{}': command is required",
            name
        ))),
    }
}

fn parse_cwd(entry: &serde_yaml::Mapping, project_root: &Path, name: &str) -> Result<PathBuf> {
    match lookup(entry, &["cwd", "working_dir", "working-dir"]) {
        Some(Value::String(s)) => {
            let path = PathBuf::from(s);
            if path.is_absolute() {
                Ok(path)
            } else {
                Ok(project_root.join(path))
            }
        }
        Some(_) => Err(Error::Parse(format!(
            "Service '{}': working directory must be a string",
            name
        ))),
        None => Ok(project_root.to_path_buf()),
    }
}

fn parse_depends_on(
    entry: &serde_yaml::Mapping,
    name: &str,
    project: &str,
    local_names: &BTreeSet<String>,
) -> Result<Vec<String>> {
    let raw = match lookup(entry, &["dependsOn", "depends_on", "depends-on"]) {
        Some(Value::Sequence(items)) => {
            let mut deps = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => deps.push(s.to_string()),
                    None => {
                        return Err(Error::Parse(format!(
                            "Service '{}': dependsOn entries must be strings",
                            name
                        )))
                    }
                }
            }
            deps
        }
        // docker-compose condition form: keys are the dependency names, the
        // condition objects carry nothing we use.
        Some(Value::Mapping(map)) => {
            let mut deps = Vec::with_capacity(map.len());
            for (key, _) in map {
                match key.as_str() {
                    Some(s) => deps.push(s.to_string()),
                    None => {
                        return Err(Error::Parse(format!(
                            "Service '{}': dependsOn keys must be strings",
                            name
                        )))
                    }
                }
            }
            deps
        }
        Some(_) => {
            return Err(Error::Parse(format!(
                "Service '{}': dependsOn must be a list or a map",
                name
            )))
        }
        None => Vec::new(),
    };

    Ok(raw
        .into_iter()
        .map(|dep| {
            if local_names.contains(&dep) {
                format!("{}_{}", project, dep)
            } else {
                tracing::warn!(
                    service = %name,
                    dependency = %dep,
                    "Compose dependency does not match a local service; leaving it as-is"
                );
                dep
            }
        })
        .collect())
}

fn parse_env(
    entry: &serde_yaml::Mapping,
    name: &str,
    project: &str,
    local_names: &BTreeSet<String>,
) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    match lookup(entry, &["env", "environment"]) {
        Some(Value::Mapping(map)) => {
            for (key, value) in map {
                let key = key.as_str().ok_or_else(|| {
                    Error::Parse(format!("Service '{}': env keys must be strings", name))
                })?;
                let value = scalar_to_string(value).ok_or_else(|| {
                    Error::Parse(format!(
                        "Service '{}': env value for '{}' must be a scalar",
                        name, key
                    ))
                })?;
                env.insert(key.to_string(), value);
            }
        }
        Some(Value::Sequence(lines)) => {
            for line in lines {
                let line = line.as_str().ok_or_else(|| {
                    Error::Parse(format!(
                        "Service '{}': environment list entries must be KEY=VALUE strings",
                        name
                    ))
                })?;
                let (key, value) = line.split_once('=').ok_or_else(|| {
                    Error::Parse(format!(
                        "Service '{}': environment entry '{}' is not KEY=VALUE",
                        name, line
                    ))
                })?;
                env.insert(key.to_string(), value.to_string());
            }
        }
        Some(_) => {
            return Err(Error::Parse(format!(
                "Service '{}': environment must be a map or a list",
                name
            )))
        }
        None => {}
    }

    let env = env
        .into_iter()
        .map(|(key, value)| {
            let rewritten = rewrite_port_refs(&value, project, local_names, name);
            (key, rewritten)
        })
        .collect();
    Ok(env)
}

/// Rewrite `${PORT:<local>}` tokens to the prefixed service name.
fn rewrite_port_refs(
    value: &str,
    project: &str,
    local_names: &BTreeSet<String>,
    service: &str,
) -> String {
    port_ref_regex()
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let referenced = &caps[1];
            if local_names.contains(referenced) {
                format!("${{PORT:{}_{}}}", project, referenced)
            } else {
                tracing::warn!(
                    service = %service,
                    referenced = %referenced,
                    "Port template references an unknown local service; leaving it literal"
                );
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn parse_port(entry: &serde_yaml::Mapping, name: &str) -> Result<Option<u16>> {
    match lookup(entry, &["port"]) {
        Some(value) => {
            let port = value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| {
                    Error::Parse(format!("Service '{}': port must be an integer", name))
                })?;
            if port == 0 || port > 65535 {
                return Err(Error::Parse(format!(
                    "Service '{}': port must be between 1 and 65535",
                    name
                )));
            }
            Ok(Some(port as u16))
        }
        None => Ok(None),
    }
}

fn parse_port_mode(entry: &serde_yaml::Mapping, name: &str) -> Result<PortMode> {
    match lookup(entry, &["portMode", "port_mode", "port-mode"]) {
        Some(Value::String(s)) => match s.as_str() {
            "static" => Ok(PortMode::Static),
            "detect" => Ok(PortMode::Detect),
            "registry" => Ok(PortMode::Registry),
            other => Err(Error::Parse(format!(
                "Service '{}': unknown portMode '{}' (expected static, detect or registry)",
                name, other
            ))),
        },
        Some(_) => Err(Error::Parse(format!(
            "Service '{}': portMode must be a string",
            name
        ))),
        None => Ok(PortMode::Static),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Vec<ComposeService> {
        parse_compose(
            yaml,
            "academy",
            Path::new("/repo/academy"),
            false,
            Path::new("/repo/academy/devservers-compose.yml"),
        )
        .unwrap()
    }

    #[test]
    fn command_as_list_is_joined() {
        let services = parse(
            r#"
services:
  web:
    command: ["pnpm", "--filter", "web", "dev"]
"#,
        );
        assert_eq!(services[0].command, "pnpm --filter web dev");
    }

    #[test]
    fn local_references_are_prefixed() {
        let services = parse(
            r#"
services:
  api:
    command: pnpm dev:api
    port: 4100
  web:
    command: pnpm dev:web
    dependsOn: [api]
    env:
      API_URL: http://localhost:${PORT:api}
"#,
        );
        let web = services.iter().find(|s| s.local_name == "web").unwrap();
        assert_eq!(web.name, "academy_web");
        assert_eq!(web.depends_on, vec!["academy_api".to_string()]);
        assert_eq!(web.env["API_URL"], "http://localhost:${PORT:academy_api}");
    }

    #[test]
    fn unknown_local_reference_left_literal() {
        let services = parse(
            r#"
services:
  web:
    command: pnpm dev
    depends_on:
      - postgres
    environment:
      DB_URL: http://localhost:${PORT:postgres}
"#,
        );
        assert_eq!(services[0].depends_on, vec!["postgres".to_string()]);
        assert_eq!(services[0].env["DB_URL"], "http://localhost:${PORT:postgres}");
    }

    #[test]
    fn depends_on_condition_map_uses_keys() {
        let services = parse(
            r#"
services:
  db:
    command: docker start pg
  web:
    command: pnpm dev
    depends_on:
      db:
        condition: service_started
"#,
        );
        let web = services.iter().find(|s| s.local_name == "web").unwrap();
        assert_eq!(web.depends_on, vec!["academy_db".to_string()]);
    }

    #[test]
    fn environment_kv_lines() {
        let services = parse(
            r#"
services:
  web:
    command: pnpm dev
    environment:
      - NODE_ENV=development
      - DEBUG=app:*
"#,
        );
        assert_eq!(services[0].env["NODE_ENV"], "development");
        assert_eq!(services[0].env["DEBUG"], "app:*");
    }

    #[test]
    fn relative_cwd_resolves_against_project_root() {
        let services = parse(
            r#"
services:
  web:
    command: pnpm dev
    working_dir: apps/web
"#,
        );
        assert_eq!(services[0].cwd, PathBuf::from("/repo/academy/apps/web"));
    }

    #[test]
    fn missing_command_fails_the_file() {
        let result = parse_compose(
            "services:\n  web:\n    port: 3000\n",
            "p",
            Path::new("/p"),
            false,
            Path::new("/p/devservers-compose.yml"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn port_mode_variants() {
        let services = parse(
            r#"
services:
  a:
    command: x
    portMode: detect
  b:
    command: x
    port_mode: registry
  c:
    command: x
"#,
        );
        let mode = |n: &str| {
            services
                .iter()
                .find(|s| s.local_name == n)
                .unwrap()
                .port_mode
        };
        assert_eq!(mode("a"), PortMode::Detect);
        assert_eq!(mode("b"), PortMode::Registry);
        assert_eq!(mode("c"), PortMode::Static);
    }
}
