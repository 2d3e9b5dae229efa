//! Port-template expansion inside environment values.
//!
//! Two token families are recognized: `${PORT:<name>}` resolves another
//! service's port, and `$PORT` / `${PORT}` resolve the service's own port.
//! Named tokens are replaced first so a surviving `${PORT:api}` can never be
//! clipped by the own-port pass. Expansion never fails; tokens that cannot
//! be resolved stay verbatim.

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

fn named_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{PORT:([A-Za-z0-9._-]+)\}").unwrap())
}

fn port_is_valid(port: u16) -> bool {
    port > 0
}

/// Expand port tokens in a single environment value.
pub fn apply_port_template(
    value: &str,
    own_port: Option<u16>,
    service_ports: &HashMap<String, u16>,
) -> String {
    let expanded = named_token_regex()
        .replace_all(value, |caps: &regex::Captures<'_>| {
            match service_ports.get(&caps[1]) {
                Some(&port) if port_is_valid(port) => port.to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned();

    match own_port {
        Some(port) if port_is_valid(port) => expanded
            .replace("${PORT}", &port.to_string())
            .replace("$PORT", &port.to_string()),
        _ => expanded,
    }
}

/// Expand every value of an environment map.
pub fn expand_env(
    env: &BTreeMap<String, String>,
    own_port: Option<u16>,
    service_ports: &HashMap<String, u16>,
) -> BTreeMap<String, String> {
    env.iter()
        .map(|(key, value)| {
            (
                key.clone(),
                apply_port_template(value, own_port, service_ports),
            )
        })
        .collect()
}
