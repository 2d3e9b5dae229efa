//! Dependency graph over the merged catalog.
//!
//! Construction validates the graph and keeps the catalog's insertion order
//! around so traversal output is deterministic: `topo_sort` breaks ties by
//! insertion order, which keeps start sequences stable across requests.

use crate::catalog::CatalogService;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Names in catalog insertion order.
    order: Vec<String>,
    /// `deps[a] = [b, c]` means a depends on b and c (declared order).
    deps: HashMap<String, Vec<String>>,
    /// `dependents[a] = [b, c]` means b and c depend on a.
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Validate and build the graph from the merged catalog.
    ///
    /// Validation reports, in priority order: missing dependency targets,
    /// self-dependencies, duplicate dependency entries, cycles (with the
    /// offending path).
    pub fn build(services: &[CatalogService]) -> Result<Self> {
        let names: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();

        for service in services {
            for dep in &service.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(Error::Validation(format!(
                        "Service '{}' depends on unknown service '{}'",
                        service.name, dep
                    )));
                }
            }
        }

        for service in services {
            if service.depends_on.iter().any(|dep| *dep == service.name) {
                return Err(Error::Validation(format!(
                    "Service '{}' depends on itself",
                    service.name
                )));
            }
        }

        for service in services {
            let mut seen = HashSet::new();
            for dep in &service.depends_on {
                if !seen.insert(dep.as_str()) {
                    return Err(Error::Validation(format!(
                        "Service '{}' lists dependency '{}' more than once",
                        service.name, dep
                    )));
                }
            }
        }

        let order: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for service in services {
            deps.insert(service.name.clone(), service.depends_on.clone());
            dependents.entry(service.name.clone()).or_default();
        }
        for service in services {
            for dep in &service.depends_on {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(service.name.clone());
            }
        }

        let graph = Self {
            order,
            deps,
            dependents,
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::CircularDependency(cycle));
        }

        Ok(graph)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.deps.contains_key(name)
    }

    /// Transitive dependency closure, including `name` itself.
    pub fn dependency_closure(&self, name: &str) -> HashSet<String> {
        self.closure(name, &self.deps)
    }

    /// Transitive dependent closure, including `name` itself.
    pub fn dependent_closure(&self, name: &str) -> HashSet<String> {
        self.closure(name, &self.dependents)
    }

    fn closure(&self, name: &str, edges: &HashMap<String, Vec<String>>) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(next) = edges.get(&current) {
                stack.extend(next.iter().cloned());
            }
        }
        visited
    }

    /// Order a subset of the graph dependencies-first.
    ///
    /// Ties are broken by catalog insertion order, so two independent
    /// services always come out in the order they were declared.
    pub fn topo_sort(&self, subset: &HashSet<String>) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for name in subset {
            let degree = self
                .deps
                .get(name)
                .map_or(0, |deps| deps.iter().filter(|d| subset.contains(*d)).count());
            in_degree.insert(name.as_str(), degree);
        }

        let mut result = Vec::with_capacity(subset.len());
        let mut done: HashSet<&str> = HashSet::new();

        while result.len() < subset.len() {
            // Scan in insertion order for the first ready node. The graph is
            // known acyclic after build, so this always finds one.
            let Some(next) = self.order.iter().find(|name| {
                subset.contains(*name)
                    && !done.contains(name.as_str())
                    && in_degree.get(name.as_str()).copied().unwrap_or(0) == 0
            }) else {
                break;
            };

            done.insert(next.as_str());
            result.push(next.clone());

            if let Some(dependents) = self.dependents.get(next) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
        }

        result
    }

    /// Find a cycle and return it as a path ending at the repeated node.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in &self.order {
            if !visited.contains(node.as_str()) {
                if let Some(cycle) = self.cycle_dfs(node, &mut visited, &mut rec_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn cycle_dfs(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(deps) = self.deps.get(node) {
            for dep in deps {
                if !visited.contains(dep.as_str()) {
                    if let Some(cycle) = self.cycle_dfs(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep.as_str()) {
                    let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
            }
        }

        rec_stack.remove(node);
        path.pop();
        None
    }
}
