use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use anyhow::{Context, Result};
use cargo_metadata::MetadataCommand;

struct BoundaryRule {
    package: &'static str,
    forbidden: &'static [&'static str],
}

/// The editor only speaks HTTP to the gateway, and the shared schema crate
/// stays free of I/O.
const RULES: &[BoundaryRule] = &[
    BoundaryRule {
        package: "wfconfig-editor",
        forbidden: &["wfconfig-store", "wfconfig-auth", "wfconfig-gateway", "sqlx"],
    },
    BoundaryRule {
        package: "wfconfig-schema",
        forbidden: &["sqlx", "axum", "reqwest", "tokio"],
    },
];

fn main() -> Result<()> {
    let metadata = MetadataCommand::new()
        .exec()
        .context("failed to run `cargo metadata`")?;

    let resolve = metadata
        .resolve
        .as_ref()
        .context("`cargo metadata` did not include a resolved dependency graph")?;

    let id_to_name: HashMap<_, _> = metadata
        .packages
        .iter()
        .map(|p| (p.id.clone(), p.name.as_str()))
        .collect();

    let adjacency: HashMap<_, _> = resolve
        .nodes
        .iter()
        .map(|node| {
            let deps: Vec<_> = node.deps.iter().map(|dep| dep.pkg.clone()).collect();
            (node.id.clone(), deps)
        })
        .collect();

    let mut failed = false;
    for rule in RULES {
        let package = metadata
            .packages
            .iter()
            .find(|p| p.name.as_str() == rule.package)
            .with_context(|| format!("package `{}` not found in workspace", rule.package))?;

        let violations = forbidden_reachable(&package.id, &adjacency, &id_to_name, rule.forbidden);
        if violations.is_empty() {
            println!(
                "OK: `{}` has no dependency edge to {}",
                rule.package,
                rule.forbidden.join(", ")
            );
        } else {
            eprintln!(
                "FAIL: `{}` depends on forbidden crate(s): {}",
                rule.package,
                violations.join(", ")
            );
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Breadth-first walk of the resolved graph from `root`, returning the sorted
/// names of every forbidden package reachable through any path.
fn forbidden_reachable<K>(
    root: &K,
    adjacency: &HashMap<K, Vec<K>>,
    names: &HashMap<K, &str>,
    forbidden: &[&str],
) -> Vec<String>
where
    K: Clone + Eq + Hash,
{
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root.clone());
    visited.insert(root.clone());

    let mut violations = Vec::new();
    while let Some(current) = queue.pop_front() {
        let Some(deps) = adjacency.get(&current) else {
            continue;
        };

        for dep in deps.iter().cloned() {
            if !visited.insert(dep.clone()) {
                continue;
            }

            if let Some(name) = names.get(&dep)
                && forbidden.contains(name)
            {
                violations.push((*name).to_string());
            }

            queue.push_back(dep);
        }
    }

    violations.sort();
    violations.dedup();
    violations
}
