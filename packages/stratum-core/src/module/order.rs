//! Dependency ordering of modules.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::CoreError;

use super::Module;

/// Name of the module every other module implicitly builds on.
pub const BASE_MODULE: &str = "base";

/// Sorts modules so that every module follows its dependencies.
///
/// Kahn's algorithm; among ready modules `base` comes first, then names in
/// lexical order, so the result is deterministic.
pub fn sort_modules(modules: &[Arc<Module>]) -> Result<Vec<Arc<Module>>, CoreError> {
    let by_name: BTreeMap<&str, &Arc<Module>> = modules.iter().map(|m| (m.name(), m)).collect();

    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for module in modules {
        let mut count = 0;
        for dep in &module.manifest.depends {
            if !by_name.contains_key(dep.as_str()) {
                return Err(CoreError::MissingDependency {
                    module: module.name().to_string(),
                    dependency: dep.clone(),
                });
            }
            dependents.entry(dep.as_str()).or_default().push(module.name());
            count += 1;
        }
        pending.insert(module.name(), count);
    }

    let rank = |name: &str| (name != BASE_MODULE, name.to_string());
    let mut ready: BTreeSet<(bool, String)> = pending
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&name, _)| rank(name))
        .collect();

    let mut ordered = Vec::with_capacity(modules.len());
    while let Some(next) = ready.pop_first() {
        let name = next.1;
        if let Some(children) = dependents.get(name.as_str()) {
            for child in children {
                if let Some(count) = pending.get_mut(*child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(rank(*child));
                    }
                }
            }
        }
        pending.remove(name.as_str());
        if let Some(module) = by_name.get(name.as_str()) {
            ordered.push(Arc::clone(module));
        }
    }

    if !pending.is_empty() {
        let members: Vec<String> = pending.keys().map(|n| n.to_string()).collect();
        tracing::error!(modules = ?members, "module dependency cycle");
        return Err(CoreError::CyclicDependency {
            kind: "modules",
            members,
        });
    }
    Ok(ordered)
}
