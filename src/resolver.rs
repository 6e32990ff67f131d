//! Dependency resolution over registered plugins.
//!
//! Produces a deterministic load order in which every plugin appears after
//! all of its dependencies. Ties are broken by discovery order, so identical
//! input always yields an identical order. Plugins with missing or cyclic
//! dependencies are excluded entirely, transitively, and reported per plugin.

use std::collections::HashMap;

use crate::error::ResolveError;

/// A plugin excluded from the load order, with the reason.
#[derive(Clone, Debug)]
pub struct Exclusion {
    pub plugin: String,
    pub reason: ResolveError,
}

/// Outcome of dependency resolution.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    /// Plugin ids in load order; every dependency precedes its dependents.
    pub order: Vec<String>,
    /// Plugins excluded from the order, in discovery order.
    pub excluded: Vec<Exclusion>,
}

impl Resolution {
    pub fn is_excluded(&self, plugin: &str) -> bool {
        self.excluded.iter().any(|e| e.plugin == plugin)
    }
}

/// Resolve a load order for `plugins`, given as `(id, dependency ids)` pairs
/// in discovery order.
pub fn resolve(plugins: &[(String, Vec<String>)]) -> Resolution {
    let n = plugins.len();
    let index: HashMap<&str, usize> = plugins
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (id.as_str(), i))
        .collect();

    let mut reason: Vec<Option<ResolveError>> = vec![None; n];
    let mut placed = vec![false; n];
    let mut order: Vec<usize> = Vec::new();

    // Plugins naming a dependency no descriptor was discovered for.
    for (i, (id, deps)) in plugins.iter().enumerate() {
        if let Some(dep) = deps.iter().find(|d| !index.contains_key(d.as_str())) {
            reason[i] = Some(ResolveError::MissingDependency {
                plugin: id.clone(),
                dependency: dep.clone(),
            });
        }
    }

    loop {
        let mut progressed = false;

        // Exclusion is transitive: a plugin whose dependency is unresolvable
        // is itself unresolvable.
        for i in 0..n {
            if placed[i] || reason[i].is_some() {
                continue;
            }
            let excluded_dep = plugins[i]
                .1
                .iter()
                .find(|dep| matches!(index.get(dep.as_str()), Some(&j) if reason[j].is_some()));
            if let Some(dep) = excluded_dep {
                reason[i] = Some(ResolveError::MissingDependency {
                    plugin: plugins[i].0.clone(),
                    dependency: dep.clone(),
                });
                progressed = true;
            }
        }

        // Place every plugin whose dependencies are all placed, scanning in
        // discovery order so the result is reproducible.
        for i in 0..n {
            if placed[i] || reason[i].is_some() {
                continue;
            }
            let ready = plugins[i]
                .1
                .iter()
                .all(|dep| matches!(index.get(dep.as_str()), Some(&j) if placed[j]));
            if ready {
                placed[i] = true;
                order.push(i);
                progressed = true;
            }
        }

        if !progressed {
            break;
        }
    }

    // Whatever is left is on a dependency cycle, or downstream of one. Mark
    // cycle members first, then let transitive exclusion absorb the rest.
    loop {
        let Some(start) = (0..n).find(|&i| !placed[i] && reason[i].is_none()) else {
            break;
        };
        if let Some(cycle) = find_cycle(start, plugins, &index, &placed, &reason) {
            let path: Vec<String> = cycle.iter().map(|&i| plugins[i].0.clone()).collect();
            for &i in &cycle {
                reason[i] = Some(ResolveError::DependencyCycle { path: path.clone() });
            }
        } else {
            // Not itself cyclic; it waits on a cycle member that the next
            // propagation round will attribute.
            let dep = plugins[start]
                .1
                .iter()
                .find(|dep| matches!(index.get(dep.as_str()), Some(&j) if !placed[j]))
                .cloned()
                .unwrap_or_default();
            reason[start] = Some(ResolveError::MissingDependency {
                plugin: plugins[start].0.clone(),
                dependency: dep,
            });
        }

        loop {
            let mut progressed = false;
            for i in 0..n {
                if placed[i] || reason[i].is_some() {
                    continue;
                }
                let excluded_dep = plugins[i]
                    .1
                    .iter()
                    .find(|dep| matches!(index.get(dep.as_str()), Some(&j) if reason[j].is_some()));
                if let Some(dep) = excluded_dep {
                    reason[i] = Some(ResolveError::MissingDependency {
                        plugin: plugins[i].0.clone(),
                        dependency: dep.clone(),
                    });
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
    }

    Resolution {
        order: order.into_iter().map(|i| plugins[i].0.clone()).collect(),
        excluded: reason
            .into_iter()
            .enumerate()
            .filter_map(|(i, r)| {
                r.map(|reason| Exclusion {
                    plugin: plugins[i].0.clone(),
                    reason,
                })
            })
            .collect(),
    }
}

/// Walk unplaced dependencies from `start`; returns the members of the first
/// cycle encountered, in path order.
fn find_cycle(
    start: usize,
    plugins: &[(String, Vec<String>)],
    index: &HashMap<&str, usize>,
    placed: &[bool],
    reason: &[Option<ResolveError>],
) -> Option<Vec<usize>> {
    let mut path: Vec<usize> = Vec::new();
    let mut visited = vec![false; plugins.len()];

    fn walk(
        node: usize,
        plugins: &[(String, Vec<String>)],
        index: &HashMap<&str, usize>,
        placed: &[bool],
        reason: &[Option<ResolveError>],
        path: &mut Vec<usize>,
        visited: &mut [bool],
    ) -> Option<Vec<usize>> {
        if let Some(pos) = path.iter().position(|&p| p == node) {
            return Some(path[pos..].to_vec());
        }
        if visited[node] {
            return None;
        }
        visited[node] = true;
        path.push(node);
        for dep in &plugins[node].1 {
            let Some(&next) = index.get(dep.as_str()) else {
                continue;
            };
            if placed[next] || reason[next].is_some() {
                continue;
            }
            if let Some(cycle) = walk(next, plugins, index, placed, reason, path, visited) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }

    walk(start, plugins, index, placed, reason, &mut path, &mut visited)
}
