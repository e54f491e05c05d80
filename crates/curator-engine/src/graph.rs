//! Dependency graph validation and ordering.
//!
//! Built once per dataset at declaration time. Validation happens
//! here, before any state is touched or any byte is downloaded.

use crate::error::ConfigError;
use crate::resource::Resource;

/// Validated dependency structure over a slice of resources, indexed
/// by declaration position.
pub(crate) struct Graph {
    /// Indices in a valid execution order (dependencies first).
    pub order: Vec<usize>,
    /// For each resource, the indices of the resources that depend on
    /// it. Drives eager cleanup of transients.
    pub dependents: Vec<Vec<usize>>,
}

impl Graph {
    pub fn build(resources: &[Resource]) -> Result<Self, ConfigError> {
        let n = resources.len();

        let mut seen = std::collections::HashSet::with_capacity(n);
        for r in resources {
            if !seen.insert(r.name.as_str()) {
                return Err(ConfigError::DuplicateResource(r.name.clone()));
            }
        }

        let mut dependents = vec![Vec::new(); n];
        for (i, r) in resources.iter().enumerate() {
            for dep in &r.deps {
                if dep.0 >= n {
                    return Err(ConfigError::UnknownResource(r.name.clone()));
                }
                dependents[dep.0].push(i);
            }
        }

        let order = toposort(resources)?;
        Ok(Self { order, dependents })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first topological sort. A back edge means a cycle; the error
/// carries the cycle members in order so the declaration is easy to
/// fix.
fn toposort(resources: &[Resource]) -> Result<Vec<usize>, ConfigError> {
    let n = resources.len();
    let mut marks = vec![Mark::Unvisited; n];
    let mut order = Vec::with_capacity(n);
    let mut path = Vec::new();

    fn visit(
        i: usize,
        resources: &[Resource],
        marks: &mut [Mark],
        order: &mut Vec<usize>,
        path: &mut Vec<usize>,
    ) -> Result<(), ConfigError> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = path.iter().position(|&p| p == i).unwrap_or(0);
                let mut names: Vec<String> = path[start..]
                    .iter()
                    .map(|&p| resources[p].name.clone())
                    .collect();
                names.push(resources[i].name.clone());
                return Err(ConfigError::Cycle(names));
            }
            Mark::Unvisited => {}
        }
        marks[i] = Mark::InProgress;
        path.push(i);
        for dep in &resources[i].deps {
            visit(dep.0, resources, marks, order, path)?;
        }
        path.pop();
        marks[i] = Mark::Done;
        order.push(i);
        Ok(())
    }

    for i in 0..n {
        visit(i, resources, &mut marks, &mut order, &mut path)?;
    }
    Ok(order)
}
