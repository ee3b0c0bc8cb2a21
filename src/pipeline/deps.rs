//! Tied-unit dependency resolution
//!
//! For the T2 documents scheduled on one state, the resolver computes an
//! execution order in which every tied unit runs after the co-scheduled
//! units it depends on. Cycles are a configuration bug: they abort the
//! whole batch before any unit executes. Units with no ordering constraint
//! keep their declaration sequence, so runs are reproducible.
//!
//! Dependencies on documents *not* scheduled in the same group are resolved
//! against the store at execution time (see `pipeline::t2`); only the
//! intra-group edges participate in ordering and cycle detection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DependencyError {
    /// Fatal to the whole batch.
    #[error("dependency cycle among tied units: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// Fatal to the dependent unit only; recorded, siblings continue.
    #[error("unit '{unit}' timed out after {waited_sec:.1}s waiting for dependency '{dependency}'")]
    Timeout {
        unit: String,
        dependency: String,
        waited_sec: f64,
    },
}

/// One scheduled document in a group, reduced to what ordering needs.
#[derive(Debug, Clone)]
pub struct DepNode {
    /// Unit name (unique within a group: one document per unit+config, and
    /// groups are keyed by link).
    pub unit: String,
    /// Declaration sequence, the stable tie-break.
    pub seq: u32,
    /// Names of co-scheduled units this one depends on.
    pub deps: Vec<String>,
}

/// Topological execution order over a group of scheduled documents.
///
/// Returns indices into `nodes`. Kahn's algorithm with a ready-queue ordered
/// by (seq, unit name); a non-empty remainder after exhaustion is a cycle,
/// which is extracted and named in the error.
pub fn execution_order(nodes: &[DepNode]) -> Result<Vec<usize>, DependencyError> {
    let index_of = |name: &str| nodes.iter().position(|n| n.unit == name);

    // Adjacency: edges dependency -> dependent, indegree on dependents.
    // Dependencies naming units outside the group carry no edge.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut indegree: Vec<usize> = vec![0; nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.deps {
            if let Some(j) = index_of(dep) {
                dependents[j].push(i);
                indegree[i] += 1;
            }
        }
    }

    let mut ready: Vec<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while !ready.is_empty() {
        // Stable tie-break: declaration sequence, then name
        ready.sort_by(|&a, &b| {
            nodes[a]
                .seq
                .cmp(&nodes[b].seq)
                .then_with(|| nodes[a].unit.cmp(&nodes[b].unit))
        });
        let next = ready.remove(0);
        order.push(next);
        for &dependent in &dependents[next] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    // Remainder is cyclic; walk dependency edges from any remaining node
    // until a repeat names the cycle
    let in_order: std::collections::HashSet<usize> = order.iter().copied().collect();
    let start = (0..nodes.len())
        .find(|i| !in_order.contains(i))
        .unwrap_or(0);

    let mut path = vec![start];
    let mut seen = std::collections::HashSet::new();
    seen.insert(start);
    let mut current = start;
    let cycle = loop {
        let next = nodes[current]
            .deps
            .iter()
            .filter_map(|d| index_of(d))
            .find(|j| !in_order.contains(j));
        match next {
            Some(j) if seen.contains(&j) => {
                let from = path.iter().position(|&p| p == j).unwrap_or(0);
                let mut names: Vec<String> =
                    path[from..].iter().map(|&p| nodes[p].unit.clone()).collect();
                names.push(nodes[j].unit.clone());
                break names;
            }
            Some(j) => {
                seen.insert(j);
                path.push(j);
                current = j;
            }
            // Every remaining node sits on some cycle; this arm is
            // unreachable but keeps the loop total
            None => break path.iter().map(|&p| nodes[p].unit.clone()).collect(),
        }
    };

    Err(DependencyError::Cycle { cycle })
}
