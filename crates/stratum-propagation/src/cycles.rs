use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use stratum_core::ConceptId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleSeverity {
    Low,
    Medium,
    High,
}

impl CycleSeverity {
    /// Severity scales with how many distinct nodes are trapped in the loop.
    fn from_len(distinct_nodes: usize) -> Self {
        match distinct_nodes {
            0..=2 => CycleSeverity::Low,
            3..=4 => CycleSeverity::Medium,
            _ => CycleSeverity::High,
        }
    }
}

/// One dependency cycle. `nodes` is the path from the entry node back to
/// itself, closing repeat included: `[A, B, C, A]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub nodes: Vec<ConceptId>,
    pub severity: CycleSeverity,
}

/// Depth-first cycle detection over a directed adjacency map, starting from
/// `start`. Iterative with an explicit frame stack; a back-edge to a node
/// still on the current path signals a cycle, reported as the suffix of the
/// path from that node back to itself.
pub fn detect_cycles(
    adjacency: &HashMap<ConceptId, Vec<ConceptId>>,
    start: ConceptId,
) -> Vec<Cycle> {
    let mut cycles = Vec::new();
    let mut visited: HashSet<ConceptId> = HashSet::new();
    // (node, index of the next neighbor to explore)
    let mut frames: Vec<(ConceptId, usize)> = vec![(start, 0)];
    let mut path: Vec<ConceptId> = vec![start];
    let mut on_path: HashSet<ConceptId> = HashSet::from([start]);
    visited.insert(start);

    while let Some(&mut (node, ref mut next_idx)) = frames.last_mut() {
        let neighbors = adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[]);
        if *next_idx >= neighbors.len() {
            on_path.remove(&node);
            path.pop();
            frames.pop();
            continue;
        }
        let neighbor = neighbors[*next_idx];
        *next_idx += 1;

        if on_path.contains(&neighbor) {
            // on_path membership guarantees the position exists.
            if let Some(cycle_start) = path.iter().position(|n| *n == neighbor) {
                let mut nodes: Vec<ConceptId> = path[cycle_start..].to_vec();
                let distinct = nodes.len();
                nodes.push(neighbor);
                cycles.push(Cycle {
                    nodes,
                    severity: CycleSeverity::from_len(distinct),
                });
            }
        } else if visited.insert(neighbor) {
            frames.push((neighbor, 0));
            path.push(neighbor);
            on_path.insert(neighbor);
        }
    }

    cycles
}
