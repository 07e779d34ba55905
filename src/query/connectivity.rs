//! Connectivity validation for graph patterns.
//!
//! Two tuple patterns are connected when they share a variable name. A query is
//! only accepted when its patterns form a single connected component, so the
//! engine never evaluates a cross product.

use crate::core::{GraphPattern, PatternSet, Variable};
use crate::error::{EngineError, Result};
use std::collections::{BTreeSet, VecDeque};

/// Shape information derived once at registration and reused by the join strategies.
#[derive(Debug, Clone)]
pub struct PatternAnalysis {
    variables: Vec<BTreeSet<Variable>>,
    adjacency: Vec<PatternSet>,
    full: PatternSet,
    join_orders: Vec<Vec<usize>>,
}

/// Checks that `pattern` is a single connected component and analyses its shape.
pub fn validate_connectivity(pattern: &GraphPattern) -> Result<PatternAnalysis> {
    if pattern.is_empty() {
        return Err(EngineError::InvalidQuery("graph pattern has no tuple patterns".to_string()));
    }
    if pattern.len() > PatternSet::MAX_PATTERNS {
        return Err(EngineError::IncompatibleQuery(format!(
            "graph pattern has {} tuple patterns, at most {} are supported",
            pattern.len(),
            PatternSet::MAX_PATTERNS
        )));
    }

    let variables: Vec<BTreeSet<Variable>> =
        pattern.patterns().iter().map(|tp| tp.variables()).collect();

    let mut adjacency = vec![PatternSet::default(); variables.len()];
    for i in 0..variables.len() {
        for j in (i + 1)..variables.len() {
            if !variables[i].is_disjoint(&variables[j]) {
                adjacency[i] = adjacency[i].union(PatternSet::single(j));
                adjacency[j] = adjacency[j].union(PatternSet::single(i));
            }
        }
    }

    let join_orders: Vec<Vec<usize>> =
        (0..variables.len()).map(|start| bfs_order(&adjacency, start)).collect();

    let reached = join_orders[0].len() + 1;
    if reached != variables.len() {
        let unreachable: Vec<String> = (0..variables.len())
            .filter(|i| *i != 0 && !join_orders[0].contains(i))
            .map(|i| pattern.patterns()[i].to_string())
            .collect();
        return Err(EngineError::IncompatibleQuery(format!(
            "graph pattern is not connected; no shared variable reaches [{}]",
            unreachable.join(", ")
        )));
    }

    Ok(PatternAnalysis { variables, adjacency, full: PatternSet::full(pattern.len()), join_orders })
}

/// Breadth-first visit order from `start`, excluding `start` itself.
fn bfs_order(adjacency: &[PatternSet], start: usize) -> Vec<usize> {
    let mut seen = PatternSet::single(start);
    let mut queue = VecDeque::from([start]);
    let mut order = Vec::with_capacity(adjacency.len().saturating_sub(1));
    while let Some(current) = queue.pop_front() {
        for next in adjacency[current].indices() {
            if !seen.contains(next) {
                seen = seen.union(PatternSet::single(next));
                order.push(next);
                queue.push_back(next);
            }
        }
    }
    order
}

impl PatternAnalysis {
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn full(&self) -> PatternSet {
        self.full
    }

    pub fn pattern_variables(&self, index: usize) -> &BTreeSet<Variable> {
        &self.variables[index]
    }

    /// Patterns adjacent to at least one member of `set`.
    pub fn neighbours(&self, set: PatternSet) -> PatternSet {
        set.indices().fold(PatternSet::default(), |acc, i| acc.union(self.adjacency[i]))
    }

    /// Two pattern sets are adjacent when some pattern in each shares a variable.
    pub fn is_adjacent(&self, left: PatternSet, right: PatternSet) -> bool {
        !self.neighbours(left).is_disjoint(right)
    }

    /// Some variable bound by both sets, used as the hash-join probe key.
    pub fn shared_variable(&self, left: PatternSet, right: PatternSet) -> Option<&Variable> {
        left.indices().flat_map(|i| self.variables[i].iter()).find(|var| {
            right.indices().any(|j| self.variables[j].contains(*var))
        })
    }

    /// Order in which to visit the other patterns when extending a match of `start`.
    /// Every entry is adjacent to `start` or to an earlier entry.
    pub fn join_order(&self, start: usize) -> &[usize] {
        &self.join_orders[start]
    }
}
