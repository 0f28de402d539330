//! Transition graph analysis: cycle detection and reachability.
//!
//! Uses `petgraph` to model `on_success` / `on_failure` transitions as a
//! directed graph. Strongly connected components expose every cycle (a run
//! may visit each step at most once), and a depth-first walk from the entry
//! step finds steps no run can ever reach.

use std::collections::HashMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use stepwise_types::workflow::StepSpec;

/// Which outcome a transition edge follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Success,
    Failure,
}

/// Directed graph of step transitions, nodes in declaration order.
///
/// Duplicate step ids keep their first declaration; transitions to unknown
/// ids are dropped (the validator reports both separately).
pub struct TransitionGraph<'a> {
    graph: DiGraph<&'a str, Branch>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> TransitionGraph<'a> {
    /// Build the graph for a list of steps.
    pub fn build(steps: &'a [StepSpec]) -> Self {
        let mut graph = DiGraph::<&str, Branch>::new();
        let mut index = HashMap::new();

        for step in steps {
            if !index.contains_key(step.id.as_str()) {
                let node = graph.add_node(step.id.as_str());
                index.insert(step.id.as_str(), node);
            }
        }

        for step in steps {
            let from = index[step.id.as_str()];
            let edges = [
                (step.on_success.as_deref(), Branch::Success),
                (step.on_failure.as_deref(), Branch::Failure),
            ];
            for (target, branch) in edges {
                if let Some(to) = target.and_then(|t| index.get(t)) {
                    graph.add_edge(from, *to, branch);
                }
            }
        }

        Self { graph, index }
    }

    /// Every cycle in the transition graph.
    ///
    /// Each cycle lists its steps in declaration order; cycles are ordered by
    /// their earliest-declared step. Self-transitions count as cycles.
    pub fn cycles(&self) -> Vec<Vec<&'a str>> {
        let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self.graph.contains_edge(component[0], component[0])
            })
            .map(|mut component| {
                component.sort();
                component
            })
            .collect();
        cycles.sort();

        cycles
            .into_iter()
            .map(|component| component.into_iter().map(|n| self.graph[n]).collect())
            .collect()
    }

    /// Steps that no walk from `entry` can reach, in declaration order.
    ///
    /// Returns an empty list when `entry` is unknown.
    pub fn unreachable_from(&self, entry: &str) -> Vec<&'a str> {
        let Some(&start) = self.index.get(entry) else {
            return Vec::new();
        };

        let mut seen = vec![false; self.graph.node_count()];
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(node) = dfs.next(&self.graph) {
            seen[node.index()] = true;
        }

        self.graph
            .node_indices()
            .filter(|n| !seen[n.index()])
            .map(|n| self.graph[n])
            .collect()
    }

    /// Number of distinct steps in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
