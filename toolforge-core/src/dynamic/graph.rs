//! Step dependency graph
//!
//! Built once when a composite specification is validated and cached on
//! the accepted plan. Nodes are step indices in declaration order.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Acyclic step graph with a cached topological order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepGraph {
    order: Vec<usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl StepGraph {
    /// Build from `(dependency, dependent)` edges using Kahn's algorithm
    ///
    /// Ties are broken by declaration order, so the result is deterministic.
    /// On a cycle the nodes that could not be ordered are returned.
    pub fn build(node_count: usize, edges: &[(usize, usize)]) -> Result<Self, Vec<usize>> {
        let mut dependencies = vec![BTreeSet::new(); node_count];
        let mut dependents = vec![BTreeSet::new(); node_count];
        for &(from, to) in edges {
            if from < node_count && to < node_count {
                dependencies[to].insert(from);
                dependents[from].insert(to);
            }
        }

        let mut in_degree: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| Reverse(node))
            .collect();

        let mut order = Vec::with_capacity(node_count);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &dependents[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < node_count {
            let residual = (0..node_count).filter(|n| in_degree[*n] > 0).collect();
            return Err(residual);
        }

        Ok(Self {
            order,
            dependencies: dependencies.into_iter().map(|s| s.into_iter().collect()).collect(),
            dependents: dependents.into_iter().map(|s| s.into_iter().collect()).collect(),
        })
    }

    /// Topological order
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, node: usize) -> &[usize] {
        &self.dependencies[node]
    }

    /// Direct dependents of a node
    pub fn dependents(&self, node: usize) -> &[usize] {
        &self.dependents[node]
    }

    /// Nodes without dependencies
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.order
            .iter()
            .copied()
            .filter(|n| self.dependencies[*n].is_empty())
    }
}

#[cfg(test)]
mod graph_tests {
    use super::*;

    #[test]
    fn test_diamond_order() {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
        let graph = StepGraph::build(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]).unwrap();
        assert_eq!(graph.order(), &[0, 1, 2, 3]);
        assert_eq!(graph.dependencies(3), &[1, 2]);
        assert_eq!(graph.dependents(0), &[1, 2]);
        assert_eq!(graph.roots().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        // step 0 depends on step 2
        let graph = StepGraph::build(3, &[(2, 0)]).unwrap();
        assert_eq!(graph.order(), &[1, 2, 0]);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let graph = StepGraph::build(2, &[(0, 1), (0, 1)]).unwrap();
        assert_eq!(graph.dependencies(1), &[0]);
    }

    #[test]
    fn test_cycle_reports_residual_nodes() {
        // 0 -> 1 -> 2 -> 1, 3 independent
        let residual = StepGraph::build(4, &[(0, 1), (1, 2), (2, 1)]).unwrap_err();
        assert_eq!(residual, vec![1, 2]);
    }

    #[test]
    fn test_self_loop_is_cycle() {
        assert_eq!(StepGraph::build(1, &[(0, 0)]).unwrap_err(), vec![0]);
    }

    #[test]
    fn test_large_chain_does_not_recurse() {
        let n = 50_000;
        let edges: Vec<_> = (0..n - 1).map(|i| (i, i + 1)).collect();
        let graph = StepGraph::build(n, &edges).unwrap();
        assert_eq!(graph.order().len(), n);

        let mut cyclic = edges.clone();
        cyclic.push((n - 1, 0));
        assert_eq!(StepGraph::build(n, &cyclic).unwrap_err().len(), n);
    }
}
