//! Similarity graph and connected-component extraction.

use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Unvisited,
    Queued,
    Visited,
}

/// A connected component. `members` are node indices in ascending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub group_id: usize,
    pub members: Vec<usize>,
}

impl Cluster {
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

/// Undirected, unweighted graph over image indices `0..node_count`.
#[derive(Debug, Clone, Default)]
pub struct SimilarityGraph {
    adjacency: Vec<BTreeSet<usize>>,
}

impl SimilarityGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            adjacency: vec![BTreeSet::new(); node_count],
        }
    }

    pub fn from_edges(node_count: usize, edges: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut graph = Self::new(node_count);
        for (a, b) in edges {
            graph.add_edge(a, b);
        }
        graph
    }

    /// Returns false for self-loops, out-of-range nodes and existing edges.
    pub fn add_edge(&mut self, a: usize, b: usize) -> bool {
        if a == b || a >= self.node_count() || b >= self.node_count() {
            return false;
        }
        let inserted = self.adjacency[a].insert(b);
        self.adjacency[b].insert(a);
        inserted
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(BTreeSet::len).sum::<usize>() / 2
    }

    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacency
            .get(node)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Breadth-first component extraction. Group ids start at 1 and follow the
    /// order of each component's lowest node, so a fixed input order always
    /// yields the same ids. Isolated nodes come out as singleton clusters.
    pub fn clusters(&self) -> Vec<Cluster> {
        let mut state = vec![NodeState::Unvisited; self.node_count()];
        let mut clusters = Vec::new();
        let mut queue = VecDeque::new();

        for start in 0..self.node_count() {
            if state[start] != NodeState::Unvisited {
                continue;
            }

            let mut members = Vec::new();
            state[start] = NodeState::Queued;
            queue.push_back(start);

            while let Some(node) = queue.pop_front() {
                state[node] = NodeState::Visited;
                members.push(node);
                for next in self.neighbors(node) {
                    if state[next] == NodeState::Unvisited {
                        state[next] = NodeState::Queued;
                        queue.push_back(next);
                    }
                }
            }

            members.sort_unstable();
            clusters.push(Cluster {
                group_id: clusters.len() + 1,
                members,
            });
        }

        debug_assert!(state.iter().all(|s| *s == NodeState::Visited));
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(clusters: &[Cluster]) -> Vec<Vec<usize>> {
        clusters.iter().map(|c| c.members.clone()).collect()
    }

    #[test]
    fn test_empty_graph() {
        assert!(SimilarityGraph::new(0).clusters().is_empty());
    }

    #[test]
    fn test_isolated_nodes_are_singletons() {
        let clusters = SimilarityGraph::new(3).clusters();
        assert_eq!(members(&clusters), vec![vec![0], vec![1], vec![2]]);
        assert!(clusters.iter().all(Cluster::is_singleton));
        assert_eq!(
            clusters.iter().map(|c| c.group_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_components_are_transitive() {
        // 0-3, 3-5 chain; 1-2; 4 alone
        let graph = SimilarityGraph::from_edges(6, [(3, 5), (0, 3), (2, 1)]);
        let clusters = graph.clusters();
        assert_eq!(
            members(&clusters),
            vec![vec![0, 3, 5], vec![1, 2], vec![4]]
        );
        assert_eq!(clusters[1].group_id, 2);
    }

    #[test]
    fn test_add_edge_rules() {
        let mut graph = SimilarityGraph::new(3);
        assert!(graph.add_edge(0, 1));
        assert!(!graph.add_edge(1, 0));
        assert!(!graph.add_edge(2, 2));
        assert!(!graph.add_edge(0, 7));
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.neighbors(1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(graph.neighbors(9).count(), 0);
    }

    #[test]
    fn test_clusters_are_deterministic() {
        let edges = [(0, 4), (4, 7), (2, 3), (6, 5), (8, 1)];
        let first = SimilarityGraph::from_edges(9, edges).clusters();
        let reversed: Vec<_> = edges.iter().rev().map(|&(a, b)| (b, a)).collect();
        let second = SimilarityGraph::from_edges(9, reversed).clusters();
        assert_eq!(first, second);
    }
}
