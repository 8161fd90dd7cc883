//! Partitioning of the repaired pipe graph into connected components
//!
//! Each component is handed to stream synthesis on its own, so the partition
//! order must be identical from run to run. Groups are keyed by their root id
//! in a `BTreeMap` for that reason.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::graph::{NodeId, PipeGraph};

/// Disjoint-set forest with union by size and path compression
#[derive(Debug, Default)]
pub struct DisjointSet {
    parent: HashMap<NodeId, NodeId>,
    size: HashMap<NodeId, usize>,
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` as a singleton; no-op if already present
    pub fn make_set(&mut self, id: NodeId) {
        self.parent.entry(id).or_insert(id);
        self.size.entry(id).or_insert(1);
    }

    /// Root of the set containing `id`. Unknown ids are their own root.
    pub fn find(&mut self, id: NodeId) -> NodeId {
        let mut root = id;
        while let Some(&parent) = self.parent.get(&root) {
            if parent == root {
                break;
            }
            root = parent;
        }

        let mut current = id;
        while current != root {
            let Some(next) = self.parent.insert(current, root) else {
                break;
            };
            current = next;
        }
        root
    }

    pub fn union(&mut self, a: NodeId, b: NodeId) {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a == root_b {
            return;
        }
        let size_a = self.size.get(&root_a).copied().unwrap_or(1);
        let size_b = self.size.get(&root_b).copied().unwrap_or(1);
        let (big, small) = if size_a >= size_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent.insert(small, big);
        self.size.insert(big, size_a + size_b);
    }

    pub fn same_set(&mut self, a: NodeId, b: NodeId) -> bool {
        self.find(a) == self.find(b)
    }
}

/// One connected component of the pipe graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PgSubgraph {
    pub buffers: Vec<NodeId>,
    pub pipes: Vec<NodeId>,
}

impl PgSubgraph {
    pub fn num_nodes(&self) -> usize {
        self.buffers.len() + self.pipes.len()
    }
}

pub struct SubgraphFinder;

impl SubgraphFinder {
    /// Splits the graph into maximal connected components.
    ///
    /// A pipe is connected to all its unique input, padding and output buffers;
    /// a buffer is connected to the buffer it shares L1 space with. Within a
    /// component nodes keep graph order.
    pub fn find_subgraphs(graph: &PipeGraph) -> Vec<PgSubgraph> {
        let mut sets = DisjointSet::new();
        for buffer in graph.buffers() {
            sets.make_set(buffer.id);
        }
        for pipe in graph.pipes() {
            sets.make_set(pipe.id);
        }

        for pipe in graph.pipes() {
            let neighbours = pipe
                .unique_input_buffers_including_padding()
                .into_iter()
                .chain(pipe.unique_output_buffers());
            for buffer_id in neighbours {
                sets.union(pipe.id, buffer_id);
            }
        }
        for buffer in graph.buffers() {
            if let Some(shared) = buffer.shared_space_buffer_id {
                if graph.buffer(shared).is_some() {
                    sets.union(buffer.id, shared);
                }
            }
        }

        let mut groups: BTreeMap<NodeId, PgSubgraph> = BTreeMap::new();
        for buffer in graph.buffers() {
            groups.entry(sets.find(buffer.id)).or_default().buffers.push(buffer.id);
        }
        for pipe in graph.pipes() {
            groups.entry(sets.find(pipe.id)).or_default().pipes.push(pipe.id);
        }

        debug!(subgraphs = groups.len(), nodes = graph.num_nodes(), "partitioned pipe graph");
        groups.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PgBuffer;
    use crate::pipe::{PgPipe, PipeInput};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn chain(graph: &mut PipeGraph, input: u64, pipe: u64, output: u64) {
        for id in [input, output] {
            if graph.buffer(NodeId(id)).is_none() {
                graph.add_buffer(PgBuffer::new(NodeId(id))).unwrap();
            }
        }
        graph.add_pipe(PgPipe::new(NodeId(pipe))).unwrap();
        graph
            .connect_input(NodeId(pipe), PipeInput::from_buffer(NodeId(input)))
            .unwrap();
        graph.connect_output(NodeId(pipe), NodeId(output), 0).unwrap();
    }

    fn assert_partition_complete(graph: &PipeGraph, subgraphs: &[PgSubgraph]) {
        let mut seen = HashSet::new();
        for subgraph in subgraphs {
            for id in subgraph.buffers.iter().chain(&subgraph.pipes) {
                assert!(seen.insert(*id), "node {} appears twice", id);
            }
        }
        assert_eq!(seen.len(), graph.num_nodes());

        for pipe in graph.pipes() {
            let home = subgraphs
                .iter()
                .find(|s| s.pipes.contains(&pipe.id))
                .unwrap();
            let edges = pipe
                .unique_input_buffers_including_padding()
                .into_iter()
                .chain(pipe.unique_output_buffers());
            for buffer_id in edges {
                assert!(home.buffers.contains(&buffer_id));
            }
        }
    }

    #[test]
    fn test_two_disjoint_chains() {
        let mut graph = PipeGraph::new();
        chain(&mut graph, 1, 10, 2);
        chain(&mut graph, 3, 11, 4);

        let subgraphs = SubgraphFinder::find_subgraphs(&graph);
        assert_eq!(subgraphs.len(), 2);
        for subgraph in &subgraphs {
            assert_eq!(subgraph.buffers.len(), 2);
            assert_eq!(subgraph.pipes.len(), 1);
        }
        assert_partition_complete(&graph, &subgraphs);
    }

    #[test]
    fn test_fork_joins_components() {
        let mut graph = PipeGraph::new();
        chain(&mut graph, 1, 10, 2);
        chain(&mut graph, 1, 11, 3);
        chain(&mut graph, 4, 12, 5);

        let subgraphs = SubgraphFinder::find_subgraphs(&graph);
        assert_eq!(subgraphs.len(), 2);
        assert_partition_complete(&graph, &subgraphs);

        let big = subgraphs.iter().find(|s| s.num_nodes() == 5).unwrap();
        assert_eq!(big.buffers, vec![NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(big.pipes, vec![NodeId(10), NodeId(11)]);
    }

    #[test]
    fn test_shared_l1_space_joins_components() {
        let mut graph = PipeGraph::new();
        chain(&mut graph, 1, 10, 2);
        chain(&mut graph, 3, 11, 4);
        graph.buffer_mut(NodeId(4)).unwrap().shared_space_buffer_id = Some(NodeId(1));

        let subgraphs = SubgraphFinder::find_subgraphs(&graph);
        assert_eq!(subgraphs.len(), 1);
        assert_partition_complete(&graph, &subgraphs);
    }

    #[test]
    fn test_isolated_nodes_are_singletons() {
        let mut graph = PipeGraph::new();
        graph.add_buffer(PgBuffer::new(NodeId(7))).unwrap();
        graph.add_pipe(PgPipe::new(NodeId(8))).unwrap();

        let subgraphs = SubgraphFinder::find_subgraphs(&graph);
        assert_eq!(subgraphs.len(), 2);
        assert_partition_complete(&graph, &subgraphs);
    }

    #[test]
    fn test_partition_is_deterministic() {
        let mut graph = PipeGraph::new();
        for i in 0..20 {
            chain(&mut graph, 100 + 2 * i, 500 + i, 101 + 2 * i);
        }
        let first = SubgraphFinder::find_subgraphs(&graph);
        for _ in 0..5 {
            assert_eq!(SubgraphFinder::find_subgraphs(&graph), first);
        }
    }

    #[test]
    fn test_disjoint_set() {
        let mut sets = DisjointSet::new();
        for id in 0..6 {
            sets.make_set(NodeId(id));
        }
        sets.union(NodeId(0), NodeId(1));
        sets.union(NodeId(2), NodeId(3));
        sets.union(NodeId(1), NodeId(3));

        assert!(sets.same_set(NodeId(0), NodeId(2)));
        assert!(!sets.same_set(NodeId(0), NodeId(4)));
        assert_eq!(sets.find(NodeId(5)), NodeId(5));
    }
}
