//! Fork-join boundary
//!
//! Hang detection over fork-join paths belongs to a separate analysis. The
//! compiler only calls through this trait; the default implementation finds
//! nothing.

use serde::Serialize;

use crate::graph::{NodeId, PipeGraph};
use crate::subgraph::PgSubgraph;

/// Two or more paths that leave `fork` and meet again at `join`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForkJoin {
    pub fork: NodeId,
    pub join: NodeId,
    pub paths: Vec<Vec<NodeId>>,
}

pub trait ForkJoinChecker {
    fn find_fork_joins(&self, graph: &PipeGraph, subgraphs: &[PgSubgraph]) -> Vec<ForkJoin>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopForkJoinChecker;

impl ForkJoinChecker for NoopForkJoinChecker {
    fn find_fork_joins(&self, _graph: &PipeGraph, _subgraphs: &[PgSubgraph]) -> Vec<ForkJoin> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_checker_finds_nothing() {
        let graph = PipeGraph::new();
        assert!(NoopForkJoinChecker.find_fork_joins(&graph, &[]).is_empty());
    }
}
