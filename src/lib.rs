//! Pipe graph compiler
//!
//! Turns the pipegen text describing one temporal epoch into a repaired pipe
//! graph and partitions it into independently synthesizable subgraphs.
//!
//! # Example
//!
//! ```rust
//! use pipegen2::{compile_epoch_str, PipegenConfig};
//!
//! let source = "\
//! buffer_1:
//!   uniqid: 1
//!   scatter_gather_num_tiles: 2
//! --
//! buffer_2:
//!   uniqid: 2
//! --
//! pipe_10:
//!   id: 10
//!   input_list: [1]
//!   output_list: [2]
//! --
//! ";
//! let epoch = compile_epoch_str(source, &PipegenConfig::default()).unwrap();
//! assert_eq!(epoch.subgraphs.len(), 1);
//! ```

pub mod error;
pub mod device;
pub mod graph;
pub mod buffer;
pub mod pipe;
pub mod lexer;
pub mod parser;
pub mod creator;
pub mod handlers;
pub mod subgraph;
pub mod pcie;
pub mod fork_join;

use std::path::Path;

use serde::Serialize;
use tracing::info;

pub use buffer::{BufferType, DramRole, PgBuffer, PrefetchType};
pub use creator::PipeGraphCreator;
pub use device::{CoreLocation, PcieFlowConfig, PipegenConfig};
pub use error::{PipegenError, PipegenResult};
pub use fork_join::{ForkJoin, ForkJoinChecker, NoopForkJoinChecker};
pub use graph::{GraphEdit, NodeId, PipeGraph};
pub use handlers::GraphHandler;
pub use parser::PipeGraphParser;
pub use pcie::{MmioTransfer, PcieFlowCalculator};
pub use pipe::{PgPipe, PipeInput};
pub use subgraph::{PgSubgraph, SubgraphFinder};

/// A repaired epoch graph and its partition
#[derive(Debug, Clone)]
pub struct CompiledEpoch {
    pub graph: PipeGraph,
    pub subgraphs: Vec<PgSubgraph>,
}

impl CompiledEpoch {
    fn partition(graph: PipeGraph) -> Self {
        let subgraphs = SubgraphFinder::find_subgraphs(&graph);
        info!(
            buffers = graph.buffers().len(),
            pipes = graph.pipes().len(),
            subgraphs = subgraphs.len(),
            "compiled epoch"
        );
        Self { graph, subgraphs }
    }

    /// Sizes MMIO transfers and runs the fork-join boundary over the partition
    pub fn report(
        &self,
        epoch: u32,
        config: &PipegenConfig,
        fork_join: &dyn ForkJoinChecker,
    ) -> PipegenResult<EpochReport> {
        let mmio_transfers = PcieFlowCalculator::new(config.pcie).mmio_transfers(&self.graph)?;
        Ok(EpochReport {
            epoch,
            chips: self.graph.all_chip_ids(),
            num_buffers: self.graph.buffers().len(),
            num_pipes: self.graph.pipes().len(),
            subgraphs: self.subgraphs.clone(),
            mmio_transfers,
            fork_joins: fork_join.find_fork_joins(&self.graph, &self.subgraphs),
        })
    }
}

/// Parse, wire, repair and partition the pipegen file of one epoch
pub fn compile_epoch(path: impl AsRef<Path>, config: &PipegenConfig) -> PipegenResult<CompiledEpoch> {
    let graph = PipeGraphCreator::new(config.clone()).create_from_file(path)?;
    Ok(CompiledEpoch::partition(graph))
}

/// [`compile_epoch`] over pipegen text already in memory
pub fn compile_epoch_str(source: &str, config: &PipegenConfig) -> PipegenResult<CompiledEpoch> {
    let graph = PipeGraphCreator::new(config.clone()).create_from_str(source)?;
    Ok(CompiledEpoch::partition(graph))
}

/// What the compiler hands downstream for one epoch
#[derive(Debug, Clone, Serialize)]
pub struct EpochReport {
    pub epoch: u32,
    pub chips: Vec<u32>,
    pub num_buffers: usize,
    pub num_pipes: usize,
    pub subgraphs: Vec<PgSubgraph>,
    pub mmio_transfers: Vec<MmioTransfer>,
    pub fork_joins: Vec<ForkJoin>,
}

impl EpochReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for EpochReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Epoch {}", self.epoch)?;
        writeln!(f, "Chips: {:?}", self.chips)?;
        writeln!(f, "Buffers: {}, pipes: {}", self.num_buffers, self.num_pipes)?;
        writeln!(f, "Subgraphs: {}", self.subgraphs.len())?;
        for (i, subgraph) in self.subgraphs.iter().enumerate() {
            writeln!(
                f,
                "  [{}] {} buffers, {} pipes",
                i,
                subgraph.buffers.len(),
                subgraph.pipes.len()
            )?;
        }
        for transfer in &self.mmio_transfers {
            writeln!(
                f,
                "MMIO pipe {} scatter {}: source {} tiles, destination {} tiles",
                transfer.pipe_id,
                transfer.scatter_index,
                transfer.source_size_tiles,
                transfer.destination_size_tiles
            )?;
        }
        Ok(())
    }
}
