//! Transfer sizing for pipes that cross the host interconnect
//!
//! PCIe writes are issued in chunks. The source chunk must evenly tile every
//! contiguous run of reads and the destination, and stay under the write
//! issue limit; the destination may double buffer when memory allows.

use serde::Serialize;

use crate::buffer::PgBuffer;
use crate::device::PcieFlowConfig;
use crate::error::PipegenResult;
use crate::graph::{NodeId, PipeGraph};

/// Chunk sizes chosen for one scatter index of an MMIO pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MmioTransfer {
    pub pipe_id: NodeId,
    pub scatter_index: usize,
    pub source_size_tiles: u32,
    pub destination_size_tiles: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PcieFlowCalculator {
    config: PcieFlowConfig,
}

impl PcieFlowCalculator {
    pub fn new(config: PcieFlowConfig) -> Self {
        Self { config }
    }

    /// Largest chunk that evenly divides every same-core run of inputs and the
    /// single destination, halved until it fits one write issue
    pub fn calculate_source_size_tiles(
        &self,
        inputs: &[&PgBuffer],
        outputs: &[&PgBuffer],
        tile_size: u32,
    ) -> u32 {
        let mut runs: Vec<u32> = Vec::new();
        let mut previous_location = None;
        for input in inputs {
            if previous_location == Some(input.logical_location) {
                if let Some(last) = runs.last_mut() {
                    *last = last.saturating_add(input.scatter_gather_num_tiles);
                }
            } else {
                runs.push(input.scatter_gather_num_tiles);
                previous_location = Some(input.logical_location);
            }
        }

        let mut size = runs.into_iter().fold(0, gcd);
        if let [output] = outputs {
            size = gcd(size, output.size_tiles);
        }

        let max_bytes = u64::from(self.config.max_write_issue_bytes);
        while size % 2 == 0 && u64::from(size) * u64::from(tile_size) > max_bytes {
            size /= 2;
        }
        size
    }

    pub fn calculate_destination_size_tiles(
        &self,
        outputs: &[&PgBuffer],
        tile_size: u32,
        source_size_tiles: u32,
    ) -> u32 {
        match outputs {
            [output] => output.size_tiles,
            [] => source_size_tiles,
            _ => match source_size_tiles.checked_mul(2) {
                Some(doubled)
                    if u64::from(doubled) * u64::from(tile_size)
                        <= u64::from(self.config.max_destination_bytes) =>
                {
                    doubled
                }
                _ => source_size_tiles,
            },
        }
    }

    /// Sizes every scatter index of every MMIO pipe in the graph, in graph order
    pub fn mmio_transfers(&self, graph: &PipeGraph) -> PipegenResult<Vec<MmioTransfer>> {
        let mut transfers = Vec::new();
        for pipe in graph.pipes().iter().filter(|p| p.is_mmio_pipe) {
            for (scatter_index, output_ids) in pipe.output_buffers.iter().enumerate() {
                let inputs = pipe
                    .inputs_for_scatter_index(scatter_index)
                    .iter()
                    .map(|input| graph.expect_buffer(input.buffer_id))
                    .collect::<PipegenResult<Vec<_>>>()?;
                let outputs = output_ids
                    .iter()
                    .map(|&id| graph.expect_buffer(id))
                    .collect::<PipegenResult<Vec<_>>>()?;
                let Some(tile_size) = inputs.first().map(|b| b.tile_size) else {
                    continue;
                };

                let source_size_tiles = self.calculate_source_size_tiles(&inputs, &outputs, tile_size);
                transfers.push(MmioTransfer {
                    pipe_id: pipe.id,
                    scatter_index,
                    source_size_tiles,
                    destination_size_tiles: self.calculate_destination_size_tiles(
                        &outputs,
                        tile_size,
                        source_size_tiles,
                    ),
                });
            }
        }
        Ok(transfers)
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
