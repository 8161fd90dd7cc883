//! The pipe graph arena
//!
//! Buffers and pipes share one id namespace. Nodes are owned here and every
//! edge is an id resolved through [`PipeGraph`], so removing a node can never
//! leave a dangling reference behind unnoticed: [`PipeGraph::validate_edges`]
//! reports it instead.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::buffer::PgBuffer;
use crate::device::CoreLocation;
use crate::error::{PipegenError, PipegenResult};
use crate::pipe::{PgPipe, PipeInput};

/// Id of a buffer or pipe; both kinds draw from the same numeric space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Id at a fixed positive distance, used for producer-derived clone ids.
    /// `None` past the end of the id space.
    pub fn offset_by(self, delta: u64) -> Option<NodeId> {
        self.0.checked_add(delta).map(NodeId)
    }

    pub fn offset_back(self, delta: u64) -> Option<NodeId> {
        self.0.checked_sub(delta).map(NodeId)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

/// Nodes a handler pass adds or removes, applied after the pass completes
#[derive(Debug, Default)]
pub struct GraphEdit {
    pub add_buffers: Vec<PgBuffer>,
    pub add_pipes: Vec<PgPipe>,
    pub remove_buffers: BTreeSet<NodeId>,
    pub remove_pipes: BTreeSet<NodeId>,
}

impl GraphEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.add_buffers.is_empty()
            && self.add_pipes.is_empty()
            && self.remove_buffers.is_empty()
            && self.remove_pipes.is_empty()
    }

    /// True if this edit already stages a node with `id`
    pub fn stages(&self, id: NodeId) -> bool {
        self.add_buffers.iter().any(|b| b.id == id) || self.add_pipes.iter().any(|p| p.id == id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipeGraph {
    buffers: Vec<PgBuffer>,
    pipes: Vec<PgPipe>,
    buffer_slots: HashMap<NodeId, usize>,
    pipe_slots: HashMap<NodeId, usize>,
}

impl PipeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffers(&self) -> &[PgBuffer] {
        &self.buffers
    }

    pub fn pipes(&self) -> &[PgPipe] {
        &self.pipes
    }

    pub fn num_nodes(&self) -> usize {
        self.buffers.len() + self.pipes.len()
    }

    pub fn buffer(&self, id: NodeId) -> Option<&PgBuffer> {
        self.buffer_slots.get(&id).map(|&slot| &self.buffers[slot])
    }

    pub fn buffer_mut(&mut self, id: NodeId) -> Option<&mut PgBuffer> {
        self.buffer_slots
            .get(&id)
            .copied()
            .map(move |slot| &mut self.buffers[slot])
    }

    pub fn pipe(&self, id: NodeId) -> Option<&PgPipe> {
        self.pipe_slots.get(&id).map(|&slot| &self.pipes[slot])
    }

    pub fn pipe_mut(&mut self, id: NodeId) -> Option<&mut PgPipe> {
        self.pipe_slots
            .get(&id)
            .copied()
            .map(move |slot| &mut self.pipes[slot])
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.buffer_slots.contains_key(&id) || self.pipe_slots.contains_key(&id)
    }

    /// Buffer lookup for code paths where absence breaks an internal contract
    pub fn expect_buffer(&self, id: NodeId) -> PipegenResult<&PgBuffer> {
        self.buffer(id)
            .ok_or_else(|| PipegenError::invariant(format!("Buffer with id {} is not in the graph", id)))
    }

    pub fn expect_buffer_mut(&mut self, id: NodeId) -> PipegenResult<&mut PgBuffer> {
        self.buffer_mut(id)
            .ok_or_else(|| PipegenError::invariant(format!("Buffer with id {} is not in the graph", id)))
    }

    pub fn expect_pipe(&self, id: NodeId) -> PipegenResult<&PgPipe> {
        self.pipe(id)
            .ok_or_else(|| PipegenError::invariant(format!("Pipe with id {} is not in the graph", id)))
    }

    pub fn expect_pipe_mut(&mut self, id: NodeId) -> PipegenResult<&mut PgPipe> {
        self.pipe_mut(id)
            .ok_or_else(|| PipegenError::invariant(format!("Pipe with id {} is not in the graph", id)))
    }

    pub fn add_buffer(&mut self, buffer: PgBuffer) -> PipegenResult<()> {
        if self.contains(buffer.id) {
            return Err(PipegenError::invalid_spec(
                format!("Buffer with id {} already exists", buffer.id),
                buffer.location(),
            ));
        }
        self.buffer_slots.insert(buffer.id, self.buffers.len());
        self.buffers.push(buffer);
        Ok(())
    }

    pub fn add_pipe(&mut self, pipe: PgPipe) -> PipegenResult<()> {
        if self.contains(pipe.id) {
            return Err(PipegenError::invalid_spec(
                format!("Pipe with id {} already exists", pipe.id),
                pipe.first_location(),
            ));
        }
        self.pipe_slots.insert(pipe.id, self.pipes.len());
        self.pipes.push(pipe);
        Ok(())
    }

    /// Removes every listed buffer; ids not in the graph are ignored
    pub fn remove_buffers(&mut self, ids: &BTreeSet<NodeId>) {
        if ids.is_empty() {
            return;
        }
        self.buffers.retain(|buffer| !ids.contains(&buffer.id));
        self.buffer_slots = slot_map(self.buffers.iter().map(|b| b.id));
    }

    /// Removes every listed pipe; ids not in the graph are ignored
    pub fn remove_pipes(&mut self, ids: &BTreeSet<NodeId>) {
        if ids.is_empty() {
            return;
        }
        self.pipes.retain(|pipe| !ids.contains(&pipe.id));
        self.pipe_slots = slot_map(self.pipes.iter().map(|p| p.id));
    }

    /// Applies a staged edit: removals first, then additions in staging order
    pub fn apply(&mut self, edit: GraphEdit) -> PipegenResult<()> {
        debug!(
            added_buffers = edit.add_buffers.len(),
            added_pipes = edit.add_pipes.len(),
            removed_buffers = edit.remove_buffers.len(),
            removed_pipes = edit.remove_pipes.len(),
            "applying graph edit"
        );
        self.remove_pipes(&edit.remove_pipes);
        self.remove_buffers(&edit.remove_buffers);
        for buffer in edit.add_buffers {
            self.add_buffer(buffer)?;
        }
        for pipe in edit.add_pipes {
            self.add_pipe(pipe)?;
        }
        Ok(())
    }

    /// Reads `input` in `pipe_id` and records the pipe as a reader of the buffer
    pub fn connect_input(&mut self, pipe_id: NodeId, input: PipeInput) -> PipegenResult<()> {
        self.expect_buffer_mut(input.buffer_id)?.add_output_pipe(pipe_id);
        self.expect_pipe_mut(pipe_id)?.add_input(input);
        Ok(())
    }

    /// Makes `pipe_id` the producer of `buffer_id` at `scatter_index`
    pub fn connect_output(
        &mut self,
        pipe_id: NodeId,
        buffer_id: NodeId,
        scatter_index: usize,
    ) -> PipegenResult<()> {
        self.expect_buffer_mut(buffer_id)?.input_pipe = Some(pipe_id);
        self.expect_pipe_mut(pipe_id)?.add_output_buffer(buffer_id, scatter_index);
        Ok(())
    }

    /// Substitutes reads of `padding_id` for the pipe's inputs at `scatter_index`
    pub fn connect_output_padding(
        &mut self,
        pipe_id: NodeId,
        padding_id: NodeId,
        scatter_index: usize,
    ) -> PipegenResult<()> {
        let num_msgs = self.num_msgs_per_scatter_index(self.expect_pipe(pipe_id)?)?;
        let buffer_slot = *self
            .buffer_slots
            .get(&padding_id)
            .ok_or_else(|| PipegenError::invariant(format!("Buffer with id {} is not in the graph", padding_id)))?;
        let pipe_slot = *self
            .pipe_slots
            .get(&pipe_id)
            .ok_or_else(|| PipegenError::invariant(format!("Pipe with id {} is not in the graph", pipe_id)))?;

        self.pipes[pipe_slot].add_output_padding_buffer(&self.buffers[buffer_slot], scatter_index, num_msgs)?;
        self.buffers[buffer_slot].add_output_pipe(pipe_id);
        Ok(())
    }

    /// Buffer that declared it shares L1 space with `buffer_id`
    pub fn shared_output_buffer(&self, buffer_id: NodeId) -> Option<&PgBuffer> {
        self.buffers
            .iter()
            .find(|buffer| buffer.shared_space_buffer_id == Some(buffer_id))
    }

    /// Chips referenced by any placed buffer, sorted
    pub fn all_chip_ids(&self) -> Vec<u32> {
        self.buffers
            .iter()
            .map(|buffer| buffer.logical_location.chip)
            .filter(|&chip| chip != CoreLocation::UNSET)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Tiles a pipe sends per scatter index: one granule per normal read
    pub fn num_msgs_per_scatter_index(&self, pipe: &PgPipe) -> PipegenResult<u32> {
        pipe.inputs.iter().try_fold(0u32, |total, input| -> PipegenResult<u32> {
            let tiles = self.expect_buffer(input.buffer_id)?.scatter_gather_num_tiles;
            total.checked_add(tiles).ok_or_else(|| {
                PipegenError::invariant(format!(
                    "Pipe {} sends more than {} tiles per scatter index",
                    pipe.id,
                    u32::MAX
                ))
            })
        })
    }

    /// Whether the pipe reads only scatter post-TM prefetch buffers.
    ///
    /// Mixing those with any other kind of input is a producer bug.
    pub fn is_scatter_prefetch_post_tm(&self, pipe: &PgPipe) -> PipegenResult<bool> {
        let mut post_tm = 0usize;
        for input in &pipe.inputs {
            if self.expect_buffer(input.buffer_id)?.is_scatter_prefetch_post_tm() {
                post_tm += 1;
            }
        }
        if post_tm > 0 && post_tm != pipe.inputs.len() {
            return Err(PipegenError::invariant(format!(
                "Pipe {} mixes {} scatter prefetch post-TM inputs with {} other inputs",
                pipe.id,
                post_tm,
                pipe.inputs.len() - post_tm
            )));
        }
        Ok(post_tm > 0)
    }

    /// Only the first scatter index is inspected; scatter outputs never mix kinds
    pub fn is_connecting_l1_buffers(&self, pipe: &PgPipe) -> PipegenResult<bool> {
        for id in pipe.unique_input_buffers() {
            if !self.expect_buffer(id)?.is_located_in_l1() {
                return Ok(false);
            }
        }
        for &id in pipe.output_buffers.first().into_iter().flatten() {
            if !self.expect_buffer(id)?.is_located_in_l1() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn has_non_prefetch_pre_tm_dram_input(&self, pipe: &PgPipe) -> PipegenResult<bool> {
        for input in &pipe.inputs {
            if !self.expect_buffer(input.buffer_id)?.is_non_prefetch_pre_tm_dram_input() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_direct_intermediate_pipe(&self, pipe: &PgPipe) -> PipegenResult<bool> {
        let Some(output) = pipe.single_output_buffer() else {
            return Ok(false);
        };
        if !pipe.has_single_input() {
            return Ok(false);
        }
        Ok(self.expect_buffer(pipe.inputs[0].buffer_id)?.is_intermediate_operand()
            && self.expect_buffer(output)?.is_intermediate_operand())
    }

    pub fn is_join_intermediate_pipe(&self, pipe: &PgPipe) -> PipegenResult<bool> {
        let Some(output) = pipe.single_output_buffer() else {
            return Ok(false);
        };
        if pipe.inputs.len() != 2 || !self.expect_buffer(output)?.is_intermediate_operand() {
            return Ok(false);
        }
        Ok(self.expect_buffer(pipe.inputs[0].buffer_id)?.is_intermediate_operand()
            || self.expect_buffer(pipe.inputs[1].buffer_id)?.is_intermediate_operand())
    }

    /// Checks that every edge of every node resolves to a live node
    pub fn validate_edges(&self) -> PipegenResult<()> {
        for pipe in &self.pipes {
            let padding = pipe.output_padding_inputs.values().flatten();
            for input in pipe.inputs.iter().chain(padding) {
                if self.buffer(input.buffer_id).is_none() {
                    return Err(PipegenError::invalid_spec(
                        format!("Pipe with id {} reads missing buffer {}", pipe.id, input.buffer_id),
                        pipe.first_location(),
                    ));
                }
            }
            for &output in pipe.output_buffers.iter().flatten() {
                if self.buffer(output).is_none() {
                    return Err(PipegenError::invalid_spec(
                        format!("Pipe with id {} writes missing buffer {}", pipe.id, output),
                        pipe.first_location(),
                    ));
                }
            }
        }
        for buffer in &self.buffers {
            let producer = buffer.input_pipe.iter();
            for &pipe_id in producer.chain(buffer.output_pipes.iter()) {
                if self.pipe(pipe_id).is_none() {
                    return Err(PipegenError::invalid_spec(
                        format!("Buffer with id {} is linked to missing pipe {}", buffer.id, pipe_id),
                        buffer.location(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn slot_map(ids: impl Iterator<Item = NodeId>) -> HashMap<NodeId, usize> {
    ids.enumerate().map(|(slot, id)| (id, slot)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(values: &[u64]) -> BTreeSet<NodeId> {
        values.iter().copied().map(NodeId).collect()
    }

    fn chain_graph() -> PipeGraph {
        let mut graph = PipeGraph::new();
        graph.add_buffer(PgBuffer::new(NodeId(1))).unwrap();
        graph.add_buffer(PgBuffer::new(NodeId(2))).unwrap();
        graph.add_pipe(PgPipe::new(NodeId(10))).unwrap();
        graph.connect_input(NodeId(10), PipeInput::from_buffer(NodeId(1))).unwrap();
        graph.connect_output(NodeId(10), NodeId(2), 0).unwrap();
        graph
    }

    #[test]
    fn test_add_and_lookup() {
        let graph = chain_graph();
        assert_eq!(graph.buffers().len(), 2);
        assert_eq!(graph.pipes().len(), 1);
        assert_eq!(graph.buffer(NodeId(2)).unwrap().input_pipe, Some(NodeId(10)));
        assert!(graph.buffer(NodeId(1)).unwrap().output_pipes.contains(&NodeId(10)));
        assert!(graph.buffer(NodeId(10)).is_none());
        assert!(graph.contains(NodeId(10)));
        graph.validate_edges().unwrap();
    }

    #[test]
    fn test_shared_namespace_rejects_duplicates() {
        let mut graph = chain_graph();
        let err = graph.add_pipe(PgPipe::new(NodeId(1))).unwrap_err();
        assert!(matches!(err, PipegenError::InvalidSpecification { .. }));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_remove_keeps_lookup_consistent() {
        let mut graph = PipeGraph::new();
        for id in [100, 101, 102] {
            graph.add_buffer(PgBuffer::new(NodeId(id))).unwrap();
        }
        graph.remove_buffers(&ids(&[100, 555]));
        assert_eq!(graph.buffers().len(), 2);
        assert!(graph.buffer(NodeId(100)).is_none());
        assert_eq!(graph.buffer(NodeId(102)).unwrap().id, NodeId(102));
    }

    #[test]
    fn test_validate_edges_reports_dangling_pipe() {
        let mut graph = chain_graph();
        graph.remove_pipes(&ids(&[10]));
        let err = graph.validate_edges().unwrap_err();
        assert!(err.to_string().contains("missing pipe 10"));
    }

    #[test]
    fn test_apply_edit() {
        let mut graph = chain_graph();
        let mut edit = GraphEdit::new();
        edit.add_buffers.push(PgBuffer::new(NodeId(3)));
        edit.remove_buffers.insert(NodeId(3));
        assert!(edit.stages(NodeId(3)));
        graph.apply(edit).unwrap();
        // Removals run before additions
        assert!(graph.buffer(NodeId(3)).is_some());
    }

    #[test]
    fn test_shared_output_buffer() {
        let mut graph = PipeGraph::new();
        let mut packer = PgBuffer::new(NodeId(100));
        packer.shared_space_buffer_id = Some(NodeId(200));
        graph.add_buffer(packer).unwrap();

        assert_eq!(graph.shared_output_buffer(NodeId(200)).unwrap().id, NodeId(100));
        assert!(graph.shared_output_buffer(NodeId(300)).is_none());
    }

    #[test]
    fn test_all_chip_ids() {
        let mut graph = PipeGraph::new();
        for (id, chip) in [(1, 2), (2, 0), (3, 2), (4, 1)] {
            let mut buffer = PgBuffer::new(NodeId(id));
            buffer.logical_location.chip = chip;
            graph.add_buffer(buffer).unwrap();
        }
        // Never placed on a chip
        graph.add_buffer(PgBuffer::new(NodeId(5))).unwrap();
        assert_eq!(graph.all_chip_ids(), vec![0, 1, 2]);
    }

    #[test]
    fn test_node_id_offsets_stop_at_id_space_ends() {
        assert_eq!(NodeId(10).offset_by(1), Some(NodeId(11)));
        assert_eq!(NodeId(10).offset_back(2), Some(NodeId(8)));
        assert_eq!(NodeId(u64::MAX).offset_by(1), None);
        assert_eq!(NodeId(1).offset_back(2), None);
    }

    #[test]
    fn test_num_msgs_per_scatter_index() {
        let mut graph = PipeGraph::new();
        for id in [1, 2] {
            let mut buffer = PgBuffer::new(NodeId(id));
            buffer.scatter_gather_num_tiles = 3;
            graph.add_buffer(buffer).unwrap();
        }
        graph.add_pipe(PgPipe::new(NodeId(10))).unwrap();
        graph.connect_input(NodeId(10), PipeInput::from_buffer(NodeId(1))).unwrap();
        graph.connect_input(NodeId(10), PipeInput::new(NodeId(2), 3)).unwrap();

        let pipe = graph.pipe(NodeId(10)).unwrap();
        assert_eq!(graph.num_msgs_per_scatter_index(pipe).unwrap(), 6);
    }

    #[test]
    fn test_num_msgs_overflow_is_an_error() {
        let mut graph = PipeGraph::new();
        for id in [1, 2] {
            let mut buffer = PgBuffer::new(NodeId(id));
            buffer.scatter_gather_num_tiles = 0xC000_0000;
            graph.add_buffer(buffer).unwrap();
        }
        graph.add_pipe(PgPipe::new(NodeId(10))).unwrap();
        graph.connect_input(NodeId(10), PipeInput::from_buffer(NodeId(1))).unwrap();
        graph.connect_input(NodeId(10), PipeInput::from_buffer(NodeId(2))).unwrap();

        let pipe = graph.pipe(NodeId(10)).unwrap();
        let err = graph.num_msgs_per_scatter_index(pipe).unwrap_err();
        assert!(matches!(err, PipegenError::InvariantViolation { .. }));
    }

    #[test]
    fn test_non_prefetch_pre_tm_dram_input() {
        let mut graph = PipeGraph::new();
        let mut queue = PgBuffer::new(NodeId(1));
        queue.dram.io = true;
        queue.num_queue_slots = 2;
        graph.add_buffer(queue).unwrap();
        let mut prefetch = PgBuffer::new(NodeId(2));
        prefetch.dram.buf = true;
        graph.add_buffer(prefetch).unwrap();
        graph.add_pipe(PgPipe::new(NodeId(10))).unwrap();
        graph.add_pipe(PgPipe::new(NodeId(11))).unwrap();
        graph.connect_input(NodeId(10), PipeInput::from_buffer(NodeId(1))).unwrap();
        graph.connect_input(NodeId(11), PipeInput::from_buffer(NodeId(1))).unwrap();
        graph.connect_input(NodeId(11), PipeInput::from_buffer(NodeId(2))).unwrap();

        assert!(graph.has_non_prefetch_pre_tm_dram_input(graph.pipe(NodeId(10)).unwrap()).unwrap());
        // Every input must qualify
        assert!(!graph.has_non_prefetch_pre_tm_dram_input(graph.pipe(NodeId(11)).unwrap()).unwrap());
    }

    #[test]
    fn test_mixed_post_tm_inputs_are_rejected() {
        let mut graph = PipeGraph::new();
        let mut post_tm = PgBuffer::new(NodeId(1));
        post_tm.is_scatter = true;
        post_tm.dram.buf = true;
        post_tm.prefetch_type = crate::buffer::PrefetchType::PostTm;
        graph.add_buffer(post_tm).unwrap();
        graph.add_buffer(PgBuffer::new(NodeId(2))).unwrap();
        graph.add_pipe(PgPipe::new(NodeId(10))).unwrap();
        graph.connect_input(NodeId(10), PipeInput::from_buffer(NodeId(1))).unwrap();

        let pipe = graph.pipe(NodeId(10)).unwrap().clone();
        assert!(graph.is_scatter_prefetch_post_tm(&pipe).unwrap());

        graph.connect_input(NodeId(10), PipeInput::from_buffer(NodeId(2))).unwrap();
        let pipe = graph.pipe(NodeId(10)).unwrap().clone();
        let err = graph.is_scatter_prefetch_post_tm(&pipe).unwrap_err();
        assert!(matches!(err, PipegenError::InvariantViolation { .. }));
    }

    #[test]
    fn test_direct_intermediate_pipe() {
        let mut graph = PipeGraph::new();
        for id in [1, 2] {
            let mut buffer = PgBuffer::new(NodeId(id));
            buffer.operand_id = Some(24);
            graph.add_buffer(buffer).unwrap();
        }
        graph.add_pipe(PgPipe::new(NodeId(10))).unwrap();
        graph.connect_input(NodeId(10), PipeInput::from_buffer(NodeId(1))).unwrap();
        graph.connect_output(NodeId(10), NodeId(2), 0).unwrap();

        let pipe = graph.pipe(NodeId(10)).unwrap();
        assert!(graph.is_direct_intermediate_pipe(pipe).unwrap());
        assert!(!graph.is_join_intermediate_pipe(pipe).unwrap());
        assert!(graph.is_connecting_l1_buffers(pipe).unwrap());
    }
}
