//! Pipe nodes of the pipe graph
//!
//! A pipe moves tiles from an ordered list of input buffers into one or more
//! scatter indices, each of which fans out to one or more output buffers.
//! Predicates that need buffer attributes live on
//! [`PipeGraph`](crate::graph::PipeGraph) since pipes only hold buffer ids.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::buffer::PgBuffer;
use crate::device::CoreLocation;
use crate::error::{PipegenError, PipegenResult};
use crate::graph::NodeId;

/// One read of a pipe: a buffer and the tile offset the read starts at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipeInput {
    pub buffer_id: NodeId,
    pub offset: u32,
}

impl PipeInput {
    pub fn new(buffer_id: NodeId, offset: u32) -> Self {
        Self { buffer_id, offset }
    }

    pub fn from_buffer(buffer_id: NodeId) -> Self {
        Self::new(buffer_id, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PgPipe {
    pub id: NodeId,
    pub periodic_repeat: u32,
    pub consumer_repeat: u32,
    pub incoming_noc_id: u32,
    pub incoming_vc: u32,
    pub outgoing_noc_id: u32,
    pub outgoing_vc: u32,
    pub ethernet_channel: Option<u32>,
    pub is_mmio_pipe: bool,
    pub is_mmio_pipe_downstream: bool,
    pub is_ethernet_pipe: bool,
    pub gather_optimization_disabled: bool,
    pub is_direct_mcast: bool,
    pub op_input_dram_io_buf_size_tiles: u64,
    pub dram_pipe_total_readers: Vec<i64>,
    pub dram_pipe_reader_index: Vec<i64>,
    /// One entry per raw scatter index; the first one tags diagnostics
    pub mcast_core_locations: Vec<CoreLocation>,

    // Raw ids as parsed, kept in sync by the handlers
    pub input_buffer_ids: Vec<NodeId>,
    pub output_buffer_ids: Vec<Vec<NodeId>>,
    pub output_padding_buffer_ids: Vec<NodeId>,

    // Resolved edges
    pub inputs: Vec<PipeInput>,
    pub output_buffers: Vec<Vec<NodeId>>,
    pub output_padding_inputs: BTreeMap<usize, Vec<PipeInput>>,
}

impl Default for PgPipe {
    fn default() -> Self {
        Self::new(NodeId::default())
    }
}

impl PgPipe {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            periodic_repeat: 1,
            consumer_repeat: 1,
            incoming_noc_id: 0,
            incoming_vc: 0,
            outgoing_noc_id: 0,
            outgoing_vc: 0,
            ethernet_channel: None,
            is_mmio_pipe: false,
            is_mmio_pipe_downstream: false,
            is_ethernet_pipe: false,
            gather_optimization_disabled: false,
            is_direct_mcast: false,
            op_input_dram_io_buf_size_tiles: 0,
            dram_pipe_total_readers: Vec::new(),
            dram_pipe_reader_index: Vec::new(),
            mcast_core_locations: Vec::new(),
            input_buffer_ids: Vec::new(),
            output_buffer_ids: Vec::new(),
            output_padding_buffer_ids: Vec::new(),
            inputs: Vec::new(),
            output_buffers: Vec::new(),
            output_padding_inputs: BTreeMap::new(),
        }
    }

    /// First declared location, used to localize diagnostics
    pub fn first_location(&self) -> Option<CoreLocation> {
        self.mcast_core_locations.first().copied()
    }

    pub fn add_input(&mut self, input: PipeInput) {
        self.inputs.push(input);
    }

    pub fn remove_all_inputs(&mut self) {
        self.inputs.clear();
        self.input_buffer_ids.clear();
    }

    pub fn add_output_buffer(&mut self, buffer_id: NodeId, scatter_index: usize) {
        if self.output_buffers.len() <= scatter_index {
            self.output_buffers.resize_with(scatter_index + 1, Vec::new);
        }
        self.output_buffers[scatter_index].push(buffer_id);
    }

    /// Replaces `old` with `new` in every scatter index
    pub fn replace_output_buffer(&mut self, old: NodeId, new: NodeId) {
        for buffer_id in self.output_buffers.iter_mut().flatten() {
            if *buffer_id == old {
                *buffer_id = new;
            }
        }
    }

    /// Substitutes reads of `padding` for the normal inputs at `scatter_index`.
    ///
    /// The padding buffer is read as many times as needed to cover the
    /// `num_msgs_per_scatter_index` tiles the pipe sends per scatter index, so
    /// its granularity must divide that count exactly.
    pub fn add_output_padding_buffer(
        &mut self,
        padding: &PgBuffer,
        scatter_index: usize,
        num_msgs_per_scatter_index: u32,
    ) -> PipegenResult<()> {
        let granularity = padding.scatter_gather_num_tiles;
        if granularity == 0 || num_msgs_per_scatter_index % granularity != 0 {
            return Err(PipegenError::invariant(format!(
                "Output padding buffer {} of pipe {} has scatter_gather_num_tiles {} which does not divide \
                 the {} messages the pipe transfers per scatter index",
                padding.id, self.id, granularity, num_msgs_per_scatter_index
            )));
        }

        let count = (num_msgs_per_scatter_index / granularity) as usize;
        self.output_padding_inputs
            .insert(scatter_index, vec![PipeInput::from_buffer(padding.id); count]);
        Ok(())
    }

    pub fn is_output_padding(&self, scatter_index: usize) -> bool {
        self.output_padding_inputs.contains_key(&scatter_index)
    }

    /// Reads performed for `scatter_index`: padding reads if substituted
    pub fn inputs_for_scatter_index(&self, scatter_index: usize) -> &[PipeInput] {
        self.output_padding_inputs
            .get(&scatter_index)
            .map(Vec::as_slice)
            .unwrap_or(self.inputs.as_slice())
    }

    pub fn unique_input_buffers(&self) -> Vec<NodeId> {
        dedup_in_order(self.inputs.iter().map(|input| input.buffer_id))
    }

    /// At most one padding buffer per scatter index, so the first read is enough
    pub fn unique_output_padding_buffers(&self) -> Vec<NodeId> {
        dedup_in_order(
            self.output_padding_inputs
                .values()
                .filter_map(|inputs| inputs.first())
                .map(|input| input.buffer_id),
        )
    }

    pub fn unique_input_buffers_including_padding(&self) -> Vec<NodeId> {
        dedup_in_order(
            self.unique_input_buffers()
                .into_iter()
                .chain(self.unique_output_padding_buffers()),
        )
    }

    pub fn unique_output_buffers(&self) -> Vec<NodeId> {
        dedup_in_order(self.output_buffers.iter().flatten().copied())
    }

    pub fn has_single_input(&self) -> bool {
        self.inputs.len() == 1
    }

    /// Reads from exactly one buffer, possibly at several offsets
    pub fn has_single_buffer_input(&self) -> bool {
        self.unique_input_buffers().len() == 1
    }

    pub fn has_single_output(&self) -> bool {
        self.output_buffers.len() == 1 && self.output_buffers[0].len() == 1
    }

    pub fn single_output_buffer(&self) -> Option<NodeId> {
        if self.has_single_output() {
            Some(self.output_buffers[0][0])
        } else {
            None
        }
    }

    pub fn scatter_fanout(&self) -> usize {
        self.output_buffers.len()
    }

    pub fn padding_scatter_fanout(&self) -> usize {
        self.output_padding_inputs.len()
    }

    pub fn is_pipe_scattering(&self) -> bool {
        self.scatter_fanout() > 1
    }

    pub fn has_output_list_duplicates(&self) -> bool {
        let step = self.consumer_repeat.max(1) as usize;
        let mut seen: BTreeSet<&Vec<NodeId>> = BTreeSet::new();
        self.output_buffer_ids
            .iter()
            .step_by(step)
            .any(|ids| !seen.insert(ids))
    }

    pub fn has_consumer_duplicates(&self) -> bool {
        self.consumer_repeat > 1 || self.has_output_list_duplicates()
    }
}

fn dedup_in_order(ids: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn padding_buffer(id: u64, granularity: u32) -> PgBuffer {
        let mut buffer = PgBuffer::new(NodeId(id));
        buffer.is_padding = true;
        buffer.scatter_gather_num_tiles = granularity;
        buffer
    }

    #[test]
    fn test_new_pipe_defaults() {
        let pipe = PgPipe::new(NodeId(5));
        assert_eq!(pipe.periodic_repeat, 1);
        assert_eq!(pipe.consumer_repeat, 1);
        assert_eq!(pipe.ethernet_channel, None);
        assert!(pipe.first_location().is_none());
    }

    #[test]
    fn test_padding_exact_divisor() {
        let mut pipe = PgPipe::new(NodeId(1));
        pipe.add_output_padding_buffer(&padding_buffer(50, 2), 3, 8).unwrap();

        assert!(pipe.is_output_padding(3));
        assert!(!pipe.is_output_padding(0));
        assert_eq!(pipe.inputs_for_scatter_index(3).len(), 4);
        assert!(pipe
            .inputs_for_scatter_index(3)
            .iter()
            .all(|input| *input == PipeInput::new(NodeId(50), 0)));
    }

    #[test]
    fn test_padding_non_divisor_is_invariant_violation() {
        let mut pipe = PgPipe::new(NodeId(1));
        let err = pipe
            .add_output_padding_buffer(&padding_buffer(50, 3), 0, 8)
            .unwrap_err();
        assert!(matches!(err, PipegenError::InvariantViolation { .. }));
        assert!(err.to_string().contains("does not divide"));
        assert_eq!(pipe.padding_scatter_fanout(), 0);
    }

    #[test]
    fn test_inputs_for_unpadded_index_are_normal_inputs() {
        let mut pipe = PgPipe::new(NodeId(1));
        pipe.add_input(PipeInput::from_buffer(NodeId(10)));
        pipe.add_output_padding_buffer(&padding_buffer(50, 1), 1, 1).unwrap();
        assert_eq!(pipe.inputs_for_scatter_index(0), &[PipeInput::from_buffer(NodeId(10))]);
    }

    #[test]
    fn test_unique_inputs_including_padding() {
        let mut pipe = PgPipe::new(NodeId(1));
        pipe.add_input(PipeInput::new(NodeId(10), 0));
        pipe.add_input(PipeInput::new(NodeId(10), 4));
        pipe.add_input(PipeInput::new(NodeId(11), 0));
        pipe.add_output_padding_buffer(&padding_buffer(11, 4), 0, 12).unwrap();
        pipe.add_output_padding_buffer(&padding_buffer(12, 4), 1, 12).unwrap();

        assert_eq!(pipe.unique_input_buffers(), vec![NodeId(10), NodeId(11)]);
        assert_eq!(pipe.unique_output_padding_buffers(), vec![NodeId(11), NodeId(12)]);
        assert_eq!(
            pipe.unique_input_buffers_including_padding(),
            vec![NodeId(10), NodeId(11), NodeId(12)]
        );
    }

    #[test]
    fn test_single_output_and_replace() {
        let mut pipe = PgPipe::new(NodeId(1));
        pipe.add_output_buffer(NodeId(20), 0);
        assert_eq!(pipe.single_output_buffer(), Some(NodeId(20)));

        pipe.replace_output_buffer(NodeId(20), NodeId(21));
        assert_eq!(pipe.output_buffers, vec![vec![NodeId(21)]]);

        pipe.add_output_buffer(NodeId(22), 2);
        assert_eq!(pipe.scatter_fanout(), 3);
        assert!(pipe.is_pipe_scattering());
        assert!(!pipe.has_single_output());
    }

    #[test]
    fn test_output_list_duplicates_respect_consumer_repeat() {
        let mut pipe = PgPipe::new(NodeId(1));
        pipe.output_buffer_ids = vec![vec![NodeId(2)], vec![NodeId(2)], vec![NodeId(3)]];
        assert!(pipe.has_output_list_duplicates());

        pipe.consumer_repeat = 2;
        assert!(!pipe.has_output_list_duplicates());
        assert!(pipe.has_consumer_duplicates());
    }

    #[test]
    fn test_single_buffer_input_at_several_offsets() {
        let mut pipe = PgPipe::new(NodeId(1));
        assert!(!pipe.has_single_buffer_input());

        pipe.add_input(PipeInput::new(NodeId(10), 0));
        pipe.add_input(PipeInput::new(NodeId(10), 2));
        assert!(pipe.has_single_buffer_input());
        assert!(!pipe.has_single_input());

        pipe.add_input(PipeInput::from_buffer(NodeId(11)));
        assert!(!pipe.has_single_buffer_input());
    }
}
