//! Repair passes that complete a freshly wired pipe graph
//!
//! The producer of the pipegen text leaves a few structures incomplete. Each
//! handler patches one of them. Attribute and edge updates on existing nodes
//! happen in place; new and deleted nodes are staged in a [`GraphEdit`] that
//! the creator applies once the pass is over.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::buffer::BufferType;
use crate::device::CoreLocation;
use crate::error::{PipegenError, PipegenResult};
use crate::graph::{GraphEdit, NodeId, PipeGraph};
use crate::pipe::{PgPipe, PipeInput};

/// Offset of the synthesized input buffer below a lone intermediate buffer
pub const INTERMEDIATE_CLONE_ID_OFFSET: u64 = 2;
/// Offset of the synthesized pipe below a lone intermediate buffer
pub const INTERMEDIATE_PIPE_ID_OFFSET: u64 = 1;
/// Offset of the DRAM write replica above an end-to-end queue
pub const E2E_REPLICA_ID_OFFSET: u64 = 1;

/// One graph repair pass
pub trait GraphHandler {
    fn name(&self) -> &'static str;

    /// Patch the graph, returning the nodes to add and remove
    fn handle(&self, graph: &mut PipeGraph) -> PipegenResult<GraphEdit>;
}

/// Connects the embedding index buffer to the pipe that feeds an embedding table.
pub struct EmbeddingIndexHandler;

impl GraphHandler for EmbeddingIndexHandler {
    fn name(&self) -> &'static str {
        "embedding_index"
    }

    fn handle(&self, graph: &mut PipeGraph) -> PipegenResult<GraphEdit> {
        let mut table_pipes = Vec::new();
        for pipe in graph.pipes() {
            if let Some(first) = pipe.inputs.first() {
                if graph.expect_buffer(first.buffer_id)?.is_embedding_table() {
                    table_pipes.push(pipe.id);
                }
            }
        }

        for pipe_id in table_pipes {
            let pipe = graph.expect_pipe(pipe_id)?;
            if pipe.output_buffers.len() != 1 || pipe.output_buffers[0].is_empty() {
                return Err(PipegenError::invariant(format!(
                    "Embedding table pipe {} should have only one output, found {} scatter outputs",
                    pipe_id,
                    pipe.output_buffers.len()
                )));
            }
            let kernel = graph.expect_buffer(pipe.output_buffers[0][0])?;

            let index_id = graph
                .buffers()
                .iter()
                .find(|buffer| {
                    buffer.id != kernel.id
                        && buffer.location().is_some()
                        && buffer.logical_location == kernel.logical_location
                        && buffer.is_input_operand()
                })
                .map(|buffer| buffer.id)
                .ok_or_else(|| {
                    PipegenError::invariant(format!(
                        "Could not find embedding index kernel buffer for embedding table kernel buffer {}",
                        kernel.id
                    ))
                })?;

            graph.connect_input(pipe_id, PipeInput::from_buffer(index_id))?;
            graph.expect_pipe_mut(pipe_id)?.input_buffer_ids.push(index_id);
            copy_embedding_index_properties(graph, index_id)?;
            debug!(pipe = %pipe_id, index_buffer = %index_id, "wired embedding index");
        }

        Ok(GraphEdit::new())
    }
}

/// The index kernel buffer takes its index layout from the DRAM buffer feeding it
fn copy_embedding_index_properties(graph: &mut PipeGraph, index_id: NodeId) -> PipegenResult<()> {
    let index_pipe_id = graph.expect_buffer(index_id)?.input_pipe.ok_or_else(|| {
        PipegenError::invariant(format!(
            "Could not find embedding index pipe for embedding index kernel buffer {}",
            index_id
        ))
    })?;
    let index_pipe = graph.expect_pipe(index_pipe_id)?;
    if index_pipe.inputs.len() != 1 {
        return Err(PipegenError::invariant(format!(
            "Embedding index pipe {} should have only one input, found {}",
            index_pipe_id,
            index_pipe.inputs.len()
        )));
    }
    let dram = graph.expect_buffer(index_pipe.inputs[0].buffer_id)?;
    let (per_input, per_tile) = (
        dram.embedding.indices_per_input,
        dram.embedding.indices_per_tile,
    );

    let index = graph.expect_buffer_mut(index_id)?;
    index.embedding.is_index = true;
    index.embedding.indices_per_input = per_input;
    index.embedding.indices_per_tile = per_tile;
    Ok(())
}

/// Gives lone intermediate buffers a producer so later stages only see dataflow.
///
/// For intermediate buffer `N` a clone `N - 2` and a pipe `N - 1` are created:
/// clone -> pipe -> original. A packer sharing the buffer's L1 space becomes a
/// second pipe input.
pub struct IntermediateBufferHandler;

impl GraphHandler for IntermediateBufferHandler {
    fn name(&self) -> &'static str {
        "intermediate_buffer"
    }

    fn handle(&self, graph: &mut PipeGraph) -> PipegenResult<GraphEdit> {
        let lone: Vec<NodeId> = graph
            .buffers()
            .iter()
            .filter(|b| b.has_no_input() && b.has_no_outputs())
            .filter(|b| b.is_intermediate_operand() || b.buffer_type == BufferType::Intermediate)
            .map(|b| b.id)
            .collect();

        let mut edit = GraphEdit::new();
        for buffer_id in lone {
            let location = graph.buffer(buffer_id).and_then(|b| b.location());
            let synthesized = buffer_id
                .offset_back(INTERMEDIATE_CLONE_ID_OFFSET)
                .zip(buffer_id.offset_back(INTERMEDIATE_PIPE_ID_OFFSET));
            let Some((clone_id, pipe_id)) = synthesized else {
                return Err(PipegenError::invalid_spec(
                    format!(
                        "Cannot synthesize producer for intermediate buffer {}: id is below {}",
                        buffer_id, INTERMEDIATE_CLONE_ID_OFFSET
                    ),
                    location,
                ));
            };
            for id in [clone_id, pipe_id] {
                if graph.contains(id) || edit.stages(id) {
                    return Err(PipegenError::invalid_spec(
                        format!(
                            "Cannot synthesize node {} for intermediate buffer {}: id already in use",
                            id, buffer_id
                        ),
                        location,
                    ));
                }
            }

            let mut clone = graph.expect_buffer(buffer_id)?.clone_detached(clone_id);
            let mut pipe = PgPipe::new(pipe_id);
            pipe.mcast_core_locations.push(CoreLocation::unmapped(0));

            pipe.input_buffer_ids.push(clone_id);
            pipe.add_input(PipeInput::from_buffer(clone_id));
            clone.add_output_pipe(pipe_id);

            pipe.output_buffer_ids.push(vec![buffer_id]);
            pipe.add_output_buffer(buffer_id, 0);
            graph.expect_buffer_mut(buffer_id)?.input_pipe = Some(pipe_id);

            let shared_id = graph.shared_output_buffer(buffer_id).map(|b| b.id);
            if let Some(shared_id) = shared_id {
                graph.expect_buffer_mut(buffer_id)?.shared_space_buffer_id = Some(shared_id);
                clone.shared_space_buffer_id = Some(shared_id);
                pipe.input_buffer_ids.push(shared_id);
                pipe.add_input(PipeInput::from_buffer(shared_id));
                graph.expect_buffer_mut(shared_id)?.add_output_pipe(pipe_id);
            }

            trace!(buffer = %buffer_id, clone = %clone_id, pipe = %pipe_id, "synthesized intermediate producer");
            edit.add_buffers.push(clone);
            edit.add_pipes.push(pipe);
        }

        Ok(edit)
    }
}

/// Splits end-to-end DRAM queues into a write side and a read side.
///
/// The producing pipe now writes a replica `N + 1`; the original buffer keeps
/// its readers and loses its producer.
pub struct E2eQueueHandler;

impl GraphHandler for E2eQueueHandler {
    fn name(&self) -> &'static str {
        "e2e_queue"
    }

    fn handle(&self, graph: &mut PipeGraph) -> PipegenResult<GraphEdit> {
        let mut queues = Vec::new();
        for pipe in graph.pipes() {
            if let Some(output) = pipe.single_output_buffer() {
                if graph.expect_buffer(output)?.is_end_to_end_queue() {
                    queues.push((pipe.id, output));
                }
            }
        }

        let mut edit = GraphEdit::new();
        for (pipe_id, queue_id) in queues {
            let location = graph.buffer(queue_id).and_then(|b| b.location());
            let replica_id = queue_id.offset_by(E2E_REPLICA_ID_OFFSET).ok_or_else(|| {
                PipegenError::invalid_spec(
                    format!(
                        "Cannot create DRAM write replica for end-to-end queue {}: id is the last in the id space",
                        queue_id
                    ),
                    location,
                )
            })?;
            if graph.contains(replica_id) || edit.stages(replica_id) {
                return Err(PipegenError::invalid_spec(
                    format!(
                        "Cannot create DRAM write replica {} for end-to-end queue {}: id already in use",
                        replica_id, queue_id
                    ),
                    location,
                ));
            }

            let mut replica = graph.expect_buffer(queue_id)?.clone_detached(replica_id);
            replica.input_pipe = Some(pipe_id);

            let pipe = graph.expect_pipe_mut(pipe_id)?;
            pipe.replace_output_buffer(queue_id, replica_id);
            for id in pipe.output_buffer_ids.iter_mut().flatten() {
                if *id == queue_id {
                    *id = replica_id;
                }
            }
            graph.expect_buffer_mut(queue_id)?.input_pipe = None;

            debug!(pipe = %pipe_id, queue = %queue_id, replica = %replica_id, "split end-to-end queue");
            edit.add_buffers.push(replica);
        }

        Ok(edit)
    }
}

/// Bypasses post-TM relay buffers.
///
/// Eligible chain: a prefetch pipe reading only scatter post-TM prefetch
/// buffers, writing a relay buffer marked post-TM with a single reader, whose
/// reader pipe has a single input. The reader pipe takes over the prefetch
/// pipe's inputs and timing, and the prefetch pipe and relay are removed. A
/// prefetch pipe multicasting to several such relays is split into one unicast
/// reader per relay.
pub struct PostTmPipeHandler;

/// A relay to bypass and the pipe reading it
struct RelayHop {
    relay: NodeId,
    consumer: NodeId,
}

impl PostTmPipeHandler {
    fn eligible_hops(graph: &PipeGraph, src: &PgPipe) -> PipegenResult<Option<Vec<RelayHop>>> {
        let Some(relays) = src.output_buffers.first() else {
            return Ok(None);
        };
        if src.output_buffers.len() != 1 || relays.is_empty() {
            return Ok(None);
        }
        if !graph.is_scatter_prefetch_post_tm(src)? {
            return Ok(None);
        }

        let mut hops = Vec::with_capacity(relays.len());
        let mut consumers = HashSet::new();
        for &relay_id in relays {
            let relay = graph.expect_buffer(relay_id)?;
            if !relay.is_post_tm_relay {
                return Ok(None);
            }
            let Some(consumer_id) = relay.single_output_pipe() else {
                return Ok(None);
            };
            // A relay listed twice shows up as a repeated consumer
            if !graph.expect_pipe(consumer_id)?.has_single_input() || !consumers.insert(consumer_id) {
                return Ok(None);
            }
            hops.push(RelayHop {
                relay: relay_id,
                consumer: consumer_id,
            });
        }
        Ok(Some(hops))
    }

    fn bypass(graph: &mut PipeGraph, src_id: NodeId, hop: &RelayHop, multicast: bool) -> PipegenResult<()> {
        let relay_location = graph.expect_buffer(hop.relay)?.logical_location;
        let src = graph.expect_pipe(src_id)?;
        let src_inputs = src.inputs.clone();
        let periodic_repeat = src.periodic_repeat;
        let incoming_noc_id = src.incoming_noc_id;
        let incoming_vc = src.incoming_vc;
        let total_readers = src.dram_pipe_total_readers.clone();
        let reader_index = src.dram_pipe_reader_index.clone();

        graph.expect_pipe_mut(hop.consumer)?.remove_all_inputs();

        let mut replaced = HashSet::new();
        for input in src_inputs {
            if replaced.insert(input.buffer_id) {
                let buffer = graph.expect_buffer_mut(input.buffer_id)?;
                buffer.remove_output_pipe(src_id);
                buffer.add_output_pipe(hop.consumer);
                graph
                    .expect_pipe_mut(hop.consumer)?
                    .input_buffer_ids
                    .push(input.buffer_id);
            }
            graph.expect_pipe_mut(hop.consumer)?.add_input(input);
        }

        let consumer = graph.expect_pipe_mut(hop.consumer)?;
        consumer.periodic_repeat = periodic_repeat;
        consumer.incoming_noc_id = incoming_noc_id;
        consumer.incoming_vc = incoming_vc;
        consumer.dram_pipe_total_readers = total_readers;
        consumer.dram_pipe_reader_index = reader_index;
        if multicast {
            consumer.mcast_core_locations = vec![relay_location];
        }
        Ok(())
    }
}

impl GraphHandler for PostTmPipeHandler {
    fn name(&self) -> &'static str {
        "post_tm_pipe"
    }

    fn handle(&self, graph: &mut PipeGraph) -> PipegenResult<GraphEdit> {
        let mut chains = Vec::new();
        for src in graph.pipes() {
            if let Some(hops) = Self::eligible_hops(graph, src)? {
                chains.push((src.id, hops));
            }
        }

        let mut edit = GraphEdit::new();
        for (src_id, hops) in chains {
            let multicast = hops.len() > 1;
            for hop in &hops {
                Self::bypass(graph, src_id, hop, multicast)?;
                edit.remove_buffers.insert(hop.relay);
            }
            debug!(pipe = %src_id, relays = hops.len(), "bypassed post-TM relays");
            edit.remove_pipes.insert(src_id);
        }

        Ok(edit)
    }
}
