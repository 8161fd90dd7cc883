//! Builds a fully wired pipe graph from parsed nodes
//!
//! Wiring happens in three steps: scatter buffers register one extra input
//! key per replica, every raw id on every pipe is resolved into an edge, and
//! the repair handlers run in their fixed order.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::device::{CoreLocation, PipegenConfig};
use crate::error::{PipegenError, PipegenResult};
use crate::graph::{NodeId, PipeGraph};
use crate::handlers::{
    E2eQueueHandler, EmbeddingIndexHandler, GraphHandler, IntermediateBufferHandler,
    PostTmPipeHandler,
};
use crate::parser::{parse_file, PipeGraphParser};
use crate::pipe::PipeInput;

/// Padding list entry meaning "no padding for this scatter index"
pub const NO_OUTPUT_PADDING_BUFFER_ID: NodeId = NodeId(0);

/// Ids a pipe may reference, including scatter replica keys
#[derive(Debug, Default)]
struct BufferRegistry {
    buffers_per_id: HashMap<NodeId, NodeId>,
    scatter_inputs: HashMap<NodeId, PipeInput>,
}

impl BufferRegistry {
    fn build(graph: &PipeGraph) -> PipegenResult<Self> {
        let mut registry = Self::default();

        for buffer in graph.buffers().iter().filter(|b| b.is_scatter) {
            registry
                .scatter_inputs
                .insert(buffer.id, PipeInput::from_buffer(buffer.id));
            for i in 1..buffer.replicate {
                let (offset, key) = i
                    .checked_mul(buffer.scatter_gather_num_tiles)
                    .and_then(|offset| Some((offset, buffer.id.offset_by(u64::from(offset))?)))
                    .ok_or_else(|| {
                        PipegenError::invalid_spec(
                            format!(
                                "Scatter buffer with id {} has replica {} outside the id space",
                                buffer.id, i
                            ),
                            buffer.location(),
                        )
                    })?;
                registry
                    .scatter_inputs
                    .insert(key, PipeInput::new(buffer.id, offset));
                registry.register(key, buffer.id, graph)?;
            }
        }

        for buffer in graph.buffers() {
            registry.register(buffer.id, buffer.id, graph)?;
        }

        Ok(registry)
    }

    fn register(&mut self, key: NodeId, buffer_id: NodeId, graph: &PipeGraph) -> PipegenResult<()> {
        if self.buffers_per_id.insert(key, buffer_id).is_some() {
            return Err(PipegenError::invalid_spec(
                format!("Buffer with id {} already exists", key),
                graph.buffer(buffer_id).and_then(|b| b.location()),
            ));
        }
        Ok(())
    }

    fn resolve(&self, key: NodeId) -> Option<NodeId> {
        self.buffers_per_id.get(&key).copied()
    }

    /// Read of `key`, carrying the replica offset for scatter keys
    fn input_for(&self, key: NodeId, buffer_id: NodeId) -> PipeInput {
        self.scatter_inputs
            .get(&key)
            .copied()
            .unwrap_or_else(|| PipeInput::from_buffer(buffer_id))
    }
}

/// Turns parsed nodes into a validated, repaired pipe graph
pub struct PipeGraphCreator {
    config: PipegenConfig,
}

impl PipeGraphCreator {
    pub fn new(config: PipegenConfig) -> Self {
        Self { config }
    }

    pub fn create_from_file(&self, path: impl AsRef<Path>) -> PipegenResult<PipeGraph> {
        self.create(parse_file(path)?)
    }

    pub fn create_from_str(&self, source: &str) -> PipegenResult<PipeGraph> {
        self.create(PipeGraphParser::new(source).parse_graph()?)
    }

    /// Wires and repairs a graph of freshly parsed nodes
    #[instrument(skip_all, fields(buffers = graph.buffers().len(), pipes = graph.pipes().len()))]
    pub fn create(&self, mut graph: PipeGraph) -> PipegenResult<PipeGraph> {
        let registry = BufferRegistry::build(&graph)?;
        connect_nodes(&mut graph, &registry)?;

        for handler in self.handlers() {
            let edit = handler.handle(&mut graph)?;
            debug!(handler = handler.name(), changes = !edit.is_empty(), "handler finished");
            graph.apply(edit)?;
        }

        graph.validate_edges()?;
        info!(
            buffers = graph.buffers().len(),
            pipes = graph.pipes().len(),
            "pipe graph created"
        );
        Ok(graph)
    }

    /// Repair passes in the order they must run
    pub fn handlers(&self) -> Vec<Box<dyn GraphHandler>> {
        let mut handlers: Vec<Box<dyn GraphHandler>> = vec![
            Box::new(EmbeddingIndexHandler),
            Box::new(IntermediateBufferHandler),
            Box::new(E2eQueueHandler),
        ];
        if self.config.post_tm_optimization {
            handlers.push(Box::new(PostTmPipeHandler));
        }
        handlers
    }
}

impl Default for PipeGraphCreator {
    fn default() -> Self {
        Self::new(PipegenConfig::default())
    }
}

fn connect_nodes(graph: &mut PipeGraph, registry: &BufferRegistry) -> PipegenResult<()> {
    let pipe_ids: Vec<NodeId> = graph.pipes().iter().map(|p| p.id).collect();

    for pipe_id in pipe_ids {
        let pipe = graph.expect_pipe(pipe_id)?;
        let input_ids = pipe.input_buffer_ids.clone();
        let padding_ids = pipe.output_padding_buffer_ids.clone();
        let output_ids = pipe.output_buffer_ids.clone();
        let step = pipe.consumer_repeat.max(1) as usize;
        let locations = pipe.mcast_core_locations.clone();

        for key in input_ids {
            let buffer_id = registry.resolve(key).ok_or_else(|| {
                dangling(pipe_id, "input", key, locations.first().copied())
            })?;
            graph.connect_input(pipe_id, registry.input_for(key, buffer_id))?;
        }

        // Padding needs the message count, so inputs are wired first
        for (raw_index, &key) in padding_ids.iter().enumerate().step_by(step) {
            if key == NO_OUTPUT_PADDING_BUFFER_ID {
                continue;
            }
            let buffer_id = registry.resolve(key).ok_or_else(|| {
                dangling(pipe_id, "output padding", key, location_at(&locations, raw_index))
            })?;
            graph.connect_output_padding(pipe_id, buffer_id, raw_index / step)?;
        }

        for (raw_index, keys) in output_ids.iter().enumerate().step_by(step) {
            for &key in keys {
                let buffer_id = registry.resolve(key).ok_or_else(|| {
                    dangling(pipe_id, "output", key, location_at(&locations, raw_index))
                })?;
                graph.connect_output(pipe_id, buffer_id, raw_index / step)?;
            }
        }
    }

    Ok(())
}

fn location_at(locations: &[CoreLocation], raw_index: usize) -> Option<CoreLocation> {
    locations.get(raw_index).or_else(|| locations.first()).copied()
}

fn dangling(
    pipe_id: NodeId,
    role: &str,
    key: NodeId,
    location: Option<CoreLocation>,
) -> PipegenError {
    PipegenError::invalid_spec(
        format!(
            "Pipe with id {} has inexistent {} buffer with id {}",
            pipe_id, role, key
        ),
        location,
    )
}
