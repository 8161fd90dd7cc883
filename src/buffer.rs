//! Buffer nodes of the pipe graph
//!
//! A buffer is storage on a core (L1) or in DRAM. It is produced by at most one
//! pipe and may be read by any number of pipes. Edges are stored as node ids
//! and resolved through the owning [`PipeGraph`](crate::graph::PipeGraph).

use std::collections::BTreeSet;

use serde::Serialize;

use crate::device::{CoreLocation, OperandKind};
use crate::graph::NodeId;

/// Buffer kind as declared by the producer of the pipegen text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BufferType {
    DramProlog,
    DramEpilog,
    GradientOp,
    Intermediate,
    Packer,
    Unpacker,
    DramIo,
    Relay,
    EthernetRelay,
    PrologRelay,
    #[default]
    Unknown,
}

impl BufferType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "dram_prolog" => BufferType::DramProlog,
            "dram_epilog" => BufferType::DramEpilog,
            "gradient_op" => BufferType::GradientOp,
            "intermediate" => BufferType::Intermediate,
            "packer" => BufferType::Packer,
            "unpacker" => BufferType::Unpacker,
            "dram_io" => BufferType::DramIo,
            "relay" => BufferType::Relay,
            "ethernet_relay" => BufferType::EthernetRelay,
            "prolog_relay" => BufferType::PrologRelay,
            _ => BufferType::Unknown,
        }
    }
}

/// Whether a DRAM prefetch happens before or after the transform-matrix stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PrefetchType {
    #[default]
    PreTm,
    PostTm,
}

impl PrefetchType {
    pub fn from_raw(value: u64) -> Option<Self> {
        match value {
            0 => Some(PrefetchType::PreTm),
            1 => Some(PrefetchType::PostTm),
            _ => None,
        }
    }
}

/// DRAM flags exactly as parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DramFlags {
    pub io: bool,
    pub io_remote: bool,
    pub buf: bool,
    pub buf_streaming: bool,
    pub write_buf: bool,
    pub ram: bool,
}

/// Mutually exclusive DRAM role derived from [`DramFlags`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DramRole {
    /// Buffer lives in L1 only
    None,
    /// DRAM queue or RAM read/written through a dram_io pipe
    Queue { remote: bool, ram: bool },
    /// Prefetched from DRAM into L1 before the epoch runs
    Prefetch(PrefetchType),
    /// Streamed from DRAM while the epoch runs
    Streaming,
    /// Written back to DRAM by the kernel
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EmbeddingInfo {
    pub is_table: bool,
    pub table_core_c_div: u32,
    pub table_row_size_per_core: u32,
    pub is_index: bool,
    pub indices_per_tile: u32,
    pub indices_per_input: u32,
}

/// Layout of data written out untilized by a packer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UntilizeLayout {
    pub enabled: bool,
    pub full_r_dim: u32,
    pub full_c_dim: u32,
    pub r_dim: u32,
    pub c_dim: u32,
    pub z_dim: u32,
    pub type_0_zdim: u32,
    pub type_1_zdim: u32,
    pub tile_dim_r: u32,
    pub tile_dim_c: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TilizeLayout {
    pub hw_tilize: bool,
    pub mblock_n_loop_num_rows: u32,
    pub row_col_offset: u32,
}

/// Micro-block and macro-block shape of the kernel operand
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BlockShape {
    pub ublock_rt: u32,
    pub ublock_ct: u32,
    pub mblock_m: u32,
    pub mblock_n: u32,
    pub mblock_k: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PgBuffer {
    pub id: NodeId,
    pub buffer_type: BufferType,
    pub op_name: String,
    /// `None` when the block gives no `id`; such buffers have no operand role
    pub operand_id: Option<u32>,
    pub logical_location: CoreLocation,

    pub num_epoch_tiles: u32,
    pub size_tiles: u32,
    pub tile_size: u32,
    pub num_tiles_per_input: u32,
    pub scatter_gather_num_tiles: u32,
    pub num_queue_slots: u32,
    pub replicate: u32,
    pub tile_clear_granularity: u32,
    pub producer_epoch_id: u32,
    pub overlay_blob_size: u32,
    pub shape: BlockShape,

    pub dram: DramFlags,
    pub prefetch_type: PrefetchType,
    pub dram_channel: u32,
    pub dram_sub_channel: u32,
    pub dram_address: u64,
    pub dram_prefetch_incoming_noc_id: u32,
    pub ethernet_channel: Option<u32>,
    pub use_ethernet_fw_stream: bool,

    pub is_scatter: bool,
    pub is_padding: bool,
    pub is_post_tm_relay: bool,

    pub embedding: EmbeddingInfo,
    pub untilize: UntilizeLayout,
    pub tilize: TilizeLayout,

    /// Buffer whose L1 space this buffer reuses; not an ownership edge
    pub shared_space_buffer_id: Option<NodeId>,
    pub input_pipe: Option<NodeId>,
    pub output_pipes: BTreeSet<NodeId>,
}

impl PgBuffer {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Copy of this buffer under a new id with every edge dropped
    pub fn clone_detached(&self, id: NodeId) -> Self {
        Self {
            id,
            input_pipe: None,
            output_pipes: BTreeSet::new(),
            ..self.clone()
        }
    }

    pub fn operand_kind(&self) -> OperandKind {
        self.operand_id
            .map_or(OperandKind::Unknown, OperandKind::from_operand_id)
    }

    /// Core the buffer sits on, if one was given
    pub fn location(&self) -> Option<CoreLocation> {
        Some(self.logical_location).filter(CoreLocation::is_set)
    }

    pub fn is_input_operand(&self) -> bool {
        self.operand_kind() == OperandKind::Input
    }

    pub fn is_output_operand(&self) -> bool {
        self.operand_kind() == OperandKind::Output
    }

    pub fn is_intermediate_operand(&self) -> bool {
        self.operand_kind() == OperandKind::Intermediate
    }

    pub fn is_relay(&self) -> bool {
        self.operand_kind() == OperandKind::Relay
    }

    pub fn is_packer(&self) -> bool {
        self.buffer_type == BufferType::Packer
    }

    pub fn is_unpacker(&self) -> bool {
        self.buffer_type == BufferType::Unpacker
    }

    pub fn dram_role(&self) -> DramRole {
        let flags = &self.dram;
        if flags.io
            && self.num_queue_slots > 0
            && !(flags.buf || flags.buf_streaming || flags.write_buf)
        {
            DramRole::Queue {
                remote: flags.io_remote,
                ram: flags.ram,
            }
        } else if flags.buf && !flags.buf_streaming && !self.is_intermediate_operand() {
            DramRole::Prefetch(self.prefetch_type)
        } else if flags.buf_streaming {
            DramRole::Streaming
        } else if flags.write_buf {
            DramRole::Write
        } else {
            DramRole::None
        }
    }

    pub fn is_dram(&self) -> bool {
        matches!(self.dram_role(), DramRole::Queue { .. })
    }

    pub fn is_dram_prefetch(&self) -> bool {
        matches!(self.dram_role(), DramRole::Prefetch(_))
    }

    pub fn is_dram_prefetch_pre_tm(&self) -> bool {
        self.dram_role() == DramRole::Prefetch(PrefetchType::PreTm)
    }

    pub fn is_dram_prefetch_post_tm(&self) -> bool {
        self.dram_role() == DramRole::Prefetch(PrefetchType::PostTm)
    }

    /// Untilized data is moved raw and never read as a tiled DRAM input
    pub fn is_dram_input(&self) -> bool {
        (self.is_dram() || self.is_dram_prefetch()) && !self.untilize.enabled
    }

    pub fn is_non_prefetch_pre_tm_dram_input(&self) -> bool {
        self.is_dram_input() && !self.is_dram_prefetch_pre_tm()
    }

    pub fn is_dram_output(&self) -> bool {
        self.is_dram()
    }

    pub fn is_scatter_prefetch_post_tm(&self) -> bool {
        self.is_scatter && self.is_dram_prefetch_post_tm()
    }

    pub fn is_located_in_l1(&self) -> bool {
        !self.is_non_prefetch_pre_tm_dram_input() && !self.is_dram_output()
    }

    pub fn is_end_to_end_queue(&self) -> bool {
        self.is_dram() && self.input_pipe.is_some() && !self.output_pipes.is_empty()
    }

    pub fn is_embedding_table(&self) -> bool {
        self.embedding.is_table
    }

    pub fn is_embedding_index(&self) -> bool {
        self.embedding.is_index
    }

    pub fn shares_l1_space(&self) -> bool {
        self.shared_space_buffer_id.is_some()
    }

    pub fn has_no_input(&self) -> bool {
        self.input_pipe.is_none()
    }

    pub fn has_no_outputs(&self) -> bool {
        self.output_pipes.is_empty()
    }

    pub fn has_single_output(&self) -> bool {
        self.output_pipes.len() == 1
    }

    pub fn single_output_pipe(&self) -> Option<NodeId> {
        if self.has_single_output() {
            self.output_pipes.iter().next().copied()
        } else {
            None
        }
    }

    pub fn is_forked(&self) -> bool {
        self.output_pipes.len() > 1
    }

    pub fn add_output_pipe(&mut self, pipe_id: NodeId) {
        self.output_pipes.insert(pipe_id);
    }

    pub fn remove_output_pipe(&mut self, pipe_id: NodeId) -> bool {
        self.output_pipes.remove(&pipe_id)
    }

    /// Swap `old` for `new` in the output set; no-op if `old` is absent
    pub fn replace_output_pipe(&mut self, old: NodeId, new: NodeId) {
        if self.output_pipes.remove(&old) {
            self.output_pipes.insert(new);
        }
    }
}
