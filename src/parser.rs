//! Parser for pipegen text
//!
//! The text is a sequence of node blocks:
//!
//! ```text
//! buffer_100:
//!   md_op_name: input0
//!   buffer_type: dram_io
//!   uniqid: 100
//!   core_coordinates: [0, 1]
//! --
//! pipe_200:
//!   id: 200
//!   input_list: [100]
//!   output_list: [[300], [301]]
//! ```
//!
//! Each block becomes one disconnected node. Edges stay as raw id lists on the
//! pipes until [`PipeGraphCreator`](crate::creator::PipeGraphCreator) resolves
//! them.

use std::path::Path;

use tracing::{debug, trace};

use crate::buffer::{BufferType, PgBuffer, PrefetchType};
use crate::device::CoreLocation;
use crate::error::{PipegenError, PipegenResult};
use crate::graph::{NodeId, PipeGraph};
use crate::lexer::{Lexer, Token};
use crate::pipe::PgPipe;

const BUFFER_PREFIX: &str = "buffer_";
const PIPE_PREFIX: &str = "pipe_";
const DELIMITER_PREFIX: &str = "--";
const COMMENT_PREFIX: &str = "#";
const GRAPH_NAME_PREFIX: &str = "graph_name";

/// Value on the right-hand side of `name: value`
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Scalar(String),
    List(Vec<String>),
    Nested(Vec<Vec<String>>),
}

impl AttributeValue {
    /// Parses a raw attribute value.
    ///
    /// An empty list yields a single empty element, so `[]` becomes `[""]`.
    pub fn parse(text: &str) -> PipegenResult<Self> {
        let text = text.trim();
        if !text.starts_with('[') {
            return Ok(AttributeValue::Scalar(text.to_string()));
        }

        let mut lexer = Lexer::new(text);
        expect(&mut lexer, Token::LBracket, text)?;
        let value = if lexer.check(&Token::LBracket) {
            let mut rows = Vec::new();
            loop {
                expect(&mut lexer, Token::LBracket, text)?;
                rows.push(parse_list_elements(&mut lexer, text)?);
                match lexer.next() {
                    Some(Ok(Token::Comma)) => continue,
                    Some(Ok(Token::RBracket)) => break,
                    _ => return Err(malformed_list(text)),
                }
            }
            AttributeValue::Nested(rows)
        } else {
            AttributeValue::List(parse_list_elements(&mut lexer, text)?)
        };

        if lexer.next().is_some() {
            return Err(malformed_list(text));
        }
        Ok(value)
    }

    pub fn as_list(&self) -> PipegenResult<&[String]> {
        match self {
            AttributeValue::List(items) => Ok(items),
            AttributeValue::Scalar(s) => Err(PipegenError::parse(format!(
                "Found improperly formatted list attribute '{}'",
                s
            ))),
            AttributeValue::Nested(_) => Err(PipegenError::parse(
                "Expected a flat list, found a two-dimensional list",
            )),
        }
    }

    /// Flat lists are promoted to a single row
    pub fn to_rows(&self) -> PipegenResult<Vec<Vec<String>>> {
        match self {
            AttributeValue::Nested(rows) => Ok(rows.clone()),
            AttributeValue::List(items) => Ok(vec![items.clone()]),
            AttributeValue::Scalar(s) => Err(PipegenError::parse(format!(
                "Found improperly formatted list attribute '{}'",
                s
            ))),
        }
    }
}

fn expect(lexer: &mut Lexer<'_>, expected: Token, text: &str) -> PipegenResult<()> {
    match lexer.next() {
        Some(Ok(tok)) if tok == expected => Ok(()),
        _ => Err(malformed_list(text)),
    }
}

/// Elements up to and including the closing bracket
fn parse_list_elements(lexer: &mut Lexer<'_>, text: &str) -> PipegenResult<Vec<String>> {
    let mut elements = Vec::new();
    loop {
        let element = match lexer.peek() {
            Some(Ok(Token::Word(_))) => match lexer.next() {
                Some(Ok(Token::Word(word))) => word,
                _ => return Err(malformed_list(text)),
            },
            _ => String::new(),
        };
        elements.push(element);

        match lexer.next() {
            Some(Ok(Token::Comma)) => continue,
            Some(Ok(Token::RBracket)) => return Ok(elements),
            _ => return Err(malformed_list(text)),
        }
    }
}

fn malformed_list(text: &str) -> PipegenError {
    PipegenError::parse(format!("Found improperly formatted list attribute '{}'", text))
}

/// Parses an unsigned integer, decimal or `0x` hex
pub fn parse_u64(text: &str) -> PipegenResult<u64> {
    let text = text.trim();
    let digits = text.strip_prefix('+').unwrap_or(text);
    let parsed = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => digits.parse::<u64>(),
    };
    parsed.map_err(|_| PipegenError::parse(format!("Found invalid unsigned integer value '{}'", text)))
}

/// Parses a signed integer, decimal or `0x` hex
pub fn parse_i64(text: &str) -> PipegenResult<i64> {
    let text = text.trim();
    let (negative, magnitude) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = parse_u64(magnitude)
        .ok()
        .and_then(|v| i64::try_from(v).ok())
        .ok_or_else(|| PipegenError::parse(format!("Found invalid integer value '{}'", text)))?;
    Ok(if negative { -value } else { value })
}

fn parse_u32(text: &str) -> PipegenResult<u32> {
    let value = parse_u64(text)?;
    u32::try_from(value)
        .map_err(|_| PipegenError::parse(format!("Value '{}' does not fit in 32 bits", text.trim())))
}

fn parse_flag(text: &str) -> PipegenResult<bool> {
    Ok(parse_i64(text)? != 0)
}

/// Channel attributes use a negative value for "no channel"
fn parse_channel(text: &str) -> PipegenResult<Option<u32>> {
    let value = parse_i64(text)?;
    if value < 0 {
        Ok(None)
    } else {
        u32::try_from(value)
            .map(Some)
            .map_err(|_| PipegenError::parse(format!("Channel '{}' is out of range", text)))
    }
}

fn parse_node_ids(items: &[String]) -> PipegenResult<Vec<NodeId>> {
    items
        .iter()
        .filter(|item| !item.is_empty())
        .map(|item| parse_u64(item).map(NodeId))
        .collect()
}

fn parse_ints(items: &[String]) -> PipegenResult<Vec<i64>> {
    items
        .iter()
        .filter(|item| !item.is_empty())
        .map(|item| parse_i64(item))
        .collect()
}

fn to_u32(value: i64, what: &str) -> PipegenResult<u32> {
    u32::try_from(value).map_err(|_| PipegenError::parse(format!("{} {} is invalid", what, value)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Buffer,
    Pipe,
}

/// `buffer_<uint>:` or `pipe_<uint>:` at the start of an unindented line
fn parse_header(line: &str) -> Option<(NodeKind, u64)> {
    let (kind, rest) = if let Some(rest) = line.strip_prefix(BUFFER_PREFIX) {
        (NodeKind::Buffer, rest)
    } else if let Some(rest) = line.strip_prefix(PIPE_PREFIX) {
        (NodeKind::Pipe, rest)
    } else {
        return None;
    };

    let digits = rest.trim_end().strip_suffix(':')?;
    digits.trim().parse::<u64>().ok().map(|id| (kind, id))
}

fn looks_like_header(line: &str) -> bool {
    line.starts_with(BUFFER_PREFIX) || line.starts_with(PIPE_PREFIX)
}

struct Block<'source> {
    kind: NodeKind,
    header_id: u64,
    attributes: Vec<(usize, &'source str)>,
}

/// Parser for pipegen text
pub struct PipeGraphParser<'source> {
    source: &'source str,
}

impl<'source> PipeGraphParser<'source> {
    pub fn new(source: &'source str) -> Self {
        Self { source }
    }

    /// Parse every block into a graph of disconnected nodes
    pub fn parse_graph(&self) -> PipegenResult<PipeGraph> {
        let mut graph = PipeGraph::new();
        let mut block: Option<Block<'source>> = None;

        for (index, line) in self.source.lines().enumerate() {
            let line_no = index + 1;

            if line.starts_with(DELIMITER_PREFIX) {
                if let Some(done) = block.take() {
                    self.flush(done, &mut graph)?;
                }
                continue;
            }

            if let Some((kind, header_id)) = parse_header(line) {
                if let Some(done) = block.take() {
                    self.flush(done, &mut graph)?;
                }
                block = Some(Block {
                    kind,
                    header_id,
                    attributes: Vec::new(),
                });
                continue;
            }

            let trimmed = line.trim();
            match block.as_mut() {
                None => {
                    if trimmed.is_empty()
                        || line.starts_with(COMMENT_PREFIX)
                        || line.starts_with(GRAPH_NAME_PREFIX)
                    {
                        continue;
                    }
                    let message = if looks_like_header(line) {
                        "Malformed node header"
                    } else {
                        "Found invalid line"
                    };
                    return Err(at_line(PipegenError::parse(message), line_no, line));
                }
                Some(current) => {
                    if trimmed.is_empty() || trimmed.starts_with(COMMENT_PREFIX) {
                        continue;
                    }
                    current.attributes.push((line_no, line));
                }
            }
        }

        if let Some(done) = block.take() {
            self.flush(done, &mut graph)?;
        }

        debug!(
            buffers = graph.buffers().len(),
            pipes = graph.pipes().len(),
            "parsed pipe graph"
        );
        Ok(graph)
    }

    fn flush(&self, block: Block<'source>, graph: &mut PipeGraph) -> PipegenResult<()> {
        match block.kind {
            NodeKind::Buffer => {
                let mut buffer = PgBuffer::new(NodeId(block.header_id));
                for &(line_no, line) in &block.attributes {
                    let (name, value) = split_attribute(line).map_err(|e| at_line(e, line_no, line))?;
                    apply_buffer_attribute(&mut buffer, name, value)
                        .map_err(|e| at_line(e, line_no, line))?;
                }
                graph.add_buffer(buffer)
            }
            NodeKind::Pipe => {
                let mut pipe = PgPipe::new(NodeId(block.header_id));
                for &(line_no, line) in &block.attributes {
                    let (name, value) = split_attribute(line).map_err(|e| at_line(e, line_no, line))?;
                    apply_pipe_attribute(&mut pipe, name, value)
                        .map_err(|e| at_line(e, line_no, line))?;
                }
                graph.add_pipe(pipe)
            }
        }
    }
}

/// Parse a pipegen file from disk
pub fn parse_file(path: impl AsRef<Path>) -> PipegenResult<PipeGraph> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| PipegenError::io(path, e))?;
    PipeGraphParser::new(&source).parse_graph()
}

fn split_attribute(line: &str) -> PipegenResult<(&str, &str)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| PipegenError::parse("Missing ':' in attribute line"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(PipegenError::parse("Missing attribute name"));
    }
    Ok((name, value.trim()))
}

fn at_line(err: PipegenError, line_no: usize, line: &str) -> PipegenError {
    match err {
        PipegenError::Parse { message } => {
            PipegenError::parse(format!("{} (line {}: '{}')", message, line_no, line.trim()))
        }
        other => other,
    }
}

fn apply_buffer_attribute(buffer: &mut PgBuffer, name: &str, value: &str) -> PipegenResult<()> {
    match name {
        "md_op_name" => buffer.op_name = value.to_string(),
        "buffer_type" => buffer.buffer_type = BufferType::from_name(value),
        "uniqid" => buffer.id = NodeId(parse_u64(value)?),
        "id" => {
            let operand = parse_i64(value)?;
            if operand < 0 {
                return Err(PipegenError::parse("Operand ID is invalid"));
            }
            buffer.operand_id = Some(to_u32(operand, "Operand ID")?);
        }
        "epoch_tiles" => buffer.num_epoch_tiles = parse_u32(value)?,
        "size_tiles" => buffer.size_tiles = parse_u32(value)?,
        "tile_size" => buffer.tile_size = parse_u32(value)?,
        "tiles_per_input" => buffer.num_tiles_per_input = parse_u32(value)?,
        "scatter_gather_num_tiles" => buffer.scatter_gather_num_tiles = parse_u32(value)?,
        "q_slots" => buffer.num_queue_slots = parse_u32(value)?,
        "replicate" => buffer.replicate = parse_u32(value)?,
        "tile_clear_granularity" => buffer.tile_clear_granularity = parse_u32(value)?,
        "producer_epoch_id" => buffer.producer_epoch_id = parse_u32(value)?,
        "overlay_blob_size" => buffer.overlay_blob_size = parse_u32(value)?,
        "buffer_space_shared" => buffer.shared_space_buffer_id = Some(NodeId(parse_u64(value)?)),

        "dram_io_flag" => buffer.dram.io = parse_flag(value)?,
        "dram_io_flag_is_remote" => buffer.dram.io_remote = parse_flag(value)?,
        "dram_buf_flag" => buffer.dram.buf = parse_flag(value)?,
        "dram_buf_streaming" => buffer.dram.buf_streaming = parse_flag(value)?,
        "write_dram_buf_flag" => buffer.dram.write_buf = parse_flag(value)?,
        "dram_ram_flag" => buffer.dram.ram = parse_flag(value)?,
        "dram_chan" => buffer.dram_channel = parse_u32(value)?,
        "dram_sub_chan" => buffer.dram_sub_channel = parse_u32(value)?,
        "dram_addr" => buffer.dram_address = parse_u64(value)?,
        "dram_prefetch_incoming_noc_id" => buffer.dram_prefetch_incoming_noc_id = parse_u32(value)?,
        "prefetch_type" => {
            let raw = parse_u64(value)?;
            buffer.prefetch_type = PrefetchType::from_raw(raw)
                .ok_or_else(|| PipegenError::parse(format!("Unknown prefetch type {}", raw)))?;
        }
        "ethernet_chan" => buffer.ethernet_channel = parse_channel(value)?,
        "use_ethernet_fw_stream" => buffer.use_ethernet_fw_stream = parse_flag(value)?,

        "is_scatter" => buffer.is_scatter = parse_flag(value)?,
        "is_padding" => buffer.is_padding = parse_flag(value)?,
        "is_post_tm_relay_buf" => buffer.is_post_tm_relay = parse_flag(value)?,

        "chip_id" => {
            let chips = parse_ints(AttributeValue::parse(value)?.as_list()?)?;
            if chips.len() != 1 {
                return Err(PipegenError::parse("Chip Id is invalid"));
            }
            buffer.logical_location.chip = to_u32(chips[0], "Chip Id")?;
        }
        "core_coordinates" => {
            let coords = parse_ints(AttributeValue::parse(value)?.as_list()?)?;
            if coords.len() != 2 {
                return Err(PipegenError::parse("Buffer core coordinates are invalid"));
            }
            buffer.logical_location.row = to_u32(coords[0], "Core row")?;
            buffer.logical_location.col = to_u32(coords[1], "Core column")?;
        }

        "ublock_rt" => buffer.shape.ublock_rt = parse_u32(value)?,
        "ublock_ct" => buffer.shape.ublock_ct = parse_u32(value)?,
        "mblock_m" => buffer.shape.mblock_m = parse_u32(value)?,
        "mblock_n" => buffer.shape.mblock_n = parse_u32(value)?,
        "mblock_k" => buffer.shape.mblock_k = parse_u32(value)?,

        "untilized_output" => buffer.untilize.enabled = parse_flag(value)?,
        "untilized_output_full_r_dim" => buffer.untilize.full_r_dim = parse_u32(value)?,
        "untilized_output_full_c_dim" => buffer.untilize.full_c_dim = parse_u32(value)?,
        "untilized_output_r_dim" => buffer.untilize.r_dim = parse_u32(value)?,
        "untilized_output_c_dim" => buffer.untilize.c_dim = parse_u32(value)?,
        "untilized_output_z_dim" => buffer.untilize.z_dim = parse_u32(value)?,
        "untilized_output_type_0_zdim" => buffer.untilize.type_0_zdim = parse_u32(value)?,
        "untilized_output_type_1_zdim" => buffer.untilize.type_1_zdim = parse_u32(value)?,
        "untilized_output_tile_dim_r" => buffer.untilize.tile_dim_r = parse_u32(value)?,
        "untilized_output_tile_dim_c" => buffer.untilize.tile_dim_c = parse_u32(value)?,

        "hw_tilize" => buffer.tilize.hw_tilize = parse_flag(value)?,
        "tilize_mblock_n_loop_num_rows" => buffer.tilize.mblock_n_loop_num_rows = parse_u32(value)?,
        "tilize_row_col_offset" => buffer.tilize.row_col_offset = parse_u32(value)?,

        "embedding_table" => buffer.embedding.is_table = parse_flag(value)?,
        "embedding_table_core_c_div" => buffer.embedding.table_core_c_div = parse_u32(value)?,
        "embedding_table_row_size_per_core" => {
            buffer.embedding.table_row_size_per_core = parse_u32(value)?
        }
        "embedding_index" => buffer.embedding.is_index = parse_flag(value)?,
        "embedding_indices_per_tile" => buffer.embedding.indices_per_tile = parse_u32(value)?,
        "embedding_indices_per_input" => buffer.embedding.indices_per_input = parse_u32(value)?,

        other => trace!(attribute = other, buffer = %buffer.id, "ignoring unknown buffer attribute"),
    }
    Ok(())
}

fn apply_pipe_attribute(pipe: &mut PgPipe, name: &str, value: &str) -> PipegenResult<()> {
    match name {
        "id" => pipe.id = NodeId(parse_u64(value)?),
        "pipe_periodic_repeat" => pipe.periodic_repeat = parse_u32(value)?.max(1),
        "pipe_consumer_repeat" => pipe.consumer_repeat = parse_u32(value)?.max(1),
        "ethernet_chan" => pipe.ethernet_channel = parse_channel(value)?,
        "incoming_noc_id" => pipe.incoming_noc_id = parse_u32(value)?,
        "incoming_vc" => pipe.incoming_vc = parse_u32(value)?,
        "outgoing_noc_id" => pipe.outgoing_noc_id = parse_u32(value)?,
        "outgoing_vc" => pipe.outgoing_vc = parse_u32(value)?,
        "mmio_pipe" => pipe.is_mmio_pipe = parse_flag(value)?,
        "mmio_pipe_downstream" => pipe.is_mmio_pipe_downstream = parse_flag(value)?,
        "ethernet_pipe" => pipe.is_ethernet_pipe = parse_flag(value)?,
        "dis_gather_opt" => pipe.gather_optimization_disabled = parse_flag(value)?,
        "direct_mcast" => pipe.is_direct_mcast = parse_flag(value)?,
        "op_input_dram_io_buf_size_tiles" => pipe.op_input_dram_io_buf_size_tiles = parse_u64(value)?,
        "dram_pipe_total_readers" => {
            pipe.dram_pipe_total_readers = parse_ints(AttributeValue::parse(value)?.as_list()?)?
        }
        "dram_pipe_reader_index" => {
            pipe.dram_pipe_reader_index = parse_ints(AttributeValue::parse(value)?.as_list()?)?
        }
        "mcast_core_rc" => {
            for row in AttributeValue::parse(value)?.to_rows()? {
                let coords = parse_ints(&row)?;
                if coords.len() != 3 {
                    return Err(PipegenError::parse(
                        "Pipe multicast core location coordinates are invalid",
                    ));
                }
                pipe.mcast_core_locations.push(CoreLocation::new(
                    to_u32(coords[0], "Chip Id")?,
                    to_u32(coords[1], "Core row")?,
                    to_u32(coords[2], "Core column")?,
                ));
            }
        }
        "input_list" => {
            pipe.input_buffer_ids = parse_node_ids(AttributeValue::parse(value)?.as_list()?)?
        }
        "output_list" => {
            pipe.output_buffer_ids = AttributeValue::parse(value)?
                .to_rows()?
                .iter()
                .map(|row| parse_node_ids(row))
                .collect::<PipegenResult<_>>()?
        }
        "output_padding_list" => {
            pipe.output_padding_buffer_ids =
                parse_node_ids(AttributeValue::parse(value)?.as_list()?)?
        }
        other => trace!(attribute = other, pipe = %pipe.id, "ignoring unknown pipe attribute"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn parse(source: &str) -> PipegenResult<PipeGraph> {
        PipeGraphParser::new(source).parse_graph()
    }

    #[test]
    fn test_single_buffer_block() {
        let graph = parse(
            "buffer_100:\n  buffer_type: dram_io\n  uniqid: 100\n  epoch_tiles: 4\n--\n",
        )
        .unwrap();

        assert_eq!(graph.buffers().len(), 1);
        assert!(graph.pipes().is_empty());
        let buffer = &graph.buffers()[0];
        assert_eq!(buffer.id, NodeId(100));
        assert_eq!(buffer.buffer_type, BufferType::DramIo);
        assert_eq!(buffer.num_epoch_tiles, 4);
    }

    #[test]
    fn test_comments_and_graph_name_are_skipped() {
        let source = "# generated\ngraph_name: test\n\n--\nbuffer_1:\n  uniqid: 1\n";
        let graph = parse(source).unwrap();
        assert_eq!(graph.buffers().len(), 1);
    }

    #[test]
    fn test_invalid_line_outside_block() {
        let err = parse("garbage here\n").unwrap_err();
        assert!(matches!(err, PipegenError::Parse { .. }));
        assert!(err.to_string().contains("garbage here"));
    }

    #[test]
    fn test_missing_colon_in_block() {
        let err = parse("buffer_1:\n  uniqid 1\n").unwrap_err();
        assert!(err.to_string().contains("Missing ':'"));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_non_numeric_value() {
        let err = parse("buffer_1:\n  size_tiles: many\n").unwrap_err();
        assert!(err.to_string().contains("many"));
    }

    #[test]
    fn test_negative_operand_id() {
        let err = parse("buffer_1:\n  id: -1\n").unwrap_err();
        assert!(err.to_string().contains("Operand ID is invalid"));
    }

    #[test]
    fn test_missing_operand_and_location_stay_unset() {
        let source = "\
buffer_1:
  uniqid: 1
--
buffer_2:
  uniqid: 2
  id: 0
  chip_id: [0]
  core_coordinates: [0, 0]
--
";
        let graph = parse(source).unwrap();
        let bare = graph.buffer(NodeId(1)).unwrap();
        assert_eq!(bare.operand_id, None);
        assert!(!bare.logical_location.is_set());

        let placed = graph.buffer(NodeId(2)).unwrap();
        assert_eq!(placed.operand_id, Some(0));
        assert_eq!(placed.logical_location, CoreLocation::new(0, 0, 0));
    }

    #[test]
    fn test_hex_and_locations() {
        let source = "\
buffer_7:
  uniqid: 0x10
  dram_addr: 0x3000
  chip_id: [1]
  core_coordinates: [2, 3]
  buffer_space_shared: 9
--
";
        let graph = parse(source).unwrap();
        let buffer = &graph.buffers()[0];
        assert_eq!(buffer.id, NodeId(16));
        assert_eq!(buffer.dram_address, 0x3000);
        assert_eq!(buffer.logical_location, CoreLocation::new(1, 2, 3));
        assert_eq!(buffer.shared_space_buffer_id, Some(NodeId(9)));
    }

    #[test]
    fn test_pipe_block() {
        let source = "\
pipe_200:
  id: 200
  pipe_periodic_repeat: 0
  pipe_consumer_repeat: 2
  mcast_core_rc: [[0, 1, 2], [0, 1, 3]]
  input_list: [100, 0x65]
  output_list: [[300], [301, 302]]
  output_padding_list: [0, 400]
  dram_pipe_total_readers: [2]
  ethernet_chan: -1
--
";
        let graph = parse(source).unwrap();
        let pipe = &graph.pipes()[0];
        assert_eq!(pipe.id, NodeId(200));
        assert_eq!(pipe.periodic_repeat, 1);
        assert_eq!(pipe.consumer_repeat, 2);
        assert_eq!(
            pipe.mcast_core_locations,
            vec![CoreLocation::new(0, 1, 2), CoreLocation::new(0, 1, 3)]
        );
        assert_eq!(pipe.input_buffer_ids, vec![NodeId(100), NodeId(101)]);
        assert_eq!(
            pipe.output_buffer_ids,
            vec![vec![NodeId(300)], vec![NodeId(301), NodeId(302)]]
        );
        assert_eq!(pipe.output_padding_buffer_ids, vec![NodeId(0), NodeId(400)]);
        assert_eq!(pipe.dram_pipe_total_readers, vec![2]);
        assert_eq!(pipe.ethernet_channel, None);
        // Edges are not resolved by the parser
        assert!(pipe.inputs.is_empty());
        assert!(pipe.output_buffers.is_empty());
    }

    #[test]
    fn test_flat_output_list_is_one_scatter_index() {
        let graph = parse("pipe_5:\n  output_list: [1, 2]\n").unwrap();
        assert_eq!(
            graph.pipes()[0].output_buffer_ids,
            vec![vec![NodeId(1), NodeId(2)]]
        );
    }

    #[test]
    fn test_list_values() {
        assert_eq!(
            AttributeValue::parse("[]").unwrap(),
            AttributeValue::List(vec![String::new()])
        );
        assert_eq!(
            AttributeValue::parse("[ a ,b]").unwrap(),
            AttributeValue::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            AttributeValue::parse("[[1,2],[3]]").unwrap(),
            AttributeValue::Nested(vec![vec!["1".into(), "2".into()], vec!["3".into()]])
        );
        assert_eq!(
            AttributeValue::parse("dram_io").unwrap(),
            AttributeValue::Scalar("dram_io".into())
        );
    }

    #[test]
    fn test_unbalanced_lists_are_rejected() {
        for bad in ["[1, 2", "[[1, 2]", "[1, 2]]", "[1 2]", "[[1],"] {
            assert!(AttributeValue::parse(bad).is_err(), "accepted {}", bad);
        }
        let err = parse("pipe_1:\n  input_list: [1, 2\n").unwrap_err();
        assert!(err.to_string().contains("[1, 2"));
    }

    #[test]
    fn test_empty_id_list_has_no_ids() {
        let graph = parse("pipe_1:\n  input_list: []\n").unwrap();
        assert!(graph.pipes()[0].input_buffer_ids.is_empty());
    }

    #[test]
    fn test_integers() {
        assert_eq!(parse_u64("0x1F").unwrap(), 31);
        assert_eq!(parse_u64("42").unwrap(), 42);
        assert_eq!(parse_i64("-7").unwrap(), -7);
        assert_eq!(parse_i64("-0x10").unwrap(), -16);
        assert!(parse_u64("-1").is_err());
        assert!(parse_u64("").is_err());
    }

    #[test]
    fn test_header_without_delimiter_starts_new_block() {
        let graph = parse("buffer_1:\n  uniqid: 1\nbuffer_2:\n  uniqid: 2\n").unwrap();
        assert_eq!(graph.buffers().len(), 2);
    }

    #[test]
    fn test_unindented_attribute_inside_block() {
        let graph = parse("buffer_1:\nbuffer_type: relay\n").unwrap();
        assert_eq!(graph.buffers()[0].buffer_type, BufferType::Relay);
    }

    #[test]
    fn test_indented_attribute_is_not_a_header() {
        let graph = parse("buffer_1:\n  buffer_space_shared: 5\n").unwrap();
        assert_eq!(graph.buffers().len(), 1);
        assert_eq!(graph.buffers()[0].shared_space_buffer_id, Some(NodeId(5)));
    }

    #[test]
    fn test_malformed_header() {
        let err = parse("buffer_x:\n").unwrap_err();
        assert!(err.to_string().contains("Malformed node header"));
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffer_3:\n  uniqid: 3\n--\npipe_4:\n  id: 4\n").unwrap();
        let graph = parse_file(file.path()).unwrap();
        assert_eq!(graph.num_nodes(), 2);
    }

    #[test]
    fn test_parse_missing_file() {
        let err = parse_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, PipegenError::Io { .. }));
    }
}
