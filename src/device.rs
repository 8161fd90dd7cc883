//! Device-facing facts and compiler configuration
//!
//! Core coordinates are opaque to the compiler: they are attached to nodes as
//! parsed and compared for equality, never translated.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipegenError, PipegenResult};

/// Logical location of a worker core on a chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoreLocation {
    pub chip: u32,
    pub row: u32,
    pub col: u32,
}

impl CoreLocation {
    /// Row/column value used for nodes that are not mapped to a worker core
    pub const UNMAPPED: u32 = 255;
    /// Coordinate value of a node whose location was never given
    pub const UNSET: u32 = u32::MAX;

    pub fn new(chip: u32, row: u32, col: u32) -> Self {
        Self { chip, row, col }
    }

    /// Location on `chip` that is not bound to any worker core
    pub fn unmapped(chip: u32) -> Self {
        Self::new(chip, Self::UNMAPPED, Self::UNMAPPED)
    }

    pub fn is_unmapped(&self) -> bool {
        self.row == Self::UNMAPPED && self.col == Self::UNMAPPED
    }

    pub fn is_set(&self) -> bool {
        self.chip != Self::UNSET && self.row != Self::UNSET && self.col != Self::UNSET
    }
}

/// Nodes start out with no location; (0, 0, 0) is a real core
impl Default for CoreLocation {
    fn default() -> Self {
        Self::new(Self::UNSET, Self::UNSET, Self::UNSET)
    }
}

impl fmt::Display for CoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_set() {
            write!(f, "unset location")
        } else if self.is_unmapped() {
            write!(f, "chip {}, unmapped core", self.chip)
        } else {
            write!(f, "chip {}, core {}-{}", self.chip, self.row, self.col)
        }
    }
}

/// Operand id ranges used by the kernel buffers of a core
pub mod operand {
    pub const INPUT_START: u32 = 0;
    pub const OUTPUT_START: u32 = 16;
    pub const INTERMEDIATE_START: u32 = 24;
    pub const RELAY_START: u32 = 32;
    pub const MAX_NUM_OPERANDS: u32 = 64;
}

/// Role of a buffer's operand id within its core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandKind {
    Input,
    Output,
    Intermediate,
    Relay,
    Unknown,
}

impl OperandKind {
    pub fn from_operand_id(id: u32) -> Self {
        use self::operand::*;
        match id {
            _ if id < OUTPUT_START => OperandKind::Input,
            _ if id < INTERMEDIATE_START => OperandKind::Output,
            _ if id < RELAY_START => OperandKind::Intermediate,
            _ if id < MAX_NUM_OPERANDS => OperandKind::Relay,
            _ => OperandKind::Unknown,
        }
    }
}

/// Thresholds used when sizing host-interconnect transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcieFlowConfig {
    /// Largest single write the host interconnect should issue
    pub max_write_issue_bytes: u32,
    /// Destination buffer size above which double buffering is skipped
    pub max_destination_bytes: u32,
}

impl PcieFlowConfig {
    pub fn new(max_write_issue_bytes: u32, max_destination_bytes: u32) -> Self {
        Self {
            max_write_issue_bytes,
            max_destination_bytes,
        }
    }
}

impl Default for PcieFlowConfig {
    fn default() -> Self {
        Self::new(16 * 1024, 64 * 1024)
    }
}

/// Compiler-wide configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipegenConfig {
    pub pcie: PcieFlowConfig,
    /// Run the post-TM relay bypass pass
    pub post_tm_optimization: bool,
}

impl PipegenConfig {
    pub fn new(pcie: PcieFlowConfig, post_tm_optimization: bool) -> Self {
        Self {
            pcie,
            post_tm_optimization,
        }
    }

    pub fn from_json_str(text: &str) -> PipegenResult<Self> {
        serde_json::from_str(text).map_err(|e| PipegenError::config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> PipegenResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PipegenError::io(path, e))?;
        Self::from_json_str(&text)
    }
}

impl Default for PipegenConfig {
    fn default() -> Self {
        Self::new(PcieFlowConfig::default(), true)
    }
}
