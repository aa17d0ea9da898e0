//! Cluster and LPDU (frame table) configuration.
//!
//! A [`ClusterConfig`] is the metadata of a Config PDU: each node reports
//! the cluster timing constants it was configured with, plus its frame
//! table. The engine merges successive reports under the merge discipline
//! (zero or equal, anything else is a hard error), which lets a cluster be
//! configured progressively by several node reports without silent
//! overwrite.

use heapless::Vec as BoundedVec;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;
use crate::pdu::{BitRate, Channels, Direction, LpduStatus, PocState, TransmitMode};

/// Maximum number of virtual cold-start nodes a Config PDU may announce.
pub const MAX_VCN: usize = 8;

// ─── LPDU Configuration ─────────────────────────────────────────────

/// Configuration of one LPDU (frame table entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LpduConfig {
    /// Slot the LPDU is bound to (static slots count from 1).
    pub slot_id: u16,
    /// Payload length [bytes]; the owned buffer is exactly this size.
    pub payload_length: u16,
    /// Base cycle (0..63) of the cycle filter.
    pub base_cycle: u8,
    /// Cycle repetition, one of {0, 1, 2, 4, 8, 16, 32, 64}; zero means
    /// the cycle filter never matches (dynamic frames leave it at zero).
    pub cycle_repetition: u8,
    /// Transfer direction.
    pub direction: Direction,
    /// Transmit mode (Tx only).
    pub transmit_mode: TransmitMode,
    /// Initial transfer status.
    pub status: LpduStatus,
    /// Stable per-node frame-table index, used to address the LPDU in
    /// `set_lpdu` style operations.
    pub frame_table_index: u16,
    /// Suppress NULL-frame indications for this LPDU (Rx only).
    pub inhibit_null: bool,
}

impl LpduConfig {
    /// True when the cycle filter matches communication cycle `cycle`.
    ///
    /// An LPDU with `base_cycle = b`, `cycle_repetition = r` (r > 0)
    /// triggers on cycle `c` iff `c % r == b`.
    #[inline]
    pub const fn cycle_matches(&self, cycle: u8) -> bool {
        self.cycle_repetition != 0 && cycle % self.cycle_repetition == self.base_cycle
    }
}

// ─── Cluster Configuration ──────────────────────────────────────────

/// Cluster configuration report (Config PDU metadata).
///
/// Scalar timing fields are constant after the first report; later
/// reports must agree (merge discipline). The frame table and VCN list
/// are additive per report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Reporting node; filled by the consuming dispatcher from the PDU
    /// envelope.
    pub node_ident: NodeId,

    /// Bus bit rate (mandatory).
    pub bit_rate: BitRate,
    /// Channels this node is attached to.
    pub channel_enable: Channels,

    /// Microticks per communication cycle.
    pub microtick_per_cycle: u32,
    /// Macroticks per communication cycle.
    pub macrotick_per_cycle: u32,
    /// Macrotick offset at which the network-idle region begins.
    pub network_idle_start: u32,

    /// Length of one static slot [macroticks].
    pub static_slot_length: u32,
    /// Number of static slots.
    pub static_slot_count: u32,
    /// Payload length of a static slot [bytes].
    pub static_slot_payload_length: u32,
    /// Length of one minislot [macroticks].
    pub minislot_length: u32,
    /// Number of minislots in the dynamic segment.
    pub minislot_count: u32,

    /// Cold-start capable node.
    pub coldstart_node: bool,
    /// Sync-frame transmitting node.
    pub sync_node: bool,
    /// Remaining cold-start attempts.
    pub coldstart_attempts: u8,
    /// Channel used for wakeup pattern transmission (0 = A, 1 = B).
    pub wakeup_channel_select: u8,
    /// Single-slot (key slot only) operation after startup.
    pub single_slot_enabled: bool,
    /// Key slot of this node (0 = none).
    pub key_slot_id: u16,

    /// Suppress NULL-frame indications for all LPDUs of this node.
    pub inhibit_null_frames: bool,

    /// Initial POC state for channel A, as announced by the node.
    pub initial_poc_state_cha: PocState,
    /// Initial POC state for channel B.
    pub initial_poc_state_chb: PocState,

    /// Virtual cold-start nodes announced by this report.
    pub vcn: BoundedVec<NodeId, MAX_VCN>,

    /// Frame table of the reporting node.
    pub frame_config: Vec<LpduConfig>,
}

impl ClusterConfig {
    /// True when the announced bit rate is one the engine supports.
    #[inline]
    pub const fn bit_rate_supported(&self) -> bool {
        !matches!(self.bit_rate, BitRate::None)
    }

    /// Announce a virtual cold-start node; `false` once the bounded
    /// list is full.
    pub fn announce_vcn(&mut self, node_ident: NodeId) -> bool {
        self.vcn.push(node_ident).is_ok()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
