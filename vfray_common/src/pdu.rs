//! PDU wire model and FlexRay protocol enums.
//!
//! A [`Pdu`] is the unit of exchange on the simulation bus: a tagged
//! transport union carrying the node identity, an optional payload, and
//! per-transport metadata (Config / Status / LPDU). Binary framing of
//! these values is the responsibility of the external wire codec; the
//! discriminants below are the bit-exact contract for that encoding.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;
use crate::node::NodeId;

// ─── Protocol Enums ─────────────────────────────────────────────────

/// FlexRay bus bit rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BitRate {
    /// Not configured.
    #[default]
    None = 0,
    /// 10 Mbit/s.
    Rate10 = 1,
    /// 5 Mbit/s.
    Rate5 = 2,
    /// 2.5 Mbit/s.
    Rate2_5 = 3,
}

impl BitRate {
    /// Microtick duration [ns] for this bit rate (0 when unconfigured).
    #[inline]
    pub const fn microtick_ns(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Rate10 | Self::Rate5 => 25,
            Self::Rate2_5 => 50,
        }
    }

    /// Nominal bit time [ns] for this bit rate (0 when unconfigured).
    #[inline]
    pub const fn bit_time_ns(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Rate10 => 100,
            Self::Rate5 => 200,
            Self::Rate2_5 => 400,
        }
    }
}

bitflags! {
    /// FlexRay channel selection (a frame or node may use A, B or both).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Channels: u8 {
        /// Channel A.
        const A = 0x01;
        /// Channel B.
        const B = 0x02;
    }
}

/// LPDU direction, from the perspective of the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// Receive.
    #[default]
    Rx = 0,
    /// Transmit.
    Tx = 1,
}

/// LPDU transmit mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransmitMode {
    /// Transmit once per trigger; status flips to `Transmitted`.
    #[default]
    Once = 0,
    /// Re-transmit on every matching cycle; status stays armed.
    Continuous = 1,
}

/// LPDU transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LpduStatus {
    /// No transfer configured or pending.
    #[default]
    None = 0,
    /// Armed for transmit.
    NotTransmitted = 1,
    /// Transmit completed.
    Transmitted = 2,
    /// Armed for receive.
    NotReceived = 3,
    /// Receive completed.
    Received = 4,
}

/// Protocol Operation Control state of a communication controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PocState {
    /// Power-on default.
    #[default]
    DefaultConfig = 0,
    /// Configuration in progress.
    Config = 1,
    /// Configured, not yet on the bus.
    Ready = 2,
    /// Startup / integration phase.
    Startup = 3,
    /// Wakeup pattern transmission.
    WakeUp = 4,
    /// Synchronised, transmitting.
    NormalActive = 5,
    /// Synchronised, degraded.
    NormalPassive = 6,
    /// Halted.
    Halt = 7,
}

impl PocState {
    /// Decode a wire / MIME-type value.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::DefaultConfig),
            1 => Some(Self::Config),
            2 => Some(Self::Ready),
            3 => Some(Self::Startup),
            4 => Some(Self::WakeUp),
            5 => Some(Self::NormalActive),
            6 => Some(Self::NormalPassive),
            7 => Some(Self::Halt),
            _ => None,
        }
    }
}

/// Host command driving the POC state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PocCommand {
    /// No command.
    #[default]
    None = 0,
    /// Enter configuration.
    Config = 1,
    /// Leave configuration, become ready.
    Ready = 2,
    /// Transmit wakeup pattern.
    Wakeup = 3,
    /// Join the cluster (startup / normal operation).
    Run = 4,
    /// Resume transmission in all slots.
    AllSlots = 5,
    /// Halt at end of cycle.
    Halt = 6,
    /// Halt immediately.
    Freeze = 7,
    /// Permit cold-start attempts.
    AllowColdstart = 8,
}

/// Transceiver (bus driver) state, also used for the aggregate
/// cluster bus condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransceiverState {
    /// No powered connection to the bus.
    #[default]
    NoConnection = 0,
    /// Powered, no traffic.
    NoSignal = 1,
    /// Synchronised to the cluster schedule.
    FrameSync = 2,
    /// Traffic present but not decodable.
    FrameError = 3,
    /// Wakeup pattern on the bus.
    WakeUp = 4,
}

// ─── PDU Metadata ───────────────────────────────────────────────────

/// Per-channel slice of a Status PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelStatus {
    /// Reported POC state.
    pub poc_state: PocState,
    /// Host command towards the POC state machine.
    pub poc_command: PocCommand,
    /// Reported transceiver state.
    pub tcvr_state: TransceiverState,
}

/// Status metadata: where this node believes the schedule is, and the
/// state of its communication controller. Channel 0 is authoritative;
/// channel 1 is carried for wire compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Communication cycle (0..63).
    pub cycle: u8,
    /// Macrotick offset within the cycle.
    pub macrotick: u32,
    /// Per-channel controller state.
    pub channel: [ChannelStatus; 2],
}

/// LPDU metadata: a frame transfer that occurred on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LpduInfo {
    /// Cycle of the transfer.
    pub cycle: u8,
    /// Macrotick at the start of the transfer slot.
    pub macrotick: u32,
    /// Stable per-node frame-table index of the LPDU.
    pub frame_table_index: u16,
    /// Transfer status.
    pub status: LpduStatus,
    /// True when the slot carried a NULL frame.
    pub null_frame: bool,
}

/// FlexRay transport metadata variants.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum FlexrayMetadata {
    /// No metadata content.
    #[default]
    None,
    /// Cluster / frame-table configuration report.
    Config(Box<ClusterConfig>),
    /// Node status report.
    Status(StatusInfo),
    /// Frame transfer report.
    Lpdu(LpduInfo),
}

/// FlexRay transport envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlexrayTransport {
    /// Originating node.
    pub node_ident: NodeId,
    /// Target node when relayed through a PoP node (zero otherwise).
    pub pop_node_ident: NodeId,
    /// Metadata content.
    pub metadata: FlexrayMetadata,
}

/// Transport union of a PDU.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Transport {
    /// No transport selected (the PDU is ignored by bus models).
    #[default]
    None,
    /// FlexRay transport.
    Flexray(FlexrayTransport),
}

// ─── PDU ────────────────────────────────────────────────────────────

/// A Protocol Data Unit exchanged on the simulation bus.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pdu {
    /// Message identifier; the slot id for LPDU transfers.
    pub id: u32,
    /// Payload bytes (empty for Config/Status and NULL-frame reports).
    pub payload: Vec<u8>,
    /// Transport envelope.
    pub transport: Transport,
}

impl Pdu {
    /// The FlexRay transport envelope, if this PDU carries one.
    #[inline]
    pub fn flexray(&self) -> Option<&FlexrayTransport> {
        match &self.transport {
            Transport::Flexray(fr) => Some(fr),
            Transport::None => None,
        }
    }

    /// Mutable access to the FlexRay transport envelope.
    #[inline]
    pub fn flexray_mut(&mut self) -> Option<&mut FlexrayTransport> {
        match &mut self.transport {
            Transport::Flexray(fr) => Some(fr),
            Transport::None => None,
        }
    }

    /// Build a FlexRay PDU with the given metadata.
    pub fn flexray_with(node_ident: NodeId, metadata: FlexrayMetadata) -> Self {
        Self {
            id: 0,
            payload: Vec::new(),
            transport: Transport::Flexray(FlexrayTransport {
                node_ident,
                pop_node_ident: NodeId::POP,
                metadata,
            }),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
