//! Common re-exports for downstream crates.

pub use crate::config::{ClusterConfig, LpduConfig, MAX_VCN};
pub use crate::error::{ModelError, ModelResult};
pub use crate::node::NodeId;
pub use crate::pdu::{
    BitRate, ChannelStatus, Channels, Direction, FlexrayMetadata, FlexrayTransport, LpduInfo,
    LpduStatus, Pdu, PocCommand, PocState, StatusInfo, TransceiverState, Transport, TransmitMode,
};
