//! vfray Bus Models
//!
//! Slot-accurate FlexRay cluster simulation: each simulated ECU owns a
//! local bus model that advances in lockstep with the simulation clock
//! and exchanges Config / Status / LPDU PDUs with its peers through the
//! outer codec stream.
//!
//! # Module Structure
//!
//! - [`slot_map`] - Ordered slot-id to LPDU-record mapping
//! - [`lpdu`] - Runtime LPDU record with owned payload buffer
//! - [`engine`] - Time budgeting and slot advancement
//! - [`state`] - POC / transceiver state machine, bus condition
//! - [`model`] - Standard bus-model dispatcher
//! - [`pop`] - Proof-of-Presence routing variant

pub mod engine;
pub mod lpdu;
pub mod model;
pub mod pop;
pub mod slot_map;
pub mod state;

use vfray::prelude::*;

pub use model::{FlexrayBusModel, NodeOptions, SIM_STEP_SIZE};
pub use pop::PopBusModel;

/// The bus-model variants a node instance can run.
///
/// Dispatch is an exhaustive match; both variants expose the same
/// consume / progress / close surface towards the codec.
#[derive(Debug)]
pub enum BusModel {
    /// Standard slot-scheduling FlexRay model.
    Standard(FlexrayBusModel),
    /// Proof-of-Presence routing model.
    Pop(PopBusModel),
}

impl BusModel {
    /// Consume one PDU delivered by the codec.
    pub fn consume(&mut self, pdu: &Pdu) -> ModelResult<()> {
        match self {
            Self::Standard(model) => model.consume(pdu),
            Self::Pop(model) => model.consume(pdu),
        }
    }

    /// Advance one simulation step, emitting the step output.
    pub fn progress(&mut self, out: &mut Vec<Pdu>) {
        match self {
            Self::Standard(model) => model.progress(out),
            Self::Pop(model) => model.progress(out),
        }
    }

    /// Release model state.
    pub fn close(&mut self) {
        match self {
            Self::Standard(model) => model.close(),
            Self::Pop(model) => model.close(),
        }
    }

    /// The node identity this model instance runs for.
    pub fn node_ident(&self) -> NodeId {
        match self {
            Self::Standard(model) => model.node_ident(),
            Self::Pop(model) => model.node_ident(),
        }
    }
}
