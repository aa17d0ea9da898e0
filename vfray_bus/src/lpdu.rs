//! Runtime LPDU record.
//!
//! One record exists per frame-table entry installed in the slot map. The
//! record owns its payload buffer: allocated on first need at exactly the
//! configured payload length, released only when the engine configuration
//! is released.

use vfray::prelude::*;

/// Runtime state of one configured LPDU.
#[derive(Debug, Clone)]
pub struct LpduRecord {
    /// Node that reported this frame-table entry.
    pub node_ident: NodeId,
    /// Configuration copy, owned by this record.
    pub config: LpduConfig,
    /// Transfer status.
    pub status: LpduStatus,
    /// Cycle of the last Tx/Rx on this LPDU.
    pub cycle: u8,
    /// Macrotick of the last Tx/Rx on this LPDU.
    pub macrotick: u32,
    /// True when the last indication was a NULL frame.
    pub null_frame: bool,
    /// Owned payload buffer; `None` until first needed.
    payload: Option<Vec<u8>>,
}

impl LpduRecord {
    /// Create a record from a frame-table entry.
    pub fn new(node_ident: NodeId, config: LpduConfig) -> Self {
        Self {
            node_ident,
            status: config.status,
            config,
            cycle: 0,
            macrotick: 0,
            null_frame: false,
            payload: None,
        }
    }

    /// The payload buffer, if allocated.
    #[inline]
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Ensure the payload buffer exists at the configured length.
    fn alloc_payload(&mut self) -> &mut Vec<u8> {
        let len = usize::from(self.config.payload_length);
        self.payload.get_or_insert_with(|| vec![0u8; len])
    }

    /// Store `data` into the owned buffer: the first
    /// `min(data.len(), payload_length)` bytes are copied, the tail is
    /// zeroed.
    pub fn store_payload(&mut self, data: &[u8]) {
        let cap = usize::from(self.config.payload_length);
        let len = data.len().min(cap);
        let buffer = self.alloc_payload();
        buffer[..len].copy_from_slice(&data[..len]);
        buffer[len..].fill(0);
    }

    /// Receive from a transmit buffer of configured length `tx_length`:
    /// copies `min(tx_length, payload_length)` bytes, zero-pads the tail.
    /// A missing transmit buffer leaves the (allocated) buffer unchanged.
    pub fn receive_payload(&mut self, tx_payload: Option<&[u8]>, tx_length: u16) {
        self.alloc_payload();
        if let Some(data) = tx_payload {
            let len = usize::from(self.config.payload_length.min(tx_length)).min(data.len());
            let buffer = self.alloc_payload();
            buffer[len..].fill(0);
            buffer[..len].copy_from_slice(&data[..len]);
        }
    }

    /// Record the schedule position of a transfer.
    #[inline]
    pub fn mark_transfer(&mut self, cycle: u8, macrotick: u32) {
        self.cycle = cycle;
        self.macrotick = macrotick;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
