//! Slot-scheduling engine.
//!
//! The engine advances a node's local copy of the cluster schedule in
//! whole slots, limited by a per-step microtick budget. Per slot it
//! decides which LPDU transmits, which LPDUs receive, and whether a
//! static slot carries a NULL frame. Positions advance through three
//! regions of the cycle:
//!
//! - static segment (`pos_mt < offset_dynamic_mt`): fixed-length slots;
//! - dynamic segment (`offset_dynamic_mt <= pos_mt < offset_network_mt`):
//!   minislots, stretched when a transmission is pending;
//! - network idle (`pos_mt >= offset_network_mt`): consumes the microtick
//!   remainder and wraps the cycle.

use tracing::{debug, error, info, trace};
use vfray::prelude::*;

use crate::lpdu::LpduRecord;
use crate::slot_map::SlotMap;

/// Communication cycles per cluster cycle counter wrap (0..63).
pub const MAX_CYCLE: u8 = 64;

/// Header bits of a dynamic frame, used by the minislot stretching
/// formula.
const DYNAMIC_FRAME_HEADER_BITS: u32 = 40;

/// Outcome of one `consume_slot` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// One slot (or the cycle remainder) was consumed.
    Advanced,
    /// The step budget cannot cover the next slot; engine state is
    /// untouched and the caller stops progressing for this step.
    Insufficient,
}

/// Reference into the slot map, valid for the current step only.
///
/// The TxRx list stores these instead of record references so that no
/// borrow outlives the enclosing progress call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRxRef {
    /// Slot the record lives in.
    pub slot_id: u16,
    /// Position of the record within the slot's LPDU list.
    pub index: usize,
}

// ─── Engine ─────────────────────────────────────────────────────────

/// Per-node slot-scheduling engine.
#[derive(Debug, Default)]
pub struct FlexrayEngine {
    node_ident: NodeId,
    inhibit_null_frames: bool,
    default_step_s: f64,

    microtick_per_cycle: u32,
    macrotick_per_cycle: u32,
    static_slot_length_mt: u32,
    static_slot_count: u32,
    minislot_length_mt: u32,
    minislot_count: u32,
    static_slot_payload_length: u32,

    macro2micro: u32,
    microtick_ns: u32,
    macrotick_ns: u32,
    offset_dynamic_mt: u32,
    offset_network_mt: u32,
    bits_per_minislot: u32,

    pos_mt: u32,
    pos_slot: u32,
    pos_cycle: u8,

    step_budget_ut: u32,
    step_budget_mt: u32,

    slot_map: SlotMap,
    txrx_list: Vec<TxRxRef>,
}

impl FlexrayEngine {
    /// Create an unconfigured engine for the given node.
    pub fn new(node_ident: NodeId) -> Self {
        Self {
            node_ident,
            ..Default::default()
        }
    }

    // ── Accessors ──

    /// Node this engine belongs to.
    #[inline]
    pub fn node_ident(&self) -> NodeId {
        self.node_ident
    }

    /// Current communication cycle (0..63).
    #[inline]
    pub fn pos_cycle(&self) -> u8 {
        self.pos_cycle
    }

    /// Current macrotick offset within the cycle.
    #[inline]
    pub fn pos_mt(&self) -> u32 {
        self.pos_mt
    }

    /// Current slot (counts from 1).
    #[inline]
    pub fn pos_slot(&self) -> u32 {
        self.pos_slot
    }

    /// Remaining microtick budget of the current step.
    #[inline]
    pub fn step_budget_ut(&self) -> u32 {
        self.step_budget_ut
    }

    /// Remaining macrotick budget of the current step.
    #[inline]
    pub fn step_budget_mt(&self) -> u32 {
        self.step_budget_mt
    }

    /// Macroticks per communication cycle.
    #[inline]
    pub fn macrotick_per_cycle(&self) -> u32 {
        self.macrotick_per_cycle
    }

    /// True once a configuration report has populated the timing fields.
    #[inline]
    pub fn is_configured(&self) -> bool {
        self.macrotick_ns != 0 && self.macro2micro != 0
    }

    /// Transfers that fired during the current step, in slot-traversal
    /// order.
    #[inline]
    pub fn txrx_list(&self) -> &[TxRxRef] {
        &self.txrx_list
    }

    /// Resolve a TxRx reference (valid for the current step only).
    pub fn lpdu(&self, txrx: TxRxRef) -> Option<&LpduRecord> {
        self.slot_map
            .find(txrx.slot_id)
            .and_then(|entry| entry.lpdus.get(txrx.index))
    }

    /// Upper bound on slots consumed per progress call; guards a
    /// mis-configured engine against an unbounded drain loop.
    #[inline]
    pub fn progress_slot_cap(&self) -> u32 {
        2 * self.macrotick_per_cycle / self.minislot_length_mt.max(1)
    }

    /// Default step size [s] used when a progress step passes none.
    pub fn set_default_step(&mut self, step_s: f64) {
        self.default_step_s = step_s;
    }

    // ── Configuration ──

    /// Merge a configuration report into the engine.
    ///
    /// Every scalar field must either be unset (zero) in the engine or
    /// match the report; a disagreement fails with `ConfigMismatch` and
    /// leaves the engine untouched. The report's frame table is copied
    /// into the slot map, keyed by slot id.
    pub fn process_config(&mut self, config: &ClusterConfig) -> ModelResult<()> {
        if !config.bit_rate_supported() {
            error!(node = %self.node_ident, "config: bit rate not supported");
            return Err(ModelError::ConfigRejected {
                reason: "bit rate not supported",
            });
        }
        if config.macrotick_per_cycle == 0 {
            return Err(ModelError::ConfigRejected {
                reason: "macrotick_per_cycle is zero",
            });
        }
        if config.microtick_per_cycle % config.macrotick_per_cycle != 0 {
            return Err(ModelError::ConfigRejected {
                reason: "microtick_per_cycle not a multiple of macrotick_per_cycle",
            });
        }

        let microtick_ns = config.bit_rate.microtick_ns();
        let macro2micro = config.microtick_per_cycle / config.macrotick_per_cycle;
        let macrotick_ns = macro2micro * microtick_ns;
        let offset_dynamic_mt = config.static_slot_length * config.static_slot_count;

        // Check the merge discipline on every scalar field before any
        // assignment, so a mismatch leaves prior state intact.
        let merges = [
            (
                self.microtick_per_cycle,
                config.microtick_per_cycle,
                "microtick_per_cycle",
            ),
            (
                self.macrotick_per_cycle,
                config.macrotick_per_cycle,
                "macrotick_per_cycle",
            ),
            (
                self.static_slot_length_mt,
                config.static_slot_length,
                "static_slot_length",
            ),
            (
                self.static_slot_count,
                config.static_slot_count,
                "static_slot_count",
            ),
            (
                self.minislot_length_mt,
                config.minislot_length,
                "minislot_length",
            ),
            (self.minislot_count, config.minislot_count, "minislot_count"),
            (
                self.static_slot_payload_length,
                config.static_slot_payload_length,
                "static_slot_payload_length",
            ),
            (self.microtick_ns, microtick_ns, "microtick_ns"),
            (self.macro2micro, macro2micro, "macro2micro"),
            (self.macrotick_ns, macrotick_ns, "macrotick_ns"),
            (self.offset_dynamic_mt, offset_dynamic_mt, "offset_dynamic"),
            (
                self.offset_network_mt,
                config.network_idle_start,
                "network_idle_start",
            ),
        ];
        for (current, value, field) in merges {
            if current != 0 && current != value {
                error!(node = %self.node_ident, field, current, value, "config merge mismatch");
                return Err(ModelError::ConfigMismatch { field });
            }
        }

        self.microtick_per_cycle = config.microtick_per_cycle;
        self.macrotick_per_cycle = config.macrotick_per_cycle;
        self.static_slot_length_mt = config.static_slot_length;
        self.static_slot_count = config.static_slot_count;
        self.minislot_length_mt = config.minislot_length;
        self.minislot_count = config.minislot_count;
        self.static_slot_payload_length = config.static_slot_payload_length;
        self.microtick_ns = microtick_ns;
        self.macro2micro = macro2micro;
        self.macrotick_ns = macrotick_ns;
        self.offset_dynamic_mt = offset_dynamic_mt;
        self.offset_network_mt = config.network_idle_start;
        self.bits_per_minislot =
            self.minislot_length_mt * self.macrotick_ns / config.bit_rate.bit_time_ns();

        // Slots count from 1.
        if self.pos_slot == 0 {
            self.pos_slot = 1;
        }

        // Install the frame table into the slot map. Re-submission of an
        // already installed entry is a no-op (configuration idempotence).
        for lpdu_config in &config.frame_config {
            let entry = self.slot_map.entry_mut(lpdu_config.slot_id);
            let installed = entry.lpdus.iter().any(|lpdu| {
                lpdu.node_ident == config.node_ident
                    && lpdu.config.frame_table_index == lpdu_config.frame_table_index
            });
            if installed {
                continue;
            }
            entry
                .lpdus
                .push(LpduRecord::new(config.node_ident, *lpdu_config));
        }

        self.inhibit_null_frames = config.inhibit_null_frames;

        info!(
            node = %self.node_ident,
            reporting_node = %config.node_ident,
            microtick_per_cycle = self.microtick_per_cycle,
            macrotick_per_cycle = self.macrotick_per_cycle,
            static_slot_length_mt = self.static_slot_length_mt,
            static_slot_count = self.static_slot_count,
            minislot_length_mt = self.minislot_length_mt,
            minislot_count = self.minislot_count,
            static_slot_payload_length = self.static_slot_payload_length,
            macro2micro = self.macro2micro,
            microtick_ns = self.microtick_ns,
            macrotick_ns = self.macrotick_ns,
            offset_dynamic_mt = self.offset_dynamic_mt,
            offset_network_mt = self.offset_network_mt,
            bits_per_minislot = self.bits_per_minislot,
            inhibit_null_frames = self.inhibit_null_frames,
            frame_count = config.frame_config.len(),
            "engine configured"
        );
        for lpdu_config in &config.frame_config {
            debug!(
                node = %self.node_ident,
                slot_id = lpdu_config.slot_id,
                index = lpdu_config.frame_table_index,
                base = lpdu_config.base_cycle,
                repetition = lpdu_config.cycle_repetition,
                direction = ?lpdu_config.direction,
                tx_mode = ?lpdu_config.transmit_mode,
                inhibit_null = lpdu_config.inhibit_null,
                "frame table entry"
            );
        }

        Ok(())
    }

    /// Release the slot map, the retained configuration and the TxRx
    /// list. The engine returns to its unconfigured state for timing but
    /// keeps its position counters.
    pub fn release_config(&mut self) {
        self.slot_map.clear();
        self.txrx_list.clear();
    }

    // ── Budget ──

    /// Accumulate the microtick budget for a simulation step of
    /// `step_s` seconds and clear the TxRx list of the previous step.
    ///
    /// A non-positive `step_s` falls back to the configured default step.
    pub fn calculate_budget(&mut self, step_s: f64) -> ModelResult<()> {
        if self.macrotick_ns == 0 {
            error!(node = %self.node_ident, "macrotick_ns not configured");
            return Err(ModelError::NotConfigured {
                field: "macrotick_ns",
            });
        }
        if self.macro2micro == 0 {
            error!(node = %self.node_ident, "macro2micro not configured");
            return Err(ModelError::NotConfigured {
                field: "macro2micro",
            });
        }
        let step_s = if step_s > 0.0 {
            step_s
        } else if self.default_step_s > 0.0 {
            self.default_step_s
        } else {
            return Err(ModelError::InvalidArgument("step size not configured"));
        };

        self.step_budget_ut += (step_s * 1_000_000_000.0 / f64::from(self.microtick_ns)) as u32;
        self.step_budget_mt = self.step_budget_ut / self.macro2micro;
        self.txrx_list.clear();
        Ok(())
    }

    // ── Slot Advancement ──

    /// Advance exactly one slot, or end the cycle when the position is
    /// inside the network-idle region. Budget checks precede all
    /// mutation: on `Insufficient` the engine is untouched.
    pub fn consume_slot(&mut self) -> SlotOutcome {
        if self.pos_mt < self.offset_dynamic_mt {
            // Static segment.
            let need_mt = self.static_slot_length_mt;
            let need_ut = need_mt * self.macro2micro;
            if need_ut > self.step_budget_ut {
                return SlotOutcome::Insufficient;
            }
            self.process_slot();
            self.step_budget_ut -= need_ut;
            self.step_budget_mt = self.step_budget_mt.saturating_sub(need_mt);
            self.pos_slot += 1;
            self.pos_mt += need_mt;
            SlotOutcome::Advanced
        } else if self.pos_mt < self.offset_network_mt {
            // Dynamic segment: a pending transmission stretches the slot
            // beyond one minislot.
            let mut need_mt = self.minislot_length_mt;
            let mut pending_tx = false;
            let slot_entry = u16::try_from(self.pos_slot)
                .ok()
                .and_then(|slot_id| self.slot_map.find(slot_id));
            if let Some(entry) = slot_entry {
                for lpdu in &entry.lpdus {
                    if lpdu.config.direction == Direction::Tx
                        && lpdu.status == LpduStatus::NotTransmitted
                    {
                        pending_tx = true;
                        if self.bits_per_minislot > 0 {
                            let frame_bits = DYNAMIC_FRAME_HEADER_BITS
                                + u32::from(lpdu.config.payload_length) * 8;
                            need_mt = frame_bits.div_ceil(self.bits_per_minislot)
                                * self.minislot_length_mt;
                        }
                    }
                }
            }
            if need_mt + self.pos_mt > self.macrotick_per_cycle {
                info!(
                    node = %self.node_ident,
                    need_mt,
                    pos_mt = self.pos_mt,
                    cycle_mt = self.macrotick_per_cycle,
                    "slot exceeds cycle length, clamping"
                );
                need_mt = self.macrotick_per_cycle - self.pos_mt;
            }
            let need_ut = need_mt * self.macro2micro;
            if need_ut > self.step_budget_ut {
                return SlotOutcome::Insufficient;
            }
            if pending_tx {
                self.process_slot();
            }
            self.step_budget_ut -= need_ut;
            self.step_budget_mt = self.step_budget_mt.saturating_sub(need_mt);
            self.pos_slot += 1;
            self.pos_mt += need_mt;
            SlotOutcome::Advanced
        } else {
            // Network idle: consume the microtick remainder of the cycle.
            let consumed_ut = self.pos_mt * self.macro2micro;
            let remaining_ut = if consumed_ut < self.microtick_per_cycle {
                self.microtick_per_cycle - consumed_ut
            } else {
                info!(
                    node = %self.node_ident,
                    pos_mt = self.pos_mt,
                    cycle_mt = self.macrotick_per_cycle,
                    "position exceeds cycle length"
                );
                0
            };
            if remaining_ut > self.step_budget_ut {
                return SlotOutcome::Insufficient;
            }
            self.step_budget_ut -= remaining_ut;
            self.pos_slot = 1;
            self.pos_mt = 0;
            self.pos_cycle = (self.pos_cycle + 1) % MAX_CYCLE;
            SlotOutcome::Advanced
        }
    }

    /// Process the Tx/Rx transfers of the current slot.
    ///
    /// At most one LPDU transmits per slot: the first record whose
    /// direction is Tx and whose cycle filter matches (dynamic segment:
    /// direction only) wins. A static-segment winner whose status is
    /// `None` or `Transmitted` turns the slot into a NULL frame.
    fn process_slot(&mut self) {
        let Ok(slot_id) = u16::try_from(self.pos_slot) else {
            return;
        };
        let pos_cycle = self.pos_cycle;
        let pos_mt = self.pos_mt;
        let in_dynamic = pos_mt >= self.offset_dynamic_mt;
        let node_ident = self.node_ident;
        let inhibit_null_frames = self.inhibit_null_frames;

        let Some(entry) = self.slot_map.find_mut(slot_id) else {
            return;
        };
        trace!(
            node = %node_ident,
            slot_id,
            cycle = pos_cycle,
            mt = pos_mt,
            lpdus = entry.lpdus.len(),
            "process slot"
        );

        // Identify the transmitting LPDU; first match wins.
        let mut tx_index = None;
        let mut tx_null_frame = false;
        for (index, lpdu) in entry.lpdus.iter().enumerate() {
            if lpdu.config.direction != Direction::Tx {
                continue;
            }
            if !in_dynamic && !lpdu.config.cycle_matches(pos_cycle) {
                continue;
            }
            tx_index = Some(index);
            if !in_dynamic
                && matches!(lpdu.status, LpduStatus::None | LpduStatus::Transmitted)
            {
                tx_null_frame = true;
            }
            break;
        }
        let Some(tx_index) = tx_index else {
            return;
        };

        // Perform the Tx.
        let mut tx_fired = false;
        let mut tx_payload: Option<Vec<u8>> = None;
        let mut tx_length = 0;
        {
            let tx = &mut entry.lpdus[tx_index];
            if tx.status == LpduStatus::NotTransmitted && !tx_null_frame {
                if tx.config.transmit_mode != TransmitMode::Continuous {
                    tx.status = LpduStatus::Transmitted;
                }
                if tx.payload().is_none() {
                    debug!(node = %node_ident, slot_id, "Tx with no payload available");
                }
                tx.mark_transfer(pos_cycle, pos_mt);
                tx_fired = true;
                tx_payload = tx.payload().map(<[u8]>::to_vec);
                tx_length = tx.config.payload_length;
                if tx.node_ident == node_ident {
                    self.txrx_list.push(TxRxRef {
                        slot_id,
                        index: tx_index,
                    });
                }
            }
        }

        // And the associated Rx transfers on this node.
        for index in 0..entry.lpdus.len() {
            let rx = &mut entry.lpdus[index];
            if rx.config.direction != Direction::Rx {
                continue;
            }
            if !matches!(rx.status, LpduStatus::NotReceived | LpduStatus::Received) {
                continue;
            }
            if rx.node_ident != node_ident {
                continue;
            }
            if !in_dynamic && !rx.config.cycle_matches(pos_cycle) {
                continue;
            }
            if tx_null_frame {
                if rx.config.inhibit_null || inhibit_null_frames {
                    continue;
                }
                rx.mark_transfer(pos_cycle, pos_mt);
                rx.null_frame = true;
                debug!(node = %node_ident, slot_id, "Rx <- NULL");
                self.txrx_list.push(TxRxRef { slot_id, index });
            } else if tx_fired {
                rx.status = LpduStatus::Received;
                rx.receive_payload(tx_payload.as_deref(), tx_length);
                rx.mark_transfer(pos_cycle, pos_mt);
                rx.null_frame = false;
                debug!(node = %node_ident, slot_id, len = tx_length, "Rx <- Tx");
                self.txrx_list.push(TxRxRef { slot_id, index });
            }
        }
    }

    // ── Synchronisation ──

    /// Shift the schedule position to `(mt, cycle)`; sync primitive for
    /// bridged networks.
    ///
    /// Allowed unconditionally in the static segment. In the dynamic
    /// segment the slot position cannot be derived (slots have variable
    /// length), so the shift is refused unless `force` assumes no
    /// transmission occurred. Budgets are not carried over a shift.
    pub fn shift_cycle(&mut self, mt: u32, cycle: u8, force: bool) -> ModelResult<()> {
        if self.static_slot_length_mt == 0 {
            return Err(ModelError::NotConfigured {
                field: "static_slot_length",
            });
        }
        if mt < self.offset_dynamic_mt {
            self.pos_mt = mt;
            self.pos_cycle = cycle % MAX_CYCLE;
            self.pos_slot = mt / self.static_slot_length_mt + 1;
        } else if force {
            self.pos_mt = mt;
            self.pos_cycle = cycle % MAX_CYCLE;
            self.pos_slot = (mt - self.offset_dynamic_mt) / self.minislot_length_mt.max(1)
                + self.static_slot_count
                + 1;
        } else {
            return Err(ModelError::ShiftRefused);
        }
        self.step_budget_ut = 0;
        self.step_budget_mt = 0;
        Ok(())
    }

    /// Force the schedule position back to the cycle origin; applied when
    /// the cluster loses frame synchronisation.
    pub fn reset_position(&mut self) {
        self.pos_cycle = 0;
        self.pos_mt = 0;
        self.pos_slot = 1;
    }

    // ── LPDU Access ──

    /// Set the status (and, for Tx, the payload) of a configured LPDU,
    /// addressed by owning node and frame-table index within a slot.
    pub fn set_lpdu(
        &mut self,
        node_id: NodeId,
        slot_id: u16,
        frame_table_index: u16,
        status: LpduStatus,
        payload: &[u8],
    ) -> ModelResult<()> {
        let not_found = ModelError::NotFound {
            slot_id,
            index: frame_table_index,
        };
        let Some(entry) = self.slot_map.find_mut(slot_id) else {
            debug!(node = %self.node_ident, slot_id, "no configured slot");
            return Err(not_found);
        };
        let Some(lpdu) = entry.lpdus.iter_mut().find(|lpdu| {
            lpdu.node_ident == node_id && lpdu.config.frame_table_index == frame_table_index
        }) else {
            debug!(
                node = %self.node_ident,
                slot_id,
                index = frame_table_index,
                "no LPDU found in slot"
            );
            return Err(not_found);
        };

        lpdu.status = status;
        if lpdu.config.direction == Direction::Tx {
            lpdu.store_payload(payload);
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
