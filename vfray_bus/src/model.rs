//! Standard FlexRay bus-model dispatcher.
//!
//! Consumes the typed PDUs delivered by the outer codec (Config / Status
//! / LPDU), drives the engine and the node-state machine, and emits this
//! node's per-step output: exactly one Status PDU followed by one LPDU
//! PDU per transfer that occurred.

use tracing::{debug, error, info, trace, warn};
use vfray::prelude::*;

use crate::engine::{FlexrayEngine, SlotOutcome};
use crate::state::NodeStateTable;

/// Simulation step size [s] applied per progress call.
pub const SIM_STEP_SIZE: f64 = 0.0005;

/// Creation options for a bus model, decoded from the node's MIME-type
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    /// This node's identity.
    pub node_ident: NodeId,
    /// Number of virtual cold-start nodes announced by this node.
    pub vcn_count: u8,
    /// Initial POC state for channel A, when announced.
    pub initial_poc_state_cha: Option<PocState>,
    /// Initial POC state for channel B.
    pub initial_poc_state_chb: Option<PocState>,
    /// Initial power state.
    pub power_on: bool,
}

/// Per-node FlexRay bus model: engine plus cluster state table.
#[derive(Debug)]
pub struct FlexrayBusModel {
    node_ident: NodeId,
    engine: FlexrayEngine,
    state: NodeStateTable,
    last_bus_condition: TransceiverState,
    power_on: bool,
}

impl FlexrayBusModel {
    /// Create a bus model for one node instance.
    pub fn new(options: &NodeOptions) -> Self {
        let mut engine = FlexrayEngine::new(options.node_ident);
        engine.set_default_step(SIM_STEP_SIZE);
        Self {
            node_ident: options.node_ident,
            engine,
            state: NodeStateTable::new(),
            last_bus_condition: TransceiverState::NoConnection,
            power_on: options.power_on,
        }
    }

    /// This node's identity.
    #[inline]
    pub fn node_ident(&self) -> NodeId {
        self.node_ident
    }

    /// The engine, for synchronisation primitives of bridged setups.
    #[inline]
    pub fn engine_mut(&mut self) -> &mut FlexrayEngine {
        &mut self.engine
    }

    /// The cluster state table.
    #[inline]
    pub fn state(&self) -> &NodeStateTable {
        &self.state
    }

    /// Consume one PDU delivered by the codec.
    ///
    /// Configuration errors are returned (and logged); all other
    /// conditions are recoverable and logged only.
    pub fn consume(&mut self, pdu: &Pdu) -> ModelResult<()> {
        let Some(flexray) = pdu.flexray() else {
            debug!(node = %self.node_ident, "non-FlexRay PDU ignored");
            return Ok(());
        };
        let node_ident = flexray.node_ident;

        match &flexray.metadata {
            FlexrayMetadata::None => {}
            FlexrayMetadata::Config(config) => {
                debug!(node = %self.node_ident, from = %node_ident, "consume: Config");
                // The engine sees the configuration under the identity of
                // the PDU envelope.
                let mut config = (**config).clone();
                config.node_ident = node_ident;
                self.engine.process_config(&config)?;
                for vcn in &config.vcn {
                    self.state.register_vcn(*vcn);
                }
                self.state.register(node_ident, true);
                if node_ident == self.node_ident {
                    // This node's initial power state (pwr=on|off).
                    self.state.set_power(node_ident, self.power_on);
                }
                self.state
                    .set_poc_state(node_ident, config.initial_poc_state_cha);
            }
            FlexrayMetadata::Status(status) => {
                debug!(node = %self.node_ident, from = %node_ident, "consume: Status");
                self.state
                    .push_command(node_ident, status.channel[0].poc_command);
            }
            FlexrayMetadata::Lpdu(lpdu) => {
                info!(
                    node = %self.node_ident,
                    from = %node_ident,
                    slot_id = pdu.id,
                    index = lpdu.frame_table_index,
                    len = pdu.payload.len(),
                    status = ?lpdu.status,
                    "consume: LPDU"
                );
                let slot_id = match u16::try_from(pdu.id) {
                    Ok(slot_id) => slot_id,
                    Err(_) => {
                        warn!(node = %self.node_ident, id = pdu.id, "LPDU id out of slot range");
                        return Ok(());
                    }
                };
                if let Err(err) = self.engine.set_lpdu(
                    node_ident,
                    slot_id,
                    lpdu.frame_table_index,
                    lpdu.status,
                    &pdu.payload,
                ) {
                    // A mis-shaped LPDU is skipped, never fatal.
                    debug!(node = %self.node_ident, %err, "LPDU skipped");
                }
            }
        }
        Ok(())
    }

    /// Advance this node by one simulation step and emit the step output.
    ///
    /// Slots are only consumed while the cluster bus condition is
    /// FrameSync; in all other conditions only the Status PDU is
    /// emitted. The drain loop is bounded to keep a mis-configured
    /// engine from running away.
    pub fn progress(&mut self, out: &mut Vec<Pdu>) {
        let bus_condition = self.state.bus_condition();
        trace!(node = %self.node_ident, ?bus_condition, "progress");

        if self.last_bus_condition == TransceiverState::FrameSync
            && bus_condition != TransceiverState::FrameSync
        {
            self.engine.reset_position();
        }
        self.last_bus_condition = bus_condition;

        if bus_condition == TransceiverState::FrameSync {
            match self.engine.calculate_budget(SIM_STEP_SIZE) {
                Ok(()) => {
                    let cap = self.engine.progress_slot_cap();
                    let mut consumed = 0;
                    while self.engine.consume_slot() == SlotOutcome::Advanced {
                        consumed += 1;
                        if consumed >= cap {
                            warn!(
                                node = %self.node_ident,
                                cap,
                                "slot drain cap reached, stopping progress"
                            );
                            break;
                        }
                    }
                    trace!(
                        node = %self.node_ident,
                        cycle = self.engine.pos_cycle(),
                        slot = self.engine.pos_slot(),
                        mt = self.engine.pos_mt(),
                        budget_ut = self.engine.step_budget_ut(),
                        "progress: position"
                    );
                }
                Err(err) => {
                    error!(node = %self.node_ident, %err, "budget calculation failed");
                }
            }
        }

        // Status first.
        let node_state = self.state.get(self.node_ident);
        let mut status = StatusInfo {
            cycle: self.engine.pos_cycle(),
            macrotick: self.engine.pos_mt(),
            channel: [ChannelStatus::default(); 2],
        };
        status.channel[0].poc_state = node_state.poc_state;
        status.channel[0].tcvr_state = node_state.tcvr_state;
        out.push(Pdu::flexray_with(
            self.node_ident,
            FlexrayMetadata::Status(status),
        ));

        // Then every transfer of this step, in slot-traversal order.
        for txrx in self.engine.txrx_list() {
            let Some(lpdu) = self.engine.lpdu(*txrx) else {
                continue;
            };
            let status = match lpdu.status {
                LpduStatus::Transmitted | LpduStatus::NotTransmitted => LpduStatus::Transmitted,
                LpduStatus::Received | LpduStatus::NotReceived => {
                    if lpdu.null_frame {
                        LpduStatus::NotReceived
                    } else {
                        LpduStatus::Received
                    }
                }
                LpduStatus::None => continue,
            };
            let payload = if lpdu.config.direction == Direction::Rx && !lpdu.null_frame {
                lpdu.payload().map(<[u8]>::to_vec).unwrap_or_default()
            } else {
                Vec::new()
            };
            info!(
                node = %self.node_ident,
                slot_id = lpdu.config.slot_id,
                index = lpdu.config.frame_table_index,
                len = payload.len(),
                ?status,
                null = lpdu.null_frame,
                "progress: LPDU"
            );
            let mut pdu = Pdu::flexray_with(
                self.node_ident,
                FlexrayMetadata::Lpdu(LpduInfo {
                    cycle: lpdu.cycle,
                    macrotick: lpdu.macrotick,
                    frame_table_index: lpdu.config.frame_table_index,
                    status,
                    null_frame: lpdu.null_frame,
                }),
            );
            pdu.id = u32::from(lpdu.config.slot_id);
            pdu.payload = payload;
            out.push(pdu);
        }
    }

    /// Release the state table and the engine configuration.
    pub fn close(&mut self) {
        self.state.clear();
        self.engine.release_config();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn node_a() -> NodeId {
        NodeId::new(1, 0, 0)
    }

    fn options(vcn_count: u8) -> NodeOptions {
        NodeOptions {
            node_ident: node_a(),
            vcn_count,
            power_on: true,
            ..Default::default()
        }
    }

    fn cluster_config(frame_config: Vec<LpduConfig>) -> ClusterConfig {
        let mut config = ClusterConfig {
            node_ident: node_a(),
            bit_rate: BitRate::Rate10,
            channel_enable: Channels::A,
            microtick_per_cycle: 200_000,
            macrotick_per_cycle: 3361,
            network_idle_start: 3361 - 5 - 1,
            static_slot_length: 55,
            static_slot_count: 38,
            minislot_length: 6,
            minislot_count: 211,
            static_slot_payload_length: 64,
            frame_config,
            ..Default::default()
        };
        config.announce_vcn(NodeId::new(0xf8, 0, 0));
        config.announce_vcn(NodeId::new(0xf9, 0, 0));
        config
    }

    fn config_pdu(frame_config: Vec<LpduConfig>) -> Pdu {
        Pdu::flexray_with(
            node_a(),
            FlexrayMetadata::Config(Box::new(cluster_config(frame_config))),
        )
    }

    fn status_pdu(command: PocCommand) -> Pdu {
        let mut status = StatusInfo::default();
        status.channel[0].poc_command = command;
        Pdu::flexray_with(node_a(), FlexrayMetadata::Status(status))
    }

    fn lpdu_pdu(slot_id: u16, index: u16, status: LpduStatus, payload: &[u8]) -> Pdu {
        let mut pdu = Pdu::flexray_with(
            node_a(),
            FlexrayMetadata::Lpdu(LpduInfo {
                frame_table_index: index,
                status,
                ..Default::default()
            }),
        );
        pdu.id = u32::from(slot_id);
        pdu.payload = payload.to_vec();
        pdu
    }

    fn tx_rx_pair(slot_id: u16) -> Vec<LpduConfig> {
        vec![
            LpduConfig {
                slot_id,
                payload_length: 64,
                cycle_repetition: 1,
                direction: Direction::Tx,
                frame_table_index: 0,
                ..Default::default()
            },
            LpduConfig {
                slot_id,
                payload_length: 64,
                cycle_repetition: 1,
                direction: Direction::Rx,
                frame_table_index: 1,
                ..Default::default()
            },
        ]
    }

    fn synchronised_model(frame_config: Vec<LpduConfig>) -> FlexrayBusModel {
        let mut model = FlexrayBusModel::new(&options(2));
        model.consume(&config_pdu(frame_config)).unwrap();
        model.consume(&status_pdu(PocCommand::Config)).unwrap();
        model.consume(&status_pdu(PocCommand::Ready)).unwrap();
        model.consume(&status_pdu(PocCommand::Run)).unwrap();
        model
    }

    fn step(model: &mut FlexrayBusModel) -> Vec<Pdu> {
        let mut out = Vec::new();
        model.progress(&mut out);
        out
    }

    #[test]
    fn progress_emits_status_first() {
        let mut model = synchronised_model(vec![]);
        let out = step(&mut model);
        assert!(!out.is_empty());
        assert!(matches!(
            out[0].flexray().unwrap().metadata,
            FlexrayMetadata::Status(_)
        ));
    }

    #[test]
    fn unsynchronised_model_does_not_advance() {
        let mut model = FlexrayBusModel::new(&options(0));
        model.consume(&config_pdu(vec![])).unwrap();
        let out = step(&mut model);
        assert_eq!(out.len(), 1);
        let FlexrayMetadata::Status(status) = out[0].flexray().unwrap().metadata else {
            panic!("expected status");
        };
        assert_eq!(status.cycle, 0);
        assert_eq!(status.macrotick, 0);
    }

    #[test]
    fn synchronised_model_advances_six_slots_per_step() {
        let mut model = synchronised_model(vec![]);
        let out = step(&mut model);
        let FlexrayMetadata::Status(status) = out[0].flexray().unwrap().metadata else {
            panic!("expected status");
        };
        assert_eq!(status.macrotick, 330);
        assert_eq!(status.channel[0].poc_state, PocState::NormalActive);
        assert_eq!(status.channel[0].tcvr_state, TransceiverState::FrameSync);
    }

    #[test]
    fn tx_rx_round_trip_through_pdus() {
        let mut model = synchronised_model(tx_rx_pair(7));
        model
            .consume(&lpdu_pdu(7, 0, LpduStatus::NotTransmitted, b"hello world"))
            .unwrap();
        model
            .consume(&lpdu_pdu(7, 1, LpduStatus::NotReceived, &[]))
            .unwrap();

        // Two steps cover slot 7 (processed at mt 330).
        step(&mut model);
        let out = step(&mut model);
        assert_eq!(out.len(), 3);

        let tx = out[1].flexray().unwrap();
        let FlexrayMetadata::Lpdu(tx_info) = tx.metadata else {
            panic!("expected LPDU");
        };
        assert_eq!(out[1].id, 7);
        assert_eq!(tx_info.status, LpduStatus::Transmitted);
        assert!(out[1].payload.is_empty());

        let FlexrayMetadata::Lpdu(rx_info) = out[2].flexray().unwrap().metadata else {
            panic!("expected LPDU");
        };
        assert_eq!(rx_info.status, LpduStatus::Received);
        assert_eq!(&out[2].payload[..11], b"hello world");
        assert_eq!(out[2].payload.len(), 64);
    }

    #[test]
    fn null_frame_reported_not_received_without_payload() {
        let mut model = synchronised_model(tx_rx_pair(7));
        model
            .consume(&lpdu_pdu(7, 0, LpduStatus::NotTransmitted, b"hello world"))
            .unwrap();
        model
            .consume(&lpdu_pdu(7, 1, LpduStatus::NotReceived, &[]))
            .unwrap();

        // Drive a full cycle plus the start of the next one.
        let mut cycle1_out = Vec::new();
        for _ in 0..12 {
            let out = step(&mut model);
            let FlexrayMetadata::Status(status) = out[0].flexray().unwrap().metadata else {
                panic!("expected status");
            };
            if status.cycle == 1 && !out[1..].is_empty() {
                cycle1_out = out;
                break;
            }
        }
        let FlexrayMetadata::Lpdu(info) = cycle1_out[1].flexray().unwrap().metadata else {
            panic!("expected LPDU");
        };
        assert!(info.null_frame);
        assert_eq!(info.status, LpduStatus::NotReceived);
        assert!(cycle1_out[1].payload.is_empty());
        assert_eq!(info.cycle, 1);
    }

    #[test]
    fn losing_sync_resets_position() {
        let mut model = synchronised_model(vec![]);
        step(&mut model);
        model.consume(&status_pdu(PocCommand::Halt)).unwrap();
        let out = step(&mut model);
        let FlexrayMetadata::Status(status) = out[0].flexray().unwrap().metadata else {
            panic!("expected status");
        };
        assert_eq!(status.cycle, 0);
        assert_eq!(status.macrotick, 0);
        assert_eq!(status.channel[0].poc_state, PocState::Halt);
    }

    #[test]
    fn config_error_is_returned() {
        let mut model = FlexrayBusModel::new(&options(0));
        model.consume(&config_pdu(vec![])).unwrap();
        let mut bad = cluster_config(vec![]);
        bad.static_slot_length = 60;
        let pdu = Pdu::flexray_with(node_a(), FlexrayMetadata::Config(Box::new(bad)));
        assert!(matches!(
            model.consume(&pdu),
            Err(ModelError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn initial_poc_state_announcement_synchronises() {
        // A node announcing NormalActive on channel A with two VCNs
        // reaches FrameSync without any POC commands.
        let mut model = FlexrayBusModel::new(&options(2));
        let mut config = cluster_config(vec![]);
        config.initial_poc_state_cha = PocState::NormalActive;
        let pdu = Pdu::flexray_with(node_a(), FlexrayMetadata::Config(Box::new(config)));
        model.consume(&pdu).unwrap();
        let out = step(&mut model);
        let FlexrayMetadata::Status(status) = out[0].flexray().unwrap().metadata else {
            panic!("expected status");
        };
        assert_eq!(status.channel[0].poc_state, PocState::NormalActive);
        assert_eq!(status.channel[0].tcvr_state, TransceiverState::FrameSync);
        assert_eq!(status.macrotick, 330);
    }
}
