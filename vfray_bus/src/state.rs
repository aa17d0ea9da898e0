//! Node-state machine and bus-condition aggregation.
//!
//! Tracks the POC and transceiver state of every known cluster member
//! (including virtual cold-start nodes) and aggregates them into the
//! cluster bus condition. The engine only advances slots while the bus
//! condition is FrameSync.

use tracing::{debug, trace};
use vfray::prelude::*;

// ─── Node State ─────────────────────────────────────────────────────

/// State of one cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    /// Member identity.
    pub node_ident: NodeId,
    /// Protocol Operation Control state.
    pub poc_state: PocState,
    /// Transceiver state (channel A; channel B follows A in this model).
    pub tcvr_state: TransceiverState,
    /// Supply power present.
    pub power_on: bool,
    /// Virtual cold-start node: participates in aggregation, never
    /// transmits.
    pub is_vcn: bool,
}

impl NodeState {
    fn new(node_ident: NodeId, power_on: bool, is_vcn: bool) -> Self {
        Self {
            node_ident,
            poc_state: PocState::DefaultConfig,
            tcvr_state: if power_on {
                TransceiverState::NoSignal
            } else {
                TransceiverState::NoConnection
            },
            power_on,
            is_vcn,
        }
    }

    /// Derive the transceiver state from the POC state and power.
    fn derive_tcvr(&mut self) {
        self.tcvr_state = match self.poc_state {
            PocState::NormalActive | PocState::NormalPassive => TransceiverState::FrameSync,
            PocState::WakeUp => TransceiverState::WakeUp,
            _ if self.power_on => TransceiverState::NoSignal,
            _ => TransceiverState::NoConnection,
        };
    }
}

/// Apply a POC command to a POC state.
///
/// Commands are idempotent at their target state; `None` when the
/// command is not valid in the current state.
fn poc_transition(state: PocState, command: PocCommand) -> Option<PocState> {
    use PocCommand as Cmd;
    use PocState::*;

    match (state, command) {
        (DefaultConfig | Ready | Halt | Config, Cmd::Config) => Some(Config),
        (Config | Startup | WakeUp | Ready, Cmd::Ready) => Some(Ready),
        (Ready | Config | WakeUp, Cmd::Wakeup) => Some(WakeUp),
        // The simulation collapses the startup phase: Run synchronises
        // immediately.
        (Ready | Startup | NormalActive, Cmd::Run) => Some(NormalActive),
        (NormalPassive | NormalActive, Cmd::AllSlots) => Some(NormalActive),
        (_, Cmd::Halt | Cmd::Freeze) => Some(Halt),
        (_, Cmd::AllowColdstart | Cmd::None) => Some(state),
        _ => None,
    }
}

// ─── Node-State Table ───────────────────────────────────────────────

/// Table of all known cluster members, sorted by node identity, plus
/// the aggregate bus condition.
#[derive(Debug, Default)]
pub struct NodeStateTable {
    nodes: Vec<NodeState>,
    bus_condition: TransceiverState,
}

impl NodeStateTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            bus_condition: TransceiverState::NoConnection,
        }
    }

    fn position(&self, node_ident: NodeId) -> Result<usize, usize> {
        self.nodes
            .binary_search_by_key(&node_ident, |node| node.node_ident)
    }

    /// Register a cluster member. Re-registration updates the power
    /// state only.
    pub fn register(&mut self, node_ident: NodeId, power_on: bool) {
        match self.position(node_ident) {
            Ok(idx) => {
                self.nodes[idx].power_on = power_on;
                self.nodes[idx].derive_tcvr();
            }
            Err(idx) => {
                debug!(node = %node_ident, power_on, "register node");
                self.nodes.insert(idx, NodeState::new(node_ident, power_on, false));
            }
        }
        self.recompute();
    }

    /// Register a virtual cold-start node. Idempotent.
    pub fn register_vcn(&mut self, node_ident: NodeId) {
        if let Err(idx) = self.position(node_ident) {
            debug!(node = %node_ident, "register VCN");
            self.nodes.insert(idx, NodeState::new(node_ident, true, true));
        }
        self.recompute();
    }

    /// Push a POC command towards a member's state machine. Invalid
    /// commands are logged and ignored.
    pub fn push_command(&mut self, node_ident: NodeId, command: PocCommand) {
        let Ok(idx) = self.position(node_ident) else {
            debug!(node = %node_ident, ?command, "POC command for unknown node");
            return;
        };
        let node = &mut self.nodes[idx];
        match poc_transition(node.poc_state, command) {
            Some(next) => {
                trace!(
                    node = %node_ident,
                    ?command,
                    from = ?node.poc_state,
                    to = ?next,
                    "POC transition"
                );
                node.poc_state = next;
                node.derive_tcvr();
            }
            None => {
                debug!(
                    node = %node_ident,
                    ?command,
                    state = ?node.poc_state,
                    "POC command not valid, ignored"
                );
            }
        }
        self.recompute();
    }

    /// Force a member's POC state (initial state announcements).
    pub fn set_poc_state(&mut self, node_ident: NodeId, poc_state: PocState) {
        let Ok(idx) = self.position(node_ident) else {
            return;
        };
        let node = &mut self.nodes[idx];
        node.poc_state = poc_state;
        node.derive_tcvr();
        self.recompute();
    }

    /// Set a member's power state.
    pub fn set_power(&mut self, node_ident: NodeId, power_on: bool) {
        if let Ok(idx) = self.position(node_ident) {
            self.nodes[idx].power_on = power_on;
            self.nodes[idx].derive_tcvr();
            self.recompute();
        }
    }

    /// Look up a member's state; unknown members report the default
    /// (unpowered, unconnected) state.
    pub fn get(&self, node_ident: NodeId) -> NodeState {
        match self.position(node_ident) {
            Ok(idx) => {
                let mut node = self.nodes[idx];
                if node.is_vcn && self.any_real_active() {
                    node.poc_state = PocState::NormalActive;
                    node.tcvr_state = TransceiverState::FrameSync;
                }
                node
            }
            Err(_) => NodeState::new(node_ident, false, false),
        }
    }

    /// The aggregate cluster bus condition (last recomputed value).
    #[inline]
    pub fn bus_condition(&self) -> TransceiverState {
        self.bus_condition
    }

    /// Number of known members.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no member is known.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop all member state.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.bus_condition = TransceiverState::NoConnection;
    }

    fn any_real_active(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| !node.is_vcn && node.poc_state == PocState::NormalActive)
    }

    /// Recompute the aggregate bus condition. A VCN counts as a
    /// synchronised member whenever any real node is in NormalActive.
    fn recompute(&mut self) -> TransceiverState {
        let real_active = self.any_real_active();
        let mut sync_count = 0usize;
        let mut powered_count = 0usize;
        let mut any_wakeup = false;

        for node in &self.nodes {
            let (poc, tcvr) = if node.is_vcn && real_active {
                (PocState::NormalActive, TransceiverState::FrameSync)
            } else {
                (node.poc_state, node.tcvr_state)
            };
            if node.power_on {
                powered_count += 1;
            }
            if matches!(poc, PocState::NormalActive | PocState::NormalPassive)
                && tcvr == TransceiverState::FrameSync
            {
                sync_count += 1;
            }
            if tcvr == TransceiverState::WakeUp {
                any_wakeup = true;
            }
        }

        self.bus_condition = if sync_count >= 2 {
            TransceiverState::FrameSync
        } else if any_wakeup {
            TransceiverState::WakeUp
        } else if powered_count == 0 {
            TransceiverState::NoConnection
        } else if sync_count == 0 {
            TransceiverState::NoSignal
        } else {
            TransceiverState::FrameError
        };
        self.bus_condition
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ecu_id: u8) -> NodeId {
        NodeId::new(ecu_id, 0, 0)
    }

    fn startup(table: &mut NodeStateTable, nid: NodeId) {
        table.push_command(nid, PocCommand::Config);
        table.push_command(nid, PocCommand::Ready);
        table.push_command(nid, PocCommand::Run);
    }

    #[test]
    fn empty_table_has_no_connection() {
        let table = NodeStateTable::new();
        assert_eq!(table.bus_condition(), TransceiverState::NoConnection);
    }

    #[test]
    fn powered_unsynchronised_cluster_has_no_signal() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        table.register(node(2), true);
        assert_eq!(table.bus_condition(), TransceiverState::NoSignal);
    }

    #[test]
    fn command_sequence_reaches_normal_active() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        startup(&mut table, node(1));
        let state = table.get(node(1));
        assert_eq!(state.poc_state, PocState::NormalActive);
        assert_eq!(state.tcvr_state, TransceiverState::FrameSync);
    }

    #[test]
    fn commands_are_idempotent_at_target_state() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        startup(&mut table, node(1));
        table.push_command(node(1), PocCommand::Run);
        assert_eq!(table.get(node(1)).poc_state, PocState::NormalActive);
    }

    #[test]
    fn invalid_command_is_ignored() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        // Run without Config/Ready first.
        table.push_command(node(1), PocCommand::Run);
        assert_eq!(table.get(node(1)).poc_state, PocState::DefaultConfig);
    }

    #[test]
    fn halt_from_any_state() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        startup(&mut table, node(1));
        table.push_command(node(1), PocCommand::Halt);
        assert_eq!(table.get(node(1)).poc_state, PocState::Halt);
    }

    #[test]
    fn two_active_nodes_reach_frame_sync() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        table.register(node(2), true);
        startup(&mut table, node(1));
        assert_ne!(table.bus_condition(), TransceiverState::FrameSync);
        startup(&mut table, node(2));
        assert_eq!(table.bus_condition(), TransceiverState::FrameSync);
    }

    #[test]
    fn single_node_with_vcn_reaches_frame_sync() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        table.register_vcn(node(0xf8));
        table.register_vcn(node(0xf9));
        assert_ne!(table.bus_condition(), TransceiverState::FrameSync);
        startup(&mut table, node(1));
        assert_eq!(table.bus_condition(), TransceiverState::FrameSync);
    }

    #[test]
    fn vcn_reports_sync_only_while_a_real_node_is_active() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        table.register_vcn(node(0xf8));
        assert_eq!(
            table.get(node(0xf8)).tcvr_state,
            TransceiverState::NoSignal
        );
        startup(&mut table, node(1));
        assert_eq!(
            table.get(node(0xf8)).tcvr_state,
            TransceiverState::FrameSync
        );
        table.push_command(node(1), PocCommand::Halt);
        assert_eq!(
            table.get(node(0xf8)).tcvr_state,
            TransceiverState::NoSignal
        );
    }

    #[test]
    fn wakeup_dominates_unless_synchronised() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        table.register(node(2), true);
        table.push_command(node(1), PocCommand::Config);
        table.push_command(node(1), PocCommand::Wakeup);
        assert_eq!(table.bus_condition(), TransceiverState::WakeUp);
    }

    #[test]
    fn initial_poc_state_announcement() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        table.set_poc_state(node(1), PocState::NormalActive);
        assert_eq!(table.get(node(1)).poc_state, PocState::NormalActive);
        assert_eq!(table.get(node(1)).tcvr_state, TransceiverState::FrameSync);
    }

    #[test]
    fn power_off_drops_to_no_connection() {
        let mut table = NodeStateTable::new();
        table.register(node(1), true);
        table.set_power(node(1), false);
        assert_eq!(
            table.get(node(1)).tcvr_state,
            TransceiverState::NoConnection
        );
    }
}
