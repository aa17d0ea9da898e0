//! Proof-of-Presence (PoP) bus model.
//!
//! Variant topology: a single PoP node (node id 0) proxies between a
//! real FlexRay controller and N simulated ECUs. PDUs are routed by
//! destination instead of being scheduled; the schedule position the
//! ECUs observe is estimated from the controller's status reports and
//! the slots of forwarded transmissions.

use tracing::{debug, trace};
use vfray::prelude::*;

use crate::model::SIM_STEP_SIZE;

// ─── Macrotick Estimator ────────────────────────────────────────────

/// Estimates the controller's schedule position for status rewriting.
///
/// Used when the controller's status reports omit the macrotick: the
/// estimate free-runs by the step budget and is corrected (forward, or
/// retarded when it has run ahead by more than one step) by the slot
/// ids of forwarded static transmissions.
#[derive(Debug, Default)]
struct MacrotickEstimator {
    running: bool,
    pos_cycle: u8,
    pos_mt: u32,
    step_budget_mt: u32,
    macrotick_per_cycle: u32,
    static_slot_length_mt: u32,
    static_slot_count: u32,
    last_tcvr: TransceiverState,
}

impl MacrotickEstimator {
    /// Take the cluster timing parameters from a terminated Config PDU.
    fn configure(&mut self, config: &ClusterConfig) {
        self.macrotick_per_cycle = config.macrotick_per_cycle;
        self.static_slot_length_mt = config.static_slot_length;
        self.static_slot_count = config.static_slot_count;

        let microtick_ns = config.bit_rate.microtick_ns();
        if microtick_ns > 0 && config.macrotick_per_cycle > 0 {
            let macro2micro = config.microtick_per_cycle / config.macrotick_per_cycle;
            if macro2micro > 0 {
                let step_ut = (SIM_STEP_SIZE * 1_000_000_000.0 / f64::from(microtick_ns)) as u32;
                self.step_budget_mt = step_ut / macro2micro;
            }
        }
        debug!(
            macrotick_per_cycle = self.macrotick_per_cycle,
            static_slot_length_mt = self.static_slot_length_mt,
            static_slot_count = self.static_slot_count,
            step_budget_mt = self.step_budget_mt,
            "estimator configured"
        );
    }

    /// Observe a controller status report.
    fn observe_status(&mut self, status: &StatusInfo) {
        let tcvr = status.channel[0].tcvr_state;
        if tcvr == TransceiverState::FrameSync && self.last_tcvr != TransceiverState::FrameSync {
            self.pos_mt = 0;
            self.running = true;
        }
        self.last_tcvr = tcvr;

        if status.cycle != self.pos_cycle {
            self.pos_cycle = status.cycle;
            self.pos_mt = 0;
        }
        if status.macrotick != 0 {
            self.pos_mt = status.macrotick;
        }
    }

    /// Observe a transmission forwarded from the controller to an ECU;
    /// the slot id bounds the schedule position.
    fn observe_tx_lpdu(&mut self, slot_id: u32) {
        if self.static_slot_length_mt == 0 {
            return;
        }
        if slot_id <= self.static_slot_count {
            let lpdu_mt = (slot_id + 1) * self.static_slot_length_mt;
            if self.pos_mt < lpdu_mt {
                self.pos_mt = lpdu_mt;
            } else if self.pos_mt > lpdu_mt + self.step_budget_mt {
                // The estimate ran ahead by more than one step: retard.
                trace!(pos_mt = self.pos_mt, lpdu_mt, "estimator retard");
                self.pos_mt = lpdu_mt;
            }
        } else {
            // Dynamic transmission: the static segment is behind us.
            let dynamic_start = (self.static_slot_count + 1) * self.static_slot_length_mt;
            if self.pos_mt < dynamic_start {
                self.pos_mt = dynamic_start;
            }
        }
    }

    /// Free-run the estimate by one simulation step.
    fn advance_step(&mut self) {
        if self.running {
            self.pos_mt = (self.pos_mt + self.step_budget_mt).min(self.macrotick_per_cycle);
        }
    }
}

// ─── PDU Router ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Route {
    node_ident: NodeId,
    pdus: Vec<Pdu>,
}

/// Destination-keyed PDU router; routes are kept sorted by node
/// identity, PDUs per route in insertion order.
#[derive(Debug, Default)]
struct PduRouter {
    routes: Vec<Route>,
}

impl PduRouter {
    fn route_mut(&mut self, node_ident: NodeId) -> &mut Route {
        let idx = match self
            .routes
            .binary_search_by_key(&node_ident, |route| route.node_ident)
        {
            Ok(idx) => idx,
            Err(idx) => {
                self.routes.insert(
                    idx,
                    Route {
                        node_ident,
                        pdus: Vec::new(),
                    },
                );
                idx
            }
        };
        &mut self.routes[idx]
    }

    /// Route a PDU to `dest`. The origin's (return) route is created as
    /// well, so every participant is known by progress time.
    fn push(&mut self, origin: NodeId, dest: NodeId, pdu: Pdu) {
        trace!(%origin, %dest, "route PDU");
        self.route_mut(origin);
        self.route_mut(dest).pdus.push(pdu);
    }

    /// Clear all route lists, keeping the known destinations.
    fn clear_lists(&mut self) {
        for route in &mut self.routes {
            route.pdus.clear();
        }
    }
}

// ─── PoP Bus Model ──────────────────────────────────────────────────

/// Per-node PoP bus model: routes PDUs between the controller side and
/// the simulated ECUs, and estimates the schedule position.
#[derive(Debug)]
pub struct PopBusModel {
    node_ident: NodeId,
    router: PduRouter,
    estimator: MacrotickEstimator,
}

impl PopBusModel {
    /// Create a PoP bus model for one node instance.
    pub fn new(node_ident: NodeId) -> Self {
        Self {
            node_ident,
            router: PduRouter::default(),
            estimator: MacrotickEstimator::default(),
        }
    }

    /// This node's identity.
    #[inline]
    pub fn node_ident(&self) -> NodeId {
        self.node_ident
    }

    /// Consume one PDU: route it towards its destination and feed the
    /// macrotick estimator.
    pub fn consume(&mut self, pdu: &Pdu) -> ModelResult<()> {
        let Some(flexray) = pdu.flexray() else {
            return Ok(());
        };
        let node_ident = flexray.node_ident;
        let pop_node_ident = flexray.pop_node_ident;

        match &flexray.metadata {
            FlexrayMetadata::None => {}
            FlexrayMetadata::Config(config) => {
                debug!(node = %self.node_ident, from = %node_ident, "consume: Config");
                if !node_ident.is_pop() {
                    // ECU -> PoP.
                    self.router.push(node_ident, NodeId::POP, pdu.clone());
                } else {
                    // PoP -> : terminated, parameterises the estimator.
                    self.estimator.configure(config);
                }
            }
            FlexrayMetadata::Status(status) => {
                debug!(node = %self.node_ident, from = %node_ident, "consume: Status");
                if !node_ident.is_pop() {
                    // ECU -> PoP.
                    self.router.push(node_ident, NodeId::POP, pdu.clone());
                } else if pop_node_ident.is_pop() {
                    // Controller status for the PoP itself.
                    self.estimator.observe_status(status);
                } else {
                    // PoP -> ECU.
                    self.router.push(node_ident, pop_node_ident, pdu.clone());
                }
            }
            FlexrayMetadata::Lpdu(lpdu) => {
                debug!(
                    node = %self.node_ident,
                    from = %node_ident,
                    slot_id = pdu.id,
                    status = ?lpdu.status,
                    "consume: LPDU"
                );
                if !node_ident.is_pop() {
                    // ECU -> PoP.
                    self.router.push(node_ident, NodeId::POP, pdu.clone());
                } else if !pop_node_ident.is_pop() {
                    // PoP -> ECU; a forwarded transmission advances the
                    // schedule estimate.
                    if lpdu.status == LpduStatus::Transmitted {
                        self.estimator.observe_tx_lpdu(pdu.id);
                    }
                    self.router.push(node_ident, pop_node_ident, pdu.clone());
                }
            }
        }
        Ok(())
    }

    /// Emit this node's routed PDUs for the step.
    ///
    /// Every ECU route is guaranteed to begin with a Status PDU (one is
    /// synthesised when none was routed), and that status is rewritten
    /// to the estimator's schedule position.
    pub fn progress(&mut self, out: &mut Vec<Pdu>) {
        // The flushing node's route always exists.
        self.router.route_mut(self.node_ident);

        for route in &mut self.router.routes {
            if route.node_ident.is_pop() {
                continue;
            }
            ensure_status_first(route);
            if let Some(FlexrayMetadata::Status(status)) = route
                .pdus
                .first_mut()
                .and_then(|pdu| pdu.flexray_mut())
                .map(|flexray| &mut flexray.metadata)
            {
                status.cycle = self.estimator.pos_cycle;
                status.macrotick = self.estimator.pos_mt;
            }
        }

        let route = self.router.route_mut(self.node_ident);
        out.append(&mut route.pdus);

        self.router.clear_lists();
        self.estimator.advance_step();
    }

    /// Release the router state.
    pub fn close(&mut self) {
        self.router.routes.clear();
    }
}

/// Move a routed Status PDU to the front of the list (preserving the
/// order of the rest), synthesising a NoConnection status when the
/// route has none.
fn ensure_status_first(route: &mut Route) {
    let is_status = |pdu: &Pdu| {
        matches!(
            pdu.flexray().map(|flexray| &flexray.metadata),
            Some(FlexrayMetadata::Status(_))
        )
    };
    if route.pdus.first().is_some_and(is_status) {
        return;
    }
    if let Some(idx) = route.pdus.iter().position(is_status) {
        let status = route.pdus.remove(idx);
        route.pdus.insert(0, status);
        return;
    }
    let mut status = StatusInfo::default();
    status.channel[0].tcvr_state = TransceiverState::NoConnection;
    route.pdus.insert(
        0,
        Pdu::flexray_with(route.node_ident, FlexrayMetadata::Status(status)),
    );
}

// ─── Tests ──────────────────────────────────────────────────────────
