//! Multi-node simulation harness.
//!
//! Recreates the effect of a simulation bus: each node produces a
//! sequence of PDUs, the bus combines the sequences from every node
//! into one buffer, and that buffer becomes the input of every node.
//! Each step then drives every node through the codec read cycle
//! (seek, read all, truncate, flush) and collects the per-node output.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use vfray::prelude::*;
use vfray_codec::stream::{BufferStream, PduStream, StreamSeek};
use vfray_codec::{PduCodec, SharedStream};

/// Hard bound on steps per observed cycle; one cycle of the reference
/// cluster is 5 ms, ten 0.5 ms steps.
pub const CYCLE_STEPS_MAX: usize = 5 * 2 + 5;

pub const PAYLOAD_1: &[u8] = b"hello world";

// ─── Reference cluster ──────────────────────────────────────────────

/// Reference cluster configuration used across the suites: 10 Mbit/s,
/// 200 000 ut / 3361 mt per cycle, 38 static slots of 55 mt, 211
/// minislots of 6 mt, NIT from 3355 mt.
pub fn cluster_config() -> ClusterConfig {
    ClusterConfig {
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
        coldstart_attempts: 8,
        ..Default::default()
    }
}

pub fn mime(ecu_id: u8) -> String {
    format!(
        "application/x-automotive-bus; interface=stream;type=pdu;schema=fbs;\
         ecu_id={ecu_id};vcn=2;model=flexray"
    )
}

// ─── PDU builders ───────────────────────────────────────────────────

/// A frame-table entry for the reference cluster.
pub fn frame(
    slot_id: u16,
    index: u16,
    direction: Direction,
    base_cycle: u8,
    cycle_repetition: u8,
) -> LpduConfig {
    LpduConfig {
        slot_id,
        payload_length: 64,
        base_cycle,
        cycle_repetition,
        direction,
        frame_table_index: index,
        ..Default::default()
    }
}

/// Config PDU carrying the reference cluster and a frame table. The
/// node identity and VCN set are annotated by the writing codec.
pub fn config_pdu(frame_config: Vec<LpduConfig>) -> Pdu {
    let mut config = cluster_config();
    config.frame_config = frame_config;
    Pdu::flexray_with(NodeId::POP, FlexrayMetadata::Config(Box::new(config)))
}

pub fn config_pdu_with(config: ClusterConfig) -> Pdu {
    Pdu::flexray_with(NodeId::POP, FlexrayMetadata::Config(Box::new(config)))
}

/// Status PDU carrying a POC command on channel A.
pub fn command_pdu(command: PocCommand) -> Pdu {
    let mut status = StatusInfo::default();
    status.channel[0].poc_command = command;
    Pdu::flexray_with(NodeId::POP, FlexrayMetadata::Status(status))
}

/// LPDU PDU arming a frame-table entry (payload for Tx).
pub fn lpdu_pdu(slot_id: u16, index: u16, status: LpduStatus, payload: &[u8]) -> Pdu {
    let mut pdu = Pdu::flexray_with(
        NodeId::POP,
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

// ─── Cluster harness ────────────────────────────────────────────────

pub struct TestNode {
    pub codec: PduCodec,
    buffer: Rc<RefCell<BufferStream>>,
}

/// One observed LPDU PDU, tagged with the node that emitted it.
#[derive(Debug, Clone)]
pub struct TracedLpdu {
    pub node: usize,
    pub slot_id: u16,
    pub info: LpduInfo,
    pub payload: Vec<u8>,
    pub node_ident: NodeId,
}

/// Result of a harness run: the last Status per node and every LPDU
/// PDU observed, in emission order.
#[derive(Debug, Default)]
pub struct Trace {
    pub status: Vec<StatusInfo>,
    pub lpdus: Vec<TracedLpdu>,
}

pub struct Cluster {
    pub nodes: Vec<TestNode>,
}

impl Cluster {
    /// Open one codec per MIME type, each on its own bus buffer.
    pub fn new(mimes: &[String]) -> Self {
        let nodes = mimes
            .iter()
            .map(|mime| {
                let buffer = Rc::new(RefCell::new(BufferStream::new()));
                let stream: SharedStream = buffer.clone();
                let codec = PduCodec::open(mime, stream).expect("open codec");
                TestNode { codec, buffer }
            })
            .collect();
        Self { nodes }
    }

    /// Write a sequence of PDUs through `origin`'s codec (annotating
    /// them with its identity) and replicate them into every node's
    /// bus buffer, as the simulation bus would.
    pub fn push_from(&mut self, origin: usize, pdus: Vec<Pdu>) {
        let start = self.nodes[origin].buffer.borrow().len();
        for pdu in pdus {
            self.nodes[origin].codec.write(pdu).expect("write");
        }
        self.nodes[origin].codec.flush();
        let annotated: Vec<Pdu> = self.nodes[origin].buffer.borrow().as_slice()[start..].to_vec();
        for (idx, node) in self.nodes.iter().enumerate() {
            if idx == origin {
                continue;
            }
            let mut buffer = node.buffer.borrow_mut();
            for pdu in &annotated {
                buffer.write(pdu.clone());
            }
        }
    }

    /// Push `origin`'s Config PDU followed by the POC startup command
    /// sequence (Config, Ready, Run).
    pub fn push_startup(&mut self, origin: usize, frame_config: Vec<LpduConfig>) {
        self.push_from(origin, vec![config_pdu(frame_config)]);
        self.push_from(
            origin,
            vec![
                command_pdu(PocCommand::Config),
                command_pdu(PocCommand::Ready),
                command_pdu(PocCommand::Run),
            ],
        );
    }

    /// Drive every node through one codec read cycle; returns the full
    /// output (Status first) per node.
    pub fn step(&mut self) -> Vec<Vec<Pdu>> {
        let mut outputs = Vec::with_capacity(self.nodes.len());
        for node in &mut self.nodes {
            node.codec.seek(0, StreamSeek::Set);
            let mut out = Vec::new();
            while let Some(pdu) = node.codec.read() {
                out.push(pdu);
            }
            node.codec.truncate();
            node.codec.flush();
            outputs.push(out);
        }
        outputs
    }

    /// Run until node 0 has completed `cycles` full cycles (its status
    /// reports cycle `cycles + 1`, counting wraps), or for `steps`
    /// steps when `steps > 0`. Panics when the network stops
    /// progressing.
    pub fn run(&mut self, cycles: u64, steps: usize) -> Trace {
        self.run_with_push(cycles, steps, None)
    }

    /// Like [`Cluster::run`], with a deferred push: once node 0 reports
    /// the given cycle, the listed PDU sequences are pushed from their
    /// origin nodes (once).
    pub fn run_with_push(
        &mut self,
        cycles: u64,
        steps: usize,
        mut push_at: Option<(u8, Vec<(usize, Vec<Pdu>)>)>,
    ) -> Trace {
        let mut trace = Trace {
            status: vec![StatusInfo::default(); self.nodes.len()],
            lpdus: Vec::new(),
        };
        let mut cycle: u8 = 0;
        let mut cycle_loop: u64 = 0;
        let mut cycle_steps = 0usize;
        let mut step_count = 0usize;

        loop {
            if steps > 0 && step_count >= steps {
                break;
            }
            if push_at.as_ref().is_some_and(|push| push.0 == cycle) {
                let (_, pushes) = push_at.take().expect("push_at present");
                for (origin, pdus) in pushes {
                    self.push_from(origin, pdus);
                }
            }
            cycle_steps += 1;
            step_count += 1;
            assert!(
                cycle_steps <= CYCLE_STEPS_MAX,
                "cycle limit exceeded, network not progressing"
            );

            let outputs = self.step();
            for (node, out) in outputs.into_iter().enumerate() {
                let first = out.first().expect("step output");
                let Some(FlexrayMetadata::Status(status)) =
                    first.flexray().map(|flexray| &flexray.metadata)
                else {
                    panic!("first PDU of a step must be a Status");
                };
                trace.status[node] = *status;

                if node == 0 && status.cycle != cycle {
                    cycle = status.cycle;
                    if cycle == 0 {
                        cycle_loop += 1;
                    }
                    cycle_steps = 0;
                }

                for pdu in &out[1..] {
                    let flexray = pdu.flexray().expect("flexray PDU");
                    let FlexrayMetadata::Lpdu(info) = &flexray.metadata else {
                        continue;
                    };
                    trace.lpdus.push(TracedLpdu {
                        node,
                        slot_id: pdu.id as u16,
                        info: *info,
                        payload: pdu.payload.clone(),
                        node_ident: flexray.node_ident,
                    });
                }
            }

            if steps == 0 && cycle_loop * 64 + u64::from(cycle) == cycles + 1 {
                break;
            }
        }
        trace
    }
}

/// The LPDUs emitted by one node, in emission order.
pub fn lpdus_of(trace: &Trace, node: usize) -> Vec<&TracedLpdu> {
    trace.lpdus.iter().filter(|lpdu| lpdu.node == node).collect()
}
