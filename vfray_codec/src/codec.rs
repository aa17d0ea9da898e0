//! The codec surface.
//!
//! A [`PduCodec`] is one node's attachment to the simulation bus. It
//! owns the node's bus model and a private output buffer: reading first
//! drains the input stream through the model, then runs one model
//! progress step (which produces the Status and transfer PDUs into the
//! output buffer), and finally hands those PDUs back one at a time.
//! Writes are staged locally and committed to the shared stream on
//! flush.

use tracing::{debug, error, trace};
use vfray::prelude::*;
use vfray_bus::{BusModel, FlexrayBusModel, NodeOptions, PopBusModel};

use crate::CodecError;
use crate::mime::MimeConfig;
use crate::stream::{BufferStream, PduStream, SharedStream, StreamSeek};

/// One node's codec instance: bus model plus input/output streams.
pub struct PduCodec {
    mime: MimeConfig,
    node_ident: NodeId,
    stream: SharedStream,
    model: BusModel,
    /// Private per-node output buffer, drained by `read`.
    output: BufferStream,
    /// Written PDUs awaiting `flush`.
    pending: Vec<Pdu>,
    /// Set once the current read pass has driven the model.
    progressed: bool,
}

impl PduCodec {
    /// Open a codec on a MIME type and a stream.
    pub fn open(mime_type: &str, stream: SharedStream) -> Result<Self, CodecError> {
        let mime = MimeConfig::parse(mime_type)?;
        let node_ident = mime.node_ident();

        let model = if mime.is_pop() {
            BusModel::Pop(PopBusModel::new(node_ident))
        } else {
            BusModel::Standard(FlexrayBusModel::new(&NodeOptions {
                node_ident,
                vcn_count: mime.vcn_count,
                initial_poc_state_cha: mime.poc_state_cha,
                initial_poc_state_chb: mime.poc_state_chb,
                power_on: mime.power_on,
            }))
        };
        debug!(node = %node_ident, model = %mime.model, mode = ?mime.mode, "codec open");

        Ok(Self {
            mime,
            node_ident,
            stream,
            model,
            output: BufferStream::new(),
            pending: Vec::new(),
            progressed: false,
        })
    }

    /// This node's identity.
    #[inline]
    pub fn node_ident(&self) -> NodeId {
        self.node_ident
    }

    /// Apply one `name=value` configuration item after open.
    ///
    /// Adjusts the values used when annotating written PDUs; the bus
    /// model keeps the identity it was opened with.
    pub fn config(&mut self, name: &str, value: &str) -> Result<(), CodecError> {
        self.mime.set(name, value)?;
        self.node_ident = self.mime.node_ident();
        Ok(())
    }

    /// Stage one PDU for transmission; returns the payload length.
    ///
    /// The PDU is annotated with this node's identity, and a Config PDU
    /// additionally with the announced VCN set and initial POC states.
    pub fn write(&mut self, mut pdu: Pdu) -> Result<usize, CodecError> {
        let node_ident = self.node_ident;
        let Some(flexray) = pdu.flexray_mut() else {
            return Err(CodecError::UnsupportedTransport);
        };
        if flexray.node_ident.is_pop() && !node_ident.is_pop() {
            flexray.node_ident = node_ident;
        }
        if flexray.node_ident == node_ident {
            if let FlexrayMetadata::Config(config) = &mut flexray.metadata {
                config.node_ident = node_ident;
                if config.vcn.is_empty() {
                    for vcn in self.mime.vcn_nodes() {
                        config.announce_vcn(vcn);
                    }
                }
                if let Some(poc_state) = self.mime.poc_state_cha {
                    config.initial_poc_state_cha = poc_state;
                }
                if let Some(poc_state) = self.mime.poc_state_chb {
                    config.initial_poc_state_chb = poc_state;
                }
            }
        }

        trace_pdu("write", &pdu);
        let len = pdu.payload.len();
        self.pending.push(pdu);
        Ok(len)
    }

    /// Commit staged PDUs to the shared stream; returns how many were
    /// written.
    pub fn flush(&mut self) -> usize {
        let mut stream = self.stream.borrow_mut();
        let count = self.pending.len();
        for pdu in self.pending.drain(..) {
            stream.write(pdu);
        }
        count
    }

    /// Read the next PDU of this node's step output.
    ///
    /// The first read of a pass consumes every PDU on the input stream
    /// into the bus model and runs one progress step; the produced
    /// Status PDU (always first) and transfer PDUs are then returned
    /// one at a time until `None`.
    pub fn read(&mut self) -> Option<Pdu> {
        if !self.progressed {
            loop {
                let next = self.stream.borrow_mut().read();
                let Some(pdu) = next else { break };
                trace_pdu("consume", &pdu);
                if let Err(err) = self.model.consume(&pdu) {
                    error!(node = %self.node_ident, %err, "consume failed");
                }
            }
            let mut produced = Vec::new();
            self.model.progress(&mut produced);
            for pdu in produced {
                trace_pdu("produce", &pdu);
                self.output.write(pdu);
            }
            self.progressed = true;
        }
        self.output.read()
    }

    /// Move the input stream cursor. Rewinding (`Set`/`Reset`) starts a
    /// fresh read pass.
    pub fn seek(&mut self, pos: usize, op: StreamSeek) -> usize {
        if matches!(op, StreamSeek::Set | StreamSeek::Reset) {
            self.progressed = false;
            self.output.reset();
        }
        self.stream.borrow_mut().seek(pos, op)
    }

    /// Current input stream cursor.
    pub fn tell(&self) -> usize {
        self.stream.borrow().tell()
    }

    /// Discard the shared stream content, staged writes and pending
    /// output.
    pub fn truncate(&mut self) {
        self.pending.clear();
        self.output.reset();
        self.progressed = false;
        self.stream.borrow_mut().seek(0, StreamSeek::Reset);
    }

    /// Release the bus model and close the codec.
    pub fn close(mut self) {
        debug!(node = %self.node_ident, "codec close");
        self.model.close();
    }
}

/// Log a PDU as compact JSON at trace level.
fn trace_pdu(direction: &str, pdu: &Pdu) {
    if tracing::enabled!(tracing::Level::TRACE) {
        let json = serde_json::to_string(pdu).unwrap_or_default();
        trace!(direction, pdu = %json, "pdu trace");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
