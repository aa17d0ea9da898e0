//! PDU stream abstraction.
//!
//! The simulation environment provides the transport behind a codec as
//! a random-access stream. Binary framing (the size-prefixed tabular
//! encoding) is applied outside this crate; here the stream carries
//! decoded PDUs. [`BufferStream`] is the in-memory implementation used
//! by the simulation loop and the test harnesses.

use std::cell::RefCell;
use std::rc::Rc;

use vfray::prelude::*;

/// Seek operations of a PDU stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSeek {
    /// Absolute position.
    Set,
    /// Relative to the current position.
    Cur,
    /// To the end of the stream.
    End,
    /// Discard content and rewind.
    Reset,
}

/// Random-access stream of PDUs.
pub trait PduStream {
    /// Read the PDU at the cursor, advancing it; `None` at end of
    /// stream.
    fn read(&mut self) -> Option<Pdu>;

    /// Append a PDU; returns the payload length written.
    fn write(&mut self, pdu: Pdu) -> usize;

    /// Move the cursor; returns the new position.
    fn seek(&mut self, pos: usize, op: StreamSeek) -> usize;

    /// Current cursor position.
    fn tell(&self) -> usize;

    /// True when the cursor is at the end of the stream.
    fn eof(&self) -> bool;

    /// Release stream resources.
    fn close(&mut self) {}
}

/// Shared handle to a stream: several codecs attached to the same bus
/// share one stream within a single-threaded node group.
pub type SharedStream = Rc<RefCell<dyn PduStream>>;

/// Wrap a stream implementation into a shared handle.
pub fn shared<S: PduStream + 'static>(stream: S) -> SharedStream {
    Rc::new(RefCell::new(stream))
}

// ─── Buffer Stream ──────────────────────────────────────────────────

/// In-memory PDU stream.
#[derive(Debug, Default)]
pub struct BufferStream {
    pdus: Vec<Pdu>,
    cursor: usize,
}

impl BufferStream {
    /// Create an empty buffer stream.
    pub const fn new() -> Self {
        Self {
            pdus: Vec::new(),
            cursor: 0,
        }
    }

    /// Number of PDUs in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.pdus.len()
    }

    /// True when the buffer holds no PDUs.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pdus.is_empty()
    }

    /// Discard content and rewind.
    pub fn reset(&mut self) {
        self.pdus.clear();
        self.cursor = 0;
    }

    /// The buffered PDUs, in write order.
    #[inline]
    pub fn as_slice(&self) -> &[Pdu] {
        &self.pdus
    }
}

impl PduStream for BufferStream {
    fn read(&mut self) -> Option<Pdu> {
        let pdu = self.pdus.get(self.cursor).cloned();
        if pdu.is_some() {
            self.cursor += 1;
        }
        pdu
    }

    fn write(&mut self, pdu: Pdu) -> usize {
        let len = pdu.payload.len();
        self.pdus.push(pdu);
        len
    }

    fn seek(&mut self, pos: usize, op: StreamSeek) -> usize {
        self.cursor = match op {
            StreamSeek::Set => pos.min(self.pdus.len()),
            StreamSeek::Cur => (self.cursor + pos).min(self.pdus.len()),
            StreamSeek::End => self.pdus.len(),
            StreamSeek::Reset => {
                self.pdus.clear();
                0
            }
        };
        self.cursor
    }

    fn tell(&self) -> usize {
        self.cursor
    }

    fn eof(&self) -> bool {
        self.cursor >= self.pdus.len()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pdu(id: u32) -> Pdu {
        Pdu {
            id,
            ..Default::default()
        }
    }

    #[test]
    fn write_then_read_in_order() {
        let mut stream = BufferStream::new();
        stream.write(pdu(1));
        stream.write(pdu(2));
        assert_eq!(stream.read().map(|p| p.id), Some(1));
        assert_eq!(stream.read().map(|p| p.id), Some(2));
        assert_eq!(stream.read(), None);
        assert!(stream.eof());
    }

    #[test]
    fn write_returns_payload_length() {
        let mut stream = BufferStream::new();
        let mut p = pdu(1);
        p.payload = vec![0u8; 11];
        assert_eq!(stream.write(p), 11);
    }

    #[test]
    fn seek_set_rewinds_for_re_reading() {
        let mut stream = BufferStream::new();
        stream.write(pdu(1));
        stream.read();
        stream.seek(0, StreamSeek::Set);
        assert_eq!(stream.tell(), 0);
        assert_eq!(stream.read().map(|p| p.id), Some(1));
    }

    #[test]
    fn seek_reset_discards_content() {
        let mut stream = BufferStream::new();
        stream.write(pdu(1));
        stream.seek(0, StreamSeek::Reset);
        assert!(stream.is_empty());
        assert_eq!(stream.read(), None);
    }

    #[test]
    fn seek_end_and_cur() {
        let mut stream = BufferStream::new();
        stream.write(pdu(1));
        stream.write(pdu(2));
        assert_eq!(stream.seek(0, StreamSeek::End), 2);
        stream.seek(0, StreamSeek::Set);
        assert_eq!(stream.seek(1, StreamSeek::Cur), 1);
        assert_eq!(stream.read().map(|p| p.id), Some(2));
    }
}
