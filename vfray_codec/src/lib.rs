//! vfray Codec Frontend
//!
//! The surface through which a simulation environment drives a node's
//! bus model: `open` a codec on a MIME type and a stream, `write` PDUs
//! towards the bus, `flush` them, and `read` back this node's step
//! output (Status first, then the transfers). The binary wire format
//! lives behind the [`stream::PduStream`] abstraction and is not part
//! of this crate.
//!
//! # Module Structure
//!
//! - [`mime`] - MIME-type configuration parsing
//! - [`stream`] - PDU stream abstraction and in-memory buffer stream
//! - [`codec`] - The codec surface owning the bus model

pub mod codec;
pub mod mime;
pub mod stream;

use thiserror::Error;

pub use codec::PduCodec;
pub use mime::{MimeConfig, MimeError};
pub use stream::{BufferStream, PduStream, SharedStream, StreamSeek};

/// Errors raised by the codec surface.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The MIME type could not be parsed or selects an unsupported
    /// codec.
    #[error("invalid MIME type: {0}")]
    Mime(#[from] MimeError),

    /// The PDU does not carry a transport this codec encodes.
    #[error("unsupported transport for this codec")]
    UnsupportedTransport,

    /// Bus-model error (configuration errors surface through consume).
    #[error(transparent)]
    Model(#[from] vfray::error::ModelError),
}

/// Initialize tracing for tests and examples.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
