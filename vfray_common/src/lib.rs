//! vfray Common Library
//!
//! Shared types for the vfray workspace: the packed FlexRay node
//! identifier, the PDU wire model, cluster and LPDU configuration,
//! and the bus-model error taxonomy.
//!
//! # Module Structure
//!
//! - [`node`] - Packed node identifier (ecu:cc:swc)
//! - [`pdu`] - PDU model and FlexRay protocol enums
//! - [`config`] - Cluster and LPDU (frame table) configuration
//! - [`error`] - Bus-model error taxonomy
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! vfray = { package = "vfray_common", path = "../vfray_common" }
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod pdu;
pub mod prelude;
