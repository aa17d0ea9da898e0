//! Packed FlexRay node identifier.
//!
//! A cluster member is addressed by the triple `(ecu_id, cc_id, swc_id)`,
//! packed into a single `u64` key. Equality and ordering are on the packed
//! key, which makes the identifier directly usable as a sort key in the
//! node-state table and the PoP router. Node id `0` is reserved for the
//! PoP / routing node.

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;

/// Packed node identifier `(ecu_id, cc_id, swc_id)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u64);

// The identifier must stay a plain 8-byte key (wire contract).
assert_eq_size!(NodeId, u64);

impl NodeId {
    /// The PoP / routing node (all fields zero).
    pub const POP: Self = Self(0);

    /// Pack an identifier from its parts.
    #[inline]
    pub const fn new(ecu_id: u8, cc_id: u8, swc_id: u8) -> Self {
        Self((ecu_id as u64) | ((cc_id as u64) << 8) | ((swc_id as u64) << 16))
    }

    /// ECU identifier.
    #[inline]
    pub const fn ecu_id(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// Communication-controller identifier.
    #[inline]
    pub const fn cc_id(self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    /// Software-component identifier.
    #[inline]
    pub const fn swc_id(self) -> u8 {
        ((self.0 >> 16) & 0xff) as u8
    }

    /// The packed 64-bit key.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Rebuild an identifier from a packed key.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// True for the reserved PoP / routing node.
    #[inline]
    pub const fn is_pop(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}:{}:{})", self.ecu_id(), self.cc_id(), self.swc_id())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
