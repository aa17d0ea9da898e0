//! Error taxonomy for the bus models.

use thiserror::Error;

/// Errors raised by the bus-model layer.
///
/// Configuration errors are returned to the caller and logged at error
/// level. Runtime per-slot conditions (a mis-shaped LPDU, budget
/// exhaustion) are never raised as errors; they are logged and skipped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelError {
    /// Unsupported bit rate or missing mandatory configuration field.
    #[error("configuration rejected: {reason}")]
    ConfigRejected {
        /// What was rejected.
        reason: &'static str,
    },

    /// Merge-discipline violation between configuration reports.
    #[error("configuration mismatch on field: {field}")]
    ConfigMismatch {
        /// First field that disagreed with the stored value.
        field: &'static str,
    },

    /// Operation requires configuration fields that are not yet populated.
    #[error("engine not configured: {field}")]
    NotConfigured {
        /// Missing field.
        field: &'static str,
    },

    /// Slot or LPDU not present in the slot map.
    #[error("LPDU not found: slot_id={slot_id}, frame_table_index={index}")]
    NotFound {
        /// Requested slot.
        slot_id: u16,
        /// Requested frame-table index.
        index: u16,
    },

    /// Malformed argument (unconfigured step size, cycle out of range).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Cycle shift requested in the dynamic segment without `force`;
    /// callers may retry once the schedule is back in the static segment.
    #[error("cycle shift refused in dynamic segment")]
    ShiftRefused,
}

/// Result type for bus-model operations.
pub type ModelResult<T> = Result<T, ModelError>;
