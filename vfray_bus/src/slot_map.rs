//! Ordered slot map.
//!
//! Maps `slot_id` to the list of LPDU records configured for that slot.
//! Entries are kept sorted by slot id (lookup is a binary search); the
//! LPDU list within a slot preserves installation order, which fixes the
//! Tx tie-break (first matching Tx wins).

use crate::lpdu::LpduRecord;

/// One slot and its configured LPDUs.
#[derive(Debug, Default)]
pub struct SlotEntry {
    /// Slot identifier.
    pub slot_id: u16,
    /// LPDU records, in installation order.
    pub lpdus: Vec<LpduRecord>,
}

/// Sorted map of slot id to LPDU records.
#[derive(Debug, Default)]
pub struct SlotMap {
    slots: Vec<SlotEntry>,
}

impl SlotMap {
    /// Create an empty slot map.
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of configured slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no slot is configured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Look up a slot.
    pub fn find(&self, slot_id: u16) -> Option<&SlotEntry> {
        self.slots
            .binary_search_by_key(&slot_id, |entry| entry.slot_id)
            .ok()
            .map(|idx| &self.slots[idx])
    }

    /// Look up a slot for mutation.
    pub fn find_mut(&mut self, slot_id: u16) -> Option<&mut SlotEntry> {
        self.slots
            .binary_search_by_key(&slot_id, |entry| entry.slot_id)
            .ok()
            .map(|idx| &mut self.slots[idx])
    }

    /// Look up a slot, creating an empty entry in sorted position when
    /// absent.
    pub fn entry_mut(&mut self, slot_id: u16) -> &mut SlotEntry {
        let idx = match self
            .slots
            .binary_search_by_key(&slot_id, |entry| entry.slot_id)
        {
            Ok(idx) => idx,
            Err(idx) => {
                self.slots.insert(
                    idx,
                    SlotEntry {
                        slot_id,
                        lpdus: Vec::new(),
                    },
                );
                idx
            }
        };
        &mut self.slots[idx]
    }

    /// Iterate slots in ascending slot-id order.
    pub fn iter(&self) -> impl Iterator<Item = &SlotEntry> {
        self.slots.iter()
    }

    /// Drop all slots and their LPDU records (payloads with them).
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vfray::prelude::*;

    fn lpdu(slot_id: u16, index: u16) -> LpduRecord {
        LpduRecord::new(
            NodeId::new(1, 0, 0),
            LpduConfig {
                slot_id,
                frame_table_index: index,
                ..Default::default()
            },
        )
    }

    #[test]
    fn entries_stay_sorted_by_slot_id() {
        let mut map = SlotMap::new();
        for slot_id in [42, 7, 250, 11] {
            map.entry_mut(slot_id).lpdus.push(lpdu(slot_id, 0));
        }
        let order: Vec<u16> = map.iter().map(|entry| entry.slot_id).collect();
        assert_eq!(order, vec![7, 11, 42, 250]);
    }

    #[test]
    fn find_is_by_slot_id() {
        let mut map = SlotMap::new();
        map.entry_mut(7);
        map.entry_mut(39);
        assert!(map.find(7).is_some());
        assert!(map.find(39).is_some());
        assert!(map.find(8).is_none());
    }

    #[test]
    fn lpdus_preserve_installation_order() {
        let mut map = SlotMap::new();
        for index in 0..4 {
            map.entry_mut(11).lpdus.push(lpdu(11, index));
        }
        let entry = map.find(11).unwrap();
        let order: Vec<u16> = entry
            .lpdus
            .iter()
            .map(|lpdu| lpdu.config.frame_table_index)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn entry_mut_reuses_existing_slot() {
        let mut map = SlotMap::new();
        map.entry_mut(7).lpdus.push(lpdu(7, 0));
        map.entry_mut(7).lpdus.push(lpdu(7, 1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.find(7).unwrap().lpdus.len(), 2);
    }
}
