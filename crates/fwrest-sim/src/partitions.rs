//! Two-slot boot partition table

use fwrest_core::{CoreError, CoreResult, FlashRegion, PartitionSlot, PartitionTable};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BootState {
    active: usize,
    /// Slot and image length to boot next
    pending: Option<(usize, u32)>,
}

/// A/B firmware slots; updates always go to the slot not currently booted
#[derive(Debug)]
pub struct AbPartitions {
    slots: [FlashRegion; 2],
    state: Mutex<BootState>,
}

impl AbPartitions {
    pub fn new(slots: [FlashRegion; 2], active: usize) -> CoreResult<Self> {
        if active > 1 {
            return Err(CoreError::Parse(format!("active slot {} out of range", active)));
        }
        let [a, b] = slots;
        if (a.start as u64) < b.end() && (b.start as u64) < a.end() {
            return Err(CoreError::Bounds(format!(
                "partition slots overlap: 0x{:06X}+0x{:X} and 0x{:06X}+0x{:X}",
                a.start, a.len, b.start, b.len
            )));
        }
        Ok(Self {
            slots,
            state: Mutex::new(BootState {
                active,
                pending: None,
            }),
        })
    }

    /// Slot booted right now
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Slot and image length selected for the next boot
    pub fn pending(&self) -> Option<(usize, u32)> {
        self.state.lock().pending
    }

    /// Boot into the pending slot, as a reset would
    pub fn reboot(&self) {
        let mut state = self.state.lock();
        if let Some((slot, len)) = state.pending.take() {
            tracing::info!(slot, image_len = len, "booting updated slot");
            state.active = slot;
        }
    }
}

impl PartitionTable for AbPartitions {
    fn inactive_slot(&self) -> CoreResult<PartitionSlot> {
        let index = 1 - self.state.lock().active;
        let region = self.slots[index];
        Ok(PartitionSlot {
            index,
            start: region.start,
            max_len: region.len,
        })
    }

    fn activate(&self, slot: &PartitionSlot, image_len: u32) -> CoreResult<()> {
        let mut state = self.state.lock();
        if slot.index > 1 || slot.index == state.active {
            return Err(CoreError::Unsupported(format!(
                "slot {} cannot be activated while slot {} is booted",
                slot.index, state.active
            )));
        }
        if image_len > self.slots[slot.index].len {
            return Err(CoreError::Bounds(format!(
                "{} byte image exceeds slot {} ({} bytes)",
                image_len, slot.index, self.slots[slot.index].len
            )));
        }
        state.pending = Some((slot.index, image_len));
        tracing::info!(slot = slot.index, image_len, "boot slot switched");
        Ok(())
    }
}
