//! Fixed pool of shared raster slots
//!
//! A pre-negotiated set of RGBA buffers, one tier per tile size, lets
//! workers hand tile pixels to the main context without an allocation per
//! tile. Each slot is single-writer (the rendering worker) and
//! single-reader (the main context copies out before releasing). Release is
//! tied to guard drop so it happens on every path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::tile::TILE_SIZES;

/// Default number of slots per tile-size tier.
pub const DEFAULT_SLOTS_PER_TIER: usize = 8;

/// Reference to one slot: `(tier, index)` as negotiated at init.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub tier: usize,
    pub index: usize,
}

struct Slot {
    buf: Mutex<Vec<u8>>,
    in_use: AtomicBool,
}

/// The negotiated slot pool, shared by the main context and every worker.
pub struct RasterSlots {
    tiers: Vec<Vec<Slot>>,
}

impl RasterSlots {
    #[must_use]
    pub fn new(slots_per_tier: usize) -> Arc<Self> {
        let tiers = TILE_SIZES
            .iter()
            .map(|&size| {
                let bytes = (size * size * 4) as usize;
                (0..slots_per_tier)
                    .map(|_| Slot {
                        buf: Mutex::new(vec![0u8; bytes]),
                        in_use: AtomicBool::new(false),
                    })
                    .collect()
            })
            .collect();
        Arc::new(Self { tiers })
    }

    /// Tier index serving `tile_size`, if it is a negotiated size.
    #[must_use]
    pub fn tier_for(tile_size: u32) -> Option<usize> {
        TILE_SIZES.iter().position(|&s| s == tile_size)
    }

    /// Acquire a free slot for `tile_size`; `None` when the tier is full.
    #[must_use]
    pub fn acquire(self: &Arc<Self>, tile_size: u32) -> Option<SlotGuard> {
        let tier = Self::tier_for(tile_size)?;
        for (index, slot) in self.tiers[tier].iter().enumerate() {
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(SlotGuard {
                    pool: Arc::clone(self),
                    slot: SlotRef { tier, index },
                });
            }
        }
        None
    }

    /// Worker-side write. Returns false when the data exceeds the slot.
    pub fn write(&self, slot: SlotRef, data: &[u8]) -> bool {
        let Some(buf) = self.slot_buf(slot) else {
            return false;
        };
        let mut buf = buf.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if data.len() > buf.len() {
            return false;
        }
        buf[..data.len()].copy_from_slice(data);
        true
    }

    /// Main-side copy-out of the first `len` bytes.
    #[must_use]
    pub fn copy_out(&self, slot: SlotRef, len: usize) -> Vec<u8> {
        let Some(buf) = self.slot_buf(slot) else {
            return Vec::new();
        };
        let buf = buf.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        buf[..len.min(buf.len())].to_vec()
    }

    fn slot_buf(&self, slot: SlotRef) -> Option<&Mutex<Vec<u8>>> {
        self.tiers
            .get(slot.tier)
            .and_then(|tier| tier.get(slot.index))
            .map(|s| &s.buf)
    }

    fn release(&self, slot: SlotRef) {
        if let Some(tier) = self.tiers.get(slot.tier) {
            if let Some(s) = tier.get(slot.index) {
                s.in_use.store(false, Ordering::Release);
            }
        }
    }

    #[must_use]
    pub fn slots_per_tier(&self) -> usize {
        self.tiers.first().map_or(0, Vec::len)
    }
}

/// Scoped slot ownership; dropping the guard releases the slot.
pub struct SlotGuard {
    pool: Arc<RasterSlots>,
    slot: SlotRef,
}

impl SlotGuard {
    #[must_use]
    pub fn slot(&self) -> SlotRef {
        self.slot
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_cycle() {
        let pool = RasterSlots::new(1);
        let guard = pool.acquire(256).expect("slot free");
        assert!(pool.acquire(256).is_none(), "tier exhausted");
        drop(guard);
        assert!(pool.acquire(256).is_some(), "released on drop");
    }

    #[test]
    fn tiers_are_independent() {
        let pool = RasterSlots::new(1);
        let _small = pool.acquire(128).unwrap();
        assert!(pool.acquire(256).is_some());
        assert!(pool.acquire(512).is_some());
        assert!(pool.acquire(64).is_none(), "unnegotiated size");
    }

    #[test]
    fn write_then_copy_out() {
        let pool = RasterSlots::new(2);
        let guard = pool.acquire(128).unwrap();
        let data = vec![7u8; 100];
        assert!(pool.write(guard.slot(), &data));
        assert_eq!(pool.copy_out(guard.slot(), 100), data);
    }

    #[test]
    fn oversized_write_is_refused() {
        let pool = RasterSlots::new(1);
        let guard = pool.acquire(128).unwrap();
        let too_big = vec![0u8; (128 * 128 * 4) + 1];
        assert!(!pool.write(guard.slot(), &too_big));
    }
}
