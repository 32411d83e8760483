//! Prefetch strategies: linear neighbours and spatial grid ripple

use std::collections::VecDeque;

use crate::worker::Priority;

/// Queue cap for outstanding prefetches.
pub const MAX_PREFETCH_QUEUE_SIZE: usize = 6;

/// A jump farther than this rebuilds the queue from the new centre.
pub const PREFETCH_JUMP_RESET: usize = 10;

/// Linear ±radius prefetch around the current item.
#[derive(Debug, Default)]
pub struct LinearPrefetcher {
    center: Option<usize>,
    queue: VecDeque<usize>,
}

impl LinearPrefetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the queue for a new current item. Small moves keep the
    /// existing queue; jumps past the reset threshold clear it first.
    pub fn retarget(&mut self, current: usize, total: usize, radius: usize) {
        if let Some(center) = self.center {
            if center == current {
                return;
            }
            if current.abs_diff(center) > PREFETCH_JUMP_RESET {
                self.queue.clear();
            }
        }
        self.center = Some(current);

        // Alternate forward/backward so near items come first
        for offset in 1..=radius {
            if self.queue.len() >= MAX_PREFETCH_QUEUE_SIZE {
                break;
            }
            let forward = current + offset;
            if forward < total && !self.queue.contains(&forward) {
                self.queue.push_back(forward);
            }
            if self.queue.len() >= MAX_PREFETCH_QUEUE_SIZE {
                break;
            }
            if offset <= current {
                let backward = current - offset;
                if !self.queue.contains(&backward) {
                    self.queue.push_back(backward);
                }
            }
        }
        while self.queue.len() > MAX_PREFETCH_QUEUE_SIZE {
            self.queue.pop_back();
        }
    }

    /// Next item to prefetch, if any.
    pub fn pop(&mut self) -> Option<usize> {
        self.queue.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.center = None;
    }
}

/// Manhattan-distance ripple around a centre item in an N-column grid.
///
/// Returns items within `radius`, closest ring first, with closer rings
/// promoted above the default prefetch priority.
#[must_use]
pub fn spatial_ripple(
    center: usize,
    columns: usize,
    total: usize,
    radius: usize,
) -> Vec<(usize, Priority)> {
    let columns = columns.max(1);
    let center_row = (center / columns) as i64;
    let center_col = (center % columns) as i64;

    let mut out = Vec::new();
    for distance in 1..=radius as i64 {
        let priority = match distance {
            1 => Priority::High,
            2 => Priority::Medium,
            _ => Priority::Low,
        };
        for dr in -distance..=distance {
            let dc = distance - dr.abs();
            for dc in if dc == 0 { vec![0] } else { vec![-dc, dc] } {
                let row = center_row + dr;
                let col = center_col + dc;
                if row < 0 || col < 0 || col >= columns as i64 {
                    continue;
                }
                let item = (row * columns as i64 + col) as usize;
                if item < total && item != center {
                    out.push((item, priority));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retarget_orders_near_items_first() {
        let mut prefetcher = LinearPrefetcher::new();
        prefetcher.retarget(10, 100, 6);

        let items: Vec<usize> = std::iter::from_fn(|| prefetcher.pop()).collect();
        assert_eq!(items, vec![11, 9, 12, 8, 13, 7]);
    }

    #[test]
    fn queue_respects_cap_and_bounds() {
        let mut prefetcher = LinearPrefetcher::new();
        prefetcher.retarget(0, 3, 10);
        let items: Vec<usize> = std::iter::from_fn(|| prefetcher.pop()).collect();
        // Nothing below item 0, nothing past the document end
        assert_eq!(items, vec![1, 2]);

        prefetcher.retarget(50, 1000, 50);
        assert!(prefetcher.len() <= MAX_PREFETCH_QUEUE_SIZE);
    }

    #[test]
    fn long_jump_clears_stale_queue() {
        let mut prefetcher = LinearPrefetcher::new();
        prefetcher.retarget(10, 100, 4);
        assert!(!prefetcher.is_empty());

        prefetcher.retarget(50, 100, 4);
        let items: Vec<usize> = std::iter::from_fn(|| prefetcher.pop()).collect();
        assert!(items.iter().all(|&i| i.abs_diff(50) <= 4), "{items:?}");
    }

    #[test]
    fn small_move_keeps_queue_growing() {
        let mut prefetcher = LinearPrefetcher::new();
        prefetcher.retarget(10, 100, 2);
        prefetcher.retarget(11, 100, 2);
        let items: Vec<usize> = std::iter::from_fn(|| prefetcher.pop()).collect();
        assert!(items.contains(&12));
    }

    #[test]
    fn ripple_orders_by_ring_and_promotes_near() {
        // 3-column grid, centre at item 4 (row 1, col 1)
        let ripple = spatial_ripple(4, 3, 9, 2);
        let ring1: Vec<usize> = ripple
            .iter()
            .filter(|(_, p)| *p == Priority::High)
            .map(|(i, _)| *i)
            .collect();
        let mut sorted = ring1.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 3, 5, 7]);

        let ring2: Vec<usize> = ripple
            .iter()
            .filter(|(_, p)| *p == Priority::Medium)
            .map(|(i, _)| *i)
            .collect();
        let mut sorted = ring2.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 2, 6, 8]);
    }

    #[test]
    fn ripple_clips_grid_edges() {
        // Centre in the top-left corner of a 2-column grid
        let ripple = spatial_ripple(0, 2, 6, 2);
        assert!(ripple.iter().all(|(i, _)| *i < 6));
        assert!(!ripple.iter().any(|(i, _)| *i == 0));
    }
}
