//! Render sequences and their integrity map
//!
//! A sequence is the set of tile requests produced by one coordinator
//! evaluation of the viewport. It records requested vs completed tiles,
//! drives retry of drops, and is supersedable as a unit.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::tile::{TileCoord, TileKey};
use crate::worker::SequenceId;

/// Retry tuning for dropped tiles.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Attempts per tile beyond the initial request.
    pub max_retries: u32,
    /// Back-off base; attempt `n` waits `base · 2^n`.
    pub base_backoff: Duration,
    /// Inactivity window after which a sequence finalises with holes.
    pub inactivity: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
            inactivity: Duration::from_secs(5),
        }
    }
}

/// A tile re-request produced at sequence finalisation.
#[derive(Clone, Copy, Debug)]
pub struct Retry {
    pub coord: TileCoord,
    /// Earliest dispatch time, exponential in the attempt count.
    pub due: Instant,
}

/// One render sequence's lifecycle and integrity map.
pub struct RenderSequence {
    pub id: SequenceId,
    pub scale: f32,
    requested: HashMap<TileKey, TileCoord>,
    completed: HashSet<TileKey>,
    responded: HashSet<TileKey>,
    attempts: HashMap<TileKey, u32>,
    superseded: bool,
    last_activity: Instant,
    total_retries: u32,
    retry_budget: u32,
    policy: RetryPolicy,
}

impl RenderSequence {
    #[must_use]
    pub fn new(
        id: SequenceId,
        scale: f32,
        tiles: impl IntoIterator<Item = (TileKey, TileCoord)>,
        policy: RetryPolicy,
        now: Instant,
    ) -> Self {
        let requested: HashMap<TileKey, TileCoord> = tiles.into_iter().collect();
        // Bounded total retries per sequence: twice the requested set, with
        // a floor so single-tile sequences still get their full attempts.
        let retry_budget = (requested.len() as u32)
            .saturating_mul(2)
            .max(policy.max_retries);
        Self {
            id,
            scale,
            requested,
            completed: HashSet::new(),
            responded: HashSet::new(),
            attempts: HashMap::new(),
            superseded: false,
            last_activity: now,
            total_retries: 0,
            retry_budget,
            policy,
        }
    }

    #[must_use]
    pub fn requested_len(&self) -> usize {
        self.requested.len()
    }

    #[must_use]
    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    /// Record a successful tile; returns false for tiles of other sequences.
    pub fn mark_completed(&mut self, key: &TileKey, now: Instant) -> bool {
        if !self.requested.contains_key(key) {
            return false;
        }
        self.last_activity = now;
        self.responded.insert(key.clone());
        self.completed.insert(key.clone())
    }

    /// Record a failed tile response.
    pub fn mark_failed(&mut self, key: &TileKey, now: Instant) {
        if self.requested.contains_key(key) {
            self.last_activity = now;
            self.responded.insert(key.clone());
        }
    }

    pub fn supersede(&mut self) {
        self.superseded = true;
    }

    #[must_use]
    pub fn is_superseded(&self) -> bool {
        self.superseded
    }

    /// Every requested tile completed successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.requested.len()
    }

    /// Requested tiles with no successful completion yet.
    #[must_use]
    pub fn missing(&self) -> Vec<(TileKey, TileCoord)> {
        self.requested
            .iter()
            .filter(|(key, _)| !self.completed.contains(*key))
            .map(|(key, coord)| (key.clone(), *coord))
            .collect()
    }

    /// Sequence is finalisable: all responses in, or the inactivity window
    /// elapsed.
    #[must_use]
    pub fn ready_to_finalize(&self, now: Instant) -> bool {
        if self.superseded || self.is_complete() {
            return false;
        }
        self.responded.len() >= self.requested.len()
            || now.duration_since(self.last_activity) >= self.policy.inactivity
    }

    /// Take the re-requests due after finalisation.
    ///
    /// Each missing tile gets another attempt up to `max_retries`, with
    /// exponential back-off and the per-sequence retry budget enforced.
    /// Taken tiles count as in-flight again until their next response.
    pub fn take_retries(&mut self, now: Instant) -> Vec<Retry> {
        if self.superseded {
            return Vec::new();
        }
        let mut retries = Vec::new();
        for (key, coord) in self.missing() {
            if self.total_retries >= self.retry_budget {
                break;
            }
            let attempt = self.attempts.entry(key.clone()).or_insert(0);
            if *attempt >= self.policy.max_retries {
                continue;
            }
            *attempt += 1;
            self.total_retries += 1;
            let backoff = self.policy.base_backoff * 2u32.pow(*attempt);
            self.responded.remove(&key);
            retries.push(Retry {
                coord,
                due: now + backoff,
            });
        }
        if !retries.is_empty() {
            self.last_activity = now;
        }
        retries
    }

    /// Nothing further will happen: complete, superseded, or retries
    /// exhausted with every response in.
    #[must_use]
    pub fn is_settled(&self, now: Instant) -> bool {
        if self.superseded || self.is_complete() {
            return true;
        }
        let retriable = self.missing().iter().any(|(key, _)| {
            self.attempts.get(key).copied().unwrap_or(0) < self.policy.max_retries
                && self.total_retries < self.retry_budget
        });
        !retriable && self.ready_to_finalize(now)
    }
}
