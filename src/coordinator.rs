//! Cross-channel combination tracking.
//!
//! The coordinator watches which parts are currently capturing and
//! decides the single moment a combination identification should run:
//! when the last active part finishes, provided at least one part
//! actually completed a stroke since the previous resolution.
//! Resolution is edge-triggered by that last finish, never by a timeout.
//!
//! The coordinator holds only part indices; it never owns or outlives
//! the channels it tracks.

use tracing::debug;

/// What the coordinator decided after a part transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    /// Other parts are still capturing (or nothing completed yet).
    Pending,
    /// The batch just closed: run combination identification now.
    Resolve,
    /// The batch closed with no completed strokes (all cancelled).
    Discard,
}

/// Tracks the set of parts participating in the current combination.
#[derive(Debug)]
pub struct CombinationCoordinator {
    /// Which parts are currently capturing (`true` = active).
    active: Vec<bool>,
    /// Parts that completed a stroke since the last resolution.
    ended: usize,
    /// Whether any part started since the last resolution.
    started: bool,
}

impl CombinationCoordinator {
    pub fn new(parts: usize) -> Self {
        Self {
            active: vec![false; parts],
            ended: 0,
            started: false,
        }
    }

    /// Number of parts currently capturing.
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    /// Whether a batch is open (any start since the last resolution).
    pub fn batch_open(&self) -> bool {
        self.started
    }

    /// A part began capturing.  Parts may start at different real-time
    /// instants while others are mid-stroke; they simply join the batch.
    pub fn note_started(&mut self, part: usize) {
        if let Some(slot) = self.active.get_mut(part) {
            *slot = true;
            self.started = true;
        }
    }

    /// A part completed its stroke.
    pub fn note_ended(&mut self, part: usize) -> BatchDecision {
        if let Some(slot) = self.active.get_mut(part) {
            *slot = false;
        }
        self.ended += 1;
        self.decide()
    }

    /// A part cancelled its stroke.  Local to that part: other parts'
    /// strokes continue untouched, but a cancellation that empties the
    /// batch still closes it.
    pub fn note_cancelled(&mut self, part: usize) -> BatchDecision {
        if let Some(slot) = self.active.get_mut(part) {
            *slot = false;
        }
        self.decide()
    }

    fn decide(&self) -> BatchDecision {
        if !self.started || self.active_count() > 0 {
            BatchDecision::Pending
        } else if self.ended > 0 {
            BatchDecision::Resolve
        } else {
            BatchDecision::Discard
        }
    }

    /// Clear tracking after a resolution (or a discarded batch).
    pub fn reset(&mut self) {
        debug!(ended = self.ended, "combination batch reset");
        self.active.iter_mut().for_each(|a| *a = false);
        self.ended = 0;
        self.started = false;
    }

    /// Resize tracking when the part count changes (model reload).
    /// Any in-flight batch is dropped.
    pub fn resize(&mut self, parts: usize) {
        self.active = vec![false; parts];
        self.ended = 0;
        self.started = false;
    }
}
