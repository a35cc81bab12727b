//! Dirty tracking with redundant resend
//!
//! A tracker is either `Clean` or `Dirty(k)`, where `k` is the number of sync
//! passes still owed. Any change reloads `k` from the configured redundancy so
//! that a node which missed a frame still picks the change up from one of the
//! repeats. There is no acknowledgement path from nodes.

/// Observable tracker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Clean,
    Dirty(u32),
}

#[derive(Debug, Clone)]
pub struct SyncTracker {
    redundancy: u32,
    sync_iteration: u32,
    core_iteration: u32,
}

impl SyncTracker {
    /// Create a clean tracker
    pub fn new(redundancy: u32) -> Self {
        Self {
            redundancy: redundancy.max(1),
            sync_iteration: 0,
            core_iteration: 0,
        }
    }

    /// Create a tracker that owes a full send, core fields included
    pub fn new_dirty(redundancy: u32) -> Self {
        let mut tracker = Self::new(redundancy);
        tracker.mark_core();
        tracker
    }

    /// A replicated field changed
    pub fn mark(&mut self) {
        self.sync_iteration = self.redundancy;
    }

    /// A core (identity/placement) field changed
    pub fn mark_core(&mut self) {
        self.core_iteration = self.redundancy;
        self.sync_iteration = self.redundancy;
    }

    pub fn need_sync(&self) -> bool {
        self.sync_iteration > 0
    }

    pub fn sync_iteration(&self) -> u32 {
        self.sync_iteration
    }

    /// Whether core fields are still owed to the nodes
    pub fn core_pending(&self) -> bool {
        self.core_iteration > 0
    }

    pub fn state(&self) -> SyncState {
        match self.sync_iteration {
            0 => SyncState::Clean,
            k => SyncState::Dirty(k),
        }
    }

    /// Record that one sync pass went out
    pub fn complete_pass(&mut self) {
        self.sync_iteration = self.sync_iteration.saturating_sub(1);
        self.core_iteration = self.core_iteration.saturating_sub(1);
    }

    pub fn clear(&mut self) {
        self.sync_iteration = 0;
        self.core_iteration = 0;
    }

    pub fn redundancy(&self) -> u32 {
        self.redundancy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_for_exactly_redundancy_passes() {
        let mut tracker = SyncTracker::new(3);
        assert_eq!(tracker.state(), SyncState::Clean);

        tracker.mark();
        for remaining in (1..=3).rev() {
            assert!(tracker.need_sync());
            assert_eq!(tracker.sync_iteration(), remaining);
            tracker.complete_pass();
        }
        assert!(!tracker.need_sync());
        assert_eq!(tracker.sync_iteration(), 0);
        assert_eq!(tracker.state(), SyncState::Clean);
    }

    #[test]
    fn test_newest_change_resets_counter() {
        let mut tracker = SyncTracker::new(3);
        tracker.mark();
        tracker.complete_pass();
        tracker.complete_pass();
        assert_eq!(tracker.state(), SyncState::Dirty(1));

        tracker.mark();
        assert_eq!(tracker.state(), SyncState::Dirty(3));
    }

    #[test]
    fn test_core_follows_its_own_countdown() {
        let mut tracker = SyncTracker::new(2);
        tracker.mark_core();
        tracker.complete_pass();
        tracker.mark();
        assert!(tracker.core_pending());
        tracker.complete_pass();
        assert!(!tracker.core_pending());
        assert!(tracker.need_sync());
    }

    #[test]
    fn test_zero_redundancy_is_clamped() {
        let tracker = SyncTracker::new_dirty(0);
        assert_eq!(tracker.redundancy(), 1);
        assert_eq!(tracker.state(), SyncState::Dirty(1));
    }
}
