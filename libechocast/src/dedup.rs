//! Duplicate detection for fetched items
//!
//! The tracker only lives as long as the process. Nothing is evicted and
//! nothing is written to disk, so a restart starts from an empty set.

use std::collections::HashSet;

use crate::types::ItemId;

/// Tracks ids that have already been handled in this process.
#[derive(Debug, Clone, Default)]
pub struct DedupTracker {
    seen: HashSet<ItemId>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `id` has never been marked seen.
    pub fn is_new(&self, id: ItemId) -> bool {
        !self.seen.contains(&id)
    }

    /// Record `id` as handled.
    pub fn mark_seen(&mut self, id: ItemId) {
        self.seen.insert(id);
    }

    /// Highest id seen so far, used as the `since_id` of the next fetch.
    pub fn watermark(&self) -> Option<ItemId> {
        self.seen.iter().max().copied()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_is_empty() {
        let tracker = DedupTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.watermark(), None);
        assert!(tracker.is_new(ItemId(1)));
    }

    #[test]
    fn test_mark_seen() {
        let mut tracker = DedupTracker::new();
        tracker.mark_seen(ItemId(7));

        assert!(!tracker.is_new(ItemId(7)));
        assert!(tracker.is_new(ItemId(8)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_mark_seen_twice_is_idempotent() {
        let mut tracker = DedupTracker::new();
        tracker.mark_seen(ItemId(7));
        tracker.mark_seen(ItemId(7));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_watermark_is_max_regardless_of_insert_order() {
        let mut tracker = DedupTracker::new();
        for id in [4, 9, 2] {
            tracker.mark_seen(ItemId(id));
        }
        assert_eq!(tracker.watermark(), Some(ItemId(9)));

        // Older ids never move the watermark back
        tracker.mark_seen(ItemId(1));
        assert_eq!(tracker.watermark(), Some(ItemId(9)));
    }
}
