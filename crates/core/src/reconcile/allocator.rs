//! Numeric identifier allocation.
//!
//! The target directory has no autoincrement for `uidNumber`, so each pass
//! scans the identifiers already in use and hands out values above the
//! highest one. Nothing is persisted between passes: the directory itself is
//! the record of what has been allocated.

use std::collections::BTreeSet;

/// First identifier handed out when the target has no numeric accounts.
pub const DEFAULT_FLOOR: u32 = 10000;

/// Cursor over the identifiers still free in the current pass.
///
/// Yields strictly increasing values, so no two draws from one pool collide.
/// Iteration ends only if the `u32` space is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierPool {
    cursor: Option<u32>,
}

impl IdentifierPool {
    /// Start above every UID/GID in `snapshot`, or at [`DEFAULT_FLOOR`] when
    /// the snapshot is empty.
    pub fn initialize(snapshot: &BTreeSet<u32>) -> Self {
        Self::with_floor(snapshot, DEFAULT_FLOOR)
    }

    /// Like [`initialize`](Self::initialize) with a custom starting value for
    /// an empty directory.
    pub fn with_floor(snapshot: &BTreeSet<u32>, floor: u32) -> Self {
        let cursor = match snapshot.last() {
            Some(&max) => max.checked_add(1),
            None => Some(floor),
        };
        Self { cursor }
    }

    /// The identifier the next draw will return, without consuming it.
    pub fn peek(&self) -> Option<u32> {
        self.cursor
    }
}

impl Iterator for IdentifierPool {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.cursor?;
        self.cursor = current.checked_add(1);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_starts_at_floor() {
        let mut pool = IdentifierPool::initialize(&BTreeSet::new());
        assert_eq!(pool.next(), Some(10000));
        assert_eq!(pool.next(), Some(10001));
    }

    #[test]
    fn test_continues_after_highest_value() {
        let snapshot: BTreeSet<u32> = [10005, 10012, 9000].into_iter().collect();
        let mut pool = IdentifierPool::initialize(&snapshot);
        assert_eq!(pool.next(), Some(10013));
    }

    #[test]
    fn test_floor_only_applies_to_empty_snapshot() {
        let snapshot: BTreeSet<u32> = [500].into_iter().collect();
        let mut pool = IdentifierPool::with_floor(&snapshot, 20000);
        assert_eq!(pool.next(), Some(501));

        let mut pool = IdentifierPool::with_floor(&BTreeSet::new(), 20000);
        assert_eq!(pool.next(), Some(20000));
    }

    #[test]
    fn test_draws_are_distinct() {
        let snapshot: BTreeSet<u32> = [10000].into_iter().collect();
        let drawn: Vec<u32> = IdentifierPool::initialize(&snapshot).take(50).collect();
        let unique: BTreeSet<u32> = drawn.iter().copied().collect();
        assert_eq!(unique.len(), 50);
        assert!(drawn.iter().all(|&id| id > 10000));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut pool = IdentifierPool::initialize(&BTreeSet::new());
        assert_eq!(pool.peek(), Some(10000));
        assert_eq!(pool.next(), Some(10000));
        assert_eq!(pool.peek(), Some(10001));
    }

    #[test]
    fn test_exhaustion_at_u32_max() {
        let snapshot: BTreeSet<u32> = [u32::MAX - 1].into_iter().collect();
        let mut pool = IdentifierPool::initialize(&snapshot);
        assert_eq!(pool.next(), Some(u32::MAX));
        assert_eq!(pool.next(), None);

        let full: BTreeSet<u32> = [u32::MAX].into_iter().collect();
        assert_eq!(IdentifierPool::initialize(&full).next(), None);
    }
}
