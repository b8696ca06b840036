//! Revision-interval arithmetic for row lifetimes.
//!
//! Every versioned row carries a lifetime `[rev_min, rev_max]` (inclusive)
//! denoting the revisions for which that row version is current. Processors
//! that synthesize or reconcile rows work in terms of interval intersection
//! and the shrink-or-delete rule for overlapping assignments.

use serde::{Deserialize, Serialize};

/// Revision number within one history line.
pub type Revision = i64;

/// `rev_max` sentinel of a row version that is still current.
pub const CURRENT_REV: Revision = i64::MAX;

/// Inclusive revision interval `[rev_min, rev_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lifetime {
    /// First revision in which this row version is current.
    pub rev_min: Revision,

    /// Last revision in which this row version is current.
    pub rev_max: Revision,
}

impl Lifetime {
    /// Create a lifetime. `rev_min` must not exceed `rev_max`.
    pub fn new(rev_min: Revision, rev_max: Revision) -> Self {
        debug_assert!(rev_min <= rev_max, "inverted lifetime [{rev_min},{rev_max}]");
        Self { rev_min, rev_max }
    }

    /// Lifetime of a row that is current since `rev_min`.
    pub fn since(rev_min: Revision) -> Self {
        Self::new(rev_min, CURRENT_REV)
    }

    /// True iff the two intervals share at least one revision.
    pub fn intersects(&self, other: &Lifetime) -> bool {
        self.rev_min <= other.rev_max && self.rev_max >= other.rev_min
    }

    /// Intersection of two intervals, or `None` when they do not intersect.
    pub fn intersection(&self, other: &Lifetime) -> Option<Lifetime> {
        if !self.intersects(other) {
            return None;
        }
        Some(Lifetime::new(
            self.rev_min.max(other.rev_min),
            self.rev_max.min(other.rev_max),
        ))
    }

    /// True iff `rev` falls inside this interval.
    pub fn contains(&self, rev: Revision) -> bool {
        self.rev_min <= rev && rev <= self.rev_max
    }

    /// True iff `other` lies entirely inside this interval.
    pub fn covers(&self, other: &Lifetime) -> bool {
        self.rev_min <= other.rev_min && other.rev_max <= self.rev_max
    }
}

impl std::fmt::Display for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.rev_max == CURRENT_REV {
            write!(f, "[{},current]", self.rev_min)
        } else {
            write!(f, "[{},{}]", self.rev_min, self.rev_max)
        }
    }
}

/// Resolution for a row that repeats an assignment already seen in the same
/// `(branch, owner)` group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapAction {
    /// The row does not overlap the previously covered range; keep it as is.
    Keep,

    /// The row partially overlaps; raise its `rev_min` to the given revision.
    Shrink(Revision),

    /// The row is entirely covered by the previously seen range; delete it.
    Delete,
}

/// Shrink-or-delete rule for duplicate time-sliced assignments.
///
/// Rows must be visited in ascending `rev_min` order per `(branch, owner)`
/// group. `last_max` is the highest `rev_max` seen so far for the same value
/// identity. The earlier-starting assignment always wins; a later row is
/// either deleted (fully covered) or shrunk to start just after the covered
/// range.
pub fn resolve_overlap(last_max: Revision, row: Lifetime) -> OverlapAction {
    if row.rev_min > last_max {
        OverlapAction::Keep
    } else if row.rev_max <= last_max {
        OverlapAction::Delete
    } else {
        OverlapAction::Shrink(last_max + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersects_symmetry() {
        let cases = [
            (Lifetime::new(1, 5), Lifetime::new(3, 8)),
            (Lifetime::new(1, 5), Lifetime::new(6, 8)),
            (Lifetime::new(1, 5), Lifetime::new(5, 5)),
            (Lifetime::new(2, 2), Lifetime::new(1, 10)),
            (Lifetime::since(7), Lifetime::new(1, 6)),
        ];
        for (a, b) in cases {
            assert_eq!(a.intersects(&b), b.intersects(&a), "{a} vs {b}");
            assert_eq!(a.intersection(&b), b.intersection(&a), "{a} vs {b}");
        }
    }

    #[test]
    fn test_intersection_bounds() {
        let a = Lifetime::new(1, 10);
        let b = Lifetime::new(5, 20);
        assert_eq!(a.intersection(&b), Some(Lifetime::new(5, 10)));

        let c = Lifetime::new(11, 20);
        assert!(a.intersection(&c).is_none());

        // Touching intervals share exactly one revision.
        let d = Lifetime::new(10, 12);
        assert_eq!(a.intersection(&d), Some(Lifetime::new(10, 10)));
    }

    #[test]
    fn test_covers_and_contains() {
        let a = Lifetime::new(2, 9);
        assert!(a.contains(2));
        assert!(a.contains(9));
        assert!(!a.contains(10));
        assert!(a.covers(&Lifetime::new(3, 9)));
        assert!(!a.covers(&Lifetime::new(1, 4)));
    }

    #[test]
    fn test_resolve_overlap_keep() {
        assert_eq!(
            resolve_overlap(5, Lifetime::new(6, 8)),
            OverlapAction::Keep
        );
    }

    #[test]
    fn test_resolve_overlap_shrink() {
        // Spec scenario: [1,5] seen, [3,8] arrives -> shrink to [6,8].
        assert_eq!(
            resolve_overlap(5, Lifetime::new(3, 8)),
            OverlapAction::Shrink(6)
        );
    }

    #[test]
    fn test_resolve_overlap_delete() {
        assert_eq!(
            resolve_overlap(8, Lifetime::new(3, 8)),
            OverlapAction::Delete
        );
        assert_eq!(
            resolve_overlap(8, Lifetime::new(3, 5)),
            OverlapAction::Delete
        );
    }
}
