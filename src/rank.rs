//! Review-priority ordering.
//!
//! Lower priority means more urgent attention. The sort is stable, so rows
//! with equal priority keep their upstream pagination order.

use std::collections::BTreeSet;

use crate::audit::QualityFlag;
use crate::classify::SpeLabel;

/// Priority bucket for one establishment.
pub fn priority(
    classification: SpeLabel,
    flags: &BTreeSet<QualityFlag>,
    has_declaration: bool,
) -> u8 {
    match classification {
        SpeLabel::ConfirmedOutOfScope => 0,
        SpeLabel::NeedsReview => 1,
        SpeLabel::ConfirmedInScope => {
            if !flags.is_empty() {
                2
            } else if !has_declaration {
                3
            } else {
                4
            }
        }
    }
}

/// Sort items by ascending priority, preserving input order within a bucket.
pub fn rank_by<T>(items: &mut [T], key: impl Fn(&T) -> u8) {
    items.sort_by_key(|item| key(item));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_buckets() {
        let none = BTreeSet::new();
        let flagged = BTreeSet::from([QualityFlag::MissingSiret]);
        assert_eq!(priority(SpeLabel::ConfirmedOutOfScope, &none, true), 0);
        assert_eq!(priority(SpeLabel::NeedsReview, &none, true), 1);
        assert_eq!(priority(SpeLabel::ConfirmedInScope, &flagged, true), 2);
        assert_eq!(priority(SpeLabel::ConfirmedInScope, &none, false), 3);
        assert_eq!(priority(SpeLabel::ConfirmedInScope, &none, true), 4);
    }

    #[test]
    fn test_rank_is_stable_within_buckets() {
        // (name, priority) pairs; equal priorities must keep input order.
        let mut items = vec![("a", 4), ("b", 1), ("c", 4), ("d", 1), ("e", 2)];
        rank_by(&mut items, |(_, p)| *p as u8);
        let names: Vec<&str> = items.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["b", "d", "e", "a", "c"]);
    }
}
