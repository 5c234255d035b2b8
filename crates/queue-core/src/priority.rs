//! C1: bidirectional mapping between symbolic [`Priority`] and the numeric
//! scheduling key the broker sorts on (lower key dispatches first).

use crate::task::Priority;

/// Numeric scheduling key for a priority; lower sorts first.
pub const PRIORITY_MAP: [(Priority, u32); 4] = [
    (Priority::P0, 1),
    (Priority::P1, 5),
    (Priority::P2, 10),
    (Priority::P3, 20),
];

/// Map a symbolic priority to its numeric scheduling key.
pub fn task_priority_to_queue_priority(priority: Priority) -> u32 {
    PRIORITY_MAP
        .iter()
        .find(|(p, _)| *p == priority)
        .map(|(_, key)| *key)
        .expect("PRIORITY_MAP covers every Priority variant")
}

/// Map a numeric scheduling key back to a symbolic priority.
///
/// Uses half-open buckets per spec: `<=1 -> P0`, `<=5 -> P1`, `<=10 -> P2`,
/// else `P3`. This makes the reverse map total over all `u32` inputs, not
/// just the four canonical keys, which is what lets the fallback queue's
/// `{NNN}-*.json` filenames (always one of the four canonical keys) and any
/// future broker-side renumbering both round-trip correctly.
pub fn queue_priority_to_task_priority(key: u32) -> Priority {
    if key <= 1 {
        Priority::P0
    } else if key <= 5 {
        Priority::P1
    } else if key <= 10 {
        Priority::P2
    } else {
        Priority::P3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_is_strictly_increasing_over_p0_to_p3() {
        let keys: Vec<u32> = Priority::ALL
            .iter()
            .map(|p| task_priority_to_queue_priority(*p))
            .collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn round_trip_for_every_canonical_priority() {
        for p in Priority::ALL {
            let key = task_priority_to_queue_priority(p);
            assert_eq!(queue_priority_to_task_priority(key), p);
        }
    }

    #[test]
    fn reverse_map_buckets_are_half_open() {
        assert_eq!(queue_priority_to_task_priority(0), Priority::P0);
        assert_eq!(queue_priority_to_task_priority(1), Priority::P0);
        assert_eq!(queue_priority_to_task_priority(2), Priority::P1);
        assert_eq!(queue_priority_to_task_priority(5), Priority::P1);
        assert_eq!(queue_priority_to_task_priority(6), Priority::P2);
        assert_eq!(queue_priority_to_task_priority(10), Priority::P2);
        assert_eq!(queue_priority_to_task_priority(11), Priority::P3);
        assert_eq!(queue_priority_to_task_priority(1000), Priority::P3);
    }

    #[test]
    fn exact_numeric_keys_match_spec() {
        assert_eq!(task_priority_to_queue_priority(Priority::P0), 1);
        assert_eq!(task_priority_to_queue_priority(Priority::P1), 5);
        assert_eq!(task_priority_to_queue_priority(Priority::P2), 10);
        assert_eq!(task_priority_to_queue_priority(Priority::P3), 20);
    }
}
