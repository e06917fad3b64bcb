//! Cycle inputs: where motors get their work from.
//!
//! An input hands out disjoint [`CycleSegment`]s of a requested stride to
//! any number of motors. Returning `None` signals permanent exhaustion,
//! which sends the requesting motor to `Finished`.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::segment::CycleSegment;

/// Producer of cycle segments, shared by all motors of an activity.
pub trait CycleInput: Send + Sync {
    /// Claim the next segment of up to `stride` cycles, or `None` once the
    /// input is permanently exhausted.
    fn next_segment(&self, stride: usize) -> Option<CycleSegment>;

    /// Optional startup hook.
    fn start(&self) {}

    /// Cooperative stop: stop issuing new segments as soon as possible.
    /// Segments already handed out are unaffected.
    fn request_stop(&self) {}
}

// ─── Interval Input ─────────────────────────────────────────────────

/// Contiguous `[first, end)` cycle source. Segment claims are a single
/// fetch-add, so any number of motors can pull from it concurrently and
/// each cycle is issued exactly once.
#[derive(Debug)]
pub struct IntervalInput {
    next: AtomicI64,
    end: AtomicI64,
}

impl IntervalInput {
    /// Input producing the cycles `[first, end)`.
    pub fn new(first: i64, end: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
            end: AtomicI64::new(end.max(first)),
        }
    }

    /// Input producing `count` cycles starting at zero.
    pub fn with_count(count: i64) -> Self {
        Self::new(0, count)
    }

    /// Cycles not yet claimed by any motor.
    pub fn remaining(&self) -> i64 {
        (self.end.load(Ordering::Relaxed) - self.next.load(Ordering::Relaxed)).max(0)
    }
}

impl CycleInput for IntervalInput {
    fn next_segment(&self, stride: usize) -> Option<CycleSegment> {
        let stride = stride.max(1) as i64;
        let first = self.next.fetch_add(stride, Ordering::Relaxed);
        let end = self.end.load(Ordering::Relaxed);
        if first >= end {
            return None;
        }
        Some(CycleSegment::span(first, (first + stride).min(end)))
    }

    fn request_stop(&self) {
        // Cut the range at the claim frontier; in-flight segments drain
        // normally, nothing new is issued.
        let frontier = self.next.load(Ordering::Relaxed);
        self.end.fetch_min(frontier, Ordering::Relaxed);
        tracing::debug!(frontier, "interval input stopped");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn segments_partition_the_range() {
        let input = IntervalInput::new(0, 10);
        let a = input.next_segment(4).unwrap();
        let b = input.next_segment(4).unwrap();
        let c = input.next_segment(4).unwrap();
        assert_eq!(a.clone().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(b.clone().collect::<Vec<_>>(), vec![4, 5, 6, 7]);
        // Tail segment is clipped to the range end.
        assert_eq!(c.clone().collect::<Vec<_>>(), vec![8, 9]);
        assert!(input.next_segment(4).is_none());
    }

    #[test]
    fn concurrent_claims_are_disjoint_and_complete() {
        let input = Arc::new(IntervalInput::with_count(10_000));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let input = Arc::clone(&input);
            handles.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(seg) = input.next_segment(17) {
                    seen.extend(seg);
                }
                seen
            }));
        }
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), 10_000);
        let unique: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(unique.len(), 10_000);
        all.sort_unstable();
        assert_eq!(all[0], 0);
        assert_eq!(all[9_999], 9_999);
    }

    #[test]
    fn request_stop_cuts_the_range() {
        let input = IntervalInput::with_count(1_000_000);
        let seg = input.next_segment(10).unwrap();
        input.request_stop();
        assert!(input.next_segment(10).is_none());
        // The in-flight segment still drains.
        assert_eq!(seg.count(), 10);
    }
}
