//! Core tracker: concurrent, ordered progress marking over a cycle range.
//!
//! A ring of extents covers a sliding window of `[min, max)`. Producers
//! mark per-cycle results in any order; consumers receive them strictly in
//! cycle order, each cycle exactly once. The ring applies backpressure in
//! both directions: `mark_result` blocks while its cycle lies beyond the
//! resident window, and `get_segment` blocks until enough contiguous
//! results exist.
//!
//! The write frontier advances at extent granularity: an extent becomes
//! readable only once every slot in it is marked, and only behind a fully
//! marked prefix of older extents. After `flush()` the marked prefix of
//! the frontier extent drains too, so residual cycles reach the consumer
//! at shutdown.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use flywheel_common::error::ConfigError;

use crate::segment::CycleResultSegment;
use crate::tracker::TrackerError;
use crate::tracker::extent::TrackerExtent;

// ─── Core Tracker ───────────────────────────────────────────────────

/// Segment-oriented progress marker over `[min, max)`.
pub struct CoreTracker {
    min: i64,
    max: i64,
    extent_size: usize,
    extent_count: usize,
    ring: Mutex<RingState>,
    /// Signaled when the consumer retires an extent (writers wait here).
    space: Condvar,
    /// Signaled when the write frontier advances (consumers wait here).
    ready: Condvar,
}

#[derive(Debug)]
struct RingState {
    /// Resident extents, oldest first. Covers a contiguous window.
    extents: VecDeque<TrackerExtent>,
    /// Base of the next extent to allocate; `max` once the range is covered.
    next_alloc: i64,
    /// Next cycle the consumer will see.
    read_cursor: i64,
    finished: bool,
}

impl CoreTracker {
    /// Tracker over `[min, max)` with `extent_count` resident extents of
    /// `extent_size` cycles (the final extent is shortened to fit `max`).
    pub fn new(
        min: i64,
        max: i64,
        extent_size: usize,
        extent_count: usize,
    ) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidTrackerRange {
                reason: format!("min {min} exceeds max {max}"),
            });
        }
        if extent_size == 0 || extent_count == 0 {
            return Err(ConfigError::InvalidTrackerRange {
                reason: format!(
                    "extent_size {extent_size} and extent_count {extent_count} must be positive"
                ),
            });
        }

        let tracker = Self {
            min,
            max,
            extent_size,
            extent_count,
            ring: Mutex::new(RingState {
                extents: VecDeque::with_capacity(extent_count),
                next_alloc: min,
                read_cursor: min,
                finished: false,
            }),
            space: Condvar::new(),
            ready: Condvar::new(),
        };
        tracker.fill_ring(&mut tracker.ring.lock());
        Ok(tracker)
    }

    /// Tracked range.
    #[inline]
    pub fn range(&self) -> (i64, i64) {
        (self.min, self.max)
    }

    /// Record the result for `cycle`, blocking while the cycle lies beyond
    /// the resident window.
    ///
    /// Cycles outside `[min, max)` are rejected, as are cycles marked twice
    /// or already retired by the consumer. Results are clamped to byte
    /// range.
    pub fn mark_result(&self, cycle: i64, result: i32) -> Result<(), TrackerError> {
        if cycle < self.min || cycle >= self.max {
            return Err(TrackerError::CycleOutOfBounds {
                cycle,
                min: self.min,
                max: self.max,
            });
        }
        let byte = result.clamp(0, u8::MAX as i32) as u8;

        let mut ring = self.ring.lock();
        loop {
            {
                let state = &mut *ring;
                let window_base = state
                    .extents
                    .front()
                    .map_or(state.next_alloc, TrackerExtent::base);
                if cycle < window_base {
                    return Err(TrackerError::CycleRetired(cycle));
                }
                if let Some(extent) = state.extents.iter_mut().find(|e| e.contains(cycle)) {
                    extent.mark(cycle, byte)?;
                    if extent.is_full() || state.finished {
                        self.ready.notify_all();
                    }
                    return Ok(());
                }
            }
            // Beyond the window: the ring is full awaiting drain.
            self.space.wait(&mut ring);
        }
    }

    /// Extract the next `size` results in cycle order, blocking until they
    /// are contiguously marked.
    ///
    /// Once the tracker is flushed, a shorter tail segment may be returned.
    /// Returns `None` when the range (or, after a flush, the marked
    /// residue) is fully drained.
    pub fn get_segment(&self, size: usize) -> Option<CycleResultSegment> {
        let size = size.max(1);
        let mut ring = self.ring.lock();
        loop {
            if ring.read_cursor >= self.max {
                return None;
            }
            let limit = self.contiguous_limit(&ring);
            let available = (limit - ring.read_cursor) as usize;
            if available >= size {
                return Some(self.extract(&mut ring, size));
            }
            // A shorter tail is delivered once no more data can arrive:
            // either the stream was flushed or the frontier reached `max`.
            if ring.finished || limit >= self.max {
                if available > 0 {
                    return Some(self.extract(&mut ring, available));
                }
                return None;
            }
            self.ready.wait(&mut ring);
        }
    }

    /// Mark the stream finished so consumers drain residual cycles and
    /// then observe end-of-data.
    ///
    /// Call after producers have quiesced; it does not unblock a producer
    /// still waiting for ring space.
    pub fn flush(&self) {
        let mut ring = self.ring.lock();
        ring.finished = true;
        tracing::debug!(
            read_cursor = ring.read_cursor,
            "tracker flushed, draining residue"
        );
        self.ready.notify_all();
    }

    /// Best-effort: first cycle not yet covered by contiguous marks.
    ///
    /// Racy by design; the value may be stale by the time it is read.
    /// Nothing load-bearing should depend on it.
    pub fn contiguous_mark_point(&self) -> i64 {
        let ring = self.ring.lock();
        let mut limit = ring
            .extents
            .front()
            .map_or(ring.next_alloc, TrackerExtent::base);
        for extent in &ring.extents {
            if extent.is_full() {
                limit = extent.end();
            } else {
                limit = extent.base() + extent.marked_prefix() as i64;
                break;
            }
        }
        limit
    }

    // ─── Internals ──────────────────────────────────────────────────

    /// Cycle below which everything is ready for the consumer.
    fn contiguous_limit(&self, state: &RingState) -> i64 {
        let mut limit = state
            .extents
            .front()
            .map_or(state.next_alloc, TrackerExtent::base);
        for extent in &state.extents {
            if extent.is_full() {
                limit = extent.end();
            } else {
                if state.finished {
                    limit = extent.base() + extent.marked_prefix() as i64;
                }
                break;
            }
        }
        limit
    }

    /// Copy `count` results from the ring head, retiring drained extents.
    ///
    /// Caller has verified `count` cycles are contiguously available.
    fn extract(&self, ring: &mut RingState, count: usize) -> CycleResultSegment {
        let first = ring.read_cursor;
        let mut out = Vec::with_capacity(count);
        let mut remaining = count;

        while remaining > 0 {
            let Some(front) = ring.extents.front() else {
                break;
            };
            let front_end = front.end();
            let take = remaining.min((front_end - ring.read_cursor) as usize);
            front.copy_results(ring.read_cursor, take, &mut out);
            ring.read_cursor += take as i64;
            remaining -= take;

            if ring.read_cursor >= front_end {
                ring.extents.pop_front();
                self.fill_ring(ring);
                self.space.notify_all();
            }
        }

        CycleResultSegment::new(first, out)
    }

    /// Top the ring back up to `extent_count` resident extents.
    fn fill_ring(&self, state: &mut RingState) {
        while state.extents.len() < self.extent_count && state.next_alloc < self.max {
            let len = self
                .extent_size
                .min((self.max - state.next_alloc) as usize);
            state.extents.push_back(TrackerExtent::new(state.next_alloc, len));
            state.next_alloc += len as i64;
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn in_order_mark_and_drain() {
        let tracker = CoreTracker::new(0, 10, 4, 2).unwrap();
        for cycle in 0..4 {
            tracker.mark_result(cycle, cycle as i32).unwrap();
        }
        let seg = tracker.get_segment(4).unwrap();
        assert_eq!(seg.first_cycle, 0);
        assert_eq!(seg.results, vec![0, 1, 2, 3]);
    }

    #[test]
    fn out_of_order_marks_gate_the_frontier() {
        let tracker = Arc::new(CoreTracker::new(0, 8, 4, 2).unwrap());
        // Fill the second extent completely and the first one partially.
        for cycle in 4..8 {
            tracker.mark_result(cycle, 1).unwrap();
        }
        tracker.mark_result(1, 1).unwrap();
        tracker.mark_result(2, 1).unwrap();
        tracker.mark_result(3, 1).unwrap();
        assert_eq!(tracker.contiguous_mark_point(), 0);

        // A consumer must not see anything until cycle 0 lands.
        let consumer = {
            let tracker = Arc::clone(&tracker);
            std::thread::spawn(move || tracker.get_segment(8).unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        tracker.mark_result(0, 7).unwrap();
        let seg = consumer.join().unwrap();
        assert_eq!(seg.first_cycle, 0);
        assert_eq!(seg.results, vec![7, 1, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn writer_blocks_until_consumer_drains() {
        let tracker = Arc::new(CoreTracker::new(0, 100, 10, 2).unwrap());
        // Window covers [0, 20); marking cycle 20 must block.
        for cycle in 0..20 {
            tracker.mark_result(cycle, 0).unwrap();
        }
        let writer = {
            let tracker = Arc::clone(&tracker);
            std::thread::spawn(move || tracker.mark_result(20, 0))
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!writer.is_finished(), "writer should be backpressured");

        // Draining the first extent opens a slot.
        let seg = tracker.get_segment(10).unwrap();
        assert_eq!(seg.first_cycle, 0);
        writer.join().unwrap().unwrap();
    }

    #[test]
    fn rejects_out_of_range_and_double_marks() {
        let tracker = CoreTracker::new(10, 20, 5, 2).unwrap();
        assert!(matches!(
            tracker.mark_result(9, 0),
            Err(TrackerError::CycleOutOfBounds { .. })
        ));
        assert!(matches!(
            tracker.mark_result(20, 0),
            Err(TrackerError::CycleOutOfBounds { .. })
        ));
        tracker.mark_result(10, 0).unwrap();
        assert!(matches!(
            tracker.mark_result(10, 0),
            Err(TrackerError::AlreadyMarked(10))
        ));
    }

    #[test]
    fn results_clamp_to_byte_range() {
        let tracker = CoreTracker::new(0, 2, 2, 1).unwrap();
        tracker.mark_result(0, 500).unwrap();
        tracker.mark_result(1, -3).unwrap();
        let seg = tracker.get_segment(2).unwrap();
        assert_eq!(seg.results, vec![255, 0]);
    }

    #[test]
    fn flush_drains_marked_prefix() {
        let tracker = CoreTracker::new(0, 100, 10, 2).unwrap();
        tracker.mark_result(0, 1).unwrap();
        tracker.mark_result(1, 2).unwrap();
        tracker.flush();
        let seg = tracker.get_segment(10).unwrap();
        assert_eq!(seg.first_cycle, 0);
        assert_eq!(seg.results, vec![1, 2]);
        assert!(tracker.get_segment(1).is_none());
    }

    #[test]
    fn drained_range_reports_end_of_data() {
        let tracker = CoreTracker::new(0, 4, 2, 2).unwrap();
        for cycle in 0..4 {
            tracker.mark_result(cycle, 0).unwrap();
        }
        assert_eq!(tracker.get_segment(4).unwrap().len(), 4);
        assert!(tracker.get_segment(1).is_none());
        // Late marks on retired cycles are rejected.
        assert!(matches!(
            tracker.mark_result(0, 0),
            Err(TrackerError::CycleRetired(0))
        ));
    }

    #[test]
    fn empty_range_is_immediately_drained() {
        let tracker = CoreTracker::new(5, 5, 4, 2).unwrap();
        assert!(tracker.get_segment(1).is_none());
    }

    #[test]
    fn segments_can_span_extents() {
        let tracker = CoreTracker::new(0, 9, 3, 3).unwrap();
        for cycle in 0..9 {
            tracker.mark_result(cycle, cycle as i32).unwrap();
        }
        let seg = tracker.get_segment(7).unwrap();
        assert_eq!(seg.first_cycle, 0);
        assert_eq!(seg.results, vec![0, 1, 2, 3, 4, 5, 6]);
        let tail = tracker.get_segment(7).unwrap();
        assert_eq!(tail.first_cycle, 7);
        assert_eq!(tail.results, vec![7, 8]);
    }
}
