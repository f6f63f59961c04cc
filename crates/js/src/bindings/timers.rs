//! Host-side timer queue backing `setTimeout` / `setInterval`.
//!
//! Scripts keep the callbacks; the host only tracks `(deadline, id)` pairs so
//! the event loop knows when to wake up and which id to fire next.

use core::cmp::Reverse;
use core::time::Duration;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

/// Ordered timer deadlines keyed by script-allocated ids.
#[derive(Debug, Default)]
pub struct TimerQueue {
    /// Min-heap on `(deadline, sequence)`; the sequence keeps equal deadlines FIFO.
    heap: BinaryHeap<Reverse<(Instant, u64, u64)>>,
    /// Ids that are scheduled and not cancelled. Heap entries for other ids are stale.
    live: HashSet<u64>,
    sequence: u64,
}

impl TimerQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `id` to fire `delay` after `now`. Rescheduling an id replaces it.
    pub fn schedule(&mut self, id: u64, delay: Duration, now: Instant) {
        self.discard(id);
        self.sequence = self.sequence.wrapping_add(1);
        self.heap
            .push(Reverse((now.checked_add(delay).unwrap_or(now), self.sequence, id)));
        self.live.insert(id);
    }

    /// Cancel `id`. Unknown ids are ignored.
    pub fn cancel(&mut self, id: u64) {
        self.live.remove(&id);
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True when no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.drop_stale();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Remove and return the earliest timer whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<u64> {
        self.drop_stale();
        let Reverse((deadline, _, id)) = *self.heap.peek()?;
        if deadline > now {
            return None;
        }
        self.heap.pop();
        self.live.remove(&id);
        Some(id)
    }

    fn drop_stale(&mut self) {
        while let Some(Reverse((_, _, id))) = self.heap.peek() {
            if self.live.contains(id) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Drop every heap entry for `id`, including stale ones left by `cancel`.
    fn discard(&mut self, id: u64) {
        self.heap.retain(|Reverse((_, _, entry))| *entry != id);
        self.live.remove(&id);
    }
}

/// Convert a script-provided delay into a duration (negative and NaN clamp to zero).
pub(crate) fn delay_from_millis(millis: f64) -> Duration {
    if millis.is_finite() && millis > 0.0 {
        Duration::from_secs_f64(millis / 1000.0)
    } else if millis.is_infinite() && millis > 0.0 {
        Duration::from_secs(u64::from(u32::MAX))
    } else {
        Duration::ZERO
    }
}
