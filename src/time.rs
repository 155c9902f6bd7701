//! Virtual time for the lab runtime.
//!
//! [`Time`] is a nanosecond instant on the lab runtime's virtual clock;
//! [`TimerHeap`] is a min-heap of deadline/waker pairs with a generation
//! tie-break so same-deadline timers fire in insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::task::Waker;
use std::time::Duration;

/// A point on the virtual clock, in nanoseconds since runtime start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The clock origin.
    pub const ZERO: Self = Self(0);

    /// Creates a time from nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Creates a time from seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// Nanoseconds since the origin.
    #[must_use]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Whole milliseconds since the origin.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Advances by a duration, saturating at the numeric range.
    #[must_use]
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

#[derive(Debug)]
struct TimerEntry {
    deadline: Time,
    generation: u64,
    waker: Waker,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by deadline, then insertion.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Registers a waker to fire at `deadline`.
    pub(crate) fn insert(&mut self, deadline: Time, waker: Waker) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
            waker,
        });
    }

    /// Returns the earliest deadline, if any.
    pub(crate) fn peek_deadline(&self) -> Option<Time> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pops all wakers whose deadline is `<= now`, in deadline then
    /// insertion order.
    pub(crate) fn pop_expired(&mut self, now: Time) -> Vec<Waker> {
        let mut expired = Vec::new();
        while self.heap.peek().is_some_and(|e| e.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                expired.push(entry.waker);
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Waker;

    #[test]
    fn time_conversions() {
        assert_eq!(Time::from_millis(3).as_nanos(), 3_000_000);
        assert_eq!(Time::from_secs(2).as_millis(), 2_000);
        assert_eq!(
            Time::ZERO.saturating_add(Duration::from_millis(5)),
            Time::from_millis(5)
        );
    }

    #[test]
    fn empty_heap_has_no_deadline() {
        let heap = TimerHeap::new();
        assert!(heap.is_empty());
        assert_eq!(heap.peek_deadline(), None);
    }

    #[test]
    fn earliest_deadline_is_kept_at_the_top() {
        let mut heap = TimerHeap::new();
        heap.insert(Time::from_millis(200), Waker::noop().clone());
        heap.insert(Time::from_millis(100), Waker::noop().clone());
        heap.insert(Time::from_millis(150), Waker::noop().clone());
        assert_eq!(heap.peek_deadline(), Some(Time::from_millis(100)));
    }

    #[test]
    fn pop_expired_includes_exact_deadline() {
        let mut heap = TimerHeap::new();
        heap.insert(Time::from_millis(100), Waker::noop().clone());
        heap.insert(Time::from_millis(200), Waker::noop().clone());

        let expired = heap.pop_expired(Time::from_millis(100));
        assert_eq!(expired.len(), 1);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.peek_deadline(), Some(Time::from_millis(200)));
    }
}
