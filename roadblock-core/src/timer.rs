//! Tick-driven one-shot timers.
//!
//! The queue only moves when its owner calls `advance`, so firing and
//! cancelling happen on the same thread and cannot race.

use std::collections::{BTreeMap, HashMap};

/// Game ticks (20 per second on a healthy server).
pub type Tick = u64;

/// Cancellation token for one scheduled timer.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct TimerHandle(u64);

pub struct TimerQueue<T> {
    now: Tick,
    next_id: u64,
    pending: BTreeMap<(Tick, u64), T>,
    deadlines: HashMap<u64, Tick>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            now: 0,
            next_id: 0,
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    /// Fire `payload` once, `delay` ticks from now.
    pub fn schedule(&mut self, delay: Tick, payload: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let deadline = self.now.saturating_add(delay);
        self.pending.insert((deadline, id), payload);
        self.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    /// Cancel a timer. Cancelling twice, or after it fired, returns `None`.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<T> {
        let deadline = self.deadlines.remove(&handle.0)?;
        self.pending.remove(&(deadline, handle.0))
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.deadlines.contains_key(&handle.0)
    }

    pub fn expires_at(&self, handle: TimerHandle) -> Option<Tick> {
        self.deadlines.get(&handle.0).copied()
    }

    /// Move the clock forward and return the payloads of every timer that
    /// came due, earliest first.
    pub fn advance(&mut self, ticks: Tick) -> Vec<T> {
        self.now = self.now.saturating_add(ticks);
        let mut fired = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            let (deadline, id) = *entry.key();
            if deadline > self.now {
                break;
            }
            fired.push(entry.remove());
            self.deadlines.remove(&id);
        }
        fired
    }

    /// Cancel everything, returning the payloads.
    pub fn drain(&mut self) -> Vec<T> {
        self.deadlines.clear();
        std::mem::take(&mut self.pending).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_deadline_order() {
        let mut timers = TimerQueue::new();
        timers.schedule(10, "late");
        timers.schedule(5, "early");

        assert!(timers.advance(4).is_empty());
        assert_eq!(timers.advance(1), vec!["early"]);
        assert_eq!(timers.advance(100), vec!["late"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut timers = TimerQueue::new();
        let handle = timers.schedule(3, 'a');

        assert_eq!(timers.cancel(handle), Some('a'));
        assert_eq!(timers.cancel(handle), None);
        assert!(timers.advance(10).is_empty());
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let mut timers = TimerQueue::new();
        let handle = timers.schedule(1, 7);
        assert_eq!(timers.advance(1), vec![7]);

        assert!(!timers.is_pending(handle));
        assert_eq!(timers.cancel(handle), None);
    }

    #[test]
    fn test_deadline_is_relative_to_schedule_time() {
        let mut timers = TimerQueue::new();
        timers.advance(40);
        let handle = timers.schedule(20, ());

        assert_eq!(timers.expires_at(handle), Some(60));
        assert_eq!(timers.now(), 40);
    }

    #[test]
    fn test_drain_cancels_everything() {
        let mut timers = TimerQueue::new();
        let a = timers.schedule(1, 1);
        timers.schedule(2, 2);

        let mut drained = timers.drain();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(!timers.is_pending(a));
        assert!(timers.advance(5).is_empty());
    }
}
