/// Deterministic queue of cancellable deferred events.
///
/// Nothing here reads a clock: callers schedule events at absolute deadlines and drain the ones
/// that are due by passing the current time to [`TimerQueue::pop_due`]. Cancelling an entry
/// removes it, so a cancelled event is never returned.
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

/// Handle to a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
pub struct TimerQueue<E> {
    next_id: u64,
    // Keyed by (deadline, id) so equal deadlines fire in scheduling order.
    queue: BTreeMap<(DateTime<Utc>, TimerId), E>,
    deadlines: HashMap<TimerId, DateTime<Utc>>,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: DateTime<Utc>, event: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.queue.insert((at, id), event);
        self.deadlines.insert(id, at);
        id
    }

    /// Cancel a pending event, returning it. Cancelling an event that already fired or was
    /// already cancelled is a no-op.
    pub fn cancel(&mut self, id: TimerId) -> Option<E> {
        let at = self.deadlines.remove(&id)?;
        self.queue.remove(&(at, id))
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn deadline(&self, id: TimerId) -> Option<DateTime<Utc>> {
        self.deadlines.get(&id).copied()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return the earliest event whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, TimerId, E)> {
        let (&(at, id), _) = self.queue.first_key_value()?;
        if at > now {
            return None;
        }
        self.deadlines.remove(&id);
        self.queue.remove(&(at, id)).map(|event| (at, id, event))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Cancel everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.deadlines.clear();
    }
}
