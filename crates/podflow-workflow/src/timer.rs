//! Cancelable deadlines owned by the structure that schedules them.
//!
//! Nothing here spawns tasks: the owner asks for due entries with
//! [`TimerQueue::pop_due`] and sleeps until [`TimerQueue::next_deadline`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Debug)]
pub struct TimerQueue<K> {
    next_id: u64,
    by_deadline: BTreeMap<(Instant, u64), K>,
    deadlines: HashMap<u64, Instant>,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            next_id: 0,
            by_deadline: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<K> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, delay: Duration, key: K) -> TimerHandle {
        self.schedule_at(Instant::now() + delay, key)
    }

    pub fn schedule_at(&mut self, deadline: Instant, key: K) -> TimerHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.by_deadline.insert((deadline, id), key);
        self.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    /// Returns `true` when the timer was still pending.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.deadlines.remove(&handle.0) {
            Some(deadline) => self.by_deadline.remove(&(deadline, handle.0)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.deadlines.contains_key(&handle.0)
    }

    /// Removes and returns the earliest timer whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerHandle, K)> {
        let (&(deadline, id), _) = self.by_deadline.iter().next()?;
        if deadline > now {
            return None;
        }
        let key = self.by_deadline.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        Some((TimerHandle(id), key))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }
}
