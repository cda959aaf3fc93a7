//! Deadline queue for protocol timers.
//!
//! Protocol state machines never sleep. They park work here with a due
//! instant and the event loop calls back when the earliest one passes.
//! Dropping or clearing the queue cancels everything at once.

use std::time::Instant;

#[derive(Debug)]
pub struct Scheduler<T> {
    next_seq: u64,
    entries: Vec<Entry<T>>,
}

#[derive(Debug)]
struct Entry<T> {
    due: Instant,
    seq: u64,
    item: T,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            entries: Vec::new(),
        }
    }

    pub fn schedule(&mut self, due: Instant, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry { due, seq, item });
    }

    /// Removes and returns every item due at or before `now`, earliest first.
    /// Items sharing a deadline come out in scheduling order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<T> {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|entry| entry.due <= now);
        self.entries = pending;

        due.sort_by_key(|entry| (entry.due, entry.seq));
        due.into_iter().map(|entry| entry.item).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.due).min()
    }

    /// Drops every item matching `predicate`.
    pub fn cancel_where<F: FnMut(&T) -> bool>(&mut self, mut predicate: F) {
        self.entries.retain(|entry| !predicate(&entry.item));
    }

    pub fn contains<F: FnMut(&T) -> bool>(&self, mut predicate: F) -> bool {
        self.entries.iter().any(|entry| predicate(&entry.item))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_due_orders_by_deadline_then_insertion() {
        let start = Instant::now();
        let mut timers = Scheduler::new();
        timers.schedule(start + Duration::from_millis(200), "c");
        timers.schedule(start + Duration::from_millis(100), "a");
        timers.schedule(start + Duration::from_millis(100), "b");
        timers.schedule(start + Duration::from_millis(300), "d");

        assert_eq!(timers.pop_due(start + Duration::from_millis(250)), vec!["a", "b", "c"]);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_millis(300)));
    }

    #[test]
    fn test_nothing_due_before_deadline() {
        let start = Instant::now();
        let mut timers = Scheduler::new();
        timers.schedule(start + Duration::from_secs(1), 1);

        assert!(timers.pop_due(start).is_empty());
        assert_eq!(timers.pop_due(start + Duration::from_secs(1)), vec![1]);
        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_cancel_where() {
        let start = Instant::now();
        let mut timers = Scheduler::new();
        for i in 0..6 {
            timers.schedule(start, i);
        }
        timers.cancel_where(|i| i % 2 == 0);

        assert!(timers.contains(|i| *i == 3));
        assert!(!timers.contains(|i| *i == 4));
        assert_eq!(timers.pop_due(start), vec![1, 3, 5]);
    }

    #[test]
    fn test_clear_cancels_everything() {
        let start = Instant::now();
        let mut timers = Scheduler::new();
        timers.schedule(start, "heartbeat");
        timers.schedule(start, "countdown");
        timers.clear();

        assert!(timers.pop_due(start + Duration::from_secs(60)).is_empty());
    }
}
