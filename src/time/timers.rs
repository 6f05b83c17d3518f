//! Pending timers ordered by deadline.

use super::TimerCallback;
use crate::types::{Time, TimerId};
use std::collections::{BTreeMap, HashMap};

/// Timers keyed by `(deadline, id)`: equal deadlines fire in scheduling
/// order.
#[derive(Default)]
pub(super) struct TimerQueue {
    by_deadline: BTreeMap<(Time, TimerId), TimerCallback>,
    deadlines: HashMap<TimerId, Time>,
    next_id: u64,
}

impl TimerQueue {
    pub(super) fn insert(&mut self, deadline: Time, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.by_deadline.insert((deadline, id), callback);
        self.deadlines.insert(id, deadline);
        id
    }

    pub(super) fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.by_deadline.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    pub(super) fn next_deadline(&self) -> Option<Time> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Takes the earliest timer if it is due at `now`.
    pub(super) fn pop_due(&mut self, now: Time) -> Option<TimerCallback> {
        let (&(deadline, id), _) = self.by_deadline.iter().next()?;
        if deadline > now {
            return None;
        }
        self.deadlines.remove(&id);
        self.by_deadline.remove(&(deadline, id))
    }

    pub(super) fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub(super) fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, tag: u32) -> TimerCallback {
        let log = Arc::clone(log);
        Box::new(move || log.lock().push(tag))
    }

    #[test]
    fn due_timers_pop_in_deadline_then_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TimerQueue::default();
        queue.insert(Time::from_millis(20), recorder(&log, 1));
        queue.insert(Time::from_millis(10), recorder(&log, 2));
        queue.insert(Time::from_millis(10), recorder(&log, 3));
        assert_eq!(queue.next_deadline(), Some(Time::from_millis(10)));

        while let Some(callback) = queue.pop_due(Time::from_millis(15)) {
            callback();
        }
        assert_eq!(*log.lock(), vec![2, 3]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = TimerQueue::default();
        let id = queue.insert(Time::from_millis(5), recorder(&log, 1));
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(queue.pop_due(Time::MAX).is_none());
        assert!(log.lock().is_empty());
    }
}
