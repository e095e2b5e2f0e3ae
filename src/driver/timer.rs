use std::{cmp::Ordering, collections::BinaryHeap, time::Instant};

use slotmap::{new_key_type, SlotMap};

use crate::executor::WorkItem;

new_key_type! {
    /// Key for pending timers
    pub(crate) struct TimerKey;
}

#[derive(Debug, PartialEq, Eq)]
struct Deadline {
    at: Instant,
    /// Insertion order, breaks ties between equal deadlines.
    seq: u64,
    key: TimerKey,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the heap pops the earliest deadline first.
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pending timers ordered by deadline.
///
/// Cancelled timers leave their heap entry behind; it is skipped once it reaches the top.
#[derive(Default)]
pub(crate) struct TimerDriver {
    timers: SlotMap<TimerKey, WorkItem>,
    deadlines: BinaryHeap<Deadline>,
    next_seq: u64,
}

impl TimerDriver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    pub(crate) fn insert(&mut self, at: Instant, item: WorkItem) -> TimerKey {
        let key = self.timers.insert(item);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.deadlines.push(Deadline { at, seq, key });
        key
    }

    pub(crate) fn cancel(&mut self, key: TimerKey) -> bool {
        self.timers.remove(key).is_some()
    }

    /// Removes and returns every timer whose deadline is at or before `now`, earliest first.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<WorkItem> {
        let mut expired = Vec::new();
        while let Some(top) = self.deadlines.peek() {
            if top.at > now {
                break;
            }
            let key = top.key;
            self.deadlines.pop();
            if let Some(item) = self.timers.remove(key) {
                expired.push(item);
            }
        }
        expired
    }

    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(top) = self.deadlines.peek() {
            if self.timers.contains_key(top.key) {
                return Some(top.at);
            }
            self.deadlines.pop();
        }
        None
    }

    pub(crate) fn clear(&mut self) {
        self.timers.clear();
        self.deadlines.clear();
    }
}
