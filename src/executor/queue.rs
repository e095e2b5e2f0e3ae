use std::{collections::VecDeque, mem, time::Instant};

use parking_lot::{Condvar, Mutex};

use super::WorkItem;

pub(crate) const DEFAULT_TASK_QUEUE_SIZE: usize = 4096;

struct Inner {
    items: VecDeque<WorkItem>,
    /// Set by `notify`, consumed by `park`, so a wake-up that lands before the scheduler parks is
    /// not lost.
    signalled: bool,
}

/// Multi-producer, single-consumer run queue.
///
/// Any thread may push; only the scheduler's own thread pops and parks.
pub(super) struct WorkQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub(crate) fn new() -> Self {
        Self::new_with_capacity(DEFAULT_TASK_QUEUE_SIZE)
    }

    pub(crate) fn new_with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                signalled: false,
            }),
            available: Condvar::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&self, item: WorkItem) {
        let mut inner = self.inner.lock();
        inner.items.push_back(item);
        self.available.notify_one();
    }

    pub(crate) fn pop(&self) -> Option<WorkItem> {
        self.inner.lock().items.pop_front()
    }

    /// Wakes a parked consumer without queueing anything.
    pub(crate) fn notify(&self) {
        let mut inner = self.inner.lock();
        inner.signalled = true;
        self.available.notify_one();
    }

    /// Blocks until an item is queued, `notify` is called, or `deadline` passes.
    pub(crate) fn park(&self, deadline: Option<Instant>) {
        let mut inner = self.inner.lock();
        while inner.items.is_empty() && !inner.signalled {
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
                None => self.available.wait(&mut inner),
            }
        }
        inner.signalled = false;
    }

    /// Drops every queued item without running it. Returns how many were dropped.
    pub(crate) fn clear(&self) -> usize {
        let items = mem::take(&mut self.inner.lock().items);
        items.len()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    use super::WorkQueue;

    #[test]
    fn fifo_across_producers() {
        let queue = Arc::new(WorkQueue::new_with_capacity(8));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        let seen = seen.clone();
                        queue.push(Box::new(move || seen.lock().push((p, i))));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(queue.len(), 100);
        while let Some(item) = queue.pop() {
            item();
        }

        let seen = seen.lock();
        for p in 0..4 {
            let order: Vec<_> = seen.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
            assert_eq!(order, (0..25).collect::<Vec<_>>());
        }
    }

    #[test]
    fn park_returns_on_notify_or_deadline() {
        let queue = Arc::new(WorkQueue::new());
        let start = Instant::now();
        queue.park(Some(start + Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(10));

        queue.notify();
        queue.park(None);

        let pusher = queue.clone();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            pusher.push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        });
        queue.park(None);
        handle.join().unwrap();
        queue.pop().unwrap()();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }
}
