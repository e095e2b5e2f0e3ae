use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{error::TaskError, future::Future};

struct Inner<T> {
    items: VecDeque<T>,
    waiter: Option<Future<T>>,
}

/// FIFO whose consumer side hands out futures.
///
/// Producers on any thread [`enqueue`](Self::enqueue); the consumer, usually a task, calls
/// [`dequeue`](Self::dequeue) and waits on the returned future. An item that arrives while a
/// dequeue is outstanding goes straight to that future instead of the buffer.
///
/// Only one dequeue may be outstanding at a time.
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                waiter: None,
            }),
        }
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> BlockingQueue<T> {
    pub fn enqueue(&self, item: T) {
        let completion = {
            let mut inner = self.inner.lock();
            let Some(waiter) = inner.waiter.take() else {
                inner.items.push_back(item);
                return;
            };
            // A waiter only exists while the buffer is empty, so resolving it here under our
            // lock keeps items in arrival order.
            match waiter.try_complete_deferred(item) {
                Ok(completion) => completion,
                Err(item) => {
                    tracing::trace!("dequeue waiter was abandoned, buffering item");
                    inner.items.push_back(item);
                    return;
                }
            }
        };

        // The waiter's callbacks must not run under our lock.
        completion.run();
    }

    /// Returns a future for the next item. It is already completed if an item is buffered.
    ///
    /// Fails with [`TaskError::OperationPending`] while an earlier dequeue is still waiting.
    /// A waiter that was disposed no longer counts.
    pub fn dequeue(&self) -> Result<Future<T>, TaskError> {
        let mut inner = self.inner.lock();
        if let Some(item) = inner.items.pop_front() {
            return Ok(Future::completed(item));
        }
        if let Some(waiter) = &inner.waiter {
            if !waiter.is_disposed() && !waiter.is_resolved() {
                return Err(TaskError::OperationPending);
            }
        }

        let future = Future::new();
        inner.waiter = Some(future.clone());
        Ok(future)
    }
}

impl<T> std::fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BlockingQueue")
            .field("buffered", &inner.items.len())
            .field("waiting", &inner.waiter.is_some())
            .finish()
    }
}
