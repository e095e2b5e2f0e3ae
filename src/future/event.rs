use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::TaskError;

#[derive(Debug, Default)]
struct EventState {
    set: bool,
    interrupted: bool,
}

/// Manual-reset event for threads that live outside the scheduler.
///
/// Once [`set`](Self::set) the event stays signalled until [`reset`](Self::reset). A future hands
/// one of these out as its completion event; worker threads block on one between batches of
/// work. [`interrupt`](Self::interrupt) releases every waiter permanently with
/// [`TaskError::Interrupted`].
#[derive(Debug, Default)]
pub struct ResetEvent {
    state: Mutex<EventState>,
    cond: Condvar,
}

impl ResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut state = self.state.lock();
        state.set = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        self.state.lock().set = false;
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().set
    }

    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.cond.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.lock().interrupted
    }

    /// Blocks until the event is set.
    pub fn wait(&self) -> Result<(), TaskError> {
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return Err(TaskError::Interrupted);
            }
            if state.set {
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }

    /// Blocks until the event is set or `timeout` elapses. Returns whether the event was set.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, TaskError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.interrupted {
                return Err(TaskError::Interrupted);
            }
            if state.set {
                return Ok(true);
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return Ok(state.set);
            }
        }
    }
}
