use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::{error::TaskError, future::ResetEvent};

/// How long [`WorkerThread::dispose`] waits for the thread to notice the interrupt.
pub const DEFAULT_JOIN_PATIENCE: Duration = Duration::from_millis(10);

/// The loop a worker thread runs: it owns the work container's reader side and waits on the
/// wake event between batches. Returning `Err(TaskError::Interrupted)` is the normal way out.
pub type WorkerFn<C> = Box<dyn FnOnce(&C, &ResetEvent) -> Result<(), TaskError> + Send>;

enum ThreadState<C> {
    /// Not started; holds the loop until the first wake.
    Idle(WorkerFn<C>),
    Running(JoinHandle<()>),
    /// Disposed, or handed off; never started again.
    Retired,
}

/// A dedicated OS thread, started lazily, that drains a shared work container.
///
/// Producers push into [`work`](Self::work) and call [`wake`](Self::wake). The thread is spawned
/// on the first wake and is never recreated; once disposed, further wakes only set the event.
pub struct WorkerThread<C> {
    name: String,
    work: Arc<C>,
    wake: Arc<ResetEvent>,
    patience: Duration,
    stack_size: Option<usize>,
    state: Mutex<ThreadState<C>>,
}

impl<C> WorkerThread<C>
where
    C: Send + Sync + 'static,
{
    pub fn new<F>(name: impl Into<String>, work: C, func: F) -> Self
    where
        F: FnOnce(&C, &ResetEvent) -> Result<(), TaskError> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Arc::new(work),
            wake: Arc::new(ResetEvent::new()),
            patience: DEFAULT_JOIN_PATIENCE,
            stack_size: None,
            state: Mutex::new(ThreadState::Idle(Box::new(func))),
        }
    }

    pub fn with_patience(mut self, patience: Duration) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn work(&self) -> &C {
        &self.work
    }

    pub fn is_running(&self) -> bool {
        match &*self.state.lock() {
            ThreadState::Running(handle) => !handle.is_finished(),
            _ => false,
        }
    }

    /// Signals that work is available, spawning the thread on the first call. If the spawn
    /// fails the worker stays idle and the next wake tries again.
    pub fn wake(&self) -> Result<(), TaskError> {
        self.wake.set();

        let mut state = self.state.lock();
        let func = match std::mem::replace(&mut *state, ThreadState::Retired) {
            ThreadState::Idle(func) => func,
            other => {
                *state = other;
                return Ok(());
            }
        };

        // The builder drops its closure on failure, so the loop travels through a slot we can
        // take it back from.
        let slot = Arc::new(Mutex::new(Some(func)));
        let theirs = slot.clone();
        let name = self.name.clone();
        let work = self.work.clone();
        let wake = self.wake.clone();
        let mut builder = thread::Builder::new().name(self.name.clone());
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        let spawned = builder.spawn(move || {
            let Some(func) = theirs.lock().take() else {
                return;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| func(&*work, &*wake))) {
                Ok(Ok(())) | Ok(Err(TaskError::Interrupted)) => {
                    tracing::debug!(worker = %name, "worker thread exiting")
                }
                Ok(Err(err)) => log::error!("worker thread {} failed: {}", name, err),
                Err(payload) => log::error!(
                    "worker thread {} panicked: {}",
                    name,
                    TaskError::from_panic(payload)
                ),
            }
        });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                log::error!("failed to spawn worker thread {}: {}", self.name, err);
                if let Some(func) = slot.lock().take() {
                    *state = ThreadState::Idle(func);
                }
                return Err(err.into());
            }
        };

        tracing::debug!(worker = %self.name, "worker thread spawned");
        *state = ThreadState::Running(handle);
        Ok(())
    }
}

impl<C> WorkerThread<C> {
    /// Interrupts the thread and waits up to the join patience for it to exit. A thread that
    /// does not exit in time is left to finish on its own.
    pub fn dispose(&self) {
        let handle = match std::mem::replace(&mut *self.state.lock(), ThreadState::Retired) {
            ThreadState::Running(handle) => handle,
            ThreadState::Idle(_) | ThreadState::Retired => return,
        };
        self.wake.interrupt();

        let deadline = Instant::now() + self.patience;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                log::warn!("worker thread {} panicked while exiting", self.name);
            }
        } else {
            tracing::warn!(
                worker = %self.name,
                patience = ?self.patience,
                "worker thread did not exit in time, abandoning it"
            );
        }
    }
}

impl<C> Drop for WorkerThread<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<C> std::fmt::Debug for WorkerThread<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            ThreadState::Idle(_) => "idle",
            ThreadState::Running(_) => "running",
            ThreadState::Retired => "retired",
        };
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("state", &state)
            .finish()
    }
}
