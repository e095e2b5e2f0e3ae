//! Single-assignment result cells
//!
//! A [`Future`] starts out pending and is resolved exactly once, either with a value
//! ([`Future::complete`]) or with an error ([`Future::fail`]). Completion callbacks run in
//! registration order on whichever thread resolves the future, or immediately on the registering
//! thread when the future is already resolved.
//!
//! Disposal is orthogonal to resolution. Disposing a pending future abandons it: pending
//! completion callbacks are dropped, threads blocked on its completion event are released, and a
//! later `complete`/`fail` is accepted but never observed. Disposing a resolved future keeps the
//! recorded value or error.
//!
//! # Error checks
//!
//! Every accessor that can reveal an error ([`failed`](Future::failed), [`error`](Future::error),
//! [`result`](Future::result), [`take_result`](Future::take_result)) advances the future's
//! error-check generation. The task adapter records the generation when a task starts waiting on
//! a future; if the future failed and the generation has not moved by the time the task yields
//! again, nobody looked at the error and the task is aborted with it.

mod combinators;
mod event;
mod waitable;

use std::{
    fmt, mem,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;

use crate::error::TaskError;

pub use combinators::{run_in_thread, wait_for_all, wait_for_first};
pub use event::ResetEvent;
pub use waitable::Waitable;

type Callback<T> = Box<dyn FnOnce(&Future<T>) + Send>;

enum Resolution<T> {
    Pending,
    /// `None` once the value has been moved out by `take_result`.
    Completed(Option<T>),
    Failed(TaskError),
}

struct Inner<T> {
    resolution: Resolution<T>,
    disposed: bool,
    on_complete: Vec<Callback<T>>,
    on_dispose: Vec<Callback<T>>,
    event: Option<Arc<ResetEvent>>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    error_checks: AtomicUsize,
}

/// Shared handle to a single-assignment result cell. Cloning the handle does not copy the cell.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

/// Non-owning handle, see [`Future::downgrade`].
pub struct WeakFuture<T> {
    shared: Weak<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Clone for WeakFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WeakFuture<T> {
    pub fn upgrade(&self) -> Option<Future<T>> {
        self.shared.upgrade().map(|shared| Future { shared })
    }
}

impl<T> Future<T> {
    pub fn new() -> Self {
        Self::with_resolution(Resolution::Pending)
    }

    pub fn completed(value: T) -> Self {
        Self::with_resolution(Resolution::Completed(Some(value)))
    }

    pub fn failed_with(error: TaskError) -> Self {
        Self::with_resolution(Resolution::Failed(error))
    }

    fn with_resolution(resolution: Resolution<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    resolution,
                    disposed: false,
                    on_complete: Vec::new(),
                    on_dispose: Vec::new(),
                    event: None,
                }),
                error_checks: AtomicUsize::new(0),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakFuture<T> {
        WeakFuture {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Whether both handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Future<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Resolves the future with `value` and runs the completion callbacks.
    ///
    /// Fails with [`TaskError::AlreadyCompleted`] if the future was already resolved.
    pub fn complete(&self, value: T) -> Result<(), TaskError> {
        self.resolve(Resolution::Completed(Some(value)))
    }

    /// Resolves the future with `error` and runs the completion callbacks.
    ///
    /// Fails with [`TaskError::AlreadyCompleted`] if the future was already resolved.
    pub fn fail(&self, error: TaskError) -> Result<(), TaskError> {
        self.resolve(Resolution::Failed(error))
    }

    fn resolve(&self, resolution: Resolution<T>) -> Result<(), TaskError> {
        let callbacks = {
            let mut inner = self.shared.inner.lock();
            if !matches!(inner.resolution, Resolution::Pending) {
                return Err(TaskError::AlreadyCompleted);
            }
            if inner.disposed {
                tracing::trace!("dropping resolution of a disposed future");
                return Ok(());
            }
            inner.resolution = resolution;
            if let Some(event) = &inner.event {
                event.set();
            }
            mem::take(&mut inner.on_complete)
        };

        for callback in callbacks {
            callback(self);
        }
        Ok(())
    }

    /// Completes the future unless it is already resolved or disposed, in which case the value is
    /// handed back.
    pub(crate) fn try_complete(&self, value: T) -> Result<(), T> {
        self.try_complete_deferred(value).map(Completion::run)
    }

    /// Like [`try_complete`](Self::try_complete), but the completion callbacks only run once the
    /// returned [`Completion`] is run. Lets a caller resolve the future under its own lock and
    /// notify after releasing it.
    pub(crate) fn try_complete_deferred(&self, value: T) -> Result<Completion<T>, T> {
        let mut inner = self.shared.inner.lock();
        if inner.disposed || !matches!(inner.resolution, Resolution::Pending) {
            return Err(value);
        }
        inner.resolution = Resolution::Completed(Some(value));
        if let Some(event) = &inner.event {
            event.set();
        }
        Ok(Completion {
            future: self.clone(),
            callbacks: mem::take(&mut inner.on_complete),
        })
    }

    /// Runs `callback` when the future resolves. If it already has, `callback` runs before this
    /// call returns.
    pub fn register_on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Future<T>) + Send + 'static,
    {
        {
            let mut inner = self.shared.inner.lock();
            if matches!(inner.resolution, Resolution::Pending) {
                // Disposed pending futures never resolve, so the callback is simply dropped.
                if !inner.disposed {
                    inner.on_complete.push(Box::new(callback));
                }
                return;
            }
        }
        callback(self);
    }

    /// Runs `callback` when the future is disposed, or right away if it already was.
    pub fn register_on_dispose<F>(&self, callback: F)
    where
        F: FnOnce(&Future<T>) + Send + 'static,
    {
        {
            let mut inner = self.shared.inner.lock();
            if !inner.disposed {
                inner.on_dispose.push(Box::new(callback));
                return;
            }
        }
        callback(self);
    }

    /// Marks the future disposed. Idempotent.
    pub fn dispose(&self) {
        let callbacks = {
            let mut inner = self.shared.inner.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            if matches!(inner.resolution, Resolution::Pending) {
                inner.on_complete.clear();
                if let Some(event) = &inner.event {
                    event.set();
                }
            }
            mem::take(&mut inner.on_dispose)
        };

        for callback in callbacks {
            callback(self);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.inner.lock().disposed
    }

    /// Whether the future has been completed or failed.
    pub fn is_resolved(&self) -> bool {
        !matches!(self.shared.inner.lock().resolution, Resolution::Pending)
    }

    /// Whether the future failed. Counts as an error check.
    pub fn failed(&self) -> bool {
        self.note_error_check();
        matches!(self.shared.inner.lock().resolution, Resolution::Failed(_))
    }

    /// The error the future failed with, if any. Counts as an error check.
    pub fn error(&self) -> Option<TaskError> {
        self.note_error_check();
        self.peek_error()
    }

    pub(crate) fn peek_error(&self) -> Option<TaskError> {
        match &self.shared.inner.lock().resolution {
            Resolution::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Moves the value out of a completed future. Counts as an error check.
    pub fn take_result(&self) -> Result<T, TaskError> {
        self.note_error_check();
        let mut inner = self.shared.inner.lock();
        let disposed = inner.disposed;
        match &mut inner.resolution {
            Resolution::Completed(value) => value.take().ok_or(TaskError::ResultTaken),
            Resolution::Failed(err) => Err(err.clone()),
            Resolution::Pending if disposed => Err(TaskError::Disposed),
            Resolution::Pending => Err(TaskError::Pending),
        }
    }

    pub fn error_check_generation(&self) -> usize {
        self.shared.error_checks.load(Ordering::Acquire)
    }

    fn note_error_check(&self) {
        self.shared.error_checks.fetch_add(1, Ordering::AcqRel);
    }

    /// Event that is set once the future resolves or is abandoned, for threads that do not take
    /// part in scheduling.
    pub fn completion_event(&self) -> Arc<ResetEvent> {
        let mut inner = self.shared.inner.lock();
        let signalled = inner.disposed || !matches!(inner.resolution, Resolution::Pending);
        inner
            .event
            .get_or_insert_with(|| {
                let event = ResetEvent::new();
                if signalled {
                    event.set();
                }
                Arc::new(event)
            })
            .clone()
    }
}

/// Completion callbacks of a future that has already been resolved.
#[must_use = "completion callbacks only run when `run` is called"]
pub(crate) struct Completion<T> {
    future: Future<T>,
    callbacks: Vec<Callback<T>>,
}

impl<T> Completion<T> {
    pub(crate) fn run(self) {
        for callback in self.callbacks {
            callback(&self.future);
        }
    }
}

impl<T: Clone> Future<T> {
    /// A copy of the completed value, or the error the future failed with. Counts as an error
    /// check.
    pub fn result(&self) -> Result<T, TaskError> {
        self.note_error_check();
        let inner = self.shared.inner.lock();
        match &inner.resolution {
            Resolution::Completed(Some(value)) => Ok(value.clone()),
            Resolution::Completed(None) => Err(TaskError::ResultTaken),
            Resolution::Failed(err) => Err(err.clone()),
            Resolution::Pending if inner.disposed => Err(TaskError::Disposed),
            Resolution::Pending => Err(TaskError::Pending),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        let state = match &inner.resolution {
            Resolution::Pending => "pending",
            Resolution::Completed(_) => "completed",
            Resolution::Failed(_) => "failed",
        };
        f.debug_struct("Future")
            .field("state", &state)
            .field("disposed", &inner.disposed)
            .field("callbacks", &inner.on_complete.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use parking_lot::Mutex;

    use super::Future;
    use crate::error::TaskError;

    #[test]
    fn second_resolution_is_rejected() {
        let f = Future::new();
        f.complete(1).unwrap();
        assert!(matches!(f.complete(2), Err(TaskError::AlreadyCompleted)));
        assert!(matches!(
            f.fail(TaskError::Disposed),
            Err(TaskError::AlreadyCompleted)
        ));
        assert_eq!(f.result().unwrap(), 1);

        let g: Future<u8> = Future::new();
        g.fail(TaskError::OperationPending).unwrap();
        assert!(matches!(g.complete(3), Err(TaskError::AlreadyCompleted)));
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let f = Future::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            f.register_on_complete(move |f: &Future<&str>| {
                order.lock().push((i, f.result().unwrap()))
            });
        }
        assert!(order.lock().is_empty());

        f.complete("done").unwrap();
        assert_eq!(*order.lock(), vec![(0, "done"), (1, "done"), (2, "done")]);
    }

    #[test]
    fn callback_on_resolved_future_runs_synchronously() {
        let f = Future::failed_with(TaskError::Disposed);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        f.register_on_complete(move |f: &Future<()>| {
            assert!(f.failed());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispose_is_idempotent_and_keeps_result() {
        let f = Future::new();
        let disposals = Arc::new(AtomicUsize::new(0));
        let counter = disposals.clone();
        f.register_on_dispose(move |_: &Future<u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        f.complete(7).unwrap();
        f.dispose();
        f.dispose();
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(f.is_disposed());
        assert_eq!(f.result().unwrap(), 7);

        let late = disposals.clone();
        f.register_on_dispose(move |_| {
            late.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(disposals.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn disposed_pending_future_is_never_resolved() {
        let f: Future<u32> = Future::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        f.register_on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        f.dispose();
        f.complete(1).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!f.is_resolved());
        assert!(matches!(f.result(), Err(TaskError::Disposed)));
        assert!(f.completion_event().is_set());
    }

    #[test]
    fn observing_the_error_advances_the_generation() {
        let f: Future<()> = Future::new();
        f.fail(io::Error::new(io::ErrorKind::Other, "boom").into())
            .unwrap();
        let start = f.error_check_generation();

        assert!(f.peek_error().is_some());
        assert_eq!(f.error_check_generation(), start);

        assert!(f.error().is_some());
        assert!(f.error_check_generation() > start);
    }

    #[test]
    fn completion_event_wakes_foreign_thread() {
        let f = Future::new();
        let event = f.completion_event();
        assert!(!event.is_set());

        let producer = f.clone();
        let handle = thread::spawn(move || producer.complete(String::from("hi")).unwrap());
        event.wait().unwrap();
        handle.join().unwrap();

        assert_eq!(f.take_result().unwrap(), "hi");
        assert!(matches!(f.take_result(), Err(TaskError::ResultTaken)));
    }

    #[test]
    fn weak_handle_does_not_keep_future_alive() {
        let f: Future<u8> = Future::new();
        let weak = f.downgrade();
        assert!(weak.upgrade().is_some());
        drop(f);
        assert!(weak.upgrade().is_none());
    }
}
