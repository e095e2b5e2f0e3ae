use std::sync::Arc;

use super::{event::ResetEvent, Future};
use crate::error::TaskError;

/// Type-erased view of a [`Future`], used wherever the waiter does not care about the value type:
/// wake conditions inside the task adapter, [`wait_for_all`](super::wait_for_all) and
/// [`Scheduler::block_on`](crate::executor::Scheduler::block_on).
pub trait Waitable: Send + Sync {
    fn is_resolved(&self) -> bool;

    fn is_disposed(&self) -> bool;

    fn error_check_generation(&self) -> usize;

    /// The recorded error, without counting as an observation.
    fn peek_error(&self) -> Option<TaskError>;

    /// Runs `callback` once the future resolves, or right away if it already has.
    fn on_resolved(&self, callback: Box<dyn FnOnce() + Send>);

    /// Runs `callback` if the future is disposed before it resolves, or right away if that
    /// already happened.
    fn on_abandoned(&self, callback: Box<dyn FnOnce() + Send>);

    fn dispose(&self);

    fn completion_event(&self) -> Arc<ResetEvent>;

    fn clone_waitable(&self) -> Box<dyn Waitable>;
}

impl<T: Send + 'static> Waitable for Future<T> {
    fn is_resolved(&self) -> bool {
        Future::is_resolved(self)
    }

    fn is_disposed(&self) -> bool {
        Future::is_disposed(self)
    }

    fn error_check_generation(&self) -> usize {
        Future::error_check_generation(self)
    }

    fn peek_error(&self) -> Option<TaskError> {
        Future::peek_error(self)
    }

    fn on_resolved(&self, callback: Box<dyn FnOnce() + Send>) {
        self.register_on_complete(move |_| callback());
    }

    fn on_abandoned(&self, callback: Box<dyn FnOnce() + Send>) {
        self.register_on_dispose(move |future| {
            if !future.is_resolved() {
                callback()
            }
        });
    }

    fn dispose(&self) {
        Future::dispose(self)
    }

    fn completion_event(&self) -> Arc<ResetEvent> {
        Future::completion_event(self)
    }

    fn clone_waitable(&self) -> Box<dyn Waitable> {
        Box::new(self.clone())
    }
}

impl std::fmt::Debug for dyn Waitable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waitable")
            .field("resolved", &self.is_resolved())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
