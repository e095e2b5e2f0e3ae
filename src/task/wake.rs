use crate::{error::TaskError, future::Waitable};

/// How a task treats the outcome of the future it is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WakeMode {
    /// Nested tasks, sleeps and next-value futures: a failure aborts the waiting task at once.
    Propagate,

    /// Plain futures: the task resumes either way and is expected to look at the error.
    Observe,

    /// The task resumes either way and the error is never re-raised.
    Discard,
}

/// The future a suspended task is waiting on.
pub(super) struct WakeCondition {
    pub(super) future: Box<dyn Waitable>,
    pub(super) mode: WakeMode,
    /// Error-check generation of `future` when the wait began.
    generation: usize,
    /// Distinguishes successive waits of the same task.
    pub(super) epoch: u64,
}

impl WakeCondition {
    pub(super) fn new(future: Box<dyn Waitable>, mode: WakeMode, epoch: u64) -> Self {
        let generation = future.error_check_generation();
        Self {
            future,
            mode,
            generation,
            epoch,
        }
    }

    pub(super) fn propagated_error(&self) -> Option<TaskError> {
        match self.mode {
            WakeMode::Propagate => self.future.peek_error(),
            WakeMode::Observe | WakeMode::Discard => None,
        }
    }

    /// The future was disposed without resolving, so no result is coming. Only a discarding
    /// wait resumes the task normally.
    pub(super) fn abandoned_error(&self) -> Option<TaskError> {
        if self.mode == WakeMode::Discard
            || self.future.is_resolved()
            || !self.future.is_disposed()
        {
            return None;
        }
        Some(TaskError::Disposed)
    }

    /// The error of a failed future nobody has looked at since the wait began.
    pub(super) fn unobserved_error(&self) -> Option<TaskError> {
        if self.mode != WakeMode::Observe {
            return None;
        }
        if self.future.error_check_generation() > self.generation {
            return None;
        }
        self.future.peek_error()
    }
}

#[cfg(test)]
mod test {
    use super::{WakeCondition, WakeMode};
    use crate::{error::TaskError, future::Future};

    fn failed() -> Future<()> {
        let f = Future::new();
        f.fail(TaskError::OperationPending).unwrap();
        f
    }

    #[test]
    fn unexamined_failure_is_reported_until_checked() {
        let f = failed();
        let wake = WakeCondition::new(Box::new(f.clone()), WakeMode::Observe, 1);
        assert!(wake.unobserved_error().is_some());
        assert!(wake.propagated_error().is_none());

        assert!(f.failed());
        assert!(wake.unobserved_error().is_none());
    }

    #[test]
    fn discarding_wait_never_reports() {
        let wake = WakeCondition::new(Box::new(failed()), WakeMode::Discard, 1);
        assert!(wake.unobserved_error().is_none());
        assert!(wake.propagated_error().is_none());
    }

    #[test]
    fn abandoned_future_is_an_error_unless_discarding() {
        let pending: Future<u8> = Future::new();
        let observe = WakeCondition::new(Box::new(pending.clone()), WakeMode::Observe, 1);
        let discard = WakeCondition::new(Box::new(pending.clone()), WakeMode::Discard, 2);
        assert!(observe.abandoned_error().is_none());

        pending.dispose();
        assert!(matches!(observe.abandoned_error(), Some(TaskError::Disposed)));
        assert!(discard.abandoned_error().is_none());

        let resolved = Future::completed(1_u8);
        resolved.dispose();
        let wake = WakeCondition::new(Box::new(resolved), WakeMode::Propagate, 3);
        assert!(wake.abandoned_error().is_none());
    }

    #[test]
    fn propagating_wait_reports_immediately() {
        let wake = WakeCondition::new(Box::new(failed()), WakeMode::Propagate, 1);
        assert!(matches!(
            wake.propagated_error(),
            Some(TaskError::OperationPending)
        ));
        assert!(wake.unobserved_error().is_none());
    }
}
