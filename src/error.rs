use std::{io, sync::Arc};

/// Errors surfaced through futures, task results and the cross-thread bridge.
///
/// Failed futures can be observed by many dependents at once, so the error is `Clone` and any
/// wrapped cause is shared behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("future has already been completed")]
    AlreadyCompleted,

    #[error("an operation is already pending on this object")]
    OperationPending,

    #[error("task yielded an unsupported value: {0}")]
    UnsupportedYieldedValue(String),

    /// A dependency of the task failed and the task did not handle it.
    #[error("task aborted: {0}")]
    Aborted(#[source] Arc<TaskError>),

    /// Raised by synchronous waits, wrapping the error the future failed with.
    #[error("future failed: {0}")]
    FutureFailed(#[source] Arc<TaskError>),

    #[error("future was disposed before producing a result")]
    Disposed,

    #[error("future has not produced a result yet")]
    Pending,

    #[error("result has already been taken")]
    ResultTaken,

    #[error("cannot block on a future from inside a scheduler tick")]
    NestedWait,

    #[error("wait interrupted")]
    Interrupted,

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(Arc<io::Error>),

    #[error(transparent)]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    pub fn aborted(cause: TaskError) -> Self {
        TaskError::Aborted(Arc::new(cause))
    }

    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TaskError::Other(Arc::new(err))
    }

    /// Strips `Aborted`/`FutureFailed` wrappers down to the error that started the chain.
    pub fn root_cause(&self) -> &TaskError {
        match self {
            TaskError::Aborted(inner) | TaskError::FutureFailed(inner) => inner.root_cause(),
            other => other,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskError::Panicked(msg)
    }
}

impl From<io::Error> for TaskError {
    fn from(err: io::Error) -> Self {
        TaskError::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use super::TaskError;

    #[test]
    fn root_cause_unwraps_nested_wrappers() {
        let io = TaskError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        let err = TaskError::FutureFailed(std::sync::Arc::new(TaskError::aborted(io)));

        match err.root_cause() {
            TaskError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected root cause {other:?}"),
        }
        assert!(err.to_string().starts_with("future failed: task aborted"));
    }
}
