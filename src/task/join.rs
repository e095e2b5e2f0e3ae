use std::{fmt, sync::Arc};

use super::{TaskControl, TaskId, TaskState};
use crate::future::Future;

/// A started task: its result future plus direct control over the task itself.
///
/// Dropping the handle does nothing to the task. [`dispose`](Self::dispose) tears the task down
/// regardless of its [`ExecutionPolicy`](super::ExecutionPolicy), which is the only way to stop a
/// background task short of disposing the scheduler.
pub struct TaskHandle<T> {
    future: Future<Option<T>>,
    control: Arc<dyn TaskControl>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(future: Future<Option<T>>, control: Arc<dyn TaskControl>) -> Self {
        Self { future, control }
    }

    pub fn id(&self) -> TaskId {
        self.control.id()
    }

    pub fn state(&self) -> TaskState {
        self.control.state()
    }

    pub fn future(&self) -> &Future<Option<T>> {
        &self.future
    }

    pub fn into_future(self) -> Future<Option<T>> {
        self.future
    }

    /// Cancels the task. Its body is disposed at its current suspension point and its future is
    /// disposed without a result.
    pub fn dispose(&self) {
        self.control.dispose()
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("future", &self.future)
            .finish()
    }
}
