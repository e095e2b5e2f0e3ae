use std::{fmt, sync::Arc};

use super::queue::DEFAULT_TASK_QUEUE_SIZE;
use crate::error::TaskError;

pub type BackgroundErrorHandler = Arc<dyn Fn(&TaskError) + Send + Sync>;

/// Scheduler settings.
#[derive(Clone)]
pub struct Config {
    /// Number of work items the run queue is allocated for up front.
    pub queue_capacity: usize,

    /// Receives the error of every `RunAsBackgroundTask` task that fails. Failures are logged
    /// at error level when no handler is installed.
    pub on_background_error: Option<BackgroundErrorHandler>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_TASK_QUEUE_SIZE,
            on_background_error: None,
        }
    }
}

impl Config {
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn on_background_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TaskError) + Send + Sync + 'static,
    {
        self.on_background_error = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("queue_capacity", &self.queue_capacity)
            .field(
                "on_background_error",
                &self.on_background_error.as_ref().map(|_| "<handler>"),
            )
            .finish()
    }
}
