mod config;
#[allow(clippy::module_inception)]
pub mod executor;
mod queue;
mod scheduler;
pub mod task;

pub use config::{BackgroundErrorHandler, Config};
pub use executor::Scheduler;
pub(crate) use executor::{TaskKey, WeakScheduler};
pub use scheduler::StepListenerId;
pub use task::{TaskBodyExt, TaskBuilder};

/// A zero-argument unit of deferred work.
///
/// Work items are the only thing the run queue holds. Anything that wants to get back onto the
/// scheduler's thread (a task resuming, a timer elapsing, a future resolved by a worker thread)
/// does so by queueing one. They are executed once and dropped.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;
