//! A cooperative, single-threaded task runtime.
//!
//! Tasks are resumable bodies that yield [`Directive`]s; a [`Scheduler`] interprets them one step
//! at a time on its own thread and reports each task's outcome through a [`Future`]. Other
//! threads take part only by resolving futures or queueing work items.

#[macro_use(defer)]
extern crate scopeguard;

pub mod bridge;
mod driver;
pub mod error;
pub mod executor;
pub mod future;
pub mod net;
pub mod task;
mod utils;

pub use error::TaskError;
pub use executor::{Config, Scheduler, TaskBodyExt, TaskBuilder};
pub use future::{Future, Waitable};
pub use task::{Directive, ExecutionPolicy, Schedulable, TaskBody, TaskContext, TaskHandle};
