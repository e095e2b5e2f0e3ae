//! Bridges between OS threads and the cooperative world
//!
//! Blocking work runs on threads of its own and reports back the only two ways the scheduler
//! accepts from the outside: by resolving a [`Future`](crate::future::Future) or by queueing a
//! work item.

mod blocking_queue;
mod worker_thread;

pub use blocking_queue::BlockingQueue;
pub use worker_thread::{WorkerFn, WorkerThread, DEFAULT_JOIN_PATIENCE};
