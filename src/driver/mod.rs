//! Time source for the scheduler
//!
//! The scheduler owns one [`TimerDriver`]. `Sleep` directives register a work item with a
//! deadline; at the start of every tick the expired items are moved onto the work queue. When the
//! queue runs dry the scheduler parks until the earliest deadline.
mod timer;

pub(crate) use timer::TimerDriver;
