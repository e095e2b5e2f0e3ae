//! Resumable tasks and the directives they yield
//!
//! A task body is resumed once per step and answers with the next [`Directive`]: suspend for a
//! while, wait on a future or a nested task, or finish with a result. The generator-task adapter
//! interprets those directives against the [`Scheduler`] and resolves one future for the whole
//! task.

pub mod debugging;
mod generator;
mod join;
mod state;
pub mod task_impl;
mod wake;

use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    error::TaskError,
    executor::Scheduler,
    future::{Future, Waitable},
};

pub(crate) use generator::GeneratorTask;
pub use join::TaskHandle;
pub use state::TaskState;
pub use task_impl::{from_fn, from_iter, Discarding, FnTask, IterTask};

/// Governs whether a task's lifetime is tied to the future it reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionPolicy {
    /// The task keeps running after its future is disposed or dropped. It ends when it finishes
    /// or when it is disposed through its [`TaskHandle`] or by the scheduler.
    RunAsBackgroundTask,

    /// The task is cancelled as soon as its future is disposed, or once every handle to the
    /// future has been dropped.
    #[default]
    RunWhileFutureLives,
}

/// One suspension point that can be handed to [`Scheduler::start`] or yielded by a task.
pub enum Schedulable {
    /// Resume no earlier than the given duration from now.
    Sleep(Duration),

    /// Resume on the next queue drain, behind work that is already queued.
    Yield,

    /// Resume on the next scheduler tick.
    WaitForNextStep,

    /// Run a nested task to completion.
    RunToCompletion {
        task: BoxedTask,
        policy: ExecutionPolicy,
    },
}

impl Schedulable {
    pub fn sleep_secs(seconds: f64) -> Self {
        Schedulable::Sleep(Duration::from_secs_f64(seconds.max(0.0)))
    }

    /// Wraps `body` so it can be run as a nested task. Its result value is discarded.
    pub fn run_to_completion<B: TaskBody>(body: B, policy: ExecutionPolicy) -> Self {
        Schedulable::RunToCompletion {
            task: Box::new(Discarding::new(body)),
            policy,
        }
    }
}

impl fmt::Debug for Schedulable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedulable::Sleep(d) => f.debug_tuple("Sleep").field(d).finish(),
            Schedulable::Yield => f.write_str("Yield"),
            Schedulable::WaitForNextStep => f.write_str("WaitForNextStep"),
            Schedulable::RunToCompletion { policy, .. } => f
                .debug_struct("RunToCompletion")
                .field("policy", policy)
                .finish_non_exhaustive(),
        }
    }
}

/// What a task body hands back each time it is resumed.
pub enum Directive<T> {
    /// Suspend according to a [`Schedulable`]. Nested tasks and sleeps are started under
    /// [`ExecutionPolicy::RunWhileFutureLives`]; if one fails, the task is aborted with it.
    Schedule(Schedulable),

    /// Resume once the future resolves. If it failed and the body does not look at the error
    /// before it yields again, the task is aborted with that error.
    Wait(Box<dyn Waitable>),

    /// Resume once the future resolves, whatever its outcome.
    WaitDiscarding(Box<dyn Waitable>),

    /// Ask the task's next-value hook for a future to wait on. Without a hook, or if the hook
    /// declines, the task resumes on the next drain.
    NextValue(Box<dyn Any + Send>),

    /// Finish the task with this value. The body is not resumed again.
    Result(T),

    /// A value without a directive wrapper. `()` acts as [`Schedulable::Yield`] and a boxed
    /// [`Schedulable`] is dispatched as such; anything else fails the task with
    /// [`TaskError::UnsupportedYieldedValue`].
    Untyped(Box<dyn Any + Send>),
}

impl<T> Directive<T> {
    pub fn sleep(duration: Duration) -> Self {
        Directive::Schedule(Schedulable::Sleep(duration))
    }

    pub fn yield_now() -> Self {
        Directive::Schedule(Schedulable::Yield)
    }

    pub fn next_step() -> Self {
        Directive::Schedule(Schedulable::WaitForNextStep)
    }

    pub fn wait<U: Send + 'static>(future: &Future<U>) -> Self {
        Directive::Wait(Box::new(future.clone()))
    }

    pub fn wait_discarding<U: Send + 'static>(future: &Future<U>) -> Self {
        Directive::WaitDiscarding(Box::new(future.clone()))
    }

    /// Runs `body` as a nested task and resumes when it is done.
    pub fn run<B: TaskBody>(body: B) -> Self {
        Directive::Schedule(Schedulable::run_to_completion(
            body,
            ExecutionPolicy::RunWhileFutureLives,
        ))
    }

    pub fn next_value<V: Any + Send>(value: V) -> Self {
        Directive::NextValue(Box::new(value))
    }

    pub fn untyped<V: Any + Send>(value: V) -> Self {
        Directive::Untyped(Box::new(value))
    }

    pub fn map_result<U, F>(self, f: F) -> Directive<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Directive::Schedule(s) => Directive::Schedule(s),
            Directive::Wait(w) => Directive::Wait(w),
            Directive::WaitDiscarding(w) => Directive::WaitDiscarding(w),
            Directive::NextValue(v) => Directive::NextValue(v),
            Directive::Result(v) => Directive::Result(f(v)),
            Directive::Untyped(v) => Directive::Untyped(v),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Directive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Schedule(s) => f.debug_tuple("Schedule").field(s).finish(),
            Directive::Wait(w) => f.debug_tuple("Wait").field(w).finish(),
            Directive::WaitDiscarding(w) => f.debug_tuple("WaitDiscarding").field(w).finish(),
            Directive::NextValue(_) => f.write_str("NextValue(..)"),
            Directive::Result(v) => f.debug_tuple("Result").field(v).finish(),
            Directive::Untyped(_) => f.write_str("Untyped(..)"),
        }
    }
}

/// What resuming a body produces: the next directive, `None` once the body is exhausted, or the
/// error the body raised.
pub type Resume<T> = Result<Option<Directive<T>>, TaskError>;

/// A resumable task body.
///
/// The adapter calls [`resume`](Self::resume) once per step, always on the scheduler's thread.
/// Between calls the body is suspended on whatever directive it returned last.
pub trait TaskBody: Send + 'static {
    type Output: Send + 'static;

    fn resume(&mut self, cx: &mut TaskContext<'_>) -> Resume<Self::Output>;

    /// Called once when the task is torn down before the body ran out, at its current suspension
    /// point.
    fn dispose(&mut self) {}
}

impl<T: Send + 'static> TaskBody for Box<dyn TaskBody<Output = T>> {
    type Output = T;

    fn resume(&mut self, cx: &mut TaskContext<'_>) -> Resume<T> {
        (**self).resume(cx)
    }

    fn dispose(&mut self) {
        (**self).dispose()
    }
}

/// A type-erased nested task.
pub type BoxedTask = Box<dyn TaskBody<Output = ()>>;

/// Converts the value of a [`Directive::NextValue`] into a future to wait on.
pub type NextValueHook = Arc<dyn Fn(Box<dyn Any + Send>) -> Option<Box<dyn Waitable>> + Send + Sync>;

/// Identifies a task for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// What a body can reach while it is being resumed.
pub struct TaskContext<'a> {
    scheduler: &'a Scheduler,
    id: TaskId,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(scheduler: &'a Scheduler, id: TaskId) -> Self {
        Self { scheduler, id }
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.scheduler
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

/// The side of a running task the scheduler and task handles talk to.
pub(crate) trait TaskControl: Send + Sync {
    fn id(&self) -> TaskId;

    fn state(&self) -> TaskState;

    /// Tears the task down. Idempotent.
    fn dispose(&self);
}

/// Mark context for task operation
macro_rules! dbg_context {
    ($id:expr, $state:expr, $name:tt, $($body:tt)*) => {{
        let entered = super::debugging::TaskDebugger::enter($id, $name, || $state);

        defer! {
            if entered {
                super::debugging::TaskDebugger::leave();
            }
        }

        $($body)*
    }};
}

pub(super) use dbg_context;

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::Schedulable;

    #[test]
    fn sleep_secs_converts_and_clamps() {
        assert!(matches!(
            Schedulable::sleep_secs(0.25),
            Schedulable::Sleep(d) if d == Duration::from_millis(250)
        ));
        assert!(matches!(
            Schedulable::sleep_secs(-3.0),
            Schedulable::Sleep(d) if d == Duration::ZERO
        ));
    }
}
