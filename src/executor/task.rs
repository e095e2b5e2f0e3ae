use std::{any::Any, sync::Arc};

use super::executor::Scheduler;
use crate::{
    future::{Future, Waitable},
    task::{ExecutionPolicy, GeneratorTask, NextValueHook, TaskBody, TaskHandle},
};

/// Configures a task before it is handed to a scheduler.
#[must_use = "tasks don't get scheduled until spawned"]
pub struct TaskBuilder<B> {
    body: B,
    policy: ExecutionPolicy,
    on_next_value: Option<NextValueHook>,
    label: Option<&'static str>,
}

impl<B: TaskBody> TaskBuilder<B> {
    pub fn new(body: B) -> Self {
        Self {
            body,
            policy: ExecutionPolicy::default(),
            on_next_value: None,
            label: None,
        }
    }

    pub fn policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Installs the hook that turns [`Directive::NextValue`](crate::task::Directive::NextValue)
    /// payloads into futures to wait on.
    pub fn on_next_value<F>(mut self, hook: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) -> Option<Box<dyn Waitable>> + Send + Sync + 'static,
    {
        self.on_next_value = Some(Arc::new(hook));
        self
    }

    /// Label used by the [`TaskDebugger`](crate::task::debugging::TaskDebugger) filter.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn spawn(self, scheduler: &Scheduler) -> TaskHandle<B::Output> {
        let task = GeneratorTask::new(self.body, self.on_next_value, self.label);
        let future = task.schedule(scheduler, self.policy);
        TaskHandle::new(future, task)
    }

    pub fn start(self, scheduler: &Scheduler) -> Future<Option<B::Output>> {
        self.spawn(scheduler).into_future()
    }
}

pub trait TaskBodyExt: TaskBody + Sized {
    /// Spawns the body onto the scheduler whose tick is running on this thread.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a scheduler tick.
    fn spawn(self, policy: ExecutionPolicy) -> TaskHandle<Self::Output> {
        TaskBuilder::new(self).policy(policy).spawn(&current())
    }

    /// Like [`spawn`](Self::spawn), returning only the result future.
    fn start(self, policy: ExecutionPolicy) -> Future<Option<Self::Output>> {
        self.spawn(policy).into_future()
    }
}

impl<B> TaskBodyExt for B where B: TaskBody {}

fn current() -> Scheduler {
    match Scheduler::current() {
        Some(scheduler) => scheduler,
        None => panic!("`TaskBodyExt::spawn` called outside of a scheduler tick"),
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use parking_lot::Mutex;

    use super::{TaskBodyExt, TaskBuilder};
    use crate::{
        executor::Scheduler,
        future::Future,
        task::{debugging::TaskDebugger, from_fn, Directive, ExecutionPolicy, TaskId},
        utils::init_logging,
    };

    #[test]
    fn spawn_from_inside_a_tick_uses_the_current_scheduler() {
        init_logging();
        let scheduler = Scheduler::new();
        let slot = Arc::new(Mutex::new(None));

        let inner = slot.clone();
        scheduler.queue_work_item(move || {
            let f = from_fn(|_| Ok(Some(Directive::Result(9)))).start(ExecutionPolicy::default());
            *inner.lock() = Some(f);
        });
        scheduler.step();

        let future: Future<Option<i32>> = slot.lock().take().unwrap();
        assert_eq!(scheduler.wait_for(&future).unwrap(), Some(9));
    }

    #[test]
    #[should_panic(expected = "outside of a scheduler tick")]
    fn spawn_outside_a_tick_panics() {
        let _ = from_fn(|_| Ok(Some(Directive::<()>::yield_now()))).spawn(ExecutionPolicy::default());
    }

    #[test]
    fn labelled_tasks_are_traced() {
        init_logging();
        let scheduler = Scheduler::new();
        let steps = Arc::new(AtomicUsize::new(0));
        let seen: Arc<Mutex<Option<TaskId>>> = Arc::new(Mutex::new(None));

        let counter = steps.clone();
        let current = seen.clone();
        let handle = TaskBuilder::new(from_fn(move |cx| {
            *current.lock() = TaskDebugger::current_task();
            assert_eq!(Some(cx.task_id()), TaskDebugger::current_task());
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(Some(Directive::yield_now())),
                _ => Ok(Some(Directive::Result("done"))),
            }
        }))
        .label("traced")
        .spawn(&scheduler);

        assert_eq!(scheduler.wait_for(handle.future()).unwrap(), Some("done"));
        assert_eq!(*seen.lock(), Some(handle.id()));
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }
}
