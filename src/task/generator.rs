//! The generator-task adapter
//!
//! [`GeneratorTask`] drives one [`TaskBody`]: it resumes the body once per step, interprets the
//! directive it yields against the scheduler, and resolves the task's future when the body
//! finishes, fails, or is torn down.
//!
//! Steps only ever run as work items on the scheduler's thread. Completion callbacks of the
//! futures a task waits on may fire on any thread, so all they do is queue the next step.
//!
//! No lock is held while the body runs or while callbacks are invoked: the body is moved out of
//! the adapter for the duration of `resume`, and a dispose that lands in the meantime is noticed
//! once it is put back.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use super::{
    dbg_context,
    debugging::TaskDebugger,
    state::{TaskState, TransitionToRunning},
    wake::{WakeCondition, WakeMode},
    Directive, ExecutionPolicy, NextValueHook, Schedulable, TaskBody, TaskContext, TaskControl,
    TaskId,
};
use crate::{
    error::TaskError,
    executor::{Scheduler, TaskKey, WeakScheduler},
    future::{Future, Waitable, WeakFuture},
};

enum ResultSlot<T> {
    /// Background tasks own their future; the caller gets an observer.
    Owned(Future<T>),
    /// Scoped tasks stop once nobody holds their future any more.
    Borrowed(WeakFuture<T>),
}

impl<T> ResultSlot<T> {
    fn get(&self) -> Option<Future<T>> {
        match self {
            ResultSlot::Owned(future) => Some(future.clone()),
            ResultSlot::Borrowed(weak) => weak.upgrade(),
        }
    }
}

struct Inner<B: TaskBody> {
    state: TaskState,
    torn_down: bool,
    body: Option<B>,
    result: Option<ResultSlot<Option<B::Output>>>,
    scheduler: Option<WeakScheduler>,
    wake: Option<WakeCondition>,
    wake_previous: Option<WakeCondition>,
    epoch: u64,
    registry_key: Option<TaskKey>,
}

pub(crate) struct GeneratorTask<B: TaskBody> {
    id: TaskId,
    label: Option<&'static str>,
    on_next_value: Option<NextValueHook>,
    inner: Mutex<Inner<B>>,
}

impl<B: TaskBody> GeneratorTask<B> {
    pub(crate) fn new(
        body: B,
        on_next_value: Option<NextValueHook>,
        label: Option<&'static str>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            label,
            on_next_value,
            inner: Mutex::new(Inner {
                state: TaskState::Created,
                torn_down: false,
                body: Some(body),
                result: None,
                scheduler: None,
                wake: None,
                wake_previous: None,
                epoch: 0,
                registry_key: None,
            }),
        })
    }

    fn compact_state(&self) -> &'static str {
        self.inner.lock().state.to_compact_string()
    }

    fn scheduler(&self) -> Option<Scheduler> {
        self.inner
            .lock()
            .scheduler
            .as_ref()
            .and_then(WeakScheduler::upgrade)
    }

    /// Binds the task to `scheduler`, queues its first step and returns the future the caller
    /// observes.
    pub(crate) fn schedule(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        policy: ExecutionPolicy,
    ) -> Future<Option<B::Output>> {
        let result: Future<Option<B::Output>> = Future::new();
        let (slot, returned) = match policy {
            ExecutionPolicy::RunWhileFutureLives => {
                (ResultSlot::Borrowed(result.downgrade()), result.clone())
            }
            ExecutionPolicy::RunAsBackgroundTask => {
                let observer = Future::new();
                self.forward_to_observer(scheduler, &result, &observer);
                (ResultSlot::Owned(result.clone()), observer)
            }
        };

        let registered = TaskDebugger::register(self.id, self.label);
        dbg_context!(self.id, self.compact_state(), "schedule", {
            let control: Arc<dyn TaskControl> = self.clone();
            let key = scheduler.register_task(control);
            {
                let mut inner = self.inner.lock();
                inner.result = Some(slot);
                inner.scheduler = Some(scheduler.downgrade());
                inner.registry_key = key;
            }

            let task: Weak<Self> = Arc::downgrade(self);
            result.register_on_dispose(move |_| {
                if let Some(task) = task.upgrade() {
                    task.dispose();
                }
            });

            tracing::debug!(task = %self.id, ?policy, traced = registered, "task scheduled");
            if key.is_some() {
                self.queue_step();
            } else {
                // The scheduler is already gone.
                self.dispose();
            }
        });
        returned
    }

    fn forward_to_observer(
        &self,
        scheduler: &Scheduler,
        result: &Future<Option<B::Output>>,
        observer: &Future<Option<B::Output>>,
    ) {
        let id = self.id;
        let weak_scheduler = scheduler.downgrade();
        let target = observer.downgrade();
        result.register_on_complete(move |result| {
            if let Some(err) = result.peek_error() {
                tracing::warn!(task = %id, error = %err, "background task failed");
                if let Some(scheduler) = weak_scheduler.upgrade() {
                    scheduler.report_background_error(&err);
                }
            }
            let Some(target) = target.upgrade() else {
                return;
            };
            let _ = match result.take_result() {
                Ok(value) => target.complete(value),
                Err(err) => target.fail(err),
            };
        });

        let target = observer.downgrade();
        result.register_on_dispose(move |result| {
            if !result.is_resolved() {
                if let Some(target) = target.upgrade() {
                    target.dispose();
                }
            }
        });
    }

    fn queue_step(self: &Arc<Self>) {
        match self.scheduler() {
            Some(scheduler) => {
                let task = self.clone();
                scheduler.queue_work_item(move || task.step());
            }
            None => self.dispose(),
        }
    }

    fn step(self: &Arc<Self>) {
        dbg_context!(self.id, self.compact_state(), "step", {
            TaskDebugger::set_current_task(self.id);

            let (mut body, scheduler) = {
                let mut inner = self.inner.lock();
                if inner.torn_down {
                    return;
                }
                if let Some(wake) = inner.wake.take() {
                    inner.wake_previous = Some(wake);
                }

                let alive = inner
                    .result
                    .as_ref()
                    .and_then(ResultSlot::get)
                    .map_or(false, |f| !f.is_disposed());
                let scheduler = inner.scheduler.as_ref().and_then(WeakScheduler::upgrade);
                match (alive, scheduler) {
                    (true, Some(scheduler)) => match inner.state.transition_to_running() {
                        TransitionToRunning::Run => match inner.body.take() {
                            Some(body) => (body, scheduler),
                            None => return,
                        },
                        TransitionToRunning::Closed => return,
                    },
                    _ => {
                        drop(inner);
                        tracing::debug!(task = %self.id, "task future dropped, stopping task");
                        self.dispose();
                        return;
                    }
                }
            };

            let outcome = {
                let mut cx = TaskContext::new(&scheduler, self.id);
                panic::catch_unwind(AssertUnwindSafe(|| body.resume(&mut cx)))
            };

            {
                let mut inner = self.inner.lock();
                if inner.torn_down {
                    // Disposed while the body was running.
                    drop(inner);
                    body.dispose();
                    return;
                }
                inner.body = Some(body);
                inner.state.transition_to_suspended();
            }

            match outcome {
                Err(payload) => self.abort(TaskError::from_panic(payload)),
                Ok(Err(err)) => self.abort(err),
                Ok(Ok(None)) => self.complete_with_result(None),
                Ok(Ok(Some(directive))) => {
                    if let Err(err) = self.schedule_next_step(&scheduler, directive) {
                        self.abort(err);
                    }
                }
            }
        })
    }

    fn schedule_next_step(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        directive: Directive<B::Output>,
    ) -> Result<(), TaskError> {
        if self.check_for_discarded_error() {
            return Ok(());
        }

        match directive {
            Directive::Schedule(schedulable) => {
                self.schedule_for_schedulable(scheduler, schedulable)
            }
            Directive::Wait(future) => self.wait_on(future, WakeMode::Observe),
            Directive::WaitDiscarding(future) => self.wait_on(future, WakeMode::Discard),
            Directive::NextValue(value) => {
                let future = self.on_next_value.as_ref().and_then(|hook| hook(value));
                match future {
                    Some(future) => self.wait_on(future, WakeMode::Propagate),
                    None => self.queue_step(),
                }
            }
            Directive::Result(value) => self.complete_with_result(Some(value)),
            Directive::Untyped(value) => {
                if value.is::<()>() {
                    self.queue_step();
                } else {
                    match value.downcast::<Schedulable>() {
                        Ok(schedulable) => self.schedule_for_schedulable(scheduler, *schedulable),
                        Err(_) => {
                            return Err(TaskError::UnsupportedYieldedValue(format!(
                                "{} yielded a value that is not a directive",
                                self.id
                            )))
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn schedule_for_schedulable(self: &Arc<Self>, scheduler: &Scheduler, schedulable: Schedulable) {
        match schedulable {
            Schedulable::WaitForNextStep => {
                let task = self.clone();
                scheduler.add_step_listener(move || task.queue_step());
            }
            Schedulable::Yield => self.queue_step(),
            other => {
                let future = scheduler.start(other, ExecutionPolicy::RunWhileFutureLives);
                self.wait_on(Box::new(future), WakeMode::Propagate);
            }
        }
    }

    /// Aborts the task if the future it last waited on failed and the body never looked at the
    /// error.
    fn check_for_discarded_error(self: &Arc<Self>) -> bool {
        let unobserved = self
            .inner
            .lock()
            .wake_previous
            .as_ref()
            .and_then(WakeCondition::unobserved_error);
        match unobserved {
            Some(err) => {
                self.abort(TaskError::aborted(err));
                true
            }
            None => false,
        }
    }

    fn wait_on(self: &Arc<Self>, future: Box<dyn Waitable>, mode: WakeMode) {
        let epoch = {
            let mut inner = self.inner.lock();
            if inner.torn_down {
                return;
            }
            inner.epoch += 1;
            let epoch = inner.epoch;
            inner.wake = Some(WakeCondition::new(future.clone_waitable(), mode, epoch));
            inner.state = TaskState::Suspended;
            epoch
        };

        let task = self.clone();
        future.on_resolved(Box::new(move || {
            if let Some(scheduler) = task.scheduler() {
                scheduler.queue_work_item(move || task.wake(epoch));
            }
        }));

        // A future disposed while pending never resolves; wake the task so it can give up.
        let task = Arc::downgrade(self);
        future.on_abandoned(Box::new(move || {
            let Some(task) = task.upgrade() else {
                return;
            };
            if let Some(scheduler) = task.scheduler() {
                scheduler.queue_work_item(move || task.wake(epoch));
            }
        }));
    }

    fn wake(self: &Arc<Self>, epoch: u64) {
        dbg_context!(self.id, self.compact_state(), "wake", {
            let propagated = {
                let mut inner = self.inner.lock();
                if inner.torn_down {
                    return;
                }
                match &inner.wake {
                    Some(wake) if wake.epoch == epoch => {}
                    _ => return,
                }
                let err = inner
                    .wake
                    .as_ref()
                    .and_then(|wake| wake.propagated_error().or_else(|| wake.abandoned_error()));
                if err.is_none() {
                    inner.wake_previous = inner.wake.take();
                }
                err
            };

            match propagated {
                Some(err) => self.abort(TaskError::aborted(err)),
                None => self.step(),
            }
        })
    }

    fn complete_with_result(self: &Arc<Self>, value: Option<B::Output>) {
        if self.check_for_discarded_error() {
            return;
        }

        let result = {
            let mut inner = self.inner.lock();
            if inner.torn_down {
                return;
            }
            inner.state.transition_to_finished(TaskState::Completed);
            inner.result.as_ref().and_then(ResultSlot::get)
        };

        tracing::debug!(task = %self.id, "task completed");
        if let Some(result) = result {
            if let Err(err) = result.complete(value) {
                log::warn!("{} could not publish its result: {}", self.id, err);
            }
        }
        self.dispose();
    }

    fn abort(self: &Arc<Self>, err: TaskError) {
        let result = {
            let mut inner = self.inner.lock();
            if inner.torn_down {
                return;
            }
            inner.state.transition_to_finished(TaskState::Failed);
            inner.result.as_ref().and_then(ResultSlot::get)
        };

        tracing::debug!(task = %self.id, error = %err, "task aborted");
        if let Some(result) = result {
            if let Err(err) = result.fail(err) {
                log::warn!("{} could not publish its failure: {}", self.id, err);
            }
        }
        self.dispose();
    }
}

impl<B: TaskBody> TaskControl for GeneratorTask<B> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    fn dispose(&self) {
        dbg_context!(self.id, self.compact_state(), "dispose", {
            let (wake, previous, body, result, scheduler, key) = {
                let mut inner = self.inner.lock();
                if inner.torn_down {
                    return;
                }
                inner.torn_down = true;
                inner.state.transition_to_finished(TaskState::Disposed);
                (
                    inner.wake.take(),
                    inner.wake_previous.take(),
                    inner.body.take(),
                    inner.result.take(),
                    inner.scheduler.take(),
                    inner.registry_key.take(),
                )
            };

            if let Some(wake) = wake {
                wake.future.dispose();
            }
            drop(previous);
            if let Some(mut body) = body {
                body.dispose();
            }
            match result.as_ref().and_then(ResultSlot::get) {
                Some(result) if !result.is_resolved() => result.dispose(),
                _ => {}
            }
            if let (Some(scheduler), Some(key)) = (scheduler.and_then(|s| s.upgrade()), key) {
                scheduler.unregister_task(key);
            }

            tracing::debug!(task = %self.id, "task disposed");
        });
        TaskDebugger::unregister(self.id);
    }
}
