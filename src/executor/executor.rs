use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Instant,
};

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

use super::{
    config::Config,
    queue::WorkQueue,
    scheduler::{StepListenerId, StepListeners},
    task::TaskBuilder,
    WorkItem,
};
use crate::{
    driver::TimerDriver,
    error::TaskError,
    future::{Future, Waitable},
    task::{ExecutionPolicy, Schedulable, TaskBody, TaskControl, TaskHandle},
    utils::thread_id,
};

scoped_tls::scoped_thread_local!(static CURRENT: Scheduler);

new_key_type! {
    /// Key of a live task in the scheduler's registry
    pub(crate) struct TaskKey;
}

struct Shared {
    queue: WorkQueue,
    listeners: Mutex<StepListeners>,
    timers: Mutex<TimerDriver>,
    tasks: Mutex<SlotMap<TaskKey, Arc<dyn TaskControl>>>,
    tick: AtomicU64,
    disposed: AtomicBool,
    /// Thread that pumps the queue; only it may run ticks.
    owner: usize,
    config: Config,
}

/// Cooperative, single-threaded task scheduler.
///
/// `Scheduler` is a cheap handle; clones share the same queue. Work can be queued and futures
/// resolved from any thread, but ticks only ever run on the thread that created the scheduler,
/// so task bodies and the work items they queue never run in parallel with each other.
///
/// A tick ([`step`](Self::step)) moves expired timers onto the queue, runs exactly the work items
/// that were queued when the tick began, then fires and clears the step listeners. Work queued
/// during a tick runs on the next one.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub(crate) struct WeakScheduler {
    shared: Weak<Shared>,
}

impl WeakScheduler {
    pub(crate) fn upgrade(&self) -> Option<Scheduler> {
        self.shared.upgrade().map(|shared| Scheduler { shared })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: WorkQueue::new_with_capacity(config.queue_capacity),
                listeners: Mutex::new(StepListeners::default()),
                timers: Mutex::new(TimerDriver::new()),
                tasks: Mutex::new(SlotMap::with_key()),
                tick: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                owner: thread_id::current(),
                config,
            }),
        }
    }

    /// The scheduler whose tick is running on this thread, if any.
    pub fn current() -> Option<Scheduler> {
        if CURRENT.is_set() {
            Some(CURRENT.with(Scheduler::clone))
        } else {
            None
        }
    }

    pub(crate) fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Number of ticks run so far.
    pub fn tick(&self) -> u64 {
        self.shared.tick.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Number of tasks that have been started and not yet finished or disposed.
    pub fn live_tasks(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    /// Queues `action` to run on a later tick. Safe to call from any thread.
    pub fn queue_work_item<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_disposed() {
            tracing::trace!("dropping work item queued on a disposed scheduler");
            return;
        }
        self.shared.queue.push(Box::new(action));
    }

    /// Registers a callback that fires once, at the end of the current (or next) tick.
    pub fn add_step_listener<F>(&self, listener: F) -> StepListenerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.shared.listeners.lock().add(Box::new(listener));
        self.shared.queue.notify();
        id
    }

    pub fn remove_step_listener(&self, id: StepListenerId) -> bool {
        self.shared.listeners.lock().remove(id)
    }

    /// Starts `schedulable` and returns a future that resolves when it has run to its end.
    ///
    /// Nothing runs synchronously: sleeps register a timer, yields and tasks go through the
    /// queue. For [`Schedulable::RunToCompletion`] the task's own policy governs its lifetime and
    /// `policy` is unused; the other variants hold no task to keep alive.
    pub fn start(&self, schedulable: Schedulable, policy: ExecutionPolicy) -> Future<()> {
        let future = Future::new();
        let weak = future.downgrade();

        match schedulable {
            Schedulable::Sleep(duration) => {
                let deadline = Instant::now() + duration;
                let key = self.shared.timers.lock().insert(
                    deadline,
                    Box::new(move || {
                        if let Some(future) = weak.upgrade() {
                            let _ = future.try_complete(());
                        }
                    }),
                );
                // The owner may be parked until a later deadline.
                self.shared.queue.notify();

                let scheduler = self.downgrade();
                future.register_on_dispose(move |_| {
                    if let Some(scheduler) = scheduler.upgrade() {
                        scheduler.shared.timers.lock().cancel(key);
                    }
                });
            }
            Schedulable::Yield => self.queue_work_item(move || {
                if let Some(future) = weak.upgrade() {
                    let _ = future.try_complete(());
                }
            }),
            Schedulable::WaitForNextStep => {
                self.add_step_listener(move || {
                    if let Some(future) = weak.upgrade() {
                        let _ = future.try_complete(());
                    }
                });
            }
            Schedulable::RunToCompletion { task, policy } => {
                let inner = self.start_task(task, policy);
                inner.register_on_complete(move |inner| {
                    if let Some(future) = weak.upgrade() {
                        let _ = match inner.take_result() {
                            Ok(_) => future.complete(()),
                            Err(err) => future.fail(err),
                        };
                    }
                });
                // Holding the task's future here ties a `RunWhileFutureLives` task to ours.
                future.register_on_dispose(move |_| inner.dispose());
            }
        }

        tracing::trace!(?policy, "schedulable started");
        future
    }

    /// Starts a task body and returns the future for its result.
    ///
    /// The future holds `None` if the body ran out of directives without yielding a result.
    pub fn start_task<B: TaskBody>(
        &self,
        body: B,
        policy: ExecutionPolicy,
    ) -> Future<Option<B::Output>> {
        self.spawn(body, policy).into_future()
    }

    /// Like [`start_task`](Self::start_task), but also returns a handle that can dispose the task
    /// directly, whatever its policy.
    pub fn spawn<B: TaskBody>(&self, body: B, policy: ExecutionPolicy) -> TaskHandle<B::Output> {
        TaskBuilder::new(body).policy(policy).spawn(self)
    }

    /// Runs one tick. Returns whether any work item or step listener ran.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a tick on the same thread.
    pub fn step(&self) -> bool {
        assert!(
            !CURRENT.is_set(),
            "There is already a scheduler tick running on this thread."
        );
        #[cfg(feature = "debugging")]
        assert_eq!(
            thread_id::current(),
            self.shared.owner,
            "scheduler stepped from a thread that does not own it"
        );

        if self.is_disposed() {
            return false;
        }
        CURRENT.set(self, || self.run_tick())
    }

    fn run_tick(&self) -> bool {
        let shared = &self.shared;
        let tick = shared.tick.fetch_add(1, Ordering::AcqRel) + 1;

        let expired = shared.timers.lock().expire(Instant::now());
        let timers = expired.len();
        for item in expired {
            shared.queue.push(item);
        }

        // Only what is queued right now belongs to this tick.
        let budget = shared.queue.len();
        let mut ran = 0;
        while ran < budget {
            match shared.queue.pop() {
                Some(item) => {
                    item();
                    ran += 1;
                }
                None => break,
            }
        }

        let listeners: Vec<WorkItem> = shared.listeners.lock().take_all();
        let fired = listeners.len();
        for listener in listeners {
            listener();
        }

        tracing::trace!(tick, timers, ran, listeners = fired, "scheduler tick");
        ran > 0 || fired > 0
    }

    /// Blocks until `future` resolves.
    ///
    /// On the scheduler's own thread this pumps ticks, parking between them while there is
    /// nothing to do. Any other thread blocks on the future's completion event. A failed future
    /// is reported as [`TaskError::FutureFailed`] wrapping its error.
    pub fn block_on(&self, future: &dyn Waitable) -> Result<(), TaskError> {
        self.pump_until_resolved(future)?;
        match future.peek_error() {
            Some(err) => Err(TaskError::FutureFailed(Arc::new(err))),
            None => Ok(()),
        }
    }

    /// Blocks until `future` resolves and returns a copy of its value; see
    /// [`block_on`](Self::block_on).
    pub fn wait_for<T>(&self, future: &Future<T>) -> Result<T, TaskError>
    where
        T: Clone + Send + 'static,
    {
        self.pump_until_resolved(future)?;
        future
            .result()
            .map_err(|err| TaskError::FutureFailed(Arc::new(err)))
    }

    fn pump_until_resolved(&self, future: &dyn Waitable) -> Result<(), TaskError> {
        if future.is_resolved() {
            return Ok(());
        }
        if CURRENT.is_set() {
            return Err(TaskError::NestedWait);
        }

        if thread_id::current() == self.shared.owner {
            let scheduler = self.downgrade();
            future.on_resolved(Box::new(move || {
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.shared.queue.notify();
                }
            }));

            while !future.is_resolved() && !future.is_disposed() {
                if self.is_disposed() {
                    return Err(TaskError::Disposed);
                }
                if !self.step() {
                    let deadline = self.shared.timers.lock().next_deadline();
                    self.shared.queue.park(deadline);
                }
            }
        } else {
            future.completion_event().wait()?;
        }

        if future.is_resolved() {
            Ok(())
        } else {
            Err(TaskError::Disposed)
        }
    }

    /// Disposes every live task, then drops queued work, step listeners and timers without running
    /// them. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let tasks: Vec<_> = self
            .shared
            .tasks
            .lock()
            .drain()
            .map(|(_, task)| task)
            .collect();
        let task_count = tasks.len();
        for task in tasks {
            task.dispose();
        }

        let dropped = self.shared.queue.clear();
        self.shared.listeners.lock().clear();
        self.shared.timers.lock().clear();
        self.shared.queue.notify();

        tracing::debug!(tasks = task_count, dropped, "scheduler disposed");
    }

    pub(crate) fn register_task(&self, task: Arc<dyn TaskControl>) -> Option<TaskKey> {
        if self.is_disposed() {
            return None;
        }
        Some(self.shared.tasks.lock().insert(task))
    }

    pub(crate) fn unregister_task(&self, key: TaskKey) {
        self.shared.tasks.lock().remove(key);
    }

    pub(crate) fn report_background_error(&self, err: &TaskError) {
        match &self.shared.config.on_background_error {
            Some(handler) => handler(err),
            None => log::error!("background task failed: {}", err),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick", &self.tick())
            .field("queued", &self.shared.queue.len())
            .field("timers", &self.shared.timers.lock().len())
            .field("live_tasks", &self.live_tasks())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };

    use parking_lot::Mutex;

    use super::Scheduler;
    use crate::{
        error::TaskError,
        future::Future,
        task::{ExecutionPolicy, Schedulable},
        utils::init_logging,
    };

    #[test]
    fn work_queued_during_a_tick_runs_next_tick() {
        init_logging();
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_log = log.clone();
        let inner_scheduler = scheduler.clone();
        scheduler.queue_work_item(move || {
            let tick = inner_scheduler.tick();
            inner_log.lock().push(("outer", tick));
            let nested_log = inner_log.clone();
            let nested_scheduler = inner_scheduler.clone();
            inner_scheduler.queue_work_item(move || {
                nested_log.lock().push(("nested", nested_scheduler.tick()));
            });
        });

        assert!(scheduler.step());
        assert_eq!(*log.lock(), vec![("outer", 1)]);
        assert!(scheduler.step());
        assert_eq!(*log.lock(), vec![("outer", 1), ("nested", 2)]);
        assert!(!scheduler.step());
    }

    #[test]
    fn step_listeners_fire_once_after_the_drain() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let log = log.clone();
            scheduler.add_step_listener(move || log.lock().push(name));
        }
        let removed = {
            let log = log.clone();
            scheduler.add_step_listener(move || log.lock().push("removed"))
        };
        assert!(scheduler.remove_step_listener(removed));

        let work_log = log.clone();
        scheduler.queue_work_item(move || work_log.lock().push("work"));

        scheduler.step();
        scheduler.step();
        assert_eq!(*log.lock(), vec!["work", "first", "second"]);
    }

    #[test]
    fn sleep_never_resumes_early() {
        let scheduler = Scheduler::new();
        let started = Instant::now();
        let sleep = scheduler.start(
            Schedulable::Sleep(Duration::from_millis(30)),
            ExecutionPolicy::RunWhileFutureLives,
        );

        scheduler.wait_for(&sleep).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn disposing_a_sleep_cancels_its_timer() {
        let scheduler = Scheduler::new();
        let sleep = scheduler.start(
            Schedulable::Sleep(Duration::from_secs(60)),
            ExecutionPolicy::RunWhileFutureLives,
        );
        sleep.dispose();
        assert_eq!(scheduler.shared.timers.lock().len(), 0);
    }

    #[test]
    fn yield_and_next_step_resolve_on_later_ticks() {
        let scheduler = Scheduler::new();
        let yielded = scheduler.start(Schedulable::Yield, ExecutionPolicy::RunWhileFutureLives);
        let next = scheduler.start(
            Schedulable::WaitForNextStep,
            ExecutionPolicy::RunWhileFutureLives,
        );
        assert!(!yielded.is_resolved());
        assert!(!next.is_resolved());

        scheduler.step();
        assert!(yielded.is_resolved());
        assert!(next.is_resolved());
    }

    #[test]
    fn wait_for_from_a_foreign_thread_blocks_on_the_event() {
        let scheduler = Scheduler::new();
        let future = Future::new();

        let waiter_scheduler = scheduler.clone();
        let waiter_future = future.clone();
        let waiter = thread::spawn(move || waiter_scheduler.wait_for(&waiter_future));

        thread::sleep(Duration::from_millis(5));
        future.complete(5_u32).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), 5);
    }

    #[test]
    fn wait_for_pumps_until_a_worker_resolves() {
        let scheduler = Scheduler::new();
        let future: Future<&str> = Future::new();
        let producer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.fail(TaskError::OperationPending).unwrap();
        });

        match scheduler.wait_for(&future) {
            Err(TaskError::FutureFailed(cause)) => {
                assert!(matches!(*cause, TaskError::OperationPending))
            }
            other => panic!("unexpected {other:?}"),
        }
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_inside_a_tick_is_rejected() {
        let scheduler = Scheduler::new();
        let outcome = Arc::new(Mutex::new(None));

        let inner = scheduler.clone();
        let slot = outcome.clone();
        scheduler.queue_work_item(move || {
            let pending: Future<()> = Future::new();
            *slot.lock() = Some(inner.wait_for(&pending));
        });
        scheduler.step();

        assert!(matches!(*outcome.lock(), Some(Err(TaskError::NestedWait))));
    }

    #[test]
    fn dispose_drops_queued_work_unrun() {
        let scheduler = Scheduler::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            scheduler.queue_work_item(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.add_step_listener(|| panic!("listener must not fire"));

        scheduler.dispose();
        scheduler.dispose();
        assert!(!scheduler.step());
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        scheduler.queue_work_item(|| panic!("queued after dispose"));
        assert!(!scheduler.step());
        assert!(scheduler.is_disposed());
    }

    #[test]
    fn current_is_set_only_inside_a_tick() {
        let scheduler = Scheduler::new();
        assert!(Scheduler::current().is_none());

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let expected = scheduler.clone();
        scheduler.queue_work_item(move || {
            *slot.lock() = Scheduler::current().map(|s| s.ptr_eq(&expected));
        });
        scheduler.step();
        assert_eq!(*seen.lock(), Some(true));
    }
}
