use std::{cell::RefCell, collections::HashMap, time::Instant};

use super::TaskId;

thread_local! {
    static DEBUGGER: RefCell<Option<TaskDebugger>> = RefCell::new(None)
}

/// Per-thread trace of task activity.
///
/// Tasks registered on this thread that pass the filter (by default: tasks with a label) get a
/// `log::debug!` line every time the adapter enters one of its operations.
pub struct TaskDebugger {
    label: Option<&'static str>,
    registry: HashMap<TaskId, TaskInfo>,
    filter: fn(Option<&'static str>) -> bool,
    task_count: usize,
    current_task: Option<TaskId>,
    context: Vec<&'static str>,
}

#[derive(Debug)]
struct TaskInfo {
    id: TaskId,
    label: Option<&'static str>,
    ts: Instant,
}

fn has_label(label: Option<&'static str>) -> bool {
    label.is_some()
}

impl TaskInfo {
    fn new(id: TaskId, label: Option<&'static str>) -> Self {
        Self {
            id,
            label,
            ts: Instant::now(),
        }
    }
}

impl TaskDebugger {
    fn with<F, R>(f: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        DEBUGGER.with(|dbg| {
            let mut dbg = dbg.borrow_mut();
            let dbg = dbg.get_or_insert_with(|| TaskDebugger {
                label: None,
                registry: HashMap::new(),
                filter: has_label,
                task_count: 0,
                current_task: None,
                context: Vec::new(),
            });
            f(dbg)
        })
    }

    /// Set label for the next task to be spawned on this thread. Labels are used for filtering
    /// tasks to inspect
    pub fn set_label(label: &'static str) {
        Self::with(|dbg| {
            dbg.label = Some(label);
        })
    }

    pub fn set_filter(filter: fn(Option<&'static str>) -> bool) {
        Self::with(|dbg| {
            dbg.filter = filter;
        });
    }

    /// Logs every traced task registered longer ago than `older_than` and returns how many there
    /// were.
    pub fn debug_aged_tasks(older_than: std::time::Duration) -> usize {
        Self::with(|dbg| {
            let mut count = 0;
            for info in dbg.registry.values() {
                let age = info.ts.elapsed();
                if age > older_than {
                    count += 1;
                    dbg.debug_task_info(info, None, format!("age: {:?}", age).as_str())
                }
            }
            if count > 0 {
                log::debug!("found {} tasks older than {:?}", count, older_than)
            }
            count
        })
    }

    /// Number of live tasks registered on this thread, traced or not.
    pub fn task_count() -> usize {
        Self::with(|dbg| dbg.task_count)
    }

    pub fn current_task() -> Option<TaskId> {
        Self::with(|dbg| dbg.current_task)
    }

    pub(super) fn register(id: TaskId, label: Option<&'static str>) -> bool {
        Self::with(|dbg| {
            dbg.task_count += 1;
            let label = label.or_else(|| dbg.label.take());
            if (dbg.filter)(label) {
                dbg.registry.insert(id, TaskInfo::new(id, label));
                true
            } else {
                false
            }
        })
    }

    pub(super) fn unregister(id: TaskId) {
        Self::with(|dbg| {
            dbg.task_count = dbg.task_count.saturating_sub(1);
            dbg.registry.remove(&id);
            if dbg.current_task == Some(id) {
                dbg.current_task = None;
            }
        });
    }

    pub(super) fn leave() {
        Self::with(|dbg| {
            dbg.context.pop();
        });
    }

    pub(super) fn set_current_task(id: TaskId) {
        Self::with(|dbg| {
            dbg.current_task = Some(id);
        });
    }

    pub(super) fn enter<S>(id: TaskId, ctx: &'static str, state: S) -> bool
    where
        S: FnOnce() -> &'static str,
    {
        Self::with(|dbg| {
            if let Some(info) = dbg.registry.get(&id) {
                dbg.context.push(ctx);
                dbg.debug_task_info(info, Some(state()), "");
                true
            } else {
                false
            }
        })
    }

    fn debug_task_info(&self, info: &TaskInfo, state: Option<&'static str>, msg: &str) {
        log::debug!(
            "[{}][{}][label:{}][{}]{}",
            info.id,
            state.unwrap_or("?"),
            info.label.unwrap_or(""),
            self.context.join("|"),
            msg
        )
    }
}
