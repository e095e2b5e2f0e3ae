use core::fmt;

/// Lifecycle of a generator task.
///
/// ```text
/// Created -> Running -> (Suspended -> Running)* -> Completed | Failed | Disposed
/// ```
///
/// `Disposed` is only reached when the task is torn down before it finished; a task that
/// completed or failed keeps that state after its resources are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Suspended,
    Completed,
    Failed,
    Disposed,
}

#[must_use]
pub(super) enum TransitionToRunning {
    Run,
    Closed,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Disposed
        )
    }

    pub(super) fn transition_to_running(&mut self) -> TransitionToRunning {
        match *self {
            TaskState::Created | TaskState::Suspended => {
                *self = TaskState::Running;
                TransitionToRunning::Run
            }
            TaskState::Running => {
                debug_assert!(false, "task resumed while already running");
                TransitionToRunning::Closed
            }
            _ => TransitionToRunning::Closed,
        }
    }

    pub(super) fn transition_to_suspended(&mut self) {
        if *self == TaskState::Running {
            *self = TaskState::Suspended;
        }
    }

    /// Moves to a finished state unless the task already finished. Returns whether it moved.
    pub(super) fn transition_to_finished(&mut self, state: TaskState) -> bool {
        debug_assert!(state.is_finished());
        if self.is_finished() {
            return false;
        }
        *self = state;
        true
    }

    pub(super) fn to_compact_string(self) -> &'static str {
        match self {
            TaskState::Created => "C",
            TaskState::Running => "R",
            TaskState::Suspended => "S",
            TaskState::Completed => "D",
            TaskState::Failed => "F",
            TaskState::Disposed => "X",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::{TaskState, TransitionToRunning};

    #[test]
    fn finished_states_are_sticky() {
        let mut state = TaskState::Created;
        assert!(matches!(
            state.transition_to_running(),
            TransitionToRunning::Run
        ));
        state.transition_to_suspended();
        assert_eq!(state, TaskState::Suspended);

        assert!(state.transition_to_finished(TaskState::Completed));
        assert!(!state.transition_to_finished(TaskState::Disposed));
        assert_eq!(state, TaskState::Completed);
        assert!(matches!(
            state.transition_to_running(),
            TransitionToRunning::Closed
        ));
        assert_eq!(state.to_compact_string(), "D");
    }
}
