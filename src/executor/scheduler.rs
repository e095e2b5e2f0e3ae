use std::mem;

use super::WorkItem;

/// Handle returned by [`Scheduler::add_step_listener`](super::Scheduler::add_step_listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepListenerId(u64);

/// Once-per-tick callbacks, fired in registration order after the work queue has been drained.
#[derive(Default)]
pub(super) struct StepListeners {
    next_id: u64,
    listeners: Vec<(StepListenerId, WorkItem)>,
}

impl StepListeners {
    pub(super) fn add(&mut self, listener: WorkItem) -> StepListenerId {
        let id = StepListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub(super) fn remove(&mut self, id: StepListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.listeners.len()
    }

    pub(super) fn take_all(&mut self) -> Vec<WorkItem> {
        mem::take(&mut self.listeners)
            .into_iter()
            .map(|(_, listener)| listener)
            .collect()
    }

    pub(super) fn clear(&mut self) {
        self.listeners.clear();
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::StepListeners;

    #[test]
    fn removed_listeners_do_not_fire() {
        let mut listeners = StepListeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let ids: Vec<_> = (0..3)
            .map(|i| {
                let log = log.clone();
                listeners.add(Box::new(move || log.lock().push(i)))
            })
            .collect();

        assert!(listeners.remove(ids[1]));
        assert!(!listeners.remove(ids[1]));
        assert_eq!(listeners.len(), 2);

        for listener in listeners.take_all() {
            listener();
        }
        assert_eq!(*log.lock(), vec![0, 2]);
        assert_eq!(listeners.len(), 0);
    }
}
