use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use super::{Future, Waitable};
use crate::error::TaskError;

/// Completes once every one of `futures` has resolved. Errors stay on the inputs.
pub fn wait_for_all(futures: &[&dyn Waitable]) -> Future<()> {
    let all = Future::new();
    if futures.is_empty() {
        let _ = all.complete(());
        return all;
    }

    let remaining = Arc::new(AtomicUsize::new(futures.len()));
    for future in futures {
        let all = all.clone();
        let remaining = remaining.clone();
        future.on_resolved(Box::new(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let _ = all.complete(());
            }
        }));
    }
    all
}

/// Completes with whichever of `futures` resolves first.
pub fn wait_for_first<T: Send + 'static>(futures: Vec<Future<T>>) -> Future<Future<T>> {
    let first = Future::new();
    for future in futures {
        let first = first.clone();
        future.register_on_complete(move |f| {
            // Losers of the race are handed back and dropped.
            let _ = first.try_complete(f.clone());
        });
    }
    first
}

/// Runs blocking `work` on a fresh OS thread and resolves the returned future with its outcome.
pub fn run_in_thread<T, F>(work: F) -> Future<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TaskError> + Send + 'static,
{
    let future = Future::new();
    let producer = future.clone();
    let spawned = thread::Builder::new()
        .name("tasklib-run-in-thread".to_string())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work))
                .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));
            let resolved = match outcome {
                Ok(value) => producer.complete(value),
                Err(err) => producer.fail(err),
            };
            if resolved.is_err() {
                log::warn!("run_in_thread future was resolved by someone else");
            }
        });

    if let Err(err) = spawned {
        let _ = future.fail(err.into());
    }
    future
}

#[cfg(test)]
mod test {
    use std::{io, thread, time::Duration};

    use super::{run_in_thread, wait_for_all, wait_for_first};
    use crate::{
        error::TaskError,
        future::{Future, Waitable},
    };

    #[test]
    fn wait_for_all_waits_for_every_input() {
        let a: Future<u8> = Future::new();
        let b: Future<&str> = Future::new();
        let all = wait_for_all(&[&a as &dyn Waitable, &b]);

        a.complete(1).unwrap();
        assert!(!all.is_resolved());
        b.fail(TaskError::Disposed).unwrap();
        assert!(all.is_resolved());
        assert!(!all.failed());
    }

    #[test]
    fn wait_for_all_of_nothing_is_complete() {
        assert!(wait_for_all(&[]).is_resolved());
    }

    #[test]
    fn wait_for_first_yields_the_winner() {
        let slow: Future<u32> = Future::new();
        let fast: Future<u32> = Future::new();
        let first = wait_for_first(vec![slow.clone(), fast.clone()]);

        fast.complete(2).unwrap();
        slow.complete(1).unwrap();

        let winner = first.take_result().unwrap();
        assert!(winner.ptr_eq(&fast));
        assert_eq!(winner.result().unwrap(), 2);
    }

    #[test]
    fn run_in_thread_reports_value_and_error() {
        let ok = run_in_thread(|| {
            thread::sleep(Duration::from_millis(2));
            Ok(40 + 2)
        });
        ok.completion_event().wait().unwrap();
        assert_eq!(ok.result().unwrap(), 42);

        let err: Future<()> =
            run_in_thread(|| Err(io::Error::new(io::ErrorKind::NotFound, "gone").into()));
        err.completion_event().wait().unwrap();
        assert!(matches!(err.error(), Some(TaskError::Io(e)) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn run_in_thread_captures_panics() {
        let f: Future<()> = run_in_thread(|| panic!("worker blew up"));
        f.completion_event().wait().unwrap();
        assert!(matches!(f.error(), Some(TaskError::Panicked(msg)) if msg == "worker blew up"));
    }
}
