use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

static ID_GEN: Lazy<AtomicUsize> = Lazy::new(|| AtomicUsize::new(1));

thread_local! {
    static THREAD_ID: usize = gen_id();
}

/// Generate thread id.
pub(crate) fn gen_id() -> usize {
    ID_GEN.fetch_add(1, Ordering::AcqRel)
}

/// Id of the calling thread, assigned on first use.
pub(crate) fn current() -> usize {
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::current;

    #[test]
    fn ids_are_stable_per_thread_and_distinct_across_threads() {
        let here = current();
        assert_eq!(here, current());
        let there = thread::spawn(current).join().unwrap();
        assert_ne!(here, there);
    }
}
