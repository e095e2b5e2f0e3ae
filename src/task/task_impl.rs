//! Building task bodies
//!
//! Rust has no stable generators, so a task body is any [`TaskBody`]: a value that is resumed
//! once per step and answers with its next directive. Two ready-made shapes cover most tasks:
//!
//! * [`from_iter`] turns a lazy iterator of directives into a body. The iterator is advanced one
//!   item per step, so side effects inside `map`/`from_fn` closures happen at the right time.
//!   Dropping the iterator is the body's cleanup.
//! * [`from_fn`] wraps a closure that is called once per step with the [`TaskContext`]. State that
//!   must survive across suspension points lives in the closure's captures, usually a small
//!   `match` on a step counter. A cleanup closure can be attached with [`FnTask::with_cleanup`].
//!
//! # Results
//!
//! A body finishes either by returning [`Directive::Result`] or by running out of directives
//! (`Ok(None)`), in which case the task's future completes with `None`. Returning `Err` fails the
//! task's future with that error.
use std::{fmt, marker::PhantomData};

use super::{Directive, Resume, TaskBody, TaskContext};

/// Creates a body that calls `f` once per step.
pub fn from_fn<T, F>(f: F) -> FnTask<F, T>
where
    F: FnMut(&mut TaskContext<'_>) -> Resume<T> + Send + 'static,
    T: Send + 'static,
{
    FnTask {
        f,
        cleanup: None,
        _marker: PhantomData,
    }
}

/// Creates a body that yields the items of `iter` one per step.
pub fn from_iter<T, I>(iter: I) -> IterTask<I::IntoIter>
where
    I: IntoIterator<Item = Directive<T>>,
    I::IntoIter: Send + 'static,
    T: Send + 'static,
{
    IterTask {
        iter: Some(iter.into_iter()),
    }
}

pub struct FnTask<F, T> {
    f: F,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> FnTask<F, T> {
    /// Runs `cleanup` if the task is disposed before the body finishes.
    pub fn with_cleanup<C>(mut self, cleanup: C) -> Self
    where
        C: FnOnce() + Send + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

impl<F, T> TaskBody for FnTask<F, T>
where
    F: FnMut(&mut TaskContext<'_>) -> Resume<T> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn resume(&mut self, cx: &mut TaskContext<'_>) -> Resume<T> {
        (self.f)(cx)
    }

    fn dispose(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl<F, T> fmt::Debug for FnTask<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask")
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct IterTask<I> {
    iter: Option<I>,
}

impl<T, I> TaskBody for IterTask<I>
where
    I: Iterator<Item = Directive<T>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn resume(&mut self, _cx: &mut TaskContext<'_>) -> Resume<T> {
        Ok(self.iter.as_mut().and_then(Iterator::next))
    }

    fn dispose(&mut self) {
        self.iter = None;
    }
}

/// Runs a body but drops its result value, so bodies of any output type can be nested.
#[derive(Debug)]
pub struct Discarding<B>(B);

impl<B> Discarding<B> {
    pub fn new(body: B) -> Self {
        Discarding(body)
    }
}

impl<B: TaskBody> TaskBody for Discarding<B> {
    type Output = ();

    fn resume(&mut self, cx: &mut TaskContext<'_>) -> Resume<()> {
        Ok(self.0.resume(cx)?.map(|d| d.map_result(drop)))
    }

    fn dispose(&mut self) {
        self.0.dispose()
    }
}
