//! Continuations: the callback-shaped handles asynchronous operations use
//! to resume a computation.

use crate::coroutine::{CoroutineId, Drive};
use crate::group::Branch;
use crate::step::{Payload, Yield};
use std::fmt;
use std::rc::Rc;

/// Something an error-first completion can be delivered to.
///
/// Implemented by [`Next`] (resumes the computation) and [`Branch`] (feeds
/// a sync group).
pub trait Settle<V, E>: Sized {
    fn settle(&self, outcome: Result<V, E>);

    /// Error-first entry point: a non-null `error` takes the error path and
    /// `value` is discarded.
    fn call(&self, error: Option<E>, value: V) {
        match error {
            Some(err) => self.settle(Err(err)),
            None => self.settle(Ok(value)),
        }
    }

    fn error(&self, error: E) {
        self.settle(Err(error))
    }

    /// Resumes with the `n`-th positional argument instead of the first
    /// success value. `n == 0` always ignores errors: the caller wants the
    /// error slot itself.
    fn arg(self, n: usize, ignore_error: bool) -> ArgAt<Self> {
        ArgAt {
            target: self,
            index: n,
            ignore_error: ignore_error || n == 0,
        }
    }

    /// Resumes with the whole positional argument list, error slot
    /// included and uninterpreted.
    fn args(self) -> AllArgs<Self> {
        AllArgs { target: self }
    }
}

/// See [`Settle::arg`].
#[derive(Debug)]
pub struct ArgAt<K> {
    target: K,
    index: usize,
    ignore_error: bool,
}

impl<K> ArgAt<K> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ignores_error(&self) -> bool {
        self.ignore_error
    }

    pub fn call<V, E>(&self, args: Vec<V>)
    where
        K: Settle<V, E>,
        V: Payload<Error = E>,
    {
        let mut args = args.into_iter();
        let mut head = args.next();
        if !self.ignore_error {
            if let Some(slot) = head.take() {
                match slot.into_error() {
                    Ok(slot) => head = Some(slot),
                    Err(err) => return self.target.settle(Err(err)),
                }
            }
        }
        let value = if self.index == 0 {
            head
        } else {
            args.nth(self.index - 1)
        };
        self.target.settle(Ok(value.unwrap_or_else(V::empty)));
    }
}

/// See [`Settle::args`].
#[derive(Debug)]
pub struct AllArgs<K> {
    target: K,
}

impl<K> AllArgs<K> {
    pub fn call<V, E>(&self, args: Vec<V>)
    where
        K: Settle<V, E>,
        V: Payload,
    {
        self.target.settle(Ok(V::collect(args)))
    }
}

/// The continuation handed to a step procedure.
///
/// A `Next` is tagged with the generation of the suspension point it was
/// issued for. Clones race: the first one to fire advances the generation
/// and every sibling becomes a no-op. Firing always goes through the next
/// tick of the loop.
pub struct Next<V, E> {
    core: Rc<dyn Drive<V, E>>,
    generation: u64,
}

impl<V: 'static, E: 'static> Next<V, E> {
    pub(crate) fn new(core: Rc<dyn Drive<V, E>>, generation: u64) -> Self {
        Self { core, generation }
    }

    pub fn coroutine(&self) -> CoroutineId {
        self.core.id()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether firing this continuation would be ignored.
    pub fn is_stale(&self) -> bool {
        self.core.is_completed() || self.core.generation() != self.generation
    }

    /// Starts a sync group branch. The group is created on first use and
    /// the branch's result lands at its submission index.
    pub fn parallel(&self) -> Branch<V, E> {
        let group = self.core.group();
        let index = group.submit();
        tracing::trace!(coroutine = %self.core.id(), branch = index, "branch submitted");
        Branch::new(group, index, self.core.id())
    }

    /// Joins the current sync group and suspends until it settles.
    ///
    /// Resumes with the ordered results, with the first branch error, or
    /// with [`Payload::empty`] when no branch was started. The group is
    /// detached, so a later [`parallel`](Next::parallel) starts a new one.
    pub fn sync<T>(&self) -> Yield<V, E, T>
    where
        V: Payload,
    {
        match self.core.detach_group() {
            None => {
                tracing::trace!(coroutine = %self.core.id(), "sync without branches");
                self.settle(Ok(V::empty()));
            }
            Some(group) => {
                tracing::trace!(
                    coroutine = %self.core.id(),
                    running = group.running(),
                    finished = group.finished(),
                    "joining sync group"
                );
                let next = self.clone();
                group.on_settled(Box::new(move |outcome| next.settle(outcome.map(V::collect))));
            }
        }
        Yield::Suspend
    }
}

impl<V: 'static, E: 'static> Settle<V, E> for Next<V, E> {
    fn settle(&self, outcome: Result<V, E>) {
        let core = self.core.clone();
        let generation = self.generation;
        self.core
            .schedule()
            .next_tick(Box::new(move || core.fire(generation, outcome)));
    }
}

impl<V, E> Clone for Next<V, E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            generation: self.generation,
        }
    }
}

impl<V, E> fmt::Debug for Next<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("coroutine", &self.core.id())
            .field("generation", &self.generation)
            .finish()
    }
}
