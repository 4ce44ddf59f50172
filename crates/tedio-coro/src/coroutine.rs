//! The suspended-computation driver.
//!
//! [`start`] builds a computation around a step procedure and kicks it off.
//! From then on the computation is only advanced from a tick of the loop:
//! a [`Next`] fires, the driver checks its generation, and re-enters the
//! state machine with the value or the error.

use crate::error::Fault;
use crate::group::SyncGroup;
use crate::next::{Next, Settle};
use crate::outcome::{Callback, Completion, Outcome};
use crate::runtime::Schedule;
use crate::step::{Resume, Step, Yield};
use futures::FutureExt;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoroutineId(u64);

impl CoroutineId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "co#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NotStarted,
    Suspended,
    /// Only while the driver is inside [`Step::resume`].
    Resuming,
    Completed,
}

/// When the first resumption runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kickoff {
    /// On the next tick; the sink never fires inside `start`.
    #[default]
    Deferred,
    /// Inside `start` itself.
    Immediate,
}

/// Per-call options for [`start`].
#[derive(Debug, Clone, Default)]
pub struct Options<C = ()> {
    /// Place the continuation first in the argument list instead of last.
    pub prepend: bool,
    /// Always return an [`Outcome`]; a supplied callback becomes an
    /// ordinary [`Arg::Callback`] argument.
    pub no_callback: bool,
    pub kickoff: Kickoff,
    /// The binding the step procedure runs against.
    pub context: C,
}

impl Options<()> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C> Options<C> {
    pub fn prepend(mut self, prepend: bool) -> Self {
        self.prepend = prepend;
        self
    }

    pub fn no_callback(mut self, no_callback: bool) -> Self {
        self.no_callback = no_callback;
        self
    }

    pub fn kickoff(mut self, kickoff: Kickoff) -> Self {
        self.kickoff = kickoff;
        self
    }

    pub fn with_context<D>(self, context: D) -> Options<D> {
        Options {
            prepend: self.prepend,
            no_callback: self.no_callback,
            kickoff: self.kickoff,
            context,
        }
    }
}

/// One positional argument of a step procedure invocation.
pub enum Arg<V, E, T> {
    Value(V),
    Next(Next<V, E>),
    Callback(Callback<T, E>),
}

impl<V, E, T> fmt::Debug for Arg<V, E, T>
where
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Arg::Next(_) => f.write_str("Next"),
            Arg::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// What a step procedure is built from.
#[derive(Debug)]
pub struct Invocation<C, V, E, T> {
    pub context: C,
    pub args: Vec<Arg<V, E, T>>,
}

impl<C, V, E, T> Invocation<C, V, E, T> {
    /// Removes and returns the continuation argument.
    pub fn take_next(&mut self) -> Option<Next<V, E>> {
        let at = self.args.iter().position(|arg| matches!(arg, Arg::Next(_)))?;
        match self.args.remove(at) {
            Arg::Next(next) => Some(next),
            _ => None,
        }
    }

    /// Removes and returns the callback argument (only present with
    /// [`Options::no_callback`]).
    pub fn take_callback(&mut self) -> Option<Callback<T, E>> {
        let at = self
            .args
            .iter()
            .position(|arg| matches!(arg, Arg::Callback(_)))?;
        match self.args.remove(at) {
            Arg::Callback(callback) => Some(callback),
            _ => None,
        }
    }

    /// The plain values, in order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.args.iter().filter_map(|arg| match arg {
            Arg::Value(value) => Some(value),
            _ => None,
        })
    }

    /// Consumes the invocation, keeping only the plain values.
    pub fn into_values(self) -> Vec<V> {
        self.args
            .into_iter()
            .filter_map(|arg| match arg {
                Arg::Value(value) => Some(value),
                _ => None,
            })
            .collect()
    }
}

/// The computation as seen by its continuations.
pub(crate) trait Drive<V, E> {
    fn id(&self) -> CoroutineId;
    fn generation(&self) -> u64;
    fn is_completed(&self) -> bool;
    fn schedule(&self) -> &Rc<dyn Schedule>;
    /// Resumes the computation if `generation` is still current.
    fn fire(self: Rc<Self>, generation: u64, outcome: Result<V, E>);
    /// The current sync group, created on first use.
    fn group(&self) -> Rc<SyncGroup<V, E>>;
    fn detach_group(&self) -> Option<Rc<SyncGroup<V, E>>>;
}

enum Stage<S> {
    Pending(Box<dyn FnOnce() -> S>),
    Running(S),
    Done,
}

struct Core<S: Step> {
    id: CoroutineId,
    state: Cell<State>,
    generation: Cell<u64>,
    stage: RefCell<Stage<S>>,
    group: RefCell<Option<Rc<SyncGroup<S::Value, S::Error>>>>,
    completion: Completion<S::Output, S::Error>,
    schedule: Rc<dyn Schedule>,
}

impl<S: Step> Core<S> {
    fn next(self: &Rc<Self>) -> Next<S::Value, S::Error> {
        Next::new(self.clone(), self.generation.get())
    }

    /// Builds the state machine and runs the first resumption.
    fn kickoff(self: &Rc<Self>) {
        let stage = std::mem::replace(&mut *self.stage.borrow_mut(), Stage::Done);
        let Stage::Pending(build) = stage else {
            tracing::debug!(coroutine = %self.id, "kickoff after start, ignoring");
            return;
        };

        tracing::debug!(coroutine = %self.id, "starting");
        match panic::catch_unwind(AssertUnwindSafe(build)) {
            Ok(step) => {
                *self.stage.borrow_mut() = Stage::Running(step);
                self.advance(Resume::Start);
            }
            Err(payload) => {
                let fault = Fault::from_panic(payload);
                tracing::warn!(coroutine = %self.id, %fault, "step procedure failed to build");
                self.finish(Err(fault.into()));
            }
        }
    }

    fn advance(self: &Rc<Self>, input: Resume<S::Value, S::Error>) {
        self.state.set(State::Resuming);
        let next = self.next();
        tracing::trace!(
            coroutine = %self.id,
            generation = next.generation(),
            error = input.is_error(),
            "resuming"
        );

        let advanced = panic::catch_unwind(AssertUnwindSafe(|| {
            match &mut *self.stage.borrow_mut() {
                Stage::Running(step) => Some(step.resume(input, &next)),
                _ => None,
            }
        }));
        self.state.set(State::Suspended);

        match advanced {
            Err(payload) => {
                let fault = Fault::from_panic(payload);
                tracing::warn!(coroutine = %self.id, %fault, "driver fault");
                self.finish(Err(fault.into()));
            }
            Ok(None) => {
                tracing::debug!(coroutine = %self.id, "no running step to resume");
            }
            Ok(Some(Err(err))) => self.finish(Err(err)),
            Ok(Some(Ok(Yield::Complete(value)))) => self.finish(Ok(value)),
            Ok(Some(Ok(Yield::Suspend))) => {
                tracing::trace!(coroutine = %self.id, generation = next.generation(), "suspended");
            }
            Ok(Some(Ok(Yield::Await(fut)))) => {
                tracing::trace!(
                    coroutine = %self.id,
                    generation = next.generation(),
                    "suspended on future"
                );
                self.schedule.spawn_local(
                    async move {
                        let outcome = fut.await;
                        next.settle(outcome);
                    }
                    .boxed_local(),
                );
            }
        }
    }

    fn finish(self: &Rc<Self>, result: Result<S::Output, S::Error>) {
        self.state.set(State::Completed);
        self.generation.set(self.generation.get() + 1);
        let stage = std::mem::replace(&mut *self.stage.borrow_mut(), Stage::Done);
        drop(stage);
        self.group.borrow_mut().take();

        tracing::debug!(coroutine = %self.id, ok = result.is_ok(), "completed");
        self.completion.fire(self.id, result, &self.schedule);
    }
}

impl<S: Step> Drive<S::Value, S::Error> for Core<S> {
    fn id(&self) -> CoroutineId {
        self.id
    }

    fn generation(&self) -> u64 {
        self.generation.get()
    }

    fn is_completed(&self) -> bool {
        self.state.get() == State::Completed
    }

    fn schedule(&self) -> &Rc<dyn Schedule> {
        &self.schedule
    }

    fn fire(self: Rc<Self>, generation: u64, outcome: Result<S::Value, S::Error>) {
        match self.state.get() {
            State::Completed => {
                tracing::debug!(
                    coroutine = %self.id,
                    generation,
                    "continuation fired after completion, ignoring"
                );
                return;
            }
            State::Resuming | State::NotStarted => {
                // Resumes are strictly sequential; try again next tick.
                let core = self.clone();
                self.schedule
                    .next_tick(Box::new(move || core.fire(generation, outcome)));
                return;
            }
            State::Suspended => {}
        }

        if generation != self.generation.get() {
            tracing::debug!(
                coroutine = %self.id,
                generation,
                current = self.generation.get(),
                "stale continuation ignored"
            );
            return;
        }
        self.generation.set(generation + 1);
        self.advance(outcome.into());
    }

    fn group(&self) -> Rc<SyncGroup<S::Value, S::Error>> {
        self.group
            .borrow_mut()
            .get_or_insert_with(|| Rc::new(SyncGroup::new(self.id)))
            .clone()
    }

    fn detach_group(&self) -> Option<Rc<SyncGroup<S::Value, S::Error>>> {
        self.group.borrow_mut().take()
    }
}

/// A started computation, for inspection.
pub struct Coroutine<S: Step> {
    core: Rc<Core<S>>,
}

impl<S: Step> Coroutine<S> {
    pub fn id(&self) -> CoroutineId {
        self.core.id
    }

    pub fn state(&self) -> State {
        self.core.state.get()
    }

    pub fn generation(&self) -> u64 {
        self.core.generation.get()
    }

    /// Whether the completion sink has fired.
    pub fn is_finished(&self) -> bool {
        self.core.completion.has_fired()
    }

    /// A continuation for the current suspension point.
    pub fn next(&self) -> Next<S::Value, S::Error> {
        self.core.next()
    }
}

impl<S: Step> fmt::Debug for Coroutine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.core.id)
            .field("state", &self.core.state.get())
            .field("generation", &self.core.generation.get())
            .finish()
    }
}

/// What [`spawn`] hands back.
pub struct Started<S: Step> {
    pub coroutine: Coroutine<S>,
    /// `Some` unless a callback consumed the result.
    pub outcome: Option<Outcome<S::Output, S::Error>>,
}

/// Starts a computation built by `factory` and returns its [`Outcome`]
/// when no callback takes the result.
pub fn start<H, C, S, F>(
    schedule: &H,
    factory: F,
    args: Vec<S::Value>,
    options: Options<C>,
    callback: Option<Callback<S::Output, S::Error>>,
) -> Option<Outcome<S::Output, S::Error>>
where
    H: Schedule + Clone + 'static,
    C: 'static,
    S: Step,
    F: FnOnce(Invocation<C, S::Value, S::Error, S::Output>) -> S + 'static,
{
    spawn(schedule, factory, args, options, callback).outcome
}

/// Like [`start`], but also returns the [`Coroutine`] for inspection.
pub fn spawn<H, C, S, F>(
    schedule: &H,
    factory: F,
    args: Vec<S::Value>,
    options: Options<C>,
    callback: Option<Callback<S::Output, S::Error>>,
) -> Started<S>
where
    H: Schedule + Clone + 'static,
    C: 'static,
    S: Step,
    F: FnOnce(Invocation<C, S::Value, S::Error, S::Output>) -> S + 'static,
{
    let Options {
        prepend,
        no_callback,
        kickoff,
        context,
    } = options;

    let (completion, outcome, passthrough) = match (callback, no_callback) {
        (Some(callback), false) => (Completion::callback(callback), None, None),
        (callback, _) => {
            let (completion, outcome) = Completion::future();
            (completion, Some(outcome), callback)
        }
    };

    let core = Rc::new(Core {
        id: CoroutineId::next(),
        state: Cell::new(State::NotStarted),
        generation: Cell::new(0),
        stage: RefCell::new(Stage::Done),
        group: RefCell::new(None),
        completion,
        schedule: Rc::new(schedule.clone()),
    });

    let mut invocation_args: Vec<_> = args.into_iter().map(Arg::Value).collect();
    invocation_args.extend(passthrough.map(Arg::Callback));
    let next = Arg::Next(core.next());
    if prepend {
        invocation_args.insert(0, next);
    } else {
        invocation_args.push(next);
    }
    let invocation = Invocation {
        context,
        args: invocation_args,
    };
    *core.stage.borrow_mut() = Stage::Pending(Box::new(move || factory(invocation)));

    match kickoff {
        Kickoff::Immediate => core.kickoff(),
        Kickoff::Deferred => {
            let pending = core.clone();
            core.schedule.next_tick(Box::new(move || pending.kickoff()));
        }
    }

    Started {
        coroutine: Coroutine { core },
        outcome,
    }
}
