//! Single-threaded event loop.
//!
//! The loop owns two kinds of work: "ticks", boxed callbacks queued with
//! [`Schedule::next_tick`], and local futures spawned with
//! [`Schedule::spawn_local`]. One turn runs every tick queued before the
//! turn started, then polls every woken future. Ticks queued during a turn
//! run on the following turn, so a chain of immediately-completing steps
//! never grows the call stack.

use crate::error::Unhandled;
use crate::waker::{TaskWaker, ThreadNotify};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use futures::task::waker_ref;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::mem;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Context;

/// A callback deferred to the next turn of the loop.
pub type Tick = Box<dyn FnOnce()>;

/// The scheduling primitives the coroutine driver consumes.
///
/// [`Handle`] is the in-crate implementation; any other single-threaded
/// loop can drive computations by implementing this trait.
pub trait Schedule {
    /// Runs `tick` on a later turn, never inline.
    fn next_tick(&self, tick: Tick);

    /// Polls `task` to completion on the loop thread.
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>);

    /// Delivers a terminal failure nobody observed.
    fn report_unhandled(&self, failure: Unhandled);
}

/// Destination for unobserved terminal failures.
#[derive(Clone)]
pub struct Reporter(Rc<dyn Fn(&Unhandled)>);

impl Reporter {
    /// Logs the failure, writes it to stderr and exits the process with
    /// status 1. This is the default when no channel is installed.
    pub fn fatal() -> Self {
        Self(Rc::new(|failure: &Unhandled| {
            tracing::error!(coroutine = %failure.coroutine, "{failure}");
            eprintln!("{failure}");
            std::process::exit(1);
        }))
    }

    /// Routes unobserved failures to `f` instead of terminating.
    pub fn from_fn(f: impl Fn(&Unhandled) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn report(&self, failure: &Unhandled) {
        (self.0)(failure)
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::fatal()
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopConfig {
    pub reporter: Reporter,
}

impl LoopConfig {
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }
}

struct LocalTask {
    fut: LocalBoxFuture<'static, ()>,
    waker: Arc<TaskWaker>,
}

struct Inner {
    notify: Arc<ThreadNotify>,
    ticks: RefCell<VecDeque<Tick>>,
    tasks: RefCell<Vec<LocalTask>>,
    turns: Cell<u64>,
    config: LoopConfig,
}

impl Inner {
    /// Runs one turn. Returns whether any tick ran or any task was polled.
    fn turn(&self) -> bool {
        self.turns.set(self.turns.get() + 1);

        let batch = mem::take(&mut *self.ticks.borrow_mut());
        let mut made_progress = !batch.is_empty();
        for tick in batch {
            tick();
        }

        // Tasks spawned while polling land in the (now empty) shared vec.
        let mut tasks = mem::take(&mut *self.tasks.borrow_mut());
        let before = tasks.len();
        tasks.retain_mut(|task| {
            if !task.waker.take_woken() {
                return true;
            }
            made_progress = true;
            let waker = waker_ref(&task.waker);
            let cx = &mut Context::from_waker(&waker);
            task.fut.poll_unpin(cx).is_pending()
        });

        let mut shared = self.tasks.borrow_mut();
        let spawned = mem::replace(&mut *shared, tasks);
        shared.extend(spawned);

        tracing::trace!(
            turn = self.turns.get(),
            finished = before.saturating_sub(shared.len()),
            live = shared.len(),
            made_progress,
            "event loop turn"
        );

        made_progress
    }

    fn has_ready_work(&self) -> bool {
        !self.ticks.borrow().is_empty() || self.tasks.borrow().iter().any(|t| t.waker.is_woken())
    }
}

/// The event loop. Not `Send`: computations, ticks and tasks stay on the
/// thread that created the loop.
pub struct EventLoop {
    inner: Rc<Inner>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_config(LoopConfig::default())
    }

    pub fn with_config(config: LoopConfig) -> Self {
        tracing::debug!("creating event loop");
        Self {
            inner: Rc::new(Inner {
                notify: Arc::new(ThreadNotify::new()),
                ticks: RefCell::new(VecDeque::new()),
                tasks: RefCell::new(Vec::new()),
                turns: Cell::new(0),
                config,
            }),
        }
    }

    pub fn handle(&self) -> Handle {
        Handle {
            inner: self.inner.clone(),
        }
    }

    /// Runs turns until no tick is queued and no task is woken. Returns
    /// the number of turns that made progress.
    pub fn run_until_stalled(&self) -> usize {
        let mut turns = 0;
        while self.inner.turn() {
            turns += 1;
        }
        turns
    }

    /// Drives the loop until `fut` resolves, parking the thread whenever
    /// there is nothing to do.
    pub fn block_on<F>(&self, fut: F) -> F::Output
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let output = slot.clone();
        self.handle().spawn_local(
            async move {
                let value = fut.await;
                *output.borrow_mut() = Some(value);
            }
            .boxed_local(),
        );

        loop {
            let made_progress = self.inner.turn();
            if let Some(value) = slot.borrow_mut().take() {
                return value;
            }
            if !made_progress && !self.inner.has_ready_work() {
                tracing::trace!("event loop idle, parking");
                self.inner.notify.park();
            }
        }
    }

    /// Number of live (not yet finished) local tasks.
    pub fn live_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable scheduling handle to an [`EventLoop`].
#[derive(Clone)]
pub struct Handle {
    inner: Rc<Inner>,
}

impl Schedule for Handle {
    fn next_tick(&self, tick: Tick) {
        self.inner.ticks.borrow_mut().push_back(tick);
        // The loop may be parked inside `block_on` waiting for this.
        self.inner.notify.notify();
    }

    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        let waker = Arc::new(TaskWaker::new(self.inner.notify.clone()));
        self.inner.tasks.borrow_mut().push(LocalTask { fut: task, waker });
        self.inner.notify.notify();
    }

    fn report_unhandled(&self, failure: Unhandled) {
        self.inner.config.reporter.report(&failure);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("turns", &self.inner.turns.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::oneshot;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ticks_queued_during_a_turn_run_next_turn() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let log = Rc::new(RefCell::new(Vec::new()));

        let (h, l) = (handle.clone(), log.clone());
        handle.next_tick(Box::new(move || {
            l.borrow_mut().push("first");
            let l2 = l.clone();
            h.next_tick(Box::new(move || l2.borrow_mut().push("nested")));
        }));
        let l = log.clone();
        handle.next_tick(Box::new(move || l.borrow_mut().push("second")));

        assert!(event_loop.inner.turn());
        assert_eq!(*log.borrow(), vec!["first", "second"]);
        assert!(event_loop.inner.turn());
        assert_eq!(*log.borrow(), vec!["first", "second", "nested"]);
        assert!(!event_loop.inner.turn());
    }

    #[test]
    fn spawned_tasks_run_until_stalled() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (tx, rx) = oneshot::channel::<u32>();
        let seen = Rc::new(Cell::new(0));

        let s = seen.clone();
        handle.spawn_local(
            async move {
                s.set(rx.await.unwrap_or(0));
            }
            .boxed_local(),
        );
        event_loop.run_until_stalled();
        assert_eq!(event_loop.live_tasks(), 1);

        tx.send(9).unwrap();
        event_loop.run_until_stalled();
        assert_eq!(seen.get(), 9);
        assert_eq!(event_loop.live_tasks(), 0);
    }

    #[test]
    fn block_on_parks_until_remote_wake() {
        let event_loop = EventLoop::new();
        let (tx, rx) = oneshot::channel::<&'static str>();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(15));
            tx.send("done").unwrap();
        });
        let value = event_loop.block_on(async move { rx.await.unwrap() });
        assert_eq!(value, "done");
        sender.join().unwrap();
    }

    #[test]
    fn custom_reporter_receives_failures() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let config = LoopConfig::default()
            .with_reporter(Reporter::from_fn(move |failure| s.borrow_mut().push(failure.clone())));
        let event_loop = EventLoop::with_config(config);
        let failure = Unhandled {
            coroutine: crate::coroutine::CoroutineId::from_raw(3),
            message: "Op(\"x\")".into(),
        };
        event_loop.handle().report_unhandled(failure.clone());
        assert_eq!(*seen.borrow(), vec![failure]);
    }
}
