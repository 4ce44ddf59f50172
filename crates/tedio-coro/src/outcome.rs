//! Completion sinks.
//!
//! A computation delivers its terminal result exactly once, either to a
//! caller-supplied [`Callback`] or to an [`Outcome`] future. A failed
//! `Outcome` nobody observes is escalated to the loop's reporter.

use crate::coroutine::CoroutineId;
use crate::error::Unhandled;
use crate::runtime::Schedule;
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Fuse;
use pin_project::pin_project;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Terminal handler supplied by the caller.
pub type Callback<T, E> = Box<dyn FnOnce(Result<T, E>)>;

enum Sink<T, E> {
    Callback(Callback<T, E>),
    Future {
        sender: oneshot::Sender<Result<T, E>>,
        observed: Rc<Cell<bool>>,
    },
}

/// Fired-once wrapper around the sink.
pub(crate) struct Completion<T, E> {
    sink: RefCell<Option<Sink<T, E>>>,
}

impl<T: 'static, E: fmt::Debug + 'static> Completion<T, E> {
    pub(crate) fn callback(callback: Callback<T, E>) -> Self {
        Self {
            sink: RefCell::new(Some(Sink::Callback(callback))),
        }
    }

    pub(crate) fn future() -> (Self, Outcome<T, E>) {
        let (sender, receiver) = oneshot::channel();
        let observed = Rc::new(Cell::new(false));
        let completion = Self {
            sink: RefCell::new(Some(Sink::Future {
                sender,
                observed: observed.clone(),
            })),
        };
        (completion, Outcome::new(receiver, observed))
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.sink.borrow().is_none()
    }

    /// Delivers `result`. A second call is a silent no-op.
    pub(crate) fn fire(
        &self,
        coroutine: CoroutineId,
        result: Result<T, E>,
        schedule: &Rc<dyn Schedule>,
    ) {
        let Some(sink) = self.sink.borrow_mut().take() else {
            tracing::trace!(%coroutine, "completion already delivered");
            return;
        };

        match sink {
            Sink::Callback(callback) => callback(result),
            Sink::Future { sender, observed } => {
                let message = result.as_ref().err().map(|err| format!("{err:?}"));
                match (sender.send(result), message) {
                    (Ok(()), Some(message)) if !observed.get() => {
                        // Ticks run before tasks, so hop twice: the check lands after a
                        // full task phase and a caller already awaiting gets polled first.
                        let schedule = schedule.clone();
                        let requeue = schedule.clone();
                        requeue.next_tick(Box::new(move || {
                            let reporter = schedule.clone();
                            schedule.next_tick(Box::new(move || {
                                if !observed.get() {
                                    reporter.report_unhandled(Unhandled { coroutine, message });
                                }
                            }));
                        }));
                    }
                    (Err(_), Some(message)) => {
                        tracing::debug!(%coroutine, "outcome dropped before failure");
                        schedule.report_unhandled(Unhandled { coroutine, message });
                    }
                    _ => {}
                }
            }
        }
    }
}

/// The eventual result of a computation started without a callback.
///
/// Polling the `Outcome` (awaiting it, or yielding it to another
/// computation) counts as observing failure, and so do [`then`] and
/// [`on_error`]. A failure that nobody observes by the end of the loop
/// turn after it happens is reported through the loop's
/// [`Reporter`](crate::runtime::Reporter).
///
/// [`then`]: Outcome::then
/// [`on_error`]: Outcome::on_error
#[pin_project]
#[must_use = "an unobserved failed outcome is escalated"]
pub struct Outcome<T, E> {
    #[pin]
    receiver: Fuse<oneshot::Receiver<Result<T, E>>>,
    observed: Rc<Cell<bool>>,
    is_terminated: bool,
}

impl<T, E> Outcome<T, E> {
    fn new(receiver: oneshot::Receiver<Result<T, E>>, observed: Rc<Cell<bool>>) -> Self {
        Self {
            receiver: receiver.fuse(),
            observed,
            is_terminated: false,
        }
    }

    pub fn is_observed(&self) -> bool {
        self.observed.get()
    }

    /// Observes both outcomes.
    pub fn then<R>(
        self,
        on_value: impl FnOnce(T) -> R,
        on_error: impl FnOnce(E) -> R,
    ) -> impl Future<Output = R> {
        self.observed.set(true);
        async move {
            match self.await {
                Ok(value) => on_value(value),
                Err(err) => on_error(err),
            }
        }
    }

    /// Observes failure only; resolves to the value on success.
    pub fn on_error(self, on_error: impl FnOnce(E)) -> impl Future<Output = Option<T>> {
        self.observed.set(true);
        async move {
            match self.await {
                Ok(value) => Some(value),
                Err(err) => {
                    on_error(err);
                    None
                }
            }
        }
    }
}

impl<T, E> Future for Outcome<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.observed.set(true);

        if *this.is_terminated {
            return Poll::Pending;
        }

        // A computation dropped while suspended never sends; stay pending.
        if let Poll::Ready(Ok(output)) = this.receiver.poll(cx) {
            *this.is_terminated = true;
            return Poll::Ready(output);
        };

        Poll::Pending
    }
}

impl<T, E> fmt::Debug for Outcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("observed", &self.observed.get())
            .field("is_terminated", &self.is_terminated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{EventLoop, LoopConfig, Reporter};
    use crate::test_utils::{TestError, Val};

    fn reporting_loop() -> (EventLoop, Rc<RefCell<Vec<Unhandled>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let config = LoopConfig::default()
            .with_reporter(Reporter::from_fn(move |failure| s.borrow_mut().push(failure.clone())));
        (EventLoop::with_config(config), seen)
    }

    fn schedule(event_loop: &EventLoop) -> Rc<dyn Schedule> {
        Rc::new(event_loop.handle())
    }

    #[test]
    fn callback_fires_once() {
        let (event_loop, _) = reporting_loop();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let c = calls.clone();
        let completion: Completion<Val, TestError> =
            Completion::callback(Box::new(move |result| c.borrow_mut().push(result)));
        let id = CoroutineId::from_raw(1);
        let schedule = schedule(&event_loop);

        completion.fire(id, Ok(Val::Int(1)), &schedule);
        completion.fire(id, Err(TestError::op("again")), &schedule);
        assert!(completion.has_fired());
        assert_eq!(*calls.borrow(), vec![Ok(Val::Int(1))]);
    }

    #[test]
    fn unobserved_failure_is_escalated() {
        let (event_loop, seen) = reporting_loop();
        let (completion, outcome) = Completion::<Val, TestError>::future();
        completion.fire(CoroutineId::from_raw(2), Err(TestError::op("3")), &schedule(&event_loop));
        assert!(seen.borrow().is_empty(), "escalation waits a tick");

        event_loop.run_until_stalled();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].coroutine, CoroutineId::from_raw(2));
        assert!(seen.borrow()[0].message.contains("\"3\""));
        drop(outcome);
    }

    #[test]
    fn failure_observer_suppresses_escalation() {
        let (event_loop, seen) = reporting_loop();
        let (completion, outcome) = Completion::<Val, TestError>::future();
        let caught = Rc::new(RefCell::new(None));
        let c = caught.clone();
        let observing = outcome.on_error(move |err| *c.borrow_mut() = Some(err));

        completion.fire(CoroutineId::from_raw(3), Err(TestError::op("x")), &schedule(&event_loop));
        let value = event_loop.block_on(observing);

        assert_eq!(value, None);
        assert_eq!(*caught.borrow(), Some(TestError::op("x")));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn awaiting_after_failure_counts_as_observing() {
        let (event_loop, seen) = reporting_loop();
        let (completion, outcome) = Completion::<Val, TestError>::future();
        completion.fire(CoroutineId::from_raw(7), Err(TestError::op("w")), &schedule(&event_loop));

        assert_eq!(event_loop.block_on(outcome), Err(TestError::op("w")));
        event_loop.run_until_stalled();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn then_observes_both_paths() {
        let (event_loop, seen) = reporting_loop();
        let (completion, outcome) = Completion::<Val, TestError>::future();
        let paired = outcome.then(|v| format!("ok {v:?}"), |e| format!("err {e}"));
        completion.fire(CoroutineId::from_raw(4), Err(TestError::op("y")), &schedule(&event_loop));
        assert_eq!(event_loop.block_on(paired), "err operation failed: y");
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn dropped_outcome_escalates_immediately() {
        let (event_loop, seen) = reporting_loop();
        let (completion, outcome) = Completion::<Val, TestError>::future();
        drop(outcome);
        completion.fire(CoroutineId::from_raw(5), Err(TestError::op("z")), &schedule(&event_loop));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn success_is_never_escalated() {
        let (event_loop, seen) = reporting_loop();
        let (completion, outcome) = Completion::<Val, TestError>::future();
        drop(outcome);
        completion.fire(CoroutineId::from_raw(6), Ok(Val::Int(1)), &schedule(&event_loop));
        event_loop.run_until_stalled();
        assert!(seen.borrow().is_empty());
    }
}
