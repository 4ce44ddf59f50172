//! Sync groups: fan-out / fan-in of branches started from one suspension
//! point.
//!
//! Branch results are placed by submission index, not arrival order. The
//! first branch error wins; later branch errors are dropped.

use crate::coroutine::CoroutineId;
use crate::next::Settle;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub(crate) type OnSettled<V, E> = Box<dyn FnOnce(Result<Vec<V>, E>)>;

struct GroupState<V, E> {
    running: usize,
    finished: usize,
    results: Vec<Option<V>>,
    settled: Vec<bool>,
    failed: bool,
    error: Option<E>,
    on_settled: Option<OnSettled<V, E>>,
}

impl<V, E> GroupState<V, E> {
    /// The join decision, if one can be made now. Consumes the error or
    /// the results.
    fn outcome(&mut self) -> Option<Result<Vec<V>, E>> {
        if let Some(err) = self.error.take() {
            return Some(Err(err));
        }
        if self.failed || self.running > 0 {
            return None;
        }
        Some(Ok(self.results.drain(..).flatten().collect()))
    }
}

pub(crate) struct SyncGroup<V, E> {
    coroutine: CoroutineId,
    state: RefCell<GroupState<V, E>>,
}

impl<V, E> SyncGroup<V, E> {
    pub(crate) fn new(coroutine: CoroutineId) -> Self {
        Self {
            coroutine,
            state: RefCell::new(GroupState {
                running: 0,
                finished: 0,
                results: Vec::new(),
                settled: Vec::new(),
                failed: false,
                error: None,
                on_settled: None,
            }),
        }
    }

    /// Allocates the next submission index.
    pub(crate) fn submit(&self) -> usize {
        let mut state = self.state.borrow_mut();
        let index = state.results.len();
        state.results.push(None);
        state.settled.push(false);
        state.running += 1;
        index
    }

    fn settle_branch(&self, index: usize, outcome: Result<V, E>) {
        let fire = {
            let mut state = self.state.borrow_mut();
            if state.settled.get(index).copied().unwrap_or(true) {
                tracing::debug!(
                    coroutine = %self.coroutine,
                    branch = index,
                    "branch settled twice, ignoring"
                );
                return;
            }
            state.settled[index] = true;
            state.running -= 1;
            state.finished += 1;

            match outcome {
                Ok(value) => {
                    tracing::trace!(coroutine = %self.coroutine, branch = index, "branch finished");
                    state.results[index] = Some(value);
                }
                Err(err) if state.failed => {
                    tracing::debug!(
                        coroutine = %self.coroutine,
                        branch = index,
                        "later branch error dropped"
                    );
                    drop(err);
                }
                Err(err) => {
                    tracing::trace!(coroutine = %self.coroutine, branch = index, "branch failed");
                    state.failed = true;
                    state.error = Some(err);
                }
            }

            if state.on_settled.is_some() && (state.failed || state.running == 0) {
                match (state.on_settled.take(), state.outcome()) {
                    (Some(hook), Some(outcome)) => Some((hook, outcome)),
                    (hook, _) => {
                        state.on_settled = hook;
                        None
                    }
                }
            } else {
                None
            }
        };

        if let Some((hook, outcome)) = fire {
            hook(outcome);
        }
    }

    /// Runs `hook` with the join decision, now if it can be made, otherwise
    /// once the last branch finishes or the first one fails.
    pub(crate) fn on_settled(&self, hook: OnSettled<V, E>) {
        let ready = {
            let mut state = self.state.borrow_mut();
            match state.outcome() {
                Some(outcome) => Some(outcome),
                None => {
                    state.on_settled = Some(hook);
                    return;
                }
            }
        };
        if let Some(outcome) = ready {
            hook(outcome);
        }
    }

    pub(crate) fn running(&self) -> usize {
        self.state.borrow().running
    }

    pub(crate) fn finished(&self) -> usize {
        self.state.borrow().finished
    }
}

/// A continuation for one sync group branch, from
/// [`Next::parallel`](crate::Next::parallel).
///
/// Settling a branch never resumes the computation directly; the group
/// releases it at join time.
pub struct Branch<V, E> {
    group: Rc<SyncGroup<V, E>>,
    index: usize,
    coroutine: CoroutineId,
}

impl<V, E> Branch<V, E> {
    pub(crate) fn new(group: Rc<SyncGroup<V, E>>, index: usize, coroutine: CoroutineId) -> Self {
        Self {
            group,
            index,
            coroutine,
        }
    }

    /// Submission index; the branch's result lands here.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<V, E> Settle<V, E> for Branch<V, E> {
    fn settle(&self, outcome: Result<V, E>) {
        self.group.settle_branch(self.index, outcome)
    }
}

impl<V, E> fmt::Debug for Branch<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("coroutine", &self.coroutine)
            .field("index", &self.index)
            .finish()
    }
}
