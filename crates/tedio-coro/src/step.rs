//! The resumable state machine contract.
//!
//! A step procedure is an explicit state machine: the driver re-enters it
//! through [`Step::resume`] with either a value or an error, and the step
//! answers with a [`Yield`] describing where it stopped.

use crate::error::Fault;
use crate::next::Next;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

/// What the driver feeds into the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume<V, E> {
    /// The first resumption after `start`.
    Start,
    Value(V),
    /// An error raised at the current suspension point.
    Error(E),
}

impl<V, E> Resume<V, E> {
    /// `Err` for [`Resume::Error`], so a step without local recovery can
    /// simply use `?`.
    pub fn into_result(self) -> Result<Option<V>, E> {
        match self {
            Resume::Start => Ok(None),
            Resume::Value(value) => Ok(Some(value)),
            Resume::Error(err) => Err(err),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Resume::Error(_))
    }
}

impl<V, E> From<Result<V, E>> for Resume<V, E> {
    fn from(outcome: Result<V, E>) -> Self {
        match outcome {
            Ok(value) => Resume::Value(value),
            Err(err) => Resume::Error(err),
        }
    }
}

/// Where a step stopped.
pub enum Yield<V, E, T> {
    /// Waiting on a continuation the step has already handed out.
    Suspend,
    /// Waiting on an external future; its settlement resumes the step.
    Await(LocalBoxFuture<'static, Result<V, E>>),
    /// The computation finished with this value.
    Complete(T),
}

impl<V, E, T> Yield<V, E, T> {
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<V, E>> + 'static,
    {
        Yield::Await(fut.boxed_local())
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Yield::Complete(_))
    }
}

impl<V, E, T: fmt::Debug> fmt::Debug for Yield<V, E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Yield::Suspend => f.write_str("Suspend"),
            Yield::Await(_) => f.write_str("Await(..)"),
            Yield::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
        }
    }
}

pub type StepResult<S> = Result<
    Yield<<S as Step>::Value, <S as Step>::Error, <S as Step>::Output>,
    <S as Step>::Error,
>;

/// A suspended computation's state machine.
///
/// Returning `Err` from [`resume`](Step::resume) means the step did not
/// recover locally; the error becomes the computation's terminal error.
pub trait Step: 'static {
    /// Values delivered at suspension points.
    type Value: 'static;
    type Output: 'static;
    type Error: From<Fault> + fmt::Debug + 'static;

    fn resume(
        &mut self,
        input: Resume<Self::Value, Self::Error>,
        next: &Next<Self::Value, Self::Error>,
    ) -> StepResult<Self>;
}

/// Positional values of an error-first callback.
///
/// Slot 0 of an argument list is the error slot; [`into_error`] tells the
/// continuation adapters whether it holds a non-null error.
///
/// [`into_error`]: Payload::into_error
pub trait Payload: Sized + 'static {
    type Error;

    /// The null value: a missing positional argument, or the result of
    /// joining a group nobody branched.
    fn empty() -> Self;

    /// Aggregates an ordered sequence into one value.
    fn collect(values: Vec<Self>) -> Self;

    fn into_error(self) -> Result<Self, Self::Error>;
}

/// A [`Step`] backed by a closure.
pub struct FnStep<F, V, T, E> {
    f: F,
    _types: PhantomData<fn(V, E) -> T>,
}

/// Wraps `f` as a state machine. The closure keeps its own program counter
/// in captured state.
pub fn from_fn<F, V, T, E>(f: F) -> FnStep<F, V, T, E>
where
    F: FnMut(Resume<V, E>, &Next<V, E>) -> Result<Yield<V, E, T>, E> + 'static,
{
    FnStep {
        f,
        _types: PhantomData,
    }
}

impl<F, V, T, E> Step for FnStep<F, V, T, E>
where
    F: FnMut(Resume<V, E>, &Next<V, E>) -> Result<Yield<V, E, T>, E> + 'static,
    V: 'static,
    T: 'static,
    E: From<Fault> + fmt::Debug + 'static,
{
    type Value = V;
    type Output = T;
    type Error = E;

    fn resume(&mut self, input: Resume<V, E>, next: &Next<V, E>) -> StepResult<Self> {
        (self.f)(input, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestError, Val};

    #[test]
    fn resume_into_result() {
        let start: Resume<Val, TestError> = Resume::Start;
        assert_eq!(start.into_result(), Ok(None));
        assert_eq!(
            Resume::<_, TestError>::Value(Val::Int(1)).into_result(),
            Ok(Some(Val::Int(1)))
        );
        let err = Resume::<Val, _>::Error(TestError::op("x"));
        assert!(err.is_error());
        assert_eq!(err.into_result(), Err(TestError::op("x")));
    }

    #[test]
    fn resume_from_outcome() {
        let ok: Resume<Val, TestError> = Ok(Val::Int(2)).into();
        assert_eq!(ok, Resume::Value(Val::Int(2)));
        let err: Resume<Val, TestError> = Err(TestError::op("y")).into();
        assert_eq!(err, Resume::Error(TestError::op("y")));
    }

    #[test]
    fn yield_debug_hides_futures() {
        let y: Yield<Val, TestError, Val> = Yield::future(async { Ok(Val::Null) });
        assert_eq!(format!("{y:?}"), "Await(..)");
        let y: Yield<Val, TestError, i32> = Yield::Complete(4);
        assert!(y.is_complete());
        assert_eq!(format!("{y:?}"), "Complete(4)");
    }
}
