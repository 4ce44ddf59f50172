//! # Tedio Coro
//!
//! A cooperative coroutine scheduler for a single-threaded event loop.
//!
//! ## Overview
//!
//! A computation is an explicit state machine (a [`Step`]) driven forward by
//! continuations. Asynchronous operations receive a [`Next`] and complete it
//! error-first; the driver re-enters the state machine on the next tick of
//! the loop with the value, or raises the error at the suspension point.
//!
//! ## Features
//!
//! - **Error-first continuations**: `call`, `error`, `arg(n, ignore_error)`, `args`
//! - **Stale-resume protection**: sibling continuations race, first one wins
//! - **Sync groups**: fan out with [`Next::parallel`], fan in with [`Next::sync`]
//! - **Future bridge**: suspend on any local future with [`Yield::Await`]
//! - **Outcomes**: no callback yields an [`Outcome`] future; unobserved failures escalate
//!
//! ## Quick Start
//!
//! ```rust
//! use tedio_coro::{EventLoop, Fault, Invocation, Options, Resume, Settle, Yield, from_fn, start};
//!
//! #[derive(Debug, PartialEq)]
//! enum Error {
//!     Fault(Fault),
//! }
//!
//! impl From<Fault> for Error {
//!     fn from(fault: Fault) -> Self {
//!         Error::Fault(fault)
//!     }
//! }
//!
//! let event_loop = EventLoop::new();
//! let outcome = start(
//!     &event_loop.handle(),
//!     |_: Invocation<(), u32, Error, u32>| {
//!         from_fn(|input: Resume<u32, Error>, next| match input.into_result()? {
//!             // Hand the continuation to some operation; here it completes at once.
//!             None => {
//!                 next.call(None, 41);
//!                 Ok(Yield::Suspend)
//!             }
//!             Some(value) => Ok(Yield::Complete(value + 1)),
//!         })
//!     },
//!     vec![],
//!     Options::new(),
//!     None,
//! )
//! .unwrap();
//!
//! assert_eq!(event_loop.block_on(outcome), Ok(42));
//! ```

pub mod coroutine;
pub mod error;
pub mod group;
pub mod next;
pub mod outcome;
pub mod runtime;
pub mod step;
mod waker;
pub mod wrap;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used items for convenience
pub use coroutine::{
    Arg, Coroutine, CoroutineId, Invocation, Kickoff, Options, Started, State, spawn, start,
};
pub use error::{Fault, RegistryError, Unhandled};
pub use group::Branch;
pub use next::{AllArgs, ArgAt, Next, Settle};
pub use outcome::{Callback, Outcome};
pub use runtime::{EventLoop, Handle, LoopConfig, Reporter, Schedule, Tick};
pub use step::{FnStep, Payload, Resume, Step, StepResult, Yield, from_fn};
pub use wrap::{Registry, Wrapped, wrap};
