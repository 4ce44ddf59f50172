//! Error types shared across the crate.

use crate::coroutine::CoroutineId;
use std::any::Any;
use thiserror::Error;

/// A fault raised while advancing a step procedure.
///
/// Faults are panics caught by the driver. They are always terminal: the
/// driver converts them into the computation's own error type (every
/// [`Step::Error`](crate::Step::Error) implements `From<Fault>`) and hands
/// them to the completion sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step procedure panicked: {message}")]
pub struct Fault {
    message: String,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A terminal failure nobody registered to observe.
///
/// Handed to the loop's [`Reporter`](crate::runtime::Reporter) when a
/// computation started without a callback fails and its
/// [`Outcome`](crate::Outcome) carries no failure observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unhandled failure in coroutine {coroutine}: {message}")]
pub struct Unhandled {
    pub coroutine: CoroutineId,
    /// `Debug` rendering of the terminal error.
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no step procedure registered as `{0}`")]
    UnknownName(String),
}
