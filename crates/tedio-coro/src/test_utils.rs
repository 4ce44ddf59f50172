//! Shared fixtures for unit tests.

use crate::error::Fault;
use crate::outcome::Callback;
use crate::runtime::{EventLoop, LoopConfig, Reporter};
use crate::step::Payload;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use thiserror::Error;

static LOGGING: Once = Once::new();

pub(crate) fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    });
}

/// A loop whose reporter fails the test instead of exiting the process.
pub(crate) fn test_event_loop() -> EventLoop {
    init_test_logging();
    EventLoop::with_config(LoopConfig::default().with_reporter(Reporter::from_fn(|failure| {
        panic!("unexpected unhandled failure: {failure}")
    })))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum TestError {
    #[error("operation failed: {0}")]
    Op(String),
    #[error(transparent)]
    Fault(#[from] Fault),
}

impl TestError {
    pub(crate) fn op(what: &str) -> Self {
        TestError::Op(what.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Val {
    Null,
    Int(i64),
    Str(&'static str),
    Failure(TestError),
    List(Vec<Val>),
}

impl Payload for Val {
    type Error = TestError;

    fn empty() -> Self {
        Val::Null
    }

    fn collect(values: Vec<Self>) -> Self {
        Val::List(values)
    }

    fn into_error(self) -> Result<Self, TestError> {
        match self {
            Val::Failure(err) => Err(err),
            other => Ok(other),
        }
    }
}

/// Collects terminal results in arrival order.
#[derive(Clone, Default)]
pub(crate) struct Recorder(Rc<RefCell<Vec<Result<Val, TestError>>>>);

impl Recorder {
    pub(crate) fn push(&self, result: Result<Val, TestError>) {
        self.0.borrow_mut().push(result);
    }

    pub(crate) fn callback(&self) -> Callback<Val, TestError> {
        let recorder = self.clone();
        Box::new(move |result| recorder.push(result))
    }

    pub(crate) fn results(&self) -> Vec<Result<Val, TestError>> {
        self.0.borrow().clone()
    }
}
