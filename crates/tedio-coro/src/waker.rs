//! Local wake implementation for the event loop.
use futures::task::ArcWake;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

pub(crate) struct ThreadNotify {
    /// Thread that owns the loop and parks in `block_on`.
    thread: Thread,
    /// Set by any task waker, cleared by `park`. Steps and tasks may park
    /// the loop thread themselves and eat the unpark token, so `park`
    /// trusts this flag rather than the token.
    unparked: AtomicBool,
}

impl ThreadNotify {
    pub(crate) fn new() -> ThreadNotify {
        ThreadNotify {
            thread: thread::current(),
            unparked: AtomicBool::new(false),
        }
    }

    pub(crate) fn notify(&self) {
        let unparked = self.unparked.swap(true, Ordering::Release);
        // Only the first wake since the last park needs to unpark; the flag
        // keeps it pending if the token gets consumed elsewhere.
        if !unparked {
            self.thread.unpark();
        }
    }

    /// Blocks the loop thread until some waker has fired since the last park.
    pub(crate) fn park(&self) {
        while !self.unparked.swap(false, Ordering::Acquire) {
            thread::park();
        }
    }
}

impl Default for ThreadNotify {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task wake flag. Wakers may be fired from any thread; the loop only
/// polls tasks whose flag is raised.
pub(crate) struct TaskWaker {
    woken: AtomicBool,
    notify: Arc<ThreadNotify>,
}

impl TaskWaker {
    /// New tasks start out woken so they get their first poll.
    pub(crate) fn new(notify: Arc<ThreadNotify>) -> TaskWaker {
        TaskWaker {
            woken: AtomicBool::new(true),
            notify,
        }
    }

    pub(crate) fn take_woken(&self) -> bool {
        self.woken.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_woken(&self) -> bool {
        self.woken.load(Ordering::Acquire)
    }
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::Release);
        arc_self.notify.notify();
    }
}
