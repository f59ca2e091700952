//! `Task<T>`: an awaitable wrapper that registers a [`crate::frame::FrameRecord`]
//! for whatever future it wraps, so the loop's current-frame stack can record
//! caller/callee links across nested `.await`s (component A).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::frame::{FrameId, FrameRecord, Location};
use crate::loop_::EventLoop;

/// A future wrapped with frame bookkeeping. Awaiting a `Task<T>` links it as
/// the callee of whichever frame is currently polling (the loop's own root
/// poll, or an enclosing `Task::poll`), without fabricating a new `Waker` —
/// the ambient `Context` is forwarded unchanged so wakeups still reach
/// whichever root future originated it.
pub struct Task<T> {
    frame: FrameId,
    loop_: EventLoop,
    inner: Pin<Box<dyn Future<Output = T>>>,
}

impl<T> Task<T> {
    pub fn new(location: Location, fut: impl Future<Output = T> + 'static) -> Self {
        let loop_ = EventLoop::current();
        let frame = loop_
            .frames()
            .borrow_mut()
            .insert(FrameRecord::root(location));
        Self {
            frame,
            loop_,
            inner: Box::pin(fut),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame
    }

    pub fn is_cancelled(&self) -> bool {
        self.loop_
            .frames()
            .borrow()
            .get(self.frame)
            .map(|r| r.state.cancelled)
            .unwrap_or(false)
    }

    pub fn is_intercepting_cancel(&self) -> bool {
        self.loop_
            .frames()
            .borrow()
            .get(self.frame)
            .map(|r| r.policy.intercept_cancel)
            .unwrap_or(false)
    }

    pub(crate) fn mark_intercept_cancel(&self) {
        if let Some(record) = self.loop_.frames().borrow_mut().get_mut(self.frame) {
            record.policy.intercept_cancel = true;
        }
    }

    pub(crate) fn loop_handle(&self) -> &EventLoop {
        &self.loop_
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let loop_ = this.loop_.clone();

        if let Some(&caller) = loop_.current_frame_stack().borrow().last() {
            loop_.frames().borrow_mut().link(caller, this.frame);
        }

        loop_.current_frame_stack().borrow_mut().push(this.frame);
        let poll = this.inner.as_mut().poll(cx);
        loop_.current_frame_stack().borrow_mut().pop();

        if let Poll::Ready(_) = &poll {
            let mut frames = loop_.frames().borrow_mut();
            let caller = frames.get(this.frame).and_then(|r| r.caller);
            if let Some(record) = frames.get_mut(this.frame) {
                record.state.finished = true;
            }
            if let Some(caller) = caller {
                frames.unlink_callee(caller);
            }
        }

        poll
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        // Removing our own side-table entry here, cascading naturally as
        // Rust drops `inner` (and any nested `Task`s it owned) right after
        // this body runs, is how bottom-up chain destruction shows up in the
        // side-table without a manual destroy-walk.
        self.loop_.frames().borrow_mut().remove(self.frame);
    }
}

/// Convenience constructor for scheduling a future as an awaitable: wraps
/// `fut` as a `Task` rooted at the call site.
#[macro_export]
macro_rules! task {
    ($fut:expr) => {
        $crate::task::Task::new($crate::here!(), $fut)
    };
}
