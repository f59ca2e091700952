//! `Event`: a manual-reset latch (component D).
//!
//! Any number of waiters may be parked on `wait()`; `set()` wakes all of
//! them and leaves the event set until `reset()` is called. Used by
//! `eventide-jsonrpc`'s `PendingRequest` to park exactly one waiter per
//! in-flight request.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct State {
    set: bool,
    waiters: Vec<Waker>,
}

#[derive(Clone)]
pub struct Event {
    state: Rc<RefCell<State>>,
}

impl Event {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                set: false,
                waiters: Vec::new(),
            })),
        }
    }

    pub fn is_set(&self) -> bool {
        self.state.borrow().set
    }

    /// Wake every current waiter. Idempotent if already set.
    pub fn set(&self) {
        let mut state = self.state.borrow_mut();
        if state.set {
            return;
        }
        state.set = true;
        for waker in state.waiters.drain(..) {
            waker.wake();
        }
    }

    /// Clears the set flag. Does not affect waiters already woken by a
    /// prior `set()`.
    pub fn reset(&self) {
        self.state.borrow_mut().set = false;
    }

    pub fn wait(&self) -> EventWait {
        EventWait {
            state: self.state.clone(),
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventWait {
    state: Rc<RefCell<State>>,
}

impl Future for EventWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.borrow_mut();
        if state.set {
            return Poll::Ready(());
        }
        state.waiters.push(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_::EventLoop;

    #[test]
    fn set_wakes_pending_waiters() {
        let l = EventLoop::new();
        let event = Event::new();
        let event2 = event.clone();
        l.spawn(crate::here!(), async move {
            event2.set();
        });
        let value = l.run_until(async move {
            event.wait().await;
            1
        });
        assert_eq!(value, 1);
    }

    #[test]
    fn wait_on_already_set_event_resolves_immediately() {
        let l = EventLoop::new();
        let event = Event::new();
        event.set();
        let value = l.run_until(async move {
            event.wait().await;
            "done"
        });
        assert_eq!(value, "done");
    }

    #[test]
    fn reset_clears_set_state() {
        let event = Event::new();
        event.set();
        assert!(event.is_set());
        event.reset();
        assert!(!event.is_set());
    }
}
