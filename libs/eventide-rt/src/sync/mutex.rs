//! `Mutex`: a FIFO async lock (component D).
//!
//! Waiters are granted the lock in the order they called `lock()`. Used by
//! `eventide-jsonrpc`'s write pump to serialize writers onto one transport
//! without allowing a late-arriving writer to jump the queue.
#![allow(unsafe_code)]

use std::cell::{RefCell, UnsafeCell};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// A single queued waiter, identified so a later hand-off can tell "you
/// specifically are next" apart from "someone happens to be at the front".
type WaiterId = u64;

struct LockState {
    locked: bool,
    queue: VecDeque<(WaiterId, Waker)>,
    /// Set by `unlock` the instant it pops a waiter off the queue: that
    /// waiter now owns the lock (the mutex stays `locked` throughout the
    /// hand-off), it just hasn't been polled again yet to collect its
    /// `MutexGuard`. No other `Lock`, however fresh, may acquire while this
    /// is set — that is what makes the hand-off a true transfer rather than
    /// a release-then-race.
    next_owner: Option<WaiterId>,
    next_id: WaiterId,
}

pub struct Mutex<T> {
    value: Rc<UnsafeCell<T>>,
    lock_state: Rc<RefCell<LockState>>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Rc::new(UnsafeCell::new(value)),
            lock_state: Rc::new(RefCell::new(LockState {
                locked: false,
                queue: VecDeque::new(),
                next_owner: None,
                next_id: 0,
            })),
        }
    }

    pub fn lock(&self) -> Lock<T> {
        Lock {
            value: self.value.clone(),
            lock_state: self.lock_state.clone(),
            id: None,
        }
    }
}

impl<T> Clone for Mutex<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            lock_state: self.lock_state.clone(),
        }
    }
}

pub struct Lock<T> {
    value: Rc<UnsafeCell<T>>,
    lock_state: Rc<RefCell<LockState>>,
    /// `None` until this future has been polled once without acquiring the
    /// lock (i.e. it had to take a place in the queue).
    id: Option<WaiterId>,
}

impl<T> Future for Lock<T> {
    type Output = MutexGuard<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.lock_state.borrow_mut();

        if let Some(id) = this.id {
            // Already queued. Either we're the designated hand-off target
            // (claim the lock, still held throughout) or we just refresh
            // our waker and keep waiting our turn.
            if state.next_owner == Some(id) {
                state.next_owner = None;
                drop(state);
                return Poll::Ready(MutexGuard {
                    value: this.value.clone(),
                    lock_state: this.lock_state.clone(),
                });
            }
            if let Some(entry) = state.queue.iter_mut().find(|(qid, _)| *qid == id) {
                if !entry.1.will_wake(cx.waker()) {
                    entry.1 = cx.waker().clone();
                }
            }
            return Poll::Pending;
        }

        // First poll. Only an uncontended mutex (no holder, nobody already
        // queued) may be acquired directly; a non-empty queue always means
        // `locked` is true (see `unlock`'s hand-off), so this alone is
        // enough to keep a brand-new locker from barging ahead of waiters.
        if !state.locked && state.queue.is_empty() {
            state.locked = true;
            drop(state);
            return Poll::Ready(MutexGuard {
                value: this.value.clone(),
                lock_state: this.lock_state.clone(),
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        state.queue.push_back((id, cx.waker().clone()));
        this.id = Some(id);
        Poll::Pending
    }
}

impl<T> Drop for Lock<T> {
    fn drop(&mut self) {
        // Only matters if we made it into the queue (or were handed the
        // lock) before being dropped — e.g. cancelled while parked.
        let Some(id) = self.id else { return };
        let mut state = self.lock_state.borrow_mut();
        if state.next_owner == Some(id) {
            // We were granted the lock but never polled again to claim it.
            // Pass the hand-off on instead of leaving the mutex locked
            // forever with nobody able to release it.
            state.next_owner = None;
            unlock_and_handoff(&mut state);
        } else {
            state.queue.retain(|(qid, _)| *qid != id);
        }
    }
}

/// Shared release logic: hand the lock off to the next queued waiter
/// (staying locked throughout), or actually release it if nobody is
/// waiting.
fn unlock_and_handoff(state: &mut LockState) {
    match state.queue.pop_front() {
        Some((id, waker)) => {
            state.next_owner = Some(id);
            waker.wake();
        }
        None => state.locked = false,
    }
}

/// Grants exclusive access to the guarded value while held. Soundness of the
/// `UnsafeCell` access below rests entirely on the FIFO lock bookkeeping in
/// `Lock::poll`/`Drop`: at most one `MutexGuard` for a given `Mutex` exists
/// at any time, and nothing else ever dereferences `value`.
pub struct MutexGuard<T> {
    value: Rc<UnsafeCell<T>>,
    lock_state: Rc<RefCell<LockState>>,
}

impl<T> Deref for MutexGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.value.get() }
    }
}

impl<T> Drop for MutexGuard<T> {
    fn drop(&mut self) {
        let mut state = self.lock_state.borrow_mut();
        unlock_and_handoff(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_::EventLoop;
    use std::rc::Rc as StdRc;

    #[test]
    fn single_locker_round_trips() {
        let l = EventLoop::new();
        let mutex = Mutex::new(0);
        let value = l.run_until(async move {
            let mut guard = mutex.lock().await;
            *guard += 1;
            *guard
        });
        assert_eq!(value, 1);
    }

    #[test]
    fn contended_lockers_grant_in_fifo_order() {
        let l = EventLoop::new();
        let mutex = Mutex::new(());
        let order = StdRc::new(RefCell::new(Vec::new()));

        let m1 = mutex.clone();
        let o1 = order.clone();
        l.spawn(crate::here!(), async move {
            let _g = m1.lock().await;
            o1.borrow_mut().push(1);
        });
        let m2 = mutex.clone();
        let o2 = order.clone();
        l.spawn(crate::here!(), async move {
            let _g = m2.lock().await;
            o2.borrow_mut().push(2);
        });
        l.run();
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    fn noop_waker() -> Waker {
        use std::task::{RawWaker, RawWakerVTable};

        fn clone(_: *const ()) -> RawWaker {
            raw()
        }
        fn no_op(_: *const ()) {}
        fn raw() -> RawWaker {
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        unsafe { Waker::from_raw(raw()) }
    }

    // Reproduces the exact race the FIFO guarantee exists to rule out: a
    // brand-new locker polled in the window between an unlock and the
    // already-queued waiter's resumption must not acquire ahead of it.
    #[test]
    fn unlock_hands_off_to_the_queued_waiter_without_letting_a_newcomer_barge() {
        let mutex = Mutex::new(());
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut lock_a = Box::pin(mutex.lock());
        let guard_a = match lock_a.as_mut().poll(&mut cx) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("uncontended lock should acquire immediately"),
        };

        let mut lock_b = Box::pin(mutex.lock());
        assert!(matches!(lock_b.as_mut().poll(&mut cx), Poll::Pending));

        drop(guard_a);

        let mut lock_c = Box::pin(mutex.lock());
        assert!(
            matches!(lock_c.as_mut().poll(&mut cx), Poll::Pending),
            "a newly constructed Lock must not barge ahead of the already-queued waiter"
        );

        assert!(matches!(lock_b.as_mut().poll(&mut cx), Poll::Ready(_)));
    }

    // If the designated next owner is dropped before it ever claims the
    // lock (e.g. cancelled right after being woken), the hand-off must pass
    // to whoever is next rather than leaving the mutex locked forever.
    #[test]
    fn dropping_the_designated_waiter_before_it_claims_passes_the_lock_on() {
        let mutex = Mutex::new(());
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut lock_a = Box::pin(mutex.lock());
        let guard_a = match lock_a.as_mut().poll(&mut cx) {
            Poll::Ready(g) => g,
            Poll::Pending => panic!("uncontended lock should acquire immediately"),
        };

        let mut lock_b = Box::pin(mutex.lock());
        assert!(matches!(lock_b.as_mut().poll(&mut cx), Poll::Pending));
        let mut lock_c = Box::pin(mutex.lock());
        assert!(matches!(lock_c.as_mut().poll(&mut cx), Poll::Pending));

        drop(guard_a);
        drop(lock_b);

        assert!(matches!(lock_c.as_mut().poll(&mut cx), Poll::Ready(_)));
    }
}
