//! Generic scaffold binding a reactor completion callback to a single
//! parked frame (component E).
//!
//! This is deliberately independent of any concrete reactor: a background
//! thread (or any other completion source) holds a [`WaitOpHandle`] and
//! calls [`WaitOpHandle::complete`] exactly once; the frame awaiting
//! [`WaitOp`] is woken through the same `Waker` machinery as any other
//! future, so completions arrive through the loop's normal wake channel
//! regardless of which thread produced them.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

struct Shared<T> {
    result: Option<T>,
    waker: Option<Waker>,
    /// Set once `complete` has been called, so a second call is a no-op
    /// rather than silently overwriting a delivered result (single-shot
    /// delivery discipline; see module docs).
    delivered: bool,
}

/// The completion side of a wait-op: held by whatever produces the result
/// (a reactor, a background thread, a timer). `Send + Sync` so it can cross
/// a thread boundary freely.
pub struct WaitOpHandle<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> WaitOpHandle<T> {
    /// Deliver the result and wake the parked frame. Idempotent: only the
    /// first call has any effect (single-shot discipline).
    pub fn complete(&self, value: T) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if shared.delivered {
            return;
        }
        shared.delivered = true;
        shared.result = Some(value);
        if let Some(waker) = shared.waker.take() {
            waker.wake();
        }
    }
}

impl<T> Clone for WaitOpHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// The await side of a wait-op: parked on a single frame until
/// [`WaitOpHandle::complete`] is called.
pub struct WaitOp<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> WaitOp<T> {
    /// Create a linked handle/waiter pair.
    pub fn new() -> (WaitOpHandle<T>, WaitOp<T>) {
        let shared = Arc::new(Mutex::new(Shared {
            result: None,
            waker: None,
            delivered: false,
        }));
        (
            WaitOpHandle {
                shared: shared.clone(),
            },
            WaitOp { shared },
        )
    }
}

impl<T> Future for WaitOp<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = shared.result.take() {
            return Poll::Ready(value);
        }
        shared.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> Drop for WaitOp<T> {
    fn drop(&mut self) {
        // Unparking on cancellation falls out of ordinary `Drop`: once this
        // future is dropped (typically by `with_token` losing a race), the
        // stored waker is gone and a late `complete()` call just finds
        // nobody to wake.
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.waker = None;
    }
}
