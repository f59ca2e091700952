//! Cancellation source/token pair and the `with_token` combinator
//! (component C).
//!
//! `with_token` is the sole supported way to inject a token into a subtree:
//! it races the wrapped future against the token's cancellation notification
//! and, if the token wins, drops the wrapped future in place rather than
//! polling it again. That drop is what realizes bottom-up chain destruction
//! for a cancelled subtree (see `crate::task`) — everything *above* the
//! `with_token` boundary keeps running and simply observes `Err(Cancelled)`.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use pin_project_lite::pin_project;

use crate::task::Task;

/// Marker error returned when a `with_token`-wrapped future was cancelled
/// before producing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

struct SourceState {
    cancelled: bool,
    watchers: Vec<(u64, Waker)>,
    next_id: u64,
}

/// Owns the authority to cancel every token derived from it.
#[derive(Clone)]
pub struct CancellationSource {
    state: Rc<RefCell<SourceState>>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SourceState {
                cancelled: false,
                watchers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            state: Rc::downgrade(&self.state),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.borrow().cancelled
    }

    /// Idempotent. Wakes every watcher registered at the time of the call;
    /// watchers registered afterward observe `is_cancelled() == true`
    /// immediately on their first poll instead.
    pub fn cancel(&self) {
        let mut state = self.state.borrow_mut();
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        for (_, waker) in state.watchers.drain(..) {
            waker.wake();
        }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheap, clonable handle to observe cancellation. Does not itself hold
/// the source alive (`Weak`): if the source is dropped without cancelling,
/// tokens derived from it behave as permanently not-cancelled.
#[derive(Clone)]
pub struct CancellationToken {
    state: Weak<RefCell<SourceState>>,
}

impl CancellationToken {
    /// A token that can never be cancelled, for call sites that need a
    /// token but have no real source (e.g. top-level demo entry points).
    pub fn none() -> Self {
        CancellationSource::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state
            .upgrade()
            .map(|s| s.borrow().cancelled)
            .unwrap_or(false)
    }

    /// A future resolving once this token is cancelled. Never resolves if
    /// the token can never be cancelled.
    pub fn cancelled(&self) -> Cancellation {
        Cancellation {
            token: self.clone(),
            registration: None,
        }
    }

    fn register(&self, waker: Waker) -> Option<Registration> {
        let strong = self.state.upgrade()?;
        let mut state = strong.borrow_mut();
        if state.cancelled {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.watchers.push((id, waker));
        Some(Registration {
            state: Rc::downgrade(&strong),
            id,
        })
    }
}

/// RAII unsubscribe handle: dropping it removes the watcher entry from the
/// source, so a cancelled wait-op (or a `with_token` race that lost) never
/// leaves a stale waker behind.
struct Registration {
    state: Weak<RefCell<SourceState>>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.borrow_mut().watchers.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Future returned by [`CancellationToken::cancelled`].
pub struct Cancellation {
    token: CancellationToken,
    registration: Option<Registration>,
}

impl Future for Cancellation {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            this.registration = None;
            return Poll::Ready(());
        }
        if this.registration.is_none() {
            this.registration = this.token.register(cx.waker().clone());
            // `register` returns `None` only if the source vanished or
            // cancelled between the check above and now; re-check.
            if this.registration.is_none() && this.token.is_cancelled() {
                return Poll::Ready(());
            }
        }
        Poll::Pending
    }
}

pin_project! {
    /// Races `child` against `cancel`. If `cancel` resolves first, `child`
    /// (and everything it was suspended on) is dropped in place.
    struct Race<F, T> {
        #[pin]
        child: F,
        #[pin]
        cancel: Cancellation,
        _marker: std::marker::PhantomData<T>,
    }
}

impl<F: Future<Output = T>, T> Future for Race<F, T> {
    type Output = Result<T, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(v) = this.child.poll(cx) {
            return Poll::Ready(Ok(v));
        }
        if let Poll::Ready(()) = this.cancel.poll(cx) {
            return Poll::Ready(Err(Cancelled));
        }
        Poll::Pending
    }
}

/// Inject `token` into `child`'s subtree (spec §4.C `with_token`):
///
/// 1. If `token` is already cancelled, `child` never starts.
/// 2. Otherwise `child` is driven normally; if `token` cancels first, `child`
///    is dropped (bottom-up teardown of anything it was suspended on) and
///    `Err(Cancelled)` is returned instead.
pub async fn with_token<T>(
    token: CancellationToken,
    child: impl Future<Output = T> + 'static,
) -> Result<T, Cancelled> {
    if token.is_cancelled() {
        return Err(Cancelled);
    }
    let task = Task::new(crate::here!(), child);
    task.mark_intercept_cancel();
    let cancel = token.cancelled();
    Race {
        child: task,
        cancel,
        _marker: std::marker::PhantomData,
    }
    .await
}

/// `catch_cancel`: observe cancellation of `child` as a value rather than
/// propagating it, identical in effect to `with_token`.
pub async fn catch_cancel<T>(
    token: CancellationToken,
    child: impl Future<Output = T> + 'static,
) -> Result<T, Cancelled> {
    with_token(token, child).await
}
