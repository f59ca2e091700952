//! Scheduler / event loop (component B).
//!
//! Single-threaded, cooperative, FIFO-per-tick. A `Waker` firing from any
//! thread pushes a frame id through an `mpsc` channel; only the loop's own
//! thread ever drains that channel into the ready queue, which is the
//! "reentrancy-safe with respect to the loop" requirement in practice.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crate::frame::{FrameId, FrameRecord, FrameTable, Location};

thread_local! {
    static CURRENT_LOOP: RefCell<Vec<EventLoop>> = const { RefCell::new(Vec::new()) };
}

/// A root future owned directly by the loop (as opposed to a `Task` nested
/// inside some other future's `.await`).
type RootFuture = Pin<Box<dyn Future<Output = ()>>>;

struct Inner {
    frames: RefCell<FrameTable>,
    ready: RefCell<VecDeque<FrameId>>,
    roots: RefCell<HashMap<FrameId, RootFuture>>,
    current_frame_stack: RefCell<Vec<FrameId>>,
    wake_tx: mpsc::Sender<FrameId>,
    wake_rx: RefCell<mpsc::Receiver<FrameId>>,
    stopped: RefCell<bool>,
}

/// A handle to a single-threaded event loop. Cloning is cheap (`Rc`); the
/// loop itself must never cross a thread boundary.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = mpsc::channel();
        Self {
            inner: Rc::new(Inner {
                frames: RefCell::new(FrameTable::new()),
                ready: RefCell::new(VecDeque::new()),
                roots: RefCell::new(HashMap::new()),
                current_frame_stack: RefCell::new(Vec::new()),
                wake_tx,
                wake_rx: RefCell::new(wake_rx),
                stopped: RefCell::new(false),
            }),
        }
    }

    /// The loop currently driving the calling frame, if any. Panics if
    /// called outside of `EventLoop::run`/`run_until` — a frame can only be
    /// scheduled onto a loop that is actually running.
    pub fn current() -> EventLoop {
        CURRENT_LOOP.with(|stack| {
            stack
                .borrow()
                .last()
                .cloned()
                .expect("eventide_rt: no current EventLoop (not running inside EventLoop::run)")
        })
    }

    pub fn try_current() -> Option<EventLoop> {
        CURRENT_LOOP.with(|stack| stack.borrow().last().cloned())
    }

    fn enter(&self) -> LoopGuard {
        CURRENT_LOOP.with(|stack| stack.borrow_mut().push(self.clone()));
        LoopGuard
    }

    pub(crate) fn frames(&self) -> &RefCell<FrameTable> {
        &self.inner.frames
    }

    pub(crate) fn current_frame_stack(&self) -> &RefCell<Vec<FrameId>> {
        &self.inner.current_frame_stack
    }

    pub(crate) fn waker_for(&self, frame: FrameId) -> Waker {
        Waker::from(Arc::new(FrameWake {
            frame,
            tx: self.inner.wake_tx.clone(),
        }))
    }

    /// Schedule a detached, fire-and-forget root task (spec `schedule`).
    /// The loop owns and polls it directly; its output is discarded.
    pub fn spawn(&self, location: Location, fut: impl Future<Output = ()> + 'static) -> FrameId {
        let frame = self
            .inner
            .frames
            .borrow_mut()
            .insert(FrameRecord::root(location));
        self.inner.roots.borrow_mut().insert(frame, Box::pin(fut));
        self.inner.ready.borrow_mut().push_back(frame);
        frame
    }

    /// Force-cancel a root task: drop its future immediately. Rust's
    /// ownership cascade tears down every nested await it was suspended on;
    /// the side-table walk here is bookkeeping only (testable invariants),
    /// not the mechanism of teardown.
    pub fn cancel_root(&self, frame: FrameId) {
        self.inner.frames.borrow_mut().cancel_chain(frame);
        self.inner.roots.borrow_mut().remove(&frame);
        self.inner.frames.borrow_mut().remove(frame);
    }

    pub fn stop(&self) {
        *self.inner.stopped.borrow_mut() = true;
        // Wake the loop if it's blocked waiting for an external event.
        let _ = self.inner.wake_tx.send(usize::MAX);
    }

    /// Drive the loop until `spawn`ed work and any live pollables are
    /// exhausted, or `stop()` is called.
    pub fn run(&self) {
        let _guard = self.enter();
        loop {
            if *self.inner.stopped.borrow() {
                break;
            }
            self.drain_wakes(false);
            if self.inner.ready.borrow().is_empty() {
                if self.inner.roots.borrow().is_empty() {
                    break;
                }
                self.drain_wakes(true);
                if *self.inner.stopped.borrow() {
                    break;
                }
            }
            self.tick();
        }
    }

    /// Run the loop until `fut` resolves, returning its value. Used by tests
    /// and the demo binary as the synchronous "block_on" entry point.
    pub fn run_until<T: 'static>(&self, fut: impl Future<Output = T> + 'static) -> T {
        let result = Rc::new(RefCell::new(None));
        let result_slot = result.clone();
        let wrapped = async move {
            let value = fut.await;
            *result_slot.borrow_mut() = Some(value);
        };
        let frame = self.spawn(crate::here!(), wrapped);
        self.run();
        self.inner.frames.borrow_mut().remove(frame);
        Rc::try_unwrap(result)
            .ok()
            .expect("run_until result still referenced")
            .into_inner()
            .expect("run_until: future never completed (loop drained with no pending work)")
    }

    fn drain_wakes(&self, blocking: bool) {
        let woken: Vec<FrameId> = if blocking {
            match self.inner.wake_rx.borrow().recv() {
                Ok(id) => {
                    let mut v = vec![id];
                    while let Ok(more) = self.inner.wake_rx.borrow().try_recv() {
                        v.push(more);
                    }
                    v
                }
                Err(_) => Vec::new(),
            }
        } else {
            let mut v = Vec::new();
            while let Ok(id) = self.inner.wake_rx.borrow().try_recv() {
                v.push(id);
            }
            v
        };
        let mut ready = self.inner.ready.borrow_mut();
        for id in woken {
            if id == usize::MAX {
                continue; // stop() sentinel
            }
            if self.inner.roots.borrow().contains_key(&id) {
                ready.push_back(id);
            }
        }
    }

    fn tick(&self) {
        let snapshot: Vec<FrameId> = self.inner.ready.borrow_mut().drain(..).collect();
        for frame in snapshot {
            self.poll_root(frame);
        }
    }

    fn poll_root(&self, frame: FrameId) {
        let mut fut = match self.inner.roots.borrow_mut().remove(&frame) {
            Some(f) => f,
            None => return, // already finished or cancelled
        };
        let waker = self.waker_for(frame);
        let mut cx = Context::from_waker(&waker);
        self.inner.current_frame_stack.borrow_mut().push(frame);
        let poll = fut.as_mut().poll(&mut cx);
        self.inner.current_frame_stack.borrow_mut().pop();
        match poll {
            Poll::Ready(()) => {
                let mut frames = self.inner.frames.borrow_mut();
                if let Some(record) = frames.get_mut(frame) {
                    record.state.finished = true;
                }
                frames.remove(frame);
            }
            Poll::Pending => {
                self.inner.roots.borrow_mut().insert(frame, fut);
            }
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

struct LoopGuard;

impl Drop for LoopGuard {
    fn drop(&mut self) {
        CURRENT_LOOP.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

struct FrameWake {
    frame: FrameId,
    tx: mpsc::Sender<FrameId>,
}

impl Wake for FrameWake {
    fn wake(self: Arc<Self>) {
        let _ = self.tx.send(self.frame);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let _ = self.tx.send(self.frame);
    }
}
