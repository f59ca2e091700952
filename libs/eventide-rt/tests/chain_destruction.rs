//! Multi-level cancellation chain destruction (spec §8 S5): cancelling a
//! token wrapping the top of a caller/callee chain tears down every frame
//! in that chain bottom-up, without any of them resuming to produce a
//! value — unless a frame opted in to observe cancellation instead.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use eventide_rt::cancellation::{with_token, Cancelled};
use eventide_rt::{here, CancellationSource, EventLoop};

struct MarkOnDrop(Rc<Cell<bool>>);

impl Drop for MarkOnDrop {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

// Task A awaits `with_token(tok, B)` where B itself awaits a plain nested
// task C. Cancelling `tok` must tear down C, then B, without either one
// resuming — Rust's own drop cascade realizes the bottom-up chain teardown
// spec §4.A describes, rooted at the `with_token` boundary.
#[test]
fn cancelling_a_three_level_chain_tears_down_bottom_up_without_resuming() {
    let loop_ = EventLoop::new();

    let b_destroyed = Rc::new(Cell::new(false));
    let c_destroyed = Rc::new(Cell::new(false));
    let b_resumed_past_c = Rc::new(Cell::new(false));
    let outcome: Rc<RefCell<Option<Result<(), Cancelled>>>> = Rc::new(RefCell::new(None));

    let b_destroyed2 = b_destroyed.clone();
    let c_destroyed2 = c_destroyed.clone();
    let b_resumed_past_c2 = b_resumed_past_c.clone();
    let outcome2 = outcome.clone();

    let source = CancellationSource::new();
    let token = source.token();

    // Spawned first: its cancellation watcher registers before the
    // canceller task runs in the same tick.
    loop_.spawn(here!(), async move {
        let b_guard = MarkOnDrop(b_destroyed2);
        let c_guard = MarkOnDrop(c_destroyed2);
        let b_resumed_past_c3 = b_resumed_past_c2.clone();

        // B: a plain nested task (no intercept of its own) that awaits C.
        let b = eventide_rt::task::Task::new(here!(), async move {
            let _b_guard = b_guard;
            // C: the leaf of the chain — never completes on its own; only
            // cancellation (via B's drop, via the outer with_token losing
            // its race) ever removes it.
            let c = eventide_rt::task::Task::new(here!(), async move {
                let _c_guard = c_guard;
                std::future::pending::<()>().await;
                unreachable!("C must never resume to completion once cancelled");
            });
            c.await;
            // If C's drop somehow let control fall through instead of
            // tearing down B's own frame, this would run — it must not.
            b_resumed_past_c3.set(true);
        });

        let result = with_token(token, b).await;
        *outcome2.borrow_mut() = Some(result);
    });
    loop_.spawn(here!(), async move {
        source.cancel();
    });
    loop_.run();

    assert_eq!(outcome.borrow_mut().take(), Some(Err(Cancelled)));
    assert!(c_destroyed.get(), "C's frame was not torn down");
    assert!(b_destroyed.get(), "B's frame was not torn down");
    assert!(
        !b_resumed_past_c.get(),
        "B resumed past its cancelled child instead of being torn down with it"
    );
}
