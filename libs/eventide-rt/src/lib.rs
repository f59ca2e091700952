//! Single-threaded cooperative async runtime with a structured-concurrency
//! cancellation model.
//!
//! Built directly on `std::future::Future`/`std::task::{Context,Poll,Wake}`
//! rather than on top of another executor: the scheduler here is itself a
//! ready queue and reactor bridge, not a consumer of one.
//!
//! Module map:
//! - [`frame`] — per-task bookkeeping side-table (component A)
//! - [`loop_`] (re-exported as [`event_loop`]) — scheduler/event loop (component B)
//! - [`cancellation`] — source/token pair, `with_token` (component C)
//! - [`sync`] — `Event`, `Mutex` (component D)
//! - [`wait_op`] — reactor-completion-to-frame scaffold (component E)
//! - [`task`] — the awaitable, frame-bookkeeping `Task<T>` wrapper

pub mod cancellation;
pub mod frame;
mod loop_;
pub mod reactor;
pub mod sync;
pub mod task;
pub mod wait_op;

/// Re-exported under its conceptual name; `loop_` exists only because `loop`
/// is a keyword.
pub mod event_loop {
    pub use crate::loop_::EventLoop;
}

pub use cancellation::{with_token, Cancelled, CancellationSource, CancellationToken};
pub use event_loop::EventLoop;
pub use frame::{FrameId, Location};
pub use task::Task;
