//! Async synchronization primitives (component D): a manual-reset latch
//! (`Event`) and a FIFO async lock (`Mutex`).

mod event;
mod mutex;

pub use event::{Event, EventWait};
pub use mutex::{Lock, Mutex, MutexGuard};
