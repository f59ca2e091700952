//! A minimal concrete reactor primitive built on [`crate::wait_op`].
//!
//! The runtime core treats reactors as opaque (spec: "out of scope... treated
//! as opaque providers of completion callbacks"). `eventide-jsonrpc`'s
//! request-timeout composition and the demo binary still need *some* timer,
//! so this module supplies the simplest possible one: an OS thread per
//! timer, completing a [`crate::wait_op::WaitOp`] when it wakes. Anything
//! wanting a real reactor (epoll/kqueue/IOCP) plugs in the same way, through
//! `WaitOpHandle::complete`.

use std::thread;
use std::time::Duration;

use crate::wait_op::WaitOp;

/// Resolves after at least `duration` has elapsed.
pub fn sleep(duration: Duration) -> impl std::future::Future<Output = ()> {
    let (handle, waiter) = WaitOp::new();
    thread::spawn(move || {
        thread::sleep(duration);
        handle.complete(());
    });
    waiter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_::EventLoop;
    use std::time::Instant;

    #[test]
    fn sleep_resolves_after_roughly_the_requested_duration() {
        let l = EventLoop::new();
        let start = Instant::now();
        l.run_until(sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
