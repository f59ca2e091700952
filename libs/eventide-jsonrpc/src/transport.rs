//! Transport interface consumed by the [`crate::peer::Peer`] (spec §6.1).
//!
//! Methods take `&self`, not `&mut self`: a peer reads and writes
//! concurrently (the read loop awaits the next message while the write pump
//! may be mid-write), so a transport implementation owns whatever interior
//! mutability its read half and write half each need, kept independent of
//! each other — typically two separate cells, one per half, exactly as a
//! real socket's read/write halves don't contend with each other.

use async_trait::async_trait;

/// `None` from `read_message` means EOF; `false` from `write_message` means
/// a fatal write failure (the peer treats either as transport closure).
#[async_trait(?Send)]
pub trait Transport {
    async fn read_message(&self) -> Option<String>;
    async fn write_message(&self, payload: String) -> bool;

    /// Optional half-close. Not all transports support it (stdio typically
    /// doesn't); the default is a no-op rather than requiring every
    /// implementer to write one (recovered from
    /// `original_source/include/eventide/language/transport.h`).
    async fn close_output(&self) {}
}
