//! A transport-agnostic JSON-RPC 2.0 peer built on `eventide-rt`.
//!
//! Module map:
//! - [`protocol`] — wire message shapes and (de)serialization
//! - [`error`] — `RpcError`, the JSON-RPC error taxonomy
//! - [`transport`] — the `Transport` trait a concrete byte stream implements
//! - [`method`] — `RpcMethod`, the typed-binding trait
//! - [`pending`] — `PendingRequest`, the outbound-request completion slot
//! - [`peer`] — `Peer` itself: read loop, write pump, dispatch

pub mod error;
pub mod method;
pub mod pending;
pub mod peer;
pub mod protocol;
pub mod transport;

pub use error::RpcError;
pub use method::RpcMethod;
pub use peer::{NotificationContext, Peer, RequestContext};
pub use protocol::{Message, ParseFailure, RequestId, WireError};
pub use transport::Transport;

/// Re-exported so callers write `#[derive(eventide_jsonrpc::RpcMethod)]`
/// without a direct dependency on the macro crate. Lives in the derive-macro
/// namespace, so this does not collide with the `RpcMethod` trait above.
pub use eventide_jsonrpc_macros::RpcMethod;
