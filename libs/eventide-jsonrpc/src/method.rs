//! Typed method bindings (spec §4.F.9, SPEC_FULL §3.6/§4.H).

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Associates a params type with its canonical JSON-RPC method name and
/// result type, so `Peer::send_request`/`Peer::on_request` can infer both
/// from the params type alone. `#[derive(RpcMethod)]` in
/// `eventide-jsonrpc-macros` generates this impl from a
/// `#[rpc(method = "...", result = "...")]` attribute.
pub trait RpcMethod: Serialize + DeserializeOwned {
    const METHOD: &'static str;
    type Output: Serialize + DeserializeOwned;
}
