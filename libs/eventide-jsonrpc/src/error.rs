//! `RpcError`: both the in-process error return value and, via
//! [`crate::protocol::WireError`], the on-wire error object (spec §6.3, §7).

use serde_json::Value;

use crate::protocol::WireError;

/// A JSON-RPC error: code, human-readable message, and optional structured
/// data. This is the value handlers return as `Err(...)` and the value
/// `send_request` resolves to on failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const REQUEST_CANCELLED: i32 = -32800;
    pub const REQUEST_FAILED: i32 = -32000;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    pub fn cancelled() -> Self {
        Self::new(Self::REQUEST_CANCELLED, "request cancelled")
    }

    pub fn timed_out() -> Self {
        Self::new(Self::REQUEST_CANCELLED, "request timed out")
    }

    pub fn transport_closed() -> Self {
        Self::new(Self::REQUEST_CANCELLED, "transport closed")
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Self::REQUEST_FAILED, message)
    }
}

impl From<WireError> for RpcError {
    fn from(e: WireError) -> Self {
        Self {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

impl From<&RpcError> for WireError {
    fn from(e: &RpcError) -> Self {
        Self {
            code: e.code,
            message: e.message.clone(),
            data: e.data.clone(),
        }
    }
}
