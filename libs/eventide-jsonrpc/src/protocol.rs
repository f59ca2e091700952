//! Wire-level message shapes (spec §4.F.1) and lazy parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC request/response id: either a number or a string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

/// The wire shape of a JSON-RPC error object (distinct from
/// [`crate::error::RpcError`], which is also the in-process value; this is
/// purely the on-wire representation parsed from/written to a message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One parsed inbound message. Lazily determined by field presence per
/// spec §4.F.2, not by a `"kind"` discriminator on the wire.
#[derive(Debug)]
pub enum Message {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Success {
        id: RequestId,
        result: Value,
    },
    Error {
        id: Option<RequestId>,
        error: WireError,
    },
    /// Has an id but no recognizable shape (missing both `method` and
    /// `result`/`error`) — recoverable because we can still address a
    /// response to it (spec §4.F.2 step 2, "otherwise").
    Malformed {
        id: RequestId,
    },
}

/// The payload failed to parse, or parsed but carried no id we could
/// address a response to — both cases are dropped silently per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    NotJson,
    NoIdentifiableId,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

pub fn parse_message(text: &str) -> Result<Message, ParseFailure> {
    let raw: RawMessage = serde_json::from_str(text).map_err(|_| ParseFailure::NotJson)?;
    let RawMessage {
        id,
        method,
        params,
        result,
        error,
    } = raw;

    if let Some(method) = method {
        return Ok(match id {
            Some(id) => Message::Request {
                id,
                method,
                params: params.unwrap_or(Value::Null),
            },
            None => Message::Notification {
                method,
                params: params.unwrap_or(Value::Null),
            },
        });
    }
    if let Some(result) = result {
        return match id {
            Some(id) => Ok(Message::Success { id, result }),
            None => Err(ParseFailure::NoIdentifiableId),
        };
    }
    if let Some(error) = error {
        return Ok(Message::Error { id, error });
    }
    match id {
        Some(id) => Ok(Message::Malformed { id }),
        None => Err(ParseFailure::NoIdentifiableId),
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a WireError>,
}

pub fn encode_request(id: &RequestId, method: &str, params: &Value) -> String {
    serde_json::to_string(&Envelope {
        jsonrpc: "2.0",
        id: Some(id),
        method: Some(method),
        params: Some(params),
        result: None,
        error: None,
    })
    .expect("JSON-RPC request envelope is always serializable")
}

pub fn encode_notification(method: &str, params: &Value) -> String {
    serde_json::to_string(&Envelope {
        jsonrpc: "2.0",
        id: None,
        method: Some(method),
        params: Some(params),
        result: None,
        error: None,
    })
    .expect("JSON-RPC notification envelope is always serializable")
}

pub fn encode_success(id: &RequestId, result: &Value) -> String {
    serde_json::to_string(&Envelope {
        jsonrpc: "2.0",
        id: Some(id),
        method: None,
        params: None,
        result: Some(result),
        error: None,
    })
    .expect("JSON-RPC success envelope is always serializable")
}

pub fn encode_error(id: &RequestId, error: &WireError) -> String {
    serde_json::to_string(&Envelope {
        jsonrpc: "2.0",
        id: Some(id),
        method: None,
        params: None,
        result: None,
        error: Some(error),
    })
    .expect("JSON-RPC error envelope is always serializable")
}
