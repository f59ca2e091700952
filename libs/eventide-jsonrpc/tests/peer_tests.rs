//! End-to-end peer scenarios (spec §8, S1-S4) driven against a scripted
//! in-memory transport.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use eventide_jsonrpc::{Peer, RpcError, RpcMethod, Transport};
use eventide_rt::EventLoop;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A transport whose reads are pre-scripted and whose writes are recorded.
/// Reads yield via a short `reactor::sleep` rather than resolving
/// synchronously, so message delivery is interleaved with whatever the peer
/// is doing in between reads — closer to a real byte stream than an
/// instantly-ready mock would be.
struct ScriptedTransport {
    incoming: RefCell<VecDeque<String>>,
    outgoing: RefCell<Vec<String>>,
}

impl ScriptedTransport {
    fn new(messages: Vec<&str>) -> Self {
        Self {
            incoming: RefCell::new(messages.into_iter().map(String::from).collect()),
            outgoing: RefCell::new(Vec::new()),
        }
    }

    fn outgoing_snapshot(&self) -> Vec<String> {
        self.outgoing.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Transport for ScriptedTransport {
    async fn read_message(&self) -> Option<String> {
        eventide_rt::reactor::sleep(Duration::from_millis(1)).await;
        self.incoming.borrow_mut().pop_front()
    }

    async fn write_message(&self, payload: String) -> bool {
        self.outgoing.borrow_mut().push(payload);
        true
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AddParams {
    a: i64,
    b: i64,
}

#[derive(Debug, Serialize, Deserialize, eventide_jsonrpc::RpcMethod)]
#[rpc(method = "ping", result = "Value")]
struct Ping;

// S1: an inbound request is dispatched to its handler and the response is
// written back through the transport.
#[test]
fn request_is_dispatched_and_response_written() {
    let loop_ = EventLoop::new();
    let transport = Rc::new(ScriptedTransport::new(vec![
        r#"{"jsonrpc":"2.0","id":1,"method":"add","params":{"a":2,"b":3}}"#,
    ]));
    let peer = Peer::new(transport.clone(), loop_.clone());
    peer.on_request_named("add", |_ctx, p: AddParams| async move {
        Ok::<i64, RpcError>(p.a + p.b)
    });

    let peer_run = peer.clone();
    loop_.run_until(async move { peer_run.run().await });

    let outgoing = transport.outgoing_snapshot();
    assert_eq!(outgoing.len(), 1);
    assert!(outgoing[0].contains("\"id\":1"));
    assert!(outgoing[0].contains("\"result\":5"));
}

// Unknown notifications are dropped without producing any response traffic.
#[test]
fn unknown_notification_is_dropped_silently() {
    let loop_ = EventLoop::new();
    let transport = Rc::new(ScriptedTransport::new(vec![
        r#"{"jsonrpc":"2.0","method":"unknown/event","params":{}}"#,
    ]));
    let peer = Peer::new(transport.clone(), loop_.clone());

    let peer_run = peer.clone();
    loop_.run_until(async move { peer_run.run().await });

    assert!(transport.outgoing_snapshot().is_empty());
}

// A registered notification handler runs for a recognized method.
#[test]
fn registered_notification_runs_its_handler() {
    let loop_ = EventLoop::new();
    let transport = Rc::new(ScriptedTransport::new(vec![
        r#"{"jsonrpc":"2.0","method":"log","params":{"line":"hello"}}"#,
    ]));
    let peer = Peer::new(transport.clone(), loop_.clone());
    let seen = Rc::new(RefCell::new(None));
    let seen2 = seen.clone();
    peer.on_notification::<Value, _, _>("log", move |_ctx, params| {
        let seen2 = seen2.clone();
        async move {
            *seen2.borrow_mut() = Some(params);
        }
    });

    let peer_run = peer.clone();
    loop_.run_until(async move { peer_run.run().await });

    assert_eq!(
        seen.borrow().as_ref().unwrap().get("line").unwrap(),
        "hello"
    );
}

// S2: when the transport closes with a request still in flight, that
// request resolves to an error rather than hanging forever.
#[test]
fn transport_closure_fails_pending_outbound_request() {
    let loop_ = EventLoop::new();
    let transport = Rc::new(ScriptedTransport::new(vec![]));
    let peer = Peer::new(transport.clone(), loop_.clone());

    let result: Rc<RefCell<Option<Result<Value, RpcError>>>> = Rc::new(RefCell::new(None));
    let result2 = result.clone();

    let peer_run = peer.clone();
    loop_.spawn(eventide_rt::here!(), async move { peer_run.run().await });
    loop_.spawn(eventide_rt::here!(), async move {
        let outcome = peer.send_request(Ping).await;
        *result2.borrow_mut() = Some(outcome);
    });
    loop_.run();

    let outcome = result.borrow_mut().take().expect("send_request did not resolve");
    assert!(outcome.is_err());
}

// S3: a `$/cancelRequest` notification cancels the matching in-flight
// handler, which resolves with the cancellation error code instead of
// completing normally.
#[test]
fn cancel_request_notification_cancels_in_flight_handler() {
    let loop_ = EventLoop::new();
    let transport = Rc::new(ScriptedTransport::new(vec![
        r#"{"jsonrpc":"2.0","id":1,"method":"slow","params":{}}"#,
        r#"{"jsonrpc":"2.0","method":"$/cancelRequest","params":{"id":1}}"#,
    ]));
    let peer = Peer::new(transport.clone(), loop_.clone());
    let handler_finished = Rc::new(Cell::new(false));
    let handler_finished2 = handler_finished.clone();
    peer.on_request_named("slow", move |_ctx, _p: Value| {
        let handler_finished2 = handler_finished2.clone();
        async move {
            eventide_rt::reactor::sleep(Duration::from_millis(200)).await;
            handler_finished2.set(true);
            Ok::<Value, RpcError>(Value::Null)
        }
    });

    let peer_run = peer.clone();
    loop_.run_until(async move { peer_run.run().await });

    let outgoing = transport.outgoing_snapshot();
    assert_eq!(outgoing.len(), 1);
    assert!(outgoing[0].contains(&RpcError::REQUEST_CANCELLED.to_string()));
    assert!(!handler_finished.get());
}

// S4: a second request reusing the id of one still being handled is
// rejected as an invalid request rather than silently overwriting it.
#[test]
fn duplicate_request_id_is_rejected() {
    let loop_ = EventLoop::new();
    let transport = Rc::new(ScriptedTransport::new(vec![
        r#"{"jsonrpc":"2.0","id":1,"method":"slow","params":{}}"#,
        r#"{"jsonrpc":"2.0","id":1,"method":"slow","params":{}}"#,
    ]));
    let peer = Peer::new(transport.clone(), loop_.clone());
    peer.on_request_named("slow", |_ctx, _p: Value| async move {
        eventide_rt::reactor::sleep(Duration::from_millis(50)).await;
        Ok::<Value, RpcError>(Value::Null)
    });

    let peer_run = peer.clone();
    loop_.run_until(async move { peer_run.run().await });

    let outgoing = transport.outgoing_snapshot();
    assert_eq!(outgoing.len(), 2);
    assert!(outgoing
        .iter()
        .any(|m| m.contains(&RpcError::INVALID_REQUEST.to_string()) && m.contains("duplicate")));
}

#[derive(Debug, Serialize, Deserialize, eventide_jsonrpc::RpcMethod)]
#[rpc(method = "example/note", result = "Value")]
struct NoteParams {
    text: String,
}

#[derive(Debug, Serialize, Deserialize, eventide_jsonrpc::RpcMethod)]
#[rpc(method = "client/add", result = "ClientAddResult")]
struct ClientAddParams {
    a: i64,
    b: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClientAddResult {
    sum: i64,
}

/// A transport that plays back one scripted inbound request and then
/// synthesizes the S1 scenario's echoed `client/add` response the moment it
/// observes that outbound write, so the nested request the handler issues
/// actually resolves. Closes once the handler's own response has gone out.
struct NestedCallTransport {
    incoming: RefCell<VecDeque<String>>,
    outgoing: RefCell<Vec<String>>,
}

impl NestedCallTransport {
    fn new(initial: Vec<&str>) -> Self {
        Self {
            incoming: RefCell::new(initial.into_iter().map(String::from).collect()),
            outgoing: RefCell::new(Vec::new()),
        }
    }

    fn outgoing_snapshot(&self) -> Vec<String> {
        self.outgoing.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Transport for NestedCallTransport {
    async fn read_message(&self) -> Option<String> {
        loop {
            if let Some(msg) = self.incoming.borrow_mut().pop_front() {
                return Some(msg);
            }
            // The scenario produces exactly three outgoing messages (the
            // notification, the nested request, and the final response);
            // once all three are out there is nothing further to read.
            if self.outgoing.borrow().len() >= 3 {
                return None;
            }
            eventide_rt::reactor::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn write_message(&self, payload: String) -> bool {
        if payload.contains("\"method\":\"client/add\"") {
            self.incoming
                .borrow_mut()
                .push_back(r#"{"jsonrpc":"2.0","id":1,"result":{"sum":4}}"#.to_string());
        }
        self.outgoing.borrow_mut().push(payload);
        true
    }
}

// S1: handler emits a notification, issues a nested outbound request, and
// folds the reply into its own response — exercising dispatch, the write
// pump's enqueue ordering, and outbound request/response correlation all at
// once.
#[test]
fn scripted_roundtrip_with_nested_notification_and_request() {
    let loop_ = EventLoop::new();
    let transport = Rc::new(NestedCallTransport::new(vec![
        r#"{"jsonrpc":"2.0","id":7,"method":"example/add","params":{"a":2,"b":3}}"#,
    ]));
    let peer = Peer::new(transport.clone(), loop_.clone());

    peer.on_request_named("example/add", |ctx, p: AddParams| async move {
        let peer = ctx.peer.clone();
        peer.send_notification(NoteParams {
            text: "handling request".to_string(),
        })?;
        let nested = peer.send_request(ClientAddParams { a: 3, b: 1 }).await?;
        Ok::<Value, RpcError>(serde_json::json!({ "sum": p.a + p.b + nested.sum }))
    });

    let peer_run = peer.clone();
    loop_.run_until(async move { peer_run.run().await });

    let outgoing = transport.outgoing_snapshot();
    assert_eq!(outgoing.len(), 3);
    assert!(outgoing[0].contains("\"method\":\"example/note\""));
    assert!(outgoing[0].contains("\"text\":\"handling request\""));
    assert!(outgoing[1].contains("\"method\":\"client/add\""));
    assert!(outgoing[1].contains("\"id\":1"));
    assert!(outgoing[2].contains("\"id\":7"));
    assert!(outgoing[2].contains("\"sum\":9"));
}

// Boundary #10: a pre-cancelled token short-circuits `send_request` before
// anything is written to the transport.
#[test]
fn send_request_with_precancelled_token_never_enqueues() {
    let loop_ = EventLoop::new();
    let transport = Rc::new(ScriptedTransport::new(vec![]));
    let peer = Peer::new(transport.clone(), loop_.clone());

    let source = eventide_rt::CancellationSource::new();
    source.cancel();
    let token = source.token();

    let outcome = loop_.run_until(async move { peer.send_request_with_token(Ping, token).await });

    assert_eq!(outcome.unwrap_err().code, RpcError::REQUEST_CANCELLED);
    assert!(transport.outgoing_snapshot().is_empty());
}

// `send_request_with_timeout` maps a timer-driven cancellation to a
// distinct "request timed out" message, never reaching the handler's own
// response (there isn't one scripted here).
#[test]
fn send_request_with_timeout_reports_timed_out() {
    let loop_ = EventLoop::new();
    let transport = Rc::new(ScriptedTransport::new(vec![]));
    let peer = Peer::new(transport, loop_.clone());

    let outcome = loop_.run_until(async move {
        peer.send_request_with_timeout(Ping, Duration::from_millis(10))
            .await
    });

    let err = outcome.unwrap_err();
    assert_eq!(err.code, RpcError::REQUEST_CANCELLED);
    assert!(err.message.contains("timed out"));
}
