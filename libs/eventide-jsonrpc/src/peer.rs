//! The JSON-RPC peer itself (spec §3.5, §4.F): read loop, write pump,
//! inbound/outbound dispatch, and the pending-request table.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use eventide_rt::cancellation::{with_token, Cancelled};
use eventide_rt::{here, CancellationSource, CancellationToken, EventLoop};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::RpcError;
use crate::method::RpcMethod;
use crate::pending::PendingRequest;
use crate::protocol::{self, Message, ParseFailure, RequestId};
use crate::transport::Transport;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;
type RequestHandler = Rc<dyn Fn(RequestContext, Value) -> BoxFuture<Result<Value, RpcError>>>;
type NotificationHandler = Rc<dyn Fn(NotificationContext, Value) -> BoxFuture<()>>;

/// Passed to a registered request handler: lets it see its own id/method
/// (for correlation, e.g. logging or nested cancellation) and issue further
/// requests/notifications on the same peer.
#[derive(Clone)]
pub struct RequestContext {
    pub peer: Peer,
    pub id: RequestId,
    pub method: String,
}

#[derive(Clone)]
pub struct NotificationContext {
    pub peer: Peer,
    pub method: String,
}

struct PeerState {
    transport: Rc<dyn Transport>,
    loop_: EventLoop,
    outgoing_queue: RefCell<VecDeque<String>>,
    writer_running: Cell<bool>,
    next_request_id: Cell<i64>,
    request_callbacks: RefCell<HashMap<String, RequestHandler>>,
    notification_callbacks: RefCell<HashMap<String, NotificationHandler>>,
    pending_requests: RefCell<HashMap<RequestId, Rc<PendingRequest>>>,
    incoming_requests: RefCell<HashMap<RequestId, CancellationSource>>,
    running: Cell<bool>,
}

/// A bidirectional JSON-RPC endpoint over one [`Transport`]. Cheaply
/// clonable (`Rc`); every clone shares the same state — handlers typically
/// receive a clone via [`RequestContext::peer`]/[`NotificationContext::peer`]
/// to issue nested calls.
#[derive(Clone)]
pub struct Peer {
    inner: Rc<PeerState>,
}

const CANCEL_REQUEST_METHOD: &str = "$/cancelRequest";

impl Peer {
    pub fn new(transport: Rc<dyn Transport>, loop_: EventLoop) -> Self {
        Self {
            inner: Rc::new(PeerState {
                transport,
                loop_,
                outgoing_queue: RefCell::new(VecDeque::new()),
                writer_running: Cell::new(false),
                next_request_id: Cell::new(1),
                request_callbacks: RefCell::new(HashMap::new()),
                notification_callbacks: RefCell::new(HashMap::new()),
                pending_requests: RefCell::new(HashMap::new()),
                incoming_requests: RefCell::new(HashMap::new()),
                running: Cell::new(false),
            }),
        }
    }

    fn next_id(&self) -> RequestId {
        let id = self.inner.next_request_id.get();
        self.inner.next_request_id.set(id + 1);
        RequestId::Number(id)
    }

    // ---- handler registration ------------------------------------------

    pub fn on_request<P, F, Fut>(&self, handler: F)
    where
        P: RpcMethod + 'static,
        F: Fn(RequestContext, P) -> Fut + 'static,
        Fut: Future<Output = Result<P::Output, RpcError>> + 'static,
    {
        self.on_request_named(P::METHOD, handler);
    }

    pub fn on_request_named<P, Out, F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + 'static,
        Out: Serialize + 'static,
        F: Fn(RequestContext, P) -> Fut + 'static,
        Fut: Future<Output = Result<Out, RpcError>> + 'static,
    {
        let handler = Rc::new(handler);
        let erased: RequestHandler = Rc::new(move |ctx, params: Value| {
            let handler = handler.clone();
            Box::pin(async move {
                let parsed: P = serde_json::from_value(params)
                    .map_err(|e| RpcError::invalid_params(format!("invalid params: {e}")))?;
                let output = handler(ctx, parsed).await?;
                serde_json::to_value(output).map_err(|e| {
                    RpcError::internal_error(format!("failed to serialize result: {e}"))
                })
            }) as BoxFuture<Result<Value, RpcError>>
        });
        self.inner
            .request_callbacks
            .borrow_mut()
            .insert(method.into(), erased);
    }

    pub fn on_notification<P, F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + 'static,
        F: Fn(NotificationContext, P) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let handler = Rc::new(handler);
        let erased: NotificationHandler = Rc::new(move |ctx, params: Value| {
            let handler = handler.clone();
            Box::pin(async move {
                match serde_json::from_value::<P>(params) {
                    Ok(parsed) => handler(ctx, parsed).await,
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping notification with unparsable params");
                    }
                }
            }) as BoxFuture<()>
        });
        self.inner
            .notification_callbacks
            .borrow_mut()
            .insert(method.into(), erased);
    }

    // ---- lifecycle -------------------------------------------------------

    /// The read loop (spec §4.F.2). Never blocks on a handler: every inbound
    /// request/notification is scheduled as an independent task before this
    /// loop reads the next message.
    pub async fn run(&self) {
        self.inner.running.set(true);
        loop {
            let payload = self.inner.transport.read_message().await;
            match payload {
                None => {
                    self.fail_all_pending(RpcError::transport_closed());
                    break;
                }
                Some(text) => self.dispatch_incoming(text),
            }
        }
        self.inner.running.set(false);
    }

    /// Block the current loop running this peer's read loop to completion
    /// (transport closure, typically). Convenience over spawning `run()`
    /// and driving the loop yourself.
    pub fn serve(&self, loop_: &EventLoop) {
        let peer = self.clone();
        loop_.run_until(async move { peer.run().await });
    }

    fn fail_all_pending(&self, error: RpcError) {
        let pending: Vec<Rc<PendingRequest>> =
            self.inner.pending_requests.borrow_mut().drain().map(|(_, p)| p).collect();
        for p in pending {
            p.complete(Err(error.clone()));
        }
    }

    // ---- inbound dispatch --------------------------------------------

    fn dispatch_incoming(&self, text: String) {
        match protocol::parse_message(&text) {
            Ok(Message::Request { id, method, params }) => self.dispatch_request(id, method, params),
            Ok(Message::Notification { method, params }) => self.dispatch_notification(method, params),
            Ok(Message::Success { id, result }) => self.complete_pending(id, Ok(result)),
            Ok(Message::Error { id, error }) => {
                if let Some(id) = id {
                    self.complete_pending(id, Err(error.into()));
                } else {
                    tracing::debug!("dropping error response with null id");
                }
            }
            Ok(Message::Malformed { id }) => {
                self.send_error_response(id, RpcError::invalid_request("malformed message"));
            }
            Err(ParseFailure::NotJson) => {
                tracing::debug!("dropping payload that is not valid JSON");
            }
            Err(ParseFailure::NoIdentifiableId) => {
                tracing::debug!("dropping malformed message with no addressable id");
            }
        }
    }

    fn dispatch_request(&self, id: RequestId, method: String, params: Value) {
        if self.inner.incoming_requests.borrow().contains_key(&id) {
            self.send_error_response(id, RpcError::invalid_request("duplicate request id"));
            return;
        }
        let handler = self.inner.request_callbacks.borrow().get(&method).cloned();
        let Some(handler) = handler else {
            self.send_error_response(id, RpcError::method_not_found(&method));
            return;
        };

        let source = CancellationSource::new();
        self.inner
            .incoming_requests
            .borrow_mut()
            .insert(id.clone(), source.clone());

        let peer = self.clone();
        let ctx = RequestContext {
            peer: peer.clone(),
            id: id.clone(),
            method,
        };
        let token = source.token();
        self.inner.loop_.spawn(here!(), async move {
            let id = ctx.id.clone();
            let outcome = with_token(token, handler(ctx, params)).await;
            peer.inner.incoming_requests.borrow_mut().remove(&id);
            match outcome {
                Err(Cancelled) => peer.send_error_response(id, RpcError::cancelled()),
                Ok(Err(e)) => peer.send_error_response(id, e),
                Ok(Ok(value)) => peer.send_success_response(id, value),
            }
        });
    }

    fn dispatch_notification(&self, method: String, params: Value) {
        if method == CANCEL_REQUEST_METHOD {
            if let Some(id) = params.get("id").and_then(|v| request_id_from_json(v)) {
                if let Some(source) = self.inner.incoming_requests.borrow().get(&id) {
                    source.cancel();
                }
            }
            return;
        }

        let handler = self
            .inner
            .notification_callbacks
            .borrow()
            .get(&method)
            .cloned();
        if let Some(handler) = handler {
            let ctx = NotificationContext {
                peer: self.clone(),
                method,
            };
            self.inner.loop_.spawn(here!(), async move {
                handler(ctx, params).await;
            });
        }
        // Unknown notifications are dropped silently (JSON-RPC convention).
    }

    fn complete_pending(&self, id: RequestId, result: Result<Value, RpcError>) {
        let pending = self.inner.pending_requests.borrow_mut().remove(&id);
        match pending {
            Some(p) => p.complete(result),
            None => tracing::debug!(%id, "dropping response for unknown request id"),
        }
    }

    // ---- outbound -------------------------------------------------------

    fn send_success_response(&self, id: RequestId, result: Value) {
        self.enqueue(protocol::encode_success(&id, &result));
    }

    fn send_error_response(&self, id: RequestId, error: RpcError) {
        self.enqueue(protocol::encode_error(&id, &(&error).into()));
    }

    pub async fn send_request<P>(&self, params: P) -> Result<P::Output, RpcError>
    where
        P: RpcMethod + 'static,
    {
        self.send_request_with_token(params, CancellationToken::none()).await
    }

    pub async fn send_request_with_token<P>(
        &self,
        params: P,
        token: CancellationToken,
    ) -> Result<P::Output, RpcError>
    where
        P: RpcMethod + 'static,
    {
        if token.is_cancelled() {
            return Err(RpcError::cancelled());
        }

        let id = self.next_id();
        let pending = Rc::new(PendingRequest::new());
        self.inner
            .pending_requests
            .borrow_mut()
            .insert(id.clone(), pending.clone());
        let _pending_guard = PendingGuard {
            inner: self.inner.clone(),
            id: id.clone(),
        };

        let params_value = serde_json::to_value(&params)
            .map_err(|e| RpcError::internal_error(format!("failed to serialize params: {e}")))?;
        self.enqueue(protocol::encode_request(&id, P::METHOD, &params_value));

        let waiter = pending.clone();
        let raced = with_token(token, async move { waiter.event().wait().await }).await;

        match raced {
            Ok(()) => {
                let result = pending
                    .take_result()
                    .expect("PendingRequest event set without a stored result");
                match result {
                    Ok(value) => serde_json::from_value(value).map_err(|e| {
                        RpcError::internal_error(format!("failed to deserialize result: {e}"))
                    }),
                    Err(e) => Err(e),
                }
            }
            Err(Cancelled) => {
                self.enqueue(protocol::encode_notification(
                    CANCEL_REQUEST_METHOD,
                    &serde_json::json!({ "id": id }),
                ));
                Err(RpcError::cancelled())
            }
        }
    }

    /// Composed timeout (spec §4.F.7): races `params`'s own request against
    /// an internal source cancelled by a timer, distinguishing the
    /// timeout-induced cancellation from any caller-supplied token.
    pub async fn send_request_with_timeout<P>(
        &self,
        params: P,
        timeout: Duration,
    ) -> Result<P::Output, RpcError>
    where
        P: RpcMethod + 'static,
    {
        let source = CancellationSource::new();
        let token = source.token();
        self.inner.loop_.spawn(here!(), async move {
            eventide_rt::reactor::sleep(timeout).await;
            source.cancel();
        });
        self.send_request_with_token(params, token)
            .await
            .map_err(|e| {
                if e.code == RpcError::REQUEST_CANCELLED {
                    RpcError::timed_out()
                } else {
                    e
                }
            })
    }

    pub fn send_notification<P>(&self, params: P) -> Result<(), RpcError>
    where
        P: RpcMethod,
    {
        let value = serde_json::to_value(&params)
            .map_err(|e| RpcError::internal_error(format!("failed to serialize params: {e}")))?;
        self.enqueue(protocol::encode_notification(P::METHOD, &value));
        Ok(())
    }

    // ---- write pump (spec §4.F.3) ---------------------------------------

    fn enqueue(&self, payload: String) {
        self.inner.outgoing_queue.borrow_mut().push_back(payload);
        if !self.inner.writer_running.get() {
            self.inner.writer_running.set(true);
            let peer = self.clone();
            self.inner.loop_.spawn(here!(), async move { peer.run_write_pump().await });
        }
    }

    async fn run_write_pump(&self) {
        loop {
            let next = self.inner.outgoing_queue.borrow_mut().pop_front();
            let Some(payload) = next else {
                self.inner.writer_running.set(false);
                return;
            };
            let ok = self.inner.transport.write_message(payload).await;
            if !ok {
                self.inner.outgoing_queue.borrow_mut().clear();
                self.inner.writer_running.set(false);
                self.fail_all_pending(RpcError::transport_closed());
                return;
            }
        }
    }
}

/// Removes its `pending_requests` entry when dropped, covering not just the
/// two paths `send_request_with_token` itself returns through but also the
/// case where the whole future is torn down from outside (e.g. an enclosing
/// `with_token` on an inbound handler dropping a nested outbound call it was
/// awaiting) without ever reaching either branch.
struct PendingGuard {
    inner: Rc<PeerState>,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending_requests.borrow_mut().remove(&self.id);
    }
}

fn request_id_from_json(value: &Value) -> Option<RequestId> {
    if let Some(n) = value.as_i64() {
        Some(RequestId::Number(n))
    } else {
        value.as_str().map(|s| RequestId::String(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Plays back a fixed script of inbound messages and then stalls reads
    /// forever instead of closing, so a test can observe state without
    /// `run()`'s own transport-closure cleanup (`fail_all_pending`) masking
    /// what it's trying to check.
    struct StallingTransport {
        incoming: RefCell<VecDeque<String>>,
    }

    impl StallingTransport {
        fn new(messages: Vec<&str>) -> Self {
            Self {
                incoming: RefCell::new(messages.into_iter().map(String::from).collect()),
            }
        }
    }

    #[async_trait(?Send)]
    impl Transport for StallingTransport {
        async fn read_message(&self) -> Option<String> {
            if let Some(msg) = self.incoming.borrow_mut().pop_front() {
                return Some(msg);
            }
            std::future::pending::<()>().await;
            unreachable!()
        }

        async fn write_message(&self, _payload: String) -> bool {
            true
        }
    }

    struct PingMethod;

    impl Serialize for PingMethod {
        fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_unit()
        }
    }

    impl<'de> serde::Deserialize<'de> for PingMethod {
        fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            <() as serde::Deserialize<'de>>::deserialize(d).map(|_| PingMethod)
        }
    }

    impl RpcMethod for PingMethod {
        const METHOD: &'static str = "ping";
        type Output = Value;
    }

    // A nested outbound call awaited by an inbound handler that is itself
    // torn down by `$/cancelRequest` must not leave its `pending_requests`
    // entry behind: the handler future (and the `send_request` it was
    // suspended on) is dropped in place by the enclosing `with_token`,
    // skipping both of `send_request_with_token`'s own cleanup branches.
    #[test]
    fn nested_outbound_call_is_cleaned_up_when_its_handler_is_cancelled() {
        let loop_ = EventLoop::new();
        let transport = Rc::new(StallingTransport::new(vec![
            r#"{"jsonrpc":"2.0","id":1,"method":"slow","params":{}}"#,
            r#"{"jsonrpc":"2.0","method":"$/cancelRequest","params":{"id":1}}"#,
        ]));
        let peer = Peer::new(transport, loop_.clone());
        peer.on_request_named("slow", |ctx, _params: Value| async move {
            let _ = ctx.peer.send_request(PingMethod).await;
            Ok::<Value, RpcError>(Value::Null)
        });

        let peer_run = peer.clone();
        let peer_check = peer.clone();
        let loop_stop = loop_.clone();
        let remaining = Rc::new(Cell::new(None));
        let remaining2 = remaining.clone();

        loop_.spawn(here!(), async move {
            peer_run.run().await;
        });
        loop_.spawn(here!(), async move {
            // Let the read loop consume both scripted messages and let the
            // cancellation drop the handler and its nested call.
            eventide_rt::reactor::sleep(Duration::from_millis(50)).await;
            remaining2.set(Some(peer_check.inner.pending_requests.borrow().len()));
            loop_stop.stop();
        });
        loop_.run();

        assert_eq!(remaining.get(), Some(0));
    }
}
