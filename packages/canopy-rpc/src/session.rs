//! Request/response correlation over a bidirectional message transport.
//!
//! The session never touches the transport itself: outbound messages are
//! pushed as encoded text onto the channel returned by [`RpcSession::new`],
//! and inbound payloads are fed in through [`RpcSession::handle_payload`]
//! (or [`RpcSession::serve`] for a stream of them).
//!
//! ```text
//!   handle_payload ──► classify ──┬─ response  ──► pending[id] ──► awaiting request()
//!                                 ├─ request   ──► methods[name] (spawned) ──► reply
//!                                 └─ notify    ──► topics[name], then methods[name]
//! ```

use crate::config::SessionConfig;
use crate::error::RpcError;
use crate::message::{
    ErrorCode, ErrorResponse, Message, Notification, Request, RequestId, Response, ResponseError,
};
use futures::{FutureExt, Stream, StreamExt};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

/// Method name a peer uses to abort one of its in-flight requests.
pub const CANCEL_METHOD: &str = "$/cancelRequest";

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;
pub type MethodHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;
pub type NotificationCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Encoded outbound messages, one per item, for the transport to write.
pub type Outbound = mpsc::UnboundedReceiver<String>;

struct PendingCall {
    method: String,
    tx: oneshot::Sender<Result<Value, RpcError>>,
}

struct Inner {
    config: SessionConfig,
    next_id: AtomicU64,
    next_subscription: AtomicU64,
    closed: AtomicBool,
    outbound: mpsc::UnboundedSender<String>,
    pending: Mutex<FxHashMap<RequestId, PendingCall>>,
    methods: Mutex<FxHashMap<String, MethodHandler>>,
    topics: Mutex<FxHashMap<String, Vec<(u64, NotificationCallback)>>>,
    in_flight: Mutex<FxHashMap<RequestId, AbortHandle>>,
}

// None of these maps is held across an await, so poisoning only means a
// callback panicked mid-update; the map itself is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct RpcSession {
    inner: Arc<Inner>,
}

impl RpcSession {
    pub fn new(config: SessionConfig) -> (Self, Outbound) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(Inner {
                config,
                next_id: AtomicU64::new(0),
                next_subscription: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                outbound,
                pending: Mutex::new(FxHashMap::default()),
                methods: Mutex::new(FxHashMap::default()),
                topics: Mutex::new(FxHashMap::default()),
                in_flight: Mutex::new(FxHashMap::default()),
            }),
        };
        (session, rx)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Ids of local requests still waiting for a response, in ascending order.
    pub fn pending_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = lock(&self.inner.pending).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sends a request and waits for the matching response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst) as i64);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.inner.pending);
            let limit = self.inner.config.max_pending;
            if pending.len() >= limit {
                tracing::warn!(
                    pending_len = pending.len(),
                    max_pending = limit,
                    method,
                    "too many pending requests; refusing new call"
                );
                return Err(RpcError::TooManyPending { limit });
            }
            pending.insert(
                id.clone(),
                PendingCall {
                    method: method.to_string(),
                    tx,
                },
            );
        }

        let message = Message::Request(Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        });
        if let Err(err) = self.send(&message) {
            lock(&self.inner.pending).remove(&id);
            return Err(err);
        }
        tracing::debug!(%id, method, "request sent");

        let outcome = match self.inner.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    lock(&self.inner.pending).remove(&id);
                    tracing::warn!(%id, method, timeout_ms = limit.as_millis() as u64, "request timed out");
                    return Err(RpcError::Timeout {
                        method: method.to_string(),
                        id,
                    });
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => result,
            // The pending entry was dropped without an answer.
            Err(_) => Err(RpcError::Closed),
        }
    }

    /// Like [`request`](Self::request), decoding the result into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let result = self.request(method, params).await?;
        serde_json::from_value(result).map_err(RpcError::Decode)
    }

    pub fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed);
        }
        tracing::debug!(method, "notification sent");
        self.send(&Message::Notification(Notification {
            method: method.to_string(),
            params,
        }))
    }

    /// Installs the handler for incoming requests (and notifications) named `method`.
    ///
    /// A failing handler answers with an error response. If the failure is
    /// a [`ResponseError`] its code and data are kept; anything else is
    /// reported as a server error carrying the failure's message.
    pub fn register<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: MethodHandler =
            Arc::new(move |params: Value| -> HandlerFuture { Box::pin(handler(params)) });
        if lock(&self.inner.methods)
            .insert(method.to_string(), handler)
            .is_some()
        {
            tracing::warn!(method, "replacing registered method handler");
        }
    }

    pub fn unregister(&self, method: &str) -> bool {
        lock(&self.inner.methods).remove(method).is_some()
    }

    /// Calls `callback` with the params of every notification named `method`.
    pub fn subscribe_notification<F>(&self, method: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.topics)
            .entry(method.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription {
            session: Arc::downgrade(&self.inner),
            method: method.to_string(),
            id,
        }
    }

    /// Ingests one transport payload holding a single message or a batch.
    ///
    /// A payload that is not JSON is rejected whole; the peer is told with a
    /// parse error response. Individual messages that fit no JSON-RPC shape
    /// are logged and skipped.
    ///
    /// Incoming requests are handled on spawned tasks, so this must be
    /// called from within a tokio runtime.
    pub fn handle_payload(&self, payload: &str) -> Result<(), RpcError> {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "unparsable payload");
                let reply = Message::ResponseError(ErrorResponse {
                    id: None,
                    error: ResponseError::new(ErrorCode::ParseError, err.to_string()),
                });
                if let Err(send_err) = self.send(&reply) {
                    tracing::debug!(error = %send_err, "could not report parse error");
                }
                return Err(RpcError::Parse(err));
            }
        };

        match value {
            Value::Array(batch) => {
                if batch.is_empty() {
                    tracing::debug!("ignoring empty batch");
                }
                for item in batch {
                    self.dispatch(item);
                }
            }
            single => self.dispatch(single),
        }
        Ok(())
    }

    /// Feeds every payload from `incoming` into the session, then closes it
    /// once the stream ends.
    pub async fn serve<S>(&self, incoming: S)
    where
        S: Stream<Item = String>,
    {
        let mut incoming = std::pin::pin!(incoming);
        while let Some(payload) = incoming.next().await {
            if let Err(err) = self.handle_payload(&payload) {
                tracing::debug!(error = %err, "payload rejected");
            }
        }
        tracing::info!("transport ended, closing session");
        self.close();
    }

    /// Fails every pending request with [`RpcError::Closed`] and aborts
    /// in-flight handlers. Later requests and notifications fail immediately.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending: Vec<(RequestId, PendingCall)> = lock(&self.inner.pending).drain().collect();
        let in_flight: Vec<AbortHandle> = lock(&self.inner.in_flight).drain().map(|(_, h)| h).collect();
        tracing::info!(
            pending = pending.len(),
            in_flight = in_flight.len(),
            "closing session"
        );
        for (id, call) in pending {
            if call.tx.send(Err(RpcError::Closed)).is_err() {
                tracing::debug!(%id, method = %call.method, "caller already gone");
            }
        }
        for handle in in_flight {
            handle.abort();
        }
    }

    fn send(&self, message: &Message) -> Result<(), RpcError> {
        let text = message.encode().map_err(RpcError::Encode)?;
        self.inner.outbound.send(text).map_err(|_| RpcError::Closed)
    }

    fn reply(&self, message: Message) {
        if let Err(err) = self.send(&message) {
            tracing::warn!(error = %err, "could not send reply");
        }
    }

    fn reply_error(&self, id: RequestId, error: ResponseError) {
        self.reply(Message::ResponseError(ErrorResponse {
            id: Some(id),
            error,
        }));
    }

    fn dispatch(&self, value: Value) {
        match Message::from_value(value) {
            Ok(Message::Request(request)) => self.handle_request(request),
            Ok(Message::Notification(notification)) => self.handle_notification(notification),
            Ok(Message::Response(response)) => self.complete(response.id, Ok(response.result)),
            Ok(Message::ResponseError(response)) => match response.id {
                Some(id) => self.complete(id, Err(RpcError::Remote(response.error))),
                None => tracing::warn!(error = %response.error, "peer reported an error without an id"),
            },
            Err(err) => tracing::warn!(error = %err, "ignoring unclassifiable message"),
        }
    }

    fn complete(&self, id: RequestId, outcome: Result<Value, RpcError>) {
        let Some(call) = lock(&self.inner.pending).remove(&id) else {
            tracing::warn!(%id, "dropping response with no pending request");
            return;
        };
        tracing::debug!(%id, method = %call.method, ok = outcome.is_ok(), "response received");
        if call.tx.send(outcome).is_err() {
            tracing::debug!(%id, method = %call.method, "caller stopped waiting");
        }
    }

    fn handle_request(&self, request: Request) {
        let handler = lock(&self.inner.methods).get(&request.method).cloned();
        let Some(handler) = handler else {
            tracing::debug!(id = %request.id, method = %request.method, "no handler for request");
            self.reply_error(request.id, ResponseError::method_not_found(&request.method));
            return;
        };

        let mut in_flight = lock(&self.inner.in_flight);
        if in_flight.contains_key(&request.id) {
            drop(in_flight);
            tracing::warn!(id = %request.id, method = %request.method, "duplicate request id");
            self.reply_error(
                request.id.clone(),
                ResponseError::new(
                    ErrorCode::InvalidRequest,
                    format!("request {} is already in flight", request.id),
                ),
            );
            return;
        }

        tracing::debug!(id = %request.id, method = %request.method, "request received");
        let id = request.id.clone();
        let session = self.clone();
        // The task takes the in-flight lock when it finishes, which cannot
        // happen before this guard is released.
        let task = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(handler(request.params)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(ResponseError::new(
                    ErrorCode::InternalError,
                    format!("handler panicked: {}", panic_message(panic.as_ref())),
                )
                .into()),
            };
            session.finish_request(request.id, &request.method, outcome);
        });
        in_flight.insert(id, task.abort_handle());
    }

    fn finish_request(&self, id: RequestId, method: &str, outcome: anyhow::Result<Value>) {
        if lock(&self.inner.in_flight).remove(&id).is_none() {
            // Cancelled or closed while the handler was finishing.
            return;
        }
        match outcome {
            Ok(result) => self.reply(Message::Response(Response { id, result })),
            Err(err) => {
                let error = match err.downcast::<ResponseError>() {
                    Ok(error) => error,
                    Err(err) => ResponseError::new(ErrorCode::ServerError, err.to_string()),
                };
                tracing::warn!(%id, method, error = %error, "request handler failed");
                self.reply_error(id, error);
            }
        }
    }

    fn handle_notification(&self, notification: Notification) {
        if notification.method == CANCEL_METHOD {
            self.cancel_incoming(&notification.params);
            return;
        }

        let subscribers: Vec<NotificationCallback> = lock(&self.inner.topics)
            .get(&notification.method)
            .map(|subs| subs.iter().map(|(_, callback)| callback.clone()).collect())
            .unwrap_or_default();
        for callback in &subscribers {
            callback(&notification.params);
        }

        let handler = lock(&self.inner.methods).get(&notification.method).cloned();
        match handler {
            Some(handler) => {
                let method = notification.method;
                tokio::spawn(async move {
                    if let Err(err) = handler(notification.params).await {
                        tracing::warn!(method = %method, error = %err, "notification handler failed");
                    }
                });
            }
            None if subscribers.is_empty() => {
                tracing::debug!(method = %notification.method, "notification has no listeners");
            }
            None => {}
        }
    }

    fn cancel_incoming(&self, params: &Value) {
        let Some(id) = params
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
        else {
            tracing::warn!(%params, "cancel request without a usable id");
            return;
        };
        let Some(handle) = lock(&self.inner.in_flight).remove(&id) else {
            tracing::debug!(%id, "cancel for a request that is not in flight");
            return;
        };
        handle.abort();
        tracing::debug!(%id, "request cancelled by peer");
        self.reply_error(
            id,
            ResponseError::new(ErrorCode::RequestCancelled, "request cancelled"),
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Keeps a notification callback registered until [`dispose`](Self::dispose) is called.
pub struct Subscription {
    session: Weak<Inner>,
    method: String,
    id: u64,
}

impl Subscription {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn dispose(self) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        let mut topics = lock(&inner.topics);
        if let Some(subscribers) = topics.get_mut(&self.method) {
            subscribers.retain(|(id, _)| *id != self.id);
            if subscribers.is_empty() {
                topics.remove(&self.method);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn next_message(outbound: &mut Outbound) -> Value {
        let text = outbound.try_recv().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_ids_start_at_zero_and_increase() {
        let (session, mut outbound) = RpcSession::new(SessionConfig::default());

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.request("a", json!(null)).await }
        });
        let second = tokio::spawn({
            let session = session.clone();
            async move { session.request("b", json!(null)).await }
        });
        tokio::task::yield_now().await;
        while session.pending_ids().len() < 2 {
            tokio::task::yield_now().await;
        }

        let mut ids: Vec<i64> = (0..2)
            .map(|_| next_message(&mut outbound)["id"].as_i64().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, [0, 1]);

        session
            .handle_payload(r#"[{"jsonrpc":"2.0","id":0,"result":"a"},{"jsonrpc":"2.0","id":1,"result":"b"}]"#)
            .unwrap();
        let results = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
        assert_eq!(results.len(), 2);
        assert!(session.pending_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let config = SessionConfig::default().with_request_timeout(Some(Duration::from_secs(5)));
        let (session, mut outbound) = RpcSession::new(config);

        let err = session.request("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout { ref method, .. } if method == "slow"));
        assert!(session.pending_ids().is_empty());

        // A response after the deadline is stale.
        let sent = next_message(&mut outbound);
        let late = json!({"jsonrpc": "2.0", "id": sent["id"], "result": 1}).to_string();
        session.handle_payload(&late).unwrap();
    }

    #[tokio::test]
    async fn test_max_pending_is_enforced() {
        let config = SessionConfig::default()
            .with_request_timeout(None)
            .with_max_pending(1);
        let (session, _outbound) = RpcSession::new(config);

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.request("a", json!(null)).await }
        });
        while session.pending_ids().is_empty() {
            tokio::task::yield_now().await;
        }

        let err = session.request("b", json!(null)).await.unwrap_err();
        assert!(matches!(err, RpcError::TooManyPending { limit: 1 }));

        session.close();
        assert!(matches!(first.await.unwrap(), Err(RpcError::Closed)));
    }

    #[tokio::test]
    async fn test_subscription_dispose_stops_delivery() {
        let (session, _outbound) = RpcSession::new(SessionConfig::default());
        let seen = Arc::new(AtomicU64::new(0));
        let subscription = session.subscribe_notification("tick", {
            let seen = seen.clone();
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        session.handle_payload(r#"{"jsonrpc":"2.0","method":"tick"}"#).unwrap();
        subscription.dispose();
        session.handle_payload(r#"{"jsonrpc":"2.0","method":"tick"}"#).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
