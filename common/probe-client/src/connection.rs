//! WebSocket + JSON-RPC client for the QtMCP probe
//!
//! One [`ProbeConnection`] owns one WebSocket. Requests get strictly
//! increasing ids starting at 1; a background receive loop resolves each
//! pending request exactly once and hands every other message to the
//! installed notification handler.
//!
//! The pending table is registered before a request frame is written, and a
//! caller that stops waiting (dropped future, timeout) removes its own entry
//! so a late response has nowhere to go.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{ProbeError, ProbeResult};
use crate::protocol::{message_id, notification_parts, response_outcome, RpcRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Pending request waiting for its response
type PendingTx = oneshot::Sender<ProbeResult<Value>>;

/// Synchronous sink for probe notifications: `(method, params)`
///
/// Runs on the receive loop, so it must not block. A panicking handler is
/// logged and the loop keeps going.
pub type NotificationHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// The request/notification surface of a probe
///
/// Implemented by [`ProbeConnection`]; the event recorder is written
/// against this trait so it can be driven by a scripted probe in tests.
#[async_trait]
pub trait ProbeRpc: Send + Sync {
    /// Send a request and wait for its result
    async fn call(&self, method: &str, params: Option<Value>) -> ProbeResult<Value>;

    /// Install (or clear with `None`) the single notification handler
    fn on_notification(&self, handler: Option<NotificationHandler>);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between callers and the receive loop
struct Shared {
    connected: AtomicBool,
    pending: Mutex<HashMap<u64, PendingTx>>,
    handler: RwLock<Option<NotificationHandler>>,
}

impl Shared {
    /// Add a pending entry, unless the connection has already gone down
    ///
    /// `connected` is cleared before [`fail_pending`](Self::fail_pending)
    /// drains the table, so checking it under the table lock means an entry
    /// is either refused here or drained there.
    fn register(&self, id: u64, tx: PendingTx) -> ProbeResult<()> {
        let mut pending = lock(&self.pending);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ProbeError::NotConnected);
        }
        pending.insert(id, tx);
        Ok(())
    }

    /// Resolve every pending request with a connection failure
    fn fail_pending(&self, reason: &str) {
        let drained: Vec<(u64, PendingTx)> = lock(&self.pending).drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), reason, "Failing pending requests");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(ProbeError::ConnectionClosed {
                reason: reason.to_string(),
            }));
        }
    }

    /// Route one inbound text frame
    fn dispatch(&self, text: &str) {
        let msg: Value = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(_) => {
                tracing::debug!("Ignoring non-JSON message");
                return;
            }
        };

        if let Some(id) = message_id(&msg) {
            let pending = lock(&self.pending).remove(&id);
            if let Some(tx) = pending {
                if tx.send(response_outcome(&msg)).is_err() {
                    tracing::debug!(id, "Caller stopped waiting before response arrived");
                }
                return;
            }
        }

        // A stray response (unknown or already-resolved id) carries no method
        if msg.get("method").is_none() {
            tracing::debug!(id = ?msg.get("id"), "Ignoring unmatched response");
            return;
        }

        let (method, params) = notification_parts(&msg);
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match handler {
            Some(handler) => {
                if catch_unwind(AssertUnwindSafe(|| handler(&method, &params))).is_err() {
                    tracing::warn!(%method, "Notification handler panicked");
                }
            }
            None => tracing::debug!(%method, "Dropping notification, no handler installed"),
        }
    }
}

/// Removes a pending entry when the waiting caller goes away
struct PendingGuard<'a> {
    id: u64,
    shared: &'a Shared,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending).remove(&self.id);
    }
}

/// Manages a WebSocket connection to the QtMCP probe
pub struct ProbeConnection {
    ws_url: String,
    next_id: AtomicU64,
    shared: Arc<Shared>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    recv_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ProbeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeConnection")
            .field("ws_url", &self.ws_url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl ProbeConnection {
    /// Create a disconnected client for `ws_url`
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            next_id: AtomicU64::new(1),
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
                handler: RwLock::new(None),
            }),
            sink: tokio::sync::Mutex::new(None),
            recv_task: tokio::sync::Mutex::new(None),
        }
    }

    /// The WebSocket URL this connection targets
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Whether the WebSocket connection is currently active
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Open the WebSocket and start the receive loop
    ///
    /// On failure nothing is retained and the connection stays disconnected.
    pub async fn connect(&self) -> ProbeResult<()> {
        if self.is_connected() {
            tracing::debug!(url = %self.ws_url, "Already connected");
            return Ok(());
        }

        tracing::debug!(url = %self.ws_url, "Connecting to probe");
        let (ws, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|source| ProbeError::Connect {
                url: self.ws_url.clone(),
                source,
            })?;

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        self.shared.connected.store(true, Ordering::SeqCst);

        let task = tokio::spawn(recv_loop(stream, Arc::clone(&self.shared)));
        if let Some(stale) = self.recv_task.lock().await.replace(task) {
            stale.abort();
        }

        tracing::info!(url = %self.ws_url, "Connected to probe");
        Ok(())
    }

    /// Close the connection and fail all pending requests
    ///
    /// Safe to call repeatedly; returns only after the receive loop is gone.
    pub async fn disconnect(&self) {
        let was_connected = self.shared.connected.swap(false, Ordering::SeqCst);

        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Error closing probe WebSocket");
            }
        }

        self.shared.fail_pending("Disconnected from probe");

        if was_connected {
            tracing::info!(url = %self.ws_url, "Disconnected from probe");
        }
    }

    /// Send a JSON-RPC 2.0 request and wait for the response
    ///
    /// There is no built-in timeout; wrap the future in
    /// `tokio::time::timeout` for a bounded wait. Dropping the future
    /// unregisters the request.
    pub async fn call(&self, method: &str, params: Option<Value>) -> ProbeResult<Value> {
        if !self.is_connected() {
            return Err(ProbeError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = serde_json::to_string(&RpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.shared.register(id, tx)?;
        let _guard = PendingGuard {
            id,
            shared: &self.shared,
        };

        {
            let mut sink = self.sink.lock().await;
            let sink = sink.as_mut().ok_or(ProbeError::NotConnected)?;
            sink.send(Message::Text(text.into()))
                .await
                .map_err(ProbeError::Send)?;
        }
        tracing::debug!(id, method, "Sent request");

        rx.await.unwrap_or_else(|_| {
            Err(ProbeError::ConnectionClosed {
                reason: "Response channel dropped".to_string(),
            })
        })
    }

    /// Install or clear the notification handler
    pub fn on_notification(&self, handler: Option<NotificationHandler>) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }
}

#[async_trait]
impl ProbeRpc for ProbeConnection {
    async fn call(&self, method: &str, params: Option<Value>) -> ProbeResult<Value> {
        ProbeConnection::call(self, method, params).await
    }

    fn on_notification(&self, handler: Option<NotificationHandler>) {
        ProbeConnection::on_notification(self, handler);
    }
}

impl Drop for ProbeConnection {
    fn drop(&mut self) {
        if let Ok(mut task) = self.recv_task.try_lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

/// Background task that reads frames and resolves pending requests
async fn recv_loop(mut stream: SplitStream<WsStream>, shared: Arc<Shared>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.dispatch(text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket receive failed");
                break;
            }
        }
    }

    tracing::debug!("WebSocket connection closed");
    shared.connected.store(false, Ordering::SeqCst);
    shared.fail_pending("WebSocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::future::join_all;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::accept_async;

    /// In-process probe: answers requests via `respond`, and lets the test
    /// push arbitrary frames (including a close) at any time.
    struct MockProbe {
        url: String,
        requests: mpsc::UnboundedReceiver<Value>,
        push: mpsc::UnboundedSender<Message>,
    }

    async fn spawn_mock_probe<F>(respond: F) -> MockProbe
    where
        F: Fn(&Value) -> Vec<Value> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = ws.split();
            loop {
                tokio::select! {
                    frame = rx.next() => {
                        let Some(Ok(Message::Text(text))) = frame else { break };
                        let req: Value = serde_json::from_str(text.as_str()).unwrap();
                        for reply in respond(&req) {
                            if tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                        let _ = req_tx.send(req);
                    }
                    pushed = push_rx.recv() => {
                        let Some(msg) = pushed else { break };
                        let closing = matches!(msg, Message::Close(_));
                        let _ = tx.send(msg).await;
                        if closing {
                            break;
                        }
                    }
                }
            }
        });

        MockProbe {
            url: format!("ws://{addr}"),
            requests: req_rx,
            push: push_tx,
        }
    }

    fn echo_method(req: &Value) -> Vec<Value> {
        vec![json!({"jsonrpc": "2.0", "result": {"method": req["method"]}, "id": req["id"]})]
    }

    async fn connected(mock: &MockProbe) -> ProbeConnection {
        let conn = ProbeConnection::new(mock.url.clone());
        conn.connect().await.unwrap();
        conn
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let mut mock = spawn_mock_probe(|req| {
            vec![json!({"jsonrpc": "2.0", "result": {"pong": true}, "id": req["id"]})]
        })
        .await;
        let conn = connected(&mock).await;

        let result = conn.call("qt.ping", None).await.unwrap();
        assert_eq!(result, json!({"pong": true}));

        let sent = mock.requests.recv().await.unwrap();
        assert_eq!(
            sent,
            json!({"jsonrpc": "2.0", "method": "qt.ping", "params": {}, "id": 1})
        );
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_concurrent_calls_get_sequential_ids() {
        let mut mock = spawn_mock_probe(echo_method).await;
        let conn = connected(&mock).await;

        let methods: Vec<String> = (0..8).map(|i| format!("qt.m{i}")).collect();
        let results = join_all(methods.iter().map(|m| conn.call(m, None))).await;

        for (method, result) in methods.iter().zip(results) {
            assert_eq!(result.unwrap()["method"], json!(method));
        }

        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(mock.requests.recv().await.unwrap()["id"].as_u64().unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<u64>>());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_out_of_order_responses_are_correlated() {
        // Hold the answer to id 1 until id 2 arrives, then answer 2 before 1
        let mock = spawn_mock_probe(|req| match req["id"].as_u64() {
            Some(2) => vec![
                json!({"jsonrpc": "2.0", "result": "second", "id": 2}),
                json!({"jsonrpc": "2.0", "result": "first", "id": 1}),
            ],
            _ => vec![],
        })
        .await;
        let conn = connected(&mock).await;

        let (first, second) = tokio::join!(conn.call("qt.a", None), conn.call("qt.b", None));
        assert_eq!(first.unwrap(), json!("first"));
        assert_eq!(second.unwrap(), json!("second"));
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_error_response_surfaces_code_and_message() {
        let mock = spawn_mock_probe(|req| {
            vec![json!({
                "jsonrpc": "2.0",
                "error": {"code": -32601, "message": "Method not found"},
                "id": req["id"]
            })]
        })
        .await;
        let conn = connected(&mock).await;

        let err = conn.call("qt.nonexistent", None).await.unwrap_err();
        assert!(err.is_remote());
        assert_eq!(err.code(), Some(-32601));
        assert!(err.to_string().contains("Method not found"));
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_call_when_disconnected_fails_immediately() {
        let conn = ProbeConnection::new("ws://127.0.0.1:9");
        assert!(!conn.is_connected());
        let err = conn.call("qt.ping", None).await.unwrap_err();
        assert!(matches!(err, ProbeError::NotConnected));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_response_is_ignored() {
        let mock = spawn_mock_probe(|req| {
            let reply = json!({"jsonrpc": "2.0", "result": {"n": req["id"]}, "id": req["id"]});
            vec![reply.clone(), reply]
        })
        .await;
        let conn = connected(&mock).await;

        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        conn.on_notification(Some(Arc::new(move |method: &str, _: &Value| {
            lock(&sink).push(method.to_string());
        })));

        assert_eq!(conn.call("qt.a", None).await.unwrap(), json!({"n": 1}));
        assert_eq!(conn.call("qt.b", None).await.unwrap(), json!({"n": 2}));
        assert!(lock(&seen).is_empty());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_notifications_reach_handler_in_order() {
        let mock = spawn_mock_probe(echo_method).await;
        let conn = connected(&mock).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        conn.on_notification(Some(Arc::new(move |method: &str, params: &Value| {
            let _ = tx.send((method.to_string(), params.clone()));
        })));

        for n in 0..3 {
            let frame = json!({"jsonrpc": "2.0", "method": "qtmcp.signalEmitted", "params": {"n": n}});
            mock.push.send(Message::Text(frame.to_string().into())).unwrap();
        }
        // Unknown id with a method is still a notification
        let stray = json!({"jsonrpc": "2.0", "method": "qtmcp.objectCreated", "id": 99});
        mock.push.send(Message::Text(stray.to_string().into())).unwrap();

        for n in 0..3 {
            let (method, params) = rx.recv().await.unwrap();
            assert_eq!(method, "qtmcp.signalEmitted");
            assert_eq!(params, json!({"n": n}));
        }
        let (method, params) = rx.recv().await.unwrap();
        assert_eq!(method, "qtmcp.objectCreated");
        assert_eq!(params, json!({}));
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_receive_loop() {
        let mock = spawn_mock_probe(|req| {
            vec![json!({"jsonrpc": "2.0", "result": {"pong": true}, "id": req["id"]})]
        })
        .await;
        let conn = connected(&mock).await;
        conn.on_notification(Some(Arc::new(|_: &str, _: &Value| panic!("handler bug"))));

        let frame = json!({"jsonrpc": "2.0", "method": "qtmcp.signalEmitted", "params": {}});
        mock.push.send(Message::Text(frame.to_string().into())).unwrap();
        mock.push.send(Message::Text("not json".into())).unwrap();

        assert_eq!(conn.call("qt.ping", None).await.unwrap(), json!({"pong": true}));
        assert!(conn.is_connected());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_cleared_handler_receives_nothing() {
        let mock = spawn_mock_probe(echo_method).await;
        let conn = connected(&mock).await;

        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        conn.on_notification(Some(Arc::new(move |_: &str, _: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let frame = json!({"jsonrpc": "2.0", "method": "qtmcp.signalEmitted", "params": {}});
        mock.push.send(Message::Text(frame.to_string().into())).unwrap();
        // A round trip guarantees the frame pushed before it was dispatched
        conn.call("qt.sync", None).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        conn.on_notification(None);
        mock.push.send(Message::Text(frame.to_string().into())).unwrap();
        conn.call("qt.sync", None).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_stream_close_fails_pending_requests() {
        let mock = spawn_mock_probe(|_| vec![]).await;
        let conn = Arc::new(connected(&mock).await);

        let caller = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.call("qt.hang", None).await })
        };
        while conn.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        mock.push.send(Message::Close(None)).unwrap();
        let err = caller.await.unwrap().unwrap_err();
        assert!(err.is_connection(), "unexpected error: {err:?}");
        assert!(!conn.is_connected());
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_and_is_idempotent() {
        let mock = spawn_mock_probe(|_| vec![]).await;
        let conn = Arc::new(connected(&mock).await);

        let caller = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.call("qt.hang", None).await })
        };
        while conn.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        conn.disconnect().await;
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, ProbeError::ConnectionClosed { .. }));

        conn.disconnect().await;
        assert!(!conn.is_connected());
        assert_eq!(conn.pending_count(), 0);
        assert!(matches!(
            conn.call("qt.ping", None).await,
            Err(ProbeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_call_removes_pending_entry() {
        let mock = spawn_mock_probe(|_| vec![]).await;
        let conn = connected(&mock).await;

        let waited = tokio::time::timeout(Duration::from_millis(50), conn.call("qt.slow", None)).await;
        assert!(waited.is_err());
        assert_eq!(conn.pending_count(), 0);
        assert!(conn.is_connected());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let conn = ProbeConnection::new(format!("ws://{addr}"));
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ProbeError::Connect { .. }));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_register_after_connection_lost_is_refused() {
        let conn = ProbeConnection::new("ws://127.0.0.1:9");
        let shared = &conn.shared;

        // Connection looked alive when `call` checked, then went down
        shared.connected.store(false, Ordering::SeqCst);
        shared.fail_pending("WebSocket closed");

        let (tx, rx) = oneshot::channel();
        let err = shared.register(1, tx).unwrap_err();
        assert!(matches!(err, ProbeError::NotConnected));
        assert_eq!(conn.pending_count(), 0);
        assert!(rx.await.is_err());

        // While connected the entry is kept until drained
        shared.connected.store(true, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        shared.register(2, tx).unwrap();
        assert_eq!(conn.pending_count(), 1);

        shared.connected.store(false, Ordering::SeqCst);
        shared.fail_pending("WebSocket closed");
        assert!(matches!(
            rx.await.unwrap(),
            Err(ProbeError::ConnectionClosed { .. })
        ));
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn test_debug_shows_url_and_state() {
        let conn = ProbeConnection::new("ws://localhost:9222");
        let text = format!("{conn:?}");
        assert!(text.contains("ws://localhost:9222"));
        assert!(text.contains("connected: false"));
    }
}
