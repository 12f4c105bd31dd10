//! HTTP/SSE proxy surface of the protocol bridge
//!
//! Presents the client-facing half of an MCP workload: `GET /sse` opens an
//! event stream, `POST /messages?session_id=` submits JSON-RPC messages,
//! and `GET /health` answers unconditionally. Messages from the container
//! are fanned out to every connected client; messages from clients land on
//! a bounded channel drained by the stdio side of the bridge.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{Result, TransportError};
use crate::jsonrpc::JsonRpcMessage;
use crate::sse::{
    PendingSseMessage, SseClient, SseMessage, CLIENT_QUEUE_CAPACITY, MAX_PENDING_MESSAGES,
};

/// Capacity of the inbound (client to container) and response channels
pub const MESSAGE_CHANNEL_CAPACITY: usize = 100;

/// A composable HTTP middleware: a function from router to router.
/// Middlewares are applied outer-first, so the first one in a list sees
/// every request before the rest of the chain.
pub type Middleware = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Apply a middleware chain to a router, first middleware outermost.
pub fn apply_middlewares(mut router: Router, middlewares: &[Middleware]) -> Router {
    for middleware in middlewares.iter().rev() {
        router = middleware(router);
    }
    router
}

struct ProxyState {
    container_name: String,
    clients: Mutex<HashMap<String, SseClient>>,
    pending: Mutex<VecDeque<PendingSseMessage>>,
    message_tx: mpsc::Sender<JsonRpcMessage>,
    response_tx: mpsc::Sender<JsonRpcMessage>,
}

impl ProxyState {
    fn clients_guard(&self) -> MutexGuard<'_, HashMap<String, SseClient>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_guard(&self) -> MutexGuard<'_, VecDeque<PendingSseMessage>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Queue held-back messages into a fresh client's queue, oldest first.
    // The pending list is cleared even if the queue fills mid-drain.
    fn drain_pending_into(&self, tx: &mpsc::Sender<SseMessage>) {
        let mut pending = self.pending_guard();
        if pending.is_empty() {
            return;
        }
        for held in pending.iter() {
            if tx.try_send(held.message.clone()).is_err() {
                tracing::error!(
                    container = %self.container_name,
                    "client queue filled while draining pending messages"
                );
                break;
            }
        }
        pending.clear();
    }
}

/// The HTTP half of the protocol bridge.
pub struct HttpSseProxy {
    port: u16,
    container_name: String,
    middlewares: Vec<Middleware>,
    state: Arc<ProxyState>,
    shutdown_tx: watch::Sender<bool>,
    server: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    message_rx: Mutex<Option<mpsc::Receiver<JsonRpcMessage>>>,
    response_rx: Mutex<Option<mpsc::Receiver<JsonRpcMessage>>>,
}

impl HttpSseProxy {
    /// Create a proxy for a workload. `port` zero binds an ephemeral port.
    pub fn new(port: u16, container_name: &str, middlewares: Vec<Middleware>) -> Self {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            port,
            container_name: container_name.to_string(),
            middlewares,
            state: Arc::new(ProxyState {
                container_name: container_name.to_string(),
                clients: Mutex::new(HashMap::new()),
                pending: Mutex::new(VecDeque::new()),
                message_tx,
                response_tx,
            }),
            shutdown_tx,
            server: Mutex::new(None),
            local_addr: Mutex::new(None),
            message_rx: Mutex::new(Some(message_rx)),
            response_rx: Mutex::new(Some(response_rx)),
        }
    }

    /// Build the router: `/health` outside the middleware chain, `/sse` and
    /// `/messages` behind it.
    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/sse", get(handle_sse))
            .route("/messages", post(handle_post_message))
            .with_state(self.state.clone());

        Router::new()
            .route("/health", get(handle_health))
            .merge(apply_middlewares(protected, &self.middlewares))
            .layer(CorsLayer::new().allow_origin(Any))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and start serving. Returns once the socket is
    /// accepting connections.
    pub async fn start(&self) -> Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
            .await
            .map_err(|e| TransportError::Http(format!("failed to bind port {}: {e}", self.port)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let container = self.container_name.clone();
        let handle = tokio::spawn(async move {
            tracing::info!(container = %container, addr = %addr, "HTTP proxy started");
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|&stop| stop).await;
                })
                .await;
            if let Err(err) = result {
                tracing::error!(container = %container, error = %err, "HTTP server error");
            }
        });
        *self.server.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        Ok(())
    }

    /// Stop serving: cancel the listener, close every client queue, and
    /// wait for the server task up to `deadline` before aborting it.
    pub async fn stop(&self, deadline: Duration) {
        let _ = self.shutdown_tx.send(true);
        self.state.clients_guard().clear();

        let handle = self
            .server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(deadline, &mut handle).await.is_err() {
                tracing::warn!(container = %self.container_name, "HTTP server did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    /// Address the proxy is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of connected SSE clients
    pub fn client_count(&self) -> usize {
        self.state.clients_guard().len()
    }

    /// Take the receiver for client-to-container messages. Single consumer.
    pub fn take_message_receiver(&self) -> Option<mpsc::Receiver<JsonRpcMessage>> {
        self.message_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Take the receiver for the response channel. Single consumer.
    pub fn take_response_receiver(&self) -> Option<mpsc::Receiver<JsonRpcMessage>> {
        self.response_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Fan a container message out to every connected client.
    ///
    /// With no clients connected the message joins the bounded pending
    /// buffer (oldest dropped on overflow). A client whose queue is full is
    /// evicted; the event is not retried for it.
    pub fn forward_to_clients(&self, msg: &JsonRpcMessage) -> Result<()> {
        let data = msg.to_line()?;
        let sse = SseMessage::new("message", data);

        let mut clients = self.state.clients_guard();
        if clients.is_empty() {
            drop(clients);
            let mut pending = self.state.pending_guard();
            if pending.len() >= MAX_PENDING_MESSAGES {
                pending.pop_front();
                tracing::warn!(
                    container = %self.container_name,
                    "pending message buffer full, dropping oldest message"
                );
            }
            pending.push_back(PendingSseMessage::new(sse));
            return Ok(());
        }

        let mut evicted = Vec::new();
        for (client_id, client) in clients.iter() {
            if client.tx.try_send(sse.clone()).is_err() {
                evicted.push(client_id.clone());
            }
        }
        for client_id in evicted {
            clients.remove(&client_id);
            tracing::info!(client = %client_id, "SSE client removed (queue full or closed)");
        }
        Ok(())
    }

    /// Push a container message onto the response channel.
    pub fn send_response(&self, msg: JsonRpcMessage) -> Result<()> {
        self.state
            .response_tx
            .try_send(msg)
            .map_err(|_| TransportError::Backpressure)
    }
}

/// Per-client SSE stream; deregisters the client when dropped.
pub struct ClientStream {
    rx: mpsc::Receiver<SseMessage>,
    state: Arc<ProxyState>,
    client_id: String,
}

impl futures_util::Stream for ClientStream {
    type Item = std::result::Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.rx.poll_recv(cx).map(|maybe| {
            maybe.map(|msg| Ok(Event::default().event(msg.event).data(msg.data)))
        })
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        if self.state.clients_guard().remove(&self.client_id).is_some() {
            tracing::info!(client = %self.client_id, "SSE client disconnected");
        }
    }
}

async fn handle_health() -> &'static str {
    "OK"
}

async fn handle_sse(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
) -> Sse<axum::response::sse::KeepAliveStream<ClientStream>> {
    let client_id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);

    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let endpoint_url = format!("{scheme}://{host}/messages?session_id={client_id}");

    {
        let mut clients = state.clients_guard();
        let _ = tx.try_send(SseMessage::new("endpoint", endpoint_url));
        state.drain_pending_into(&tx);
        clients.insert(client_id.clone(), SseClient::new(tx));
    }
    tracing::info!(client = %client_id, "SSE client connected");

    Sse::new(ClientStream {
        rx,
        state: state.clone(),
        client_id,
    })
    .keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    session_id: Option<String>,
}

async fn handle_post_message(
    State(state): State<Arc<ProxyState>>,
    Query(query): Query<MessagesQuery>,
    body: String,
) -> Response {
    let Some(session_id) = query.session_id.filter(|s| !s.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "session_id is required").into_response();
    };

    if !state.clients_guard().contains_key(&session_id) {
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    }

    let msg = match JsonRpcMessage::from_body(&body) {
        Ok(msg) => msg,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Error parsing JSON-RPC message: {err}"),
            )
                .into_response();
        }
    };

    tracing::debug!(session = %session_id, method = ?msg.method, "received JSON-RPC message");

    match state.message_tx.try_send(msg) {
        Ok(()) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to send message to destination",
        )
            .into_response(),
    }
}
