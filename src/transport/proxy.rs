//! The Proxy: multiplexes Bridge(s) and Executor(s) over WebSocket,
//! enforces readiness, and serializes per-document operations (§4.2).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::config::Config;
use crate::transport::idempotency::IdempotencyCache;
use crate::transport::lock::DocumentLockManager;
use crate::transport::protocol::{ClientFrame, CommandPacket, PacketResponse, ServerFrame};
use crate::transport::registry::ExecutorRegistry;

/// Rolling counters exposed at a metrics endpoint (§4.2 "Metrics").
#[derive(Default)]
pub struct Metrics {
    pub commands_total: AtomicU64,
    pub failures_total: AtomicU64,
    pub idempotent_replays_total: AtomicU64,
    pub active_locks: AtomicU64,
}

/// A pending command awaiting its executor's response, so the response can
/// be routed back to the connection that issued it.
struct PendingCommand {
    origin_connection: Uuid,
    application: String,
    document_key: String,
}

pub struct ProxyState {
    pub registry: Arc<ExecutorRegistry>,
    pub locks: Arc<DocumentLockManager>,
    pub idempotency: Arc<IdempotencyCache>,
    pub metrics: Arc<Metrics>,
    config: Arc<Config>,
    /// Outbound frame senders for each live connection.
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<ServerFrame>>>,
    pending: Mutex<HashMap<String, PendingCommand>>,
    /// Held while a command's document lock is outstanding; released when
    /// the matching response arrives or the connection drops.
    lock_guards: Mutex<HashMap<String, crate::transport::lock::DocumentLockGuard>>,
}

impl ProxyState {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            registry: Arc::new(ExecutorRegistry::new()),
            locks: Arc::new(DocumentLockManager::new()),
            idempotency: Arc::new(IdempotencyCache::new(
                config.idempotency.ttl,
                config.idempotency.capacity,
            )),
            metrics: Arc::new(Metrics::default()),
            config,
            connections: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            lock_guards: Mutex::new(HashMap::new()),
        }
    }
}

#[derive(Clone)]
pub struct Proxy {
    state: Arc<ProxyState>,
}

impl Proxy {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            state: Arc::new(ProxyState::new(config)),
        }
    }

    pub fn state(&self) -> Arc<ProxyState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/ws", get(ws_handler))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn serve(&self, addr: std::net::SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "proxy listening");
        axum::serve(listener, self.router()).await
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct ReadyQuery {
    application: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    executors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<String>,
}

async fn ready_handler(
    State(state): State<Arc<ProxyState>>,
    Query(q): Query<ReadyQuery>,
) -> impl IntoResponse {
    let executors = state.registry.executors_for(&q.application).await;
    if executors.is_empty() {
        Json(ReadyResponse {
            ready: false,
            executors: vec![],
            code: Some("NO_EXECUTOR".to_string()),
            action: Some(format!(
                "start an executor registered for application \"{}\"",
                q.application
            )),
        })
    } else {
        Json(ReadyResponse {
            ready: true,
            executors: executors
                .into_iter()
                .map(|e| e.connection_id.to_string())
                .collect(),
            code: None,
            action: None,
        })
    }
}

async fn ws_handler(
    State(state): State<Arc<ProxyState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ProxyState>) {
    let connection_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    state.connections.write().await.insert(connection_id, tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("failed to serialize server frame: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut registered_application: Option<String> = None;

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else { continue };
        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("malformed client frame: {e}");
                continue;
            }
        };

        match frame {
            ClientFrame::Register { application, role } => {
                registered_application = Some(application.clone());
                state.registry.register(connection_id, application, role).await;
                send_to(&state, connection_id, ServerFrame::RegistrationResponse {
                    ok: true,
                    message: "registered".to_string(),
                })
                .await;
            }
            ClientFrame::CommandPacket { application, command } => {
                route_command(&state, connection_id, application, command).await;
            }
            ClientFrame::PacketResponse(response) => {
                complete_command(&state, response).await;
            }
        }
    }

    state.registry.unregister(connection_id).await;
    state.connections.write().await.remove(&connection_id);
    writer.abort();
    if let Some(app) = registered_application {
        tracing::info!(%connection_id, application = %app, "connection closed");
    }
}

async fn send_to(state: &Arc<ProxyState>, connection_id: Uuid, frame: ServerFrame) {
    let connections = state.connections.read().await;
    if let Some(tx) = connections.get(&connection_id) {
        let _ = tx.send(frame);
    }
}

/// The routing algorithm of §4.2: reject if no executor, derive the
/// document key, acquire the lock with a bounded wait, forward, and on
/// response release the lock and deliver by request id.
async fn route_command(
    state: &Arc<ProxyState>,
    origin_connection: Uuid,
    application: String,
    command: CommandPacket,
) {
    state.metrics.commands_total.fetch_add(1, Ordering::Relaxed);

    if let Some(cached) = state.idempotency.get(&command.request_id).await {
        state
            .metrics
            .idempotent_replays_total
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(request_id = %command.request_id, "idempotent replay");
        send_to(state, origin_connection, ServerFrame::PacketResponse(cached)).await;
        return;
    }

    let Some(executor_id) = state.registry.pick_executor(&application).await else {
        state.metrics.failures_total.fetch_add(1, Ordering::Relaxed);
        let resp = PacketResponse::error_with_action(
            command.request_id.clone(),
            "NO_EXECUTOR",
            format!("no executor registered for application \"{application}\""),
            "start an executor and retry",
        );
        state.idempotency.put(command.request_id.clone(), resp.clone()).await;
        send_to(state, origin_connection, ServerFrame::PacketResponse(resp)).await;
        return;
    };

    let document_key = DocumentLockManager::derive_key(&application, &command.args);
    let lock_timeout = state.config.document_lock_timeout;
    let guard = match state.locks.acquire(&document_key, lock_timeout).await {
        Ok(g) => g,
        Err(_) => {
            state.metrics.failures_total.fetch_add(1, Ordering::Relaxed);
            let resp = PacketResponse::error(
                command.request_id.clone(),
                "DOCUMENT_LOCKED",
                format!("document \"{document_key}\" is locked"),
            );
            send_to(state, origin_connection, ServerFrame::PacketResponse(resp)).await;
            return;
        }
    };
    state.metrics.active_locks.fetch_add(1, Ordering::Relaxed);

    {
        let mut pending = state.pending.lock().await;
        pending.insert(
            command.request_id.clone(),
            PendingCommand {
                origin_connection,
                application,
                document_key,
            },
        );
    }
    {
        let mut guards = state.lock_guards.lock().await;
        guards.insert(command.request_id.clone(), guard);
    }

    send_to(state, executor_id, ServerFrame::Dispatch(command)).await;
}

/// Called when an executor connection sends back a `packet_response`
/// frame: releases the document lock and delivers the response to the
/// originating connection by request id (§4.2 step 5).
pub async fn complete_command(state: &Arc<ProxyState>, response: PacketResponse) {
    let pending = {
        let mut pending = state.pending.lock().await;
        pending.remove(&response.request_id)
    };

    {
        let mut guards = state.lock_guards.lock().await;
        if guards.remove(&response.request_id).is_some() {
            state.metrics.active_locks.fetch_sub(1, Ordering::Relaxed);
        }
    }

    state
        .idempotency
        .put(response.request_id.clone(), response.clone())
        .await;

    if let Some(p) = pending {
        tracing::debug!(
            request_id = %response.request_id,
            application = %p.application,
            document_key = %p.document_key,
            "command completed"
        );
        send_to(state, p.origin_connection, ServerFrame::PacketResponse(response)).await;
    } else {
        tracing::warn!(request_id = %response.request_id, "unmatched packet_response discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::registry::Role;

    #[tokio::test]
    async fn ready_endpoint_reports_false_with_no_executor() {
        let config = Arc::new(Config::for_testing(std::env::temp_dir()));
        let proxy = Proxy::new(config);
        let router = proxy.router();

        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let req = Request::builder()
            .uri("/ready?application=indesign")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn registering_executor_flips_registry_readiness() {
        let config = Arc::new(Config::for_testing(std::env::temp_dir()));
        let proxy = Proxy::new(config);
        let state = proxy.state();
        state
            .registry
            .register(Uuid::new_v4(), "indesign".to_string(), Role::Executor)
            .await;
        assert!(state.registry.is_ready("indesign").await);
    }
}
