//! The Bridge: an HTTP surface for submitters that forwards commands to
//! the Proxy over a single persistent WebSocket connection (§4.1).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use uuid::Uuid;

use crate::config::Config;
use crate::error::TransportError;
use crate::transport::protocol::{
    ClientFrame, CommandPacket, PacketResponse, ServerFrame, command_class,
};
use crate::transport::registry::Role;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Shared state for the Bridge's HTTP surface and its WebSocket link to
/// the Proxy.
pub struct BridgeState {
    config: Arc<Config>,
    application: String,
    connected: AtomicBool,
    outbound: Mutex<Option<tokio::sync::mpsc::UnboundedSender<ClientFrame>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<PacketResponse>>>,
    readiness_client: reqwest::Client,
}

impl BridgeState {
    fn new(config: Arc<Config>, application: String) -> Self {
        Self {
            config,
            application,
            connected: AtomicBool::new(false),
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            readiness_client: reqwest::Client::new(),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// The Bridge process: owns the WebSocket link and serves submitters.
pub struct Bridge {
    state: Arc<BridgeState>,
}

impl Bridge {
    pub fn new(config: Arc<Config>, application: impl Into<String>) -> Self {
        Self {
            state: Arc::new(BridgeState::new(config, application.into())),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/api/presets", get(presets_handler))
            .route("/api/commands", post(submit_handler))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(tower_http::cors::CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Connects to the Proxy's `/ws` endpoint and spawns the read/write
    /// tasks that keep the link alive for the lifetime of the process.
    /// Reconnects with a jittered backoff on disconnect, so a Proxy
    /// restart doesn't get thundered by every Bridge reconnecting on the
    /// same tick (§4.1 "Resilience").
    pub async fn connect(&self) -> Result<(), TransportError> {
        let state = self.state.clone();
        let url = ws_url(&state.config.proxy_url);
        tokio::spawn(async move {
            loop {
                match connect_async(&url).await {
                    Ok((stream, _)) => {
                        tracing::info!(%url, "connected to proxy");
                        run_link(state.clone(), stream).await;
                        tracing::warn!("proxy link dropped, reconnecting");
                    }
                    Err(e) => {
                        tracing::warn!(%url, error = %e, "failed to connect to proxy");
                    }
                }
                state.connected.store(false, Ordering::Relaxed);
                tokio::time::sleep(reconnect_backoff()).await;
            }
        });
        Ok(())
    }

    pub async fn serve(&self, addr: std::net::SocketAddr) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "bridge listening");
        axum::serve(listener, self.router()).await
    }

    /// Whether the link to the Proxy is currently registered and usable.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Dispatches a command directly, for in-process callers (the Local
    /// Interactive worker) that don't go through the HTTP surface.
    pub async fn submit(
        &self,
        action: &str,
        args: serde_json::Value,
    ) -> Result<PacketResponse, TransportError> {
        send_command(&self.state, action, args).await
    }
}

fn ws_url(http_url: &str) -> String {
    let ws = http_url.replacen("http://", "ws://", 1).replacen("https://", "wss://", 1);
    format!("{ws}/ws")
}

/// 2s base backoff plus up to 1s of jitter.
fn reconnect_backoff() -> Duration {
    Duration::from_millis(2000 + rand::random::<u64>() % 1000)
}

#[derive(Deserialize)]
struct ProxyReadyResponse {
    ready: bool,
    #[serde(default)]
    code: Option<String>,
}

/// Step 2 of the pre-flight algorithm (§4.1): a non-blocking readiness
/// query to the Proxy, bounded by `config.readiness_timeout`, before any
/// command frame is emitted.
async fn query_proxy_readiness(state: &BridgeState) -> Result<ProxyReadyResponse, TransportError> {
    let url = format!("{}/ready", state.config.proxy_url);
    let response = state
        .readiness_client
        .get(&url)
        .query(&[("application", state.application.as_str())])
        .timeout(state.config.readiness_timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                TransportError::ProxyTimeout(state.config.readiness_timeout)
            } else {
                TransportError::ProxyDown { reason: e.to_string() }
            }
        })?;

    response
        .json::<ProxyReadyResponse>()
        .await
        .map_err(|e| TransportError::ProxyDown {
            reason: format!("malformed readiness response: {e}"),
        })
}

/// Drives one WebSocket connection: registers as an executor-adjacent
/// Bridge role, writes outbound frames, and dispatches inbound responses
/// to whichever submitter call is waiting on `request_id`.
async fn run_link(state: Arc<BridgeState>, stream: WsStream) {
    let (mut sink, mut stream) = stream.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ClientFrame>();
    *state.outbound.lock().await = Some(tx.clone());

    let register = ClientFrame::Register {
        application: state.application.clone(),
        role: Role::Bridge,
    };
    if tx.send(register).is_err() {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<ServerFrame>(&text) else {
            tracing::warn!("malformed server frame");
            continue;
        };
        match frame {
            ServerFrame::RegistrationResponse { ok, message } => {
                state.connected.store(ok, Ordering::Relaxed);
                tracing::info!(ok, %message, "registration acknowledged");
            }
            ServerFrame::Dispatch(_) => {
                // The Bridge only issues commands; it never receives dispatch
                // frames (those go to Executors), but tolerate it quietly.
            }
            ServerFrame::PacketResponse(response) => {
                let sender = state.pending.lock().await.remove(&response.request_id);
                if let Some(sender) = sender {
                    let _ = sender.send(response);
                } else {
                    tracing::warn!(request_id = %response.request_id, "response for unknown request");
                }
            }
        }
    }

    writer.abort();
    *state.outbound.lock().await = None;
}

/// Sends a command over the WebSocket link and waits for its correlated
/// response, bounded by the per-command-class timeout (§4.1).
async fn send_command(
    state: &Arc<BridgeState>,
    action: &str,
    args: serde_json::Value,
) -> Result<PacketResponse, TransportError> {
    if !state.is_connected() {
        return Err(TransportError::BridgeDisconnected);
    }

    let readiness = query_proxy_readiness(state).await?;
    if !readiness.ready {
        return Err(TransportError::NoExecutor {
            application: state.application.clone(),
        });
    }

    let request_id = Uuid::new_v4().to_string();
    let command = CommandPacket {
        request_id: request_id.clone(),
        action: action.to_string(),
        args,
    };

    let (tx, rx) = oneshot::channel();
    state.pending.lock().await.insert(request_id.clone(), tx);

    let frame = ClientFrame::CommandPacket {
        application: state.application.clone(),
        command,
    };

    let outbound = state.outbound.lock().await.clone();
    let Some(outbound) = outbound else {
        state.pending.lock().await.remove(&request_id);
        return Err(TransportError::ProxyDown {
            reason: "no active link to proxy".to_string(),
        });
    };
    if outbound.send(frame).is_err() {
        state.pending.lock().await.remove(&request_id);
        return Err(TransportError::ProxyDown {
            reason: "outbound channel closed".to_string(),
        });
    }

    let class = command_class(action).to_string();
    let timeout = state.config.timeouts.lookup(&class);
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(_)) => Err(TransportError::ProxyDown {
            reason: "link dropped while awaiting response".to_string(),
        }),
        Err(_) => {
            state.pending.lock().await.remove(&request_id);
            Err(TransportError::CommandTimeout {
                command: action.to_string(),
                class,
                elapsed: timeout,
            })
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

/// `true` iff at least one executor is registered for this Bridge's
/// application, per §4.1's `GET /ready` contract; not merely whether the
/// WS link to the Proxy is up.
async fn ready_handler(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    if !state.is_connected() {
        return Json(ReadyResponse {
            ready: false,
            code: Some("BRIDGE_DISCONNECTED".to_string()),
        });
    }

    match query_proxy_readiness(&state).await {
        Ok(readiness) => Json(ReadyResponse {
            ready: readiness.ready,
            code: readiness.code,
        }),
        Err(e) => Json(ReadyResponse {
            ready: false,
            code: Some(crate::error::error_code(&e.into()).to_string()),
        }),
    }
}

#[derive(Serialize, Deserialize)]
struct Preset {
    name: String,
}

/// Lists known export presets, with a static fallback if the Proxy link is
/// slow or down so the submitter UI still has something to show (§4.1).
async fn presets_handler(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let fallback = || {
        Json(vec![
            Preset { name: "press-quality".to_string() },
            Preset { name: "smallest-file".to_string() },
            Preset { name: "high-quality-print".to_string() },
        ])
    };

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        send_command(&state, "list_presets", serde_json::Value::Null),
    )
    .await;

    match result {
        Ok(Ok(response)) => match response.output {
            Some(value) => match serde_json::from_value::<Vec<Preset>>(value) {
                Ok(presets) => Json(presets),
                Err(_) => fallback(),
            },
            None => fallback(),
        },
        _ => fallback(),
    }
}

#[derive(Deserialize)]
struct SubmitRequest {
    action: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Serialize)]
#[serde(untagged)]
enum SubmitResponse {
    Ok {
        #[serde(rename = "requestId")]
        request_id: String,
        output: Option<serde_json::Value>,
    },
    Err {
        #[serde(rename = "requestId")]
        request_id: String,
        code: String,
        message: String,
    },
}

async fn submit_handler(
    State(state): State<Arc<BridgeState>>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    match send_command(&state, &req.action, req.args).await {
        Ok(response) => match response.error {
            Some(err) => {
                // The executor round-trip succeeded but the Proxy itself
                // couldn't route the command (a registration dropped
                // between our pre-flight check and dispatch); surface the
                // same 503 a pre-flight rejection would (§4.1, §8 scenario 4).
                let status = if err.code == "NO_EXECUTOR" {
                    axum::http::StatusCode::SERVICE_UNAVAILABLE
                } else {
                    axum::http::StatusCode::BAD_GATEWAY
                };
                (
                    status,
                    Json(SubmitResponse::Err {
                        request_id: response.request_id,
                        code: err.code,
                        message: err.message,
                    }),
                )
            }
            None => (
                axum::http::StatusCode::OK,
                Json(SubmitResponse::Ok {
                    request_id: response.request_id,
                    output: response.output,
                }),
            ),
        },
        Err(e) => {
            let err: crate::error::DocforgeError = e.into();
            let code = crate::error::error_code(&err).to_string();
            let message = err.to_string();
            (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                Json(SubmitResponse::Err {
                    request_id: Uuid::new_v4().to_string(),
                    code,
                    message,
                }),
            )
        }
    }
}
