//! HTTP room API, the signaling WebSocket endpoint and the status endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use crate::error::RoomError;
use crate::hub::outbound_channel;
use crate::lifecycle::Lifecycle;
use crate::model::{RoomSummary, RoomView};
use crate::protocol::ClientEvent;
use crate::shutdown::StopSignal;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// A connection that sends nothing (not even a pong) for this long is closed.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<Lifecycle>,
    pub list_limit: usize,
    pub stop: StopSignal,
}

impl AppState {
    pub fn new(lifecycle: Arc<Lifecycle>, list_limit: usize) -> Self {
        Self {
            lifecycle,
            list_limit,
            stop: StopSignal::new(),
        }
    }
}

/// A running server.
#[derive(Debug)]
pub struct ServerHandle {
    bound_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// Wait for the serve loop to exit after `AppState::stop` was triggered.
    /// Returns false if the task panicked or was cancelled.
    pub async fn stopped(self) -> bool {
        match self.task.await {
            Ok(()) => true,
            Err(err) => {
                crate::logging::error_kv(
                    "signaling server task failed",
                    &[("error", &err.to_string())],
                );
                false
            }
        }
    }
}

/// Bind `addr` and serve until `state.stop` is triggered.
pub async fn start(addr: &str, state: AppState) -> anyhow::Result<ServerHandle> {
    crate::logging::info_kv("signaling server starting", &[("requested_addr", addr)]);

    let requested: SocketAddr = match addr.parse() {
        Ok(a) => a,
        Err(e) => {
            crate::logging::error(format!(
                "signaling server failed to parse address '{addr}': {e}"
            ));
            return Err(anyhow::anyhow!(
                "Invalid address '{addr}': {e} (use numeric IP, not hostname like 'localhost')"
            ));
        }
    };
    let listener = tokio::net::TcpListener::bind(requested)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {requested}: {e}"))?;
    let bound_addr = listener.local_addr()?;

    let stop = state.stop.clone();
    let app = router(state);
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop.wait().await;
            })
            .await;
        if let Err(e) = result {
            crate::logging::error(format!("signaling server error: {e}"));
        }
        crate::logging::info("signaling server stopped");
    });

    crate::logging::info_kv(
        "signaling server started",
        &[("bound_addr", &bound_addr.to_string())],
    );
    Ok(ServerHandle { bound_addr, task })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/rooms/create", post(create_room))
        .route("/api/rooms/:room_id", get(get_room))
        .route("/api/rooms", get(list_rooms))
        .route("/ws", get(ws_upgrade))
        .route("/v1/status", get(status))
        .with_state(state)
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    #[serde(default)]
    created_by: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomResponse {
    success: bool,
    room_id: String,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct GetRoomResponse {
    success: bool,
    room: RoomView,
}

#[derive(Serialize, Deserialize)]
struct ListRoomsResponse {
    success: bool,
    rooms: Vec<RoomSummary>,
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
        }),
    )
        .into_response()
}

async fn create_room(State(state): State<AppState>, body: Bytes) -> Response {
    // A body that is not the expected JSON is treated like one without `createdBy`.
    let req: CreateRoomRequest = serde_json::from_slice(&body).unwrap_or_default();
    let created_by = req.created_by.unwrap_or_default();
    match state.lifecycle.registry().create_room(&created_by).await {
        Ok(room_id) => Json(CreateRoomResponse {
            success: true,
            room_id,
            message: "Room created successfully".to_string(),
        })
        .into_response(),
        Err(RoomError::InvalidRequest(msg)) => error_response(StatusCode::BAD_REQUEST, msg),
        Err(err) => {
            crate::logging::error_kv("error creating room", &[("error", &err.to_string())]);
            state.lifecycle.stats().set_last_error(&err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create room")
        }
    }
}

async fn get_room(State(state): State<AppState>, Path(room_id): Path<String>) -> Response {
    match state.lifecycle.registry().lookup_room(&room_id).await {
        Ok(room) => Json(GetRoomResponse {
            success: true,
            room: room.view(),
        })
        .into_response(),
        Err(RoomError::NotFound) => error_response(StatusCode::NOT_FOUND, "Room not found"),
        Err(err) => {
            crate::logging::error_kv(
                "error fetching room",
                &[("room_id", &room_id), ("error", &err.to_string())],
            );
            state.lifecycle.stats().set_last_error(&err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch room")
        }
    }
}

async fn list_rooms(State(state): State<AppState>) -> Response {
    match state
        .lifecycle
        .registry()
        .list_active_rooms(state.list_limit)
        .await
    {
        Ok(rooms) => Json(ListRoomsResponse {
            success: true,
            rooms,
        })
        .into_response(),
        Err(err) => {
            crate::logging::error_kv("error fetching rooms", &[("error", &err.to_string())]);
            state.lifecycle.stats().set_last_error(&err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch rooms")
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(rename = "ts")]
    timestamp: String,
    version: String,
    storage: String,
    runtime: RuntimeInfo,
}

#[derive(Serialize, Deserialize)]
struct RuntimeInfo {
    connections: usize,
    connections_total: u64,
    relayed: u64,
    dropped: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    last_error: String,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snap = state.lifecycle.stats().snapshot();
    Json(StatusResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.lifecycle.registry().storage_kind().as_str().to_string(),
        runtime: RuntimeInfo {
            connections: state.lifecycle.connection_count(),
            connections_total: snap.connections_total,
            relayed: snap.relayed_total,
            dropped: snap.dropped_total,
            last_error: snap.last_error,
        },
    })
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// Drive one signaling connection until the peer closes, goes silent, or the
/// server stops. Inbound events are handled in arrival order.
async fn serve_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut outbound) = outbound_channel();
    let lifecycle = state.lifecycle.clone();
    let address = lifecycle.connect(tx);

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();
    let stopped = state.stop.wait();
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let Some(Ok(msg)) = incoming else {
                    break;
                };
                last_seen = Instant::now();
                match msg {
                    Message::Text(text) => match ClientEvent::parse(&text) {
                        Ok(event) => lifecycle.handle(&address, event).await,
                        Err(err) => {
                            crate::logging::warn_kv(
                                "ignoring malformed event",
                                &[("address", &address), ("error", &err.to_string())],
                            );
                        }
                    },
                    Message::Close(_) => break,
                    // pings are answered by the transport; pongs only refresh last_seen
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
                }
            }
            event = outbound.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event.to_json() {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        crate::logging::error_kv(
                            "failed to encode event",
                            &[("address", &address), ("error", &err.to_string())],
                        );
                    }
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > CLIENT_TIMEOUT {
                    crate::logging::info_kv(
                        "client heartbeat timed out",
                        &[("address", &address)],
                    );
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = &mut stopped => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    lifecycle.disconnect(&address).await;
}
