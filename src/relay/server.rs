//! WebSocket relay server
//!
//! Each connection is one tokio task. Broadcasters feed the room registry;
//! listeners drain their bounded queue into the socket from a writer task
//! while a reader task watches for the close.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::handlers;
use super::impairment::Impairment;
use super::params::{ConnectParams, RawConnectParams, Role};
use super::room::{Outbound, RoomRegistry};
use super::RelayConfig;
use crate::protocol::{ControlMessage, CLOSE_PRODUCER_CONFLICT};
use crate::Result;

/// Shared state handed to every handler
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub started_at: Instant,
}

pub struct RelayServer {
    config: RelayConfig,
    state: Arc<AppState>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.consumer_queue_frames));
        Self {
            config,
            state: Arc::new(AppState {
                registry,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.state.registry.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.ws_path, get(ws_handler))
            .route("/api/health", get(handlers::get_health))
            .route("/api/rooms", get(handlers::get_rooms))
            .route("/api/rooms/:stream_id", get(handlers::get_room))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve until the task is cancelled
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(
            "Relay listening on ws://{}{}",
            listener.local_addr()?,
            self.config.ws_path
        );

        let stats_task = self.spawn_stats_logger();
        let router = self.router();
        let served = axum::serve(listener, router).await;

        if let Some(task) = stats_task {
            task.abort();
        }
        served.map_err(Into::into)
    }

    /// Bind and serve on a background task, returning the bound address
    pub async fn start_background(self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            if let Err(e) = self.serve(listener).await {
                warn!("Relay server stopped: {}", e);
            }
        });

        Ok((addr, handle))
    }

    fn spawn_stats_logger(&self) -> Option<JoinHandle<()>> {
        if self.config.stats_interval_secs == 0 {
            return None;
        }

        let registry = self.state.registry.clone();
        let period = Duration::from_secs(self.config.stats_interval_secs);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for room in registry.summaries() {
                    info!(
                        "Stream {}: producer={} consumers={} in={} delivered={} dropped(imp/bp)={}/{}",
                        room.stream_id,
                        room.has_producer,
                        room.consumers,
                        room.stats.frames_in,
                        room.stats.frames_delivered,
                        room.stats.dropped_impairment,
                        room.stats.dropped_backpressure,
                    );
                }
            }
        }))
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(raw): Query<RawConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let params = match ConnectParams::try_from(raw) {
        Ok(params) => params,
        Err(e) => {
            warn!("Rejected connection: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        match params.role {
            Role::Broadcaster => run_broadcaster(socket, params.stream_id, state).await,
            Role::Listener => run_listener(socket, params, state).await,
        }
    })
}

async fn run_broadcaster(mut socket: WebSocket, stream_id: u32, state: Arc<AppState>) {
    let registry = &state.registry;
    let id = match registry.join_producer(stream_id) {
        Ok(id) => id,
        Err(e) => {
            warn!("{}", e);
            let close = CloseFrame {
                code: CLOSE_PRODUCER_CONFLICT,
                reason: "producer slot occupied".into(),
            };
            if let Err(e) = socket.send(Message::Close(Some(close))).await {
                debug!("Failed to send close to refused producer: {}", e);
            }
            return;
        }
    };

    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Binary(data)) => {
                registry.relay_frame(stream_id, id, Bytes::from(data));
            }
            Ok(Message::Text(text)) => match ControlMessage::parse(&text) {
                Ok(control) => {
                    let sent = registry.relay_control(stream_id, id, &control.to_text());
                    info!("Stream {}: {:?} relayed to {} listeners", stream_id, control, sent);
                }
                Err(e) => debug!("Stream {}: ignored text from producer: {}", stream_id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Producer {} socket error: {}", id, e);
                break;
            }
        }
    }

    registry.leave(stream_id, id);
}

async fn run_listener(socket: WebSocket, params: ConnectParams, state: Arc<AppState>) {
    let stream_id = params.stream_id;
    let (id, mut rx) = state
        .registry
        .join_consumer(stream_id, Impairment::from_params(&params));
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let msg = match out {
                Outbound::Frame(data) => Message::Binary(data.to_vec()),
                Outbound::Control(text) => Message::Text(text),
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Text(text) => debug!("Stream {}: ignored listener text: {}", stream_id, text),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.registry.leave(stream_id, id);
}
