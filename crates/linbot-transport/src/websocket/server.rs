//! Reverse WebSocket server.
//!
//! The gateway dials in; each accepted socket becomes one connection whose
//! frames are fed to a [`ConnectionHandler`](linbot_core::ConnectionHandler).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use linbot_core::{BoxedConnectionHandler, ConnectionHandle, ConnectionInfo, ListenerHandle};
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

/// Listener settings for [`WsServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsServerConfig {
    pub host: String,
    pub port: u16,
    /// Route the gateway connects to.
    pub path: String,
    /// When set, clients must present this token.
    pub access_token: Option<String>,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8050,
            path: "/onebot/v11/ws".into(),
            access_token: None,
        }
    }
}

impl WsServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// `host:port` to bind.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The route, with a leading `/` added if missing.
    pub fn route(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}

/// Reverse WebSocket server.
#[derive(Debug, Clone, Default)]
pub struct WsServer {
    config: WsServerConfig,
}

/// Shared state for the WebSocket server.
struct ServerState {
    handler: BoxedConnectionHandler,
    access_token: Option<String>,
    /// Active connections (bot_id -> shutdown switch).
    connections: RwLock<HashMap<String, watch::Sender<bool>>>,
}

impl WsServer {
    pub fn new(config: WsServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WsServerConfig {
        &self.config
    }

    /// Binds the listener and starts serving in the background.
    ///
    /// Dropping or stopping the returned handle shuts the server down and
    /// reports every open connection as disconnected.
    pub async fn listen(&self, handler: BoxedConnectionHandler) -> anyhow::Result<ListenerHandle> {
        let state = Arc::new(ServerState {
            handler,
            access_token: self.config.access_token.clone(),
            connections: RwLock::new(HashMap::new()),
        });

        let path = self.config.route();
        let router = Router::new()
            .route(&path, get(ws_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(self.config.addr()).await?;
        let actual_addr = listener.local_addr()?;

        info!(addr = %actual_addr, path = %path, "WebSocket server listening");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            );

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!(error = %e, "WebSocket server error");
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("WebSocket server shutting down");
                    let connections = state.connections.read().await;
                    for close in connections.values() {
                        let _ = close.send(true);
                    }
                }
            }
        });

        Ok(ListenerHandle::new(
            format!("ws-server-{actual_addr}"),
            shutdown_tx,
        ))
    }
}

/// Checks `Authorization: Bearer <token>` (or `Token <token>`) and the
/// `access_token` query parameter.
fn authorized(expected: Option<&str>, headers: &HashMap<String, String>, query: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };

    let from_header = headers.get("authorization").and_then(|v| {
        v.strip_prefix("Bearer ")
            .or_else(|| v.strip_prefix("Token "))
            .map(str::trim)
    });
    let from_query = query.and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "access_token")
            .map(|(_, v)| v)
    });

    from_header == Some(expected) || from_query == Some(expected)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    uri: axum::http::Uri,
    headers: HeaderMap,
) -> Response {
    info!(remote_addr = %addr, "New WebSocket connection request");

    let mut metadata = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value_str) = value.to_str() {
            metadata.insert(name.as_str().to_lowercase(), value_str.to_string());
        }
    }

    if !authorized(state.access_token.as_deref(), &metadata, uri.query()) {
        warn!(remote_addr = %addr, "Rejected connection with missing or wrong access token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, addr, state, metadata))
}

/// Handles an individual WebSocket connection.
async fn handle_socket(
    socket: WebSocket,
    addr: SocketAddr,
    state: Arc<ServerState>,
    headers: HashMap<String, String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut conn_info = ConnectionInfo::new("websocket").with_remote_addr(addr.to_string());
    for (key, value) in headers {
        conn_info = conn_info.with_metadata(key, value);
    }

    let bot_id = match state.handler.on_connect(conn_info).await {
        Ok(id) => id,
        Err(e) => {
            warn!(remote_addr = %addr, error = %e, "Connection rejected by handler");
            return;
        }
    };

    info!(bot_id = %bot_id, remote_addr = %addr, "WebSocket connection established");

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let own_shutdown = shutdown_tx.clone();
    {
        let mut connections = state.connections.write().await;
        connections.insert(bot_id.clone(), shutdown_tx.clone());
    }

    state
        .handler
        .on_ready(&bot_id, ConnectionHandle::new(bot_id.clone(), tx, shutdown_tx))
        .await;

    // Forward queued documents to the socket.
    let bot_id_send = bot_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            let text = String::from_utf8_lossy(&data).into_owned();
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                warn!(bot_id = %bot_id_send, "Failed to send message, connection closed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let handler = state.handler.clone();
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = shutdown_rx.changed() => {
                debug!(bot_id = %bot_id, "Connection closed locally");
                break;
            }
        };
        let Some(result) = frame else {
            break;
        };

        match result {
            Ok(Message::Text(text)) => {
                trace!(bot_id = %bot_id, len = text.len(), "Received text message");
                handler.on_message(&bot_id, text.as_bytes()).await;
            }
            Ok(Message::Binary(data)) => {
                trace!(bot_id = %bot_id, len = data.len(), "Received binary message");
                handler.on_message(&bot_id, &data).await;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                trace!(bot_id = %bot_id, "Received ping/pong");
            }
            Ok(Message::Close(_)) => {
                info!(bot_id = %bot_id, "WebSocket connection closed by client");
                break;
            }
            Err(e) => {
                warn!(bot_id = %bot_id, error = %e, "WebSocket error");
                handler.on_error(&bot_id, &e.to_string()).await;
                break;
            }
        }
    }

    send_task.abort();

    {
        let mut connections = state.connections.write().await;
        if connections
            .get(&bot_id)
            .is_some_and(|tx| tx.same_channel(&own_shutdown))
        {
            connections.remove(&bot_id);
        }
    }

    state.handler.on_disconnect(&bot_id).await;
    info!(bot_id = %bot_id, "WebSocket connection closed");
}
