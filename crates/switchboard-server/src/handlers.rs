//! HTTP and WebSocket handlers for the Switchboard server.
//!
//! Clients connect on the WebSocket path; the gateway in front of the
//! server has already authenticated them and passes the user id in a
//! header. The business layer pushes envelopes through the delivery
//! endpoints.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocket, ConnectInfo, Path, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{admit, Hub, SessionConfig};
use switchboard_protocol::{Envelope, EnvelopeCodec};
use switchboard_transport::AxumConnection;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The delivery hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    codec: EnvelopeCodec,
    sessions: SessionConfig,
}

impl AppState {
    /// Create app state. The hub's routing task is not started.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            hub: Hub::new(config.hub_config()),
            codec: EnvelopeCodec::new(config.transport.wire_format),
            sessions: config.session_config(),
            config,
        }
    }

    fn encode(&self, envelope: &Envelope) -> Result<Bytes, Response> {
        self.codec.encode(envelope).map_err(|e| {
            warn!(error = %e, "Rejected envelope");
            metrics::record_error("encode");
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()
        })
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/deliver", post(deliver_many_handler))
        .route("/deliver/:user_id", post(deliver_handler))
        .route("/broadcast", post(broadcast_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));
    state.hub.spawn().context("Failed to start hub")?;

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_sampler(state.hub.clone(), Duration::from_secs(5));
    }

    let app = build_app(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Switchboard listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.stats())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = headers
        .get(state.config.transport.user_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let Some(user_id) = user_id else {
        debug!(remote = %addr, "Upgrade without user identity");
        metrics::record_error("unauthenticated");
        return (StatusCode::UNAUTHORIZED, "missing user identity").into_response();
    };

    if state.hub.stats().sessions >= state.config.limits.max_connections {
        warn!(user = %user_id, "Connection limit reached");
        metrics::record_error("connection_limit");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let max = state.config.limits.max_frame_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, addr, user_id, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, user_id: String, state: Arc<AppState>) {
    let connection =
        AxumConnection::new(socket, state.config.connection_config()).with_remote_addr(addr);

    match admit(&state.hub, user_id.as_str(), Box::new(connection), &state.sessions).await {
        Ok(session) => {
            metrics::record_connection();
            debug!(user = %user_id, session = %session, "WebSocket connected");
        }
        Err(e) => {
            error!(user = %user_id, error = %e, "Failed to admit session");
            metrics::record_error("admit");
        }
    }
}

#[derive(Debug, Serialize)]
struct DeliveryResult {
    delivered: bool,
}

/// Deliver an envelope to one user.
async fn deliver_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Response {
    let payload = match state.encode(&envelope) {
        Ok(payload) => payload,
        Err(rejection) => return rejection,
    };

    let delivered = state.hub.send_to_user(&user_id, payload);
    metrics::record_delivery(delivered);
    debug!(user = %user_id, kind = %envelope.kind, delivered, "Delivery");

    Json(DeliveryResult { delivered }).into_response()
}

#[derive(Debug, Deserialize)]
struct GroupDelivery {
    recipients: Vec<String>,
    envelope: Envelope,
}

/// Deliver one envelope to several users, as for a group message.
async fn deliver_many_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GroupDelivery>,
) -> Response {
    let payload = match state.encode(&request.envelope) {
        Ok(payload) => payload,
        Err(rejection) => return rejection,
    };

    let report = state.hub.send_to_users(request.recipients, &payload);
    for _ in &report.delivered {
        metrics::record_delivery(true);
    }
    for _ in &report.offline {
        metrics::record_delivery(false);
    }

    debug!(
        kind = %request.envelope.kind,
        delivered = report.delivered.len(),
        offline = report.offline.len(),
        "Group delivery"
    );
    Json(report).into_response()
}

/// Deliver an envelope to every connected session.
async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    let payload = match state.encode(&envelope) {
        Ok(payload) => payload,
        Err(rejection) => return rejection,
    };

    match state.hub.broadcast(payload) {
        Ok(()) => {
            metrics::record_broadcast();
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            error!(error = %e, "Broadcast failed");
            metrics::record_error("broadcast");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn serve(config: Config) -> (Arc<AppState>, SocketAddr) {
        let state = Arc::new(AppState::new(config));
        state.hub.spawn().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_app(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        (state, addr)
    }

    async fn connect(addr: SocketAddr, user: Option<&'static str>) -> Result<Client, WsError> {
        let mut request = format!("ws://{addr}/ws").into_client_request()?;
        if let Some(user) = user {
            request
                .headers_mut()
                .insert("x-user-id", HeaderValue::from_static(user));
        }
        connect_async(request).await.map(|(ws, _)| ws)
    }

    async fn wait_online(state: &AppState, user: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !state.hub.is_online(user) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session should register");
    }

    async fn post(addr: SocketAddr, path: &str, body: &Value) -> (u16, String) {
        let response = reqwest::Client::new()
            .post(format!("http://{addr}{path}"))
            .json(body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    async fn next_json(ws: &mut Client) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame should arrive")
            .unwrap()
            .unwrap();
        match message {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_private_delivery_end_to_end() {
        let (state, addr) = serve(Config::default()).await;
        let mut ws = connect(addr, Some("7")).await.unwrap();
        wait_online(&state, "7").await;

        let envelope = json!({"type": "private", "message": {"from": 3, "to": 7, "content": "hi"}});
        let (status, body) = post(addr, "/deliver/7", &envelope).await;
        assert_eq!(status, 200);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"delivered": true}));

        assert_eq!(next_json(&mut ws).await, json!({"data": envelope}));

        let (_, body) = post(addr, "/deliver/8", &envelope).await;
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({"delivered": false}));
    }

    #[tokio::test]
    async fn test_group_delivery_reports_offline_members() {
        let (state, addr) = serve(Config::default()).await;
        let mut a = connect(addr, Some("a")).await.unwrap();
        let mut b = connect(addr, Some("b")).await.unwrap();
        wait_online(&state, "a").await;
        wait_online(&state, "b").await;

        let envelope = json!({"type": "group", "message": {"group": 1, "content": "hello"}});
        let request = json!({"recipients": ["a", "b", "c"], "envelope": envelope});
        let (status, body) = post(addr, "/deliver", &request).await;
        assert_eq!(status, 200);
        assert_eq!(
            serde_json::from_str::<Value>(&body).unwrap(),
            json!({"delivered": ["a", "b"], "offline": ["c"]})
        );

        assert_eq!(next_json(&mut a).await, json!({"data": envelope}));
        assert_eq!(next_json(&mut b).await, json!({"data": envelope}));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_clients() {
        let (state, addr) = serve(Config::default()).await;
        let mut a = connect(addr, Some("a")).await.unwrap();
        let mut b = connect(addr, Some("b")).await.unwrap();
        wait_online(&state, "a").await;
        wait_online(&state, "b").await;

        let envelope = json!({"type": "group", "message": {"notice": "maintenance"}});
        let (status, _) = post(addr, "/broadcast", &envelope).await;
        assert_eq!(status, 202);

        assert_eq!(next_json(&mut a).await, json!({"data": envelope}));
        assert_eq!(next_json(&mut b).await, json!({"data": envelope}));
    }

    #[tokio::test]
    async fn test_upgrade_requires_identity() {
        let (_state, addr) = serve(Config::default()).await;

        match connect(addr, None).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            other => panic!("expected 401, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let mut config = Config::default();
        config.limits.max_connections = 1;
        let (state, addr) = serve(config).await;

        let _first = connect(addr, Some("a")).await.unwrap();
        wait_online(&state, "a").await;

        match connect(addr, Some("b")).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 503),
            other => panic!("expected 503, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_invalid_envelope_rejected() {
        let (_state, addr) = serve(Config::default()).await;

        let (status, _) = post(addr, "/deliver/7", &json!({"type": "unknown", "message": {}})).await;
        assert_eq!(status, 422);
    }
}
