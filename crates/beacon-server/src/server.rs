use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use secrecy::SecretString;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use beacon_discord::DiscordClient;
use beacon_store::{Database, LinkRepo};

use crate::conn;
use crate::delivery::Delivery;
use crate::gateway::Gateway;
use crate::registry::SocketRegistry;
use crate::routes;

/// Server configuration. The numeric limits are tunable policy, not
/// load-bearing for correctness.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Admission ceiling: simultaneous open WebSocket connections.
    pub max_connections: usize,
    /// Outbound frame queue depth per connection.
    pub max_send_queue: usize,
    /// Largest accepted inbound WebSocket message.
    pub max_message_bytes: usize,
    pub heartbeat_interval: Duration,
    /// Inbound messages allowed per connection per window.
    pub message_rate_limit: u32,
    pub rate_limit_window: Duration,
    /// CORS allowlist for the HTTP routes.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3333,
            max_connections: 1000,
            max_send_queue: 256,
            max_message_bytes: 4 * 1024,
            heartbeat_interval: Duration::from_secs(30),
            message_rate_limit: 30,
            rate_limit_window: Duration::from_secs(60),
            allowed_origins: Vec::new(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub registry: Arc<SocketRegistry>,
    pub delivery: Arc<Delivery>,
    pub links: Arc<LinkRepo>,
    pub discord: Arc<DiscordClient>,
    pub api_key: SecretString,
    pub max_message_bytes: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(routes::health))
        .route("/callback", get(routes::callback))
        .route("/notify", post(routes::notify))
        .route("/platforms", get(routes::platforms))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
}

/// Create and start the server. Returns a handle that owns the
/// background tasks; dropping it shuts everything down, including the
/// heartbeat sweep.
pub async fn start(
    config: ServerConfig,
    db: Database,
    discord: Arc<DiscordClient>,
    api_key: SecretString,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(SocketRegistry::new());
    let links = Arc::new(LinkRepo::new(db));
    let gateway = Arc::new(Gateway::new(
        &config,
        Arc::clone(&registry),
        Arc::clone(&links),
    ));
    let delivery = Arc::new(Delivery::new(Arc::clone(&registry)));

    let heartbeat = conn::start_heartbeat(
        Arc::clone(gateway.tracker()),
        config.heartbeat_interval,
    );

    let state = AppState {
        gateway,
        registry,
        delivery,
        links,
        discord,
        api_key,
        max_message_bytes: config.max_message_bytes,
    };

    let router = build_router(state, &config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "beacon server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server,
        heartbeat,
    })
}

/// Handle returned by `start()`. Keeps the listener and heartbeat alive;
/// both stop when the handle is dropped.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
    heartbeat: tokio::task::JoinHandle<()>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.server.abort();
        self.heartbeat.abort();
    }
}

/// WebSocket upgrade handler. Admission and everything after happen in
/// the gateway; the size ceiling is applied here, before upgrade.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let gateway = Arc::clone(&state.gateway);
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| async move { gateway.handle_socket(socket).await })
}
