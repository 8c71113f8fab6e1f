//! `PanelServer`: axum router for the WebSocket feed, REST snapshots,
//! `/metrics` and `/health`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use panelcast_core::SnapshotProvider;
use panelcast_telemetry::{MetricsCollector, PROMETHEUS_CONTENT_TYPE};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::broadcast::EventBroadcaster;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::rest::{self, ApiError};
use crate::session::{self, ClientSession, SessionGuard, SessionOptions};
use crate::shutdown::ShutdownCoordinator;

/// Extra time granted past the session drain budget before shutdown gives up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<EventBroadcaster>,
    pub snapshots: Arc<dyn SnapshotProvider>,
    pub metrics: Arc<MetricsCollector>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub config: Arc<ServerConfig>,
    pub start_time: Instant,
}

/// Handle to a listening server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Wait for the serve task to exit.
    pub async fn stopped(self) {
        let _ = self.task.await;
    }
}

/// The panel server. Construct once and share the broadcaster with the host.
pub struct PanelServer {
    config: Arc<ServerConfig>,
    broadcaster: Arc<EventBroadcaster>,
    metrics: Arc<MetricsCollector>,
    snapshots: Arc<dyn SnapshotProvider>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl PanelServer {
    pub fn new(config: ServerConfig, snapshots: Arc<dyn SnapshotProvider>) -> Self {
        Self::with_metrics(config, snapshots, Arc::new(panelcast_telemetry::panel_metrics()))
    }

    pub fn with_metrics(
        config: ServerConfig,
        snapshots: Arc<dyn SnapshotProvider>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            broadcaster: Arc::new(EventBroadcaster::new(metrics.clone())),
            metrics,
            snapshots,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broadcaster: self.broadcaster.clone(),
            snapshots: self.snapshots.clone(),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/players", get(rest::players))
            .route("/api/worlds", get(rest::worlds))
            .route("/api/server/info", get(rest::server_info))
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve in a background task.
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr();
        let bind_err = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let router = self.router();
        let token = self.shutdown.token();
        let task = self.shutdown.spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });

        info!(%local_addr, "panel server listening");
        Ok(ServerHandle { local_addr, task })
    }

    /// Like [`listen`](Self::listen), but a bind failure is logged and
    /// yields `None` so the host keeps running without the panel.
    pub async fn start(&self) -> Option<ServerHandle> {
        match self.listen().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "panel server disabled");
                None
            }
        }
    }

    /// Stop accepting, let sessions drain, and wait for tasks to finish.
    pub async fn shutdown_gracefully(&self) -> bool {
        self.shutdown
            .graceful_shutdown(self.config.shutdown_drain() + SHUTDOWN_GRACE)
            .await
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", "server is shutting down")
            .into_response();
    }

    let session = Arc::new(ClientSession::new(
        state.config.session_queue_capacity,
        state.shutdown.child_token(),
    ));
    let Some(handle) = state
        .broadcaster
        .try_register(&session, state.config.max_connections)
    else {
        warn!(
            max_connections = state.config.max_connections,
            "connection limit reached, rejecting upgrade"
        );
        return ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "capacity",
            "too many connections",
        )
        .into_response();
    };

    // The guard unregisters even if the upgrade never completes.
    let guard = SessionGuard::new(session, state.broadcaster.clone(), handle);
    let opts = SessionOptions {
        heartbeat_interval: state.config.heartbeat_interval(),
        drain_timeout: state.config.shutdown_drain(),
    };
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| shutdown.track(session::serve_socket(socket, guard, opts)))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render_prometheus(),
    )
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.broadcaster.session_count(),
    ))
}
