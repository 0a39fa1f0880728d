//! `SigdeskServer`: Axum HTTP + WebSocket server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use sigdesk_core::{Clock, SystemClock, TabletId, WorkstationId};
use sigdesk_protocol::codes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{AuthError, DeviceAuthenticator};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::http::{self, ApiError, DEVICE_TOKEN_HEADER, handlers};
use crate::shutdown::ShutdownCoordinator;
use crate::signing::{ExpiryScheduler, LoggingArchive, SessionArchive, SessionOrchestrator, SessionStore};
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::router::MessageRouter;
use crate::websocket::session::{run_tablet_session, run_workstation_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live device channels.
    pub registry: Arc<ConnectionRegistry>,
    /// Owner of every session status change.
    pub orchestrator: Arc<SessionOrchestrator>,
    /// Inbound frame dispatch.
    pub router: MessageRouter,
    /// Tablet credential check.
    pub authenticator: Arc<dyn DeviceAuthenticator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The signature gateway server.
pub struct SigdeskServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    orchestrator: Arc<SessionOrchestrator>,
    authenticator: Arc<dyn DeviceAuthenticator>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
}

impl SigdeskServer {
    /// Create a server on the system clock that archives to the log.
    pub fn new(config: ServerConfig, authenticator: Arc<dyn DeviceAuthenticator>) -> Self {
        Self::with_parts(
            config,
            authenticator,
            Arc::new(SystemClock),
            Arc::new(LoggingArchive),
        )
    }

    /// Create a server with an explicit clock and archive.
    pub fn with_parts(
        config: ServerConfig,
        authenticator: Arc<dyn DeviceAuthenticator>,
        clock: Arc<dyn Clock>,
        archive: Arc<dyn SessionArchive>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(SessionStore::new(clock, config.terminal_retention));
        let orchestrator = Arc::new(SessionOrchestrator::new(
            store,
            Arc::clone(&registry),
            archive,
            config.timeouts,
            config.write_timeout,
        ));
        Self {
            config: Arc::new(config),
            registry,
            orchestrator,
            authenticator,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    fn state(&self) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            orchestrator: Arc::clone(&self.orchestrator),
            router: MessageRouter::new(Arc::clone(&self.orchestrator)),
            authenticator: Arc::clone(&self.authenticator),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/tablet/{tablet_id}", get(tablet_ws_handler))
            .route("/ws/workstation/{workstation_id}", get(workstation_ws_handler))
            .route("/api/signatures", post(handlers::create_signature))
            .route("/api/signatures/{session_id}", get(handlers::get_signature))
            .route(
                "/api/signatures/{session_id}/cancel",
                post(handlers::cancel_signature),
            )
            .route("/api/tablets", get(handlers::list_tablets))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state())
    }

    /// Bind the configured address and serve until shutdown fires.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();
        info!(%addr, "signature gateway listening");
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// Start the expiry sweep; it stops with the shutdown token.
    pub fn spawn_expiry(&self) -> JoinHandle<()> {
        ExpiryScheduler::new(
            Arc::clone(&self.orchestrator),
            self.config.expiry_sweep_interval,
        )
        .spawn(self.shutdown.token())
    }

    /// Close every channel and wait for `handles` within the configured grace.
    pub async fn shutdown_gracefully(&self, handles: Vec<JoinHandle<()>>) {
        self.shutdown
            .graceful_shutdown(&self.registry, handles, self.config.shutdown_timeout)
            .await;
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the session orchestrator.
    pub fn orchestrator(&self) -> &Arc<SessionOrchestrator> {
        &self.orchestrator
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.count_tablets(),
        state.registry.count_workstations(),
        state.orchestrator.store().active_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws/tablet/{tablet_id}
///
/// The device token is checked before the upgrade is accepted.
async fn tablet_ws_handler(
    State(state): State<AppState>,
    Path(tablet_id): Path<String>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let tablet_id = TabletId::from(tablet_id);
    let token = http::header_str(&headers, DEVICE_TOKEN_HEADER);
    let identity = match state.authenticator.authenticate(&tablet_id, token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(%tablet_id, error = %e, "tablet connection refused");
            let message = match &e {
                AuthError::MissingToken => "missing X-Device-Token header".to_owned(),
                AuthError::UnauthorizedDevice(_) => e.to_string(),
            };
            return ApiError::new(StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED_DEVICE, message)
                .into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let max = state.config.max_message_size;
    ws.max_message_size(max)
        .on_upgrade(move |socket| run_tablet_session(socket, identity, state))
}

/// GET /ws/workstation/{workstation_id}
async fn workstation_ws_handler(
    State(state): State<AppState>,
    Path(workstation_id): Path<String>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(tenant_id) = http::tenant_from_headers(&headers) else {
        return ApiError::missing_tenant().into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let workstation_id = WorkstationId::from(workstation_id);
    let max = state.config.max_message_size;
    ws.max_message_size(max).on_upgrade(move |socket| {
        run_workstation_session(socket, workstation_id, tenant_id, state)
    })
}
