//! HTTP server implementation using axum.

use std::net::SocketAddr;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tgate_telemetry::Metrics;

use crate::auth::{check_basic_auth, unauthorized_response};
use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult};
use crate::handle::{DynControlHandle, ResetRequest};

/// Shared state for axum handlers.
#[derive(Clone)]
struct AppState {
    handle: DynControlHandle,
    config: ControlConfig,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlError::NotHalted(_) => StatusCode::CONFLICT,
            ControlError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ControlError::Internal(_) | ControlError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn create_router(handle: DynControlHandle, config: ControlConfig) -> Router {
    let state = AppState { handle, config };
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/positions", get(get_positions))
        .route("/api/kill-switch/reset", post(reset_kill_switch))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.config.auth_enabled() && !check_basic_auth(request.headers(), &state.config) {
        return unauthorized_response();
    }
    next.run(request).await
}

async fn get_status(State(state): State<AppState>) -> Response {
    Json(state.handle.status().await).into_response()
}

async fn get_positions(State(state): State<AppState>) -> Response {
    Json(state.handle.open_positions().await).into_response()
}

async fn reset_kill_switch(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> ControlResult<Response> {
    let operator = request.operator.trim().to_string();
    if operator.is_empty() {
        return Err(ControlError::BadRequest("operator is required".to_string()));
    }
    match state.handle.reset_kill_switch(operator.clone()).await {
        Ok(status) => {
            info!(operator = %operator, "Kill switch reset via control API");
            Ok(Json(status).into_response())
        }
        Err(e) => {
            warn!(operator = %operator, error = %e, "Kill switch reset refused");
            Err(e)
        }
    }
}

async fn get_metrics() -> ControlResult<Response> {
    let body = Metrics::gather_text().map_err(|e| ControlError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Serve the control API until `shutdown` is cancelled.
pub async fn run_server(
    handle: DynControlHandle,
    config: ControlConfig,
    shutdown: CancellationToken,
) -> ControlResult<()> {
    let ip = config
        .bind_address
        .parse::<std::net::IpAddr>()
        .map_err(|e| ControlError::BadRequest(format!("bind_address: {e}")))?;
    let addr = SocketAddr::new(ip, config.port);
    let app = create_router(handle, config);

    info!(%addr, "Starting control server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("Control server stopped");
    Ok(())
}
