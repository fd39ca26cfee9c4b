//! Local HTTP API exposing a session's selection interface to UI clients.
//!
//! Browser dashboards poll this API instead of holding their own stream
//! state:
//!
//! ```text
//! hub ──ws──▶ StreamSession ──▶ GET /latest, GET /window, POST /select, POST /export
//! ```

use crate::core::{Sample, DEFAULT_WINDOW_SIZE};
use crate::session::{SessionStatus, StreamSession};
use crate::stats::IngestStats;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

type SharedSession = Arc<StreamSession>;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesResponse {
    pub devices: Vec<String>,
    pub selected: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub device_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowQuery {
    pub k: Option<usize>,
    pub device_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub device_id: String,
    /// File name inside the export directory; defaults to the configured
    /// manual export name.
    pub filename: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub status: String,
    pub path: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub session_id: String,
    pub status: SessionStatus,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /devices
async fn devices(State(session): State<SharedSession>) -> Json<DevicesResponse> {
    Json(DevicesResponse {
        devices: session.device_ids(),
        selected: session.selected(),
    })
}

/// POST /select
async fn select(
    State(session): State<SharedSession>,
    Json(request): Json<SelectRequest>,
) -> Result<Json<DevicesResponse>, ApiError> {
    if request.device_id.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_DEVICE",
            "deviceId must not be empty",
        ));
    }

    session.select(&request.device_id);
    Ok(Json(DevicesResponse {
        devices: session.device_ids(),
        selected: session.selected(),
    }))
}

/// GET /latest
async fn latest(State(session): State<SharedSession>) -> Json<Option<Sample>> {
    Json(session.latest())
}

/// GET /window?k=10&deviceId=ESP1
async fn window(
    State(session): State<SharedSession>,
    Query(query): Query<WindowQuery>,
) -> Json<Vec<Sample>> {
    let k = query.k.unwrap_or(DEFAULT_WINDOW_SIZE);
    let samples = match query.device_id {
        Some(device_id) => session.window_for(&device_id, k),
        None => session.window(k),
    };
    Json(samples)
}

/// POST /export
///
/// Writes the device's samples to a file in the export directory.
async fn export(
    State(session): State<SharedSession>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<ExportResponse>, ApiError> {
    let filename = match request.filename {
        Some(name) => {
            let is_plain = std::path::Path::new(&name)
                .file_name()
                .map(|f| f == name.as_str())
                .unwrap_or(false);
            if !is_plain {
                return Err(api_error(
                    StatusCode::BAD_REQUEST,
                    "INVALID_FILENAME",
                    format!("Invalid file name: {name}"),
                ));
            }
            name
        }
        None => session.config().manual_export_name.clone(),
    };
    let path = session.config().export_path.join(filename);

    let result = tokio::task::spawn_blocking(move || session.export_now_to(&request.device_id, &path))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_ERROR", e.to_string()))?
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_ERROR", e.to_string()))?;

    Ok(Json(ExportResponse {
        status: if result.is_some() { "exported" } else { "empty" }.to_string(),
        path: result,
    }))
}

/// GET /status
async fn status(State(session): State<SharedSession>) -> Json<StatusResponse> {
    Json(StatusResponse {
        session_id: session.id().to_string(),
        status: session.status(),
    })
}

/// GET /stats
async fn stats(State(session): State<SharedSession>) -> Json<IngestStats> {
    Json(session.stats())
}

/// Build the API router for a session.
pub fn router(session: SharedSession) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/devices", get(devices))
        .route("/select", post(select))
        .route("/latest", get(latest))
        .route("/window", get(window))
        .route("/export", post(export))
        .route("/status", get(status))
        .route("/stats", get(stats))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(session)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    session: SharedSession,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(session);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Selection API listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
