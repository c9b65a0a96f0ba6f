//! API route definitions.

use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::state::AppState;
use crate::error::SessionError;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/session", get(session_status))
        .route("/session/load", post(load))
        .route("/session/pcap", post(upload_pcap))
        .route("/session/start", post(start))
        .route("/session/stop", post(stop))
        .route("/session/statistics", get(statistics))
        .route("/session/results", post(results))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({ "data": data, "meta": meta() }))
}

/// A [`SessionError`] rendered as an API response.
pub struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            SessionError::Sequence { .. } => StatusCode::CONFLICT,
            SessionError::Format { .. }
            | SessionError::Binding { .. }
            | SessionError::Descriptor { .. } => StatusCode::BAD_REQUEST,
            SessionError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            SessionError::RemoteOperation { .. } => StatusCode::BAD_GATEWAY,
            SessionError::Persist { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!(status = status.as_u16(), kind = self.0.kind(), error = %self.0, "command failed");
        let body = json!({
            "data": null,
            "error": { "kind": self.0.kind(), "message": self.0.to_string() },
            "meta": meta()
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default = "default_blocking")]
    pub blocking: bool,
}

fn default_blocking() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub view: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_string()
}

async fn health() -> Json<Value> {
    envelope(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn session_status(State(state): State<AppState>) -> Json<Value> {
    let session = state.session.lock().await;
    envelope(json!(session.snapshot()))
}

async fn load(State(state): State<AppState>, Json(req): Json<PathRequest>) -> ApiResult {
    let mut session = state.session.lock().await;
    session.load_configuration(&req.path).await?;
    Ok(envelope(json!(session.snapshot())))
}

async fn upload_pcap(State(state): State<AppState>, Json(req): Json<PathRequest>) -> ApiResult {
    let session = state.session.lock().await;
    let file_name = session.upload_pcap(&req.path).await?;
    Ok(envelope(json!({ "file_name": file_name })))
}

async fn start(State(state): State<AppState>, Json(req): Json<StartRequest>) -> ApiResult {
    let mut session = state.session.lock().await;
    let test_id = session.start_traffic(req.blocking).await?;
    Ok(envelope(json!({
        "test_id": test_id,
        "session": session.snapshot()
    })))
}

async fn stop(State(state): State<AppState>) -> ApiResult {
    let mut session = state.session.lock().await;
    session.stop_traffic().await?;
    Ok(envelope(json!(session.snapshot())))
}

async fn statistics(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> ApiResult {
    let session = state.session.lock().await;
    let rendered = session.get_statistics(&query.view, &query.format).await?;
    Ok(envelope(json!({
        "view": query.view,
        "format": query.format.trim().to_ascii_lowercase(),
        "rendered": rendered
    })))
}

async fn results(State(state): State<AppState>) -> ApiResult {
    let session = state.session.lock().await;
    let message = session.get_results().await?;
    Ok(envelope(json!({ "message": message })))
}
