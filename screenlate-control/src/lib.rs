//! Control API Module
//!
//! A small loopback HTTP surface over a running pipeline, so the headless
//! CLI (and anything else local) can inspect and steer it: status, metrics,
//! pause/resume, stop. Binds to localhost only; this is an on-machine
//! control socket, not a public API.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use screenlate_pipeline::runtime::PipelineController;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;

/// Control API errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Bind failed: {0}")]
    Bind(#[from] std::io::Error),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ControlError::InvalidTransition(msg) => (StatusCode::CONFLICT, msg.clone()),
            ControlError::Bind(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

/// Result type alias for control operations
pub type Result<T> = std::result::Result<T, ControlError>;

/// Control server configuration
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Host to bind; keep this loopback
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8164,
        }
    }
}

/// The control server
pub struct ControlServer {
    config: ControlConfig,
    controller: PipelineController,
}

impl ControlServer {
    /// Create a server over a pipeline controller
    pub fn new(config: ControlConfig, controller: PipelineController) -> Self {
        Self { config, controller }
    }

    /// Build the router (public for in-process tests)
    pub fn build_router(controller: PipelineController) -> Router {
        Router::new()
            .route("/api/status", get(status))
            .route("/api/metrics", get(metrics))
            .route("/api/pause", post(pause))
            .route("/api/resume", post(resume))
            .route("/api/stop", post(stop))
            .layer(TraceLayer::new_for_http())
            .with_state(controller)
    }

    /// Run until the listener errors or the process exits
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let app = Self::build_router(self.controller);
        tracing::info!("Control API listening on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// GET /api/status - runtime state and user-visible status line
async fn status(State(controller): State<PipelineController>) -> Json<serde_json::Value> {
    Json(json!({
        "state": controller.state(),
        "status": controller.metrics().status(),
    }))
}

/// GET /api/metrics - full metrics and cache snapshot
async fn metrics(State(controller): State<PipelineController>) -> Json<serde_json::Value> {
    Json(json!({
        "pipeline": controller.metrics().snapshot(),
        "cache": controller.cache().stats(),
    }))
}

/// POST /api/pause
async fn pause(State(controller): State<PipelineController>) -> Result<Json<serde_json::Value>> {
    controller
        .pause()
        .map_err(ControlError::InvalidTransition)?;
    Ok(Json(json!({ "state": controller.state() })))
}

/// POST /api/resume
async fn resume(State(controller): State<PipelineController>) -> Result<Json<serde_json::Value>> {
    controller
        .resume()
        .map_err(ControlError::InvalidTransition)?;
    Ok(Json(json!({ "state": controller.state() })))
}

/// POST /api/stop
async fn stop(State(controller): State<PipelineController>) -> Result<Json<serde_json::Value>> {
    controller
        .request_stop()
        .map_err(ControlError::InvalidTransition)?;
    Ok(Json(json!({ "state": controller.state() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_maps_to_conflict() {
        let response =
            ControlError::InvalidTransition("Idle -> Paused".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_default_config_is_loopback() {
        let config = ControlConfig::default();
        assert_eq!(config.host, "127.0.0.1");
    }
}
