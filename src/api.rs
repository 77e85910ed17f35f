//! REST API server for the research agent
//!
//! GET  /health          liveness probe
//! POST /api/v1/analyze  answer one question

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::agent::ResearchAgent;
use crate::error::AnalysisError;
use crate::models::HealthResponse;

// ================= Request / error models =================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyzeRequest {
    pub question: String,
}

/// Error body shared by every non-200 answer
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub error: String,
    pub detail: String,
}

impl ApiError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self {
            error: "validation_error".to_string(),
            detail: detail.into(),
        }
    }

    pub fn internal() -> Self {
        Self {
            error: "internal_error".to_string(),
            detail: "the request could not be processed".to_string(),
        }
    }
}

// ================= State =================

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<ResearchAgent>,
    pub app_name: String,
}

// ================= Handlers =================

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        app: state.app_name.clone(),
    })
}

async fn analyze(
    State(state): State<ApiState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return (rejection.status(), Json(ApiError::validation(rejection.body_text())))
                .into_response();
        }
    };

    info!(chars = req.question.chars().count(), "Received analyze request");

    match state.agent.analyze(&req.question).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(AnalysisError::InputInvalid(detail)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(ApiError::validation(detail))).into_response()
        }
        Err(e) => {
            error!(error = %e, "Analyze failed outside the pipeline");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::internal())).into_response()
        }
    }
}

// ================= Router =================

pub fn create_router(agent: Arc<ResearchAgent>, app_name: impl Into<String>) -> Router {
    let state = ApiState {
        agent,
        app_name: app_name.into(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/analyze", post(analyze))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ================= Server startup =================

pub async fn start_server(
    agent: Arc<ResearchAgent>,
    app_name: &str,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(agent, app_name);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
