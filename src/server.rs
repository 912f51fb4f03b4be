//! HTTP server.
//!
//! Exposes the document lifecycle and the chat stream over a small JSON
//! API. The chat endpoint streams [`Segment`]s as Server-Sent Events,
//! one JSON object per event; everything else is plain JSON.
//!
//! # Endpoints
//!
//! | Method   | Path                       | Description |
//! |----------|----------------------------|-------------|
//! | `GET`    | `/health`                  | Model reachability + version |
//! | `GET`    | `/documents`               | Registry snapshot |
//! | `POST`   | `/documents/upload`        | Raw PDF body, `?filename=&force=` |
//! | `POST`   | `/documents/toggle`        | JSON `{id, enabled}` |
//! | `DELETE` | `/documents/{id}`          | Remove a document everywhere |
//! | `POST`   | `/chat-stream`             | JSON `{message, use_rag}` → SSE |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "document already exists: a.pdf" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `model_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat;
use crate::config::Config;
use crate::error::EngineError;
use crate::ingest;
use crate::lifecycle;
use crate::llm::LanguageModel;
use crate::models::{ChatRequest, ToggleRequest};

/// Uploads beyond this size are rejected before reaching the pipeline.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    model: Arc<dyn LanguageModel>,
}

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(
    config: &Config,
    pool: SqlitePool,
    model: Arc<dyn LanguageModel>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        model,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/documents", get(handle_list))
        .route("/documents/upload", post(handle_upload))
        .route("/documents/toggle", post(handle_toggle))
        .route("/documents/{id}", delete(handle_delete))
        .route("/chat-stream", post(handle_chat_stream))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "server listening");
    println!("groundwork listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let (status, code) = match &err {
            EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            EngineError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::ModelUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable"),
            EngineError::Ingestion(_) | EngineError::Retrieval(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ Handlers ============

async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = if state.model.available().await {
        "online"
    } else {
        "offline"
    };
    Json(serde_json::json!({
        "system": "groundwork",
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let docs = lifecycle::list_documents(&state.config);
    Json(serde_json::json!(docs))
}

#[derive(Deserialize)]
struct UploadParams {
    filename: String,
    #[serde(default)]
    force: bool,
}

async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    ingest::upload_document(&state.config, &state.pool, &params.filename, &body, params.force)
        .await?;

    // Fire-and-forget: the uploader observes completion by re-reading
    // the registry via GET /documents.
    let config = state.config.clone();
    let pool = state.pool.clone();
    let model = state.model.clone();
    let id = params.filename.clone();
    tokio::spawn(async move {
        ingest::process_document(&config, &pool, model.as_ref(), &id).await;
    });

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "File accepted. Processing in the background.",
    })))
}

async fn handle_toggle(
    State(state): State<AppState>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    lifecycle::toggle_document(&state.config, &req.id, req.enabled)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    lifecycle::delete_document(&state.config, &state.pool, &id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("{id} deleted"),
    })))
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = chat::answer_stream(
        state.config.clone(),
        state.pool.clone(),
        state.model.clone(),
        req.message,
        req.use_rag,
    )
    .map(|segment| Event::default().json_data(&segment));

    Sse::new(stream).keep_alive(KeepAlive::default())
}
