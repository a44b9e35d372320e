//! HTTP API and static frontend.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/query` | Answer a question, creating a session when none is given |
//! | `GET`  | `/api/courses` | Course count and titles |
//! | `POST` | `/api/session/clear` | Forget a session's history |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/*` | Frontend files from `server.frontend_dir`, served uncached |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "missing_api_key", "message": "..." } }
//! ```
//!
//! Error codes: `invalid_request` (422), `missing_api_key` (503),
//! `upstream_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeader;

use crate::anthropic::ApiError;
use crate::config::{ApiKeyStatus, Config, API_KEY_ENV};
use crate::models::{CourseAnalytics, Source};
use crate::rag::RagSystem;

#[derive(Clone)]
struct AppState {
    rag: Arc<RagSystem>,
}

/// Starts the HTTP server and blocks until it stops.
pub async fn run_server(config: &Config) -> Result<()> {
    warn_about_api_key(config);

    let rag = Arc::new(RagSystem::from_config(config).await?);

    if config.ingest.load_on_startup {
        load_startup_documents(&rag, config).await;
    }

    let frontend = config.server.frontend_dir.as_path();
    if !frontend.is_dir() {
        tracing::warn!(dir = %frontend.display(), "frontend directory not found; serving API only");
    }

    let app = build_router(rag, Some(frontend));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Router for the API, with the frontend mounted when `frontend_dir` exists.
pub fn build_router(rag: Arc<RagSystem>, frontend_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/api/query", post(handle_query))
        .route("/api/courses", get(handle_courses))
        .route("/api/session/clear", post(handle_clear_session))
        .route("/health", get(handle_health))
        .with_state(AppState { rag });

    if let Some(dir) = frontend_dir.filter(|d| d.is_dir()) {
        app = app.fallback_service(no_cache(ServeDir::new(dir)));
    }

    app.layer(cors)
}

type NoCache<S> = SetResponseHeader<
    SetResponseHeader<SetResponseHeader<S, HeaderValue>, HeaderValue>,
    HeaderValue,
>;

fn no_cache<S>(inner: S) -> NoCache<S> {
    let inner = SetResponseHeader::overriding(
        inner,
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    let inner =
        SetResponseHeader::overriding(inner, header::PRAGMA, HeaderValue::from_static("no-cache"));
    SetResponseHeader::overriding(inner, header::EXPIRES, HeaderValue::from_static("0"))
}

fn warn_about_api_key(config: &Config) {
    match config.api_key_status() {
        ApiKeyStatus::Present => {}
        ApiKeyStatus::Missing => tracing::warn!(
            "{} is not configured; queries will fail until it is set (in the environment or a .env file)",
            API_KEY_ENV
        ),
        ApiKeyStatus::Placeholder => tracing::warn!(
            "{} still holds the placeholder value; replace it with a real key",
            API_KEY_ENV
        ),
    }
}

async fn load_startup_documents(rag: &RagSystem, config: &Config) {
    let docs = &config.ingest.docs_path;
    if !docs.is_dir() {
        tracing::info!(path = %docs.display(), "no course documents to preload");
        return;
    }
    tracing::info!(path = %docs.display(), "loading initial documents");
    match rag
        .add_course_folder(docs, config.ingest.clear_existing)
        .await
    {
        Ok((courses, chunks)) => tracing::info!(courses, chunks, "loaded course documents"),
        Err(e) => tracing::error!(error = %format!("{:#}", e), "failed to load course documents"),
    }
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

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "invalid_request",
            message: rejection.body_text(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ApiError>() {
            Some(ApiError::MissingApiKey) => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "missing_api_key",
                message: err.to_string(),
            },
            Some(api_err) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "upstream_error",
                message: api_err.to_string(),
            },
            None => {
                tracing::error!(error = %format!("{:#}", err), "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: format!("{:#}", err),
                }
            }
        }
    }
}

// ============ POST /api/query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    sources: Vec<Source>,
    session_id: String,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(req) = payload?;

    let session_id = match req.session_id.filter(|s| !s.is_empty()) {
        Some(id) => id,
        None => state.rag.sessions().create_session(),
    };

    let (answer, sources) = state.rag.query(&req.query, Some(&session_id)).await?;

    Ok(Json(QueryResponse {
        answer,
        sources,
        session_id,
    }))
}

// ============ GET /api/courses ============

async fn handle_courses(State(state): State<AppState>) -> Result<Json<CourseAnalytics>, AppError> {
    Ok(Json(state.rag.get_course_analytics().await?))
}

// ============ POST /api/session/clear ============

#[derive(Deserialize)]
struct SessionClearRequest {
    session_id: String,
}

#[derive(Serialize)]
struct SessionClearResponse {
    success: bool,
    message: String,
}

async fn handle_clear_session(
    State(state): State<AppState>,
    payload: Result<Json<SessionClearRequest>, JsonRejection>,
) -> Result<Json<SessionClearResponse>, AppError> {
    let Json(req) = payload?;
    state.rag.sessions().clear_session(&req.session_id);
    Ok(Json(SessionClearResponse {
        success: true,
        message: format!("Session {} cleared successfully", req.session_id),
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}
