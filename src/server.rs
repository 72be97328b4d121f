//! HTTP server exposing the analysis pipeline.
//!
//! Analysis endpoints answer with a `text/event-stream` response that carries
//! the run's progress events (see [`crate::progress`]) and ends after the
//! terminal `complete` or `error` event. A `:` comment is sent every
//! `[server].heartbeat_secs` while the run is quiet.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/analyze` | Stream a standard (or `mode`) analysis |
//! | `POST` | `/api/analyze/kt` | Stream a knowledge-transfer analysis |
//! | `POST` | `/api/analyze/custom` | One-shot analysis of posted content |
//!
//! Analysis requests take `{"repositoryId": "owner/repo", "mode": "kt"}`;
//! `repoName` is accepted for `repositoryId`. The request's `Authorization`
//! header is passed on to GitHub.
//!
//! # Error Contract
//!
//! Errors raised before a stream starts are JSON:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "repositoryId must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `timeout` (408), `upstream_error` (502),
//! `internal` (500). Once a stream is open, failures travel as `error` events.
//!
//! Dropping the connection cancels the run.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::InMemoryCache;
use crate::config::Config;
use crate::error::AnalysisError;
use crate::llm::{Generator, OllamaGenerator};
use crate::models::AnalysisMode;
use crate::orchestrator::Orchestrator;
use crate::progress::{ChannelSink, ProgressEvent};
use crate::source::GitHubSource;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
}

/// Starts the HTTP server with the configured Ollama-compatible backend.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let generator = OllamaGenerator::new(&config.llm)?;
    run_server_with_generator(config, Arc::new(generator)).await
}

/// Starts the HTTP server with a caller-supplied generation backend.
///
/// # Example
///
/// ```rust,no_run
/// use repo_analyzer::llm::OllamaGenerator;
/// use repo_analyzer::server::run_server_with_generator;
/// use std::sync::Arc;
///
/// # async fn example(config: &repo_analyzer::config::Config) -> anyhow::Result<()> {
/// let generator = OllamaGenerator::new(&config.llm)?;
/// run_server_with_generator(config, Arc::new(generator)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with_generator(
    config: &Config,
    generator: Arc<dyn Generator>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(Arc::new(config.clone()), generator)?;

    tracing::info!(
        bind = %bind_addr,
        model = config.llm.model.as_str(),
        "analysis server listening"
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the application router with a fresh process-wide report cache.
pub fn router(config: Arc<Config>, generator: Arc<dyn Generator>) -> anyhow::Result<Router> {
    let cache = Arc::new(InMemoryCache::new());
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), generator, cache)?);
    let state = AppState {
        config,
        orchestrator,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(Router::new()
        .route("/health", get(handle_health))
        .route("/api/analyze", post(handle_analyze))
        .route("/api/analyze/kt", post(handle_analyze_kt))
        .route("/api/analyze/custom", post(handle_custom))
        .layer(cors)
        .with_state(state))
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        let (status, code) = match &err {
            AnalysisError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AnalysisError::Timeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            AnalysisError::Transport { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/analyze ============

/// Request body for the analysis endpoints.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    #[serde(alias = "repoName")]
    repository_id: String,
    #[serde(default)]
    mode: Option<String>,
}

async fn handle_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let mode = match req.mode.as_deref() {
        None | Some("") => AnalysisMode::Standard,
        Some(raw) => raw.parse::<AnalysisMode>().map_err(bad_request)?,
    };
    start_stream(state, &headers, req.repository_id, mode)
}

async fn handle_analyze_kt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    start_stream(state, &headers, req.repository_id, AnalysisMode::Kt)
}

/// Spawns the run and returns its progress as an SSE stream.
///
/// The stream owns a drop guard of this caller's cancellation token, so a
/// client disconnect (the response body being dropped) detaches the caller.
/// The run stops once no caller is left on it.
fn start_stream(
    state: AppState,
    headers: &HeaderMap,
    repository: String,
    mode: AnalysisMode,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let repository = repository.trim().to_string();
    if repository.is_empty() {
        return Err(bad_request("repositoryId must not be empty"));
    }

    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let source = GitHubSource::new(&state.config.source, authorization)
        .map_err(|e| internal(format!("{:#}", e)))?;

    let (sink, rx) = ChannelSink::channel();
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let orchestrator = state.orchestrator.clone();

    tokio::spawn(async move {
        // The outcome already reached the client as the terminal event.
        let _ = orchestrator
            .run(&repository, mode, &source, Arc::new(sink), run_cancel)
            .await;
    });

    let guard = cancel.drop_guard();
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _ = &guard;
        Ok::<_, Infallible>(to_sse_event(&event))
    });

    let heartbeat = Duration::from_secs(state.config.server.heartbeat_secs);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(heartbeat)))
}

fn to_sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.event_type())
        .data(event.envelope().to_string())
}

// ============ POST /api/analyze/custom ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomRequest {
    file_name: String,
    content: String,
    prompt: String,
}

#[derive(Serialize)]
struct CustomResponse {
    analysis: String,
}

async fn handle_custom(
    State(state): State<AppState>,
    Json(req): Json<CustomRequest>,
) -> Result<Json<CustomResponse>, AppError> {
    let analysis = state
        .orchestrator
        .analyze_custom(&req.file_name, &req.content, &req.prompt)
        .await?;
    Ok(Json(CustomResponse { analysis }))
}
