//! HTTP API (feature `server`).
//!
//! Routes:
//! - `GET /`: service name and version
//! - `GET /health`: liveness
//! - `POST /api/v1/pdf/merge?name=&outline=`: multipart `files` parts, each
//!   either an uploaded file or a text field holding a URL
//! - `POST /api/v1/pdf/stamp/text?text=&position=&pages=&over=&font=&size=&opacity=`:
//!   multipart with one uploaded file
//!
//! Both POST routes answer with the resulting PDF as an attachment. Errors are
//! JSON bodies of the form `{"error": {"code": "...", "message": "..."}}`.

use crate::config::{page_indices, parse_page_ranges, PipelineConfig};
use crate::document::InputReference;
use crate::error::{AssemblyError, DocstampError, FetchError};
use crate::geometry::Anchor;
use crate::output::ResultDescriptor;
use crate::stamp::{StampSpec, TextStamp};
use crate::transform::{MergeOptions, PdfTransform, StampOptions};
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Listener and request limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_mb: usize,
    /// Accept `files` text fields naming server-local paths.
    pub allow_local_paths: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            max_body_mb: 100,
            allow_local_paths: false,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ApiError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ApiError::Internal(format!("Invalid address: {e}")))
    }
}

struct AppState {
    pipeline: PipelineConfig,
    allow_local_paths: bool,
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Docstamp(#[from] DocstampError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Docstamp(e) => match e {
                DocstampError::Fetch(f) if f.is_client_error() => StatusCode::BAD_REQUEST,
                DocstampError::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
                DocstampError::Assembly(AssemblyError::WriteFailure { .. }) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                DocstampError::Assembly(_)
                | DocstampError::Stamp(_)
                | DocstampError::PageRange(_) => StatusCode::UNPROCESSABLE_ENTITY,
                DocstampError::InvalidConfig(_) | DocstampError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Docstamp(e) => match e {
                DocstampError::Fetch(FetchError::UnsupportedScheme { .. }) => "UNSUPPORTED_SCHEME",
                DocstampError::Fetch(FetchError::HttpStatus { .. }) => "HTTP_STATUS",
                DocstampError::Fetch(FetchError::NotFound { .. }) => "NOT_FOUND",
                DocstampError::Fetch(_) => "FETCH_ERROR",
                DocstampError::Assembly(_) => "ASSEMBLY_ERROR",
                DocstampError::Stamp(_) => "STAMP_ERROR",
                DocstampError::PageRange(_) => "PAGE_RANGE_ERROR",
                DocstampError::InvalidConfig(_) => "CONFIG_ERROR",
                DocstampError::Internal(_) => "INTERNAL_ERROR",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("multipart: {err}"))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(format!("IO error: {err}"))
    }
}

// ── Router ────────────────────────────────────────────────────────────────

/// Build the router. `pipeline` is cloned into every request's pipeline.
pub fn router(config: &ServerConfig, pipeline: PipelineConfig) -> Router {
    let state = Arc::new(AppState {
        pipeline,
        allow_local_paths: config.allow_local_paths,
    });

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/v1/pdf/merge", post(merge))
        .route("/api/v1/pdf/stamp/text", post(stamp_text))
        .layer(DefaultBodyLimit::max(config.max_body_mb * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl+C / SIGTERM.
pub async fn serve(config: ServerConfig, pipeline: PipelineConfig) -> Result<(), ApiError> {
    let addr = config.socket_addr()?;
    let app = router(&config, pipeline);

    info!("Starting docstamp server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn index() -> impl IntoResponse {
    Json(json!({
        "service": "docstamp",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct MergeQuery {
    name: Option<String>,
    outline: Option<bool>,
}

async fn merge(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MergeQuery>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let inputs = collect_inputs(multipart, state.allow_local_paths).await?;
    info!("merge request with {} inputs", inputs.len());

    let mut transform = PdfTransform::new(inputs, state.pipeline.clone())?;
    let result = transform
        .merge(MergeOptions {
            name: query.name,
            outline: query.outline.unwrap_or(true),
            ..MergeOptions::new()
        })
        .await?;
    pdf_response(result)
}

#[derive(Debug, Deserialize)]
struct StampTextQuery {
    text: String,
    position: Option<String>,
    pages: Option<String>,
    over: Option<bool>,
    font: Option<String>,
    size: Option<f32>,
    opacity: Option<f32>,
}

async fn stamp_text(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StampTextQuery>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let inputs = collect_inputs(multipart, state.allow_local_paths).await?;
    if inputs.len() != 1 {
        return Err(ApiError::BadRequest(format!(
            "expected exactly one file, got {}",
            inputs.len()
        )));
    }

    let mut stamp = TextStamp::new(query.text);
    stamp.over = query.over.unwrap_or(false);
    if let Some(font) = query.font {
        stamp.font = font;
    }
    if let Some(size) = query.size {
        stamp.size = size;
    }
    if let Some(opacity) = query.opacity {
        stamp.layout.opacity = opacity;
    }
    if let Some(position) = query.position {
        stamp.layout.position_name = position
            .parse::<Anchor>()
            .map_err(ApiError::BadRequest)?;
    }
    let pages = match query.pages.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(spec) => Some(vec![page_indices(
            &parse_page_ranges(spec).map_err(DocstampError::from)?,
        )]),
        None => None,
    };

    let mut transform = PdfTransform::new(inputs, state.pipeline.clone())?;
    let mut results = transform
        .stamp(
            &StampSpec::Text(stamp),
            StampOptions {
                pages,
                ..StampOptions::default()
            },
        )
        .await?;
    let result = results
        .pop()
        .ok_or_else(|| ApiError::Internal("stamp produced no result".into()))?;
    pdf_response(result)
}

/// Turn `files` parts into inputs, in upload order.
///
/// Parts with a filename are uploads; other parts are URLs (or server paths
/// when `allow_local_paths` is set).
async fn collect_inputs(
    mut multipart: Multipart,
    allow_local_paths: bool,
) -> Result<Vec<InputReference>, ApiError> {
    let mut inputs = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if !matches!(field.name(), Some("files") | Some("file")) {
            continue;
        }
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let data = field.bytes().await?;
                inputs.push(InputReference::from_bytes(filename, data.to_vec()));
            }
            None => {
                let text = field.text().await?;
                let input = InputReference::parse(text.trim());
                if matches!(input, InputReference::LocalPath(_)) && !allow_local_paths {
                    return Err(ApiError::BadRequest(format!(
                        "'{}' is not a URL; local paths are not accepted",
                        text.trim()
                    )));
                }
                inputs.push(input);
            }
        }
    }
    Ok(inputs)
}

fn pdf_response(mut result: ResultDescriptor) -> Result<Response, ApiError> {
    let bytes = result.read_all()?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        result.filename.replace(['"', '\\', '\r', '\n'], "_")
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
