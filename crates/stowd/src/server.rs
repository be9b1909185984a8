//! Gateway wiring: state, access control, CORS, error rendering, serve loop

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::HashMap;
use tracing::info;

use stow_archive::ArchiveManager;
use stow_core::config::StowConfig;
use stow_core::{SettingsStore, StowError};
use stow_transfer::TransferEngine;

use crate::history::HistoryStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub engine: Arc<TransferEngine>,
    pub archive: Arc<ArchiveManager>,
    pub history: Arc<HistoryStore>,
    pub static_dir: Option<std::path::PathBuf>,
}

impl AppState {
    pub fn build(config: &StowConfig) -> Self {
        let settings = Arc::new(SettingsStore::open(config.settings_path()));
        let engine = TransferEngine::new(settings.clone());
        let archive = ArchiveManager::new(config.archive_path());
        let history = HistoryStore::open(config.history_path());

        let _ = settings.spawn_flusher();
        let _ = archive.spawn_load();
        let _ = archive.spawn_flusher();
        let _ = history.spawn_flusher();

        Self {
            settings,
            engine,
            archive,
            history,
            static_dir: config.gateway.static_dir.clone(),
        }
    }
}

pub async fn run(config: StowConfig) -> anyhow::Result<()> {
    let state = AppState::build(&config);
    let app = crate::routes::router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.gateway.listen).await?;
    info!(addr = %config.gateway.listen, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

async fn shutdown_signal(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down, flushing state");
    // The debounce windows may still hold unwritten mutations
    if let Err(e) = state.settings.flush() {
        tracing::warn!("settings flush on shutdown: {e}");
    }
    if let Err(e) = state.archive.flush() {
        tracing::warn!("archive flush on shutdown: {e}");
    }
    if let Err(e) = state.history.flush() {
        tracing::warn!("history flush on shutdown: {e}");
    }
}

// ── Error rendering ───────────────────────────────────────────────────────

/// Handler error: renders as a non-2xx status with a short explanation body.
/// Nothing here ever drops the connection or leaks a backtrace.
pub struct ApiError(pub StowError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StowError::NotFound(_) => StatusCode::NOT_FOUND,
            StowError::MalformedDescriptor(_) => StatusCode::BAD_REQUEST,
            StowError::Upload { .. } | StowError::Fetch(_) => StatusCode::BAD_GATEWAY,
            StowError::Integrity | StowError::CorruptBlob { .. } => StatusCode::BAD_GATEWAY,
            StowError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, format!("error: {}", self.0)).into_response()
    }
}

impl From<StowError> for ApiError {
    fn from(e: StowError) -> Self {
        ApiError(e)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ── Access control ────────────────────────────────────────────────────────

/// Shared-secret gate: Basic auth (the password part) or an `accessKey`
/// query parameter. An empty configured password leaves every route open.
pub async fn check_access(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let password = state.settings.access_password();
    if password.is_empty() {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Basic "))
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|creds| creds.split(':').next_back().map(str::to_string))
        .unwrap_or_default();

    let key = if header_key.is_empty() {
        query.get("accessKey").cloned().unwrap_or_default()
    } else {
        header_key
    };

    if key.trim() != password {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"stow\"")],
            "unauthorized",
        )
            .into_response();
    }

    next.run(request).await
}

/// Archive routes are unavailable until the initial load completes.
pub async fn require_archive_loaded(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.archive.loaded() {
        return (StatusCode::SERVICE_UNAVAILABLE, "archive is loading").into_response();
    }
    next.run(request).await
}

// ── CORS ──────────────────────────────────────────────────────────────────

/// Permissive CORS for the browser UI; preflights answer immediately.
pub async fn cors(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = if preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, PUT, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Authorization, Content-Type"),
    );
    response
}

/// Stream a transfer as an HTTP body with the right content headers.
pub fn stream_response(
    file_name: &str,
    file_size: u64,
    stream: impl futures::Stream<Item = Result<bytes::Bytes, StowError>> + Send + 'static,
) -> Response {
    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(crate::mime::mime_for_name(file_name))
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(file_size));
    response
}
