//! Gateway routes
//!
//! Everything under /api shares the access gate; archive routes are
//! additionally gated on the initial archive load. The fallback serves the
//! browser UI.

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use stow_backend::{backend_for, current_backend};
use stow_core::StowError;
use stow_transfer::TaskState;

use crate::assets;
use crate::history::HistoryStore;
use crate::server::{
    check_access, cors, require_archive_loaded, stream_response, ApiResult, AppState,
};

pub fn router(state: AppState) -> Router {
    let archive = Router::new()
        .route("/list", get(archive_list))
        .route("/file", put(archive_add_file))
        .route("/folder", post(archive_mkdir))
        .route("/remove", delete(archive_remove))
        .route("/download", get(archive_download))
        .route("/import", post(archive_import))
        .route("/export", post(archive_export))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_archive_loaded,
        ));

    let api = Router::new()
        .route("/download", get(download))
        .route("/download/{name}", get(download_named))
        .route("/upload", put(upload))
        .route("/upload/{name}", put(upload_named))
        .route("/file_info", get(file_info))
        .route("/upload_history", get(history_list).delete(history_delete))
        .route("/upload_history/rename", post(history_rename))
        .route("/upload_history/export", post(history_export))
        .route("/transfers", get(transfers))
        .nest("/archive", archive)
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn_with_state(state.clone(), check_access));

    Router::new()
        .nest("/api", api)
        .fallback(get(static_file))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Present a raw share code per the short-code setting, hiding it inside
/// the file name as cover text.
fn present_code(state: &AppState, raw: &str, cover: &str) -> String {
    if state.settings.use_short_code() {
        stow_share::hide(raw, cover)
    } else {
        raw.to_string()
    }
}

// ── Download / upload ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ShareQuery {
    s: String,
}

async fn download(
    State(state): State<AppState>,
    Query(query): Query<ShareQuery>,
) -> ApiResult<Response> {
    let descriptor = stow_share::resolve(&query.s)?;
    let backend = backend_for(&descriptor.backend, &state.settings);
    let (_task, stream) = state.engine.download_stream(backend, descriptor.clone());
    Ok(stream_response(
        &descriptor.file_name,
        descriptor.file_size,
        stream,
    ))
}

async fn download_named(
    state: State<AppState>,
    Path(_name): Path<String>,
    query: Query<ShareQuery>,
) -> ApiResult<Response> {
    download(state, query).await
}

#[derive(Deserialize)]
struct UploadQuery {
    name: Option<String>,
    add: Option<bool>,
}

async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<String> {
    let name = query.name.unwrap_or_default();
    do_upload(state, name, query.add, body).await
}

async fn upload_named(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<String> {
    let name = query.name.unwrap_or(name);
    do_upload(state, name, query.add, body).await
}

async fn do_upload(
    state: AppState,
    name: String,
    add: Option<bool>,
    body: Bytes,
) -> ApiResult<String> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(StowError::MalformedDescriptor("missing file name".into()).into());
    }
    let add = add.unwrap_or_else(|| state.settings.auto_add_history());

    let backend = current_backend(&state.settings);
    let descriptor = state.engine.upload(backend, &name, body).await?;
    let raw = stow_share::encode(&descriptor);

    if add {
        state.history.add(HistoryStore::make_entry(
            raw.clone(),
            name.clone(),
            descriptor.file_size,
        ));
    }

    Ok(present_code(&state, &raw, &name))
}

async fn file_info(
    State(_state): State<AppState>,
    Query(query): Query<ShareQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let descriptor = stow_share::resolve(&query.s)?;
    Ok(Json(json!({
        "name": descriptor.file_name,
        "size": descriptor.file_size,
    })))
}

// ── Upload history ────────────────────────────────────────────────────────

async fn history_list(State(state): State<AppState>, headers: HeaderMap) -> Response {
    // The history is sensitive enough to keep off cross-origin pages
    if headers.contains_key("origin") {
        return (StatusCode::FORBIDDEN, "cross-origin access denied").into_response();
    }
    Json(state.history.list()).into_response()
}

async fn history_delete(
    State(state): State<AppState>,
    Query(query): Query<ShareQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.history.remove(&query.s);
    Ok(Json(json!({ "removed": removed })))
}

#[derive(Deserialize)]
struct RenameQuery {
    s: String,
    name: String,
}

async fn history_rename(
    State(state): State<AppState>,
    Query(query): Query<RenameQuery>,
) -> ApiResult<String> {
    let new_code = state.history.rename(&query.s, &query.name)?;
    Ok(present_code(&state, &new_code, &query.name))
}

#[derive(Deserialize)]
struct ExportQuery {
    name: Option<String>,
}

/// Export the history as a `.stow_list` file — uploaded through the engine
/// like any other file, yielding a one-paste share code.
async fn history_export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<String> {
    let entries = state.history.list();
    let bytes = stow_archive::encode_list(&entries);

    let base = query.name.unwrap_or_else(|| "file-list".to_string());
    let file_name = format!("{base}{}", stow_archive::FILE_LIST_SUFFIX);

    let backend = current_backend(&state.settings);
    let descriptor = state
        .engine
        .upload(backend, &file_name, Bytes::from(bytes))
        .await?;
    let raw = stow_share::encode(&descriptor);
    info!(entries = entries.len(), "exported file list");
    Ok(present_code(&state, &raw, &file_name))
}

// ── Transfers dashboard ───────────────────────────────────────────────────

async fn transfers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let tasks: Vec<serde_json::Value> = state
        .engine
        .tasks()
        .iter()
        .map(|task| {
            let state_text = match task.state() {
                TaskState::Queued => "queued".to_string(),
                TaskState::Running => "running".to_string(),
                TaskState::Done => "done".to_string(),
                TaskState::Cancelled => "cancelled".to_string(),
                TaskState::Failed(e) => format!("failed: {e}"),
            };
            json!({
                "name": task.name(),
                "state": state_text,
                "bytes": task.bytes_transferred(),
            })
        })
        .collect();

    Json(json!({
        "tasks": tasks,
        "uploaded_bytes": state.engine.stats().uploaded(),
        "downloaded_bytes": state.engine.stats().downloaded(),
        "upload_in_flight": state.engine.upload_in_flight(),
        "download_in_flight": state.engine.download_in_flight(),
    }))
}

// ── Archive ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PathQuery {
    path: Option<String>,
}

async fn archive_list(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<Vec<stow_archive::NodeSummary>>> {
    let path = query.path.unwrap_or_else(|| "/".to_string());
    Ok(Json(state.archive.list(&path)?))
}

async fn archive_add_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
    body: String,
) -> ApiResult<StatusCode> {
    let path = query
        .path
        .ok_or_else(|| StowError::NotFound("missing path".into()))?;
    let descriptor = stow_share::resolve(&body)?;
    state.archive.add_file(&path, descriptor)?;
    Ok(StatusCode::CREATED)
}

async fn archive_mkdir(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<StatusCode> {
    let path = query
        .path
        .ok_or_else(|| StowError::NotFound("missing path".into()))?;
    state.archive.mkdir(&path)?;
    Ok(StatusCode::CREATED)
}

async fn archive_remove(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<StatusCode> {
    let path = query
        .path
        .ok_or_else(|| StowError::NotFound("missing path".into()))?;
    state.archive.remove(&path)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn archive_download(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let path = query
        .path
        .ok_or_else(|| StowError::NotFound("missing path".into()))?;
    let descriptor = state.archive.get_descriptor(&path)?;
    let backend = backend_for(&descriptor.backend, &state.settings);
    let (_task, stream) = state.engine.download_stream(backend, descriptor.clone());
    Ok(stream_response(
        &descriptor.file_name,
        descriptor.file_size,
        stream,
    ))
}

/// Import a remote archive (`.stow_arc`) or file list (`.stow_list`) by
/// share code: download, merge into the live tree, persist.
async fn archive_import(
    State(state): State<AppState>,
    Query(query): Query<ShareQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let descriptor = stow_share::resolve(&query.s)?;
    let backend = backend_for(&descriptor.backend, &state.settings);

    let imported = if descriptor.file_name.ends_with(stow_archive::ARCHIVE_SUFFIX) {
        let bytes = state.engine.download(backend, &descriptor).await?;
        state.archive.import_snapshot(&bytes)?
    } else if descriptor.file_name.ends_with(stow_archive::FILE_LIST_SUFFIX) {
        let bytes = state.engine.download(backend, &descriptor).await?;
        let entries = stow_archive::decode_list(&bytes)?;
        state.archive.import_file_list(&entries)?
    } else {
        return Err(StowError::MalformedDescriptor(format!(
            "{} is neither an archive nor a file list",
            descriptor.file_name
        ))
        .into());
    };

    state.archive.flush()?;
    info!(imported, from = %descriptor.file_name, "archive import complete");
    Ok(Json(json!({ "imported": imported })))
}

/// Snapshot the live tree and upload it, returning the archive's share code.
async fn archive_export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<String> {
    let bytes = state.archive.export_snapshot()?;
    let base = query.name.unwrap_or_else(|| "archive".to_string());
    let file_name = format!("{base}{}", stow_archive::ARCHIVE_SUFFIX);

    let backend = current_backend(&state.settings);
    let descriptor = state
        .engine
        .upload(backend, &file_name, Bytes::from(bytes))
        .await?;
    let raw = stow_share::encode(&descriptor);
    Ok(present_code(&state, &raw, &file_name))
}

// ── Static UI ─────────────────────────────────────────────────────────────

async fn static_file(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();

    if let Some(dir) = &state.static_dir {
        if let Some(file) = assets::resolve_static(dir, path) {
            match tokio::fs::read(&file).await {
                Ok(bytes) => {
                    let mime = crate::mime::mime_for_name(&file.to_string_lossy());
                    return ([(axum::http::header::CONTENT_TYPE, mime)], bytes).into_response();
                }
                Err(e) => {
                    return (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {e}"))
                        .into_response()
                }
            }
        }
    }

    if path == "/" || path == "/index.html" {
        return Html(assets::INDEX_HTML).into_response();
    }
    (StatusCode::NOT_FOUND, "not found").into_response()
}
