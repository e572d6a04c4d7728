//! API routes for otad
//!
//! Device routes sit behind the mTLS trust check. Dashboard routes assume a
//! trusted network and carry no authentication of their own.

use crate::error::{ApiError, ApiResult};
use crate::middleware::require_mtls;
use crate::server::AppState;
use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use ota_common::bundle_store::NO_FILE_SELECTED;
use ota_common::{BundleFile, BundleService, Manifest, OtaError, StoredBundle};
use serde::Serialize;
use std::path::Path as FsPath;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, info, warn};

type AppStateArc = Arc<AppState>;

pub const UPLOAD_TOO_LARGE: &str = "Upload exceeds the configured size limit";

/// Run filesystem work on the blocking pool so it never stalls a worker
async fn off_thread<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ota_common::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

/// Run a filesystem-bound service call on the blocking pool
async fn blocking<T, F>(state: &AppStateArc, f: F) -> ApiResult<T>
where
    F: FnOnce(&BundleService) -> ota_common::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    off_thread(move || f(&state.service)).await
}

// ============================================================================
// Device Routes
// ============================================================================

pub fn device_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/v1/manifest.json", get(current_manifest))
        .route("/bundles/:filename", get(serve_bundle))
        .route("/health", get(health_check))
        .route_layer(middleware::from_fn(require_mtls))
}

async fn current_manifest(State(state): State<AppStateArc>) -> ApiResult<Json<Manifest>> {
    let manifest = blocking(&state, |service| service.current()).await?;
    Ok(Json(manifest))
}

async fn serve_bundle(
    State(state): State<AppStateArc>,
    Path(filename): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let path = blocking(&state, move |service| service.store().resolve(&filename)).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // ServeFile handles Range and conditional requests for us
    let response = ServeFile::new(&path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    let mut response = response.map(Body::new);

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(disposition) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name)) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok(response)
}

// ============================================================================
// Dashboard Routes
// ============================================================================

pub fn dashboard_routes(static_dir: &FsPath) -> Router<AppStateArc> {
    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .route("/api/manifest", get(current_manifest))
        .route("/api/bundles", get(list_bundles))
        .route("/upload", post(upload_bundle))
        .route("/activate/:filename", post(activate_bundle))
        .route("/delete/:filename", post(delete_bundle))
        .route("/health", get(health_check))
}

async fn list_bundles(State(state): State<AppStateArc>) -> ApiResult<Json<Vec<BundleFile>>> {
    let bundles = blocking(&state, |service| service.list()).await?;
    Ok(Json(bundles))
}

/// Body-limit overruns surface as multipart stream errors and map to 413
fn upload_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!("Upload rejected: {}", err.body_text());
        ApiError(OtaError::TooLarge(UPLOAD_TOO_LARGE.to_string()))
    } else {
        ApiError(OtaError::InvalidInput(format!("Malformed upload: {}", err)))
    }
}

/// Multipart upload: a `bundle` file field and an optional `activate` flag.
/// The file is hashed while it streams to disk, so activation needs no re-read.
async fn upload_bundle(
    State(state): State<AppStateArc>,
    mut multipart: Multipart,
) -> ApiResult<Redirect> {
    let mut stored: Option<StoredBundle> = None;
    let mut activate = false;

    while let Some(mut field) = multipart.next_field().await.map_err(upload_error)? {
        match field.name().map(str::to_string).as_deref() {
            Some("bundle") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let mut writer =
                    blocking(&state, move |service| service.store().begin(&filename)).await?;
                debug!("Receiving upload {}", writer.name());
                // A writer that fails on the pool is dropped there with its staging file
                while let Some(chunk) = field.chunk().await.map_err(upload_error)? {
                    writer =
                        off_thread(move || writer.write_chunk(&chunk).map(|()| writer)).await?;
                }
                stored = Some(off_thread(move || writer.finish()).await?);
            }
            Some("activate") => {
                activate = field.text().await.map_err(upload_error)? == "true";
            }
            _ => {}
        }
    }

    let stored = stored.ok_or_else(|| OtaError::InvalidInput(NO_FILE_SELECTED.to_string()))?;
    info!("Upload complete: {} ({} bytes)", stored.name, stored.size_bytes);

    if activate {
        blocking(&state, move |service| service.manifests().activate_stored(&stored)).await?;
    }

    Ok(Redirect::to("/"))
}

async fn activate_bundle(
    State(state): State<AppStateArc>,
    Path(filename): Path<String>,
) -> ApiResult<Redirect> {
    blocking(&state, move |service| service.activate(&filename)).await?;
    Ok(Redirect::to("/"))
}

async fn delete_bundle(
    State(state): State<AppStateArc>,
    Path(filename): Path<String>,
) -> ApiResult<Redirect> {
    blocking(&state, move |service| service.delete(&filename)).await?;
    Ok(Redirect::to("/"))
}

// ============================================================================
// Health Routes
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}
