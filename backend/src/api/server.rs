//! HTTP Server for the rostersync API.
//!
//! # API Endpoints
//!
//! | Method | Path                       | Description                              |
//! |--------|----------------------------|------------------------------------------|
//! | GET    | `/health`                  | Health check (includes store status)     |
//! | POST   | `/api/upload`              | Parse a roster and cache it for preview  |
//! | POST   | `/api/sync`                | Parse a roster and reconcile it          |
//! | GET    | `/api/preview/{session}`   | xlsx of the cached upload merged         |
//! | GET    | `/api/registry/export`     | xlsx (or `?format=csv`) of the registry  |
//! | POST   | `/api/archive`             | Copy the registry into history           |
//! | GET    | `/api/logs`                | SSE stream for real-time logs            |

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::LOG_BROADCASTER;
use super::types::{error_response, HealthResponse, SyncResponse, UploadResponse};
use crate::error::{PipelineError, ServerError};
use crate::export::{file_name, rows_from, to_bytes, ExportFormat};
use crate::models::PersistedEmployee;
use crate::pipeline::{ArchiveOutcome, RosterService};
use crate::store::ApplyStrategy;

/// Upload size cap.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

type ApiError = (StatusCode, Json<Value>);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RosterService>,
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(e) => match e {
                PipelineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                PipelineError::SessionExpired(_) => StatusCode::GONE,
                PipelineError::Grid(_)
                | PipelineError::Reconcile(_)
                | PipelineError::Config(_)
                | PipelineError::EmptySnapshot => StatusCode::BAD_REQUEST,
                e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

fn api_error(e: impl Into<ServerError>) -> ApiError {
    let e = e.into();
    let status = e.status();
    if status.is_server_error() {
        eprintln!("❌ {}", e);
    }
    (status, Json(error_response(&e.to_string())))
}

/// Build the router. Split from [`start_server`] so the state can be swapped.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/upload", post(upload_roster))
        .route("/api/sync", post(sync_roster))
        .route("/api/preview/{session}", get(preview_session))
        .route("/api/registry/export", get(export_registry))
        .route("/api/archive", post(archive_registry))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(
    service: Arc<RosterService>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(AppState { service });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 rostersync server running on http://localhost:{}", port);
    println!("   POST /api/upload             - Parse and cache a roster");
    println!("   POST /api/sync               - Reconcile a roster into the registry");
    println!("   GET  /api/preview/{{session}}  - Preview xlsx of a cached upload");
    println!("   GET  /api/registry/export    - Registry export");
    println!("   POST /api/archive            - Archive the registry");
    println!("   GET  /api/logs               - SSE log stream");
    println!("   GET  /health                 - Health check");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let service = &state.service;
    let store = match service.store().ping().await {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("unavailable: {}", e),
    };

    Json(HealthResponse {
        status: if store == "ok" { "ok" } else { "degraded" }.to_string(),
        service: "rostersync".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store,
        lookups_version: service.tables().version().to_string(),
        cached_sessions: service.cache().len(),
    })
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        // Lagged receivers skip what they missed
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Fields of an upload/sync form.
#[derive(Debug, Default)]
struct RosterForm {
    file: Option<(String, Vec<u8>)>,
    strategy: Option<ApplyStrategy>,
    dry_run: bool,
}

impl RosterForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = RosterForm::default();

        while let Some(field) = multipart.next_field().await.map_err(|e| {
            api_error(ServerError::BadRequest(format!("Multipart error: {}", e)))
        })? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "file" => {
                    let file_name = field.file_name().unwrap_or("upload.xlsx").to_string();
                    let bytes = field.bytes().await.map_err(|e| {
                        api_error(ServerError::BadRequest(format!("Read error: {}", e)))
                    })?;
                    form.file = Some((file_name, bytes.to_vec()));
                }
                "strategy" => {
                    let text = field_text(field).await?;
                    if !text.is_empty() {
                        form.strategy = Some(text.parse().map_err(|e: crate::error::ConfigError| {
                            api_error(ServerError::BadRequest(e.to_string()))
                        })?);
                    }
                }
                "dryRun" => {
                    let text = field_text(field).await?;
                    form.dry_run = matches!(text.as_str(), "true" | "1" | "yes");
                }
                _ => {}
            }
        }

        Ok(form)
    }

    fn take_file(&mut self) -> Result<(String, Vec<u8>), ApiError> {
        self.file
            .take()
            .ok_or_else(|| api_error(ServerError::BadRequest("No file provided".to_string())))
    }
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map(|t| t.trim().to_lowercase())
        .map_err(|e| api_error(ServerError::BadRequest(format!("Read error: {}", e))))
}

fn banner(title: &str) {
    println!("\n{}", "=".repeat(70));
    println!("{}", title);
    println!("{}\n", "=".repeat(70));
}

/// Upload endpoint: parse, cache, answer with a preview.
async fn upload_roster(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut form = RosterForm::read(multipart).await?;
    let (file_name, bytes) = form.take_file()?;

    banner(&format!("📄 NEW UPLOAD: {} ({} bytes)", file_name, bytes.len()));

    let service = &state.service;
    let outcome = service.upload(bytes, &file_name).map_err(api_error)?;
    Ok(Json(UploadResponse::from_outcome(&outcome, service.cache().ttl())))
}

/// Sync endpoint: parse the file and reconcile it into the registry.
async fn sync_roster(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SyncResponse>, ApiError> {
    let mut form = RosterForm::read(multipart).await?;
    let (file_name, bytes) = form.take_file()?;

    banner(&format!(
        "🔄 SYNC: {} ({} bytes){}",
        file_name,
        bytes.len(),
        if form.dry_run { " [dry run]" } else { "" }
    ));

    let outcome = state
        .service
        .sync(bytes, &file_name, form.strategy, form.dry_run)
        .await
        .map_err(api_error)?;

    Ok(Json(SyncResponse::from(outcome)))
}

fn download(
    rows: &[PersistedEmployee],
    prefix: &str,
    format: ExportFormat,
    service: &RosterService,
) -> Result<Response, ApiError> {
    let bytes = to_bytes(&rows_from(rows), format).map_err(|e| api_error(PipelineError::from(e)))?;
    let name = file_name(prefix, service.now(), format);

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Preview endpoint: the cached upload merged with the registry, as xlsx.
async fn preview_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> Result<Response, ApiError> {
    let rows = state.service.preview(&session).await.map_err(api_error)?;
    download(&rows, "preview", ExportFormat::Xlsx, &state.service)
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

/// Registry export endpoint.
async fn export_registry(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref().map(str::to_lowercase).as_deref() {
        None | Some("xlsx") => ExportFormat::Xlsx,
        Some("csv") => ExportFormat::Csv,
        Some(other) => {
            return Err(api_error(ServerError::BadRequest(format!(
                "Unsupported export format '{}'",
                other
            ))))
        }
    };

    let rows = state.service.export_registry().await.map_err(api_error)?;
    download(&rows, "colaboradores", format, &state.service)
}

/// Archive endpoint.
async fn archive_registry(
    State(state): State<AppState>,
) -> Result<Json<ArchiveOutcome>, ApiError> {
    let outcome = state.service.archive().await.map_err(api_error)?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::AppConfig;
    use crate::error::{ReconcileError, StoreError};
    use crate::lookups::LookupTables;
    use crate::store::SqliteRegistry;
    use chrono::{TimeZone, Utc};

    async fn state() -> AppState {
        let store = SqliteRegistry::connect("sqlite::memory:").await.unwrap();
        let service = RosterService::new(
            Arc::new(LookupTables::embedded().unwrap()),
            Arc::new(store),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 10, 16, 9, 5, 0).unwrap())),
            &AppConfig::default(),
        );
        AppState {
            service: Arc::new(service),
        }
    }

    #[test]
    fn test_status_mapping() {
        let status = |e: PipelineError| ServerError::from(e).status();

        assert_eq!(status(PipelineError::EmptySnapshot), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(ReconcileError::BelowSafetyFloor { found: 40, minimum: 100 }.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(PipelineError::SessionNotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(PipelineError::SessionExpired("x".into())), StatusCode::GONE);
        assert_eq!(
            status(StoreError::Unavailable("pool timed out".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(StoreError::Database("constraint".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServerError::BadRequest("no file".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_health_reports_store() {
        let Json(health) = health(State(state().await)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.store, "ok");
        assert_eq!(health.service, "rostersync");
        assert_eq!(health.cached_sessions, 0);
    }

    #[tokio::test]
    async fn test_missing_session_is_404() {
        let err = preview_session(State(state().await), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert_eq!(err.1 .0["status"], "error");
    }

    #[tokio::test]
    async fn test_export_download_headers() {
        let response = export_registry(
            State(state().await),
            Query(ExportQuery {
                format: Some("CSV".into()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"colaboradores_2026-10-16_0905.csv\""
        );
    }

    #[tokio::test]
    async fn test_export_rejects_unknown_format() {
        let err = export_registry(
            State(state().await),
            Query(ExportQuery {
                format: Some("pdf".into()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_archive_empty_registry() {
        let Json(outcome) = archive_registry(State(state().await)).await.unwrap();
        assert_eq!(outcome.archived, 0);
    }
}
