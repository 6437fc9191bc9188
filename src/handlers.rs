use crate::config::Config;
use crate::enrichment::{EnrichmentOrchestrator, GenerationOutcome};
use crate::errors::{AppError, ResultExt};
use crate::export::{export_file_name, photo_bytes, ExportError, ExportFormat};
use crate::image_client::ImageService;
use crate::ingest::{self, format_date};
use crate::models::{GenerationState, PersonalData, RecordId};
use crate::store::RecordStore;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Records from the most recent upload.
    pub store: Arc<Mutex<RecordStore>>,
    /// Photo generation workflow bound to `store`.
    pub orchestrator: EnrichmentOrchestrator,
}

impl AppState {
    /// Builds state with an empty store and an orchestrator configured from `config`.
    pub fn new(config: Config, service: Arc<dyn ImageService>) -> Self {
        let store = Arc::new(Mutex::new(RecordStore::new()));
        let orchestrator = EnrichmentOrchestrator::new(store.clone(), service)
            .with_timeout(config.generation_timeout)
            .with_policy(config.generation_policy);

        Self {
            config,
            store,
            orchestrator,
        }
    }
}

/// Presentation-ready date columns.
#[derive(Debug, Serialize)]
pub struct FormattedDates {
    pub birthdate: String,
    pub valid_from: String,
    pub valid_until: String,
}

/// One record as returned by the API.
#[derive(Debug, Serialize)]
pub struct RecordView {
    pub index: usize,
    /// 1-based position, e.g. "2 / 5".
    pub position: String,
    pub fields: PersonalData,
    pub dates: FormattedDates,
    pub generation: GenerationState,
    pub photo_url: Option<String>,
    /// Failure text for `failed` records.
    pub message: Option<String>,
    pub export_file_name: String,
}

impl RecordView {
    fn from_store(store: &RecordStore, index: usize) -> Option<Self> {
        let record = store.records().get(index)?;
        let data = record.data();
        let message = match record.generation_state() {
            GenerationState::Failed { reason } => {
                Some(GenerationOutcome::Failed(reason.clone()).message())
            }
            _ => None,
        };

        Some(Self {
            index,
            position: format!("{} / {}", index + 1, store.len()),
            fields: data.clone(),
            dates: FormattedDates {
                birthdate: format_date(Some(&data.birthdate)),
                valid_from: format_date(Some(&data.valid_from)),
                valid_until: format_date(Some(&data.valid_until)),
            },
            generation: record.generation_state().clone(),
            photo_url: record.photo_url().map(|photo| photo.to_string()),
            message,
            export_file_name: export_file_name(record, ExportFormat::Png),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct LoadResponse {
    pub loaded: usize,
    pub load_id: Uuid,
    pub current: Option<RecordView>,
}

#[derive(Debug, Serialize)]
pub struct RecordListResponse {
    pub load_id: Uuid,
    pub cursor: Option<usize>,
    pub total: usize,
    pub records: Vec<RecordView>,
}

/// Builds the application router (without rate limiting).
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes(&state.config))
        .with_state(state)
}

/// Record and generation endpoints.
pub fn api_routes(config: &Config) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/records", post(upload_records).get(list_records))
        .route("/api/v1/records/current", get(current_record))
        .route("/api/v1/records/next", post(next_record))
        .route("/api/v1/records/prev", post(prev_record))
        .route("/api/v1/records/:index", get(get_record))
        .route("/api/v1/records/:index/select", post(select_record))
        .route(
            "/api/v1/records/:index/photo",
            post(generate_photo).delete(cancel_photo),
        )
        .route("/api/v1/records/:index/export", get(export_record))
        // Workbooks exceed axum's default 2MB extractor limit
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-permit-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/records
///
/// Body is the raw workbook. On success the store is replaced wholesale; on
/// any ingestion error the previous records stay loaded.
pub async fn upload_records(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<LoadResponse>), AppError> {
    tracing::info!("POST /records - {} byte upload", body.len());

    if body.is_empty() {
        return Err(AppError::BadRequest("Upload body is empty".to_string()));
    }

    let records = ingest::ingest(&body).context("Spreadsheet upload rejected")?;

    let mut store = state.store.lock().await;
    let load_id = store.load(records);

    Ok((
        StatusCode::CREATED,
        Json(LoadResponse {
            loaded: store.len(),
            load_id,
            current: store.cursor().and_then(|i| RecordView::from_store(&store, i)),
        }),
    ))
}

/// GET /api/v1/records
pub async fn list_records(State(state): State<Arc<AppState>>) -> Json<RecordListResponse> {
    let store = state.store.lock().await;

    Json(RecordListResponse {
        load_id: store.load_id(),
        cursor: store.cursor(),
        total: store.len(),
        records: (0..store.len())
            .filter_map(|i| RecordView::from_store(&store, i))
            .collect(),
    })
}

/// GET /api/v1/records/current
pub async fn current_record(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecordView>, AppError> {
    let store = state.store.lock().await;
    current_view(&store)
}

/// POST /api/v1/records/next
pub async fn next_record(State(state): State<Arc<AppState>>) -> Result<Json<RecordView>, AppError> {
    let mut store = state.store.lock().await;
    store.next();
    current_view(&store)
}

/// POST /api/v1/records/prev
pub async fn prev_record(State(state): State<Arc<AppState>>) -> Result<Json<RecordView>, AppError> {
    let mut store = state.store.lock().await;
    store.prev();
    current_view(&store)
}

/// POST /api/v1/records/:index/select
pub async fn select_record(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<RecordView>, AppError> {
    let mut store = state.store.lock().await;
    if !store.select(index) {
        return Err(record_not_found(index));
    }
    current_view(&store)
}

/// GET /api/v1/records/:index
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<RecordView>, AppError> {
    let store = state.store.lock().await;
    RecordView::from_store(&store, index)
        .map(Json)
        .ok_or_else(|| record_not_found(index))
}

/// POST /api/v1/records/:index/photo
///
/// Starts generation and returns 202 immediately; poll the record to observe
/// the terminal state. Returns 409 when the record is already generating or
/// has a photo.
pub async fn generate_photo(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::info!("POST /records/{}/photo", index);
    let id = resolve(&state, index).await?;

    match state.orchestrator.begin(id).await {
        Ok(pending) => {
            // Detached: the task writes its result into the store when done
            drop(state.orchestrator.spawn(pending));
            Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "index": index,
                    "status": "in_progress",
                    "message": "Generating image..."
                })),
            ))
        }
        Err(outcome @ (GenerationOutcome::Skipped(_) | GenerationOutcome::Busy)) => {
            Err(AppError::Conflict(outcome.message()))
        }
        Err(GenerationOutcome::UnknownRecord) => Err(record_not_found(index)),
        Err(other) => Err(AppError::InternalError(format!(
            "Unexpected outcome before generation started: {:?}",
            other
        ))),
    }
}

/// DELETE /api/v1/records/:index/photo
pub async fn cancel_photo(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let id = resolve(&state, index).await?;

    if !state.orchestrator.cancel(id).await {
        return Err(AppError::Conflict(format!(
            "No photo generation in progress for record {}",
            index
        )));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "index": index, "status": "cancelling" })),
    ))
}

/// GET /api/v1/records/:index/export
///
/// Downloads the record's photo as a PNG attachment.
pub async fn export_record(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Response, AppError> {
    let store = state.store.lock().await;
    let record = store
        .records()
        .get(index)
        .ok_or_else(|| record_not_found(index))?;

    let bytes = photo_bytes(record).map_err(|e| match e {
        ExportError::MissingPhoto => AppError::Conflict(format!(
            "Record {} has no generated photo yet",
            index
        )),
        ExportError::CorruptPhoto(e) => AppError::InternalError(e.to_string()),
    })?;

    let format = ExportFormat::Png;
    let file_name = export_file_name(record, format);
    tracing::info!("Exporting record {} as {}", index, file_name);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn resolve(state: &AppState, index: usize) -> Result<RecordId, AppError> {
    state
        .store
        .lock()
        .await
        .id_at(index)
        .ok_or_else(|| record_not_found(index))
}

fn current_view(store: &RecordStore) -> Result<Json<RecordView>, AppError> {
    store
        .cursor()
        .and_then(|index| RecordView::from_store(store, index))
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No records loaded".to_string()))
}

fn record_not_found(index: usize) -> AppError {
    AppError::NotFound(format!("Record {} not found", index))
}
