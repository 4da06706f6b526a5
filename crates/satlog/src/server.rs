//! HTTP surface over the ingest coordinator and the query layer.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use satlog_core::error::ResetError;
use satlog_core::{
    maintenance, AccessGate, Aggregation, DuplicatePolicy, EditError, ImportOutcome,
    IngestCoordinator, IngestError, IngestRequest, ListPage, ListParams, QueryError, QueryService,
    RecordEditor, RecordStore, SatlogConfig, StatsParams, StoredRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

/// Request bodies above this size are refused by the extractor.
const BODY_LIMIT: usize = 32 * 1024 * 1024;

pub struct AppState {
    pub coordinator: IngestCoordinator,
    pub queries: QueryService,
    pub editor: RecordEditor,
    pub store: Arc<dyn RecordStore>,
    pub gate: Arc<dyn AccessGate>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gate: Arc<dyn AccessGate>,
        config: &SatlogConfig,
    ) -> Self {
        Self {
            coordinator: IngestCoordinator::new(
                store.clone(),
                gate.clone(),
                &config.ingest,
                config.validation.clone(),
            ),
            queries: QueryService::new(store.clone()),
            editor: RecordEditor::new(store.clone(), gate.clone(), config.validation.clone()),
            store,
            gate,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/import", post(import))
        .route("/api/records", get(list_records).delete(delete_by_plan))
        .route(
            "/api/records/{id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/api/stats", get(stats))
        .route("/api/clear", delete(clear))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// Binds the configured address and serves until the process is stopped.
pub async fn serve(state: Arc<AppState>, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(address = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBody {
    #[serde(default)]
    pub records: Vec<Value>,
    pub duplicate_policy: Option<DuplicatePolicy>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub success: bool,
    pub batch_id: Uuid,
    pub dry_run: bool,
    pub policy: DuplicatePolicy,
    pub digest: String,
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<ImportOutcome>,
}

async fn import(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ImportBody>, JsonRejection>,
) -> Result<Json<ImportResponse>, ApiError> {
    let Json(body) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let report = state
        .coordinator
        .ingest(IngestRequest {
            records: body.records,
            policy: body.duplicate_policy,
            dry_run: body.dry_run,
            credential: credential(&headers),
        })
        .await?;

    let errors = report.failures().cloned().collect();
    Ok(Json(ImportResponse {
        success: true,
        batch_id: report.batch_id,
        dry_run: report.dry_run,
        policy: report.policy,
        digest: report.digest,
        total: report.total_attempted,
        inserted: report.inserted_count,
        updated: report.updated_count,
        skipped: report.skipped_count,
        failed: report.failed_count,
        errors,
    }))
}

async fn list_records(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ListPage>, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Ok(Json(state.queries.list(&params).await?))
}

fn record_id(id: &str) -> Result<i64, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("'{id}' is not a record id")))
}

async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StoredRecord>, ApiError> {
    Ok(Json(state.queries.get(record_id(&id)?).await?))
}

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub record: StoredRecord,
}

async fn update_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let id = record_id(&id)?;
    let Json(body) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    if !body.is_object() {
        return Err(ApiError::BadRequest("expected a JSON object".to_string()));
    }

    let credential = credential(&headers);
    let record = state
        .editor
        .update(id, &body, credential.as_deref())
        .await?;
    Ok(Json(UpdateResponse {
        success: true,
        record,
    }))
}

async fn delete_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let id = record_id(&id)?;
    let credential = credential(&headers);
    state.editor.delete(id, credential.as_deref()).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanQuery {
    pub plan_id: Option<String>,
}

async fn delete_by_plan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    params: Result<Query<PlanQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let plan_id = params
        .plan_id
        .filter(|plan| !plan.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("planId is required".to_string()))?;

    let credential = credential(&headers);
    let removed = state
        .editor
        .delete_by_plan(&plan_id, credential.as_deref())
        .await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

async fn stats(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StatsParams>, QueryRejection>,
) -> Result<Json<Aggregation>, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Ok(Json(state.queries.aggregate(&params).await?))
}

async fn clear(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let credential = credential(&headers);
    let removed =
        maintenance::clear(state.store.as_ref(), state.gate.as_ref(), credential.as_deref())
            .await?;
    Ok(Json(json!({ "success": true, "removed": removed })))
}

/// `x-api-key` wins over `Authorization: Bearer`.
fn credential(headers: &HeaderMap) -> Option<String> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    let bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
    };
    api_key
        .or_else(bearer)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Reset(#[from] ResetError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Ingest(err) => match err {
                IngestError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
                IngestError::EmptyBatch => (StatusCode::BAD_REQUEST, "EMPTY_BATCH"),
                IngestError::BatchTooLarge { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "BATCH_TOO_LARGE")
                }
                IngestError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                IngestError::Transaction(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "TRANSACTION_FAULT")
                }
            },
            ApiError::Query(err) => match err {
                QueryError::InvalidParameter { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_PARAMETER")
                }
                QueryError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                QueryError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::Reset(err) => match err {
                ResetError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
                ResetError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::Edit(err) => match err {
                EditError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
                EditError::Rejected(_) => (StatusCode::BAD_REQUEST, "RECORD_REJECTED"),
                EditError::NotFound(_) | EditError::PlanNotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND")
                }
                EditError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
                EditError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        };

        if status.is_server_error() {
            error!(error = %self, code, "request failed");
        }

        let body = json!({
            "error": self.to_string(),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}
