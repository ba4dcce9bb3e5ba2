use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use gambit_export_types::{EnqueueRenderJobRequest, RenderManifest};
use serde::Serialize;
use serde_json::json;

use crate::application::exports::ExportLedgerService;
use crate::application::pipeline::RenderPayload;
use crate::application::queue::RenderQueueService;

use super::error::{ApiError, ledger_to_api, pipeline_to_api, queue_to_api, storage_to_api};
use super::state::HttpState;

pub const SERVICE_NAME: &str = "gambit-export";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    pub png_base64: String,
    pub checksum_sha256: String,
    pub manifest: RenderManifest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: String,
}

pub async fn health(State(state): State<HttpState>) -> Response {
    let database = match &state.database {
        None => "disabled",
        Some(db) => match db.health_check().await {
            Ok(()) => "ok",
            Err(_) => "unavailable",
        },
    };
    let ok = database != "unavailable";
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "ok": ok,
        "service": SERVICE_NAME,
        "daemon": {
            "enabled": state.daemon.enabled(),
            "lastError": state.daemon.last_error(),
        },
        "database": database,
    });
    (status, Json(body)).into_response()
}

pub async fn render_card(
    State(state): State<HttpState>,
    payload: Result<Json<RenderPayload>, JsonRejection>,
) -> Result<Json<RenderResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        ApiError::bad_request("Invalid render request", Some(rejection.body_text()))
    })?;

    let rendered = payload
        .render(&state.rasterizer)
        .await
        .map_err(pipeline_to_api)?;

    Ok(Json(RenderResponse {
        png_base64: STANDARD.encode(&rendered.png),
        checksum_sha256: rendered.checksum_sha256,
        manifest: rendered.manifest,
    }))
}

pub async fn enqueue_render_job(
    State(state): State<HttpState>,
    payload: Result<Json<EnqueueRenderJobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let queue = queue(&state)?;
    let Json(request) = payload.map_err(|rejection| {
        ApiError::bad_request("Invalid render job request", Some(rejection.body_text()))
    })?;

    let job_id = match (request.card_ids, request.card_id) {
        (Some(card_ids), _) => queue.enqueue_batch(card_ids).await,
        (None, Some(card_id)) => queue.enqueue_single(&card_id).await,
        (None, None) => {
            return Err(ApiError::bad_request(
                "Invalid render job request",
                Some("cardId or cardIds is required".to_string()),
            ));
        }
    }
    .map_err(queue_to_api)?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { job_id })))
}

pub async fn get_render_job(
    State(state): State<HttpState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = queue(&state)?
        .get_job(&job_id)
        .await
        .map_err(queue_to_api)?;

    match job {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError::not_found("render job not found")),
    }
}

pub async fn export_manifest(
    State(state): State<HttpState>,
) -> Result<impl IntoResponse, ApiError> {
    let manifest = ledger(&state)?
        .get_manifest()
        .await
        .map_err(ledger_to_api)?;
    Ok(Json(manifest))
}

pub async fn export_png(
    State(state): State<HttpState>,
    Path(card_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let link = ledger(&state)?
        .download_png(&card_id)
        .await
        .map_err(ledger_to_api)?;

    match link {
        Some(link) => Ok(Json(link)),
        None => Err(ApiError::not_found("export not found")),
    }
}

pub async fn serve_artifact(
    State(state): State<HttpState>,
    Path(storage_id): Path<String>,
) -> Result<Response, ApiError> {
    let artifacts = state
        .artifacts
        .as_ref()
        .ok_or_else(|| ApiError::not_found("artifact not found"))?;
    let bytes = artifacts.read(&storage_id).await.map_err(storage_to_api)?;
    Ok(artifact_response(&storage_id, bytes))
}

fn artifact_response(storage_id: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(storage_id).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    response
}

fn queue(state: &HttpState) -> Result<&RenderQueueService, ApiError> {
    state
        .queue
        .as_deref()
        .ok_or_else(|| ApiError::not_found("render queue not configured"))
}

fn ledger(state: &HttpState) -> Result<&ExportLedgerService, ApiError> {
    state
        .ledger
        .as_deref()
        .ok_or_else(|| ApiError::not_found("export ledger not configured"))
}
