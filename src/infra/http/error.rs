use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::ErrorReport;
use crate::application::exports::LedgerError;
use crate::application::pipeline::PipelineError;
use crate::application::queue::QueueError;
use crate::application::rasterize::RenderError;
use crate::application::repos::RepoError;
use crate::application::storage::StorageError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const REFERENCE_NOT_FOUND: &str = "reference_not_found";
    pub const CONFLICT: &str = "conflict";
    pub const DUPLICATE: &str = "duplicate";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INTEGRITY: &str = "integrity_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const STORAGE: &str = "storage_error";
    pub const RENDER: &str = "render_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!(
                "{}: {}",
                self.code,
                self.hint.as_deref().unwrap_or(self.message)
            ),
        );
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}

pub(crate) fn repo_to_api(err: RepoError) -> ApiError {
    match err {
        RepoError::Duplicate { constraint } => ApiError::new(
            StatusCode::CONFLICT,
            codes::DUPLICATE,
            "Duplicate record",
            Some(constraint),
        ),
        RepoError::NotFound => ApiError::not_found("resource not found"),
        RepoError::InvalidInput { message } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Invalid input",
            Some(message),
        ),
        RepoError::Integrity { message } => ApiError::new(
            StatusCode::CONFLICT,
            codes::INTEGRITY,
            "Integrity constraint violated",
            Some(message),
        ),
        RepoError::Timeout => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::DB_TIMEOUT,
            "Database timeout",
            None,
        ),
        RepoError::Persistence(message) => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::REPO,
            "Persistence error",
            Some(message),
        ),
    }
}

pub(crate) fn queue_to_api(err: QueueError) -> ApiError {
    match err {
        QueueError::Validation(message) => {
            ApiError::bad_request("Invalid render job request", Some(message))
        }
        err @ QueueError::ReferenceNotFound { .. } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::REFERENCE_NOT_FOUND,
            "Unknown reference",
            Some(err.to_string()),
        ),
        QueueError::JobNotFound(_) => ApiError::not_found("render job not found"),
        err @ QueueError::Conflict { .. } => ApiError::new(
            StatusCode::CONFLICT,
            codes::CONFLICT,
            "Render job already completed",
            Some(err.to_string()),
        ),
        QueueError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn ledger_to_api(err: LedgerError) -> ApiError {
    match err {
        LedgerError::Repo(repo) => repo_to_api(repo),
        LedgerError::Storage(storage) => storage_to_api(storage),
    }
}

pub(crate) fn storage_to_api(err: StorageError) -> ApiError {
    match err {
        StorageError::InvalidReference(_) => ApiError::not_found("artifact not found"),
        StorageError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            ApiError::not_found("artifact not found")
        }
        other => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::STORAGE,
            "Artifact storage unavailable",
            Some(other.to_string()),
        ),
    }
}

pub(crate) fn pipeline_to_api(err: PipelineError) -> ApiError {
    match err {
        PipelineError::Validation(message) => {
            ApiError::bad_request("Invalid render request", Some(message))
        }
        err @ PipelineError::ReferenceNotFound { .. } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::REFERENCE_NOT_FOUND,
            "Unknown reference",
            Some(err.to_string()),
        ),
        PipelineError::RenderFailure { source, .. } => render_to_api(source),
        PipelineError::Transport(message) => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::REPO,
            "Backing service unavailable",
            Some(message),
        ),
    }
}

pub(crate) fn render_to_api(err: RenderError) -> ApiError {
    ApiError::new(
        StatusCode::BAD_GATEWAY,
        codes::RENDER,
        "Render failed",
        Some(err.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_carries_code_and_hint() {
        let response = ApiError::bad_request("Invalid render request", Some("missing card".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.messages, vec!["bad_request: missing card".to_string()]);
    }

    #[test]
    fn queue_errors_map_to_statuses() {
        assert_eq!(
            queue_to_api(QueueError::JobNotFound("job_x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            queue_to_api(QueueError::ReferenceNotFound {
                entity: "Card",
                id: "c1".into()
            })
            .code(),
            codes::REFERENCE_NOT_FOUND
        );
        assert_eq!(
            queue_to_api(QueueError::Repo(RepoError::Timeout)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn render_failures_are_bad_gateway() {
        let err = pipeline_to_api(PipelineError::RenderFailure {
            card_id: "c1".into(),
            source: RenderError::InvalidImage,
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), codes::RENDER);
    }
}
