//! Wire types shared by the gambit-export service and its clients.
//!
//! Field names serialize in camelCase to match the studio front end.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle state of a render job.
///
/// `Succeeded` and `Failed` are terminal; a job never returns to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(
    feature = "sqlx",
    derive(sqlx::Type),
    sqlx(type_name = "render_job_status", rename_all = "lowercase")
)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendered card reported back on a succeeded job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    pub card_id: String,
    pub artifact_ref: String,
    pub checksum_sha256: String,
    pub template_version: i64,
    pub card_version: i64,
    pub art_version: i64,
}

/// A queued unit of work naming one or more cards to export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub job_id: String,
    pub status: JobStatus,
    pub card_ids: Vec<String>,
    pub outputs: Vec<JobOutput>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Metadata describing how a single export was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderManifest {
    pub card_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub template_id: String,
    pub variant: String,
    pub applied_overlay_ids: Vec<String>,
}

/// Ledger entry as exposed by the manifest endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEntry {
    pub card_id: String,
    pub template_version: i64,
    pub card_version: i64,
    pub art_version: i64,
    pub checksum_sha256: String,
    pub artifact_ref: String,
    pub png_url: Option<String>,
    pub manifest: RenderManifest,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Every export record, most recently updated first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub entries: Vec<ExportEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLink {
    pub card_id: String,
    pub url: Option<String>,
}

/// Body accepted by the enqueue endpoint: either a single card or a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRenderJobRequest {
    #[serde(default)]
    pub card_id: Option<String>,
    #[serde(default)]
    pub card_ids: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn render_job_serializes_camel_case_without_empty_optionals() {
        let job = RenderJob {
            job_id: "job_1".to_string(),
            status: JobStatus::Queued,
            card_ids: vec!["c1".to_string(), "c2".to_string()],
            outputs: Vec::new(),
            created_at: datetime!(2026-01-02 03:04:05 UTC),
            completed_at: None,
            error: None,
        };

        let value = serde_json::to_value(&job).expect("serialize job");
        assert_eq!(value["status"], "queued");
        assert_eq!(value["cardIds"], serde_json::json!(["c1", "c2"]));
        assert_eq!(value["createdAt"], "2026-01-02T03:04:05Z");
        assert!(value.get("completedAt").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn enqueue_request_accepts_either_shape() {
        let single: EnqueueRenderJobRequest =
            serde_json::from_str(r#"{"cardId":"c1"}"#).expect("single");
        assert_eq!(single.card_id.as_deref(), Some("c1"));
        assert!(single.card_ids.is_none());

        let batch: EnqueueRenderJobRequest =
            serde_json::from_str(r#"{"cardIds":["c1","c2"]}"#).expect("batch");
        assert_eq!(batch.card_ids.map(|ids| ids.len()), Some(2));
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
