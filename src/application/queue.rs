//! Render job queue: enqueue, atomic claim and terminal completion.

use std::sync::Arc;

use gambit_export_types::{JobOutput, JobStatus, RenderJob};
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::repos::{CatalogRepo, RenderJobsRepo, RepoError};
use crate::domain::entities::{JobCompletion, NewRenderJob};

const METRIC_JOBS_TOTAL: &str = "gambit_export_jobs_total";

pub const DEFAULT_ERROR_MAX_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    ReferenceNotFound { entity: &'static str, id: String },
    #[error("render job `{0}` not found")]
    JobNotFound(String),
    #[error("render job `{job_id}` is {status} and cannot be completed with different results")]
    Conflict { job_id: String, status: JobStatus },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct RenderQueueService {
    jobs: Arc<dyn RenderJobsRepo>,
    catalog: Arc<dyn CatalogRepo>,
    error_max_chars: usize,
}

impl RenderQueueService {
    pub fn new(jobs: Arc<dyn RenderJobsRepo>, catalog: Arc<dyn CatalogRepo>) -> Self {
        Self {
            jobs,
            catalog,
            error_max_chars: DEFAULT_ERROR_MAX_CHARS,
        }
    }

    pub fn with_error_max_chars(mut self, max_chars: usize) -> Self {
        self.error_max_chars = max_chars;
        self
    }

    pub async fn enqueue_single(&self, card_id: &str) -> Result<String, QueueError> {
        self.enqueue_batch(vec![card_id.to_string()]).await
    }

    /// Queue one job covering every card, in the given order.
    pub async fn enqueue_batch(&self, card_ids: Vec<String>) -> Result<String, QueueError> {
        if card_ids.is_empty() {
            return Err(QueueError::Validation("cardIds is required".to_string()));
        }
        if card_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(QueueError::Validation(
                "cardIds must not contain blank ids".to_string(),
            ));
        }

        for card_id in &card_ids {
            if self.catalog.find_card(card_id).await?.is_none() {
                return Err(QueueError::ReferenceNotFound {
                    entity: "Card",
                    id: card_id.clone(),
                });
            }
        }

        let job = self
            .jobs
            .insert_job(NewRenderJob {
                job_id: new_job_id(),
                card_ids,
                created_at: OffsetDateTime::now_utc(),
            })
            .await?;

        counter!(METRIC_JOBS_TOTAL, "event" => "enqueued").increment(1);
        info!(
            target = "application::queue",
            op = "enqueue",
            job_id = %job.job_id,
            cards = job.card_ids.len(),
            "Render job queued"
        );
        Ok(job.job_id)
    }

    pub async fn claim_next(&self) -> Result<Option<RenderJob>, QueueError> {
        let claimed = self.jobs.claim_next().await?;
        if let Some(job) = claimed.as_ref() {
            counter!(METRIC_JOBS_TOTAL, "event" => "claimed").increment(1);
            info!(
                target = "application::queue",
                op = "claim_next",
                job_id = %job.job_id,
                cards = job.card_ids.len(),
                "Render job claimed"
            );
        }
        Ok(claimed)
    }

    /// Record the terminal outcome of a running job.
    ///
    /// An error discards `outputs`. Repeating a completion with the same
    /// arguments returns the stored job untouched.
    pub async fn complete(
        &self,
        job_id: &str,
        outputs: Vec<JobOutput>,
        error: Option<String>,
    ) -> Result<RenderJob, QueueError> {
        let error = error.map(|message| cap_chars(&message, self.error_max_chars));
        let completion = JobCompletion::new(outputs, error);

        if let Some(job) = self
            .jobs
            .finish_running(job_id, &completion, OffsetDateTime::now_utc())
            .await?
        {
            let event = match job.status {
                JobStatus::Failed => "failed",
                _ => "succeeded",
            };
            counter!(METRIC_JOBS_TOTAL, "event" => event).increment(1);
            info!(
                target = "application::queue",
                op = "complete",
                job_id = %job.job_id,
                result = event,
                outputs = job.outputs.len(),
                "Render job completed"
            );
            return Ok(job);
        }

        let stored = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if matches_completion(&stored, &completion) {
            return Ok(stored);
        }

        warn!(
            target = "application::queue",
            op = "complete",
            job_id = %stored.job_id,
            status = %stored.status,
            result = "conflict",
            "Rejected completion for a job that is not running"
        );
        Err(QueueError::Conflict {
            job_id: stored.job_id,
            status: stored.status,
        })
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<RenderJob>, QueueError> {
        Ok(self.jobs.find_job(job_id).await?)
    }
}

fn matches_completion(job: &RenderJob, completion: &JobCompletion) -> bool {
    let expected = match completion {
        JobCompletion::Succeeded(_) => JobStatus::Succeeded,
        JobCompletion::Failed(_) => JobStatus::Failed,
    };
    job.status == expected
        && job.outputs.as_slice() == completion.outputs()
        && job.error.as_deref() == completion.error()
}

fn new_job_id() -> String {
    format!("job_{}", Uuid::new_v4().simple())
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn cap_chars(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _)) => message[..byte_index].to_string(),
        None => message.to_string(),
    }
}
