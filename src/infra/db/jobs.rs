use async_trait::async_trait;
use gambit_export_types::{JobOutput, JobStatus, RenderJob};
use sqlx::types::Json;
use time::OffsetDateTime;

use crate::{
    application::repos::{RenderJobsRepo, RepoError},
    domain::entities::{JobCompletion, NewRenderJob},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct RenderJobRow {
    job_id: String,
    status: JobStatus,
    card_ids: Vec<String>,
    outputs: Json<Vec<JobOutput>>,
    error: Option<String>,
    created_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl From<RenderJobRow> for RenderJob {
    fn from(row: RenderJobRow) -> Self {
        Self {
            job_id: row.job_id,
            status: row.status,
            card_ids: row.card_ids,
            outputs: row.outputs.0,
            created_at: row.created_at,
            completed_at: row.completed_at,
            error: row.error,
        }
    }
}

#[async_trait]
impl RenderJobsRepo for PostgresRepositories {
    async fn insert_job(&self, job: NewRenderJob) -> Result<RenderJob, RepoError> {
        let row = sqlx::query_as::<_, RenderJobRow>(
            r#"
            INSERT INTO render_jobs (job_id, status, card_ids, created_at)
            VALUES ($1, 'queued', $2, $3)
            RETURNING job_id, status, card_ids, outputs, error, created_at, completed_at
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.card_ids)
        .bind(job.created_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn claim_next(&self) -> Result<Option<RenderJob>, RepoError> {
        let row = sqlx::query_as::<_, RenderJobRow>(
            r#"
            UPDATE render_jobs
               SET status = 'running',
                   claimed_at = now()
             WHERE job_id = (
                   SELECT job_id
                     FROM render_jobs
                    WHERE status = 'queued'
                    ORDER BY created_at, seq
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
             )
            RETURNING job_id, status, card_ids, outputs, error, created_at, completed_at
            "#,
        )
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn finish_running(
        &self,
        job_id: &str,
        completion: &JobCompletion,
        completed_at: OffsetDateTime,
    ) -> Result<Option<RenderJob>, RepoError> {
        let status = match completion {
            JobCompletion::Succeeded(_) => JobStatus::Succeeded,
            JobCompletion::Failed(_) => JobStatus::Failed,
        };

        let row = sqlx::query_as::<_, RenderJobRow>(
            r#"
            UPDATE render_jobs
               SET status = $2,
                   outputs = $3,
                   error = $4,
                   completed_at = $5
             WHERE job_id = $1
               AND status = 'running'
            RETURNING job_id, status, card_ids, outputs, error, created_at, completed_at
            "#,
        )
        .bind(job_id)
        .bind(status)
        .bind(Json(completion.outputs()))
        .bind(completion.error())
        .bind(completed_at)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<RenderJob>, RepoError> {
        let row = sqlx::query_as::<_, RenderJobRow>(
            r#"
            SELECT job_id, status, card_ids, outputs, error, created_at, completed_at
              FROM render_jobs
             WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }
}
