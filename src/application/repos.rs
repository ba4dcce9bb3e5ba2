//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use gambit_export_types::RenderJob;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::card::{ArtReference, CardDefinition, RuntimeValues, Versioned};
use crate::domain::entities::{ExportRecord, ExportUpsert, JobCompletion, NewRenderJob};
use crate::domain::template::TemplateManifest;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Durable render job storage.
#[async_trait]
pub trait RenderJobsRepo: Send + Sync {
    async fn insert_job(&self, job: NewRenderJob) -> Result<RenderJob, RepoError>;

    /// Flip the oldest queued job to running in one atomic step.
    async fn claim_next(&self) -> Result<Option<RenderJob>, RepoError>;

    /// Write a terminal state, but only if the job is currently running.
    ///
    /// Returns `None` when no running job with that id exists.
    async fn finish_running(
        &self,
        job_id: &str,
        completion: &JobCompletion,
        completed_at: OffsetDateTime,
    ) -> Result<Option<RenderJob>, RepoError>;

    async fn find_job(&self, job_id: &str) -> Result<Option<RenderJob>, RepoError>;
}

/// Latest-export-per-card storage.
#[async_trait]
pub trait ExportsRepo: Send + Sync {
    async fn upsert_export(&self, export: ExportUpsert) -> Result<ExportRecord, RepoError>;

    /// Write every record or none of them.
    async fn upsert_exports(
        &self,
        exports: Vec<ExportUpsert>,
    ) -> Result<Vec<ExportRecord>, RepoError>;

    /// Every record, most recently updated first.
    async fn list_exports(&self) -> Result<Vec<ExportRecord>, RepoError>;

    async fn find_export(&self, card_id: &str) -> Result<Option<ExportRecord>, RepoError>;
}

/// Read-only view of the catalog owned by the card studio.
#[async_trait]
pub trait CatalogRepo: Send + Sync {
    async fn find_card(&self, card_id: &str)
    -> Result<Option<Versioned<CardDefinition>>, RepoError>;

    async fn find_template(&self, template_id: &str)
    -> Result<Option<TemplateManifest>, RepoError>;

    async fn find_runtime(&self, card_id: &str) -> Result<Option<RuntimeValues>, RepoError>;

    async fn find_art(&self, asset_id: &str) -> Result<Option<ArtReference>, RepoError>;
}
