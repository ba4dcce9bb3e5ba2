//! In-process repositories for database-less runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use gambit_export_types::{JobStatus, RenderJob};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::{
    application::repos::{CatalogRepo, ExportsRepo, RenderJobsRepo, RepoError},
    domain::{
        card::{ArtReference, CardDefinition, RuntimeValues, Versioned},
        entities::{ExportRecord, ExportUpsert, JobCompletion, NewRenderJob},
        template::TemplateManifest,
    },
};

#[derive(Default)]
struct MemoryState {
    next_seq: u64,
    jobs: Vec<(u64, RenderJob)>,
    exports: HashMap<String, (u64, ExportRecord)>,
    cards: HashMap<String, Versioned<CardDefinition>>,
    templates: HashMap<String, TemplateManifest>,
    runtime: HashMap<String, RuntimeValues>,
    art: HashMap<String, ArtReference>,
}

impl MemoryState {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn upsert_export(&mut self, export: ExportUpsert) -> ExportRecord {
        let revision = self.bump();
        let record = ExportRecord {
            card_id: export.card_id,
            fingerprint: export.fingerprint,
            artifact_ref: export.artifact_ref,
            checksum_sha256: export.checksum_sha256,
            manifest: export.manifest,
            updated_at: OffsetDateTime::now_utc(),
        };
        self.exports
            .insert(record.card_id.clone(), (revision, record.clone()));
        record
    }
}

/// Every repository trait behind one mutex, so each call is a single
/// critical section.
#[derive(Default)]
pub struct InMemoryRepositories {
    state: Mutex<MemoryState>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_card(&self, card: CardDefinition, version: i64) {
        let mut state = self.state.lock().await;
        state
            .cards
            .insert(card.card_id.clone(), Versioned::new(card, version));
    }

    pub async fn put_template(&self, template: TemplateManifest) {
        let mut state = self.state.lock().await;
        state
            .templates
            .insert(template.template_id.clone(), template);
    }

    pub async fn put_runtime(&self, card_id: &str, runtime: RuntimeValues) {
        let mut state = self.state.lock().await;
        state.runtime.insert(card_id.to_string(), runtime);
    }

    pub async fn put_art(&self, asset_id: &str, art: ArtReference) {
        let mut state = self.state.lock().await;
        state.art.insert(asset_id.to_string(), art);
    }
}

#[async_trait]
impl RenderJobsRepo for InMemoryRepositories {
    async fn insert_job(&self, job: NewRenderJob) -> Result<RenderJob, RepoError> {
        let mut state = self.state.lock().await;
        if state.jobs.iter().any(|(_, stored)| stored.job_id == job.job_id) {
            return Err(RepoError::Duplicate {
                constraint: "render_jobs_pkey".to_string(),
            });
        }
        let record = RenderJob {
            job_id: job.job_id,
            status: JobStatus::Queued,
            card_ids: job.card_ids,
            outputs: Vec::new(),
            created_at: job.created_at,
            completed_at: None,
            error: None,
        };
        let seq = state.bump();
        state.jobs.push((seq, record.clone()));
        Ok(record)
    }

    async fn claim_next(&self) -> Result<Option<RenderJob>, RepoError> {
        let mut state = self.state.lock().await;
        let oldest = state
            .jobs
            .iter_mut()
            .filter(|(_, job)| job.status == JobStatus::Queued)
            .min_by_key(|(seq, job)| (job.created_at, *seq));

        Ok(oldest.map(|(_, job)| {
            job.status = JobStatus::Running;
            job.clone()
        }))
    }

    async fn finish_running(
        &self,
        job_id: &str,
        completion: &JobCompletion,
        completed_at: OffsetDateTime,
    ) -> Result<Option<RenderJob>, RepoError> {
        let mut state = self.state.lock().await;
        let running = state
            .jobs
            .iter_mut()
            .find(|(_, job)| job.job_id == job_id && job.status == JobStatus::Running);

        Ok(running.map(|(_, job)| {
            job.status = match completion {
                JobCompletion::Succeeded(_) => JobStatus::Succeeded,
                JobCompletion::Failed(_) => JobStatus::Failed,
            };
            job.outputs = completion.outputs().to_vec();
            job.error = completion.error().map(str::to_string);
            job.completed_at = Some(completed_at);
            job.clone()
        }))
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<RenderJob>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .find(|(_, job)| job.job_id == job_id)
            .map(|(_, job)| job.clone()))
    }
}

#[async_trait]
impl ExportsRepo for InMemoryRepositories {
    async fn upsert_export(&self, export: ExportUpsert) -> Result<ExportRecord, RepoError> {
        let mut state = self.state.lock().await;
        Ok(state.upsert_export(export))
    }

    async fn upsert_exports(
        &self,
        exports: Vec<ExportUpsert>,
    ) -> Result<Vec<ExportRecord>, RepoError> {
        let mut state = self.state.lock().await;
        Ok(exports
            .into_iter()
            .map(|export| state.upsert_export(export))
            .collect())
    }

    async fn list_exports(&self) -> Result<Vec<ExportRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut records: Vec<&(u64, ExportRecord)> = state.exports.values().collect();
        records.sort_by(|(a_rev, a), (b_rev, b)| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b_rev.cmp(a_rev))
        });
        Ok(records.into_iter().map(|(_, record)| record.clone()).collect())
    }

    async fn find_export(&self, card_id: &str) -> Result<Option<ExportRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.exports.get(card_id).map(|(_, record)| record.clone()))
    }
}

#[async_trait]
impl CatalogRepo for InMemoryRepositories {
    async fn find_card(
        &self,
        card_id: &str,
    ) -> Result<Option<Versioned<CardDefinition>>, RepoError> {
        Ok(self.state.lock().await.cards.get(card_id).cloned())
    }

    async fn find_template(
        &self,
        template_id: &str,
    ) -> Result<Option<TemplateManifest>, RepoError> {
        Ok(self.state.lock().await.templates.get(template_id).cloned())
    }

    async fn find_runtime(&self, card_id: &str) -> Result<Option<RuntimeValues>, RepoError> {
        Ok(self.state.lock().await.runtime.get(card_id).cloned())
    }

    async fn find_art(&self, asset_id: &str) -> Result<Option<ArtReference>, RepoError> {
        Ok(self.state.lock().await.art.get(asset_id).cloned())
    }
}
