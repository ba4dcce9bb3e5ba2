//! Export ledger: latest successful render per card.

use std::sync::Arc;

use gambit_export_types::{DownloadLink, ExportEntry, ExportManifest, RenderManifest};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::application::repos::{ExportsRepo, RepoError};
use crate::application::storage::{ObjectStorage, StorageError};
use crate::domain::entities::{ExportRecord, ExportUpsert, Fingerprint};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct ExportLedgerService {
    repo: Arc<dyn ExportsRepo>,
    storage: Arc<dyn ObjectStorage>,
}

impl ExportLedgerService {
    pub fn new(repo: Arc<dyn ExportsRepo>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { repo, storage }
    }

    /// Replace whatever the ledger holds for the card.
    pub async fn upsert_export(
        &self,
        card_id: &str,
        fingerprint: Fingerprint,
        artifact_ref: &str,
        checksum_sha256: &str,
        manifest: RenderManifest,
    ) -> Result<ExportRecord, LedgerError> {
        let record = self
            .repo
            .upsert_export(ExportUpsert {
                card_id: card_id.to_string(),
                fingerprint,
                artifact_ref: artifact_ref.to_string(),
                checksum_sha256: checksum_sha256.to_string(),
                manifest,
            })
            .await?;
        debug!(
            target = "application::exports",
            op = "upsert_export",
            card_id = %record.card_id,
            checksum = %record.checksum_sha256,
            "Export record written"
        );
        Ok(record)
    }

    /// Write one record per card as a single unit; on error nothing is kept.
    pub async fn upsert_exports(
        &self,
        exports: Vec<ExportUpsert>,
    ) -> Result<Vec<ExportRecord>, LedgerError> {
        let cards = exports.len();
        let records = self.repo.upsert_exports(exports).await?;
        debug!(
            target = "application::exports",
            op = "upsert_exports",
            cards,
            "Export records written"
        );
        Ok(records)
    }

    /// All records, newest first, with artifact references resolved to URLs.
    pub async fn get_manifest(&self) -> Result<ExportManifest, LedgerError> {
        let records = self.repo.list_exports().await?;
        let generated_at = records
            .iter()
            .map(|record| record.updated_at)
            .max()
            .unwrap_or_else(OffsetDateTime::now_utc);

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let png_url = self.storage.url_for(&record.artifact_ref).await?;
            entries.push(ExportEntry {
                card_id: record.card_id,
                template_version: record.fingerprint.template_version,
                card_version: record.fingerprint.card_version,
                art_version: record.fingerprint.art_version,
                checksum_sha256: record.checksum_sha256,
                artifact_ref: record.artifact_ref,
                png_url,
                manifest: record.manifest,
                updated_at: record.updated_at,
            });
        }

        Ok(ExportManifest {
            generated_at,
            entries,
        })
    }

    pub async fn download_png(&self, card_id: &str) -> Result<Option<DownloadLink>, LedgerError> {
        let Some(record) = self.repo.find_export(card_id).await? else {
            return Ok(None);
        };
        let url = self.storage.url_for(&record.artifact_ref).await?;
        Ok(Some(DownloadLink {
            card_id: record.card_id,
            url,
        }))
    }

    /// Whether the stored export was produced from exactly these versions.
    pub async fn is_fresh(
        &self,
        card_id: &str,
        fingerprint: &Fingerprint,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .repo
            .find_export(card_id)
            .await?
            .is_some_and(|record| record.is_fresh(fingerprint)))
    }
}
