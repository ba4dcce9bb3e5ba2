use async_trait::async_trait;
use gambit_export_types::RenderManifest;
use sqlx::{Postgres, Transaction, types::Json};
use time::OffsetDateTime;

use crate::{
    application::repos::{ExportsRepo, RepoError},
    domain::entities::{ExportRecord, ExportUpsert, Fingerprint},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ExportRow {
    card_id: String,
    template_version: i64,
    card_version: i64,
    art_version: i64,
    artifact_ref: String,
    checksum_sha256: String,
    manifest: Json<RenderManifest>,
    updated_at: OffsetDateTime,
}

impl From<ExportRow> for ExportRecord {
    fn from(row: ExportRow) -> Self {
        Self {
            card_id: row.card_id,
            fingerprint: Fingerprint {
                template_version: row.template_version,
                card_version: row.card_version,
                art_version: row.art_version,
            },
            artifact_ref: row.artifact_ref,
            checksum_sha256: row.checksum_sha256,
            manifest: row.manifest.0,
            updated_at: row.updated_at,
        }
    }
}

const UPSERT_EXPORT: &str = r#"
    INSERT INTO card_exports (
        card_id, template_version, card_version, art_version,
        artifact_ref, checksum_sha256, manifest, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, clock_timestamp())
    ON CONFLICT (card_id) DO UPDATE
       SET template_version = EXCLUDED.template_version,
           card_version = EXCLUDED.card_version,
           art_version = EXCLUDED.art_version,
           artifact_ref = EXCLUDED.artifact_ref,
           checksum_sha256 = EXCLUDED.checksum_sha256,
           manifest = EXCLUDED.manifest,
           updated_at = EXCLUDED.updated_at
    RETURNING card_id, template_version, card_version, art_version,
              artifact_ref, checksum_sha256, manifest, updated_at
"#;

impl PostgresRepositories {
    async fn upsert_export_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        export: &ExportUpsert,
    ) -> Result<ExportRecord, RepoError> {
        let row = sqlx::query_as::<_, ExportRow>(UPSERT_EXPORT)
            .bind(&export.card_id)
            .bind(export.fingerprint.template_version)
            .bind(export.fingerprint.card_version)
            .bind(export.fingerprint.art_version)
            .bind(&export.artifact_ref)
            .bind(&export.checksum_sha256)
            .bind(Json(&export.manifest))
            .fetch_one(tx.as_mut())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.into())
    }
}

#[async_trait]
impl ExportsRepo for PostgresRepositories {
    async fn upsert_export(&self, export: ExportUpsert) -> Result<ExportRecord, RepoError> {
        let mut records = self.upsert_exports(vec![export]).await?;
        records.pop().ok_or(RepoError::NotFound)
    }

    async fn upsert_exports(
        &self,
        exports: Vec<ExportUpsert>,
    ) -> Result<Vec<ExportRecord>, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;
        let mut records = Vec::with_capacity(exports.len());
        for export in &exports {
            records.push(self.upsert_export_in(&mut tx, export).await?);
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(records)
    }

    async fn list_exports(&self) -> Result<Vec<ExportRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ExportRow>(
            r#"
            SELECT card_id, template_version, card_version, art_version,
                   artifact_ref, checksum_sha256, manifest, updated_at
              FROM card_exports
             ORDER BY updated_at DESC, card_id
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_export(&self, card_id: &str) -> Result<Option<ExportRecord>, RepoError> {
        let row = sqlx::query_as::<_, ExportRow>(
            r#"
            SELECT card_id, template_version, card_version, art_version,
                   artifact_ref, checksum_sha256, manifest, updated_at
              FROM card_exports
             WHERE card_id = $1
            "#,
        )
        .bind(card_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }
}
