use async_trait::async_trait;

use crate::{
    application::repos::{CatalogRepo, RepoError},
    domain::{
        card::{ArtReference, CardDefinition, RuntimeValues, Versioned},
        template::TemplateManifest,
    },
};

use super::{PostgresRepositories, map_sqlx_error, util::decode_json};

#[derive(sqlx::FromRow)]
struct VersionedDocumentRow {
    document: serde_json::Value,
    version: i64,
}

#[derive(sqlx::FromRow)]
struct ArtRow {
    url: Option<String>,
    version: i64,
}

#[async_trait]
impl CatalogRepo for PostgresRepositories {
    async fn find_card(
        &self,
        card_id: &str,
    ) -> Result<Option<Versioned<CardDefinition>>, RepoError> {
        let row = sqlx::query_as::<_, VersionedDocumentRow>(
            "SELECT definition AS document, version FROM catalog_cards WHERE card_id = $1",
        )
        .bind(card_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            decode_json::<CardDefinition>(row.document, "card", card_id)
                .map(|card| Versioned::new(card, row.version))
        })
        .transpose()
    }

    async fn find_template(
        &self,
        template_id: &str,
    ) -> Result<Option<TemplateManifest>, RepoError> {
        let row = sqlx::query_as::<_, VersionedDocumentRow>(
            "SELECT manifest AS document, version FROM catalog_templates WHERE template_id = $1",
        )
        .bind(template_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        // The row version is authoritative over whatever the document embeds.
        row.map(|row| {
            let mut document = row.document;
            if let Some(object) = document.as_object_mut() {
                object.insert("version".to_string(), row.version.into());
            }
            decode_json::<TemplateManifest>(document, "template", template_id)
        })
        .transpose()
    }

    async fn find_runtime(&self, card_id: &str) -> Result<Option<RuntimeValues>, RepoError> {
        let state = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT state FROM catalog_runtime WHERE card_id = $1",
        )
        .bind(card_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(state.map(RuntimeValues))
    }

    async fn find_art(&self, asset_id: &str) -> Result<Option<ArtReference>, RepoError> {
        let row = sqlx::query_as::<_, ArtRow>(
            "SELECT url, version FROM catalog_art_assets WHERE art_asset_id = $1",
        )
        .bind(asset_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| ArtReference {
            url: row.url,
            version: row.version,
        }))
    }
}
