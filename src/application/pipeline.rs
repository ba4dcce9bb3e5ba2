//! Reference resolution and the error taxonomy of the export pipeline.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::application::compose::ComposeInput;
use crate::application::exports::LedgerError;
use crate::application::queue::QueueError;
use crate::application::rasterize::{CardRasterizer, RenderError, RenderedCard};
use crate::application::repos::{CatalogRepo, RepoError};
use crate::application::storage::StorageError;
use crate::domain::card::{ArtReference, CardDefinition, RuntimeValues, Versioned};
use crate::domain::entities::Fingerprint;
use crate::domain::template::TemplateManifest;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    ReferenceNotFound { entity: &'static str, id: String },
    #[error("render failed for {card_id}: {source}")]
    RenderFailure {
        card_id: String,
        #[source]
        source: RenderError,
    },
    #[error("{0}")]
    Transport(String),
}

impl PipelineError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Transport failures are retried by the daemon loop; everything else
    /// fails the current job only.
    pub fn is_transport(&self) -> bool {
        matches!(self, PipelineError::Transport(_))
    }
}

impl From<RepoError> for PipelineError {
    fn from(err: RepoError) -> Self {
        Self::transport(err)
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        Self::transport(err)
    }
}

impl From<LedgerError> for PipelineError {
    fn from(err: LedgerError) -> Self {
        Self::transport(err)
    }
}

impl From<QueueError> for PipelineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Validation(message) => Self::Validation(message),
            QueueError::ReferenceNotFound { entity, id } => Self::ReferenceNotFound { entity, id },
            other => Self::transport(other),
        }
    }
}

/// Every input needed to render one card, with the versions it was read at.
#[derive(Debug, Clone)]
pub struct ResolvedCard {
    pub card: Versioned<CardDefinition>,
    pub template: TemplateManifest,
    pub runtime: RuntimeValues,
    pub art: ArtReference,
}

impl ResolvedCard {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            template_version: self.template.version,
            card_version: self.card.version,
            art_version: self.art.version,
        }
    }
}

#[derive(Clone)]
pub struct CardResolver {
    catalog: Arc<dyn CatalogRepo>,
}

impl CardResolver {
    pub fn new(catalog: Arc<dyn CatalogRepo>) -> Self {
        Self { catalog }
    }

    /// Load card, template, runtime values and art for one card.
    ///
    /// A missing card or template is an error. Missing runtime values fall
    /// back to the card's base stats and missing art to the placeholder.
    pub async fn resolve(&self, card_id: &str) -> Result<ResolvedCard, PipelineError> {
        let card = self
            .catalog
            .find_card(card_id)
            .await?
            .ok_or_else(|| PipelineError::ReferenceNotFound {
                entity: "Card",
                id: card_id.to_string(),
            })?;

        let template_id = card.value.template_id.clone();
        let template = self
            .catalog
            .find_template(&template_id)
            .await?
            .ok_or(PipelineError::ReferenceNotFound {
                entity: "Template",
                id: template_id,
            })?;
        template
            .ensure_renderable()
            .map_err(|err| PipelineError::Validation(err.to_string()))?;

        let runtime = match self.catalog.find_runtime(card_id).await? {
            Some(runtime) => runtime,
            None => RuntimeValues::initial_for(&card.value),
        };

        let art = match card.value.art_asset_id.as_deref() {
            Some(asset_id) => self
                .catalog
                .find_art(asset_id)
                .await?
                .unwrap_or_else(ArtReference::missing),
            None => ArtReference::missing(),
        };

        Ok(ResolvedCard {
            card,
            template,
            runtime,
            art,
        })
    }
}

/// A self-contained render request that bypasses the catalog and the queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPayload {
    pub card: CardDefinition,
    pub template: TemplateManifest,
    #[serde(default)]
    pub runtime: Option<serde_json::Value>,
    #[serde(default)]
    pub art_url: Option<String>,
}

impl RenderPayload {
    pub async fn render(&self, rasterizer: &CardRasterizer) -> Result<RenderedCard, PipelineError> {
        self.template
            .ensure_renderable()
            .map_err(|err| PipelineError::Validation(err.to_string()))?;
        if self.card.card_id.trim().is_empty() {
            return Err(PipelineError::Validation("card.cardId is required".to_string()));
        }

        let runtime = match &self.runtime {
            Some(value) if !value.is_null() => RuntimeValues(value.clone()),
            _ => RuntimeValues::initial_for(&self.card),
        };

        rasterizer
            .render(ComposeInput {
                template: &self.template,
                card: &self.card,
                runtime: &runtime,
                art_url: self.art_url.as_deref(),
            })
            .await
            .map_err(|source| PipelineError::RenderFailure {
                card_id: self.card.card_id.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::InMemoryRepositories;
    use serde_json::json;

    fn card(art_asset_id: Option<&str>) -> CardDefinition {
        serde_json::from_value(json!({
            "cardId": "c1",
            "name": "Ember Warden",
            "type": "unit",
            "rarity": "rare",
            "locale": "en",
            "templateId": "unit-default",
            "artAssetId": art_asset_id,
            "baseStats": { "attack": 2.0 }
        }))
        .expect("card")
    }

    fn template() -> TemplateManifest {
        serde_json::from_value(json!({
            "templateId": "unit-default",
            "cardType": "unit",
            "baseResolution": { "width": 750, "height": 1050 },
            "layers": [],
            "version": 4
        }))
        .expect("template")
    }

    #[tokio::test]
    async fn missing_runtime_and_art_fall_back() {
        let repos = Arc::new(InMemoryRepositories::new());
        repos.put_card(card(Some("art_gone")), 2).await;
        repos.put_template(template()).await;

        let resolved = CardResolver::new(repos)
            .resolve("c1")
            .await
            .expect("resolved");
        assert_eq!(resolved.runtime, RuntimeValues::initial_for(&resolved.card.value));
        assert_eq!(resolved.art, ArtReference::missing());
        assert_eq!(
            resolved.fingerprint(),
            Fingerprint {
                template_version: 4,
                card_version: 2,
                art_version: 0,
            }
        );
    }

    #[tokio::test]
    async fn unknown_card_and_template_are_reference_errors() {
        let repos = Arc::new(InMemoryRepositories::new());
        repos.put_card(card(None), 1).await;
        let resolver = CardResolver::new(repos);

        let err = resolver.resolve("c404").await.expect_err("missing card");
        assert_eq!(err.to_string(), "Card not found: c404");

        let err = resolver.resolve("c1").await.expect_err("missing template");
        assert_eq!(err.to_string(), "Template not found: unit-default");
        assert!(!err.is_transport());
    }

    #[test]
    fn queue_reference_errors_keep_their_kind() {
        let err = PipelineError::from(QueueError::ReferenceNotFound {
            entity: "Card",
            id: "c2".to_string(),
        });
        assert!(matches!(err, PipelineError::ReferenceNotFound { .. }));
        assert!(PipelineError::from(QueueError::JobNotFound("job_1".into())).is_transport());
    }
}
