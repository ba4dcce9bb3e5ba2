#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::Mutex;

use gambit_export::application::compose::Compositor;
use gambit_export::application::rasterize::{
    CardRasterizer, RenderContext, RenderEngine, RenderError, checksum_sha256,
};
use gambit_export::application::storage::{ObjectStorage, StorageError};
use gambit_export::domain::card::CardDefinition;
use gambit_export::domain::template::{Resolution, TemplateManifest};
use gambit_export::infra::memory::InMemoryRepositories;

pub const TEMPLATE_ID: &str = "tpl_creature";

pub fn template(template_id: &str) -> TemplateManifest {
    serde_json::from_value(json!({
        "templateId": template_id,
        "cardType": "creature",
        "baseResolution": { "width": 750, "height": 1050 },
        "layers": [
            { "layerId": "frame", "zIndex": 0, "kind": "shape", "src": "frame" }
        ],
        "dynamicRegions": [
            {
                "regionId": "name",
                "kind": "text",
                "bindKey": "card.name",
                "rect": { "x": 0.08, "y": 0.05, "w": 0.84, "h": 0.06 },
                "autoFit": true,
                "zIndex": 2
            },
            {
                "regionId": "attack",
                "kind": "stat",
                "bindKey": "stats.attack",
                "rect": { "x": 0.08, "y": 0.88, "w": 0.12, "h": 0.06 },
                "zIndex": 3
            }
        ],
        "variantOverlays": {
            "foil": [ { "id": "foil-sheen", "src": "overlay://foil", "blendMode": "screen" } ]
        },
        "version": 3
    }))
    .expect("template fixture")
}

pub fn card(card_id: &str, template_id: &str) -> CardDefinition {
    serde_json::from_value(json!({
        "cardId": card_id,
        "name": format!("Card {card_id}"),
        "type": "creature",
        "rarity": "rare",
        "variant": "base",
        "locale": "en",
        "templateId": template_id,
        "baseStats": { "attack": 3.0, "health": 4.0 }
    }))
    .expect("card fixture")
}

/// Repositories seeded with one template and the given cards, all using it.
pub async fn seeded_repositories(card_ids: &[&str]) -> Arc<InMemoryRepositories> {
    let repos = Arc::new(InMemoryRepositories::new());
    repos.put_template(template(TEMPLATE_ID)).await;
    for card_id in card_ids {
        repos.put_card(card(card_id, TEMPLATE_ID), 1).await;
    }
    repos
}

/// Minimal PNG signature plus IHDR header for the given size.
pub fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    png.extend_from_slice(&13u32.to_be_bytes());
    png.extend_from_slice(b"IHDR");
    png.extend_from_slice(&width.to_be_bytes());
    png.extend_from_slice(&height.to_be_bytes());
    png.extend_from_slice(&[8, 6, 0, 0, 0]);
    png.extend_from_slice(&[0, 0, 0, 0]);
    png
}

/// Engine that "captures" a PNG header of the requested size followed by a
/// digest of the loaded document, so distinct documents give distinct bytes.
/// It can be told to fail for documents containing a marker.
#[derive(Default)]
pub struct FakeEngine {
    fail_marker: Option<String>,
    capture_delay: Option<Duration>,
    pub documents: Arc<Mutex<Vec<String>>>,
}

impl FakeEngine {
    pub fn failing_when(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn slow(capture_delay: Duration) -> Self {
        Self {
            capture_delay: Some(capture_delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, RenderError> {
        Ok(Box::new(FakeContext {
            fail_marker: self.fail_marker.clone(),
            capture_delay: self.capture_delay,
            documents: Arc::clone(&self.documents),
            document: None,
        }))
    }
}

struct FakeContext {
    fail_marker: Option<String>,
    capture_delay: Option<Duration>,
    documents: Arc<Mutex<Vec<String>>>,
    document: Option<String>,
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn load(&mut self, document: &str) -> Result<(), RenderError> {
        self.documents.lock().await.push(document.to_string());
        self.document = Some(document.to_string());
        Ok(())
    }

    async fn capture(&mut self, viewport: Resolution) -> Result<Vec<u8>, RenderError> {
        let document = self.document.as_deref().ok_or(RenderError::NothingLoaded)?;
        if let Some(marker) = self.fail_marker.as_deref() {
            if document.contains(marker) {
                return Err(RenderError::Protocol(format!("refused to render {marker}")));
            }
        }
        if let Some(delay) = self.capture_delay {
            tokio::time::sleep(delay).await;
        }
        let mut png = png_header(viewport.width, viewport.height);
        png.extend_from_slice(checksum_sha256(document.as_bytes()).as_bytes());
        Ok(png)
    }
}

pub fn rasterizer(engine: FakeEngine) -> CardRasterizer {
    CardRasterizer::new(Arc::new(engine), Compositor::default())
}

/// Object storage kept in memory; ids are sequential.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, (String, Bytes)>>,
    offline: bool,
}

impl MemoryStorage {
    pub fn offline() -> Self {
        Self {
            objects: Mutex::default(),
            offline: true,
        }
    }

    pub async fn object(&self, storage_id: &str) -> Option<(String, Bytes)> {
        self.objects.lock().await.get(storage_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn generate_upload_url(&self, purpose: &str) -> Result<String, StorageError> {
        if self.offline {
            return Err(StorageError::UnexpectedResponse {
                status: 503,
                body: "storage offline".to_string(),
            });
        }
        Ok(format!("memory://{purpose}"))
    }

    async fn upload(
        &self,
        _upload_url: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, StorageError> {
        let mut objects = self.objects.lock().await;
        let storage_id = format!("obj_{}", objects.len() + 1);
        objects.insert(storage_id.clone(), (content_type.to_string(), bytes));
        Ok(storage_id)
    }

    async fn url_for(&self, storage_id: &str) -> Result<Option<String>, StorageError> {
        let objects = self.objects.lock().await;
        Ok(objects
            .contains_key(storage_id)
            .then(|| format!("https://cdn.test/{storage_id}")))
    }
}
