//! Rasterization seam: composed documents in, verified PNG bytes out.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use gambit_export_types::RenderManifest;
use metrics::histogram;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::compose::{ComposeInput, Compositor};
use crate::domain::template::Resolution;

const METRIC_RENDER_MS: &str = "gambit_export_render_ms";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render engine unavailable: {0}")]
    Unavailable(String),
    #[error("render context I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("render engine protocol error: {0}")]
    Protocol(String),
    #[error("render engine did not finish within {0:?}")]
    Timeout(Duration),
    #[error("captured image is not a PNG")]
    InvalidImage,
    #[error("captured image is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: usize,
        actual_height: usize,
    },
    #[error("no document loaded into render context")]
    NothingLoaded,
}

/// A long-lived headless engine that hands out isolated render contexts.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn open_context(&self) -> Result<Box<dyn RenderContext>, RenderError>;

    /// Release engine-wide resources; later renders start the engine again.
    async fn shutdown(&self) {}
}

/// One isolated page. Dropping the context releases everything it holds.
#[async_trait]
pub trait RenderContext: Send {
    async fn load(&mut self, document: &str) -> Result<(), RenderError>;

    async fn capture(&mut self, viewport: Resolution) -> Result<Vec<u8>, RenderError>;
}

#[derive(Debug, Clone)]
pub struct RenderedCard {
    pub png: Bytes,
    pub checksum_sha256: String,
    pub manifest: RenderManifest,
}

#[derive(Clone)]
pub struct CardRasterizer {
    engine: Arc<dyn RenderEngine>,
    compositor: Compositor,
}

impl CardRasterizer {
    pub fn new(engine: Arc<dyn RenderEngine>, compositor: Compositor) -> Self {
        Self { engine, compositor }
    }

    pub fn engine(&self) -> &Arc<dyn RenderEngine> {
        &self.engine
    }

    /// Compose, load and capture one card.
    pub async fn render(&self, input: ComposeInput<'_>) -> Result<RenderedCard, RenderError> {
        let started_at = Instant::now();
        let composed = self.compositor.compose(input).await;

        let result = async {
            let mut context = self.engine.open_context().await?;
            context.load(&composed.html).await?;
            context.capture(composed.resolution).await
        }
        .await;

        let png = match result.and_then(|png| verify_png(&png, composed.resolution).map(|_| png)) {
            Ok(png) => png,
            Err(err) => {
                warn!(
                    target = "application::rasterize",
                    op = "render",
                    result = "error",
                    card_id = %input.card.card_id,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Card render failed"
                );
                return Err(err);
            }
        };

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_RENDER_MS).record(elapsed_ms);
        info!(
            target = "application::rasterize",
            op = "render",
            result = "ok",
            card_id = %input.card.card_id,
            template_id = %input.template.template_id,
            png_bytes = png.len(),
            elapsed_ms = elapsed_ms as u64,
            "Card rendered"
        );

        Ok(RenderedCard {
            checksum_sha256: checksum_sha256(&png),
            png: Bytes::from(png),
            manifest: RenderManifest {
                card_id: input.card.card_id.clone(),
                generated_at: OffsetDateTime::now_utc(),
                template_id: input.template.template_id.clone(),
                variant: input.card.variant.clone(),
                applied_overlay_ids: composed.applied_overlay_ids,
            },
        })
    }
}

/// Lowercase hex SHA-256 of the exact bytes.
pub fn checksum_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn verify_png(png: &[u8], expected: Resolution) -> Result<(), RenderError> {
    match imagesize::image_type(png) {
        Ok(imagesize::ImageType::Png) => {}
        _ => return Err(RenderError::InvalidImage),
    }
    let size = imagesize::blob_size(png).map_err(|_| RenderError::InvalidImage)?;
    if size.width != expected.width as usize || size.height != expected.height as usize {
        return Err(RenderError::DimensionMismatch {
            expected_width: expected.width,
            expected_height: expected.height,
            actual_width: size.width,
            actual_height: size.height,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal PNG signature plus IHDR header for the given size.
    pub(crate) fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(&13u32.to_be_bytes());
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&width.to_be_bytes());
        png.extend_from_slice(&height.to_be_bytes());
        png.extend_from_slice(&[8, 6, 0, 0, 0]);
        png.extend_from_slice(&[0, 0, 0, 0]);
        png
    }

    #[test]
    fn accepts_png_with_expected_dimensions() {
        let resolution = Resolution {
            width: 750,
            height: 1050,
        };
        assert!(verify_png(&png_header(750, 1050), resolution).is_ok());
    }

    #[test]
    fn rejects_wrong_size_and_non_png() {
        let resolution = Resolution {
            width: 750,
            height: 1050,
        };
        assert!(matches!(
            verify_png(&png_header(800, 600), resolution),
            Err(RenderError::DimensionMismatch {
                actual_width: 800,
                ..
            })
        ));
        assert!(matches!(
            verify_png(b"GIF89a not a png", resolution),
            Err(RenderError::InvalidImage)
        ));
    }

    #[test]
    fn checksum_is_lowercase_hex_of_bytes() {
        assert_eq!(
            checksum_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
