//! Template manifests: the versioned layout description for one card shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Image,
    Shape,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Normal,
    Screen,
    Multiply,
    Overlay,
}

impl BlendMode {
    pub fn as_css(self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Screen => "screen",
            BlendMode::Multiply => "multiply",
            BlendMode::Overlay => "overlay",
        }
    }
}

fn full_opacity() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateLayer {
    pub layer_id: String,
    #[serde(default)]
    pub z_index: i32,
    pub kind: LayerKind,
    #[serde(default)]
    pub blend_mode: BlendMode,
    #[serde(default = "full_opacity")]
    pub opacity: f64,
    #[serde(default)]
    pub src: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Text,
    Stat,
    ArtSlot,
}

/// Resolution-independent rectangle; every field is a fraction of the card.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    /// Pixel size of the rectangle at the given resolution.
    pub fn pixel_size(&self, resolution: Resolution) -> (f64, f64) {
        (
            self.w.clamp(0.0, 1.0) * f64::from(resolution.width),
            self.h.clamp(0.0, 1.0) * f64::from(resolution.height),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicRegion {
    pub region_id: String,
    pub kind: RegionKind,
    #[serde(default)]
    pub bind_key: String,
    pub rect: Rect,
    #[serde(default)]
    pub auto_fit: bool,
    #[serde(default)]
    pub z_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayRule {
    pub id: String,
    pub src: String,
    #[serde(default)]
    pub blend_mode: BlendMode,
    #[serde(default = "full_opacity")]
    pub opacity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

impl TextAlign {
    pub fn as_css(self) -> &'static str {
        match self {
            TextAlign::Left => "left",
            TextAlign::Center => "center",
            TextAlign::Right => "right",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyleToken {
    pub font_family: String,
    pub font_size: f64,
    pub font_weight: u16,
    pub color: String,
    #[serde(default)]
    pub align: Option<TextAlign>,
    #[serde(default)]
    pub line_height: Option<f64>,
}

/// Semantic style tokens; any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStyles {
    #[serde(default)]
    pub title: Option<TextStyleToken>,
    #[serde(default)]
    pub body: Option<TextStyleToken>,
    #[serde(default)]
    pub flavor: Option<TextStyleToken>,
    #[serde(default)]
    pub stat: Option<TextStyleToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateManifest {
    pub template_id: String,
    pub card_type: String,
    pub base_resolution: Resolution,
    pub layers: Vec<TemplateLayer>,
    #[serde(default)]
    pub dynamic_regions: Vec<DynamicRegion>,
    #[serde(default)]
    pub variant_overlays: BTreeMap<String, Vec<OverlayRule>>,
    #[serde(default)]
    pub text_styles: TextStyles,
    #[serde(default)]
    pub version: i64,
}

impl TemplateManifest {
    /// Layers sorted by ascending zIndex; declaration order breaks ties.
    pub fn layers_in_stacking_order(&self) -> Vec<&TemplateLayer> {
        let mut layers: Vec<&TemplateLayer> = self.layers.iter().collect();
        layers.sort_by_key(|layer| layer.z_index);
        layers
    }

    /// Regions sorted by ascending zIndex; declaration order breaks ties.
    pub fn regions_in_stacking_order(&self) -> Vec<&DynamicRegion> {
        let mut regions: Vec<&DynamicRegion> = self.dynamic_regions.iter().collect();
        regions.sort_by_key(|region| region.z_index);
        regions
    }

    pub fn overlays_for(&self, variant: &str) -> &[OverlayRule] {
        self.variant_overlays
            .get(variant)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Reject manifests that cannot be laid out at all.
    pub fn ensure_renderable(&self) -> Result<(), DomainError> {
        if self.template_id.trim().is_empty() {
            return Err(DomainError::validation("templateId is required"));
        }
        if self.base_resolution.width == 0 || self.base_resolution.height == 0 {
            return Err(DomainError::validation(
                "baseResolution must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: &str, z_index: i32) -> DynamicRegion {
        DynamicRegion {
            region_id: id.to_string(),
            kind: RegionKind::Text,
            bind_key: "card.name".to_string(),
            rect: Rect {
                x: 0.0,
                y: 0.0,
                w: 1.0,
                h: 0.1,
            },
            auto_fit: false,
            z_index,
        }
    }

    fn manifest(regions: Vec<DynamicRegion>) -> TemplateManifest {
        TemplateManifest {
            template_id: "unit-default".to_string(),
            card_type: "unit".to_string(),
            base_resolution: Resolution {
                width: 750,
                height: 1050,
            },
            layers: Vec::new(),
            dynamic_regions: regions,
            variant_overlays: BTreeMap::new(),
            text_styles: TextStyles::default(),
            version: 1,
        }
    }

    #[test]
    fn regions_sort_ascending_by_z_index() {
        let template = manifest(vec![region("a", 5), region("b", 1), region("c", 3)]);
        let order: Vec<i32> = template
            .regions_in_stacking_order()
            .iter()
            .map(|region| region.z_index)
            .collect();
        assert_eq!(order, vec![1, 3, 5]);
    }

    #[test]
    fn z_index_ties_keep_declaration_order() {
        let template = manifest(vec![region("first", 2), region("second", 2), region("zero", 0)]);
        let ids: Vec<&str> = template
            .regions_in_stacking_order()
            .iter()
            .map(|region| region.region_id.as_str())
            .collect();
        assert_eq!(ids, vec!["zero", "first", "second"]);
    }

    #[test]
    fn unknown_variant_has_no_overlays() {
        let template = manifest(Vec::new());
        assert!(template.overlays_for("foil").is_empty());
    }

    #[test]
    fn deserializes_studio_manifest() {
        let raw = r##"{
            "templateId": "unit-default",
            "cardType": "unit",
            "baseResolution": {"width": 750, "height": 1050},
            "layers": [{"layerId": "paper", "zIndex": 0, "kind": "shape", "blendMode": "normal"}],
            "dynamicRegions": [
                {"regionId": "name", "kind": "text", "bindKey": "card.name",
                 "rect": {"x": 0.1, "y": 0.05, "w": 0.8, "h": 0.08}, "autoFit": true, "zIndex": 2},
                {"regionId": "art", "kind": "art_slot", "bindKey": "card.artAssetId",
                 "rect": {"x": 0.1, "y": 0.15, "w": 0.8, "h": 0.4}, "zIndex": 1}
            ],
            "variantOverlays": {"foil": [{"id": "foil-sheen", "src": "overlay://foil", "blendMode": "screen", "opacity": 0.7}]},
            "textStyles": {"title": {"fontFamily": "Cinzel", "fontSize": 40, "fontWeight": 700, "color": "#111"}},
            "version": 3
        }"##;

        let template: TemplateManifest = serde_json::from_str(raw).expect("manifest parses");
        assert_eq!(template.layers[0].opacity, 1.0);
        assert_eq!(template.dynamic_regions[1].kind, RegionKind::ArtSlot);
        assert_eq!(template.overlays_for("foil")[0].blend_mode, BlendMode::Screen);
        assert!(template.text_styles.body.is_none());
        assert!(template.ensure_renderable().is_ok());
    }

    #[test]
    fn zero_resolution_is_not_renderable() {
        let mut template = manifest(Vec::new());
        template.base_resolution.height = 0;
        assert!(template.ensure_renderable().is_err());
    }
}
