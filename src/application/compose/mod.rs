//! Template compositor.
//!
//! Turns a template manifest, a card, its runtime values and an optional art
//! URL into a self-contained HTML document. Composition is deterministic: the
//! document carries no timestamps or generated identifiers, so identical
//! inputs always produce identical markup.

pub mod assets;
pub mod autofit;
pub mod bind;
pub mod document;
pub mod style;

use crate::domain::card::{CardDefinition, RuntimeValues};
use crate::domain::template::{Resolution, TemplateManifest};

pub use assets::{AssetResolver, AssetSource};
pub use autofit::AutoFitPolicy;
pub use bind::BindScope;
pub use document::ReadinessTimings;

/// Everything the compositor reads for one card.
#[derive(Debug, Clone, Copy)]
pub struct ComposeInput<'a> {
    pub template: &'a TemplateManifest,
    pub card: &'a CardDefinition,
    pub runtime: &'a RuntimeValues,
    pub art_url: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDocument {
    pub html: String,
    pub applied_overlay_ids: Vec<String>,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Default)]
pub struct Compositor {
    assets: AssetResolver,
    autofit: AutoFitPolicy,
    timings: ReadinessTimings,
}

impl Compositor {
    pub fn new(assets: AssetResolver, timings: ReadinessTimings) -> Self {
        Self {
            assets,
            autofit: AutoFitPolicy::default(),
            timings,
        }
    }

    pub fn timings(&self) -> ReadinessTimings {
        self.timings
    }

    /// Build the document. Project-relative assets are read asynchronously
    /// up front; everything after that is pure string assembly.
    pub async fn compose(&self, input: ComposeInput<'_>) -> ComposedDocument {
        let template = input.template;
        let overlay_rules = template.overlays_for(&input.card.variant);

        let references: Vec<&str> = template
            .layers
            .iter()
            .filter_map(|layer| layer.src.as_deref())
            .chain(overlay_rules.iter().map(|overlay| overlay.src.as_str()))
            .collect();
        let assets = self.assets.resolve_all(references).await;
        let inline = |src: &str| {
            assets
                .get(src)
                .cloned()
                .unwrap_or_else(|| src.to_string())
        };

        let layers: Vec<String> = template
            .layers_in_stacking_order()
            .into_iter()
            .map(|layer| {
                let src = layer.src.as_deref().map(inline);
                document::layer_html(layer, src.as_deref())
            })
            .collect();

        let card_value = input.card.as_value();
        let scope = BindScope::new(&card_value, input.runtime.as_value());
        let regions: Vec<String> = template
            .regions_in_stacking_order()
            .into_iter()
            .map(|region| {
                document::region_html(region, &template.text_styles, &scope, input.art_url)
            })
            .collect();

        let overlays: Vec<String> = overlay_rules
            .iter()
            .map(|overlay| document::overlay_html(overlay, inline))
            .collect();

        let html = document::card_document(
            &document::DocumentParts {
                resolution: template.base_resolution,
                layers: &layers,
                regions: &regions,
                overlays: &overlays,
            },
            &self.autofit,
            &self.timings,
        );

        ComposedDocument {
            html,
            applied_overlay_ids: overlay_rules.iter().map(|rule| rule.id.clone()).collect(),
            resolution: template.base_resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::template::LayerKind;
    use serde_json::json;

    fn template() -> TemplateManifest {
        serde_json::from_value(json!({
            "templateId": "unit-default",
            "cardType": "unit",
            "baseResolution": {"width": 750, "height": 1050},
            "layers": [
                {"layerId": "frame", "zIndex": 2, "kind": "shape"},
                {"layerId": "paper", "zIndex": 0, "kind": "shape"}
            ],
            "dynamicRegions": [
                {"regionId": "r5", "kind": "text", "bindKey": "card.name",
                 "rect": {"x": 0.1, "y": 0.05, "w": 0.8, "h": 0.08}, "zIndex": 5, "autoFit": true},
                {"regionId": "r1", "kind": "art_slot", "bindKey": "card.artAssetId",
                 "rect": {"x": 0.1, "y": 0.15, "w": 0.8, "h": 0.4}, "zIndex": 1},
                {"regionId": "r3", "kind": "stat", "bindKey": "stats.attack",
                 "rect": {"x": 0.05, "y": 0.85, "w": 0.1, "h": 0.1}, "zIndex": 3}
            ],
            "variantOverlays": {
                "foil": [
                    {"id": "foil-sheen", "src": "overlay://foil", "blendMode": "screen", "opacity": 0.7},
                    {"id": "foil-grain", "src": "overlay://grain"}
                ]
            },
            "textStyles": {},
            "version": 4
        }))
        .expect("template")
    }

    fn card(variant: &str) -> CardDefinition {
        serde_json::from_value(json!({
            "cardId": "c1",
            "name": "Ember <Warden>",
            "type": "unit",
            "variant": variant,
            "templateId": "unit-default",
            "baseStats": {"attack": 3}
        }))
        .expect("card")
    }

    async fn compose(card: &CardDefinition, art_url: Option<&str>) -> ComposedDocument {
        let template = template();
        let runtime = RuntimeValues::initial_for(card);
        Compositor::default()
            .compose(ComposeInput {
                template: &template,
                card,
                runtime: &runtime,
                art_url,
            })
            .await
    }

    #[tokio::test]
    async fn regions_are_emitted_in_ascending_z_order() {
        let doc = compose(&card("base"), None).await;
        let r1 = doc.html.find(r#"data-region="r1""#).expect("r1");
        let r3 = doc.html.find(r#"data-region="r3""#).expect("r3");
        let r5 = doc.html.find(r#"data-region="r5""#).expect("r5");
        assert!(r1 < r3 && r3 < r5);

        let paper = doc.html.find("#fff7e9").expect("paper");
        let frame = doc.html.find("#161616").expect("frame");
        assert!(paper < frame);
    }

    #[tokio::test]
    async fn binds_escape_text_and_mark_autofit_regions() {
        let doc = compose(&card("base"), None).await;
        assert!(doc.html.contains("Ember &lt;Warden&gt;"));
        assert!(doc.html.contains(r#"data-region="r5" data-autofit="true""#));
        assert!(doc.html.contains(r#"data-region="r3" data-autofit="false""#));
        assert!(doc.html.contains(">3</div>"));
        assert!(doc.html.contains("NO ART"));
        assert!(doc.html.contains("width: 750px; height: 1050px;"));
    }

    #[tokio::test]
    async fn variant_overlays_are_applied_in_declared_order() {
        let doc = compose(&card("foil"), Some("https://cdn.example/c1.png")).await;
        assert_eq!(doc.applied_overlay_ids, vec!["foil-sheen", "foil-grain"]);
        let sheen = doc.html.find("foil-sheen").expect("sheen");
        let grain = doc.html.find("foil-grain").expect("grain");
        assert!(sheen < grain);
        assert!(doc.html.contains(r#"src="https://cdn.example/c1.png""#));
        assert!(!doc.html.contains("NO ART"));

        let base = compose(&card("base"), None).await;
        assert!(base.applied_overlay_ids.is_empty());
    }

    #[tokio::test]
    async fn identical_inputs_compose_identical_documents() {
        let first = compose(&card("foil"), None).await;
        let second = compose(&card("foil"), None).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn project_assets_are_inlined_from_disk() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("frame.png"), b"png").expect("write frame");
        std::fs::write(dir.path().join("sheen.png"), b"sheen").expect("write sheen");

        let mut template = template();
        template.layers[0].kind = LayerKind::Image;
        template.layers[0].src = Some("/frame.png".to_string());
        template
            .variant_overlays
            .get_mut("foil")
            .expect("foil overlays")[1]
            .src = "/sheen.png".to_string();
        let card = card("foil");
        let runtime = RuntimeValues::initial_for(&card);

        let compositor = Compositor::new(
            AssetResolver::with_root(dir.path()),
            ReadinessTimings::default(),
        );
        let doc = compositor
            .compose(ComposeInput {
                template: &template,
                card: &card,
                runtime: &runtime,
                art_url: None,
            })
            .await;
        assert!(doc.html.contains("data:image/png;base64,cG5n"));
        assert!(doc.html.contains("data:image/png;base64,c2hlZW4="));
        assert!(!doc.html.contains("/sheen.png"));
    }
}
