//! HTML fragments and the full card document.

use std::fmt::Write as _;
use std::time::Duration;

use crate::domain::template::{
    BlendMode, DynamicRegion, LayerKind, OverlayRule, RegionKind, Resolution, TemplateLayer,
};

use super::autofit::AutoFitPolicy;
use super::bind::{BindScope, format_number};
use super::style::{pick_style, style_to_css};
use crate::domain::template::TextStyles;

const OVERLAY_SCHEME: &str = "overlay://";
const OVERLAY_Z_INDEX: i32 = 999;

/// Bounded waits used by the in-document readiness sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessTimings {
    pub font_timeout: Duration,
    pub image_timeout: Duration,
    pub settle: Duration,
}

impl Default for ReadinessTimings {
    fn default() -> Self {
        Self {
            font_timeout: Duration::from_millis(1500),
            image_timeout: Duration::from_millis(2500),
            settle: Duration::from_millis(20),
        }
    }
}

impl ReadinessTimings {
    /// Upper bound on how long the readiness sequence can take.
    pub fn total(&self) -> Duration {
        self.font_timeout + self.image_timeout + self.settle
    }
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn percent(fraction: f64) -> String {
    format!("{}%", format_number(fraction * 100.0))
}

fn layer_effects(z_index: i32, opacity: f64, blend: BlendMode) -> String {
    format!(
        "z-index:{z_index};opacity:{};mix-blend-mode:{};",
        format_number(opacity),
        blend.as_css()
    )
}

fn shape_style(layer_id: &str) -> &'static str {
    match layer_id {
        "paper" => "background:radial-gradient(circle at top left, #fff7e9, #e8decf);",
        "frame" => "border:12px solid #161616; box-shadow: inset 0 0 0 4px #1f1f1f;",
        _ => "border:2px solid rgba(20,20,20,0.2);",
    }
}

/// Markup for one template layer; `src` is the already-resolved image source.
pub fn layer_html(layer: &TemplateLayer, src: Option<&str>) -> String {
    let effects = layer_effects(layer.z_index, layer.opacity, layer.blend_mode);
    match (layer.kind, src) {
        (LayerKind::Image, Some(src)) if !src.is_empty() => format!(
            r#"<img class="layer" data-kind="image" alt="" src="{}" style="{effects}"/>"#,
            escape_html(src)
        ),
        (LayerKind::Image, _) => String::new(),
        (LayerKind::Shape, _) => format!(
            r#"<div class="layer" data-kind="shape" style="{effects}{}"></div>"#,
            shape_style(&layer.layer_id)
        ),
    }
}

/// Procedural background for `overlay://` sources.
pub fn overlay_background(name: &str) -> &'static str {
    match name {
        "foil" => {
            "linear-gradient(115deg, rgba(255,255,255,0) 0%, rgba(255,255,255,0.45) 35%, rgba(160,255,220,0.25) 50%, rgba(255,255,255,0.45) 65%, rgba(255,255,255,0) 100%)"
        }
        "alt" => "linear-gradient(180deg, rgba(10,10,10,0.06), rgba(10,10,10,0))",
        "promo" => {
            "radial-gradient(circle at 78% 18%, rgba(255,235,130,0.45), rgba(255,235,130,0) 55%)"
        }
        _ => "transparent",
    }
}

pub fn overlay_html(overlay: &OverlayRule, resolve: impl Fn(&str) -> String) -> String {
    let effects = layer_effects(OVERLAY_Z_INDEX, overlay.opacity, overlay.blend_mode);
    match overlay.src.strip_prefix(OVERLAY_SCHEME) {
        Some(name) => format!(
            r#"<div class="overlay" data-overlay="{}" style="{effects}background:{};"></div>"#,
            escape_html(&overlay.id),
            overlay_background(name)
        ),
        None => format!(
            r#"<img class="overlay" data-overlay="{}" alt="" src="{}" style="{effects}"/>"#,
            escape_html(&overlay.id),
            escape_html(&resolve(&overlay.src))
        ),
    }
}

pub fn region_html(
    region: &DynamicRegion,
    styles: &TextStyles,
    scope: &BindScope<'_>,
    art_url: Option<&str>,
) -> String {
    let rect = &region.rect;
    let base = format!(
        "left:{};top:{};width:{};height:{};z-index:{};",
        percent(rect.x),
        percent(rect.y),
        percent(rect.w),
        percent(rect.h),
        region.z_index
    );
    let region_id = escape_html(&region.region_id);

    if region.kind == RegionKind::ArtSlot {
        return match art_url.filter(|url| !url.is_empty()) {
            Some(url) => format!(
                r#"<div class="region region-art" data-region="{region_id}" style="{base}"><img alt="" src="{}"/></div>"#,
                escape_html(url)
            ),
            None => format!(
                r#"<div class="region region-art" data-region="{region_id}" style="{base}"><div class="art-placeholder">NO ART</div></div>"#
            ),
        };
    }

    let text = scope.text(&region.bind_key);
    let css = style_to_css(&pick_style(styles, region.kind, &region.bind_key));
    let class = match region.kind {
        RegionKind::Stat => "region region-stat",
        _ => "region region-text",
    };
    let decoration = if region.bind_key == "card.flavorText" {
        "font-style:italic;"
    } else {
        ""
    };

    format!(
        r#"<div class="{class}" data-region="{region_id}" data-autofit="{}" style="{base}{css};{decoration}">{}</div>"#,
        region.auto_fit,
        escape_html(&text)
    )
}

fn readiness_script(policy: &AutoFitPolicy, timings: &ReadinessTimings) -> String {
    let mut script = String::new();
    script.push_str("(function () {\n");
    script.push_str(
        "  function sleep(ms) { return new Promise(function (resolve) { setTimeout(resolve, ms); }); }\n",
    );
    let _ = writeln!(script, "  {}", policy.script_constants());
    script.push_str(
        r#"  function overflows(el) { return el.scrollHeight > el.clientHeight || el.scrollWidth > el.clientWidth; }
  function fitText(el) {
    var size = parseFloat(window.getComputedStyle(el).fontSize || "18");
    for (var i = 0; i < maxIters; i += 1) {
      if (!overflows(el)) return;
      var next = size - step;
      if (next < minSize) return;
      size = next;
      el.style.fontSize = size + "px";
    }
  }
  function runAutofit() {
    var nodes = document.querySelectorAll('[data-autofit="true"]');
    for (var i = 0; i < nodes.length; i += 1) { fitText(nodes[i]); }
  }
  function waitForImages(timeoutMs) {
    var imgs = Array.prototype.slice.call(document.images || []);
    if (imgs.length === 0) return Promise.resolve();
    return Promise.race([
      Promise.all(imgs.map(function (img) {
        if (img.complete) return Promise.resolve();
        return new Promise(function (resolve) { img.onload = resolve; img.onerror = resolve; });
      })),
      sleep(timeoutMs)
    ]);
  }
"#,
    );
    let _ = write!(
        script,
        r#"  window.__cardRenderReady = (async function () {{
    try {{
      if (document.fonts && document.fonts.ready) {{ await Promise.race([document.fonts.ready, sleep({font})]); }}
    }} catch (err) {{}}
    runAutofit();
    await waitForImages({images});
    runAutofit();
    await sleep({settle});
    document.documentElement.setAttribute("data-render-ready", "true");
  }})();
}})();"#,
        font = timings.font_timeout.as_millis(),
        images = timings.image_timeout.as_millis(),
        settle = timings.settle.as_millis(),
    );
    script
}

pub struct DocumentParts<'a> {
    pub resolution: Resolution,
    pub layers: &'a [String],
    pub regions: &'a [String],
    pub overlays: &'a [String],
}

pub fn card_document(
    parts: &DocumentParts<'_>,
    policy: &AutoFitPolicy,
    timings: &ReadinessTimings,
) -> String {
    let Resolution { width, height } = parts.resolution;
    format!(
        r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8" />
    <style>
      * {{ box-sizing: border-box; animation: none !important; transition: none !important; }}
      html, body {{ margin: 0; padding: 0; }}
      body {{ background: transparent; }}
      .card {{ width: {width}px; height: {height}px; position: relative; overflow: hidden; background: #f2eadf; }}
      .layer {{ position: absolute; inset: 0; width: 100%; height: 100%; object-fit: cover; }}
      .overlay {{ position: absolute; inset: 0; width: 100%; height: 100%; object-fit: cover; pointer-events: none; }}
      .region {{ position: absolute; padding: 8px 10px; overflow: hidden; }}
      .region-stat {{ display: flex; align-items: center; justify-content: center; padding: 0; white-space: nowrap; text-shadow: 0 2px 0 rgba(255,255,255,0.6); }}
      .region-text {{ white-space: pre-wrap; }}
      .region-art {{ padding: 0; border-radius: 10px; overflow: hidden; border: 3px solid rgba(20,20,20,0.85); background: linear-gradient(135deg, #c8b59f, #f5ede3); }}
      .region-art img {{ width: 100%; height: 100%; object-fit: cover; display: block; }}
      .art-placeholder {{ width: 100%; height: 100%; display: flex; align-items: center; justify-content: center; font-family: Arial, sans-serif; font-weight: 800; color: rgba(20,20,20,0.55); letter-spacing: 0.15em; }}
    </style>
  </head>
  <body>
    <div class="card">
      {layers}
      {regions}
      {overlays}
    </div>
    <script>
{script}
    </script>
  </body>
</html>
"#,
        layers = parts.layers.concat(),
        regions = parts.regions.concat(),
        overlays = parts.overlays.concat(),
        script = readiness_script(policy, timings),
    )
}
