//! Text style selection for data-bound regions.

use crate::domain::template::{RegionKind, TextAlign, TextStyleToken, TextStyles};

use super::bind::format_number;
use super::document::escape_html;

const FALLBACK_FAMILY: &str = "Arial";
const FALLBACK_SIZE: f64 = 22.0;
const FALLBACK_WEIGHT: u16 = 500;
const FALLBACK_COLOR: &str = "#1a1a1a";
const DEFAULT_LINE_HEIGHT: f64 = 1.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleRole {
    Stat,
    Title,
    Body,
    Flavor,
}

impl StyleRole {
    fn token(self, styles: &TextStyles) -> Option<&TextStyleToken> {
        match self {
            StyleRole::Stat => styles.stat.as_ref(),
            StyleRole::Title => styles.title.as_ref(),
            StyleRole::Body => styles.body.as_ref(),
            StyleRole::Flavor => styles.flavor.as_ref(),
        }
    }
}

/// Ordered candidates for a region; the first token present wins.
pub fn style_chain(kind: RegionKind, bind_key: &str) -> Vec<StyleRole> {
    let mut chain = Vec::with_capacity(4);
    if kind == RegionKind::Stat {
        chain.push(StyleRole::Stat);
    }
    match bind_key {
        "card.name" => chain.push(StyleRole::Title),
        "card.flavorText" => chain.push(StyleRole::Flavor),
        _ => {}
    }
    for role in [StyleRole::Body, StyleRole::Title] {
        if !chain.contains(&role) {
            chain.push(role);
        }
    }
    chain
}

pub fn fallback_token() -> TextStyleToken {
    TextStyleToken {
        font_family: FALLBACK_FAMILY.to_string(),
        font_size: FALLBACK_SIZE,
        font_weight: FALLBACK_WEIGHT,
        color: FALLBACK_COLOR.to_string(),
        align: None,
        line_height: None,
    }
}

pub fn pick_style(styles: &TextStyles, kind: RegionKind, bind_key: &str) -> TextStyleToken {
    style_chain(kind, bind_key)
        .into_iter()
        .find_map(|role| role.token(styles))
        .cloned()
        .unwrap_or_else(fallback_token)
}

/// Inline CSS declarations for a token, without a trailing separator.
pub fn style_to_css(token: &TextStyleToken) -> String {
    let align = token.align.unwrap_or(TextAlign::Left);
    let line_height = token.line_height.unwrap_or(DEFAULT_LINE_HEIGHT);
    [
        format!(
            "font-family:{}, Arial, sans-serif",
            escape_html(&token.font_family)
        ),
        format!("font-size:{}px", format_number(token.font_size)),
        format!("font-weight:{}", token.font_weight),
        format!("color:{}", escape_html(&token.color)),
        format!("text-align:{}", align.as_css()),
        format!("line-height:{}", format_number(line_height)),
    ]
    .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(family: &str) -> TextStyleToken {
        TextStyleToken {
            font_family: family.to_string(),
            font_size: 30.0,
            font_weight: 700,
            color: "#222".to_string(),
            align: Some(TextAlign::Center),
            line_height: None,
        }
    }

    #[test]
    fn stat_regions_prefer_stat_token() {
        let styles = TextStyles {
            stat: Some(token("Stat")),
            title: Some(token("Title")),
            ..TextStyles::default()
        };
        assert_eq!(
            pick_style(&styles, RegionKind::Stat, "stats.attack").font_family,
            "Stat"
        );
        assert_eq!(
            pick_style(&styles, RegionKind::Text, "stats.attack").font_family,
            "Title"
        );
    }

    #[test]
    fn bind_specific_tokens_come_before_body() {
        let styles = TextStyles {
            title: Some(token("Title")),
            body: Some(token("Body")),
            flavor: Some(token("Flavor")),
            stat: None,
        };
        assert_eq!(
            pick_style(&styles, RegionKind::Text, "card.name").font_family,
            "Title"
        );
        assert_eq!(
            pick_style(&styles, RegionKind::Text, "card.flavorText").font_family,
            "Flavor"
        );
        assert_eq!(
            pick_style(&styles, RegionKind::Text, "card.rulesText").font_family,
            "Body"
        );
    }

    #[test]
    fn flavor_without_flavor_token_falls_through_body_then_title() {
        let title_only = TextStyles {
            title: Some(token("Title")),
            ..TextStyles::default()
        };
        assert_eq!(
            pick_style(&title_only, RegionKind::Text, "card.flavorText").font_family,
            "Title"
        );
        assert_eq!(
            style_chain(RegionKind::Stat, "card.name"),
            vec![StyleRole::Stat, StyleRole::Title, StyleRole::Body]
        );
    }

    #[test]
    fn empty_styles_use_hard_fallback() {
        let picked = pick_style(&TextStyles::default(), RegionKind::Text, "card.name");
        assert_eq!(picked, fallback_token());
        assert_eq!(
            style_to_css(&picked),
            "font-family:Arial, Arial, sans-serif;font-size:22px;font-weight:500;color:#1a1a1a;text-align:left;line-height:1.15"
        );
    }
}
