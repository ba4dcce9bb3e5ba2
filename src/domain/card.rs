//! Card definitions and the values bound into their regions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

fn base_variant() -> String {
    "base".to_string()
}

/// A card as authored in the catalog.
///
/// Fields the export pipeline does not interpret are kept in `extra` so bind
/// keys can still reach them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDefinition {
    pub card_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub card_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub rarity: String,
    #[serde(default = "base_variant")]
    pub variant: String,
    #[serde(default)]
    pub locale: String,
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art_asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor_text: Option<String>,
    #[serde(default)]
    pub base_stats: BTreeMap<String, f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CardDefinition {
    /// JSON view of the card used for bind-key lookups.
    pub fn as_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A catalog record together with its integer revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: i64) -> Self {
        Self { value, version }
    }
}

/// Derived game-state values for a card, as produced by the projection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeValues(pub Value);

impl RuntimeValues {
    /// Initial values used when the projection has nothing for the card yet.
    pub fn initial_for(card: &CardDefinition) -> Self {
        Self(json!({
            "cardId": card.card_id,
            "stats": card.base_stats,
        }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Resolved art for a card; `url` is absent when no art has been produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtReference {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: i64,
}

impl ArtReference {
    pub fn missing() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_card() -> CardDefinition {
        serde_json::from_value(json!({
            "cardId": "c1",
            "name": "Ember Warden",
            "type": "unit",
            "rarity": "rare",
            "locale": "en",
            "templateId": "unit-default",
            "baseStats": {"attack": 3, "health": 5},
            "faction": "ash"
        }))
        .expect("card parses")
    }

    #[test]
    fn variant_defaults_to_base_and_unknown_fields_survive() {
        let card = sample_card();
        assert_eq!(card.variant, "base");
        assert_eq!(card.extra.get("faction"), Some(&json!("ash")));

        let value = card.as_value();
        assert_eq!(value["type"], "unit");
        assert_eq!(value["faction"], "ash");
        assert_eq!(value["baseStats"]["attack"], 3.0);
    }

    #[test]
    fn initial_runtime_values_mirror_base_stats() {
        let card = sample_card();
        let runtime = RuntimeValues::initial_for(&card);
        assert_eq!(runtime.as_value()["cardId"], "c1");
        assert_eq!(runtime.as_value()["stats"]["health"], 5.0);
    }
}
