//! Bind-key resolution against card fields and runtime values.

use serde_json::Value;

/// The two documents a bind key can reach.
#[derive(Debug, Clone, Copy)]
pub struct BindScope<'a> {
    pub card: &'a Value,
    pub runtime: &'a Value,
}

impl<'a> BindScope<'a> {
    pub fn new(card: &'a Value, runtime: &'a Value) -> Self {
        Self { card, runtime }
    }

    /// Resolve a dot path such as `card.name`, `runtime.stats.attack` or
    /// `stats.health`. Keys without a known root are looked up on the card.
    pub fn resolve(&self, key: &str) -> Option<&'a Value> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }

        let (root, rest) = match key.split_once('.') {
            Some((root, rest)) => (root, Some(rest)),
            None => (key, None),
        };

        match (root, rest) {
            ("card", Some(path)) => walk(self.card, path),
            ("runtime", Some(path)) => walk(self.runtime, path),
            ("stats", Some(path)) => self
                .runtime
                .get("stats")
                .and_then(|stats| walk(stats, path))
                .or_else(|| self.card.get("baseStats").and_then(|stats| walk(stats, path))),
            ("card", None) => Some(self.card),
            ("runtime", None) => Some(self.runtime),
            _ => walk(self.card, key),
        }
    }

    pub fn text(&self, key: &str) -> String {
        display_text(self.resolve(key))
    }
}

fn walk<'a>(mut current: &'a Value, path: &str) -> Option<&'a Value> {
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a resolved value as region text; non-scalar and missing values
/// render as the empty string.
pub fn display_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => match number.as_i64() {
            Some(integer) => integer.to_string(),
            None => number.as_f64().map(format_number).unwrap_or_default(),
        },
        Some(Value::Bool(flag)) => flag.to_string(),
        _ => String::new(),
    }
}

/// Shortest decimal form; integral values carry no decimal point.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return String::new();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{value}")
}
