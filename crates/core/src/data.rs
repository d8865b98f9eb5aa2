//! Template data carried by a task.
//!
//! Values are restricted to scalars so that a queued task stays small and its
//! encoding stays stable. Anything richer is flattened to text at intake time
//! by [`sanitize_template_data`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Key/value data handed to the template renderer.
pub type TemplateData = BTreeMap<String, TemplateValue>;

/// A single scalar template value.
///
/// Encoded as a plain JSON scalar. Variant order matters for decoding: a JSON
/// integer decodes as `Int`, a JSON number with a fraction as `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl TemplateValue {
    /// Coerce an arbitrary JSON value into a template value.
    ///
    /// Strings are trimmed, numbers and booleans are kept as they are,
    /// `null` becomes the empty string and arrays/objects become their JSON
    /// text.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::String(s) => Self::Text(s.trim().to_string()),
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::Null => Self::Text(String::new()),
            other @ (JsonValue::Array(_) | JsonValue::Object(_)) => Self::Text(other.to_string()),
        }
    }

    /// Borrow the text of a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::from(*i),
            Self::Float(f) => JsonValue::from(*f),
            Self::Text(s) => JsonValue::String(s.clone()),
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for TemplateValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for TemplateValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for TemplateValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl core::fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Shape raw request data into [`TemplateData`].
pub fn sanitize_template_data(raw: serde_json::Map<String, JsonValue>) -> TemplateData {
    raw.into_iter()
        .map(|(key, value)| (key, TemplateValue::from_json(value)))
        .collect()
}
