//! Structured mushroom classification returned by the model.
//!
//! The schema is advisory: the model is asked for six fields but any of them
//! may be missing, and unknown fields are kept as-is.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

pub const SUMMARY_WARNING: &str =
    "⚠️ NEVER eat a mushroom based only on this chat, always consult experts/literature.";

const KNOWN_FIELDS: [&str; 6] = [
    "common_name",
    "genus",
    "confidence",
    "visible",
    "color",
    "edible",
];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ClassificationError {
    #[error("response contains no JSON object")]
    NoJsonObject,
    #[error("invalid JSON in response: {0}")]
    InvalidJson(String),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub visible: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edible: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ClassificationRecord {
    pub result: ClassificationResult,
    pub recorded_at: DateTime<Utc>,
}

impl ClassificationRecord {
    pub fn new(result: ClassificationResult) -> Self {
        Self {
            result,
            recorded_at: Utc::now(),
        }
    }
}

/// JSON schema sent as `responseSchema` with the classification request.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "common_name": { "type": "STRING" },
            "genus": { "type": "STRING" },
            "confidence": { "type": "NUMBER" },
            "visible": { "type": "ARRAY", "items": { "type": "STRING" } },
            "color": { "type": "STRING" },
            "edible": { "type": "BOOLEAN" }
        },
        "required": KNOWN_FIELDS,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(index) => &rest[index + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let body = strip_code_fence(text);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn string_field(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn confidence_field(value: Option<Value>) -> Option<f64> {
    let raw = match value? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => {
            let trimmed = text.trim();
            if let Some(percent) = trimmed.strip_suffix('%') {
                percent.trim().parse::<f64>().ok()? / 100.0
            } else {
                trimmed.parse::<f64>().ok()?
            }
        }
        _ => return None,
    };
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let normalized = if raw > 1.0 && raw <= 100.0 {
        raw / 100.0
    } else {
        raw
    };
    Some(normalized.min(1.0))
}

fn visible_field(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| string_field(Some(item)))
            .collect(),
        Some(Value::String(text)) => text
            .split(',')
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .map(|item| item.to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn edible_field(value: Option<Value>) -> Option<bool> {
    match value? {
        Value::Bool(flag) => Some(flag),
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl ClassificationResult {
    /// Parses the model's JSON-ish text (fences and surrounding prose allowed).
    pub fn parse(text: &str) -> Result<Self, ClassificationError> {
        let object_text = extract_json_object(text).ok_or(ClassificationError::NoJsonObject)?;
        let value: Value = serde_json::from_str(object_text)
            .map_err(|err| ClassificationError::InvalidJson(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ClassificationError> {
        let mut map = match value {
            Value::Object(map) => map,
            other => return Err(ClassificationError::NotAnObject(value_kind(&other))),
        };

        let common_name = string_field(map.remove("common_name"));
        let genus = string_field(map.remove("genus"));
        let confidence = confidence_field(map.remove("confidence"));
        let visible = visible_field(map.remove("visible"));
        let color = string_field(map.remove("color"));
        let edible = edible_field(map.remove("edible"));

        Ok(Self {
            common_name,
            genus,
            confidence,
            visible,
            color,
            edible,
            extra: map,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.common_name.is_none()
            && self.genus.is_none()
            && self.confidence.is_none()
            && self.visible.is_empty()
            && self.color.is_none()
            && self.edible.is_none()
            && self.extra.is_empty()
    }

    pub fn confidence_percent(&self) -> u32 {
        (self.confidence.unwrap_or(0.0) * 100.0).round() as u32
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Bullet summary shown when the user sends a photo without a question.
    pub fn render_summary(&self) -> String {
        let unknown = "?";
        format!(
            "• Suggested species: {} (genus {})\n• Color: {}\n• Visible traits: {}\n• Model confidence: {}%\n{}",
            self.common_name.as_deref().unwrap_or(unknown),
            self.genus.as_deref().unwrap_or(unknown),
            self.color.as_deref().unwrap_or(unknown),
            self.visible.join(", "),
            self.confidence_percent(),
            SUMMARY_WARNING
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_structured_output() {
        let result = ClassificationResult::parse(
            r#"{"common_name":"Chanterelle","genus":"Cantharellus","confidence":0.82,
                "visible":["false gills","funnel cap"],"color":"egg yellow","edible":true}"#,
        )
        .unwrap();
        assert_eq!(result.common_name.as_deref(), Some("Chanterelle"));
        assert_eq!(result.genus.as_deref(), Some("Cantharellus"));
        assert_eq!(result.confidence, Some(0.82));
        assert_eq!(result.visible, vec!["false gills", "funnel cap"]);
        assert_eq!(result.edible, Some(true));
        assert!(result.extra.is_empty());
    }

    #[test]
    fn accepts_code_fences_and_surrounding_prose() {
        let text = "```json\nHere you go: {\"genus\": \"Amanita\"} hope it helps\n```";
        let result = ClassificationResult::parse(text).unwrap();
        assert_eq!(result.genus.as_deref(), Some("Amanita"));
        assert!(result.common_name.is_none());
    }

    #[test]
    fn tolerates_loose_field_types() {
        let result = ClassificationResult::parse(
            r#"{"confidence":"75%","visible":"ring, volva , ","edible":"no","habitat":"beech forest"}"#,
        )
        .unwrap();
        assert_eq!(result.confidence, Some(0.75));
        assert_eq!(result.visible, vec!["ring", "volva"]);
        assert_eq!(result.edible, Some(false));
        assert_eq!(
            result.extra.get("habitat"),
            Some(&Value::String("beech forest".to_string()))
        );
    }

    #[test]
    fn reads_confidence_above_one_as_percentage() {
        let result = ClassificationResult::parse(r#"{"confidence": 64}"#).unwrap();
        assert_eq!(result.confidence_percent(), 64);
    }

    #[test]
    fn rejects_text_without_json() {
        assert_eq!(
            ClassificationResult::parse("I cannot identify this."),
            Err(ClassificationError::NoJsonObject)
        );
    }

    #[test]
    fn rejects_broken_json() {
        let err = ClassificationResult::parse("{\"genus\": }").unwrap_err();
        assert!(matches!(err, ClassificationError::InvalidJson(_)));
    }

    #[test]
    fn rejects_non_object_values() {
        let err = ClassificationResult::from_value(json!(["a", "b"])).unwrap_err();
        assert_eq!(err, ClassificationError::NotAnObject("array"));
    }

    #[test]
    fn summary_uses_placeholders_for_missing_fields() {
        let result = ClassificationResult::parse(r#"{"visible":["white gills"]}"#).unwrap();
        let summary = result.render_summary();
        assert!(summary.contains("• Suggested species: ? (genus ?)"));
        assert!(summary.contains("• Color: ?"));
        assert!(summary.contains("• Visible traits: white gills"));
        assert!(summary.contains("• Model confidence: 0%"));
        assert!(summary.ends_with(SUMMARY_WARNING));
    }

    #[test]
    fn summary_rounds_confidence() {
        let result = ClassificationResult {
            common_name: Some("Fly agaric".to_string()),
            genus: Some("Amanita".to_string()),
            confidence: Some(0.876),
            ..Default::default()
        };
        assert!(result
            .render_summary()
            .contains("• Model confidence: 88%"));
    }

    #[test]
    fn pretty_json_keeps_extra_fields_and_skips_missing() {
        let result = ClassificationResult::parse(r#"{"genus":"Boletus","season":"autumn"}"#)
            .unwrap();
        let rendered: Value = serde_json::from_str(&result.to_pretty_json()).unwrap();
        assert_eq!(rendered, json!({ "genus": "Boletus", "season": "autumn" }));
    }

    #[test]
    fn schema_requires_all_known_fields() {
        let schema = response_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 6);
        assert_eq!(schema["properties"]["visible"]["items"]["type"], "STRING");
    }
}
