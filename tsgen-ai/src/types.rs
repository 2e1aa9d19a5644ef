//! Field value model shared by extraction, review and rendering
//!
//! Binary confidence: a field is either `Resolved` (serialized `1.0`) or
//! `Unresolved` (serialized `0.0`). No other value is representable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::schema::ValueType;

/// Typed field value, coerced against the field's declared `ValueType`
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    /// Canonical spelling of one of the declared options
    Enum(String),
    List(Vec<String>),
}

/// Coercion failures
#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: &'static str, got: String },

    #[error("'{value}' is not a valid {kind}")]
    Unparseable { kind: &'static str, value: String },

    #[error("'{value}' is not one of: {options}")]
    NotAnOption { value: String, options: String },
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%m/%d/%Y", "%d %B %Y"];

fn json_kind(raw: &serde_json::Value) -> String {
    match raw {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
    .to_string()
}

/// Parse `"$5,000,000"`, `"20%"`, `"1x"` style numbers
///
/// Only currency symbols, separators, percent and multiple suffixes are
/// stripped. Magnitude suffixes (`5M`) are rejected rather than scaled.
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_end_matches(['x', 'X', '%'])
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' ' | '_'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

impl FieldValue {
    /// Coerce raw JSON (model output or user input) to a typed value
    ///
    /// `null` and blank strings coerce to `Ok(None)`.
    pub fn coerce(
        raw: &serde_json::Value,
        value_type: &ValueType,
    ) -> Result<Option<FieldValue>, ValueError> {
        use serde_json::Value;

        if raw.is_null() {
            return Ok(None);
        }
        if let Value::String(s) = raw {
            if s.trim().is_empty() {
                return Ok(None);
            }
        }

        match value_type {
            ValueType::String => match raw {
                Value::String(s) => Ok(Some(FieldValue::Text(s.trim().to_string()))),
                Value::Number(n) => Ok(Some(FieldValue::Text(n.to_string()))),
                Value::Bool(b) => Ok(Some(FieldValue::Text(b.to_string()))),
                other => Err(ValueError::TypeMismatch {
                    expected: "string",
                    got: json_kind(other),
                }),
            },
            ValueType::Number => match raw {
                Value::Number(n) => n
                    .as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| Some(FieldValue::Number(f)))
                    .ok_or_else(|| ValueError::Unparseable {
                        kind: "number",
                        value: n.to_string(),
                    }),
                Value::String(s) => parse_number(s)
                    .map(|f| Some(FieldValue::Number(f)))
                    .ok_or_else(|| ValueError::Unparseable {
                        kind: "number",
                        value: s.clone(),
                    }),
                other => Err(ValueError::TypeMismatch {
                    expected: "number",
                    got: json_kind(other),
                }),
            },
            ValueType::Date => match raw {
                Value::String(s) => {
                    let trimmed = s.trim();
                    DATE_FORMATS
                        .iter()
                        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
                        .map(|d| Some(FieldValue::Date(d)))
                        .ok_or_else(|| ValueError::Unparseable {
                            kind: "date",
                            value: s.clone(),
                        })
                }
                other => Err(ValueError::TypeMismatch {
                    expected: "date",
                    got: json_kind(other),
                }),
            },
            ValueType::Enum(options) => {
                let candidate = match raw {
                    Value::String(s) => s.trim().to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    other => {
                        return Err(ValueError::TypeMismatch {
                            expected: "enum",
                            got: json_kind(other),
                        })
                    }
                };
                options
                    .iter()
                    .find(|o| o.eq_ignore_ascii_case(&candidate))
                    .map(|o| Some(FieldValue::Enum(o.clone())))
                    .ok_or_else(|| ValueError::NotAnOption {
                        value: candidate,
                        options: options.join(", "),
                    })
            }
            ValueType::List => {
                let items: Vec<String> = match raw {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => Ok(s.trim().to_string()),
                            Value::Number(n) => Ok(n.to_string()),
                            other => Err(ValueError::TypeMismatch {
                                expected: "list of strings",
                                got: json_kind(other),
                            }),
                        })
                        .collect::<Result<_, _>>()?,
                    Value::String(s) => s.split([',', ';']).map(|p| p.trim().to_string()).collect(),
                    other => {
                        return Err(ValueError::TypeMismatch {
                            expected: "list",
                            got: json_kind(other),
                        })
                    }
                };
                let items: Vec<String> = items.into_iter().filter(|i| !i.is_empty()).collect();
                if items.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(FieldValue::List(items)))
                }
            }
        }
    }

    /// Plain JSON form used in every external record
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) | FieldValue::Enum(s) => serde_json::Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::List(items) => {
                serde_json::Value::Array(items.iter().cloned().map(serde_json::Value::String).collect())
            }
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Integral numbers print without a fractional part
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) | FieldValue::Enum(s) => write!(f, "{}", s),
            FieldValue::Number(n) => write!(f, "{}", format_number(*n)),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::List(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Binary confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confidence {
    #[default]
    Unresolved,
    Resolved,
}

impl Confidence {
    pub fn as_f64(self) -> f64 {
        match self {
            Confidence::Unresolved => 0.0,
            Confidence::Resolved => 1.0,
        }
    }

    pub fn is_resolved(self) -> bool {
        self == Confidence::Resolved
    }
}

impl Serialize for Confidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        if raw == 1.0 {
            Ok(Confidence::Resolved)
        } else if raw == 0.0 {
            Ok(Confidence::Unresolved)
        } else {
            Err(serde::de::Error::custom(format!(
                "confidence must be 0.0 or 1.0, got {}",
                raw
            )))
        }
    }
}

/// Where a value came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub file: String,
    /// Cell reference, section number or line, e.g. `B5`, `Section 2.4`
    pub location: String,
}

impl SourceRef {
    pub fn new(file: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            location: location.into(),
        }
    }

    /// Source recorded for every human edit
    pub fn user_input() -> Self {
        Self::new("user_input", "manual edit")
    }

    /// Placeholder for model claims that cite no source
    pub fn unattributed() -> Self {
        Self::new("unattributed", "model output")
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "{}", self.file)
        } else {
            write!(f, "{} @ {}", self.file, self.location)
        }
    }
}

/// A value observed in some source that was not accepted
///
/// `value` keeps the raw JSON as reported, which may not fit the field type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictEntry {
    pub source: SourceRef,
    pub value: serde_json::Value,
    pub confidence: Confidence,
}

/// How a field should be presented during review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPriority {
    /// Resolved; nothing to do
    Auto,
    /// Has a value that is unresolved or disputed
    Decide,
    /// No value; human must provide one
    Missing,
}

/// One field's state within a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedField {
    pub value: Option<FieldValue>,
    pub source: Option<SourceRef>,
    pub confidence: Confidence,
    pub found: bool,
    pub derived_from_policy: bool,
    pub reasoning: Option<String>,
    pub conflicts: Vec<ConflictEntry>,
    pub user_edited: bool,
}

impl Default for ExtractedField {
    fn default() -> Self {
        Self {
            value: None,
            source: None,
            confidence: Confidence::Unresolved,
            found: false,
            derived_from_policy: false,
            reasoning: None,
            conflicts: Vec::new(),
            user_edited: false,
        }
    }
}

impl ExtractedField {
    /// Field with no value and an explanation
    pub fn not_found(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: Some(reasoning.into()),
            ..Self::default()
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.confidence.is_resolved()
    }

    pub fn review_priority(&self) -> ReviewPriority {
        if self.value.is_none() && !self.is_resolved() {
            ReviewPriority::Missing
        } else if !self.is_resolved() || !self.conflicts.is_empty() {
            ReviewPriority::Decide
        } else {
            ReviewPriority::Auto
        }
    }
}

/// Accounting for one model call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCallRecord {
    pub section: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub called_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_coercion_strips_formatting() {
        let ty = ValueType::Number;
        assert_eq!(
            FieldValue::coerce(&json!("$5,000,000"), &ty).unwrap(),
            Some(FieldValue::Number(5_000_000.0))
        );
        assert_eq!(
            FieldValue::coerce(&json!("20%"), &ty).unwrap(),
            Some(FieldValue::Number(20.0))
        );
        assert_eq!(
            FieldValue::coerce(&json!("1x"), &ty).unwrap(),
            Some(FieldValue::Number(1.0))
        );
        assert!(FieldValue::coerce(&json!("5M"), &ty).is_err());
        assert!(FieldValue::coerce(&json!([1, 2]), &ty).is_err());
    }

    #[test]
    fn test_enum_coercion_is_case_insensitive_and_canonical() {
        let ty = ValueType::one_of(&["non-participating", "participating"]);
        assert_eq!(
            FieldValue::coerce(&json!("Non-Participating"), &ty).unwrap(),
            Some(FieldValue::Enum("non-participating".to_string()))
        );
        let err = FieldValue::coerce(&json!("full"), &ty).unwrap_err();
        assert!(matches!(err, ValueError::NotAnOption { .. }));
    }

    #[test]
    fn test_boolean_enum_accepts_json_bool() {
        let ty = ValueType::one_of(&["true", "false"]);
        assert_eq!(
            FieldValue::coerce(&json!(true), &ty).unwrap(),
            Some(FieldValue::Enum("true".to_string()))
        );
    }

    #[test]
    fn test_date_and_list_coercion() {
        assert_eq!(
            FieldValue::coerce(&json!("March 3, 2025"), &ValueType::Date).unwrap(),
            Some(FieldValue::Date(NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()))
        );
        assert_eq!(
            FieldValue::coerce(&json!("Ada Lovelace; Alan Turing"), &ValueType::List).unwrap(),
            Some(FieldValue::List(vec![
                "Ada Lovelace".to_string(),
                "Alan Turing".to_string()
            ]))
        );
    }

    #[test]
    fn test_blank_and_null_coerce_to_none() {
        assert_eq!(FieldValue::coerce(&json!(null), &ValueType::Number).unwrap(), None);
        assert_eq!(FieldValue::coerce(&json!("  "), &ValueType::Date).unwrap(), None);
    }

    #[test]
    fn test_confidence_is_binary_on_the_wire() {
        assert_eq!(serde_json::to_value(Confidence::Resolved).unwrap(), json!(1.0));
        assert_eq!(serde_json::to_value(Confidence::Unresolved).unwrap(), json!(0.0));
        assert!(serde_json::from_value::<Confidence>(json!(0.85)).is_err());
        assert_eq!(
            serde_json::from_value::<Confidence>(json!(1)).unwrap(),
            Confidence::Resolved
        );
    }

    #[test]
    fn test_review_priority() {
        let missing = ExtractedField::not_found("absent");
        assert_eq!(missing.review_priority(), ReviewPriority::Missing);

        let mut policy = ExtractedField {
            value: Some(FieldValue::Number(45.0)),
            found: true,
            derived_from_policy: true,
            ..ExtractedField::default()
        };
        assert_eq!(policy.review_priority(), ReviewPriority::Decide);

        policy.confidence = Confidence::Resolved;
        assert_eq!(policy.review_priority(), ReviewPriority::Auto);
    }

    #[test]
    fn test_field_value_serializes_plain() {
        let value = FieldValue::Date(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        assert_eq!(serde_json::to_value(&value).unwrap(), json!("2025-01-15"));
        assert_eq!(FieldValue::Number(5_000_000.0).to_string(), "5000000");
    }
}
