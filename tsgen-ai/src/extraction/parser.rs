//! Tolerant parsing of section responses
//!
//! Accepts code-fenced JSON, a wrapper object keyed by the section name,
//! sources given as objects or `"file!location"` strings, and confidence
//! given as a number or numeric string.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::schema::SectionSpec;
use crate::types::SourceRef;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty model response")]
    Empty,

    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("response is not a JSON object")]
    NotAnObject,
}

/// Source as the model wrote it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Structured {
        file: String,
        #[serde(default)]
        location: Option<Value>,
    },
    Text(String),
}

impl RawSource {
    fn into_source_ref(self) -> Option<SourceRef> {
        let source = match self {
            RawSource::Structured { file, location } => {
                let location = match location {
                    Some(Value::String(s)) => s,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                SourceRef::new(file.trim(), location.trim())
            }
            RawSource::Text(text) => split_citation(&text),
        };
        (!source.file.is_empty()).then_some(source)
    }
}

/// `"Model.csv!B5"`, `"Model.csv - B5"`, `"firm_policy.md, Section 2.4"`
fn split_citation(text: &str) -> SourceRef {
    let text = text.trim();
    for separator in ["!", " - ", ", ", ": "] {
        if let Some((file, location)) = text.split_once(separator) {
            return SourceRef::new(file.trim(), location.trim());
        }
    }
    SourceRef::new(text, "")
}

fn parse_confidence(raw: &Value) -> f64 {
    match raw {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[derive(Debug, Deserialize)]
struct RawConflict {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    source: Option<RawSource>,
    #[serde(default)]
    confidence: Value,
}

#[derive(Debug, Deserialize)]
struct RawField {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    source: Option<RawSource>,
    #[serde(default)]
    confidence: Value,
    #[serde(default)]
    conflicts: Vec<RawConflict>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// One value claim from the model, before classification
#[derive(Debug, Clone, PartialEq)]
pub struct RawClaim {
    pub value: Value,
    pub source: Option<SourceRef>,
    /// Confidence as claimed, not yet gated
    pub claimed_confidence: f64,
}

/// Everything the model reported for one field
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
    pub primary: RawClaim,
    pub conflicts: Vec<RawClaim>,
    pub reasoning: Option<String>,
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse a section response into per-field candidates
///
/// Fields absent from the response are absent from the map. Entries that
/// are bare values (not objects) become unattributed candidates.
pub fn parse_section_response(
    content: &str,
    section: &SectionSpec,
) -> Result<HashMap<String, RawCandidate>, ParseError> {
    let body = strip_code_fence(content);
    if body.is_empty() {
        return Err(ParseError::Empty);
    }

    let parsed: Value =
        serde_json::from_str(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let Value::Object(mut object) = parsed else {
        return Err(ParseError::NotAnObject);
    };

    // Unwrap {"<section>": {...}} or {"fields": {...}}
    if object.len() == 1 {
        let key = object.keys().next().cloned().unwrap_or_default();
        if (key == section.name || key == "fields") && section.field(&key).is_none() {
            if let Some(Value::Object(inner)) = object.remove(&key) {
                object = inner;
            }
        }
    }

    let mut candidates = HashMap::new();
    for spec in &section.fields {
        let Some(entry) = object.remove(&spec.name) else {
            continue;
        };

        let candidate = match entry {
            Value::Object(_) => match serde_json::from_value::<RawField>(entry) {
                Ok(raw) => RawCandidate {
                    primary: RawClaim {
                        value: raw.value,
                        source: raw.source.and_then(RawSource::into_source_ref),
                        claimed_confidence: parse_confidence(&raw.confidence),
                    },
                    conflicts: raw
                        .conflicts
                        .into_iter()
                        .map(|c| RawClaim {
                            value: c.value,
                            source: c.source.and_then(RawSource::into_source_ref),
                            claimed_confidence: parse_confidence(&c.confidence),
                        })
                        .collect(),
                    reasoning: raw.reasoning.filter(|r| !r.trim().is_empty()),
                },
                Err(e) => {
                    debug!(field = %spec.name, error = %e, "Malformed field entry treated as not found");
                    continue;
                }
            },
            bare => RawCandidate {
                primary: RawClaim {
                    value: bare,
                    source: None,
                    claimed_confidence: 0.0,
                },
                conflicts: Vec::new(),
                reasoning: None,
            },
        };
        candidates.insert(spec.name.clone(), candidate);
    }

    for extra in object.keys() {
        debug!(section = %section.name, key = %extra, "Ignoring unknown key in model response");
    }

    Ok(candidates)
}
