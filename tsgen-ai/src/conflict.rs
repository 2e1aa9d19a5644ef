// Conflict Detector
//
// Concept: Partition every observation of one field into a single accepted
// observation and the conflicts a human must see
// Synchronization: Pure function of the observations and the schema's
// source priority list; call order never changes the result
//
// Algorithm:
// 1. Drop observations with no value
// 2. Eligible tiers are DealSpecific and Policy; sort them by
//    (tier, schema priority, source key, file, location, value)
// 3. Accept the first eligible observation
// 4. Every other observation whose value differs from the accepted one
//    becomes a conflict entry; agreeing values are corroboration
// 5. Reference and unattributed observations are never accepted

use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

use crate::schema::DocumentSchema;
use crate::types::{format_number, parse_number, Confidence, ConflictEntry, SourceRef};

/// Precedence class of an observation's source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    DealSpecific,
    Policy,
    /// Format guidance only
    Reference,
    /// No source cited, or the citation matches no document
    Unattributed,
}

impl SourceTier {
    pub fn is_eligible(self) -> bool {
        matches!(self, SourceTier::DealSpecific | SourceTier::Policy)
    }
}

/// One value for a field as seen in one source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub value: Value,
    pub source: SourceRef,
    /// Key of the resolved source document, empty when unattributed
    pub source_key: String,
    pub tier: SourceTier,
    /// Gated per-observation confidence
    pub confidence: Confidence,
}

impl Observation {
    pub fn to_conflict(&self) -> ConflictEntry {
        ConflictEntry {
            source: self.source.clone(),
            value: self.value.clone(),
            confidence: self.confidence,
        }
    }
}

/// Result of partitioning one field's observations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub accepted: Option<Observation>,
    pub conflicts: Vec<ConflictEntry>,
    /// Observations agreeing with the accepted value
    pub corroborating: usize,
}

/// Canonical comparison key for a raw value
///
/// Numbers and numeric strings compare numerically, strings compare
/// trimmed and case-insensitively, arrays element-wise.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
        Value::String(s) => match parse_number(s) {
            Some(n) => format_number(n),
            None => s.trim().to_lowercase(),
        },
        Value::Array(items) => items.iter().map(value_key).collect::<Vec<_>>().join("\u{1f}"),
        Value::Object(_) => value.to_string(),
    }
}

pub struct ConflictDetector<'a> {
    schema: &'a DocumentSchema,
}

impl<'a> ConflictDetector<'a> {
    pub fn new(schema: &'a DocumentSchema) -> Self {
        Self { schema }
    }

    fn order(&self, a: &Observation, b: &Observation) -> Ordering {
        a.tier
            .cmp(&b.tier)
            .then_with(|| {
                self.schema
                    .priority_rank(&a.source_key)
                    .cmp(&self.schema.priority_rank(&b.source_key))
            })
            .then_with(|| a.source_key.cmp(&b.source_key))
            .then_with(|| a.source.file.cmp(&b.source.file))
            .then_with(|| a.source.location.cmp(&b.source.location))
            .then_with(|| value_key(&a.value).cmp(&value_key(&b.value)))
    }

    /// Partition observations into accepted value and conflicts
    ///
    /// Never raises confidence: the accepted observation keeps the
    /// confidence it was classified with.
    pub fn partition(&self, observations: Vec<Observation>) -> Partition {
        let mut observations: Vec<Observation> = observations
            .into_iter()
            .filter(|o| !o.value.is_null())
            .collect();
        observations.sort_by(|a, b| self.order(a, b));

        let accepted_idx = observations.iter().position(|o| o.tier.is_eligible());
        let accepted = accepted_idx.map(|idx| observations.remove(idx));
        let accepted_key = accepted.as_ref().map(|o| value_key(&o.value));

        let mut conflicts: Vec<ConflictEntry> = Vec::new();
        let mut corroborating = 0;
        for obs in &observations {
            if accepted_key.as_deref() == Some(value_key(&obs.value).as_str()) {
                corroborating += 1;
                continue;
            }
            let entry = obs.to_conflict();
            let duplicate = conflicts
                .iter()
                .any(|c| c.source == entry.source && value_key(&c.value) == value_key(&entry.value));
            if !duplicate {
                conflicts.push(entry);
            }
        }

        Partition {
            accepted,
            conflicts,
            corroborating,
        }
    }
}
