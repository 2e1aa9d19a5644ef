//! Merge extraction evidence into session fields
//!
//! A field is `Resolved` only when the accepted observation is resolved,
//! came from a deal-specific document, coerced to the declared type and
//! no conflict remains.

use crate::conflict::{ConflictDetector, SourceTier};
use crate::extraction::{ExtractionError, FieldEvidence, SectionEvidence};
use crate::schema::{DocumentSchema, FieldSpec, SectionSpec};
use crate::types::{Confidence, ExtractedField, FieldValue};

fn merge_field(
    detector: &ConflictDetector<'_>,
    spec: &FieldSpec,
    evidence: Option<FieldEvidence>,
) -> ExtractedField {
    let Some(evidence) = evidence else {
        return ExtractedField::not_found("Not reported by the model");
    };

    let partition = detector.partition(evidence.observations);
    let mut conflicts = partition.conflicts;

    let Some(accepted) = partition.accepted else {
        let reasoning = if conflicts.is_empty() {
            evidence
                .reasoning
                .unwrap_or_else(|| "Not found in any source".to_string())
        } else {
            "Only reference or unattributed values were found; see conflicts".to_string()
        };
        return ExtractedField {
            conflicts,
            reasoning: Some(reasoning),
            ..ExtractedField::default()
        };
    };

    let mut reasoning = evidence.reasoning;
    let value = match FieldValue::coerce(&accepted.value, &spec.value_type) {
        Ok(value) => value,
        Err(e) => {
            conflicts.insert(0, accepted.to_conflict());
            let note = format!(
                "Extracted value {} does not fit {}: {}",
                accepted.value,
                spec.value_type.name(),
                e
            );
            reasoning = Some(match reasoning {
                Some(r) => format!("{} {}", r, note),
                None => note,
            });
            None
        }
    };

    let confidence = if accepted.confidence.is_resolved()
        && accepted.tier == SourceTier::DealSpecific
        && value.is_some()
        && conflicts.is_empty()
    {
        Confidence::Resolved
    } else {
        Confidence::Unresolved
    };

    ExtractedField {
        found: value.is_some(),
        value,
        source: Some(accepted.source),
        confidence,
        derived_from_policy: accepted.tier == SourceTier::Policy,
        reasoning,
        conflicts,
        user_edited: false,
    }
}

/// Merge a section's evidence; fields the model omitted become not found
pub(crate) fn merge_section(
    schema: &DocumentSchema,
    section: &SectionSpec,
    mut evidence: SectionEvidence,
) -> Vec<(String, ExtractedField)> {
    let detector = ConflictDetector::new(schema);
    section
        .fields
        .iter()
        .map(|spec| {
            let field = merge_field(&detector, spec, evidence.fields.remove(&spec.name));
            (spec.name.clone(), field)
        })
        .collect()
}

/// Every field of a failed section: not found, unresolved, with the cause
pub(crate) fn degrade_section(
    section: &SectionSpec,
    error: &ExtractionError,
) -> Vec<(String, ExtractedField)> {
    let reasoning = format!("Extraction failed for section {}: {}", section.name, error);
    section
        .fields
        .iter()
        .map(|spec| (spec.name.clone(), ExtractedField::not_found(reasoning.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::Observation;
    use crate::extraction::model_client::ModelError;
    use crate::schema::term_sheet::term_sheet_schema;
    use crate::types::SourceRef;
    use serde_json::json;
    use std::collections::HashMap;

    fn obs(value: serde_json::Value, tier: SourceTier, confidence: Confidence) -> Observation {
        let (file, key) = match tier {
            SourceTier::DealSpecific => ("Model.csv", "deal_model"),
            SourceTier::Policy => ("firm_policy.md", "firm_policy"),
            _ => ("sample.md", "reference/sample"),
        };
        Observation {
            value,
            source: SourceRef::new(file, "B5"),
            source_key: key.to_string(),
            tier,
            confidence,
        }
    }

    fn evidence(field: &str, observations: Vec<Observation>) -> SectionEvidence {
        let mut fields = HashMap::new();
        fields.insert(
            field.to_string(),
            FieldEvidence {
                observations,
                reasoning: None,
            },
        );
        SectionEvidence { fields }
    }

    fn merged(section: &str, field: &str, observations: Vec<Observation>) -> ExtractedField {
        let schema = term_sheet_schema().unwrap();
        let spec = schema.section(section).unwrap();
        merge_section(&schema, spec, evidence(field, observations))
            .into_iter()
            .find(|(name, _)| name == field)
            .map(|(_, f)| f)
            .unwrap()
    }

    #[test]
    fn test_single_explicit_deal_value_resolves() {
        let field = merged(
            "deal_economics",
            "investment_amount",
            vec![obs(json!("$5,000,000"), SourceTier::DealSpecific, Confidence::Resolved)],
        );
        assert_eq!(field.value, Some(FieldValue::Number(5_000_000.0)));
        assert_eq!(field.confidence, Confidence::Resolved);
        assert!(field.found);
        assert!(!field.derived_from_policy);
    }

    #[test]
    fn test_disagreement_forces_unresolved() {
        let field = merged(
            "transaction_terms",
            "exclusivity_days",
            vec![
                obs(json!(30), SourceTier::DealSpecific, Confidence::Resolved),
                obs(json!(45), SourceTier::Policy, Confidence::Unresolved),
            ],
        );
        assert_eq!(field.value, Some(FieldValue::Number(30.0)));
        assert_eq!(field.confidence, Confidence::Unresolved);
        assert_eq!(field.conflicts.len(), 1);
        assert_eq!(field.conflicts[0].value, json!(45));
    }

    #[test]
    fn test_policy_default_is_flagged() {
        let field = merged(
            "transaction_terms",
            "exclusivity_days",
            vec![obs(json!(45), SourceTier::Policy, Confidence::Unresolved)],
        );
        assert!(field.derived_from_policy);
        assert_eq!(field.confidence, Confidence::Unresolved);
        assert_eq!(field.source.unwrap().file, "firm_policy.md");
    }

    #[test]
    fn test_ill_typed_accepted_value_becomes_conflict() {
        let field = merged(
            "liquidation_terms",
            "participation_type",
            vec![obs(json!("fully participating"), SourceTier::DealSpecific, Confidence::Resolved)],
        );
        assert!(field.value.is_none());
        assert_eq!(field.confidence, Confidence::Unresolved);
        assert_eq!(field.conflicts.len(), 1);
        assert!(field.reasoning.unwrap().contains("does not fit enum"));
    }

    #[test]
    fn test_omitted_field_is_not_found() {
        let schema = term_sheet_schema().unwrap();
        let spec = schema.section("parties").unwrap();
        let fields = merge_section(&schema, spec, SectionEvidence::default());
        assert_eq!(fields.len(), 4);
        assert!(fields.iter().all(|(_, f)| !f.found && f.value.is_none()));
    }

    #[test]
    fn test_degraded_section_explains_failure() {
        let schema = term_sheet_schema().unwrap();
        let spec = schema.section("governance").unwrap();
        let error = ExtractionError::Model(ModelError::EmptyResponse);
        let fields = degrade_section(spec, &error);
        assert_eq!(fields.len(), 8);
        for (_, field) in fields {
            assert_eq!(field.confidence, Confidence::Unresolved);
            assert!(field.reasoning.unwrap().contains("no content"));
        }
    }
}
