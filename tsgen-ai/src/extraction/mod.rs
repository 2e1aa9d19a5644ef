//! Extraction Engine
//!
//! Concept: One model call per schema section, every source document in
//! full on every call
//! Synchronization: Pure producer; returns classified evidence and never
//! touches session state
//!
//! Confidence gating per observation:
//! 1. The model must claim exactly 1.0
//! 2. The claim must carry a value and cite a source
//! 3. The cited source must resolve to a deal-specific document
//!
//! Anything else (policy defaults, reference documents, unattributed or
//! unresolvable citations, any claim below 1.0) is `Unresolved`.

pub mod model_client;
pub mod parser;
pub mod prompt;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::conflict::{Observation, SourceTier};
use crate::schema::{DocumentSchema, SectionSpec};
use crate::sources::{SourceContext, SourceContextBuilder, SourceError, SourceRole};
use crate::types::{Confidence, ModelCallRecord, SourceRef};

use model_client::{ModelClient, ModelError, ModelRequest};
use parser::{parse_section_response, ParseError, RawClaim};

/// Why a section produced no evidence
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("source documents unavailable: {0}")]
    Sources(String),
}

/// Classified observations for one field
#[derive(Debug, Clone, Default)]
pub struct FieldEvidence {
    pub observations: Vec<Observation>,
    pub reasoning: Option<String>,
}

/// Evidence for every field the model reported in a section
#[derive(Debug, Clone, Default)]
pub struct SectionEvidence {
    pub fields: HashMap<String, FieldEvidence>,
}

/// Outcome of one section extraction
#[derive(Debug)]
pub struct SectionAttempt {
    pub section: String,
    pub result: Result<SectionEvidence, ExtractionError>,
    /// Absent when no model call was made
    pub call: Option<ModelCallRecord>,
}

impl SectionAttempt {
    pub fn skipped(section: &str, error: ExtractionError) -> Self {
        Self {
            section: section.to_string(),
            result: Err(error),
            call: None,
        }
    }
}

/// Classify one claim against the source context and gate its confidence
pub fn classify_claim(claim: RawClaim, context: &SourceContext) -> Observation {
    let (source, source_key, tier) = match claim.source {
        None => (SourceRef::unattributed(), String::new(), SourceTier::Unattributed),
        Some(source) => match context.resolve(&source.file) {
            Some(doc) => {
                let tier = match doc.role {
                    SourceRole::DealSpecific => SourceTier::DealSpecific,
                    SourceRole::Policy => SourceTier::Policy,
                    SourceRole::Reference => SourceTier::Reference,
                };
                let source = SourceRef::new(doc.file_name.clone(), source.location);
                (source, doc.key.clone(), tier)
            }
            None => (source, String::new(), SourceTier::Unattributed),
        },
    };

    let confidence = if claim.claimed_confidence == 1.0
        && !claim.value.is_null()
        && tier == SourceTier::DealSpecific
    {
        Confidence::Resolved
    } else {
        Confidence::Unresolved
    };

    Observation {
        value: claim.value,
        source,
        source_key,
        tier,
        confidence,
    }
}

pub struct ExtractionEngine {
    client: Arc<dyn ModelClient>,
    sources: Arc<dyn SourceContextBuilder>,
}

impl ExtractionEngine {
    pub fn new(client: Arc<dyn ModelClient>, sources: Arc<dyn SourceContextBuilder>) -> Self {
        Self { client, sources }
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Build the source context for one run
    pub async fn build_context(&self) -> Result<Arc<SourceContext>, SourceError> {
        let context = self.sources.build().await?;
        Ok(Arc::new(context))
    }

    /// Extract one section
    ///
    /// Never fails outright: model, timeout and parse failures are returned
    /// in `SectionAttempt::result` for the caller to degrade.
    pub async fn extract_section(
        &self,
        schema: &DocumentSchema,
        section: &SectionSpec,
        context: &SourceContext,
    ) -> SectionAttempt {
        let request = ModelRequest {
            system_prompt: prompt::system_prompt(schema),
            section_prompt: prompt::section_prompt(section),
            source_text: context.render(),
        };

        debug!(
            section = %section.name,
            model = self.client.model_name(),
            source_chars = request.source_text.len(),
            "Calling model for section"
        );

        let started = Instant::now();
        let called_at = Utc::now();
        let response = self.client.call(&request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(section = %section.name, error = %e, "Model call failed");
                return SectionAttempt {
                    section: section.name.clone(),
                    call: Some(ModelCallRecord {
                        section: section.name.clone(),
                        input_tokens: 0,
                        output_tokens: 0,
                        duration_ms,
                        success: false,
                        error: Some(e.to_string()),
                        called_at,
                    }),
                    result: Err(e.into()),
                };
            }
        };

        let mut call = ModelCallRecord {
            section: section.name.clone(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            duration_ms,
            success: true,
            error: None,
            called_at,
        };

        let candidates = match parse_section_response(&response.content, section) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(section = %section.name, error = %e, "Unparsable model response");
                call.success = false;
                call.error = Some(e.to_string());
                return SectionAttempt {
                    section: section.name.clone(),
                    result: Err(e.into()),
                    call: Some(call),
                };
            }
        };

        let fields: HashMap<String, FieldEvidence> = candidates
            .into_iter()
            .map(|(name, candidate)| {
                let observations = std::iter::once(candidate.primary)
                    .chain(candidate.conflicts)
                    .map(|claim| classify_claim(claim, context))
                    .collect();
                (
                    name,
                    FieldEvidence {
                        observations,
                        reasoning: candidate.reasoning,
                    },
                )
            })
            .collect();

        info!(
            section = %section.name,
            fields_reported = fields.len(),
            fields_total = section.fields.len(),
            duration_ms,
            "Section extracted"
        );

        SectionAttempt {
            section: section.name.clone(),
            result: Ok(SectionEvidence { fields }),
            call: Some(call),
        }
    }
}
