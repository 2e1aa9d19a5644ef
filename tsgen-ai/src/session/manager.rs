// Session Manager
//
// Concept: Arena of in-memory document sessions keyed by id, driving each
// through INIT → EXTRACTING → REVIEWING → COMPLETE
// Synchronization: One RwLock over the arena; no critical section spans a
// model call, a source build or a file write.
// `run` holds no lock while a section is being extracted; the EXTRACTING
// state is what keeps edits and finalize out. Finalize takes the final render
// and sets the session's finalizing flag in one write section, so a second
// finalize or an edit arriving while artifacts are written is rejected
//
// Run algorithm:
// 1. `begin_run`: INIT → EXTRACTING under the lock
// 2. `complete_run`: build the source context once; on failure every
//    section degrades
// 3. For each section in schema order: extract, merge through the
//    conflict detector (or degrade), write the section back under the lock
// 4. EXTRACTING → REVIEWING regardless of per-section outcome

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tsgen_common::events::{EventBus, SessionEvent};

use super::merge::{degrade_section, merge_section};
use super::{
    ConflictSnapshot, DecisionKind, DecisionLogEntry, DocumentSession, EngineError, EngineResult,
    FieldStore, SessionState, StateTransition,
};
use crate::extraction::{ExtractionEngine, ExtractionError, SectionAttempt};
use crate::outputs::OutputWriter;
use crate::render::{RenderMode, Renderer};
use crate::schema::{DocumentSchema, SchemaRegistry};
use crate::types::{
    Confidence, ConflictEntry, ExtractedField, FieldValue, ModelCallRecord, SourceRef,
};

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostRates {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            input_per_million: 2.50,
            output_per_million: 10.00,
        }
    }
}

impl CostRates {
    pub fn estimate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

/// Outcome of `run`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub session_id: Uuid,
    pub state: SessionState,
    pub resolved: usize,
    pub unresolved: usize,
    pub sections_failed: usize,
    pub missing_required: Vec<String>,
}

/// A field that currently carries conflicting values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConflict {
    pub section: String,
    pub field: String,
    pub value: Option<FieldValue>,
    pub source: Option<SourceRef>,
    pub conflicts: Vec<ConflictEntry>,
}

/// One conflict as recorded in the final conflict list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictReportEntry {
    /// `section.field`
    pub field: String,
    pub extracted_value: Option<FieldValue>,
    pub extracted_source: Option<SourceRef>,
    pub alternatives: Vec<ConflictEntry>,
    /// `user_selected` or `agent_selected`
    pub resolution: &'static str,
    pub resolved_value: Option<FieldValue>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Per-run accounting written alongside the document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionLog {
    pub session_id: Uuid,
    pub document_type: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub extraction_started_at: Option<DateTime<Utc>>,
    pub extraction_completed_at: Option<DateTime<Utc>>,
    pub finalized_at: DateTime<Utc>,
    pub final_state: SessionState,
    pub model_calls: usize,
    pub sections_failed: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    pub user_decisions: usize,
    pub conflicts_resolved: usize,
    pub calls: Vec<ModelCallRecord>,
}

/// Everything produced by a successful finalize
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalArtifacts {
    pub session_id: Uuid,
    pub document_type: String,
    pub generated_at: DateTime<Utc>,
    pub fields: FieldStore,
    pub conflicts: Vec<ConflictReportEntry>,
    pub decisions: Vec<DecisionLogEntry>,
    pub document: String,
    pub execution: ExecutionLog,
}

/// Session claimed for extraction by [`SessionManager::begin_run`]
#[derive(Debug)]
pub struct ExtractionRun {
    session_id: Uuid,
    schema: Arc<DocumentSchema>,
}

impl ExtractionRun {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

enum EditInput {
    Raw(Value),
    Current,
    Conflict(usize),
}

pub struct SessionManager {
    registry: Arc<SchemaRegistry>,
    engine: Arc<ExtractionEngine>,
    renderer: Arc<dyn Renderer>,
    sessions: RwLock<HashMap<Uuid, DocumentSession>>,
    event_bus: EventBus,
    output: Option<Arc<OutputWriter>>,
    cost_rates: CostRates,
}

impl SessionManager {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        engine: Arc<ExtractionEngine>,
        renderer: Arc<dyn Renderer>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            registry,
            engine,
            renderer,
            sessions: RwLock::new(HashMap::new()),
            event_bus,
            output: None,
            cost_rates: CostRates::default(),
        }
    }

    /// Write artifacts to `writer` on finalize
    pub fn with_output(mut self, writer: OutputWriter) -> Self {
        self.output = Some(Arc::new(writer));
        self
    }

    pub fn with_cost_rates(mut self, rates: CostRates) -> Self {
        self.cost_rates = rates;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    fn schema_for(&self, document_type: &str) -> EngineResult<Arc<DocumentSchema>> {
        self.registry
            .get(document_type)
            .ok_or_else(|| EngineError::UnknownDocumentType(document_type.to_string()))
    }

    /// Run `f` against one session under the write lock
    async fn with_session<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut DocumentSession) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(EngineError::SessionNotFound(id))?;
        f(session)
    }

    /// Run `f` against one session under the read lock
    async fn read_session<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&DocumentSession) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(&id).ok_or(EngineError::SessionNotFound(id))?;
        f(session)
    }

    fn announce(&self, transition: StateTransition) {
        info!(
            session_id = %transition.session_id,
            from = %transition.old_state,
            to = %transition.new_state,
            "Session state changed"
        );
        self.event_bus.emit_lossy(SessionEvent::StateChanged {
            session_id: transition.session_id,
            from: transition.old_state.to_string(),
            to: transition.new_state.to_string(),
            timestamp: transition.transitioned_at,
        });
    }

    /// Create a session in INIT
    pub async fn start(&self, document_type: &str) -> EngineResult<Uuid> {
        let schema = self.schema_for(document_type)?;
        let session = DocumentSession::new(&schema);
        let id = session.id;

        self.sessions.write().await.insert(id, session);

        info!(session_id = %id, document_type, "Session started");
        self.event_bus.emit_lossy(SessionEvent::SessionStarted {
            session_id: id,
            document_type: document_type.to_string(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    /// Extract every section and move to REVIEWING
    ///
    /// Section failures are absorbed: the affected fields degrade to not
    /// found and the run continues with the next section.
    pub async fn run(&self, id: Uuid) -> EngineResult<RunSummary> {
        let run = self.begin_run(id).await?;
        self.complete_run(run).await
    }

    /// Move INIT → EXTRACTING; only one caller per session gets the run
    pub async fn begin_run(&self, id: Uuid) -> EngineResult<ExtractionRun> {
        let (schema, transition) = self
            .with_session(id, |session| {
                session.require_state(SessionState::Init)?;
                let schema = self.schema_for(&session.document_type)?;
                let transition = session.transition_to(SessionState::Extracting)?;
                Ok((schema, transition))
            })
            .await?;
        self.announce(transition);

        let total = schema.sections().len();
        info!(session_id = %id, sections = total, model = self.engine.model_name(), "Extraction started");
        self.event_bus.emit_lossy(SessionEvent::ExtractionStarted {
            session_id: id,
            sections_total: total,
            timestamp: Utc::now(),
        });
        Ok(ExtractionRun {
            session_id: id,
            schema,
        })
    }

    /// Extract every section of a claimed session, then move to REVIEWING
    pub async fn complete_run(&self, run: ExtractionRun) -> EngineResult<RunSummary> {
        let ExtractionRun {
            session_id: id,
            schema,
        } = run;
        let total = schema.sections().len();

        let context = match self.engine.build_context().await {
            Ok(context) => {
                debug!(
                    session_id = %id,
                    documents = context.documents().len(),
                    chars = context.total_chars(),
                    "Source context built"
                );
                Ok(context)
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Source context unavailable, every section will degrade");
                Err(e.to_string())
            }
        };

        for (index, section) in schema.sections().iter().enumerate() {
            self.with_session(id, |session| {
                session.progress.current_section = Some(section.name.clone());
                Ok(())
            })
            .await?;
            self.event_bus.emit_lossy(SessionEvent::SectionStarted {
                session_id: id,
                section: section.name.clone(),
                index: index + 1,
                total,
                timestamp: Utc::now(),
            });

            let attempt = match &context {
                Ok(context) => self.engine.extract_section(&schema, section, context).await,
                Err(reason) => {
                    SectionAttempt::skipped(&section.name, ExtractionError::Sources(reason.clone()))
                }
            };

            let SectionAttempt { result, call, .. } = attempt;
            let (fields, failure) = match result {
                Ok(evidence) => (merge_section(&schema, section, evidence), None),
                Err(e) => {
                    let failure = EngineError::SectionExtractionFailed {
                        session_id: id,
                        section: section.name.clone(),
                        reason: e.to_string(),
                    };
                    warn!(session_id = %id, section = %section.name, error = %failure, "Section degraded");
                    (degrade_section(section, &e), Some(e.to_string()))
                }
            };

            let snapshots: Vec<ConflictSnapshot> = fields
                .iter()
                .filter(|(_, f)| !f.conflicts.is_empty())
                .map(|(name, f)| ConflictSnapshot {
                    section: section.name.clone(),
                    field: name.clone(),
                    extracted_value: f.value.clone(),
                    extracted_source: f.source.clone(),
                    conflicts: f.conflicts.clone(),
                })
                .collect();
            let resolved = fields.iter().filter(|(_, f)| f.is_resolved()).count();
            let unresolved = fields.len() - resolved;

            self.with_session(id, |session| {
                session.fields_mut().replace_section(&section.name, fields);
                if let Some(call) = call {
                    session.model_calls.push(call);
                }
                session.extraction_conflicts.extend(snapshots);
                session.progress.sections_attempted += 1;
                if failure.is_some() {
                    session.progress.sections_failed += 1;
                }
                Ok(())
            })
            .await?;

            let event = match failure {
                Some(error) => SessionEvent::SectionFailed {
                    session_id: id,
                    section: section.name.clone(),
                    error,
                    timestamp: Utc::now(),
                },
                None => SessionEvent::SectionCompleted {
                    session_id: id,
                    section: section.name.clone(),
                    resolved,
                    unresolved,
                    timestamp: Utc::now(),
                },
            };
            self.event_bus.emit_lossy(event);
        }

        let (summary, transition) = self
            .with_session(id, |session| {
                session.progress.current_section = None;
                let transition = session.transition_to(SessionState::Reviewing)?;
                let resolved = session.fields().resolved_count();
                let summary = RunSummary {
                    session_id: id,
                    state: session.state(),
                    resolved,
                    unresolved: session.fields().len() - resolved,
                    sections_failed: session.progress.sections_failed,
                    missing_required: session.missing_required(&schema),
                };
                Ok((summary, transition))
            })
            .await?;
        self.announce(transition);

        info!(
            session_id = %id,
            resolved = summary.resolved,
            unresolved = summary.unresolved,
            sections_failed = summary.sections_failed,
            "Extraction completed"
        );
        self.event_bus.emit_lossy(SessionEvent::ExtractionCompleted {
            session_id: id,
            resolved: summary.resolved,
            unresolved: summary.unresolved,
            sections_failed: summary.sections_failed,
            timestamp: Utc::now(),
        });

        Ok(summary)
    }

    /// Set a field to a human-supplied value
    pub async fn update_field(
        &self,
        id: Uuid,
        section: &str,
        field: &str,
        value: Value,
        reason: Option<String>,
    ) -> EngineResult<ExtractedField> {
        self.apply_edit(id, section, field, EditInput::Raw(value), reason)
            .await
    }

    /// Accept the field's current value as-is
    pub async fn confirm_field(
        &self,
        id: Uuid,
        section: &str,
        field: &str,
        reason: Option<String>,
    ) -> EngineResult<ExtractedField> {
        self.apply_edit(id, section, field, EditInput::Current, reason)
            .await
    }

    /// Replace the field's value with one of its conflict entries
    pub async fn resolve_conflict(
        &self,
        id: Uuid,
        section: &str,
        field: &str,
        index: usize,
        reason: Option<String>,
    ) -> EngineResult<ExtractedField> {
        self.apply_edit(id, section, field, EditInput::Conflict(index), reason)
            .await
    }

    async fn apply_edit(
        &self,
        id: Uuid,
        section: &str,
        field: &str,
        input: EditInput,
        reason: Option<String>,
    ) -> EngineResult<ExtractedField> {
        let not_found = || EngineError::FieldNotFound {
            section: section.to_string(),
            field: field.to_string(),
        };
        let invalid = |reason: String| EngineError::InvalidValue {
            section: section.to_string(),
            field: field.to_string(),
            reason,
        };

        let (kind, updated) = self
            .with_session(id, |session| {
                session.require_editable()?;
                let schema = self.schema_for(&session.document_type)?;
                let spec = schema.field(section, field).ok_or_else(not_found)?;
                let current = session.fields().get(section, field).ok_or_else(not_found)?.clone();

                let (kind, new_value) = match input {
                    EditInput::Raw(raw) => {
                        let value = FieldValue::coerce(&raw, &spec.value_type)
                            .map_err(|e| invalid(e.to_string()))?;
                        (DecisionKind::FieldEdit, value)
                    }
                    EditInput::Current => (DecisionKind::Confirmation, current.value.clone()),
                    EditInput::Conflict(index) => {
                        let entry = current.conflicts.get(index).ok_or_else(|| {
                            EngineError::ConflictNotFound {
                                section: section.to_string(),
                                field: field.to_string(),
                                index,
                            }
                        })?;
                        let value = FieldValue::coerce(&entry.value, &spec.value_type)
                            .map_err(|e| invalid(e.to_string()))?;
                        (DecisionKind::ConflictResolution, value)
                    }
                };

                if new_value.is_none() && spec.required {
                    return Err(invalid("required field cannot be left blank".to_string()));
                }

                let updated = ExtractedField {
                    found: new_value.is_some(),
                    value: new_value.clone(),
                    source: Some(SourceRef::user_input()),
                    confidence: Confidence::Resolved,
                    derived_from_policy: kind == DecisionKind::Confirmation
                        && current.derived_from_policy,
                    reasoning: current.reasoning.clone(),
                    conflicts: Vec::new(),
                    user_edited: true,
                };
                let slot = session.fields_mut().get_mut(section, field).ok_or_else(not_found)?;
                *slot = updated.clone();

                session.record_decision(DecisionLogEntry {
                    timestamp: Utc::now(),
                    kind,
                    section: section.to_string(),
                    field: field.to_string(),
                    old_value: current.value,
                    new_value,
                    reason,
                });
                Ok((kind, updated))
            })
            .await?;

        info!(session_id = %id, section, field, decision = kind.as_str(), "Field updated");
        self.event_bus.emit_lossy(SessionEvent::FieldUpdated {
            session_id: id,
            section: section.to_string(),
            field: field.to_string(),
            decision: kind.as_str().to_string(),
            timestamp: Utc::now(),
        });
        Ok(updated)
    }

    /// Every field resolved
    pub async fn can_finalize(&self, id: Uuid) -> EngineResult<bool> {
        self.read_session(id, |session| Ok(session.can_finalize()))
            .await
    }

    pub async fn unresolved_fields(&self, id: Uuid) -> EngineResult<Vec<String>> {
        self.read_session(id, |session| Ok(session.fields().unresolved()))
            .await
    }

    pub async fn missing_required_fields(&self, id: Uuid) -> EngineResult<Vec<String>> {
        self.read_session(id, |session| {
            let schema = self.schema_for(&session.document_type)?;
            Ok(session.missing_required(&schema))
        })
        .await
    }

    /// Fields with outstanding conflicts
    pub async fn conflicts(&self, id: Uuid) -> EngineResult<Vec<FieldConflict>> {
        self.read_session(id, |session| {
            Ok(session
                .fields()
                .iter()
                .filter(|(_, _, f)| !f.conflicts.is_empty())
                .map(|(section, field, f)| FieldConflict {
                    section: section.to_string(),
                    field: field.to_string(),
                    value: f.value.clone(),
                    source: f.source.clone(),
                    conflicts: f.conflicts.clone(),
                })
                .collect())
        })
        .await
    }

    /// Render the current field set; never changes state
    pub async fn preview(&self, id: Uuid) -> EngineResult<String> {
        self.read_session(id, |session| {
            if !matches!(session.state(), SessionState::Reviewing | SessionState::Complete) {
                return Err(EngineError::InvalidState {
                    session_id: id,
                    expected: SessionState::Reviewing,
                    actual: session.state(),
                });
            }
            let schema = self.schema_for(&session.document_type)?;
            self.renderer
                .render(&schema, session.fields(), RenderMode::Preview)
                .map_err(|e| EngineError::RenderFailed {
                    session_id: id,
                    reason: e.to_string(),
                })
        })
        .await
    }

    /// Render once, write artifacts, then move to COMPLETE
    ///
    /// The gate check, the final render and the artifact snapshot happen in
    /// one write section that also marks the session finalizing; until the
    /// artifacts are written, edits, deletes and other finalize calls fail
    /// with `FinalizeInProgress`. A render or write failure leaves the
    /// session in REVIEWING.
    pub async fn finalize(&self, id: Uuid) -> EngineResult<FinalArtifacts> {
        let artifacts = self
            .with_session(id, |session| {
                session.require_editable()?;
                let unresolved = session.fields().unresolved();
                if !unresolved.is_empty() {
                    return Err(EngineError::NotReady {
                        session_id: id,
                        fields: unresolved,
                    });
                }

                let schema = self.schema_for(&session.document_type)?;
                let document = self
                    .renderer
                    .render(&schema, session.fields(), RenderMode::Final)
                    .map_err(|e| EngineError::RenderFailed {
                        session_id: id,
                        reason: e.to_string(),
                    })?;
                let artifacts = self.build_artifacts(session, document);
                session.set_finalizing(true);
                Ok(artifacts)
            })
            .await;

        let artifacts = match artifacts {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Finalize rejected");
                return Err(e);
            }
        };

        if let Some(writer) = &self.output {
            match writer.write(&artifacts).await {
                Ok(paths) => {
                    info!(session_id = %id, files = paths.len(), dir = %writer.session_dir(id).display(), "Artifacts written");
                }
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Writing artifacts failed");
                    let _ = self
                        .with_session(id, |session| {
                            session.set_finalizing(false);
                            Ok(())
                        })
                        .await;
                    return Err(EngineError::Output {
                        session_id: id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let transition = self
            .with_session(id, |session| {
                session.set_finalizing(false);
                let transition = session.transition_to(SessionState::Complete)?;
                session.finalized_at = Some(artifacts.execution.finalized_at);
                session.document = Some(artifacts.document.clone());
                Ok(transition)
            })
            .await?;
        self.announce(transition);

        info!(session_id = %id, "Session finalized");
        self.event_bus.emit_lossy(SessionEvent::SessionFinalized {
            session_id: id,
            timestamp: Utc::now(),
        });
        Ok(artifacts)
    }

    fn build_artifacts(&self, session: &DocumentSession, document: String) -> FinalArtifacts {
        let now = Utc::now();
        let decisions = session.decision_log().to_vec();

        let conflicts: Vec<ConflictReportEntry> = session
            .extraction_conflicts
            .iter()
            .map(|snapshot| {
                let current = session.fields().get(&snapshot.section, &snapshot.field);
                let user_selected = current.map_or(false, |f| f.user_edited);
                let resolved_at = decisions
                    .iter()
                    .rev()
                    .find(|d| d.section == snapshot.section && d.field == snapshot.field)
                    .map(|d| d.timestamp);
                ConflictReportEntry {
                    field: format!("{}.{}", snapshot.section, snapshot.field),
                    extracted_value: snapshot.extracted_value.clone(),
                    extracted_source: snapshot.extracted_source.clone(),
                    alternatives: snapshot.conflicts.clone(),
                    resolution: if user_selected {
                        "user_selected"
                    } else {
                        "agent_selected"
                    },
                    resolved_value: current.and_then(|f| f.value.clone()),
                    resolved_at,
                }
            })
            .collect();

        let input_tokens = session.model_calls.iter().map(|c| c.input_tokens).sum();
        let output_tokens = session.model_calls.iter().map(|c| c.output_tokens).sum();
        let conflicts_resolved = conflicts
            .iter()
            .filter(|c| c.resolution == "user_selected")
            .count();

        let execution = ExecutionLog {
            session_id: session.id,
            document_type: session.document_type.clone(),
            model: self.engine.model_name().to_string(),
            created_at: session.created_at,
            extraction_started_at: session.extraction_started_at,
            extraction_completed_at: session.extraction_completed_at,
            finalized_at: now,
            final_state: SessionState::Complete,
            model_calls: session.model_calls.len(),
            sections_failed: session.progress.sections_failed,
            input_tokens,
            output_tokens,
            estimated_cost_usd: self.cost_rates.estimate(input_tokens, output_tokens),
            user_decisions: decisions.len(),
            conflicts_resolved,
            calls: session.model_calls.clone(),
        };

        FinalArtifacts {
            session_id: session.id,
            document_type: session.document_type.clone(),
            generated_at: now,
            fields: session.fields().clone(),
            conflicts,
            decisions,
            document,
            execution,
        }
    }

    /// Snapshot of a session
    pub async fn get(&self, id: Uuid) -> EngineResult<DocumentSession> {
        self.read_session(id, |session| Ok(session.clone())).await
    }

    /// Remove a session; refused while a finalize is writing its artifacts
    pub async fn delete(&self, id: Uuid) -> EngineResult<()> {
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get(&id) {
                None => return Err(EngineError::SessionNotFound(id)),
                Some(session) if session.is_finalizing() => {
                    return Err(EngineError::FinalizeInProgress(id))
                }
                Some(_) => {}
            }
            sessions.remove(&id);
        }

        info!(session_id = %id, "Session deleted");
        self.event_bus.emit_lossy(SessionEvent::SessionDeleted {
            session_id: id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// `(id, state)` of every session, oldest first
    pub async fn list(&self) -> Vec<(Uuid, SessionState)> {
        let sessions = self.sessions.read().await;
        let mut entries: Vec<&DocumentSession> = sessions.values().collect();
        entries.sort_by_key(|s| (s.created_at, s.id));
        entries.into_iter().map(|s| (s.id, s.state())).collect()
    }
}
