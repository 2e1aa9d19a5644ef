//! Document session model and state machine
//!
//! INIT → EXTRACTING → REVIEWING → COMPLETE, one step at a time, never
//! backwards. The decision log is append-only and private; it is only
//! extended through `DocumentSession::record_decision`.

pub mod error;
pub mod manager;
mod merge;

pub use error::{EngineError, EngineResult};
pub use manager::{CostRates, ExtractionRun, FinalArtifacts, RunSummary, SessionManager};

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

use crate::schema::DocumentSchema;
use crate::types::{ConflictEntry, ExtractedField, FieldValue, ModelCallRecord};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    Init,
    Extracting,
    Reviewing,
    Complete,
}

impl SessionState {
    /// The only state this one may move to
    pub fn next(self) -> Option<SessionState> {
        match self {
            SessionState::Init => Some(SessionState::Extracting),
            SessionState::Extracting => Some(SessionState::Reviewing),
            SessionState::Reviewing => Some(SessionState::Complete),
            SessionState::Complete => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Complete
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Init => "INIT",
            SessionState::Extracting => "EXTRACTING",
            SessionState::Reviewing => "REVIEWING",
            SessionState::Complete => "COMPLETE",
        };
        write!(f, "{}", name)
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub session_id: Uuid,
    pub old_state: SessionState,
    pub new_state: SessionState,
    pub transitioned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    FieldEdit,
    Confirmation,
    ConflictResolution,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::FieldEdit => "field_edit",
            DecisionKind::Confirmation => "confirmation",
            DecisionKind::ConflictResolution => "conflict_resolution",
        }
    }
}

/// One human decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: DecisionKind,
    pub section: String,
    pub field: String,
    pub old_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct SectionEntry {
    name: String,
    fields: Vec<(String, ExtractedField)>,
}

/// Ordered section → field → ExtractedField store
///
/// Serializes as nested JSON objects in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStore {
    sections: Vec<SectionEntry>,
}

impl FieldStore {
    /// Every schema field, empty and unresolved
    pub fn from_schema(schema: &DocumentSchema) -> Self {
        Self {
            sections: schema
                .sections()
                .iter()
                .map(|s| SectionEntry {
                    name: s.name.clone(),
                    fields: s
                        .fields
                        .iter()
                        .map(|f| (f.name.clone(), ExtractedField::default()))
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn get(&self, section: &str, field: &str) -> Option<&ExtractedField> {
        self.sections
            .iter()
            .find(|s| s.name == section)
            .and_then(|s| s.fields.iter().find(|(name, _)| name == field))
            .map(|(_, f)| f)
    }

    pub fn get_mut(&mut self, section: &str, field: &str) -> Option<&mut ExtractedField> {
        self.sections
            .iter_mut()
            .find(|s| s.name == section)
            .and_then(|s| s.fields.iter_mut().find(|(name, _)| name == field))
            .map(|(_, f)| f)
    }

    /// Replace values of the named fields within a section
    pub fn replace_section(&mut self, section: &str, fields: Vec<(String, ExtractedField)>) {
        for (name, field) in fields {
            if let Some(slot) = self.get_mut(section, &name) {
                *slot = field;
            }
        }
    }

    /// `(section, field, value)` in schema order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &ExtractedField)> {
        self.sections.iter().flat_map(|s| {
            s.fields
                .iter()
                .map(move |(name, f)| (s.name.as_str(), name.as_str(), f))
        })
    }

    /// `section.field` names of every unresolved field
    pub fn unresolved(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, _, f)| !f.is_resolved())
            .map(|(s, n, _)| format!("{}.{}", s, n))
            .collect()
    }

    pub fn resolved_count(&self) -> usize {
        self.iter().filter(|(_, _, f)| f.is_resolved()).count()
    }

    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.fields.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct SectionView<'a>(&'a SectionEntry);

impl Serialize for SectionView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.fields.len()))?;
        for (name, field) in &self.0.fields {
            map.serialize_entry(name, field)?;
        }
        map.end()
    }
}

impl Serialize for FieldStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sections.len()))?;
        for section in &self.sections {
            map.serialize_entry(&section.name, &SectionView(section))?;
        }
        map.end()
    }
}

/// Conflicts as they stood when extraction finished
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictSnapshot {
    pub section: String,
    pub field: String,
    /// Value accepted at extraction time, if any
    pub extracted_value: Option<FieldValue>,
    pub extracted_source: Option<crate::types::SourceRef>,
    pub conflicts: Vec<ConflictEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionProgress {
    pub sections_total: usize,
    pub sections_attempted: usize,
    pub sections_failed: usize,
    pub current_section: Option<String>,
}

/// In-memory document session
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSession {
    pub id: Uuid,
    pub document_type: String,
    state: SessionState,
    sections: FieldStore,
    decision_log: Vec<DecisionLogEntry>,
    pub progress: ExtractionProgress,
    pub model_calls: Vec<ModelCallRecord>,
    pub extraction_conflicts: Vec<ConflictSnapshot>,
    pub created_at: DateTime<Utc>,
    pub extraction_started_at: Option<DateTime<Utc>>,
    pub extraction_completed_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    /// Final rendered document, set on COMPLETE
    pub document: Option<String>,
    /// Final render taken; artifacts are being written
    #[serde(skip)]
    finalizing: bool,
}

impl DocumentSession {
    pub fn new(schema: &DocumentSchema) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_type: schema.kind().to_string(),
            state: SessionState::Init,
            sections: FieldStore::from_schema(schema),
            decision_log: Vec::new(),
            progress: ExtractionProgress {
                sections_total: schema.sections().len(),
                ..ExtractionProgress::default()
            },
            model_calls: Vec::new(),
            extraction_conflicts: Vec::new(),
            created_at: Utc::now(),
            extraction_started_at: None,
            extraction_completed_at: None,
            finalized_at: None,
            document: None,
            finalizing: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn fields(&self) -> &FieldStore {
        &self.sections
    }

    pub(crate) fn fields_mut(&mut self) -> &mut FieldStore {
        &mut self.sections
    }

    pub fn decision_log(&self) -> &[DecisionLogEntry] {
        &self.decision_log
    }

    pub(crate) fn record_decision(&mut self, entry: DecisionLogEntry) {
        self.decision_log.push(entry);
    }

    /// Error unless the session is in `expected`
    pub fn require_state(&self, expected: SessionState) -> EngineResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                session_id: self.id,
                expected,
                actual: self.state,
            })
        }
    }

    /// Error unless review edits are accepted: REVIEWING with no finalize underway
    pub fn require_editable(&self) -> EngineResult<()> {
        self.require_state(SessionState::Reviewing)?;
        if self.finalizing {
            return Err(EngineError::FinalizeInProgress(self.id));
        }
        Ok(())
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing
    }

    pub(crate) fn set_finalizing(&mut self, finalizing: bool) {
        self.finalizing = finalizing;
    }

    /// Advance to `new_state`, which must be the immediate successor
    pub fn transition_to(&mut self, new_state: SessionState) -> EngineResult<StateTransition> {
        if self.state.next() != Some(new_state) {
            return Err(EngineError::InvalidState {
                session_id: self.id,
                expected: new_state,
                actual: self.state,
            });
        }

        let now = Utc::now();
        let transition = StateTransition {
            session_id: self.id,
            old_state: self.state,
            new_state,
            transitioned_at: now,
        };
        self.state = new_state;

        match new_state {
            SessionState::Extracting => self.extraction_started_at = Some(now),
            SessionState::Reviewing => self.extraction_completed_at = Some(now),
            SessionState::Complete => self.finalized_at = Some(now),
            SessionState::Init => {}
        }

        Ok(transition)
    }

    /// Pure gate: every field resolved
    pub fn can_finalize(&self) -> bool {
        self.sections.iter().all(|(_, _, f)| f.is_resolved())
    }

    /// Required fields that currently have no value
    pub fn missing_required(&self, schema: &DocumentSchema) -> Vec<String> {
        schema
            .fields()
            .filter(|(_, spec)| spec.required)
            .filter(|(section, spec)| {
                self.sections
                    .get(&section.name, &spec.name)
                    .map_or(true, |f| f.value.is_none())
            })
            .map(|(section, spec)| format!("{}.{}", section.name, spec.name))
            .collect()
    }
}
