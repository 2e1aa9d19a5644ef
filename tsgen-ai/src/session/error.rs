//! Engine error taxonomy

use thiserror::Error;
use uuid::Uuid;

use super::SessionState;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown document type: {0}")]
    UnknownDocumentType(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session {session_id} is {actual}, operation requires {expected}")]
    InvalidState {
        session_id: Uuid,
        expected: SessionState,
        actual: SessionState,
    },

    #[error("Field not found: {section}.{field}")]
    FieldNotFound { section: String, field: String },

    #[error("Invalid value for {section}.{field}: {reason}")]
    InvalidValue {
        section: String,
        field: String,
        reason: String,
    },

    #[error("Conflict {index} not found for {section}.{field}")]
    ConflictNotFound {
        section: String,
        field: String,
        index: usize,
    },

    /// Absorbed inside `run`; reported per section, never returned by it
    #[error("Extraction failed for session {session_id}, section {section}: {reason}")]
    SectionExtractionFailed {
        session_id: Uuid,
        section: String,
        reason: String,
    },

    #[error("Session {session_id} is not ready to finalize: {} unresolved field(s)", fields.len())]
    NotReady { session_id: Uuid, fields: Vec<String> },

    /// Another finalize holds the final render for this session
    #[error("Session {0} is being finalized")]
    FinalizeInProgress(Uuid),

    #[error("Render failed for session {session_id}: {reason}")]
    RenderFailed { session_id: Uuid, reason: String },

    #[error("Writing artifacts failed for session {session_id}: {reason}")]
    Output { session_id: Uuid, reason: String },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
