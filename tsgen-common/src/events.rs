//! Event types for the session event system
//!
//! Sessions report extraction progress and review activity through the
//! EventBus. Subscribers (CLI progress output, logging, tests) receive
//! every event emitted after they subscribe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Session lifecycle and progress events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// New session created in INIT
    SessionStarted {
        session_id: Uuid,
        document_type: String,
        timestamp: DateTime<Utc>,
    },

    /// Lifecycle state advanced one step
    StateChanged {
        session_id: Uuid,
        /// `INIT`, `EXTRACTING`, `REVIEWING` or `COMPLETE`
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// Session entered EXTRACTING
    ExtractionStarted {
        session_id: Uuid,
        sections_total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Model call for a section is about to be made
    SectionStarted {
        session_id: Uuid,
        section: String,
        /// 1-based position in schema order
        index: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Section merged into the field store
    SectionCompleted {
        session_id: Uuid,
        section: String,
        resolved: usize,
        unresolved: usize,
        timestamp: DateTime<Utc>,
    },

    /// Section degraded to not-found after a model, parse or source failure
    SectionFailed {
        session_id: Uuid,
        section: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Every section attempted; session entered REVIEWING
    ExtractionCompleted {
        session_id: Uuid,
        resolved: usize,
        unresolved: usize,
        sections_failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Human edit, confirmation or conflict resolution applied
    FieldUpdated {
        session_id: Uuid,
        section: String,
        field: String,
        decision: String,
        timestamp: DateTime<Utc>,
    },

    /// Session entered COMPLETE
    SessionFinalized {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Session removed from memory
    SessionDeleted {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Event type name (matches the serialized `type` tag)
    pub fn event_type(&self) -> &str {
        match self {
            SessionEvent::SessionStarted { .. } => "session_started",
            SessionEvent::StateChanged { .. } => "state_changed",
            SessionEvent::ExtractionStarted { .. } => "extraction_started",
            SessionEvent::SectionStarted { .. } => "section_started",
            SessionEvent::SectionCompleted { .. } => "section_completed",
            SessionEvent::SectionFailed { .. } => "section_failed",
            SessionEvent::ExtractionCompleted { .. } => "extraction_completed",
            SessionEvent::FieldUpdated { .. } => "field_updated",
            SessionEvent::SessionFinalized { .. } => "session_finalized",
            SessionEvent::SessionDeleted { .. } => "session_deleted",
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::SessionStarted { session_id, .. }
            | SessionEvent::StateChanged { session_id, .. }
            | SessionEvent::ExtractionStarted { session_id, .. }
            | SessionEvent::SectionStarted { session_id, .. }
            | SessionEvent::SectionCompleted { session_id, .. }
            | SessionEvent::SectionFailed { session_id, .. }
            | SessionEvent::ExtractionCompleted { session_id, .. }
            | SessionEvent::FieldUpdated { session_id, .. }
            | SessionEvent::SessionFinalized { session_id, .. }
            | SessionEvent::SessionDeleted { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast bus for session events
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SessionEvent,
    ) -> Result<usize, broadcast::error::SendError<SessionEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
