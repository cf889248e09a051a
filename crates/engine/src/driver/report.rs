use std::fmt;

use serde::Serialize;

use crate::error::{EngineError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Creates,
    Patches,
}

/// One failure observed during a drain cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncErrorEvent {
    pub entity_id: String,
    pub phase: SyncPhase,
    #[serde(serialize_with = "serialize_kind")]
    pub kind: ErrorKind,
    pub message: String,
}

fn serialize_kind<S: serde::Serializer>(kind: &ErrorKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(match kind {
        ErrorKind::Conflict => "conflict",
        ErrorKind::Transient => "transient",
        ErrorKind::Validation => "validation",
        ErrorKind::ProtocolViolation => "protocol_violation",
        ErrorKind::Local => "local",
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedMapping {
    pub temp_id: String,
    pub server_id: String,
}

/// Outcome of one drain cycle. Background cycles never fail; everything
/// that went wrong is listed in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Another cycle was already running; this call did nothing.
    pub skipped: bool,
    pub created: Vec<CreatedMapping>,
    pub patches_sent: usize,
    pub conflicts_recovered: usize,
    /// Creation draining stopped before the queue was empty.
    pub creates_halted: bool,
    pub errors: Vec<SyncErrorEvent>,
}

impl SyncReport {
    pub(crate) fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, entity_id: &str, phase: SyncPhase, err: &EngineError) {
        self.errors.push(SyncErrorEvent {
            entity_id: entity_id.to_string(),
            phase,
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub(crate) fn absorb(&mut self, entity_id: &str, phase: SyncPhase, outcome: &DrainOutcome) {
        self.patches_sent += outcome.sent;
        self.conflicts_recovered += outcome.conflicts;
        if let Some(err) = &outcome.halt {
            self.record(entity_id, phase, err);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.creates_halted
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped {
            return write!(f, "sync already in progress");
        }
        write!(
            f,
            "created {}, patches sent {}, conflicts recovered {}",
            self.created.len(),
            self.patches_sent,
            self.conflicts_recovered
        )?;
        for event in &self.errors {
            write!(f, "\n  {:?} {}: {}", event.phase, event.entity_id, event.message)?;
        }
        Ok(())
    }
}

/// Result of draining one entity's patch queue.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    pub sent: usize,
    pub conflicts: usize,
    /// Why draining stopped with jobs left, if it did.
    pub halt: Option<EngineError>,
    /// Background drain skipped an entity held after a validation failure.
    pub held: bool,
}

impl DrainOutcome {
    pub fn halted(err: EngineError) -> Self {
        Self {
            halt: Some(err),
            ..Self::default()
        }
    }

    pub fn completed(&self) -> bool {
        self.halt.is_none() && !self.held
    }
}
