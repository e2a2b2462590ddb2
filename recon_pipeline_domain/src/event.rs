// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Event Model
//!
//! Typed notifications emitted synchronously across the orchestrator (§3,
//! §6). A single [`Event`] envelope carries a [`EventKind`] discriminant plus
//! the contextual fields every consumer (engine, selector, resume system,
//! progress monitor) needs, so one sink type serves all of them.

use crate::value_objects::{PipelineId, StageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PipelineStarted,
    PipelineCompleted,
    PipelineFailed,
    PipelineCancelled,
    StageStarted,
    StageCompleted,
    StageFailed,
    StageRetrying,
    DependencyResolved,
    ProgressUpdate,
    MilestoneReached,
    EtaUpdated,
    SelectionStarted,
    ValidationStarted,
    ValidationCompleted,
    StageFiltered,
    ConstraintChecked,
    CacheHit,
    CacheMiss,
    SelectionCompleted,
    SelectionFailed,
    CheckpointCreated,
    RecoveryAttempted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub pipeline_id: Option<PipelineId>,
    pub stage_id: Option<StageId>,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            pipeline_id: None,
            stage_id: None,
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_pipeline(mut self, pipeline_id: PipelineId) -> Self {
        self.pipeline_id = Some(pipeline_id);
        self
    }

    pub fn with_stage(mut self, stage_id: StageId) -> Self {
        self.stage_id = Some(stage_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A synchronous event consumer. Implementations must not panic; the
/// emitter logs and swallows any panic caught at the call site (§6).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// No-op sink, useful as a default and in tests.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// In-memory sink that records every event it receives, for assertions.
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<Event>>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self {
            events: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind.clone()).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_emission_order() {
        let sink = RecordingSink::new();
        sink.emit(Event::new(EventKind::PipelineStarted, "start"));
        sink.emit(Event::new(EventKind::PipelineCompleted, "done"));

        let kinds = sink.kinds();
        assert_eq!(kinds, vec![EventKind::PipelineStarted, EventKind::PipelineCompleted]);
    }

    #[test]
    fn null_sink_drops_everything() {
        let sink = NullSink;
        sink.emit(Event::new(EventKind::ProgressUpdate, "50%"));
    }
}
