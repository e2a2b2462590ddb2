// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Execution context (§4.E): the thread-safe state a running pipeline's
//! tasks all share -- per-stage results, a cancellation flag, and the event
//! sink every component reports through.

use crate::emit_safely;
use recon_pipeline_domain::{ErrorStrategy, Event, EventKind, EventSink, PipelineId, StageId, StageResult, StageStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct ExecutionContext {
    pipeline_id: PipelineId,
    results: parking_lot::RwLock<HashMap<StageId, StageResult>>,
    cancelled: AtomicBool,
    terminated: AtomicBool,
    error_strategy: ErrorStrategy,
    sink: Arc<dyn EventSink>,
}

impl ExecutionContext {
    pub fn new(pipeline_id: PipelineId, error_strategy: ErrorStrategy, sink: Arc<dyn EventSink>) -> Self {
        Self {
            pipeline_id,
            results: parking_lot::RwLock::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            error_strategy,
            sink,
        }
    }

    pub fn pipeline_id(&self) -> &PipelineId {
        &self.pipeline_id
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// A consistent point-in-time copy of every stage result recorded so far.
    pub fn snapshot(&self) -> HashMap<StageId, StageResult> {
        self.results.read().clone()
    }

    pub fn get_result(&self, id: &StageId) -> Option<StageResult> {
        self.results.read().get(id).cloned()
    }

    /// Replaces the slot for a stage and emits the matching lifecycle event.
    pub fn update_stage_result(&self, result: StageResult) {
        let kind = match result.status {
            StageStatus::Completed | StageStatus::Skipped => EventKind::StageCompleted,
            StageStatus::Failed => EventKind::StageFailed,
            StageStatus::Cancelled => EventKind::StageFailed,
            _ => EventKind::StageStarted,
        };
        let stage_id = result.stage_id.clone();

        self.results.write().insert(stage_id.clone(), result);

        if kind == EventKind::StageFailed && self.error_strategy == ErrorStrategy::FailFast {
            self.terminated.store(true, Ordering::Release);
        }

        emit_safely(
            &*self.sink,
            Event::new(kind, format!("stage '{stage_id}' updated"))
                .with_pipeline(self.pipeline_id.clone())
                .with_stage(stage_id),
        );
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// False once cancelled, or once the error strategy has declared the run
    /// terminated (fail_fast after a failure).
    pub fn should_continue(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire) && !self.terminated.load(Ordering::Acquire)
    }

    /// All listed dependencies completed, or skipped when `allow_failure` is
    /// set on the dependent stage (§4.F).
    pub fn dependencies_met(&self, dependencies: &std::collections::HashSet<StageId>, allow_failure: bool) -> bool {
        let results = self.results.read();
        dependencies.iter().all(|dep| match results.get(dep) {
            Some(result) => matches!(result.status, StageStatus::Completed) || (allow_failure && result.status.is_terminal()),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_pipeline_domain::{ErrorStrategy, NullSink};

    #[test]
    fn update_then_snapshot_round_trips() {
        let ctx = ExecutionContext::new(PipelineId::new(), ErrorStrategy::Continue, Arc::new(NullSink));
        let id = StageId::new("a").unwrap();
        ctx.update_stage_result(StageResult::pending(id.clone()));
        assert!(ctx.get_result(&id).is_some());
        assert_eq!(ctx.snapshot().len(), 1);
    }

    #[test]
    fn fail_fast_stops_continuation_after_failure() {
        let ctx = ExecutionContext::new(PipelineId::new(), ErrorStrategy::FailFast, Arc::new(NullSink));
        let id = StageId::new("a").unwrap();
        let now = chrono::Utc::now();
        ctx.update_stage_result(StageResult::failed(id, now, now, Some(1), "boom".to_string()));
        assert!(!ctx.should_continue());
    }

    #[test]
    fn cancel_stops_continuation() {
        let ctx = ExecutionContext::new(PipelineId::new(), ErrorStrategy::Continue, Arc::new(NullSink));
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(!ctx.should_continue());
    }
}
