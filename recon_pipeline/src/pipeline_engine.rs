// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! The pipeline engine (§4.G): owns the pipeline registry and drives
//! executions in sequential, parallel, or hybrid mode according to an
//! [`ExecutionConfig`].

use crate::dependency_resolver::DependencyResolver;
use crate::emit_safely;
use crate::execution_context::ExecutionContext;
use crate::pipeline_task::PipelineTask;
use crate::resume_system::ResumeSystem;
use crate::thread_pool::{TaskPriority, ThreadPool};
use recon_pipeline_domain::{
    CheckpointGranularity, ErrorStrategy, Event, EventKind, EventSink, ExecutionConfig, ExecutionMode, Pipeline,
    PipelineError, PipelineId, PipelineStateSnapshot, StageId, StageResult, StageStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Binds a [`ResumeSystem`] to a running operation so the engine can trigger
/// checkpoints from its own post-stage hook (§4.G, "its caller is typically
/// the monitoring thread or the engine's post-stage hook") rather than
/// requiring an embedder to poll progress and call it externally.
pub struct CheckpointHook {
    pub resume: Arc<ResumeSystem>,
    pub operation_id: String,
    pub granularity: CheckpointGranularity,
}

#[derive(Debug, Clone)]
pub struct ExecutionStatistics {
    pub total_stages: usize,
    pub successful_stages: usize,
    pub failed_stages: usize,
    pub skipped_stages: usize,
    pub success_rate: f64,
    pub wall_clock: Duration,
    pub critical_path: Vec<StageId>,
    pub peak_concurrent_stages: usize,
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub pipeline_id: PipelineId,
    pub results: HashMap<StageId, StageResult>,
    pub statistics: ExecutionStatistics,
    pub cancelled: bool,
}

pub struct PipelineEngine {
    pipelines: parking_lot::RwLock<HashMap<PipelineId, Pipeline>>,
    contexts: parking_lot::RwLock<HashMap<PipelineId, Arc<ExecutionContext>>>,
    paused: parking_lot::RwLock<HashSet<PipelineId>>,
    pool: Arc<ThreadPool>,
    resolver: DependencyResolver,
    sink: Arc<dyn EventSink>,
    checkpoint_hook: parking_lot::RwLock<Option<Arc<CheckpointHook>>>,
}

impl PipelineEngine {
    pub fn new(pool: Arc<ThreadPool>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            pipelines: parking_lot::RwLock::new(HashMap::new()),
            contexts: parking_lot::RwLock::new(HashMap::new()),
            paused: parking_lot::RwLock::new(HashSet::new()),
            pool,
            resolver: DependencyResolver::new(),
            sink,
            checkpoint_hook: parking_lot::RwLock::new(None),
        }
    }

    /// Arms automatic checkpointing: after every completed stage the engine
    /// asks `resume`'s configured trigger whether a checkpoint is due for
    /// `operation_id`, and if so persists one (§4.I).
    pub fn set_checkpoint_hook(&self, resume: Arc<ResumeSystem>, operation_id: impl Into<String>, granularity: CheckpointGranularity) {
        let operation_id = operation_id.into();
        resume.begin_operation(operation_id.clone());
        *self.checkpoint_hook.write() = Some(Arc::new(CheckpointHook { resume, operation_id, granularity }));
    }

    pub fn clear_checkpoint_hook(&self) {
        *self.checkpoint_hook.write() = None;
    }

    fn maybe_checkpoint(&self, pipeline: &Pipeline, ctx: &ExecutionContext, last_stage: &StageId) {
        let Some(hook) = self.checkpoint_hook.read().clone() else { return };
        let results = ctx.snapshot();
        let total = pipeline.stage_count().max(1);
        let completed = results.values().filter(|r| r.status.is_successful_terminal()).count();
        let progress_percent = completed as f64 / total as f64 * 100.0;

        if !hook.resume.should_checkpoint(&hook.operation_id, progress_percent, 0) {
            return;
        }

        let completed_stages: Vec<StageId> = results
            .iter()
            .filter(|(_, r)| r.status.is_successful_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        let pending_stages: Vec<StageId> = pipeline
            .stages()
            .map(|s| s.id.clone())
            .filter(|id| !results.contains_key(id))
            .collect();

        let snapshot = PipelineStateSnapshot {
            completed_stages,
            pending_stages,
            stage_results: results,
        };

        if let Err(err) = hook.resume.create_checkpoint(&hook.operation_id, last_stage.as_str(), hook.granularity, progress_percent, &snapshot) {
            tracing::warn!(operation_id = %hook.operation_id, stage = %last_stage, "checkpoint creation failed: {err}");
        }
    }

    pub fn create_pipeline(&self, name: impl Into<String>) -> PipelineId {
        let pipeline = Pipeline::new(name);
        let id = pipeline.id().clone();
        self.pipelines.write().insert(id.clone(), pipeline);
        id
    }

    /// Registers an already-built [`Pipeline`] (e.g. loaded from a
    /// definition file) under its own id, rather than minting a fresh empty
    /// one via [`PipelineEngine::create_pipeline`].
    pub fn install_pipeline(&self, id: PipelineId, pipeline: Pipeline) -> Result<(), PipelineError> {
        pipeline.validate()?;
        self.pipelines.write().insert(id, pipeline);
        Ok(())
    }

    pub fn list_pipelines(&self) -> Vec<PipelineId> {
        self.pipelines.read().keys().cloned().collect()
    }

    pub fn get_pipeline(&self, id: &PipelineId) -> Option<Pipeline> {
        self.pipelines.read().get(id).cloned()
    }

    pub fn remove_pipeline(&self, id: &PipelineId) -> Result<Pipeline, PipelineError> {
        self.pipelines
            .write()
            .remove(id)
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline '{id}' not found")))
    }

    pub fn with_pipeline<R>(&self, id: &PipelineId, f: impl FnOnce(&mut Pipeline) -> Result<R, PipelineError>) -> Result<R, PipelineError> {
        let mut pipelines = self.pipelines.write();
        let pipeline = pipelines.get_mut(id).ok_or_else(|| PipelineError::NotFound(format!("pipeline '{id}' not found")))?;
        f(pipeline)
    }

    /// Pause suspends submission of *new* stages; in-flight work is not
    /// interrupted. Resume lifts the suspension. Cancel additionally sets
    /// the run's cancellation flag so in-flight tasks stop at their next
    /// checkpoint (§4.G).
    pub fn pause(&self, id: &PipelineId) {
        self.paused.write().insert(id.clone());
    }

    pub fn resume(&self, id: &PipelineId) {
        self.paused.write().remove(id);
    }

    pub fn cancel(&self, id: &PipelineId) {
        self.paused.write().remove(id);
        if let Some(ctx) = self.contexts.read().get(id) {
            ctx.cancel();
        }
    }

    pub fn progress(&self, id: &PipelineId) -> Option<HashMap<StageId, StageResult>> {
        self.contexts.read().get(id).map(|ctx| ctx.snapshot())
    }

    pub fn execute(&self, id: &PipelineId, config: &ExecutionConfig) -> Result<ExecutionReport, PipelineError> {
        self.execute_seeded(id, config, HashMap::new())
    }

    /// Executes `id`, pre-populating the run's context with `seed` results
    /// (typically a resumed operation's already-completed stages, §4.I) so
    /// scheduling treats them as satisfied dependencies instead of re-running
    /// them.
    pub fn execute_seeded(&self, id: &PipelineId, config: &ExecutionConfig, seed: HashMap<StageId, StageResult>) -> Result<ExecutionReport, PipelineError> {
        let pipeline = self
            .pipelines
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline '{id}' not found")))?;

        pipeline.validate()?;
        let resolved = self.resolver.resolve(&pipeline)?;

        self.with_pipeline(id, |p| {
            p.mark_execution_active(true);
            Ok(())
        })?;

        let ctx = Arc::new(ExecutionContext::new(id.clone(), config.error_strategy, Arc::clone(&self.sink)));
        for result in seed.into_values() {
            ctx.update_stage_result(result);
        }
        self.contexts.write().insert(id.clone(), Arc::clone(&ctx));

        emit_safely(&*self.sink, Event::new(EventKind::PipelineStarted, "pipeline started").with_pipeline(id.clone()));

        let start = Instant::now();
        let peak_concurrent = Arc::new(AtomicUsize::new(0));

        match config.mode {
            ExecutionMode::Sequential => {
                self.run_sequential(&pipeline, &resolved.execution_order, &ctx, config);
            }
            ExecutionMode::Parallel => {
                self.run_parallel(&pipeline, &resolved.execution_levels, &ctx, config, &peak_concurrent);
            }
            ExecutionMode::Hybrid => {
                self.run_hybrid(&pipeline, &resolved.execution_order, &ctx, config, &peak_concurrent);
            }
        }

        if start.elapsed() > config.global_timeout {
            ctx.cancel();
        }

        self.with_pipeline(id, |p| {
            p.mark_execution_active(false);
            Ok(())
        })?;

        let results = ctx.snapshot();
        let statistics = compute_statistics(&pipeline, &results, start.elapsed(), &resolved.critical_path, peak_concurrent.load(Ordering::Relaxed));

        let cancelled = ctx.is_cancelled();
        emit_safely(
            &*self.sink,
            Event::new(
                if cancelled || statistics.failed_stages > 0 {
                    EventKind::PipelineFailed
                } else {
                    EventKind::PipelineCompleted
                },
                "pipeline execution finished",
            )
            .with_pipeline(id.clone()),
        );

        Ok(ExecutionReport {
            pipeline_id: id.clone(),
            results,
            statistics,
            cancelled,
        })
    }

    fn run_sequential(&self, pipeline: &Pipeline, order: &[StageId], ctx: &Arc<ExecutionContext>, config: &ExecutionConfig) {
        for id in order {
            if !ctx.should_continue() || self.paused.read().contains(ctx.pipeline_id()) {
                break;
            }
            let Some(stage) = pipeline.get_stage(id) else { continue };
            execute_with_strategy(stage, ctx, &config.environment, config.dry_run, config.error_strategy);
            self.maybe_checkpoint(pipeline, ctx.as_ref(), id);
        }
    }

    fn run_parallel(
        &self,
        pipeline: &Pipeline,
        levels: &[Vec<StageId>],
        ctx: &Arc<ExecutionContext>,
        config: &ExecutionConfig,
        peak_concurrent: &Arc<AtomicUsize>,
    ) {
        for level in levels {
            if !ctx.should_continue() {
                break;
            }
            let (tx, rx) = crossbeam::channel::bounded(level.len().max(1));
            let mut submitted = 0usize;

            for chunk in level.chunks(config.max_concurrent_stages.max(1)) {
                if !ctx.should_continue() {
                    break;
                }
                for id in chunk {
                    let Some(stage) = pipeline.get_stage(id) else { continue };
                    let stage = stage.clone();
                    let ctx = Arc::clone(ctx);
                    let tx = tx.clone();
                    let base_env = config.environment.clone();
                    let dry_run = config.dry_run;
                    let error_strategy = config.error_strategy;
                    peak_concurrent.fetch_max(submitted + 1, Ordering::Relaxed);
                    submitted += 1;
                    let _ = self.pool.submit(format!("stage:{}", stage.id), TaskPriority::Normal, move || {
                        execute_with_strategy(&stage, &ctx, &base_env, dry_run, error_strategy);
                        let _ = tx.send(());
                    });
                }
                for _ in chunk {
                    let _ = rx.recv_timeout(Duration::from_secs(3600));
                }
                if let Some(last) = chunk.last() {
                    self.maybe_checkpoint(pipeline, ctx.as_ref(), last);
                }
            }
        }
    }

    fn run_hybrid(
        &self,
        pipeline: &Pipeline,
        all_ids: &[StageId],
        ctx: &Arc<ExecutionContext>,
        config: &ExecutionConfig,
        peak_concurrent: &Arc<AtomicUsize>,
    ) {
        let (tx, rx) = crossbeam::channel::unbounded::<StageId>();
        let mut remaining: HashSet<StageId> = all_ids.iter().cloned().collect();
        let mut submitted: HashSet<StageId> = HashSet::new();
        let in_flight = Arc::new(AtomicUsize::new(0));

        loop {
            if !ctx.should_continue() || remaining.is_empty() {
                break;
            }

            let mut ready: Vec<StageId> = remaining
                .iter()
                .filter(|id| !submitted.contains(*id))
                .filter(|id| {
                    pipeline
                        .get_stage(id)
                        .map(|s| s.dependencies.iter().all(|d| !remaining.contains(d)))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            ready.sort();
            let had_ready = !ready.is_empty();

            for id in ready {
                if in_flight.load(Ordering::Relaxed) >= config.max_concurrent_stages {
                    break;
                }
                let Some(stage) = pipeline.get_stage(&id) else { continue };
                let stage = stage.clone();
                let ctx = Arc::clone(ctx);
                let tx = tx.clone();
                let base_env = config.environment.clone();
                let dry_run = config.dry_run;
                let error_strategy = config.error_strategy;
                let in_flight = Arc::clone(&in_flight);

                in_flight.fetch_add(1, Ordering::Relaxed);
                peak_concurrent.fetch_max(in_flight.load(Ordering::Relaxed), Ordering::Relaxed);
                submitted.insert(id.clone());

                let _ = self.pool.submit(format!("stage:{}", stage.id), TaskPriority::Normal, move || {
                    execute_with_strategy(&stage, &ctx, &base_env, dry_run, error_strategy);
                    in_flight.fetch_sub(1, Ordering::Relaxed);
                    let _ = tx.send(stage.id);
                });
            }

            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(completed) => {
                    remaining.remove(&completed);
                    self.maybe_checkpoint(pipeline, ctx.as_ref(), &completed);
                }
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                    if in_flight.load(Ordering::Relaxed) == 0 && !had_ready {
                        // nothing in flight and nothing newly ready: remaining stages
                        // can never become ready (e.g. a skipped/failed dependency).
                        break;
                    }
                }
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            }
        }

        // drain remaining completion signals so submitted tasks are accounted for.
        while in_flight.load(Ordering::Relaxed) > 0 {
            if rx.recv_timeout(Duration::from_secs(3600)).is_err() {
                break;
            }
        }
    }
}

fn execute_with_strategy(
    stage: &recon_pipeline_domain::StageDefinition,
    ctx: &ExecutionContext,
    base_env: &HashMap<String, String>,
    dry_run: bool,
    error_strategy: ErrorStrategy,
) {
    if matches!(ctx.get_result(&stage.id).map(|r| r.status), Some(StageStatus::Completed) | Some(StageStatus::Skipped)) {
        return;
    }

    let mut result = PipelineTask::execute(stage, ctx, base_env, dry_run);

    if result.status == StageStatus::Failed {
        match error_strategy {
            ErrorStrategy::FailFast => ctx.cancel(),
            ErrorStrategy::Retry => {
                let mut attempts = 0;
                while result.status == StageStatus::Failed && attempts < stage.max_retries {
                    attempts += 1;
                    result = PipelineTask::execute(stage, ctx, base_env, dry_run);
                }
            }
            // The failed stage itself keeps its `Failed` result; its
            // dependents are what get marked `Skipped`, and that already
            // happens uniformly via `ExecutionContext::dependencies_met`
            // when their own task runs (§3's ready->skipped transition).
            ErrorStrategy::Skip | ErrorStrategy::Continue => {}
        }
    }
}

fn compute_statistics(
    pipeline: &Pipeline,
    results: &HashMap<StageId, StageResult>,
    wall_clock: Duration,
    critical_path: &[StageId],
    peak_concurrent_stages: usize,
) -> ExecutionStatistics {
    let total_stages = pipeline.stage_count();
    let successful_stages = results.values().filter(|r| r.status == StageStatus::Completed).count();
    let failed_stages = results.values().filter(|r| r.status == StageStatus::Failed).count();
    let skipped_stages = results.values().filter(|r| r.status == StageStatus::Skipped).count();
    let success_rate = if total_stages == 0 {
        0.0
    } else {
        successful_stages as f64 / total_stages as f64
    };

    ExecutionStatistics {
        total_stages,
        successful_stages,
        failed_stages,
        skipped_stages,
        success_rate,
        wall_clock,
        critical_path: critical_path.to_vec(),
        peak_concurrent_stages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_pool::ThreadPoolConfig;
    use recon_pipeline_domain::{ExecutionMode, NullSink, StageDefinition};

    fn engine() -> PipelineEngine {
        let pool = Arc::new(ThreadPool::new(ThreadPoolConfig {
            initial_threads: 2,
            enable_auto_scaling: false,
            ..Default::default()
        }));
        PipelineEngine::new(pool, Arc::new(NullSink))
    }

    #[test]
    fn dry_run_sequential_completes_every_stage() {
        let engine = engine();
        let id = engine.create_pipeline("recon");
        engine
            .with_pipeline(&id, |p| {
                p.add_stage(StageDefinition::new("a", "/bin/true").unwrap())?;
                p.add_stage(StageDefinition::new("b", "/bin/true").unwrap().with_dependency(StageId::new("a").unwrap()))?;
                Ok(())
            })
            .unwrap();

        let config = ExecutionConfig::default().with_dry_run(true);
        let report = engine.execute(&id, &config).unwrap();
        assert_eq!(report.statistics.successful_stages, 2);
        assert!(!report.cancelled);
    }

    #[test]
    fn parallel_mode_runs_independent_stages() {
        let engine = engine();
        let id = engine.create_pipeline("fanout");
        engine
            .with_pipeline(&id, |p| {
                p.add_stage(StageDefinition::new("root", "/bin/true").unwrap())?;
                p.add_stage(StageDefinition::new("left", "/bin/true").unwrap().with_dependency(StageId::new("root").unwrap()))?;
                p.add_stage(StageDefinition::new("right", "/bin/true").unwrap().with_dependency(StageId::new("root").unwrap()))?;
                Ok(())
            })
            .unwrap();

        let config = ExecutionConfig::default()
            .with_mode(ExecutionMode::Parallel)
            .with_dry_run(true);
        let report = engine.execute(&id, &config).unwrap();
        assert_eq!(report.statistics.successful_stages, 3);
    }

    #[test]
    fn skip_strategy_leaves_failed_stage_failed_and_skips_dependents() {
        // Linear A -> B -> C -> D; B fails for real, C and D are transitive
        // dependents and must both end up Skipped, not just the direct one.
        let engine = engine();
        let id = engine.create_pipeline("recon");
        engine
            .with_pipeline(&id, |p| {
                p.add_stage(StageDefinition::new("a", "/bin/true").unwrap())?;
                p.add_stage(StageDefinition::new("b", "/bin/false").unwrap().with_dependency(StageId::new("a").unwrap()))?;
                p.add_stage(StageDefinition::new("c", "/bin/true").unwrap().with_dependency(StageId::new("b").unwrap()))?;
                p.add_stage(StageDefinition::new("d", "/bin/true").unwrap().with_dependency(StageId::new("c").unwrap()))?;
                Ok(())
            })
            .unwrap();

        let config = ExecutionConfig::default()
            .with_mode(ExecutionMode::Sequential)
            .with_error_strategy(ErrorStrategy::Skip);
        let report = engine.execute(&id, &config).unwrap();

        let results = &report.results;
        assert_eq!(results.get(&StageId::new("a").unwrap()).unwrap().status, StageStatus::Completed);
        assert_eq!(results.get(&StageId::new("b").unwrap()).unwrap().status, StageStatus::Failed);
        assert_eq!(results.get(&StageId::new("c").unwrap()).unwrap().status, StageStatus::Skipped);
        assert_eq!(results.get(&StageId::new("d").unwrap()).unwrap().status, StageStatus::Skipped);
        assert_eq!(report.statistics.success_rate, 0.25);
    }

    #[test]
    fn fail_fast_strategy_cancels_remaining_work() {
        let engine = engine();
        let id = engine.create_pipeline("recon");
        engine
            .with_pipeline(&id, |p| {
                p.add_stage(StageDefinition::new("a", "/bin/false").unwrap())?;
                p.add_stage(StageDefinition::new("b", "/bin/true").unwrap().with_dependency(StageId::new("a").unwrap()))?;
                Ok(())
            })
            .unwrap();

        let config = ExecutionConfig::default()
            .with_mode(ExecutionMode::Sequential)
            .with_error_strategy(ErrorStrategy::FailFast);
        let report = engine.execute(&id, &config).unwrap();

        assert_eq!(report.results.get(&StageId::new("a").unwrap()).unwrap().status, StageStatus::Failed);
        assert!(report.cancelled);
    }

    #[test]
    fn unknown_pipeline_is_not_found() {
        let engine = engine();
        let err = engine.execute(&PipelineId::new(), &ExecutionConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[test]
    fn checkpoint_hook_persists_progress_during_a_run() {
        use crate::checkpoint_storage::InMemoryCheckpointStorage;
        use crate::resume_system::{CheckpointTrigger, ResumeSystem, ResumeSystemConfig};

        let engine = engine();
        let id = engine.create_pipeline("recon");
        engine
            .with_pipeline(&id, |p| {
                p.add_stage(StageDefinition::new("a", "/bin/true").unwrap())?;
                p.add_stage(StageDefinition::new("b", "/bin/true").unwrap().with_dependency(StageId::new("a").unwrap()))?;
                Ok(())
            })
            .unwrap();

        let resume = Arc::new(ResumeSystem::new(
            Arc::new(InMemoryCheckpointStorage::new()),
            ResumeSystemConfig {
                trigger: CheckpointTrigger::ProgressBased { threshold_percent: 0.0 },
                compress: false,
                ..Default::default()
            },
            Arc::new(NullSink),
        ));
        engine.set_checkpoint_hook(Arc::clone(&resume), "op1", CheckpointGranularity::Medium);

        let config = ExecutionConfig::default().with_dry_run(true);
        let report = engine.execute(&id, &config).unwrap();
        assert_eq!(report.statistics.successful_stages, 2);

        let checkpoints = resume.list_checkpoints("op1").unwrap();
        assert!(!checkpoints.is_empty());
    }
}
