// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Recon Pipeline Entry Point
//!
//! Thin composition shell (§4.K): parses and validates CLI arguments, loads
//! layered configuration, wires the thread pool / engine / resume system
//! together, installs signal handling for graceful shutdown, runs the
//! requested pipeline (optionally resuming a prior operation per §6), and
//! maps the result to a process exit code.

use recon_pipeline::checkpoint_storage::{CheckpointStorage, FileCheckpointStorage};
use recon_pipeline::config::{self as app_config, ErrorStrategy as ConfigErrorStrategy, ExecutionMode as ConfigExecutionMode};
use recon_pipeline::pipeline_engine::PipelineEngine;
use recon_pipeline::resume_system::{CheckpointTrigger, ResumeSystem, ResumeSystemConfig};
use recon_pipeline::thread_pool::{ThreadPool, ThreadPoolConfig};
use recon_pipeline_bootstrap::cli::{self, ResumeMode as CliResumeMode, ValidatedCli};
use recon_pipeline_bootstrap::shutdown::ShutdownCoordinator;
use recon_pipeline_bootstrap::signals;
use recon_pipeline_domain::{
    CheckpointGranularity, ErrorStrategy, Event, EventKind, EventSink, ExecutionConfig, ExecutionMode, Pipeline,
    PipelineId, ResumeMode, StageDefinition,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Logs every emitted event through `tracing` at a level matched to its
/// severity, instead of discarding it as [`recon_pipeline_domain::NullSink`]
/// would.
struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        match event.kind {
            EventKind::PipelineFailed | EventKind::StageFailed | EventKind::SelectionFailed => {
                tracing::error!(pipeline_id = ?event.pipeline_id, stage_id = ?event.stage_id, "{}", event.message);
            }
            EventKind::StageRetrying | EventKind::CacheMiss | EventKind::ValidationCompleted => {
                tracing::warn!(pipeline_id = ?event.pipeline_id, stage_id = ?event.stage_id, "{}", event.message);
            }
            _ => {
                tracing::info!(pipeline_id = ?event.pipeline_id, stage_id = ?event.stage_id, "{}", event.message);
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct PipelineDefinitionFile {
    name: String,
    #[serde(default)]
    stages: Vec<StageDefinition>,
}

fn load_pipeline(path: &Path) -> anyhow::Result<Pipeline> {
    let contents = std::fs::read_to_string(path)?;
    let definition: PipelineDefinitionFile = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)?,
        Some("json") => serde_json::from_str(&contents)?,
        _ => toml::from_str(&contents)?,
    };

    let mut pipeline = Pipeline::new(definition.name);
    for stage in definition.stages {
        pipeline.add_stage(stage)?;
    }
    Ok(pipeline)
}

fn to_domain_execution_mode(mode: ConfigExecutionMode) -> ExecutionMode {
    match mode {
        ConfigExecutionMode::Sequential => ExecutionMode::Sequential,
        ConfigExecutionMode::Parallel => ExecutionMode::Parallel,
        ConfigExecutionMode::Hybrid => ExecutionMode::Hybrid,
    }
}

fn to_domain_error_strategy(strategy: ConfigErrorStrategy) -> ErrorStrategy {
    match strategy {
        ConfigErrorStrategy::FailFast => ErrorStrategy::FailFast,
        ConfigErrorStrategy::Retry => ErrorStrategy::Retry,
        ConfigErrorStrategy::Skip => ErrorStrategy::Skip,
        ConfigErrorStrategy::Continue => ErrorStrategy::Continue,
    }
}

fn to_domain_resume_mode(mode: CliResumeMode) -> ResumeMode {
    match mode {
        CliResumeMode::Full => ResumeMode::Full,
        CliResumeMode::Last => ResumeMode::Last,
        CliResumeMode::Best => ResumeMode::Best,
        CliResumeMode::Interactive => ResumeMode::Interactive,
    }
}

async fn run(
    validated: ValidatedCli,
    engine: Arc<PipelineEngine>,
    resume_system: Arc<ResumeSystem>,
    exec_config: ExecutionConfig,
    id: PipelineId,
    name: String,
) -> anyhow::Result<()> {
    let operation_id = validated
        .resume
        .as_ref()
        .map(|r| r.operation_id.clone())
        .unwrap_or_else(|| id.to_string());
    engine.set_checkpoint_hook(Arc::clone(&resume_system), operation_id, CheckpointGranularity::Medium);

    let seed = if let Some(resume) = &validated.resume {
        let mode = to_domain_resume_mode(resume.mode);
        let context = match resume.mode {
            CliResumeMode::Best => resume_system.resume_automatically(&resume.operation_id)?,
            CliResumeMode::Interactive => {
                tracing::warn!("interactive resume is not available in a non-interactive shell; falling back to best");
                resume_system.resume_automatically(&resume.operation_id)?
            }
            CliResumeMode::Full | CliResumeMode::Last => {
                let checkpoints = resume_system.list_checkpoints(&resume.operation_id)?;
                let checkpoint_id = checkpoints.last().cloned().ok_or_else(|| {
                    anyhow::anyhow!("no checkpoints found for operation '{}'", resume.operation_id)
                })?;
                resume_system.resume_from(&checkpoint_id, mode, "operator-requested resume")?
            }
        };
        tracing::info!(
            operation_id = %context.operation_id,
            completed = context.completed_stages.len(),
            pending = context.pending_stages.len(),
            "resuming pipeline '{name}'"
        );
        context.stage_results
    } else {
        Default::default()
    };

    if validated.dry_run {
        tracing::info!(pipeline = %name, stages = pipeline_stage_count(&engine, &id), "dry run: execution plan only, no stage will be spawned");
    }

    let report = tokio::task::spawn_blocking(move || engine.execute_seeded(&id, &exec_config, seed)).await??;

    tracing::info!(
        pipeline_id = %report.pipeline_id,
        successful = report.statistics.successful_stages,
        failed = report.statistics.failed_stages,
        skipped = report.statistics.skipped_stages,
        cancelled = report.cancelled,
        wall_clock = ?report.statistics.wall_clock,
        "pipeline execution finished"
    );

    if report.cancelled || report.statistics.failed_stages > 0 {
        anyhow::bail!("pipeline '{name}' finished with {} failed stage(s)", report.statistics.failed_stages);
    }
    Ok(())
}

fn pipeline_stage_count(engine: &PipelineEngine, id: &PipelineId) -> usize {
    engine.get_pipeline(id).map(|p| p.stage_count()).unwrap_or(0)
}

fn main() -> std::process::ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return recon_pipeline_bootstrap::ExitCode::OsError.into();
        }
    };

    runtime.block_on(async_main())
}

async fn async_main() -> std::process::ExitCode {
    let validated = match cli::parse_and_validate() {
        Ok(v) => v,
        Err(err) => {
            eprintln!("{err}");
            return recon_pipeline_bootstrap::ExitCode::UsageError.into();
        }
    };

    let resolved = match app_config::load(validated.config.as_deref()) {
        Ok(r) => r,
        Err(err) => {
            eprintln!("{err}");
            return recon_pipeline_bootstrap::ExitCode::Config.into();
        }
    };

    let app = resolved.app.clone();
    recon_pipeline::logging::init(&recon_pipeline_bootstrap::config::AppConfig::builder()
        .log_level(app.log_level())
        .log_format(app.log_format())
        .verbose(validated.verbose || app.is_verbose())
        .build());

    let min_threads = validated.min_threads.unwrap_or(app.default_min_threads());
    let max_threads = validated.max_threads.unwrap_or(app.default_max_threads());
    let pool = Arc::new(ThreadPool::new(ThreadPoolConfig {
        initial_threads: min_threads,
        max_threads: max_threads.max(min_threads),
        min_threads,
        ..ThreadPoolConfig::default()
    }));

    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let engine = Arc::new(PipelineEngine::new(Arc::clone(&pool), Arc::clone(&sink)));

    let storage = Arc::new(FileCheckpointStorage::new(app.checkpoint_dir().clone()));
    let resume_system = Arc::new(ResumeSystem::new(
        storage,
        ResumeSystemConfig {
            trigger: CheckpointTrigger::TimeBased { interval: Duration::from_secs(resolved.engine.resume_trigger_interval_secs) },
            ..ResumeSystemConfig::default()
        },
        Arc::clone(&sink),
    ));

    let exec_config = ExecutionConfig {
        mode: validated
            .execution_mode
            .as_deref()
            .and_then(|m| m.parse::<ConfigExecutionMode>().ok())
            .map(to_domain_execution_mode)
            .unwrap_or_else(|| to_domain_execution_mode(resolved.engine.execution_mode)),
        error_strategy: validated
            .error_strategy
            .as_deref()
            .and_then(|s| s.parse::<ConfigErrorStrategy>().ok())
            .map(to_domain_error_strategy)
            .unwrap_or_else(|| to_domain_error_strategy(resolved.engine.error_strategy)),
        max_concurrent_stages: resolved.engine.max_concurrent_stages,
        dry_run: validated.dry_run || app.is_dry_run(),
        ..ExecutionConfig::default()
    };

    let pipeline = match load_pipeline(&validated.pipeline) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("{err}");
            return recon_pipeline_bootstrap::ExitCode::Config.into();
        }
    };
    let id = pipeline.id().clone();
    let name = pipeline.name().to_string();
    if let Err(err) = engine.install_pipeline(id.clone(), pipeline) {
        eprintln!("{err}");
        return recon_pipeline_bootstrap::ExitCode::Config.into();
    }

    let shutdown = ShutdownCoordinator::new(Duration::from_secs(10));
    let signal_handler = signals::create_signal_handler();
    let engine_for_signal = Arc::clone(&engine);
    let id_for_signal = id.clone();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        signal_handler
            .wait_for_signal(Box::new(move || {
                shutdown_for_signal.initiate_shutdown();
                engine_for_signal.cancel(&id_for_signal);
            }))
            .await;
    });

    let pipeline_path = validated.pipeline.clone();
    let run_result = tokio::select! {
        result = run(validated, Arc::clone(&engine), resume_system, exec_config, id, name) => result,
        _ = shutdown.token().cancelled() => {
            tracing::warn!(pipeline = %pipeline_path.display(), "shutdown requested before pipeline completed");
            Err(anyhow::anyhow!("shutdown requested"))
        }
    };

    match run_result {
        Ok(()) => recon_pipeline_bootstrap::ExitCode::Success.into(),
        Err(err) => {
            let code = recon_pipeline_bootstrap::ExitCode::from_error(&PipelineErrorDisplay(err.to_string()));
            tracing::error!("{err:#}");
            code.into()
        }
    }
}

/// Wraps an already-formatted error string so [`recon_pipeline_bootstrap::ExitCode::from_error`]
/// can classify `anyhow` chains, which don't themselves implement
/// `std::error::Error` in a way that exposes the full chain's text.
#[derive(Debug)]
struct PipelineErrorDisplay(String);

impl std::fmt::Display for PipelineErrorDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PipelineErrorDisplay {}
