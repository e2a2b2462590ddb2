// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! One invocation of one stage within one context (§4.F).

use crate::execution_context::ExecutionContext;
use recon_pipeline_domain::{PipelineError, StageDefinition, StageResult};
use std::collections::HashMap;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct PipelineTask;

impl PipelineTask {
    /// Runs `stage` to a terminal [`StageResult`], applying condition and
    /// cancellation checks, dependency gating, process invocation with
    /// timeout, and the stage's own retry policy, then records the result
    /// on `ctx` before returning it.
    pub fn execute(stage: &StageDefinition, ctx: &ExecutionContext, base_env: &HashMap<String, String>, dry_run: bool) -> StageResult {
        if !stage.evaluate_condition() {
            return Self::finish(ctx, StageResult::skipped(stage.id.clone(), "condition evaluated to false"));
        }
        if ctx.is_cancelled() {
            return Self::finish(ctx, StageResult::cancelled(stage.id.clone()));
        }
        if !ctx.dependencies_met(&stage.dependencies, stage.allow_failure) {
            return Self::finish(ctx, StageResult::skipped(stage.id.clone(), "dependencies not satisfied"));
        }

        let mut attempt = 0u32;
        loop {
            if ctx.is_cancelled() {
                return Self::finish(ctx, StageResult::cancelled(stage.id.clone()));
            }

            let started = chrono::Utc::now();
            let outcome = run_once(stage, base_env, dry_run);
            let ended = chrono::Utc::now();

            let retry_exhausted = attempt >= stage.max_retries;
            match outcome {
                Ok(0) => return Self::finish(ctx, StageResult::completed(stage.id.clone(), started, ended, 0)),
                Ok(code) => {
                    if retry_exhausted {
                        return Self::finish(
                            ctx,
                            StageResult::failed(stage.id.clone(), started, ended, Some(code), format!("exit code {code}")),
                        );
                    }
                }
                Err(err) => {
                    if retry_exhausted {
                        return Self::finish(ctx, StageResult::failed(stage.id.clone(), started, ended, None, err.to_string()));
                    }
                }
            }

            attempt += 1;
            thread::sleep(stage.retry_delay);
        }
    }

    fn finish(ctx: &ExecutionContext, result: StageResult) -> StageResult {
        ctx.update_stage_result(result.clone());
        result
    }
}

fn run_once(stage: &StageDefinition, base_env: &HashMap<String, String>, dry_run: bool) -> Result<i32, PipelineError> {
    if dry_run {
        return Ok(0);
    }

    let mut command = Command::new(&stage.executable);
    command.args(&stage.args);
    command.envs(stage.merged_environment(base_env));
    if let Some(dir) = &stage.working_directory {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .map_err(|err| PipelineError::StageExecutableError(format!("failed to spawn '{}': {err}", stage.executable)))?;

    let deadline = Instant::now() + stage.timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status.code().unwrap_or(-1)),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PipelineError::Timeout(format!(
                        "stage '{}' exceeded its timeout of {:?}",
                        stage.id, stage.timeout
                    )));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => return Err(PipelineError::StageExecutableError(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_pipeline_domain::{ErrorStrategy, NullSink, PipelineId, StageId};
    use std::sync::Arc;

    fn context() -> ExecutionContext {
        ExecutionContext::new(PipelineId::new(), ErrorStrategy::Continue, Arc::new(NullSink))
    }

    #[test]
    fn condition_false_yields_skipped() {
        let ctx = context();
        let stage = StageDefinition::new("a", "/bin/true")
            .unwrap()
            .with_condition(Arc::new(|| false));
        let result = PipelineTask::execute(&stage, &ctx, &HashMap::new(), false);
        assert_eq!(result.status, recon_pipeline_domain::StageStatus::Skipped);
    }

    #[test]
    fn cancelled_context_yields_cancelled() {
        let ctx = context();
        ctx.cancel();
        let stage = StageDefinition::new("a", "/bin/true").unwrap();
        let result = PipelineTask::execute(&stage, &ctx, &HashMap::new(), false);
        assert_eq!(result.status, recon_pipeline_domain::StageStatus::Cancelled);
    }

    #[test]
    fn dry_run_completes_without_spawning() {
        let ctx = context();
        let stage = StageDefinition::new("a", "/this/binary/does/not/exist").unwrap();
        let result = PipelineTask::execute(&stage, &ctx, &HashMap::new(), true);
        assert_eq!(result.status, recon_pipeline_domain::StageStatus::Completed);
        assert_eq!(result.exit_code, Some(0));
    }

    #[test]
    fn unmet_dependency_yields_skipped() {
        let ctx = context();
        let stage = StageDefinition::new("a", "/bin/true")
            .unwrap()
            .with_dependency(StageId::new("missing").unwrap());
        let result = PipelineTask::execute(&stage, &ctx, &HashMap::new(), false);
        assert_eq!(result.status, recon_pipeline_domain::StageStatus::Skipped);
    }

    #[cfg(unix)]
    #[test]
    fn successful_process_completes() {
        let ctx = context();
        let stage = StageDefinition::new("a", "/bin/true").unwrap();
        let result = PipelineTask::execute(&stage, &ctx, &HashMap::new(), false);
        assert_eq!(result.status, recon_pipeline_domain::StageStatus::Completed);
        assert_eq!(result.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn failing_process_is_retried_then_fails() {
        let ctx = context();
        let stage = StageDefinition::new("a", "/bin/false")
            .unwrap()
            .with_max_retries(1)
            .with_retry_delay(Duration::from_millis(1));
        let result = PipelineTask::execute(&stage, &ctx, &HashMap::new(), false);
        assert_eq!(result.status, recon_pipeline_domain::StageStatus::Failed);
    }
}
