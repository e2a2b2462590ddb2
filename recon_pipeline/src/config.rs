// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Layered Application Configuration
//!
//! The ambient configuration layer (§1.A, §3.A): built-in defaults, an
//! optional TOML file, then `RECON_PIPELINE__*` environment variables, each
//! layer overriding the last. The result is split into a
//! [`recon_pipeline_bootstrap::config::AppConfig`] (the bootstrap-level
//! record: checkpoint directory, default thread pool sizing, default
//! checkpoint granularity, log format) and the engine-level defaults that
//! `AppConfig` has no room for (execution mode, error strategy, concurrency
//! cap, resume trigger interval).
//!
//! CLI flags take precedence over every layer here; merging them in is the
//! caller's job (see `main.rs`), not this module's.

use recon_pipeline_bootstrap::config::{AppConfig, CheckpointGranularityHint, LogFormat, LogLevel};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while loading layered configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid execution mode '{0}'; expected sequential, parallel, or hybrid")]
    InvalidExecutionMode(String),

    #[error("invalid error strategy '{0}'; expected fail-fast, retry, skip, or continue")]
    InvalidErrorStrategy(String),
}

/// Engine-level execution mode, overridable by `--execution-mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Hybrid,
}

impl std::str::FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel" => Ok(ExecutionMode::Parallel),
            "hybrid" => Ok(ExecutionMode::Hybrid),
            other => Err(ConfigError::InvalidExecutionMode(other.to_string())),
        }
    }
}

/// Engine-level error handling strategy, overridable by `--error-strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategy {
    FailFast,
    Retry,
    Skip,
    Continue,
}

impl std::str::FromStr for ErrorStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail-fast" => Ok(ErrorStrategy::FailFast),
            "retry" => Ok(ErrorStrategy::Retry),
            "skip" => Ok(ErrorStrategy::Skip),
            "continue" => Ok(ErrorStrategy::Continue),
            other => Err(ConfigError::InvalidErrorStrategy(other.to_string())),
        }
    }
}

/// Raw, deserializable shape of the TOML/env configuration layers. All
/// fields are optional since defaults live in [`EngineDefaults::default`]
/// and [`AppConfig::builder`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    checkpoint_dir: Option<PathBuf>,
    min_threads: Option<usize>,
    max_threads: Option<usize>,
    checkpoint_granularity: Option<String>,
    log_level: Option<String>,
    log_format: Option<String>,
    execution_mode: Option<String>,
    error_strategy: Option<String>,
    max_concurrent_stages: Option<usize>,
    resume_trigger_interval_secs: Option<u64>,
}

/// Engine-level defaults not carried by [`AppConfig`]: execution mode, error
/// handling strategy, the stage concurrency cap, and how often the resume
/// system is asked to snapshot (§4.I, §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineDefaults {
    pub execution_mode: ExecutionMode,
    pub error_strategy: ErrorStrategy,
    pub max_concurrent_stages: usize,
    pub resume_trigger_interval_secs: u64,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Hybrid,
            error_strategy: ErrorStrategy::FailFast,
            max_concurrent_stages: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            resume_trigger_interval_secs: 30,
        }
    }
}

/// The fully resolved application configuration: the bootstrap-level record
/// plus engine-level defaults, both produced by the same layered load.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub app: AppConfig,
    pub engine: EngineDefaults,
}

/// Loads configuration from built-in defaults, an optional file at
/// `config_path`, and `RECON_PIPELINE__*` environment variables, in that
/// order of increasing precedence.
pub fn load(config_path: Option<&Path>) -> Result<ResolvedConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(config::Environment::with_prefix("RECON_PIPELINE").separator("__"));

    let raw: RawConfig = builder.build()?.try_deserialize().unwrap_or_default();
    resolve(raw)
}

fn resolve(raw: RawConfig) -> Result<ResolvedConfig, ConfigError> {
    let granularity = match raw.checkpoint_granularity.as_deref() {
        Some("coarse") => CheckpointGranularityHint::Coarse,
        Some("fine") => CheckpointGranularityHint::Fine,
        _ => CheckpointGranularityHint::Medium,
    };

    let log_level = match raw.log_level.as_deref() {
        Some("error") => LogLevel::Error,
        Some("warn") => LogLevel::Warn,
        Some("debug") => LogLevel::Debug,
        Some("trace") => LogLevel::Trace,
        _ => LogLevel::Info,
    };

    let log_format = match raw.log_format.as_deref() {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => LogFormat::Pretty,
    };

    let mut app_builder = AppConfig::builder()
        .default_checkpoint_granularity(granularity)
        .log_level(log_level)
        .log_format(log_format);

    if let Some(dir) = raw.checkpoint_dir {
        app_builder = app_builder.checkpoint_dir(dir);
    }
    if let Some(min) = raw.min_threads {
        app_builder = app_builder.default_min_threads(min);
    }
    if let Some(max) = raw.max_threads {
        app_builder = app_builder.default_max_threads(max);
    }

    let mut engine = EngineDefaults::default();
    if let Some(mode) = raw.execution_mode {
        engine.execution_mode = mode.parse()?;
    }
    if let Some(strategy) = raw.error_strategy {
        engine.error_strategy = strategy.parse()?;
    }
    if let Some(cap) = raw.max_concurrent_stages {
        engine.max_concurrent_stages = cap;
    }
    if let Some(secs) = raw.resume_trigger_interval_secs {
        engine.resume_trigger_interval_secs = secs;
    }

    Ok(ResolvedConfig {
        app: app_builder.build(),
        engine,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_without_any_source() {
        let resolved = load(None).expect("built-in defaults always resolve");
        assert_eq!(resolved.engine.execution_mode, ExecutionMode::Hybrid);
        assert_eq!(resolved.engine.error_strategy, ErrorStrategy::FailFast);
        assert_eq!(resolved.app.default_checkpoint_granularity(), CheckpointGranularityHint::Medium);
    }

    #[test]
    fn execution_mode_parses_known_values() {
        assert_eq!("parallel".parse::<ExecutionMode>().unwrap(), ExecutionMode::Parallel);
        assert!("concurrent".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn error_strategy_parses_known_values() {
        assert_eq!("fail-fast".parse::<ErrorStrategy>().unwrap(), ErrorStrategy::FailFast);
        assert!("abort".parse::<ErrorStrategy>().is_err());
    }

    #[test]
    fn resolve_applies_raw_overrides() {
        let raw = RawConfig {
            checkpoint_dir: Some(PathBuf::from("/tmp/chk")),
            min_threads: Some(2),
            max_threads: Some(8),
            checkpoint_granularity: Some("fine".to_string()),
            log_level: Some("debug".to_string()),
            log_format: Some("json".to_string()),
            execution_mode: Some("sequential".to_string()),
            error_strategy: Some("retry".to_string()),
            max_concurrent_stages: Some(4),
            resume_trigger_interval_secs: Some(10),
        };
        let resolved = resolve(raw).unwrap();
        assert_eq!(resolved.app.checkpoint_dir(), &PathBuf::from("/tmp/chk"));
        assert_eq!(resolved.app.default_min_threads(), 2);
        assert_eq!(resolved.app.default_max_threads(), 8);
        assert_eq!(resolved.engine.execution_mode, ExecutionMode::Sequential);
        assert_eq!(resolved.engine.error_strategy, ErrorStrategy::Retry);
        assert_eq!(resolved.engine.max_concurrent_stages, 4);
        assert_eq!(resolved.engine.resume_trigger_interval_secs, 10);
    }
}
