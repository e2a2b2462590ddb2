// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Application Configuration
//!
//! `AppConfig` is the bootstrap-level configuration record of §3.A:
//! checkpoint directory, default thread pool sizing, default checkpoint
//! granularity, and log format. It is loaded once at startup by the
//! application crate's layered configuration module and passed by value
//! into the engine and resume-system constructors -- it is never a global.
//!
//! ## Immutability
//!
//! All configuration is immutable after creation, so it can be shared
//! across worker threads without synchronization.

use std::path::PathBuf;

/// Log output format selected for the `tracing-subscriber` formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colorized when stdout is a terminal.
    Pretty,
    /// Single-line-per-field JSON, for log aggregation.
    Json,
    /// Single line per event, no field names.
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Immutable bootstrap-level configuration record (§3.A).
#[derive(Debug, Clone)]
pub struct AppConfig {
    checkpoint_dir: PathBuf,
    default_min_threads: usize,
    default_max_threads: usize,
    default_checkpoint_granularity: CheckpointGranularityHint,
    log_level: LogLevel,
    log_format: LogFormat,
    verbose: bool,
    dry_run: bool,
}

/// A format-agnostic stand-in for the domain crate's `CheckpointGranularity`
/// so this crate does not need to depend on the domain crate just to carry
/// a default around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointGranularityHint {
    Coarse,
    Medium,
    Fine,
}

impl Default for CheckpointGranularityHint {
    fn default() -> Self {
        CheckpointGranularityHint::Medium
    }
}

impl AppConfig {
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    pub fn checkpoint_dir(&self) -> &PathBuf {
        &self.checkpoint_dir
    }

    pub fn default_min_threads(&self) -> usize {
        self.default_min_threads
    }

    pub fn default_max_threads(&self) -> usize {
        self.default_max_threads
    }

    pub fn default_checkpoint_granularity(&self) -> CheckpointGranularityHint {
        self.default_checkpoint_granularity
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Builder for [`AppConfig`].
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    checkpoint_dir: Option<PathBuf>,
    default_min_threads: Option<usize>,
    default_max_threads: Option<usize>,
    default_checkpoint_granularity: Option<CheckpointGranularityHint>,
    log_level: Option<LogLevel>,
    log_format: Option<LogFormat>,
    verbose: bool,
    dry_run: bool,
}

impl AppConfigBuilder {
    pub fn checkpoint_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(path.into());
        self
    }

    pub fn default_min_threads(mut self, count: usize) -> Self {
        self.default_min_threads = Some(count);
        self
    }

    pub fn default_max_threads(mut self, count: usize) -> Self {
        self.default_max_threads = Some(count);
        self
    }

    pub fn default_checkpoint_granularity(mut self, granularity: CheckpointGranularityHint) -> Self {
        self.default_checkpoint_granularity = Some(granularity);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Builds the configuration, defaulting `checkpoint_dir` to
    /// `./checkpoints` and `min`/`max` threads to 1 and the detected CPU
    /// count respectively when not set explicitly.
    pub fn build(self) -> AppConfig {
        let cpu_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        AppConfig {
            checkpoint_dir: self.checkpoint_dir.unwrap_or_else(|| PathBuf::from("./checkpoints")),
            default_min_threads: self.default_min_threads.unwrap_or(1),
            default_max_threads: self.default_max_threads.unwrap_or(cpu_count),
            default_checkpoint_granularity: self.default_checkpoint_granularity.unwrap_or_default(),
            log_level: self.log_level.unwrap_or_default(),
            log_format: self.log_format.unwrap_or_default(),
            verbose: self.verbose,
            dry_run: self.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_defaults() {
        let config = AppConfig::builder().build();
        assert_eq!(config.checkpoint_dir(), &PathBuf::from("./checkpoints"));
        assert_eq!(config.default_min_threads(), 1);
        assert!(config.default_max_threads() >= 1);
        assert_eq!(config.default_checkpoint_granularity(), CheckpointGranularityHint::Medium);
        assert_eq!(config.log_level(), LogLevel::Info);
        assert_eq!(config.log_format(), LogFormat::Pretty);
        assert!(!config.is_verbose());
        assert!(!config.is_dry_run());
    }

    #[test]
    fn test_config_builder_full() {
        let config = AppConfig::builder()
            .checkpoint_dir("/tmp/checkpoints")
            .default_min_threads(2)
            .default_max_threads(16)
            .default_checkpoint_granularity(CheckpointGranularityHint::Fine)
            .log_level(LogLevel::Debug)
            .log_format(LogFormat::Json)
            .verbose(true)
            .dry_run(true)
            .build();

        assert_eq!(config.checkpoint_dir(), &PathBuf::from("/tmp/checkpoints"));
        assert_eq!(config.default_min_threads(), 2);
        assert_eq!(config.default_max_threads(), 16);
        assert_eq!(config.default_checkpoint_granularity(), CheckpointGranularityHint::Fine);
        assert_eq!(config.log_level(), LogLevel::Debug);
        assert_eq!(config.log_format(), LogFormat::Json);
        assert!(config.is_verbose());
        assert!(config.is_dry_run());
    }

    #[test]
    fn test_log_level_to_tracing() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
