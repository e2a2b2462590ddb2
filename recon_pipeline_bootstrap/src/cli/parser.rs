// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # CLI Parser
//!
//! Command-line surface for the composition-only bootstrap shell (§4.K):
//! a pipeline definition file, execution-mode/error-strategy overrides,
//! thread pool sizing overrides, and the resume flags of §6.
//!
//! Security validation happens in the validator module after parsing.

use clap::Parser;
use std::path::PathBuf;

/// Recon-pipeline command-line interface.
#[derive(Parser, Debug, Clone)]
#[command(name = "recon-pipeline")]
#[command(about = concat!("Reconnaissance-pipeline orchestrator v", env!("CARGO_PKG_VERSION")))]
#[command(version)]
pub struct Cli {
    /// Path to the pipeline definition file (TOML, YAML, or JSON)
    pub pipeline: PathBuf,

    /// Configuration file path (layered over built-in defaults and env vars)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Build the execution plan and report it without running any stage
    #[arg(long)]
    pub dry_run: bool,

    /// Override the thread pool's minimum worker count
    #[arg(long)]
    pub min_threads: Option<usize>,

    /// Override the thread pool's maximum worker count
    #[arg(long)]
    pub max_threads: Option<usize>,

    /// Override the engine's execution mode
    #[arg(long, value_parser = parse_execution_mode)]
    pub execution_mode: Option<String>,

    /// Override the engine's error-handling strategy
    #[arg(long, value_parser = parse_error_strategy)]
    pub error_strategy: Option<String>,

    /// Operation id to resume; a [`crate::cli::ValidatedCli::resume`] context
    /// is produced iff this is present (§6)
    #[arg(long)]
    pub resume_operation: Option<String>,

    /// Path to a resume-specific configuration override
    #[arg(long)]
    pub resume_config: Option<PathBuf>,

    /// Resume strategy: replay the full checkpoint chain, resume from the
    /// last checkpoint, resume from the checkpoint maximizing progress, or
    /// prompt interactively
    #[arg(long, value_parser = parse_resume_mode, default_value = "best")]
    pub resume_mode: String,
}

fn parse_execution_mode(s: &str) -> Result<String, String> {
    match s.to_lowercase().as_str() {
        "sequential" | "parallel" | "hybrid" => Ok(s.to_lowercase()),
        _ => Err(format!("invalid execution mode '{s}'. Valid options: sequential, parallel, hybrid")),
    }
}

fn parse_error_strategy(s: &str) -> Result<String, String> {
    match s.to_lowercase().as_str() {
        "fail-fast" | "retry" | "skip" | "continue" => Ok(s.to_lowercase()),
        _ => Err(format!("invalid error strategy '{s}'. Valid options: fail-fast, retry, skip, continue")),
    }
}

fn parse_resume_mode(s: &str) -> Result<String, String> {
    match s.to_lowercase().as_str() {
        "full" | "last" | "best" | "interactive" => Ok(s.to_lowercase()),
        _ => Err(format!("invalid resume mode '{s}'. Valid options: full, last, best, interactive")),
    }
}

/// Parses CLI arguments. Clap exits the process on `--help`/`--version` or
/// parse failure.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_execution_mode_valid() {
        assert_eq!(parse_execution_mode("parallel").unwrap(), "parallel");
        assert_eq!(parse_execution_mode("HYBRID").unwrap(), "hybrid");
    }

    #[test]
    fn test_parse_execution_mode_invalid() {
        assert!(parse_execution_mode("concurrent").is_err());
    }

    #[test]
    fn test_parse_resume_mode_valid() {
        assert_eq!(parse_resume_mode("Interactive").unwrap(), "interactive");
    }

    #[test]
    fn test_parse_resume_mode_invalid() {
        assert!(parse_resume_mode("partial").is_err());
    }
}
