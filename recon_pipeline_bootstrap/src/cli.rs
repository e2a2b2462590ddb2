// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface Module
//!
//! Bootstrap-layer CLI handling with security-first design.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  1. parser::parse_cli()             │  Parse CLI with clap
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  2. validate_cli()                  │  Security validation
//! └─────────────────┬───────────────────┘
//!                   ↓
//! ┌─────────────────────────────────────┐
//! │  3. ValidatedCli                    │  Safe, validated config
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `parser` - CLI structure and clap parsing
//! - `validator` - Security validation layer

pub mod parser;
pub mod validator;

pub use parser::{parse_cli, Cli};
pub use validator::{ParseError, SecureArgParser};

use std::path::PathBuf;

/// Resume strategy requested via `--resume-mode` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    Full,
    Last,
    Best,
    Interactive,
}

impl std::str::FromStr for ResumeMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(ResumeMode::Full),
            "last" => Ok(ResumeMode::Last),
            "best" => Ok(ResumeMode::Best),
            "interactive" => Ok(ResumeMode::Interactive),
            other => Err(ParseError::InvalidValue {
                arg: "resume-mode".to_string(),
                reason: format!("unknown resume mode: {other}"),
            }),
        }
    }
}

/// A resume request is only produced when `--resume-operation` is present
/// (§6): "A ResumeContext is returned iff `--resume-operation` is present."
#[derive(Debug, Clone)]
pub struct ResumeRequest {
    pub operation_id: String,
    pub config: Option<PathBuf>,
    pub mode: ResumeMode,
}

/// Validated CLI configuration: all arguments security-checked and
/// range-checked.
#[derive(Debug, Clone)]
pub struct ValidatedCli {
    pub pipeline: PathBuf,
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub dry_run: bool,
    pub min_threads: Option<usize>,
    pub max_threads: Option<usize>,
    pub execution_mode: Option<String>,
    pub error_strategy: Option<String>,
    pub resume: Option<ResumeRequest>,
}

/// Parses and validates CLI arguments.
///
/// # Errors
///
/// Returns [`ParseError`] if parsing or validation fails.
pub fn parse_and_validate() -> Result<ValidatedCli, ParseError> {
    let cli = parse_cli();
    validate_cli(cli)
}

fn validate_cli(cli: Cli) -> Result<ValidatedCli, ParseError> {
    let pipeline = SecureArgParser::validate_path(&cli.pipeline.to_string_lossy())?;

    let config = if let Some(ref path) = cli.config {
        SecureArgParser::validate_argument(&path.to_string_lossy())?;
        Some(path.clone())
    } else {
        None
    };

    if let Some(threads) = cli.min_threads {
        if threads == 0 {
            return Err(ParseError::InvalidValue {
                arg: "min-threads".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
    }

    if let Some(threads) = cli.max_threads {
        if threads == 0 || threads > 1024 {
            return Err(ParseError::InvalidValue {
                arg: "max-threads".to_string(),
                reason: "must be between 1 and 1024".to_string(),
            });
        }
    }

    if let (Some(min), Some(max)) = (cli.min_threads, cli.max_threads) {
        if min > max {
            return Err(ParseError::InvalidValue {
                arg: "min-threads".to_string(),
                reason: format!("min-threads ({min}) cannot exceed max-threads ({max})"),
            });
        }
    }

    let resume = match cli.resume_operation {
        Some(operation_id) => {
            SecureArgParser::validate_argument(&operation_id)?;
            let resume_config = if let Some(ref path) = cli.resume_config {
                Some(SecureArgParser::validate_path(&path.to_string_lossy())?)
            } else {
                None
            };
            let mode = cli.resume_mode.parse::<ResumeMode>()?;
            Some(ResumeRequest {
                operation_id,
                config: resume_config,
                mode,
            })
        }
        None => None,
    };

    Ok(ValidatedCli {
        pipeline,
        config,
        verbose: cli.verbose,
        dry_run: cli.dry_run,
        min_threads: cli.min_threads,
        max_threads: cli.max_threads,
        execution_mode: cli.execution_mode,
        error_strategy: cli.error_strategy,
        resume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_mode_parses_known_values() {
        assert_eq!("full".parse::<ResumeMode>().unwrap(), ResumeMode::Full);
        assert_eq!("interactive".parse::<ResumeMode>().unwrap(), ResumeMode::Interactive);
    }

    #[test]
    fn resume_mode_rejects_unknown_values() {
        assert!("partial".parse::<ResumeMode>().is_err());
    }

    #[test]
    fn validate_cli_rejects_min_exceeding_max() {
        let cli = Cli {
            pipeline: PathBuf::from("."),
            config: None,
            verbose: false,
            dry_run: false,
            min_threads: Some(8),
            max_threads: Some(4),
            execution_mode: None,
            error_strategy: None,
            resume_operation: None,
            resume_config: None,
            resume_mode: "best".to_string(),
        };
        assert!(matches!(validate_cli(cli), Err(ParseError::InvalidValue { .. })));
    }
}
