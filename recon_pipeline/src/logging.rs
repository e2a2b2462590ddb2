// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Structured Logging
//!
//! Installs the global `tracing` subscriber from a resolved
//! [`crate::config::ResolvedConfig`], choosing the formatter
//! ([`recon_pipeline_bootstrap::config::LogFormat`]) and filtering by level
//! ([`recon_pipeline_bootstrap::config::LogLevel`]), with `--verbose`
//! forcing `DEBUG` regardless of the configured level.

use recon_pipeline_bootstrap::config::{AppConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Installs the process-wide `tracing` subscriber. Must be called at most
/// once; a second call returns an error from `tracing`, which is logged and
/// ignored since it only happens in tests that install their own.
pub fn init(config: &AppConfig) {
    let level = if config.is_verbose() { tracing::Level::DEBUG } else { config.log_level().to_tracing_level() };

    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let result = match config.log_format() {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().try_init(),
        LogFormat::Compact => tracing_subscriber::fmt().with_env_filter(filter).compact().try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };

    if let Err(err) = result {
        eprintln!("tracing subscriber already initialized: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic_on_repeated_calls() {
        let config = AppConfig::builder().build();
        init(&config);
        init(&config);
    }
}
