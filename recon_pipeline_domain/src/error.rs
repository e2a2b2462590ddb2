// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! A single, hierarchical error type for every fallible operation in the
//! orchestrator. Errors are categorized so callers can decide whether to
//! retry, abort a run, or just log and continue.

use thiserror::Error;

/// Domain-specific errors for the pipeline orchestration system.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("dependency error: {0}")]
    DependencyError(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("empty selection: {0}")]
    EmptySelection(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("verification error: {0}")]
    VerificationError(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("stage executable error: {0}")]
    StageExecutableError(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("shutting down: {0}")]
    ShuttingDown(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::DependencyError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Errors that represent a transient condition worth retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::Timeout(_) | PipelineError::ResourceUnavailable(_) | PipelineError::StorageError(_)
        )
    }

    /// Coarse category used for statistics and logging, not for control flow.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::ConfigurationError(_) => "configuration",
            PipelineError::DependencyError(_) => "dependency",
            PipelineError::ConstraintViolation(_) => "constraint",
            PipelineError::ValidationFailed(_) => "validation",
            PipelineError::EmptySelection(_) => "selection",
            PipelineError::ResourceUnavailable(_) => "resource",
            PipelineError::StorageError(_) => "storage",
            PipelineError::VerificationError(_) => "verification",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::StageExecutableError(_) => "stage",
            PipelineError::Cancelled(_) => "cancellation",
            PipelineError::QueueFull(_) => "queue",
            PipelineError::ShuttingDown(_) => "shutdown",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::InternalError(_) => "internal",
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::ValidationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_storage_errors_are_recoverable() {
        assert!(PipelineError::Timeout("t".into()).is_recoverable());
        assert!(PipelineError::StorageError("io".into()).is_recoverable());
        assert!(!PipelineError::ConfigurationError("bad".into()).is_recoverable());
    }

    #[test]
    fn category_matches_kind() {
        assert_eq!(PipelineError::DependencyError("x".into()).category(), "dependency");
        assert_eq!(PipelineError::QueueFull("x".into()).category(), "queue");
    }
}
