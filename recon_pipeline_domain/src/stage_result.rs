// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage status state machine and the per-attempt result record (§3).

use crate::value_objects::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// pending -> waiting -> ready -> running -> {completed | failed | cancelled | skipped}
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Waiting,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Cancelled | StageStatus::Skipped
        )
    }

    pub fn is_successful_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_id: StageId,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, String>,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl StageResult {
    pub fn pending(stage_id: StageId) -> Self {
        Self {
            stage_id,
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            duration: Duration::ZERO,
            exit_code: None,
            error_message: None,
            metadata: HashMap::new(),
        }
    }

    pub fn completed(stage_id: StageId, started_at: DateTime<Utc>, ended_at: DateTime<Utc>, exit_code: i32) -> Self {
        Self {
            stage_id,
            status: StageStatus::Completed,
            duration: (ended_at - started_at).to_std().unwrap_or_default(),
            started_at: Some(started_at),
            ended_at: Some(ended_at),
            exit_code: Some(exit_code),
            error_message: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failed(
        stage_id: StageId,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        exit_code: Option<i32>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            stage_id,
            status: StageStatus::Failed,
            duration: (ended_at - started_at).to_std().unwrap_or_default(),
            started_at: Some(started_at),
            ended_at: Some(ended_at),
            exit_code,
            error_message: Some(error_message.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn cancelled(stage_id: StageId) -> Self {
        Self {
            stage_id,
            status: StageStatus::Cancelled,
            started_at: None,
            ended_at: Some(Utc::now()),
            duration: Duration::ZERO,
            exit_code: None,
            error_message: Some("cancelled".to_string()),
            metadata: HashMap::new(),
        }
    }

    pub fn skipped(stage_id: StageId, reason: impl Into<String>) -> Self {
        Self {
            stage_id,
            status: StageStatus::Skipped,
            started_at: None,
            ended_at: Some(Utc::now()),
            duration: Duration::ZERO,
            exit_code: None,
            error_message: Some(reason.into()),
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_flagged_correctly() {
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
    }

    #[test]
    fn completed_and_skipped_count_as_successful_terminal() {
        assert!(StageStatus::Completed.is_successful_terminal());
        assert!(StageStatus::Skipped.is_successful_terminal());
        assert!(!StageStatus::Failed.is_successful_terminal());
        assert!(!StageStatus::Cancelled.is_successful_terminal());
    }
}
