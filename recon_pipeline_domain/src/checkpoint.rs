// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Checkpoint Data Model
//!
//! The persistent snapshot record (§3) and the structured document it wraps
//! (§6's checkpoint file layout). The resume system (application crate) owns
//! checkpoint creation/recovery logic; checkpoint storage is a pure
//! persistence service over this record.

use crate::value_objects::StageId;
use crate::StageResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointGranularity {
    Coarse,
    Medium,
    Fine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_id: String,
    pub operation_id: String,
    pub created_at_ms: i64,
    pub stage_name: String,
    pub granularity: CheckpointGranularity,
    pub progress_percent: f64,
    pub elapsed_ms: u64,
    pub memory_estimate_bytes: u64,
    pub verification_enabled: bool,
    pub verification_hash: Option<String>,
    pub custom: HashMap<String, String>,
}

/// The `pipeline_state` document of §6: what has run and what is left.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStateSnapshot {
    pub completed_stages: Vec<StageId>,
    pub pending_stages: Vec<StageId>,
    pub stage_results: HashMap<StageId, StageResult>,
}

/// A full, persisted checkpoint record: metadata plus state plus optional
/// opaque payload (used when compression/encryption replace the plaintext
/// `pipeline_state` with bytes in `binary_data`, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub metadata: CheckpointMetadata,
    pub pipeline_state: Option<PipelineStateSnapshot>,
    pub binary_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    Full,
    Last,
    Best,
    Interactive,
}

#[derive(Debug, Clone)]
pub struct ResumeContext {
    pub operation_id: String,
    pub completed_stages: Vec<StageId>,
    pub pending_stages: Vec<StageId>,
    pub stage_results: HashMap<StageId, StageResult>,
    pub original_start_ms: i64,
    pub resume_time_ms: i64,
    pub mode: ResumeMode,
    pub reason: String,
}
