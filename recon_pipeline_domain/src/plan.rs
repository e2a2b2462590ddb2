// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Execution plan artifact (§3, §6): the serializable capture of the
//! resolver's output together with the selector's resource/time estimates.

use crate::execution::ExecutionConfig;
use crate::value_objects::StageId;
use crate::StageConstraint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub cpu_minutes: f64,
    pub memory_mb: f64,
    pub network_mb: f64,
    pub disk_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub execution_order: Vec<StageId>,
    pub parallel_groups: Vec<Vec<StageId>>,
    pub dependency_map: HashMap<StageId, Vec<StageId>>,
    /// Inferred constraints per stage (§3's ExecutionPlan.per_stage_constraints),
    /// as produced by the constraint validator (§4.C) over the planned subset.
    pub per_stage_constraints: HashMap<StageId, Vec<StageConstraint>>,
    pub total_time_estimate_ms: u64,
    pub parallel_time_estimate_ms: u64,
    pub resource_estimate: ResourceEstimate,
    pub critical_path: Vec<StageId>,
    pub execution_config: ExecutionConfig,
    pub optimization_suggestions: Vec<String>,
    pub created_at_ms: i64,
    pub valid: bool,
}

impl ExecutionPlan {
    pub fn new(execution_config: ExecutionConfig) -> Self {
        Self {
            plan_id: ulid::Ulid::new().to_string(),
            execution_order: Vec::new(),
            parallel_groups: Vec::new(),
            dependency_map: HashMap::new(),
            per_stage_constraints: HashMap::new(),
            total_time_estimate_ms: 0,
            parallel_time_estimate_ms: 0,
            resource_estimate: ResourceEstimate::default(),
            critical_path: Vec::new(),
            execution_config,
            optimization_suggestions: Vec::new(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            valid: true,
        }
    }

    /// Serializes this plan to the structured document described in §6
    /// ("Execution plan export/import").
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
