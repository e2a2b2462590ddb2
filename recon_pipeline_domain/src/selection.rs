// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Data model for the stage selector (§3, §4.D). The filtering and planning
//! algorithm itself lives in the application crate; this module only defines
//! the shapes it operates on and produces.

use crate::value_objects::StagePriority;
use crate::StageId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Include,
    Exclude,
    Require,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    None,
    Basic,
    Dependencies,
    Resources,
    Compatibility,
    Comprehensive,
}

/// A single filtering criterion (§3's SelectionFilter). At most one of the
/// payload fields is meaningful per filter; which one is read depends on
/// which variant-shaped constructor built it.
#[derive(Clone)]
pub struct SelectionFilter {
    pub mode: FilterMode,
    pub kind: FilterKind,
    pub case_sensitive: bool,
}

#[derive(Clone)]
pub enum FilterKind {
    ById(StageId),
    ByName { substring: String },
    ByPattern(regex::Regex),
    ByTags(HashSet<String>),
    ByPriorityRange { min: StagePriority, max: StagePriority },
    ByExecutionTime { min: Duration, max: Duration },
    ByMetadata { key: String, value: String },
    Custom(std::sync::Arc<dyn Fn(&crate::StageDefinition) -> bool + Send + Sync>),
}

impl SelectionFilter {
    pub fn by_id(mode: FilterMode, id: StageId) -> Self {
        Self {
            mode,
            kind: FilterKind::ById(id),
            case_sensitive: false,
        }
    }

    pub fn by_name(mode: FilterMode, substring: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            mode,
            kind: FilterKind::ByName { substring: substring.into() },
            case_sensitive,
        }
    }

    pub fn by_pattern(mode: FilterMode, pattern: regex::Regex) -> Self {
        Self {
            mode,
            kind: FilterKind::ByPattern(pattern),
            case_sensitive: false,
        }
    }

    pub fn by_tags(mode: FilterMode, tags: HashSet<String>) -> Self {
        Self {
            mode,
            kind: FilterKind::ByTags(tags),
            case_sensitive: false,
        }
    }

    pub fn by_priority_range(mode: FilterMode, min: StagePriority, max: StagePriority) -> Self {
        Self {
            mode,
            kind: FilterKind::ByPriorityRange { min, max },
            case_sensitive: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectionConfig {
    pub filters_len_hint: usize,
    pub validation_level: ValidationLevel,
    pub include_dependencies: bool,
    pub include_dependents: bool,
    pub max_dependency_depth: usize,
    pub max_selected_stages: usize,
    pub cache_ttl: Duration,
    pub enable_caching: bool,
    pub compatibility_threshold: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            filters_len_hint: 0,
            validation_level: ValidationLevel::Dependencies,
            include_dependencies: true,
            include_dependents: false,
            max_dependency_depth: 50,
            max_selected_stages: 100,
            cache_ttl: Duration::from_secs(30),
            enable_caching: true,
            compatibility_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStatus {
    Success,
    PartialSuccess,
    ValidationFailed,
    DependencyError,
    ConstraintViolation,
    ResourceUnavailable,
    ConfigurationError,
    EmptySelection,
    CircularDependency,
    IncompatibleStages,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub are_compatible: bool,
    pub conflicts: HashMap<String, Vec<String>>,
    pub warnings: Vec<String>,
    pub compatibility_score: f64,
    pub per_stage_scores: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResult {
    pub status: SelectionStatus,
    pub selected_stage_ids: Vec<StageId>,
    pub execution_order: Vec<StageId>,
    pub execution_levels: Vec<Vec<StageId>>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub information: Vec<String>,
    pub compatibility: CompatibilityResult,
    pub total_available_stages: usize,
    pub filtered_stages: usize,
    pub selection_ratio: f64,
    pub cache_key: String,
    pub selection_timestamp_ms: i64,
}

impl SelectionResult {
    /// Serializes this result to the structured document described in §6
    /// ("Selection result export/import"). Round-tripping through
    /// [`SelectionResult::from_json`] preserves every field named there.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn empty(reason: impl Into<String>, total_available: usize) -> Self {
        Self {
            status: SelectionStatus::EmptySelection,
            selected_stage_ids: Vec::new(),
            execution_order: Vec::new(),
            execution_levels: Vec::new(),
            errors: vec![reason.into()],
            warnings: Vec::new(),
            information: Vec::new(),
            compatibility: CompatibilityResult::default(),
            total_available_stages: total_available,
            filtered_stages: 0,
            selection_ratio: 0.0,
            cache_key: String::new(),
            selection_timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}
