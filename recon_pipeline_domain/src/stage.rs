// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Definition
//!
//! The static description of one unit of work (§3). Immutable once a run has
//! started; the engine reads it but never mutates it mid-run.

use crate::value_objects::{StageId, StagePriority};
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A boolean predicate evaluated before a stage runs (§4.F step a).
///
/// Not `Clone`/`Serialize` -- conditions are supplied programmatically by the
/// operator, not loaded from a config file (config-file condition languages
/// are an explicit non-goal, §1).
pub type ConditionFn = std::sync::Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,
    pub name: String,
    pub description: String,
    pub executable: String,
    pub args: Vec<String>,
    pub dependencies: HashSet<StageId>,
    pub environment: HashMap<String, String>,
    pub working_directory: Option<String>,
    pub priority: StagePriority,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    pub allow_failure: bool,
    pub tags: HashSet<String>,
    pub metadata: HashMap<String, String>,
    #[serde(skip)]
    pub condition: Option<ConditionFn>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl StageDefinition {
    pub fn new(id: impl Into<String>, executable: impl Into<String>) -> Result<Self, PipelineError> {
        let id = StageId::new(id.into())?;
        Ok(Self {
            name: id.to_string(),
            description: String::new(),
            executable: executable.into(),
            args: Vec::new(),
            dependencies: HashSet::new(),
            environment: HashMap::new(),
            working_directory: None,
            priority: StagePriority::Normal,
            timeout: Duration::from_secs(300),
            max_retries: 0,
            retry_delay: Duration::from_secs(5),
            allow_failure: false,
            tags: HashSet::new(),
            metadata: HashMap::new(),
            condition: None,
            id,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_dependency(mut self, dep: StageId) -> Self {
        self.dependencies.insert(dep);
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = StageId>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn with_priority(mut self, priority: StagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_allow_failure(mut self, allow_failure: bool) -> Self {
        self.allow_failure = allow_failure;
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: ConditionFn) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Evaluates the condition predicate, defaulting to `true` when absent.
    pub fn evaluate_condition(&self) -> bool {
        self.condition.as_ref().map(|c| c()).unwrap_or(true)
    }

    /// Merged environment: execution-config environment overlaid by this
    /// stage's own entries (§6, stage invocation).
    pub fn merged_environment(&self, base: &HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = base.clone();
        merged.extend(self.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

impl std::fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("executable", &self.executable)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_spec() {
        let stage = StageDefinition::new("subhunter", "/usr/bin/subhunter").unwrap();
        assert_eq!(stage.timeout, Duration::from_secs(300));
        assert_eq!(stage.max_retries, 0);
        assert!(!stage.allow_failure);
        assert!(stage.evaluate_condition());
    }

    #[test]
    fn merged_environment_overlays_stage_over_base() {
        let mut base = HashMap::new();
        base.insert("A".to_string(), "base".to_string());
        base.insert("B".to_string(), "base".to_string());

        let stage = StageDefinition::new("s", "/bin/true")
            .unwrap()
            .with_condition(std::sync::Arc::new(|| true));
        let mut stage = stage;
        stage.environment.insert("B".to_string(), "stage".to_string());

        let merged = stage.merged_environment(&base);
        assert_eq!(merged.get("A").unwrap(), "base");
        assert_eq!(merged.get("B").unwrap(), "stage");
    }
}
