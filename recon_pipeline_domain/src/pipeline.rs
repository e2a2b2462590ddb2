// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Aggregate
//!
//! A named, acyclic collection of [`StageDefinition`]s addressable by a
//! generated [`PipelineId`]. Stages are stored in an index owned by the
//! pipeline and referenced by id rather than by pointer, so the graph has no
//! cyclic ownership (§9, *Cyclic ownership*).

use crate::value_objects::{PipelineId, StageId};
use crate::{PipelineError, StageDefinition};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Pipeline {
    id: PipelineId,
    name: String,
    stages: HashMap<StageId, StageDefinition>,
    execution_active: bool,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PipelineId::new(),
            name: name.into(),
            stages: HashMap::new(),
            execution_active: false,
        }
    }

    pub fn id(&self) -> &PipelineId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.values()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn get_stage(&self, id: &StageId) -> Option<&StageDefinition> {
        self.stages.get(id)
    }

    pub fn contains_stage(&self, id: &StageId) -> bool {
        self.stages.contains_key(id)
    }

    pub fn mark_execution_active(&mut self, active: bool) {
        self.execution_active = active;
    }

    pub fn is_execution_active(&self) -> bool {
        self.execution_active
    }

    /// Adds a stage. Mutation is only permitted while no execution is active
    /// (§3, Pipeline lifecycle) and stage ids must stay unique.
    pub fn add_stage(&mut self, stage: StageDefinition) -> Result<(), PipelineError> {
        self.guard_mutable()?;
        if self.stages.contains_key(&stage.id) {
            return Err(PipelineError::ValidationFailed(format!(
                "stage id '{}' already exists in pipeline '{}'",
                stage.id, self.name
            )));
        }
        self.stages.insert(stage.id.clone(), stage);
        Ok(())
    }

    pub fn remove_stage(&mut self, id: &StageId) -> Result<StageDefinition, PipelineError> {
        self.guard_mutable()?;
        self.stages
            .remove(id)
            .ok_or_else(|| PipelineError::NotFound(format!("stage '{id}' not found in pipeline '{}'", self.name)))
    }

    pub fn update_stage(&mut self, stage: StageDefinition) -> Result<(), PipelineError> {
        self.guard_mutable()?;
        if !self.stages.contains_key(&stage.id) {
            return Err(PipelineError::NotFound(format!(
                "stage '{}' not found in pipeline '{}'",
                stage.id, self.name
            )));
        }
        self.stages.insert(stage.id.clone(), stage);
        Ok(())
    }

    fn guard_mutable(&self) -> Result<(), PipelineError> {
        if self.execution_active {
            return Err(PipelineError::ConfigurationError(
                "cannot mutate a pipeline with an active execution".to_string(),
            ));
        }
        Ok(())
    }

    /// Validates the invariants of §3: every dependency resolves within the
    /// pipeline. Acyclicity itself is the dependency resolver's job (§4.B).
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::EmptySelection("pipeline has no stages".to_string()));
        }
        for stage in self.stages.values() {
            for dep in &stage.dependencies {
                if !self.stages.contains_key(dep) {
                    return Err(PipelineError::DependencyError(format!(
                        "stage '{}' depends on missing stage '{dep}'",
                        stage.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_stage_round_trips() {
        let mut pipeline = Pipeline::new("recon");
        let stage = StageDefinition::new("subhunter", "/bin/true").unwrap();
        pipeline.add_stage(stage).unwrap();
        assert_eq!(pipeline.stage_count(), 1);

        let id = StageId::new("subhunter").unwrap();
        let removed = pipeline.remove_stage(&id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(pipeline.stage_count(), 0);
    }

    #[test]
    fn duplicate_stage_id_is_rejected() {
        let mut pipeline = Pipeline::new("recon");
        pipeline.add_stage(StageDefinition::new("a", "/bin/true").unwrap()).unwrap();
        let err = pipeline.add_stage(StageDefinition::new("a", "/bin/true").unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::ValidationFailed(_)));
    }

    #[test]
    fn cannot_mutate_while_execution_active() {
        let mut pipeline = Pipeline::new("recon");
        pipeline.mark_execution_active(true);
        let err = pipeline.add_stage(StageDefinition::new("a", "/bin/true").unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigurationError(_)));
    }

    #[test]
    fn validate_catches_missing_dependency() {
        let mut pipeline = Pipeline::new("recon");
        let dep = StageId::new("missing").unwrap();
        pipeline
            .add_stage(StageDefinition::new("a", "/bin/true").unwrap().with_dependency(dep))
            .unwrap();
        assert!(matches!(pipeline.validate(), Err(PipelineError::DependencyError(_))));
    }
}
