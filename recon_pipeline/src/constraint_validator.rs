// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Constraint inference and compatibility checking (§4.C).
//!
//! Stages do not carry constraint tags directly; the validator infers them
//! from the stage's executable path, arguments, and timeout, unless a
//! caller has registered a custom validator for that constraint, which
//! always overrides the default heuristic.

use parking_lot::RwLock;
use recon_pipeline_domain::{StageConstraint, StageDefinition};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub type CustomValidator = Arc<dyn Fn(&StageDefinition) -> bool + Send + Sync>;

const CPU_INTENSIVE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

pub struct ConstraintValidator {
    custom: RwLock<HashMap<StageConstraint, CustomValidator>>,
}

impl ConstraintValidator {
    pub fn new() -> Self {
        Self {
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a validator that overrides the default heuristic for one
    /// constraint for all subsequent `validate_constraint` calls.
    pub fn register_custom(&self, constraint: StageConstraint, validator: CustomValidator) {
        self.custom.write().insert(constraint, validator);
    }

    pub fn validate_constraint(&self, stage: &StageDefinition, constraint: StageConstraint) -> bool {
        if let Some(custom) = self.custom.read().get(&constraint) {
            return custom(stage);
        }
        self.infer(stage).contains(&constraint)
    }

    /// Returns the subset of `constraints` that do not hold for `stage`.
    pub fn find_violated(&self, stage: &StageDefinition, constraints: &[StageConstraint]) -> Vec<StageConstraint> {
        constraints
            .iter()
            .copied()
            .filter(|c| !self.validate_constraint(stage, *c))
            .collect()
    }

    /// True iff no two constraints in the set are mutually exclusive.
    pub fn check_compatibility(&self, constraints: &HashSet<StageConstraint>) -> bool {
        let list: Vec<StageConstraint> = constraints.iter().copied().collect();
        for (i, &a) in list.iter().enumerate() {
            for &b in &list[i + 1..] {
                if a.conflicts_with(b) {
                    return false;
                }
            }
        }
        true
    }

    /// Substring/threshold heuristics (§4.C): inspects the executable path,
    /// arguments, and configured timeout. Unaffected by custom validators --
    /// this is the default the custom layer overrides.
    pub fn infer(&self, stage: &StageDefinition) -> HashSet<StageConstraint> {
        let mut inferred = HashSet::new();
        let haystack = format!("{} {}", stage.executable, stage.args.join(" ")).to_lowercase();

        if haystack.contains("http") || haystack.contains("--url") || haystack.contains("--host") {
            inferred.insert(StageConstraint::NetworkDependent);
        }
        if haystack.contains("--input") || haystack.contains("--output") || haystack.contains(".csv") {
            inferred.insert(StageConstraint::FilesystemDependent);
        }
        if stage.timeout > CPU_INTENSIVE_THRESHOLD {
            inferred.insert(StageConstraint::CpuIntensive);
        }
        inferred
    }
}

impl Default for ConstraintValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(executable: &str, args: &[&str], timeout_secs: u64) -> StageDefinition {
        StageDefinition::new("s", executable)
            .unwrap()
            .with_args(args.iter().map(|s| s.to_string()).collect())
            .with_timeout(Duration::from_secs(timeout_secs))
    }

    #[test]
    fn infers_network_dependent_from_args() {
        let validator = ConstraintValidator::new();
        let stage = stage("httpx", &["--url", "https://example.com"], 30);
        assert!(validator.infer(&stage).contains(&StageConstraint::NetworkDependent));
    }

    #[test]
    fn infers_cpu_intensive_from_long_timeout() {
        let validator = ConstraintValidator::new();
        let stage = stage("/usr/bin/nmap", &[], 600);
        assert!(validator.infer(&stage).contains(&StageConstraint::CpuIntensive));
    }

    #[test]
    fn conflicting_constraints_fail_compatibility() {
        let validator = ConstraintValidator::new();
        let mut set = HashSet::new();
        set.insert(StageConstraint::SequentialOnly);
        set.insert(StageConstraint::ParallelSafe);
        assert!(!validator.check_compatibility(&set));
    }

    #[test]
    fn custom_validator_overrides_default_heuristic() {
        let validator = ConstraintValidator::new();
        let stage = stage("httpx", &["--url", "x"], 1);
        validator.register_custom(StageConstraint::NetworkDependent, Arc::new(|_| false));
        assert!(!validator.validate_constraint(&stage, StageConstraint::NetworkDependent));
    }
}
