// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Dependency resolution (§4.B): topological ordering via Kahn's algorithm,
//! cycle detection via a tri-color DFS that reports the concrete cycle path,
//! execution levels for parallel scheduling, and critical-path estimation.

use recon_pipeline_domain::{Pipeline, PipelineError, StageId, StagePriority};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The concrete cycle, in traversal order, e.g. `[a, b, c, a]`.
    CircularDependency(Vec<StageId>),
    UnknownDependency { stage: StageId, missing: StageId },
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionError::CircularDependency(path) => {
                let rendered: Vec<String> = path.iter().map(|id| id.as_str().to_string()).collect();
                write!(f, "circular dependency: {}", rendered.join(" -> "))
            }
            ResolutionError::UnknownDependency { stage, missing } => {
                write!(f, "stage '{stage}' depends on unknown stage '{missing}'")
            }
        }
    }
}

impl From<ResolutionError> for PipelineError {
    fn from(err: ResolutionError) -> Self {
        PipelineError::DependencyError(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedDependencies {
    /// A single valid topological order (ties broken by priority desc, id asc).
    pub execution_order: Vec<StageId>,
    /// Stages grouped into levels that can run concurrently.
    pub execution_levels: Vec<Vec<StageId>>,
    /// The longest chain of stages by cumulative estimated duration.
    pub critical_path: Vec<StageId>,
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Stateless resolver over a borrowed [`Pipeline`]; holds no data of its own.
pub struct DependencyResolver;

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Fails fast on the first cycle or dangling dependency it finds.
    pub fn resolve(&self, pipeline: &Pipeline) -> Result<ResolvedDependencies, ResolutionError> {
        self.check_unknown_dependencies(pipeline)?;
        if let Some(cycle) = self.find_cycle(pipeline) {
            return Err(ResolutionError::CircularDependency(cycle));
        }

        let execution_order = self.kahn_order(pipeline);
        let execution_levels = self.levels(pipeline);
        let critical_path = self.critical_path(pipeline, &execution_levels);

        Ok(ResolvedDependencies {
            execution_order,
            execution_levels,
            critical_path,
        })
    }

    /// True if `from` can reach `to` by following dependency edges.
    pub fn depends_on(&self, pipeline: &Pipeline, from: &StageId, to: &StageId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from.clone()];
        while let Some(current) = stack.pop() {
            if &current == to {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(stage) = pipeline.get_stage(&current) {
                stack.extend(stage.dependencies.iter().cloned());
            }
        }
        false
    }

    fn check_unknown_dependencies(&self, pipeline: &Pipeline) -> Result<(), ResolutionError> {
        for stage in pipeline.stages() {
            for dep in &stage.dependencies {
                if !pipeline.contains_stage(dep) {
                    return Err(ResolutionError::UnknownDependency {
                        stage: stage.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Tri-color DFS; returns the first cycle found as a concrete path.
    fn find_cycle(&self, pipeline: &Pipeline) -> Option<Vec<StageId>> {
        let mut color: HashMap<StageId, Color> = pipeline.stages().map(|s| (s.id.clone(), Color::White)).collect();
        let mut path: Vec<StageId> = Vec::new();

        let mut ids: Vec<StageId> = pipeline.stages().map(|s| s.id.clone()).collect();
        ids.sort();

        for id in ids {
            if color.get(&id) == Some(&Color::White) {
                if let Some(cycle) = visit(pipeline, &id, &mut color, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Kahn's algorithm with deterministic tie-breaking: priority descending,
    /// then stage id ascending, among nodes whose indegree just hit zero.
    fn kahn_order(&self, pipeline: &Pipeline) -> Vec<StageId> {
        let mut indegree: HashMap<StageId, usize> = HashMap::new();
        let mut dependents: HashMap<StageId, Vec<StageId>> = HashMap::new();

        for stage in pipeline.stages() {
            indegree.entry(stage.id.clone()).or_insert(0);
            for dep in &stage.dependencies {
                *indegree.entry(stage.id.clone()).or_insert(0) += 1;
                dependents.entry(dep.clone()).or_default().push(stage.id.clone());
            }
        }

        let mut ready: Vec<StageId> = indegree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        sort_ready(pipeline, &mut ready);

        let mut order = Vec::with_capacity(indegree.len());
        let mut queue: VecDeque<StageId> = ready.into();

        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            if let Some(children) = dependents.get(&id) {
                let mut newly_ready = Vec::new();
                for child in children {
                    if let Some(deg) = indegree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            newly_ready.push(child.clone());
                        }
                    }
                }
                sort_ready(pipeline, &mut newly_ready);
                for id in newly_ready {
                    // Insert keeping the queue's global priority ordering approximate:
                    // re-sort the whole frontier so ties are still broken correctly.
                    queue.push_back(id);
                }
                let mut frontier: Vec<StageId> = queue.into_iter().collect();
                sort_ready(pipeline, &mut frontier);
                queue = frontier.into();
            }
        }

        order
    }

    /// Stages grouped by the longest dependency chain ending at each stage;
    /// every stage in level N has all its dependencies in levels `< N`.
    fn levels(&self, pipeline: &Pipeline) -> Vec<Vec<StageId>> {
        let mut level_of: HashMap<StageId, usize> = HashMap::new();
        let order = self.kahn_order(pipeline);

        for id in &order {
            let stage = match pipeline.get_stage(id) {
                Some(s) => s,
                None => continue,
            };
            let level = stage
                .dependencies
                .iter()
                .filter_map(|dep| level_of.get(dep))
                .map(|lvl| lvl + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(id.clone(), level);
        }

        let max_level = level_of.values().copied().max().unwrap_or(0);
        let mut levels: Vec<Vec<StageId>> = vec![Vec::new(); max_level + 1];
        for id in &order {
            if let Some(&level) = level_of.get(id) {
                levels[level].push(id.clone());
            }
        }
        levels
    }

    /// Approximates the critical path as the level-by-level chain through the
    /// stage with the greatest estimated duration (timeout used as the proxy
    /// for expected duration, since no historical runtime exists up front).
    fn critical_path(&self, pipeline: &Pipeline, levels: &[Vec<StageId>]) -> Vec<StageId> {
        let mut path = Vec::new();
        for level in levels {
            let slowest = level.iter().max_by_key(|id| {
                pipeline
                    .get_stage(id)
                    .map(|s| s.timeout.as_millis())
                    .unwrap_or_default()
            });
            if let Some(id) = slowest {
                path.push(id.clone());
            }
        }
        path
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_ready(pipeline: &Pipeline, ready: &mut [StageId]) {
    ready.sort_by(|a, b| {
        let pa = pipeline.get_stage(a).map(|s| s.priority).unwrap_or(StagePriority::Normal);
        let pb = pipeline.get_stage(b).map(|s| s.priority).unwrap_or(StagePriority::Normal);
        pb.cmp(&pa).then_with(|| a.cmp(b))
    });
}

fn visit(pipeline: &Pipeline, id: &StageId, color: &mut HashMap<StageId, Color>, path: &mut Vec<StageId>) -> Option<Vec<StageId>> {
    color.insert(id.clone(), Color::Gray);
    path.push(id.clone());

    if let Some(stage) = pipeline.get_stage(id) {
        let mut deps: Vec<StageId> = stage.dependencies.iter().cloned().collect();
        deps.sort();
        for dep in deps {
            match color.get(&dep) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|s| s == &dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Some(Color::Black) => continue,
                _ => {
                    if let Some(cycle) = visit(pipeline, &dep, color, path) {
                        return Some(cycle);
                    }
                }
            }
        }
    }

    path.pop();
    color.insert(id.clone(), Color::Black);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_pipeline_domain::StageDefinition;

    fn stage(id: &str, deps: &[&str]) -> StageDefinition {
        let mut s = StageDefinition::new(id, "/bin/true").unwrap();
        for dep in deps {
            s = s.with_dependency(StageId::new(*dep).unwrap());
        }
        s
    }

    #[test]
    fn linear_chain_resolves_in_order() {
        let mut pipeline = Pipeline::new("chain");
        pipeline.add_stage(stage("a", &[])).unwrap();
        pipeline.add_stage(stage("b", &["a"])).unwrap();
        pipeline.add_stage(stage("c", &["b"])).unwrap();

        let resolved = DependencyResolver::new().resolve(&pipeline).unwrap();
        assert_eq!(
            resolved.execution_order,
            vec![
                StageId::new("a").unwrap(),
                StageId::new("b").unwrap(),
                StageId::new("c").unwrap()
            ]
        );
        assert_eq!(resolved.execution_levels.len(), 3);
    }

    #[test]
    fn cycle_is_reported_with_concrete_path() {
        let mut pipeline = Pipeline::new("cyclic");
        pipeline.add_stage(stage("a", &["c"])).unwrap();
        pipeline.add_stage(stage("b", &["a"])).unwrap();
        pipeline.add_stage(stage("c", &["b"])).unwrap();

        let err = DependencyResolver::new().resolve(&pipeline).unwrap_err();
        match err {
            ResolutionError::CircularDependency(path) => {
                assert!(path.len() >= 2);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle_of_length_one() {
        let mut pipeline = Pipeline::new("self-cycle");
        pipeline.add_stage(stage("a", &["a"])).unwrap();

        let err = DependencyResolver::new().resolve(&pipeline).unwrap_err();
        match err {
            ResolutionError::CircularDependency(path) => {
                assert_eq!(path, vec![StageId::new("a").unwrap(), StageId::new("a").unwrap()]);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut pipeline = Pipeline::new("dangling");
        pipeline.add_stage(stage("a", &["ghost"])).unwrap();
        let err = DependencyResolver::new().resolve(&pipeline).unwrap_err();
        assert!(matches!(err, ResolutionError::UnknownDependency { .. }));
    }

    #[test]
    fn independent_stages_share_a_level() {
        let mut pipeline = Pipeline::new("fanout");
        pipeline.add_stage(stage("root", &[])).unwrap();
        pipeline.add_stage(stage("left", &["root"])).unwrap();
        pipeline.add_stage(stage("right", &["root"])).unwrap();

        let resolved = DependencyResolver::new().resolve(&pipeline).unwrap();
        assert_eq!(resolved.execution_levels[0], vec![StageId::new("root").unwrap()]);
        assert_eq!(resolved.execution_levels[1].len(), 2);
    }
}
