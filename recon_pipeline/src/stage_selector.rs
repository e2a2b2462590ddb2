// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage selection and planning (§4.D): filters a pipeline's stages down to
//! the set that should run together, validates the result, scores pairwise
//! compatibility, and produces an executable plan with time/resource
//! estimates. Results are cached by a fingerprint of the inputs.

use crate::constraint_validator::ConstraintValidator;
use crate::dependency_resolver::DependencyResolver;
use crate::emit_safely;
use recon_pipeline_domain::{
    CompatibilityResult, Event, EventKind, EventSink, ExecutionConfig, FilterKind, FilterMode, Pipeline,
    ResourceEstimate, SelectionConfig, SelectionFilter, SelectionResult, SelectionStatus, StageDefinition, StageId,
    ValidationLevel,
};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_CACHE_CAPACITY: usize = 128;

struct CacheEntry {
    result: SelectionResult,
    inserted_at: Instant,
}

pub struct StageSelector {
    resolver: DependencyResolver,
    constraints: ConstraintValidator,
    sink: Arc<dyn EventSink>,
    cache: parking_lot::Mutex<HashMap<String, CacheEntry>>,
    cache_order: parking_lot::Mutex<Vec<String>>,
    cache_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StageSelector {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            resolver: DependencyResolver::new(),
            constraints: ConstraintValidator::new(),
            sink,
            cache: parking_lot::Mutex::new(HashMap::new()),
            cache_order: parking_lot::Mutex::new(Vec::new()),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn select(&self, pipeline: &Pipeline, filters: &[SelectionFilter], config: &SelectionConfig) -> SelectionResult {
        emit_safely(&*self.sink, Event::new(EventKind::SelectionStarted, "selection started").with_pipeline(pipeline.id().clone()));

        let cache_key = fingerprint(pipeline, config);
        if config.enable_caching {
            if let Some(hit) = self.cache_lookup(&cache_key, config.cache_ttl) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                emit_safely(&*self.sink, Event::new(EventKind::CacheHit, "selection cache hit").with_pipeline(pipeline.id().clone()));
                return hit;
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            emit_safely(&*self.sink, Event::new(EventKind::CacheMiss, "selection cache miss").with_pipeline(pipeline.id().clone()));
        }

        let total_available = pipeline.stage_count();
        if total_available == 0 {
            return SelectionResult::empty("pipeline has no stages", 0);
        }

        let mut selected: HashSet<StageId> = self.apply_filters(pipeline, filters);
        emit_safely(
            &*self.sink,
            Event::new(EventKind::StageFiltered, format!("{} of {} stages kept after filtering", selected.len(), total_available))
                .with_pipeline(pipeline.id().clone()),
        );

        if config.include_dependencies {
            self.extend_with_closure(pipeline, &mut selected, config.max_dependency_depth, Direction::Dependencies);
        }
        if config.include_dependents {
            self.extend_with_closure(pipeline, &mut selected, config.max_dependency_depth, Direction::Dependents);
        }

        if selected.is_empty() {
            return SelectionResult::empty("no stage matched the selection filters", total_available);
        }
        if selected.len() > config.max_selected_stages {
            let mut result = SelectionResult::empty(
                format!("selection of {} stages exceeds max_selected_stages {}", selected.len(), config.max_selected_stages),
                total_available,
            );
            result.status = SelectionStatus::ConfigurationError;
            return result;
        }

        emit_safely(&*self.sink, Event::new(EventKind::ValidationStarted, "validation started").with_pipeline(pipeline.id().clone()));
        if let Err((status, message)) = self.validate(pipeline, &selected, config.validation_level) {
            emit_safely(&*self.sink, Event::new(EventKind::SelectionFailed, message.clone()).with_pipeline(pipeline.id().clone()));
            let mut result = SelectionResult::empty(message, total_available);
            result.status = status;
            return result;
        }
        emit_safely(&*self.sink, Event::new(EventKind::ValidationCompleted, "validation completed").with_pipeline(pipeline.id().clone()));

        let sub_pipeline = self.subgraph(pipeline, &selected);
        let resolved = match self.resolver.resolve(&sub_pipeline) {
            Ok(resolved) => resolved,
            Err(err) => {
                let message = err.to_string();
                emit_safely(&*self.sink, Event::new(EventKind::SelectionFailed, message.clone()).with_pipeline(pipeline.id().clone()));
                let mut result = SelectionResult::empty(message, total_available);
                result.status = SelectionStatus::CircularDependency;
                return result;
            }
        };
        emit_safely(&*self.sink, Event::new(EventKind::DependencyResolved, "dependency graph resolved").with_pipeline(pipeline.id().clone()));

        let compatibility = self.compatibility(pipeline, &selected);
        emit_safely(&*self.sink, Event::new(EventKind::ConstraintChecked, "compatibility analysis completed").with_pipeline(pipeline.id().clone()));

        let status = if compatibility.are_compatible {
            SelectionStatus::Success
        } else if compatibility.compatibility_score >= config.compatibility_threshold {
            SelectionStatus::PartialSuccess
        } else {
            SelectionStatus::IncompatibleStages
        };

        let selected_stage_ids: Vec<StageId> = resolved.execution_order.clone();
        let ratio = selected_stage_ids.len() as f64 / total_available as f64;

        let result = SelectionResult {
            status,
            selected_stage_ids,
            execution_order: resolved.execution_order,
            execution_levels: resolved.execution_levels,
            errors: Vec::new(),
            warnings: if status == SelectionStatus::PartialSuccess {
                vec!["selected stages have a compatibility score below 1.0".to_string()]
            } else {
                Vec::new()
            },
            information: Vec::new(),
            compatibility,
            total_available_stages: total_available,
            filtered_stages: selected.len(),
            selection_ratio: ratio,
            cache_key: cache_key.clone(),
            selection_timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };

        if config.enable_caching {
            self.cache_insert(cache_key, result.clone());
        }

        emit_safely(&*self.sink, Event::new(EventKind::SelectionCompleted, "selection completed").with_pipeline(pipeline.id().clone()));
        result
    }

    /// Produces time/resource estimates for an already-selected subgraph,
    /// as consumed by [`crate::pipeline_engine`] to build an execution plan.
    pub fn estimate(&self, pipeline: &Pipeline, result: &SelectionResult) -> (u64, u64, ResourceEstimate) {
        let mut total_ms: u64 = 0;
        let mut cpu_minutes = 0.0;
        let mut memory_mb = 0.0;
        let mut network_mb = 0.0;
        let mut disk_mb = 0.0;

        for id in &result.selected_stage_ids {
            let Some(stage) = pipeline.get_stage(id) else { continue };
            total_ms += stage.timeout.as_millis() as u64;
            cpu_minutes += stage.priority.cpu_weight() * (stage.timeout.as_secs_f64() / 60.0);
            memory_mb += 100.0;
            if self.constraints.infer(stage).contains(&recon_pipeline_domain::StageConstraint::NetworkDependent) {
                network_mb += 50.0;
            }
            if !stage.args.is_empty() {
                disk_mb += 10.0;
            }
        }

        let parallel_ms: u64 = result
            .execution_levels
            .iter()
            .map(|level| {
                level
                    .iter()
                    .filter_map(|id| pipeline.get_stage(id))
                    .map(|s| s.timeout.as_millis() as u64)
                    .max()
                    .unwrap_or(0)
            })
            .sum();

        (
            total_ms,
            parallel_ms,
            ResourceEstimate {
                cpu_minutes,
                memory_mb,
                network_mb,
                disk_mb,
            },
        )
    }

    /// Assembles the serializable [`ExecutionPlan`] artifact (§3, §6) for an
    /// already-computed selection: execution order, parallel groups,
    /// dependency map, per-stage constraints, and the estimates from
    /// [`StageSelector::estimate`].
    pub fn build_plan(&self, pipeline: &Pipeline, result: &SelectionResult, execution_config: ExecutionConfig) -> recon_pipeline_domain::ExecutionPlan {
        let (total_ms, parallel_ms, resource_estimate) = self.estimate(pipeline, result);

        let dependency_map: HashMap<StageId, Vec<StageId>> = result
            .selected_stage_ids
            .iter()
            .filter_map(|id| pipeline.get_stage(id))
            .map(|s| (s.id.clone(), s.dependencies.iter().cloned().collect()))
            .collect();

        let per_stage_constraints: HashMap<StageId, Vec<recon_pipeline_domain::StageConstraint>> = result
            .selected_stage_ids
            .iter()
            .filter_map(|id| pipeline.get_stage(id))
            .map(|s| (s.id.clone(), self.constraints.infer(s).into_iter().collect()))
            .collect();

        let selected: HashSet<StageId> = result.selected_stage_ids.iter().cloned().collect();
        let critical_path = self
            .resolver
            .resolve(&self.subgraph(pipeline, &selected))
            .map(|resolved| resolved.critical_path)
            .unwrap_or_default();

        let mut optimization_suggestions = Vec::new();
        if result.compatibility.compatibility_score < 1.0 {
            optimization_suggestions.push("split incompatible stages into separate runs to raise the compatibility score".to_string());
        }
        if parallel_ms > 0 && total_ms > parallel_ms * 2 {
            optimization_suggestions.push("sequential time estimate is far above the parallel critical path; consider parallel or hybrid mode".to_string());
        }

        let mut plan = recon_pipeline_domain::ExecutionPlan::new(execution_config);
        plan.execution_order = result.execution_order.clone();
        plan.parallel_groups = result.execution_levels.clone();
        plan.dependency_map = dependency_map;
        plan.per_stage_constraints = per_stage_constraints;
        plan.total_time_estimate_ms = total_ms;
        plan.parallel_time_estimate_ms = parallel_ms;
        plan.resource_estimate = resource_estimate;
        plan.critical_path = critical_path;
        plan.optimization_suggestions = optimization_suggestions;
        plan.valid = matches!(result.status, SelectionStatus::Success | SelectionStatus::PartialSuccess);
        plan
    }

    fn apply_filters(&self, pipeline: &Pipeline, filters: &[SelectionFilter]) -> HashSet<StageId> {
        let includes: Vec<&SelectionFilter> = filters.iter().filter(|f| f.mode == FilterMode::Include).collect();
        let excludes: Vec<&SelectionFilter> = filters.iter().filter(|f| f.mode == FilterMode::Exclude).collect();
        let requires: Vec<&SelectionFilter> = filters.iter().filter(|f| f.mode == FilterMode::Require).collect();

        pipeline
            .stages()
            .filter(|stage| {
                let passes_include = includes.is_empty() || includes.iter().any(|f| matches_filter(f, stage));
                let passes_exclude = !excludes.iter().any(|f| matches_filter(f, stage));
                let passes_require = requires.iter().all(|f| matches_filter(f, stage));
                passes_include && passes_exclude && passes_require
            })
            .map(|stage| stage.id.clone())
            .collect()
    }

    fn extend_with_closure(&self, pipeline: &Pipeline, selected: &mut HashSet<StageId>, max_depth: usize, direction: Direction) {
        let seeds: Vec<StageId> = selected.iter().cloned().collect();
        for seed in seeds {
            let mut frontier = vec![seed];
            let mut depth = 0;
            while depth < max_depth && !frontier.is_empty() {
                let mut next = Vec::new();
                for id in &frontier {
                    let neighbors: Vec<StageId> = match direction {
                        Direction::Dependencies => pipeline
                            .get_stage(id)
                            .map(|s| s.dependencies.iter().cloned().collect())
                            .unwrap_or_default(),
                        Direction::Dependents => pipeline
                            .stages()
                            .filter(|s| s.dependencies.contains(id))
                            .map(|s| s.id.clone())
                            .collect(),
                    };
                    for n in neighbors {
                        if selected.insert(n.clone()) {
                            next.push(n);
                        }
                    }
                }
                frontier = next;
                depth += 1;
            }
        }
    }

    fn validate(&self, pipeline: &Pipeline, selected: &HashSet<StageId>, level: ValidationLevel) -> Result<(), (SelectionStatus, String)> {
        if level == ValidationLevel::None {
            return Ok(());
        }

        // basic
        for id in selected {
            let stage = pipeline
                .get_stage(id)
                .ok_or_else(|| (SelectionStatus::ValidationFailed, format!("selected stage '{id}' not found")))?;
            if stage.executable.trim().is_empty() {
                return Err((SelectionStatus::ValidationFailed, format!("stage '{id}' has an empty executable")));
            }
        }
        if level == ValidationLevel::Basic {
            return Ok(());
        }

        // dependencies: no cycles, no dangling refs. Checked against the
        // original pipeline *before* building the subgraph: `subgraph` trims
        // any dependency id not in `selected`, which would otherwise hide a
        // reference to a stage id that doesn't exist anywhere in `pipeline`.
        for id in selected {
            let Some(stage) = pipeline.get_stage(id) else { continue };
            for dep in &stage.dependencies {
                if pipeline.get_stage(dep).is_none() {
                    return Err((
                        SelectionStatus::ValidationFailed,
                        format!("stage '{id}' depends on unknown stage '{dep}'"),
                    ));
                }
            }
        }
        let sub_pipeline = self.subgraph(pipeline, selected);
        self.resolver
            .resolve(&sub_pipeline)
            .map_err(|err| (SelectionStatus::CircularDependency, err.to_string()))?;
        if matches!(level, ValidationLevel::Dependencies) {
            return Ok(());
        }

        // resources: nothing further to check beyond estimate feasibility is
        // a planning concern, not a rejection criterion, for this level.
        if matches!(level, ValidationLevel::Resources) {
            return Ok(());
        }

        // compatibility / comprehensive: pairwise constraint conflicts
        let compatibility = self.compatibility(pipeline, selected);
        if !compatibility.are_compatible && matches!(level, ValidationLevel::Compatibility | ValidationLevel::Comprehensive) {
            return Err((SelectionStatus::IncompatibleStages, "selected stages have incompatible constraints".to_string()));
        }

        Ok(())
    }

    fn compatibility(&self, pipeline: &Pipeline, selected: &HashSet<StageId>) -> CompatibilityResult {
        let stages: Vec<&StageDefinition> = selected.iter().filter_map(|id| pipeline.get_stage(id)).collect();
        let inferred: HashMap<StageId, HashSet<recon_pipeline_domain::StageConstraint>> =
            stages.iter().map(|s| (s.id.clone(), self.constraints.infer(s))).collect();

        let mut conflicts: HashMap<String, Vec<String>> = HashMap::new();
        let mut per_stage_scores: HashMap<String, f64> = HashMap::new();

        for (i, a) in stages.iter().enumerate() {
            let mut conflicted = false;
            for b in stages.iter().skip(i + 1) {
                let a_constraints = &inferred[&a.id];
                let b_constraints = &inferred[&b.id];
                if a_constraints.iter().any(|&ca| b_constraints.iter().any(|&cb| ca.conflicts_with(cb))) {
                    conflicted = true;
                    conflicts.entry(a.id.to_string()).or_default().push(b.id.to_string());
                    conflicts.entry(b.id.to_string()).or_default().push(a.id.to_string());
                }
            }
            per_stage_scores.insert(a.id.to_string(), if conflicted { 0.5 } else { 1.0 });
        }

        let score = if per_stage_scores.is_empty() {
            1.0
        } else {
            per_stage_scores.values().sum::<f64>() / per_stage_scores.len() as f64
        };

        CompatibilityResult {
            are_compatible: conflicts.is_empty(),
            conflicts,
            warnings: Vec::new(),
            compatibility_score: score,
            per_stage_scores,
        }
    }

    fn subgraph(&self, pipeline: &Pipeline, selected: &HashSet<StageId>) -> Pipeline {
        let mut sub = Pipeline::new(pipeline.name());
        for id in selected {
            if let Some(stage) = pipeline.get_stage(id) {
                let mut trimmed = stage.clone();
                trimmed.dependencies.retain(|d| selected.contains(d));
                let _ = sub.add_stage(trimmed);
            }
        }
        sub
    }

    fn cache_lookup(&self, key: &str, ttl: Duration) -> Option<SelectionResult> {
        let mut cache = self.cache.lock();
        match cache.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < ttl => Some(entry.result.clone()),
            Some(_) => {
                cache.remove(key);
                self.cache_order.lock().retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    fn cache_insert(&self, key: String, result: SelectionResult) {
        let mut cache = self.cache.lock();
        let mut order = self.cache_order.lock();
        if !cache.contains_key(&key) {
            order.push(key.clone());
        }
        cache.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
        while cache.len() > self.cache_capacity {
            if let Some(oldest) = order.first().cloned() {
                order.remove(0);
                cache.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

enum Direction {
    Dependencies,
    Dependents,
}

fn matches_filter(filter: &SelectionFilter, stage: &StageDefinition) -> bool {
    match &filter.kind {
        FilterKind::ById(id) => &stage.id == id,
        FilterKind::ByName { substring } => {
            if filter.case_sensitive {
                stage.name.contains(substring.as_str())
            } else {
                stage.name.to_lowercase().contains(&substring.to_lowercase())
            }
        }
        FilterKind::ByPattern(pattern) => pattern.is_match(&stage.name) || pattern.is_match(stage.id.as_str()),
        FilterKind::ByTags(tags) => tags.iter().any(|t| stage.tags.contains(t)),
        FilterKind::ByPriorityRange { min, max } => stage.priority >= *min && stage.priority <= *max,
        FilterKind::ByExecutionTime { min, max } => stage.timeout >= *min && stage.timeout <= *max,
        FilterKind::ByMetadata { key, value } => stage.metadata.get(key).map(|v| v == value).unwrap_or(false),
        FilterKind::Custom(predicate) => predicate(stage),
    }
}

/// Hashes (sorted stage fingerprints, validation level, include flags, max
/// selected) into a stable cache key (§4.D's caching contract).
fn fingerprint(pipeline: &Pipeline, config: &SelectionConfig) -> String {
    let mut stage_fps: Vec<String> = pipeline
        .stages()
        .map(|s| format!("{}:{}:{:?}", s.id, s.executable, s.dependencies))
        .collect();
    stage_fps.sort();

    let mut hasher = Sha256::new();
    hasher.update(stage_fps.join("|").as_bytes());
    hasher.update([config.validation_level as u8]);
    hasher.update([config.include_dependencies as u8, config.include_dependents as u8]);
    hasher.update(config.max_selected_stages.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_pipeline_domain::NullSink;

    fn pipeline_with(ids: &[(&str, &[&str])]) -> Pipeline {
        let mut pipeline = Pipeline::new("recon");
        for (id, deps) in ids {
            let mut stage = StageDefinition::new(*id, "/bin/true").unwrap();
            for dep in *deps {
                stage = stage.with_dependency(StageId::new(*dep).unwrap());
            }
            pipeline.add_stage(stage).unwrap();
        }
        pipeline
    }

    #[test]
    fn empty_pipeline_yields_empty_selection() {
        let selector = StageSelector::new(Arc::new(NullSink));
        let pipeline = Pipeline::new("empty");
        let result = selector.select(&pipeline, &[], &SelectionConfig::default());
        assert_eq!(result.status, SelectionStatus::EmptySelection);
    }

    #[test]
    fn include_filter_pulls_in_dependencies() {
        let pipeline = pipeline_with(&[("a", &[]), ("b", &["a"]), ("c", &[])]);
        let selector = StageSelector::new(Arc::new(NullSink));
        let filters = vec![SelectionFilter::by_id(FilterMode::Include, StageId::new("b").unwrap())];
        let result = selector.select(&pipeline, &filters, &SelectionConfig::default());
        assert_eq!(result.status, SelectionStatus::Success);
        assert!(result.selected_stage_ids.contains(&StageId::new("a").unwrap()));
        assert!(!result.selected_stage_ids.contains(&StageId::new("c").unwrap()));
    }

    #[test]
    fn dangling_dependency_fails_validation_even_outside_the_selection() {
        // "a" depends on "ghost", a stage id that doesn't exist anywhere in
        // the pipeline. Selecting only "a" (no dependency-closure expansion)
        // must still catch the dangling reference rather than silently
        // trimming it away when the subgraph is built.
        let pipeline = pipeline_with(&[("a", &["ghost"]), ("b", &[])]);
        let selector = StageSelector::new(Arc::new(NullSink));
        let config = SelectionConfig {
            include_dependencies: false,
            include_dependents: false,
            validation_level: ValidationLevel::Dependencies,
            ..SelectionConfig::default()
        };
        let filters = vec![SelectionFilter::by_id(FilterMode::Include, StageId::new("a").unwrap())];
        let result = selector.select(&pipeline, &filters, &config);
        assert_eq!(result.status, SelectionStatus::ValidationFailed);
    }

    #[test]
    fn cache_hit_on_identical_selection() {
        let pipeline = pipeline_with(&[("a", &[])]);
        let selector = StageSelector::new(Arc::new(NullSink));
        let config = SelectionConfig::default();
        let _ = selector.select(&pipeline, &[], &config);
        let _ = selector.select(&pipeline, &[], &config);
        assert!(selector.hit_ratio() > 0.0);
    }

    #[test]
    fn plan_round_trips_through_json() {
        let pipeline = pipeline_with(&[("a", &[]), ("b", &["a"])]);
        let selector = StageSelector::new(Arc::new(NullSink));
        let result = selector.select(&pipeline, &[], &SelectionConfig::default());
        let plan = selector.build_plan(&pipeline, &result, ExecutionConfig::default());
        assert_eq!(plan.execution_order, result.execution_order);

        let json = plan.to_json().unwrap();
        let restored = recon_pipeline_domain::ExecutionPlan::from_json(&json).unwrap();
        assert_eq!(restored.plan_id, plan.plan_id);
        assert_eq!(restored.execution_order, plan.execution_order);
        assert_eq!(restored.critical_path, plan.critical_path);
    }

    #[test]
    fn selection_result_round_trips_through_json() {
        let pipeline = pipeline_with(&[("a", &[])]);
        let selector = StageSelector::new(Arc::new(NullSink));
        let result = selector.select(&pipeline, &[], &SelectionConfig::default());
        let json = result.to_json().unwrap();
        let restored = SelectionResult::from_json(&json).unwrap();
        assert_eq!(restored.status, result.status);
        assert_eq!(restored.selected_stage_ids, result.selected_stage_ids);
        assert_eq!(restored.cache_key, result.cache_key);
    }
}
