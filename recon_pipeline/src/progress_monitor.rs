// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Weighted progress aggregation, ETA estimation, and update throttling
//! (§4.J).

use crate::emit_safely;
use recon_pipeline_domain::{Event, EventKind, EventSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EtaStrategy {
    Linear,
    MovingAverage,
    Exponential,
    Adaptive,
    Weighted,
    Historical,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UpdateMode {
    RealTime,
    Throttled,
    OnDemand,
}

const EXPONENTIAL_ALPHA: f64 = 0.3;
const MOVING_AVERAGE_WINDOW: usize = 10;

struct Sample {
    at: Instant,
    progress_percent: f64,
}

struct Task {
    weight: f64,
    total_units: f64,
    completed_units: f64,
}

pub struct ProgressMonitorConfig {
    pub eta_strategy: EtaStrategy,
    pub update_mode: UpdateMode,
    pub update_interval: Duration,
}

impl Default for ProgressMonitorConfig {
    fn default() -> Self {
        Self {
            eta_strategy: EtaStrategy::Adaptive,
            update_mode: UpdateMode::RealTime,
            update_interval: Duration::from_millis(500),
        }
    }
}

pub struct ProgressMonitor {
    tasks: parking_lot::RwLock<HashMap<String, Task>>,
    samples: parking_lot::RwLock<Vec<Sample>>,
    config: ProgressMonitorConfig,
    sink: Arc<dyn EventSink>,
    started_at: Instant,
    last_emitted_at: parking_lot::Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub percent: f64,
    pub eta: Option<Duration>,
    pub confidence: f64,
}

impl ProgressMonitor {
    pub fn new(config: ProgressMonitorConfig, sink: Arc<dyn EventSink>) -> Self {
        emit_safely(&*sink, Event::new(EventKind::ProgressUpdate, "progress monitor started"));
        Self {
            tasks: parking_lot::RwLock::new(HashMap::new()),
            samples: parking_lot::RwLock::new(Vec::new()),
            config,
            sink,
            started_at: Instant::now(),
            last_emitted_at: parking_lot::Mutex::new(None),
        }
    }

    pub fn register_task(&self, name: impl Into<String>, weight: f64, total_units: f64) {
        self.tasks.write().insert(
            name.into(),
            Task {
                weight,
                total_units: total_units.max(f64::EPSILON),
                completed_units: 0.0,
            },
        );
    }

    pub fn set_absolute(&self, name: &str, units: f64) {
        if let Some(task) = self.tasks.write().get_mut(name) {
            task.completed_units = units.min(task.total_units);
        }
        self.record_sample_and_maybe_emit(name, false);
    }

    pub fn set_percent(&self, name: &str, percent: f64) {
        if let Some(task) = self.tasks.write().get_mut(name) {
            task.completed_units = (percent.clamp(0.0, 100.0) / 100.0) * task.total_units;
        }
        self.record_sample_and_maybe_emit(name, false);
    }

    pub fn increment(&self, name: &str, delta_units: f64) {
        if let Some(task) = self.tasks.write().get_mut(name) {
            task.completed_units = (task.completed_units + delta_units).min(task.total_units);
        }
        self.record_sample_and_maybe_emit(name, false);
    }

    pub fn mark_task_completed(&self, name: &str) {
        if let Some(task) = self.tasks.write().get_mut(name) {
            task.completed_units = task.total_units;
        }
        emit_safely(&*self.sink, Event::new(EventKind::StageCompleted, format!("task '{name}' completed")));
        emit_safely(&*self.sink, Event::new(EventKind::MilestoneReached, format!("task '{name}' reached 100%")));
        self.record_sample_and_maybe_emit(name, true);
    }

    pub fn mark_task_failed(&self, name: &str, reason: impl Into<String>) {
        emit_safely(&*self.sink, Event::new(EventKind::StageFailed, reason.into()));
    }

    /// Overall progress as sum(weight * completed_ratio) / sum(weight) * 100.
    pub fn overall_percent(&self) -> f64 {
        let tasks = self.tasks.read();
        let total_weight: f64 = tasks.values().map(|t| t.weight).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = tasks.values().map(|t| t.weight * (t.completed_units / t.total_units)).sum();
        (weighted / total_weight * 100.0).clamp(0.0, 100.0)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.overall_percent(),
            eta: self.eta(),
            confidence: self.confidence(),
        }
    }

    pub fn eta(&self) -> Option<Duration> {
        let percent = self.overall_percent();
        if percent >= 100.0 {
            return Some(Duration::ZERO);
        }
        let remaining_percent = 100.0 - percent;
        let elapsed = self.started_at.elapsed();

        match self.config.eta_strategy {
            EtaStrategy::Linear | EtaStrategy::Historical => self.linear_eta(percent, elapsed),
            EtaStrategy::MovingAverage => self.moving_average_eta(remaining_percent),
            EtaStrategy::Exponential => self.exponential_eta(remaining_percent),
            EtaStrategy::Weighted => self.weighted_eta(remaining_percent, elapsed),
            EtaStrategy::Adaptive => self.adaptive_eta(percent, elapsed, remaining_percent),
        }
    }

    fn linear_eta(&self, percent: f64, elapsed: Duration) -> Option<Duration> {
        if percent <= 0.0 {
            return None;
        }
        let rate = percent / elapsed.as_secs_f64().max(f64::EPSILON);
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(((100.0 - percent) / rate).max(0.0)))
    }

    fn moving_average_eta(&self, remaining_percent: f64) -> Option<Duration> {
        let samples = self.samples.read();
        let window: Vec<&Sample> = samples.iter().rev().take(MOVING_AVERAGE_WINDOW).collect();
        if window.len() < 2 {
            return None;
        }
        let (first, last) = (window.last().unwrap(), window.first().unwrap());
        let dt = last.at.duration_since(first.at).as_secs_f64();
        let dprogress = last.progress_percent - first.progress_percent;
        if dt <= 0.0 || dprogress <= 0.0 {
            return None;
        }
        let rate = dprogress / dt;
        Some(Duration::from_secs_f64((remaining_percent / rate).max(0.0)))
    }

    fn exponential_eta(&self, remaining_percent: f64) -> Option<Duration> {
        let samples = self.samples.read();
        if samples.len() < 2 {
            return None;
        }
        let mut smoothed_rate: Option<f64> = None;
        for window in samples.windows(2) {
            let dt = window[1].at.duration_since(window[0].at).as_secs_f64();
            if dt <= 0.0 {
                continue;
            }
            let instantaneous = (window[1].progress_percent - window[0].progress_percent) / dt;
            smoothed_rate = Some(match smoothed_rate {
                None => instantaneous,
                Some(prev) => EXPONENTIAL_ALPHA * instantaneous + (1.0 - EXPONENTIAL_ALPHA) * prev,
            });
        }
        let rate = smoothed_rate?;
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64((remaining_percent / rate).max(0.0)))
    }

    fn weighted_eta(&self, remaining_percent: f64, elapsed: Duration) -> Option<Duration> {
        let tasks = self.tasks.read();
        let total_weight: f64 = tasks.values().map(|t| t.weight).sum();
        let completed_weight: f64 = tasks.values().map(|t| t.weight * (t.completed_units / t.total_units)).sum();
        if completed_weight <= 0.0 {
            return None;
        }
        let time_per_weighted_unit = elapsed.as_secs_f64() / completed_weight;
        let remaining_weighted_units = (remaining_percent / 100.0) * total_weight;
        Some(Duration::from_secs_f64((time_per_weighted_unit * remaining_weighted_units).max(0.0)))
    }

    /// Weighted combination of linear, moving-average, and exponential ETAs;
    /// the combination weights shift toward the sample-based estimators as
    /// more samples accumulate.
    fn adaptive_eta(&self, percent: f64, elapsed: Duration, remaining_percent: f64) -> Option<Duration> {
        let history_size = self.samples.read().len();
        let sample_weight = (history_size as f64 / MOVING_AVERAGE_WINDOW as f64).min(1.0);
        let linear_weight = 1.0 - sample_weight;

        let linear = self.linear_eta(percent, elapsed);
        let moving_average = self.moving_average_eta(remaining_percent);
        let exponential = self.exponential_eta(remaining_percent);

        let candidates: Vec<(f64, Duration)> = [
            (linear_weight, linear),
            (sample_weight * 0.5, moving_average),
            (sample_weight * 0.5, exponential),
        ]
        .into_iter()
        .filter_map(|(w, d)| d.map(|d| (w, d)))
        .collect();

        if candidates.is_empty() {
            return None;
        }
        let total_weight: f64 = candidates.iter().map(|(w, _)| w).sum();
        if total_weight <= 0.0 {
            return candidates.first().map(|(_, d)| *d);
        }
        let combined_secs: f64 = candidates.iter().map(|(w, d)| w * d.as_secs_f64()).sum::<f64>() / total_weight;
        Some(Duration::from_secs_f64(combined_secs.max(0.0)))
    }

    /// 1 - coefficient_of_variation of recent instantaneous rates, clamped
    /// to [0, 1].
    pub fn confidence(&self) -> f64 {
        let samples = self.samples.read();
        if samples.len() < 3 {
            return 0.0;
        }
        let rates: Vec<f64> = samples
            .windows(2)
            .filter_map(|w| {
                let dt = w[1].at.duration_since(w[0].at).as_secs_f64();
                if dt <= 0.0 {
                    None
                } else {
                    Some((w[1].progress_percent - w[0].progress_percent) / dt)
                }
            })
            .collect();
        if rates.len() < 2 {
            return 0.0;
        }

        let mean = rates.iter().sum::<f64>() / rates.len() as f64;
        if mean.abs() < f64::EPSILON {
            return 0.0;
        }
        let variance = rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rates.len() as f64;
        let coefficient_of_variation = variance.sqrt() / mean.abs();
        (1.0 - coefficient_of_variation).clamp(0.0, 1.0)
    }

    fn record_sample_and_maybe_emit(&self, task_name: &str, is_milestone: bool) {
        let percent = self.overall_percent();
        self.samples.write().push(Sample { at: Instant::now(), progress_percent: percent });

        let kind = if is_milestone { EventKind::ProgressUpdate } else { EventKind::ProgressUpdate };
        match self.config.update_mode {
            UpdateMode::RealTime => emit_safely(&*self.sink, Event::new(kind, format!("{task_name}: {percent:.1}%"))),
            UpdateMode::OnDemand => {}
            UpdateMode::Throttled => {
                let mut last = self.last_emitted_at.lock();
                let should_emit = last.map(|t| t.elapsed() >= self.config.update_interval).unwrap_or(true);
                if should_emit {
                    *last = Some(Instant::now());
                    emit_safely(&*self.sink, Event::new(kind, format!("{task_name}: {percent:.1}%")));
                }
            }
        }
    }

    /// Forces an emission for `on_demand` mode.
    pub fn refresh(&self) {
        let percent = self.overall_percent();
        emit_safely(&*self.sink, Event::new(EventKind::ProgressUpdate, format!("refresh: {percent:.1}%")));
        if let Some(eta) = self.eta() {
            emit_safely(&*self.sink, Event::new(EventKind::EtaUpdated, format!("eta: {eta:?}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_pipeline_domain::NullSink;

    fn monitor(strategy: EtaStrategy) -> ProgressMonitor {
        ProgressMonitor::new(
            ProgressMonitorConfig { eta_strategy: strategy, update_mode: UpdateMode::RealTime, ..Default::default() },
            Arc::new(NullSink),
        )
    }

    #[test]
    fn weighted_overall_progress_matches_formula() {
        let monitor = monitor(EtaStrategy::Linear);
        monitor.register_task("a", 1.0, 10.0);
        monitor.register_task("b", 3.0, 10.0);
        monitor.set_absolute("a", 10.0);
        monitor.set_absolute("b", 0.0);
        // weight*ratio sum = 1.0*1.0 + 3.0*0.0 = 1.0; total weight = 4.0 -> 25%
        assert!((monitor.overall_percent() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn completed_task_reaches_100_percent() {
        let monitor = monitor(EtaStrategy::Linear);
        monitor.register_task("only", 1.0, 5.0);
        monitor.mark_task_completed("only");
        assert!((monitor.overall_percent() - 100.0).abs() < 1e-9);
        assert_eq!(monitor.eta(), Some(Duration::ZERO));
    }

    #[test]
    fn confidence_is_zero_with_insufficient_samples() {
        let monitor = monitor(EtaStrategy::Adaptive);
        monitor.register_task("a", 1.0, 10.0);
        assert_eq!(monitor.confidence(), 0.0);
    }
}
