// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Auto-scaling priority thread pool (§4.A).
//!
//! Tasks are ordered by [`TaskPriority`] and, within a priority, by arrival
//! order. A background scaling thread samples load every tick and grows or
//! shrinks the worker count within `[min_threads, max_threads]`.

use parking_lot::{Condvar, Mutex};
use recon_pipeline_domain::PipelineError;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThreadPoolConfig {
    pub initial_threads: usize,
    pub max_threads: usize,
    pub min_threads: usize,
    pub max_queue_size: usize,
    pub idle_timeout: Duration,
    pub enable_auto_scaling: bool,
    pub scaling_tick: Duration,
    pub default_task_timeout: Duration,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            initial_threads: cores,
            max_threads: cores * 2,
            min_threads: 1,
            max_queue_size: 1000,
            idle_timeout: Duration::from_secs(60),
            enable_auto_scaling: true,
            scaling_tick: Duration::from_secs(5),
            default_task_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPoolStats {
    pub active_threads: usize,
    pub total_threads: usize,
    pub pending_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub peak_queue_size: usize,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Task {
    seq: u64,
    priority: TaskPriority,
    name: String,
    created_at: Instant,
    job: Job,
}

impl Eq for Task {}
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; within a priority, earlier `seq` (lower) wins,
        // so this is reversed to make BinaryHeap (a max-heap) behave as FIFO.
        self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Shared {
    queue: Mutex<BinaryHeap<Task>>,
    not_empty: Condvar,
    next_seq: AtomicU64,
    active_threads: AtomicUsize,
    total_threads: AtomicUsize,
    target_threads: AtomicUsize,
    completed_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    peak_queue_size: AtomicUsize,
    shutdown_requested: AtomicBool,
    force_shutdown: AtomicBool,
    paused: AtomicBool,
    config: Mutex<ThreadPoolConfig>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// A priority-ordered, auto-scaling worker pool.
pub struct ThreadPool {
    shared: Arc<Shared>,
    scaler: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadPool {
    pub fn new(config: ThreadPoolConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            next_seq: AtomicU64::new(0),
            active_threads: AtomicUsize::new(0),
            total_threads: AtomicUsize::new(0),
            target_threads: AtomicUsize::new(config.initial_threads.max(1)),
            completed_tasks: AtomicU64::new(0),
            failed_tasks: AtomicU64::new(0),
            peak_queue_size: AtomicUsize::new(0),
            shutdown_requested: AtomicBool::new(false),
            force_shutdown: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            config: Mutex::new(config),
            workers: Mutex::new(Vec::new()),
        });

        {
            let mut workers = shared.workers.lock();
            for id in 0..config.initial_threads.max(1) {
                workers.push(spawn_worker(Arc::clone(&shared), id));
            }
        }

        let scaler = if config.enable_auto_scaling {
            Some(spawn_scaler(Arc::clone(&shared)))
        } else {
            None
        };

        Self {
            shared,
            scaler: Mutex::new(scaler),
        }
    }

    pub fn submit(
        &self,
        name: impl Into<String>,
        priority: TaskPriority,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<(), PipelineError> {
        if self.shared.shutdown_requested.load(AtomicOrdering::Acquire) {
            return Err(PipelineError::ShuttingDown("thread pool is shutting down".into()));
        }

        let mut queue = self.shared.queue.lock();
        let max_queue_size = self.shared.config.lock().max_queue_size;
        if queue.len() >= max_queue_size {
            return Err(PipelineError::QueueFull(format!(
                "thread pool queue is full ({} tasks)",
                max_queue_size
            )));
        }

        let seq = self.shared.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        queue.push(Task {
            seq,
            priority,
            name: name.into(),
            created_at: Instant::now(),
            job: Box::new(job),
        });
        let len = queue.len();
        drop(queue);

        self.shared
            .peak_queue_size
            .fetch_max(len, AtomicOrdering::Relaxed);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, AtomicOrdering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, AtomicOrdering::Release);
        self.shared.not_empty.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(AtomicOrdering::Acquire)
    }

    pub fn stats(&self) -> ThreadPoolStats {
        ThreadPoolStats {
            active_threads: self.shared.active_threads.load(AtomicOrdering::Relaxed),
            total_threads: self.shared.total_threads.load(AtomicOrdering::Relaxed),
            pending_tasks: self.shared.queue.lock().len(),
            completed_tasks: self.shared.completed_tasks.load(AtomicOrdering::Relaxed),
            failed_tasks: self.shared.failed_tasks.load(AtomicOrdering::Relaxed),
            peak_queue_size: self.shared.peak_queue_size.load(AtomicOrdering::Relaxed),
        }
    }

    /// Waits, polling, until the queue has drained and no task is active.
    pub fn wait_for_all(&self, poll_interval: Duration) {
        loop {
            let idle = self.shared.queue.lock().is_empty()
                && self.shared.active_threads.load(AtomicOrdering::Acquire) == 0;
            if idle {
                return;
            }
            thread::sleep(poll_interval);
        }
    }

    /// Graceful shutdown: stop accepting new work, let queued tasks drain.
    pub fn shutdown(&self) {
        self.shared.shutdown_requested.store(true, AtomicOrdering::Release);
        self.shared.not_empty.notify_all();
        self.join_all();
    }

    /// Forced shutdown: drop queued tasks immediately, workers exit at once.
    pub fn force_shutdown(&self) {
        self.shared.shutdown_requested.store(true, AtomicOrdering::Release);
        self.shared.force_shutdown.store(true, AtomicOrdering::Release);
        self.shared.queue.lock().clear();
        self.shared.not_empty.notify_all();
        self.join_all();
    }

    fn join_all(&self) {
        if let Some(handle) = self.scaler.lock().take() {
            let _ = handle.join();
        }
        let mut workers = self.shared.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.shared.shutdown_requested.load(AtomicOrdering::Acquire) {
            self.force_shutdown();
        }
    }
}

fn spawn_worker(shared: Arc<Shared>, id: usize) -> JoinHandle<()> {
    shared.total_threads.fetch_add(1, AtomicOrdering::Relaxed);
    thread::Builder::new()
        .name(format!("recon-pool-{id}"))
        .spawn(move || worker_loop(shared))
        .expect("failed to spawn pool worker thread")
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        if shared.force_shutdown.load(AtomicOrdering::Acquire) {
            break;
        }
        if shared.total_threads.load(AtomicOrdering::Relaxed) > shared.target_threads.load(AtomicOrdering::Relaxed)
        {
            shared.total_threads.fetch_sub(1, AtomicOrdering::Relaxed);
            return;
        }

        let idle_timeout = shared.config.lock().idle_timeout;
        let mut queue = shared.queue.lock();
        while queue.is_empty()
            && !shared.shutdown_requested.load(AtomicOrdering::Acquire)
            && !shared.force_shutdown.load(AtomicOrdering::Acquire)
        {
            let timed_out = shared.not_empty.wait_for(&mut queue, idle_timeout).timed_out();
            if timed_out {
                break;
            }
        }

        if queue.is_empty() {
            drop(queue);
            if shared.shutdown_requested.load(AtomicOrdering::Acquire)
                || shared.force_shutdown.load(AtomicOrdering::Acquire)
            {
                return;
            }
            continue;
        }

        if shared.paused.load(AtomicOrdering::Acquire) {
            drop(queue);
            thread::sleep(Duration::from_millis(25));
            continue;
        }

        let task = queue.pop();
        drop(queue);

        if let Some(task) = task {
            shared.active_threads.fetch_add(1, AtomicOrdering::Relaxed);
            let name = task.name.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task.job));
            shared.active_threads.fetch_sub(1, AtomicOrdering::Relaxed);
            match result {
                Ok(()) => {
                    shared.completed_tasks.fetch_add(1, AtomicOrdering::Relaxed);
                }
                Err(_) => {
                    shared.failed_tasks.fetch_add(1, AtomicOrdering::Relaxed);
                    tracing::warn!(task = %name, "thread pool task panicked");
                }
            }
        }
    }
}

fn spawn_scaler(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("recon-pool-scaler".into())
        .spawn(move || loop {
            if shared.shutdown_requested.load(AtomicOrdering::Acquire) {
                return;
            }
            let tick = shared.config.lock().scaling_tick;
            thread::sleep(tick);
            if shared.shutdown_requested.load(AtomicOrdering::Acquire) {
                return;
            }

            let (min_threads, max_threads) = {
                let cfg = shared.config.lock();
                (cfg.min_threads.max(1), cfg.max_threads.max(cfg.min_threads.max(1)))
            };
            let total = shared.total_threads.load(AtomicOrdering::Relaxed).max(1);
            let active = shared.active_threads.load(AtomicOrdering::Relaxed);
            let pending = shared.queue.lock().len();
            let load = (active as f64 / total as f64).max(pending as f64 / (2.0 * total as f64));

            if load > 0.8 && total < max_threads {
                let add = 2.min(max_threads - total);
                let mut workers = shared.workers.lock();
                for i in 0..add {
                    workers.push(spawn_worker(Arc::clone(&shared), total + i));
                }
                drop(workers);
                shared
                    .target_threads
                    .store((total + add).min(max_threads), AtomicOrdering::Relaxed);
            } else if load < 0.2 && total > min_threads {
                let reduce = total - min_threads;
                shared
                    .target_threads
                    .store((total - reduce.min(total - min_threads)).max(min_threads), AtomicOrdering::Relaxed);
                shared.not_empty.notify_all();
            }
        })
        .expect("failed to spawn pool scaler thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn submitted_tasks_all_run() {
        let pool = ThreadPool::new(ThreadPoolConfig {
            initial_threads: 2,
            enable_auto_scaling: false,
            ..Default::default()
        });
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            pool.submit("incr", TaskPriority::Normal, move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();
        }
        pool.wait_for_all(Duration::from_millis(10));
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 20);
        assert_eq!(pool.stats().completed_tasks, 20);
    }

    #[test]
    fn queue_full_is_rejected() {
        let pool = ThreadPool::new(ThreadPoolConfig {
            initial_threads: 1,
            max_queue_size: 1,
            enable_auto_scaling: false,
            ..Default::default()
        });
        pool.pause();
        pool.submit("a", TaskPriority::Normal, || {}).unwrap();
        let err = pool.submit("b", TaskPriority::Normal, || {}).unwrap_err();
        assert!(matches!(err, PipelineError::QueueFull(_)));
        pool.resume();
        pool.force_shutdown();
    }

    #[test]
    fn shutdown_drains_then_stops_accepting() {
        let pool = ThreadPool::new(ThreadPoolConfig {
            initial_threads: 1,
            enable_auto_scaling: false,
            ..Default::default()
        });
        pool.submit("a", TaskPriority::Normal, || {}).unwrap();
        pool.shutdown();
        let err = pool.submit("b", TaskPriority::Normal, || {}).unwrap_err();
        assert!(matches!(err, PipelineError::ShuttingDown(_)));
    }
}
