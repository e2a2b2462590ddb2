// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Checkpoint creation, verification, and recovery (§4.I).
//!
//! The creation pipeline is compress -> encrypt -> hash, in that order, so
//! the stored verification hash always covers exactly the bytes that were
//! persisted to [`CheckpointStorage`] *before* compression/encryption -- the
//! canonical serialization, per §4.I -- while the persisted payload itself
//! may be compressed and/or encrypted.

use crate::checkpoint_storage::CheckpointStorage;
use crate::emit_safely;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use flate2::write::ZlibEncoder;
use flate2::read::ZlibDecoder;
use flate2::Compression;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use recon_pipeline_domain::{
    CheckpointGranularity, CheckpointMetadata, CheckpointRecord, Event, EventKind, EventSink, PipelineError,
    PipelineStateSnapshot, ResumeContext, ResumeMode,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OperationState {
    Idle,
    Running,
    Checkpointing,
    Paused,
    Recovering,
    Failed,
    Completed,
}

#[derive(Debug, Clone)]
pub enum CheckpointTrigger {
    TimeBased { interval: Duration },
    ProgressBased { threshold_percent: f64 },
    Hybrid { interval: Duration, threshold_percent: f64 },
    Manual,
    Adaptive { interval: Duration, memory_threshold_bytes: u64 },
}

#[derive(Clone)]
pub struct ResumeSystemConfig {
    pub trigger: CheckpointTrigger,
    pub compress: bool,
    pub encrypt: bool,
    pub encryption_key: Option<[u8; 32]>,
    pub verify: bool,
    pub auto_cleanup: bool,
    pub cleanup_age: Duration,
    pub max_checkpoints: usize,
}

impl Default for ResumeSystemConfig {
    fn default() -> Self {
        Self {
            trigger: CheckpointTrigger::TimeBased { interval: Duration::from_secs(60) },
            compress: true,
            encrypt: false,
            encryption_key: None,
            verify: true,
            auto_cleanup: true,
            cleanup_age: Duration::from_secs(7 * 24 * 3600),
            max_checkpoints: 10,
        }
    }
}

struct OperationTracker {
    state: OperationState,
    started_at_ms: i64,
    last_checkpoint_at: Instant,
    last_checkpoint_progress: f64,
    last_memory_estimate_bytes: u64,
}

pub struct ResumeSystem {
    storage: Arc<dyn CheckpointStorage>,
    config: ResumeSystemConfig,
    sink: Arc<dyn EventSink>,
    operations: parking_lot::RwLock<HashMap<String, OperationTracker>>,
}

impl ResumeSystem {
    pub fn new(storage: Arc<dyn CheckpointStorage>, config: ResumeSystemConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            storage,
            config,
            sink,
            operations: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn begin_operation(&self, operation_id: impl Into<String>) {
        let operation_id = operation_id.into();
        self.operations.write().insert(
            operation_id,
            OperationTracker {
                state: OperationState::Running,
                started_at_ms: chrono::Utc::now().timestamp_millis(),
                last_checkpoint_at: Instant::now(),
                last_checkpoint_progress: 0.0,
                last_memory_estimate_bytes: 0,
            },
        );
    }

    pub fn set_state(&self, operation_id: &str, state: OperationState) {
        if let Some(tracker) = self.operations.write().get_mut(operation_id) {
            tracker.state = state;
        }
    }

    /// Evaluates the configured trigger against the elapsed time and
    /// progress delta since the last checkpoint for this operation.
    pub fn should_checkpoint(&self, operation_id: &str, current_progress_percent: f64, memory_estimate_bytes: u64) -> bool {
        let operations = self.operations.read();
        let Some(tracker) = operations.get(operation_id) else { return false };
        if tracker.state != OperationState::Running {
            return false;
        }

        let elapsed = tracker.last_checkpoint_at.elapsed();
        let progress_delta = (current_progress_percent - tracker.last_checkpoint_progress).max(0.0);

        match &self.config.trigger {
            CheckpointTrigger::TimeBased { interval } => elapsed >= *interval,
            CheckpointTrigger::ProgressBased { threshold_percent } => progress_delta >= *threshold_percent,
            CheckpointTrigger::Hybrid { interval, threshold_percent } => elapsed >= *interval || progress_delta >= *threshold_percent,
            CheckpointTrigger::Manual => false,
            CheckpointTrigger::Adaptive { interval, memory_threshold_bytes } => {
                elapsed >= *interval || memory_estimate_bytes >= *memory_threshold_bytes
            }
        }
    }

    /// Generates `operation_id_<millis>_<random5>` per §4.I.
    fn generate_checkpoint_id(operation_id: &str) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let mut suffix = [0u8; 5];
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::rng();
        for byte in suffix.iter_mut() {
            *byte = ALPHABET[rng.random_range(0..ALPHABET.len())];
        }
        format!("{operation_id}_{millis}_{}", String::from_utf8_lossy(&suffix))
    }

    pub fn create_checkpoint(
        &self,
        operation_id: &str,
        stage_name: &str,
        granularity: CheckpointGranularity,
        progress_percent: f64,
        state: &PipelineStateSnapshot,
    ) -> Result<CheckpointMetadata, PipelineError> {
        self.set_state(operation_id, OperationState::Checkpointing);
        let result = self.create_checkpoint_inner(operation_id, stage_name, granularity, progress_percent, state, None);
        self.set_state(operation_id, OperationState::Running);
        if let Ok(metadata) = &result {
            if let Some(tracker) = self.operations.write().get_mut(operation_id) {
                tracker.last_checkpoint_at = Instant::now();
                tracker.last_checkpoint_progress = progress_percent;
            }
            emit_safely(
                &*self.sink,
                Event::new(EventKind::CheckpointCreated, format!("checkpoint '{}' created", metadata.checkpoint_id))
                    .with_metadata("operation_id", operation_id),
            );
            if self.config.auto_cleanup {
                self.cleanup(operation_id)?;
            }
        }
        result
    }

    /// Creates a checkpoint regardless of trigger state, recording `reason`.
    pub fn force_checkpoint(
        &self,
        operation_id: &str,
        stage_name: &str,
        progress_percent: f64,
        state: &PipelineStateSnapshot,
        reason: &str,
    ) -> Result<CheckpointMetadata, PipelineError> {
        let is_running = self
            .operations
            .read()
            .get(operation_id)
            .map(|t| t.state == OperationState::Running)
            .unwrap_or(false);
        if !is_running {
            return Err(PipelineError::ConfigurationError(format!(
                "cannot force a checkpoint for operation '{operation_id}' that is not running"
            )));
        }
        self.create_checkpoint_inner(operation_id, stage_name, CheckpointGranularity::Coarse, progress_percent, state, Some(reason))
    }

    fn create_checkpoint_inner(
        &self,
        operation_id: &str,
        stage_name: &str,
        granularity: CheckpointGranularity,
        progress_percent: f64,
        state: &PipelineStateSnapshot,
        force_reason: Option<&str>,
    ) -> Result<CheckpointMetadata, PipelineError> {
        let checkpoint_id = Self::generate_checkpoint_id(operation_id);
        let canonical = serde_json::to_vec(state)?;

        let verification_hash = if self.config.verify {
            Some(hex_digest(&canonical))
        } else {
            None
        };

        let mut payload = canonical.clone();
        if self.config.compress {
            payload = deflate(&payload)?;
        }
        if self.config.encrypt {
            let key = self
                .config
                .encryption_key
                .ok_or_else(|| PipelineError::ConfigurationError("encryption enabled without an encryption_key".to_string()))?;
            payload = encrypt(&key, &payload)?;
        }

        let mut custom = HashMap::new();
        if let Some(reason) = force_reason {
            custom.insert("force_reason".to_string(), reason.to_string());
        }

        let metadata = CheckpointMetadata {
            checkpoint_id: checkpoint_id.clone(),
            operation_id: operation_id.to_string(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            stage_name: stage_name.to_string(),
            granularity,
            progress_percent,
            elapsed_ms: self
                .operations
                .read()
                .get(operation_id)
                .map(|t| (chrono::Utc::now().timestamp_millis() - t.started_at_ms).max(0) as u64)
                .unwrap_or(0),
            memory_estimate_bytes: payload.len() as u64,
            verification_enabled: self.config.verify,
            verification_hash,
            custom,
        };

        let record = CheckpointRecord {
            metadata: metadata.clone(),
            pipeline_state: if self.config.compress || self.config.encrypt { None } else { Some(state.clone()) },
            binary_data: if self.config.compress || self.config.encrypt { Some(payload) } else { None },
        };

        self.storage.save(&checkpoint_id, &record)?;
        Ok(metadata)
    }

    /// Recomputes the digest over the stored canonical serialization and
    /// compares it to the stored hash.
    pub fn verify(&self, checkpoint_id: &str) -> Result<bool, PipelineError> {
        let record = self.storage.load(checkpoint_id)?;
        let Some(expected) = &record.metadata.verification_hash else { return Ok(true) };
        let canonical = self.canonical_bytes(&record)?;
        Ok(&hex_digest(&canonical) == expected)
    }

    fn canonical_bytes(&self, record: &CheckpointRecord) -> Result<Vec<u8>, PipelineError> {
        if let Some(state) = &record.pipeline_state {
            return Ok(serde_json::to_vec(state)?);
        }
        let mut payload = record
            .binary_data
            .clone()
            .ok_or_else(|| PipelineError::StorageError("checkpoint has neither pipeline_state nor binary_data".to_string()))?;
        if self.config.encrypt {
            let key = self
                .config
                .encryption_key
                .ok_or_else(|| PipelineError::ConfigurationError("encryption enabled without an encryption_key".to_string()))?;
            payload = decrypt(&key, &payload)?;
        }
        if self.config.compress {
            payload = inflate(&payload)?;
        }
        Ok(payload)
    }

    pub fn can_resume(&self, operation_id: &str) -> Result<bool, PipelineError> {
        Ok(!self.storage.list(Some(operation_id))?.is_empty())
    }

    /// Lists checkpoint ids for `operation_id`, oldest first (checkpoint ids
    /// embed a millisecond timestamp, so lexical order is chronological).
    pub fn list_checkpoints(&self, operation_id: &str) -> Result<Vec<String>, PipelineError> {
        let mut ids = self.storage.list(Some(operation_id))?;
        ids.sort();
        Ok(ids)
    }

    pub fn resume_from(&self, checkpoint_id: &str, mode: ResumeMode, reason: impl Into<String>) -> Result<ResumeContext, PipelineError> {
        let record = self.storage.load(checkpoint_id)?;
        if record.metadata.verification_enabled && !self.verify(checkpoint_id)? {
            return Err(PipelineError::VerificationError(format!("checkpoint '{checkpoint_id}' failed verification")));
        }

        let canonical = self.canonical_bytes(&record)?;
        let state: PipelineStateSnapshot = serde_json::from_slice(&canonical)?;

        let tracker_started = self
            .operations
            .read()
            .get(&record.metadata.operation_id)
            .map(|t| t.started_at_ms)
            .unwrap_or(record.metadata.created_at_ms);

        let context = ResumeContext {
            operation_id: record.metadata.operation_id.clone(),
            completed_stages: state.completed_stages,
            pending_stages: state.pending_stages,
            stage_results: state.stage_results,
            original_start_ms: tracker_started,
            resume_time_ms: chrono::Utc::now().timestamp_millis(),
            mode,
            reason: reason.into(),
        };

        emit_safely(
            &*self.sink,
            Event::new(EventKind::RecoveryAttempted, format!("resumed from checkpoint '{checkpoint_id}'"))
                .with_metadata("operation_id", context.operation_id.clone()),
        );
        Ok(context)
    }

    /// Picks the checkpoint maximizing progress (ties broken by recency) and
    /// resumes in [`ResumeMode::Best`].
    pub fn resume_automatically(&self, operation_id: &str) -> Result<ResumeContext, PipelineError> {
        let ids = self.storage.list(Some(operation_id))?;
        if ids.is_empty() {
            return Err(PipelineError::NotFound(format!("no checkpoints found for operation '{operation_id}'")));
        }

        let mut best: Option<(String, f64, i64)> = None;
        for id in ids {
            let metadata = self.storage.get_metadata(&id)?;
            let candidate = (id, metadata.progress_percent, metadata.created_at_ms);
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.1 > current.1 || (candidate.1 == current.1 && candidate.2 > current.2) {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }

        let (checkpoint_id, _, _) = best.expect("non-empty checkpoint list always yields a best candidate");
        self.resume_from(&checkpoint_id, ResumeMode::Best, "automatic recovery selected the highest-progress checkpoint")
    }

    /// Among every operation id found in storage, returns those not present
    /// in `running_operation_ids`.
    pub fn crashed_operations(&self, running_operation_ids: &std::collections::HashSet<String>) -> Result<Vec<String>, PipelineError> {
        let all_ids = self.storage.list(None)?;
        let mut operation_ids: std::collections::HashSet<String> = all_ids
            .iter()
            .filter_map(|id| id.rsplit_once('_').and_then(|(rest, _)| rest.rsplit_once('_')).map(|(op, _)| op.to_string()))
            .collect();
        operation_ids.retain(|id| !running_operation_ids.contains(id));
        let mut crashed: Vec<String> = operation_ids.into_iter().collect();
        crashed.sort();
        Ok(crashed)
    }

    fn cleanup(&self, operation_id: &str) -> Result<(), PipelineError> {
        let ids = self.storage.list(Some(operation_id))?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cleanup_age_ms = self.config.cleanup_age.as_millis() as i64;

        let mut kept = 0usize;
        for id in ids {
            let metadata = self.storage.get_metadata(&id)?;
            let too_old = now_ms - metadata.created_at_ms > cleanup_age_ms;
            let over_capacity = kept >= self.config.max_checkpoints;
            if too_old || over_capacity {
                self.storage.delete(&id)?;
            } else {
                kept += 1;
            }
        }
        Ok(())
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| PipelineError::VerificationError(format!("checkpoint encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(key: &[u8; 32], payload: &[u8]) -> Result<Vec<u8>, PipelineError> {
    if payload.len() < NONCE_LEN {
        return Err(PipelineError::VerificationError("checkpoint payload too short to contain a nonce".to_string()));
    }
    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| PipelineError::VerificationError(format!("checkpoint decryption failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint_storage::InMemoryCheckpointStorage;
    use recon_pipeline_domain::{NullSink, StageId};

    fn system(config: ResumeSystemConfig) -> ResumeSystem {
        ResumeSystem::new(Arc::new(InMemoryCheckpointStorage::new()), config, Arc::new(NullSink))
    }

    #[test]
    fn create_then_verify_round_trips_uncompressed() {
        let sys = system(ResumeSystemConfig { compress: false, encrypt: false, ..Default::default() });
        sys.begin_operation("op1");
        let state = PipelineStateSnapshot::default();
        let metadata = sys.create_checkpoint("op1", "subhunter", CheckpointGranularity::Medium, 40.0, &state).unwrap();
        assert!(sys.verify(&metadata.checkpoint_id).unwrap());
    }

    #[test]
    fn create_then_verify_round_trips_compressed_and_encrypted() {
        let sys = system(ResumeSystemConfig {
            compress: true,
            encrypt: true,
            encryption_key: Some([7u8; 32]),
            ..Default::default()
        });
        sys.begin_operation("op1");
        let state = PipelineStateSnapshot::default();
        let metadata = sys.create_checkpoint("op1", "subhunter", CheckpointGranularity::Fine, 75.0, &state).unwrap();
        assert!(sys.verify(&metadata.checkpoint_id).unwrap());

        let ctx = sys.resume_from(&metadata.checkpoint_id, ResumeMode::Full, "test").unwrap();
        assert_eq!(ctx.operation_id, "op1");
    }

    #[test]
    fn resume_automatically_prefers_highest_progress() {
        let sys = system(ResumeSystemConfig { compress: false, encrypt: false, ..Default::default() });
        sys.begin_operation("op1");
        let state = PipelineStateSnapshot::default();
        sys.create_checkpoint("op1", "a", CheckpointGranularity::Coarse, 10.0, &state).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let best = sys.create_checkpoint("op1", "b", CheckpointGranularity::Coarse, 90.0, &state).unwrap();

        let ctx = sys.resume_automatically("op1").unwrap();
        assert_eq!(ctx.mode, ResumeMode::Best);
        let _ = best;
    }

    #[test]
    fn verify_fails_after_single_byte_mutation() {
        let storage = Arc::new(InMemoryCheckpointStorage::new());
        let sys = ResumeSystem::new(storage.clone(), ResumeSystemConfig { compress: false, encrypt: false, ..Default::default() }, Arc::new(NullSink));
        sys.begin_operation("op1");
        let state = PipelineStateSnapshot::default();
        let metadata = sys.create_checkpoint("op1", "subhunter", CheckpointGranularity::Medium, 40.0, &state).unwrap();
        assert!(sys.verify(&metadata.checkpoint_id).unwrap());

        let mut record = storage.load(&metadata.checkpoint_id).unwrap();
        let mut bytes = serde_json::to_vec(record.pipeline_state.as_ref().unwrap()).unwrap();
        bytes[0] ^= 0xFF;
        record.pipeline_state = Some(serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            let mut mutated = state.clone();
            mutated.completed_stages.push(StageId::new("mutated").unwrap());
            mutated
        }));
        storage.save(&metadata.checkpoint_id, &record).unwrap();

        assert!(!sys.verify(&metadata.checkpoint_id).unwrap());
    }

    #[test]
    fn time_based_trigger_fires_after_interval() {
        let sys = system(ResumeSystemConfig {
            trigger: CheckpointTrigger::TimeBased { interval: Duration::from_millis(1) },
            ..Default::default()
        });
        sys.begin_operation("op1");
        std::thread::sleep(Duration::from_millis(5));
        assert!(sys.should_checkpoint("op1", 0.0, 0));
    }
}
