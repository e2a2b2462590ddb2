// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Checkpoint persistence (§4.H). A storage-wide mutex serializes every
//! operation; the filesystem backend creates its directory on first save and
//! derives filenames from the checkpoint id with a fixed `.checkpoint`
//! suffix, as the resume system (§4.I) expects.

use recon_pipeline_domain::{CheckpointMetadata, CheckpointRecord, PipelineError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const CHECKPOINT_SUFFIX: &str = ".checkpoint";

pub trait CheckpointStorage: Send + Sync {
    fn save(&self, id: &str, record: &CheckpointRecord) -> Result<(), PipelineError>;
    fn load(&self, id: &str) -> Result<CheckpointRecord, PipelineError>;
    fn list(&self, operation_id: Option<&str>) -> Result<Vec<String>, PipelineError>;
    fn delete(&self, id: &str) -> Result<(), PipelineError>;
    fn get_metadata(&self, id: &str) -> Result<CheckpointMetadata, PipelineError>;
}

/// Durable, file-backed checkpoint storage under a configured directory.
pub struct FileCheckpointStorage {
    directory: PathBuf,
    lock: parking_lot::Mutex<()>,
}

impl FileCheckpointStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            lock: parking_lot::Mutex::new(()),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{id}{CHECKPOINT_SUFFIX}"))
    }

    fn ensure_directory(&self) -> Result<(), PipelineError> {
        if !self.directory.exists() {
            fs::create_dir_all(&self.directory)?;
        }
        Ok(())
    }
}

impl CheckpointStorage for FileCheckpointStorage {
    fn save(&self, id: &str, record: &CheckpointRecord) -> Result<(), PipelineError> {
        let _guard = self.lock.lock();
        self.ensure_directory()?;
        let bytes = serde_json::to_vec(record)?;
        fs::write(self.path_for(id), bytes)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<CheckpointRecord, PipelineError> {
        let _guard = self.lock.lock();
        let path = self.path_for(id);
        if !path.exists() {
            return Err(PipelineError::NotFound(format!("checkpoint '{id}' not found")));
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn list(&self, operation_id: Option<&str>) -> Result<Vec<String>, PipelineError> {
        let _guard = self.lock.lock();
        if !self.directory.exists() {
            return Ok(Vec::new());
        }

        let mut entries: Vec<(String, i64)> = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            let Some(id) = checkpoint_id_from_path(&path) else { continue };
            if let Some(prefix) = operation_id {
                if !id.starts_with(&format!("{prefix}_")) {
                    continue;
                }
            }
            let bytes = fs::read(&path)?;
            let record: CheckpointRecord = serde_json::from_slice(&bytes)?;
            entries.push((id, record.metadata.created_at_ms));
        }

        entries.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(entries.into_iter().map(|(id, _)| id).collect())
    }

    fn delete(&self, id: &str) -> Result<(), PipelineError> {
        let _guard = self.lock.lock();
        let path = self.path_for(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn get_metadata(&self, id: &str) -> Result<CheckpointMetadata, PipelineError> {
        Ok(self.load(id)?.metadata)
    }
}

/// In-memory storage for tests and short-lived dry runs.
#[derive(Default)]
pub struct InMemoryCheckpointStorage {
    records: parking_lot::Mutex<HashMap<String, CheckpointRecord>>,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStorage for InMemoryCheckpointStorage {
    fn save(&self, id: &str, record: &CheckpointRecord) -> Result<(), PipelineError> {
        self.records.lock().insert(id.to_string(), record.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<CheckpointRecord, PipelineError> {
        self.records
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("checkpoint '{id}' not found")))
    }

    fn list(&self, operation_id: Option<&str>) -> Result<Vec<String>, PipelineError> {
        let records = self.records.lock();
        let mut entries: Vec<(String, i64)> = records
            .iter()
            .filter(|(id, _)| operation_id.map(|prefix| id.starts_with(&format!("{prefix}_"))).unwrap_or(true))
            .map(|(id, record)| (id.clone(), record.metadata.created_at_ms))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(entries.into_iter().map(|(id, _)| id).collect())
    }

    fn delete(&self, id: &str) -> Result<(), PipelineError> {
        self.records.lock().remove(id);
        Ok(())
    }

    fn get_metadata(&self, id: &str) -> Result<CheckpointMetadata, PipelineError> {
        Ok(self.load(id)?.metadata)
    }
}

fn checkpoint_id_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(CHECKPOINT_SUFFIX).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recon_pipeline_domain::CheckpointGranularity;

    fn sample(id: &str, operation_id: &str, created_at_ms: i64) -> CheckpointRecord {
        CheckpointRecord {
            metadata: CheckpointMetadata {
                checkpoint_id: id.to_string(),
                operation_id: operation_id.to_string(),
                created_at_ms,
                stage_name: "subhunter".to_string(),
                granularity: CheckpointGranularity::Medium,
                progress_percent: 50.0,
                elapsed_ms: 1000,
                memory_estimate_bytes: 0,
                verification_enabled: false,
                verification_hash: None,
                custom: HashMap::new(),
            },
            pipeline_state: None,
            binary_data: None,
        }
    }

    #[test]
    fn file_storage_round_trips() {
        let dir = std::env::temp_dir().join(format!("recon-pipeline-test-{}", ulid::Ulid::new()));
        let storage = FileCheckpointStorage::new(&dir);
        storage.save("op_1_5", &sample("op_1_5", "op", 1)).unwrap();
        let loaded = storage.load("op_1_5").unwrap();
        assert_eq!(loaded.metadata.operation_id, "op");
        storage.delete("op_1_5").unwrap();
        assert!(storage.load("op_1_5").is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn list_sorts_by_timestamp_descending() {
        let storage = InMemoryCheckpointStorage::new();
        storage.save("op_1_1", &sample("op_1_1", "op", 1)).unwrap();
        storage.save("op_2_2", &sample("op_2_2", "op", 2)).unwrap();
        let listed = storage.list(Some("op")).unwrap();
        assert_eq!(listed, vec!["op_2_2".to_string(), "op_1_1".to_string()]);
    }

    #[test]
    fn missing_checkpoint_is_not_found() {
        let storage = InMemoryCheckpointStorage::new();
        assert!(matches!(storage.load("nope"), Err(PipelineError::NotFound(_))));
    }
}
