//! Durable journal: every suspension point is preceded by an atomic write of
//! the workflow's current state, checksummed so a corrupted write is
//! detected rather than silently replayed (SPEC_FULL.md §4.1.1, §5).

use crate::state::WorkflowInstance;
use feedback_errors::OrchestratorError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub struct JournalManager {
    base_dir: PathBuf,
}

impl JournalManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn state_path(&self, workflow_id: &str) -> PathBuf {
        self.base_dir.join(format!("{workflow_id}.json"))
    }

    fn checksum_path(&self, workflow_id: &str) -> PathBuf {
        self.base_dir.join(format!("{workflow_id}.checksum"))
    }

    fn compute_checksum(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Persists `instance`, overwriting its prior entry. Writes to a
    /// temporary file and renames into place so a crash mid-write never
    /// leaves a partially-written state file behind.
    pub fn save(&self, instance: &WorkflowInstance) -> Result<(), OrchestratorError> {
        std::fs::create_dir_all(&self.base_dir)?;
        let serialized = serde_json::to_vec_pretty(instance).map_err(|e| {
            OrchestratorError::CheckpointCorrupted {
                workflow_id: instance.workflow_id.clone(),
                reason: e.to_string(),
            }
        })?;
        let checksum = Self::compute_checksum(&serialized);

        let state_path = self.state_path(&instance.workflow_id);
        let checksum_path = self.checksum_path(&instance.workflow_id);
        write_atomic(&state_path, &serialized)?;
        write_atomic(&checksum_path, checksum.as_bytes())?;
        Ok(())
    }

    /// Loads the journaled state for `workflow_id`, returning `None` if no
    /// entry exists, and an `Internal invariant violation`-classed error if
    /// the checksum does not match.
    pub fn load(&self, workflow_id: &str) -> Result<Option<WorkflowInstance>, OrchestratorError> {
        let state_path = self.state_path(workflow_id);
        if !state_path.exists() {
            return Ok(None);
        }
        let serialized = std::fs::read(&state_path)?;
        let expected = std::fs::read_to_string(self.checksum_path(workflow_id))?;
        let expected = expected.trim();
        let actual = Self::compute_checksum(&serialized);
        if actual != expected {
            return Err(OrchestratorError::ChecksumMismatch {
                workflow_id: workflow_id.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
        let instance = serde_json::from_slice(&serialized).map_err(|e| {
            OrchestratorError::CheckpointCorrupted {
                workflow_id: workflow_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Some(instance))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)
}
