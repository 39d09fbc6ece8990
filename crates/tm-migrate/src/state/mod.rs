//! File-based run snapshots for resume capability.
//!
//! A snapshot captures everything needed to continue an interrupted run:
//! the config hash, the first unconsumed batch index and the statistics
//! so far. Persisted run state across process restarts is exactly this
//! opaque, HMAC-signed document.

use crate::error::{MigrateError, Result};
use crate::progress::{MigrationState, MigrationStatistics};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Serializable run state for resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA-256 hash of the configuration the run started with.
    pub config_hash: String,

    /// When this snapshot was taken.
    pub saved_at: DateTime<Utc>,

    /// Run state at snapshot time.
    pub state: MigrationState,

    /// First batch index not yet fully processed, per artifact type.
    /// Resume re-dispatches from here; a batch interrupted mid-way is
    /// re-run in full.
    #[serde(default)]
    pub resume_batches: BTreeMap<String, usize>,

    /// Statistics accumulated so far.
    pub statistics: MigrationStatistics,

    /// HMAC-SHA256 signature for integrity validation, computed over the
    /// serialized snapshot (excluding this field) keyed by `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

impl RunSnapshot {
    /// Create a snapshot of a running migration.
    pub fn new(
        run_id: impl Into<String>,
        config_hash: impl Into<String>,
        state: MigrationState,
        resume_batches: BTreeMap<String, usize>,
        statistics: MigrationStatistics,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            config_hash: config_hash.into(),
            saved_at: Utc::now(),
            state,
            resume_batches,
            statistics,
            hmac: None, // computed on save
        }
    }

    /// Resume point for one artifact type (0 if never snapshotted).
    pub fn resume_index(&self, artifact_type: &str) -> usize {
        self.resume_batches.get(artifact_type).copied().unwrap_or(0)
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned)?;
        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::Snapshot(format!("failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load a snapshot, validating its HMAC signature when present.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&content)?;

        if let Some(stored) = &snapshot.hmac {
            let expected = snapshot.compute_hmac()?;
            if stored != &expected {
                return Err(MigrateError::Snapshot(
                    "snapshot integrity check failed: HMAC mismatch".to_string(),
                ));
            }
        } else {
            tracing::warn!("snapshot has no HMAC signature, integrity cannot be verified");
        }

        Ok(snapshot)
    }

    /// Save the snapshot (atomic write: temp file, then rename).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        self.hmac = Some(self.compute_hmac()?);
        let content = serde_json::to_string_pretty(self)?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }
}

/// Tracks completed batch indices to provide a safe resume point.
///
/// Batches complete out of order across workers. The watermark reports
/// the contiguous completed prefix; resuming there re-processes any batch
/// that finished ahead of a gap, which is safe because target writes are
/// idempotent upserts, while skipping nothing.
#[derive(Debug, Default)]
pub struct BatchWatermark {
    next: usize,
    done: BTreeSet<usize>,
}

impl BatchWatermark {
    /// Create a watermark starting at batch 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a resume point: everything before `index` is complete.
    pub fn starting_at(index: usize) -> Self {
        Self {
            next: index,
            done: BTreeSet::new(),
        }
    }

    /// Record one fully processed batch.
    pub fn mark_completed(&mut self, index: usize) {
        self.done.insert(index);
        while self.done.remove(&self.next) {
            self.next += 1;
        }
    }

    /// First batch index not covered by the contiguous completed prefix.
    pub fn resume_index(&self) -> usize {
        self.next
    }
}
