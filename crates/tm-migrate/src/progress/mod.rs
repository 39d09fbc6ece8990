//! Live progress tracking and statistics aggregation.
//!
//! The tracker owns the only mutable state shared across workers. All
//! updates go through one mutex-guarded entry point; workers never
//! read-modify-write counters directly, so no outcome is lost under
//! concurrent reporting. Observers poll [`ProgressTracker::snapshot`] or
//! subscribe to the `watch` channel; both are read-only outputs.

mod journal;

pub use journal::{LogEntry, LogLevel, RunJournal};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{MigrateError, Result};
use crate::provider::ArtifactType;

/// Window for the moving average behind the remaining-time estimate.
const ETA_WINDOW: usize = 32;

/// Run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationState {
    /// Terminal states are final; no transitions out.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Completed | MigrationState::Failed | MigrationState::Cancelled
        )
    }

    fn can_transition_to(&self, to: MigrationState) -> bool {
        use MigrationState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Cancelled)
        )
    }
}

/// Per-artifact-type counters.
///
/// `total == migrated + failed + pending` holds at every observation
/// point; skipped artifacts count as migrated here and are totalled
/// separately on [`MigrationStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStatistics {
    pub total: u64,
    pub migrated: u64,
    pub failed: u64,
    pub pending: u64,
}

/// Aggregated statistics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatistics {
    /// Per-type counters, keyed by artifact type id.
    pub entities: BTreeMap<String, EntityStatistics>,
    /// Artifacts skipped (already present or unchanged on the target).
    pub skipped: u64,
    /// Moving average per-item processing time, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_item_millis: Option<u64>,
}

/// The outcome a worker reports for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Migrated,
    Failed,
    Skipped,
}

/// Live status of one run. Owned by the tracker; read-only elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatus {
    /// Run identifier.
    pub id: String,
    /// Lifecycle state.
    pub state: MigrationState,
    /// Completion fraction in `[0, 1]`.
    pub progress: f64,
    /// When the run left `pending`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Artifacts in scope (may grow while ids are still being discovered).
    pub total_items: u64,
    /// Artifacts with a recorded outcome.
    pub processed_items: u64,
    /// Artifacts that failed.
    pub failed_items: u64,
    /// Estimated seconds to completion, from the moving average.
    pub estimated_remaining_secs: Option<u64>,
}

impl MigrationStatus {
    fn new(run_id: String) -> Self {
        Self {
            id: run_id,
            state: MigrationState::Pending,
            progress: 0.0,
            started_at: None,
            ended_at: None,
            total_items: 0,
            processed_items: 0,
            failed_items: 0,
            estimated_remaining_secs: None,
        }
    }
}

struct Inner {
    status: MigrationStatus,
    entities: BTreeMap<String, EntityStatistics>,
    skipped: u64,
    recent: VecDeque<Duration>,
}

/// Serialized aggregation point for all per-artifact outcomes.
pub struct ProgressTracker {
    inner: Mutex<Inner>,
    status_tx: watch::Sender<MigrationStatus>,
}

impl ProgressTracker {
    /// Create a tracker for a new run in `pending` state.
    pub fn new(run_id: impl Into<String>) -> Self {
        let status = MigrationStatus::new(run_id.into());
        let (status_tx, _) = watch::channel(status.clone());
        Self {
            inner: Mutex::new(Inner {
                status,
                entities: BTreeMap::new(),
                skipped: 0,
                recent: VecDeque::with_capacity(ETA_WINDOW),
            }),
            status_tx,
        }
    }

    /// Push-subscription for observers (UI, reporting).
    pub fn subscribe(&self) -> watch::Receiver<MigrationStatus> {
        self.status_tx.subscribe()
    }

    /// Current status, for polling.
    pub fn snapshot(&self) -> MigrationStatus {
        self.lock().status.clone()
    }

    /// Current statistics.
    pub fn statistics(&self) -> MigrationStatistics {
        let inner = self.lock();
        MigrationStatistics {
            entities: inner.entities.clone(),
            skipped: inner.skipped,
            avg_item_millis: average(&inner.recent).map(|d| d.as_millis() as u64),
        }
    }

    /// Restore statistics from a snapshot (resume).
    pub fn restore_statistics(&self, stats: &MigrationStatistics) {
        let mut inner = self.lock();
        inner.entities = stats.entities.clone();
        inner.skipped = stats.skipped;
        let processed: u64 = inner.entities.values().map(|e| e.migrated + e.failed).sum();
        let failed: u64 = inner.entities.values().map(|e| e.failed).sum();
        inner.status.processed_items = processed;
        inner.status.failed_items = failed;
        recompute(&mut inner);
        self.publish(&inner);
    }

    /// Move the run to a new state, enforcing the lifecycle graph.
    pub fn transition(&self, to: MigrationState) -> Result<()> {
        let mut inner = self.lock();
        let from = inner.status.state;
        if !from.can_transition_to(to) {
            return Err(MigrateError::fatal(format!(
                "illegal state transition {:?} -> {:?}",
                from, to
            )));
        }
        inner.status.state = to;
        if to == MigrationState::Running && inner.status.started_at.is_none() {
            inner.status.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            inner.status.ended_at = Some(Utc::now());
            inner.status.estimated_remaining_secs = None;
        }
        self.publish(&inner);
        Ok(())
    }

    /// Seed the expected artifact count for one type (provider `count`).
    pub fn set_expected(&self, artifact_type: ArtifactType, total: u64) {
        let mut inner = self.lock();
        let entry = inner
            .entities
            .entry(artifact_type.as_str().to_string())
            .or_default();
        entry.total += total;
        entry.pending += total;
        recompute(&mut inner);
        self.publish(&inner);
    }

    /// Refine the total as ids are discovered (provider `count` was `None`).
    pub fn add_discovered(&self, artifact_type: ArtifactType, count: u64) {
        self.set_expected(artifact_type, count);
    }

    /// Record one artifact outcome. Thread-safe; recomputes statistics,
    /// progress and the remaining-time estimate atomically.
    pub fn record_outcome(
        &self,
        artifact_type: ArtifactType,
        outcome: Outcome,
        duration: Option<Duration>,
    ) {
        let mut inner = self.lock();
        let entry = inner
            .entities
            .entry(artifact_type.as_str().to_string())
            .or_default();

        // An outcome for an item the totals never announced still counts.
        if entry.pending == 0 {
            entry.total += 1;
        } else {
            entry.pending -= 1;
        }
        match outcome {
            Outcome::Migrated => entry.migrated += 1,
            Outcome::Skipped => entry.migrated += 1,
            Outcome::Failed => entry.failed += 1,
        }
        if outcome == Outcome::Skipped {
            inner.skipped += 1;
        }
        if outcome == Outcome::Failed {
            inner.status.failed_items += 1;
        }
        inner.status.processed_items += 1;

        if let Some(d) = duration {
            if inner.recent.len() == ETA_WINDOW {
                inner.recent.pop_front();
            }
            inner.recent.push_back(d);
        }

        recompute(&mut inner);
        self.publish(&inner);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        self.status_tx.send_replace(inner.status.clone());
    }
}

fn recompute(inner: &mut Inner) {
    let total: u64 = inner.entities.values().map(|e| e.total).sum();
    inner.status.total_items = total;
    inner.status.progress = if total == 0 {
        0.0
    } else {
        (inner.status.processed_items as f64 / total as f64).clamp(0.0, 1.0)
    };

    let remaining = total.saturating_sub(inner.status.processed_items);
    inner.status.estimated_remaining_secs = match (average(&inner.recent), remaining) {
        (Some(avg), r) if r > 0 => Some((avg.as_secs_f64() * r as f64).ceil() as u64),
        _ => None,
    };
}

fn average(window: &VecDeque<Duration>) -> Option<Duration> {
    if window.is_empty() {
        return None;
    }
    let sum: Duration = window.iter().sum();
    Some(sum / window.len() as u32)
}
