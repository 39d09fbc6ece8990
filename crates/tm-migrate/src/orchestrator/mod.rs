//! Migration orchestrator - main workflow coordinator.
//!
//! Drives one run end to end: resolves the field mappings, enumerates the
//! scope through the [`Batcher`](crate::batch::Batcher), fans batches out
//! to a bounded worker pool and settles the run in a terminal state.
//! Control (pause/resume/cancel) and observation (status, statistics,
//! journal) go through the [`MigrationHandle`] returned by
//! [`Orchestrator::start`].

mod worker;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::batch::Batcher;
use crate::config::{MigrationConfig, MigrationScope};
use crate::error::{MigrateError, Result};
use crate::mapping::{resolve, TransformPlan, TransformRegistry};
use crate::progress::{LogLevel, MigrationState, MigrationStatistics, MigrationStatus,
    ProgressTracker, RunJournal};
use crate::provider::{ArtifactType, Provider};
use crate::retry::RetryPolicy;
use crate::state::{BatchWatermark, RunSnapshot};

/// Answer from a [`DecisionHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Record the failure and keep migrating.
    Continue,
    /// Stop dispatching; fail the run once in-flight batches drain.
    Abort,
}

/// Human-in-the-loop callback for the `prompt` error-handling strategy.
///
/// Invoked once per fatal artifact failure, bounded by the configured
/// decision timeout; an elapsed timeout is treated as [`Decision::Abort`].
#[async_trait]
pub trait DecisionHandler: Send + Sync {
    /// Decide what to do about a fatal artifact-level failure.
    async fn decide(&self, error: &MigrateError) -> Decision;
}

/// One artifact type scheduled for migration, with its resolved plan.
struct MigrationUnit {
    artifact_type: ArtifactType,
    plan: Option<TransformPlan>,
}

/// Cooperative control flags shared by the dispatcher and workers.
#[derive(Clone)]
pub(crate) struct RunControl {
    pub(crate) pause_tx: watch::Sender<bool>,
    pub(crate) pause_rx: watch::Receiver<bool>,
    /// External cancellation request.
    pub(crate) cancel: CancellationToken,
    /// Internal stop: no new batches after a fatal escalation.
    pub(crate) halt: CancellationToken,
}

impl RunControl {
    fn new() -> Self {
        let (pause_tx, pause_rx) = watch::channel(false);
        Self {
            pause_tx,
            pause_rx,
            cancel: CancellationToken::new(),
            halt: CancellationToken::new(),
        }
    }

    /// Park while paused; returns early on cancellation.
    pub(crate) async fn wait_if_paused(&self) {
        let mut rx = self.pause_rx.clone();
        while *rx.borrow() {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    pub(crate) fn stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.halt.is_cancelled()
    }
}

/// Everything a batch worker needs, shared across the run.
pub(crate) struct RunContext {
    pub(crate) config: MigrationConfig,
    pub(crate) run_id: String,
    config_hash: String,
    pub(crate) source: Arc<dyn Provider>,
    pub(crate) target: Arc<dyn Provider>,
    pub(crate) tracker: Arc<ProgressTracker>,
    pub(crate) journal: Arc<RunJournal>,
    pub(crate) retry: RetryPolicy,
    pub(crate) control: RunControl,
    pub(crate) decision: Option<Arc<dyn DecisionHandler>>,
    /// Serializes prompts so concurrent workers cannot interleave them.
    pub(crate) decision_gate: Mutex<()>,
    snapshot_path: Option<PathBuf>,
    /// Current resume index per artifact type, fed by the watermarks.
    resume_batches: StdMutex<BTreeMap<String, usize>>,
}

impl RunContext {
    /// Persist a snapshot if a state file is configured. Snapshot I/O
    /// problems are journaled, never fatal to the run.
    pub(crate) fn save_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let resume_batches = self
            .resume_batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let mut snapshot = RunSnapshot::new(
            self.run_id.clone(),
            self.config_hash.clone(),
            self.tracker.snapshot().state,
            resume_batches,
            self.tracker.statistics(),
        );
        if let Err(e) = snapshot.save(path) {
            self.journal.record(
                LogLevel::Warn,
                "orchestrator",
                format!("failed to save snapshot: {}", e),
                None,
            );
        }
    }

    fn set_resume_index(&self, artifact_type: ArtifactType, index: usize) {
        self.resume_batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(artifact_type.as_str().to_string(), index);
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: MigrationConfig,
    source: Arc<dyn Provider>,
    target: Arc<dyn Provider>,
    registry: TransformRegistry,
    decision: Option<Arc<dyn DecisionHandler>>,
    snapshot_path: Option<PathBuf>,
    resume_from: Option<RunSnapshot>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("snapshot_path", &self.snapshot_path)
            .field("resume_from", &self.resume_from)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create a new orchestrator over two live provider connections.
    ///
    /// Fails synchronously on configuration errors; no provider call is
    /// made here.
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn Provider>,
        target: Arc<dyn Provider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            target,
            registry: TransformRegistry::default(),
            decision: None,
            snapshot_path: None,
            resume_from: None,
        })
    }

    /// Register custom transformation hooks.
    pub fn with_registry(mut self, registry: TransformRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Install the decision handler for the `prompt` strategy.
    pub fn with_decision_handler(mut self, handler: Arc<dyn DecisionHandler>) -> Self {
        self.decision = Some(handler);
        self
    }

    /// Set the snapshot file path for resume capability.
    pub fn with_snapshot_file(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    /// Load an existing snapshot for resume.
    pub fn resume(mut self) -> Result<Self> {
        if let Some(path) = &self.snapshot_path {
            if path.exists() {
                let snapshot = RunSnapshot::load(path)?;
                snapshot.validate_config(&self.config.hash())?;
                info!("resuming from snapshot: {:?}", path);
                self.resume_from = Some(snapshot);
            }
        }
        Ok(self)
    }

    /// Resolve mappings and start the run, returning a control handle.
    ///
    /// Mapping/schema validation failures surface here, before the run
    /// leaves `pending` and before any artifact is touched. Everything
    /// later is observed through the handle, never raised.
    pub async fn start(self) -> Result<MigrationHandle> {
        let units = self.resolve_units().await?;

        let run_id = self
            .resume_from
            .as_ref()
            .map(|s| s.run_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let tracker = Arc::new(ProgressTracker::new(run_id.clone()));
        let journal = Arc::new(RunJournal::new());
        let control = RunControl::new();

        let mut resume_batches = BTreeMap::new();
        if let Some(snapshot) = &self.resume_from {
            tracker.restore_statistics(&snapshot.statistics);
            resume_batches = snapshot.resume_batches.clone();
        }

        let ctx = Arc::new(RunContext {
            retry: RetryPolicy::from_config(&self.config),
            config_hash: self.config.hash(),
            run_id: run_id.clone(),
            config: self.config,
            source: self.source,
            target: self.target,
            tracker: tracker.clone(),
            journal: journal.clone(),
            control: control.clone(),
            decision: self.decision,
            decision_gate: Mutex::new(()),
            snapshot_path: self.snapshot_path,
            resume_batches: StdMutex::new(resume_batches),
        });

        let resuming = self.resume_from.is_some();
        let join = tokio::spawn(run_migration(ctx.clone(), units, resuming));

        Ok(MigrationHandle {
            tracker,
            journal,
            control,
            join,
        })
    }

    /// Run to completion: start, then wait for the terminal state.
    pub async fn run(self) -> Result<MigrationStatus> {
        let mut handle = self.start().await?;
        handle.wait().await
    }

    /// Resolve one transform plan per field-bearing artifact type in
    /// scope; attachments pass through without a plan.
    async fn resolve_units(&self) -> Result<Vec<MigrationUnit>> {
        let shared = self
            .source
            .info()
            .capabilities
            .intersect(&self.target.info().capabilities);

        for mapping in &self.config.mappings {
            if !shared.contains(&mapping.artifact_type) {
                return Err(MigrateError::Config(format!(
                    "mapping '{}' targets artifact type '{}' which the providers do not both support",
                    mapping.display_name(),
                    mapping.artifact_type
                )));
            }
        }

        let mut units = Vec::new();
        for artifact_type in shared {
            if artifact_type.has_fields() {
                let Some(mapping) = self
                    .config
                    .mappings
                    .iter()
                    .find(|m| m.artifact_type == artifact_type)
                else {
                    debug!("no mapping for {}, type skipped", artifact_type);
                    continue;
                };
                let source_schema = self.source.schema(artifact_type).await?;
                let target_schema = self.target.schema(artifact_type).await?;
                let plan = resolve(mapping, &source_schema, &target_schema, &self.registry)?;
                units.push(MigrationUnit {
                    artifact_type,
                    plan: Some(plan),
                });
            } else {
                units.push(MigrationUnit {
                    artifact_type,
                    plan: None,
                });
            }
        }

        if units.is_empty() {
            return Err(MigrateError::Config(
                "no artifact type is supported by both providers and mapped".into(),
            ));
        }
        Ok(units)
    }
}

/// Control and observation surface for one running migration.
///
/// Data-level failures never surface through these methods; callers
/// observe outcomes via [`status`](Self::status) and the journal.
pub struct MigrationHandle {
    tracker: Arc<ProgressTracker>,
    journal: Arc<RunJournal>,
    control: RunControl,
    join: JoinHandle<()>,
}

impl std::fmt::Debug for MigrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationHandle").finish_non_exhaustive()
    }
}

impl MigrationHandle {
    /// Current run status.
    pub fn status(&self) -> MigrationStatus {
        self.tracker.snapshot()
    }

    /// Current statistics.
    pub fn statistics(&self) -> MigrationStatistics {
        self.tracker.statistics()
    }

    /// Push-subscription to status updates.
    pub fn subscribe(&self) -> watch::Receiver<MigrationStatus> {
        self.tracker.subscribe()
    }

    /// Audit trail recorded so far.
    pub fn journal(&self) -> Vec<crate::progress::LogEntry> {
        self.journal.entries()
    }

    /// Request a pause. Workers finish their current artifact; no new
    /// batches start. No-op unless the run is `running`.
    pub fn pause(&self) {
        if self.tracker.transition(MigrationState::Paused).is_ok() {
            self.control.pause_tx.send_replace(true);
            self.journal
                .record(LogLevel::Info, "orchestrator", "pause requested", None);
        }
    }

    /// Resume a paused run from the last unconsumed batch.
    pub fn resume(&self) {
        if self.tracker.transition(MigrationState::Running).is_ok() {
            self.control.pause_tx.send_replace(false);
            self.journal
                .record(LogLevel::Info, "orchestrator", "resumed", None);
        }
    }

    /// Request cancellation. In-flight artifact operations finish; no new
    /// ones start.
    pub fn cancel(&self) {
        self.journal
            .record(LogLevel::Info, "orchestrator", "cancellation requested", None);
        self.control.cancel.cancel();
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(&mut self) -> Result<MigrationStatus> {
        (&mut self.join)
            .await
            .map_err(|e| MigrateError::fatal(format!("migration task panicked: {}", e)))?;
        Ok(self.tracker.snapshot())
    }
}

/// Top-level run task.
async fn run_migration(ctx: Arc<RunContext>, units: Vec<MigrationUnit>, resuming: bool) {
    if let Err(e) = ctx.tracker.transition(MigrationState::Running) {
        ctx.journal.record(
            LogLevel::Error,
            "orchestrator",
            format!("could not start run: {}", e),
            None,
        );
        return;
    }
    ctx.journal.record(
        LogLevel::Info,
        "orchestrator",
        format!(
            "migration {} started ({} artifact types, {} workers, batch size {})",
            ctx.run_id,
            units.len(),
            ctx.config.get_concurrent_operations(),
            ctx.config.batch_size
        ),
        None,
    );

    let mut run_error = None;
    for unit in &units {
        if ctx.control.stopping() {
            break;
        }
        if let Err(e) = migrate_type(&ctx, unit, resuming).await {
            ctx.journal.record(
                LogLevel::Error,
                "orchestrator",
                format!("{}: enumeration failed: {}", unit.artifact_type, e),
                None,
            );
            run_error = Some(e);
            break;
        }
    }

    // Settle the terminal state. A pause that raced run completion is
    // unwound first so the transition stays legal.
    let status = ctx.tracker.snapshot();
    if status.state == MigrationState::Paused && !ctx.control.cancel.is_cancelled() {
        let _ = ctx.tracker.transition(MigrationState::Running);
        ctx.control.pause_tx.send_replace(false);
    }

    let terminal = if ctx.control.cancel.is_cancelled() {
        MigrationState::Cancelled
    } else if ctx.control.halt.is_cancelled() || run_error.is_some() {
        MigrationState::Failed
    } else {
        MigrationState::Completed
    };

    if let Err(e) = ctx.tracker.transition(terminal) {
        ctx.journal.record(
            LogLevel::Error,
            "orchestrator",
            format!("terminal transition failed: {}", e),
            None,
        );
    }
    ctx.save_snapshot();

    let status = ctx.tracker.snapshot();
    ctx.journal.record(
        LogLevel::Info,
        "orchestrator",
        format!(
            "migration {} {:?}: {}/{} processed, {} failed",
            ctx.run_id, terminal, status.processed_items, status.total_items, status.failed_items
        ),
        None,
    );
}

/// Enumerate and migrate every artifact of one type.
async fn migrate_type(ctx: &Arc<RunContext>, unit: &MigrationUnit, resuming: bool) -> Result<()> {
    let artifact_type = unit.artifact_type;
    let start_index = if resuming {
        ctx.resume_batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(artifact_type.as_str())
            .copied()
            .unwrap_or(0)
    } else {
        0
    };

    // Seed the expected total where the provider can count cheaply. On
    // resume the restored statistics already carry the totals.
    let known_total = if resuming {
        true
    } else {
        match ctx.source.count(artifact_type, &ctx.config.scope).await {
            Ok(Some(count)) => {
                let count = match ctx.config.scope {
                    MigrationScope::Test => count.min(ctx.config.sample_size as u64),
                    _ => count,
                };
                ctx.tracker.set_expected(artifact_type, count);
                true
            }
            Ok(None) => false,
            Err(e) => {
                debug!("{}: count unavailable: {}", artifact_type, e);
                false
            }
        }
    };

    let rx = ctx.source.list_ids(artifact_type, &ctx.config.scope);
    let mut batcher = Batcher::new(rx, ctx.config.batch_size).skip_to(start_index);
    if ctx.config.scope == MigrationScope::Test {
        batcher = batcher.with_limit(ctx.config.sample_size);
    }

    let workers = ctx.config.get_concurrent_operations();
    let semaphore = Arc::new(Semaphore::new(workers));
    let watermark = Arc::new(StdMutex::new(BatchWatermark::starting_at(start_index)));
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    info!("{}: transferring with {} workers", artifact_type, workers);

    loop {
        ctx.control.wait_if_paused().await;
        if ctx.control.stopping() {
            break;
        }

        let Some(next) = batcher.next_batch().await else {
            break;
        };
        let batch = next?;

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        // A fatal escalation may have landed while we waited for a slot.
        if ctx.control.stopping() {
            break;
        }

        if !known_total {
            ctx.tracker.add_discovered(artifact_type, batch.ids.len() as u64);
        }

        let worker = worker::BatchWorker::new(ctx.clone(), artifact_type, unit.plan.clone());
        let watermark = watermark.clone();
        let ctx_task = ctx.clone();
        handles.push(tokio::spawn(async move {
            let index = batch.index;
            let completed = worker.process(batch).await;
            if completed {
                let resume_index = {
                    let mut wm = watermark
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    wm.mark_completed(index);
                    wm.resume_index()
                };
                ctx_task.set_resume_index(artifact_type, resume_index);
                ctx_task.save_snapshot();
            }
            drop(permit);
        }));
    }

    // Drain in-flight batches; they are never force-killed.
    for handle in handles {
        if let Err(e) = handle.await {
            ctx.journal.record(
                LogLevel::Error,
                "orchestrator",
                format!("{}: batch task panicked: {}", artifact_type, e),
                None,
            );
        }
    }

    Ok(())
}
