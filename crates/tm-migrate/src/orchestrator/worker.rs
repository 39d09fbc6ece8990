//! Batch worker: the per-artifact fetch -> transform -> write pipeline.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Decision, RunContext};
use crate::batch::Batch;
use crate::config::ErrorHandlingStrategy;
use crate::error::{MigrateError, Result};
use crate::mapping::TransformPlan;
use crate::progress::{LogLevel, Outcome};
use crate::provider::{Artifact, ArtifactType, WriteResult};

/// Processes one batch at a time, artifacts strictly in order.
pub(super) struct BatchWorker {
    ctx: Arc<RunContext>,
    artifact_type: ArtifactType,
    plan: Option<TransformPlan>,
}

impl BatchWorker {
    pub(super) fn new(
        ctx: Arc<RunContext>,
        artifact_type: ArtifactType,
        plan: Option<TransformPlan>,
    ) -> Self {
        Self {
            ctx,
            artifact_type,
            plan,
        }
    }

    /// Process every artifact in the batch sequentially.
    ///
    /// Returns `true` when the whole batch got an outcome, making it
    /// eligible for the resume watermark. Cancellation and pause are
    /// honored between artifacts, never mid-operation.
    pub(super) async fn process(&self, batch: Batch) -> bool {
        let component = format!("worker-{}", batch.index);
        for id in &batch.ids {
            self.ctx.control.wait_if_paused().await;
            if self.ctx.control.cancel.is_cancelled() {
                return false;
            }

            let started = Instant::now();
            match self.process_artifact(&component, id).await {
                Ok(outcome) => {
                    self.ctx
                        .tracker
                        .record_outcome(self.artifact_type, outcome, Some(started.elapsed()));
                }
                Err(e) => {
                    self.ctx.tracker.record_outcome(
                        self.artifact_type,
                        Outcome::Failed,
                        Some(started.elapsed()),
                    );
                    self.ctx.journal.record(
                        LogLevel::Error,
                        &component,
                        format!("{} {}: {}", self.artifact_type, id, e),
                        None,
                    );
                    self.escalate(&e).await;
                }
            }
        }
        true
    }

    async fn process_artifact(&self, component: &str, id: &str) -> Result<Outcome> {
        let timeout = self.ctx.config.operation_timeout();

        let artifact = self
            .ctx
            .retry
            .execute(component, &self.ctx.journal, || {
                with_timeout(timeout, self.ctx.source.fetch(self.artifact_type, id))
            })
            .await?;

        let outgoing = match &self.plan {
            Some(plan) => Artifact {
                id: artifact.id.clone(),
                artifact_type: self.artifact_type,
                fields: plan.apply(id, &artifact.fields)?,
            },
            // Attachments pass through untransformed.
            None => artifact,
        };

        let written = self
            .ctx
            .retry
            .execute(component, &self.ctx.journal, || {
                with_timeout(timeout, self.ctx.target.write(outgoing.clone()))
            })
            .await?;

        Ok(match written {
            WriteResult::Written(_) => Outcome::Migrated,
            WriteResult::Skipped => Outcome::Skipped,
        })
    }

    /// Apply the configured error-handling strategy to an artifact-level
    /// failure. The failure itself is already recorded and journaled.
    async fn escalate(&self, error: &MigrateError) {
        match self.ctx.config.error_handling {
            ErrorHandlingStrategy::Continue => {}
            ErrorHandlingStrategy::Stop => {
                if !self.ctx.control.halt.is_cancelled() {
                    self.ctx.journal.record(
                        LogLevel::Error,
                        "orchestrator",
                        "fatal failure with stop strategy, no further batches will be dispatched",
                        None,
                    );
                    self.ctx.control.halt.cancel();
                }
            }
            ErrorHandlingStrategy::Prompt => {
                // One prompt at a time; a decision taken while we waited
                // for the gate may already have settled the run.
                let _gate = self.ctx.decision_gate.lock().await;
                if self.ctx.control.stopping() {
                    return;
                }
                let decision = match &self.ctx.decision {
                    Some(handler) => {
                        tokio::time::timeout(
                            self.ctx.config.decision_timeout(),
                            handler.decide(error),
                        )
                        .await
                        .unwrap_or(Decision::Abort)
                    }
                    None => Decision::Abort,
                };
                match decision {
                    Decision::Continue => {
                        self.ctx.journal.record(
                            LogLevel::Info,
                            "orchestrator",
                            "decision handler chose to continue after fatal failure",
                            None,
                        );
                    }
                    Decision::Abort => {
                        self.ctx.journal.record(
                            LogLevel::Error,
                            "orchestrator",
                            "decision handler aborted the run",
                            None,
                        );
                        self.ctx.control.halt.cancel();
                    }
                }
            }
        }
    }
}

/// Bound one provider operation; an elapsed timeout is transient.
async fn with_timeout<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(MigrateError::transient("operation timed out")),
    }
}
