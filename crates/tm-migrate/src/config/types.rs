//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use sysinfo::System;
use tracing::info;

use crate::mapping::MappingConfig;
use crate::provider::ConnectionConfig;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!("System resources: {} CPU cores", self.cpu_cores);
    }
}

/// Which artifacts a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationScope {
    /// Everything the source enumerates.
    #[default]
    All,
    /// An explicit id list.
    Selected { ids: Vec<String> },
    /// A bounded sample run, capped at `MigrationConfig::sample_size` ids.
    Test,
}

/// What the orchestrator does when an artifact-level fatal failure occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandlingStrategy {
    /// Stop dispatching new batches; drain in-flight work; fail the run.
    #[default]
    Stop,
    /// Record the failure and keep going.
    Continue,
    /// Ask an injected decision handler, bounded by a timeout.
    Prompt,
}

/// Configuration for one migration run. Immutable for the run's lifetime;
/// a new run requires a new config instance.
///
/// Performance fields use `Option<T>` to distinguish "not set" (use the
/// auto-tuned default) from "explicitly set".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Source connection parameters (opaque, resolved externally).
    pub source_connection: ConnectionConfig,

    /// Target connection parameters (opaque, resolved externally).
    pub target_connection: ConnectionConfig,

    /// Field mappings, one per field-bearing artifact type in scope.
    pub mappings: Vec<MappingConfig>,

    /// Which artifacts to migrate.
    #[serde(default)]
    pub scope: MigrationScope,

    /// Artifact ids per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrently processed batches. Auto-tuned from CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_operations: Option<usize>,

    /// Retries per artifact operation before a transient failure becomes fatal.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Behavior on artifact-level fatal failure.
    #[serde(default)]
    pub error_handling: ErrorHandlingStrategy,

    /// Id cap for `MigrationScope::Test` runs.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Per-operation (fetch/write) timeout in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Base retry backoff delay in milliseconds (doubles per attempt).
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single backoff delay in milliseconds.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// How long a `prompt` decision may take before it is treated as abort.
    #[serde(default = "default_decision_timeout")]
    pub decision_timeout_secs: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_sample_size() -> usize {
    25
}

fn default_operation_timeout() -> u64 {
    30
}

fn default_retry_base_delay() -> u64 {
    200
}

fn default_retry_max_delay() -> u64 {
    10_000
}

fn default_decision_timeout() -> u64 {
    60
}

impl MigrationConfig {
    /// Effective worker count: explicit value, or auto-tuned from CPU cores.
    pub fn get_concurrent_operations(&self) -> usize {
        self.concurrent_operations
            .unwrap_or_else(|| SystemResources::detect().cpu_cores.clamp(2, 8))
    }

    /// Per-operation timeout.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Base backoff delay.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Backoff delay cap.
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Decision handler timeout for the `prompt` strategy.
    pub fn decision_timeout(&self) -> Duration {
        Duration::from_secs(self.decision_timeout_secs)
    }
}
