//! Provider abstraction for test-management platforms.
//!
//! This module defines the interface the engine consumes and never
//! implements. Real clients (TestRail, qTest, Azure DevOps, Rally, HP ALM,
//! Jama, spreadsheet import, ...) live outside the crate and plug in
//! behind [`Provider`].
//!
//! # Streaming
//!
//! [`Provider::list_ids`] returns a channel receiver for streaming
//! artifact ids, enabling backpressure and memory-efficient enumeration of
//! large projects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use crate::config::MigrationScope;
use crate::error::Result;

/// The kinds of artifact the engine can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    TestCase,
    TestCycle,
    TestExecution,
    Attachment,
}

impl ArtifactType {
    /// All artifact types, in migration order (cases before the cycles
    /// and executions that reference them, attachments last).
    pub const ALL: [ArtifactType; 4] = [
        ArtifactType::TestCase,
        ArtifactType::TestCycle,
        ArtifactType::TestExecution,
        ArtifactType::Attachment,
    ];

    /// Whether artifacts of this type carry mappable fields.
    ///
    /// Attachments are opaque blobs and migrate without a transform plan.
    pub fn has_fields(&self) -> bool {
        !matches!(self, ArtifactType::Attachment)
    }

    /// Stable identifier used in logs and statistics keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::TestCase => "test_case",
            ArtifactType::TestCycle => "test_cycle",
            ArtifactType::TestExecution => "test_execution",
            ArtifactType::Attachment => "attachment",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a provider supports. Immutable once connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub test_cases: bool,
    pub test_cycles: bool,
    pub test_executions: bool,
    pub attachments: bool,
    pub custom_fields: bool,
}

impl Capabilities {
    /// Whether this provider supports the given artifact type.
    pub fn supports(&self, artifact_type: ArtifactType) -> bool {
        match artifact_type {
            ArtifactType::TestCase => self.test_cases,
            ArtifactType::TestCycle => self.test_cycles,
            ArtifactType::TestExecution => self.test_executions,
            ArtifactType::Attachment => self.attachments,
        }
    }

    /// Artifact types supported by both providers.
    pub fn intersect(&self, other: &Capabilities) -> Vec<ArtifactType> {
        ArtifactType::ALL
            .into_iter()
            .filter(|t| self.supports(*t) && other.supports(*t))
            .collect()
    }
}

/// Provider identity and capability descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Stable provider identifier (e.g. "testrail").
    pub id: String,
    /// Display name.
    pub name: String,
    /// Provider/client version string.
    pub version: String,
    /// Supported artifact types.
    pub capabilities: Capabilities,
}

/// Connection parameters, opaque to the engine.
///
/// External code resolves this into a live, authenticated [`Provider`]
/// handle; the engine only threads it through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Which provider these params are for.
    pub provider_id: String,
    /// Provider-specific parameters (base URL, project key, token, ...).
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Value type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Bool,
    Option,
}

/// One schema field of a provider artifact type.
///
/// Used only for mapping validation; the engine never mutates schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field identifier as the provider knows it.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Value type.
    pub field_type: FieldType,
    /// Whether the target rejects artifacts missing this field.
    #[serde(default)]
    pub required: bool,
    /// Closed value domain, if the field has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

/// One artifact in transit between providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Source-side identifier.
    pub id: String,
    /// What kind of artifact this is.
    pub artifact_type: ArtifactType,
    /// Field values keyed by field id.
    pub fields: BTreeMap<String, Value>,
}

impl Artifact {
    /// Create an artifact with no fields.
    pub fn new(id: impl Into<String>, artifact_type: ArtifactType) -> Self {
        Self {
            id: id.into(),
            artifact_type,
            fields: BTreeMap::new(),
        }
    }

    /// Set a field value (builder style).
    pub fn with_field(mut self, id: impl Into<String>, value: Value) -> Self {
        self.fields.insert(id.into(), value);
        self
    }
}

/// Result of writing one artifact to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Created or updated, with the target-side id.
    Written(String),
    /// Already present and unchanged; nothing written.
    Skipped,
}

/// A connected test-management platform.
///
/// Implementations provide schema description, artifact enumeration,
/// fetch and write for one live connection. All operations are assumed
/// reentrant per-call; the engine holds no locks across provider I/O.
///
/// # Errors
///
/// Implementations signal retryability through the error variant:
/// [`MigrateError::Transient`](crate::MigrateError::Transient) for
/// timeouts/rate limits/5xx-class failures,
/// [`MigrateError::Fatal`](crate::MigrateError::Fatal) for auth failures
/// and missing artifacts.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identity and capabilities of this connection.
    fn info(&self) -> &ProviderInfo;

    /// Describe the fields of one artifact type.
    async fn schema(&self, artifact_type: ArtifactType) -> Result<Vec<Field>>;

    /// Count the artifacts in scope, if the provider can answer without
    /// enumerating them. `None` means the total is refined incrementally
    /// as ids stream in.
    async fn count(&self, artifact_type: ArtifactType, scope: &MigrationScope)
        -> Result<Option<u64>>;

    /// Start streaming artifact ids in provider enumeration order.
    ///
    /// Returns a channel receiver that yields ids until the scope is
    /// exhausted. The provider spawns a background task that populates the
    /// channel, so a slow consumer applies backpressure instead of
    /// materializing the full id list.
    fn list_ids(
        &self,
        artifact_type: ArtifactType,
        scope: &MigrationScope,
    ) -> mpsc::Receiver<Result<String>>;

    /// Fetch one artifact by id.
    async fn fetch(&self, artifact_type: ArtifactType, id: &str) -> Result<Artifact>;

    /// Write one artifact to the target.
    async fn write(&self, artifact: Artifact) -> Result<WriteResult>;
}
