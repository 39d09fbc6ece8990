//! End-to-end engine tests over a scriptable in-memory provider pair.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use tm_migrate::{
    Artifact, ArtifactType, Capabilities, ConnectionConfig, Decision, DecisionHandler,
    ErrorHandlingStrategy, Field, FieldMapping, FieldType, MappingConfig, MigrateError,
    MigrationConfig, MigrationScope, MigrationState, Orchestrator, Provider, ProviderInfo, Result,
    Transformation, WriteResult,
};

/// In-memory provider, usable as source or target.
struct MemoryProvider {
    info: ProviderInfo,
    schemas: BTreeMap<ArtifactType, Vec<Field>>,
    artifacts: Vec<Artifact>,
    /// Ids whose fetch always fails with a transient error.
    fail_fetch_transient: HashSet<String>,
    /// Ids whose fetch always fails with a fatal error.
    fail_fetch_fatal: HashSet<String>,
    /// Simulated per-fetch latency.
    fetch_delay: Duration,
    /// Ids the target reports as already present and unchanged.
    skip_writes: HashSet<String>,
    written: Mutex<Vec<Artifact>>,
    fetch_calls: AtomicUsize,
    write_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl MemoryProvider {
    fn new(id: &str, capabilities: Capabilities) -> Self {
        Self {
            info: ProviderInfo {
                id: id.to_string(),
                name: id.to_string(),
                version: "1.0".to_string(),
                capabilities,
            },
            schemas: BTreeMap::new(),
            artifacts: Vec::new(),
            fail_fetch_transient: HashSet::new(),
            fail_fetch_fatal: HashSet::new(),
            fetch_delay: Duration::ZERO,
            skip_writes: HashSet::new(),
            written: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    fn with_schema(mut self, artifact_type: ArtifactType, fields: Vec<Field>) -> Self {
        self.schemas.insert(artifact_type, fields);
        self
    }

    fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    fn failing_fetch(mut self, id: &str) -> Self {
        self.fail_fetch_transient.insert(id.to_string());
        self
    }

    fn failing_fetch_fatal(mut self, id: &str) -> Self {
        self.fail_fetch_fatal.insert(id.to_string());
        self
    }

    fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    fn skipping_write(mut self, id: &str) -> Self {
        self.skip_writes.insert(id.to_string());
        self
    }

    fn written(&self) -> Vec<Artifact> {
        self.written.lock().unwrap().clone()
    }

    fn provider_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
            + self.write_calls.load(Ordering::SeqCst)
            + self.list_calls.load(Ordering::SeqCst)
    }

    fn scoped_ids(&self, artifact_type: ArtifactType, scope: &MigrationScope) -> Vec<String> {
        match scope {
            MigrationScope::Selected { ids } => ids.clone(),
            _ => self
                .artifacts
                .iter()
                .filter(|a| a.artifact_type == artifact_type)
                .map(|a| a.id.clone())
                .collect(),
        }
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn info(&self) -> &ProviderInfo {
        &self.info
    }

    async fn schema(&self, artifact_type: ArtifactType) -> Result<Vec<Field>> {
        Ok(self.schemas.get(&artifact_type).cloned().unwrap_or_default())
    }

    async fn count(
        &self,
        artifact_type: ArtifactType,
        scope: &MigrationScope,
    ) -> Result<Option<u64>> {
        Ok(Some(self.scoped_ids(artifact_type, scope).len() as u64))
    }

    fn list_ids(
        &self,
        artifact_type: ArtifactType,
        scope: &MigrationScope,
    ) -> mpsc::Receiver<Result<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let ids = self.scoped_ids(artifact_type, scope);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for id in ids {
                if tx.send(Ok(id)).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    async fn fetch(&self, artifact_type: ArtifactType, id: &str) -> Result<Artifact> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        if self.fail_fetch_transient.contains(id) {
            return Err(MigrateError::transient(format!("503 fetching {}", id)));
        }
        if self.fail_fetch_fatal.contains(id) {
            return Err(MigrateError::fatal(format!("{} not found", id)));
        }
        self.artifacts
            .iter()
            .find(|a| a.artifact_type == artifact_type && a.id == id)
            .cloned()
            .ok_or_else(|| MigrateError::fatal(format!("{} not found", id)))
    }

    async fn write(&self, artifact: Artifact) -> Result<WriteResult> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.skip_writes.contains(&artifact.id) {
            return Ok(WriteResult::Skipped);
        }
        let target_id = format!("T-{}", artifact.id);
        self.written.lock().unwrap().push(artifact);
        Ok(WriteResult::Written(target_id))
    }
}

fn text_field(id: &str, required: bool) -> Field {
    Field {
        id: id.to_string(),
        name: id.to_string(),
        field_type: FieldType::Text,
        required,
        allowed_values: None,
    }
}

fn case_capabilities() -> Capabilities {
    Capabilities {
        test_cases: true,
        test_cycles: false,
        test_executions: false,
        attachments: false,
        custom_fields: false,
    }
}

fn test_cases(count: usize) -> Vec<Artifact> {
    (0..count)
        .map(|i| {
            Artifact::new(format!("TC-{}", i), ArtifactType::TestCase)
                .with_field("title", Value::String(format!("Case {}", i)))
                .with_field("status", Value::String("Open".to_string()))
        })
        .collect()
}

fn source_provider(count: usize) -> MemoryProvider {
    MemoryProvider::new("testrail", case_capabilities())
        .with_schema(
            ArtifactType::TestCase,
            vec![text_field("title", false), text_field("status", false)],
        )
        .with_artifacts(test_cases(count))
}

fn target_provider() -> MemoryProvider {
    MemoryProvider::new("qtest", case_capabilities()).with_schema(
        ArtifactType::TestCase,
        vec![text_field("name", false), text_field("state", false)],
    )
}

fn connection(provider_id: &str, url: &str) -> ConnectionConfig {
    let mut params = BTreeMap::new();
    params.insert("base_url".to_string(), url.to_string());
    ConnectionConfig {
        provider_id: provider_id.to_string(),
        params,
    }
}

fn copy_mapping() -> MappingConfig {
    MappingConfig {
        source_provider_id: "testrail".to_string(),
        target_provider_id: "qtest".to_string(),
        artifact_type: ArtifactType::TestCase,
        field_mappings: vec![FieldMapping {
            source_id: "title".to_string(),
            target_id: "name".to_string(),
            transformation: None,
        }],
        default_values: BTreeMap::new(),
        name: Some("cases".to_string()),
    }
}

fn config(
    batch_size: usize,
    concurrent: usize,
    retries: u32,
    strategy: ErrorHandlingStrategy,
) -> MigrationConfig {
    MigrationConfig {
        source_connection: connection("testrail", "https://source.example"),
        target_connection: connection("qtest", "https://target.example"),
        mappings: vec![copy_mapping()],
        scope: MigrationScope::All,
        batch_size,
        concurrent_operations: Some(concurrent),
        retry_attempts: retries,
        error_handling: strategy,
        sample_size: 25,
        operation_timeout_secs: 5,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 4,
        decision_timeout_secs: 1,
    }
}

#[tokio::test]
async fn full_run_migrates_every_artifact() {
    let source = Arc::new(source_provider(25));
    let target = Arc::new(target_provider());

    let status = Orchestrator::new(
        config(10, 2, 3, ErrorHandlingStrategy::Continue),
        source.clone(),
        target.clone(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(status.processed_items, 25);
    assert_eq!(status.failed_items, 0);
    assert!((status.progress - 1.0).abs() < f64::EPSILON);

    let written = target.written();
    assert_eq!(written.len(), 25);
    // Direct copy renamed the field
    let first = written.iter().find(|a| a.id == "TC-0").unwrap();
    assert_eq!(
        first.fields.get("name"),
        Some(&Value::String("Case 0".to_string()))
    );
    assert!(first.fields.get("title").is_none());
}

// Scenario: one artifact always fails fetch, strategy `continue`.
#[tokio::test]
async fn continue_strategy_records_failure_and_completes() {
    let source = Arc::new(source_provider(25).failing_fetch("TC-7"));
    let target = Arc::new(target_provider());

    let status = Orchestrator::new(
        config(10, 2, 3, ErrorHandlingStrategy::Continue),
        source,
        target.clone(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(status.processed_items, 25);
    assert_eq!(status.failed_items, 1);
    assert!((status.progress - 1.0).abs() < f64::EPSILON);
    assert_eq!(target.written().len(), 24);
}

// Scenario: same failure with strategy `stop` fails the run and stops
// dispatching once the failing batch's pool peers drain.
#[tokio::test]
async fn stop_strategy_halts_dispatch() {
    let source = Arc::new(
        source_provider(25)
            .failing_fetch_fatal("TC-7")
            .with_fetch_delay(Duration::from_millis(10)),
    );
    let target = Arc::new(target_provider());

    let mut handle = Orchestrator::new(
        config(10, 2, 3, ErrorHandlingStrategy::Stop),
        source,
        target.clone(),
    )
    .unwrap()
    .start()
    .await
    .unwrap();
    let status = handle.wait().await.unwrap();

    assert_eq!(status.state, MigrationState::Failed);
    assert!(status.failed_items >= 1);
    // The third batch (TC-20..TC-24) is never dispatched.
    assert!(
        status.processed_items < 25,
        "processed {} items",
        status.processed_items
    );
}

#[tokio::test]
async fn value_map_transforms_and_flags_unmapped_values() {
    let mut artifacts = test_cases(3);
    artifacts[2].fields.insert(
        "status".to_string(),
        Value::String("Closed".to_string()),
    );
    let source = Arc::new(
        MemoryProvider::new("testrail", case_capabilities())
            .with_schema(
                ArtifactType::TestCase,
                vec![text_field("title", false), text_field("status", false)],
            )
            .with_artifacts(artifacts),
    );
    let target = Arc::new(target_provider());

    let mut cfg = config(10, 1, 0, ErrorHandlingStrategy::Continue);
    let mut table = BTreeMap::new();
    table.insert("Open".to_string(), "New".to_string());
    cfg.mappings[0].field_mappings.push(FieldMapping {
        source_id: "status".to_string(),
        target_id: "state".to_string(),
        transformation: Some(Transformation::ValueMap {
            table,
            default: None,
        }),
    });

    let status = Orchestrator::new(cfg, source, target.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    // Two "Open" cases map to "New"; the "Closed" one is a field error.
    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(status.processed_items, 3);
    assert_eq!(status.failed_items, 1);

    let written = target.written();
    assert_eq!(written.len(), 2);
    assert!(written
        .iter()
        .all(|a| a.fields.get("state") == Some(&Value::String("New".to_string()))));
}

// Scenario: a required target field with no mapping fails before any
// artifact operation reaches a provider.
#[tokio::test]
async fn unresolved_required_field_fails_before_any_provider_call() {
    let source = Arc::new(source_provider(10));
    let target = Arc::new(
        MemoryProvider::new("qtest", case_capabilities()).with_schema(
            ArtifactType::TestCase,
            vec![text_field("name", false), text_field("priority", true)],
        ),
    );

    let err = Orchestrator::new(
        config(10, 2, 3, ErrorHandlingStrategy::Continue),
        source.clone(),
        target.clone(),
    )
    .unwrap()
    .start()
    .await
    .unwrap_err();

    assert!(matches!(err, MigrateError::Validation(_)));
    assert_eq!(source.provider_calls(), 0);
    assert_eq!(target.provider_calls(), 0);
}

#[tokio::test]
async fn final_statistics_are_concurrency_independent() {
    let mut final_stats = Vec::new();
    for concurrency in [1usize, 8] {
        let source = Arc::new(source_provider(40).failing_fetch("TC-13"));
        let target = Arc::new(target_provider());
        let status = Orchestrator::new(
            config(5, concurrency, 1, ErrorHandlingStrategy::Continue),
            source,
            target,
        )
        .unwrap()
        .run()
        .await
        .unwrap();
        assert_eq!(status.state, MigrationState::Completed);
        final_stats.push((status.processed_items, status.failed_items));
    }
    assert_eq!(final_stats[0], final_stats[1]);
    assert_eq!(final_stats[0], (40, 1));
}

#[tokio::test]
async fn pause_parks_workers_and_resume_finishes() {
    let source = Arc::new(source_provider(30).with_fetch_delay(Duration::from_millis(5)));
    let target = Arc::new(target_provider());

    let mut handle = Orchestrator::new(
        config(5, 2, 0, ErrorHandlingStrategy::Continue),
        source,
        target,
    )
    .unwrap()
    .start()
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.pause();
    assert_eq!(handle.status().state, MigrationState::Paused);

    // Workers finish their current artifact, then hold position.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let parked = handle.status().processed_items;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.status().processed_items, parked);
    assert!(parked < 30);

    handle.resume();
    let status = handle.wait().await.unwrap();
    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(status.processed_items, 30);
}

#[tokio::test]
async fn cancellation_is_cooperative() {
    let source = Arc::new(source_provider(50).with_fetch_delay(Duration::from_millis(5)));
    let target = Arc::new(target_provider());

    let mut handle = Orchestrator::new(
        config(5, 2, 0, ErrorHandlingStrategy::Continue),
        source,
        target,
    )
    .unwrap()
    .start()
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.cancel();
    let status = handle.wait().await.unwrap();

    assert_eq!(status.state, MigrationState::Cancelled);
    assert!(status.processed_items < 50);
}

struct ScriptedDecision(Decision);

#[async_trait]
impl DecisionHandler for ScriptedDecision {
    async fn decide(&self, _error: &MigrateError) -> Decision {
        self.0
    }
}

#[tokio::test]
async fn prompt_continue_decision_keeps_run_alive() {
    let source = Arc::new(source_provider(20).failing_fetch_fatal("TC-3"));
    let target = Arc::new(target_provider());

    let status = Orchestrator::new(
        config(5, 2, 0, ErrorHandlingStrategy::Prompt),
        source,
        target,
    )
    .unwrap()
    .with_decision_handler(Arc::new(ScriptedDecision(Decision::Continue)))
    .run()
    .await
    .unwrap();

    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(status.processed_items, 20);
    assert_eq!(status.failed_items, 1);
}

#[tokio::test]
async fn prompt_abort_decision_fails_run() {
    let source = Arc::new(
        source_provider(20)
            .failing_fetch_fatal("TC-3")
            .with_fetch_delay(Duration::from_millis(5)),
    );
    let target = Arc::new(target_provider());

    let status = Orchestrator::new(
        config(5, 2, 0, ErrorHandlingStrategy::Prompt),
        source,
        target,
    )
    .unwrap()
    .with_decision_handler(Arc::new(ScriptedDecision(Decision::Abort)))
    .run()
    .await
    .unwrap();

    assert_eq!(status.state, MigrationState::Failed);
    assert!(status.processed_items < 20);
}

#[tokio::test]
async fn prompt_without_handler_defaults_to_abort() {
    let source = Arc::new(source_provider(10).failing_fetch_fatal("TC-1"));
    let target = Arc::new(target_provider());

    let status = Orchestrator::new(
        config(5, 1, 0, ErrorHandlingStrategy::Prompt),
        source,
        target,
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(status.state, MigrationState::Failed);
}

#[tokio::test]
async fn selected_scope_migrates_only_listed_ids() {
    let source = Arc::new(source_provider(20));
    let target = Arc::new(target_provider());

    let mut cfg = config(10, 2, 0, ErrorHandlingStrategy::Continue);
    cfg.scope = MigrationScope::Selected {
        ids: vec!["TC-1".to_string(), "TC-5".to_string(), "TC-9".to_string()],
    };

    let status = Orchestrator::new(cfg, source, target.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(status.processed_items, 3);
    assert_eq!(status.total_items, 3);
    assert_eq!(target.written().len(), 3);
}

#[tokio::test]
async fn test_scope_caps_at_sample_size() {
    let source = Arc::new(source_provider(100));
    let target = Arc::new(target_provider());

    let mut cfg = config(10, 2, 0, ErrorHandlingStrategy::Continue);
    cfg.scope = MigrationScope::Test;
    cfg.sample_size = 25;

    let status = Orchestrator::new(cfg, source, target.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(status.processed_items, 25);
    assert_eq!(status.total_items, 25);
    assert_eq!(target.written().len(), 25);
}

#[tokio::test]
async fn skipped_writes_are_reported_separately() {
    let source = Arc::new(source_provider(5));
    let target = Arc::new(target_provider().skipping_write("TC-2"));

    let mut handle = Orchestrator::new(
        config(5, 1, 0, ErrorHandlingStrategy::Continue),
        source,
        target.clone(),
    )
    .unwrap()
    .start()
    .await
    .unwrap();
    let status = handle.wait().await.unwrap();

    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(status.processed_items, 5);
    assert_eq!(status.failed_items, 0);
    assert_eq!(target.written().len(), 4);

    let stats = handle.statistics();
    assert_eq!(stats.skipped, 1);
    // Skipped artifacts still count as present on the target
    assert_eq!(stats.entities["test_case"].migrated, 5);
}

#[tokio::test]
async fn snapshot_written_and_resume_guards_config_hash() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path: PathBuf = dir.path().join("run.snapshot.json");

    let source = Arc::new(source_provider(10));
    let target = Arc::new(target_provider());
    let cfg = config(5, 1, 0, ErrorHandlingStrategy::Continue);

    let status = Orchestrator::new(cfg.clone(), source, target)
        .unwrap()
        .with_snapshot_file(snapshot_path.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(status.state, MigrationState::Completed);
    assert!(snapshot_path.exists());

    // Same config resumes cleanly
    let source = Arc::new(source_provider(10));
    let target = Arc::new(target_provider());
    assert!(Orchestrator::new(cfg.clone(), source, target)
        .unwrap()
        .with_snapshot_file(snapshot_path.clone())
        .resume()
        .is_ok());

    // A changed config must not resume against the old snapshot
    let mut changed = cfg;
    changed.batch_size = 3;
    let source = Arc::new(source_provider(10));
    let target = Arc::new(target_provider());
    let err = Orchestrator::new(changed, source, target)
        .unwrap()
        .with_snapshot_file(snapshot_path)
        .resume()
        .unwrap_err();
    assert!(matches!(err, MigrateError::ConfigChanged));
}

#[tokio::test]
async fn attachments_pass_through_without_mapping() {
    let caps = Capabilities {
        test_cases: true,
        attachments: true,
        ..case_capabilities()
    };
    let mut artifacts = test_cases(2);
    artifacts.push(
        Artifact::new("AT-1", ArtifactType::Attachment)
            .with_field("file_name", Value::String("log.txt".to_string()))
            .with_field("content", Value::String("aGVsbG8=".to_string())),
    );

    let source = Arc::new(
        MemoryProvider::new("testrail", caps)
            .with_schema(
                ArtifactType::TestCase,
                vec![text_field("title", false), text_field("status", false)],
            )
            .with_artifacts(artifacts),
    );
    let target = Arc::new(MemoryProvider::new("qtest", caps).with_schema(
        ArtifactType::TestCase,
        vec![text_field("name", false), text_field("state", false)],
    ));

    let status = Orchestrator::new(
        config(10, 1, 0, ErrorHandlingStrategy::Continue),
        source,
        target.clone(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();

    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(status.processed_items, 3);

    let attachment = target
        .written()
        .into_iter()
        .find(|a| a.artifact_type == ArtifactType::Attachment)
        .unwrap();
    // Untransformed: original fields intact
    assert_eq!(
        attachment.fields.get("file_name"),
        Some(&Value::String("log.txt".to_string()))
    );
}

#[tokio::test]
async fn status_subscription_streams_progress() {
    let source = Arc::new(source_provider(10));
    let target = Arc::new(target_provider());

    let mut handle = Orchestrator::new(
        config(5, 1, 0, ErrorHandlingStrategy::Continue),
        source,
        target,
    )
    .unwrap()
    .start()
    .await
    .unwrap();

    let rx = handle.subscribe();
    let status = handle.wait().await.unwrap();
    assert_eq!(status.state, MigrationState::Completed);
    assert_eq!(rx.borrow().state, MigrationState::Completed);
    assert_eq!(rx.borrow().processed_items, 10);
}

#[tokio::test]
async fn journal_records_retries_and_outcomes() {
    let source = Arc::new(source_provider(5).failing_fetch("TC-2"));
    let target = Arc::new(target_provider());

    let mut handle = Orchestrator::new(
        config(5, 1, 2, ErrorHandlingStrategy::Continue),
        source,
        target,
    )
    .unwrap()
    .start()
    .await
    .unwrap();
    let status = handle.wait().await.unwrap();
    assert_eq!(status.state, MigrationState::Completed);

    let journal = handle.journal();
    use tm_migrate::LogLevel;
    // Two retries at warn, exhaustion + artifact failure at error
    assert_eq!(
        journal.iter().filter(|e| e.level == LogLevel::Warn).count(),
        2
    );
    assert!(journal.iter().any(|e| e.level == LogLevel::Error));
    assert!(journal
        .iter()
        .any(|e| e.message.contains("retries exhausted")));
}
