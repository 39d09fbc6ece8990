//! Configuration validation.

use super::MigrationConfig;
use crate::error::{MigrateError, Result};
use std::collections::BTreeSet;

/// Validate the configuration.
pub fn validate(config: &MigrationConfig) -> Result<()> {
    if config.source_connection.provider_id.is_empty() {
        return Err(MigrateError::Config(
            "source_connection.provider_id is required".into(),
        ));
    }
    if config.target_connection.provider_id.is_empty() {
        return Err(MigrateError::Config(
            "target_connection.provider_id is required".into(),
        ));
    }

    // Cannot migrate a project onto itself
    if config.source_connection == config.target_connection {
        return Err(MigrateError::Config(
            "source and target cannot be the same connection".into(),
        ));
    }

    if config.batch_size < 1 {
        return Err(MigrateError::Config("batch_size must be at least 1".into()));
    }
    if let Some(0) = config.concurrent_operations {
        return Err(MigrateError::Config(
            "concurrent_operations must be at least 1".into(),
        ));
    }
    if config.sample_size < 1 {
        return Err(MigrateError::Config(
            "sample_size must be at least 1".into(),
        ));
    }
    if config.retry_base_delay_ms > config.retry_max_delay_ms {
        return Err(MigrateError::Config(
            "retry_base_delay_ms must not exceed retry_max_delay_ms".into(),
        ));
    }

    let mut seen_types = BTreeSet::new();
    for mapping in &config.mappings {
        if mapping.source_provider_id != config.source_connection.provider_id {
            return Err(MigrateError::Config(format!(
                "mapping '{}' is for source provider '{}', connection is '{}'",
                mapping.display_name(),
                mapping.source_provider_id,
                config.source_connection.provider_id
            )));
        }
        if mapping.target_provider_id != config.target_connection.provider_id {
            return Err(MigrateError::Config(format!(
                "mapping '{}' is for target provider '{}', connection is '{}'",
                mapping.display_name(),
                mapping.target_provider_id,
                config.target_connection.provider_id
            )));
        }
        if !mapping.artifact_type.has_fields() {
            return Err(MigrateError::Config(format!(
                "artifact type '{}' has no mappable fields",
                mapping.artifact_type
            )));
        }
        if !seen_types.insert(mapping.artifact_type) {
            return Err(MigrateError::Config(format!(
                "more than one mapping for artifact type '{}'",
                mapping.artifact_type
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ErrorHandlingStrategy, MigrationScope};
    use crate::mapping::MappingConfig;
    use crate::provider::{ArtifactType, ConnectionConfig};
    use std::collections::BTreeMap;

    fn connection(provider_id: &str, url: &str) -> ConnectionConfig {
        let mut params = BTreeMap::new();
        params.insert("base_url".to_string(), url.to_string());
        ConnectionConfig {
            provider_id: provider_id.to_string(),
            params,
        }
    }

    fn valid_config() -> MigrationConfig {
        MigrationConfig {
            source_connection: connection("testrail", "https://source.example"),
            target_connection: connection("qtest", "https://target.example"),
            mappings: vec![MappingConfig {
                source_provider_id: "testrail".to_string(),
                target_provider_id: "qtest".to_string(),
                artifact_type: ArtifactType::TestCase,
                field_mappings: Vec::new(),
                default_values: BTreeMap::new(),
                name: Some("cases".to_string()),
            }],
            scope: MigrationScope::All,
            batch_size: 100,
            concurrent_operations: Some(4),
            retry_attempts: 3,
            error_handling: ErrorHandlingStrategy::Stop,
            sample_size: 25,
            operation_timeout_secs: 30,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 10_000,
            decision_timeout_secs: 60,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_source_provider() {
        let mut config = valid_config();
        config.source_connection.provider_id = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_connection_rejected() {
        let mut config = valid_config();
        config.target_connection = config.source_connection.clone();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_concurrent_operations() {
        let mut config = valid_config();
        config.concurrent_operations = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_mapping_provider_mismatch() {
        let mut config = valid_config();
        config.mappings[0].source_provider_id = "zephyr".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_attachment_mapping_rejected() {
        let mut config = valid_config();
        config.mappings[0].artifact_type = ArtifactType::Attachment;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_mapping_type() {
        let mut config = valid_config();
        let extra = config.mappings[0].clone();
        config.mappings.push(extra);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
source_connection:
  provider_id: testrail
  params:
    base_url: https://source.example
target_connection:
  provider_id: qtest
  params:
    base_url: https://target.example
mappings:
  - source_provider_id: testrail
    target_provider_id: qtest
    artifact_type: test_case
    field_mappings:
      - source_id: title
        target_id: name
      - source_id: status
        target_id: state
        transformation:
          kind: value_map
          table:
            Open: New
            Closed: Done
scope: all
batch_size: 50
concurrent_operations: 4
retry_attempts: 2
error_handling: continue
"#;
        let config = MigrationConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.get_concurrent_operations(), 4);
        assert_eq!(config.error_handling, ErrorHandlingStrategy::Continue);
        assert_eq!(config.mappings[0].field_mappings.len(), 2);
        // Unset knobs fall back to defaults
        assert_eq!(config.sample_size, 25);
        assert_eq!(config.operation_timeout_secs, 30);
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let yaml = r#"
source_connection:
  provider_id: testrail
target_connection:
  provider_id: qtest
mappings: []
batch_size: 0
"#;
        assert!(MigrationConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_config_hash_is_stable() {
        let config = valid_config();
        assert_eq!(config.hash(), config.hash());

        let mut changed = valid_config();
        changed.batch_size = 50;
        assert_ne!(config.hash(), changed.hash());
    }
}
