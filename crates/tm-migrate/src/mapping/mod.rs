//! Field mapping configuration and resolution.
//!
//! A [`MappingConfig`] is user-owned input describing how source fields
//! translate to target fields for one artifact type. [`resolve`] validates
//! it against the two provider schemas and compiles it into a
//! [`TransformPlan`] - pure, deterministic, no I/O. All mapping problems
//! surface here as [`ValidationError`], before any provider call is made.

mod transform;

pub use transform::{CompiledTransform, TransformOp, TransformRegistry};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{FieldError, ValidationError};
use crate::provider::{ArtifactType, Field};

/// One field translation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field id on the source side.
    pub source_id: String,
    /// Field id on the target side.
    pub target_id: String,
    /// Absent means direct copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<Transformation>,
}

/// A named, parameterized transformation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transformation {
    /// Static value-to-value table. An unmapped input is a field error
    /// unless `default` is set.
    ValueMap {
        table: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    /// String template with `{field_id}` placeholders resolved against the
    /// source artifact's fields.
    Concat { template: String },
    /// Date/time reformatting between chrono format strings.
    DateFormat { from: String, to: String },
    /// Externally registered hook, looked up by name at resolve time.
    Custom { name: String },
}

/// Field mappings plus default values for one artifact type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Source provider this mapping was authored for.
    pub source_provider_id: String,
    /// Target provider this mapping was authored for.
    pub target_provider_id: String,
    /// The artifact type this mapping covers.
    pub artifact_type: ArtifactType,
    /// Ordered translation rules. Order matters only for default-value
    /// application, never for dependencies between rules.
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    /// Target field values applied before the mapped fields.
    #[serde(default)]
    pub default_values: BTreeMap<String, Value>,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl MappingConfig {
    /// Name for error messages.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

/// An executable, validated transform plan for one artifact type.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPlan {
    /// The artifact type the plan applies to.
    pub artifact_type: ArtifactType,
    /// Compiled field transforms, in mapping order.
    pub steps: Vec<CompiledTransform>,
    /// Validated default values, applied before the steps.
    pub defaults: BTreeMap<String, Value>,
}

impl TransformPlan {
    /// Build the target field set for one artifact.
    ///
    /// Defaults first, then each step in order; a step writing a defaulted
    /// target field overwrites the default.
    pub fn apply(
        &self,
        artifact_id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, FieldError> {
        let mut out = self.defaults.clone();
        for step in &self.steps {
            let value = step.apply(artifact_id, fields)?;
            out.insert(step.target_id.clone(), value);
        }
        Ok(out)
    }
}

/// Validate a mapping against the source/target schemas and compile it.
///
/// Identical inputs always yield an identical plan or an identical error;
/// this function never touches the network.
pub fn resolve(
    mapping: &MappingConfig,
    source_schema: &[Field],
    target_schema: &[Field],
    registry: &TransformRegistry,
) -> Result<TransformPlan, ValidationError> {
    let source_ids: BTreeSet<&str> = source_schema.iter().map(|f| f.id.as_str()).collect();
    let target_fields: BTreeMap<&str, &Field> =
        target_schema.iter().map(|f| (f.id.as_str(), f)).collect();

    let mut mapped_targets = BTreeSet::new();
    for rule in &mapping.field_mappings {
        if !source_ids.contains(rule.source_id.as_str()) {
            return Err(ValidationError::UnknownSourceField(rule.source_id.clone()));
        }
        let target = target_fields
            .get(rule.target_id.as_str())
            .ok_or_else(|| ValidationError::UnknownTargetField(rule.target_id.clone()))?;
        if !mapped_targets.insert(rule.target_id.as_str()) {
            return Err(ValidationError::DuplicateTarget(rule.target_id.clone()));
        }

        match &rule.transformation {
            Some(Transformation::Custom { name }) if !registry.contains(name) => {
                return Err(ValidationError::UnknownTransformation(name.clone()));
            }
            Some(Transformation::ValueMap { table, default }) => {
                // Static output-domain check; other rule kinds defer to runtime.
                if let Some(allowed) = &target.allowed_values {
                    let outputs = table.values().chain(default.iter());
                    for value in outputs {
                        if !allowed.contains(value) {
                            return Err(ValidationError::ValueNotAllowed {
                                field: rule.target_id.clone(),
                                value: value.clone(),
                            });
                        }
                    }
                }
            }
            _ => {}
        }
    }

    for (target_id, value) in &mapping.default_values {
        let field = target_fields
            .get(target_id.as_str())
            .ok_or_else(|| ValidationError::UnknownTargetField(target_id.clone()))?;
        if let (Some(allowed), Value::String(s)) = (&field.allowed_values, value) {
            if !allowed.contains(s) {
                return Err(ValidationError::ValueNotAllowed {
                    field: target_id.clone(),
                    value: s.clone(),
                });
            }
        }
    }

    for field in target_schema {
        if field.required
            && !mapped_targets.contains(field.id.as_str())
            && !mapping.default_values.contains_key(&field.id)
        {
            return Err(ValidationError::MissingRequiredTarget(field.id.clone()));
        }
    }

    let steps = mapping
        .field_mappings
        .iter()
        .map(|rule| {
            let allowed = target_fields
                .get(rule.target_id.as_str())
                .and_then(|f| f.allowed_values.clone());
            transform::compile(rule, allowed, registry)
        })
        .collect();

    Ok(TransformPlan {
        artifact_type: mapping.artifact_type,
        steps,
        defaults: mapping.default_values.clone(),
    })
}
