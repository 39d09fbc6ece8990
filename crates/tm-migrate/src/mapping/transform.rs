//! Compiled field transforms.
//!
//! Each [`CompiledTransform`] applies one resolved mapping rule to one
//! source value. Transforms are pure: re-applying the same step to the
//! same input always yields the same result.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FieldMapping, Transformation};
use crate::error::FieldError;

/// Signature of an externally registered transform hook.
pub type HookFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// Named custom transforms, registered by external code before resolution.
///
/// Unknown names are rejected at resolve time, never at apply time.
#[derive(Default, Clone)]
pub struct TransformRegistry {
    hooks: BTreeMap<String, Arc<HookFn>>,
}

impl TransformRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook under a name, replacing any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(hook));
    }

    /// Whether a hook with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Arc<HookFn>> {
        self.hooks.get(name).cloned()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The operation a compiled step performs.
#[derive(Clone)]
pub enum TransformOp {
    /// Direct copy of the source value.
    Copy,
    /// Static value-to-value table.
    ValueMap {
        table: BTreeMap<String, String>,
        default: Option<String>,
    },
    /// Template with `{field_id}` placeholders.
    Concat { template: String },
    /// Date/time reformatting.
    DateFormat { from: String, to: String },
    /// Registered hook.
    Custom { name: String, hook: Arc<HookFn> },
}

impl std::fmt::Debug for TransformOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformOp::Copy => write!(f, "Copy"),
            TransformOp::ValueMap { table, default } => f
                .debug_struct("ValueMap")
                .field("table", table)
                .field("default", default)
                .finish(),
            TransformOp::Concat { template } => {
                f.debug_struct("Concat").field("template", template).finish()
            }
            TransformOp::DateFormat { from, to } => f
                .debug_struct("DateFormat")
                .field("from", from)
                .field("to", to)
                .finish(),
            TransformOp::Custom { name, .. } => {
                f.debug_struct("Custom").field("name", name).finish()
            }
        }
    }
}

impl PartialEq for TransformOp {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TransformOp::Copy, TransformOp::Copy) => true,
            (
                TransformOp::ValueMap { table: a, default: da },
                TransformOp::ValueMap { table: b, default: db },
            ) => a == b && da == db,
            (TransformOp::Concat { template: a }, TransformOp::Concat { template: b }) => a == b,
            (
                TransformOp::DateFormat { from: af, to: at },
                TransformOp::DateFormat { from: bf, to: bt },
            ) => af == bf && at == bt,
            // Hooks compare by registered name
            (TransformOp::Custom { name: a, .. }, TransformOp::Custom { name: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// One resolved mapping rule, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTransform {
    /// Field read from the source artifact.
    pub source_id: String,
    /// Field written on the target artifact.
    pub target_id: String,
    /// The operation to perform.
    pub op: TransformOp,
    /// Closed value domain of the target field, enforced at apply time
    /// for rules whose output domain cannot be checked statically.
    pub allowed_values: Option<Vec<String>>,
}

/// Compile one validated rule. The caller has already checked that a
/// custom hook name resolves, so the registry lookup here cannot miss.
pub(super) fn compile(
    rule: &FieldMapping,
    allowed_values: Option<Vec<String>>,
    registry: &TransformRegistry,
) -> CompiledTransform {
    let op = match &rule.transformation {
        None => TransformOp::Copy,
        Some(Transformation::ValueMap { table, default }) => TransformOp::ValueMap {
            table: table.clone(),
            default: default.clone(),
        },
        Some(Transformation::Concat { template }) => TransformOp::Concat {
            template: template.clone(),
        },
        Some(Transformation::DateFormat { from, to }) => TransformOp::DateFormat {
            from: from.clone(),
            to: to.clone(),
        },
        Some(Transformation::Custom { name }) => TransformOp::Custom {
            name: name.clone(),
            hook: registry
                .get(name)
                .unwrap_or_else(|| Arc::new(|v: &Value| Ok(v.clone()))),
        },
    };

    CompiledTransform {
        source_id: rule.source_id.clone(),
        target_id: rule.target_id.clone(),
        op,
        allowed_values,
    }
}

impl CompiledTransform {
    /// Apply this step to one artifact's source fields.
    pub fn apply(
        &self,
        artifact_id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Result<Value, FieldError> {
        let out = self.evaluate(artifact_id, fields)?;
        if let (Some(allowed), Value::String(s)) = (&self.allowed_values, &out) {
            if !allowed.contains(s) {
                return Err(self.error(
                    artifact_id,
                    out.clone(),
                    format!("value '{}' is not allowed for the target field", s),
                ));
            }
        }
        Ok(out)
    }

    fn evaluate(
        &self,
        artifact_id: &str,
        fields: &BTreeMap<String, Value>,
    ) -> Result<Value, FieldError> {
        let input = fields.get(&self.source_id).cloned().unwrap_or(Value::Null);

        match &self.op {
            TransformOp::Copy => Ok(input),
            TransformOp::ValueMap { table, default } => {
                let key = scalar_key(&input);
                let mapped = key.as_deref().and_then(|k| table.get(k));
                match mapped.or(default.as_ref()) {
                    Some(out) => Ok(Value::String(out.clone())),
                    None => Err(self.error(
                        artifact_id,
                        input.clone(),
                        format!("no table entry for value {}", render(&input)),
                    )),
                }
            }
            TransformOp::Concat { template } => {
                expand_template(template, fields).map(Value::String).map_err(
                    |reason| self.error(artifact_id, input.clone(), reason),
                )
            }
            TransformOp::DateFormat { from, to } => {
                let text = match &input {
                    Value::String(s) => s.as_str(),
                    other => {
                        return Err(self.error(
                            artifact_id,
                            other.clone(),
                            "date input is not a string".to_string(),
                        ))
                    }
                };
                reformat_date(text, from, to)
                    .map(Value::String)
                    .map_err(|reason| self.error(artifact_id, input.clone(), reason))
            }
            TransformOp::Custom { hook, .. } => hook(&input)
                .map_err(|reason| self.error(artifact_id, input.clone(), reason)),
        }
    }

    fn error(&self, artifact_id: &str, value: Value, reason: String) -> FieldError {
        FieldError {
            artifact_id: artifact_id.to_string(),
            source_id: self.source_id.clone(),
            target_id: self.target_id.clone(),
            value,
            reason,
        }
    }
}

/// String key for value-map lookup. Objects and arrays have no scalar key.
fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Render a value for template substitution and error messages.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Expand `{field_id}` placeholders against the source fields. Missing
/// fields render empty; `{{` and `}}` escape literal braces.
fn expand_template(
    template: &str,
    fields: &BTreeMap<String, Value>,
) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut id = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => id.push(c),
                        None => return Err(format!("unclosed placeholder in template '{}'", template)),
                    }
                }
                let value = fields.get(&id).cloned().unwrap_or(Value::Null);
                out.push_str(&render(&value));
            }
            c => out.push(c),
        }
    }

    Ok(out)
}

/// Reparse `text` with the `from` format and render it with `to`.
fn reformat_date(text: &str, from: &str, to: &str) -> Result<String, String> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, from) {
        return Ok(dt.format(to).to_string());
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, from) {
        return Ok(d.format(to).to_string());
    }
    Err(format!("'{}' does not match date format '{}'", text, from))
}
