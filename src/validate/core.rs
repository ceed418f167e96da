use crate::table::Route;
use anyhow::{anyhow, Context};
use jsonschema::JSONSchema;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, info};

/// One field-level validation failure in the structured 422 payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorRecord {
    /// Dotted path of the offending field, e.g. `metadata.createdDate`.
    pub key: String,
    /// The offending value, rendered as JSON text.
    pub value: String,
    pub message: String,
    /// Failing schema keyword, e.g. `required` or `maxLength`.
    pub code: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ErrorRecord {
    #[must_use]
    pub fn field_error(key: &str, value: &str, message: &str, code: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            message: message.to_string(),
            code: code.to_string(),
            kind: "validation_field_error".to_string(),
        }
    }
}

/// Wire shape of the 422 response body.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ErrorCollection {
    pub errors: Vec<ErrorRecord>,
    pub total_records: usize,
}

impl ErrorCollection {
    #[must_use]
    pub fn new(errors: Vec<ErrorRecord>) -> Self {
        let total_records = errors.len();
        Self {
            errors,
            total_records,
        }
    }

    #[must_use]
    pub fn single(key: &str, value: &str, message: &str) -> Self {
        Self::new(vec![ErrorRecord::field_error(key, value, message, "")])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"errors":[],"total_records":0}"#.into())
    }
}

/// Result of checking one request entity.
#[derive(Debug)]
pub enum CheckOutcome {
    Clean,
    Invalid(ErrorCollection),
}

impl CheckOutcome {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, CheckOutcome::Clean)
    }
}

struct EntityRules {
    compiled: JSONSchema,
    /// Property paths declared `readOnly: true`, as dotted-path segments.
    read_only: Vec<Vec<String>>,
}

/// Compiled validation rules, keyed by handler name. Built once from the
/// route table; shared read-only across requests.
pub struct ValidationEngine {
    rules: HashMap<String, EntityRules>,
}

impl ValidationEngine {
    /// Compile every route's entity schema. A schema that fails to compile
    /// is a table defect and aborts engine construction.
    pub fn from_routes(routes: &[Route]) -> anyhow::Result<Self> {
        let mut rules = HashMap::new();
        for route in routes {
            let Some(schema) = &route.entity_schema else {
                continue;
            };
            let compiled = JSONSchema::compile(schema)
                .map_err(|e| anyhow!("{e}"))
                .with_context(|| {
                    format!("invalid entity schema for handler {}", route.handler_name)
                })?;
            let mut read_only = Vec::new();
            collect_read_only(schema, &mut Vec::new(), &mut read_only);
            rules.insert(
                route.handler_name.clone(),
                EntityRules {
                    compiled,
                    read_only,
                },
            );
        }
        info!(schemas = rules.len(), "entity schemas compiled");
        Ok(Self { rules })
    }

    #[must_use]
    pub fn has_schema(&self, handler_name: &str) -> bool {
        self.rules.contains_key(handler_name)
    }

    /// Validate `entity` against the handler's schema.
    ///
    /// Client-supplied read-only fields are repaired, not reported: the
    /// field is removed and the entity re-encoded so the handler never sees
    /// the forged value. Remaining failures are filtered by
    /// `validate_fields` (empty slice means report all) and returned as the
    /// structured collection.
    pub fn check(
        &self,
        handler_name: &str,
        entity: &mut Value,
        validate_fields: &[String],
    ) -> CheckOutcome {
        let Some(rules) = self.rules.get(handler_name) else {
            return CheckOutcome::Clean;
        };
        let mut stripped = false;
        for path in &rules.read_only {
            if field_present(entity, path) {
                debug!(
                    handler_name,
                    field = %path.join("."),
                    "stripping client-supplied read-only field"
                );
                remove_field(entity, path);
                stripped = true;
            }
        }
        if stripped {
            redecode(entity, handler_name);
        }
        let reported: Vec<ErrorRecord> = collect_errors(&rules.compiled, entity)
            .into_iter()
            .filter(|e| {
                validate_fields.is_empty() || validate_fields.iter().any(|f| f == &e.record.key)
            })
            .map(|e| e.record)
            .collect();
        if reported.is_empty() {
            CheckOutcome::Clean
        } else {
            CheckOutcome::Invalid(ErrorCollection::new(reported))
        }
    }
}

/// True if any instance of the dotted path exists in the entity. Arrays
/// are transparent: the remaining segments apply to every element.
fn field_present(entity: &Value, segments: &[String]) -> bool {
    let Some((seg, rest)) = segments.split_first() else {
        return true;
    };
    match entity {
        Value::Array(items) => items.iter().any(|item| field_present(item, segments)),
        Value::Object(obj) => obj
            .get(seg.as_str())
            .is_some_and(|next| field_present(next, rest)),
        _ => false,
    }
}

struct RawError {
    record: ErrorRecord,
    /// Instance path split into segments, array indices dropped.
    segments: Vec<String>,
}

fn collect_errors(compiled: &JSONSchema, entity: &Value) -> Vec<RawError> {
    match compiled.validate(entity) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|e| {
                let pointer = e.instance_path.to_string();
                let segments: Vec<String> = pointer
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .filter(|s| !s.chars().all(|c| c.is_ascii_digit()))
                    .map(|s| s.to_string())
                    .collect();
                let key = segments.join(".");
                let code = e
                    .schema_path
                    .to_string()
                    .rsplit('/')
                    .next()
                    .unwrap_or("")
                    .to_string();
                let value = e.instance.to_string();
                RawError {
                    record: ErrorRecord::field_error(&key, &value, &e.to_string(), &code),
                    segments,
                }
            })
            .collect(),
    }
}

/// Walk `properties` blocks recursively, recording every path that declares
/// `readOnly: true`.
fn collect_read_only(schema: &Value, path: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (name, sub) in props {
        path.push(name.clone());
        if sub.get("readOnly") == Some(&Value::Bool(true)) {
            out.push(path.clone());
        }
        collect_read_only(sub, path, out);
        if let Some(items) = sub.get("items") {
            collect_read_only(items, path, out);
        }
        path.pop();
    }
}

/// Remove every instance of a dotted path from the entity. Arrays are
/// transparent, matching [`field_present`]: the path is removed from each
/// element.
fn remove_field(entity: &mut Value, segments: &[String]) {
    let Some((seg, rest)) = segments.split_first() else {
        return;
    };
    match entity {
        Value::Array(items) => {
            for item in items {
                remove_field(item, segments);
            }
        }
        Value::Object(obj) => {
            if rest.is_empty() {
                obj.remove(seg.as_str());
            } else if let Some(next) = obj.get_mut(seg.as_str()) {
                remove_field(next, rest);
            }
        }
        _ => {}
    }
}

/// Re-encode the sanitized entity through a serialize/deserialize round
/// trip so downstream consumers see exactly what the wire would carry.
/// Failure is logged and the in-memory form is kept.
fn redecode(entity: &mut Value, handler_name: &str) {
    match serde_json::to_string(entity).and_then(|s| serde_json::from_str(&s)) {
        Ok(decoded) => *entity = decoded,
        Err(e) => error!(handler_name, error = %e, "sanitized entity failed to re-decode"),
    }
}
