//! JSON Schema (2020-12) validation with errors in the shared
//! [`ValidationError`] shape.
//!
//! The validator is non-strict: unknown keywords in a schema are ignored
//! rather than rejected. Format assertion is enabled so formats registered
//! with [`SchemaValidator::with_format`] are enforced.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use jsonschema::{Retrieve, Uri, Validator};
use serde_json::{Map, Value};

use crate::error::ServiceError;
use crate::types::ValidationError;

type FormatFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Keywords whose value maps names to subschemas.
const NAMED_SUBSCHEMA_KEYWORDS: &[&str] = &[
    "properties",
    "patternProperties",
    "$defs",
    "definitions",
    "dependentSchemas",
];

/// Keywords whose value is an array of subschemas.
const INDEXED_SUBSCHEMA_KEYWORDS: &[&str] = &["allOf", "anyOf", "oneOf", "prefixItems"];

/// Resolves `$ref` URIs against schemas registered on the validator.
struct LocalSchemaRetriever {
    schemas_by_uri: HashMap<String, Value>,
}

impl Retrieve for LocalSchemaRetriever {
    fn retrieve(
        &self,
        uri: &Uri<&str>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        self.schemas_by_uri
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| format!("schema {} is not registered", uri.as_str()).into())
    }
}

/// Builds compiled schemas with the registered extensions.
#[derive(Clone, Default)]
pub struct SchemaValidator {
    formats: Vec<(String, FormatFn)>,
    schemas: HashMap<String, Value>,
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field(
                "formats",
                &self.formats.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom `format`. Later registrations of the same name win.
    pub fn with_format<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.formats.push((name.into(), Arc::new(check)));
        self
    }

    /// Register a schema so `$ref`s to `uri` resolve locally.
    ///
    /// References are never fetched over the network. A `$ref` to a schema
    /// that was not registered fails to compile.
    pub fn with_schema(mut self, uri: impl Into<String>, schema: Value) -> Self {
        self.schemas.insert(uri.into(), schema);
        self
    }

    /// Compile `schema` for repeated validation.
    ///
    /// # Errors
    ///
    /// Returns a `SCHEMA_INVALID` [`ServiceError`] when the schema itself is
    /// malformed or references an unresolvable schema.
    pub fn compile(&self, schema: &Value) -> Result<CompiledSchema, ServiceError> {
        let mut opts = jsonschema::options();
        opts.with_draft(jsonschema::Draft::Draft202012);
        opts.should_validate_formats(true);

        for (name, check) in &self.formats {
            let check = Arc::clone(check);
            opts.with_format(name.clone(), move |value: &str| check(value));
        }

        let mut schemas_by_uri = self.schemas.clone();
        for value in self.schemas.values() {
            if let Some(id) = value.get("$id").and_then(Value::as_str) {
                schemas_by_uri.insert(id.to_string(), value.clone());
            }
        }
        opts.with_retriever(LocalSchemaRetriever { schemas_by_uri });

        let validator = opts.build(schema).map_err(|e| {
            let mut err = ServiceError::schema_invalid(e.to_string());
            if let Some(id) = schema.get("$id").and_then(Value::as_str) {
                err = err.with_context("schemaId", id);
            }
            err
        })?;

        Ok(CompiledSchema {
            validator: Arc::new(validator),
        })
    }

    /// Compile and validate in one step.
    ///
    /// # Errors
    ///
    /// See [`SchemaValidator::compile`].
    pub fn validate(
        &self,
        schema: &Value,
        document: &Value,
    ) -> Result<Vec<ValidationError>, ServiceError> {
        Ok(self.compile(schema)?.validate(document))
    }
}

/// A compiled schema, cheap to clone and shareable across threads.
#[derive(Clone)]
pub struct CompiledSchema {
    validator: Arc<Validator>,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}

impl CompiledSchema {
    /// Every violation found, translated one to one.
    pub fn validate(&self, document: &Value) -> Vec<ValidationError> {
        self.validator
            .iter_errors(document)
            .map(|e| ValidationError {
                keyword: keyword_from_schema_path(&e.schema_path.to_string()),
                instance_path: e.instance_path.to_string(),
                message: e.to_string(),
                params: params_for(&e.kind),
            })
            .collect()
    }

    pub fn is_valid(&self, document: &Value) -> bool {
        self.validator.is_valid(document)
    }
}

/// Name of the failing keyword given the error's schema location.
///
/// Walks the pointer tracking whether each segment is a keyword or the name or
/// index of a subschema. A path ending on a subschema name means the `false`
/// schema rejected the value.
fn keyword_from_schema_path(schema_path: &str) -> String {
    enum Next {
        Keyword,
        Subschema,
    }

    let mut keyword = "false";
    let mut next = Next::Keyword;
    for segment in schema_path.split('/').skip(1) {
        match next {
            Next::Keyword => {
                keyword = segment;
                if NAMED_SUBSCHEMA_KEYWORDS.contains(&segment)
                    || INDEXED_SUBSCHEMA_KEYWORDS.contains(&segment)
                {
                    next = Next::Subschema;
                }
            }
            Next::Subschema => {
                keyword = "false";
                next = Next::Keyword;
            }
        }
    }
    keyword.replace("~1", "/").replace("~0", "~")
}

fn params_for(kind: &ValidationErrorKind) -> Option<Map<String, Value>> {
    let (key, value) = match kind {
        ValidationErrorKind::Required { property } => ("missingProperty", property.clone()),
        ValidationErrorKind::AdditionalProperties { unexpected } => (
            "unexpected",
            Value::from(unexpected.iter().map(String::as_str).collect::<Vec<_>>()),
        ),
        ValidationErrorKind::Format { format } => ("format", Value::from(format.as_str())),
        ValidationErrorKind::Enum { options } => ("allowedValues", options.clone()),
        ValidationErrorKind::Constant { expected_value } => ("expected", expected_value.clone()),
        ValidationErrorKind::Pattern { pattern } => ("pattern", Value::from(pattern.as_str())),
        _ => return None,
    };
    let mut params = Map::new();
    params.insert(key.to_string(), value);
    Some(params)
}
