//! Core result types shared by every rule origin.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keyword for a predicate that failed (returned an error or panicked).
pub const PREDICATE_ERROR_KEYWORD: &str = "predicate-error";

/// Keyword for a predicate that exceeded the engine's timeout.
pub const PREDICATE_TIMEOUT_KEYWORD: &str = "predicate-timeout";

/// A single non-conformance found in a document.
///
/// Schema-originated and predicate-originated failures share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    /// Failing rule category (`required`, `type`, `predicate-error`, ...).
    pub keyword: String,
    /// JSON Pointer (RFC 6901) into the document; empty for document level.
    pub instance_path: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl ValidationError {
    pub fn new(
        keyword: impl Into<String>,
        instance_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            keyword: keyword.into(),
            instance_path: instance_path.into(),
            message: message.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.instance_path.is_empty() {
            "(root)"
        } else {
            &self.instance_path
        };
        write!(f, "{} [{}]: {}", path, self.keyword, self.message)
    }
}

/// Outcome of evaluating a rule set against one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    valid: bool,
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Build a result; `valid` is derived from `errors`.
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn valid() -> Self {
        Self::from_errors(Vec::new())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Errors in evaluation order.
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    /// Distinct failing keywords, in first-seen order.
    pub fn keywords(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for error in &self.errors {
            if !seen.contains(&error.keyword.as_str()) {
                seen.push(&error.keyword);
            }
        }
        seen
    }
}

impl<'de> Deserialize<'de> for ValidationResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            errors: Vec<ValidationError>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::from_errors(raw.errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_tracks_errors() {
        assert!(ValidationResult::valid().is_valid());

        let result = ValidationResult::from_errors(vec![ValidationError::new(
            "required",
            "",
            "\"id\" is a required property",
        )]);
        assert!(!result.is_valid());
        assert_eq!(result.errors().len(), 1);
    }

    #[test]
    fn error_serializes_camel_case_without_empty_params() {
        let err = ValidationError::new("type", "/boolean", "\"x\" is not of type \"boolean\"");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(
            value,
            json!({
                "keyword": "type",
                "instancePath": "/boolean",
                "message": "\"x\" is not of type \"boolean\""
            })
        );
    }

    #[test]
    fn deserialized_result_recomputes_valid() {
        let result: ValidationResult = serde_json::from_value(json!({
            "valid": true,
            "errors": [{ "keyword": "required", "instancePath": "", "message": "missing" }]
        }))
        .unwrap();
        assert!(!result.is_valid());
    }

    #[test]
    fn keywords_are_distinct_and_ordered() {
        let result = ValidationResult::from_errors(vec![
            ValidationError::new("type", "/a", "a"),
            ValidationError::new("required", "", "b"),
            ValidationError::new("type", "/c", "c"),
        ]);
        assert_eq!(result.keywords(), vec!["type", "required"]);
    }

    #[test]
    fn error_display() {
        let err = ValidationError::new("required", "", "\"id\" is a required property");
        assert_eq!(
            err.to_string(),
            "(root) [required]: \"id\" is a required property"
        );
    }
}
