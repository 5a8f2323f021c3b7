//! W3C DID Core structural conformance.
//!
//! A fixed [`RuleSet`] evaluated through the [`RuleEngine`]: one schema rule
//! for document shape plus predicates for the constraints a schema cannot
//! express (unique ids, key material, reference resolution).
//!
//! See <https://www.w3.org/TR/did-core/#core-properties>.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::engine::RuleEngine;
use crate::error::ServiceError;
use crate::rule::{PredicateRule, Rule, RuleSet, SchemaRule};
use crate::types::ValidationResult;
use crate::validator::SchemaValidator;

/// Version of the rule set below. Bumped whenever a rule changes.
pub const DID_CORE_RULESET_VERSION: &str = "1.1.0";

/// Contexts accepted as the first `@context` entry.
pub const DID_CONTEXTS: &[&str] = &[
    "https://www.w3.org/ns/did/v1",
    "https://www.w3.org/ns/did/v1.1",
];

/// Properties whose entries reference or embed verification methods.
pub const VERIFICATION_RELATIONSHIPS: &[&str] = &[
    "authentication",
    "assertionMethod",
    "keyAgreement",
    "capabilityInvocation",
    "capabilityDelegation",
];

const DID_PATTERN: &str =
    r"did:[a-z0-9]+:(?:(?:[A-Za-z0-9._-]|%[0-9A-Fa-f]{2})*:)*(?:[A-Za-z0-9._-]|%[0-9A-Fa-f]{2})+";

static DID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{DID_PATTERN}$")).expect("should compile"));

static DID_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^{DID_PATTERN}(?:/[^?#\s]*)?(?:\?[^#\s]*)?(?:#\S*)?$"))
        .expect("should compile")
});

static RELATIVE_DID_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:/[^?#\s]*)?(?:\?[^#\s]*)?#\S+$").expect("should compile"));

/// Whether `value` is a syntactically valid DID.
pub fn is_did(value: &str) -> bool {
    DID_REGEX.is_match(value)
}

/// Whether `value` is a valid absolute DID URL.
pub fn is_did_url(value: &str) -> bool {
    DID_URL_REGEX.is_match(value)
}

/// Whether `value` is an absolute DID URL or a relative reference such as
/// `#key-1`.
pub fn is_did_url_reference(value: &str) -> bool {
    is_did_url(value) || RELATIVE_DID_URL_REGEX.is_match(value)
}

/// Register the `did`, `did-url` and `did-url-reference` formats.
///
/// Credential schemas can use these formats when compiled with the returned
/// validator.
pub fn with_did_formats(validator: SchemaValidator) -> SchemaValidator {
    validator
        .with_format("did", is_did)
        .with_format("did-url", is_did_url)
        .with_format("did-url-reference", is_did_url_reference)
}

/// Resolve a possibly relative DID URL against the document's `id`.
pub fn resolve_reference(base: &str, reference: &str) -> String {
    if reference.starts_with('#') || reference.starts_with('?') || reference.starts_with('/') {
        format!("{base}{reference}")
    } else {
        reference.to_string()
    }
}

/// Schema for the structural shape of a DID document.
fn document_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": ["@context", "id"],
        "properties": {
            "@context": {
                "anyOf": [
                    { "type": "string" },
                    {
                        "type": "array",
                        "minItems": 1,
                        "items": { "type": ["string", "object"] }
                    }
                ]
            },
            "id": { "$ref": "#/$defs/did" },
            "controller": {
                "anyOf": [
                    { "$ref": "#/$defs/did" },
                    { "type": "array", "items": { "$ref": "#/$defs/did" } }
                ]
            },
            "alsoKnownAs": {
                "type": "array",
                "items": { "type": "string", "format": "uri" }
            },
            "verificationMethod": {
                "type": "array",
                "items": { "$ref": "#/$defs/verificationMethod" }
            },
            "authentication": { "$ref": "#/$defs/relationship" },
            "assertionMethod": { "$ref": "#/$defs/relationship" },
            "keyAgreement": { "$ref": "#/$defs/relationship" },
            "capabilityInvocation": { "$ref": "#/$defs/relationship" },
            "capabilityDelegation": { "$ref": "#/$defs/relationship" },
            "service": {
                "type": "array",
                "items": { "$ref": "#/$defs/service" }
            }
        },
        "$defs": {
            "did": { "type": "string", "format": "did" },
            "verificationMethod": {
                "type": "object",
                "required": ["id", "type", "controller"],
                "properties": {
                    "id": { "type": "string", "format": "did-url-reference" },
                    "type": { "type": "string", "minLength": 1 },
                    "controller": { "$ref": "#/$defs/did" },
                    "publicKeyJwk": { "type": "object", "required": ["kty"] },
                    "publicKeyMultibase": { "type": "string", "minLength": 2 }
                }
            },
            "relationship": {
                "type": "array",
                "items": {
                    "anyOf": [
                        { "type": "string", "format": "did-url-reference" },
                        { "$ref": "#/$defs/verificationMethod" }
                    ]
                }
            },
            "service": {
                "type": "object",
                "required": ["id", "type", "serviceEndpoint"],
                "properties": {
                    "id": { "type": "string", "format": "uri-reference" },
                    "type": {
                        "anyOf": [
                            { "type": "string" },
                            { "type": "array", "items": { "type": "string" }, "minItems": 1 }
                        ]
                    },
                    "serviceEndpoint": { "type": ["string", "object", "array"] }
                }
            }
        }
    })
}

fn document_id(document: &Value) -> &str {
    document.get("id").and_then(Value::as_str).unwrap_or_default()
}

/// Every verification method in the document, listed or embedded.
fn verification_methods(document: &Value) -> impl Iterator<Item = &Value> {
    let listed = document
        .get("verificationMethod")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    let embedded = VERIFICATION_RELATIONSHIPS
        .iter()
        .filter_map(|name| document.get(*name).and_then(Value::as_array))
        .flatten()
        .filter(|entry| entry.is_object());
    listed.chain(embedded).filter(|vm| vm.is_object())
}

fn context_is_did_core(document: &Value) -> anyhow::Result<bool> {
    let first = match document.get("@context") {
        None => return Ok(true),
        Some(Value::Array(entries)) => entries.first(),
        Some(other) => Some(other),
    };
    Ok(first
        .and_then(Value::as_str)
        .is_some_and(|context| DID_CONTEXTS.contains(&context)))
}

fn verification_method_ids_unique(document: &Value) -> anyhow::Result<bool> {
    let base = document_id(document);
    let mut seen = HashSet::new();
    Ok(verification_methods(document)
        .filter_map(|vm| vm.get("id").and_then(Value::as_str))
        .all(|id| seen.insert(resolve_reference(base, id))))
}

/// Methods such as `blockchainAccountId` carry neither key property, so only
/// both at once is rejected.
fn key_material_exclusive(document: &Value) -> anyhow::Result<bool> {
    Ok(verification_methods(document).all(|vm| {
        !(vm.get("publicKeyJwk").is_some() && vm.get("publicKeyMultibase").is_some())
    }))
}

fn references_resolve(document: &Value, relationship: &str) -> anyhow::Result<bool> {
    let Some(entries) = document.get(relationship).and_then(Value::as_array) else {
        return Ok(true);
    };
    let base = document_id(document);
    let known: HashSet<String> = verification_methods(document)
        .filter_map(|vm| vm.get("id").and_then(Value::as_str))
        .map(|id| resolve_reference(base, id))
        .collect();
    Ok(entries
        .iter()
        .filter_map(Value::as_str)
        .all(|reference| known.contains(&resolve_reference(base, reference))))
}

fn service_ids_unique(document: &Value) -> anyhow::Result<bool> {
    let base = document_id(document);
    let mut seen = HashSet::new();
    Ok(document
        .get("service")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|service| service.get("id").and_then(Value::as_str))
        .all(|id| seen.insert(resolve_reference(base, id))))
}

/// Build the DID Core rule set.
///
/// # Errors
///
/// Returns `SCHEMA_INVALID` if the embedded document schema fails to compile.
pub fn did_core_rule_set() -> Result<RuleSet, ServiceError> {
    let validator = with_did_formats(SchemaValidator::new());
    let schema = SchemaRule::with_validator(&validator, &document_schema())?;

    let mut rules: Vec<Rule> = vec![
        schema.into(),
        PredicateRule::new(
            "didContext",
            "/@context",
            format!("first @context entry must be one of {}", DID_CONTEXTS.join(", ")),
            context_is_did_core,
        )
        .into(),
        PredicateRule::new(
            "uniqueVerificationMethodId",
            "/verificationMethod",
            "verification method ids must be unique",
            verification_method_ids_unique,
        )
        .into(),
        PredicateRule::new(
            "keyMaterial",
            "/verificationMethod",
            "a verification method must not carry both publicKeyJwk and publicKeyMultibase",
            key_material_exclusive,
        )
        .into(),
    ];

    for relationship in VERIFICATION_RELATIONSHIPS {
        rules.push(
            PredicateRule::new(
                "verificationMethodReference",
                format!("/{relationship}"),
                format!("every {relationship} reference must resolve to a verification method"),
                move |document: &Value| references_resolve(document, relationship),
            )
            .into(),
        );
    }

    rules.push(
        PredicateRule::new(
            "uniqueServiceId",
            "/service",
            "service ids must be unique",
            service_ids_unique,
        )
        .into(),
    );

    Ok(RuleSet::builder().rules(rules).build())
}

/// Named entry point for "is this a valid DID document".
#[derive(Debug, Clone)]
pub struct DidDocumentChecker {
    engine: RuleEngine,
    rules: RuleSet,
}

impl DidDocumentChecker {
    /// # Errors
    ///
    /// See [`did_core_rule_set`].
    pub fn new() -> Result<Self, ServiceError> {
        Self::with_engine(RuleEngine::new())
    }

    /// # Errors
    ///
    /// See [`did_core_rule_set`].
    pub fn with_engine(engine: RuleEngine) -> Result<Self, ServiceError> {
        Ok(Self {
            engine,
            rules: did_core_rule_set()?,
        })
    }

    pub fn version(&self) -> &'static str {
        DID_CORE_RULESET_VERSION
    }

    /// The fixed rule set, for composing with other rules.
    pub fn rule_set(&self) -> &RuleSet {
        &self.rules
    }

    pub async fn check(&self, document: &Value) -> ValidationResult {
        self.engine.evaluate(document, &self.rules).await
    }
}
