//! Credential Conformance
//!
//! Conformance validation and identity resolution for verifiable credentials
//! and their supporting documents.
//!
//! Documents are checked against a [`RuleSet`]: JSON Schema rules (draft
//! 2020-12, with custom formats) and programmatic predicate rules, evaluated
//! by a [`RuleEngine`] into one [`ValidationResult`]. A document that breaks
//! rules is not an error; only operational failures (unreadable schemas,
//! missing configuration, unreachable resolvers) surface as [`ServiceError`].
//!
//! # Example
//!
//! ```
//! use credential_conformance::{RuleEngine, RuleSet, SchemaRule};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "required": ["string"],
//!     "properties": {
//!         "string": { "type": "string" },
//!         "boolean": { "type": "boolean" }
//!     }
//! });
//!
//! let rules = RuleSet::builder()
//!     .rule(SchemaRule::new(&schema).unwrap())
//!     .build();
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let result = runtime.block_on(RuleEngine::new().evaluate(&json!({ "boolean": true }), &rules));
//!
//! assert!(!result.is_valid());
//! assert_eq!(result.errors()[0].keyword, "required");
//! assert_eq!(result.errors()[0].instance_path, "");
//! ```
//!
//! # Rule kinds
//!
//! | Rule | Evaluated | Failure keyword |
//! |------|-----------|-----------------|
//! | [`SchemaRule`] | first, in order | the schema keyword (`required`, `format`, ...) |
//! | [`PredicateRule`] | after schema rules, in order | the rule's own keyword |
//! | predicate that errors or panics | | `predicate-error` |
//! | async predicate past its timeout | | `predicate-timeout` |
//!
//! # Identity resolution
//!
//! A [`StrategyRegistry`] maps provider types to
//! [`IdentityProviderStrategy`] implementations. The built-in GS1 strategy
//! turns GTIN codes into GS1 Digital Link URLs:
//!
//! ```
//! use credential_conformance::StrategyRegistry;
//!
//! let registry = StrategyRegistry::default();
//! let gs1 = registry.strategy("gs1");
//! assert_eq!(
//!     gs1.dlr_url("09359502000010", "https://id.example.org").as_deref(),
//!     Some("https://id.example.org/01/09359502000010")
//! );
//! assert_eq!(gs1.dlr_url("not-a-gtin", "https://id.example.org"), None);
//! ```

mod config;
mod correlation;
mod did;
mod engine;
mod error;
mod identity;
mod loader;
pub mod logging;
mod orchestrator;
mod rule;
mod types;
mod validator;

pub use config::{
    default_config_path, merge_json, Config, Generator, RuleConfig, Scenario, CONFIG_PATH_ENV,
    DEFAULT_CONFIG_PATH,
};
pub use correlation::{
    correlation_id, new_correlation_id, run_with_correlation_id, set_correlation_id,
    sync_run_with_correlation_id,
};
pub use did::{
    did_core_rule_set, is_did, is_did_url, is_did_url_reference, resolve_reference,
    with_did_formats, DidDocumentChecker, DID_CONTEXTS, DID_CORE_RULESET_VERSION,
    VERIFICATION_RELATIONSHIPS,
};
pub use engine::RuleEngine;
pub use error::{ConfigError, ErrorCode, LoadError, ServiceError};
pub use identity::{
    gtin_check_digit, parse_element_string, Gs1Strategy, IdentityProviderStrategy,
    StrategyRegistry, GS1_PROVIDER, PROVIDER_URL_ENV,
};
pub use loader::{
    is_url, load_json, load_json_auto, load_json_str, navigate_fragment, resolve_path,
    resolve_source, write_json,
};
pub use orchestrator::{Orchestrator, RunOptions, RunReport, ScenarioOutcome, ScenarioReport};
pub use rule::{Predicate, PredicateRule, Rule, RuleSet, RuleSetBuilder, SchemaRule};
pub use types::{
    ValidationError, ValidationResult, PREDICATE_ERROR_KEYWORD, PREDICATE_TIMEOUT_KEYWORD,
};
pub use validator::{CompiledSchema, SchemaValidator};

#[cfg(feature = "remote")]
pub use identity::{LinkResolver, ResolvedLink};
#[cfg(feature = "remote")]
pub use loader::load_json_url;
