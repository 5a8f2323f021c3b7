//! Rules and rule sets.
//!
//! A [`RuleSet`] is an ordered list of schema rules and predicate rules that
//! describes one conformance scenario. Rule sets are immutable once built and
//! cheap to clone, so one set can be reused across many documents and tasks.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::ServiceError;
use crate::types::ValidationError;
use crate::validator::{CompiledSchema, SchemaValidator};

type SyncPredicate = dyn Fn(&Value) -> anyhow::Result<bool> + Send + Sync;
type AsyncPredicate = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync;

/// The check a predicate rule runs.
#[derive(Clone)]
pub enum Predicate {
    Sync(Arc<SyncPredicate>),
    /// Receives its own copy of the document so the future can outlive the
    /// borrow (for example when it is raced against a timeout).
    Async(Arc<AsyncPredicate>),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Sync(_) => f.write_str("Predicate::Sync"),
            Predicate::Async(_) => f.write_str("Predicate::Async"),
        }
    }
}

/// Validates a document, or a sub-document, against a JSON Schema.
#[derive(Debug, Clone)]
pub struct SchemaRule {
    schema: CompiledSchema,
    path: Option<String>,
}

impl SchemaRule {
    /// Compile `schema` with a default [`SchemaValidator`].
    ///
    /// # Errors
    ///
    /// Returns `SCHEMA_INVALID` when the schema does not compile.
    pub fn new(schema: &Value) -> Result<Self, ServiceError> {
        Self::with_validator(&SchemaValidator::new(), schema)
    }

    /// Compile `schema` with the extensions registered on `validator`.
    ///
    /// # Errors
    ///
    /// Returns `SCHEMA_INVALID` when the schema does not compile.
    pub fn with_validator(
        validator: &SchemaValidator,
        schema: &Value,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            schema: validator.compile(schema)?,
            path: None,
        })
    }

    pub fn from_compiled(schema: CompiledSchema) -> Self {
        Self { schema, path: None }
    }

    /// Validate only the value at the JSON Pointer `path`.
    ///
    /// A path without a leading `/` is read as relative to the document root.
    pub fn at_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = match path.as_str() {
            "" | "/" => None,
            p if p.starts_with('/') => Some(path),
            p => Some(format!("/{p}")),
        };
        self
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }
}

/// A named check contributing one fixed error when it fails.
#[derive(Debug, Clone)]
pub struct PredicateRule {
    keyword: String,
    instance_path: String,
    message: String,
    params: Option<Map<String, Value>>,
    predicate: Predicate,
}

impl PredicateRule {
    pub fn new<F>(
        keyword: impl Into<String>,
        instance_path: impl Into<String>,
        message: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self {
            keyword: keyword.into(),
            instance_path: instance_path.into(),
            message: message.into(),
            params: None,
            predicate: Predicate::Sync(Arc::new(predicate)),
        }
    }

    pub fn new_async<F, Fut>(
        keyword: impl Into<String>,
        instance_path: impl Into<String>,
        message: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let predicate = move |document: Value| -> BoxFuture<'static, anyhow::Result<bool>> {
            Box::pin(predicate(document))
        };
        Self {
            keyword: keyword.into(),
            instance_path: instance_path.into(),
            message: message.into(),
            params: None,
            predicate: Predicate::Async(Arc::new(predicate)),
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn instance_path(&self) -> &str {
        &self.instance_path
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// The error this rule contributes when its predicate returns `false`.
    pub fn failure(&self) -> ValidationError {
        ValidationError {
            keyword: self.keyword.clone(),
            instance_path: self.instance_path.clone(),
            message: self.message.clone(),
            params: self.params.clone(),
        }
    }
}

/// One entry of a rule set.
#[derive(Debug, Clone)]
pub enum Rule {
    Schema(SchemaRule),
    Predicate(PredicateRule),
}

impl From<SchemaRule> for Rule {
    fn from(rule: SchemaRule) -> Self {
        Rule::Schema(rule)
    }
}

impl From<PredicateRule> for Rule {
    fn from(rule: PredicateRule) -> Self {
        Rule::Predicate(rule)
    }
}

/// An immutable, ordered collection of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<Vec<Rule>>,
}

impl RuleSet {
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Schema rules in registration order.
    pub fn schema_rules(&self) -> impl Iterator<Item = &SchemaRule> {
        self.rules.iter().filter_map(|rule| match rule {
            Rule::Schema(rule) => Some(rule),
            Rule::Predicate(_) => None,
        })
    }

    /// Predicate rules in registration order.
    pub fn predicate_rules(&self) -> impl Iterator<Item = &PredicateRule> {
        self.rules.iter().filter_map(|rule| match rule {
            Rule::Predicate(rule) => Some(rule),
            Rule::Schema(_) => None,
        })
    }

    /// A new set holding this set's rules followed by `other`'s.
    pub fn extend(&self, other: &RuleSet) -> RuleSet {
        self.rules
            .iter()
            .chain(other.rules.iter())
            .cloned()
            .collect()
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self {
            rules: Arc::new(iter.into_iter().collect()),
        }
    }
}

/// Accumulates rules before freezing them into a [`RuleSet`].
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    rules: Vec<Rule>,
}

impl RuleSetBuilder {
    pub fn rule(mut self, rule: impl Into<Rule>) -> Self {
        self.rules.push(rule.into());
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn build(self) -> RuleSet {
        self.rules.into_iter().collect()
    }
}
