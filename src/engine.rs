//! Combined rule evaluation.
//!
//! Schema rules run first, then predicate rules, each group in registration
//! order. A failing predicate (an `Err` or a panic) is recorded as a
//! `predicate-error` and evaluation moves on to the next rule, so one pass
//! reports every violation.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde_json::{Map, Value};

use crate::rule::{Predicate, PredicateRule, RuleSet, SchemaRule};
use crate::types::{
    ValidationError, ValidationResult, PREDICATE_ERROR_KEYWORD, PREDICATE_TIMEOUT_KEYWORD,
};

/// Evaluates rule sets against documents.
///
/// Holds no per-document state; one engine can serve concurrent evaluations.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    predicate_timeout: Option<Duration>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the time any asynchronous predicate may take.
    ///
    /// Synchronous predicates run to completion on the calling task.
    pub fn with_predicate_timeout(mut self, timeout: Duration) -> Self {
        self.predicate_timeout = Some(timeout);
        self
    }

    pub fn predicate_timeout(&self) -> Option<Duration> {
        self.predicate_timeout
    }

    /// Evaluate `rules` against `document`.
    ///
    /// An empty rule set yields a valid result.
    #[tracing::instrument(level = "debug", skip_all, fields(rules = rules.len()))]
    pub async fn evaluate(&self, document: &Value, rules: &RuleSet) -> ValidationResult {
        let mut errors = Vec::new();

        for rule in rules.schema_rules() {
            evaluate_schema_rule(rule, document, &mut errors);
        }

        for rule in rules.predicate_rules() {
            if let Some(error) = self.evaluate_predicate(rule, document).await {
                errors.push(error);
            }
        }

        tracing::debug!(errors = errors.len(), "evaluation complete");
        ValidationResult::from_errors(errors)
    }

    /// Evaluate several documents concurrently. Results keep input order.
    pub async fn evaluate_many(
        &self,
        documents: &[Value],
        rules: &RuleSet,
    ) -> Vec<ValidationResult> {
        join_all(documents.iter().map(|document| self.evaluate(document, rules))).await
    }

    async fn evaluate_predicate(
        &self,
        rule: &PredicateRule,
        document: &Value,
    ) -> Option<ValidationError> {
        let outcome = match rule.predicate() {
            Predicate::Sync(check) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| check(document)))
                    .map_err(|payload| panic_message(payload.as_ref()))
            }
            Predicate::Async(check) => {
                let future = AssertUnwindSafe(check(document.clone())).catch_unwind();
                let caught = match self.predicate_timeout {
                    Some(limit) => match tokio::time::timeout(limit, future).await {
                        Ok(caught) => caught,
                        Err(_) => {
                            tracing::warn!(rule = rule.keyword(), ?limit, "predicate timed out");
                            return Some(timeout_error(rule, limit));
                        }
                    },
                    None => future.await,
                };
                caught.map_err(|payload| panic_message(payload.as_ref()))
            }
        };

        match outcome {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => {
                tracing::debug!(rule = rule.keyword(), "predicate rejected document");
                Some(rule.failure())
            }
            Ok(Err(err)) => {
                tracing::warn!(rule = rule.keyword(), error = %err, "predicate failed");
                Some(predicate_error(rule, &format!("{err:#}")))
            }
            Err(message) => {
                tracing::warn!(rule = rule.keyword(), %message, "predicate panicked");
                Some(predicate_error(rule, &message))
            }
        }
    }
}

fn evaluate_schema_rule(rule: &SchemaRule, document: &Value, errors: &mut Vec<ValidationError>) {
    let Some(path) = rule.path() else {
        errors.extend(rule.schema().validate(document));
        return;
    };

    match document.pointer(path) {
        Some(target) => errors.extend(rule.schema().validate(target).into_iter().map(|mut e| {
            e.instance_path = format!("{path}{}", e.instance_path);
            e
        })),
        None => errors.push(missing_path_error(document, path)),
    }
}

/// A `required` error for a sub-path absent from the document, reported at
/// the deepest ancestor that exists and naming the first missing segment.
fn missing_path_error(document: &Value, path: &str) -> ValidationError {
    let mut parent = String::new();
    let mut missing = "";
    for segment in path.split('/').skip(1) {
        let candidate = format!("{parent}/{segment}");
        if document.pointer(&candidate).is_none() {
            missing = segment;
            break;
        }
        parent = candidate;
    }

    let name = missing.replace("~1", "/").replace("~0", "~");
    let mut params = Map::new();
    params.insert("missingProperty".to_string(), Value::from(name.as_str()));
    ValidationError::new(
        "required",
        parent,
        format!("\"{name}\" is a required property"),
    )
    .with_params(params)
}

fn predicate_error(rule: &PredicateRule, message: &str) -> ValidationError {
    let mut params = Map::new();
    params.insert("rule".to_string(), Value::from(rule.keyword()));
    ValidationError::new(
        PREDICATE_ERROR_KEYWORD,
        rule.instance_path(),
        format!("{}: {message}", rule.keyword()),
    )
    .with_params(params)
}

fn timeout_error(rule: &PredicateRule, limit: Duration) -> ValidationError {
    let mut params = Map::new();
    params.insert("rule".to_string(), Value::from(rule.keyword()));
    params.insert(
        "timeoutMs".to_string(),
        Value::from(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)),
    );
    ValidationError::new(
        PREDICATE_TIMEOUT_KEYWORD,
        rule.instance_path(),
        format!("{}: did not complete within {limit:?}", rule.keyword()),
    )
    .with_params(params)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "predicate panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn always(result: bool, keyword: &str) -> PredicateRule {
        PredicateRule::new(keyword, "", format!("{keyword} failed"), move |_| Ok(result))
    }

    #[tokio::test]
    async fn empty_rule_set_is_valid() {
        let result = RuleEngine::new()
            .evaluate(&json!({ "anything": 1 }), &RuleSet::empty())
            .await;
        assert!(result.is_valid());
        assert!(result.errors().is_empty());
    }

    #[tokio::test]
    async fn schema_errors_precede_predicate_errors() {
        let rules = RuleSet::builder()
            .rule(always(false, "custom"))
            .rule(SchemaRule::new(&json!({ "type": "object", "required": ["id"] })).unwrap())
            .build();

        let result = RuleEngine::new().evaluate(&json!({}), &rules).await;
        let keywords: Vec<_> = result.errors().iter().map(|e| e.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["required", "custom"]);
    }

    #[tokio::test]
    async fn failing_predicate_does_not_stop_evaluation() {
        let rules = RuleSet::builder()
            .rule(PredicateRule::new("explodes", "/a", "never shown", |_| {
                anyhow::bail!("lookup failed")
            }))
            .rule(always(false, "after"))
            .build();

        let result = RuleEngine::new().evaluate(&json!({}), &rules).await;
        assert_eq!(result.errors().len(), 2);
        assert_eq!(result.errors()[0].keyword, PREDICATE_ERROR_KEYWORD);
        assert_eq!(result.errors()[0].instance_path, "/a");
        assert_eq!(result.errors()[0].message, "explodes: lookup failed");
        assert_eq!(result.errors()[1].keyword, "after");
    }

    #[tokio::test]
    async fn panicking_predicate_is_recorded() {
        let rules = RuleSet::builder()
            .rule(PredicateRule::new("panics", "", "never shown", |_| {
                panic!("index out of bounds")
            }))
            .rule(always(true, "passes"))
            .build();

        let result = RuleEngine::new().evaluate(&json!({}), &rules).await;
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].keyword, PREDICATE_ERROR_KEYWORD);
        assert!(result.errors()[0].message.contains("index out of bounds"));
    }

    #[tokio::test]
    async fn duplicate_rules_produce_duplicate_errors() {
        let rule = always(false, "dup");
        let rules = RuleSet::builder().rule(rule.clone()).rule(rule).build();

        let result = RuleEngine::new().evaluate(&json!(null), &rules).await;
        assert_eq!(result.errors().len(), 2);
        assert_eq!(result.errors()[0], result.errors()[1]);
    }

    #[tokio::test]
    async fn async_predicate_is_awaited() {
        let rules = RuleSet::builder()
            .rule(PredicateRule::new_async(
                "hasIssuer",
                "/issuer",
                "issuer missing",
                |doc: Value| async move {
                    tokio::task::yield_now().await;
                    Ok::<_, anyhow::Error>(doc.get("issuer").is_some())
                },
            ))
            .build();

        let engine = RuleEngine::new();
        assert!(engine.evaluate(&json!({ "issuer": "did:example:1" }), &rules).await.is_valid());

        let result = engine.evaluate(&json!({}), &rules).await;
        assert_eq!(result.errors()[0].keyword, "hasIssuer");
        assert_eq!(result.errors()[0].instance_path, "/issuer");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_predicate_times_out() {
        let rules = RuleSet::builder()
            .rule(PredicateRule::new_async("slow", "", "slow", |_doc: Value| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, anyhow::Error>(true)
            }))
            .rule(always(false, "next"))
            .build();

        let result = RuleEngine::new()
            .with_predicate_timeout(Duration::from_secs(1))
            .evaluate(&json!({}), &rules)
            .await;

        let keywords: Vec<_> = result.errors().iter().map(|e| e.keyword.as_str()).collect();
        assert_eq!(keywords, vec![PREDICATE_TIMEOUT_KEYWORD, "next"]);
    }

    #[tokio::test]
    async fn sub_path_errors_point_into_full_document() {
        let rule = SchemaRule::new(&json!({
            "type": "object",
            "properties": { "name": { "type": "string" } }
        }))
        .unwrap()
        .at_path("/credentialSubject");
        let rules = RuleSet::builder().rule(rule).build();

        let result = RuleEngine::new()
            .evaluate(&json!({ "credentialSubject": { "name": 7 } }), &rules)
            .await;
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].instance_path, "/credentialSubject/name");
    }

    #[tokio::test]
    async fn missing_sub_path_is_required_error() {
        let rule = SchemaRule::new(&json!({ "type": "object" }))
            .unwrap()
            .at_path("/credentialSubject/product");
        let rules = RuleSet::builder().rule(rule).build();

        let result = RuleEngine::new()
            .evaluate(&json!({ "credentialSubject": {} }), &rules)
            .await;
        let error = &result.errors()[0];
        assert_eq!(error.keyword, "required");
        assert_eq!(error.instance_path, "/credentialSubject");
        assert_eq!(error.params.as_ref().unwrap()["missingProperty"], "product");
    }

    #[tokio::test]
    async fn missing_intermediate_is_reported_at_deepest_existing_ancestor() {
        let rule = SchemaRule::new(&json!({ "type": "object" }))
            .unwrap()
            .at_path("/credentialSubject/product/id");
        let rules = RuleSet::builder().rule(rule).build();
        let engine = RuleEngine::new();

        let result = engine.evaluate(&json!({}), &rules).await;
        let error = &result.errors()[0];
        assert_eq!(error.instance_path, "");
        assert_eq!(error.params.as_ref().unwrap()["missingProperty"], "credentialSubject");

        let result = engine
            .evaluate(&json!({ "credentialSubject": { "product": {} } }), &rules)
            .await;
        let error = &result.errors()[0];
        assert_eq!(error.instance_path, "/credentialSubject/product");
        assert_eq!(error.params.as_ref().unwrap()["missingProperty"], "id");
    }

    #[tokio::test]
    async fn sub_path_without_leading_slash_is_resolved() {
        let rule = SchemaRule::new(&json!({ "type": "string" }))
            .unwrap()
            .at_path("credentialSubject/name");
        let rules = RuleSet::builder().rule(rule).build();

        let result = RuleEngine::new()
            .evaluate(&json!({ "credentialSubject": { "name": 7 } }), &rules)
            .await;
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].keyword, "type");
        assert_eq!(result.errors()[0].instance_path, "/credentialSubject/name");
    }

    #[tokio::test]
    async fn evaluate_many_keeps_order() {
        let rules = RuleSet::builder()
            .rule(SchemaRule::new(&json!({ "type": "string" })).unwrap())
            .build();
        let documents = vec![json!("ok"), json!(1), json!("fine")];

        let results = RuleEngine::new().evaluate_many(&documents, &rules).await;
        let valid: Vec<_> = results.iter().map(ValidationResult::is_valid).collect();
        assert_eq!(valid, vec![true, false, true]);
    }
}
