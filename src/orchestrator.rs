//! Scenario orchestration.
//!
//! Loads a [`Config`], selects scenarios by tag, makes sure each fixture
//! exists (generating it from a template when configured), evaluates the
//! scenario's rules and collects a per-scenario report.
//!
//! Scenarios run concurrently. Each runs in its own correlation scope so log
//! lines and errors from different scenarios never share an id.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::config::{merge_json, Config, RuleConfig, Scenario};
use crate::correlation::{correlation_id, new_correlation_id, run_with_correlation_id};
use crate::did::{did_core_rule_set, with_did_formats};
use crate::engine::RuleEngine;
use crate::error::{ErrorCode, ServiceError};
use crate::loader::{load_json, load_json_auto, resolve_path, resolve_source, write_json};
use crate::rule::{Rule, RuleSet, SchemaRule};
use crate::types::ValidationError;
use crate::validator::SchemaValidator;

/// What to run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: PathBuf,
    /// Run only scenarios carrying one of these tags. Empty runs everything.
    pub tags: Vec<String>,
    /// Generate missing fixtures from their configured template.
    pub generate_missing: bool,
}

impl RunOptions {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            tags: Vec::new(),
            generate_missing: true,
        }
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn generate_missing(mut self, generate: bool) -> Self {
        self.generate_missing = generate;
        self
    }
}

/// Result of one scenario.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScenarioOutcome {
    Passed,
    Failed {
        errors: Vec<ValidationError>,
    },
    /// The scenario could not be evaluated (missing fixture, bad schema, ...).
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub name: String,
    /// `<run id>/<scenario name>`, shared by every log line and error the
    /// scenario produced.
    pub correlation_id: String,
    pub fixture: PathBuf,
    pub generated: bool,
    #[serde(flatten)]
    pub outcome: ScenarioOutcome,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Passed)
    }
}

/// Aggregate of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub correlation_id: String,
    pub scenarios: Vec<ScenarioReport>,
    /// Scenarios excluded by the tag filter.
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Failed { .. }))
    }

    pub fn errored(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Error { .. }))
    }

    fn count(&self, pred: impl Fn(&ScenarioOutcome) -> bool) -> usize {
        self.scenarios.iter().filter(|s| pred(&s.outcome)).count()
    }

    pub fn is_success(&self) -> bool {
        self.scenarios.iter().all(ScenarioReport::passed)
    }

    /// 0 when everything passed, 2 when any scenario hit a configuration
    /// error, otherwise 1.
    pub fn exit_code(&self) -> i32 {
        if self.errored() > 0 {
            2
        } else if self.failed() > 0 {
            1
        } else {
            0
        }
    }
}

/// Runs configured scenarios through the rule engine.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    engine: RuleEngine,
    validator: SchemaValidator,
    did_rules: RuleSet,
}

impl Orchestrator {
    /// # Errors
    ///
    /// Returns `SCHEMA_INVALID` if the DID Core rule set fails to build.
    pub fn new() -> Result<Self, ServiceError> {
        Self::with_engine(RuleEngine::new())
    }

    /// # Errors
    ///
    /// Returns `SCHEMA_INVALID` if the DID Core rule set fails to build.
    pub fn with_engine(engine: RuleEngine) -> Result<Self, ServiceError> {
        Ok(Self {
            engine,
            validator: with_did_formats(SchemaValidator::new()),
            did_rules: did_core_rule_set()?,
        })
    }

    /// Load the configuration named by `options` and run it.
    ///
    /// # Errors
    ///
    /// Configuration problems that prevent any scenario from running are
    /// returned before work starts. Per-scenario problems are reported in
    /// the [`RunReport`].
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport, ServiceError> {
        let config = Config::load(&options.config_path).map_err(ServiceError::from)?;
        let base_dir = options
            .config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(self.run_config(&config, &base_dir, options).await)
    }

    /// Run an already loaded configuration; relative paths resolve against
    /// `base_dir`.
    pub async fn run_config(
        &self,
        config: &Config,
        base_dir: &Path,
        options: &RunOptions,
    ) -> RunReport {
        let run_id = correlation_id().unwrap_or_else(new_correlation_id);
        let engine = match config.predicate_timeout_ms {
            Some(ms) => self
                .engine
                .clone()
                .with_predicate_timeout(Duration::from_millis(ms)),
            None => self.engine.clone(),
        };

        let (selected, skipped): (Vec<&Scenario>, Vec<&Scenario>) = config
            .scenarios
            .iter()
            .partition(|scenario| scenario.matches_tags(&options.tags));

        tracing::info!(
            run_id = %run_id,
            selected = selected.len(),
            skipped = skipped.len(),
            "starting conformance run"
        );

        let runs = selected.into_iter().map(|scenario| {
            let scenario_id = format!("{run_id}/{}", scenario.name);
            let span = tracing::info_span!(
                "scenario",
                name = %scenario.name,
                correlation_id = %scenario_id
            );
            run_with_correlation_id(
                scenario_id,
                self.run_scenario(&engine, scenario, base_dir, options.generate_missing),
            )
            .instrument(span)
        });
        let scenarios = join_all(runs).await;

        let report = RunReport {
            correlation_id: run_id,
            scenarios,
            skipped: skipped.iter().map(|s| s.name.clone()).collect(),
        };
        tracing::info!(
            passed = report.passed(),
            failed = report.failed(),
            errored = report.errored(),
            "conformance run complete"
        );
        report
    }

    async fn run_scenario(
        &self,
        engine: &RuleEngine,
        scenario: &Scenario,
        base_dir: &Path,
        generate_missing: bool,
    ) -> ScenarioReport {
        let fixture = resolve_path(&scenario.fixture, base_dir);
        let mut generated = false;

        let evaluated = async {
            let (document, was_generated) =
                ensure_fixture(scenario, &fixture, base_dir, generate_missing)?;
            generated = was_generated;
            let rules = self.build_rule_set(&scenario.rules, base_dir).await?;
            Ok::<_, ServiceError>(engine.evaluate(&document, &rules).await)
        }
        .await;

        let outcome = match evaluated {
            Ok(result) if result.is_valid() => {
                tracing::info!("scenario passed");
                ScenarioOutcome::Passed
            }
            Ok(result) => {
                tracing::info!(errors = result.errors().len(), "scenario failed");
                ScenarioOutcome::Failed {
                    errors: result.into_errors(),
                }
            }
            Err(err) => {
                err.log();
                ScenarioOutcome::Error {
                    code: err.code.as_str().to_string(),
                    message: err.message,
                }
            }
        };

        ScenarioReport {
            name: scenario.name.clone(),
            correlation_id: correlation_id().unwrap_or_default(),
            fixture,
            generated,
            outcome,
        }
    }

    /// Build the rule set for a scenario's rule configuration.
    ///
    /// # Errors
    ///
    /// Returns `SCHEMA_NOT_FOUND` for missing schema files, `LOAD_FAILED`
    /// for unreachable ones and `SCHEMA_INVALID` for schemas that are not
    /// JSON or do not compile.
    pub async fn build_rule_set(
        &self,
        rules: &[RuleConfig],
        base_dir: &Path,
    ) -> Result<RuleSet, ServiceError> {
        let mut built: Vec<Rule> = Vec::new();
        for rule in rules {
            match rule {
                RuleConfig::Schema { schema, path } => {
                    let source = resolve_source(schema, base_dir);
                    let value = load_json_auto(&source).await.map_err(|e| {
                        ServiceError::from_load(
                            e,
                            ErrorCode::SchemaNotFound,
                            ErrorCode::SchemaInvalid,
                        )
                        .with_context("schema", source.as_str())
                    })?;
                    let mut compiled = SchemaRule::with_validator(&self.validator, &value)
                        .map_err(|e| e.with_context("schema", source.as_str()))?;
                    if let Some(path) = path {
                        compiled = compiled.at_path(path.as_str());
                    }
                    built.push(compiled.into());
                }
                RuleConfig::DidDocument => built.extend(self.did_rules.rules().iter().cloned()),
            }
        }
        Ok(RuleSet::builder().rules(built).build())
    }
}

/// Load the fixture, generating it first when it is missing and allowed.
///
/// Returns the document and whether it was generated.
fn ensure_fixture(
    scenario: &Scenario,
    fixture: &Path,
    base_dir: &Path,
    generate_missing: bool,
) -> Result<(Value, bool), ServiceError> {
    let fixture_error = |e| {
        ServiceError::from_load(e, ErrorCode::FixtureMissing, ErrorCode::FixtureInvalid)
            .with_context("scenario", scenario.name.as_str())
    };

    if fixture.exists() {
        return Ok((load_json(fixture).map_err(fixture_error)?, false));
    }

    let generator = match (&scenario.generate, generate_missing) {
        (Some(generator), true) => generator,
        _ => {
            return Err(ServiceError::new(
                ErrorCode::FixtureMissing,
                format!("fixture {} does not exist", fixture.display()),
            )
            .with_context("scenario", scenario.name.as_str())
            .with_context("fixture", fixture.display().to_string()));
        }
    };

    let template = resolve_path(&generator.template, base_dir);
    let mut document = load_json(&template).map_err(fixture_error)?;
    merge_json(&mut document, &generator.overrides);
    write_json(fixture, &document).map_err(fixture_error)?;
    tracing::info!(
        fixture = %fixture.display(),
        template = %template.display(),
        "generated fixture"
    );
    Ok((document, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, value: &Value) {
        write_json(&dir.path().join(name), value).unwrap();
    }

    fn two_scenarios(dir: &TempDir) -> PathBuf {
        write(
            dir,
            "schemas/thing.json",
            &json!({
                "type": "object",
                "required": ["string"],
                "properties": {
                    "string": { "type": "string" },
                    "boolean": { "type": "boolean" }
                }
            }),
        );
        write(dir, "fixtures/good.json", &json!({ "string": "x" }));
        write(dir, "fixtures/bad.json", &json!({ "boolean": true }));
        write(
            dir,
            "conformance.json",
            &json!({
                "scenarios": [
                    {
                        "name": "good-thing",
                        "tags": ["thing"],
                        "fixture": "fixtures/good.json",
                        "rules": [{ "type": "schema", "schema": "schemas/thing.json" }]
                    },
                    {
                        "name": "bad-thing",
                        "tags": ["thing", "negative"],
                        "fixture": "fixtures/bad.json",
                        "rules": [{ "type": "schema", "schema": "schemas/thing.json" }]
                    }
                ]
            }),
        );
        dir.path().join("conformance.json")
    }

    #[tokio::test]
    async fn failing_scenario_is_named_and_exit_nonzero() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions::new(two_scenarios(&dir));

        let report = Orchestrator::new().unwrap().run(&options).await.unwrap();

        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.exit_code(), 1);
        let failing = report.scenarios.iter().find(|s| !s.passed()).unwrap();
        assert_eq!(failing.name, "bad-thing");
        match &failing.outcome {
            ScenarioOutcome::Failed { errors } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].keyword, "required");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tag_filter_skips_scenarios() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions::new(two_scenarios(&dir)).tags(["negative"]);

        let report = Orchestrator::new().unwrap().run(&options).await.unwrap();
        assert_eq!(report.scenarios.len(), 1);
        assert_eq!(report.skipped, vec!["good-thing".to_string()]);
    }

    #[tokio::test]
    async fn missing_fixture_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "conformance.json",
            &json!({
                "scenarios": [{
                    "name": "orphan",
                    "fixture": "fixtures/none.json",
                    "rules": [{ "type": "didDocument" }]
                }]
            }),
        );
        let options = RunOptions::new(dir.path().join("conformance.json"));

        let report = Orchestrator::new().unwrap().run(&options).await.unwrap();
        assert_eq!(report.errored(), 1);
        assert_eq!(report.exit_code(), 2);
        assert!(matches!(
            &report.scenarios[0].outcome,
            ScenarioOutcome::Error { code, .. } if code == "FIXTURE_MISSING"
        ));
    }

    #[tokio::test]
    async fn excluded_scenario_with_missing_fixture_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "conformance.json",
            &json!({
                "scenarios": [{
                    "name": "orphan",
                    "tags": ["later"],
                    "fixture": "fixtures/none.json",
                    "rules": [{ "type": "didDocument" }]
                }]
            }),
        );
        let options = RunOptions::new(dir.path().join("conformance.json")).tags(["now"]);

        let report = Orchestrator::new().unwrap().run(&options).await.unwrap();
        assert!(report.scenarios.is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn missing_fixture_is_generated_from_template() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "templates/did.json",
            &json!({
                "@context": "https://www.w3.org/ns/did/v1",
                "id": "did:example:placeholder"
            }),
        );
        write(
            &dir,
            "conformance.json",
            &json!({
                "scenarios": [{
                    "name": "did",
                    "fixture": "fixtures/did.json",
                    "generate": {
                        "template": "templates/did.json",
                        "overrides": { "id": "did:example:123" }
                    },
                    "rules": [{ "type": "didDocument" }]
                }]
            }),
        );
        let options = RunOptions::new(dir.path().join("conformance.json"));

        let report = Orchestrator::new().unwrap().run(&options).await.unwrap();
        assert!(report.is_success(), "{report:?}");
        assert!(report.scenarios[0].generated);

        let written = load_json(&dir.path().join("fixtures/did.json")).unwrap();
        assert_eq!(written["id"], "did:example:123");
    }

    #[tokio::test]
    async fn generation_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        write(&dir, "templates/did.json", &json!({}));
        write(
            &dir,
            "conformance.json",
            &json!({
                "scenarios": [{
                    "name": "did",
                    "fixture": "fixtures/did.json",
                    "generate": { "template": "templates/did.json" },
                    "rules": [{ "type": "didDocument" }]
                }]
            }),
        );
        let options =
            RunOptions::new(dir.path().join("conformance.json")).generate_missing(false);

        let report = Orchestrator::new().unwrap().run(&options).await.unwrap();
        assert_eq!(report.errored(), 1);
        assert!(!dir.path().join("fixtures/did.json").exists());
    }

    #[tokio::test]
    async fn missing_config_fails_before_work() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions::new(dir.path().join("absent.json"));

        let err = Orchestrator::new().unwrap().run(&options).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigNotFound);
    }

    #[tokio::test]
    async fn run_id_comes_from_the_ambient_scope() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions::new(two_scenarios(&dir));
        let orchestrator = Orchestrator::new().unwrap();

        let report = run_with_correlation_id("cli-run", orchestrator.run(&options))
            .await
            .unwrap();
        assert_eq!(report.correlation_id, "cli-run");
    }

    #[tokio::test]
    async fn report_serializes_status() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions::new(two_scenarios(&dir));
        let report = Orchestrator::new().unwrap().run(&options).await.unwrap();

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["scenarios"][0]["status"], "passed");
        assert_eq!(value["scenarios"][1]["status"], "failed");
        assert_eq!(value["scenarios"][1]["errors"][0]["instancePath"], "");
        assert!(value["scenarios"][0]["correlationId"].is_string());
    }

    #[tokio::test]
    async fn concurrent_scenarios_carry_their_own_correlation_ids() {
        let dir = TempDir::new().unwrap();
        write(&dir, "fixtures/empty.json", &json!({}));
        write(
            &dir,
            "conformance.json",
            &json!({
                "scenarios": [
                    {
                        "name": "a",
                        "fixture": "fixtures/empty.json",
                        "rules": [{ "type": "didDocument" }]
                    },
                    {
                        "name": "b",
                        "fixture": "fixtures/none.json",
                        "rules": [{ "type": "didDocument" }]
                    }
                ]
            }),
        );
        let options = RunOptions::new(dir.path().join("conformance.json"));
        let orchestrator = Orchestrator::new().unwrap();

        let report = run_with_correlation_id("run-1", orchestrator.run(&options))
            .await
            .unwrap();

        let ids: Vec<_> = report
            .scenarios
            .iter()
            .map(|s| s.correlation_id.as_str())
            .collect();
        assert_eq!(ids, vec!["run-1/a", "run-1/b"]);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.errored(), 1);
        assert_eq!(correlation_id(), None);
    }

    #[tokio::test]
    async fn load_errors_are_labelled_by_what_was_loaded() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("fixtures")).unwrap();
        fs::write(dir.path().join("fixtures/broken.json"), "{ not json").unwrap();
        write(&dir, "fixtures/good.json", &json!({ "string": "x" }));
        write(
            &dir,
            "conformance.json",
            &json!({
                "scenarios": [
                    {
                        "name": "absent-schema",
                        "fixture": "fixtures/good.json",
                        "rules": [{ "type": "schema", "schema": "schemas/absent.json" }]
                    },
                    {
                        "name": "broken-fixture",
                        "fixture": "fixtures/broken.json",
                        "rules": [{ "type": "didDocument" }]
                    }
                ]
            }),
        );
        let options = RunOptions::new(dir.path().join("conformance.json"));

        let report = Orchestrator::new().unwrap().run(&options).await.unwrap();

        let codes: Vec<_> = report
            .scenarios
            .iter()
            .map(|s| match &s.outcome {
                ScenarioOutcome::Error { code, .. } => code.as_str(),
                other => panic!("expected an error, got {other:?}"),
            })
            .collect();
        assert_eq!(codes, vec!["SCHEMA_NOT_FOUND", "FIXTURE_INVALID"]);
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn unresolvable_remote_ref_fails_only_its_scenario() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "schemas/remote.json",
            &json!({ "$ref": "http://127.0.0.1:9/unreachable.json" }),
        );
        write(&dir, "fixtures/good.json", &json!({ "string": "x" }));
        write(
            &dir,
            "conformance.json",
            &json!({
                "scenarios": [
                    {
                        "name": "remote-ref",
                        "fixture": "fixtures/good.json",
                        "rules": [{ "type": "schema", "schema": "schemas/remote.json" }]
                    },
                    {
                        "name": "plain",
                        "fixture": "fixtures/good.json",
                        "rules": [{ "type": "schema", "schema": "schemas/object.json" }]
                    }
                ]
            }),
        );
        write(&dir, "schemas/object.json", &json!({ "type": "object" }));
        let options = RunOptions::new(dir.path().join("conformance.json"));

        let report = Orchestrator::new().unwrap().run(&options).await.unwrap();

        assert!(matches!(
            &report.scenarios[0].outcome,
            ScenarioOutcome::Error { code, .. } if code == "SCHEMA_INVALID"
        ));
        assert!(report.scenarios[1].passed());
    }
}
