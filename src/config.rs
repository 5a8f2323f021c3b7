//! Orchestration configuration.
//!
//! A configuration names conformance scenarios: a fixture document, the rules
//! it must satisfy, optional tags for filtering, and an optional generator
//! used when the fixture does not exist yet. Relative paths are resolved
//! against the directory holding the configuration file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ConfigError, LoadError};
use crate::loader::{load_json, write_json};

/// Configuration path used when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "conformance.json";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "CONFORMANCE_CONFIG";

/// The configuration path to use when the caller did not pass one.
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    pub scenarios: Vec<Scenario>,
    /// Per-predicate timeout in milliseconds for asynchronous rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub fixture: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<Generator>,
    pub rules: Vec<RuleConfig>,
}

impl Scenario {
    /// Whether this scenario runs under the given tag filter.
    ///
    /// An empty filter selects every scenario.
    pub fn matches_tags(&self, tags: &[String]) -> bool {
        tags.is_empty() || self.tags.iter().any(|tag| tags.contains(tag))
    }
}

/// Produces a fixture from a template document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Generator {
    pub template: PathBuf,
    /// Deep-merged over the template; `null` removes a member.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub overrides: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", deny_unknown_fields)]
pub enum RuleConfig {
    /// A JSON Schema from a file or URL, optionally applied at a sub-path.
    Schema {
        schema: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// The W3C DID Core document checks.
    DidDocument,
}

impl Config {
    /// Load and check a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` when the file cannot be read,
    /// `ConfigError::Malformed` when it does not match the configuration
    /// shape, and the other variants for semantic problems.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let value = load_json(path)?;
        let config: Config =
            serde_json::from_value(value).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        config.check()?;
        Ok(config)
    }

    /// Reject duplicate or empty scenario names, scenarios without rules, and
    /// schema sub-paths that are not JSON Pointers.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn check(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for (index, scenario) in self.scenarios.iter().enumerate() {
            if scenario.name.trim().is_empty() {
                return Err(ConfigError::UnnamedScenario { index });
            }
            if !names.insert(scenario.name.as_str()) {
                return Err(ConfigError::DuplicateScenario {
                    name: scenario.name.clone(),
                });
            }
            if scenario.rules.is_empty() {
                return Err(ConfigError::NoRules {
                    name: scenario.name.clone(),
                });
            }
            for rule in &scenario.rules {
                if let RuleConfig::Schema { path: Some(path), .. } = rule {
                    if !path.is_empty() && !path.starts_with('/') {
                        return Err(ConfigError::InvalidPath {
                            name: scenario.name.clone(),
                            path: path.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The configuration written by `conformance config`.
    pub fn default_template() -> Self {
        Config {
            scenarios: vec![
                Scenario {
                    name: "did-document".to_string(),
                    tags: vec!["did".to_string()],
                    fixture: PathBuf::from("fixtures/did.json"),
                    generate: Some(Generator {
                        template: PathBuf::from("templates/did.json"),
                        overrides: json!({ "id": "did:example:123" }),
                    }),
                    rules: vec![RuleConfig::DidDocument],
                },
                Scenario {
                    name: "credential".to_string(),
                    tags: vec!["credential".to_string()],
                    fixture: PathBuf::from("fixtures/credential.json"),
                    generate: None,
                    rules: vec![RuleConfig::Schema {
                        schema: "schemas/credential.json".to_string(),
                        path: None,
                    }],
                },
            ],
            predicate_timeout_ms: Some(30_000),
        }
    }

    /// Write the default configuration to `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::AlreadyExists` when `path` exists and `force` is
    /// false, or a load error when the file cannot be written.
    pub fn write_default(path: &Path, force: bool) -> Result<(), ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        let value = serde_json::to_value(Self::default_template()).map_err(|source| {
            LoadError::InvalidJson {
                origin: path.display().to_string(),
                source,
            }
        })?;
        write_json(path, &value)?;
        Ok(())
    }
}

/// Deep-merge `overrides` into `base`. Objects merge recursively, `null`
/// removes the member, anything else replaces.
pub fn merge_json(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                if value.is_null() {
                    base.remove(key);
                } else if let Some(existing) = base.get_mut(key) {
                    merge_json(existing, value);
                } else {
                    base.insert(key.clone(), value.clone());
                }
            }
        }
        (base, overrides) if !overrides.is_null() => *base = overrides.clone(),
        _ => {}
    }
}
