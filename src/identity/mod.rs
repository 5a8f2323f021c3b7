//! Identity resolution strategies.
//!
//! A strategy turns an opaque identifier code (typically decoded from a
//! barcode) into a canonical, resolvable link for one provider type. The
//! [`StrategyRegistry`] maps provider-type keys to strategies and always
//! falls back to a default, so lookups never fail on an unknown key.
//! Unresolvable codes surface later as `None` from
//! [`IdentityProviderStrategy::dlr_url`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ErrorCode, ServiceError};

mod gs1;
#[cfg(feature = "remote")]
mod resolver;

pub use gs1::{gtin_check_digit, parse_element_string, Gs1Strategy, GS1_PROVIDER};
#[cfg(feature = "remote")]
pub use resolver::{LinkResolver, ResolvedLink};

/// Environment variable naming the default provider base URL.
pub const PROVIDER_URL_ENV: &str = "IDR_PROVIDER_URL";

/// Resolution logic for one provider type.
///
/// Implementations hold no per-resolution state and are shared across
/// concurrent resolutions.
pub trait IdentityProviderStrategy: Send + Sync + fmt::Debug {
    /// Registry key, e.g. `"gs1"`.
    fn provider_type(&self) -> &str;

    /// Canonical resolvable link for `code` at `provider_url`, or `None` when
    /// the code cannot be resolved against this provider.
    fn dlr_url(&self, code: &str, provider_url: &str) -> Option<String>;

    /// Extract the canonical code from raw decoded scanner output.
    ///
    /// `format_name` is the symbology reported by the scanner (`EAN_13`,
    /// `DATA_MATRIX`, ...). Input the strategy does not recognize is returned
    /// trimmed but otherwise unchanged.
    fn code(&self, decoded_text: &str, format_name: &str) -> String;
}

/// Provider-type keyed strategies with a guaranteed default.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn IdentityProviderStrategy>>,
    default: Arc<dyn IdentityProviderStrategy>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("providers", &self.provider_types())
            .field("default", &self.default.provider_type())
            .finish()
    }
}

impl Default for StrategyRegistry {
    /// A registry with the GS1 strategy, which is also the default.
    fn default() -> Self {
        Self::new(Arc::new(Gs1Strategy))
    }
}

impl StrategyRegistry {
    /// A registry whose default (and only) strategy is `default`.
    pub fn new(default: Arc<dyn IdentityProviderStrategy>) -> Self {
        let mut strategies = HashMap::new();
        strategies.insert(normalize_key(default.provider_type()), Arc::clone(&default));
        Self {
            strategies,
            default,
        }
    }

    /// Add or replace the strategy for its provider type.
    pub fn register(mut self, strategy: Arc<dyn IdentityProviderStrategy>) -> Self {
        self.strategies
            .insert(normalize_key(strategy.provider_type()), strategy);
        self
    }

    /// Make the strategy registered under `provider_type` the default.
    ///
    /// # Errors
    ///
    /// Returns `IDR_UNKNOWN_PROVIDER` when no strategy is registered under
    /// that key.
    pub fn with_default(mut self, provider_type: &str) -> Result<Self, ServiceError> {
        let strategy = self
            .strategies
            .get(&normalize_key(provider_type))
            .cloned()
            .ok_or_else(|| {
                ServiceError::new(
                    ErrorCode::IdrUnknownProvider,
                    format!("no strategy registered for provider type '{provider_type}'"),
                )
                .with_context("providerType", provider_type)
                .with_context("registered", self.provider_types())
            })?;
        self.default = strategy;
        Ok(self)
    }

    /// The strategy for `provider_type`, or the default when unrecognized.
    pub fn strategy(&self, provider_type: &str) -> Arc<dyn IdentityProviderStrategy> {
        match self.strategies.get(&normalize_key(provider_type)) {
            Some(strategy) => Arc::clone(strategy),
            None => {
                tracing::debug!(
                    provider_type,
                    default = self.default.provider_type(),
                    "unknown provider type, using default strategy"
                );
                Arc::clone(&self.default)
            }
        }
    }

    pub fn contains(&self, provider_type: &str) -> bool {
        self.strategies.contains_key(&normalize_key(provider_type))
    }

    /// Registered keys, sorted.
    pub fn provider_types(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.strategies.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn default_strategy(&self) -> Arc<dyn IdentityProviderStrategy> {
        Arc::clone(&self.default)
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct PathStrategy;

    impl IdentityProviderStrategy for PathStrategy {
        fn provider_type(&self) -> &str {
            "path"
        }

        fn dlr_url(&self, code: &str, provider_url: &str) -> Option<String> {
            (!code.is_empty()).then(|| format!("{}/{code}", provider_url.trim_end_matches('/')))
        }

        fn code(&self, decoded_text: &str, _format_name: &str) -> String {
            decoded_text.trim().to_string()
        }
    }

    #[test]
    fn default_registry_has_gs1() {
        let registry = StrategyRegistry::default();
        assert!(registry.contains("gs1"));
        assert!(registry.contains("GS1"));
        assert_eq!(registry.strategy("gs1").provider_type(), GS1_PROVIDER);
    }

    #[test]
    fn unknown_key_falls_back_to_default() {
        let registry = StrategyRegistry::default();
        assert_eq!(registry.strategy("unknown-key").provider_type(), GS1_PROVIDER);
    }

    #[test]
    fn registered_strategy_is_selected() {
        let registry = StrategyRegistry::default().register(Arc::new(PathStrategy));
        let strategy = registry.strategy("path");
        assert_eq!(
            strategy.dlr_url("abc", "https://ids.example.com/").as_deref(),
            Some("https://ids.example.com/abc")
        );
        assert_eq!(registry.provider_types(), vec!["gs1", "path"]);
    }

    #[test]
    fn default_can_be_switched() {
        let registry = StrategyRegistry::default()
            .register(Arc::new(PathStrategy))
            .with_default("path")
            .unwrap();
        assert_eq!(registry.strategy("nope").provider_type(), "path");
    }

    #[test]
    fn switching_to_unregistered_default_fails() {
        let err = StrategyRegistry::default().with_default("epc").unwrap_err();
        assert_eq!(err.code, ErrorCode::IdrUnknownProvider);
        assert_eq!(err.context["providerType"], "epc");
    }
}
