//! Network dereferencing of resolved links.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use super::IdentityProviderStrategy;
use crate::error::{ErrorCode, ServiceError};

/// Default timeout for resolver requests (10 seconds).
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const LINKSET_ACCEPT: &str = "application/linkset+json, application/json";

/// A link together with the linkset the resolver returned for it.
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    pub url: String,
    pub linkset: Value,
}

/// Fetches linksets from identity resolvers.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    client: reqwest::Client,
    timeout: Duration,
}

impl LinkResolver {
    /// # Errors
    ///
    /// Returns `INTERNAL_ERROR` if the HTTP client cannot be built.
    pub fn new() -> Result<Self, ServiceError> {
        Self::with_timeout(HTTP_TIMEOUT)
    }

    /// # Errors
    ///
    /// Returns `INTERNAL_ERROR` if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::new(ErrorCode::Internal, format!("cannot build HTTP client: {e}"))
            })?;
        Ok(Self { client, timeout })
    }

    /// Resolve `code` with `strategy` and fetch the resulting linkset.
    ///
    /// # Errors
    ///
    /// * `IDR_INVALID_CODE` when the strategy cannot build a link
    /// * `IDR_LINK_NOT_FOUND` when the resolver answers 404
    /// * `IDR_TIMEOUT` when the request exceeds the timeout
    /// * `IDR_UPSTREAM_ERROR` for any other transport or HTTP failure
    pub async fn resolve(
        &self,
        strategy: &dyn IdentityProviderStrategy,
        code: &str,
        provider_url: &str,
    ) -> Result<ResolvedLink, ServiceError> {
        let url = strategy.dlr_url(code, provider_url).ok_or_else(|| {
            ServiceError::new(
                ErrorCode::IdrInvalidCode,
                format!("cannot build a {} link for '{code}'", strategy.provider_type()),
            )
            .with_context("identifier", code)
            .with_context("providerUrl", provider_url)
        })?;

        tracing::debug!(%url, provider = strategy.provider_type(), "fetching linkset");

        let response = self
            .client
            .get(&url)
            .query(&[("linkType", "all")])
            .header(reqwest::header::ACCEPT, LINKSET_ACCEPT)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, &e))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(ServiceError::link_not_found(code).with_context("url", url.as_str()));
            }
            status if !status.is_success() => {
                return Err(ServiceError::new(
                    ErrorCode::IdrUpstreamError,
                    format!("resolver answered {status}"),
                )
                .with_context("url", url.as_str())
                .with_context("upstreamStatus", status.as_u16()));
            }
            _ => {}
        }

        let linkset = response
            .json::<Value>()
            .await
            .map_err(|e| self.transport_error(&url, &e))?;

        Ok(ResolvedLink { url, linkset })
    }

    fn transport_error(&self, url: &str, err: &reqwest::Error) -> ServiceError {
        let error = if err.is_timeout() {
            ServiceError::new(
                ErrorCode::IdrTimeout,
                format!("resolver did not answer within {:?}", self.timeout),
            )
        } else {
            ServiceError::new(
                ErrorCode::IdrUpstreamError,
                format!("resolver request failed: {err}"),
            )
        };
        error.with_context("url", url)
    }
}
