//! Error types for loading, configuration and service boundaries.
//!
//! Data-level non-conformance is never an error here: it is reported as a
//! [`ValidationError`](crate::ValidationError) inside a
//! [`ValidationResult`](crate::ValidationResult). The types in this module
//! cover operational failures only.

use std::fmt;
use std::path::PathBuf;

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::correlation;

/// Errors while loading JSON documents and schemas.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("remote sources are not supported in this build: {url}")]
    RemoteUnsupported { url: String },

    // Parse errors (exit code 2)
    #[error("invalid JSON in {origin}: {source}")]
    InvalidJson {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::InvalidJson { .. } => 2,
            _ => 3,
        }
    }
}

/// Errors in an orchestration configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid configuration {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate scenario name '{name}'")]
    DuplicateScenario { name: String },

    #[error("scenario at index {index} has an empty name")]
    UnnamedScenario { index: usize },

    #[error("scenario '{name}' declares no rules")]
    NoRules { name: String },

    #[error("scenario '{name}' has sub-path '{path}', which is not a JSON Pointer")]
    InvalidPath { name: String, path: String },

    #[error("configuration already exists at {path} (use --force to overwrite)")]
    AlreadyExists { path: PathBuf },
}

impl ConfigError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Load(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Stable machine-readable error codes carried by [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigNotFound,
    ConfigInvalid,
    ConfigMissingEnv,
    LoadFailed,
    SchemaNotFound,
    SchemaInvalid,
    FixtureMissing,
    FixtureInvalid,
    IdrUnknownProvider,
    IdrInvalidCode,
    IdrLinkNotFound,
    IdrTimeout,
    IdrUpstreamError,
    Internal,
}

impl ErrorCode {
    /// The identifier rendered in logs and error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigNotFound => "CONFIG_NOT_FOUND",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::ConfigMissingEnv => "CONFIG_MISSING_ENV",
            ErrorCode::LoadFailed => "LOAD_FAILED",
            ErrorCode::SchemaNotFound => "SCHEMA_NOT_FOUND",
            ErrorCode::SchemaInvalid => "SCHEMA_INVALID",
            ErrorCode::FixtureMissing => "FIXTURE_MISSING",
            ErrorCode::FixtureInvalid => "FIXTURE_INVALID",
            ErrorCode::IdrUnknownProvider => "IDR_UNKNOWN_PROVIDER",
            ErrorCode::IdrInvalidCode => "IDR_INVALID_CODE",
            ErrorCode::IdrLinkNotFound => "IDR_LINK_NOT_FOUND",
            ErrorCode::IdrTimeout => "IDR_TIMEOUT",
            ErrorCode::IdrUpstreamError => "IDR_UPSTREAM_ERROR",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP status a boundary layer should map this code to.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::IdrInvalidCode => 400,
            ErrorCode::ConfigNotFound
            | ErrorCode::SchemaNotFound
            | ErrorCode::FixtureMissing
            | ErrorCode::IdrLinkNotFound => 404,
            ErrorCode::SchemaInvalid | ErrorCode::FixtureInvalid => 422,
            ErrorCode::IdrUpstreamError => 502,
            ErrorCode::IdrTimeout => 504,
            ErrorCode::ConfigInvalid
            | ErrorCode::ConfigMissingEnv
            | ErrorCode::LoadFailed
            | ErrorCode::IdrUnknownProvider
            | ErrorCode::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational failure raised to the nearest boundary.
///
/// The active correlation id is captured when the error is created so the
/// boundary can log it even after the originating scope has ended.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub status_code: u16,
    pub message: String,
    /// Diagnostic data. Never used for control flow.
    pub context: Map<String, Value>,
    pub correlation_id: Option<String>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status_code: code.status_code(),
            message: message.into(),
            context: Map::new(),
            correlation_id: correlation::correlation_id(),
        }
    }

    /// Attach a diagnostic context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message)
    }

    /// A required environment value is absent.
    pub fn missing_env(var: &str) -> Self {
        Self::new(
            ErrorCode::ConfigMissingEnv,
            format!("required environment variable {var} is not set"),
        )
        .with_context("variable", var)
    }

    pub fn schema_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SchemaInvalid, message)
    }

    pub fn link_not_found(code: &str) -> Self {
        Self::new(
            ErrorCode::IdrLinkNotFound,
            format!("no link registered for {code}"),
        )
        .with_context("identifier", code)
    }

    /// Classify a load failure by what was being loaded.
    ///
    /// A missing file maps to `not_found`, unparseable JSON to `invalid`, and
    /// every other failure to `LOAD_FAILED`.
    pub fn from_load(err: LoadError, not_found: ErrorCode, invalid: ErrorCode) -> Self {
        let code = match &err {
            LoadError::InvalidJson { .. } => invalid,
            LoadError::FileNotFound { .. } => not_found,
            _ => ErrorCode::LoadFailed,
        };
        let mut service = ServiceError::new(code, err.to_string());
        if let LoadError::FileNotFound { path } = &err {
            service = service.with_context("path", path.display().to_string());
        }
        service
    }

    /// Exit code for CLI boundaries (2 = configuration/schema, 3 = IO/network).
    pub fn exit_code(&self) -> i32 {
        match self.code {
            ErrorCode::LoadFailed
            | ErrorCode::IdrTimeout
            | ErrorCode::IdrUpstreamError
            | ErrorCode::IdrLinkNotFound => 3,
            ErrorCode::IdrInvalidCode => 1,
            _ => 2,
        }
    }

    /// JSON body for HTTP or machine-readable CLI output.
    pub fn to_body(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "statusCode": self.status_code,
                "message": self.message,
                "context": self.context,
                "correlationId": self.correlation_id,
            }
        })
    }

    /// Emit this error as one structured log event.
    ///
    /// Prefers the id captured at construction and falls back to the id of
    /// the scope the error is logged in.
    pub fn log(&self) {
        let correlation_id = self
            .correlation_id
            .clone()
            .or_else(correlation::correlation_id)
            .unwrap_or_default();
        tracing::error!(
            code = self.code.as_str(),
            status_code = self.status_code,
            correlation_id = %correlation_id,
            context = %serde_json::Value::Object(self.context.clone()),
            "{}",
            self.message
        );
    }
}

/// Load failures outside a schema or fixture context concern the
/// configuration file.
impl From<LoadError> for ServiceError {
    fn from(err: LoadError) -> Self {
        ServiceError::from_load(err, ErrorCode::ConfigNotFound, ErrorCode::ConfigInvalid)
    }
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Load(load) => load.into(),
            other => ServiceError::config_invalid(other.to_string()),
        }
    }
}
