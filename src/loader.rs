//! JSON loading from files, strings and HTTP URLs.
//!
//! Sources may carry a JSON Pointer fragment (`schemas/dpp.json#/$defs/Product`)
//! selecting a sub-document.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load JSON from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_json(path: &Path) -> Result<Value, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| LoadError::InvalidJson {
        origin: path.display().to_string(),
        source,
    })
}

/// Load JSON from a string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_json_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson {
        origin: "<string>".to_string(),
        source,
    })
}

/// Write `value` as pretty-printed JSON, creating parent directories.
///
/// # Errors
///
/// Returns `LoadError::WriteError` if the file or its directory cannot be
/// written.
pub fn write_json(path: &Path, value: &Value) -> Result<(), LoadError> {
    let write_error = |source| LoadError::WriteError {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    let mut content = serde_json::to_string_pretty(value).map_err(|source| {
        LoadError::InvalidJson {
            origin: path.display().to_string(),
            source,
        }
    })?;
    content.push('\n');
    std::fs::write(path, content).map_err(write_error)
}

/// Load JSON from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the response
/// isn't valid JSON.
#[cfg(feature = "remote")]
pub async fn load_json_url(url: &str) -> Result<Value, LoadError> {
    let network_error = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network_error)?;

    client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(network_error)?
        .json()
        .await
        .map_err(network_error)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Navigate a JSON Pointer fragment (e.g., "#/$defs/foo" or "#/properties/bar").
///
/// Returns `None` when the fragment does not exist in `document`.
pub fn navigate_fragment<'a>(document: &'a Value, fragment: &str) -> Option<&'a Value> {
    let pointer = fragment.trim_start_matches('#');
    if pointer.is_empty() || pointer == "/" {
        return Some(document);
    }
    document.pointer(pointer)
}

/// Split a source into its location and optional `#` fragment.
fn split_fragment(source: &str) -> (&str, Option<&str>) {
    match source.find('#') {
        Some(idx) => (&source[..idx], Some(&source[idx..])),
        None => (source, None),
    }
}

/// Resolve a relative file source against `base_dir`. URLs and absolute
/// paths are returned unchanged.
pub fn resolve_source(source: &str, base_dir: &Path) -> String {
    if is_url(source) || Path::new(source).is_absolute() {
        source.to_string()
    } else {
        base_dir.join(source).display().to_string()
    }
}

/// Resolve a relative path against `base_dir`.
pub fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Load JSON from a file path or URL, honoring a `#` fragment.
///
/// URL loading requires the `remote` feature.
///
/// # Errors
///
/// Returns appropriate errors based on the source type, or
/// `LoadError::InvalidJson` when the fragment does not exist.
pub async fn load_json_auto(source: &str) -> Result<Value, LoadError> {
    let (location, fragment) = split_fragment(source);

    let document = if is_url(location) {
        #[cfg(feature = "remote")]
        {
            load_json_url(location).await?
        }
        #[cfg(not(feature = "remote"))]
        {
            return Err(LoadError::RemoteUnsupported {
                url: location.to_string(),
            });
        }
    } else {
        load_json(Path::new(location))?
    };

    match fragment {
        None => Ok(document),
        Some(fragment) => navigate_fragment(&document, fragment)
            .cloned()
            .ok_or_else(|| LoadError::InvalidJson {
                origin: source.to_string(),
                source: serde::de::Error::custom(format!("fragment not found: {fragment}")),
            }),
    }
}
