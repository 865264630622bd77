//! Document loading from various sources.
//!
//! Handles loading definition and fixture documents from files, strings,
//! and HTTP URLs.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::adapter::Adapter;
use crate::definition::{build_definition, Definition};
use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a JSON document from a file path.
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

    load_json_str(&content)
}

/// Load a JSON document from a string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_json_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a JSON document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the server
/// answers with an error status, or if the body isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_json_url(url: &str) -> Result<Value, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.json())
        .map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a JSON document from a file path or URL.
///
/// URL loading requires the `remote` feature.
pub fn load_json_auto(source: &str) -> Result<Value, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_json_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_json(Path::new(source))
    }
}

/// Load and compile a definition from a file path or URL.
pub fn load_definition<F>(source: &str, adapter_for: F) -> Result<Definition, LoadError>
where
    F: FnMut(&str) -> Arc<dyn Adapter>,
{
    let doc = load_json_auto(source)?;
    build_definition(&doc, adapter_for)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_json_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"resources": {{}}}}"#).unwrap();

        let doc = load_json(file.path()).unwrap();
        assert!(doc["resources"].is_object());
    }

    #[test]
    fn load_json_file_not_found() {
        let result = load_json(Path::new("/nonexistent/definition.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_json_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_json(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_json_str_invalid() {
        let result = load_json_str("{");
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn is_url_detection() {
        assert!(is_url("https://example.com/definition.json"));
        assert!(is_url("http://example.com/definition.json"));
        assert!(!is_url("/path/to/definition.json"));
        assert!(!is_url("definition.json"));
    }

    #[test]
    fn load_definition_from_file() {
        struct NoStorage;
        impl Adapter for NoStorage {}

        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"resources": {{"tags": {{"fields": {{"label": {{"kind": "attribute"}}}}}}}}}}"#
        )
        .unwrap();

        let definition =
            load_definition(file.path().to_str().unwrap(), |_| Arc::new(NoStorage)).unwrap();
        assert!(definition.registry.contains("tags"));
    }

    #[cfg(feature = "remote")]
    mod remote {
        use super::*;

        #[test]
        fn load_json_url_valid() {
            let mut server = mockito::Server::new();
            let mock = server
                .mock("GET", "/definition.json")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"resources": {}}"#)
                .create();

            let doc = load_json_url(&format!("{}/definition.json", server.url())).unwrap();
            assert!(doc["resources"].is_object());
            mock.assert();
        }

        #[test]
        fn load_json_url_404() {
            let mut server = mockito::Server::new();
            server.mock("GET", "/missing.json").with_status(404).create();

            let result = load_json_url(&format!("{}/missing.json", server.url()));
            assert!(matches!(result, Err(LoadError::NetworkError { .. })));
        }

        #[test]
        fn load_json_url_invalid_body() {
            let mut server = mockito::Server::new();
            server
                .mock("GET", "/broken.json")
                .with_status(200)
                .with_body("not json")
                .create();

            let result = load_json_url(&format!("{}/broken.json", server.url()));
            assert!(matches!(result, Err(LoadError::NetworkError { .. })));
        }

        #[test]
        fn load_json_auto_url() {
            let mut server = mockito::Server::new();
            server
                .mock("GET", "/fixtures.json")
                .with_status(200)
                .with_body(r#"{"people": []}"#)
                .create();

            let doc = load_json_auto(&format!("{}/fixtures.json", server.url())).unwrap();
            assert!(doc["people"].is_array());
        }
    }
}
