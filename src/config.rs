//! Server configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Settings shared by every request.
///
/// Read from the `config` section of a definition document; every field has
/// a default so an empty object is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Prefix for generated `self`, `Location` and pagination links.
    pub base_url: String,
    /// Path serving atomic operation batches.
    pub atomic_path: String,
    /// Render internal error messages in error documents.
    pub expose_internal_errors: bool,
    /// Version advertised in the `jsonapi` object.
    pub jsonapi_version: String,
    /// Static top-level meta added to every document.
    pub meta: Map<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            atomic_path: "/operations".to_string(),
            expose_internal_errors: false,
            jsonapi_version: "1.1".to_string(),
            meta: Map::new(),
        }
    }
}

impl Config {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn atomic_path(mut self, path: impl Into<String>) -> Self {
        self.atomic_path = path.into();
        self
    }

    pub fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    /// Absolute URL for a path beginning with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
