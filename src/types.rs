//! Core wire-level types and constants.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JsonApiError;

/// The JSON:API media type.
pub const MEDIA_TYPE: &str = "application/vnd.api+json";

/// URI of the atomic operations extension.
pub const ATOMIC_EXTENSION: &str = "https://jsonapi.org/ext/atomic";

/// URI of the cursor pagination profile.
pub const CURSOR_PAGINATION_PROFILE: &str =
    "https://jsonapi.org/profiles/ethanresnick/cursor-pagination";

/// Query parameter families defined by JSON:API.
pub const QUERY_FAMILIES: &[&str] = &["include", "fields", "filter", "sort", "page"];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Request method understood by the endpoint router.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
    Other(String),
}

impl Method {
    /// Parse a method name case-insensitively.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Other(s) => s,
        }
    }
}

/// Whether a write creates a new resource or updates an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    Create,
    Update,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A `{type, id}` or `{type, lid}` resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

impl ResourceIdentifier {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: Some(id.into()),
            lid: None,
        }
    }

    /// Parse an identifier object, reporting problems at `pointer`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` unless the value is an object with a string `type`
    /// and a string `id` or `lid`.
    pub fn parse(value: &Value, pointer: &str) -> Result<Self, JsonApiError> {
        let obj = value.as_object().ok_or_else(|| {
            JsonApiError::bad_pointer(
                pointer,
                format!(
                    "resource identifier must be an object, got {}",
                    json_type_name(value)
                ),
            )
        })?;

        let resource_type = obj.get("type").and_then(Value::as_str).ok_or_else(|| {
            JsonApiError::bad_pointer(
                format!("{}/type", pointer),
                "resource identifier must have a string type",
            )
        })?;

        let member = |key: &str| -> Result<Option<String>, JsonApiError> {
            match obj.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(JsonApiError::bad_pointer(
                    format!("{}/{}", pointer, key),
                    format!("{} must be a string, got {}", key, json_type_name(other)),
                )),
            }
        };

        let id = member("id")?;
        let lid = member("lid")?;
        if id.is_none() && lid.is_none() {
            return Err(JsonApiError::bad_pointer(
                pointer,
                "resource identifier must have an id or lid",
            ));
        }

        Ok(Self {
            resource_type: resource_type.to_string(),
            id,
            lid,
        })
    }
}
