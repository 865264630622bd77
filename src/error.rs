//! Error types for JSON:API request handling, schema configuration and loading.
//!
//! [`JsonApiError`] is the request-time error. Every variant maps to exactly one
//! HTTP status and renders as one or more [`ErrorObject`]s. [`SchemaError`] is
//! raised while building a registry and [`LoadError`] while reading definition
//! or fixture files.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Profile URI used as `links.type` when a requested cursor page is too large.
pub const MAX_SIZE_EXCEEDED: &str =
    "https://jsonapi.org/profiles/ethanresnick/cursor-pagination/max-size-exceeded";

/// Profile URI used as `links.type` when `page[after]` and `page[before]` are combined.
pub const RANGE_PAGINATION_NOT_SUPPORTED: &str =
    "https://jsonapi.org/profiles/ethanresnick/cursor-pagination/range-pagination-not-supported";

/// Where in the request an error originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    /// JSON Pointer (RFC 6901) into the request document.
    Pointer(String),
    /// Name of the offending query parameter.
    Parameter(String),
    /// Name of the offending request header.
    Header(String),
}

impl ErrorSource {
    pub fn pointer(pointer: impl Into<String>) -> Self {
        Self::Pointer(pointer.into())
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter(name.into())
    }

    /// Prefix a pointer source. Parameter and header sources are returned as-is.
    pub fn prefixed(self, prefix: &str) -> Self {
        match self {
            Self::Pointer(pointer) => Self::Pointer(format!("{}{}", prefix, pointer)),
            other => other,
        }
    }
}

/// A single JSON:API error object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorObject {
    pub status: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub links: Map<String, Value>,
}

impl ErrorObject {
    /// Create an error object with the standard title for `status`.
    pub fn new(status: u16, detail: Option<String>) -> Self {
        Self {
            status: status.to_string(),
            title: status_title(status).to_string(),
            detail,
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: Option<ErrorSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Numeric status, falling back to 500 for unparsable values.
    pub fn status_code(&self) -> u16 {
        self.status.parse().unwrap_or(500)
    }
}

/// Standard reason phrase for the statuses this crate emits.
pub fn status_title(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        409 => "Conflict",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        _ => "Internal Server Error",
    }
}

/// Overall status for a response carrying several errors.
///
/// All equal → that status. Otherwise 400 when client errors are the strict
/// majority, else 500 (ties included).
pub fn aggregate_status(statuses: impl IntoIterator<Item = u16>) -> u16 {
    let statuses: Vec<u16> = statuses.into_iter().collect();
    let Some(first) = statuses.first().copied() else {
        return 500;
    };
    if statuses.iter().all(|s| *s == first) {
        return first;
    }

    let client = statuses.iter().filter(|s| (400..500).contains(*s)).count();
    let server = statuses.len() - client;
    if client > server {
        400
    } else {
        500
    }
}

/// Request-time failure, convertible into a JSON:API error document.
#[derive(Debug, Error)]
pub enum JsonApiError {
    #[error("bad request: {detail}")]
    BadRequest {
        detail: String,
        location: Option<ErrorSource>,
    },

    #[error("unauthorized: {detail}")]
    Unauthorized { detail: String },

    #[error("forbidden: {detail}")]
    Forbidden {
        detail: String,
        location: Option<ErrorSource>,
    },

    #[error("not found: {detail}")]
    NotFound {
        detail: String,
        location: Option<ErrorSource>,
    },

    #[error("resource not found: {resource_type}/{id}")]
    ResourceNotFound {
        resource_type: String,
        id: String,
        location: Option<ErrorSource>,
    },

    #[error("method {method} not allowed")]
    MethodNotAllowed { method: String },

    #[error("not acceptable: {detail}")]
    NotAcceptable { detail: String },

    #[error("conflict: {detail}")]
    Conflict {
        detail: String,
        location: Option<ErrorSource>,
    },

    #[error("unsupported media type: {detail}")]
    UnsupportedMediaType { detail: String },

    #[error("unprocessable entity: {} violation(s)", errors.len())]
    UnprocessableEntity { errors: Vec<ErrorObject> },

    /// A cursor-pagination profile error, discriminated by `links.type`.
    #[error("invalid page: {detail}")]
    PageProfile {
        detail: String,
        parameter: String,
        profile: &'static str,
        meta: Map<String, Value>,
    },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("{} errors", errors.len())]
    Aggregate { errors: Vec<JsonApiError> },
}

impl JsonApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::BadRequest {
            detail: detail.into(),
            location: None,
        }
    }

    /// Bad request attributed to a query parameter.
    pub fn bad_parameter(parameter: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadRequest {
            detail: detail.into(),
            location: Some(ErrorSource::parameter(parameter)),
        }
    }

    /// Bad request attributed to a location in the request document.
    pub fn bad_pointer(pointer: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadRequest {
            detail: detail.into(),
            location: Some(ErrorSource::pointer(pointer)),
        }
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::Forbidden {
            detail: detail.into(),
            location: None,
        }
    }

    pub fn forbidden_at(pointer: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Forbidden {
            detail: detail.into(),
            location: Some(ErrorSource::pointer(pointer)),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound {
            detail: detail.into(),
            location: None,
        }
    }

    pub fn conflict_at(pointer: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Conflict {
            detail: detail.into(),
            location: Some(ErrorSource::pointer(pointer)),
        }
    }

    /// Wrap any failure from an adapter or user callback.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest { .. } | Self::PageProfile { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } | Self::ResourceNotFound { .. } => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::NotAcceptable { .. } => 406,
            Self::Conflict { .. } => 409,
            Self::UnsupportedMediaType { .. } => 415,
            Self::UnprocessableEntity { .. } => 422,
            Self::Internal { .. } | Self::Schema(_) => 500,
            Self::Aggregate { errors } => aggregate_status(errors.iter().map(|e| e.status())),
        }
    }

    /// Returns true for 4xx errors.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Prefix every pointer source with `prefix`, keeping the nested pointer.
    pub fn with_pointer_prefix(self, prefix: &str) -> Self {
        let prefix_source = |location: Option<ErrorSource>| location.map(|s| s.prefixed(prefix));
        match self {
            Self::BadRequest { detail, location } => Self::BadRequest {
                detail,
                location: prefix_source(location),
            },
            Self::Forbidden { detail, location } => Self::Forbidden {
                detail,
                location: prefix_source(location),
            },
            Self::NotFound { detail, location } => Self::NotFound {
                detail,
                location: prefix_source(location),
            },
            Self::ResourceNotFound {
                resource_type,
                id,
                location,
            } => Self::ResourceNotFound {
                resource_type,
                id,
                location: prefix_source(location),
            },
            Self::Conflict { detail, location } => Self::Conflict {
                detail,
                location: prefix_source(location),
            },
            Self::UnprocessableEntity { errors } => Self::UnprocessableEntity {
                errors: errors
                    .into_iter()
                    .map(|mut e| {
                        e.source = e.source.map(|s| s.prefixed(prefix));
                        e
                    })
                    .collect(),
            },
            Self::Aggregate { errors } => Self::Aggregate {
                errors: errors
                    .into_iter()
                    .map(|e| e.with_pointer_prefix(prefix))
                    .collect(),
            },
            other => other,
        }
    }

    /// Render as error objects. Internal details are hidden unless `expose_internal`.
    pub fn to_error_objects(&self, expose_internal: bool) -> Vec<ErrorObject> {
        let status = self.status();
        match self {
            Self::BadRequest { detail, location }
            | Self::Forbidden { detail, location }
            | Self::NotFound { detail, location }
            | Self::Conflict { detail, location } => {
                vec![ErrorObject::new(status, Some(detail.clone())).with_source(location.clone())]
            }
            Self::Unauthorized { detail }
            | Self::NotAcceptable { detail }
            | Self::UnsupportedMediaType { detail } => {
                vec![ErrorObject::new(status, Some(detail.clone()))]
            }
            Self::ResourceNotFound {
                resource_type,
                id,
                location,
            } => vec![ErrorObject::new(
                status,
                Some(format!("resource {}/{} not found", resource_type, id)),
            )
            .with_code("resource_not_found")
            .with_source(location.clone())],
            Self::MethodNotAllowed { method } => vec![ErrorObject::new(
                status,
                Some(format!("method {} is not allowed here", method)),
            )],
            Self::UnprocessableEntity { errors } => errors.clone(),
            Self::PageProfile {
                detail,
                parameter,
                profile,
                meta,
            } => {
                let mut error = ErrorObject::new(status, Some(detail.clone()))
                    .with_source(Some(ErrorSource::parameter(parameter.clone())));
                error
                    .links
                    .insert("type".to_string(), Value::String((*profile).to_string()));
                error.meta = meta.clone();
                vec![error]
            }
            Self::Internal { .. } | Self::Schema(_) => {
                let detail = expose_internal.then(|| self.to_string());
                vec![ErrorObject::new(500, detail)]
            }
            Self::Aggregate { errors } => errors
                .iter()
                .flat_map(|e| e.to_error_objects(expose_internal))
                .collect(),
        }
    }
}

/// Single validation failure with JSON Pointer context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// JSON Pointer (RFC 6901) relative to the validated value.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            message: message.into(),
        }
    }

    /// Prepend a path segment, keeping the nested path.
    pub fn under(mut self, segment: &str) -> Self {
        self.path = format!("/{}{}", escape_pointer(segment), self.path);
        self
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Escape a JSON Pointer reference token (`~` → `~0`, `/` → `~1`).
pub fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Errors raised while building or validating a schema registry.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown resource type \"{name}\"")]
    UnknownResourceType { name: String },

    #[error("duplicate field \"{field}\" on resource type \"{resource}\"")]
    DuplicateField { resource: String, field: String },

    #[error("relationship \"{resource}.{field}\" targets unregistered type \"{target}\"")]
    UnknownRelationshipType {
        resource: String,
        field: String,
        target: String,
    },

    #[error("resource type \"{resource}\" declares more than one id field")]
    MultipleIdFields { resource: String },

    #[error("invalid definition at {path}: {message}")]
    InvalidDefinition { path: String, message: String },

    #[error("invalid pattern \"{pattern}\": {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl SchemaError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Errors while loading definition or fixture documents.
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

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("definition failed validation with {} error(s)", errors.len())]
    InvalidDefinition { errors: Vec<Violation> },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Aggregate Status ===

    #[test]
    fn aggregate_status_shared() {
        assert_eq!(aggregate_status([422, 422, 422]), 422);
    }

    #[test]
    fn aggregate_status_client_majority() {
        assert_eq!(aggregate_status([422, 404, 500]), 400);
    }

    #[test]
    fn aggregate_status_tie_is_server_error() {
        assert_eq!(aggregate_status([400, 500]), 500);
        assert_eq!(aggregate_status([403, 409, 500, 502]), 500);
    }

    #[test]
    fn aggregate_status_empty() {
        assert_eq!(aggregate_status(Vec::new()), 500);
    }

    // === Pointer Prefixing ===

    #[test]
    fn prefix_keeps_nested_pointer() {
        let err = JsonApiError::bad_pointer("/data/attributes/name", "bad")
            .with_pointer_prefix("/atomic:operations/2");
        match err {
            JsonApiError::BadRequest {
                location: Some(ErrorSource::Pointer(p)),
                ..
            } => assert_eq!(p, "/atomic:operations/2/data/attributes/name"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn prefix_leaves_parameter_sources() {
        let err = JsonApiError::bad_parameter("sort", "bad").with_pointer_prefix("/x");
        let objects = err.to_error_objects(false);
        assert_eq!(objects[0].source, Some(ErrorSource::parameter("sort")));
    }

    #[test]
    fn prefix_applies_to_every_violation() {
        let err = JsonApiError::UnprocessableEntity {
            errors: vec![
                ErrorObject::new(422, None)
                    .with_source(Some(ErrorSource::pointer("/data/attributes/a"))),
                ErrorObject::new(422, None)
                    .with_source(Some(ErrorSource::pointer("/data/attributes/b"))),
            ],
        }
        .with_pointer_prefix("/atomic:operations/0");

        let pointers: Vec<_> = err
            .to_error_objects(false)
            .into_iter()
            .map(|e| e.source)
            .collect();
        assert_eq!(
            pointers,
            vec![
                Some(ErrorSource::pointer("/atomic:operations/0/data/attributes/a")),
                Some(ErrorSource::pointer("/atomic:operations/0/data/attributes/b")),
            ]
        );
    }

    // === Rendering ===

    #[test]
    fn internal_detail_hidden_by_default() {
        let err = JsonApiError::internal("db exploded");
        let hidden = err.to_error_objects(false);
        assert_eq!(hidden[0].status, "500");
        assert_eq!(hidden[0].title, "Internal Server Error");
        assert!(hidden[0].detail.is_none());

        let shown = err.to_error_objects(true);
        assert_eq!(shown[0].detail.as_deref(), Some("internal error: db exploded"));
    }

    #[test]
    fn source_serializes_as_keyed_object() {
        let error = ErrorObject::new(400, Some("bad".into()))
            .with_source(Some(ErrorSource::parameter("filter[x]")));
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["source"], serde_json::json!({ "parameter": "filter[x]" }));
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn page_profile_error_carries_type_link() {
        let err = JsonApiError::PageProfile {
            detail: "too big".into(),
            parameter: "page[size]".into(),
            profile: MAX_SIZE_EXCEEDED,
            meta: Map::new(),
        };
        let objects = err.to_error_objects(false);
        assert_eq!(objects[0].status, "400");
        assert_eq!(objects[0].links["type"], MAX_SIZE_EXCEEDED);
    }

    #[test]
    fn violation_display_and_nesting() {
        let v = Violation::new("must be unique").under("1").under("tags");
        assert_eq!(v.to_string(), "/tags/1: must be unique");
        assert_eq!(Violation::new("x").under("a/b").path, "/a~1b");
    }

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("definition.json"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = LoadError::InvalidDefinition { errors: vec![] };
        assert_eq!(err.exit_code(), 2);
    }
}
