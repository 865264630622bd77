//! Transport-neutral request handling.
//!
//! A host translates its HTTP request into a [`Request`], calls
//! [`JsonApi::handle`] and writes the returned [`Response`] back. Routing,
//! content negotiation and error rendering happen here.

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::atomic;
use crate::config::Config;
use crate::context::Context;
use crate::document::Document;
use crate::endpoint;
use crate::error::{aggregate_status, JsonApiError, SchemaError};
use crate::interpreter::parse_query_string;
use crate::registry::Registry;
use crate::types::{Method, ATOMIC_EXTENSION, MEDIA_TYPE};

/// An inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query_string: String,
    /// Already parsed parameters. Takes precedence over `query_string`.
    pub query: Option<Map<String, Value>>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Request {
    /// Request for `target`, a path with an optional query string.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        Self {
            method,
            path: path.to_string(),
            query_string: query_string.to_string(),
            query: None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::Get, target)
    }

    /// POST with a JSON:API body.
    pub fn post(target: &str, body: Value) -> Self {
        Self::new(Method::Post, target)
            .with_header("Content-Type", MEDIA_TYPE)
            .with_body(body)
    }

    /// PATCH with a JSON:API body.
    pub fn patch(target: &str, body: Value) -> Self {
        Self::new(Method::Patch, target)
            .with_header("Content-Type", MEDIA_TYPE)
            .with_body(body)
    }

    pub fn delete(target: &str) -> Self {
        Self::new(Method::Delete, target)
    }

    /// Set a header, replacing any existing value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.query = Some(query);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parameters as nested objects.
    pub fn query(&self) -> Result<Map<String, Value>, JsonApiError> {
        match &self.query {
            Some(query) => Ok(query.clone()),
            None => parse_query_string(&self.query_string),
        }
    }
}

/// An outbound response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Response {
    /// JSON:API response carrying `document`.
    pub fn document(status: u16, document: &Document) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), MEDIA_TYPE.to_string())],
            body: Some(document.to_value()),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A JSON:API server over a registry.
#[derive(Debug, Clone)]
pub struct JsonApi {
    registry: Registry,
    config: Config,
}

impl JsonApi {
    /// # Errors
    ///
    /// Returns a `SchemaError` when a relationship targets an unregistered type.
    pub fn new(registry: Registry, config: Config) -> Result<Self, SchemaError> {
        registry.validate()?;
        Ok(Self { registry, config })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle one request. Failures are rendered as error documents.
    pub fn handle(&self, request: &Request) -> Response {
        debug!(method = %request.method.as_str(), path = %request.path, "handling request");
        let response = self.dispatch(request).unwrap_or_else(|err| self.error_response(&err));
        info!(
            method = %request.method.as_str(),
            path = %request.path,
            status = response.status,
            "request complete"
        );
        response
    }

    fn dispatch(&self, request: &Request) -> Result<Response, JsonApiError> {
        let atomic = request.path == self.config.atomic_path;
        negotiate(request, atomic)?;
        if atomic {
            return match request.method {
                Method::Post => atomic::run(self, request),
                _ => Err(JsonApiError::MethodNotAllowed {
                    method: request.method.as_str().to_string(),
                }),
            };
        }
        self.route(request)
    }

    /// Route a request to its endpoint, skipping negotiation.
    pub(crate) fn route(&self, request: &Request) -> Result<Response, JsonApiError> {
        let segments = request
            .path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                urlencoding::decode(s)
                    .map(|decoded| decoded.into_owned())
                    .map_err(|_| JsonApiError::not_found(format!("no route for {}", request.path)))
            })
            .collect::<Result<Vec<String>, _>>()?;
        let (resource_type, id) = match segments.as_slice() {
            [resource_type] => (resource_type.as_str(), None),
            [resource_type, id] => (resource_type.as_str(), Some(id.as_str())),
            _ => {
                return Err(JsonApiError::not_found(format!(
                    "no route for {}",
                    request.path
                )))
            }
        };
        let resource = self.registry.get(resource_type).ok_or_else(|| {
            JsonApiError::not_found(format!("unknown resource type \"{}\"", resource_type))
        })?;
        let ctx = Context::new(&self.registry, &self.config, request).for_resource(resource);

        match (&request.method, id) {
            (Method::Get, None) => endpoint::list(&ctx, resource),
            (Method::Get, Some(id)) => endpoint::show(&ctx, resource, id),
            (Method::Post, None) => endpoint::create(&ctx, resource),
            (Method::Patch, Some(id)) => endpoint::update(&ctx, resource, id),
            (Method::Delete, Some(id)) => endpoint::delete(&ctx, resource, id),
            (method, _) => Err(JsonApiError::MethodNotAllowed {
                method: method.as_str().to_string(),
            }),
        }
    }

    /// Render `err` as an error document.
    pub fn error_response(&self, err: &JsonApiError) -> Response {
        let errors = err.to_error_objects(self.config.expose_internal_errors);
        let status = if errors.len() > 1 {
            aggregate_status(errors.iter().map(|e| e.status_code()))
        } else {
            err.status()
        };
        if status >= 500 {
            error!(error = %err, "request failed");
        } else {
            debug!(status, error = %err, "request rejected");
        }
        let document = Document::with_errors(&self.config.jsonapi_version, errors);
        Response::document(status, &document)
    }
}

/// A parsed media type: `application/vnd.api+json; ext="..."`.
struct MediaType<'h> {
    essence: &'h str,
    params: Vec<(&'h str, &'h str)>,
}

impl<'h> MediaType<'h> {
    fn parse(raw: &'h str) -> Self {
        let mut parts = raw.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let params = parts
            .filter_map(|p| p.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
            .collect();
        Self { essence, params }
    }

    fn is_jsonapi(&self) -> bool {
        self.essence.eq_ignore_ascii_case(MEDIA_TYPE)
    }

    fn extensions(&self) -> impl Iterator<Item = &'h str> + '_ {
        self.params
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("ext"))
            .flat_map(|&(_, v)| v.split_whitespace())
    }

    /// Only `ext` and `profile` parameters, and only known extensions.
    fn is_supported(&self) -> bool {
        self.params.iter().all(|(k, _)| {
            k.eq_ignore_ascii_case("ext") || k.eq_ignore_ascii_case("profile")
        }) && self.extensions().all(|ext| ext == ATOMIC_EXTENSION)
    }
}

/// Check `Content-Type` and `Accept`.
fn negotiate(request: &Request, atomic: bool) -> Result<(), JsonApiError> {
    if request.body.is_some() || matches!(request.method, Method::Post | Method::Patch) {
        let raw = request.header("Content-Type").ok_or_else(|| {
            JsonApiError::UnsupportedMediaType {
                detail: format!("requests with a body must use {}", MEDIA_TYPE),
            }
        })?;
        let media = MediaType::parse(raw);
        if !media.is_jsonapi() || !media.is_supported() {
            return Err(JsonApiError::UnsupportedMediaType {
                detail: format!("unsupported Content-Type \"{}\"", raw),
            });
        }
        if atomic && !media.extensions().any(|ext| ext == ATOMIC_EXTENSION) {
            return Err(JsonApiError::UnsupportedMediaType {
                detail: format!("atomic operations require ext=\"{}\"", ATOMIC_EXTENSION),
            });
        }
    }

    if let Some(accept) = request.header("Accept") {
        let jsonapi: Vec<MediaType<'_>> = accept
            .split(',')
            .map(MediaType::parse)
            .filter(MediaType::is_jsonapi)
            .collect();
        if !jsonapi.is_empty() && !jsonapi.iter().any(MediaType::is_supported) {
            return Err(JsonApiError::NotAcceptable {
                detail: format!("no acceptable {} parameters in \"{}\"", MEDIA_TYPE, accept),
            });
        }
    }
    Ok(())
}
