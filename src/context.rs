//! Per-request state handed to every user callback.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::config::Config;
use crate::registry::{Registry, ResourceType};
use crate::server::Request;
use crate::types::WriteMode;

/// Request-scoped context.
///
/// Created when a request enters the pipeline and dropped with the response.
/// Document-level meta and links added by callbacks are shared between a
/// context and every context derived from it.
#[derive(Clone)]
pub struct Context<'a> {
    pub registry: &'a Registry,
    pub config: &'a Config,
    pub request: &'a Request,
    resource: Option<&'a ResourceType>,
    mode: Option<WriteMode>,
    parameters: Map<String, Value>,
    meta: Rc<RefCell<Map<String, Value>>>,
    links: Rc<RefCell<Map<String, Value>>>,
}

impl<'a> Context<'a> {
    pub fn new(registry: &'a Registry, config: &'a Config, request: &'a Request) -> Self {
        Self {
            registry,
            config,
            request,
            resource: None,
            mode: None,
            parameters: Map::new(),
            meta: Rc::default(),
            links: Rc::default(),
        }
    }

    /// Derive a context for `resource`, sharing accumulated meta and links.
    pub fn for_resource(&self, resource: &'a ResourceType) -> Self {
        let mut ctx = self.clone();
        ctx.resource = Some(resource);
        ctx
    }

    pub(crate) fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub(crate) fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// The resource type of the endpoint being served.
    pub fn resource(&self) -> Option<&'a ResourceType> {
        self.resource
    }

    /// Whether the request creates or updates a resource, if it writes at all.
    pub fn mode(&self) -> Option<WriteMode> {
        self.mode
    }

    pub fn is_creating(&self) -> bool {
        self.mode == Some(WriteMode::Create)
    }

    pub fn is_updating(&self) -> bool {
        self.mode == Some(WriteMode::Update)
    }

    /// A validated custom query parameter.
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Add a member to the document's top-level `meta`.
    pub fn add_meta(&self, key: impl Into<String>, value: Value) {
        self.meta.borrow_mut().insert(key.into(), value);
    }

    /// Add a member to the document's top-level `links`.
    pub fn add_link(&self, key: impl Into<String>, value: Value) {
        self.links.borrow_mut().insert(key.into(), value);
    }

    pub fn meta(&self) -> Map<String, Value> {
        self.meta.borrow().clone()
    }

    pub fn links(&self) -> Map<String, Value> {
        self.links.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derived_context_shares_meta() {
        let registry = Registry::new();
        let config = Config::default();
        let request = Request::get("/articles");
        let ctx = Context::new(&registry, &config, &request);
        let derived = ctx.clone().with_mode(WriteMode::Create);

        derived.add_meta("total", json!(3));
        derived.add_link("describedby", json!("/docs"));

        assert_eq!(ctx.meta()["total"], json!(3));
        assert_eq!(ctx.links()["describedby"], json!("/docs"));
        assert!(derived.is_creating());
        assert!(!ctx.is_creating());
    }
}
