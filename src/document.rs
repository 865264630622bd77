//! JSON:API document structures.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::ErrorObject;

/// A resource object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub relationships: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub links: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl ResourceObject {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            attributes: Map::new(),
            relationships: Map::new(),
            links: Map::new(),
            meta: Map::new(),
        }
    }

    /// Add a nested member to `meta`, e.g. `meta.page.cursor`.
    pub fn add_meta_path(&mut self, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut current = &mut self.meta;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            current = next;
        }
        current.insert(last.to_string(), value);
    }
}

/// Primary data: a single (possibly absent) resource or a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PrimaryData {
    One(Option<ResourceObject>),
    Many(Vec<ResourceObject>),
}

/// The `jsonapi` member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonApiObject {
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ext: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<String>,
}

/// A top-level document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<ResourceObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorObject>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub links: Map<String, Value>,
    pub jsonapi: JsonApiObject,
}

impl Document {
    fn empty(version: &str) -> Self {
        Self {
            data: None,
            included: None,
            errors: None,
            meta: Map::new(),
            links: Map::new(),
            jsonapi: JsonApiObject {
                version: version.to_string(),
                ext: Vec::new(),
                profile: Vec::new(),
            },
        }
    }

    pub fn with_data(version: &str, data: PrimaryData) -> Self {
        Self {
            data: Some(data),
            ..Self::empty(version)
        }
    }

    pub fn with_errors(version: &str, errors: Vec<ErrorObject>) -> Self {
        Self {
            errors: Some(errors),
            ..Self::empty(version)
        }
    }

    /// Merge configured meta and everything callbacks added to the context.
    pub fn finish(mut self, ctx: &Context<'_>) -> Self {
        for (key, value) in &ctx.config.meta {
            self.meta.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.meta.extend(ctx.meta());
        self.links.extend(ctx.links());
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
