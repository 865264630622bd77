//! Storage adapter capability contracts.
//!
//! The core never touches storage. Each resource type owns an [`Adapter`]
//! which advertises the capabilities it supports by returning itself from
//! the matching accessor (`findable`, `listable`, ...). A missing capability
//! makes the corresponding endpoint answer 405.

use serde_json::{json, Value};

use crate::context::Context;
use crate::error::JsonApiError;
use crate::field::{Field, FieldKind};
use crate::query::{PageWindow, Query};

/// A domain object as seen by the core.
pub type Model = Value;

/// Related model(s) of one relationship on one model.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Model>),
    Many(Vec<Model>),
}

impl Related {
    /// Interpret a getter result: null, one model or an array of models.
    ///
    /// Scalars are treated as bare ids and become `{"id": ...}` stubs.
    pub fn from_value(value: Value, to_many: bool) -> Self {
        if to_many {
            let items = match value {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            Related::Many(items.into_iter().filter_map(into_model).collect())
        } else {
            Related::One(into_model(value))
        }
    }

    pub fn models(&self) -> Vec<&Model> {
        match self {
            Related::One(model) => model.iter().collect(),
            Related::Many(models) => models.iter().collect(),
        }
    }
}

fn into_model(value: Value) -> Option<Model> {
    match value {
        Value::Null => None,
        Value::Object(_) => Some(value),
        Value::String(_) | Value::Number(_) => Some(json!({ "id": value })),
        _ => None,
    }
}

/// A slice of results produced by a pagination policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub results: Vec<Model>,
    pub is_first_page: bool,
    pub is_last_page: bool,
    /// The adapter returned fewer results than exist in the requested range.
    pub range_truncated: bool,
    /// Total matching results, when the resource is countable.
    pub total: Option<usize>,
}

/// Per-resource storage adapter.
pub trait Adapter: Send + Sync {
    /// Read a field's value from a model. Defaults to the field's property.
    fn get_value(
        &self,
        model: &Model,
        field: &Field,
        _ctx: &Context<'_>,
    ) -> Result<Value, JsonApiError> {
        Ok(model.get(field.property()).cloned().unwrap_or(Value::Null))
    }

    /// Write a field's value to a model. Relationships are stored as ids.
    fn set_value(
        &self,
        model: &mut Model,
        field: &Field,
        value: Value,
        _ctx: &Context<'_>,
    ) -> Result<(), JsonApiError> {
        let value = match field.kind() {
            FieldKind::ToOne(_) => value.get("id").cloned().unwrap_or(Value::Null),
            FieldKind::ToMany(_) => Value::Array(
                value
                    .as_array()
                    .map(|items| items.iter().filter_map(|m| m.get("id").cloned()).collect())
                    .unwrap_or_default(),
            ),
            _ => value,
        };
        match model {
            Value::Object(map) => {
                map.insert(field.property().to_string(), value);
                Ok(())
            }
            _ => Err(JsonApiError::internal("model is not an object")),
        }
    }

    /// Persist a field after the model itself was created or updated.
    fn save_value(
        &self,
        _model: &Model,
        _field: &Field,
        _value: Value,
        _ctx: &Context<'_>,
    ) -> Result<(), JsonApiError> {
        Ok(())
    }

    /// Load one relationship for many models in a single call.
    ///
    /// When `linkage_only` is set the adapter may return `{"id": ...}` stubs
    /// instead of full models. The result is aligned with `models`.
    fn load_related(
        &self,
        models: &[&Model],
        field: &Field,
        _linkage_only: bool,
        ctx: &Context<'_>,
    ) -> Result<Vec<Related>, JsonApiError> {
        let to_many = matches!(field.kind(), FieldKind::ToMany(_));
        models
            .iter()
            .map(|model| {
                self.get_value(model, field, ctx)
                    .map(|value| Related::from_value(value, to_many))
            })
            .collect()
    }

    fn findable(&self) -> Option<&dyn Findable> {
        None
    }

    fn listable(&self) -> Option<&dyn Listable> {
        None
    }

    fn countable(&self) -> Option<&dyn Countable> {
        None
    }

    fn paginatable(&self) -> Option<&dyn Paginatable> {
        None
    }

    fn cursor_paginatable(&self) -> Option<&dyn CursorPaginatable> {
        None
    }

    fn creatable(&self) -> Option<&dyn Creatable> {
        None
    }

    fn updatable(&self) -> Option<&dyn Updatable> {
        None
    }

    fn deletable(&self) -> Option<&dyn Deletable> {
        None
    }
}

pub trait Findable {
    fn find(&self, id: &str, ctx: &Context<'_>) -> Result<Option<Model>, JsonApiError>;
}

pub trait Listable {
    /// Base query for the resource type.
    fn query(&self, _ctx: &Context<'_>) -> Query {
        Query::default()
    }

    fn results(&self, query: &Query, ctx: &Context<'_>) -> Result<Vec<Model>, JsonApiError>;
}

pub trait Countable {
    /// Number of results matching `query`, if cheaply known.
    fn count(&self, query: &Query, ctx: &Context<'_>) -> Result<Option<usize>, JsonApiError>;
}

pub trait Paginatable {
    /// Restrict `query` to an offset window.
    fn paginate(&self, query: &mut Query, offset: usize, limit: usize, _ctx: &Context<'_>) {
        query.window = Some(PageWindow::Offset { offset, limit });
    }
}

pub trait CursorPaginatable {
    /// Fetch up to `size` results after or before an opaque cursor.
    fn cursor_paginate(
        &self,
        query: &Query,
        size: usize,
        after: Option<&str>,
        before: Option<&str>,
        ctx: &Context<'_>,
    ) -> Result<Page, JsonApiError>;

    /// The opaque cursor identifying `model`'s position.
    fn cursor(&self, model: &Model) -> Result<String, JsonApiError>;
}

pub trait Creatable {
    /// A blank model to apply the request's fields to.
    fn new_model(&self, _ctx: &Context<'_>) -> Model {
        json!({})
    }

    fn create(&self, model: Model, ctx: &Context<'_>) -> Result<Model, JsonApiError>;
}

pub trait Updatable {
    fn update(&self, model: Model, ctx: &Context<'_>) -> Result<Model, JsonApiError>;
}

pub trait Deletable {
    fn delete(&self, model: &Model, ctx: &Context<'_>) -> Result<(), JsonApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn related_from_scalar_id() {
        assert_eq!(
            Related::from_value(json!("7"), false),
            Related::One(Some(json!({ "id": "7" })))
        );
    }

    #[test]
    fn related_from_null() {
        assert_eq!(Related::from_value(Value::Null, false), Related::One(None));
        assert_eq!(Related::from_value(Value::Null, true), Related::Many(vec![]));
    }

    #[test]
    fn related_many_mixes_ids_and_models() {
        let related = Related::from_value(json!(["1", { "id": "2", "name": "b" }]), true);
        assert_eq!(related.models().len(), 2);
        assert_eq!(related.models()[1]["name"], "b");
    }
}
