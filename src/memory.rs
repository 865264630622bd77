//! In-memory storage adapter.
//!
//! A [`MemoryStore`] holds models per resource type behind a shared lock.
//! [`MemoryAdapter`] implements every capability over one type of the
//! store, evaluating [`Query`] plans directly. Used by the CLI and tests.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{json, Value};

use crate::adapter::{
    Adapter, Countable, Creatable, CursorPaginatable, Deletable, Findable, Listable, Model, Page,
    Paginatable, Related, Updatable,
};
use crate::context::Context;
use crate::error::JsonApiError;
use crate::field::{Field, FieldKind};
use crate::query::{Condition, Operator, PageWindow, Query};
use crate::types::{json_type_name, SortDirection};

type Tables = HashMap<String, Vec<Model>>;

pub type CustomFilter = Arc<dyn Fn(&Model, &Value) -> bool + Send + Sync>;

/// Shared model storage, keyed by resource type.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    calls: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store from a fixtures document: `{"<type>": [model, ...], ...}`.
    pub fn from_fixtures(fixtures: &Value) -> Result<Self, JsonApiError> {
        let store = Self::new();
        let tables = fixtures.as_object().ok_or_else(|| {
            JsonApiError::bad_request(format!(
                "fixtures must be an object of arrays, got {}",
                json_type_name(fixtures)
            ))
        })?;
        for (resource_type, models) in tables {
            let models = models.as_array().ok_or_else(|| {
                JsonApiError::bad_request(format!("fixtures for \"{}\" must be an array", resource_type))
            })?;
            store.seed(resource_type, models.iter().cloned())?;
        }
        Ok(store)
    }

    /// Add models to a type. Numeric ids are stored as strings.
    pub fn seed(
        &self,
        resource_type: &str,
        models: impl IntoIterator<Item = Model>,
    ) -> Result<(), JsonApiError> {
        let mut tables = self.write()?;
        let table = tables.entry(resource_type.to_string()).or_default();
        for mut model in models {
            if let Some(id) = model.get("id").and_then(Value::as_u64) {
                model["id"] = Value::String(id.to_string());
            }
            table.push(model);
        }
        Ok(())
    }

    /// Snapshot of every model of a type.
    pub fn all(&self, resource_type: &str) -> Vec<Model> {
        self.read()
            .map(|tables| tables.get(resource_type).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of adapter calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    /// Adapter for one resource type.
    pub fn adapter(&self, resource_type: impl Into<String>) -> MemoryAdapter {
        MemoryAdapter {
            store: self.clone(),
            resource_type: resource_type.into(),
            filters: HashMap::new(),
        }
    }

    fn touch(&self) {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, JsonApiError> {
        self.tables
            .read()
            .map_err(|_| JsonApiError::internal("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, JsonApiError> {
        self.tables
            .write()
            .map_err(|_| JsonApiError::internal("memory store lock poisoned"))
    }
}

/// Adapter over one resource type of a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryAdapter {
    store: MemoryStore,
    resource_type: String,
    filters: HashMap<String, CustomFilter>,
}

impl fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAdapter")
            .field("resource_type", &self.resource_type)
            .finish_non_exhaustive()
    }
}

impl MemoryAdapter {
    /// Evaluate `Condition::Custom` named `name` with `matches`.
    pub fn with_filter<F>(mut self, name: impl Into<String>, matches: F) -> Self
    where
        F: Fn(&Model, &Value) -> bool + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(matches));
        self
    }

    pub fn into_arc(self) -> Arc<dyn Adapter> {
        Arc::new(self)
    }

    /// Filtered and sorted models, without a page window.
    fn select(&self, query: &Query) -> Result<Vec<Model>, JsonApiError> {
        let tables = self.store.read()?;
        let mut selected = Vec::new();
        for model in tables.get(&self.resource_type).into_iter().flatten() {
            if self.matches_all(model, &query.conditions)? {
                selected.push(model.clone());
            }
        }
        selected.sort_by(|a, b| {
            query
                .sorts
                .iter()
                .map(|clause| {
                    let ordering = compare(&a[&clause.property], &b[&clause.property]);
                    match clause.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(selected)
    }

    fn matches_all(&self, model: &Model, conditions: &[Condition]) -> Result<bool, JsonApiError> {
        for condition in conditions {
            if !self.matches(model, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches(&self, model: &Model, condition: &Condition) -> Result<bool, JsonApiError> {
        Ok(match condition {
            Condition::Compare {
                property,
                operator,
                value,
            } => {
                let actual = value_of(model, property);
                match operator {
                    Operator::Eq => contains(actual, value),
                    Operator::Ne => !contains(actual, value),
                    Operator::Lt => compare(actual, value) == Ordering::Less,
                    Operator::Lte => compare(actual, value) != Ordering::Greater,
                    Operator::Gt => compare(actual, value) == Ordering::Greater,
                    Operator::Gte => compare(actual, value) != Ordering::Less,
                }
            }
            Condition::In {
                property,
                values,
                negated,
            } => {
                let actual = value_of(model, property);
                values.iter().any(|v| contains(actual, v)) != *negated
            }
            Condition::Null { property, is_null } => value_of(model, property).is_null() == *is_null,
            Condition::Custom { name, value } => {
                let filter = self.filters.get(name).ok_or_else(|| {
                    JsonApiError::internal(format!("no memory filter named \"{}\"", name))
                })?;
                filter(model, value)
            }
        })
    }

    fn find_in(tables: &Tables, resource_type: &str, id: &str) -> Option<Model> {
        tables
            .get(resource_type)?
            .iter()
            .find(|m| id_matches(m, id))
            .cloned()
    }
}

fn value_of<'m>(model: &'m Model, property: &str) -> &'m Value {
    model.get(property).unwrap_or(&Value::Null)
}

/// Equality, or membership when `actual` is an array of ids.
fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        other => loosely_equal(other, expected),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            *s == n.to_string()
        }
        _ => a == b,
    }
}

/// Total order over JSON scalars: null < bool < number < string.
fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn id_matches(model: &Model, id: &str) -> bool {
    match model.get("id") {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

fn id_string(model: &Model) -> Option<String> {
    match model.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

impl Adapter for MemoryAdapter {
    /// Loads one relationship for every model under a single read lock.
    fn load_related(
        &self,
        models: &[&Model],
        field: &Field,
        linkage_only: bool,
        ctx: &Context<'_>,
    ) -> Result<Vec<Related>, JsonApiError> {
        self.store.touch();
        let (target, to_many) = match field.kind() {
            FieldKind::ToOne(rel) => (rel.resource_type.as_str(), false),
            FieldKind::ToMany(rel) => (rel.resource_type.as_str(), true),
            _ => return Err(JsonApiError::internal("load_related on a non-relationship")),
        };

        let tables = self.store.read()?;
        models
            .iter()
            .map(|model| {
                let related = Related::from_value(field.get_value(model, ctx, self)?, to_many);
                if linkage_only {
                    return Ok(related);
                }
                let resolve = |stub: Model| match id_string(&stub) {
                    Some(id) => Self::find_in(&tables, target, &id),
                    None => None,
                };
                Ok(match related {
                    Related::One(stub) => Related::One(stub.and_then(resolve)),
                    Related::Many(stubs) => {
                        Related::Many(stubs.into_iter().filter_map(resolve).collect())
                    }
                })
            })
            .collect()
    }

    fn findable(&self) -> Option<&dyn Findable> {
        Some(self)
    }

    fn listable(&self) -> Option<&dyn Listable> {
        Some(self)
    }

    fn countable(&self) -> Option<&dyn Countable> {
        Some(self)
    }

    fn paginatable(&self) -> Option<&dyn Paginatable> {
        Some(self)
    }

    fn cursor_paginatable(&self) -> Option<&dyn CursorPaginatable> {
        Some(self)
    }

    fn creatable(&self) -> Option<&dyn Creatable> {
        Some(self)
    }

    fn updatable(&self) -> Option<&dyn Updatable> {
        Some(self)
    }

    fn deletable(&self) -> Option<&dyn Deletable> {
        Some(self)
    }
}

impl Findable for MemoryAdapter {
    fn find(&self, id: &str, _ctx: &Context<'_>) -> Result<Option<Model>, JsonApiError> {
        self.store.touch();
        let tables = self.store.read()?;
        Ok(Self::find_in(&tables, &self.resource_type, id))
    }
}

impl Listable for MemoryAdapter {
    fn query(&self, _ctx: &Context<'_>) -> Query {
        Query::new(&self.resource_type)
    }

    fn results(&self, query: &Query, _ctx: &Context<'_>) -> Result<Vec<Model>, JsonApiError> {
        self.store.touch();
        let selected = self.select(query)?;
        Ok(match query.window {
            Some(PageWindow::Offset { offset, limit }) => {
                selected.into_iter().skip(offset).take(limit).collect()
            }
            None => selected,
        })
    }
}

impl Countable for MemoryAdapter {
    fn count(&self, query: &Query, _ctx: &Context<'_>) -> Result<Option<usize>, JsonApiError> {
        self.store.touch();
        Ok(Some(self.select(query)?.len()))
    }
}

impl Paginatable for MemoryAdapter {}

impl CursorPaginatable for MemoryAdapter {
    fn cursor_paginate(
        &self,
        query: &Query,
        size: usize,
        after: Option<&str>,
        before: Option<&str>,
        _ctx: &Context<'_>,
    ) -> Result<Page, JsonApiError> {
        self.store.touch();
        let selected = self.select(query)?;
        let position = |cursor: &str, parameter: &str| {
            selected
                .iter()
                .position(|m| id_matches(m, cursor))
                .ok_or_else(|| {
                    JsonApiError::bad_parameter(parameter, format!("unknown cursor \"{}\"", cursor))
                })
        };
        let (start, end) = match (after, before) {
            (Some(cursor), _) => {
                let start = position(cursor, "page[after]")? + 1;
                (start, (start + size).min(selected.len()))
            }
            (None, Some(cursor)) => {
                let end = position(cursor, "page[before]")?;
                (end.saturating_sub(size), end)
            }
            (None, None) => (0, size.min(selected.len())),
        };
        Ok(Page {
            is_first_page: start == 0,
            is_last_page: end >= selected.len(),
            range_truncated: false,
            total: None,
            results: selected[start..end].to_vec(),
        })
    }

    fn cursor(&self, model: &Model) -> Result<String, JsonApiError> {
        id_string(model).ok_or_else(|| JsonApiError::internal("model has no id"))
    }
}

impl Creatable for MemoryAdapter {
    fn create(&self, mut model: Model, _ctx: &Context<'_>) -> Result<Model, JsonApiError> {
        self.store.touch();
        let mut tables = self.store.write()?;
        let table = tables.entry(self.resource_type.clone()).or_default();
        match id_string(&model) {
            Some(id) if table.iter().any(|m| id_matches(m, &id)) => {
                return Err(JsonApiError::conflict_at(
                    "/data/id",
                    format!("{}/{} already exists", self.resource_type, id),
                ));
            }
            Some(id) => model["id"] = Value::String(id),
            None => {
                let mut next = table.len() + 1;
                while table.iter().any(|m| id_matches(m, &next.to_string())) {
                    next += 1;
                }
                if !model.is_object() {
                    model = json!({});
                }
                model["id"] = Value::String(next.to_string());
            }
        }
        table.push(model.clone());
        Ok(model)
    }
}

impl Updatable for MemoryAdapter {
    fn update(&self, model: Model, _ctx: &Context<'_>) -> Result<Model, JsonApiError> {
        self.store.touch();
        let id = id_string(&model).ok_or_else(|| JsonApiError::internal("model has no id"))?;
        let mut tables = self.store.write()?;
        let slot = tables
            .get_mut(&self.resource_type)
            .and_then(|table| table.iter_mut().find(|m| id_matches(m, &id)))
            .ok_or_else(|| JsonApiError::ResourceNotFound {
                resource_type: self.resource_type.clone(),
                id: id.clone(),
                location: None,
            })?;
        *slot = model.clone();
        Ok(model)
    }
}

impl Deletable for MemoryAdapter {
    fn delete(&self, model: &Model, _ctx: &Context<'_>) -> Result<(), JsonApiError> {
        self.store.touch();
        let id = id_string(model).ok_or_else(|| JsonApiError::internal("model has no id"))?;
        let mut tables = self.store.write()?;
        if let Some(table) = tables.get_mut(&self.resource_type) {
            table.retain(|m| !id_matches(m, &id));
        }
        Ok(())
    }
}
