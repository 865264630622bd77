//! Schema registry.
//!
//! Resource types are registered once at startup and looked up by name
//! while serving requests. The registry is read-only afterwards.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::adapter::{Adapter, Model};
use crate::context::Context;
use crate::error::{JsonApiError, SchemaError};
use crate::field::{Field, FieldKind};
use crate::filter::Filter;
use crate::pagination::Pagination;
use crate::query::Query;
use crate::sort::Sort;

pub type CapabilityPredicate = Arc<dyn Fn(Option<&Model>, &Context<'_>) -> bool + Send + Sync>;
pub type Scope = Arc<dyn Fn(&mut Query, &Context<'_>) -> Result<(), JsonApiError> + Send + Sync>;

/// Whether an endpoint operation is permitted.
///
/// Update and delete predicates receive the target model; list, count and
/// create receive `None`.
#[derive(Clone)]
pub enum Capability {
    Always,
    Never,
    When(CapabilityPredicate),
}

impl Capability {
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(Option<&Model>, &Context<'_>) -> bool + Send + Sync + 'static,
    {
        Capability::When(Arc::new(predicate))
    }

    pub fn allows(&self, model: Option<&Model>, ctx: &Context<'_>) -> bool {
        match self {
            Capability::Always => true,
            Capability::Never => false,
            Capability::When(predicate) => predicate(model, ctx),
        }
    }
}

impl From<bool> for Capability {
    fn from(allowed: bool) -> Self {
        if allowed {
            Capability::Always
        } else {
            Capability::Never
        }
    }
}

/// One resource type: an endpoint's schema and its adapter.
#[derive(Clone)]
pub struct ResourceType {
    name: String,
    adapter: Arc<dyn Adapter>,
    id: Field,
    id_declarations: usize,
    fields: Vec<Field>,
    filters: Vec<Filter>,
    sorts: Vec<Sort>,
    pagination: Option<Pagination>,
    scope: Option<Scope>,
    default_sort: Vec<String>,
    default_include: Vec<String>,
    listable: Capability,
    countable: Capability,
    creatable: Capability,
    updatable: Capability,
    deletable: Capability,
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("filters", &self.filters)
            .field("sorts", &self.sorts)
            .field("pagination", &self.pagination)
            .finish_non_exhaustive()
    }
}

impl ResourceType {
    /// New resource type. Listing and counting are allowed; writes are not.
    pub fn new(name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            name: name.into(),
            adapter,
            id: Field::id(),
            id_declarations: 0,
            fields: Vec::new(),
            filters: Vec::new(),
            sorts: Vec::new(),
            pagination: None,
            scope: None,
            default_sort: Vec::new(),
            default_include: Vec::new(),
            listable: Capability::Always,
            countable: Capability::Always,
            creatable: Capability::Never,
            updatable: Capability::Never,
            deletable: Capability::Never,
        }
    }

    // --- Builder ---

    /// Add a field. An `Id` field replaces the implicit one.
    pub fn field(mut self, field: Field) -> Self {
        if matches!(field.kind(), FieldKind::Id) {
            self.id = field;
            self.id_declarations += 1;
        } else {
            self.fields.push(field);
        }
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Restrict every query on this type, before filters apply.
    pub fn scope<F>(mut self, scope: F) -> Self
    where
        F: Fn(&mut Query, &Context<'_>) -> Result<(), JsonApiError> + Send + Sync + 'static,
    {
        self.scope = Some(Arc::new(scope));
        self
    }

    /// Sort tokens used when the request has no `sort`, e.g. `["-createdAt"]`.
    pub fn default_sort<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_sort = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Include paths used when the request has no `include`.
    pub fn default_include<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_include = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn listable(mut self, capability: impl Into<Capability>) -> Self {
        self.listable = capability.into();
        self
    }

    pub fn countable(mut self, capability: impl Into<Capability>) -> Self {
        self.countable = capability.into();
        self
    }

    pub fn creatable(mut self, capability: impl Into<Capability>) -> Self {
        self.creatable = capability.into();
        self
    }

    pub fn updatable(mut self, capability: impl Into<Capability>) -> Self {
        self.updatable = capability.into();
        self
    }

    pub fn deletable(mut self, capability: impl Into<Capability>) -> Self {
        self.deletable = capability.into();
        self
    }

    /// Allow create, update and delete.
    pub fn writable(self) -> Self {
        self.creatable(true).updatable(true).deletable(true)
    }

    // --- Accessors ---

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    pub fn id_field(&self) -> &Field {
        &self.id
    }

    /// Non-id fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field by name, including the id.
    pub fn find_field(&self, name: &str) -> Option<&Field> {
        if name == self.id.name() {
            return Some(&self.id);
        }
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Look up a relationship field by name.
    pub fn find_relationship(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name() == name && f.relationship().is_some())
    }

    pub fn find_filter(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.name() == name)
    }

    pub fn find_sort(&self, name: &str) -> Option<&Sort> {
        self.sorts.iter().find(|s| s.name() == name)
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        self.pagination.as_ref()
    }

    pub fn default_sort_tokens(&self) -> &[String] {
        &self.default_sort
    }

    pub fn default_include_paths(&self) -> &[String] {
        &self.default_include
    }

    pub fn apply_scope(&self, query: &mut Query, ctx: &Context<'_>) -> Result<(), JsonApiError> {
        match &self.scope {
            Some(scope) => scope(query, ctx),
            None => Ok(()),
        }
    }

    pub fn can_list(&self, ctx: &Context<'_>) -> bool {
        self.listable.allows(None, ctx)
    }

    pub fn can_count(&self, ctx: &Context<'_>) -> bool {
        self.countable.allows(None, ctx)
    }

    pub fn can_create(&self, ctx: &Context<'_>) -> bool {
        self.creatable.allows(None, ctx)
    }

    pub fn can_update(&self, model: &Model, ctx: &Context<'_>) -> bool {
        self.updatable.allows(Some(model), ctx)
    }

    pub fn can_delete(&self, model: &Model, ctx: &Context<'_>) -> bool {
        self.deletable.allows(Some(model), ctx)
    }

    /// The wire id of `model`. Numeric ids are rendered as strings.
    pub fn id_of(&self, model: &Model, ctx: &Context<'_>) -> Result<String, JsonApiError> {
        match self.id.get_value(model, ctx, self.adapter())? {
            Value::String(id) => Ok(id),
            Value::Number(id) => Ok(id.to_string()),
            other => Err(JsonApiError::internal(format!(
                "model of type {} has no usable id: {}",
                self.name, other
            ))),
        }
    }

    /// Check field names and add the built-in filters and sorts.
    fn finalize(mut self) -> Result<Self, SchemaError> {
        if self.id_declarations > 1 {
            return Err(SchemaError::MultipleIdFields {
                resource: self.name.clone(),
            });
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name() == "id" || field.name() == "type" {
                return Err(SchemaError::InvalidDefinition {
                    path: format!("/resources/{}/fields/{}", self.name, field.name()),
                    message: "\"id\" and \"type\" are reserved member names".into(),
                });
            }
            if !seen.insert(field.name()) {
                return Err(SchemaError::DuplicateField {
                    resource: self.name.clone(),
                    field: field.name().to_string(),
                });
            }
        }

        let mut filters = Vec::new();
        let mut sorts = Vec::new();
        if self.find_filter("id").is_none() {
            filters.push(Filter::for_id(self.id.property()));
        }
        for field in &self.fields {
            if field.is_filterable() && self.find_filter(field.name()).is_none() {
                filters.push(Filter::for_field(field.clone()));
            }
            if field.is_sortable() && self.find_sort(field.name()).is_none() {
                sorts.push(Sort::by_property(field.name(), field.property()));
            }
        }
        if self.id.is_sortable() && self.find_sort("id").is_none() {
            sorts.push(Sort::by_property("id", self.id.property()));
        }
        self.filters.extend(filters);
        self.sorts.extend(sorts);
        Ok(self)
    }
}

/// All resource types served by one API.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: BTreeMap<String, ResourceType>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type. An existing type of the same name is replaced.
    ///
    /// # Errors
    ///
    /// Returns a `SchemaError` for duplicate or reserved field names and for
    /// more than one id field.
    pub fn register(&mut self, resource: ResourceType) -> Result<&mut Self, SchemaError> {
        let resource = resource.finalize()?;
        let name = resource.name.clone();
        if self.resources.insert(name.clone(), resource).is_some() {
            debug!(resource = %name, "replaced existing resource type");
        }
        Ok(self)
    }

    /// Builder form of [`Registry::register`].
    pub fn with(mut self, resource: ResourceType) -> Result<Self, SchemaError> {
        self.register(resource)?;
        Ok(self)
    }

    pub fn resource(&self, name: &str) -> Result<&ResourceType, SchemaError> {
        self.resources
            .get(name)
            .ok_or_else(|| SchemaError::UnknownResourceType {
                name: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&ResourceType> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Check that every relationship targets a registered type.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for resource in self.resources.values() {
            for field in &resource.fields {
                if let Some(rel) = field.relationship() {
                    if !self.contains(&rel.resource_type) {
                        return Err(SchemaError::UnknownRelationshipType {
                            resource: resource.name.clone(),
                            field: field.name().to_string(),
                            target: rel.resource_type.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
