//! Resource fields.
//!
//! A [`Field`] is one property of a resource type: the id, an attribute, a
//! to-one or to-many relationship, a resource meta or link member, or a
//! custom query parameter. Behavior is configured with closures injected at
//! schema-build time; the registry never changes afterwards.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::adapter::{Adapter, Model};
use crate::context::Context;
use crate::error::{escape_pointer, JsonApiError, Violation};
use crate::field_type::FieldType;
use crate::types::WriteMode;

pub type Predicate = Arc<dyn Fn(&Model, &Context<'_>) -> bool + Send + Sync>;
pub type Getter = Arc<dyn Fn(&Model, &Context<'_>) -> Result<Value, JsonApiError> + Send + Sync>;
pub type Setter =
    Arc<dyn Fn(&mut Model, Value, &Context<'_>) -> Result<(), JsonApiError> + Send + Sync>;
pub type Saver = Arc<dyn Fn(&Model, Value, &Context<'_>) -> Result<(), JsonApiError> + Send + Sync>;
pub type DefaultValue = Arc<dyn Fn(&Context<'_>) -> Value + Send + Sync>;
pub type Validator = Arc<dyn Fn(&Value, &Model, &Context<'_>) -> Vec<Violation> + Send + Sync>;

/// Whether something is allowed for a given model.
#[derive(Clone)]
pub enum Rule {
    Always,
    Never,
    When(Predicate),
}

impl Rule {
    pub fn check(&self, model: &Model, ctx: &Context<'_>) -> bool {
        match self {
            Rule::Always => true,
            Rule::Never => false,
            Rule::When(predicate) => predicate(model, ctx),
        }
    }
}

/// Target of a relationship field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub resource_type: String,
    pub includable: bool,
    /// Render linkage even when the relationship is not included.
    pub linkage: bool,
}

/// The kind of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Attribute,
    ToOne(Relationship),
    ToMany(Relationship),
    Meta,
    Link,
    Parameter,
}

/// One property of a resource type.
#[derive(Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    property: Option<String>,
    visible: Rule,
    writable: Rule,
    writable_on_create: Rule,
    nullable: bool,
    required: bool,
    field_type: Option<FieldType>,
    getter: Option<Getter>,
    setter: Option<Setter>,
    saver: Option<Saver>,
    default: Option<DefaultValue>,
    validators: Vec<Validator>,
    filterable: bool,
    split_filter_values: bool,
    sortable: bool,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("property", &self.property)
            .field("nullable", &self.nullable)
            .field("required", &self.required)
            .field("field_type", &self.field_type)
            .finish_non_exhaustive()
    }
}

impl Field {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            property: None,
            visible: Rule::Always,
            writable: Rule::Never,
            writable_on_create: Rule::Never,
            nullable: false,
            required: false,
            field_type: None,
            getter: None,
            setter: None,
            saver: None,
            default: None,
            validators: Vec::new(),
            filterable: false,
            split_filter_values: true,
            sortable: false,
        }
    }

    /// The resource id, read from the `id` property.
    pub fn id() -> Self {
        Self::new("id", FieldKind::Id)
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Attribute)
    }

    pub fn to_one(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::new(name, FieldKind::ToOne(Relationship::new(resource_type)))
    }

    pub fn to_many(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self::new(name, FieldKind::ToMany(Relationship::new(resource_type)))
    }

    pub fn meta(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Meta)
    }

    pub fn link(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Link)
    }

    /// A custom query parameter accepted by the resource's endpoints.
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Parameter)
    }

    // --- Builder ---

    /// Read and write a model property other than the field name.
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = Rule::Never;
        self
    }

    pub fn visible_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Model, &Context<'_>) -> bool + Send + Sync + 'static,
    {
        self.visible = Rule::When(Arc::new(predicate));
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = Rule::Always;
        self
    }

    pub fn writable_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Model, &Context<'_>) -> bool + Send + Sync + 'static,
    {
        self.writable = Rule::When(Arc::new(predicate));
        self
    }

    /// Writable when creating, regardless of `writable`.
    pub fn writable_on_create(mut self) -> Self {
        self.writable_on_create = Rule::Always;
        self
    }

    pub fn writable_on_create_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Model, &Context<'_>) -> bool + Send + Sync + 'static,
    {
        self.writable_on_create = Rule::When(Arc::new(predicate));
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Must be supplied when creating.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_type(mut self, field_type: impl Into<FieldType>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }

    pub fn get<F>(mut self, getter: F) -> Self
    where
        F: Fn(&Model, &Context<'_>) -> Result<Value, JsonApiError> + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn set<F>(mut self, setter: F) -> Self
    where
        F: Fn(&mut Model, Value, &Context<'_>) -> Result<(), JsonApiError> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Persist the value after the model is saved, instead of setting it before.
    pub fn save<F>(mut self, saver: F) -> Self
    where
        F: Fn(&Model, Value, &Context<'_>) -> Result<(), JsonApiError> + Send + Sync + 'static,
    {
        self.saver = Some(Arc::new(saver));
        self
    }

    pub fn default<F>(mut self, default: F) -> Self
    where
        F: Fn(&Context<'_>) -> Value + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(default));
        self
    }

    pub fn default_value(self, value: Value) -> Self {
        self.default(move |_| value.clone())
    }

    pub fn validate_with<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value, &Model, &Context<'_>) -> Vec<Violation> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    /// Match scalar `filter[name]` values whole instead of splitting them
    /// on commas.
    pub fn whole_filter_values(mut self) -> Self {
        self.split_filter_values = false;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Allow the relationship in `include`. No effect on other kinds.
    pub fn includable(mut self) -> Self {
        if let FieldKind::ToOne(rel) | FieldKind::ToMany(rel) = &mut self.kind {
            rel.includable = true;
        }
        self
    }

    /// Always render relationship linkage. No effect on other kinds.
    pub fn with_linkage(mut self) -> Self {
        if let FieldKind::ToOne(rel) | FieldKind::ToMany(rel) = &mut self.kind {
            rel.linkage = true;
        }
        self
    }

    // --- Accessors ---

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn property(&self) -> &str {
        self.property.as_deref().unwrap_or(&self.name)
    }

    pub fn field_type(&self) -> Option<&FieldType> {
        self.field_type.as_ref()
    }

    pub fn relationship(&self) -> Option<&Relationship> {
        match &self.kind {
            FieldKind::ToOne(rel) | FieldKind::ToMany(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn is_attribute(&self) -> bool {
        self.kind == FieldKind::Attribute
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_filterable(&self) -> bool {
        self.filterable
    }

    pub fn splits_filter_values(&self) -> bool {
        self.split_filter_values
    }

    pub fn is_sortable(&self) -> bool {
        self.sortable
    }

    pub fn has_saver(&self) -> bool {
        self.saver.is_some()
    }

    pub fn accepts_null(&self) -> bool {
        self.nullable || self.field_type.as_ref().is_some_and(FieldType::is_nullable)
    }

    /// JSON Pointer to this field in a write document.
    pub fn pointer(&self) -> String {
        let name = escape_pointer(&self.name);
        match self.kind {
            FieldKind::Id => "/data/id".to_string(),
            FieldKind::ToOne(_) | FieldKind::ToMany(_) => {
                format!("/data/relationships/{}", name)
            }
            FieldKind::Meta => format!("/data/meta/{}", name),
            _ => format!("/data/attributes/{}", name),
        }
    }

    // --- Behavior ---

    pub fn is_visible(&self, model: &Model, ctx: &Context<'_>) -> bool {
        self.visible.check(model, ctx)
    }

    /// Create: writable-on-create OR writable. Update: writable only.
    pub fn is_writable(&self, model: &Model, ctx: &Context<'_>, mode: WriteMode) -> bool {
        match mode {
            WriteMode::Create => {
                self.writable_on_create.check(model, ctx) || self.writable.check(model, ctx)
            }
            WriteMode::Update => self.writable.check(model, ctx),
        }
    }

    pub fn default_for(&self, ctx: &Context<'_>) -> Option<Value> {
        self.default.as_ref().map(|default| default(ctx))
    }

    pub fn get_value(
        &self,
        model: &Model,
        ctx: &Context<'_>,
        adapter: &dyn Adapter,
    ) -> Result<Value, JsonApiError> {
        match &self.getter {
            Some(getter) => getter(model, ctx),
            None => adapter.get_value(model, self, ctx),
        }
    }

    pub fn set_value(
        &self,
        model: &mut Model,
        value: Value,
        ctx: &Context<'_>,
        adapter: &dyn Adapter,
    ) -> Result<(), JsonApiError> {
        match &self.setter {
            Some(setter) => setter(model, value, ctx),
            None => adapter.set_value(model, self, value, ctx),
        }
    }

    pub fn save_value(
        &self,
        model: &Model,
        value: Value,
        ctx: &Context<'_>,
        adapter: &dyn Adapter,
    ) -> Result<(), JsonApiError> {
        match &self.saver {
            Some(saver) => saver(model, value, ctx),
            None => adapter.save_value(model, self, value, ctx),
        }
    }

    pub(crate) fn has_getter(&self) -> bool {
        self.getter.is_some()
    }

    /// Wire → internal.
    pub fn deserialize(&self, value: Value) -> Value {
        match &self.field_type {
            Some(ty) => ty.deserialize(value),
            None => value,
        }
    }

    /// Internal → wire.
    pub fn serialize(&self, value: Value) -> Value {
        match &self.field_type {
            Some(ty) => ty.serialize(value),
            None => value,
        }
    }

    /// Validate a deserialized value, collecting every violation.
    ///
    /// Null short-circuits: it passes when the field accepts null and is a
    /// single violation otherwise.
    pub fn validate(&self, value: &Value, model: &Model, ctx: &Context<'_>) -> Vec<Violation> {
        if value.is_null() {
            return if self.accepts_null() {
                Vec::new()
            } else {
                vec![Violation::new("must not be null")]
            };
        }

        let mut violations = match &self.field_type {
            Some(ty) => ty.validate(value),
            None => Vec::new(),
        };
        for validator in &self.validators {
            violations.extend(validator(value, model, ctx));
        }
        violations
    }
}

impl Relationship {
    fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            includable: false,
            linkage: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::Registry;
    use crate::server::Request;
    use serde_json::json;

    fn with_ctx(f: impl FnOnce(&Context<'_>)) {
        let registry = Registry::new();
        let config = Config::default();
        let request = Request::get("/");
        let ctx = Context::new(&registry, &config, &request);
        f(&ctx);
    }

    #[test]
    fn create_writability_includes_writable_on_create() {
        with_ctx(|ctx| {
            let model = json!({});
            let field = Field::attribute("slug").writable_on_create();
            assert!(field.is_writable(&model, ctx, WriteMode::Create));
            assert!(!field.is_writable(&model, ctx, WriteMode::Update));

            let field = Field::attribute("title").writable();
            assert!(field.is_writable(&model, ctx, WriteMode::Create));
            assert!(field.is_writable(&model, ctx, WriteMode::Update));
        });
    }

    #[test]
    fn writable_predicate_sees_model() {
        with_ctx(|ctx| {
            let field = Field::attribute("title")
                .writable_if(|model, _| model["locked"] != json!(true));
            assert!(field.is_writable(&json!({ "locked": false }), ctx, WriteMode::Update));
            assert!(!field.is_writable(&json!({ "locked": true }), ctx, WriteMode::Update));
        });
    }

    #[test]
    fn null_violation_unless_nullable() {
        with_ctx(|ctx| {
            let model = json!({});
            let strict = Field::attribute("age").with_type(FieldType::integer());
            assert_eq!(strict.validate(&Value::Null, &model, ctx).len(), 1);

            let lax = Field::attribute("age").with_type(FieldType::integer()).nullable();
            assert!(lax.validate(&Value::Null, &model, ctx).is_empty());

            let typed = Field::attribute("age").with_type(FieldType::integer().nullable());
            assert!(typed.validate(&Value::Null, &model, ctx).is_empty());
        });
    }

    #[test]
    fn custom_validators_accumulate() {
        with_ctx(|ctx| {
            let field = Field::attribute("name")
                .with_type(FieldType::string())
                .validate_with(|value, _, _| {
                    if value == "admin" {
                        vec![Violation::new("is reserved")]
                    } else {
                        Vec::new()
                    }
                });
            let violations = field.validate(&json!("admin"), &json!({}), ctx);
            assert_eq!(violations, vec![Violation::new("is reserved")]);
        });
    }

    #[test]
    fn pointers_by_kind() {
        assert_eq!(Field::attribute("title").pointer(), "/data/attributes/title");
        assert_eq!(
            Field::to_one("author", "people").pointer(),
            "/data/relationships/author"
        );
        assert_eq!(Field::id().pointer(), "/data/id");
    }

    #[test]
    fn property_defaults_to_name() {
        assert_eq!(Field::attribute("title").property(), "title");
        assert_eq!(
            Field::attribute("createdAt").with_property("created_at").property(),
            "created_at"
        );
    }

    #[test]
    fn includable_only_affects_relationships() {
        let field = Field::to_many("comments", "comments").includable();
        assert!(field.relationship().unwrap().includable);
        assert!(Field::attribute("x").includable().relationship().is_none());
    }
}
