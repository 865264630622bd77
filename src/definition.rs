//! Declarative resource definitions.
//!
//! A definition document describes a whole API as JSON:
//!
//! ```json
//! {
//!   "config": { "baseUrl": "https://api.example.com" },
//!   "resources": {
//!     "articles": {
//!       "fields": {
//!         "title": { "kind": "attribute", "type": { "type": "string", "minLength": 1 },
//!                    "required": true, "writable": true, "sortable": true },
//!         "author": { "kind": "toOne", "resourceType": "people", "includable": true }
//!       },
//!       "pagination": { "offset": { "defaultLimit": 20, "maxLimit": 100 } },
//!       "creatable": true
//!     }
//!   }
//! }
//! ```
//!
//! The document is checked against an embedded meta-schema first, so
//! structural mistakes are reported together with their paths. Field types
//! use a JSON Schema subset (`type`, `format`, `enum`, `pattern`, length,
//! range and item constraints, `properties`, `oneOf`, `allOf`, `not`).

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::adapter::Adapter;
use crate::config::Config;
use crate::error::{LoadError, SchemaError, Violation};
use crate::field::Field;
use crate::field_type::{ArrayType, FieldType, NumberType, ObjectType, StringType};
use crate::pagination::Pagination;
use crate::registry::{Registry, ResourceType};

/// A compiled definition.
#[derive(Debug, Clone)]
pub struct Definition {
    pub config: Config,
    pub registry: Registry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionDoc {
    #[serde(default)]
    config: Config,
    resources: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ResourceDoc {
    fields: Map<String, Value>,
    pagination: Option<PaginationDoc>,
    default_sort: Vec<String>,
    default_include: Vec<String>,
    listable: Option<bool>,
    countable: Option<bool>,
    creatable: bool,
    updatable: bool,
    deletable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum PaginationDoc {
    Offset {
        #[serde(rename = "defaultLimit")]
        default_limit: usize,
        #[serde(rename = "maxLimit")]
        max_limit: Option<usize>,
    },
    Cursor {
        #[serde(rename = "defaultSize")]
        default_size: usize,
        #[serde(rename = "maxSize")]
        max_size: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum KindDoc {
    Id,
    Attribute,
    ToOne,
    ToMany,
    Meta,
    Link,
    Parameter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldDoc {
    kind: KindDoc,
    #[serde(default)]
    resource_type: Option<String>,
    #[serde(default, rename = "type")]
    field_type: Option<Value>,
    #[serde(default)]
    property: Option<String>,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    writable: bool,
    #[serde(default)]
    writable_on_create: bool,
    #[serde(default)]
    nullable: bool,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    filterable: bool,
    #[serde(default)]
    filter_csv: Option<bool>,
    #[serde(default)]
    sortable: bool,
    #[serde(default)]
    includable: bool,
    #[serde(default)]
    linkage: bool,
}

fn meta_schema() -> &'static Value {
    static META_SCHEMA: OnceLock<Value> = OnceLock::new();
    META_SCHEMA.get_or_init(|| {
        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "required": ["resources"],
            "additionalProperties": false,
            "properties": {
                "config": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "baseUrl": { "type": "string" },
                        "atomicPath": { "type": "string", "pattern": "^/" },
                        "exposeInternalErrors": { "type": "boolean" },
                        "jsonapiVersion": { "type": "string" },
                        "meta": { "type": "object" }
                    }
                },
                "resources": {
                    "type": "object",
                    "propertyNames": { "pattern": "^[A-Za-z0-9_-]+$" },
                    "additionalProperties": { "$ref": "#/$defs/resource" }
                }
            },
            "$defs": {
                "resource": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "fields": {
                            "type": "object",
                            "additionalProperties": { "$ref": "#/$defs/field" }
                        },
                        "pagination": {
                            "oneOf": [
                                {
                                    "type": "object",
                                    "required": ["offset"],
                                    "additionalProperties": false,
                                    "properties": {
                                        "offset": {
                                            "type": "object",
                                            "required": ["defaultLimit"],
                                            "additionalProperties": false,
                                            "properties": {
                                                "defaultLimit": { "type": "integer", "minimum": 1 },
                                                "maxLimit": { "type": "integer", "minimum": 1 }
                                            }
                                        }
                                    }
                                },
                                {
                                    "type": "object",
                                    "required": ["cursor"],
                                    "additionalProperties": false,
                                    "properties": {
                                        "cursor": {
                                            "type": "object",
                                            "required": ["defaultSize", "maxSize"],
                                            "additionalProperties": false,
                                            "properties": {
                                                "defaultSize": { "type": "integer", "minimum": 1 },
                                                "maxSize": { "type": "integer", "minimum": 1 }
                                            }
                                        }
                                    }
                                }
                            ]
                        },
                        "defaultSort": { "type": "array", "items": { "type": "string" } },
                        "defaultInclude": { "type": "array", "items": { "type": "string" } },
                        "listable": { "type": "boolean" },
                        "countable": { "type": "boolean" },
                        "creatable": { "type": "boolean" },
                        "updatable": { "type": "boolean" },
                        "deletable": { "type": "boolean" }
                    }
                },
                "field": {
                    "type": "object",
                    "required": ["kind"],
                    "additionalProperties": false,
                    "properties": {
                        "kind": {
                            "enum": ["id", "attribute", "toOne", "toMany", "meta", "link", "parameter"]
                        },
                        "resourceType": { "type": "string" },
                        "type": { "type": "object" },
                        "property": { "type": "string" },
                        "hidden": { "type": "boolean" },
                        "writable": { "type": "boolean" },
                        "writableOnCreate": { "type": "boolean" },
                        "nullable": { "type": "boolean" },
                        "required": { "type": "boolean" },
                        "default": {},
                        "filterable": { "type": "boolean" },
                        "filterCsv": { "type": "boolean" },
                        "sortable": { "type": "boolean" },
                        "includable": { "type": "boolean" },
                        "linkage": { "type": "boolean" }
                    },
                    "if": { "properties": { "kind": { "enum": ["toOne", "toMany"] } } },
                    "then": { "required": ["resourceType"] }
                }
            }
        })
    })
}

/// Check a definition document against the meta-schema.
///
/// # Errors
///
/// Returns `LoadError::InvalidDefinition` listing every structural problem.
pub fn validate_definition(doc: &Value) -> Result<(), LoadError> {
    let validator = jsonschema::validator_for(meta_schema()).map_err(|e| {
        LoadError::Schema(SchemaError::InvalidDefinition {
            path: String::new(),
            message: e.to_string(),
        })
    })?;

    let errors: Vec<Violation> = validator
        .iter_errors(doc)
        .map(|e| Violation {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(LoadError::InvalidDefinition { errors })
    }
}

/// Validate and compile a definition document.
///
/// `adapter_for` is called once per resource type to supply its storage.
/// The returned registry has already passed [`Registry::validate`].
pub fn build_definition<F>(doc: &Value, mut adapter_for: F) -> Result<Definition, LoadError>
where
    F: FnMut(&str) -> Arc<dyn Adapter>,
{
    validate_definition(doc)?;
    let parsed: DefinitionDoc = deserialize(doc, "")?;

    let mut registry = Registry::new();
    for (name, resource) in &parsed.resources {
        let resource: ResourceDoc = deserialize(resource, &format!("/resources/{}", name))?;
        let built = build_resource(name, resource, adapter_for(name))?;
        registry.register(built)?;
    }
    registry.validate()?;
    debug!(resources = registry.names().count(), "built definition");

    let base_url = parsed.config.base_url.clone();
    Ok(Definition {
        config: parsed.config.base_url(base_url),
        registry,
    })
}

fn deserialize<T: serde::de::DeserializeOwned>(value: &Value, path: &str) -> Result<T, LoadError> {
    T::deserialize(value).map_err(|e| {
        LoadError::Schema(SchemaError::InvalidDefinition {
            path: path.to_string(),
            message: e.to_string(),
        })
    })
}

fn build_resource(
    name: &str,
    doc: ResourceDoc,
    adapter: Arc<dyn Adapter>,
) -> Result<ResourceType, LoadError> {
    let mut resource = ResourceType::new(name, adapter)
        .default_sort(doc.default_sort)
        .default_include(doc.default_include)
        .creatable(doc.creatable)
        .updatable(doc.updatable)
        .deletable(doc.deletable);
    if let Some(listable) = doc.listable {
        resource = resource.listable(listable);
    }
    if let Some(countable) = doc.countable {
        resource = resource.countable(countable);
    }
    resource = match doc.pagination {
        Some(PaginationDoc::Offset {
            default_limit,
            max_limit: Some(max),
        }) => resource.paginate(Pagination::offset_with_max(default_limit, max)),
        Some(PaginationDoc::Offset { default_limit, .. }) => {
            resource.paginate(Pagination::offset(default_limit))
        }
        Some(PaginationDoc::Cursor {
            default_size,
            max_size,
        }) => resource.paginate(Pagination::cursor(default_size, max_size)),
        None => resource,
    };

    for (field_name, field) in &doc.fields {
        let path = format!("/resources/{}/fields/{}", name, field_name);
        let field: FieldDoc = deserialize(field, &path)?;
        resource = resource.field(build_field(field_name, field, &path)?);
    }
    Ok(resource)
}

fn build_field(name: &str, doc: FieldDoc, path: &str) -> Result<Field, SchemaError> {
    let target = || doc.resource_type.clone().unwrap_or_default();
    let mut field = match doc.kind {
        KindDoc::Id => Field::id(),
        KindDoc::Attribute => Field::attribute(name),
        KindDoc::ToOne => Field::to_one(name, target()),
        KindDoc::ToMany => Field::to_many(name, target()),
        KindDoc::Meta => Field::meta(name),
        KindDoc::Link => Field::link(name),
        KindDoc::Parameter => Field::parameter(name),
    };
    if doc.kind == KindDoc::Id && name != "id" {
        field = field.with_property(name);
    }

    if let Some(property) = doc.property {
        field = field.with_property(property);
    }
    if let Some(ty) = &doc.field_type {
        field = field.with_type(parse_field_type(ty, &format!("{}/type", path))?);
    }
    if doc.hidden {
        field = field.hidden();
    }
    if doc.writable {
        field = field.writable();
    }
    if doc.writable_on_create {
        field = field.writable_on_create();
    }
    if doc.nullable {
        field = field.nullable();
    }
    if doc.required {
        field = field.required();
    }
    if let Some(default) = doc.default {
        field = field.default_value(default);
    }
    if doc.filterable {
        field = field.filterable();
    }
    if doc.filter_csv == Some(false) {
        field = field.whole_filter_values();
    }
    if doc.sortable {
        field = field.sortable();
    }
    if doc.includable {
        field = field.includable();
    }
    if doc.linkage {
        field = field.with_linkage();
    }
    Ok(field)
}

/// Build a [`FieldType`] from a JSON Schema fragment.
///
/// # Errors
///
/// `InvalidDefinition` for unsupported types, `InvalidPattern` for patterns
/// that do not compile.
pub fn parse_field_type(schema: &Value, path: &str) -> Result<FieldType, SchemaError> {
    let invalid = |message: String| SchemaError::InvalidDefinition {
        path: path.to_string(),
        message,
    };
    let Some(obj) = schema.as_object() else {
        return Err(invalid("type must be an object".to_string()));
    };

    let members = |key: &str| -> Result<Vec<FieldType>, SchemaError> {
        obj[key]
            .as_array()
            .ok_or_else(|| invalid(format!("{} must be an array", key)))?
            .iter()
            .enumerate()
            .map(|(i, member)| parse_field_type(member, &format!("{}/{}/{}", path, key, i)))
            .collect()
    };
    if obj.contains_key("oneOf") {
        return Ok(FieldType::OneOf(members("oneOf")?));
    }
    if obj.contains_key("allOf") {
        return Ok(FieldType::AllOf(members("allOf")?));
    }
    if let Some(inner) = obj.get("not") {
        return Ok(FieldType::Not(Box::new(parse_field_type(
            inner,
            &format!("{}/not", path),
        )?)));
    }

    // `"type": ["string", "null"]` is the nullable form.
    let (type_name, nullable) = match obj.get("type") {
        None => (None, false),
        Some(Value::String(s)) => (Some(s.as_str()), false),
        Some(Value::Array(names)) => {
            let nullable = names.iter().any(|n| n == "null");
            let mut concrete = names.iter().filter_map(Value::as_str).filter(|n| *n != "null");
            match (concrete.next(), concrete.next()) {
                (first, None) => (first, nullable),
                _ => return Err(invalid("only one non-null type is supported".to_string())),
            }
        }
        Some(other) => return Err(invalid(format!("invalid type {}", other))),
    };

    let ty = match type_name {
        None => FieldType::Any,
        Some("string") => match obj.get("format").and_then(Value::as_str) {
            Some("date") => FieldType::Date,
            Some("date-time") => FieldType::DateTime,
            _ => FieldType::String(string_type(obj, path)?),
        },
        Some("number") => FieldType::Number(number_type(obj)),
        Some("integer") => FieldType::Integer(number_type(obj)),
        Some("boolean") => FieldType::Boolean,
        Some("array") => {
            let mut array = ArrayType::default();
            if let Some(items) = obj.get("items") {
                array = array.items(parse_field_type(items, &format!("{}/items", path))?);
            }
            if let Some(min) = usize_of(obj, "minItems") {
                array = array.min_items(min);
            }
            if let Some(max) = usize_of(obj, "maxItems") {
                array = array.max_items(max);
            }
            if obj.get("uniqueItems") == Some(&Value::Bool(true)) {
                array = array.unique_items();
            }
            FieldType::Array(array)
        }
        Some("object") => {
            let mut object = ObjectType::default();
            if let Some(properties) = obj.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    let property_path = format!("{}/properties/{}", path, name);
                    object = object.property(name, parse_field_type(property, &property_path)?);
                }
            }
            if let Some(required) = obj.get("required").and_then(Value::as_array) {
                object = object.required(required.iter().filter_map(Value::as_str));
            }
            if obj.get("additionalProperties") == Some(&Value::Bool(false)) {
                object = object.additional_properties(false);
            }
            FieldType::Object(object)
        }
        Some(other) => return Err(invalid(format!("unsupported type \"{}\"", other))),
    };
    Ok(if nullable { ty.nullable() } else { ty })
}

fn string_type(obj: &Map<String, Value>, path: &str) -> Result<StringType, SchemaError> {
    let mut string = StringType::default();
    if let Some(min) = usize_of(obj, "minLength") {
        string = string.min_length(min);
    }
    if let Some(max) = usize_of(obj, "maxLength") {
        string = string.max_length(max);
    }
    if let Some(pattern) = obj.get("pattern").and_then(Value::as_str) {
        let regex = Regex::new(pattern).map_err(|e| SchemaError::InvalidPattern {
            pattern: pattern.to_string(),
            message: format!("{} (at {}/pattern)", e, path),
        })?;
        string = string.pattern(regex);
    }
    if let Some(values) = obj.get("enum").and_then(Value::as_array) {
        string = string.enumeration(values.iter().filter_map(Value::as_str));
    }
    Ok(string)
}

fn number_type(obj: &Map<String, Value>) -> NumberType {
    let mut number = NumberType::default();
    let float = |key: &str| obj.get(key).and_then(Value::as_f64);
    if let Some(min) = float("exclusiveMinimum") {
        number = number.minimum(min, true);
    } else if let Some(min) = float("minimum") {
        number = number.minimum(min, false);
    }
    if let Some(max) = float("exclusiveMaximum") {
        number = number.maximum(max, true);
    } else if let Some(max) = float("maximum") {
        number = number.maximum(max, false);
    }
    if let Some(step) = float("multipleOf") {
        number = number.multiple_of(step);
    }
    number
}

fn usize_of(obj: &Map<String, Value>, key: &str) -> Option<usize> {
    obj.get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;

    struct NoStorage;
    impl Adapter for NoStorage {}

    fn no_storage(_: &str) -> Arc<dyn Adapter> {
        Arc::new(NoStorage)
    }

    fn blog() -> Value {
        json!({
            "config": { "baseUrl": "https://example.com/api/" },
            "resources": {
                "articles": {
                    "fields": {
                        "title": {
                            "kind": "attribute",
                            "type": { "type": "string", "minLength": 1 },
                            "required": true,
                            "writable": true,
                            "sortable": true
                        },
                        "author": { "kind": "toOne", "resourceType": "people", "includable": true }
                    },
                    "pagination": { "offset": { "defaultLimit": 10, "maxLimit": 50 } },
                    "defaultSort": ["title"],
                    "creatable": true
                },
                "people": {
                    "fields": { "name": { "kind": "attribute", "filterable": true } }
                }
            }
        })
    }

    // === Building ===

    #[test]
    fn builds_registry_and_config() {
        let definition = build_definition(&blog(), no_storage).unwrap();
        assert_eq!(definition.config.base_url, "https://example.com/api");
        let names: Vec<_> = definition.registry.names().collect();
        assert_eq!(names, vec!["articles", "people"]);

        let articles = definition.registry.resource("articles").unwrap();
        assert!(articles.find_sort("title").is_some());
        assert!(matches!(articles.pagination(), Some(Pagination::Offset(_))));
        assert_eq!(articles.default_sort_tokens(), ["title".to_string()]);
        let author = articles.find_relationship("author").unwrap();
        assert!(matches!(author.kind(), FieldKind::ToOne(rel) if rel.includable));
    }

    #[test]
    fn unknown_relationship_target_is_rejected() {
        let mut doc = blog();
        doc["resources"]["articles"]["fields"]["author"]["resourceType"] = json!("authors");
        let err = build_definition(&doc, no_storage).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Schema(SchemaError::UnknownRelationshipType { .. })
        ));
    }

    // === Meta-schema ===

    #[test]
    fn structural_errors_are_collected() {
        let doc = json!({
            "resources": {
                "articles": {
                    "fields": {
                        "author": { "kind": "toOne" },
                        "title": { "kind": "text" }
                    },
                    "creatable": "yes"
                }
            }
        });
        match validate_definition(&doc) {
            Err(LoadError::InvalidDefinition { errors }) => assert!(errors.len() >= 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_resources_is_invalid() {
        assert!(matches!(
            validate_definition(&json!({ "config": {} })),
            Err(LoadError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn filter_csv_can_be_turned_off() {
        let mut doc = blog();
        doc["resources"]["people"]["fields"]["name"]["filterCsv"] = json!(false);
        let definition = build_definition(&doc, no_storage).unwrap();
        let people = definition.registry.resource("people").unwrap();
        assert!(!people.find_field("name").unwrap().splits_filter_values());

        let articles = definition.registry.resource("articles").unwrap();
        assert!(articles.find_field("title").unwrap().splits_filter_values());
    }

    // === Field Types ===

    #[test]
    fn parses_formats_and_nullability() {
        let ty = parse_field_type(&json!({ "type": ["string", "null"], "format": "date" }), "").unwrap();
        assert!(ty.is_nullable());
        assert_eq!(ty.name(), "date");
        assert!(ty.validate(&json!("2024-02-30")).len() == 1);
    }

    #[test]
    fn parses_nested_constraints() {
        let ty = parse_field_type(
            &json!({
                "type": "array",
                "items": { "type": "integer", "minimum": 0 },
                "uniqueItems": true
            }),
            "",
        )
        .unwrap();
        let violations = ty.validate(&json!([1, -1, 1]));
        assert_eq!(violations.len(), 2);
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = parse_field_type(&json!({ "type": "string", "pattern": "(" }), "/x").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidPattern { .. }));
    }

    #[test]
    fn unsupported_type_is_reported() {
        let err = parse_field_type(&json!({ "type": "uuid" }), "/x").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidDefinition { path, .. } if path == "/x"));
    }
}
