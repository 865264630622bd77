//! Applying a write document to a model.
//!
//! Attribute and relationship members are checked for existence and
//! writability, deserialized and validated. Violations are collected across
//! every field and reported together as one `UnprocessableEntity`. Values go
//! to the model through field setters; fields with a saver are returned to
//! the caller to be persisted after the model itself.

use serde_json::{Map, Value};

use crate::adapter::Model;
use crate::context::Context;
use crate::error::{escape_pointer, ErrorObject, ErrorSource, JsonApiError, Violation};
use crate::field::{Field, FieldKind};
use crate::registry::ResourceType;
use crate::types::{json_type_name, ResourceIdentifier, WriteMode};

/// A value to persist after the model has been created or updated.
pub type DeferredSave<'r> = (&'r Field, Value);

/// The `data` object of a write request.
pub fn primary_data(body: Option<&Value>) -> Result<&Map<String, Value>, JsonApiError> {
    let body = body.ok_or_else(|| JsonApiError::bad_request("request document is missing"))?;
    match body.get("data") {
        Some(Value::Object(data)) => Ok(data),
        Some(other) => Err(JsonApiError::bad_pointer(
            "/data",
            format!("data must be a resource object, got {}", json_type_name(other)),
        )),
        None => Err(JsonApiError::bad_pointer("", "request document has no data member")),
    }
}

/// Check `data.type` against the endpoint's resource type.
pub fn check_type(resource: &ResourceType, data: &Map<String, Value>) -> Result<(), JsonApiError> {
    match data.get("type") {
        Some(Value::String(ty)) if ty == resource.name() => Ok(()),
        Some(Value::String(ty)) => Err(JsonApiError::conflict_at(
            "/data/type",
            format!("type \"{}\" does not match endpoint \"{}\"", ty, resource.name()),
        )),
        _ => Err(JsonApiError::bad_pointer("/data/type", "data must have a string type")),
    }
}

/// Apply `data` to `model`, returning the fields to save afterwards.
///
/// # Errors
///
/// `BadRequest` for unknown members, `Forbidden` for non-writable fields,
/// `Conflict`/`ResourceNotFound` for bad linkage and one
/// `UnprocessableEntity` for all validation failures.
pub fn apply<'r>(
    resource: &'r ResourceType,
    model: &mut Model,
    data: &Map<String, Value>,
    ctx: &Context<'_>,
) -> Result<Vec<DeferredSave<'r>>, JsonApiError> {
    let mode = ctx.mode().unwrap_or(WriteMode::Update);
    let mut values: Vec<(&'r Field, Value)> = Vec::new();
    let mut violations: Vec<ErrorObject> = Vec::new();

    for (name, value) in member(data, "attributes")? {
        let pointer = format!("/data/attributes/{}", escape_pointer(name));
        let field = resource
            .find_field(name)
            .filter(|f| f.is_attribute())
            .ok_or_else(|| {
                JsonApiError::bad_pointer(&pointer, format!("unknown attribute \"{}\"", name))
            })?;
        if !field.is_writable(model, ctx, mode) {
            return Err(JsonApiError::forbidden_at(
                pointer,
                format!("attribute \"{}\" is not writable", name),
            ));
        }
        let value = field.deserialize(value.clone());
        violations.extend(to_errors(&pointer, field.validate(&value, model, ctx)));
        values.push((field, value));
    }

    for (name, relationship) in member(data, "relationships")? {
        let pointer = format!("/data/relationships/{}", escape_pointer(name));
        let field = resource.find_relationship(name).ok_or_else(|| {
            JsonApiError::bad_pointer(&pointer, format!("unknown relationship \"{}\"", name))
        })?;
        if !field.is_writable(model, ctx, mode) {
            return Err(JsonApiError::forbidden_at(
                pointer,
                format!("relationship \"{}\" is not writable", name),
            ));
        }
        let linkage = relationship.get("data").ok_or_else(|| {
            JsonApiError::bad_pointer(&pointer, "relationship object must have a data member")
        })?;
        let value = resolve_linkage(field, linkage, &format!("{}/data", pointer), ctx)?;
        violations.extend(to_errors(&pointer, field.validate(&value, model, ctx)));
        values.push((field, value));
    }

    if mode == WriteMode::Create {
        for field in resource.fields() {
            let writable_member = matches!(
                field.kind(),
                FieldKind::Attribute | FieldKind::ToOne(_) | FieldKind::ToMany(_)
            );
            if !writable_member || values.iter().any(|(f, _)| f.name() == field.name()) {
                continue;
            }
            if let Some(default) = field.default_for(ctx) {
                values.push((field, default));
            } else if field.is_required() {
                violations.push(
                    ErrorObject::new(422, Some(format!("{} is required", field.name())))
                        .with_source(Some(ErrorSource::pointer(field.pointer()))),
                );
            }
        }
    }

    if !violations.is_empty() {
        return Err(JsonApiError::UnprocessableEntity { errors: violations });
    }

    let adapter = resource.adapter();
    let mut deferred = Vec::new();
    for (field, value) in values {
        if field.has_saver() {
            deferred.push((field, value));
        } else {
            field.set_value(model, value, ctx, adapter)?;
        }
    }
    Ok(deferred)
}

fn member<'d>(
    data: &'d Map<String, Value>,
    key: &str,
) -> Result<impl Iterator<Item = (&'d String, &'d Value)>, JsonApiError> {
    match data.get(key) {
        None => Ok(None::<serde_json::map::Iter<'d>>.into_iter().flatten()),
        Some(Value::Object(members)) => Ok(Some(members.iter()).into_iter().flatten()),
        Some(other) => Err(JsonApiError::bad_pointer(
            format!("/data/{}", key),
            format!("{} must be an object, got {}", key, json_type_name(other)),
        )),
    }
}

fn to_errors(pointer: &str, violations: Vec<Violation>) -> impl Iterator<Item = ErrorObject> + '_ {
    violations.into_iter().map(move |v| {
        ErrorObject::new(422, Some(v.message))
            .with_source(Some(ErrorSource::pointer(format!("{}{}", pointer, v.path))))
    })
}

/// Resolve relationship linkage to full models via the target's finder.
fn resolve_linkage(
    field: &Field,
    linkage: &Value,
    pointer: &str,
    ctx: &Context<'_>,
) -> Result<Value, JsonApiError> {
    let Some(rel) = field.relationship() else {
        return Err(JsonApiError::internal("linkage on a non-relationship field"));
    };
    match (field.kind(), linkage) {
        (FieldKind::ToOne(_), Value::Null) => Ok(Value::Null),
        (FieldKind::ToOne(_), identifier) => {
            resolve_identifier(&rel.resource_type, identifier, pointer, ctx)
        }
        (FieldKind::ToMany(_), Value::Array(identifiers)) => identifiers
            .iter()
            .enumerate()
            .map(|(i, identifier)| {
                resolve_identifier(&rel.resource_type, identifier, &format!("{}/{}", pointer, i), ctx)
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (_, other) => Err(JsonApiError::bad_pointer(
            pointer,
            format!("to-many linkage must be an array, got {}", json_type_name(other)),
        )),
    }
}

fn resolve_identifier(
    expected: &str,
    identifier: &Value,
    pointer: &str,
    ctx: &Context<'_>,
) -> Result<Value, JsonApiError> {
    let identifier = ResourceIdentifier::parse(identifier, pointer)?;
    if identifier.resource_type != expected {
        return Err(JsonApiError::conflict_at(
            format!("{}/type", pointer),
            format!(
                "type \"{}\" is not allowed here, expected \"{}\"",
                identifier.resource_type, expected
            ),
        ));
    }
    let Some(id) = identifier.id else {
        return Err(JsonApiError::bad_pointer(
            format!("{}/lid", pointer),
            format!(
                "local id \"{}\" does not refer to a resource created earlier",
                identifier.lid.unwrap_or_default()
            ),
        ));
    };

    let target = ctx.registry.resource(expected)?;
    let Some(findable) = target.adapter().findable() else {
        return Ok(serde_json::json!({ "id": id }));
    };
    findable
        .find(&id, ctx)?
        .ok_or_else(|| JsonApiError::ResourceNotFound {
            resource_type: expected.to_string(),
            id,
            location: Some(ErrorSource::pointer(pointer)),
        })
}
