//! Resource endpoints: list, show, create, update and delete.

use serde_json::Value;
use tracing::info;

use crate::adapter::Model;
use crate::context::Context;
use crate::document::{Document, PrimaryData};
use crate::error::JsonApiError;
use crate::interpreter::{interpret, request_link, QueryParams};
use crate::registry::ResourceType;
use crate::resolver;
use crate::serializer::compound;
use crate::server::Response;
use crate::types::WriteMode;
use crate::write;

fn not_allowed(ctx: &Context<'_>) -> JsonApiError {
    JsonApiError::MethodNotAllowed {
        method: ctx.request.method.as_str().to_string(),
    }
}

/// `GET /{type}`
pub fn list(ctx: &Context<'_>, resource: &ResourceType) -> Result<Response, JsonApiError> {
    let params = interpret(resource, ctx.registry, &ctx.request.query()?, true)?;
    let ctx = ctx.clone().with_parameters(params.parameters.clone());

    let result = resolver::list(resource, &params, &ctx)?;
    let rendered = compound(&ctx, resource, result.page.results, &params.include, &params.fields)?;

    let mut primary = rendered.primary;
    for (object, cursor) in primary.iter_mut().zip(&result.cursors) {
        object.add_meta_path(&["page", "cursor"], Value::String(cursor.clone()));
    }

    let mut document = Document::with_data(&ctx.config.jsonapi_version, PrimaryData::Many(primary));
    if !params.include.is_empty() {
        document.included = Some(rendered.included);
    }
    document
        .links
        .insert("self".to_string(), Value::String(request_link(&ctx)?));
    document.links.extend(result.links);
    document.meta.extend(result.meta);
    Ok(Response::document(200, &document.finish(&ctx)))
}

/// `GET /{type}/{id}`
pub fn show(ctx: &Context<'_>, resource: &ResourceType, id: &str) -> Result<Response, JsonApiError> {
    let params = interpret(resource, ctx.registry, &ctx.request.query()?, false)?;
    let ctx = ctx.clone().with_parameters(params.parameters.clone());
    let model = resolver::find(resource, id, &ctx)?;
    let document = render_one(&ctx, resource, model, &params)?;
    Ok(Response::document(200, &document))
}

/// `POST /{type}`
pub fn create(ctx: &Context<'_>, resource: &ResourceType) -> Result<Response, JsonApiError> {
    let creatable = resource.adapter().creatable().ok_or_else(|| not_allowed(ctx))?;
    let params = interpret(resource, ctx.registry, &ctx.request.query()?, false)?;
    let ctx = ctx
        .clone()
        .with_mode(WriteMode::Create)
        .with_parameters(params.parameters.clone());
    if !resource.can_create(&ctx) {
        return Err(JsonApiError::forbidden(format!(
            "creating \"{}\" is not allowed",
            resource.name()
        )));
    }

    let data = write::primary_data(ctx.request.body.as_ref())?;
    write::check_type(resource, data)?;

    let mut model = creatable.new_model(&ctx);
    if let Some(id) = data.get("id") {
        let id_field = resource.id_field();
        if !id_field.is_writable(&model, &ctx, WriteMode::Create) {
            return Err(JsonApiError::forbidden_at(
                "/data/id",
                "client-generated ids are not supported",
            ));
        }
        if !id.is_string() {
            return Err(JsonApiError::bad_pointer("/data/id", "id must be a string"));
        }
        id_field.set_value(&mut model, id_field.deserialize(id.clone()), &ctx, resource.adapter())?;
    }

    let deferred = write::apply(resource, &mut model, data, &ctx)?;
    let model = creatable.create(model, &ctx)?;
    save(resource, &model, deferred, &ctx)?;

    let id = resource.id_of(&model, &ctx)?;
    info!(resource = %resource.name(), id = %id, "created resource");
    let location = ctx.config.url(&format!(
        "/{}/{}",
        resource.name(),
        urlencoding::encode(&id)
    ));
    let document = render_one(&ctx, resource, model, &params)?;
    Ok(Response::document(201, &document).with_header("Location", location))
}

/// `PATCH /{type}/{id}`
pub fn update(ctx: &Context<'_>, resource: &ResourceType, id: &str) -> Result<Response, JsonApiError> {
    let updatable = resource.adapter().updatable().ok_or_else(|| not_allowed(ctx))?;
    let params = interpret(resource, ctx.registry, &ctx.request.query()?, false)?;
    let ctx = ctx
        .clone()
        .with_mode(WriteMode::Update)
        .with_parameters(params.parameters.clone());

    let data = write::primary_data(ctx.request.body.as_ref())?;
    write::check_type(resource, data)?;
    match data.get("id") {
        Some(Value::String(data_id)) if data_id == id => {}
        Some(Value::String(data_id)) => {
            return Err(JsonApiError::conflict_at(
                "/data/id",
                format!("id \"{}\" does not match the endpoint id \"{}\"", data_id, id),
            ))
        }
        Some(_) => return Err(JsonApiError::bad_pointer("/data/id", "id must be a string")),
        None => return Err(JsonApiError::bad_pointer("/data", "data must have an id")),
    }

    let mut model = resolver::find(resource, id, &ctx)?;
    if !resource.can_update(&model, &ctx) {
        return Err(JsonApiError::forbidden(format!(
            "updating {}/{} is not allowed",
            resource.name(),
            id
        )));
    }

    let deferred = write::apply(resource, &mut model, data, &ctx)?;
    let model = updatable.update(model, &ctx)?;
    save(resource, &model, deferred, &ctx)?;
    info!(resource = %resource.name(), id = %id, "updated resource");

    let document = render_one(&ctx, resource, model, &params)?;
    Ok(Response::document(200, &document))
}

/// `DELETE /{type}/{id}`
pub fn delete(ctx: &Context<'_>, resource: &ResourceType, id: &str) -> Result<Response, JsonApiError> {
    let deletable = resource.adapter().deletable().ok_or_else(|| not_allowed(ctx))?;
    let model = resolver::find(resource, id, ctx)?;
    if !resource.can_delete(&model, ctx) {
        return Err(JsonApiError::forbidden(format!(
            "deleting {}/{} is not allowed",
            resource.name(),
            id
        )));
    }
    deletable.delete(&model, ctx)?;
    info!(resource = %resource.name(), id = %id, "deleted resource");
    Ok(Response::no_content())
}

fn save(
    resource: &ResourceType,
    model: &Model,
    deferred: Vec<write::DeferredSave<'_>>,
    ctx: &Context<'_>,
) -> Result<(), JsonApiError> {
    for (field, value) in deferred {
        field.save_value(model, value, ctx, resource.adapter())?;
    }
    Ok(())
}

/// A single-resource document with its includes.
fn render_one(
    ctx: &Context<'_>,
    resource: &ResourceType,
    model: Model,
    params: &QueryParams,
) -> Result<Document, JsonApiError> {
    let rendered = compound(ctx, resource, vec![model], &params.include, &params.fields)?;
    let primary = rendered.primary.into_iter().next();
    let self_link = primary
        .as_ref()
        .and_then(|object| object.links.get("self").cloned());

    let mut document = Document::with_data(&ctx.config.jsonapi_version, PrimaryData::One(primary));
    if !params.include.is_empty() {
        document.included = Some(rendered.included);
    }
    if let Some(link) = self_link {
        document.links.insert("self".to_string(), link);
    }
    Ok(document.finish(ctx))
}
