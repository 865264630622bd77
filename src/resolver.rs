//! Resource resolution against adapter capabilities.
//!
//! The resolver never looks at storage. It builds a [`Query`] in a fixed
//! order (scope, then filters in request order, then sorts, then the page
//! window) and hands it to the adapter.

use tracing::debug;

use crate::adapter::Model;
use crate::context::Context;
use crate::error::JsonApiError;
use crate::interpreter::QueryParams;
use crate::pagination::{single_page, PageResult};
use crate::query::Query;
use crate::registry::ResourceType;

fn not_allowed(ctx: &Context<'_>) -> JsonApiError {
    JsonApiError::MethodNotAllowed {
        method: ctx.request.method.as_str().to_string(),
    }
}

/// Fetch one resource by id.
///
/// # Errors
///
/// `MethodNotAllowed` when the adapter cannot find by id, `ResourceNotFound`
/// when nothing matches.
pub fn find(resource: &ResourceType, id: &str, ctx: &Context<'_>) -> Result<Model, JsonApiError> {
    let findable = resource.adapter().findable().ok_or_else(|| not_allowed(ctx))?;
    findable
        .find(id, ctx)?
        .ok_or_else(|| JsonApiError::ResourceNotFound {
            resource_type: resource.name().to_string(),
            id: id.to_string(),
            location: None,
        })
}

/// Build the query for a collection request without running it.
pub fn build_query(
    resource: &ResourceType,
    params: &QueryParams,
    ctx: &Context<'_>,
) -> Result<Query, JsonApiError> {
    let listable = resource.adapter().listable().ok_or_else(|| not_allowed(ctx))?;
    let mut query = listable.query(ctx);
    if query.resource_type.is_empty() {
        query.resource_type = resource.name().to_string();
    }

    resource.apply_scope(&mut query, ctx)?;
    for (name, value) in &params.filters {
        let filter = resource.find_filter(name).ok_or_else(|| {
            JsonApiError::bad_parameter(format!("filter[{}]", name), "unknown filter")
        })?;
        filter.apply(&mut query, value, ctx)?;
    }
    for (name, direction) in &params.sorts {
        let sort = resource
            .find_sort(name)
            .ok_or_else(|| JsonApiError::bad_parameter("sort", format!("unknown sort \"{}\"", name)))?;
        sort.apply(&mut query, *direction, ctx)?;
    }
    Ok(query)
}

/// Fetch one page of a collection.
///
/// # Errors
///
/// `Forbidden` when listing is denied, `MethodNotAllowed` when the adapter
/// is not listable, plus anything raised by filters, sorts or the adapter.
pub fn list(
    resource: &ResourceType,
    params: &QueryParams,
    ctx: &Context<'_>,
) -> Result<PageResult, JsonApiError> {
    let listable = resource.adapter().listable().ok_or_else(|| not_allowed(ctx))?;
    if !resource.can_list(ctx) {
        return Err(JsonApiError::forbidden(format!(
            "listing \"{}\" is not allowed",
            resource.name()
        )));
    }

    let query = build_query(resource, params, ctx)?;
    debug!(
        resource = %resource.name(),
        conditions = query.conditions.len(),
        sorts = query.sorts.len(),
        "resolving collection"
    );

    match (resource.pagination(), &params.page) {
        (Some(pagination), Some(page)) => pagination.paginate(resource, query, page, ctx),
        _ => Ok(single_page(listable.results(&query, ctx)?)),
    }
}
