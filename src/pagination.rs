//! Pagination policies.
//!
//! A resource type has at most one policy. [`Pagination::parse`] validates the
//! `page[...]` family before anything touches the adapter; [`Pagination::paginate`]
//! runs the windowed query and produces the page links and meta.
//!
//! Offset pagination follows the JSON:API recommendations (`page[offset]`,
//! `page[limit]`). Cursor pagination follows the ethanresnick cursor
//! pagination profile (`page[size]`, `page[after]`, `page[before]`).

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::adapter::{Model, Page};
use crate::context::Context;
use crate::error::{JsonApiError, MAX_SIZE_EXCEEDED, RANGE_PAGINATION_NOT_SUPPORTED};
use crate::interpreter::page_link;
use crate::query::Query;
use crate::registry::ResourceType;
use crate::types::json_type_name;

/// Offset/limit policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetPagination {
    pub default_limit: usize,
    pub max_limit: Option<usize>,
}

/// Opaque cursor policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorPagination {
    pub default_size: usize,
    pub max_size: usize,
}

/// The pagination policy of a resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    Offset(OffsetPagination),
    Cursor(CursorPagination),
}

/// A validated `page[...]` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    Offset {
        offset: usize,
        limit: usize,
    },
    Cursor {
        size: usize,
        after: Option<String>,
        before: Option<String>,
    },
}

/// A page of primary results with its document links and meta.
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub page: Page,
    pub links: Map<String, Value>,
    pub meta: Map<String, Value>,
    /// Cursor of each result, aligned with `page.results`. Empty for offsets.
    pub cursors: Vec<String>,
}

impl Pagination {
    pub fn offset(default_limit: usize) -> Self {
        Pagination::Offset(OffsetPagination {
            default_limit,
            max_limit: None,
        })
    }

    pub fn offset_with_max(default_limit: usize, max_limit: usize) -> Self {
        Pagination::Offset(OffsetPagination {
            default_limit,
            max_limit: Some(max_limit),
        })
    }

    pub fn cursor(default_size: usize, max_size: usize) -> Self {
        Pagination::Cursor(CursorPagination {
            default_size,
            max_size,
        })
    }

    /// Validate the `page` family. `None` means the parameter was absent.
    pub fn parse(&self, page: Option<&Value>) -> Result<PageRequest, JsonApiError> {
        let empty = Map::new();
        let page = match page {
            None => &empty,
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(JsonApiError::bad_parameter(
                    "page",
                    format!("page must be a family of parameters, got {}", json_type_name(other)),
                ))
            }
        };

        match self {
            Pagination::Offset(policy) => {
                reject_unknown(page, &["offset", "limit"])?;
                let offset = integer(page, "offset")?.unwrap_or(0);
                let limit = match integer(page, "limit")? {
                    Some(0) => {
                        return Err(JsonApiError::bad_parameter(
                            "page[limit]",
                            "limit must be a positive integer",
                        ))
                    }
                    Some(limit) => limit,
                    None => policy.default_limit,
                };
                let limit = policy.max_limit.map_or(limit, |max| limit.min(max));
                Ok(PageRequest::Offset { offset, limit })
            }
            Pagination::Cursor(policy) => {
                reject_unknown(page, &["size", "after", "before"])?;
                let size = match integer(page, "size")? {
                    Some(0) => {
                        return Err(JsonApiError::bad_parameter(
                            "page[size]",
                            "size must be a positive integer",
                        ))
                    }
                    Some(size) if size > policy.max_size => {
                        let mut meta = Map::new();
                        meta.insert("page".into(), json!({ "maxSize": policy.max_size }));
                        return Err(JsonApiError::PageProfile {
                            detail: format!("page size must not exceed {}", policy.max_size),
                            parameter: "page[size]".into(),
                            profile: MAX_SIZE_EXCEEDED,
                            meta,
                        });
                    }
                    Some(size) => size,
                    None => policy.default_size,
                };
                let after = string(page, "after")?;
                let before = string(page, "before")?;
                if after.is_some() && before.is_some() {
                    return Err(JsonApiError::PageProfile {
                        detail: "page[after] and page[before] cannot be combined".into(),
                        parameter: "page".into(),
                        profile: RANGE_PAGINATION_NOT_SUPPORTED,
                        meta: Map::new(),
                    });
                }
                Ok(PageRequest::Cursor {
                    size,
                    after,
                    before,
                })
            }
        }
    }

    /// Run `query` for one page.
    pub fn paginate(
        &self,
        resource: &ResourceType,
        mut query: Query,
        request: &PageRequest,
        ctx: &Context<'_>,
    ) -> Result<PageResult, JsonApiError> {
        let adapter = resource.adapter();
        match *request {
            PageRequest::Offset { offset, limit } => {
                let paginatable = adapter.paginatable().ok_or_else(|| {
                    JsonApiError::MethodNotAllowed {
                        method: ctx.request.method.as_str().to_string(),
                    }
                })?;
                let listable = adapter.listable().ok_or_else(|| JsonApiError::MethodNotAllowed {
                    method: ctx.request.method.as_str().to_string(),
                })?;
                let total = match adapter.countable() {
                    Some(countable) if resource.can_count(ctx) => {
                        countable.count(&query.unwindowed(), ctx)?
                    }
                    _ => None,
                };
                paginatable.paginate(&mut query, offset, limit, ctx);
                let results = listable.results(&query, ctx)?;
                debug!(resource = %resource.name(), offset, limit, ?total, returned = results.len(), "offset page");

                let is_last_page = match total {
                    Some(total) => offset.saturating_add(limit) >= total,
                    None => results.len() < limit,
                };
                let page = Page {
                    results,
                    is_first_page: offset == 0,
                    is_last_page,
                    range_truncated: false,
                    total,
                };
                Ok(PageResult {
                    links: offset_links(ctx, offset, limit, &page)?,
                    meta: total
                        .map(|total| page_meta(json!({ "total": total })))
                        .unwrap_or_default(),
                    page,
                    cursors: Vec::new(),
                })
            }
            PageRequest::Cursor {
                size,
                ref after,
                ref before,
            } => {
                let paginatable = adapter.cursor_paginatable().ok_or_else(|| {
                    JsonApiError::MethodNotAllowed {
                        method: ctx.request.method.as_str().to_string(),
                    }
                })?;
                let mut page = paginatable.cursor_paginate(
                    &query,
                    size,
                    after.as_deref(),
                    before.as_deref(),
                    ctx,
                )?;
                if page.total.is_none() && resource.can_count(ctx) {
                    if let Some(countable) = adapter.countable() {
                        page.total = countable.count(&query.unwindowed(), ctx)?;
                    }
                }
                let cursors = page
                    .results
                    .iter()
                    .map(|model| paginatable.cursor(model))
                    .collect::<Result<Vec<_>, _>>()?;
                debug!(resource = %resource.name(), size, returned = page.results.len(), "cursor page");

                let mut meta = json!({ "rangeTruncated": page.range_truncated });
                if let Some(total) = page.total {
                    meta["total"] = json!(total);
                }
                Ok(PageResult {
                    links: cursor_links(ctx, size, &page, &cursors)?,
                    meta: page_meta(meta),
                    page,
                    cursors,
                })
            }
        }
    }
}

/// Wrap an unpaginated listing as a single page.
pub(crate) fn single_page(results: Vec<Model>) -> PageResult {
    PageResult {
        page: Page {
            results,
            is_first_page: true,
            is_last_page: true,
            range_truncated: false,
            total: None,
        },
        ..PageResult::default()
    }
}

fn page_meta(value: Value) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("page".into(), value);
    meta
}

fn offset_links(
    ctx: &Context<'_>,
    offset: usize,
    limit: usize,
    page: &Page,
) -> Result<Map<String, Value>, JsonApiError> {
    let window = |offset: usize| {
        let mut page = Map::new();
        if offset > 0 {
            page.insert("offset".into(), Value::String(offset.to_string()));
        }
        page.insert("limit".into(), Value::String(limit.to_string()));
        page
    };

    let mut links = Map::new();
    links.insert("first".into(), Value::String(page_link(ctx, window(0))?));
    if !page.is_first_page {
        let prev = offset.saturating_sub(limit);
        links.insert("prev".into(), Value::String(page_link(ctx, window(prev))?));
    }
    if !page.is_last_page {
        links.insert(
            "next".into(),
            Value::String(page_link(ctx, window(offset.saturating_add(limit)))?),
        );
    }
    if let Some(total) = page.total {
        let last = if total == 0 { 0 } else { (total - 1) / limit * limit };
        links.insert("last".into(), Value::String(page_link(ctx, window(last))?));
    }
    Ok(links)
}

fn cursor_links(
    ctx: &Context<'_>,
    size: usize,
    page: &Page,
    cursors: &[String],
) -> Result<Map<String, Value>, JsonApiError> {
    let window = |key: &str, cursor: &str| {
        let mut page = Map::new();
        page.insert("size".into(), Value::String(size.to_string()));
        page.insert(key.into(), Value::String(cursor.to_string()));
        page
    };

    let mut links = Map::new();
    let mut first = Map::new();
    first.insert("size".into(), Value::String(size.to_string()));
    links.insert("first".into(), Value::String(page_link(ctx, first)?));
    match (page.is_first_page, cursors.first()) {
        (false, Some(cursor)) => {
            links.insert(
                "prev".into(),
                Value::String(page_link(ctx, window("before", cursor))?),
            );
        }
        _ => {
            links.insert("prev".into(), Value::Null);
        }
    }
    match (page.is_last_page, cursors.last()) {
        (false, Some(cursor)) => {
            links.insert(
                "next".into(),
                Value::String(page_link(ctx, window("after", cursor))?),
            );
        }
        _ => {
            links.insert("next".into(), Value::Null);
        }
    }
    Ok(links)
}

fn reject_unknown(page: &Map<String, Value>, allowed: &[&str]) -> Result<(), JsonApiError> {
    match page.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(JsonApiError::bad_parameter(
            format!("page[{}]", key),
            format!("unsupported page parameter \"{}\"", key),
        )),
        None => Ok(()),
    }
}

fn integer(page: &Map<String, Value>, key: &str) -> Result<Option<usize>, JsonApiError> {
    let invalid = || {
        JsonApiError::bad_parameter(
            format!("page[{}]", key),
            format!("page[{}] must be a non-negative integer", key),
        )
    };
    match page.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(invalid),
        Some(_) => Err(invalid()),
    }
}

fn string(page: &Map<String, Value>, key: &str) -> Result<Option<String>, JsonApiError> {
    match page.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(JsonApiError::bad_parameter(
            format!("page[{}]", key),
            format!("page[{}] must be a string", key),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Offset ===

    #[test]
    fn offset_defaults() {
        let request = Pagination::offset(20).parse(None).unwrap();
        assert_eq!(request, PageRequest::Offset { offset: 0, limit: 20 });
    }

    #[test]
    fn offset_limit_clamped_to_max() {
        let page = json!({ "offset": "10", "limit": "500" });
        let request = Pagination::offset_with_max(20, 100).parse(Some(&page)).unwrap();
        assert_eq!(request, PageRequest::Offset { offset: 10, limit: 100 });
    }

    #[test]
    fn offset_rejects_negative_and_zero() {
        let policy = Pagination::offset(20);
        assert!(policy.parse(Some(&json!({ "offset": "-1" }))).is_err());
        assert!(policy.parse(Some(&json!({ "limit": "0" }))).is_err());
    }

    #[test]
    fn offset_rejects_cursor_keys() {
        let err = Pagination::offset(20)
            .parse(Some(&json!({ "size": "2" })))
            .unwrap_err();
        let objects = err.to_error_objects(false);
        assert_eq!(
            objects[0].source,
            Some(crate::error::ErrorSource::parameter("page[size]"))
        );
    }

    // === Cursor ===

    #[test]
    fn cursor_max_size_exceeded() {
        let err = Pagination::cursor(10, 50)
            .parse(Some(&json!({ "size": "51" })))
            .unwrap_err();
        let objects = err.to_error_objects(false);
        assert_eq!(objects[0].status, "400");
        assert_eq!(objects[0].links["type"], MAX_SIZE_EXCEEDED);
        assert_eq!(objects[0].meta["page"]["maxSize"], 50);
    }

    #[test]
    fn cursor_range_not_supported() {
        let err = Pagination::cursor(10, 50)
            .parse(Some(&json!({ "after": "a", "before": "b" })))
            .unwrap_err();
        let objects = err.to_error_objects(false);
        assert_eq!(objects[0].links["type"], RANGE_PAGINATION_NOT_SUPPORTED);
    }

    #[test]
    fn cursor_after() {
        let request = Pagination::cursor(10, 50)
            .parse(Some(&json!({ "after": "c3" })))
            .unwrap();
        assert_eq!(
            request,
            PageRequest::Cursor {
                size: 10,
                after: Some("c3".into()),
                before: None,
            }
        );
    }

    #[test]
    fn scalar_page_rejected() {
        assert!(Pagination::offset(5).parse(Some(&json!("2"))).is_err());
    }
}
