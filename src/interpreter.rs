//! Query parameter interpretation.
//!
//! Turns a raw query string into validated [`QueryParams`] for one resource
//! type. Every unknown or malformed token is rejected with a `parameter`
//! source before any adapter is called.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::JsonApiError;
use crate::field::FieldKind;
use crate::pagination::PageRequest;
use crate::registry::{Registry, ResourceType};
use crate::sort::parse_token;
use crate::types::{json_type_name, SortDirection, QUERY_FAMILIES};

/// Parse a query string into nested objects keyed by bracket path.
///
/// `filter[author][name]=x` becomes `{"filter": {"author": {"name": "x"}}}`.
/// A repeated key keeps its last value.
pub fn parse_query_string(raw: &str) -> Result<Map<String, Value>, JsonApiError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw)
        .map_err(|e| JsonApiError::bad_request(format!("malformed query string: {}", e)))?;

    let mut query = Map::new();
    for (key, value) in pairs {
        let path = split_key(&key);
        insert_path(&mut query, &path, Value::String(value));
    }
    Ok(query)
}

/// Split `a[b][c]` into `["a", "b", "c"]`. Malformed keys stay whole.
fn split_key(key: &str) -> Vec<&str> {
    let Some(open) = key.find('[') else {
        return vec![key];
    };
    let mut segments = vec![&key[..open]];
    let mut rest = &key[open..];
    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return vec![key];
        };
        let Some(close) = inner.find(']') else {
            return vec![key];
        };
        segments.push(&inner[..close]);
        rest = &inner[close + 1..];
    }
    segments
}

fn insert_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = map;
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

/// Encode nested parameters back into a query string, brackets left literal.
pub fn encode_query(query: &Map<String, Value>) -> String {
    let mut pairs = Vec::new();
    for (key, value) in query {
        flatten(urlencoding::encode(key).into_owned(), value, &mut pairs);
    }
    pairs.join("&")
}

fn flatten(prefix: String, value: &Value, pairs: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten(
                    format!("{}[{}]", prefix, urlencoding::encode(key)),
                    nested,
                    pairs,
                );
            }
        }
        Value::String(s) => pairs.push(format!("{}={}", prefix, urlencoding::encode(s))),
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            pairs.push(format!("{}={}", prefix, urlencoding::encode(&joined)));
        }
        Value::Null => pairs.push(prefix),
        other => pairs.push(format!("{}={}", prefix, other)),
    }
}

/// Absolute link to `path` with `query` appended.
pub fn link(ctx: &Context<'_>, path: &str, query: &Map<String, Value>) -> String {
    let url = ctx.config.url(path);
    if query.is_empty() {
        url
    } else {
        format!("{}?{}", url, encode_query(query))
    }
}

/// Link to the current request.
pub fn request_link(ctx: &Context<'_>) -> Result<String, JsonApiError> {
    Ok(link(ctx, &ctx.request.path, &ctx.request.query()?))
}

/// Link to the current request with the `page` family replaced.
pub fn page_link(ctx: &Context<'_>, page: Map<String, Value>) -> Result<String, JsonApiError> {
    let mut query = ctx.request.query()?;
    query.insert("page".to_string(), Value::Object(page));
    Ok(link(ctx, &ctx.request.path, &query))
}

/// Relationship paths requested through `include`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeTree {
    children: BTreeMap<String, IncludeTree>,
}

impl IncludeTree {
    /// Build from dot-separated paths such as `comments.author`.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = IncludeTree::default();
        for path in paths {
            let mut node = &mut tree;
            for segment in path.as_ref().split('.') {
                node = node.children.entry(segment.to_string()).or_default();
            }
        }
        tree
    }

    pub fn child(&self, name: &str) -> Option<&IncludeTree> {
        self.children.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Check every segment against includable relationships, recursively.
    fn validate(&self, resource: &ResourceType, registry: &Registry, prefix: &str) -> Result<(), JsonApiError> {
        for (name, child) in &self.children {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            let target = resource
                .find_relationship(name)
                .and_then(|field| field.relationship())
                .filter(|rel| rel.includable)
                .and_then(|rel| registry.get(&rel.resource_type))
                .ok_or_else(|| {
                    JsonApiError::bad_parameter(
                        "include",
                        format!(
                            "\"{}\" is not an includable relationship of \"{}\"",
                            path,
                            resource.name()
                        ),
                    )
                })?;
            child.validate(target, registry, &path)?;
        }
        Ok(())
    }
}

/// Sparse fieldsets, per resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fieldsets {
    sets: HashMap<String, HashSet<String>>,
}

impl Fieldsets {
    pub fn insert<I, S>(&mut self, resource_type: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sets.insert(
            resource_type.into(),
            fields.into_iter().map(Into::into).collect(),
        );
    }

    /// True unless a fieldset for `resource_type` omits `field`.
    pub fn allows(&self, resource_type: &str, field: &str) -> bool {
        self.sets
            .get(resource_type)
            .map_or(true, |set| set.contains(field))
    }
}

/// Validated query parameters for one endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pub include: IncludeTree,
    pub fields: Fieldsets,
    /// `filter[name]` values in request order.
    pub filters: Vec<(String, Value)>,
    pub sorts: Vec<(String, SortDirection)>,
    pub page: Option<PageRequest>,
    /// Deserialized custom parameters.
    pub parameters: Map<String, Value>,
}

/// Interpret `query` for `resource`.
///
/// `collection` enables `filter`, `sort` and `page`; on single-resource
/// endpoints they are rejected.
pub fn interpret(
    resource: &ResourceType,
    registry: &Registry,
    query: &Map<String, Value>,
    collection: bool,
) -> Result<QueryParams, JsonApiError> {
    let mut params = QueryParams::default();

    for (name, value) in query {
        if QUERY_FAMILIES.contains(&name.as_str()) {
            if !collection && matches!(name.as_str(), "filter" | "sort" | "page") {
                return Err(JsonApiError::bad_parameter(
                    name,
                    format!("{} is only supported on collections", name),
                ));
            }
            continue;
        }
        match resource.find_field(name) {
            Some(field) if field.kind() == &FieldKind::Parameter => {
                let parsed = field.deserialize(value.clone());
                if let Some(violation) = field
                    .field_type()
                    .and_then(|ty| ty.validate(&parsed).into_iter().next())
                {
                    return Err(JsonApiError::bad_parameter(
                        name,
                        format!("invalid value for {}: {}", name, violation.message),
                    ));
                }
                params.parameters.insert(name.clone(), parsed);
            }
            _ if name.chars().all(|c| c.is_ascii_lowercase()) => {
                return Err(JsonApiError::bad_parameter(
                    name,
                    format!("unsupported query parameter \"{}\"", name),
                ));
            }
            _ => {}
        }
    }

    params.include = match query.get("include") {
        Some(value) => {
            let raw = expect_string(value, "include")?;
            IncludeTree::from_paths(csv(raw, "include")?)
        }
        None => IncludeTree::from_paths(resource.default_include_paths()),
    };
    params.include.validate(resource, registry, "")?;

    if let Some(value) = query.get("fields") {
        let Value::Object(sets) = value else {
            return Err(JsonApiError::bad_parameter(
                "fields",
                "fields must be given per type, as fields[type]",
            ));
        };
        for (resource_type, names) in sets {
            let parameter = format!("fields[{}]", resource_type);
            let target = registry.get(resource_type).ok_or_else(|| {
                JsonApiError::bad_parameter(
                    &parameter,
                    format!("unknown resource type \"{}\"", resource_type),
                )
            })?;
            let raw = expect_string(names, &parameter)?;
            let names: Vec<&str> = raw.split(',').filter(|s| !s.is_empty()).collect();
            if let Some(unknown) = names.iter().find(|n| target.find_field(n).is_none()) {
                return Err(JsonApiError::bad_parameter(
                    parameter,
                    format!("\"{}\" is not a field of \"{}\"", unknown, resource_type),
                ));
            }
            params.fields.insert(resource_type.clone(), names);
        }
    }

    if !collection {
        return Ok(params);
    }

    if let Some(value) = query.get("filter") {
        let Value::Object(filters) = value else {
            return Err(JsonApiError::bad_parameter(
                "filter",
                "filter must be given per name, as filter[name]",
            ));
        };
        for (name, value) in filters {
            if resource.find_filter(name).is_none() {
                return Err(JsonApiError::bad_parameter(
                    format!("filter[{}]", name),
                    format!("unknown filter \"{}\"", name),
                ));
            }
            params.filters.push((name.clone(), value.clone()));
        }
    }

    let tokens: Vec<String> = match query.get("sort") {
        Some(value) => csv(expect_string(value, "sort")?, "sort")?
            .into_iter()
            .map(str::to_string)
            .collect(),
        None => resource.default_sort_tokens().to_vec(),
    };
    for token in &tokens {
        let (name, direction) = parse_token(token);
        if resource.find_sort(name).is_none() {
            return Err(JsonApiError::bad_parameter(
                "sort",
                format!("unknown sort \"{}\"", name),
            ));
        }
        params.sorts.push((name.to_string(), direction));
    }

    params.page = match (resource.pagination(), query.get("page")) {
        (Some(pagination), page) => Some(pagination.parse(page)?),
        (None, Some(_)) => {
            return Err(JsonApiError::bad_parameter(
                "page",
                format!("\"{}\" is not paginated", resource.name()),
            ))
        }
        (None, None) => None,
    };

    Ok(params)
}

fn expect_string<'v>(value: &'v Value, parameter: &str) -> Result<&'v str, JsonApiError> {
    value.as_str().ok_or_else(|| {
        JsonApiError::bad_parameter(
            parameter,
            format!("expected a string, got {}", json_type_name(value)),
        )
    })
}

/// Split a comma-separated list. An empty string is an empty list.
fn csv<'v>(raw: &'v str, parameter: &str) -> Result<Vec<&'v str>, JsonApiError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let items: Vec<&str> = raw.split(',').map(str::trim).collect();
    if items.iter().any(|item| item.is_empty() || item.split('.').any(str::is_empty)) {
        return Err(JsonApiError::bad_parameter(
            parameter,
            format!("empty item in \"{}\"", raw),
        ));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // === Query String ===

    #[test]
    fn parses_bracket_paths() {
        let query =
            parse_query_string("include=author&filter%5Bage%5D%5Bgte%5D=18&fields[people]=name")
                .unwrap();
        assert_eq!(
            Value::Object(query),
            json!({
                "include": "author",
                "filter": { "age": { "gte": "18" } },
                "fields": { "people": "name" }
            })
        );
    }

    #[test]
    fn last_value_wins() {
        let query = parse_query_string("sort=a&sort=b").unwrap();
        assert_eq!(query["sort"], "b");
    }

    #[test]
    fn malformed_key_kept_whole() {
        let query = parse_query_string("a[b=1").unwrap();
        assert_eq!(query["a[b"], "1");
    }

    #[test]
    fn empty_query_string() {
        assert!(parse_query_string("").unwrap().is_empty());
    }

    #[test]
    fn encode_keeps_brackets_and_escapes_values() {
        let query = json!({ "filter": { "title": "a b" }, "page": { "limit": "2" } });
        let Value::Object(query) = query else { unreachable!() };
        assert_eq!(encode_query(&query), "filter[title]=a%20b&page[limit]=2");
    }

    // === Include Tree ===

    #[test]
    fn include_tree_merges_paths() {
        let tree = IncludeTree::from_paths(["comments.author", "comments", "author"]);
        assert_eq!(tree.names().collect::<Vec<_>>(), vec!["author", "comments"]);
        let comments = tree.child("comments").unwrap();
        assert!(comments.child("author").unwrap().is_empty());
    }

    #[test]
    fn csv_rejects_empty_segments() {
        assert!(csv("a,,b", "include").is_err());
        assert!(csv("a..b", "include").is_err());
        assert_eq!(csv("", "include").unwrap(), Vec::<&str>::new());
    }

    // === Fieldsets ===

    #[test]
    fn fieldsets_restrict_only_listed_types() {
        let mut fields = Fieldsets::default();
        fields.insert("people", ["name"]);
        assert!(fields.allows("people", "name"));
        assert!(!fields.allows("people", "age"));
        assert!(fields.allows("articles", "title"));
    }
}
