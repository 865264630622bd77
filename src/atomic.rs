//! Atomic operations extension.
//!
//! A batch runs strictly in order. Each operation is turned into an ordinary
//! request and routed through the regular endpoints. Local ids declared by
//! `add` operations are captured and substituted into every later operation
//! before it runs. The first failure aborts the batch, with its pointers
//! prefixed by `/atomic:operations/{i}`. Nothing is rolled back.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::JsonApiError;
use crate::server::{JsonApi, Request, Response};
use crate::types::{json_type_name, Method, ATOMIC_EXTENSION, MEDIA_TYPE};

/// Operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Update,
    Remove,
}

impl OpKind {
    fn parse(value: Option<&Value>) -> Result<Self, JsonApiError> {
        match value.and_then(Value::as_str) {
            Some("add") => Ok(OpKind::Add),
            Some("update") => Ok(OpKind::Update),
            Some("remove") => Ok(OpKind::Remove),
            Some(other) => Err(JsonApiError::bad_pointer(
                "/op",
                format!("unknown operation \"{}\"", other),
            )),
            None => Err(JsonApiError::bad_pointer("/op", "operation must have an op code")),
        }
    }

    fn method(self) -> Method {
        match self {
            OpKind::Add => Method::Post,
            OpKind::Update => Method::Patch,
            OpKind::Remove => Method::Delete,
        }
    }
}

/// `Content-Type` of atomic responses.
pub fn media_type() -> String {
    format!("{}; ext=\"{}\"", MEDIA_TYPE, ATOMIC_EXTENSION)
}

/// Replace every resolvable `lid` in `value` with the captured `id`.
///
/// Objects carrying a known `lid` lose it and gain the `id`. Unknown lids are
/// left in place. When `keep_own_lid` is set the top-level `data` object
/// keeps its lid, since it is the one being declared.
pub fn substitute_lids(value: Value, lids: &HashMap<String, String>, keep_own_lid: bool) -> Value {
    match value {
        Value::Object(map) if keep_own_lid => Value::Object(
            map.into_iter()
                .map(|(key, nested)| {
                    let nested = if key == "data" {
                        rewrite_data(nested, lids)
                    } else {
                        rewrite(nested, lids)
                    };
                    (key, nested)
                })
                .collect(),
        ),
        other => rewrite(other, lids),
    }
}

/// Rewrite the members of a declared resource, leaving its own lid alone.
fn rewrite_data(value: Value, lids: &HashMap<String, String>) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, nested)| (key, rewrite(nested, lids)))
                .collect(),
        ),
        other => rewrite(other, lids),
    }
}

fn rewrite(value: Value, lids: &HashMap<String, String>) -> Value {
    match value {
        Value::Object(map) => {
            let resolved = map
                .get("lid")
                .and_then(Value::as_str)
                .and_then(|lid| lids.get(lid))
                .cloned();
            let mut out = Map::with_capacity(map.len());
            for (key, nested) in map {
                if key == "lid" && resolved.is_some() {
                    continue;
                }
                out.insert(key, rewrite(nested, lids));
            }
            if let Some(id) = resolved {
                out.insert("id".to_string(), Value::String(id));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|v| rewrite(v, lids)).collect()),
        other => other,
    }
}

/// Run a batch.
pub(crate) fn run(api: &JsonApi, request: &Request) -> Result<Response, JsonApiError> {
    let body = request
        .body
        .as_ref()
        .ok_or_else(|| JsonApiError::bad_request("request document is missing"))?;
    let operations = match body.get("atomic:operations") {
        Some(Value::Array(operations)) => operations,
        Some(other) => {
            return Err(JsonApiError::bad_pointer(
                "/atomic:operations",
                format!("operations must be an array, got {}", json_type_name(other)),
            ))
        }
        None => {
            return Err(JsonApiError::bad_pointer(
                "",
                "request document has no atomic:operations member",
            ))
        }
    };

    let mut lids: HashMap<String, String> = HashMap::new();
    let mut results = Vec::with_capacity(operations.len());
    for (index, operation) in operations.iter().enumerate() {
        let prefix = format!("/atomic:operations/{}", index);
        match execute(api, operation, &lids) {
            Ok((result, captured)) => {
                if let Some((lid, id)) = captured {
                    debug!(lid = %lid, id = %id, "captured local id");
                    lids.insert(lid, id);
                }
                results.push(result);
            }
            Err(err) => {
                warn!(index, status = err.status(), "atomic operation failed, aborting batch");
                return Err(err.with_pointer_prefix(&prefix));
            }
        }
    }

    let mut body = Map::new();
    body.insert("atomic:results".to_string(), Value::Array(results));
    body.insert(
        "jsonapi".to_string(),
        json!({ "version": api.config().jsonapi_version, "ext": [ATOMIC_EXTENSION] }),
    );
    Ok(Response {
        status: 200,
        headers: vec![("Content-Type".to_string(), media_type())],
        body: Some(Value::Object(body)),
    })
}

/// Execute one operation. Returns its result and any `(lid, id)` it declared.
fn execute(
    api: &JsonApi,
    operation: &Value,
    lids: &HashMap<String, String>,
) -> Result<(Value, Option<(String, String)>), JsonApiError> {
    if !operation.is_object() {
        return Err(JsonApiError::bad_pointer(
            "",
            format!("operation must be an object, got {}", json_type_name(operation)),
        ));
    }
    let kind = OpKind::parse(operation.get("op"))?;
    if operation.get("ref").is_some() && operation.get("href").is_some() {
        return Err(JsonApiError::bad_pointer("", "ref and href are mutually exclusive"));
    }

    let operation = substitute_lids(operation.clone(), lids, kind == OpKind::Add);
    let data = operation.get("data").cloned();
    let path = target_path(api, kind, &operation)?;

    let query = match operation.get("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(params)) => params.clone(),
        Some(other) => {
            return Err(JsonApiError::bad_pointer(
                "/params",
                format!("params must be an object, got {}", json_type_name(other)),
            ))
        }
    };

    let mut sub = Request::new(kind.method(), &path).with_query(query);
    if let Some(data) = &data {
        sub = sub
            .with_header("Content-Type", MEDIA_TYPE)
            .with_body(json!({ "data": data }));
    }
    debug!(op = ?kind, path = %sub.path, "running atomic operation");
    let response = api.route(&sub)?;

    let captured = match (kind, &data, &response.body) {
        (OpKind::Add, Some(data), Some(body)) => data
            .get("lid")
            .and_then(Value::as_str)
            .zip(body["data"]["id"].as_str())
            .map(|(lid, id)| (lid.to_string(), id.to_string())),
        _ => None,
    };

    let result = match response.body {
        Some(Value::Object(mut document)) => {
            let mut result = Map::new();
            if let Some(data) = document.remove("data") {
                result.insert("data".to_string(), data);
            }
            if let Some(meta) = document.remove("meta") {
                result.insert("meta".to_string(), meta);
            }
            Value::Object(result)
        }
        _ => Value::Null,
    };
    Ok((result, captured))
}

/// Endpoint path for an operation, from `href`, `ref` or `data`.
fn target_path(api: &JsonApi, kind: OpKind, operation: &Value) -> Result<String, JsonApiError> {
    if let Some(href) = operation.get("href") {
        let href = href
            .as_str()
            .ok_or_else(|| JsonApiError::bad_pointer("/href", "href must be a string"))?;
        let base = &api.config().base_url;
        let path = if base.is_empty() {
            href
        } else {
            href.strip_prefix(base.as_str()).unwrap_or(href)
        };
        return Ok(path.split('?').next().unwrap_or_default().to_string());
    }

    if let Some(reference) = operation.get("ref") {
        if reference.get("relationship").is_some() {
            return Err(JsonApiError::bad_pointer(
                "/ref/relationship",
                "relationship operations are not supported",
            ));
        }
        let resource_type = reference
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonApiError::bad_pointer("/ref/type", "ref must have a string type"))?;
        return match (reference.get("id").and_then(Value::as_str), kind) {
            (Some(id), OpKind::Update | OpKind::Remove) => {
                Ok(format!("/{}/{}", resource_type, urlencoding::encode(id)))
            }
            (_, OpKind::Add) => Ok(format!("/{}", resource_type)),
            (None, _) if reference.get("lid").is_some() => Err(JsonApiError::bad_pointer(
                "/ref/lid",
                "local id does not refer to a resource created earlier",
            )),
            (None, _) => Err(JsonApiError::bad_pointer("/ref", "ref must have an id")),
        };
    }

    let data = operation
        .get("data")
        .ok_or_else(|| JsonApiError::bad_pointer("", "operation needs ref, href or data"))?;
    let resource_type = data
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonApiError::bad_pointer("/data/type", "data must have a string type"))?;
    match kind {
        OpKind::Add => Ok(format!("/{}", resource_type)),
        OpKind::Update => match data.get("id").and_then(Value::as_str) {
            Some(id) => Ok(format!("/{}/{}", resource_type, urlencoding::encode(id))),
            None if data.get("lid").is_some() => Err(JsonApiError::bad_pointer(
                "/data/lid",
                "local id does not refer to a resource created earlier",
            )),
            None => Err(JsonApiError::bad_pointer("/data", "data must have an id")),
        },
        OpKind::Remove => Err(JsonApiError::bad_pointer("", "remove requires ref or href")),
    }
}
