//! JSON:API core
//!
//! Schema-driven request interpretation, compound document serialization and
//! atomic operations for [JSON:API](https://jsonapi.org) servers.
//!
//! Resource types are registered once in a [`Registry`]. Each owns an
//! [`Adapter`] which advertises the storage capabilities it supports. A
//! [`JsonApi`] value routes transport-neutral [`Request`]s through query
//! interpretation, resolution against the adapter and serialization into a
//! compound [`Document`].
//!
//! # Example
//!
//! ```
//! use jsonapi_core::{Config, Field, JsonApi, MemoryStore, Registry, Request, ResourceType};
//! use serde_json::json;
//!
//! let store = MemoryStore::new();
//! store
//!     .seed("people", vec![json!({ "id": "1", "name": "Ada" })])
//!     .unwrap();
//!
//! let registry = Registry::new()
//!     .with(
//!         ResourceType::new("people", store.adapter("people").into_arc())
//!             .field(Field::attribute("name").sortable()),
//!     )
//!     .unwrap();
//!
//! let api = JsonApi::new(registry, Config::default()).unwrap();
//! let response = api.handle(&Request::get("/people/1"));
//!
//! assert_eq!(response.status, 200);
//! let body = response.body.unwrap();
//! assert_eq!(body["data"]["attributes"]["name"], "Ada");
//! ```
//!
//! # Request Pipeline
//!
//! | Stage | Module | Failure |
//! |-------|--------|---------|
//! | Negotiation | `server` | 406 / 415 |
//! | Query parameters | `interpreter` | 400 with a `parameter` source |
//! | Resolution | `resolver`, `pagination` | 403 / 404 / 405 |
//! | Write documents | `write` | 400 / 403 / 409 / 422 with a `pointer` source |
//! | Serialization | `serializer` | 500 |
//!
//! Atomic batches (`POST` to [`Config::atomic_path`]) run each operation
//! through the same pipeline in order and stop at the first failure.

mod adapter;
mod atomic;
mod config;
mod context;
mod definition;
mod document;
mod endpoint;
mod error;
mod field;
mod field_type;
mod filter;
mod interpreter;
mod loader;
mod memory;
mod pagination;
mod query;
mod registry;
mod resolver;
mod serializer;
mod server;
mod sort;
mod types;
mod write;

pub use adapter::{
    Adapter, Countable, Creatable, CursorPaginatable, Deletable, Findable, Listable, Model, Page,
    Paginatable, Related, Updatable,
};
pub use atomic::{substitute_lids, OpKind};
pub use config::Config;
pub use context::Context;
pub use definition::{build_definition, parse_field_type, validate_definition, Definition};
pub use document::{Document, JsonApiObject, PrimaryData, ResourceObject};
pub use error::{
    aggregate_status, status_title, ErrorObject, ErrorSource, JsonApiError, LoadError,
    SchemaError, Violation, MAX_SIZE_EXCEEDED, RANGE_PAGINATION_NOT_SUPPORTED,
};
pub use field::{Field, FieldKind, Relationship, Rule};
pub use field_type::{ArrayType, FieldType, NumberType, ObjectType, StringType};
pub use filter::Filter;
pub use interpreter::{encode_query, interpret, parse_query_string, Fieldsets, IncludeTree, QueryParams};
pub use loader::{is_url, load_definition, load_json, load_json_auto, load_json_str};
pub use memory::{MemoryAdapter, MemoryStore};
pub use pagination::{CursorPagination, OffsetPagination, PageRequest, PageResult, Pagination};
pub use query::{Condition, Operator, PageWindow, Query, SortClause};
pub use registry::{Capability, Registry, ResourceType};
pub use serializer::{compound, resource_object, Compound};
pub use server::{JsonApi, Request, Response};
pub use sort::Sort;
pub use types::{
    Method, ResourceIdentifier, SortDirection, WriteMode, ATOMIC_EXTENSION,
    CURSOR_PAGINATION_PROFILE, MEDIA_TYPE,
};

#[cfg(feature = "remote")]
pub use loader::load_json_url;
