//! Shared blog fixture: people, articles and comments over in-memory storage.

#![allow(dead_code)]

use jsonapi_core::{
    Config, Field, FieldType, JsonApi, MemoryStore, Pagination, Registry, Request, Response,
    ResourceType, StringType, ATOMIC_EXTENSION, MEDIA_TYPE,
};
use serde_json::{json, Value};

pub struct Blog {
    pub api: JsonApi,
    pub store: MemoryStore,
}

impl Blog {
    pub fn handle(&self, request: Request) -> Response {
        self.api.handle(&request)
    }

    pub fn get(&self, target: &str) -> Response {
        self.handle(Request::get(target))
    }

    /// Response body, which every non-204 response carries.
    pub fn body(&self, request: Request) -> (u16, Value) {
        let response = self.handle(request);
        (response.status, response.body.unwrap_or(Value::Null))
    }
}

pub fn seed(store: &MemoryStore) {
    store
        .seed(
            "people",
            vec![
                json!({ "id": "1", "name": "Ada", "articles": ["1", "2"] }),
                json!({ "id": "2", "name": "Grace", "articles": ["3", "5"] }),
                json!({ "id": "3", "name": "Alan", "articles": [] }),
            ],
        )
        .unwrap();
    store
        .seed(
            "articles",
            vec![
                json!({ "id": "1", "title": "Alpha", "views": 10, "slug": "alpha", "author": "1", "comments": ["1", "2"] }),
                json!({ "id": "2", "title": "Beta", "views": 3, "slug": "beta", "author": "1", "comments": ["3"] }),
                json!({ "id": "3", "title": "Gamma", "views": 7, "slug": "gamma", "author": "2", "comments": [] }),
                json!({ "id": "4", "title": "Delta", "views": 0, "slug": "delta", "author": null, "comments": [] }),
                json!({ "id": "5", "title": "Epsilon", "views": 12, "slug": "epsilon", "author": "2", "comments": [] }),
            ],
        )
        .unwrap();
    store
        .seed(
            "comments",
            vec![
                json!({ "id": "1", "body": "First", "author": "2", "article": "1" }),
                json!({ "id": "2", "body": "Second", "author": "1", "article": "1" }),
                json!({ "id": "3", "body": "Third", "author": "2", "article": "2" }),
            ],
        )
        .unwrap();
}

pub fn registry(store: &MemoryStore) -> Registry {
    Registry::new()
        .with(
            ResourceType::new("people", store.adapter("people").into_arc())
                .field(
                    Field::attribute("name")
                        .with_type(StringType::default().min_length(1))
                        .writable()
                        .filterable()
                        .sortable(),
                )
                .field(Field::to_many("articles", "articles").includable())
                .creatable(true)
                .updatable(true),
        )
        .unwrap()
        .with(
            ResourceType::new("articles", store.adapter("articles").into_arc())
                .field(
                    Field::attribute("title")
                        .with_type(StringType::default().min_length(1))
                        .writable()
                        .required()
                        .filterable()
                        .sortable(),
                )
                .field(
                    Field::attribute("views")
                        .with_type(FieldType::integer())
                        .writable()
                        .default_value(json!(0))
                        .filterable()
                        .sortable(),
                )
                .field(Field::attribute("slug"))
                .field(
                    Field::to_one("author", "people")
                        .includable()
                        .with_linkage()
                        .writable()
                        .nullable(),
                )
                .field(Field::to_many("comments", "comments").includable())
                .paginate(Pagination::offset_with_max(10, 50))
                .writable(),
        )
        .unwrap()
        .with(
            ResourceType::new("comments", store.adapter("comments").into_arc())
                .field(Field::attribute("body").writable())
                .field(Field::to_one("author", "people").includable().with_linkage())
                .field(Field::to_one("article", "articles").includable())
                .paginate(Pagination::cursor(2, 10)),
        )
        .unwrap()
}

pub fn blog() -> Blog {
    blog_with(Config::default())
}

pub fn blog_with(config: Config) -> Blog {
    let store = MemoryStore::new();
    seed(&store);
    let api = JsonApi::new(registry(&store), config).unwrap();
    Blog { api, store }
}

/// An atomic operations request.
pub fn atomic(operations: Value) -> Request {
    Request::post("/operations", json!({ "atomic:operations": operations })).with_header(
        "Content-Type",
        format!("{}; ext=\"{}\"", MEDIA_TYPE, ATOMIC_EXTENSION),
    )
}

/// `(type, id)` of every resource object in `objects`.
pub fn identities(objects: &Value) -> Vec<(String, String)> {
    objects
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|o| {
                    (
                        o["type"].as_str().unwrap_or_default().to_string(),
                        o["id"].as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}
