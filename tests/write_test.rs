//! Integration tests for create, update and delete.

mod common;

use common::blog;
use jsonapi_core::Request;
use serde_json::{json, Value};

fn article(attributes: Value) -> Value {
    json!({ "data": { "type": "articles", "attributes": attributes } })
}

fn pointers(body: &Value) -> Vec<String> {
    body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["source"]["pointer"].as_str().unwrap_or_default().to_string())
        .collect()
}

// === Create ===

mod create {
    use super::*;

    #[test]
    fn created_with_location_and_defaults() {
        let blog = blog();
        let response = blog.handle(Request::post("/articles", article(json!({ "title": "Zeta" }))));
        assert_eq!(response.status, 201);
        assert_eq!(response.header("Location"), Some("/articles/6"));

        let body = response.body.unwrap();
        assert_eq!(body["data"]["id"], "6");
        assert_eq!(body["data"]["attributes"]["views"], 0);
        assert_eq!(blog.store.all("articles").len(), 6);
    }

    #[test]
    fn missing_required_field_is_one_422() {
        let blog = blog();
        let (status, body) = blog.body(Request::post("/articles", article(json!({ "views": 1 }))));
        assert_eq!(status, 422);
        assert_eq!(pointers(&body), vec!["/data/attributes/title"]);
        assert_eq!(blog.store.all("articles").len(), 5);
    }

    #[test]
    fn every_violation_is_reported() {
        let blog = blog();
        let (status, body) = blog.body(Request::post(
            "/articles",
            article(json!({ "title": "", "views": "many" })),
        ));
        assert_eq!(status, 422);
        assert_eq!(
            pointers(&body),
            vec!["/data/attributes/title", "/data/attributes/views"]
        );
    }

    #[test]
    fn relationship_linkage_is_resolved() {
        let blog = blog();
        let (status, body) = blog.body(Request::post(
            "/articles?include=author",
            json!({
                "data": {
                    "type": "articles",
                    "attributes": { "title": "Zeta" },
                    "relationships": { "author": { "data": { "type": "people", "id": "2" } } }
                }
            }),
        ));
        assert_eq!(status, 201);
        assert_eq!(body["data"]["relationships"]["author"]["data"]["id"], "2");
        assert_eq!(body["included"][0]["attributes"]["name"], "Grace");

        let stored = blog.store.all("articles");
        assert_eq!(stored[5]["author"], "2");
    }

    #[test]
    fn missing_related_resource_is_404_with_pointer() {
        let blog = blog();
        let (status, body) = blog.body(Request::post(
            "/articles",
            json!({
                "data": {
                    "type": "articles",
                    "attributes": { "title": "Zeta" },
                    "relationships": { "author": { "data": { "type": "people", "id": "42" } } }
                }
            }),
        ));
        assert_eq!(status, 404);
        assert_eq!(pointers(&body), vec!["/data/relationships/author/data"]);
    }

    #[test]
    fn wrong_related_type_is_409() {
        let blog = blog();
        let (status, body) = blog.body(Request::post(
            "/articles",
            json!({
                "data": {
                    "type": "articles",
                    "attributes": { "title": "Zeta" },
                    "relationships": { "author": { "data": { "type": "comments", "id": "1" } } }
                }
            }),
        ));
        assert_eq!(status, 409);
        assert_eq!(pointers(&body), vec!["/data/relationships/author/data/type"]);
    }

    #[test]
    fn type_mismatch_is_409() {
        let blog = blog();
        let (status, body) = blog.body(Request::post(
            "/articles",
            json!({ "data": { "type": "people", "attributes": { "name": "x" } } }),
        ));
        assert_eq!(status, 409);
        assert_eq!(pointers(&body), vec!["/data/type"]);
    }

    #[test]
    fn unknown_and_read_only_attributes() {
        let blog = blog();
        let (status, body) = blog.body(Request::post(
            "/articles",
            article(json!({ "title": "Zeta", "subtitle": "x" })),
        ));
        assert_eq!(status, 400);
        assert_eq!(pointers(&body), vec!["/data/attributes/subtitle"]);

        let (status, body) = blog.body(Request::post(
            "/articles",
            article(json!({ "title": "Zeta", "slug": "zeta" })),
        ));
        assert_eq!(status, 403);
        assert_eq!(pointers(&body), vec!["/data/attributes/slug"]);
    }

    #[test]
    fn client_ids_are_forbidden_without_writable_id() {
        let blog = blog();
        let (status, body) = blog.body(Request::post(
            "/articles",
            json!({ "data": { "type": "articles", "id": "abc", "attributes": { "title": "Zeta" } } }),
        ));
        assert_eq!(status, 403);
        assert_eq!(pointers(&body), vec!["/data/id"]);
    }

    #[test]
    fn read_only_type_is_forbidden() {
        let blog = blog();
        let (status, _) = blog.body(Request::post(
            "/comments",
            json!({ "data": { "type": "comments", "attributes": { "body": "x" } } }),
        ));
        assert_eq!(status, 403);
    }

    #[test]
    fn body_needs_jsonapi_content_type() {
        let blog = blog();
        let request = Request::post("/articles", article(json!({ "title": "Zeta" })))
            .with_header("Content-Type", "application/json");
        assert_eq!(blog.handle(request).status, 415);
    }
}

// === Update ===

mod update {
    use super::*;

    #[test]
    fn updates_given_members_only() {
        let blog = blog();
        let (status, body) = blog.body(Request::patch(
            "/articles/2",
            json!({ "data": { "type": "articles", "id": "2", "attributes": { "views": 4 } } }),
        ));
        assert_eq!(status, 200);
        assert_eq!(body["data"]["attributes"]["views"], 4);
        assert_eq!(body["data"]["attributes"]["title"], "Beta");
    }

    #[test]
    fn required_fields_are_not_demanded_on_update() {
        let blog = blog();
        let (status, _) = blog.body(Request::patch(
            "/articles/2",
            json!({ "data": { "type": "articles", "id": "2" } }),
        ));
        assert_eq!(status, 200);
    }

    #[test]
    fn clearing_a_nullable_relationship() {
        let blog = blog();
        let (status, body) = blog.body(Request::patch(
            "/articles/1",
            json!({
                "data": {
                    "type": "articles",
                    "id": "1",
                    "relationships": { "author": { "data": null } }
                }
            }),
        ));
        assert_eq!(status, 200);
        assert_eq!(body["data"]["relationships"]["author"]["data"], json!(null));
    }

    #[test]
    fn id_must_match_endpoint() {
        let blog = blog();
        let (status, body) = blog.body(Request::patch(
            "/articles/2",
            json!({ "data": { "type": "articles", "id": "3" } }),
        ));
        assert_eq!(status, 409);
        assert_eq!(pointers(&body), vec!["/data/id"]);

        let (status, _) = blog.body(Request::patch(
            "/articles/2",
            json!({ "data": { "type": "articles" } }),
        ));
        assert_eq!(status, 400);
    }

    #[test]
    fn missing_resource_is_404() {
        let blog = blog();
        let (status, _) = blog.body(Request::patch(
            "/articles/9",
            json!({ "data": { "type": "articles", "id": "9" } }),
        ));
        assert_eq!(status, 404);
    }
}

// === Delete ===

mod delete {
    use super::*;

    #[test]
    fn deleted_resource_is_gone() {
        let blog = blog();
        let response = blog.handle(Request::delete("/articles/3"));
        assert_eq!(response.status, 204);
        assert!(response.body.is_none());
        assert_eq!(blog.get("/articles/3").status, 404);
    }
}
