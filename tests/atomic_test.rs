//! Integration tests for the atomic operations extension.

mod common;

use common::{atomic, blog};
use jsonapi_core::{Config, Request, ATOMIC_EXTENSION};
use serde_json::json;

// === Local Ids ===

mod local_ids {
    use super::*;

    #[test]
    fn later_operations_see_earlier_lids() {
        let blog = blog();
        let response = blog.handle(atomic(json!([
            {
                "op": "add",
                "data": { "type": "people", "lid": "p1", "attributes": { "name": "Barbara" } }
            },
            {
                "op": "add",
                "data": {
                    "type": "articles",
                    "attributes": { "title": "Liskov" },
                    "relationships": { "author": { "data": { "type": "people", "lid": "p1" } } }
                }
            }
        ])));
        assert_eq!(response.status, 200);
        assert!(response
            .header("Content-Type")
            .unwrap()
            .contains(ATOMIC_EXTENSION));

        let body = response.body.unwrap();
        let results = body["atomic:results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        let person_id = results[0]["data"]["id"].as_str().unwrap();
        assert_eq!(person_id, "4");
        assert_eq!(
            results[1]["data"]["relationships"]["author"]["data"],
            json!({ "type": "people", "id": person_id })
        );
        assert_eq!(body["jsonapi"]["ext"], json!([ATOMIC_EXTENSION]));
    }

    #[test]
    fn update_and_remove_by_ref_lid() {
        let blog = blog();
        let (status, body) = blog.body(atomic(json!([
            {
                "op": "add",
                "data": { "type": "articles", "lid": "a1", "attributes": { "title": "Draft" } }
            },
            {
                "op": "update",
                "ref": { "type": "articles", "lid": "a1" },
                "data": { "type": "articles", "lid": "a1", "attributes": { "title": "Final" } }
            },
            { "op": "remove", "ref": { "type": "articles", "lid": "a1" } }
        ])));
        assert_eq!(status, 200);

        let results = body["atomic:results"].as_array().unwrap();
        assert_eq!(results[1]["data"]["attributes"]["title"], "Final");
        assert_eq!(results[2], json!(null));
        assert_eq!(blog.store.all("articles").len(), 5);
    }

    #[test]
    fn redeclared_lid_points_at_latest_add() {
        let blog = blog();
        let (status, body) = blog.body(atomic(json!([
            { "op": "add", "data": { "type": "people", "lid": "p1", "attributes": { "name": "First" } } },
            { "op": "add", "data": { "type": "people", "lid": "p1", "attributes": { "name": "Second" } } },
            {
                "op": "add",
                "data": {
                    "type": "articles",
                    "attributes": { "title": "Who wrote this" },
                    "relationships": { "author": { "data": { "type": "people", "lid": "p1" } } }
                }
            }
        ])));
        assert_eq!(status, 200);

        let results = body["atomic:results"].as_array().unwrap();
        assert_eq!(results[0]["data"]["id"], "4");
        assert_eq!(results[1]["data"]["id"], "5");
        assert_eq!(
            results[2]["data"]["relationships"]["author"]["data"],
            json!({ "type": "people", "id": "5" })
        );
    }

    #[test]
    fn unresolved_lid_is_rejected() {
        let blog = blog();
        let (status, body) = blog.body(atomic(json!([
            {
                "op": "add",
                "data": {
                    "type": "articles",
                    "attributes": { "title": "Orphan" },
                    "relationships": { "author": { "data": { "type": "people", "lid": "nobody" } } }
                }
            }
        ])));
        assert_eq!(status, 400);
        assert_eq!(
            body["errors"][0]["source"]["pointer"],
            "/atomic:operations/0/data/relationships/author/data/lid"
        );
    }
}

// === Failure Handling ===

mod failures {
    use super::*;

    #[test]
    fn first_failure_stops_the_batch() {
        let blog = blog();
        let (status, body) = blog.body(atomic(json!([
            { "op": "add", "data": { "type": "articles", "attributes": { "views": 1 } } },
            { "op": "add", "data": { "type": "people", "attributes": { "name": "Never" } } }
        ])));
        assert_eq!(status, 422);
        assert_eq!(
            body["errors"][0]["source"]["pointer"],
            "/atomic:operations/0/data/attributes/title"
        );
        assert!(body.get("atomic:results").is_none());
        assert_eq!(blog.store.all("people").len(), 3);
    }

    #[test]
    fn earlier_operations_are_not_rolled_back() {
        let blog = blog();
        let (status, body) = blog.body(atomic(json!([
            { "op": "add", "data": { "type": "people", "attributes": { "name": "Kept" } } },
            { "op": "remove", "ref": { "type": "articles", "id": "99" } }
        ])));
        assert_eq!(status, 404);
        assert_eq!(body["errors"][0]["status"], "404");
        assert_eq!(blog.store.all("people").len(), 4);
    }

    #[test]
    fn ref_and_href_are_exclusive() {
        let blog = blog();
        let (status, body) = blog.body(atomic(json!([
            {
                "op": "remove",
                "ref": { "type": "articles", "id": "1" },
                "href": "/articles/1"
            }
        ])));
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["source"]["pointer"], "/atomic:operations/0");
        assert_eq!(blog.store.all("articles").len(), 5);
    }

    #[test]
    fn unknown_op_code() {
        let blog = blog();
        let (status, body) = blog.body(atomic(json!([{ "op": "upsert", "href": "/articles" }])));
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["source"]["pointer"], "/atomic:operations/0/op");
    }

    #[test]
    fn relationship_refs_are_not_supported() {
        let blog = blog();
        let (status, body) = blog.body(atomic(json!([
            {
                "op": "update",
                "ref": { "type": "articles", "id": "1", "relationship": "author" },
                "data": null
            }
        ])));
        assert_eq!(status, 400);
        assert_eq!(
            body["errors"][0]["source"]["pointer"],
            "/atomic:operations/0/ref/relationship"
        );
    }
}

// === Endpoint ===

mod endpoint {
    use super::*;

    #[test]
    fn requires_extension_media_type() {
        let blog = blog();
        let request = Request::post("/operations", json!({ "atomic:operations": [] }));
        assert_eq!(blog.handle(request).status, 415);
    }

    #[test]
    fn only_post_is_allowed() {
        let blog = blog();
        assert_eq!(blog.get("/operations").status, 405);
    }

    #[test]
    fn path_follows_config() {
        let blog = common::blog_with(Config::default().atomic_path("/batch"));
        let mut request = atomic(json!([
            { "op": "add", "data": { "type": "people", "attributes": { "name": "Edsger" } } }
        ]));
        request.path = "/batch".to_string();
        let (status, body) = blog.body(request);
        assert_eq!(status, 200);
        assert_eq!(body["atomic:results"][0]["data"]["attributes"]["name"], "Edsger");
    }

    #[test]
    fn params_become_query_parameters() {
        let blog = blog();
        let (status, body) = blog.body(atomic(json!([
            {
                "op": "update",
                "ref": { "type": "articles", "id": "1" },
                "params": { "include": "author" },
                "data": { "type": "articles", "id": "1", "attributes": { "views": 11 } }
            }
        ])));
        assert_eq!(status, 200);
        assert_eq!(body["atomic:results"][0]["data"]["attributes"]["views"], 11);
        // only data and meta are carried into results
        assert!(body["atomic:results"][0].get("included").is_none());
    }
}
