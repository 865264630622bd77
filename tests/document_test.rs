//! Integration tests for compound document serialization.

mod common;

use std::collections::HashSet;

use common::{blog, identities};
use serde_json::json;

// === Compound Documents ===

mod compound {
    use super::*;

    #[test]
    fn included_resources_are_unique() {
        let blog = blog();
        let (status, body) = blog.body(jsonapi_core::Request::get(
            "/articles?include=author,comments.author",
        ));
        assert_eq!(status, 200);

        let included = identities(&body["included"]);
        let unique: HashSet<_> = included.iter().cloned().collect();
        assert_eq!(included.len(), unique.len());
        // people 1 and 2, comments 1 to 3
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn primary_resources_are_not_included() {
        let blog = blog();
        let (_, body) = blog.body(jsonapi_core::Request::get(
            "/people?include=articles.author",
        ));
        let primary: HashSet<_> = identities(&body["data"]).into_iter().collect();
        let included = identities(&body["included"]);
        assert!(included.iter().all(|id| !primary.contains(id)));
        assert!(included.iter().all(|(ty, _)| ty == "articles"));
        assert_eq!(included.len(), 4);
    }

    #[test]
    fn cyclic_include_terminates() {
        let blog = blog();
        let (status, body) = blog.body(jsonapi_core::Request::get(
            "/articles/1?include=author.articles.author",
        ));
        assert_eq!(status, 200);
        assert_eq!(body["data"]["id"], "1");

        let included = identities(&body["included"]);
        assert_eq!(
            included,
            vec![
                ("people".to_string(), "1".to_string()),
                ("articles".to_string(), "2".to_string()),
            ]
        );
        // article 2 is reached through the cycle and still gets its linkage
        assert_eq!(
            body["included"][1]["relationships"]["author"]["data"],
            json!({ "type": "people", "id": "1" })
        );
    }

    #[test]
    fn included_relationship_renders_linkage() {
        let blog = blog();
        let (_, body) = blog.body(jsonapi_core::Request::get("/articles/1?include=comments"));
        assert_eq!(
            body["data"]["relationships"]["comments"]["data"],
            json!([
                { "type": "comments", "id": "1" },
                { "type": "comments", "id": "2" }
            ])
        );
    }

    #[test]
    fn empty_include_has_empty_included_member() {
        let blog = blog();
        let (_, body) = blog.body(jsonapi_core::Request::get("/articles/4?include=author"));
        assert_eq!(body["data"]["relationships"]["author"]["data"], json!(null));
        assert_eq!(body["included"], json!([]));
    }
}

// === Resource Objects ===

mod resource_objects {
    use super::*;

    #[test]
    fn linkage_flag_renders_without_include() {
        let blog = blog();
        let (_, body) = blog.body(jsonapi_core::Request::get("/articles/1"));
        let data = &body["data"];
        assert_eq!(
            data["relationships"]["author"]["data"],
            json!({ "type": "people", "id": "1" })
        );
        assert!(data["relationships"].get("comments").is_none());
        assert!(body.get("included").is_none());
    }

    #[test]
    fn attributes_and_self_links() {
        let blog = common::blog_with(jsonapi_core::Config::default().base_url("https://api.test/"));
        let (_, body) = blog.body(jsonapi_core::Request::get("/articles/2"));
        assert_eq!(body["data"]["attributes"]["title"], "Beta");
        assert_eq!(body["data"]["attributes"]["views"], 3);
        assert_eq!(body["data"]["links"]["self"], "https://api.test/articles/2");
        assert_eq!(body["links"]["self"], "https://api.test/articles/2");
        assert_eq!(body["jsonapi"]["version"], "1.1");
    }

    #[test]
    fn sparse_fieldsets_apply_per_type() {
        let blog = blog();
        let (_, body) = blog.body(jsonapi_core::Request::get(
            "/articles/1?include=author&fields[articles]=title&fields[people]=name",
        ));
        let attributes = body["data"]["attributes"].as_object().unwrap();
        assert_eq!(attributes.keys().collect::<Vec<_>>(), vec!["title"]);
        // author is not in the fieldset, yet the person is still included
        assert!(body["data"].get("relationships").is_none());
        assert_eq!(body["included"][0]["attributes"], json!({ "name": "Ada" }));
    }

    #[test]
    fn missing_resource_is_404() {
        let blog = blog();
        let (status, body) = blog.body(jsonapi_core::Request::get("/articles/99"));
        assert_eq!(status, 404);
        assert_eq!(body["errors"][0]["status"], "404");
    }
}
