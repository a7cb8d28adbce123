//! Search and activity feeds.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use super::{Body, Route, custom, object_schema, route};
use crate::args::{optional_string_array, required_string};
use crate::client::{ApiRequest, MetabaseClient};
use crate::error::GatewayResult;
use crate::registry::{Capability, ToolOutput};

pub fn capabilities() -> Vec<Capability> {
    vec![
        custom(
            "search_content",
            "Search cards, dashboards, collections and other content",
            object_schema(
                json!({
                    "query": { "type": "string", "description": "Search text" },
                    "models": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["card", "dashboard", "collection", "table", "database", "dataset", "metric", "segment"] },
                        "description": "Only these content types"
                    }
                }),
                &["query"],
            ),
            search_content,
        ),
        route(
            "get_recent_views",
            "Items the current user viewed recently",
            object_schema(json!({}), &[]),
            Route::get("/api/activity/recent_views"),
        ),
        route(
            "get_recents",
            "Recently viewed or selected items",
            object_schema(
                json!({
                    "context": { "type": "array", "items": { "type": "string", "enum": ["views", "selections"] } },
                    "include_metadata": { "type": "boolean", "default": false }
                }),
                &["context"],
            ),
            Route::get("/api/activity/recents").query(&["context", "include_metadata"]),
        ),
        route(
            "post_recents",
            "Record a recent selection",
            object_schema(
                json!({
                    "model": { "type": "string" },
                    "model_id": { "type": "number" },
                    "context": { "type": "string", "enum": ["selection"] }
                }),
                &["model", "model_id", "context"],
            ),
            Route::post("/api/activity/recents").body(Body::Fields(&["model", "model_id", "context"])),
        ),
        route(
            "get_popular_items",
            "Popular items across the instance",
            object_schema(json!({}), &[]),
            Route::get("/api/activity/popular_items"),
        ),
        route(
            "get_most_recently_viewed_dashboard",
            "The dashboard the current user viewed last",
            object_schema(json!({}), &[]),
            Route::get("/api/activity/most_recently_viewed_dashboard"),
        ),
    ]
}

/// `q` plus a comma-joined `models` filter.
pub fn search_query(args: &Map<String, Value>) -> GatewayResult<Vec<(String, String)>> {
    let mut query = vec![("q".to_string(), required_string(args, "query")?)];
    if let Some(models) = optional_string_array(args, "models")?.filter(|models| !models.is_empty()) {
        query.push(("models".to_string(), models.join(",")));
    }
    Ok(query)
}

async fn search_content(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let request = ApiRequest::get("/api/search").with_query(search_query(&args)?);
    Ok(ToolOutput::Json(client.send(request).await?))
}
