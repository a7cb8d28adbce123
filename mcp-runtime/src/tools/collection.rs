use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value, json};

use super::{Body, Route, custom, object_schema, route};
use crate::args::{required_id, required_string};
use crate::client::{ApiRequest, MetabaseClient};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{Capability, ToolOutput};

pub fn capabilities() -> Vec<Capability> {
    vec![
        route(
            "list_collections",
            "List all collections in Metabase",
            object_schema(
                json!({ "archived": { "type": "boolean", "description": "List archived collections instead", "default": false } }),
                &[],
            ),
            Route::get("/api/collection").query(&["archived"]),
        ),
        route(
            "get_collection",
            "Get a collection by ID",
            object_schema(json!({ "collection_id": collection_id() }), &["collection_id"]),
            Route::get("/api/collection/{collection_id}"),
        ),
        route(
            "create_collection",
            "Create a new collection",
            object_schema(
                json!({
                    "name": { "type": "string", "description": "Name of the collection" },
                    "description": { "type": "string" },
                    "color": { "type": "string", "description": "Hex color, e.g. #509EE3" },
                    "parent_id": { "type": "number", "description": "Parent collection, omitted for root" }
                }),
                &["name"],
            ),
            Route::post("/api/collection").body(Body::Fields(&[
                "name",
                "description",
                "color",
                "parent_id",
            ])),
        ),
        route(
            "update_collection",
            "Update a collection",
            object_schema(
                json!({
                    "collection_id": collection_id(),
                    "name": { "type": "string" },
                    "description": { "type": "string" },
                    "color": { "type": "string" },
                    "parent_id": { "type": "number" },
                    "archived": { "type": "boolean" }
                }),
                &["collection_id"],
            ),
            Route::put("/api/collection/{collection_id}").body(Body::Changes),
        ),
        route(
            "delete_collection",
            "Delete a collection",
            object_schema(json!({ "collection_id": collection_id() }), &["collection_id"]),
            Route::delete("/api/collection/{collection_id}")
                .message("Collection {collection_id} deleted successfully"),
        ),
        route(
            "get_collection_items",
            "List the items of a collection",
            object_schema(
                json!({
                    "collection_id": { "type": ["number", "string"], "description": "ID of the collection, or \"root\"" },
                    "models": { "type": "array", "items": { "type": "string" }, "description": "Only these item types" },
                    "archived": { "type": "boolean" }
                }),
                &["collection_id"],
            ),
            Route::get("/api/collection/{collection_id}/items").query(&["models", "archived"]),
        ),
        custom(
            "move_to_collection",
            "Move a card or dashboard into a collection (null collection_id moves it to the root)",
            object_schema(
                json!({
                    "item_type": { "type": "string", "enum": ["card", "dashboard"] },
                    "item_id": { "type": "number" },
                    "collection_id": { "type": ["number", "null"] }
                }),
                &["item_type", "item_id"],
            ),
            move_to_collection,
        ),
    ]
}

fn collection_id() -> Value {
    json!({ "type": "number", "description": "ID of the collection" })
}

async fn move_to_collection(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let item_type = required_string(&args, "item_type")?;
    let item_id = required_id(&args, "item_id")?;
    if !matches!(item_type.as_str(), "card" | "dashboard") {
        return Err(GatewayError::invalid_argument(
            "item_type",
            "'item_type' must be \"card\" or \"dashboard\"",
        ));
    }
    let Some(collection_id) = args.get("collection_id").cloned() else {
        return Err(GatewayError::missing_field("collection_id"));
    };
    let moved = client
        .send(
            ApiRequest::new(Method::PUT, format!("/api/{item_type}/{item_id}"))
                .with_json(json!({ "collection_id": collection_id })),
        )
        .await?;
    Ok(ToolOutput::Json(moved))
}
