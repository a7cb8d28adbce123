use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value, json};

use super::{Body, Route, custom, object_schema, route};
use crate::args::{arg_bool, is_present, pick_fields, required_id};
use crate::client::{ApiRequest, MetabaseClient};
use crate::error::GatewayResult;
use crate::registry::{Capability, ToolOutput};

pub fn capabilities() -> Vec<Capability> {
    vec![
        route(
            "list_cards",
            "List saved questions (cards), optionally filtered",
            object_schema(
                json!({
                    "f": { "type": "string", "enum": ["all", "mine", "bookmarked", "database", "table", "using_model", "using_metric", "archived"], "description": "Filter" },
                    "model_id": card_id("Model id, used with f=database, table or using_model")
                }),
                &[],
            ),
            Route::get("/api/card").query(&["f", "model_id"]),
        ),
        route(
            "get_card",
            "Get a Metabase card (saved question) by ID",
            object_schema(json!({ "card_id": card_id("ID of the card") }), &["card_id"]),
            Route::get("/api/card/{card_id}"),
        ),
        custom(
            "create_card",
            "Create a new saved question. display defaults to table and visualization_settings to {}",
            object_schema(
                json!({
                    "name": { "type": "string", "description": "Name of the card" },
                    "dataset_query": { "type": "object", "description": "Query definition (native or MBQL)" },
                    "display": { "type": "string", "description": "Visualization type", "default": "table" },
                    "visualization_settings": { "type": "object" },
                    "description": { "type": "string" },
                    "collection_id": card_id("Collection to save the card in"),
                    "type": { "type": "string", "enum": ["question", "model", "metric"] }
                }),
                &["name", "dataset_query"],
            ),
            create_card,
        ),
        route(
            "update_card",
            "Update an existing card",
            object_schema(
                json!({
                    "card_id": card_id("ID of the card to update"),
                    "name": { "type": "string" },
                    "description": { "type": "string" },
                    "dataset_query": { "type": "object" },
                    "display": { "type": "string" },
                    "visualization_settings": { "type": "object" },
                    "collection_id": card_id("New collection"),
                    "archived": { "type": "boolean" },
                    "delete_old_dashcards": { "type": "boolean", "description": "Remove the card from dashboards when moving it" }
                }),
                &["card_id"],
            ),
            Route::put("/api/card/{card_id}")
                .query(&["delete_old_dashcards"])
                .body(Body::Changes),
        ),
        custom(
            "delete_card",
            "Delete a card. Archives it unless hard_delete is true",
            object_schema(
                json!({
                    "card_id": card_id("ID of the card to delete"),
                    "hard_delete": { "type": "boolean", "default": false }
                }),
                &["card_id"],
            ),
            delete_card,
        ),
        custom(
            "execute_card",
            "Run the query of a saved card and return its results",
            object_schema(
                json!({
                    "card_id": card_id("ID of the card to run"),
                    "ignore_cache": { "type": "boolean", "default": false },
                    "collection_preview": { "type": "boolean" },
                    "dashboard_id": card_id("Dashboard the card is run from"),
                    "parameters": { "type": "array", "items": { "type": "object" } }
                }),
                &["card_id"],
            ),
            execute_card,
        ),
        route(
            "execute_card_query_with_format",
            "Run a card and export the result in the given format",
            object_schema(
                json!({
                    "card_id": card_id("ID of the card"),
                    "export_format": { "type": "string", "enum": ["csv", "json", "xlsx", "api"] },
                    "parameters": { "type": "array", "items": { "type": "object" } },
                    "format_rows": { "type": "boolean", "default": false }
                }),
                &["card_id", "export_format"],
            ),
            Route::post("/api/card/{card_id}/query/{export_format}")
                .body(Body::Fields(&["parameters", "format_rows"])),
        ),
        route(
            "execute_pivot_card_query",
            "Run the pivot query of a card",
            object_schema(
                json!({
                    "card_id": card_id("ID of the card"),
                    "parameters": { "type": "array", "items": { "type": "object" } }
                }),
                &["card_id"],
            ),
            Route::post("/api/card/pivot/{card_id}/query").body(Body::Fields(&["parameters"])),
        ),
        route(
            "copy_card",
            "Copy a card",
            object_schema(json!({ "card_id": card_id("ID of the card to copy") }), &["card_id"]),
            Route::post("/api/card/{card_id}/copy"),
        ),
        route(
            "move_cards",
            "Move cards to a collection or dashboard",
            object_schema(
                json!({
                    "card_ids": { "type": "array", "items": { "type": "number" } },
                    "collection_id": card_id("Target collection, null for root"),
                    "dashboard_id": card_id("Target dashboard")
                }),
                &["card_ids"],
            ),
            Route::post("/api/cards/move").body(Body::Fields(&[
                "card_ids",
                "collection_id",
                "dashboard_id",
            ])),
        ),
        route(
            "move_cards_to_collection",
            "Bulk move cards into a collection",
            object_schema(
                json!({
                    "card_ids": { "type": "array", "items": { "type": "number" } },
                    "collection_id": card_id("Target collection, null for root")
                }),
                &["card_ids"],
            ),
            Route::post("/api/card/collections").body(Body::Fields(&["card_ids", "collection_id"])),
        ),
        route(
            "get_card_dashboards",
            "List dashboards a card appears on",
            object_schema(json!({ "card_id": card_id("ID of the card") }), &["card_id"]),
            Route::get("/api/card/{card_id}/dashboards"),
        ),
        route(
            "get_card_query_metadata",
            "Get query metadata for a card",
            object_schema(json!({ "card_id": card_id("ID of the card") }), &["card_id"]),
            Route::get("/api/card/{card_id}/query_metadata"),
        ),
        route(
            "get_card_series",
            "Get cards that can be combined with a card as series",
            object_schema(
                json!({
                    "card_id": card_id("ID of the card"),
                    "last_cursor": { "type": "number" },
                    "query": { "type": "string" },
                    "exclude_ids": { "type": "array", "items": { "type": "number" } }
                }),
                &["card_id"],
            ),
            Route::get("/api/card/{card_id}/series").query(&["last_cursor", "query", "exclude_ids"]),
        ),
        route(
            "get_card_param_values",
            "Get the possible values of a card parameter",
            object_schema(
                json!({
                    "card_id": card_id("ID of the card"),
                    "param_key": { "type": "string" }
                }),
                &["card_id", "param_key"],
            ),
            Route::get("/api/card/{card_id}/params/{param_key}/values"),
        ),
        route(
            "search_card_param_values",
            "Search the values of a card parameter",
            object_schema(
                json!({
                    "card_id": card_id("ID of the card"),
                    "param_key": { "type": "string" },
                    "query": { "type": "string" }
                }),
                &["card_id", "param_key", "query"],
            ),
            Route::get("/api/card/{card_id}/params/{param_key}/search/{query}"),
        ),
        route(
            "get_card_param_remapping",
            "Get the remapped display value of a card parameter value",
            object_schema(
                json!({
                    "card_id": card_id("ID of the card"),
                    "param_key": { "type": "string" },
                    "value": { "type": "string" }
                }),
                &["card_id", "param_key", "value"],
            ),
            Route::get("/api/card/{card_id}/params/{param_key}/remapping").query(&["value"]),
        ),
        route(
            "create_card_public_link",
            "Create a public link for a card",
            object_schema(json!({ "card_id": card_id("ID of the card") }), &["card_id"]),
            Route::post("/api/card/{card_id}/public_link"),
        ),
        route(
            "delete_card_public_link",
            "Delete the public link of a card",
            object_schema(json!({ "card_id": card_id("ID of the card") }), &["card_id"]),
            Route::delete("/api/card/{card_id}/public_link")
                .message("Public link for card {card_id} deleted"),
        ),
        route(
            "get_embeddable_cards",
            "List cards with embedding enabled",
            object_schema(json!({}), &[]),
            Route::get("/api/card/embeddable"),
        ),
        route(
            "get_public_cards",
            "List cards with a public link",
            object_schema(json!({}), &[]),
            Route::get("/api/card/public"),
        ),
    ]
}

fn card_id(description: &str) -> Value {
    json!({ "type": "number", "description": description })
}

async fn create_card(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let mut body = pick_fields(
        &args,
        &[
            "name",
            "dataset_query",
            "display",
            "visualization_settings",
            "description",
            "collection_id",
            "type",
        ],
    );
    if !is_present(&args, "display") {
        body.insert("display".to_string(), json!("table"));
    }
    if !is_present(&args, "visualization_settings") {
        body.insert("visualization_settings".to_string(), json!({}));
    }
    let card = client
        .send(ApiRequest::new(Method::POST, "/api/card").with_json(Value::Object(body)))
        .await?;
    Ok(ToolOutput::Json(card))
}

async fn delete_card(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let card_id = required_id(&args, "card_id")?;
    let path = format!("/api/card/{card_id}");
    if arg_bool(&args, "hard_delete", false)? {
        client.send(ApiRequest::new(Method::DELETE, path)).await?;
        Ok(ToolOutput::Message(format!("Card {card_id} permanently deleted")))
    } else {
        client
            .send(ApiRequest::new(Method::PUT, path).with_json(json!({ "archived": true })))
            .await?;
        Ok(ToolOutput::Message(format!("Card {card_id} archived")))
    }
}

async fn execute_card(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let card_id = required_id(&args, "card_id")?;
    let mut body = pick_fields(&args, &["collection_preview", "dashboard_id", "parameters"]);
    body.insert(
        "ignore_cache".to_string(),
        Value::Bool(arg_bool(&args, "ignore_cache", false)?),
    );
    let result = client
        .send(
            ApiRequest::new(Method::POST, format!("/api/card/{card_id}/query"))
                .with_json(Value::Object(body)),
        )
        .await?;
    Ok(ToolOutput::Json(result))
}
