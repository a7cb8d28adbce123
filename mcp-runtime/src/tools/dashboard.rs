//! Dashboard tools, including the dashcard operations whose endpoint
//! contract differs across platform versions.

use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value, json};

use super::{Body, Route, custom, object_schema, route};
use crate::args::{arg_bool, optional_u64, remaining_fields, required_id};
use crate::client::{ApiRequest, MetabaseClient};
use crate::error::{GatewayError, GatewayResult};
use crate::fallback::{FallbackAttempt, FallbackChain};
use crate::registry::{Capability, ToolOutput};

const DEFAULT_SIZE: u64 = 4;

pub fn capabilities() -> Vec<Capability> {
    vec![
        route(
            "list_dashboards",
            "List all dashboards in Metabase",
            object_schema(json!({}), &[]),
            Route::get("/api/dashboard"),
        ),
        route(
            "get_dashboard",
            "Get a Metabase dashboard by ID",
            object_schema(json!({ "dashboard_id": id("ID of the dashboard") }), &["dashboard_id"]),
            Route::get("/api/dashboard/{dashboard_id}"),
        ),
        route(
            "create_dashboard",
            "Create a new Metabase dashboard",
            object_schema(
                json!({
                    "name": { "type": "string", "description": "Name of the dashboard" },
                    "description": { "type": "string", "description": "Optional description" },
                    "parameters": { "type": "array", "description": "Optional dashboard filter parameters", "items": { "type": "object" } },
                    "collection_id": id("Optional collection to place the dashboard in")
                }),
                &["name"],
            ),
            Route::post("/api/dashboard").body(Body::Fields(&[
                "name",
                "description",
                "parameters",
                "collection_id",
            ])),
        ),
        route(
            "update_dashboard",
            "Update an existing Metabase dashboard",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard to update"),
                    "name": { "type": "string", "description": "New name" },
                    "description": { "type": "string", "description": "New description" },
                    "parameters": { "type": "array", "description": "New filter parameters", "items": { "type": "object" } },
                    "collection_id": id("New collection"),
                    "archived": { "type": "boolean", "description": "Archive or unarchive the dashboard" }
                }),
                &["dashboard_id"],
            ),
            Route::put("/api/dashboard/{dashboard_id}").body(Body::Changes),
        ),
        custom(
            "delete_dashboard",
            "Delete a Metabase dashboard. Archives it unless hard_delete is true",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard to delete"),
                    "hard_delete": { "type": "boolean", "description": "Permanently delete instead of archiving", "default": false }
                }),
                &["dashboard_id"],
            ),
            delete_dashboard,
        ),
        custom(
            "get_dashboard_cards",
            "Get all cards placed on a dashboard",
            object_schema(json!({ "dashboard_id": id("ID of the dashboard") }), &["dashboard_id"]),
            get_dashboard_cards,
        ),
        custom(
            "add_card_to_dashboard",
            "Add an existing card to a dashboard at a given position",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard"),
                    "card_id": id("ID of the card to add"),
                    "row": { "type": "number", "description": "Row position", "default": 0 },
                    "col": { "type": "number", "description": "Column position", "default": 0 },
                    "size_x": { "type": "number", "description": "Width in grid units", "default": DEFAULT_SIZE },
                    "size_y": { "type": "number", "description": "Height in grid units", "default": DEFAULT_SIZE },
                    "parameter_mappings": { "type": "array", "description": "Filter parameter mappings", "items": { "type": "object" } },
                    "visualization_settings": { "type": "object", "description": "Dashcard visualization overrides" }
                }),
                &["dashboard_id", "card_id"],
            ),
            add_card_to_dashboard,
        ),
        custom(
            "remove_card_from_dashboard",
            "Remove a card from a dashboard",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard"),
                    "dashcard_id": id("ID of the dashcard (the card's placement, not the card itself)")
                }),
                &["dashboard_id", "dashcard_id"],
            ),
            remove_card_from_dashboard,
        ),
        custom(
            "update_dashboard_card",
            "Update position, size or settings of a card on a dashboard",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard"),
                    "dashcard_id": id("ID of the dashcard"),
                    "row": { "type": "number", "description": "Row position" },
                    "col": { "type": "number", "description": "Column position" },
                    "size_x": { "type": "number", "description": "Width in grid units" },
                    "size_y": { "type": "number", "description": "Height in grid units" },
                    "parameter_mappings": { "type": "array", "items": { "type": "object" } },
                    "visualization_settings": { "type": "object" }
                }),
                &["dashboard_id", "dashcard_id"],
            ),
            update_dashboard_card,
        ),
        route(
            "put_dashboard_cards",
            "Replace the full set of cards on a dashboard",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard"),
                    "cards": { "type": "array", "description": "Complete list of dashcards; new ones use negative ids", "items": { "type": "object" } }
                }),
                &["dashboard_id", "cards"],
            ),
            Route::put("/api/dashboard/{dashboard_id}/cards").body(Body::Fields(&["cards"])),
        ),
        route(
            "get_dashboard_items",
            "Get the items of a dashboard",
            object_schema(json!({ "dashboard_id": id("ID of the dashboard") }), &["dashboard_id"]),
            Route::get("/api/dashboard/{dashboard_id}/items"),
        ),
        route(
            "get_dashboard_related",
            "Get entities related to a dashboard",
            object_schema(json!({ "dashboard_id": id("ID of the dashboard") }), &["dashboard_id"]),
            Route::get("/api/dashboard/{dashboard_id}/related"),
        ),
        route(
            "get_dashboard_query_metadata",
            "Get query metadata for every card of a dashboard",
            object_schema(json!({ "dashboard_id": id("ID of the dashboard") }), &["dashboard_id"]),
            Route::get("/api/dashboard/{dashboard_id}/query_metadata"),
        ),
        route(
            "get_dashboard_param_values",
            "Get the possible values of a dashboard filter parameter",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard"),
                    "param_key": { "type": "string", "description": "Parameter key" }
                }),
                &["dashboard_id", "param_key"],
            ),
            Route::get("/api/dashboard/{dashboard_id}/params/{param_key}/values"),
        ),
        route(
            "search_dashboard_param_values",
            "Search the values of a dashboard filter parameter",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard"),
                    "param_key": { "type": "string", "description": "Parameter key" },
                    "query": { "type": "string", "description": "Search text" }
                }),
                &["dashboard_id", "param_key", "query"],
            ),
            Route::get("/api/dashboard/{dashboard_id}/params/{param_key}/search/{query}"),
        ),
        route(
            "get_dashboard_param_remapping",
            "Get the remapped display value of a dashboard filter parameter value",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard"),
                    "param_key": { "type": "string", "description": "Parameter key" },
                    "value": { "type": "string", "description": "Value to remap" }
                }),
                &["dashboard_id", "param_key", "value"],
            ),
            Route::get("/api/dashboard/{dashboard_id}/params/{param_key}/remapping")
                .query(&["value"]),
        ),
        route(
            "create_dashboard_public_link",
            "Create a public link for a dashboard",
            object_schema(json!({ "dashboard_id": id("ID of the dashboard") }), &["dashboard_id"]),
            Route::post("/api/dashboard/{dashboard_id}/public_link"),
        ),
        route(
            "delete_dashboard_public_link",
            "Delete the public link of a dashboard",
            object_schema(json!({ "dashboard_id": id("ID of the dashboard") }), &["dashboard_id"]),
            Route::delete("/api/dashboard/{dashboard_id}/public_link")
                .message("Public link for dashboard {dashboard_id} deleted"),
        ),
        route(
            "copy_dashboard",
            "Copy a dashboard",
            object_schema(
                json!({
                    "from_dashboard_id": id("ID of the dashboard to copy"),
                    "name": { "type": "string", "description": "Name of the copy" },
                    "description": { "type": "string" },
                    "collection_id": id("Collection for the copy"),
                    "is_deep_copy": { "type": "boolean", "description": "Also copy the cards", "default": false }
                }),
                &["from_dashboard_id"],
            ),
            Route::post("/api/dashboard/{from_dashboard_id}/copy").body(Body::Rest),
        ),
        route(
            "save_dashboard",
            "Save a denormalized dashboard description as a new dashboard",
            object_schema(
                json!({
                    "name": { "type": "string" },
                    "description": { "type": "string" },
                    "parameters": { "type": "array", "items": { "type": "object" } },
                    "dashcards": { "type": "array", "items": { "type": "object" } }
                }),
                &["name"],
            ),
            Route::post("/api/dashboard/save").body(Body::Rest),
        ),
        route(
            "save_dashboard_to_collection",
            "Save a denormalized dashboard description into a collection",
            object_schema(
                json!({
                    "parent_collection_id": id("Target collection"),
                    "name": { "type": "string" },
                    "description": { "type": "string" },
                    "parameters": { "type": "array", "items": { "type": "object" } },
                    "dashcards": { "type": "array", "items": { "type": "object" } }
                }),
                &["parent_collection_id", "name"],
            ),
            Route::post("/api/dashboard/save/collection/{parent_collection_id}").body(Body::Rest),
        ),
        route(
            "get_embeddable_dashboards",
            "List dashboards with embedding enabled",
            object_schema(json!({}), &[]),
            Route::get("/api/dashboard/embeddable"),
        ),
        route(
            "get_public_dashboards",
            "List dashboards with a public link",
            object_schema(json!({}), &[]),
            Route::get("/api/dashboard/public"),
        ),
        route(
            "get_dashboard_valid_filter_fields",
            "Check which fields can be used to filter other fields",
            object_schema(
                json!({
                    "filtered": { "type": "array", "description": "Field ids being filtered", "items": { "type": "number" } },
                    "filtering": { "type": "array", "description": "Field ids doing the filtering", "items": { "type": "number" } }
                }),
                &["filtered"],
            ),
            Route::get("/api/dashboard/params/valid-filter-fields").query(&["filtered", "filtering"]),
        ),
        route(
            "execute_dashboard_card_query",
            "Run the query of a card placed on a dashboard",
            object_schema(dashcard_query_properties(), &["dashboard_id", "dashcard_id", "card_id"]),
            Route::post("/api/dashboard/{dashboard_id}/dashcard/{dashcard_id}/card/{card_id}/query")
                .body(Body::Fields(&["parameters"])),
        ),
        route(
            "export_dashboard_card_query",
            "Run the query of a dashboard card and export the result",
            object_schema(
                {
                    let mut properties = dashcard_query_properties();
                    properties["export_format"] = export_format();
                    properties
                },
                &["dashboard_id", "dashcard_id", "card_id", "export_format"],
            ),
            Route::post(
                "/api/dashboard/{dashboard_id}/dashcard/{dashcard_id}/card/{card_id}/query/{export_format}",
            )
            .body(Body::Fields(&["parameters", "format_rows"])),
        ),
        route(
            "execute_dashboard_pivot_query",
            "Run the pivot query of a card placed on a dashboard",
            object_schema(dashcard_query_properties(), &["dashboard_id", "dashcard_id", "card_id"]),
            Route::post(
                "/api/dashboard/pivot/{dashboard_id}/dashcard/{dashcard_id}/card/{card_id}/query",
            )
            .body(Body::Fields(&["parameters"])),
        ),
        route(
            "get_dashcard_execute",
            "Get the action execution parameters of a dashcard",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard"),
                    "dashcard_id": id("ID of the dashcard"),
                    "parameters": { "type": "string", "description": "JSON-encoded parameter map" }
                }),
                &["dashboard_id", "dashcard_id"],
            ),
            Route::get("/api/dashboard/{dashboard_id}/dashcard/{dashcard_id}/execute")
                .query(&["parameters"]),
        ),
        route(
            "execute_dashcard_action",
            "Execute the action attached to a dashcard",
            object_schema(
                json!({
                    "dashboard_id": id("ID of the dashboard"),
                    "dashcard_id": id("ID of the dashcard"),
                    "parameters": { "type": "object", "description": "Action parameters" }
                }),
                &["dashboard_id", "dashcard_id"],
            ),
            Route::post("/api/dashboard/{dashboard_id}/dashcard/{dashcard_id}/execute")
                .body(Body::Fields(&["parameters"])),
        ),
    ]
}

fn id(description: &str) -> Value {
    json!({ "type": "number", "description": description })
}

fn export_format() -> Value {
    json!({ "type": "string", "enum": ["csv", "json", "xlsx", "api"], "description": "Export format" })
}

fn dashcard_query_properties() -> Value {
    json!({
        "dashboard_id": id("ID of the dashboard"),
        "dashcard_id": id("ID of the dashcard"),
        "card_id": id("ID of the card"),
        "parameters": { "type": "array", "description": "Filter parameter values", "items": { "type": "object" } }
    })
}

async fn delete_dashboard(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let dashboard_id = required_id(&args, "dashboard_id")?;
    let path = format!("/api/dashboard/{dashboard_id}");
    if arg_bool(&args, "hard_delete", false)? {
        client.send(ApiRequest::new(Method::DELETE, path)).await?;
        Ok(ToolOutput::Message(format!(
            "Dashboard {dashboard_id} permanently deleted"
        )))
    } else {
        client
            .send(ApiRequest::new(Method::PUT, path).with_json(json!({ "archived": true })))
            .await?;
        Ok(ToolOutput::Message(format!("Dashboard {dashboard_id} archived")))
    }
}

async fn get_dashboard_cards(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let dashboard_id = required_id(&args, "dashboard_id")?;
    let dashboard = client.get(&format!("/api/dashboard/{dashboard_id}")).await?;
    Ok(ToolOutput::Json(Value::Array(dashboard_cards(&dashboard))))
}

async fn add_card_to_dashboard(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let dashboard_id = required_id(&args, "dashboard_id")?;
    let placement = Placement::from_args(&args)?;
    let chain = add_card_chain(dashboard_id, &placement)?;
    client.run_fallback(&chain).await.map(ToolOutput::Json)
}

async fn remove_card_from_dashboard(
    client: Arc<MetabaseClient>,
    args: Map<String, Value>,
) -> GatewayResult<ToolOutput> {
    let dashboard_id = required_id(&args, "dashboard_id")?;
    let dashcard_id = required_id(&args, "dashcard_id")?;
    let chain = remove_card_chain(dashboard_id, dashcard_id)?;
    client.run_fallback(&chain).await?;
    Ok(ToolOutput::Message(format!(
        "Dashcard {dashcard_id} removed from dashboard {dashboard_id}"
    )))
}

async fn update_dashboard_card(
    client: Arc<MetabaseClient>,
    args: Map<String, Value>,
) -> GatewayResult<ToolOutput> {
    let dashboard_id = required_id(&args, "dashboard_id")?;
    let dashcard_id = required_id(&args, "dashcard_id")?;
    let changes = remaining_fields(&args, &["dashboard_id", "dashcard_id"]);
    if changes.is_empty() {
        return Err(GatewayError::InvalidArguments {
            field: None,
            message: "No fields provided for update".to_string(),
        });
    }
    let chain = update_card_chain(dashboard_id, dashcard_id, changes)?;
    client.run_fallback(&chain).await.map(ToolOutput::Json)
}

/// Where and how a card is placed on a dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub card_id: i64,
    pub row: u64,
    pub col: u64,
    pub size_x: u64,
    pub size_y: u64,
    pub parameter_mappings: Value,
    pub visualization_settings: Value,
}

impl Placement {
    pub fn from_args(args: &Map<String, Value>) -> GatewayResult<Self> {
        let parameter_mappings = match args.get("parameter_mappings") {
            None | Some(Value::Null) => json!([]),
            Some(value @ Value::Array(_)) => value.clone(),
            Some(_) => {
                return Err(GatewayError::invalid_argument(
                    "parameter_mappings",
                    "'parameter_mappings' must be an array",
                ));
            }
        };
        let visualization_settings = match args.get("visualization_settings") {
            None | Some(Value::Null) => json!({}),
            Some(value @ Value::Object(_)) => value.clone(),
            Some(_) => {
                return Err(GatewayError::invalid_argument(
                    "visualization_settings",
                    "'visualization_settings' must be an object",
                ));
            }
        };
        Ok(Self {
            card_id: required_id(args, "card_id")?,
            row: optional_u64(args, "row")?.unwrap_or(0),
            col: optional_u64(args, "col")?.unwrap_or(0),
            size_x: optional_u64(args, "size_x")?.unwrap_or(DEFAULT_SIZE),
            size_y: optional_u64(args, "size_y")?.unwrap_or(DEFAULT_SIZE),
            parameter_mappings,
            visualization_settings,
        })
    }

    fn camel_case(&self) -> Value {
        json!({
            "cardId": self.card_id,
            "row": self.row,
            "col": self.col,
            "sizeX": self.size_x,
            "sizeY": self.size_y,
            "parameter_mappings": self.parameter_mappings,
            "visualization_settings": self.visualization_settings,
        })
    }

    fn snake_case(&self) -> Value {
        json!({
            "card_id": self.card_id,
            "row": self.row,
            "col": self.col,
            "size_x": self.size_x,
            "size_y": self.size_y,
            "parameter_mappings": self.parameter_mappings,
            "visualization_settings": self.visualization_settings,
        })
    }

    /// A dashcard entry for the bulk cards endpoint; `-1` asks the platform
    /// to create it.
    fn new_dashcard(&self) -> Value {
        let mut dashcard = self.snake_case();
        dashcard["id"] = json!(-1);
        dashcard
    }
}

pub fn add_card_chain(dashboard_id: i64, placement: &Placement) -> GatewayResult<FallbackChain> {
    let base = format!("/api/dashboard/{dashboard_id}");
    let new_dashcard = placement.new_dashcard();
    FallbackChain::new(
        "add_card_to_dashboard",
        vec![
            FallbackAttempt::new("cards_post", Method::POST, format!("{base}/cards"))
                .with_json(placement.camel_case()),
            FallbackAttempt::new("cards_put", Method::PUT, format!("{base}/cards"))
                .read_modify_write(base.clone(), move |dashboard| {
                    Ok(append_dashcard(dashboard, new_dashcard.clone()))
                }),
            FallbackAttempt::new("dashcard_post", Method::POST, format!("{base}/dashcard"))
                .with_json(placement.snake_case()),
        ],
    )
}

pub fn remove_card_chain(dashboard_id: i64, dashcard_id: i64) -> GatewayResult<FallbackChain> {
    let base = format!("/api/dashboard/{dashboard_id}");
    FallbackChain::new(
        "remove_card_from_dashboard",
        vec![
            FallbackAttempt::new(
                "cards_delete",
                Method::DELETE,
                format!("{base}/cards/{dashcard_id}"),
            ),
            FallbackAttempt::new(
                "dashcard_delete",
                Method::DELETE,
                format!("{base}/dashcard/{dashcard_id}"),
            ),
            FallbackAttempt::new("cards_put", Method::PUT, format!("{base}/cards"))
                .read_modify_write(base.clone(), move |dashboard| {
                    Ok(without_dashcard(dashboard, dashcard_id))
                }),
        ],
    )
}

pub fn update_card_chain(
    dashboard_id: i64,
    dashcard_id: i64,
    changes: Map<String, Value>,
) -> GatewayResult<FallbackChain> {
    let base = format!("/api/dashboard/{dashboard_id}");
    let body = Value::Object(changes.clone());
    FallbackChain::new(
        "update_dashboard_card",
        vec![
            FallbackAttempt::new(
                "cards_put_one",
                Method::PUT,
                format!("{base}/cards/{dashcard_id}"),
            )
            .with_json(body.clone()),
            FallbackAttempt::new(
                "dashcard_put",
                Method::PUT,
                format!("{base}/dashcard/{dashcard_id}"),
            )
            .with_json(body),
            FallbackAttempt::new("cards_put", Method::PUT, format!("{base}/cards"))
                .read_modify_write(base.clone(), move |dashboard| {
                    with_dashcard_changes(dashboard, dashcard_id, &changes)
                }),
        ],
    )
}

/// Dashcards of a dashboard document. Older platform versions call the list
/// `cards`, newer ones `dashcards`.
pub fn dashboard_cards(dashboard: &Value) -> Vec<Value> {
    dashboard
        .get("cards")
        .filter(|cards| cards.is_array())
        .or_else(|| dashboard.get("dashcards"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

pub fn append_dashcard(dashboard: &Value, dashcard: Value) -> Value {
    let mut cards = dashboard_cards(dashboard);
    cards.push(dashcard);
    json!({ "cards": cards })
}

/// Removing a dashcard that is not there leaves the list unchanged.
pub fn without_dashcard(dashboard: &Value, dashcard_id: i64) -> Value {
    let cards: Vec<Value> = dashboard_cards(dashboard)
        .into_iter()
        .filter(|card| dashcard_id_of(card) != Some(dashcard_id))
        .collect();
    json!({ "cards": cards })
}

pub fn with_dashcard_changes(
    dashboard: &Value,
    dashcard_id: i64,
    changes: &Map<String, Value>,
) -> GatewayResult<Value> {
    let mut found = false;
    let cards: Vec<Value> = dashboard_cards(dashboard)
        .into_iter()
        .map(|mut card| {
            if dashcard_id_of(&card) == Some(dashcard_id)
                && let Some(fields) = card.as_object_mut()
            {
                found = true;
                for (key, value) in changes {
                    fields.insert(key.clone(), value.clone());
                }
            }
            card
        })
        .collect();
    if !found {
        return Err(GatewayError::invalid_argument(
            "dashcard_id",
            format!("Dashcard {dashcard_id} is not on this dashboard"),
        ));
    }
    Ok(json!({ "cards": cards }))
}

fn dashcard_id_of(card: &Value) -> Option<i64> {
    card.get("id").and_then(Value::as_i64)
}
