use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value, json};

use super::{Body, Route, custom, object_schema, route};
use crate::args::{optional_string_array, required_array, required_id, required_string};
use crate::client::{ApiRequest, MetabaseClient, RequestBody};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{Capability, ToolOutput};

const CSV_FIELD: &str = "file";
const DEFAULT_CSV_NAME: &str = "upload.csv";

pub fn capabilities() -> Vec<Capability> {
    vec![
        custom(
            "list_tables",
            "List tables, optionally restricted to the given ids",
            object_schema(
                json!({ "ids": { "type": "array", "items": { "type": "number" }, "description": "Only these table ids" } }),
                &[],
            ),
            list_tables,
        ),
        custom(
            "update_tables",
            "Apply the same update to several tables",
            object_schema(
                json!({
                    "ids": { "type": "array", "items": { "type": "number" } },
                    "updates": { "type": "object", "description": "Fields to set on every table" }
                }),
                &["ids", "updates"],
            ),
            update_tables,
        ),
        route(
            "get_table",
            "Get a table by ID",
            object_schema(
                json!({
                    "table_id": table_id(),
                    "include_sensitive_fields": { "type": "boolean" },
                    "include_hidden_fields": { "type": "boolean" },
                    "include_editable_data_model": { "type": "boolean" }
                }),
                &["table_id"],
            ),
            Route::get("/api/table/{table_id}").query(&[
                "include_sensitive_fields",
                "include_hidden_fields",
                "include_editable_data_model",
            ]),
        ),
        route(
            "update_table",
            "Update table metadata",
            object_schema(
                json!({
                    "table_id": table_id(),
                    "display_name": { "type": "string" },
                    "description": { "type": "string" },
                    "entity_type": { "type": "string" },
                    "visibility_type": { "type": "string" },
                    "caveats": { "type": "string" },
                    "points_of_interest": { "type": "string" },
                    "show_in_getting_started": { "type": "boolean" },
                    "field_order": { "type": "string" }
                }),
                &["table_id"],
            ),
            Route::put("/api/table/{table_id}").body(Body::Changes),
        ),
        by_table("get_table_fks", "List foreign keys pointing at a table", Route::get("/api/table/{table_id}/fks")),
        by_table("get_table_related", "Get entities related to a table", Route::get("/api/table/{table_id}/related")),
        route(
            "get_table_query_metadata",
            "Get query metadata of a table",
            object_schema(
                json!({
                    "table_id": table_id(),
                    "include_sensitive_fields": { "type": "boolean" },
                    "include_hidden_fields": { "type": "boolean" },
                    "include_editable_data_model": { "type": "boolean" }
                }),
                &["table_id"],
            ),
            Route::get("/api/table/{table_id}/query_metadata").query(&[
                "include_sensitive_fields",
                "include_hidden_fields",
                "include_editable_data_model",
            ]),
        ),
        route(
            "get_card_table_fks",
            "Get foreign keys of the virtual table backed by a card",
            object_schema(json!({ "card_id": { "type": "number" } }), &["card_id"]),
            Route::get("/api/table/card__{card_id}/fks"),
        ),
        route(
            "get_card_table_query_metadata",
            "Get query metadata of the virtual table backed by a card",
            object_schema(json!({ "card_id": { "type": "number" } }), &["card_id"]),
            Route::get("/api/table/card__{card_id}/query_metadata"),
        ),
        by_table(
            "rescan_table_field_values",
            "Trigger a rescan of a table's field values",
            Route::post("/api/table/{table_id}/rescan_values"),
        ),
        by_table(
            "discard_table_field_values",
            "Discard cached field values of a table",
            Route::post("/api/table/{table_id}/discard_values"),
        ),
        by_table("sync_table_schema", "Trigger a schema sync of a table", Route::post("/api/table/{table_id}/sync_schema")),
        route(
            "reorder_table_fields",
            "Set the order of a table's fields",
            object_schema(
                json!({
                    "table_id": table_id(),
                    "field_order": { "type": "array", "items": { "type": "number" } }
                }),
                &["table_id", "field_order"],
            ),
            Route::put("/api/table/{table_id}/fields/order").body(Body::Fields(&["field_order"])),
        ),
        route(
            "get_table_data",
            "Read rows of a table",
            object_schema(
                json!({
                    "table_id": table_id(),
                    "limit": { "type": "number" },
                    "offset": { "type": "number" }
                }),
                &["table_id"],
            ),
            Route::get("/api/table/{table_id}/data").query(&["limit", "offset"]),
        ),
        custom(
            "append_csv_to_table",
            "Append the rows of a CSV document to an uploaded table",
            csv_schema(),
            |client, args| upload_csv(client, args, "append-csv"),
        ),
        custom(
            "replace_table_csv",
            "Replace the contents of an uploaded table with a CSV document",
            csv_schema(),
            |client, args| upload_csv(client, args, "replace-csv"),
        ),
    ]
}

fn table_id() -> Value {
    json!({ "type": "number", "description": "ID of the table" })
}

fn by_table(name: &'static str, description: &'static str, endpoint: Route) -> Capability {
    route(
        name,
        description,
        object_schema(json!({ "table_id": table_id() }), &["table_id"]),
        endpoint,
    )
}

fn csv_schema() -> Value {
    object_schema(
        json!({
            "table_id": table_id(),
            "csv_content": { "type": "string", "description": "CSV text, header row first" },
            "file_name": { "type": "string", "default": DEFAULT_CSV_NAME }
        }),
        &["table_id", "csv_content"],
    )
}

async fn list_tables(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let mut request = ApiRequest::get("/api/table");
    if let Some(ids) = optional_string_array(&args, "ids")?.filter(|ids| !ids.is_empty()) {
        request = request.with_query(vec![("ids".to_string(), ids.join(","))]);
    }
    Ok(ToolOutput::Json(client.send(request).await?))
}

async fn update_tables(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let ids = required_array(&args, "ids")?;
    let Some(Value::Object(updates)) = args.get("updates") else {
        return Err(GatewayError::invalid_argument(
            "updates",
            "'updates' must be an object",
        ));
    };
    let mut body = updates.clone();
    body.insert("ids".to_string(), Value::Array(ids));
    let result = client
        .send(ApiRequest::new(Method::PUT, "/api/table").with_json(Value::Object(body)))
        .await?;
    Ok(ToolOutput::Json(result))
}

async fn upload_csv(
    client: Arc<MetabaseClient>,
    args: Map<String, Value>,
    action: &'static str,
) -> GatewayResult<ToolOutput> {
    let table_id = required_id(&args, "table_id")?;
    let content = required_string(&args, "csv_content")?;
    let file_name = match args.get("file_name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        _ => DEFAULT_CSV_NAME.to_string(),
    };
    let request = ApiRequest::new(Method::POST, format!("/api/table/{table_id}/{action}"))
        .with_body(RequestBody::Csv {
            field: CSV_FIELD,
            file_name,
            content,
        });
    Ok(ToolOutput::Json(client.send(request).await?))
}
