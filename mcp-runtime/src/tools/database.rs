use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value, json};

use super::{Body, Route, custom, object_schema, route};
use crate::args::{arg_bool, required_id, required_string};
use crate::client::{ApiRequest, MetabaseClient};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{Capability, ToolOutput};

pub fn capabilities() -> Vec<Capability> {
    vec![
        route(
            "list_databases",
            "List all databases connected to Metabase",
            object_schema(
                json!({
                    "include": { "type": "string", "enum": ["tables"], "description": "Also return the tables of each database" }
                }),
                &[],
            ),
            Route::get("/api/database").query(&["include"]),
        ),
        route(
            "get_database",
            "Get a database by ID",
            object_schema(
                json!({
                    "database_id": db_id(),
                    "include": { "type": "string", "enum": ["tables", "tables.fields"] }
                }),
                &["database_id"],
            ),
            Route::get("/api/database/{database_id}").query(&["include"]),
        ),
        custom(
            "execute_query",
            "Execute a native SQL query against a database",
            object_schema(
                json!({
                    "database_id": db_id(),
                    "query": { "type": "string", "description": "SQL query text" },
                    "native_parameters": { "type": "array", "description": "Query parameter values", "items": { "type": "object" } }
                }),
                &["database_id", "query"],
            ),
            execute_query,
        ),
        custom(
            "execute_query_export",
            "Execute a query and export the result in the given format",
            object_schema(
                json!({
                    "export_format": { "type": "string", "enum": ["csv", "json", "xlsx", "api"] },
                    "query": { "type": "object", "description": "Full dataset query (database, type, native or query)" },
                    "format_rows": { "type": "boolean", "default": false },
                    "pivot_results": { "type": "boolean", "default": false },
                    "visualization_settings": { "type": "object" }
                }),
                &["export_format", "query"],
            ),
            execute_query_export,
        ),
        route(
            "create_sample_database",
            "Add the sample database",
            object_schema(json!({}), &[]),
            Route::post("/api/database/sample_database"),
        ),
        route(
            "update_database",
            "Update database connection settings",
            object_schema(
                json!({
                    "database_id": db_id(),
                    "name": { "type": "string" },
                    "engine": { "type": "string" },
                    "details": { "type": "object" },
                    "is_full_sync": { "type": "boolean" },
                    "is_on_demand": { "type": "boolean" },
                    "schedules": { "type": "object" },
                    "description": { "type": "string" },
                    "caveats": { "type": "string" },
                    "points_of_interest": { "type": "string" },
                    "auto_run_queries": { "type": "boolean" },
                    "refingerprint": { "type": "boolean" },
                    "settings": { "type": "object" }
                }),
                &["database_id"],
            ),
            Route::put("/api/database/{database_id}").body(Body::Changes),
        ),
        route(
            "delete_database",
            "Remove a database connection",
            object_schema(json!({ "database_id": db_id() }), &["database_id"]),
            Route::delete("/api/database/{database_id}")
                .message("Database {database_id} deleted successfully"),
        ),
        get("get_database_fields", "List all fields of a database", "/api/database/{database_id}/fields"),
        get("get_database_idfields", "List primary key fields of a database", "/api/database/{database_id}/idfields"),
        route(
            "get_database_metadata",
            "Get full metadata (tables and fields) of a database",
            object_schema(
                json!({
                    "database_id": db_id(),
                    "include_hidden": { "type": "boolean", "default": false }
                }),
                &["database_id"],
            ),
            Route::get("/api/database/{database_id}/metadata").query(&["include_hidden"]),
        ),
        get("get_database_schemas", "List schema names of a database", "/api/database/{database_id}/schemas"),
        route(
            "get_database_schema_tables",
            "List the tables of one schema",
            object_schema(
                json!({
                    "database_id": db_id(),
                    "schema": { "type": "string", "description": "Schema name" }
                }),
                &["database_id", "schema"],
            ),
            Route::get("/api/database/{database_id}/schema/{schema}"),
        ),
        get(
            "get_database_syncable_schemas",
            "List schemas that can be synced",
            "/api/database/{database_id}/syncable_schemas",
        ),
        get("get_database_healthcheck", "Check that a database is reachable", "/api/database/{database_id}/healthcheck"),
        get("get_database_usage_info", "Count entities that depend on a database", "/api/database/{database_id}/usage_info"),
        post("sync_database_schema", "Trigger a schema sync", "/api/database/{database_id}/sync_schema"),
        post(
            "rescan_database_field_values",
            "Trigger a rescan of field values",
            "/api/database/{database_id}/rescan_values",
        ),
        post(
            "discard_database_field_values",
            "Discard cached field values",
            "/api/database/{database_id}/discard_values",
        ),
        post(
            "dismiss_database_spinner",
            "Mark the initial sync as finished",
            "/api/database/{database_id}/dismiss_spinner",
        ),
    ]
}

fn db_id() -> Value {
    json!({ "type": "number", "description": "ID of the database" })
}

fn get(name: &'static str, description: &'static str, path: &'static str) -> Capability {
    route(
        name,
        description,
        object_schema(json!({ "database_id": db_id() }), &["database_id"]),
        Route::get(path),
    )
}

fn post(name: &'static str, description: &'static str, path: &'static str) -> Capability {
    route(
        name,
        description,
        object_schema(json!({ "database_id": db_id() }), &["database_id"]),
        Route::post(path),
    )
}

/// Body of an ad-hoc native query.
pub fn native_query(database_id: i64, query: &str, parameters: Value) -> Value {
    json!({
        "type": "native",
        "native": {
            "query": query,
            "template_tags": {}
        },
        "parameters": parameters,
        "database": database_id,
    })
}

async fn execute_query(client: Arc<MetabaseClient>, args: Map<String, Value>) -> GatewayResult<ToolOutput> {
    let database_id = required_id(&args, "database_id")?;
    let query = required_string(&args, "query")?;
    let parameters = match args.get("native_parameters") {
        None | Some(Value::Null) => json!([]),
        Some(value @ Value::Array(_)) => value.clone(),
        Some(_) => {
            return Err(GatewayError::invalid_argument(
                "native_parameters",
                "'native_parameters' must be an array",
            ));
        }
    };
    let result = client
        .send(
            ApiRequest::new(Method::POST, "/api/dataset")
                .with_json(native_query(database_id, &query, parameters)),
        )
        .await?;
    Ok(ToolOutput::Json(result))
}

async fn execute_query_export(
    client: Arc<MetabaseClient>,
    args: Map<String, Value>,
) -> GatewayResult<ToolOutput> {
    let export_format = required_string(&args, "export_format")?;
    if !matches!(export_format.as_str(), "csv" | "json" | "xlsx" | "api") {
        return Err(GatewayError::invalid_argument(
            "export_format",
            format!("Unsupported export format '{export_format}'"),
        ));
    }
    let query = args.get("query").cloned().unwrap_or(Value::Null);
    let body = json!({
        "query": query,
        "format_rows": arg_bool(&args, "format_rows", false)?,
        "pivot_results": arg_bool(&args, "pivot_results", false)?,
        "visualization_settings": args.get("visualization_settings").cloned().unwrap_or_else(|| json!({})),
    });
    let result = client
        .send(ApiRequest::new(Method::POST, format!("/api/dataset/{export_format}")).with_json(body))
        .await?;
    Ok(ToolOutput::Json(result))
}
