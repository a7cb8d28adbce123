use serde_json::{Value, json};

use super::{Body, Route, object_schema, route};
use crate::registry::Capability;

pub fn capabilities() -> Vec<Capability> {
    vec![
        route(
            "list_users",
            "List Metabase users",
            object_schema(
                json!({ "include_deactivated": { "type": "boolean", "default": false } }),
                &[],
            ),
            Route::get("/api/user").query(&["include_deactivated"]),
        ),
        route(
            "get_user",
            "Get a user by ID",
            object_schema(json!({ "user_id": user_id() }), &["user_id"]),
            Route::get("/api/user/{user_id}"),
        ),
        route(
            "create_user",
            "Create a new user",
            object_schema(
                json!({
                    "first_name": { "type": "string" },
                    "last_name": { "type": "string" },
                    "email": { "type": "string" },
                    "password": { "type": "string" },
                    "group_ids": { "type": "array", "items": { "type": "number" } }
                }),
                &["first_name", "last_name", "email"],
            ),
            Route::post("/api/user").body(Body::Fields(&[
                "first_name",
                "last_name",
                "email",
                "password",
                "group_ids",
            ])),
        ),
        route(
            "update_user",
            "Update a user",
            object_schema(
                json!({
                    "user_id": user_id(),
                    "first_name": { "type": "string" },
                    "last_name": { "type": "string" },
                    "email": { "type": "string" },
                    "is_superuser": { "type": "boolean" },
                    "locale": { "type": "string" },
                    "group_ids": { "type": "array", "items": { "type": "number" } }
                }),
                &["user_id"],
            ),
            Route::put("/api/user/{user_id}").body(Body::Changes),
        ),
        route(
            "delete_user",
            "Deactivate a user",
            object_schema(json!({ "user_id": user_id() }), &["user_id"]),
            Route::delete("/api/user/{user_id}").message("User {user_id} deactivated"),
        ),
        route(
            "list_permission_groups",
            "List permission groups",
            object_schema(json!({}), &[]),
            Route::get("/api/permissions/group"),
        ),
        route(
            "create_permission_group",
            "Create a permission group",
            object_schema(json!({ "name": { "type": "string" } }), &["name"]),
            Route::post("/api/permissions/group").body(Body::Fields(&["name"])),
        ),
        route(
            "update_permission_group",
            "Rename a permission group",
            object_schema(
                json!({ "group_id": group_id(), "name": { "type": "string" } }),
                &["group_id", "name"],
            ),
            Route::put("/api/permissions/group/{group_id}").body(Body::Fields(&["name"])),
        ),
        route(
            "delete_permission_group",
            "Delete a permission group",
            object_schema(json!({ "group_id": group_id() }), &["group_id"]),
            Route::delete("/api/permissions/group/{group_id}")
                .message("Permission group {group_id} deleted successfully"),
        ),
    ]
}

fn user_id() -> Value {
    json!({ "type": "number", "description": "ID of the user" })
}

fn group_id() -> Value {
    json!({ "type": "number", "description": "ID of the permission group" })
}
