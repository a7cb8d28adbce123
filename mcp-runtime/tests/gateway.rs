mod support;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use metabase_core::{Credential, ErrorCode};
use metabase_mcp_runtime::{Dispatcher, MetabaseClient, tools};
use serde_json::{Value, json};

use support::MockMetabase;

fn parse_text(text: Option<&str>) -> Value {
    serde_json::from_str(text.unwrap()).unwrap()
}

#[tokio::test]
async fn api_key_is_sent_and_result_is_pretty_json() {
    let mock = MockMetabase::start(Router::new().route(
        "/api/card/{card_id}",
        get(|Path(card_id): Path<i64>| async move { Json(json!({ "id": card_id, "name": "Revenue" })) }),
    ))
    .await;
    let dispatcher = mock.api_key_dispatcher();

    let envelope = dispatcher
        .invoke("get_card", json!({ "card_id": 5 }))
        .await
        .unwrap();

    assert_eq!(
        envelope.first_text(),
        Some("{\n  \"id\": 5,\n  \"name\": \"Revenue\"\n}")
    );
    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].api_key.as_deref(), Some("mb_test_key"));
    assert_eq!(requests[0].session, None);
}

#[tokio::test]
async fn concurrent_first_calls_share_one_session_exchange() {
    let router = Router::new()
        .route(
            "/api/session",
            post(|Json(body): Json<Value>| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                if body == json!({ "username": "ana@example.com", "password": "s3cret" }) {
                    (StatusCode::OK, Json(json!({ "id": "session-token-1" })))
                } else {
                    (StatusCode::UNAUTHORIZED, Json(json!({ "errors": "bad credentials" })))
                }
            }),
        )
        .route("/api/dashboard", get(|| async { Json(json!([])) }));
    let mock = MockMetabase::start(router).await;
    let dispatcher = Arc::new(mock.password_dispatcher());

    let calls = (0..10).map(|_| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.invoke("list_dashboards", json!({})).await }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(mock.hits("POST", "/api/session"), 1);
    assert_eq!(mock.hits("GET", "/api/dashboard"), 10);
    for request in mock.requests().iter().filter(|r| r.path == "/api/dashboard") {
        assert_eq!(request.session.as_deref(), Some("session-token-1"));
        assert_eq!(request.api_key, None);
    }

    // The session is cached for later calls.
    dispatcher.invoke("list_dashboards", json!({})).await.unwrap();
    assert_eq!(mock.hits("POST", "/api/session"), 1);
}

#[tokio::test]
async fn failed_exchange_is_retried_on_the_next_call() {
    let mock = MockMetabase::start(Router::new().route(
        "/api/session",
        post(|| async { (StatusCode::UNAUTHORIZED, "Invalid password") }),
    ))
    .await;
    let dispatcher = mock.password_dispatcher();

    let first = dispatcher
        .invoke("list_dashboards", json!({}))
        .await
        .unwrap_err();
    assert_eq!(first.code, ErrorCode::Authentication);
    assert!(first.message.starts_with("Failed to authenticate with Metabase"));

    let second = dispatcher
        .invoke("list_dashboards", json!({}))
        .await
        .unwrap_err();
    assert_eq!(second.code, ErrorCode::Authentication);
    assert_eq!(mock.hits("POST", "/api/session"), 2);
    assert_eq!(mock.hits("GET", "/api/dashboard"), 0);
}

#[tokio::test]
async fn invalid_arguments_and_unknown_tools_never_reach_the_network() {
    let mock = MockMetabase::start(Router::new()).await;
    let dispatcher = mock.password_dispatcher();

    let missing = dispatcher.invoke("get_card", json!({})).await.unwrap_err();
    assert_eq!(missing.code, ErrorCode::InvalidArguments);
    assert_eq!(missing.field.as_deref(), Some("card_id"));

    let blank = dispatcher
        .invoke("search_content", json!({ "query": "   " }))
        .await
        .unwrap_err();
    assert_eq!(blank.code, ErrorCode::InvalidArguments);

    let not_an_object = dispatcher
        .invoke("list_cards", json!(["card"]))
        .await
        .unwrap_err();
    assert_eq!(not_an_object.code, ErrorCode::InvalidArguments);

    let unknown = dispatcher
        .invoke("unknown_op", json!({}))
        .await
        .unwrap_err();
    assert_eq!(unknown.code, ErrorCode::UnknownCapability);
    assert_eq!(unknown.message, "Unknown Metabase tool: unknown_op");

    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn handler_argument_checks_run_before_the_session_exchange() {
    let mock = MockMetabase::start(Router::new()).await;
    let dispatcher = mock.password_dispatcher();

    let no_changes = dispatcher
        .invoke("update_dashboard", json!({ "dashboard_id": 1 }))
        .await
        .unwrap_err();
    assert_eq!(no_changes.code, ErrorCode::InvalidArguments);

    let no_card_changes = dispatcher
        .invoke("update_dashboard_card", json!({ "dashboard_id": 1, "dashcard_id": 2 }))
        .await
        .unwrap_err();
    assert_eq!(no_card_changes.code, ErrorCode::InvalidArguments);

    let bad_settings = dispatcher
        .invoke(
            "add_card_to_dashboard",
            json!({ "dashboard_id": 1, "card_id": 3, "visualization_settings": "wide" }),
        )
        .await
        .unwrap_err();
    assert_eq!(bad_settings.code, ErrorCode::InvalidArguments);
    assert_eq!(bad_settings.field.as_deref(), Some("visualization_settings"));

    let bad_id = dispatcher
        .invoke(
            "remove_card_from_dashboard",
            json!({ "dashboard_id": 1, "dashcard_id": "first" }),
        )
        .await
        .unwrap_err();
    assert_eq!(bad_id.code, ErrorCode::InvalidArguments);
    assert_eq!(bad_id.field.as_deref(), Some("dashcard_id"));

    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn unauthorized_after_login_is_a_plain_rejection() {
    let router = Router::new()
        .route(
            "/api/session",
            post(|| async { Json(json!({ "id": "session-token-1" })) }),
        )
        .route("/api/dashboard", get(|| async { Json(json!([])) }))
        .route(
            "/api/card",
            get(|| async { (StatusCode::UNAUTHORIZED, "Unauthenticated") }),
        );
    let mock = MockMetabase::start(router).await;
    let dispatcher = mock.password_dispatcher();

    dispatcher.invoke("list_dashboards", json!({})).await.unwrap();
    let err = dispatcher.invoke("list_cards", json!({})).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::RemoteRejected);
    assert_eq!(err.status_code, Some(401));
    assert_eq!(mock.hits("POST", "/api/session"), 1);
    assert!(dispatcher.client().session().cached_session().is_some());

    dispatcher.invoke("list_dashboards", json!({})).await.unwrap();
    assert_eq!(mock.hits("POST", "/api/session"), 1);
}

#[tokio::test]
async fn remote_rejection_keeps_status_code() {
    let mock = MockMetabase::start(Router::new().route(
        "/api/dashboard/{dashboard_id}",
        get(|| async { (StatusCode::NOT_FOUND, "Not found.") }),
    ))
    .await;
    let dispatcher = mock.api_key_dispatcher();

    let err = dispatcher
        .invoke("get_dashboard", json!({ "dashboard_id": 404 }))
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::RemoteRejected);
    assert_eq!(err.status_code, Some(404));
    assert!(err.message.contains("404"));
}

#[tokio::test]
async fn unreachable_platform_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = MetabaseClient::new(&url, Credential::ApiKey("k".to_string())).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(tools::catalog().unwrap()), Arc::new(client));
    let err = dispatcher
        .invoke("list_dashboards", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Transport);
}

#[tokio::test]
async fn add_card_falls_back_in_order_until_one_shape_is_accepted() {
    let written = Arc::new(Mutex::new(None::<Value>));
    let written_by_put = Arc::clone(&written);
    let router = Router::new()
        .route(
            "/api/dashboard/{dashboard_id}",
            get(|Path(dashboard_id): Path<i64>| async move {
                Json(json!({ "id": dashboard_id, "dashcards": [{ "id": 10, "card_id": 1 }] }))
            }),
        )
        .route(
            "/api/dashboard/{dashboard_id}/cards",
            post(|| async { (StatusCode::NOT_FOUND, "API endpoint does not exist.") }).put(
                move |Json(body): Json<Value>| {
                    let written = Arc::clone(&written_by_put);
                    async move {
                        *written.lock().unwrap() = Some(body);
                        (StatusCode::INTERNAL_SERVER_ERROR, "cards update failed")
                    }
                },
            ),
        )
        .route(
            "/api/dashboard/{dashboard_id}/dashcard",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "id": 77, "card_id": body["card_id"], "size_x": body["size_x"] }))
            }),
        );
    let mock = MockMetabase::start(router).await;
    let dispatcher = mock.api_key_dispatcher();

    let envelope = dispatcher
        .invoke("add_card_to_dashboard", json!({ "dashboard_id": 3, "card_id": 7 }))
        .await
        .unwrap();

    assert_eq!(
        parse_text(envelope.first_text()),
        json!({ "id": 77, "card_id": 7, "size_x": 4 })
    );
    assert_eq!(
        mock.calls(),
        vec![
            "POST /api/dashboard/3/cards",
            "GET /api/dashboard/3",
            "PUT /api/dashboard/3/cards",
            "POST /api/dashboard/3/dashcard",
        ]
    );
    let put_body = written.lock().unwrap().clone().unwrap();
    let cards = put_body["cards"].as_array().unwrap();
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[1]["id"], -1);
    assert_eq!(cards[1]["card_id"], 7);
}

#[tokio::test]
async fn exhausted_fallback_surfaces_the_last_error() {
    let router = Router::new()
        .route(
            "/api/dashboard/{dashboard_id}",
            get(|| async { Json(json!({ "cards": [{ "id": 12 }] })) }),
        )
        .route(
            "/api/dashboard/{dashboard_id}/cards",
            put(|| async { (StatusCode::FORBIDDEN, "You don't have permissions to do that.") }),
        );
    let mock = MockMetabase::start(router).await;
    let dispatcher = mock.api_key_dispatcher();

    let err = dispatcher
        .invoke(
            "remove_card_from_dashboard",
            json!({ "dashboard_id": 3, "dashcard_id": 12 }),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::RemoteRejected);
    assert_eq!(err.status_code, Some(403));
    assert_eq!(
        mock.calls(),
        vec![
            "DELETE /api/dashboard/3/cards/12",
            "DELETE /api/dashboard/3/dashcard/12",
            "GET /api/dashboard/3",
            "PUT /api/dashboard/3/cards",
        ]
    );
}

#[tokio::test]
async fn deletes_answer_with_a_message() {
    let archived = Arc::new(Mutex::new(None::<Value>));
    let archived_by_put = Arc::clone(&archived);
    let router = Router::new()
        .route(
            "/api/collection/{collection_id}",
            axum::routing::delete(|| async { StatusCode::NO_CONTENT }),
        )
        .route(
            "/api/dashboard/{dashboard_id}",
            put(move |Json(body): Json<Value>| {
                let archived = Arc::clone(&archived_by_put);
                async move {
                    *archived.lock().unwrap() = Some(body);
                    Json(json!({ "id": 8, "archived": true }))
                }
            }),
        );
    let mock = MockMetabase::start(router).await;
    let dispatcher = mock.api_key_dispatcher();

    let deleted = dispatcher
        .invoke("delete_collection", json!({ "collection_id": 4 }))
        .await
        .unwrap();
    assert_eq!(deleted.first_text(), Some("Collection 4 deleted successfully"));

    let soft = dispatcher
        .invoke("delete_dashboard", json!({ "dashboard_id": 8 }))
        .await
        .unwrap();
    assert_eq!(soft.first_text(), Some("Dashboard 8 archived"));
    assert_eq!(
        archived.lock().unwrap().clone(),
        Some(json!({ "archived": true }))
    );
}

#[tokio::test]
async fn query_parameters_are_encoded() {
    let router = Router::new()
        .route(
            "/api/search",
            get(|Query(params): Query<HashMap<String, String>>| async move { Json(json!(params)) }),
        )
        .route("/api/activity/recents", get(|| async { Json(json!({ "recents": [] })) }));
    let mock = MockMetabase::start(router).await;
    let dispatcher = mock.api_key_dispatcher();

    let envelope = dispatcher
        .invoke(
            "search_content",
            json!({ "query": "monthly revenue", "models": ["card", "dashboard"] }),
        )
        .await
        .unwrap();
    assert_eq!(
        parse_text(envelope.first_text()),
        json!({ "q": "monthly revenue", "models": "card,dashboard" })
    );

    dispatcher
        .invoke("get_recents", json!({ "context": ["views", "selections"] }))
        .await
        .unwrap();
    let recents = mock
        .requests()
        .into_iter()
        .find(|r| r.path == "/api/activity/recents")
        .unwrap();
    assert_eq!(
        recents.query.as_deref(),
        Some("context=views&context=selections")
    );
}

#[tokio::test]
async fn native_query_posts_a_dataset_request() {
    let router = Router::new().route(
        "/api/dataset",
        post(|Json(body): Json<Value>| async move { Json(json!({ "received": body })) }),
    );
    let mock = MockMetabase::start(router).await;
    let dispatcher = mock.api_key_dispatcher();

    let envelope = dispatcher
        .invoke("execute_query", json!({ "database_id": 2, "query": "SELECT 1" }))
        .await
        .unwrap();

    assert_eq!(
        parse_text(envelope.first_text())["received"],
        json!({
            "type": "native",
            "native": { "query": "SELECT 1", "template_tags": {} },
            "parameters": [],
            "database": 2
        })
    );
}

#[tokio::test]
async fn csv_upload_is_sent_as_multipart() {
    let router = Router::new().route(
        "/api/table/{table_id}/append-csv",
        post(|mut multipart: Multipart| async move {
            let mut fields = Vec::new();
            while let Some(field) = multipart.next_field().await.unwrap() {
                let name = field.name().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let text = field.text().await.unwrap();
                fields.push(json!({
                    "name": name,
                    "file_name": file_name,
                    "content_type": content_type,
                    "text": text,
                }));
            }
            Json(json!({ "fields": fields }))
        }),
    );
    let mock = MockMetabase::start(router).await;
    let dispatcher = mock.api_key_dispatcher();

    let envelope = dispatcher
        .invoke(
            "append_csv_to_table",
            json!({ "table_id": 9, "csv_content": "id,name\n1,Ana\n", "file_name": "people.csv" }),
        )
        .await
        .unwrap();

    assert_eq!(
        parse_text(envelope.first_text()),
        json!({
            "fields": [{
                "name": "file",
                "file_name": "people.csv",
                "content_type": "text/csv",
                "text": "id,name\n1,Ana\n"
            }]
        })
    );
}
