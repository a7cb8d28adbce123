//! In-process stand-in for a Metabase instance.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use metabase_core::Credential;
use metabase_mcp_runtime::{Dispatcher, MetabaseClient, tools};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub api_key: Option<String>,
    pub session: Option<String>,
}

#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<Recorded>>>);

impl RequestLog {
    fn push(&self, recorded: Recorded) {
        self.0.lock().unwrap().push(recorded);
    }

    fn snapshot(&self) -> Vec<Recorded> {
        self.0.lock().unwrap().clone()
    }
}

async fn record(State(log): State<RequestLog>, request: Request, next: Next) -> Response {
    {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        log.push(Recorded {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            api_key: header("x-api-key"),
            session: header("x-metabase-session"),
        });
    }
    next.run(request).await
}

pub struct MockMetabase {
    pub url: String,
    log: RequestLog,
    server: JoinHandle<()>,
}

impl MockMetabase {
    pub async fn start(router: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = RequestLog::default();
        let app = router
            .fallback(|| async { (StatusCode::NOT_FOUND, "API endpoint does not exist.") })
            .layer(middleware::from_fn_with_state(log.clone(), record));
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{addr}"),
            log,
            server,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.snapshot()
    }

    /// `"METHOD /path"` of every request, in arrival order.
    pub fn calls(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|recorded| format!("{} {}", recorded.method, recorded.path))
            .collect()
    }

    pub fn hits(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|recorded| recorded.method == method && recorded.path == path)
            .count()
    }

    pub fn dispatcher(&self, credential: Credential) -> Dispatcher {
        let client = MetabaseClient::new(&self.url, credential).unwrap();
        Dispatcher::new(Arc::new(tools::catalog().unwrap()), Arc::new(client))
    }

    pub fn api_key_dispatcher(&self) -> Dispatcher {
        self.dispatcher(Credential::ApiKey("mb_test_key".to_string()))
    }

    pub fn password_dispatcher(&self) -> Dispatcher {
        self.dispatcher(Credential::BasicAuth {
            username: "ana@example.com".to_string(),
            password: "s3cret".to_string(),
        })
    }
}

impl Drop for MockMetabase {
    fn drop(&mut self) {
        self.server.abort();
    }
}
