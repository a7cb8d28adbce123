use metabase_core::Credential;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::fallback::{AttemptPayload, FallbackAttempt, FallbackChain};
use crate::session::SessionManager;

const USER_AGENT: &str = concat!("metabase-mcp/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Single-file multipart upload of CSV text.
    Csv {
        field: &'static str,
        file_name: String,
        content: String,
    },
}

#[derive(Debug)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured base URL, e.g. `/api/card/1`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// HTTP access to the platform. Every request carries the credential header
/// provided by the session manager.
pub struct MetabaseClient {
    http: reqwest::Client,
    base_url: Url,
    session: SessionManager,
}

impl MetabaseClient {
    pub fn new(base_url: &str, credential: Credential) -> GatewayResult<Self> {
        let base_url = parse_base_url(base_url)?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        let session = SessionManager::new(credential, http.clone(), &base_url)?;
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn url_for(&self, path: &str, query: &[(String, String)]) -> GatewayResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                GatewayError::Configuration(format!(
                    "Metabase URL '{}' cannot carry API paths",
                    self.base_url
                ))
            })?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub async fn send(&self, request: ApiRequest) -> GatewayResult<Value> {
        let url = self.url_for(&request.path, &request.query)?;
        let (header, token) = self.session.auth_header().await?;

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .header(header, token);
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Csv {
                field,
                file_name,
                content,
            } => {
                let part = Part::text(content)
                    .file_name(file_name)
                    .mime_str("text/csv")
                    .map_err(|e| GatewayError::Internal(format!("Invalid upload part: {e}")))?;
                builder.multipart(Form::new().part(field, part))
            }
        };

        tracing::debug!(method = %request.method, path = %request.path, "Sending Metabase request");
        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            GatewayError::Transport(format!("Failed to read Metabase response body: {e}"))
        })?;
        if !status.is_success() {
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                "Metabase rejected request"
            );
            return Err(GatewayError::rejected(status.as_u16(), &bytes));
        }
        Ok(parse_response_body(&bytes))
    }

    pub async fn get(&self, path: &str) -> GatewayResult<Value> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn run_fallback(&self, chain: &FallbackChain) -> GatewayResult<Value> {
        chain.execute_with(|attempt| self.run_attempt(attempt)).await
    }

    async fn run_attempt(&self, attempt: &FallbackAttempt) -> GatewayResult<Value> {
        let body = match &attempt.payload {
            AttemptPayload::Empty => RequestBody::Empty,
            AttemptPayload::Json(body) => RequestBody::Json(body.clone()),
            AttemptPayload::ReadModifyWrite { source, rewrite } => {
                let current = self.get(source).await?;
                RequestBody::Json(rewrite(&current)?)
            }
        };
        self.send(ApiRequest::new(attempt.method.clone(), attempt.path.clone()).with_body(body))
            .await
    }
}

/// Only http(s) URLs that can carry a path are accepted. A trailing slash is
/// added so relative joins keep any path prefix (e.g. `/metabase`).
pub fn parse_base_url(raw: &str) -> GatewayResult<Url> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed)
        .map_err(|e| GatewayError::Configuration(format!("Invalid Metabase URL '{trimmed}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(GatewayError::Configuration(format!(
            "Metabase URL must be an http(s) URL, got '{trimmed}'"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn parse_response_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> MetabaseClient {
        MetabaseClient::new(base, Credential::ApiKey("k".to_string())).unwrap()
    }

    #[test]
    fn base_url_gains_trailing_slash_and_rejects_other_schemes() {
        assert_eq!(
            parse_base_url("https://bi.example.com/metabase").unwrap().as_str(),
            "https://bi.example.com/metabase/"
        );
        assert!(matches!(
            parse_base_url("ftp://bi.example.com"),
            Err(GatewayError::Configuration(_))
        ));
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn url_for_keeps_base_prefix_and_encodes_segments() {
        let client = client("https://bi.example.com/metabase");
        let url = client
            .url_for(
                "/api/card/3/params/p 1/search/a?b",
                &[("include_metadata".to_string(), "true".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://bi.example.com/metabase/api/card/3/params/p%201/search/a%3Fb?include_metadata=true"
        );
    }

    #[test]
    fn repeated_query_keys_are_preserved() {
        let client = client("http://localhost:3000");
        let url = client
            .url_for(
                "/api/activity/recents",
                &[
                    ("context".to_string(), "views".to_string()),
                    ("context".to_string(), "selections".to_string()),
                ],
            )
            .unwrap();
        assert_eq!(
            url.query(),
            Some("context=views&context=selections")
        );
    }

    #[test]
    fn response_bodies_fall_back_to_text() {
        assert_eq!(parse_response_body(b""), Value::Null);
        assert_eq!(parse_response_body(br#"{"a":1}"#)["a"], 1);
        assert_eq!(parse_response_body(b"plain"), Value::String("plain".into()));
    }
}
