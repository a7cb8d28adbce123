use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use metabase_core::Credential;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::{GatewayError, GatewayResult};

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const SESSION_HEADER: &str = "X-Metabase-Session";
pub const SESSION_PATH: &str = "/api/session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    ApiKey,
    SessionToken,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::ApiKey => "api_key",
            SessionKind::SessionToken => "session_token",
        }
    }
}

/// Authentication state shared by every request of the process.
#[derive(Debug, Clone)]
pub struct Session {
    token: Option<String>,
    kind: SessionKind,
    acquired_at: DateTime<Utc>,
}

impl Session {
    /// `None` for API-key sessions: the key itself travels on every request.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

type PendingExchange = Shared<BoxFuture<'static, GatewayResult<Arc<Session>>>>;

enum SessionState {
    Absent,
    Pending(PendingExchange),
    Ready(Arc<Session>),
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
}

/// Owns the single process-wide session.
///
/// The first caller that finds no session starts the identity exchange and
/// parks it in `state` as a shared future; everyone arriving while it is in
/// flight awaits that same future. Once it resolves the slot becomes either
/// `Ready` or, on failure, `Absent` again so a later call can retry.
pub struct SessionManager {
    credential: Credential,
    http: reqwest::Client,
    session_url: Url,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(credential: Credential, http: reqwest::Client, base_url: &Url) -> GatewayResult<Self> {
        let session_url = base_url.join(SESSION_PATH.trim_start_matches('/')).map_err(|e| {
            GatewayError::Configuration(format!("Invalid Metabase URL '{base_url}': {e}"))
        })?;
        let state = match &credential {
            Credential::ApiKey(_) => {
                tracing::info!("Using Metabase API key for authentication");
                SessionState::Ready(Arc::new(Session {
                    token: None,
                    kind: SessionKind::ApiKey,
                    acquired_at: Utc::now(),
                }))
            }
            Credential::BasicAuth { username, .. } => {
                tracing::info!(username = %username, "Using Metabase username/password for authentication");
                SessionState::Absent
            }
        };
        Ok(Self {
            credential,
            http,
            session_url,
            state: Mutex::new(state),
        })
    }

    pub fn credential_kind(&self) -> &'static str {
        self.credential.kind()
    }

    pub fn cached_session(&self) -> Option<Arc<Session>> {
        match &*self.lock_state() {
            SessionState::Ready(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Idempotent; performs at most one identity exchange no matter how many
    /// callers race on an empty session.
    pub async fn ensure_authenticated(&self) -> GatewayResult<Arc<Session>> {
        let pending = {
            let mut state = self.lock_state();
            match &*state {
                SessionState::Ready(session) => return Ok(Arc::clone(session)),
                SessionState::Pending(pending) => pending.clone(),
                SessionState::Absent => {
                    let Credential::BasicAuth { username, password } = &self.credential else {
                        return Err(GatewayError::Internal(
                            "API key session missing from session state".to_string(),
                        ));
                    };
                    let pending = exchange_session(
                        self.http.clone(),
                        self.session_url.clone(),
                        username.clone(),
                        password.clone(),
                    )
                    .boxed()
                    .shared();
                    *state = SessionState::Pending(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.clone().await;

        let mut state = self.lock_state();
        if let SessionState::Pending(current) = &*state {
            if current.ptr_eq(&pending) {
                *state = match &outcome {
                    Ok(session) => SessionState::Ready(Arc::clone(session)),
                    Err(_) => SessionState::Absent,
                };
            }
        }
        outcome
    }

    /// Header that authenticates an outgoing request.
    pub async fn auth_header(&self) -> GatewayResult<(&'static str, String)> {
        if let Credential::ApiKey(key) = &self.credential {
            return Ok((API_KEY_HEADER, key.clone()));
        }
        let session = self.ensure_authenticated().await?;
        let token = session.token().ok_or_else(|| {
            GatewayError::Internal("Session token missing after authentication".to_string())
        })?;
        Ok((SESSION_HEADER, token.to_string()))
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn exchange_session(
    http: reqwest::Client,
    session_url: Url,
    username: String,
    password: String,
) -> GatewayResult<Arc<Session>> {
    tracing::info!("Authenticating with Metabase using username/password");
    let result = async {
        let response = http
            .post(session_url)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| format!("identity exchange request failed: {e}"))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("failed to read identity response: {e}"))?;
        if !status.is_success() {
            return Err(format!("identity endpoint answered {status}"));
        }
        let body: SessionResponse = serde_json::from_slice(&bytes)
            .map_err(|e| format!("identity response carried no session id: {e}"))?;
        Ok(body.id)
    }
    .await;

    match result {
        Ok(token) => {
            tracing::info!("Successfully authenticated with Metabase");
            Ok(Arc::new(Session {
                token: Some(token),
                kind: SessionKind::SessionToken,
                acquired_at: Utc::now(),
            }))
        }
        Err(message) => {
            tracing::error!(error = %message, "Metabase authentication failed");
            Err(GatewayError::Authentication(message))
        }
    }
}
