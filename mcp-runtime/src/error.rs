use metabase_core::{CredentialError, ErrorCode, ErrorEnvelope};
use thiserror::Error;

const REMOTE_BODY_PREVIEW_MAX_CHARS: usize = 500;

/// Every failure the gateway can produce. Raw transport, HTTP and decoding
/// failures are folded into these variants at the point they occur, and
/// `normalize` turns any of them into the caller-facing envelope.
///
/// Variants hold rendered messages rather than source errors so a single
/// authentication outcome can be cloned to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Configuration(String),

    #[error("Failed to authenticate with Metabase: {0}")]
    Authentication(String),

    #[error("{message}")]
    InvalidArguments {
        field: Option<String>,
        message: String,
    },

    #[error("Unknown Metabase tool: {0}")]
    UnknownCapability(String),

    #[error("Failed to reach Metabase: {0}")]
    Transport(String),

    #[error("Metabase rejected the request with status {status}: {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("{0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::InvalidArguments {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::invalid_argument(field, format!("Missing required field '{field}'"))
    }

    /// Non-2xx answer from the platform. The body is kept (truncated) for
    /// diagnostics.
    pub fn rejected(status: u16, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        let mut preview: String = text.chars().take(REMOTE_BODY_PREVIEW_MAX_CHARS).collect();
        if text.chars().count() > REMOTE_BODY_PREVIEW_MAX_CHARS {
            preview.push_str("...");
        }
        GatewayError::RemoteRejected {
            status,
            body: preview,
        }
    }

    /// Connectivity failures and non-2xx answers. Only these let a fallback
    /// chain move on to its next request shape.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_) | GatewayError::RemoteRejected { .. }
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Configuration(_) => ErrorCode::Configuration,
            GatewayError::Authentication(_) => ErrorCode::Authentication,
            GatewayError::InvalidArguments { .. } => ErrorCode::InvalidArguments,
            GatewayError::UnknownCapability(_) => ErrorCode::UnknownCapability,
            GatewayError::Transport(_) => ErrorCode::Transport,
            GatewayError::RemoteRejected { .. } => ErrorCode::RemoteRejected,
            GatewayError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn normalize(&self) -> ErrorEnvelope {
        let envelope = ErrorEnvelope::new(self.code(), self.to_string());
        match self {
            GatewayError::RemoteRejected { status, .. } => envelope.with_status_code(*status),
            GatewayError::InvalidArguments {
                field: Some(field), ..
            } => envelope.with_field(field.clone()),
            _ => envelope,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return GatewayError::Internal(format!("Failed to decode Metabase response: {err}"));
        }
        if let Some(status) = err.status() {
            return GatewayError::RemoteRejected {
                status: status.as_u16(),
                body: String::new(),
            };
        }
        GatewayError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Internal(format!("JSON error: {err}"))
    }
}

impl From<CredentialError> for GatewayError {
    fn from(err: CredentialError) -> Self {
        GatewayError::Configuration(err.to_string())
    }
}
