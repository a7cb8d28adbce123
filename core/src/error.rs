use serde::{Deserialize, Serialize};

/// Stable error taxonomy returned to tool-calling clients.
/// Every failure a caller can observe is one of these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Startup-fatal: no usable credential, bad base URL, duplicate registration
    #[serde(rename = "ConfigurationError")]
    Configuration,
    /// The identity exchange against the platform failed
    #[serde(rename = "AuthenticationError")]
    Authentication,
    /// Caller input missing or malformed, detected before any network call
    #[serde(rename = "InvalidArgumentsError")]
    InvalidArguments,
    /// Dispatch on a name that is not in the catalog
    #[serde(rename = "UnknownCapabilityError")]
    UnknownCapability,
    /// The platform could not be reached
    #[serde(rename = "TransportError")]
    Transport,
    /// The platform answered with a non-2xx status
    #[serde(rename = "RemoteRejectedError")]
    RemoteRejected,
    /// Anything else
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Configuration => "ConfigurationError",
            ErrorCode::Authentication => "AuthenticationError",
            ErrorCode::InvalidArguments => "InvalidArgumentsError",
            ErrorCode::UnknownCapability => "UnknownCapabilityError",
            ErrorCode::Transport => "TransportError",
            ErrorCode::RemoteRejected => "RemoteRejectedError",
            ErrorCode::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure handed back to the caller in place of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status of a rejected remote call
    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Argument that failed validation (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: None,
            field: None,
        }
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}
