use std::fmt;

use thiserror::Error;

/// How the gateway authenticates against the platform. Exactly one variant
/// is active for the lifetime of the process.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    BasicAuth { username: String, password: String },
}

// Secrets stay out of logs and panics.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Credential::BasicAuth { username, .. } => f
                .debug_struct("BasicAuth")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error(
        "Metabase authentication credentials not provided or incomplete: set an API key, or both a username and a password"
    )]
    Missing,
}

/// Raw credential inputs as they arrive from CLI flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct CredentialSource {
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CredentialSource {
    /// A non-blank API key wins; otherwise a complete username/password pair
    /// is required.
    pub fn resolve(&self) -> Result<Credential, CredentialError> {
        if let Some(key) = non_blank(&self.api_key) {
            return Ok(Credential::ApiKey(key.to_string()));
        }
        match (non_blank(&self.username), non_blank(&self.password)) {
            (Some(username), Some(password)) => Ok(Credential::BasicAuth {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Err(CredentialError::Missing),
        }
    }
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::ApiKey(_) => "api_key",
            Credential::BasicAuth { .. } => "session_token",
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
