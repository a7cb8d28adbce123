use std::fmt;
use std::future::Future;
use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};

/// Computes the body to write from the freshly read source document.
pub type Rewrite = Arc<dyn Fn(&Value) -> GatewayResult<Value> + Send + Sync>;

pub enum AttemptPayload {
    Empty,
    Json(Value),
    /// GET `source`, feed it through `rewrite`, send the result. Not atomic
    /// with respect to concurrent edits of the same source.
    ReadModifyWrite { source: String, rewrite: Rewrite },
}

impl fmt::Debug for AttemptPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptPayload::Empty => f.write_str("Empty"),
            AttemptPayload::Json(body) => f.debug_tuple("Json").field(body).finish(),
            AttemptPayload::ReadModifyWrite { source, .. } => f
                .debug_struct("ReadModifyWrite")
                .field("source", source)
                .finish_non_exhaustive(),
        }
    }
}

/// One request shape for an endpoint whose contract differs between
/// platform versions.
#[derive(Debug)]
pub struct FallbackAttempt {
    pub label: &'static str,
    pub method: Method,
    pub path: String,
    pub payload: AttemptPayload,
}

impl FallbackAttempt {
    pub fn new(label: &'static str, method: Method, path: impl Into<String>) -> Self {
        Self {
            label,
            method,
            path: path.into(),
            payload: AttemptPayload::Empty,
        }
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.payload = AttemptPayload::Json(body);
        self
    }

    pub fn read_modify_write<F>(mut self, source: impl Into<String>, rewrite: F) -> Self
    where
        F: Fn(&Value) -> GatewayResult<Value> + Send + Sync + 'static,
    {
        self.payload = AttemptPayload::ReadModifyWrite {
            source: source.into(),
            rewrite: Arc::new(rewrite),
        };
        self
    }
}

/// Ordered, non-empty list of attempts, preferred shape first.
#[derive(Debug)]
pub struct FallbackChain {
    operation: &'static str,
    attempts: Vec<FallbackAttempt>,
}

impl FallbackChain {
    pub fn new(operation: &'static str, attempts: Vec<FallbackAttempt>) -> GatewayResult<Self> {
        if attempts.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "Fallback chain for '{operation}' has no attempts"
            )));
        }
        Ok(Self {
            operation,
            attempts,
        })
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn attempts(&self) -> &[FallbackAttempt] {
        &self.attempts
    }

    /// Runs attempts in order until one succeeds. Transport and HTTP failures
    /// move on to the next attempt; any other error ends the chain at once.
    /// When every attempt fails the last attempt's error is returned.
    /// Nothing is rolled back between attempts.
    pub async fn execute_with<'a, F, Fut>(&'a self, mut execute: F) -> GatewayResult<Value>
    where
        F: FnMut(&'a FallbackAttempt) -> Fut,
        Fut: Future<Output = GatewayResult<Value>>,
    {
        let mut last_error = None;
        for (index, attempt) in self.attempts.iter().enumerate() {
            match execute(attempt).await {
                Ok(value) => {
                    if index > 0 {
                        tracing::info!(
                            operation = self.operation,
                            attempt = attempt.label,
                            position = index + 1,
                            "Fallback attempt succeeded"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_remote_failure() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        operation = self.operation,
                        attempt = attempt.label,
                        position = index + 1,
                        total = self.attempts.len(),
                        error = %err,
                        "Fallback attempt failed"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            GatewayError::Internal(format!("Fallback chain '{}' ran no attempts", self.operation))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn chain(labels: &[&'static str]) -> FallbackChain {
        FallbackChain::new(
            "test_op",
            labels
                .iter()
                .map(|&label| FallbackAttempt::new(label, Method::POST, format!("/api/{label}")))
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn first_success_wins_after_earlier_failures_in_order() {
        let chain = chain(&["x", "y", "z"]);
        let calls = Mutex::new(Vec::new());

        let result = chain
            .execute_with(|attempt| {
                calls.lock().unwrap().push(attempt.label);
                async move {
                    match attempt.label {
                        "z" => Ok(json!({ "from": "z" })),
                        other => Err(GatewayError::rejected(404, other.as_bytes())),
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, json!({ "from": "z" }));
        assert_eq!(*calls.lock().unwrap(), vec!["x", "y", "z"]);
    }

    #[tokio::test]
    async fn exhausted_chain_surfaces_last_error() {
        let chain = chain(&["x", "y"]);
        let calls = Mutex::new(Vec::new());

        let err = chain
            .execute_with(|attempt| {
                calls.lock().unwrap().push(attempt.label);
                async move {
                    match attempt.label {
                        "x" => Err(GatewayError::Transport("x down".to_string())),
                        _ => Err(GatewayError::rejected(405, b"y refused")),
                    }
                }
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::RemoteRejected {
                status: 405,
                body: "y refused".to_string()
            }
        );
        assert_eq!(*calls.lock().unwrap(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn success_on_first_attempt_skips_the_rest() {
        let chain = chain(&["x", "y"]);
        let mut calls = 0;
        let result = chain
            .execute_with(|_| {
                calls += 1;
                async { Ok(json!(1)) }
            })
            .await
            .unwrap();
        assert_eq!(result, json!(1));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn non_remote_error_stops_the_chain() {
        let chain = chain(&["x", "y"]);
        let calls = Mutex::new(Vec::new());

        let err = chain
            .execute_with(|attempt| {
                calls.lock().unwrap().push(attempt.label);
                async move {
                    match attempt.label {
                        "x" => Err(GatewayError::invalid_argument("dashcard_id", "no such dashcard")),
                        _ => Ok(json!({ "from": "y" })),
                    }
                }
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::invalid_argument("dashcard_id", "no such dashcard")
        );
        assert_eq!(*calls.lock().unwrap(), vec!["x"]);
    }

    #[test]
    fn empty_chain_is_a_configuration_error() {
        let err = FallbackChain::new("nothing", Vec::new()).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn read_modify_write_attempt_keeps_source_and_rewrite() {
        let attempt = FallbackAttempt::new("rmw", Method::PUT, "/api/dashboard/1/cards")
            .read_modify_write("/api/dashboard/1", |current| Ok(json!({ "cards": current["cards"] })));
        let AttemptPayload::ReadModifyWrite { source, rewrite } = &attempt.payload else {
            panic!("expected read-modify-write payload");
        };
        assert_eq!(source, "/api/dashboard/1");
        assert_eq!(
            rewrite(&json!({ "cards": [1] })).unwrap(),
            json!({ "cards": [1] })
        );
    }
}
