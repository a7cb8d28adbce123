use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use metabase_core::{ErrorEnvelope, ResultEnvelope};
use serde_json::{Map, Value};

use crate::args::require_present;
use crate::client::MetabaseClient;
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{CapabilityDescriptor, CapabilityRegistry, ToolOutput};

/// Entry point for every capability invocation: resolves the name, checks
/// required arguments, runs the handler and shapes the outcome into a result
/// or error envelope. Authentication happens on the handler's first request,
/// so every argument check a handler makes precedes the identity exchange.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    client: Arc<MetabaseClient>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, client: Arc<MetabaseClient>) -> Self {
        Self { registry, client }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn client(&self) -> &MetabaseClient {
        &self.client
    }

    pub fn list_descriptors(&self) -> &[CapabilityDescriptor] {
        self.registry.list_descriptors()
    }

    pub async fn invoke(&self, name: &str, args: Value) -> Result<ResultEnvelope, ErrorEnvelope> {
        let started = Instant::now();
        match self.try_invoke(name, args).await {
            Ok(output) => {
                tracing::info!(
                    tool = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call succeeded"
                );
                Ok(match output {
                    ToolOutput::Json(value) => ResultEnvelope::json(&value),
                    ToolOutput::Message(text) => ResultEnvelope::text(text),
                })
            }
            Err(err) => {
                let envelope = err.normalize();
                tracing::warn!(
                    tool = name,
                    code = %envelope.code,
                    error = %envelope.message,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call failed"
                );
                Err(envelope)
            }
        }
    }

    async fn try_invoke(&self, name: &str, args: Value) -> GatewayResult<ToolOutput> {
        let args = argument_map(args)?;
        let handler = self.registry.resolve(name)?;
        if let Some(descriptor) = self.registry.descriptor(name) {
            require_present(&args, &descriptor.required_fields())?;
        }

        AssertUnwindSafe(handler(Arc::clone(&self.client), args))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(GatewayError::Internal(panic_message(panic.as_ref()))))
    }
}

fn argument_map(args: Value) -> GatewayResult<Map<String, Value>> {
    match args {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(GatewayError::InvalidArguments {
            field: None,
            message: "Tool arguments must be a JSON object".to_string(),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Tool handler panicked: {detail}")
}
