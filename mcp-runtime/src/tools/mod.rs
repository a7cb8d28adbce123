//! Declarative tool catalog.
//!
//! Most tools are plain pass-through calls described by a [`Route`]: an HTTP
//! method, a path template whose `{arg}` placeholders are filled from the
//! tool arguments, the arguments forwarded as query parameters, and the shape
//! of the JSON body. Tools with extra behavior (defaults, soft deletes,
//! uploads, fallback chains) register a custom handler instead. The same
//! declarations produce both the advertised descriptors and the dispatch
//! table.

use std::future::Future;
use std::sync::Arc;

use reqwest::Method;
use serde_json::{Map, Value};

use crate::args::{is_present, pick_fields, remaining_fields, scalar_to_string};
use crate::client::{ApiRequest, MetabaseClient, RequestBody};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{
    Capability, CapabilityDescriptor, CapabilityRegistry, ToolGroup, ToolOutput, handler,
};

pub mod card;
pub mod collection;
pub mod dashboard;
pub mod database;
pub mod search;
pub mod table;
pub mod user;

/// The full catalog, grouped by resource.
pub fn catalog() -> GatewayResult<CapabilityRegistry> {
    CapabilityRegistry::compose([
        group(ToolGroup::Dashboard, dashboard::capabilities())?,
        group(ToolGroup::Card, card::capabilities())?,
        group(ToolGroup::Database, database::capabilities())?,
        group(ToolGroup::Table, table::capabilities())?,
        group(ToolGroup::Collection, collection::capabilities())?,
        group(ToolGroup::User, user::capabilities())?,
        group(ToolGroup::Search, search::capabilities())?,
    ])
}

fn group(group: ToolGroup, capabilities: Vec<Capability>) -> GatewayResult<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::for_group(group);
    registry.register_all(capabilities)?;
    Ok(registry)
}

#[derive(Debug, Clone, Copy)]
pub enum Body {
    None,
    /// The listed arguments that are present.
    Fields(&'static [&'static str]),
    /// Every argument not consumed by the path or the query.
    Rest,
    /// Like `Rest`, but at least one field must remain.
    Changes,
}

#[derive(Debug, Clone)]
pub struct Route {
    method: Method,
    path: &'static str,
    query: &'static [&'static str],
    body: Body,
    message: Option<&'static str>,
}

impl Route {
    pub fn new(method: Method, path: &'static str) -> Self {
        Self {
            method,
            path,
            query: &[],
            body: Body::None,
            message: None,
        }
    }

    pub fn get(path: &'static str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &'static str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: &'static str) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: &'static str) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, names: &'static [&'static str]) -> Self {
        self.query = names;
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Answer with this text (placeholders filled from the arguments)
    /// instead of the response payload.
    pub fn message(mut self, template: &'static str) -> Self {
        self.message = Some(template);
        self
    }

    pub fn build(&self, args: &Map<String, Value>) -> GatewayResult<ApiRequest> {
        let path = render_path(self.path, args)?;

        let mut query = Vec::new();
        for name in self.query {
            match args.get(*name) {
                None | Some(Value::Null) => {}
                Some(Value::Array(items)) => {
                    for item in items {
                        query.push((name.to_string(), scalar_to_string(item, name)?));
                    }
                }
                Some(value) => query.push((name.to_string(), scalar_to_string(value, name)?)),
            }
        }

        let body = match self.body {
            Body::None => RequestBody::Empty,
            Body::Fields(fields) => RequestBody::Json(Value::Object(pick_fields(args, fields))),
            Body::Rest | Body::Changes => {
                let mut consumed = placeholders(self.path);
                consumed.extend(self.query.iter().copied());
                let rest = remaining_fields(args, &consumed);
                if matches!(self.body, Body::Changes) && rest.is_empty() {
                    return Err(GatewayError::InvalidArguments {
                        field: None,
                        message: "No fields provided for update".to_string(),
                    });
                }
                RequestBody::Json(Value::Object(rest))
            }
        };

        Ok(ApiRequest::new(self.method.clone(), path)
            .with_query(query)
            .with_body(body))
    }

    pub async fn call(&self, client: &MetabaseClient, args: &Map<String, Value>) -> GatewayResult<ToolOutput> {
        let request = self.build(args)?;
        let payload = client.send(request).await?;
        Ok(match self.message {
            Some(template) => ToolOutput::Message(fill_template(template, args)),
            None => ToolOutput::Json(payload),
        })
    }
}

/// Pass-through capability.
pub fn route(name: &'static str, description: &'static str, schema: Value, route: Route) -> Capability {
    let route = Arc::new(route);
    Capability {
        descriptor: CapabilityDescriptor::new(name, description, schema),
        handler: handler(move |client, args| {
            let route = Arc::clone(&route);
            async move { route.call(&client, &args).await }
        }),
    }
}

/// Capability with its own handler.
pub fn custom<F, Fut>(name: &'static str, description: &'static str, schema: Value, f: F) -> Capability
where
    F: Fn(Arc<MetabaseClient>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GatewayResult<ToolOutput>> + Send + 'static,
{
    Capability {
        descriptor: CapabilityDescriptor::new(name, description, schema),
        handler: handler(f),
    }
}

/// `{ "type": "object", "properties": ..., "required": [...] }`
pub fn object_schema(properties: Value, required: &[&str]) -> Value {
    let mut schema = serde_json::json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = Value::from(required.to_vec());
    }
    schema
}

fn placeholders(template: &'static str) -> Vec<&'static str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        names.push(&rest[start + 1..start + len]);
        rest = &rest[start + len + 1..];
    }
    names
}

/// Fills `{name}` placeholders of a path. Values must be present scalars and
/// may not contain `/`, so each placeholder stays within its segment.
fn render_path(template: &'static str, args: &Map<String, Value>) -> GatewayResult<String> {
    let mut path = template.to_string();
    for name in placeholders(template) {
        if !is_present(args, name) {
            return Err(GatewayError::missing_field(name));
        }
        let value = args
            .get(name)
            .map(|value| scalar_to_string(value, name))
            .transpose()?
            .unwrap_or_default();
        if value.contains('/') {
            return Err(GatewayError::invalid_argument(
                name,
                format!("'{name}' must not contain '/'"),
            ));
        }
        path = path.replace(&format!("{{{name}}}"), value.trim());
    }
    Ok(path)
}

fn fill_template(template: &'static str, args: &Map<String, Value>) -> String {
    placeholders(template)
        .into_iter()
        .fold(template.to_string(), |text, name| {
            let value = args
                .get(name)
                .and_then(|value| scalar_to_string(value, name).ok())
                .unwrap_or_default();
            text.replace(&format!("{{{name}}}"), &value)
        })
}
