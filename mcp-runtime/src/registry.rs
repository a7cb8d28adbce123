use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::client::MetabaseClient;
use crate::error::{GatewayError, GatewayResult};

/// What a handler produced. Structured results are rendered as indented
/// JSON; messages are passed through verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Json(Value),
    Message(String),
}

pub type HandlerFuture = BoxFuture<'static, GatewayResult<ToolOutput>>;
pub type Handler =
    Arc<dyn Fn(Arc<MetabaseClient>, Map<String, Value>) -> HandlerFuture + Send + Sync>;

pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<MetabaseClient>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GatewayResult<ToolOutput>> + Send + 'static,
{
    Arc::new(move |client, args| f(client, args).boxed())
}

/// Organizational grouping of the catalog. Has no effect on dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolGroup {
    Dashboard,
    Card,
    Database,
    Table,
    Collection,
    User,
    Search,
}

impl ToolGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolGroup::Dashboard => "dashboard",
            ToolGroup::Card => "card",
            ToolGroup::Database => "database",
            ToolGroup::Table => "table",
            ToolGroup::Collection => "collection",
            ToolGroup::User => "user",
            ToolGroup::Search => "search",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Names listed in the schema's `required` array.
    pub fn required_fields(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// A descriptor together with its handler; the unit the tool modules declare.
pub struct Capability {
    pub descriptor: CapabilityDescriptor,
    pub handler: Handler,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.descriptor.name)
            .finish_non_exhaustive()
    }
}

struct Entry {
    /// Position in `descriptors`.
    index: usize,
    group: Option<ToolGroup>,
    handler: Handler,
}

/// Catalog of named capabilities. Registration order is the advertised
/// order; each name maps to exactly one handler. Immutable once built.
#[derive(Default)]
pub struct CapabilityRegistry {
    group: Option<ToolGroup>,
    descriptors: Vec<CapabilityDescriptor>,
    entries: HashMap<String, Entry>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("group", &self.group)
            .field("len", &self.descriptors.len())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sub-registry whose entries are tagged with `group`.
    pub fn for_group(group: ToolGroup) -> Self {
        Self {
            group: Some(group),
            ..Self::default()
        }
    }

    /// Fails on a duplicate name; nothing is ever overwritten.
    pub fn register(&mut self, descriptor: CapabilityDescriptor, handler: Handler) -> GatewayResult<()> {
        self.insert(descriptor, self.group, handler)
    }

    pub fn register_all(&mut self, capabilities: Vec<Capability>) -> GatewayResult<()> {
        for capability in capabilities {
            self.register(capability.descriptor, capability.handler)?;
        }
        Ok(())
    }

    /// Appends every entry of `other`, keeping its order and groups. A name
    /// already present in `self` is a configuration error.
    pub fn merge(&mut self, mut other: CapabilityRegistry) -> GatewayResult<()> {
        for descriptor in std::mem::take(&mut other.descriptors) {
            let Some(entry) = other.entries.remove(&descriptor.name) else {
                continue;
            };
            self.insert(descriptor, entry.group, entry.handler)?;
        }
        Ok(())
    }

    pub fn compose(parts: impl IntoIterator<Item = CapabilityRegistry>) -> GatewayResult<Self> {
        let mut registry = Self::new();
        for part in parts {
            registry.merge(part)?;
        }
        Ok(registry)
    }

    pub fn list_descriptors(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }

    pub fn descriptor(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.entries
            .get(name)
            .and_then(|entry| self.descriptors.get(entry.index))
    }

    pub fn resolve(&self, name: &str) -> GatewayResult<Handler> {
        self.entries
            .get(name)
            .map(|entry| Arc::clone(&entry.handler))
            .ok_or_else(|| GatewayError::UnknownCapability(name.to_string()))
    }

    pub fn group_of(&self, name: &str) -> Option<ToolGroup> {
        self.entries.get(name).and_then(|entry| entry.group)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn insert(
        &mut self,
        descriptor: CapabilityDescriptor,
        group: Option<ToolGroup>,
        handler: Handler,
    ) -> GatewayResult<()> {
        if let Some(existing) = self.entries.get(&descriptor.name) {
            return Err(GatewayError::Configuration(format!(
                "Tool '{}' registered twice ({} and {})",
                descriptor.name,
                group_label(existing.group),
                group_label(group)
            )));
        }
        let index = self.descriptors.len();
        self.entries.insert(
            descriptor.name.clone(),
            Entry {
                index,
                group,
                handler,
            },
        );
        self.descriptors.push(descriptor);
        Ok(())
    }
}

fn group_label(group: Option<ToolGroup>) -> &'static str {
    group.map(ToolGroup::as_str).unwrap_or("ungrouped")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> Handler {
        handler(|_, _| async { Ok(ToolOutput::Json(json!({ "ok": true }))) })
    }

    fn descriptor(name: &str) -> CapabilityDescriptor {
        CapabilityDescriptor::new(name, format!("{name} tool"), json!({ "type": "object" }))
    }

    #[test]
    fn resolve_succeeds_only_for_registered_names() {
        let mut registry = CapabilityRegistry::new();
        registry.register(descriptor("ping"), noop()).unwrap();

        assert!(registry.resolve("ping").is_ok());
        assert_eq!(
            registry.resolve("pong").err(),
            Some(GatewayError::UnknownCapability("pong".to_string()))
        );
    }

    #[test]
    fn duplicate_registration_is_rejected_without_overwrite() {
        let mut registry = CapabilityRegistry::new();
        registry.register(descriptor("ping"), noop()).unwrap();
        let err = registry
            .register(CapabilityDescriptor::new("ping", "other", json!({})), noop())
            .unwrap_err();

        assert!(matches!(err, GatewayError::Configuration(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_descriptors()[0].description, "ping tool");
    }

    #[test]
    fn composition_keeps_registration_order_and_groups() {
        let mut dashboards = CapabilityRegistry::for_group(ToolGroup::Dashboard);
        dashboards.register(descriptor("list_dashboards"), noop()).unwrap();
        dashboards.register(descriptor("get_dashboard"), noop()).unwrap();
        let mut cards = CapabilityRegistry::for_group(ToolGroup::Card);
        cards.register(descriptor("list_cards"), noop()).unwrap();

        let registry = CapabilityRegistry::compose([dashboards, cards]).unwrap();
        let names: Vec<_> = registry
            .list_descriptors()
            .iter()
            .map(|d| d.name.as_str())
            .collect();

        assert_eq!(names, vec!["list_dashboards", "get_dashboard", "list_cards"]);
        assert_eq!(registry.group_of("list_cards"), Some(ToolGroup::Card));
        assert_eq!(registry.group_of("get_dashboard"), Some(ToolGroup::Dashboard));
        assert_eq!(
            registry.descriptor("list_cards").map(|d| d.description.as_str()),
            Some("list_cards tool")
        );
        assert!(registry.descriptor("missing").is_none());
    }

    #[test]
    fn overlapping_groups_are_a_configuration_error() {
        let mut dashboards = CapabilityRegistry::for_group(ToolGroup::Dashboard);
        dashboards.register(descriptor("shared_name"), noop()).unwrap();
        let mut cards = CapabilityRegistry::for_group(ToolGroup::Card);
        cards.register(descriptor("shared_name"), noop()).unwrap();

        let err = CapabilityRegistry::compose([dashboards, cards]).unwrap_err();
        let GatewayError::Configuration(message) = err else {
            panic!("expected configuration error");
        };
        assert!(message.contains("dashboard"));
        assert!(message.contains("card"));
    }

    #[test]
    fn required_fields_come_from_schema() {
        let descriptor = CapabilityDescriptor::new(
            "t",
            "",
            json!({ "type": "object", "required": ["a", "b"] }),
        );
        assert_eq!(descriptor.required_fields(), vec!["a", "b"]);
        assert!(CapabilityDescriptor::new("u", "", json!({})).required_fields().is_empty());
    }
}
