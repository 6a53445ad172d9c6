pub mod builtin;
mod dispatcher;

pub use dispatcher::{ActionDispatcher, DispatchReport};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::core::brain::parser::{ParseFailure, ParsedAction};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("tool {0} is registered without a handler")]
    Misconfigured(String),
    #[error("agent {agent_id} is not entitled to use {tool}")]
    NotEnabled { tool: String, agent_id: String },
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("{0}")]
    Execution(String),
    #[error("{tool} timed out after {after_ms}ms")]
    Timeout { tool: String, after_ms: u64 },
}

/// Executable body of a tool. Must return or fail exactly once per call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, parameters: &Map<String, Value>, agent_id: &str)
    -> Result<Value, ToolError>;
}

/// Rewrites parameters in place before required-field validation.
/// `now` is passed in so deadline-style conversions stay testable.
pub type Normalizer = Arc<dyn Fn(&mut Map<String, Value>, DateTime<Utc>) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
    /// Canonical usage shown to the model, e.g. `{"milliseconds": 3600000}`.
    pub example: Value,
    pub handler: Option<Arc<dyn ToolHandler>>,
    pub normalizer: Option<Normalizer>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("example", &self.example)
            .field("has_handler", &self.handler.is_some())
            .field("has_normalizer", &self.normalizer.is_some())
            .finish()
    }
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            example: Value::Object(Map::new()),
            handler: None,
            normalizer: None,
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn example(mut self, example: Value) -> Self {
        self.example = example;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }
}

/// Name -> descriptor map shared by the prompt builder and the dispatcher.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. A descriptor without handler or normalizer keeps
    /// the ones already registered under that name, so descriptions can be
    /// hot-reloaded without losing behaviour.
    pub fn register(&self, mut descriptor: ToolDescriptor) {
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = tools.get(&descriptor.name) {
            if descriptor.handler.is_none() {
                descriptor.handler = existing.handler.clone();
            }
            if descriptor.normalizer.is_none() {
                descriptor.normalizer = existing.normalizer.clone();
            }
            info!(tool = %descriptor.name, "Re-registered tool");
        } else {
            info!(tool = %descriptor.name, "Registered tool");
        }
        tools.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Descriptors for exactly the given tool names, in the given order.
    /// Unknown names are skipped.
    pub fn descriptors_for(&self, names: &[String]) -> Vec<ToolDescriptor> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        names.iter().filter_map(|n| tools.get(n).cloned()).collect()
    }

    /// Handler lookup happens under the read lock; the call itself runs
    /// without holding it.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ToolHandler>, ToolError> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let descriptor = tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        descriptor
            .handler
            .clone()
            .ok_or_else(|| ToolError::Misconfigured(name.to_string()))
    }

    pub async fn execute(
        &self,
        name: &str,
        parameters: &Map<String, Value>,
        agent_id: &str,
    ) -> Result<Value, ToolError> {
        let handler = self.resolve(name)?;
        handler.call(parameters, agent_id).await
    }

    /// Run the tool's normalizer, then check its required fields. Unknown
    /// tools pass through untouched; dispatch reports them.
    pub fn normalize(
        &self,
        mut action: ParsedAction,
        now: DateTime<Utc>,
    ) -> Result<ParsedAction, ParseFailure> {
        let Some(descriptor) = self.get(&action.tool) else {
            return Ok(action);
        };

        if let Some(normalizer) = &descriptor.normalizer {
            normalizer(&mut action.parameters, now).map_err(|message| {
                ParseFailure::Normalization {
                    tool: action.tool.clone(),
                    message,
                }
            })?;
        }

        let missing: Vec<String> = descriptor
            .required_fields()
            .filter(|field| is_blank(action.parameters.get(*field)))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ParseFailure::MissingFields {
                tool: action.tool,
                fields: missing,
            });
        }

        Ok(action)
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(
            &self,
            parameters: &Map<String, Value>,
            agent_id: &str,
        ) -> Result<Value, ToolError> {
            Ok(json!({"agent": agent_id, "echo": parameters}))
        }
    }

    fn parsed(tool: &str, parameters: Value) -> ParsedAction {
        ParsedAction {
            tool: tool.to_string(),
            parameters: parameters.as_object().cloned().unwrap_or_default(),
            reason: None,
        }
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.execute("Nope", &Map::new(), "a1").await.unwrap_err();
        assert_eq!(err, ToolError::NotFound("Nope".to_string()));
    }

    #[tokio::test]
    async fn execute_without_handler_is_misconfigured() {
        let registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new("Bare", "no body"));
        let err = registry.execute("Bare", &Map::new(), "a1").await.unwrap_err();
        assert_eq!(err, ToolError::Misconfigured("Bare".to_string()));
    }

    #[tokio::test]
    async fn execute_passes_parameters_and_agent() {
        let registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new("Echo", "echoes").handler(Arc::new(Echo)));
        let params = json!({"x": 1}).as_object().cloned().unwrap();
        let out = registry.execute("Echo", &params, "a1").await.unwrap();
        assert_eq!(out, json!({"agent": "a1", "echo": {"x": 1}}));
    }

    #[tokio::test]
    async fn reregistering_keeps_handler_and_updates_description() {
        let registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new("Echo", "old").handler(Arc::new(Echo)));
        registry.register(ToolDescriptor::new("Echo", "new"));

        assert_eq!(registry.get("Echo").unwrap().description, "new");
        assert!(registry.execute("Echo", &Map::new(), "a1").await.is_ok());
        assert_eq!(registry.names(), vec!["Echo".to_string()]);
    }

    #[test]
    fn descriptors_follow_requested_order_and_skip_unknown() {
        let registry = ToolRegistry::new();
        registry.register(ToolDescriptor::new("A", "a"));
        registry.register(ToolDescriptor::new("B", "b"));
        let names = vec!["B".to_string(), "Missing".to_string(), "A".to_string()];
        let got: Vec<String> = registry
            .descriptors_for(&names)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(got, vec!["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn normalize_reports_missing_required_fields() {
        let registry = ToolRegistry::new();
        registry.register(
            ToolDescriptor::new("Post", "posts")
                .param(ParamSpec::required("text", "body"))
                .param(ParamSpec::required("channel", "where"))
                .param(ParamSpec::optional("tag", "label")),
        );
        let err = registry
            .normalize(parsed("Post", json!({"text": "  "})), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            ParseFailure::MissingFields {
                tool: "Post".to_string(),
                fields: vec!["text".to_string(), "channel".to_string()],
            }
        );
    }

    #[test]
    fn normalize_runs_normalizer_with_injected_time() {
        let registry = ToolRegistry::new();
        let normalizer: Normalizer = Arc::new(|params, now| {
            params.insert("stamp".to_string(), json!(now.to_rfc3339()));
            Ok(())
        });
        registry.register(
            ToolDescriptor::new("Stamp", "stamps")
                .param(ParamSpec::required("stamp", "time"))
                .normalizer(normalizer),
        );
        let now = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let action = registry.normalize(parsed("Stamp", json!({})), now).unwrap();
        assert_eq!(
            action.parameters.get("stamp"),
            Some(&json!("2026-03-01T00:00:00+00:00"))
        );
    }

    #[test]
    fn normalize_surfaces_normalizer_errors() {
        let registry = ToolRegistry::new();
        let normalizer: Normalizer = Arc::new(|_, _| Err("bad duration".to_string()));
        registry.register(ToolDescriptor::new("Bad", "fails").normalizer(normalizer));
        let err = registry.normalize(parsed("Bad", json!({})), Utc::now()).unwrap_err();
        assert!(matches!(err, ParseFailure::Normalization { .. }));
    }

    #[test]
    fn normalize_passes_unknown_tools_through() {
        let registry = ToolRegistry::new();
        let action = parsed("Unknown", json!({"a": 1}));
        assert_eq!(registry.normalize(action.clone(), Utc::now()).unwrap(), action);
    }
}
