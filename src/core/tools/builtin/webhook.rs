use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::debug;

use crate::core::config::WebhookToolConfig;
use crate::core::tools::{ParamSpec, ToolDescriptor, ToolError, ToolHandler};

const MAX_BODY_CHARS: usize = 2_000;

/// Build a tool that POSTs the agent's parameters to a configured URL. This is
/// how posting-style tools (social feeds, chat channels) are wired in.
pub fn webhook_descriptor(config: &WebhookToolConfig) -> ToolDescriptor {
    let mut descriptor = ToolDescriptor::new(&config.name, &config.description);
    let mut example = Map::new();
    for param in &config.parameters {
        descriptor = descriptor.param(if param.required {
            ParamSpec::required(&param.name, &param.description)
        } else {
            ParamSpec::optional(&param.name, &param.description)
        });
        if param.required {
            example.insert(param.name.clone(), json!(format!("<{}>", param.name)));
        }
    }
    descriptor
        .example(Value::Object(example))
        .handler(Arc::new(WebhookTool::new(config)))
}

pub struct WebhookTool {
    name: String,
    url: String,
    bearer_token: Option<String>,
    client: Client,
}

impl WebhookTool {
    pub fn new(config: &WebhookToolConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            bearer_token: config
                .token_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok()),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ToolHandler for WebhookTool {
    async fn call(&self, params: &Map<String, Value>, agent_id: &str) -> Result<Value, ToolError> {
        let mut payload = params.clone();
        payload.insert("agent_id".to_string(), json!(agent_id));
        payload.insert("tool".to_string(), json!(self.name));

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        debug!(tool = %self.name, url = %self.url, "Posting webhook");
        let res = request
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("{} request failed: {}", self.name, e)))?;
        let status = res.status();
        let body = res.text().await.map_err(|e| {
            ToolError::Execution(format!(
                "{} returned {} but the body could not be read: {}",
                self.name, status, e
            ))
        })?;
        let body: String = body.chars().take(MAX_BODY_CHARS).collect();

        if !status.is_success() {
            return Err(ToolError::Execution(format!(
                "{} returned {}: {}",
                self.name, status, body
            )));
        }
        Ok(json!({ "status": status.as_u16(), "body": body }))
    }
}
