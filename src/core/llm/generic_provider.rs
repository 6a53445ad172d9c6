use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ModelClient;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

/// Any OpenAI-compatible `/chat/completions` endpoint.
pub struct GenericProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl GenericProvider {
    pub fn new(name: &str, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            api_key,
            client: Client::new(),
        }
    }

    fn parse_response(name: &str, parsed: ChatResponse) -> Result<String> {
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("{} returned no completion", name))
    }
}

#[async_trait]
impl ModelClient for GenericProvider {
    async fn complete(&self, prompt: &str, model_id: &str) -> Result<String> {
        let req = ChatRequest {
            model: model_id,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.client.post(&self.base_url).json(&req);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        debug!(provider = %self.name, model = model_id, "Requesting completion");
        let res = request.send().await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "{} API Error ({}): {}",
                self.name,
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: ChatResponse = res.json().await?;
        Self::parse_response(&self.name, parsed)
    }
}
