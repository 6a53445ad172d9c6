use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::core::memory::SqliteStore;
use crate::core::tools::{Normalizer, ParamSpec, ToolDescriptor, ToolError, ToolHandler};

pub const CAMPAIGN_TOOL: &str = "CreateCampaign";

const DEFAULT_CAMPAIGN_DAYS: i64 = 7;
const MAX_CAMPAIGN_DAYS: i64 = 365;

pub fn campaign_descriptor(store: Arc<SqliteStore>) -> ToolDescriptor {
    let normalizer: Normalizer = Arc::new(normalize_campaign);
    ToolDescriptor::new(CAMPAIGN_TOOL, "Publish a campaign other participants can complete for a reward")
        .param(ParamSpec::required("title", "Short campaign title"))
        .param(ParamSpec::required("description", "What participants have to do"))
        .param(ParamSpec::required("reward", "Reward paid for completion, e.g. \"0.5 SOL\""))
        .param(ParamSpec::optional(
            "duration",
            "Days until the campaign closes (default 7)",
        ))
        .example(json!({
            "title": "Meme contest",
            "description": "Post your best meme about us",
            "reward": "0.5 SOL",
            "duration": 3
        }))
        .handler(Arc::new(CreateCampaign::new(store)))
        .normalizer(normalizer)
}

/// Turn a relative `duration` in days into an absolute RFC 3339 `deadline`.
/// An explicit `deadline` is kept after validation; with neither, the
/// campaign runs for the default number of days.
pub fn normalize_campaign(params: &mut Map<String, Value>, now: DateTime<Utc>) -> Result<(), String> {
    if let Some(raw) = params.remove("duration") {
        let days = match &raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|d| d.is_finite() && *d > 0.0 && *d <= MAX_CAMPAIGN_DAYS as f64)
        .ok_or_else(|| format!("duration must be between 0 and {} days, got {}", MAX_CAMPAIGN_DAYS, raw))?;

        let deadline = now + Duration::seconds((days * 86_400.0).round() as i64);
        params.insert("deadline".to_string(), json!(deadline.to_rfc3339()));
        return Ok(());
    }

    match params.get("deadline") {
        Some(Value::String(s)) => {
            DateTime::parse_from_rfc3339(s.trim())
                .map_err(|e| format!("deadline is not an RFC 3339 timestamp: {}", e))?;
            Ok(())
        }
        Some(other) => Err(format!("deadline must be a timestamp string, got {}", other)),
        None => {
            let deadline = now + Duration::days(DEFAULT_CAMPAIGN_DAYS);
            params.insert("deadline".to_string(), json!(deadline.to_rfc3339()));
            Ok(())
        }
    }
}

pub struct CreateCampaign {
    store: Arc<SqliteStore>,
}

impl CreateCampaign {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

fn text_field(params: &Map<String, Value>, name: &str) -> Result<String, ToolError> {
    match params.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ToolError::InvalidParameters(format!("{} is required", name))),
    }
}

#[async_trait]
impl ToolHandler for CreateCampaign {
    async fn call(&self, params: &Map<String, Value>, agent_id: &str) -> Result<Value, ToolError> {
        let title = text_field(params, "title")?;
        let description = text_field(params, "description")?;
        let reward = text_field(params, "reward")?;
        let deadline = params
            .get("deadline")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .ok_or_else(|| ToolError::InvalidParameters("deadline is required".to_string()))?;

        let campaign = self
            .store
            .create_campaign(agent_id, &title, &description, &reward, deadline)
            .await
            .map_err(|e| ToolError::Execution(format!("{:#}", e)))?;

        Ok(json!({
            "campaign_id": campaign.id,
            "title": campaign.title,
            "deadline": campaign.deadline.to_rfc3339(),
        }))
    }
}
