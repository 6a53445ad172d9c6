use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bounty/task published by an agent through the `CreateCampaign` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub agent_id: String,
    pub title: String,
    pub description: String,
    pub reward: String,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
