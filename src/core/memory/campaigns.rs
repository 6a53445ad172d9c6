use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;

use super::types::Campaign;
use super::{SqliteStore, decode_ts, encode_ts};

impl SqliteStore {
    pub async fn create_campaign(
        &self,
        agent_id: &str,
        title: &str,
        description: &str,
        reward: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Campaign> {
        let campaign = Campaign {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            reward: reward.to_string(),
            deadline,
            created_at: Utc::now(),
        };
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO campaigns (id, agent_id, title, description, reward, deadline, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                campaign.id,
                campaign.agent_id,
                campaign.title,
                campaign.description,
                campaign.reward,
                encode_ts(campaign.deadline),
                encode_ts(campaign.created_at)
            ],
        )?;
        Ok(campaign)
    }

    /// Campaigns whose deadline is still ahead of `now`, soonest first.
    pub async fn active_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, agent_id, title, description, reward, deadline, created_at
             FROM campaigns WHERE deadline > ?1 ORDER BY deadline",
        )?;

        let rows = stmt.query_map(params![encode_ts(now)], |row| {
            Ok(Campaign {
                id: row.get(0)?,
                agent_id: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                reward: row.get(4)?,
                deadline: decode_ts(5, row.get(5)?)?,
                created_at: decode_ts(6, row.get(6)?)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
