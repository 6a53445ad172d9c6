use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{SqliteStore, decode_opt_ts, encode_ts};
use crate::core::agent::{Agent, NewAgent};

const AGENT_COLUMNS: &str =
    "id, name, personality, model, frequency_ms, tools, running, wake_at, last_run";

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let frequency: i64 = row.get(4)?;
    let tools_json: String = row.get(5)?;
    let tools: Vec<String> = serde_json::from_str(&tools_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        personality: row.get(2)?,
        model: row.get(3)?,
        frequency_ms: frequency.max(0) as u64,
        tools,
        running: row.get(6)?,
        wake_at: decode_opt_ts(7, row.get(7)?)?,
        last_run: decode_opt_ts(8, row.get(8)?)?,
    })
}

impl SqliteStore {
    pub async fn create_agent(&self, new: NewAgent) -> Result<Agent> {
        anyhow::ensure!(
            new.frequency_ms > 0,
            "agent '{}' must have a positive frequency",
            new.name
        );
        let agent = Agent {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            personality: new.personality,
            model: new.model,
            frequency_ms: new.frequency_ms,
            tools: new.tools,
            running: new.running,
            wake_at: None,
            last_run: None,
        };
        let frequency = i64::try_from(agent.frequency_ms)?;
        let tools = serde_json::to_string(&agent.tools)?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agents (id, name, personality, model, frequency_ms, tools, running, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                agent.id,
                agent.name,
                agent.personality,
                agent.model,
                frequency,
                tools,
                agent.running,
                encode_ts(Utc::now())
            ],
        )?;
        Ok(agent)
    }

    pub async fn find_agent_by_name(&self, name: &str) -> Result<Option<Agent>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM agents WHERE name = ?1 LIMIT 1", AGENT_COLUMNS);
        Ok(db
            .query_row(&sql, params![name], agent_from_row)
            .optional()?)
    }

    pub async fn delete_agent(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows_deleted = db.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
        Ok(rows_deleted > 0)
    }

    pub async fn set_frequency(&self, id: &str, frequency_ms: u64) -> Result<()> {
        anyhow::ensure!(frequency_ms > 0, "frequency must be positive");
        let frequency = i64::try_from(frequency_ms)?;
        let db = self.db.lock().await;
        db.execute(
            "UPDATE agents SET frequency_ms = ?1 WHERE id = ?2",
            params![frequency, id],
        )?;
        Ok(())
    }

    pub(super) async fn find_agent(&self, id: &str) -> Result<Option<Agent>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS);
        Ok(db.query_row(&sql, params![id], agent_from_row).optional()?)
    }

    pub(super) async fn all_agents(&self) -> Result<Vec<Agent>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM agents ORDER BY created_at", AGENT_COLUMNS);
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], agent_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub(super) async fn update_running(&self, id: &str, running: bool) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE agents SET running = ?1 WHERE id = ?2",
            params![running, id],
        )?;
        Ok(())
    }

    pub(super) async fn update_wake_at(&self, id: &str, wake_at: Option<DateTime<Utc>>) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE agents SET wake_at = ?1 WHERE id = ?2",
            params![wake_at.map(encode_ts), id],
        )?;
        Ok(())
    }

    pub(super) async fn update_last_run(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE agents SET last_run = ?1 WHERE id = ?2",
            params![encode_ts(at), id],
        )?;
        Ok(())
    }
}
