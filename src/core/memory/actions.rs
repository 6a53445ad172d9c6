use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use super::{SqliteStore, decode_json, decode_opt_ts, decode_ts, encode_ts};
use crate::core::agent::{ActionKind, ActionStatus, AgentAction, can_transition};

const ACTION_COLUMNS: &str =
    "id, agent_id, kind, tool_name, parameters, status, result, created_at, completed_at";

fn action_from_row(row: &Row<'_>) -> rusqlite::Result<AgentAction> {
    let kind: String = row.get(2)?;
    let status: String = row.get(5)?;
    let unknown = |idx: usize, tag: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown tag '{}'", tag).into(),
        )
    };
    Ok(AgentAction {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        kind: ActionKind::from_tag(&kind).ok_or_else(|| unknown(2, kind.clone()))?,
        tool_name: row.get(3)?,
        parameters: decode_json(4, row.get(4)?)?,
        status: ActionStatus::from_status(&status).ok_or_else(|| unknown(5, status.clone()))?,
        result: row
            .get::<_, Option<String>>(6)?
            .map(|raw| decode_json(6, raw))
            .transpose()?,
        created_at: decode_ts(7, row.get(7)?)?,
        completed_at: decode_opt_ts(8, row.get(8)?)?,
    })
}

impl SqliteStore {
    pub async fn get_action(&self, id: &str) -> Result<Option<AgentAction>> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM agent_actions WHERE id = ?1", ACTION_COLUMNS);
        Ok(db.query_row(&sql, params![id], action_from_row).optional()?)
    }

    pub async fn list_actions(&self, agent_id: &str) -> Result<Vec<AgentAction>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM agent_actions WHERE agent_id = ?1 ORDER BY created_at, rowid",
            ACTION_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![agent_id], action_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Newest first.
    pub async fn recent_actions(&self, agent_id: &str, limit: usize) -> Result<Vec<AgentAction>> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM agent_actions WHERE agent_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            ACTION_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![agent_id, limit as i64], action_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub(super) async fn insert_action(
        &self,
        agent_id: &str,
        kind: ActionKind,
        tool_name: &str,
        parameters: &Value,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agent_actions (id, agent_id, kind, tool_name, parameters, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                agent_id,
                kind.as_str(),
                tool_name,
                parameters.to_string(),
                ActionStatus::Started.as_str(),
                encode_ts(Utc::now())
            ],
        )?;
        Ok(id)
    }

    pub(super) async fn close_action(
        &self,
        id: &str,
        status: ActionStatus,
        result: &Value,
    ) -> Result<()> {
        if !can_transition(ActionStatus::Started, status) {
            bail!("{} is not a terminal action status", status.as_str());
        }
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE agent_actions SET status = ?1, result = ?2, completed_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                status.as_str(),
                result.to_string(),
                encode_ts(Utc::now()),
                id,
                ActionStatus::Started.as_str()
            ],
        )?;
        if updated == 0 {
            return Err(anyhow!("action {} is missing or already closed", id));
        }
        Ok(())
    }
}
