use anyhow::Result;
use chrono::Utc;
use rusqlite::params;

use super::{SqliteStore, decode_ts, encode_ts};
use crate::core::agent::{AgentThought, ThoughtKind};

impl SqliteStore {
    pub async fn list_thoughts(&self, agent_id: &str) -> Result<Vec<AgentThought>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, agent_id, kind, content, model, created_at
             FROM agent_thoughts WHERE agent_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![agent_id], |row| {
            let kind: String = row.get(2)?;
            Ok(AgentThought {
                id: row.get(0)?,
                agent_id: row.get(1)?,
                kind: ThoughtKind::from_tag(&kind).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        format!("unknown thought kind '{}'", kind).into(),
                    )
                })?,
                content: row.get(3)?,
                model: row.get(4)?,
                created_at: decode_ts(5, row.get(5)?)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub(super) async fn insert_thought(
        &self,
        agent_id: &str,
        kind: ThoughtKind,
        content: &str,
        model: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO agent_thoughts (agent_id, kind, content, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![agent_id, kind.as_str(), content, model, encode_ts(Utc::now())],
        )?;
        Ok(())
    }
}
