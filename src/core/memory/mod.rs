mod actions;
mod agents;
mod campaigns;
mod thoughts;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::agent::{ActionKind, ActionStatus, Agent, ThoughtKind};

/// Everything the orchestration core needs from persistence. Every call may
/// race with other agents' calls; implementations must not assume exclusive
/// access.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;
    async fn list_agents(&self) -> Result<Vec<Agent>>;
    async fn set_running(&self, id: &str, running: bool) -> Result<()>;
    async fn set_wake_at(&self, id: &str, wake_at: Option<DateTime<Utc>>) -> Result<()>;
    async fn set_last_run(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn append_thought(
        &self,
        agent_id: &str,
        kind: ThoughtKind,
        content: &str,
        model: &str,
    ) -> Result<()>;
    /// Opens an action row in `started` state and returns its id.
    async fn create_action(
        &self,
        agent_id: &str,
        kind: ActionKind,
        tool_name: &str,
        parameters: &Value,
    ) -> Result<String>;
    /// Closes a `started` row. Fails if the row is missing or already terminal.
    async fn complete_action(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: &Value,
    ) -> Result<()>;
}

pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = Connection::open(path)?;
        info!("Opened agent store at {:?}", path);
        Self::with_connection(db)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                personality TEXT NOT NULL,
                model TEXT NOT NULL,
                frequency_ms INTEGER NOT NULL CHECK (frequency_ms > 0),
                tools TEXT NOT NULL DEFAULT '[]',
                running INTEGER NOT NULL DEFAULT 0,
                wake_at TEXT,
                last_run TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS agent_actions (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                parameters TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS agent_thoughts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                reward TEXT NOT NULL,
                deadline TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_actions_agent_created ON agent_actions(agent_id, created_at)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_thoughts_agent_id ON agent_thoughts(agent_id, id)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_campaigns_deadline ON campaigns(deadline)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        self.find_agent(id).await
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        self.all_agents().await
    }

    async fn set_running(&self, id: &str, running: bool) -> Result<()> {
        self.update_running(id, running).await
    }

    async fn set_wake_at(&self, id: &str, wake_at: Option<DateTime<Utc>>) -> Result<()> {
        self.update_wake_at(id, wake_at).await
    }

    async fn set_last_run(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.update_last_run(id, at).await
    }

    async fn append_thought(
        &self,
        agent_id: &str,
        kind: ThoughtKind,
        content: &str,
        model: &str,
    ) -> Result<()> {
        self.insert_thought(agent_id, kind, content, model).await
    }

    async fn create_action(
        &self,
        agent_id: &str,
        kind: ActionKind,
        tool_name: &str,
        parameters: &Value,
    ) -> Result<String> {
        self.insert_action(agent_id, kind, tool_name, parameters).await
    }

    async fn complete_action(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: &Value,
    ) -> Result<()> {
        self.close_action(action_id, status, result).await
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn encode_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn decode_opt_ts(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| decode_ts(idx, s)).transpose()
}

pub(crate) fn decode_json(idx: usize, raw: String) -> rusqlite::Result<Value> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
