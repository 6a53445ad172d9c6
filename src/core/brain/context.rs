use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::core::agent::Agent;
use crate::core::memory::SqliteStore;

/// One titled block of supplementary text placed in the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSection {
    pub title: String,
    pub body: String,
}

impl ContextSection {
    pub fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
        }
    }
}

/// Read-only, optional source of prompt context. `Ok(None)` means there is
/// nothing worth showing this cycle.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn gather(&self, agent: &Agent) -> Result<Option<ContextSection>>;
}

/// Ask every provider in order. Failures and timeouts are logged and
/// dropped; the cycle continues with whatever came back.
pub async fn gather_all(
    providers: &[Arc<dyn ContextProvider>],
    agent: &Agent,
    timeout: Duration,
) -> Vec<ContextSection> {
    let mut sections = Vec::new();
    for provider in providers {
        match tokio::time::timeout(timeout, provider.gather(agent)).await {
            Ok(Ok(Some(section))) => sections.push(section),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(
                agent_id = %agent.id,
                provider = provider.name(),
                "Context unavailable: {}", e
            ),
            Err(_) => warn!(
                agent_id = %agent.id,
                provider = provider.name(),
                "Context provider timed out after {:?}", timeout
            ),
        }
    }
    sections
}

pub struct RecentActionsContext {
    store: Arc<SqliteStore>,
    limit: usize,
}

impl RecentActionsContext {
    pub fn new(store: Arc<SqliteStore>, limit: usize) -> Self {
        Self { store, limit }
    }
}

#[async_trait]
impl ContextProvider for RecentActionsContext {
    fn name(&self) -> &str {
        "recent_actions"
    }

    async fn gather(&self, agent: &Agent) -> Result<Option<ContextSection>> {
        let actions = self.store.recent_actions(&agent.id, self.limit).await?;
        if actions.is_empty() {
            return Ok(None);
        }
        let body = actions
            .iter()
            .map(|a| {
                format!(
                    "- {} {} ({}) {}",
                    a.created_at.format("%Y-%m-%d %H:%M"),
                    a.tool_name,
                    a.status.as_str(),
                    a.parameters
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(ContextSection::new("Your recent actions", &body)))
    }
}

pub struct ActiveCampaignsContext {
    store: Arc<SqliteStore>,
}

impl ActiveCampaignsContext {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ContextProvider for ActiveCampaignsContext {
    fn name(&self) -> &str {
        "active_campaigns"
    }

    async fn gather(&self, _agent: &Agent) -> Result<Option<ContextSection>> {
        let campaigns = self.store.active_campaigns(Utc::now()).await?;
        if campaigns.is_empty() {
            return Ok(None);
        }
        let body = campaigns
            .iter()
            .map(|c| {
                format!(
                    "- {} (reward {}, due {}): {}",
                    c.title,
                    c.reward,
                    c.deadline.format("%Y-%m-%d"),
                    c.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(ContextSection::new("Active campaigns", &body)))
    }
}

const MAX_FEED_BYTES: usize = 64 * 1024;

/// Non-blank lines of a feed body. A body cut at the byte cap loses its last,
/// possibly partial, line.
fn first_lines(raw: &[u8], truncated: bool, max_lines: usize) -> String {
    let raw = match raw.iter().rposition(|b| *b == b'\n') {
        Some(end) if truncated => &raw[..end],
        _ => raw,
    };
    String::from_utf8_lossy(raw)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain-text HTTP source, e.g. a news or price feed.
pub struct HttpFeedContext {
    name: String,
    url: String,
    max_lines: usize,
    client: Client,
}

impl HttpFeedContext {
    pub fn new(name: &str, url: &str, max_lines: usize) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            max_lines,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ContextProvider for HttpFeedContext {
    fn name(&self) -> &str {
        &self.name
    }

    async fn gather(&self, _agent: &Agent) -> Result<Option<ContextSection>> {
        let mut res = self.client.get(&self.url).send().await?;
        if !res.status().is_success() {
            return Err(anyhow!("{} returned {}", self.url, res.status()));
        }
        let mut raw = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = res.chunk().await? {
            let room = MAX_FEED_BYTES - raw.len();
            if chunk.len() >= room {
                raw.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            raw.extend_from_slice(&chunk);
        }
        let body = first_lines(&raw, truncated, self.max_lines);
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(ContextSection::new(&self.name, &body)))
    }
}
