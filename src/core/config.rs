use anyhow::{Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::core::agent::{DEFAULT_SLEEP_MS, NewAgent};
use crate::core::brain::CycleSettings;

pub const CONFIG_FILE: &str = "orchestrator.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub cycle: CycleConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Agents created on boot when no agent with the same name exists.
    #[serde(default)]
    pub agents: Vec<NewAgent>,

    #[serde(default)]
    pub webhooks: Vec<WebhookToolConfig>,

    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub database: Option<PathBuf>,

    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CycleConfig {
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,

    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    #[serde(default = "default_context_timeout_ms")]
    pub context_timeout_ms: u64,

    #[serde(default = "default_sleep_fallback_ms")]
    pub sleep_fallback_ms: u64,

    #[serde(default = "default_recent_actions_limit")]
    pub recent_actions_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_name")]
    pub name: String,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key. Unset means no auth header.
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookToolConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub parameters: Vec<WebhookParam>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookParam {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_feed_max_lines")]
    pub max_lines: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_reconcile_interval_ms() -> u64 {
    10_000
}
fn default_model_timeout_ms() -> u64 {
    120_000
}
fn default_tool_timeout_ms() -> u64 {
    300_000
}
fn default_context_timeout_ms() -> u64 {
    10_000
}
fn default_sleep_fallback_ms() -> u64 {
    DEFAULT_SLEEP_MS
}
fn default_recent_actions_limit() -> usize {
    10
}
fn default_llm_name() -> String {
    "openai".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_feed_max_lines() -> usize {
    20
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database: None,
            log_file: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: default_reconcile_interval_ms(),
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            model_timeout_ms: default_model_timeout_ms(),
            tool_timeout_ms: default_tool_timeout_ms(),
            context_timeout_ms: default_context_timeout_ms(),
            sleep_fallback_ms: default_sleep_fallback_ms(),
            recent_actions_limit: default_recent_actions_limit(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            name: default_llm_name(),
            base_url: default_llm_base_url(),
            api_key_env: default_llm_api_key_env(),
        }
    }
}

impl CycleConfig {
    pub fn settings(&self) -> CycleSettings {
        CycleSettings {
            model_timeout: Duration::from_millis(self.model_timeout_ms),
            context_timeout: Duration::from_millis(self.context_timeout_ms),
            sleep_fallback_ms: self.sleep_fallback_ms,
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

impl OrchestratorConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No {} found at {:?}, using defaults.", CONFIG_FILE, path);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        info!(
            "Loaded config: {} seeded agents, {} webhook tools, {} feeds, reconcile every {}ms",
            config.agents.len(),
            config.webhooks.len(),
            config.feeds.len(),
            config.scheduler.reconcile_interval_ms
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: OrchestratorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("scheduler.reconcile_interval_ms", self.scheduler.reconcile_interval_ms),
            ("cycle.model_timeout_ms", self.cycle.model_timeout_ms),
            ("cycle.tool_timeout_ms", self.cycle.tool_timeout_ms),
            ("cycle.context_timeout_ms", self.cycle.context_timeout_ms),
            ("cycle.sleep_fallback_ms", self.cycle.sleep_fallback_ms),
        ];
        for (key, value) in intervals {
            if value == 0 {
                bail!("{} must be greater than zero", key);
            }
        }
        for agent in &self.agents {
            if agent.frequency_ms == 0 {
                bail!("agent '{}' must have frequency_ms > 0", agent.name);
            }
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.daemon.database.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("agent-orchestrator"))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agents.db")
        })
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.reconcile_interval_ms)
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}
