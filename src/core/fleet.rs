//! Wires the store, tools, model and scheduler into one running daemon.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::brain::AgentBrain;
use crate::core::brain::context::{ActiveCampaignsContext, HttpFeedContext, RecentActionsContext};
use crate::core::config::OrchestratorConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::llm::{GenericProvider, ModelClient};
use crate::core::memory::SqliteStore;
use crate::core::scheduler::AgentScheduler;
use crate::core::tools::builtin::{campaign_descriptor, sleep_descriptor, webhook_descriptor};
use crate::core::tools::{ActionDispatcher, ToolRegistry};

pub struct Fleet {
    store: Arc<SqliteStore>,
    registry: Arc<ToolRegistry>,
    scheduler: Arc<AgentScheduler>,
    lifecycle: LifecycleManager,
}

impl Fleet {
    /// Open the configured database and talk to the configured model endpoint.
    pub async fn boot(config: &OrchestratorConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(config.database_path()).await?);
        let model = Arc::new(GenericProvider::new(
            &config.llm.name,
            &config.llm.base_url,
            config.api_key(),
        ));
        Self::assemble(config, store, model).await
    }

    pub async fn assemble(
        config: &OrchestratorConfig,
        store: Arc<SqliteStore>,
        model: Arc<dyn ModelClient>,
    ) -> Result<Self> {
        seed_agents(config, &store).await?;

        let registry = Arc::new(ToolRegistry::new());
        registry.register(sleep_descriptor());
        registry.register(campaign_descriptor(store.clone()));
        for webhook in &config.webhooks {
            registry.register(webhook_descriptor(webhook));
        }
        info!(tools = ?registry.names(), "Tool registry ready");

        let dispatcher = Arc::new(ActionDispatcher::new(
            registry.clone(),
            store.clone(),
            config.cycle.tool_timeout(),
        ));

        let mut brain = AgentBrain::new(
            store.clone(),
            model,
            dispatcher,
            config.cycle.settings(),
        )
        .with_context_provider(Arc::new(RecentActionsContext::new(
            store.clone(),
            config.cycle.recent_actions_limit,
        )))
        .with_context_provider(Arc::new(ActiveCampaignsContext::new(store.clone())));
        for feed in &config.feeds {
            brain = brain.with_context_provider(Arc::new(HttpFeedContext::new(
                &feed.name,
                &feed.url,
                feed.max_lines,
            )));
        }

        let mut lifecycle = LifecycleManager::new().await?;
        let scheduler = AgentScheduler::new(
            lifecycle.scheduler.clone(),
            Arc::new(brain),
            store.clone(),
            config.reconcile_interval(),
        );
        lifecycle.attach(scheduler.clone());

        Ok(Self {
            store,
            registry,
            scheduler,
            lifecycle,
        })
    }

    pub fn store(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.registry.clone()
    }

    pub fn scheduler(&self) -> Arc<AgentScheduler> {
        self.scheduler.clone()
    }

    pub async fn start(&mut self) -> Result<()> {
        self.lifecycle.start().await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.lifecycle.shutdown().await
    }

    /// Start, then block until Ctrl-C or `cancel` fires, then shut down.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.start().await?;
        info!("Fleet running. Press Ctrl-C to stop.");

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupt received");
            }
            _ = cancel.cancelled() => {
                info!("Shutdown requested");
            }
        }

        self.shutdown().await
    }
}

async fn seed_agents(config: &OrchestratorConfig, store: &SqliteStore) -> Result<()> {
    for new in &config.agents {
        if store.find_agent_by_name(&new.name).await?.is_some() {
            continue;
        }
        let agent = store.create_agent(new.clone()).await?;
        info!(agent_id = %agent.id, name = %agent.name, "Seeded agent from config");
    }
    Ok(())
}
