//! One think-act cycle for a single agent.
//!
//! A cycle loads the agent, honours its sleep state, gathers context, asks the
//! model what to do, parses the answer and either applies the sleep directive
//! or dispatches a tool. Whatever happens inside, the cycle returns a
//! [`CycleOutcome`] instead of an error so a bad cycle never reaches the
//! scheduler.

pub mod context;
pub mod parser;
pub mod prompt;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use self::context::{ContextProvider, gather_all};
use self::parser::{ParseFailure, ParseOutcome, ParsedAction};
use crate::core::agent::{
    ActionKind, ActionStatus, Agent, SLEEP_DIRECTIVE, SleepRequest, SleepState, ThoughtKind,
};
use crate::core::llm::ModelClient;
use crate::core::memory::AgentStore;
use crate::core::tools::ActionDispatcher;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub model_timeout: Duration,
    pub context_timeout: Duration,
    pub sleep_fallback_ms: u64,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(120),
            context_timeout: Duration::from_secs(10),
            sleep_fallback_ms: crate::core::agent::DEFAULT_SLEEP_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    NotRunning,
    Sleeping { until: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Returned before any work; last-run is left alone.
    Skipped(SkipReason),
    NoAction,
    ParseFailed,
    Slept {
        wake_at: DateTime<Utc>,
    },
    Dispatched {
        action_id: String,
        tool: String,
        status: ActionStatus,
    },
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("model call failed: {0}")]
    ModelCall(String),
    #[error("model call timed out after {0:?}")]
    ModelTimeout(Duration),
    #[error("store error: {0}")]
    Store(String),
}

impl CycleError {
    fn store(e: anyhow::Error) -> Self {
        CycleError::Store(format!("{:#}", e))
    }
}

pub struct AgentBrain {
    store: Arc<dyn AgentStore>,
    model: Arc<dyn ModelClient>,
    dispatcher: Arc<ActionDispatcher>,
    providers: Vec<Arc<dyn ContextProvider>>,
    clock: Arc<dyn Clock>,
    settings: CycleSettings,
}

impl AgentBrain {
    pub fn new(
        store: Arc<dyn AgentStore>,
        model: Arc<dyn ModelClient>,
        dispatcher: Arc<ActionDispatcher>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            store,
            model,
            dispatcher,
            providers: Vec::new(),
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run_cycle(&self, agent_id: &str) -> CycleOutcome {
        let agent = match self.store.get_agent(agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                debug!(agent_id = %agent_id, "Cycle skipped: agent not found");
                return CycleOutcome::Skipped(SkipReason::NotFound);
            }
            Err(e) => {
                error!(agent_id = %agent_id, "Cycle aborted: could not load agent: {:#}", e);
                return CycleOutcome::Failed(format!("could not load agent: {:#}", e));
            }
        };

        if !agent.running {
            debug!(agent_id = %agent.id, "Cycle skipped: agent not running");
            return CycleOutcome::Skipped(SkipReason::NotRunning);
        }

        let wake_due = match agent.sleep_state(self.clock.now()) {
            SleepState::Sleeping { until } => {
                debug!(agent_id = %agent.id, wake_at = %until, "Cycle skipped: sleeping");
                return CycleOutcome::Skipped(SkipReason::Sleeping { until });
            }
            SleepState::WakeDue { .. } => true,
            SleepState::Active => false,
        };

        info!(agent_id = %agent.id, name = %agent.name, "Cycle started");
        let outcome = match self.think_and_act(&agent, wake_due).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(agent_id = %agent.id, "Cycle failed: {}", e);
                self.note(&agent, ThoughtKind::Error, &format!("Cycle failed: {}", e))
                    .await;
                CycleOutcome::Failed(e.to_string())
            }
        };

        if let Err(e) = self.store.set_last_run(&agent.id, self.clock.now()).await {
            warn!(agent_id = %agent.id, "Failed to update last run: {:#}", e);
        }
        outcome
    }

    async fn think_and_act(&self, agent: &Agent, wake_due: bool) -> Result<CycleOutcome, CycleError> {
        if wake_due {
            self.store
                .set_wake_at(&agent.id, None)
                .await
                .map_err(CycleError::store)?;
            info!(agent_id = %agent.id, "Agent woke up");
        }

        let context = gather_all(&self.providers, agent, self.settings.context_timeout).await;
        let tools = self.dispatcher.registry().descriptors_for(&agent.tools);
        let prompt = prompt::build_prompt(agent, &context, self.clock.now(), &tools);

        self.store
            .append_thought(&agent.id, ThoughtKind::Input, &prompt, &agent.model)
            .await
            .map_err(CycleError::store)?;

        let raw = match tokio::time::timeout(
            self.settings.model_timeout,
            self.model.complete(&prompt, &agent.model),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(CycleError::ModelCall(format!("{:#}", e))),
            Err(_) => return Err(CycleError::ModelTimeout(self.settings.model_timeout)),
        };

        self.store
            .append_thought(&agent.id, ThoughtKind::Output, &raw, &agent.model)
            .await
            .map_err(CycleError::store)?;

        let action = match parser::parse(&raw) {
            Ok(ParseOutcome::Action(action)) => action,
            Ok(ParseOutcome::NoAction { reason }) => {
                info!(agent_id = %agent.id, reason = ?reason, "No action requested");
                return Ok(CycleOutcome::NoAction);
            }
            Err(failure) => return self.reject(agent, failure).await,
        };

        if action.tool == SLEEP_DIRECTIVE {
            return self.apply_sleep(agent, &action).await;
        }

        let action = match self
            .dispatcher
            .registry()
            .normalize(action, self.clock.now())
        {
            Ok(action) => action,
            Err(failure) => return self.reject(agent, failure).await,
        };

        let report = self
            .dispatcher
            .dispatch(agent, &action)
            .await
            .map_err(CycleError::store)?;

        let summary = match &report.error {
            None => format!("Executed {}: {}", report.tool, report.status.as_str()),
            Some(e) => format!("Executed {}: {} ({})", report.tool, report.status.as_str(), e),
        };
        self.note(agent, ThoughtKind::System, &summary).await;

        Ok(CycleOutcome::Dispatched {
            action_id: report.action_id,
            tool: report.tool,
            status: report.status,
        })
    }

    /// Persist the wake time and close a `sleep` bookkeeping row. Nothing
    /// else is dispatched this cycle.
    async fn apply_sleep(
        &self,
        agent: &Agent,
        action: &ParsedAction,
    ) -> Result<CycleOutcome, CycleError> {
        let request = SleepRequest::from_parameters(&action.parameters, self.settings.sleep_fallback_ms);
        if request.defaulted {
            warn!(
                agent_id = %agent.id,
                "Invalid sleep duration, falling back to {}ms", request.duration_ms
            );
        }
        let wake_at = request.wake_at(self.clock.now());

        self.store
            .set_wake_at(&agent.id, Some(wake_at))
            .await
            .map_err(CycleError::store)?;

        let action_id = self
            .store
            .create_action(
                &agent.id,
                ActionKind::Sleep,
                SLEEP_DIRECTIVE,
                &Value::Object(action.parameters.clone()),
            )
            .await
            .map_err(CycleError::store)?;
        let record = json!({
            "milliseconds": request.duration_ms,
            "defaulted": request.defaulted,
            "wake_at": wake_at.to_rfc3339(),
            "reason": action.reason,
        });
        self.store
            .complete_action(&action_id, ActionStatus::Completed, &record)
            .await
            .map_err(CycleError::store)?;

        info!(agent_id = %agent.id, wake_at = %wake_at, "Agent is sleeping");
        self.note(
            agent,
            ThoughtKind::System,
            &format!(
                "Sleeping for {}ms, next wake at {}",
                request.duration_ms,
                wake_at.to_rfc3339()
            ),
        )
        .await;

        Ok(CycleOutcome::Slept { wake_at })
    }

    async fn reject(
        &self,
        agent: &Agent,
        failure: ParseFailure,
    ) -> Result<CycleOutcome, CycleError> {
        warn!(agent_id = %agent.id, "Discarding model response: {}", failure);
        self.store
            .append_thought(
                &agent.id,
                ThoughtKind::Error,
                &format!("Could not parse model response: {}", failure),
                &agent.model,
            )
            .await
            .map_err(CycleError::store)?;
        Ok(CycleOutcome::ParseFailed)
    }

    /// Best-effort audit note; a failed write is only logged.
    async fn note(&self, agent: &Agent, kind: ThoughtKind, content: &str) {
        if let Err(e) = self
            .store
            .append_thought(&agent.id, kind, content, &agent.model)
            .await
        {
            warn!(agent_id = %agent.id, "Failed to record {} thought: {:#}", kind.as_str(), e);
        }
    }
}
