use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{ToolError, ToolRegistry};
use crate::core::agent::{ActionKind, ActionStatus, Agent};
use crate::core::brain::parser::ParsedAction;
use crate::core::memory::AgentStore;

/// What happened to one dispatched action. The matching row is already
/// closed when this is returned.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub action_id: String,
    pub tool: String,
    pub status: ActionStatus,
    pub result: Value,
    pub error: Option<ToolError>,
}

pub struct ActionDispatcher {
    registry: Arc<ToolRegistry>,
    store: Arc<dyn AgentStore>,
    tool_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, store: Arc<dyn AgentStore>, tool_timeout: Duration) -> Self {
        Self {
            registry,
            store,
            tool_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Open a `started` row, run the tool, close the row. Tool failures are
    /// recorded and reported, not returned as `Err`; only store failures are.
    pub async fn dispatch(&self, agent: &Agent, action: &ParsedAction) -> Result<DispatchReport> {
        let parameters = Value::Object(action.parameters.clone());
        let action_id = self
            .store
            .create_action(&agent.id, ActionKind::ToolExecution, &action.tool, &parameters)
            .await
            .context("failed to open action record")?;

        info!(agent_id = %agent.id, tool = %action.tool, action_id = %action_id, "Dispatching action");
        let outcome = self.invoke(agent, action).await;

        let (status, result, error) = match outcome {
            Ok(value) => (ActionStatus::Completed, value, None),
            Err(e) => {
                warn!(agent_id = %agent.id, tool = %action.tool, action_id = %action_id, "Tool failed: {}", e);
                (ActionStatus::Failed, json!({ "error": e.to_string() }), Some(e))
            }
        };

        self.close(&action_id, status, &result).await?;
        info!(agent_id = %agent.id, action_id = %action_id, status = status.as_str(), "Action closed");

        Ok(DispatchReport {
            action_id,
            tool: action.tool.clone(),
            status,
            result,
            error,
        })
    }

    async fn invoke(&self, agent: &Agent, action: &ParsedAction) -> Result<Value, ToolError> {
        if !agent.may_use(&action.tool) {
            return Err(ToolError::NotEnabled {
                tool: action.tool.clone(),
                agent_id: agent.id.clone(),
            });
        }
        let handler = self.registry.resolve(&action.tool)?;

        // Spawned so a panicking handler surfaces as a JoinError instead of
        // unwinding through the cycle.
        let parameters = action.parameters.clone();
        let agent_id = agent.id.clone();
        let mut task = tokio::spawn(async move { handler.call(&parameters, &agent_id).await });

        match tokio::time::timeout(self.tool_timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => Err(ToolError::Execution(format!(
                "handler panicked: {}",
                panic_message(join_err.into_panic())
            ))),
            Ok(Err(join_err)) => Err(ToolError::Execution(join_err.to_string())),
            Err(_) => {
                task.abort();
                Err(ToolError::Timeout {
                    tool: action.tool.clone(),
                    after_ms: self.tool_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn close(&self, action_id: &str, status: ActionStatus, result: &Value) -> Result<()> {
        if let Err(first) = self.store.complete_action(action_id, status, result).await {
            warn!(action_id = %action_id, "Retrying action close after error: {}", first);
            self.store
                .complete_action(action_id, status, result)
                .await
                .with_context(|| format!("failed to close action {}", action_id))?;
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
