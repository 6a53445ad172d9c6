mod sleep;

pub use sleep::{DEFAULT_SLEEP_MS, MAX_SLEEP_MS, SLEEP_DIRECTIVE, SleepRequest, SleepState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One autonomous worker in the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub personality: String,
    pub model: String,
    /// Interval between wake attempts, in milliseconds.
    pub frequency_ms: u64,
    /// Ordered set of tool names this agent may use.
    pub tools: Vec<String>,
    pub running: bool,
    pub wake_at: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn may_use(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }

    pub fn sleep_state(&self, now: DateTime<Utc>) -> SleepState {
        SleepState::evaluate(self.wake_at, now)
    }
}

/// Fields supplied when an agent is created by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub personality: String,
    pub model: String,
    pub frequency_ms: u64,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ToolExecution,
    Sleep,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::ToolExecution => "tool_execution",
            ActionKind::Sleep => "sleep",
        }
    }

    pub fn from_tag(value: &str) -> Option<Self> {
        match value {
            "tool_execution" => Some(ActionKind::ToolExecution),
            "sleep" => Some(ActionKind::Sleep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Started,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Started => "started",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "started" => Some(ActionStatus::Started),
            "completed" => Some(ActionStatus::Completed),
            "failed" => Some(ActionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }
}

/// Started rows may only close once, to a terminal status.
pub fn can_transition(from: ActionStatus, to: ActionStatus) -> bool {
    from == ActionStatus::Started && to.is_terminal()
}

/// Bookkeeping record of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub id: String,
    pub agent_id: String,
    pub kind: ActionKind,
    pub tool_name: String,
    pub parameters: serde_json::Value,
    pub status: ActionStatus,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtKind {
    Input,
    Output,
    System,
    Error,
}

impl ThoughtKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ThoughtKind::Input => "input",
            ThoughtKind::Output => "output",
            ThoughtKind::System => "system",
            ThoughtKind::Error => "error",
        }
    }

    pub fn from_tag(value: &str) -> Option<Self> {
        match value {
            "input" => Some(ThoughtKind::Input),
            "output" => Some(ThoughtKind::Output),
            "system" => Some(ThoughtKind::System),
            "error" => Some(ThoughtKind::Error),
            _ => None,
        }
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentThought {
    pub id: i64,
    pub agent_id: String,
    pub kind: ThoughtKind,
    pub content: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}
