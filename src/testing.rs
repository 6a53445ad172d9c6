//! Test doubles shared by unit tests across the crate.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::core::agent::{Agent, NewAgent};
use crate::core::brain::Clock;
use crate::core::brain::context::{ContextProvider, ContextSection};
use crate::core::llm::ModelClient;
use crate::core::memory::SqliteStore;
use crate::core::tools::{ToolError, ToolHandler};

pub fn test_agent(tools: &[&str]) -> Agent {
    Agent {
        id: "agent-1".to_string(),
        name: "tester".to_string(),
        personality: "Methodical.".to_string(),
        model: "test-model".to_string(),
        frequency_ms: 60_000,
        tools: tools.iter().map(|t| t.to_string()).collect(),
        running: true,
        wake_at: None,
        last_run: None,
    }
}

pub async fn seed_agent(store: &SqliteStore, tools: &[&str], running: bool) -> Agent {
    store
        .create_agent(NewAgent {
            name: "tester".to_string(),
            personality: "Methodical.".to_string(),
            model: "test-model".to_string(),
            frequency_ms: 60_000,
            tools: tools.iter().map(|t| t.to_string()).collect(),
            running,
        })
        .await
        .expect("seed agent")
}

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// Model double that replays queued replies, then repeats the last one.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Result<String, String>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
    entered: Arc<Notify>,
}

impl ScriptedModel {
    pub fn replying(text: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            last: Mutex::new(Ok(text.to_string())),
            calls: AtomicUsize::new(0),
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        let model = Self::replying("");
        *model.last.lock().unwrap() = Err(message.to_string());
        model
    }

    pub fn then(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    /// Every call parks until `gate` is notified once per call.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Notified each time a call begins.
    pub fn entered(&self) -> Arc<Notify> {
        self.entered.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, _prompt: &str, _model_id: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let reply = {
            let mut queue = self.replies.lock().unwrap();
            match queue.pop_front() {
                Some(reply) => reply,
                None => self.last.lock().unwrap().clone(),
            }
        };
        reply.map_err(|e| anyhow!(e))
    }
}

/// Model double that never answers.
pub struct HangingModel;

#[async_trait]
impl ModelClient for HangingModel {
    async fn complete(&self, _prompt: &str, _model_id: &str) -> Result<String> {
        std::future::pending::<()>().await;
        Ok(String::new())
    }
}

pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Tool handler backed by a plain closure.
pub struct FnTool<F>(F);

impl<F> FnTool<F>
where
    F: Fn(&Map<String, Value>, &str) -> Result<Value, ToolError> + Send + Sync + 'static,
{
    pub fn arc(f: F) -> Arc<dyn ToolHandler> {
        Arc::new(FnTool(f))
    }
}

#[async_trait]
impl<F> ToolHandler for FnTool<F>
where
    F: Fn(&Map<String, Value>, &str) -> Result<Value, ToolError> + Send + Sync + 'static,
{
    async fn call(
        &self,
        parameters: &Map<String, Value>,
        agent_id: &str,
    ) -> Result<Value, ToolError> {
        (self.0)(parameters, agent_id)
    }
}

/// Context provider that only counts how often it was asked.
#[derive(Default)]
pub struct CountingContext {
    calls: AtomicUsize,
}

impl CountingContext {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextProvider for CountingContext {
    fn name(&self) -> &str {
        "counting"
    }

    async fn gather(&self, _agent: &Agent) -> Result<Option<ContextSection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(ContextSection::new("Signals", "all quiet")))
    }
}
