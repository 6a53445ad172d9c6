#![allow(dead_code)]

use axum::http::StatusCode;
use axum::{Json, Router, extract::State, routing::post};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use agent_orchestrator::core::config::OrchestratorConfig;

pub type TestResult<T> = anyhow::Result<T>;

struct Served {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Served {
    async fn start(app: Router) -> TestResult<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });
        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct MockChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct MockOpenAiRequest {
    messages: Vec<MockChatMessage>,
}

#[derive(Clone)]
struct MockLlmState {
    replies: Arc<Mutex<VecDeque<String>>>,
    fallback: Arc<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

async fn mock_chat_completion(
    State(state): State<MockLlmState>,
    Json(payload): Json<MockOpenAiRequest>,
) -> Json<Value> {
    let prompt = payload
        .messages
        .into_iter()
        .map(|m| m.content)
        .collect::<Vec<_>>()
        .join("\n");
    state
        .prompts
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(prompt);

    let content = state
        .replies
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .pop_front()
        .unwrap_or_else(|| state.fallback.to_string());

    Json(json!({
        "choices": [{
            "message": { "role": "assistant", "content": content }
        }]
    }))
}

/// OpenAI-compatible endpoint that replays queued replies, then repeats the
/// fallback forever.
pub struct MockLlmServer {
    served: Served,
    state: MockLlmState,
}

impl MockLlmServer {
    pub async fn start(fallback: &str) -> TestResult<Self> {
        let state = MockLlmState {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(fallback.to_string()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(mock_chat_completion))
            .with_state(state.clone());
        Ok(Self {
            served: Served::start(app).await?,
            state,
        })
    }

    pub fn queue(&self, reply: &str) {
        self.state
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply.to_string());
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/v1/chat/completions", self.served.port)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state
            .prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn shutdown(mut self) {
        self.served.shutdown().await;
    }
}

#[derive(Clone)]
struct SinkState {
    status: StatusCode,
    received: Arc<Mutex<Vec<Value>>>,
}

async fn sink_receive(State(state): State<SinkState>, Json(body): Json<Value>) -> (StatusCode, String) {
    state
        .received
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(body);
    let text = if state.status.is_success() {
        "accepted".to_string()
    } else {
        "feed is down".to_string()
    };
    (state.status, text)
}

/// Records every webhook body and answers with a fixed status.
pub struct WebhookSink {
    served: Served,
    state: SinkState,
}

impl WebhookSink {
    pub async fn start(status: StatusCode) -> TestResult<Self> {
        let state = SinkState {
            status,
            received: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/hook", post(sink_receive))
            .with_state(state.clone());
        Ok(Self {
            served: Served::start(app).await?,
            state,
        })
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/hook", self.served.port)
    }

    pub fn received(&self) -> Vec<Value> {
        self.state
            .received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub async fn shutdown(mut self) {
        self.served.shutdown().await;
    }
}

/// One running agent named `scout` on an hourly timer, talking to `llm` and
/// allowed to use `tools`.
pub fn fleet_config(
    data_dir: &Path,
    llm: &MockLlmServer,
    webhook_url: &str,
    tools: &[&str],
) -> TestResult<OrchestratorConfig> {
    let tools = tools
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!(
        r#"
        [daemon]
        database = "{db}"

        [scheduler]
        reconcile_interval_ms = 3600000

        [cycle]
        model_timeout_ms = 5000
        tool_timeout_ms = 5000

        [llm]
        name = "mock"
        base_url = "{llm}"
        api_key_env = "AGENT_ORCHESTRATOR_TEST_UNSET_KEY"

        [[agents]]
        name = "scout"
        personality = "You scout the feed for opportunities."
        model = "mock-model-v1"
        frequency_ms = 3600000
        tools = [{tools}]
        running = true

        [[webhooks]]
        name = "PostToFeed"
        description = "Post a short message to the community feed"
        url = "{hook}"
        parameters = [{{ name = "text", description = "Message body", required = true }}]
        "#,
        db = data_dir.join("agents.db").display(),
        llm = llm.base_url(),
        tools = tools,
        hook = webhook_url,
    );
    OrchestratorConfig::parse(&toml)
}

pub async fn wait_until<F, Fut>(mut check: F) -> TestResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check().await {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Ok(())
}
