//! Per-agent recurring timers plus a reconciliation control loop.
//!
//! The scheduler owns the only mutable map in the core: agent id to armed
//! timer. `start`, `stop` and `reconcile` all go through the same lock, so a
//! running agent never ends up with two timers. A separate per-agent
//! [`CycleGuard`] makes sure a tick that fires while the previous cycle is
//! still in flight is coalesced instead of starting a second cycle.

mod guard;

pub use guard::{CycleGuard, CyclePermit};

use anyhow::{Result, anyhow, ensure};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::agent::{Agent, ThoughtKind};
use crate::core::brain::{AgentBrain, CycleOutcome};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::memory::AgentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AgentTimer {
    job_id: Uuid,
    frequency_ms: u64,
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    /// Timers torn down because the agent no longer exists.
    pub removed: Vec<String>,
    /// Timers re-created because the persisted frequency changed.
    pub rearmed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
            && self.stopped.is_empty()
            && self.removed.is_empty()
            && self.rearmed.is_empty()
    }
}

pub struct AgentScheduler {
    me: Weak<AgentScheduler>,
    jobs: JobScheduler,
    brain: Arc<AgentBrain>,
    store: Arc<dyn AgentStore>,
    timers: Mutex<HashMap<String, AgentTimer>>,
    guards: std::sync::Mutex<HashMap<String, CycleGuard>>,
    reconcile_interval: Duration,
    reconcile_job: Mutex<Option<Uuid>>,
    reconcile_guard: CycleGuard,
}

impl AgentScheduler {
    /// `jobs` is driven by whoever owns it (normally the lifecycle manager);
    /// this type only adds and removes jobs.
    pub fn new(
        jobs: JobScheduler,
        brain: Arc<AgentBrain>,
        store: Arc<dyn AgentStore>,
        reconcile_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            jobs,
            brain,
            store,
            timers: Mutex::new(HashMap::new()),
            guards: std::sync::Mutex::new(HashMap::new()),
            reconcile_interval,
            reconcile_job: Mutex::new(None),
            reconcile_guard: CycleGuard::default(),
        })
    }

    /// Arm a timer for the agent, persist `running = true` and kick off one
    /// cycle right away. Returns `false` if the agent already had a timer.
    pub async fn start(&self, agent_id: &str) -> Result<bool> {
        let mut timers = self.timers.lock().await;
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| anyhow!("agent {} not found", agent_id))?;
        let started = self.start_locked(&mut timers, &agent).await?;
        drop(timers);

        if started {
            self.trigger_now(agent_id);
        }
        Ok(started)
    }

    /// Cancel the timer (if any), persist `running = false` and note it in
    /// the agent's log. A cycle already in flight is left to finish.
    pub async fn stop(&self, agent_id: &str) -> Result<bool> {
        let mut timers = self.timers.lock().await;
        self.stop_locked(&mut timers, agent_id).await
    }

    /// Converge in-process timers with the persisted running flags.
    ///
    /// Each agent is re-read and acted on while the timer map is locked, so
    /// a `start` or `stop` racing with the pass is never undone by it.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let listed = self.store.list_agents().await?;
        let mut report = ReconcileReport::default();

        for agent in &listed {
            let mut timers = self.timers.lock().await;
            let step = self.reconcile_one(&mut timers, &agent.id, &mut report).await;
            drop(timers);
            if let Err(e) = step {
                warn!(agent_id = %agent.id, "Reconcile step failed: {:#}", e);
            }
        }

        let known: HashSet<&str> = listed.iter().map(|a| a.id.as_str()).collect();
        let orphans: Vec<String> = self
            .timers
            .lock()
            .await
            .keys()
            .filter(|id| !known.contains(id.as_str()))
            .cloned()
            .collect();
        for agent_id in &orphans {
            let mut timers = self.timers.lock().await;
            if let Err(e) = self.reconcile_one(&mut timers, agent_id, &mut report).await {
                warn!(agent_id = %agent_id, "Reconcile step failed: {:#}", e);
            }
        }

        for agent_id in &report.started {
            self.trigger_now(agent_id);
        }

        if !report.is_empty() {
            info!(
                started = report.started.len(),
                stopped = report.stopped.len(),
                removed = report.removed.len(),
                rearmed = report.rearmed.len(),
                "Reconciled agent timers"
            );
        }
        Ok(report)
    }

    /// Run one cycle out of band. Resolves to `None` when the agent already
    /// had a cycle in flight and this one was coalesced.
    pub fn trigger_now(&self, agent_id: &str) -> JoinHandle<Option<CycleOutcome>> {
        tokio::spawn(run_guarded(
            self.brain.clone(),
            self.guard_for(agent_id),
            agent_id.to_string(),
        ))
    }

    /// Register the recurring reconciliation job. Calling it twice is a no-op.
    pub async fn spawn_reconciler(&self) -> Result<()> {
        let mut slot = self.reconcile_job.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let me = self.me.clone();
        let guard = self.reconcile_guard.clone();
        let job = Job::new_repeated_async(self.reconcile_interval, move |_uuid, _l| {
            let me = me.clone();
            let guard = guard.clone();
            Box::pin(async move {
                let Some(scheduler) = me.upgrade() else {
                    return;
                };
                let Some(_permit) = guard.try_acquire() else {
                    debug!("Reconcile tick skipped: previous pass still running");
                    return;
                };
                if let Err(e) = scheduler.reconcile().await {
                    error!("Reconciliation failed: {:#}", e);
                }
            })
        })?;
        *slot = Some(self.jobs.add(job).await?);
        info!(interval_ms = self.reconcile_interval.as_millis() as u64, "Reconciler scheduled");
        Ok(())
    }

    /// Cancel every timer without touching persisted running flags, so a
    /// restart resumes the same agents.
    pub async fn shutdown(&self) {
        if let Some(job_id) = self.reconcile_job.lock().await.take()
            && let Err(e) = self.jobs.remove(&job_id).await
        {
            warn!("Failed to remove reconcile job: {}", e);
        }
        let mut timers = self.timers.lock().await;
        for (agent_id, timer) in timers.drain() {
            self.disarm(&agent_id, timer).await;
        }
        info!("Agent scheduler shut down");
    }

    pub async fn is_scheduled(&self, agent_id: &str) -> bool {
        self.timers.lock().await.contains_key(agent_id)
    }

    pub async fn scheduled_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timers.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn scheduled_frequency(&self, agent_id: &str) -> Option<u64> {
        self.timers
            .lock()
            .await
            .get(agent_id)
            .map(|t| t.frequency_ms)
    }

    fn guard_for(&self, agent_id: &str) -> CycleGuard {
        self.guards
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(agent_id.to_string())
            .or_default()
            .clone()
    }

    async fn start_locked(
        &self,
        timers: &mut HashMap<String, AgentTimer>,
        agent: &Agent,
    ) -> Result<bool> {
        if timers.contains_key(&agent.id) {
            debug!(agent_id = %agent.id, "Start ignored: already scheduled");
            return Ok(false);
        }

        let timer = self.arm(agent).await?;
        if let Err(e) = self.store.set_running(&agent.id, true).await {
            self.disarm(&agent.id, timer).await;
            return Err(e);
        }
        timers.insert(agent.id.clone(), timer);

        info!(
            agent_id = %agent.id,
            name = %agent.name,
            frequency_ms = agent.frequency_ms,
            "Agent started"
        );
        Ok(true)
    }

    async fn stop_locked(
        &self,
        timers: &mut HashMap<String, AgentTimer>,
        agent_id: &str,
    ) -> Result<bool> {
        let removed = timers.remove(agent_id);
        if let Some(timer) = removed {
            self.disarm(agent_id, timer).await;
        }

        self.store.set_running(agent_id, false).await?;
        let model = self
            .store
            .get_agent(agent_id)
            .await?
            .map(|a| a.model)
            .unwrap_or_default();
        self.store
            .append_thought(agent_id, ThoughtKind::System, "Agent stopped", &model)
            .await?;

        info!(agent_id = %agent_id, had_timer = removed.is_some(), "Agent stopped");
        Ok(removed.is_some())
    }

    /// One reconciliation decision, made against a fresh read of the agent
    /// while the caller holds the timer map.
    async fn reconcile_one(
        &self,
        timers: &mut HashMap<String, AgentTimer>,
        agent_id: &str,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let Some(agent) = self.store.get_agent(agent_id).await? else {
            if let Some(timer) = timers.remove(agent_id) {
                self.disarm(agent_id, timer).await;
                info!(agent_id = %agent_id, "Timer removed for deleted agent");
                report.removed.push(agent_id.to_string());
            }
            return Ok(());
        };

        match (agent.running, timers.get(agent_id).copied()) {
            (true, None) => {
                if self.start_locked(timers, &agent).await? {
                    report.started.push(agent.id.clone());
                }
            }
            (false, Some(_)) => {
                self.stop_locked(timers, agent_id).await?;
                report.stopped.push(agent.id.clone());
            }
            (true, Some(current)) if current.frequency_ms != agent.frequency_ms => {
                let replacement = self.arm(&agent).await?;
                self.disarm(agent_id, current).await;
                timers.insert(agent.id.clone(), replacement);
                info!(
                    agent_id = %agent.id,
                    from_ms = current.frequency_ms,
                    to_ms = agent.frequency_ms,
                    "Agent timer re-armed"
                );
                report.rearmed.push(agent.id.clone());
            }
            _ => {}
        }
        Ok(())
    }

    async fn arm(&self, agent: &Agent) -> Result<AgentTimer> {
        ensure!(
            agent.frequency_ms > 0,
            "agent {} has a zero frequency and cannot be scheduled",
            agent.id
        );
        let brain = self.brain.clone();
        let guard = self.guard_for(&agent.id);
        let agent_id = agent.id.clone();

        let job = Job::new_repeated_async(
            Duration::from_millis(agent.frequency_ms),
            move |_uuid, _l| {
                let brain = brain.clone();
                let guard = guard.clone();
                let agent_id = agent_id.clone();
                Box::pin(async move {
                    let task = tokio::spawn(run_guarded(brain, guard, agent_id.clone()));
                    if let Err(e) = task.await {
                        error!(agent_id = %agent_id, "Cycle task aborted: {}", e);
                    }
                })
            },
        )?;
        let job_id = self.jobs.add(job).await?;
        Ok(AgentTimer {
            job_id,
            frequency_ms: agent.frequency_ms,
        })
    }

    async fn disarm(&self, agent_id: &str, timer: AgentTimer) {
        if let Err(e) = self.jobs.remove(&timer.job_id).await {
            warn!(agent_id = %agent_id, "Failed to remove timer job: {}", e);
        }
    }
}

async fn run_guarded(
    brain: Arc<AgentBrain>,
    guard: CycleGuard,
    agent_id: String,
) -> Option<CycleOutcome> {
    let Some(_permit) = guard.try_acquire() else {
        debug!(agent_id = %agent_id, "Tick coalesced: cycle already in flight");
        return None;
    };
    Some(brain.run_cycle(&agent_id).await)
}

#[async_trait::async_trait]
impl LifecycleComponent for AgentScheduler {
    /// Boot-time reconcile auto-starts every agent persisted as running.
    async fn on_start(&self) -> Result<()> {
        let report = self.reconcile().await?;
        info!("Auto-started {} agents", report.started.len());
        self.spawn_reconciler().await
    }

    async fn on_shutdown(&self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}
