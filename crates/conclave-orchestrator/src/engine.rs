use crate::lead::{LeadAgent, Synthesis};
use crate::monitor::AgentMonitor;
use crate::planner::QueryComplexity;
use crate::types::{AgentRole, SessionPhase, Task, TaskResult};
use crate::worker::{SubAgent, WorkerContext};
use conclave_agent::CompletionBackend;
use conclave_core::{ConclaveError, ConclaveResult, Message, MessageBus};
use conclave_memory::{new_session_id, SharedMemory, SharedState};
use conclave_session::{AgentLogger, EventStore, InMemoryEventStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

fn default_worker_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_coordinator_id() -> String {
    "lead_agent".to_string()
}

fn default_low_confidence_threshold() -> f32 {
    0.3
}

/// Settings for a research session (`[orchestrator]` in `conclave.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Per-worker deadline in seconds. 0 disables it.
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    /// Maximum workers running at once. 0 means unbounded.
    #[serde(default)]
    pub max_concurrent_workers: usize,
    /// Use the template plan when the model's plan is unusable.
    #[serde(default = "default_true")]
    pub heuristic_fallback: bool,
    /// Address workers publish their results to.
    #[serde(default = "default_coordinator_id")]
    pub coordinator_id: String,
    /// Results below this confidence are reported as gaps.
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_timeout_secs: default_worker_timeout_secs(),
            max_concurrent_workers: 0,
            heuristic_fallback: true,
            coordinator_id: default_coordinator_id(),
            low_confidence_threshold: default_low_confidence_threshold(),
        }
    }
}

impl OrchestratorConfig {
    pub fn worker_timeout(&self) -> Option<Duration> {
        (self.worker_timeout_secs > 0).then(|| Duration::from_secs(self.worker_timeout_secs))
    }
}

/// Everything a finished session produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub session_id: String,
    pub query: String,
    pub complexity: QueryComplexity,
    pub tasks: Vec<Task>,
    /// One per task, ordered by task id.
    pub results: Vec<TaskResult>,
    pub synthesis: Synthesis,
    pub duration_ms: u64,
}

/// Message history and final shared state of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub memory: BTreeMap<String, Value>,
}

/// Builder for [`ResearchSession`].
#[derive(Default)]
pub struct ResearchSessionBuilder {
    backend: Option<Arc<dyn CompletionBackend>>,
    config: OrchestratorConfig,
    state: Option<Arc<dyn SharedState>>,
    events: Option<Arc<dyn EventStore>>,
    session_id: Option<String>,
}

impl ResearchSessionBuilder {
    pub fn backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared state; defaults to an in-memory store.
    pub fn state(mut self, state: Arc<dyn SharedState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Event store; defaults to an in-memory store.
    pub fn event_store(mut self, events: Arc<dyn EventStore>) -> Self {
        self.events = Some(events);
        self
    }

    /// Session id; defaults to a fresh timestamped id.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn build(self) -> ConclaveResult<ResearchSession> {
        let backend = self
            .backend
            .ok_or_else(|| ConclaveError::Config("a completion backend is required".into()))?;
        let session_id = self.session_id.unwrap_or_else(new_session_id);
        let state: Arc<dyn SharedState> = self
            .state
            .unwrap_or_else(|| Arc::new(SharedMemory::new()));
        let events: Arc<dyn EventStore> = self
            .events
            .unwrap_or_else(|| Arc::new(InMemoryEventStore::new()));
        let bus = Arc::new(MessageBus::new());
        let logger = AgentLogger::system(session_id.clone(), events.clone());

        let lead = LeadAgent::new(
            self.config.coordinator_id.clone(),
            backend.clone(),
            bus.clone(),
            state.clone(),
            logger.clone(),
        )
        .with_heuristic_fallback(self.config.heuristic_fallback)
        .with_low_confidence_threshold(self.config.low_confidence_threshold);

        Ok(ResearchSession {
            session_id,
            config: self.config,
            backend,
            bus,
            state,
            events,
            logger,
            monitor: Arc::new(AgentMonitor::new()),
            lead,
        })
    }
}

/// One research query: plan, parallel workers, synthesis.
///
/// A session owns its message bus and runs a single query; a second `run`
/// is rejected because the coordinator has left the planning phase.
pub struct ResearchSession {
    session_id: String,
    config: OrchestratorConfig,
    backend: Arc<dyn CompletionBackend>,
    bus: Arc<MessageBus>,
    state: Arc<dyn SharedState>,
    events: Arc<dyn EventStore>,
    logger: AgentLogger,
    monitor: Arc<AgentMonitor>,
    lead: LeadAgent,
}

impl ResearchSession {
    pub fn builder() -> ResearchSessionBuilder {
        ResearchSessionBuilder::default()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn state(&self) -> &Arc<dyn SharedState> {
        &self.state
    }

    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    pub fn phase(&self) -> SessionPhase {
        self.lead.phase()
    }

    /// Run the query and return the synthesis text.
    pub async fn research(&self, query: &str) -> ConclaveResult<String> {
        Ok(self.run(query).await?.synthesis.text)
    }

    /// Run the full pipeline for `query`.
    ///
    /// Phase 1 (Plan): the coordinator decomposes the query.
    /// Phase 2 (Execute): every task runs on its own worker, all in parallel.
    /// Phase 3 (Synthesize): the coordinator merges the results.
    pub async fn run(&self, query: &str) -> ConclaveResult<ResearchReport> {
        let phase = self.lead.phase();
        if phase != SessionPhase::Planning {
            return Err(ConclaveError::Orchestrator(format!(
                "session {} already ran (phase {phase})",
                self.session_id
            )));
        }
        let start = Instant::now();
        info!(session_id = %self.session_id, query, "Research session starting");
        self.logger
            .log_decision("research_start", json!({"query": query}))
            .await?;
        self.monitor
            .register(&self.config.coordinator_id, AgentRole::Lead)
            .await;

        match self.pipeline(query, start).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.lead.fail();
                self.monitor.record_error(&self.config.coordinator_id).await;
                if let Err(log_err) = self
                    .logger
                    .log_error(&e.to_string(), json!({"query": query}))
                    .await
                {
                    warn!(error = %log_err, "Failed to log session error");
                }
                error!(session_id = %self.session_id, error = %e, "Research session failed");
                Err(e)
            }
        }
    }

    async fn pipeline(&self, query: &str, start: Instant) -> ConclaveResult<ResearchReport> {
        let plan = self.lead.plan(query).await?;
        let query = query.trim();

        self.lead.transition(SessionPhase::Dispatched)?;
        let ctx = self.worker_context();
        let workers = self.dispatch(&plan.tasks, &ctx);
        self.lead.transition(SessionPhase::Collecting)?;
        let results = self.collect(workers, &plan.tasks, &ctx).await;

        let synthesis = self.lead.synthesize(query, &plan.tasks, &results).await?;
        self.state
            .store("final_synthesis", json!(synthesis.text))
            .await?;

        let duration = start.elapsed();
        let duration_ms = duration.as_millis() as u64;
        self.monitor
            .record_duration(&self.config.coordinator_id, duration_ms)
            .await;
        self.logger
            .log_metric("research_duration", duration.as_secs_f64(), "seconds")
            .await?;
        self.logger
            .log_decision(
                "research_complete",
                json!({
                    "tasks": plan.tasks.len(),
                    "sources": synthesis.sources.len(),
                    "gaps": synthesis.gaps.len(),
                    "contradictions": synthesis.contradictions.len(),
                }),
            )
            .await?;

        info!(
            session_id = %self.session_id,
            duration_ms,
            tasks = plan.tasks.len(),
            "Research session complete"
        );
        Ok(ResearchReport {
            session_id: self.session_id.clone(),
            query: query.to_string(),
            complexity: plan.complexity,
            tasks: plan.tasks,
            results,
            synthesis,
            duration_ms,
        })
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            backend: self.backend.clone(),
            bus: self.bus.clone(),
            state: self.state.clone(),
            logger: self.logger.clone(),
            monitor: self.monitor.clone(),
            coordinator_id: self.config.coordinator_id.clone(),
        }
    }

    /// Spawn every task before any result is observed. Each worker runs in
    /// its own task so a deadline can abort it and a panic stays contained.
    /// Only the supervisor reports, so each task yields one result.
    fn dispatch(&self, tasks: &[Task], ctx: &WorkerContext) -> JoinSet<TaskResult> {
        let deadline = self.config.worker_timeout();
        let limiter = (self.config.max_concurrent_workers > 0)
            .then(|| Arc::new(Semaphore::new(self.config.max_concurrent_workers)));
        let mut workers = JoinSet::new();
        for task in tasks {
            let worker = Arc::new(SubAgent::new(task.clone(), ctx.clone()));
            let limiter = limiter.clone();
            info!(agent_id = %worker.agent_id(), task_id = task.id, "Dispatching worker");
            workers.spawn(async move {
                // The deadline starts once the worker holds a slot.
                let _permit = match limiter {
                    Some(limiter) => match limiter.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            return worker.crashed(&format!("worker limiter closed: {e}")).await;
                        }
                    },
                    None => None,
                };

                let runner = worker.clone();
                let mut handle = tokio::spawn(async move { runner.run().await });
                let joined = match deadline {
                    Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            handle.abort();
                            return worker.timed_out(limit).await;
                        }
                    },
                    None => handle.await,
                };
                match joined {
                    Ok(result) => {
                        worker.deliver(&result).await;
                        result
                    }
                    Err(e) => worker.crashed(&join_failure(e)).await,
                }
            });
        }
        workers
    }

    /// Wait for every worker. Always yields exactly one result per task,
    /// ordered by task id.
    async fn collect(
        &self,
        mut workers: JoinSet<TaskResult>,
        tasks: &[Task],
        ctx: &WorkerContext,
    ) -> Vec<TaskResult> {
        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Worker supervisor failed"),
            }
        }

        let seen: BTreeSet<u32> = results.iter().map(|r| r.task_id).collect();
        for task in tasks.iter().filter(|t| !seen.contains(&t.id)) {
            let worker = SubAgent::new(task.clone(), ctx.clone());
            results.push(worker.crashed("worker supervisor lost").await);
        }

        results.sort_by_key(|r| r.task_id);
        results
    }

    /// Message history and a snapshot of shared state.
    pub async fn export_trace(&self) -> ConclaveResult<Trace> {
        Ok(Trace {
            session_id: self.session_id.clone(),
            messages: self.bus.export(),
            memory: self.state.snapshot().await?,
        })
    }
}

fn join_failure(err: JoinError) -> String {
    if err.is_cancelled() {
        return "worker task cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("panicked: {detail}")
        }
        Err(err) => err.to_string(),
    }
}
