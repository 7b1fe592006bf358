use crate::types::{AgentMetrics, AgentRole, AgentState, WorkerStatus};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Tracks state and metrics for every agent of a session, keyed by agent id.
pub struct AgentMonitor {
    states: Arc<RwLock<BTreeMap<String, AgentState>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Register an agent as idle. Re-registering keeps existing metrics.
    pub async fn register(&self, agent_id: &str, role: AgentRole) {
        let mut states = self.states.write().await;
        states
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentState {
                agent_id: agent_id.to_string(),
                role,
                current_task: None,
                status: WorkerStatus::Idle,
                metrics: AgentMetrics::default(),
                updated_at: Utc::now(),
            });
    }

    async fn with_state<F>(&self, agent_id: &str, f: F)
    where
        F: FnOnce(&mut AgentState),
    {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            f(state);
            state.updated_at = Utc::now();
        }
    }

    /// Mark an agent as working on a task.
    pub async fn start_task(&self, agent_id: &str, task_id: u32) {
        self.with_state(agent_id, |state| {
            state.current_task = Some(task_id);
            state.status = WorkerStatus::Working;
        })
        .await;
    }

    /// Mark an agent's task as finished with the given confidence.
    pub async fn finish_task(&self, agent_id: &str, confidence: f32) {
        self.with_state(agent_id, |state| {
            state.current_task = None;
            state.metrics.confidence = Some(confidence);
            if state.status == WorkerStatus::Working {
                state.status = WorkerStatus::Done;
            }
        })
        .await;
    }

    /// Record one completion call.
    pub async fn record_operation(&self, agent_id: &str) {
        self.with_state(agent_id, |state| state.metrics.operations += 1)
            .await;
    }

    /// Record an error for an agent.
    pub async fn record_error(&self, agent_id: &str) {
        self.with_state(agent_id, |state| {
            state.metrics.errors += 1;
            state.status = WorkerStatus::Error;
        })
        .await;
    }

    /// Mark an agent as cut off by the session deadline.
    pub async fn mark_timed_out(&self, agent_id: &str) {
        self.with_state(agent_id, |state| {
            state.current_task = None;
            state.status = WorkerStatus::TimedOut;
        })
        .await;
    }

    /// Record execution duration for an agent.
    pub async fn record_duration(&self, agent_id: &str, duration_ms: u64) {
        self.with_state(agent_id, |state| state.metrics.duration_ms += duration_ms)
            .await;
    }

    /// Snapshot of all agent states, ordered by agent id.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        states.values().cloned().collect()
    }

    /// State of a specific agent.
    pub async fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(agent_id).cloned()
    }

    /// Aggregate metrics across all agents. `confidence` is the mean over
    /// agents that reported one.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        let mut confidences = Vec::new();
        for state in states.values() {
            total.operations += state.metrics.operations;
            total.errors += state.metrics.errors;
            total.duration_ms += state.metrics.duration_ms;
            if let Some(c) = state.metrics.confidence {
                confidences.push(c);
            }
        }
        if !confidences.is_empty() {
            total.confidence = Some(confidences.iter().sum::<f32>() / confidences.len() as f32);
        }
        total
    }

    /// Current state as JSON, for the CLI summary.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}
