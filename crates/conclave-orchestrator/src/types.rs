use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Role of each agent in a research session.
///
/// Declaration order is the order findings are grouped in the synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Plans the work and synthesizes the final answer.
    Lead,
    /// Gathers facts and sources.
    Researcher,
    /// Works with quantitative data and trends.
    Analyzer,
    /// Drafts structured prose.
    Writer,
    /// Looks for weaknesses, trade-offs and conflicting evidence.
    Critic,
    /// Cross-checks claims against independent sources.
    Verifier,
}

impl AgentRole {
    /// Every role, in declaration order.
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Lead,
        AgentRole::Researcher,
        AgentRole::Analyzer,
        AgentRole::Writer,
        AgentRole::Critic,
        AgentRole::Verifier,
    ];

    /// Lowercase role name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Lead => "lead",
            AgentRole::Researcher => "researcher",
            AgentRole::Analyzer => "analyzer",
            AgentRole::Writer => "writer",
            AgentRole::Critic => "critic",
            AgentRole::Verifier => "verifier",
        }
    }

    /// Parse a role name (case-insensitive). `analyst` is accepted for
    /// `analyzer`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "lead" => Some(AgentRole::Lead),
            "researcher" => Some(AgentRole::Researcher),
            "analyzer" | "analyser" | "analyst" => Some(AgentRole::Analyzer),
            "writer" => Some(AgentRole::Writer),
            "critic" => Some(AgentRole::Critic),
            "verifier" => Some(AgentRole::Verifier),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of delegated work. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// 1-based, unique within a session, in plan order.
    pub id: u32,
    pub description: String,
    pub role: AgentRole,
    pub allowed_tools: BTreeSet<String>,
    /// Budget of completion calls for this task.
    pub max_sub_operations: u32,
    pub success_criteria: String,
    pub output_format: String,
}

impl Task {
    pub fn new(id: u32, description: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id,
            description: description.into(),
            role,
            allowed_tools: BTreeSet::new(),
            max_sub_operations: 1,
            success_criteria: String::new(),
            output_format: String::new(),
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_sub_operations(mut self, max: u32) -> Self {
        self.max_sub_operations = max;
        self
    }

    pub fn with_success_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.success_criteria = criteria.into();
        self
    }

    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }

    /// Participant id of the worker executing this task, e.g. `researcher_1`.
    pub fn agent_id(&self) -> String {
        format!("{}_{}", self.role, self.id)
    }
}

/// Structured outcome of one task.
///
/// Created once by the worker that executed the task, or synthesized by the
/// session for a worker that timed out or crashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: u32,
    pub role: AgentRole,
    pub findings: String,
    /// Sources in the order they were reported, without duplicates.
    pub sources: Vec<String>,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f32,
    pub gaps: BTreeSet<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl TaskResult {
    /// Build a result; `confidence` is clamped to `[0.0, 1.0]` (NaN becomes 0).
    pub fn new(task_id: u32, role: AgentRole, findings: impl Into<String>, confidence: f32) -> Self {
        Self {
            task_id,
            role,
            findings: findings.into(),
            sources: Vec::new(),
            confidence: clamp_confidence(confidence),
            gaps: BTreeSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for source in sources {
            let source = source.into();
            if !self.sources.contains(&source) {
                self.sources.push(source);
            }
        }
        self
    }

    pub fn with_gap(mut self, gap: impl Into<String>) -> Self {
        self.gaps.insert(gap.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the session produced this result in place of a worker.
    pub fn is_synthetic(&self) -> bool {
        self.metadata
            .get("synthetic")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The `metadata.topic` string, if any.
    pub fn topic(&self) -> Option<&str> {
        self.metadata.get("topic").and_then(Value::as_str)
    }
}

pub(crate) fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Lifecycle of the coordinator within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Planning,
    Dispatched,
    Collecting,
    Synthesizing,
    Done,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Done | SessionPhase::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Planning, Dispatched)
            | (Dispatched, Collecting)
            | (Collecting, Synthesizing)
            | (Synthesizing, Done) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Planning => "planning",
            SessionPhase::Dispatched => "dispatched",
            SessionPhase::Collecting => "collecting",
            SessionPhase::Synthesizing => "synthesizing",
            SessionPhase::Done => "done",
            SessionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Metrics tracked per agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub operations: u32,
    pub errors: u32,
    pub duration_ms: u64,
    /// Confidence of the agent's last result.
    pub confidence: Option<f32>,
}

/// Real-time snapshot of an agent's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub role: AgentRole,
    pub current_task: Option<u32>,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    Done,
    Error,
    TimedOut,
}
