//! Lead/worker research orchestration for Conclave.
//!
//! A [`ResearchSession`] takes one query through three phases: the
//! [`LeadAgent`] plans a task list, one [`SubAgent`] per task runs in
//! parallel against the completion service, and the lead merges every
//! result into a [`Synthesis`] with sources, gaps and contradictions.
//!
//! # Main types
//!
//! - [`ResearchSession`] — Wires bus, shared state, event log and workers for one query.
//! - [`LeadAgent`] — Plans tasks and synthesizes the final answer.
//! - [`SubAgent`] — Executes one task and publishes its [`TaskResult`].
//! - [`AgentMonitor`] — Tracks per-agent status and metrics.
//! - [`RoleBehavior`] — Role-specific prompts, selected with [`behavior_for`].

/// Research session: dispatch, fan-in and trace export.
pub mod engine;
/// Coordinator planning and synthesis.
pub mod lead;
/// Agent status and metrics monitoring.
pub mod monitor;
/// Query complexity and task-list planning.
pub mod planner;
/// Per-role prompt behavior.
pub mod profiles;
/// Parsing worker completions into structured reports.
pub mod report;
/// Shared orchestration types (Task, TaskResult, AgentRole, etc.).
pub mod types;
/// Task execution by sub-agents.
pub mod worker;

pub use engine::{OrchestratorConfig, ResearchReport, ResearchSession, ResearchSessionBuilder, Trace};
pub use lead::{Contradiction, LeadAgent, Plan, Synthesis};
pub use monitor::AgentMonitor;
pub use planner::{parse_task_list, planning_prompt, template_plan, PlanBand, QueryComplexity};
pub use profiles::{behavior_for, RoleBehavior};
pub use report::{extract_urls, find_json, parse_report, WorkerReport, PLAIN_TEXT_CONFIDENCE};
pub use types::{
    AgentMetrics, AgentRole, AgentState, SessionPhase, Task, TaskResult, WorkerStatus,
};
pub use worker::{SubAgent, WorkerContext};
