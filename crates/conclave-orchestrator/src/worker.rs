use crate::monitor::AgentMonitor;
use crate::profiles::{behavior_for, RoleBehavior};
use crate::report::parse_report;
use crate::types::{Task, TaskResult};
use conclave_agent::CompletionBackend;
use conclave_core::{ConclaveResult, MessageBus, MessageKind};
use conclave_memory::SharedState;
use conclave_session::AgentLogger;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Handles every worker of a session shares.
#[derive(Clone)]
pub struct WorkerContext {
    pub backend: Arc<dyn CompletionBackend>,
    pub bus: Arc<MessageBus>,
    pub state: Arc<dyn SharedState>,
    /// Session logger; each worker derives its own agent logger from it.
    pub logger: AgentLogger,
    pub monitor: Arc<AgentMonitor>,
    /// Address results are published to.
    pub coordinator_id: String,
}

fn warn_on_err<T>(result: ConclaveResult<T>, agent_id: &str, what: &str) {
    if let Err(e) = result {
        warn!(agent_id = %agent_id, error = %e, "Worker could not {what}");
    }
}

/// Executes one task with the completion service and reports the result.
pub struct SubAgent {
    task: Task,
    agent_id: String,
    behavior: &'static dyn RoleBehavior,
    logger: AgentLogger,
    ctx: WorkerContext,
}

impl SubAgent {
    pub fn new(task: Task, ctx: WorkerContext) -> Self {
        let agent_id = task.agent_id();
        Self {
            behavior: behavior_for(task.role),
            logger: ctx.logger.for_agent(agent_id.clone()),
            agent_id,
            task,
            ctx,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    async fn complete(&self, prompt: &str) -> ConclaveResult<String> {
        self.ctx.monitor.record_operation(&self.agent_id).await;
        self.ctx.backend.complete(prompt).await
    }

    /// Run the task and report the result to the coordinator.
    pub async fn execute(&self) -> TaskResult {
        let result = self.run().await;
        self.deliver(&result).await;
        result
    }

    /// Run the task to completion without reporting it. Never fails:
    /// completion errors and unmet criteria are reported as gaps with
    /// reduced confidence.
    pub async fn run(&self) -> TaskResult {
        let task = &self.task;
        let start = Instant::now();
        let budget = task.max_sub_operations.max(1);

        info!(agent_id = %self.agent_id, task_id = task.id, role = %task.role, budget, "Worker starting");
        self.ctx.monitor.register(&self.agent_id, task.role).await;
        self.ctx.monitor.start_task(&self.agent_id, task.id).await;
        warn_on_err(
            self.logger.log_task_start(task.id, &task.description).await,
            &self.agent_id,
            "log task start",
        );

        let mut findings: Vec<String> = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        let mut gaps: Vec<String> = Vec::new();
        let mut confidence = 0.0_f32;
        let mut criteria_met = false;
        let mut structured = true;
        let mut topic: Option<String> = None;
        let mut failure: Option<String> = None;
        let mut operations = 0u32;

        while operations < budget {
            operations += 1;
            let prompt = if operations == 1 {
                self.behavior.instruction(task)
            } else {
                self.behavior.follow_up(task, &findings.join("\n\n"), operations)
            };

            let response = match self.complete(&prompt).await {
                Ok(response) => response,
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            };
            warn_on_err(
                self.logger
                    .log_tool_call("completion", json!({"operation": operations}), &response)
                    .await,
                &self.agent_id,
                "log completion",
            );

            let report = parse_report(&response);
            let text = report.findings.trim();
            if !text.is_empty() && !findings.iter().any(|f| f == text) {
                findings.push(text.to_string());
            }
            for source in report.sources {
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
            gaps.extend(report.gaps);
            confidence = report.confidence;
            criteria_met = report.criteria_met;
            structured &= report.structured;
            if report.topic.is_some() {
                topic = report.topic;
            }

            if criteria_met {
                break;
            }
        }

        let mut result = TaskResult::new(task.id, task.role, findings.join("\n\n"), confidence)
            .with_sources(sources);
        for gap in gaps {
            result = result.with_gap(gap);
        }

        if let Some(error) = &failure {
            result.confidence = 0.0;
            result = result.with_gap(format!("completion service failed: {error}"));
            self.ctx.monitor.record_error(&self.agent_id).await;
            warn_on_err(
                self.logger
                    .log_error(error, json!({"task_id": task.id, "operation": operations}))
                    .await,
                &self.agent_id,
                "log error",
            );
        } else if !criteria_met {
            result.confidence = result.confidence.min(0.5);
            result = result.with_gap(format!(
                "success criteria not met after {operations} operations: {}",
                task.success_criteria
            ));
        }

        let duration = start.elapsed();
        result = result
            .with_metadata("agent_id", json!(self.agent_id))
            .with_metadata("operations", json!(operations))
            .with_metadata("duration_ms", json!(duration.as_millis() as u64))
            .with_metadata("criteria_met", json!(criteria_met && failure.is_none()))
            .with_metadata("structured", json!(structured));
        if let Some(topic) = topic {
            result = result.with_metadata("topic", json!(topic));
        }

        self.ctx
            .monitor
            .record_duration(&self.agent_id, duration.as_millis() as u64)
            .await;
        self.ctx.monitor.finish_task(&self.agent_id, result.confidence).await;
        warn_on_err(
            self.logger
                .log_metric("sub_operations", f64::from(operations), "count")
                .await,
            &self.agent_id,
            "log metric",
        );
        warn_on_err(
            self.logger
                .log_task_complete(task.id, duration.as_secs_f64(), result.confidence)
                .await,
            &self.agent_id,
            "log task completion",
        );

        info!(
            agent_id = %self.agent_id,
            task_id = task.id,
            confidence = result.confidence,
            operations,
            duration_ms = duration.as_millis() as u64,
            "Worker finished"
        );
        result
    }

    /// Store and publish a result produced by [`SubAgent::run`].
    pub async fn deliver(&self, result: &TaskResult) {
        self.report(result, true).await;
    }

    /// Synthetic result for a worker cut off by the session deadline.
    pub async fn timed_out(&self, deadline: Duration) -> TaskResult {
        let gap = format!("worker timed out after {}s", deadline.as_secs_f64());
        self.ctx.monitor.register(&self.agent_id, self.task.role).await;
        self.ctx.monitor.mark_timed_out(&self.agent_id).await;
        self.synthetic(gap, "timeout").await
    }

    /// Synthetic result for a worker whose task panicked or was lost.
    pub async fn crashed(&self, reason: &str) -> TaskResult {
        let gap = format!("worker crashed: {reason}");
        self.ctx.monitor.register(&self.agent_id, self.task.role).await;
        self.ctx.monitor.record_error(&self.agent_id).await;
        self.synthetic(gap, "crash").await
    }

    async fn synthetic(&self, gap: String, cause: &str) -> TaskResult {
        warn!(agent_id = %self.agent_id, task_id = self.task.id, cause, "Substituting synthetic result");
        warn_on_err(
            self.logger
                .log_error(&gap, json!({"task_id": self.task.id, "synthetic": true}))
                .await,
            &self.agent_id,
            "log error",
        );
        let result = TaskResult::new(self.task.id, self.task.role, "", 0.0)
            .with_gap(gap)
            .with_metadata("agent_id", json!(self.agent_id))
            .with_metadata("synthetic", json!(true))
            .with_metadata("cause", json!(cause));
        self.report(&result, false).await;
        result
    }

    /// Write the result to shared state and publish it to the coordinator.
    async fn report(&self, result: &TaskResult, completed: bool) {
        let payload = serde_json::to_value(result).unwrap_or_else(|e| {
            warn!(agent_id = %self.agent_id, error = %e, "Result not serializable");
            json!({"task_id": result.task_id})
        });

        warn_on_err(
            self.ctx
                .state
                .store(&format!("result:{}", result.task_id), payload.clone())
                .await,
            &self.agent_id,
            "store result",
        );
        if completed {
            warn_on_err(
                self.ctx
                    .state
                    .update(
                        "completed_tasks",
                        Box::new(|v: Option<Value>| {
                            json!(v.and_then(|v| v.as_u64()).unwrap_or(0) + 1)
                        }),
                    )
                    .await,
                &self.agent_id,
                "count completion",
            );
        }

        let message = self.ctx.bus.publish(
            self.agent_id.clone(),
            self.ctx.coordinator_id.clone(),
            payload,
            MessageKind::Result,
        );
        warn_on_err(
            self.logger
                .log_message(
                    &message.kind.to_string(),
                    &message.sender,
                    &message.receiver,
                    &result.findings,
                )
                .await,
            &self.agent_id,
            "log message",
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::AgentRole;
    use async_trait::async_trait;
    use conclave_core::ConclaveError;
    use conclave_memory::SharedMemory;
    use conclave_session::{EventStore, EventType, InMemoryEventStore};
    use parking_lot::Mutex;

    /// Replies from a script; fails once the script runs out.
    struct ScriptedBackend {
        replies: Mutex<Vec<ConclaveResult<String>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<ConclaveResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, _prompt: &str) -> ConclaveResult<String> {
            let mut replies = self.replies.lock();
            if replies.is_empty() {
                Err(ConclaveError::Completion("script exhausted".into()))
            } else {
                replies.remove(0)
            }
        }
    }

    fn context(backend: Arc<dyn CompletionBackend>) -> (WorkerContext, Arc<InMemoryEventStore>) {
        let events = Arc::new(InMemoryEventStore::new());
        let ctx = WorkerContext {
            backend,
            bus: Arc::new(MessageBus::new()),
            state: Arc::new(SharedMemory::new()),
            logger: AgentLogger::new("lead_agent", "s1", events.clone()),
            monitor: Arc::new(AgentMonitor::new()),
            coordinator_id: "lead_agent".into(),
        };
        (ctx, events)
    }

    fn task(ops: u32) -> Task {
        Task::new(1, "Survey async runtimes", AgentRole::Researcher)
            .with_max_sub_operations(ops)
            .with_success_criteria("three runtimes compared")
    }

    #[tokio::test]
    async fn test_structured_report_in_one_operation() {
        let backend = ScriptedBackend::new(vec![Ok(
            r#"{"findings": "Tokio leads", "sources": ["https://tokio.rs"], "confidence": 0.9, "criteria_met": true}"#.into(),
        )]);
        let (ctx, events) = context(backend);
        let worker = SubAgent::new(task(5), ctx.clone());
        let result = worker.execute().await;

        assert_eq!(result.findings, "Tokio leads");
        assert_eq!(result.sources, vec!["https://tokio.rs"]);
        assert!((result.confidence - 0.9).abs() < 1e-6);
        assert!(result.gaps.is_empty());
        assert_eq!(result.metadata["operations"], json!(1));

        assert!(ctx.state.retrieve("result:1").await.unwrap().is_some());
        assert_eq!(ctx.state.retrieve("completed_tasks").await.unwrap(), Some(json!(1)));

        let inbox = ctx.bus.poll("lead_agent", Some(MessageKind::Result));
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].sender, "researcher_1");

        let types: Vec<EventType> = events
            .read("s1", "researcher_1")
            .await
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                EventType::TaskStart,
                EventType::ToolCall,
                EventType::Metric,
                EventType::TaskComplete,
                EventType::Message,
            ]
        );
    }

    #[tokio::test]
    async fn test_follow_up_until_criteria_met() {
        let backend = ScriptedBackend::new(vec![
            Ok(r#"{"findings": "part one", "sources": ["https://a"], "confidence": 0.4, "criteria_met": false}"#.into()),
            Ok(r#"{"findings": "part two", "sources": ["https://a", "https://b"], "confidence": 0.8, "criteria_met": true}"#.into()),
        ]);
        let (ctx, _events) = context(backend);
        let result = SubAgent::new(task(5), ctx).execute().await;

        assert_eq!(result.findings, "part one\n\npart two");
        assert_eq!(result.sources, vec!["https://a", "https://b"]);
        assert!((result.confidence - 0.8).abs() < 1e-6);
        assert_eq!(result.metadata["operations"], json!(2));
    }

    #[tokio::test]
    async fn test_budget_exhausted_caps_confidence() {
        let reply = r#"{"findings": "partial", "confidence": 0.9, "criteria_met": false}"#;
        let backend = ScriptedBackend::new(vec![Ok(reply.into()), Ok(reply.into())]);
        let (ctx, _events) = context(backend);
        let result = SubAgent::new(task(2), ctx).execute().await;

        assert_eq!(result.confidence, 0.5);
        assert!(result.gaps.contains(
            "success criteria not met after 2 operations: three runtimes compared"
        ));
        assert_eq!(result.findings, "partial");
    }

    #[tokio::test]
    async fn test_completion_failure_keeps_findings() {
        let backend = ScriptedBackend::new(vec![
            Ok(r#"{"findings": "early notes", "confidence": 0.7, "criteria_met": false}"#.into()),
            Err(ConclaveError::Completion("connection reset".into())),
        ]);
        let (ctx, events) = context(backend);
        let result = SubAgent::new(task(5), ctx.clone()).execute().await;

        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.findings, "early notes");
        assert!(result
            .gaps
            .iter()
            .any(|g| g.starts_with("completion service failed:") && g.contains("connection reset")));

        let logged = events.read("s1", "researcher_1").await.unwrap();
        assert!(logged.iter().any(|e| e.event_type == EventType::Error));
        let state = ctx.monitor.get_state("researcher_1").await.unwrap();
        assert_eq!(state.metrics.errors, 1);
    }

    #[tokio::test]
    async fn test_run_leaves_reporting_to_caller() {
        let backend = ScriptedBackend::new(vec![Ok(
            r#"{"findings": "Tokio leads", "confidence": 0.9, "criteria_met": true}"#.into(),
        )]);
        let (ctx, _events) = context(backend);
        let worker = SubAgent::new(task(5), ctx.clone());

        let result = worker.run().await;
        assert_eq!(result.findings, "Tokio leads");
        assert!(ctx.bus.is_empty());
        assert_eq!(ctx.state.retrieve("result:1").await.unwrap(), None);
        assert_eq!(ctx.state.retrieve("completed_tasks").await.unwrap(), None);

        worker.deliver(&result).await;
        assert_eq!(ctx.bus.poll("lead_agent", Some(MessageKind::Result)).len(), 1);
        assert!(ctx.state.retrieve("result:1").await.unwrap().is_some());
        assert_eq!(ctx.state.retrieve("completed_tasks").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_synthetic_results() {
        let (ctx, _events) = context(ScriptedBackend::new(vec![]));
        let worker = SubAgent::new(task(3), ctx.clone());

        let timed_out = worker.timed_out(Duration::from_secs(2)).await;
        assert!(timed_out.is_synthetic());
        assert_eq!(timed_out.confidence, 0.0);
        assert!(timed_out.gaps.iter().any(|g| g.contains("timed out")));

        let crashed = worker.crashed("boom").await;
        assert!(crashed.gaps.contains("worker crashed: boom"));

        assert_eq!(ctx.bus.poll("lead_agent", Some(MessageKind::Result)).len(), 2);
        assert_eq!(ctx.state.retrieve("completed_tasks").await.unwrap(), None);
    }
}
