#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use conclave_agent::CompletionBackend;
use conclave_core::{ConclaveError, ConclaveResult, MessageKind};
use conclave_memory::{PersistentMemory, SharedState};
use conclave_orchestrator::{
    AgentRole, OrchestratorConfig, ResearchSession, SessionPhase, WorkerStatus,
};
use conclave_session::{analyze, EventStore, FileEventStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// How a scripted worker answers.
#[derive(Clone)]
enum Reply {
    Text(String),
    Slow(Duration, String),
    Fail(String),
    Hang,
    Panic,
}

/// Completion backend routed on prompt content: the planning prompt, the
/// summary prompt, and worker prompts matched by a task-description needle.
struct ScriptedBackend {
    plan: String,
    summary: String,
    workers: Vec<(&'static str, Reply)>,
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, prompt: &str) -> ConclaveResult<String> {
        if prompt.contains("Write a concise summary") {
            return Ok(self.summary.clone());
        }
        if prompt.contains("User query:") {
            return Ok(self.plan.clone());
        }
        for (needle, reply) in &self.workers {
            if prompt.contains(needle) {
                return match reply.clone() {
                    Reply::Text(text) => Ok(text),
                    Reply::Slow(delay, text) => {
                        tokio::time::sleep(delay).await;
                        Ok(text)
                    }
                    Reply::Fail(msg) => Err(ConclaveError::Completion(msg)),
                    Reply::Hang => {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok("too late".into())
                    }
                    Reply::Panic => panic!("scripted worker panic"),
                };
            }
        }
        Ok(r#"{"findings": "generic finding", "confidence": 0.6, "criteria_met": true}"#.into())
    }
}

fn report(findings: &str, sources: &[&str], confidence: f32) -> Reply {
    Reply::Text(
        json!({
            "findings": findings,
            "sources": sources,
            "confidence": confidence,
            "criteria_met": true,
        })
        .to_string(),
    )
}

const COMPARE_PLAN: &str = r#"[
  {"description": "Survey Tokio adoption", "role": "researcher", "max_sub_operations": 40},
  {"description": "Benchmark async-std throughput", "role": "analyzer", "max_sub_operations": 5},
  {"description": "Review ecosystem risks", "role": "critic", "max_sub_operations": 12}
]"#;

fn session(backend: ScriptedBackend, config: OrchestratorConfig) -> ResearchSession {
    ResearchSession::builder()
        .backend(Arc::new(backend))
        .config(config)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_compare_query_with_failing_worker() {
    let backend = ScriptedBackend {
        plan: COMPARE_PLAN.into(),
        summary: "Tokio is more widely adopted.".into(),
        workers: vec![
            (
                "Survey Tokio adoption",
                report("Tokio dominates crates.io downloads.", &["https://crates.io", "https://tokio.rs"], 0.9),
            ),
            (
                "Benchmark async-std throughput",
                Reply::Fail("upstream returned 503".into()),
            ),
            (
                "Review ecosystem risks",
                report("async-std maintenance has slowed.", &["https://tokio.rs", "https://github.com"], 0.7),
            ),
        ],
    };
    let session = session(backend, OrchestratorConfig::default());
    let report = session.run("compare Tokio and async-std").await.unwrap();

    assert!((2..=3).contains(&report.tasks.len()));
    for task in &report.tasks {
        assert!((10..=15).contains(&task.max_sub_operations));
    }
    assert_eq!(session.phase(), SessionPhase::Done);

    // Fan-in is complete and ordered.
    assert_eq!(report.results.len(), report.tasks.len());
    let ids: Vec<u32> = report.results.iter().map(|r| r.task_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let failed = &report.results[1];
    assert_eq!(failed.role, AgentRole::Analyzer);
    assert_eq!(failed.confidence, 0.0);
    assert!(!failed.gaps.is_empty());
    assert!(failed
        .gaps
        .iter()
        .any(|g| g.starts_with("completion service failed:")));

    // Every source appears exactly once.
    assert_eq!(
        report.synthesis.sources,
        vec!["https://crates.io", "https://tokio.rs", "https://github.com"]
    );
    for source in &report.synthesis.sources {
        assert_eq!(report.synthesis.text.matches(source.as_str()).count(), 1);
    }

    assert!(report.synthesis.text.contains("Tokio dominates crates.io downloads."));
    assert!(report.synthesis.text.contains("Tokio is more widely adopted."));

    let inbox = session.bus().poll("lead_agent", Some(MessageKind::Result));
    assert_eq!(inbox.len(), 3);
    assert_eq!(
        session.state().retrieve("completed_tasks").await.unwrap(),
        Some(json!(3))
    );
}

#[tokio::test]
async fn test_contradictions_quoted_verbatim() {
    let backend = ScriptedBackend {
        plan: r#"[{"description": "Check memory safety claims", "role": "researcher"},
                  {"description": "Verify memory safety claims", "role": "verifier"}]"#
            .into(),
        summary: "Sources disagree.".into(),
        workers: vec![
            (
                "Check memory safety claims",
                report("Unsafe blocks are common in embedded crates.", &[], 0.8),
            ),
            (
                "Verify memory safety claims",
                report("Unsafe blocks are not common in embedded crates.", &[], 0.8),
            ),
        ],
    };
    let session = session(backend, OrchestratorConfig::default());
    let report = session.run("Rust vs C for firmware").await.unwrap();

    assert_eq!(report.synthesis.contradictions.len(), 1);
    let text = &report.synthesis.text;
    assert!(text.contains("## Contradictions"));
    assert!(text.contains("\"Unsafe blocks are common in embedded crates.\""));
    assert!(text.contains("\"Unsafe blocks are not common in embedded crates.\""));
}

#[tokio::test]
async fn test_worker_timeout_yields_synthetic_result() {
    let backend = ScriptedBackend {
        plan: r#"[{"description": "Fast survey", "role": "researcher"},
                  {"description": "Slow survey", "role": "analyzer"}]"#
            .into(),
        summary: "Partial answer.".into(),
        workers: vec![
            ("Fast survey", report("Quick facts.", &["https://fast"], 0.9)),
            ("Slow survey", Reply::Hang),
        ],
    };
    let config = OrchestratorConfig {
        worker_timeout_secs: 1,
        ..OrchestratorConfig::default()
    };
    let session = session(backend, config);
    let report = session.run("compare fast and slow").await.unwrap();

    assert_eq!(session.phase(), SessionPhase::Done);
    assert_eq!(report.results.len(), 2);
    let slow = &report.results[1];
    assert!(slow.is_synthetic());
    assert_eq!(slow.confidence, 0.0);
    assert!(slow.gaps.iter().any(|g| g.contains("timed out")));
    assert!(!report.results[0].is_synthetic());

    let state = session.monitor().get_state("analyzer_2").await.unwrap();
    assert_eq!(state.status, WorkerStatus::TimedOut);

    // One Result per task, whichever way it ended.
    let inbox = session.bus().poll("lead_agent", Some(MessageKind::Result));
    let mut senders: Vec<&str> = inbox.iter().map(|m| m.sender.as_str()).collect();
    senders.sort_unstable();
    assert_eq!(senders, vec!["analyzer_2", "researcher_1"]);
}

#[tokio::test]
async fn test_queued_workers_keep_their_deadline() {
    let slow = |findings: &str| {
        Reply::Slow(
            Duration::from_millis(1200),
            json!({"findings": findings, "confidence": 0.8, "criteria_met": true}).to_string(),
        )
    };
    let backend = ScriptedBackend {
        plan: COMPARE_PLAN.into(),
        summary: "ok".into(),
        workers: vec![
            ("Survey Tokio adoption", slow("Tokio is popular.")),
            ("Benchmark async-std throughput", slow("async-std is fast.")),
            ("Review ecosystem risks", slow("Few risks found.")),
        ],
    };
    let config = OrchestratorConfig {
        worker_timeout_secs: 2,
        max_concurrent_workers: 1,
        ..OrchestratorConfig::default()
    };
    let session = session(backend, config);
    let report = session.run("compare Tokio and async-std").await.unwrap();

    assert_eq!(report.results.len(), 3);
    for result in &report.results {
        assert!(!result.is_synthetic(), "task {} gaps: {:?}", result.task_id, result.gaps);
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }
    assert_eq!(
        session.bus().poll("lead_agent", Some(MessageKind::Result)).len(),
        3
    );
    assert_eq!(
        session.state().retrieve("completed_tasks").await.unwrap(),
        Some(json!(3))
    );
}

#[tokio::test]
async fn test_panicking_worker_is_contained() {
    let backend = ScriptedBackend {
        plan: r#"[{"description": "Stable task", "role": "researcher"},
                  {"description": "Broken task", "role": "critic"}]"#
            .into(),
        summary: "Done.".into(),
        workers: vec![
            ("Stable task", report("Solid result.", &[], 0.8)),
            ("Broken task", Reply::Panic),
        ],
    };
    let session = session(backend, OrchestratorConfig::default());
    let report = session.run("compare stable and broken").await.unwrap();

    let broken = &report.results[1];
    assert!(broken.is_synthetic());
    assert!(broken
        .gaps
        .iter()
        .any(|g| g.contains("worker crashed") && g.contains("scripted worker panic")));
    assert_eq!(session.phase(), SessionPhase::Done);
}

#[tokio::test]
async fn test_empty_query_is_planning_error() {
    let backend = ScriptedBackend {
        plan: "[]".into(),
        summary: String::new(),
        workers: Vec::new(),
    };
    let session = session(backend, OrchestratorConfig::default());
    let err = session.research("  ").await.unwrap_err();
    assert!(matches!(err, ConclaveError::Planning(_)));
    assert_eq!(session.phase(), SessionPhase::Failed);
    assert!(session.bus().is_empty());
}

#[tokio::test]
async fn test_bounded_workers_complete() {
    let backend = ScriptedBackend {
        plan: COMPARE_PLAN.into(),
        summary: "ok".into(),
        workers: Vec::new(),
    };
    let config = OrchestratorConfig {
        max_concurrent_workers: 1,
        ..OrchestratorConfig::default()
    };
    let session = session(backend, config);
    let report = session.run("compare Tokio and async-std").await.unwrap();
    assert_eq!(report.results.len(), 3);
    assert!(report.results.iter().all(|r| r.findings == "generic finding"));
}

#[tokio::test]
async fn test_durable_session_and_event_log() {
    let tmp = tempfile::tempdir().unwrap();
    let memory = Arc::new(PersistentMemory::in_dir(tmp.path().join("state")).await.unwrap());
    let events = Arc::new(FileEventStore::new(tmp.path().join("logs")).await.unwrap());

    let backend = ScriptedBackend {
        plan: COMPARE_PLAN.into(),
        summary: "ok".into(),
        workers: Vec::new(),
    };
    let session = ResearchSession::builder()
        .backend(Arc::new(backend))
        .state(memory.clone())
        .event_store(events.clone())
        .session_id(memory.session_id())
        .build()
        .unwrap();
    session.run("compare Tokio and async-std").await.unwrap();

    memory.checkpoint("final").await.unwrap();
    let checkpoints = memory.list_checkpoints().await.unwrap();
    assert_eq!(checkpoints[0].name, "final");

    let agents = events.agents(memory.session_id()).await.unwrap();
    assert!(agents.contains("system"));
    assert!(agents.contains("lead_agent"));
    assert!(agents.contains("researcher_1"));

    let all = events.read_session(memory.session_id()).await.unwrap();
    let stats = analyze(&all);
    assert_eq!(stats.tasks_completed, 3);
    assert_eq!(stats.total_errors, 0);

    let trace = session.export_trace().await.unwrap();
    assert_eq!(trace.session_id, memory.session_id());
    assert!(trace.memory.contains_key("research_plan"));
}
