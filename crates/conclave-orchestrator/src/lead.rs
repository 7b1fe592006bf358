use crate::planner::{parse_task_list, planning_prompt, template_plan, QueryComplexity};
use crate::types::{AgentRole, SessionPhase, Task, TaskResult};
use conclave_agent::CompletionBackend;
use conclave_core::{ConclaveError, ConclaveResult, MessageBus, MessageKind, BROADCAST};
use conclave_memory::SharedState;
use conclave_session::AgentLogger;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

/// Words dropped before statements are compared for contradictions.
const NEGATIONS: &[&str] = &["not", "no", "never", "none", "neither", "nor", "without"];

/// Statements shorter than this (after normalization) are never compared.
const MIN_STATEMENT_WORDS: usize = 3;

/// Outcome of planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub complexity: QueryComplexity,
    pub tasks: Vec<Task>,
    /// False when the deterministic template replaced the model's plan.
    pub from_model: bool,
}

/// Two findings that disagree, quoted verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    /// Shared `metadata.topic` when detected by topic divergence.
    pub topic: Option<String>,
    pub first_task: u32,
    pub first: String,
    pub second_task: u32,
    pub second: String,
}

/// The merged answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    /// Markdown document with every section.
    pub text: String,
    pub summary: String,
    /// Union of all result sources, first-seen order.
    pub sources: Vec<String>,
    pub gaps: BTreeSet<String>,
    pub contradictions: Vec<Contradiction>,
}

/// Coordinator: plans the task list and merges the results.
pub struct LeadAgent {
    id: String,
    backend: Arc<dyn CompletionBackend>,
    bus: Arc<MessageBus>,
    state: Arc<dyn SharedState>,
    logger: AgentLogger,
    phase: Mutex<SessionPhase>,
    heuristic_fallback: bool,
    low_confidence_threshold: f32,
}

impl LeadAgent {
    pub fn new(
        id: impl Into<String>,
        backend: Arc<dyn CompletionBackend>,
        bus: Arc<MessageBus>,
        state: Arc<dyn SharedState>,
        logger: AgentLogger,
    ) -> Self {
        let id = id.into();
        Self {
            logger: logger.for_agent(id.clone()),
            id,
            backend,
            bus,
            state,
            phase: Mutex::new(SessionPhase::Planning),
            heuristic_fallback: true,
            low_confidence_threshold: 0.3,
        }
    }

    /// Whether a template plan replaces an unusable model plan.
    pub fn with_heuristic_fallback(mut self, enabled: bool) -> Self {
        self.heuristic_fallback = enabled;
        self
    }

    /// Results below this confidence are reported as gaps.
    pub fn with_low_confidence_threshold(mut self, threshold: f32) -> Self {
        self.low_confidence_threshold = threshold;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&self, next: SessionPhase) -> ConclaveResult<()> {
        let mut phase = self.phase.lock();
        if !phase.can_transition_to(next) {
            return Err(ConclaveError::Orchestrator(format!(
                "illegal phase transition {} -> {next}",
                *phase
            )));
        }
        info!(agent_id = %self.id, from = %*phase, to = %next, "Phase transition");
        *phase = next;
        Ok(())
    }

    /// Enter `Failed` unless already terminal.
    pub fn fail(&self) {
        let mut phase = self.phase.lock();
        if !phase.is_terminal() {
            warn!(agent_id = %self.id, from = %*phase, "Session failed");
            *phase = SessionPhase::Failed;
        }
    }

    async fn planning_failed(&self, reason: String, query: &str) -> ConclaveError {
        if let Err(e) = self.logger.log_error(&reason, json!({"query": query})).await {
            warn!(error = %e, "Failed to log planning error");
        }
        self.fail();
        ConclaveError::Planning(reason)
    }

    /// Decompose `query` into tasks and record the plan in shared state.
    pub async fn plan(&self, query: &str) -> ConclaveResult<Plan> {
        if self.phase() != SessionPhase::Planning {
            return Err(ConclaveError::Orchestrator(format!(
                "cannot plan in phase {}",
                self.phase()
            )));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(self
                .planning_failed("query must not be empty".into(), query)
                .await);
        }

        let complexity = QueryComplexity::estimate(query);
        self.logger
            .log_decision(
                "complexity_assessed",
                json!({"query": query, "complexity": complexity}),
            )
            .await?;

        let parsed = match self.backend.complete(&planning_prompt(query, complexity)).await {
            Ok(text) => parse_task_list(&text, query, complexity),
            Err(e) => {
                warn!(agent_id = %self.id, error = %e, "Planning completion failed");
                None
            }
        };

        let (tasks, from_model) = match parsed {
            Some(tasks) => (tasks, true),
            None if self.heuristic_fallback => {
                self.logger
                    .log_decision(
                        "template_plan",
                        json!({"reason": "model plan unusable", "complexity": complexity}),
                    )
                    .await?;
                (template_plan(query, complexity), false)
            }
            None => {
                return Err(self
                    .planning_failed("completion service returned no usable plan".into(), query)
                    .await)
            }
        };

        self.state.store("original_query", json!(query)).await?;
        self.state
            .store("research_plan", serde_json::to_value(&tasks)?)
            .await?;
        self.state.store("complexity", json!(complexity)).await?;

        let outline: Vec<Value> = tasks
            .iter()
            .map(|t| json!({"id": t.id, "role": t.role, "description": t.description}))
            .collect();
        self.logger
            .log_decision(
                "plan_created",
                json!({"task_count": tasks.len(), "from_model": from_model, "tasks": outline}),
            )
            .await?;
        self.bus.publish(
            self.id.clone(),
            BROADCAST,
            json!({"event": "plan", "complexity": complexity, "tasks": outline}),
            MessageKind::Control,
        );

        info!(
            agent_id = %self.id,
            complexity = %complexity,
            task_count = tasks.len(),
            from_model,
            "Plan ready"
        );
        Ok(Plan {
            complexity,
            tasks,
            from_model,
        })
    }

    /// Merge results into the final answer. Requires a result for every task.
    pub async fn synthesize(
        &self,
        query: &str,
        tasks: &[Task],
        results: &[TaskResult],
    ) -> ConclaveResult<Synthesis> {
        self.transition(SessionPhase::Synthesizing)?;

        let by_id: BTreeMap<u32, &TaskResult> = results.iter().map(|r| (r.task_id, r)).collect();
        let missing: Vec<u32> = tasks
            .iter()
            .map(|t| t.id)
            .filter(|id| !by_id.contains_key(id))
            .collect();
        if !missing.is_empty() {
            let reason = format!("missing results for tasks {missing:?}");
            if let Err(e) = self.logger.log_error(&reason, json!({"missing": missing})).await {
                warn!(error = %e, "Failed to log synthesis error");
            }
            self.fail();
            return Err(ConclaveError::Orchestrator(reason));
        }

        let descriptions: BTreeMap<u32, &str> =
            tasks.iter().map(|t| (t.id, t.description.as_str())).collect();
        let ordered: Vec<&TaskResult> = by_id.values().copied().collect();

        let mut sources: Vec<String> = Vec::new();
        for result in &ordered {
            for source in &result.sources {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
        }

        let gaps = self.collect_gaps(tasks, &ordered, &descriptions);
        let contradictions = find_contradictions(&ordered);

        let summary = match self
            .backend
            .complete(&summary_prompt(query, &ordered))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_summary(query, &ordered, &gaps, &contradictions),
            Err(e) => {
                warn!(agent_id = %self.id, error = %e, "Summary completion failed, using fallback");
                fallback_summary(query, &ordered, &gaps, &contradictions)
            }
        };

        let text = render(
            query,
            &summary,
            &ordered,
            &descriptions,
            &contradictions,
            &gaps,
            &sources,
        );

        self.logger
            .log_decision(
                "synthesis_complete",
                json!({
                    "results": ordered.len(),
                    "sources": sources.len(),
                    "gaps": gaps.len(),
                    "contradictions": contradictions.len(),
                }),
            )
            .await?;
        self.transition(SessionPhase::Done)?;

        Ok(Synthesis {
            text,
            summary,
            sources,
            gaps,
            contradictions,
        })
    }

    fn collect_gaps(
        &self,
        tasks: &[Task],
        ordered: &[&TaskResult],
        descriptions: &BTreeMap<u32, &str>,
    ) -> BTreeSet<String> {
        let mut gaps: BTreeSet<String> = ordered
            .iter()
            .flat_map(|r| r.gaps.iter().cloned())
            .collect();

        for result in ordered {
            if result.confidence < self.low_confidence_threshold {
                gaps.insert(format!(
                    "low confidence ({:.2}) for task {} ({}): {}",
                    result.confidence,
                    result.task_id,
                    result.role,
                    descriptions.get(&result.task_id).copied().unwrap_or_default()
                ));
            }
        }

        let planned: BTreeSet<AgentRole> = tasks.iter().map(|t| t.role).collect();
        for role in planned {
            let usable = ordered
                .iter()
                .any(|r| r.role == role && !r.findings.trim().is_empty());
            if !usable {
                gaps.insert(format!("no usable findings from the {role} role"));
            }
        }
        gaps
    }
}

fn summary_prompt(query: &str, ordered: &[&TaskResult]) -> String {
    let mut prompt = format!(
        "You are the lead agent of a multi-agent research system.\n\
         Write a concise summary (one or two paragraphs) answering: \"{query}\"\n\
         \n\
         Use only these findings:\n"
    );
    for result in ordered {
        let _ = write!(
            prompt,
            "\n[{} task {}, confidence {:.2}]\n{}\n",
            result.role, result.task_id, result.confidence, result.findings
        );
    }
    prompt.push_str("\nWhere findings disagree, say so instead of choosing a side.");
    prompt
}

fn fallback_summary(
    query: &str,
    ordered: &[&TaskResult],
    gaps: &BTreeSet<String>,
    contradictions: &[Contradiction],
) -> String {
    let with_findings = ordered
        .iter()
        .filter(|r| !r.findings.trim().is_empty())
        .count();
    let mean = if ordered.is_empty() {
        0.0
    } else {
        ordered.iter().map(|r| r.confidence).sum::<f32>() / ordered.len() as f32
    };
    format!(
        "Research on \"{query}\" ran {} tasks; {with_findings} returned findings \
         (mean confidence {mean:.2}). {} gaps and {} contradictions were recorded.",
        ordered.len(),
        gaps.len(),
        contradictions.len()
    )
}

fn render(
    query: &str,
    summary: &str,
    ordered: &[&TaskResult],
    descriptions: &BTreeMap<u32, &str>,
    contradictions: &[Contradiction],
    gaps: &BTreeSet<String>,
    sources: &[String],
) -> String {
    let mut out = format!("# Research synthesis: {query}\n\n## Summary\n\n{summary}\n\n## Findings\n");

    for role in AgentRole::ALL {
        let group: Vec<&&TaskResult> = ordered.iter().filter(|r| r.role == role).collect();
        if group.is_empty() {
            continue;
        }
        let _ = write!(out, "\n### {}\n", capitalize(role.as_str()));
        for result in group {
            let _ = write!(
                out,
                "\n**Task {}** (confidence {:.2}): {}\n\n",
                result.task_id,
                result.confidence,
                descriptions.get(&result.task_id).copied().unwrap_or_default()
            );
            if result.findings.trim().is_empty() {
                out.push_str("_No findings._\n");
            } else {
                out.push_str(&result.findings);
                out.push('\n');
            }
        }
    }

    if !contradictions.is_empty() {
        out.push_str("\n## Contradictions\n\n");
        for c in contradictions {
            if let Some(topic) = &c.topic {
                let _ = writeln!(out, "- On \"{topic}\":");
            } else {
                out.push_str("- Conflicting statements:\n");
            }
            let _ = writeln!(out, "  - Task {}: \"{}\"", c.first_task, c.first);
            let _ = writeln!(out, "  - Task {}: \"{}\"", c.second_task, c.second);
        }
    }

    if !gaps.is_empty() {
        out.push_str("\n## Gaps\n\n");
        for gap in gaps {
            let _ = writeln!(out, "- {gap}");
        }
    }

    if !sources.is_empty() {
        out.push_str("\n## Sources\n\n");
        for (i, source) in sources.iter().enumerate() {
            let _ = writeln!(out, "{}. {source}", i + 1);
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Split findings into sentences and list items, trimmed of bullets.
fn statements(findings: &str) -> Vec<&str> {
    fn push<'a>(out: &mut Vec<&'a str>, raw: &'a str) {
        let s = raw
            .trim()
            .trim_start_matches(['-', '*', '•'])
            .trim();
        if !s.is_empty() {
            out.push(s);
        }
    }

    let mut out = Vec::new();
    for line in findings.lines() {
        let mut start = 0;
        let mut chars = line.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let boundary = matches!(c, '.' | '!' | '?')
                && chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if boundary {
                let end = i + c.len_utf8();
                push(&mut out, &line[start..end]);
                start = end;
            }
        }
        push(&mut out, &line[start..]);
    }
    out
}

/// Lowercased words without negations, plus how many negations were removed.
fn normalize(statement: &str) -> (Vec<String>, usize) {
    let mut words = Vec::new();
    let mut negations = 0;
    for raw in statement.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '’')) {
        let word = raw.to_lowercase().replace('’', "'");
        let word = word.trim_matches('\'');
        if word.is_empty() {
            continue;
        }
        if word == "cannot" {
            negations += 1;
            words.push("can".to_string());
        } else if NEGATIONS.contains(&word) {
            negations += 1;
        } else if let Some(stem) = word.strip_suffix("n't") {
            negations += 1;
            let stem = match stem {
                "ca" => "can",
                "wo" => "will",
                "sha" => "shall",
                other => other,
            };
            words.push(stem.to_string());
        } else {
            words.push(word.to_string());
        }
    }
    (words, negations)
}

/// Statement pairs that differ only by negation, and same-topic results with
/// differing findings. Only pairs from different tasks are reported.
fn find_contradictions(ordered: &[&TaskResult]) -> Vec<Contradiction> {
    let mut found = Vec::new();

    let normalized: Vec<Vec<(&str, Vec<String>, usize)>> = ordered
        .iter()
        .map(|r| {
            statements(&r.findings)
                .into_iter()
                .map(|s| {
                    let (words, negations) = normalize(s);
                    (s, words, negations)
                })
                .filter(|(_, words, _)| words.len() >= MIN_STATEMENT_WORDS)
                .collect()
        })
        .collect();

    for i in 0..ordered.len() {
        for j in (i + 1)..ordered.len() {
            for (left, left_words, left_neg) in &normalized[i] {
                for (right, right_words, right_neg) in &normalized[j] {
                    if left_words == right_words && left_neg % 2 != right_neg % 2 {
                        found.push(Contradiction {
                            topic: None,
                            first_task: ordered[i].task_id,
                            first: (*left).to_string(),
                            second_task: ordered[j].task_id,
                            second: (*right).to_string(),
                        });
                    }
                }
            }

            let (a, b) = (ordered[i], ordered[j]);
            if let (Some(ta), Some(tb)) = (a.topic(), b.topic()) {
                let (fa, fb) = (a.findings.trim(), b.findings.trim());
                if ta.eq_ignore_ascii_case(tb) && !fa.is_empty() && !fb.is_empty() && fa != fb {
                    found.push(Contradiction {
                        topic: Some(ta.to_string()),
                        first_task: a.task_id,
                        first: fa.to_string(),
                        second_task: b.task_id,
                        second: fb.to_string(),
                    });
                }
            }
        }
    }
    found
}
