use crate::profiles::behavior_for;
use crate::report::find_json;
use crate::types::{AgentRole, Task};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Words beyond which a query is treated as complex.
const COMPLEX_WORD_COUNT: usize = 25;

static COMPARISON_MARKERS: OnceLock<Option<Regex>> = OnceLock::new();
static DEPTH_MARKERS: OnceLock<Option<Regex>> = OnceLock::new();

fn comparison_markers() -> Option<&'static Regex> {
    COMPARISON_MARKERS
        .get_or_init(|| {
            Regex::new(r"(?i)\b(compare|comparing|comparison|vs\.?|versus|difference between|better than)\b").ok()
        })
        .as_ref()
}

fn depth_markers() -> Option<&'static Regex> {
    DEPTH_MARKERS
        .get_or_init(|| {
            Regex::new(r"(?i)\b(analy[sz]e|impact|trends|comprehensive|in-depth|evaluate|landscape)\b").ok()
        })
        .as_ref()
}

/// How much work a query warrants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
}

/// Task-count and per-task operation bounds for a complexity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanBand {
    pub min_tasks: usize,
    pub max_tasks: usize,
    pub min_ops: u32,
    pub max_ops: u32,
    pub default_ops: u32,
}

impl QueryComplexity {
    /// Estimate from the query text.
    ///
    /// Depth markers or a long query mean `Complex`; comparison markers mean
    /// `Moderate`; anything else is `Simple`.
    pub fn estimate(query: &str) -> Self {
        let words = query.split_whitespace().count();
        let has = |re: Option<&Regex>| re.is_some_and(|re| re.is_match(query));

        if words > COMPLEX_WORD_COUNT || has(depth_markers()) {
            QueryComplexity::Complex
        } else if has(comparison_markers()) {
            QueryComplexity::Moderate
        } else {
            QueryComplexity::Simple
        }
    }

    pub fn band(&self) -> PlanBand {
        match self {
            QueryComplexity::Simple => PlanBand {
                min_tasks: 1,
                max_tasks: 1,
                min_ops: 3,
                max_ops: 10,
                default_ops: 8,
            },
            QueryComplexity::Moderate => PlanBand {
                min_tasks: 2,
                max_tasks: 3,
                min_ops: 10,
                max_ops: 15,
                default_ops: 12,
            },
            QueryComplexity::Complex => PlanBand {
                min_tasks: 4,
                max_tasks: 6,
                min_ops: 15,
                max_ops: 30,
                default_ops: 18,
            },
        }
    }
}

impl std::fmt::Display for QueryComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryComplexity::Simple => "simple",
            QueryComplexity::Moderate => "moderate",
            QueryComplexity::Complex => "complex",
        };
        f.write_str(name)
    }
}

/// Prompt asking the completion service for a JSON task list.
pub fn planning_prompt(query: &str, complexity: QueryComplexity) -> String {
    let band = complexity.band();
    format!(
        "You are the lead agent of a multi-agent research system.\n\
         \n\
         User query: \"{query}\"\n\
         \n\
         The query was assessed as {complexity}. Split it into {min}-{max} specific \
         subtasks that can be researched in parallel.\n\
         \n\
         For each subtask define:\n\
         1. description: exactly what to investigate (period, regions, metrics, source types)\n\
         2. role: one of researcher, analyzer, writer, critic, verifier\n\
         3. tools: from web_search, academic_search, data_analysis\n\
         4. max_sub_operations: between {min_ops} and {max_ops}\n\
         5. success_criteria: clear and measurable\n\
         6. output_format: the expected shape of the findings\n\
         \n\
         Avoid vague instructions.\n\
         Reply with a JSON array of task objects only.",
        min = band.min_tasks,
        max = band.max_tasks,
        min_ops = band.min_ops,
        max_ops = band.max_ops,
    )
}

/// Deterministic plan for a complexity level.
pub fn template_plan(query: &str, complexity: QueryComplexity) -> Vec<Task> {
    let specs: &[(AgentRole, &str, &str)] = match complexity {
        QueryComplexity::Simple => &[(
            AgentRole::Researcher,
            "Find the key facts that answer: ",
            "A direct answer backed by at least 2 sources",
        )],
        QueryComplexity::Moderate => &[
            (
                AgentRole::Researcher,
                "Investigate the technical aspects of: ",
                "Identify 5+ key technical points with supporting data",
            ),
            (
                AgentRole::Analyzer,
                "Analyze quantitative data and trends for: ",
                "Adoption or performance figures with sources",
            ),
        ],
        QueryComplexity::Complex => &[
            (
                AgentRole::Researcher,
                "Investigate the technical aspects of: ",
                "Identify 5+ key technical points with supporting data",
            ),
            (
                AgentRole::Analyzer,
                "Analyze quantitative data and trends for: ",
                "Adoption or performance figures with sources and dates",
            ),
            (
                AgentRole::Critic,
                "Identify weaknesses, trade-offs and conflicting evidence about: ",
                "Main risks and disputed claims listed with both sides",
            ),
            (
                AgentRole::Verifier,
                "Cross-check the central claims about: ",
                "Each central claim marked confirmed, disputed or unverified",
            ),
        ],
    };

    let band = complexity.band();
    specs
        .iter()
        .enumerate()
        .map(|(i, (role, prefix, criteria))| {
            let behavior = behavior_for(*role);
            Task::new(i as u32 + 1, format!("{prefix}{query}"), *role)
                .with_tools(behavior.default_tools().iter().copied())
                .with_max_sub_operations(band.default_ops)
                .with_success_criteria(*criteria)
                .with_output_format(behavior.default_output_format())
        })
        .collect()
}

fn parse_task(value: &Value, fallback_ops: u32) -> Option<Task> {
    let obj = value.as_object()?;
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())?;

    let role = obj
        .get("role")
        .or_else(|| obj.get("agent_role"))
        .and_then(Value::as_str)
        .and_then(AgentRole::parse)
        .filter(|r| *r != AgentRole::Lead)
        .unwrap_or(AgentRole::Researcher);

    let tools: Vec<String> = obj
        .get("tools")
        .or_else(|| obj.get("allowed_tools"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let ops = obj
        .get("max_sub_operations")
        .or_else(|| obj.get("max_searches"))
        .and_then(Value::as_u64)
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or(fallback_ops);

    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Some(
        Task::new(0, description, role)
            .with_tools(tools)
            .with_max_sub_operations(ops)
            .with_success_criteria(text("success_criteria"))
            .with_output_format(text("output_format")),
    )
}

/// Parse a model-proposed task list and normalise it to `complexity`'s band.
///
/// Accepts a JSON array or an object with a `tasks` array, optionally inside
/// a fenced block. Returns `None` when nothing usable is found. Lists longer
/// than the band are truncated; shorter ones are topped up from the template
/// plan. Ids are renumbered `1..=N` and budgets clamped to the band.
pub fn parse_task_list(text: &str, query: &str, complexity: QueryComplexity) -> Option<Vec<Task>> {
    let band = complexity.band();
    let json = find_json(text)?;
    let items = match &json {
        Value::Array(items) => items.clone(),
        Value::Object(obj) => obj.get("tasks")?.as_array()?.clone(),
        _ => return None,
    };

    let mut tasks: Vec<Task> = items
        .iter()
        .filter_map(|item| parse_task(item, band.default_ops))
        .take(band.max_tasks)
        .collect();
    if tasks.is_empty() {
        return None;
    }

    if tasks.len() < band.min_tasks {
        let template = template_plan(query, complexity);
        for extra in template.into_iter().skip(tasks.len()) {
            if tasks.len() >= band.min_tasks {
                break;
            }
            tasks.push(extra);
        }
    }

    for (i, task) in tasks.iter_mut().enumerate() {
        task.id = i as u32 + 1;
        task.max_sub_operations = task.max_sub_operations.clamp(band.min_ops, band.max_ops);
    }
    Some(tasks)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_estimate() {
        assert_eq!(QueryComplexity::estimate("What is Rust?"), QueryComplexity::Simple);
        assert_eq!(QueryComplexity::estimate("compare A and B"), QueryComplexity::Moderate);
        assert_eq!(QueryComplexity::estimate("Tokio vs async-std"), QueryComplexity::Moderate);
        assert_eq!(
            QueryComplexity::estimate("What is the difference between TCP and UDP"),
            QueryComplexity::Moderate
        );
        assert_eq!(
            QueryComplexity::estimate("Analyze the impact of AI on software jobs"),
            QueryComplexity::Complex
        );
        let long = "word ".repeat(26);
        assert_eq!(QueryComplexity::estimate(&long), QueryComplexity::Complex);
        // Marker words only count as whole words.
        assert_eq!(QueryComplexity::estimate("canvas painting"), QueryComplexity::Simple);
    }

    #[test]
    fn test_template_plans_respect_bands() {
        for complexity in [
            QueryComplexity::Simple,
            QueryComplexity::Moderate,
            QueryComplexity::Complex,
        ] {
            let band = complexity.band();
            let tasks = template_plan("q", complexity);
            assert!(tasks.len() >= band.min_tasks && tasks.len() <= band.max_tasks);
            for (i, task) in tasks.iter().enumerate() {
                assert_eq!(task.id, i as u32 + 1);
                assert!(task.max_sub_operations >= band.min_ops);
                assert!(task.max_sub_operations <= band.max_ops);
                assert!(!task.allowed_tools.is_empty());
            }
        }
    }

    #[test]
    fn test_parse_task_list_normalises() {
        let text = r#"```json
[
  {"description": "Benchmark A", "role": "analyzer", "tools": ["data_analysis"], "max_sub_operations": 40},
  {"description": "Survey B", "role": "lead", "max_searches": 2},
  {"description": "   "},
  {"description": "Extra 1"},
  {"description": "Extra 2"}
]
```"#;
        let tasks = parse_task_list(text, "compare A and B", QueryComplexity::Moderate).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(tasks[0].role, AgentRole::Analyzer);
        assert_eq!(tasks[0].max_sub_operations, 15);
        assert_eq!(tasks[1].role, AgentRole::Researcher);
        assert_eq!(tasks[1].max_sub_operations, 10);
        assert_eq!(tasks[2].description, "Extra 1");
    }

    #[test]
    fn test_parse_task_list_tops_up_short_plans() {
        let text = r#"{"tasks": [{"description": "Only one"}]}"#;
        let tasks = parse_task_list(text, "q", QueryComplexity::Complex).unwrap();
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[0].description, "Only one");
        assert_eq!(tasks[1].role, AgentRole::Analyzer);
        assert!(tasks.iter().all(|t| t.max_sub_operations >= 15));
    }

    #[test]
    fn test_parse_task_list_rejects_garbage() {
        assert!(parse_task_list("no plan here", "q", QueryComplexity::Simple).is_none());
        assert!(parse_task_list("[]", "q", QueryComplexity::Simple).is_none());
        assert!(parse_task_list(r#"[{"role": "critic"}]"#, "q", QueryComplexity::Simple).is_none());
    }

    #[test]
    fn test_planning_prompt_mentions_band() {
        let prompt = planning_prompt("compare A and B", QueryComplexity::Moderate);
        assert!(prompt.contains("2-3"));
        assert!(prompt.contains("between 10 and 15"));
        assert!(prompt.contains("compare A and B"));
    }
}
