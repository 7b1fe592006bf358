use crate::types::{AgentRole, Task};

/// Per-role behavior: default tools, focus, and how prompts are phrased.
///
/// One implementation per [`AgentRole`], selected through [`behavior_for`].
pub trait RoleBehavior: Send + Sync {
    fn role(&self) -> AgentRole;

    /// Tools granted when a plan does not name any.
    fn default_tools(&self) -> &'static [&'static str];

    /// Role-specific directive placed in every instruction.
    fn focus(&self) -> &'static str;

    /// Criteria used when a plan leaves them empty.
    fn default_success_criteria(&self) -> &'static str;

    /// Output format used when a plan leaves it empty.
    fn default_output_format(&self) -> &'static str;

    /// First prompt sent for `task`.
    fn instruction(&self, task: &Task) -> String {
        let tools = if task.allowed_tools.is_empty() {
            self.default_tools().join(", ")
        } else {
            task.allowed_tools.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        let criteria = non_empty_or(&task.success_criteria, self.default_success_criteria());
        let output_format = non_empty_or(&task.output_format, self.default_output_format());

        format!(
            "You are a specialized {role} agent in a multi-agent research system.\n\
             \n\
             TASK: {description}\n\
             \n\
             FOCUS: {focus}\n\
             AVAILABLE TOOLS: {tools}\n\
             OPERATION BUDGET: {budget}\n\
             SUCCESS CRITERIA: {criteria}\n\
             EXPECTED FORMAT: {output_format}\n\
             \n\
             If you find contradictory information, report both versions.\n\
             If information is missing, report it as a gap.\n\
             \n\
             {report}",
            role = self.role(),
            description = task.description,
            focus = self.focus(),
            budget = task.max_sub_operations,
            report = REPORT_FORMAT,
        )
    }

    /// Prompt for a further operation when the criteria are not yet met.
    fn follow_up(&self, task: &Task, findings_so_far: &str, operation: u32) -> String {
        let criteria = non_empty_or(&task.success_criteria, self.default_success_criteria());
        format!(
            "You are a specialized {role} agent continuing work on: {description}\n\
             \n\
             This is operation {operation} of {budget}.\n\
             FINDINGS SO FAR:\n{findings_so_far}\n\
             \n\
             The success criteria are not met yet: {criteria}\n\
             Extend the findings. Do not repeat what is already known.\n\
             \n\
             {report}",
            role = self.role(),
            description = task.description,
            budget = task.max_sub_operations,
            report = REPORT_FORMAT,
        )
    }
}

const REPORT_FORMAT: &str = "\
Reply with a single JSON object:
{\"findings\": string, \"sources\": [string], \"confidence\": number between 0 and 1, \
\"gaps\": [string], \"criteria_met\": boolean, \"topic\": string (optional)}";

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

struct LeadBehavior;
struct ResearcherBehavior;
struct AnalyzerBehavior;
struct WriterBehavior;
struct CriticBehavior;
struct VerifierBehavior;

impl RoleBehavior for LeadBehavior {
    fn role(&self) -> AgentRole {
        AgentRole::Lead
    }
    fn default_tools(&self) -> &'static [&'static str] {
        &["memory_search"]
    }
    fn focus(&self) -> &'static str {
        "Decompose the question, then integrate partial answers into one coherent view."
    }
    fn default_success_criteria(&self) -> &'static str {
        "Every part of the question is covered by at least one finding"
    }
    fn default_output_format(&self) -> &'static str {
        "Structured outline"
    }
}

impl RoleBehavior for ResearcherBehavior {
    fn role(&self) -> AgentRole {
        AgentRole::Researcher
    }
    fn default_tools(&self) -> &'static [&'static str] {
        &["web_search", "academic_search"]
    }
    fn focus(&self) -> &'static str {
        "Collect concrete facts with a source for each claim. Prefer primary sources."
    }
    fn default_success_criteria(&self) -> &'static str {
        "At least 5 key points, each backed by a source"
    }
    fn default_output_format(&self) -> &'static str {
        "Structured list with specific examples"
    }
}

impl RoleBehavior for AnalyzerBehavior {
    fn role(&self) -> AgentRole {
        AgentRole::Analyzer
    }
    fn default_tools(&self) -> &'static [&'static str] {
        &["web_search", "data_analysis"]
    }
    fn focus(&self) -> &'static str {
        "Find quantitative data: figures, adoption numbers, time series. State the period covered."
    }
    fn default_success_criteria(&self) -> &'static str {
        "Quantitative data points with sources and dates"
    }
    fn default_output_format(&self) -> &'static str {
        "Quantitative analysis with statistics"
    }
}

impl RoleBehavior for WriterBehavior {
    fn role(&self) -> AgentRole {
        AgentRole::Writer
    }
    fn default_tools(&self) -> &'static [&'static str] {
        &["memory_search"]
    }
    fn focus(&self) -> &'static str {
        "Turn the material into clear prose for a technical reader. Keep every claim attributable."
    }
    fn default_success_criteria(&self) -> &'static str {
        "A readable draft that covers the task"
    }
    fn default_output_format(&self) -> &'static str {
        "Markdown sections"
    }
}

impl RoleBehavior for CriticBehavior {
    fn role(&self) -> AgentRole {
        AgentRole::Critic
    }
    fn default_tools(&self) -> &'static [&'static str] {
        &["web_search"]
    }
    fn focus(&self) -> &'static str {
        "Look for weak evidence, trade-offs and claims that conflict with each other."
    }
    fn default_success_criteria(&self) -> &'static str {
        "Main weaknesses and conflicting claims identified"
    }
    fn default_output_format(&self) -> &'static str {
        "List of issues, each with the evidence on both sides"
    }
}

impl RoleBehavior for VerifierBehavior {
    fn role(&self) -> AgentRole {
        AgentRole::Verifier
    }
    fn default_tools(&self) -> &'static [&'static str] {
        &["web_search", "academic_search"]
    }
    fn focus(&self) -> &'static str {
        "Check the key claims against independent sources and say which ones hold."
    }
    fn default_success_criteria(&self) -> &'static str {
        "Each key claim marked confirmed, disputed or unverified"
    }
    fn default_output_format(&self) -> &'static str {
        "Claim-by-claim verification list"
    }
}

static BEHAVIORS: [&dyn RoleBehavior; 6] = [
    &LeadBehavior,
    &ResearcherBehavior,
    &AnalyzerBehavior,
    &WriterBehavior,
    &CriticBehavior,
    &VerifierBehavior,
];

/// The behavior implementation for `role`.
pub fn behavior_for(role: AgentRole) -> &'static dyn RoleBehavior {
    let idx = match role {
        AgentRole::Lead => 0,
        AgentRole::Researcher => 1,
        AgentRole::Analyzer => 2,
        AgentRole::Writer => 3,
        AgentRole::Critic => 4,
        AgentRole::Verifier => 5,
    };
    BEHAVIORS[idx]
}
