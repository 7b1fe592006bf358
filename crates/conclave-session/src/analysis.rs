use crate::event::{Event, EventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate statistics over a set of events.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogAnalysis {
    pub total_events: usize,
    /// Event count keyed by the snake_case event type name.
    pub counts_by_type: BTreeMap<String, usize>,
    pub total_tool_calls: usize,
    pub total_errors: usize,
    pub tasks_completed: usize,
    /// Mean `confidence` of `task_complete` events, rounded to two decimals.
    pub avg_task_confidence: f64,
    /// Earliest and latest event timestamps.
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Compute [`LogAnalysis`] over `events` (any order).
pub fn analyze(events: &[Event]) -> LogAnalysis {
    let mut analysis = LogAnalysis {
        total_events: events.len(),
        ..LogAnalysis::default()
    };

    let mut confidence_sum = 0.0;
    for event in events {
        *analysis
            .counts_by_type
            .entry(event.event_type.to_string())
            .or_insert(0) += 1;

        match event.event_type {
            EventType::ToolCall => analysis.total_tool_calls += 1,
            EventType::Error => analysis.total_errors += 1,
            EventType::TaskComplete => {
                analysis.tasks_completed += 1;
                confidence_sum += event
                    .get("confidence")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
            }
            _ => {}
        }

        analysis.time_range = Some(match analysis.time_range {
            None => (event.timestamp, event.timestamp),
            Some((first, last)) => (first.min(event.timestamp), last.max(event.timestamp)),
        });
    }

    if analysis.tasks_completed > 0 {
        let avg = confidence_sum / analysis.tasks_completed as f64;
        analysis.avg_task_confidence = (avg * 100.0).round() / 100.0;
    }
    analysis
}
