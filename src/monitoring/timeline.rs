//! Execution Timeline
//!
//! Tracks node visits during a run for execution reports. Loops visit the
//! same node many times, so durations accumulate across visits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Node started executing
    Entered,
    /// Node finished and transitioned normally
    Completed,
    /// Node failed and a catch clause took over
    Caught,
    /// Node failed with no matching catch clause, or a Fail node was reached
    Failed,
    /// A fan-out node started work on the item at this index
    Iteration(usize),
}

/// A single event in the execution timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub node_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Tracks the execution timeline of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    started_at: DateTime<Utc>,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Records an event for a node.
    pub fn add_event(&mut self, node_id: impl Into<String>, event_type: EventType) {
        self.push(node_id.into(), event_type, None);
    }

    /// Records an event with a short explanation (error cause, branch target).
    pub fn add_event_with_detail(
        &mut self,
        node_id: impl Into<String>,
        event_type: EventType,
        detail: impl Into<String>,
    ) {
        self.push(node_id.into(), event_type, Some(detail.into()));
    }

    fn push(&mut self, node_id: String, event_type: EventType, detail: Option<String>) {
        self.events.push(TimelineEvent {
            node_id,
            event_type,
            timestamp: Utc::now(),
            detail,
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// Node ids in the order they were entered.
    pub fn node_sequence(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.event_type == EventType::Entered)
            .map(|e| e.node_id.as_str())
            .collect()
    }

    /// How many times a node was entered.
    pub fn visits(&self, node_id: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.node_id == node_id && e.event_type == EventType::Entered)
            .count()
    }

    /// Item indices a fan-out node worked on, in order.
    pub fn iterations(&self, node_id: &str) -> Vec<usize> {
        self.events
            .iter()
            .filter(|e| e.node_id == node_id)
            .filter_map(|e| match e.event_type {
                EventType::Iteration(index) => Some(index),
                _ => None,
            })
            .collect()
    }

    /// Returns cumulative node durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, i64> {
        let mut open: HashMap<&str, DateTime<Utc>> = HashMap::new();
        let mut durations: HashMap<String, i64> = HashMap::new();

        for event in &self.events {
            match event.event_type {
                EventType::Entered => {
                    open.insert(event.node_id.as_str(), event.timestamp);
                }
                EventType::Completed | EventType::Caught | EventType::Failed => {
                    if let Some(start) = open.remove(event.node_id.as_str()) {
                        *durations.entry(event.node_id.clone()).or_insert(0) +=
                            (event.timestamp - start).num_milliseconds();
                    }
                }
                EventType::Iteration(_) => {}
            }
        }

        durations
    }

    /// Renders a per-node report: visits and cumulative time, in first-visit order.
    pub fn summary(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let durations = self.get_durations();
        let mut seen: Vec<&str> = Vec::new();
        for node_id in self.node_sequence() {
            if !seen.contains(&node_id) {
                seen.push(node_id);
            }
        }

        for node_id in seen {
            output.push_str(&format!(
                "{:32} visits: {:3}  ({} ms)\n",
                truncate(node_id, 32),
                self.visits(node_id),
                durations.get(node_id).copied().unwrap_or(0)
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", self.elapsed().num_milliseconds()));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.get_events().is_empty());
    }

    #[test]
    fn test_visits_and_sequence() {
        let mut timeline = ExecutionTimeline::new();
        for node in ["data_load_initial", "wait", "data_load_initial"] {
            timeline.add_event(node, EventType::Entered);
            timeline.add_event(node, EventType::Completed);
        }

        assert_eq!(timeline.visits("data_load_initial"), 2);
        assert_eq!(timeline.visits("wait"), 1);
        assert_eq!(timeline.visits("missing"), 0);
        assert_eq!(
            timeline.node_sequence(),
            vec!["data_load_initial", "wait", "data_load_initial"]
        );
    }

    #[test]
    fn test_iterations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("delete_in_sequence", EventType::Entered);
        timeline.add_event("delete_in_sequence", EventType::Iteration(0));
        timeline.add_event("delete_in_sequence", EventType::Iteration(1));
        timeline.add_event("other", EventType::Iteration(7));

        assert_eq!(timeline.iterations("delete_in_sequence"), vec![0, 1]);
    }

    #[test]
    fn test_get_durations_accumulate() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("a", EventType::Entered);
        timeline.add_event("a", EventType::Completed);
        timeline.add_event("a", EventType::Entered);
        timeline.add_event("a", EventType::Caught);
        timeline.add_event("b", EventType::Entered);

        let durations = timeline.get_durations();
        assert!(durations.contains_key("a"));
        assert!(!durations.contains_key("b"));
        assert!(durations["a"] >= 0);
    }

    #[test]
    fn test_detail_recorded() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event_with_detail("describe", EventType::Caught, "ResourceNotFound");

        let event = &timeline.get_events()[0];
        assert_eq!(event.event_type, EventType::Caught);
        assert_eq!(event.detail.as_deref(), Some("ResourceNotFound"));
    }

    #[test]
    fn test_summary_lists_nodes() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("notify_success", EventType::Entered);
        timeline.add_event("notify_success", EventType::Completed);

        let summary = timeline.summary();
        assert!(summary.contains("notify_success"));
        assert!(summary.contains("visits:   1"));
        assert!(summary.contains("Total:"));
    }

    #[test]
    fn test_serialization() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("fan", EventType::Iteration(2));

        let json = serde_json::to_string(&timeline).unwrap();
        let loaded: ExecutionTimeline = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.iterations("fan"), vec![2]);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}
