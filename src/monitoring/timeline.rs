//! Instance Timeline
//!
//! Renders the pointers of a finished (or running) instance as an ASCII
//! Gantt chart and per-step durations for execution reports.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::instance::{PointerStatus, WorkflowInstance};

/// Width of the chart area in characters.
const CHART_WIDTH: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub step_id: String,
    pub status: PointerStatus,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// 1 for the first attempt of the step
    pub attempt: u32,
}

impl TimelineEntry {
    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

#[derive(Debug, Clone)]
pub struct InstanceTimeline {
    origin: DateTime<Utc>,
    finish: DateTime<Utc>,
    entries: Vec<TimelineEntry>,
}

impl InstanceTimeline {
    /// Builds a timeline from pointers that have started, one entry per
    /// attempt.
    ///
    /// Pointers still running are drawn up to `now`.
    pub fn from_instance(instance: &WorkflowInstance, now: DateTime<Utc>) -> Self {
        let finish = instance.end_time.unwrap_or(now);

        let mut entries: Vec<TimelineEntry> = instance
            .pointers
            .iter()
            .filter_map(|p| {
                let start = p.start_time?;
                Some(TimelineEntry {
                    step_id: p.step_id.clone(),
                    status: p.status,
                    start,
                    end: p.end_time.unwrap_or(finish).max(start),
                    attempt: p.retry_count + 1,
                })
            })
            .collect();

        entries.sort_by_key(|e| e.start);

        Self {
            origin: instance.start_time,
            finish,
            entries,
        }
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn total_ms(&self) -> i64 {
        (self.finish - self.origin).num_milliseconds().max(0)
    }

    /// Step durations in milliseconds, summed over attempts.
    pub fn durations(&self) -> HashMap<String, i64> {
        let mut durations = HashMap::new();
        for entry in &self.entries {
            *durations.entry(entry.step_id.clone()).or_insert(0) += entry.duration_ms();
        }
        durations
    }

    /// Generates an ASCII Gantt chart.
    ///
    /// Each step is a bar positioned relative to the instance start.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total = self.total_ms();
        if total == 0 || self.entries.is_empty() {
            return output;
        }

        let scale = CHART_WIDTH / total as f64;

        for entry in &self.entries {
            let offset = (entry.start - self.origin).num_milliseconds().max(0);
            let start_pos = (offset as f64 * scale) as usize;
            let width = (entry.duration_ms() as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            let attempt = if entry.attempt > 1 {
                format!(", attempt {}", entry.attempt)
            } else {
                String::new()
            };

            output.push_str(&format!(
                "{:12} |{:width$}| {} ({} ms{})\n",
                truncate(&entry.step_id, 12),
                bar,
                entry.status,
                entry.duration_ms(),
                attempt,
                width = CHART_WIDTH as usize + 1
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total));
        output
    }
}

/// Pads or truncates a string to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    let count = s.chars().count();
    if count <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::StartRequest;
    use crate::workflow::{StepDefinition, WorkflowDefinition};
    use chrono::Duration;

    fn finished_instance() -> WorkflowInstance {
        let def = WorkflowDefinition::new("core", "Sample", "1")
            .with_step(StepDefinition::new("fetch"))
            .with_step(StepDefinition::new("transform").depends_on("fetch"))
            .with_step(StepDefinition::new("never"));
        let mut instance = WorkflowInstance::new(&def, StartRequest::default());
        let t0 = instance.start_time;

        let fetch = instance.pointer_mut("fetch").unwrap();
        fetch.mark_running(t0);
        fetch.mark_completed(t0 + Duration::milliseconds(100));

        let transform = instance.pointer_mut("transform").unwrap();
        transform.mark_running(t0 + Duration::milliseconds(100));
        transform.mark_completed(t0 + Duration::milliseconds(300));

        instance.close(t0 + Duration::milliseconds(300));
        instance
    }

    #[test]
    fn test_entries_skip_unstarted_pointers() {
        let timeline = InstanceTimeline::from_instance(&finished_instance(), Utc::now());
        assert_eq!(timeline.entries().len(), 2);
        assert_eq!(timeline.entries()[0].step_id, "fetch");
    }

    #[test]
    fn test_durations() {
        let timeline = InstanceTimeline::from_instance(&finished_instance(), Utc::now());
        let durations = timeline.durations();
        assert_eq!(durations["fetch"], 100);
        assert_eq!(durations["transform"], 200);
        assert_eq!(timeline.total_ms(), 300);
    }

    #[test]
    fn test_gantt_chart_generation() {
        let chart = InstanceTimeline::from_instance(&finished_instance(), Utc::now()).gantt_chart();
        assert!(chart.contains("fetch"));
        assert!(chart.contains("transform"));
        assert!(chart.contains("COMPLETED"));
        assert!(chart.contains("Total: 300 ms"));
    }

    #[test]
    fn test_retried_step_has_one_entry_per_attempt() {
        let def = WorkflowDefinition::new("core", "Sample", "1").with_step(StepDefinition::new("fetch"));
        let mut instance = WorkflowInstance::new(&def, StartRequest::default());
        let t0 = instance.start_time;

        let first = instance.pointer_mut("fetch").unwrap();
        first.mark_running(t0);
        first.mark_failed(t0 + Duration::milliseconds(40), "connection reset");
        let retry = first.next_attempt(t0 + Duration::milliseconds(50));
        instance.pointers.push(retry);

        let second = instance.pointer_mut("fetch").unwrap();
        second.mark_running(t0 + Duration::milliseconds(50));
        second.mark_completed(t0 + Duration::milliseconds(100));
        instance.close(t0 + Duration::milliseconds(100));

        let timeline = InstanceTimeline::from_instance(&instance, Utc::now());
        let attempts: Vec<_> = timeline.entries().iter().map(|e| (e.attempt, e.status)).collect();
        assert_eq!(
            attempts,
            vec![(1, PointerStatus::Failed), (2, PointerStatus::Completed)]
        );
        assert_eq!(timeline.durations()["fetch"], 90);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("FAILED (40 ms)"));
        assert!(chart.contains("COMPLETED (50 ms, attempt 2)"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let def = WorkflowDefinition::new("core", "Sample", "1").with_step(StepDefinition::new("a"));
        let instance = WorkflowInstance::new(&def, StartRequest::default());
        let chart = InstanceTimeline::from_instance(&instance, instance.start_time).gantt_chart();
        assert!(chart.contains("Timeline"));
        assert!(!chart.contains("Total"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 8), "short   ");
        assert_eq!(truncate("a_very_long_step_name", 12), "a_very_lo...");
    }
}
