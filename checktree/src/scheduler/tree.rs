//! Textual tree summaries of finished jobs.
//!
//! Each completed run is rendered once and stored with its history entry:
//!
//! ```text
//! Service: payments (check)
//! ├── Status: completed
//! ├── Duration: 2.013s
//! └── Steps:
//!     ├── dnsHandler
//!     │   ├── Status: completed
//!     │   └── Duration: 1.204s
//!     └── githubHandler
//!         ├── Status: completed
//!         └── Duration: 0.809s
//! ```

use super::progress::ProgressSnapshot;
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Renders the tree summary for a progress snapshot.
///
/// Steps are emitted in sorted order so output is stable across runs.
pub fn render_tree(snapshot: &ProgressSnapshot) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Service: {} ({})",
        snapshot.service_name, snapshot.process_type
    );
    let _ = writeln!(out, "├── Status: {}", status_label(snapshot));
    let _ = writeln!(
        out,
        "├── Duration: {}",
        format_duration(snapshot.start_time, snapshot.last_updated)
    );
    let _ = writeln!(out, "└── Steps:");

    let last_index = snapshot.steps.len().saturating_sub(1);
    for (index, (step_id, step)) in snapshot.steps.iter().enumerate() {
        let (prefix, child_prefix) = if index == last_index {
            ("    └──", "        ")
        } else {
            ("    ├──", "    │   ")
        };

        let _ = writeln!(out, "{prefix} {step_id}");
        let _ = writeln!(
            out,
            "{child_prefix}├── Status: {}",
            serde_variant_name(step.status)
        );
        let duration = match (step.start_time, step.end_time) {
            (None, _) => "Not started".to_string(),
            (Some(_), None) => "In progress".to_string(),
            (Some(start), Some(end)) => format_duration(start, end),
        };
        let _ = writeln!(out, "{child_prefix}└── Duration: {duration}");
    }

    out
}

fn status_label(snapshot: &ProgressSnapshot) -> String {
    let base = match snapshot.status {
        super::progress::JobStatus::Initializing => "initializing",
        super::progress::JobStatus::Processing => "processing",
        super::progress::JobStatus::Completed => "completed",
        super::progress::JobStatus::Failed => "failed",
    };
    if snapshot.partial_failure {
        format!("{base} (partial failure)")
    } else {
        base.to_string()
    }
}

fn serde_variant_name(status: super::progress::StepStatus) -> &'static str {
    match status {
        super::progress::StepStatus::Pending => "pending",
        super::progress::StepStatus::Completed => "completed",
        super::progress::StepStatus::Failed => "failed",
    }
}

fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let millis = (end - start).num_milliseconds().max(0);
    format!("{}.{:03}s", millis / 1000, millis % 1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::progress::ServiceProgress;
    use crate::scheduler::types::{OutcomeStatus, StepOutcome};

    #[test]
    fn test_tree_contains_service_and_steps() {
        let progress = ServiceProgress::new(
            "payments",
            "check",
            ["dnsHandler".to_string(), "githubHandler".to_string()],
        );
        progress.begin_run(&["dnsHandler".to_string(), "githubHandler".to_string()]);
        progress.finish_step(
            "dnsHandler",
            StepOutcome::now(OutcomeStatus::Completed, "ok"),
        );
        progress.complete();

        let tree = render_tree(&progress.snapshot());
        assert!(tree.starts_with("Service: payments (check)"));
        assert!(tree.contains("├── Status: completed"));
        assert!(tree.contains("dnsHandler"));
        assert!(tree.contains("githubHandler"));
        // githubHandler never started in this run.
        assert!(tree.contains("Not started"));
    }

    #[test]
    fn test_last_step_uses_corner_connector() {
        let progress =
            ServiceProgress::new("payments", "check", ["aHandler".to_string(), "bHandler".to_string()]);
        let tree = render_tree(&progress.snapshot());
        assert!(tree.contains("    ├── aHandler"));
        assert!(tree.contains("    └── bHandler"));
    }

    #[test]
    fn test_partial_failure_surfaces_in_status_line() {
        let progress = ServiceProgress::new("payments", "check", ["aHandler".to_string()]);
        progress.begin_run(&["aHandler".to_string()]);
        progress.fail_step("aHandler", "boom");
        progress.complete();

        let tree = render_tree(&progress.snapshot());
        assert!(tree.contains("completed (partial failure)"));
    }
}
