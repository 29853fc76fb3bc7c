//! Prometheus metrics for the control plane: watchloop ticks, rule matches,
//! playbook run outcomes, and approval lifecycle counts.

use metrics::{counter, histogram};
use std::time::Instant;

/// Helper for tracking the duration of one watchloop tick or executor step.
pub struct LatencyTracker {
    start: Instant,
    operation: &'static str,
}

impl LatencyTracker {
    pub fn new(operation: &'static str) -> Self {
        Self { start: Instant::now(), operation }
    }

    pub fn finish_with_status(self, success: bool) {
        let duration = self.start.elapsed().as_secs_f64();
        let status = if success { "success" } else { "error" };
        histogram!("aiops_operation_duration_seconds", "operation" => self.operation, "status" => status)
            .record(duration);
    }
}

// =============================================================================
// Watchloop metrics
// =============================================================================

pub fn watchloop_tick_completed(duration_secs: f64, events_emitted: usize) {
    counter!("aiops_watchloop_ticks_total").increment(1);
    histogram!("aiops_watchloop_tick_duration_seconds").record(duration_secs);
    if events_emitted > 0 {
        counter!("aiops_watchloop_events_emitted_total").increment(events_emitted as u64);
    }
}

pub fn watchloop_tick_failed() {
    counter!("aiops_watchloop_tick_failures_total").increment(1);
}

pub fn watchloop_recovery_detected(category: &'static str) {
    counter!("aiops_watchloop_recoveries_total", "category" => category).increment(1);
}

// =============================================================================
// Rule engine / executor metrics
// =============================================================================

pub fn rule_matched(rule_id: &str, playbook_id: &str) {
    counter!(
        "aiops_rule_matches_total",
        "rule_id" => rule_id.to_string(),
        "playbook_id" => playbook_id.to_string()
    )
    .increment(1);
}

pub fn playbook_run_finished(playbook_id: &str, status: &'static str) {
    counter!(
        "aiops_playbook_runs_total",
        "playbook_id" => playbook_id.to_string(),
        "status" => status
    )
    .increment(1);
}

pub fn step_executed(tool_name: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "aiops_steps_executed_total",
        "tool_name" => tool_name.to_string(),
        "status" => status
    )
    .increment(1);
}

// =============================================================================
// Approval metrics
// =============================================================================

pub fn approval_requested(risk_level: &'static str) {
    counter!("aiops_approvals_requested_total", "risk_level" => risk_level).increment(1);
}

pub fn approval_resolved(outcome: &'static str) {
    counter!("aiops_approvals_resolved_total", "outcome" => outcome).increment(1);
}

// =============================================================================
// Ingress metrics
// =============================================================================

pub fn webhook_request(status: u16) {
    counter!("aiops_webhook_requests_total", "status" => status.to_string()).increment(1);
}

pub fn webhook_alerts_processed(count: usize) {
    counter!("aiops_webhook_alerts_processed_total").increment(count as u64);
}
