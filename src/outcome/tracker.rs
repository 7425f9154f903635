//! Outcome state machine and signal aggregation.
//!
//! An outcome advances `pending -> submitted -> merged -> completed` and only
//! forward. Signal recorders append to the outcome without changing status;
//! repeating a transition already taken is a no-op, so webhook redeliveries
//! are safe.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::calibration::CalibrationEngine;
use crate::error::{Error, Result};
use crate::graph::{
    now_ts, GraphStore, Outcome, OutcomeStatus, SignalType, SignalValence,
};

/// Latency/throughput thresholds for classifying performance signals.
const PERF_LATENCY_MS: f64 = 100.0;
const PERF_THROUGHPUT_RPS: f64 = 1000.0;

/// Assessment returned by [`OutcomeTracker::check_success_criteria`].
#[derive(Debug, Clone, Serialize)]
pub struct SuccessCheck {
    pub outcome_id: String,
    pub status: OutcomeStatus,
    pub positive_signals: usize,
    pub negative_signals: usize,
    pub estimated_success: f64,
    pub needs_attention: bool,
}

/// Tracks decision outcomes through the commit -> PR -> CI -> merge lifecycle.
pub struct OutcomeTracker {
    graph: Arc<GraphStore>,
    calibration: Arc<CalibrationEngine>,
}

impl OutcomeTracker {
    pub fn new(graph: Arc<GraphStore>, calibration: Arc<CalibrationEngine>) -> Self {
        Self { graph, calibration }
    }

    /// Create a new pending outcome for a decision.
    pub fn create_outcome(&self, decision_id: &str) -> Result<Outcome> {
        let outcome = Outcome::new(decision_id);
        self.graph.add_outcome(&outcome)?;
        tracing::info!(
            target: "membria::outcome",
            outcome_id = %outcome.id,
            decision_id,
            "created outcome"
        );
        Ok(outcome)
    }

    fn load(&self, outcome_id: &str) -> Result<Outcome> {
        self.graph
            .get_outcome(outcome_id)?
            .ok_or_else(|| Error::not_found("Outcome", outcome_id))
    }

    /// Record the implementing commit. Neutral signal, no transition.
    pub fn record_commit(&self, outcome_id: &str, commit_sha: &str, message: &str) -> Result<Outcome> {
        let mut outcome = self.load(outcome_id)?;
        let short_sha: String = commit_sha.chars().take(8).collect();
        let summary: String = message.chars().take(100).collect();
        outcome.commit_sha = Some(short_sha.clone());
        outcome.add_signal(
            SignalType::PrCreated,
            SignalValence::Neutral,
            format!("Commit {}: {}", short_sha, summary),
        );
        self.graph.update_outcome(&outcome)?;
        Ok(outcome)
    }

    /// Transition `pending -> submitted` on PR creation.
    pub fn record_pr_created(
        &self,
        outcome_id: &str,
        pr_number: i64,
        pr_url: &str,
        _branch: &str,
    ) -> Result<Outcome> {
        let mut outcome = self.load(outcome_id)?;
        if outcome.status >= OutcomeStatus::Submitted {
            // Redelivery of an already-processed transition.
            return Ok(outcome);
        }
        outcome.status = OutcomeStatus::Submitted;
        outcome.submitted_at = Some(now_ts());
        outcome.pr_number = Some(pr_number);
        outcome.pr_url = Some(pr_url.to_string());
        outcome.add_signal(
            SignalType::PrCreated,
            SignalValence::Positive,
            format!("PR #{} created: {}", pr_number, pr_url),
        );
        self.graph.update_outcome(&outcome)?;
        tracing::info!(target: "membria::outcome", outcome_id, pr_number, "PR recorded");
        Ok(outcome)
    }

    /// Transition to `merged` on PR merge. A merge arriving before the
    /// PR-created event passes through `submitted` so the status history
    /// stays a prefix of the lifecycle.
    pub fn record_pr_merged(&self, outcome_id: &str, pr_number: i64) -> Result<Outcome> {
        let mut outcome = self.load(outcome_id)?;
        if outcome.status >= OutcomeStatus::Merged {
            return Ok(outcome);
        }
        if outcome.status == OutcomeStatus::Pending {
            outcome.status = OutcomeStatus::Submitted;
            outcome.submitted_at = Some(now_ts());
            outcome.pr_number = Some(pr_number);
        }
        outcome.status = OutcomeStatus::Merged;
        outcome.merged_at = Some(now_ts());
        outcome.add_signal(
            SignalType::PrMerged,
            SignalValence::Positive,
            format!("PR #{} merged", pr_number),
        );
        self.graph.update_outcome(&outcome)?;
        tracing::info!(target: "membria::outcome", outcome_id, pr_number, "PR merge recorded");
        Ok(outcome)
    }

    /// Append a CI signal. No transition.
    pub fn record_ci_result(
        &self,
        outcome_id: &str,
        passed: bool,
        details: Option<&str>,
    ) -> Result<Outcome> {
        let mut outcome = self.load(outcome_id)?;
        let (signal_type, valence) = if passed {
            (SignalType::CiPassed, SignalValence::Positive)
        } else {
            (SignalType::CiFailed, SignalValence::Negative)
        };
        outcome.add_signal(
            signal_type,
            valence,
            format!(
                "CI {}: {}",
                if passed { "passed" } else { "failed" },
                details.unwrap_or("All checks complete")
            ),
        );
        self.graph.update_outcome(&outcome)?;
        Ok(outcome)
    }

    /// Append an incident signal. No transition.
    pub fn record_incident(
        &self,
        outcome_id: &str,
        severity: &str,
        description: &str,
    ) -> Result<Outcome> {
        let mut outcome = self.load(outcome_id)?;
        let signal = outcome.add_signal(
            SignalType::Incident,
            SignalValence::Negative,
            if description.is_empty() {
                "Incident detected".to_string()
            } else {
                description.to_string()
            },
        );
        signal.severity = Some(severity.to_string());
        self.graph.update_outcome(&outcome)?;
        tracing::warn!(target: "membria::outcome", outcome_id, severity, "incident recorded");
        Ok(outcome)
    }

    /// Append a performance signal, classified against fixed thresholds.
    pub fn record_performance(
        &self,
        outcome_id: &str,
        metrics: HashMap<String, Value>,
    ) -> Result<Outcome> {
        let mut outcome = self.load(outcome_id)?;
        let latency = metrics
            .get("avg_latency_ms")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let throughput = metrics
            .get("throughput_rps")
            .and_then(Value::as_f64)
            .unwrap_or(f64::INFINITY);

        let is_good = latency < PERF_LATENCY_MS && throughput > PERF_THROUGHPUT_RPS;
        let (signal_type, valence) = if is_good {
            (SignalType::PerformanceOk, SignalValence::Positive)
        } else {
            (SignalType::PerformancePoor, SignalValence::Negative)
        };
        let signal = outcome.add_signal(
            signal_type,
            valence,
            format!("Performance: {}ms latency, {} rps throughput", latency, throughput),
        );
        signal.metrics = Some(metrics);
        self.graph.update_outcome(&outcome)?;
        Ok(outcome)
    }

    /// Evaluate whether the outcome needs attention.
    pub fn check_success_criteria(&self, outcome_id: &str) -> Result<SuccessCheck> {
        let outcome = self.load(outcome_id)?;
        let positive = outcome.positive_signal_count();
        let negative = outcome.negative_signal_count();
        let estimated = outcome.estimate_success();
        Ok(SuccessCheck {
            outcome_id: outcome.id,
            status: outcome.status,
            positive_signals: positive,
            negative_signals: negative,
            estimated_success: estimated,
            needs_attention: negative > 0 || estimated < 0.5,
        })
    }

    /// Close the outcome. Drives calibration when a domain is supplied and
    /// writes resolution fields back onto the decision.
    pub fn finalize_outcome(
        &self,
        outcome_id: &str,
        final_status: &str,
        final_score: f64,
        lessons_learned: Vec<String>,
        decision_domain: Option<&str>,
    ) -> Result<Outcome> {
        let mut outcome = self.load(outcome_id)?;
        if outcome.status == OutcomeStatus::Completed {
            return Ok(outcome);
        }
        outcome.status = OutcomeStatus::Completed;
        outcome.completed_at = Some(now_ts());
        outcome.final_status = Some(final_status.to_string());
        outcome.final_score = Some(final_score);
        outcome.lessons_learned = lessons_learned;
        self.graph.update_outcome(&outcome)?;

        self.graph.set_decision_outcome(
            &outcome.decision_id,
            final_status,
            outcome.completed_at.unwrap_or_else(now_ts),
            Some(final_score),
        )?;

        if let Some(domain) = decision_domain {
            if let Err(e) = self.calibration.update_from_outcome(domain, final_status) {
                tracing::warn!(
                    target: "membria::outcome",
                    domain,
                    error = %e,
                    "calibration update failed"
                );
            }
        }

        tracing::info!(
            target: "membria::outcome",
            outcome_id,
            final_status,
            final_score,
            "outcome finalized"
        );
        Ok(outcome)
    }

    pub fn get_outcome(&self, outcome_id: &str) -> Result<Option<Outcome>> {
        self.graph.get_outcome(outcome_id)
    }

    pub fn list_outcomes(
        &self,
        limit: usize,
        status: Option<OutcomeStatus>,
        decision_id: Option<&str>,
    ) -> Result<Vec<Outcome>> {
        self.graph.list_outcomes(limit, status, decision_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;
    use serde_json::json;

    fn tracker() -> (tempfile::TempDir, OutcomeTracker, Arc<GraphStore>) {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(GraphStore::in_memory(Namespace::default()).unwrap());
        let calibration = Arc::new(CalibrationEngine::open(dir.path().join("cal")).unwrap());
        (dir, OutcomeTracker::new(graph.clone(), calibration), graph)
    }

    #[test]
    fn test_full_lifecycle() {
        let (_dir, tracker, _graph) = tracker();
        let outcome = tracker.create_outcome("dec_1").unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Pending);

        let o = tracker
            .record_pr_created(&outcome.id, 42, "https://example/pr/42", "feature")
            .unwrap();
        assert_eq!(o.status, OutcomeStatus::Submitted);
        assert!(o.submitted_at.is_some());

        let o = tracker.record_pr_merged(&outcome.id, 42).unwrap();
        assert_eq!(o.status, OutcomeStatus::Merged);
        assert!(o.merged_at.is_some());

        let o = tracker
            .finalize_outcome(&outcome.id, "success", 0.9, vec!["ship smaller".into()], None)
            .unwrap();
        assert_eq!(o.status, OutcomeStatus::Completed);
        assert_eq!(o.final_status.as_deref(), Some("success"));
    }

    #[test]
    fn test_pr_merged_twice_is_idempotent() {
        let (_dir, tracker, _graph) = tracker();
        let outcome = tracker.create_outcome("dec_1").unwrap();
        tracker
            .record_pr_created(&outcome.id, 7, "https://x/pr/7", "main")
            .unwrap();
        let first = tracker.record_pr_merged(&outcome.id, 7).unwrap();
        let merged_at = first.merged_at;
        let signal_count = first.signals.len();

        let second = tracker.record_pr_merged(&outcome.id, 7).unwrap();
        assert_eq!(second.merged_at, merged_at);
        assert_eq!(second.signals.len(), signal_count);
    }

    #[test]
    fn test_merge_from_pending_passes_through_submitted() {
        let (_dir, tracker, _graph) = tracker();
        let outcome = tracker.create_outcome("dec_1").unwrap();
        let o = tracker.record_pr_merged(&outcome.id, 8).unwrap();
        assert_eq!(o.status, OutcomeStatus::Merged);
        assert!(o.submitted_at.is_some());
    }

    #[test]
    fn test_unknown_outcome_is_conflict() {
        let (_dir, tracker, _graph) = tracker();
        let err = tracker.record_pr_merged("outcome_ghost", 1);
        assert!(matches!(err, Err(Error::Conflict(_))));
        // Conflicts never create records.
        assert!(tracker.get_outcome("outcome_ghost").unwrap().is_none());
    }

    #[test]
    fn test_signals_do_not_transition() {
        let (_dir, tracker, _graph) = tracker();
        let outcome = tracker.create_outcome("dec_1").unwrap();
        tracker.record_ci_result(&outcome.id, true, None).unwrap();
        tracker
            .record_incident(&outcome.id, "high", "pager went off")
            .unwrap();
        let o = tracker.get_outcome(&outcome.id).unwrap().unwrap();
        assert_eq!(o.status, OutcomeStatus::Pending);
        assert_eq!(o.signals.len(), 2);
        assert_eq!(o.signals[1].severity.as_deref(), Some("high"));
    }

    #[test]
    fn test_performance_classification() {
        let (_dir, tracker, _graph) = tracker();
        let outcome = tracker.create_outcome("dec_1").unwrap();

        let mut good = HashMap::new();
        good.insert("avg_latency_ms".to_string(), json!(50.0));
        good.insert("throughput_rps".to_string(), json!(5000.0));
        let o = tracker.record_performance(&outcome.id, good).unwrap();
        assert_eq!(o.signals.last().unwrap().signal_type, SignalType::PerformanceOk);

        let mut bad = HashMap::new();
        bad.insert("avg_latency_ms".to_string(), json!(250.0));
        bad.insert("throughput_rps".to_string(), json!(5000.0));
        let o = tracker.record_performance(&outcome.id, bad).unwrap();
        assert_eq!(o.signals.last().unwrap().signal_type, SignalType::PerformancePoor);
    }

    #[test]
    fn test_check_success_criteria() {
        let (_dir, tracker, _graph) = tracker();
        let outcome = tracker.create_outcome("dec_1").unwrap();
        tracker.record_ci_result(&outcome.id, false, Some("flaky test")).unwrap();

        let check = tracker.check_success_criteria(&outcome.id).unwrap();
        assert_eq!(check.negative_signals, 1);
        assert!(check.needs_attention);
        assert!((check.estimated_success - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_finalize_updates_calibration_and_decision() {
        let (_dir, tracker, graph) = tracker();
        let decision = crate::graph::Decision::new("use postgres", vec!["mysql".into()], 0.85)
            .with_module("database");
        graph.add_decision(&decision).unwrap();

        let outcome = tracker.create_outcome(&decision.id).unwrap();
        tracker
            .finalize_outcome(&outcome.id, "success", 0.9, vec![], Some("database"))
            .unwrap();

        let resolved = graph.get_decision(&decision.id).unwrap().unwrap();
        assert_eq!(resolved.outcome.as_deref(), Some("success"));
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.actual_success_rate, Some(0.9));
    }

    #[test]
    fn test_commit_records_short_sha() {
        let (_dir, tracker, _graph) = tracker();
        let outcome = tracker.create_outcome("dec_1").unwrap();
        let o = tracker
            .record_commit(&outcome.id, "abc123def4567890", "Implement decision dec_1")
            .unwrap();
        assert_eq!(o.commit_sha.as_deref(), Some("abc123de"));
        assert_eq!(o.signals[0].valence, SignalValence::Neutral);
    }
}
