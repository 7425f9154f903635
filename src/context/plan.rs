//! Pre-plan context: what worked, what failed, and how calibrated the team
//! is in a domain, assembled before an agent starts planning.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::calibration::{CalibrationEngine, Trend};
use crate::error::Result;
use crate::graph::{now_ts, GraphStore, PastPlan};
use crate::patterns::normalize_statement;

/// Approaches listed per section.
const TOP_N: usize = 5;

/// A repeatedly-failed approach in the domain.
#[derive(Debug, Clone, Serialize)]
pub struct FailedApproach {
    pub approach: String,
    pub failure_count: usize,
    pub decision_ids: Vec<String>,
    pub recommendation: String,
}

/// A proven successful approach in the domain.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessfulPattern {
    pub pattern: String,
    pub success_count: usize,
    pub avg_confidence: f64,
    pub recommendation: String,
}

/// Team calibration summary with a human-readable note.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationSummary {
    pub domain: String,
    pub sample_size: i64,
    pub success_rate: f64,
    pub avg_confidence: Option<f64>,
    pub confidence_gap: f64,
    pub trend: Trend,
    pub note: String,
}

/// The full pre-plan context for a domain.
#[derive(Debug, Clone, Serialize)]
pub struct PlanContext {
    pub domain: String,
    pub scope: Option<String>,
    pub past_plans: Vec<PastPlan>,
    pub failed_approaches: Vec<FailedApproach>,
    pub successful_patterns: Vec<SuccessfulPattern>,
    pub calibration: Option<CalibrationSummary>,
    pub constraints: Vec<String>,
    pub recommendations: Vec<String>,
    pub formatted: String,
    pub total_tokens: usize,
    pub timestamp: i64,
}

/// Builds rich context for the planning phase.
pub struct PlanContextBuilder {
    graph: Arc<GraphStore>,
    calibration: Arc<CalibrationEngine>,
}

impl PlanContextBuilder {
    pub fn new(graph: Arc<GraphStore>, calibration: Arc<CalibrationEngine>) -> Self {
        Self { graph, calibration }
    }

    /// Assemble the complete plan context for a domain.
    pub fn build_plan_context(
        &self,
        domain: &str,
        scope: Option<&str>,
        max_tokens: usize,
    ) -> Result<PlanContext> {
        let past_plans = self.graph.past_plans_for_domain(domain, TOP_N)?;
        let failed_approaches = self.failed_approaches(domain)?;
        let successful_patterns = self.successful_patterns(domain)?;
        let calibration = self.calibration_summary(domain)?;
        let constraints = self.graph.get_project_constraints(None)?;
        let recommendations =
            recommendations(&calibration, &failed_approaches, &successful_patterns);

        let mut context = PlanContext {
            domain: domain.to_string(),
            scope: scope.map(String::from),
            past_plans,
            failed_approaches,
            successful_patterns,
            calibration,
            constraints,
            recommendations,
            formatted: String::new(),
            total_tokens: 0,
            timestamp: now_ts(),
        };
        context.formatted = format_for_injection(&context, max_tokens);
        context.total_tokens = context.formatted.len() / 4;
        Ok(context)
    }

    fn failed_approaches(&self, domain: &str) -> Result<Vec<FailedApproach>> {
        let decisions = self.graph.get_decisions(200, Some(domain))?;
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for d in decisions {
            if d.outcome.as_deref() == Some("failure") {
                groups
                    .entry(normalize_statement(&d.statement))
                    .or_default()
                    .push(d.id);
            }
        }
        let mut approaches: Vec<FailedApproach> = groups
            .into_iter()
            .map(|(approach, ids)| FailedApproach {
                approach,
                failure_count: ids.len(),
                decision_ids: ids,
                recommendation: "Consider why this failed before reusing the approach".to_string(),
            })
            .collect();
        approaches.sort_by(|a, b| b.failure_count.cmp(&a.failure_count));
        approaches.truncate(TOP_N);
        Ok(approaches)
    }

    fn successful_patterns(&self, domain: &str) -> Result<Vec<SuccessfulPattern>> {
        let decisions = self.graph.get_decisions(200, Some(domain))?;
        let mut groups: BTreeMap<String, (usize, f64)> = BTreeMap::new();
        for d in decisions {
            if d.outcome.as_deref() == Some("success") {
                let entry = groups
                    .entry(normalize_statement(&d.statement))
                    .or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += d.confidence;
            }
        }
        let mut patterns: Vec<SuccessfulPattern> = groups
            .into_iter()
            .map(|(pattern, (count, confidence_sum))| SuccessfulPattern {
                pattern,
                success_count: count,
                avg_confidence: confidence_sum / count as f64,
                recommendation: if count >= 3 {
                    "Use with confidence".to_string()
                } else {
                    "Consider for next iteration".to_string()
                },
            })
            .collect();
        patterns.sort_by(|a, b| {
            b.success_count.cmp(&a.success_count).then(
                b.avg_confidence
                    .partial_cmp(&a.avg_confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        patterns.truncate(TOP_N);
        Ok(patterns)
    }

    fn calibration_summary(&self, domain: &str) -> Result<Option<CalibrationSummary>> {
        let Some(profile) = self.calibration.get_profile(domain) else {
            return Ok(None);
        };
        let avg_confidence = self.graph.average_confidence(domain)?;
        let gap = avg_confidence
            .map(|avg| avg - profile.mean_success_rate)
            .unwrap_or(0.0);
        let note = if gap > 0.15 {
            format!(
                "OVERCONFIDENT by {:.0}% - pad time estimates significantly",
                gap * 100.0
            )
        } else if gap > 0.05 {
            format!(
                "Slightly overconfident ({:.0}%) - add a 10-15% buffer to estimates",
                gap * 100.0
            )
        } else if gap < -0.15 {
            format!(
                "Underconfident by {:.0}% - you can move faster than planned",
                -gap * 100.0
            )
        } else {
            "Well-calibrated - estimates should be reliable".to_string()
        };
        Ok(Some(CalibrationSummary {
            domain: domain.to_string(),
            sample_size: profile.sample_size,
            success_rate: profile.mean_success_rate,
            avg_confidence,
            confidence_gap: gap,
            trend: profile.trend,
            note,
        }))
    }
}

fn recommendations(
    calibration: &Option<CalibrationSummary>,
    failed: &[FailedApproach],
    successful: &[SuccessfulPattern],
) -> Vec<String> {
    let mut recs = Vec::new();
    if let Some(cal) = calibration {
        if cal.confidence_gap > 0.1 {
            recs.push(format!(
                "Add a {:.0}-15% time buffer to estimates",
                cal.confidence_gap * 100.0
            ));
        }
    }
    if !failed.is_empty() {
        recs.push(format!(
            "Avoid {} known failure patterns in this domain",
            failed.len()
        ));
    }
    if !successful.is_empty() {
        recs.push(format!(
            "Prefer {} proven successful patterns",
            successful.len()
        ));
    }
    recs
}

/// Render the context as compact markdown, calibration warning first.
fn format_for_injection(context: &PlanContext, max_tokens: usize) -> String {
    let mut out = format!("# Plan Context: {}\n\n", context.domain.to_uppercase());

    if let Some(cal) = &context.calibration {
        out.push_str("## Team Calibration\n");
        out.push_str(&format!("- Success rate: {:.0}%\n", cal.success_rate * 100.0));
        out.push_str(&format!(
            "- Confidence gap: {:+.0}%\n",
            cal.confidence_gap * 100.0
        ));
        out.push_str(&format!("- Trend: {}\n", cal.trend));
        out.push_str(&format!("- Note: {}\n\n", cal.note));
    }

    if !context.failed_approaches.is_empty() {
        out.push_str("## Failed Approaches (Avoid)\n");
        for f in context.failed_approaches.iter().take(3) {
            out.push_str(&format!("- **{}** ({}x failed)\n", f.approach, f.failure_count));
        }
        out.push('\n');
    }

    if !context.successful_patterns.is_empty() {
        out.push_str("## Successful Patterns (Use)\n");
        for s in context.successful_patterns.iter().take(3) {
            out.push_str(&format!("- **{}** ({}x success)\n", s.pattern, s.success_count));
        }
        out.push('\n');
    }

    if !context.recommendations.is_empty() {
        out.push_str("## Recommendations\n");
        for rec in &context.recommendations {
            out.push_str(&format!("- {}\n", rec));
        }
    }

    // Respect the caller's budget: chars/4 is the canonical token estimate.
    let max_chars = max_tokens * 4;
    if out.len() > max_chars {
        let mut cut = max_chars;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;
    use crate::graph::{Decision, Engram};

    fn builder(seed_calibration: bool) -> (tempfile::TempDir, PlanContextBuilder, Arc<GraphStore>) {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(GraphStore::in_memory(Namespace::default()).unwrap());
        let calibration = Arc::new(CalibrationEngine::open(dir.path().join("cal")).unwrap());
        if seed_calibration {
            for _ in 0..6 {
                calibration.update_from_outcome("auth", "success").unwrap();
            }
            for _ in 0..2 {
                calibration.update_from_outcome("auth", "failure").unwrap();
            }
        }
        (dir, PlanContextBuilder::new(graph.clone(), calibration), graph)
    }

    fn seed_decisions(graph: &GraphStore) {
        for (stmt, outcome, confidence) in [
            ("custom jwt implementation", "failure", 0.9),
            ("custom JWT  implementation", "failure", 0.95),
            ("oauth via provider", "success", 0.8),
            ("oauth via provider", "success", 0.7),
        ] {
            let mut d = Decision::new(stmt, vec!["alt".into()], confidence).with_module("auth");
            d.outcome = Some(outcome.to_string());
            d.resolved_at = Some(now_ts());
            graph.add_decision(&d).unwrap();
        }
    }

    #[test]
    fn test_failed_and_successful_grouping() {
        let (_dir, builder, graph) = builder(true);
        seed_decisions(&graph);

        let ctx = builder.build_plan_context("auth", None, 1500).unwrap();
        assert_eq!(ctx.failed_approaches.len(), 1);
        assert_eq!(ctx.failed_approaches[0].approach, "custom jwt implementation");
        assert_eq!(ctx.failed_approaches[0].failure_count, 2);
        assert_eq!(ctx.successful_patterns.len(), 1);
        assert_eq!(ctx.successful_patterns[0].success_count, 2);
    }

    #[test]
    fn test_calibration_note_overconfident() {
        let (_dir, builder, graph) = builder(true);
        seed_decisions(&graph);
        // avg confidence (0.9+0.95+0.8+0.7)/4 = 0.8375; mean success 7/10 = 0.7
        let ctx = builder.build_plan_context("auth", None, 1500).unwrap();
        let cal = ctx.calibration.unwrap();
        assert!(cal.confidence_gap > 0.1);
        assert!(cal.note.contains("overconfident"));
        assert!(ctx.recommendations.iter().any(|r| r.contains("buffer")));
    }

    #[test]
    fn test_formatted_sections_and_budget() {
        let (_dir, builder, graph) = builder(true);
        seed_decisions(&graph);
        let ctx = builder.build_plan_context("auth", Some("login flow"), 1500).unwrap();
        assert!(ctx.formatted.starts_with("# Plan Context: AUTH"));
        assert!(ctx.formatted.contains("## Team Calibration"));
        assert!(ctx.formatted.contains("## Failed Approaches"));
        assert!(ctx.total_tokens <= 1500);

        let tiny = builder.build_plan_context("auth", None, 30).unwrap();
        assert!(tiny.formatted.len() <= 120);
    }

    #[test]
    fn test_no_calibration_profile() {
        let (_dir, builder, graph) = builder(false);
        seed_decisions(&graph);
        let ctx = builder.build_plan_context("auth", None, 1500).unwrap();
        assert!(ctx.calibration.is_none());
        assert!(!ctx.formatted.contains("Team Calibration"));
    }

    #[test]
    fn test_past_plans_included() {
        let (_dir, builder, graph) = builder(true);
        let engram = Engram::new("sess-9");
        graph.add_engram(&engram).unwrap();
        let mut d = Decision::new("oauth via provider", vec!["alt".into()], 0.8).with_module("auth");
        d.engram_id = Some(engram.id.clone());
        d.outcome = Some("success".into());
        graph.add_decision(&d).unwrap();

        let ctx = builder.build_plan_context("auth", None, 1500).unwrap();
        assert_eq!(ctx.past_plans.len(), 1);
        assert_eq!(ctx.past_plans[0].decision_count, 1);
        assert_eq!(ctx.past_plans[0].success_count, 1);
    }
}
