//! Token-budgeted context assembly.
//!
//! Sections are rendered independently, measured, and appended in a fixed
//! priority order while the running total stays inside the caller's budget.
//! Token counts use the canonical chars/4 estimate.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::calibration::CalibrationEngine;
use crate::context::plan::PlanContext;
use crate::error::Result;
use crate::graph::{Decision, GraphStore, NegativeKnowledge, SessionContext, Skill};

/// Similar decisions pulled into a context payload.
const MAX_SIMILAR: usize = 5;

/// NK entries scanned for keyword alerts.
const NK_SCAN_LIMIT: usize = 20;

/// Approximate token count for a rendered section.
fn approx_tokens(text: &str) -> usize {
    text.len() / 4
}

/// A reference to a linked document snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DocShotRef {
    pub doc_shot_id: String,
    pub doc_count: usize,
}

/// Inputs for [`ContextManager::build_decision_context`].
#[derive(Debug, Clone, Default)]
pub struct DecisionContextRequest {
    pub statement: String,
    pub module: String,
    pub confidence: f64,
    pub max_tokens: usize,
    pub include_chains: bool,
    pub doc_shot: Option<DocShotRef>,
    pub session_context: Option<SessionContext>,
    pub role_skills: Vec<Skill>,
    pub role_negative_knowledge: Vec<NegativeKnowledge>,
}

/// A section that made it into the payload.
#[derive(Debug, Clone, Serialize)]
pub struct SectionInfo {
    pub name: String,
    pub tokens: usize,
}

/// The assembled context payload.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub compact_context: String,
    pub total_tokens: usize,
    pub truncated: bool,
    pub sections_included: Vec<SectionInfo>,
    /// Raw records backing the rendered sections, for structured consumers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub similar_decisions: Vec<Decision>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub negative_knowledge_alerts: Vec<NegativeKnowledge>,
}

/// Greedy budgeted assembler shared by both entry points.
struct SectionBudget {
    max_tokens: usize,
    used_tokens: usize,
    out: String,
    truncated: bool,
    included: Vec<SectionInfo>,
}

impl SectionBudget {
    fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            used_tokens: 0,
            out: String::new(),
            truncated: false,
            included: Vec::new(),
        }
    }

    /// Append the section if it fits; otherwise mark the payload truncated.
    fn push(&mut self, name: &str, rendered: String) {
        if rendered.is_empty() {
            return;
        }
        let tokens = approx_tokens(&rendered);
        if self.used_tokens + tokens > self.max_tokens {
            self.truncated = true;
            return;
        }
        self.used_tokens += tokens;
        self.out.push_str(&rendered);
        self.included.push(SectionInfo {
            name: name.to_string(),
            tokens,
        });
    }
}

/// Composes decision and plan contexts within a token budget.
pub struct ContextManager {
    graph: Arc<GraphStore>,
    calibration: Arc<CalibrationEngine>,
}

impl ContextManager {
    pub fn new(graph: Arc<GraphStore>, calibration: Arc<CalibrationEngine>) -> Self {
        Self { graph, calibration }
    }

    /// Assemble context for a decision about to be made.
    ///
    /// Section priority: calibration, NK alerts, role skills, similar past
    /// decisions, session context, DocShot reference.
    pub fn build_decision_context(
        &self,
        request: &DecisionContextRequest,
    ) -> Result<AssembledContext> {
        let mut budget = SectionBudget::new(request.max_tokens);

        let guidance = self
            .calibration
            .confidence_guidance(&request.module, request.confidence);
        budget.push("calibration", render_calibration(&guidance));

        let alerts = self.matching_negative_knowledge(&request.statement, &request.module)?;
        let mut all_alerts = alerts.clone();
        for nk in &request.role_negative_knowledge {
            if !all_alerts.iter().any(|existing| existing.id == nk.id) {
                all_alerts.push(nk.clone());
            }
        }
        budget.push("negative_knowledge", render_nk_alerts(&all_alerts));

        budget.push("role_skills", render_skills(&request.role_skills));

        let similar = self.graph.find_similar_decisions(
            &request.statement,
            Some(&request.module),
            None,
            MAX_SIMILAR,
        )?;
        budget.push("similar_decisions", render_similar(&similar));

        if request.include_chains {
            if let Some(closest) = similar.first() {
                let chain = self.graph.get_causal_chain(&closest.id)?;
                budget.push("causal_chain", render_chain(&chain));
            }
        }

        if let Some(session) = &request.session_context {
            budget.push("session_context", render_session(session));
        }

        if let Some(doc_shot) = &request.doc_shot {
            budget.push(
                "doc_shot",
                format!(
                    "## Linked Docs\n\nSnapshot {} ({} documents)\n\n",
                    doc_shot.doc_shot_id, doc_shot.doc_count
                ),
            );
        }

        Ok(AssembledContext {
            compact_context: budget.out,
            total_tokens: budget.used_tokens,
            truncated: budget.truncated,
            sections_included: budget.included,
            similar_decisions: similar,
            negative_knowledge_alerts: all_alerts,
        })
    }

    /// Render a precomputed plan context compactly: calibration warning
    /// first, then failed approaches, successful patterns, recommendations.
    pub fn build_plan_context(
        &self,
        plan_context: &PlanContext,
        max_tokens: usize,
        doc_shot: Option<&DocShotRef>,
    ) -> Result<AssembledContext> {
        let mut budget = SectionBudget::new(max_tokens);

        if let Some(cal) = &plan_context.calibration {
            budget.push(
                "calibration",
                format!(
                    "## Team Calibration\n\n- Success rate: {:.0}%\n- Gap: {:+.0}%\n- Trend: {}\n- {}\n\n",
                    cal.success_rate * 100.0,
                    cal.confidence_gap * 100.0,
                    cal.trend,
                    cal.note
                ),
            );
        }

        if !plan_context.failed_approaches.is_empty() {
            let mut section = String::from("## Failed Approaches\n\n");
            for f in plan_context.failed_approaches.iter().take(3) {
                section.push_str(&format!("- {} ({}x failed)\n", f.approach, f.failure_count));
            }
            section.push('\n');
            budget.push("failed_approaches", section);
        }

        if !plan_context.successful_patterns.is_empty() {
            let mut section = String::from("## Successful Patterns\n\n");
            for s in plan_context.successful_patterns.iter().take(3) {
                section.push_str(&format!("- {} ({}x success)\n", s.pattern, s.success_count));
            }
            section.push('\n');
            budget.push("successful_patterns", section);
        }

        if !plan_context.recommendations.is_empty() {
            let mut section = String::from("## Recommendations\n\n");
            for rec in &plan_context.recommendations {
                section.push_str(&format!("- {}\n", rec));
            }
            section.push('\n');
            budget.push("recommendations", section);
        }

        if let Some(doc_shot) = doc_shot {
            budget.push(
                "doc_shot",
                format!(
                    "## Linked Docs\n\nSnapshot {} ({} documents)\n\n",
                    doc_shot.doc_shot_id, doc_shot.doc_count
                ),
            );
        }

        Ok(AssembledContext {
            compact_context: budget.out,
            total_tokens: budget.used_tokens,
            truncated: budget.truncated,
            sections_included: budget.included,
            similar_decisions: Vec::new(),
            negative_knowledge_alerts: Vec::new(),
        })
    }

    /// NK entries whose hypothesis shares a content word with the statement.
    fn matching_negative_knowledge(
        &self,
        statement: &str,
        module: &str,
    ) -> Result<Vec<NegativeKnowledge>> {
        let entries = self.graph.list_negative_knowledge(Some(module), NK_SCAN_LIMIT)?;
        let words = keyword_set(statement);
        Ok(entries
            .into_iter()
            .filter(|nk| {
                let nk_words = keyword_set(&nk.hypothesis);
                words.intersection(&nk_words).next().is_some()
            })
            .collect())
    }
}

fn keyword_set(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() > 3)
        .collect()
}

fn render_calibration(guidance: &crate::calibration::ConfidenceGuidance) -> String {
    let (lo, hi) = guidance.credible_interval_95;
    format!(
        "## Calibration ({})\n\n\
         - Domain success rate: {:.0}% over {} outcomes\n\
         - Your confidence: {:.0}% (gap {:+.2})\n\
         - 95% credible interval: [{:.2}, {:.2}]\n\
         - Trend: {}\n\
         - {}\n\n",
        guidance.domain,
        guidance.mean_success_rate * 100.0,
        guidance.sample_size,
        guidance.your_confidence * 100.0,
        guidance.confidence_gap,
        lo,
        hi,
        guidance.trend,
        guidance.recommendation
    )
}

fn render_nk_alerts(alerts: &[NegativeKnowledge]) -> String {
    if alerts.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Negative Knowledge Alerts\n\n");
    for nk in alerts {
        out.push_str(&format!(
            "- [{}] {}: {}\n",
            nk.severity, nk.hypothesis, nk.conclusion
        ));
        if !nk.recommendation.is_empty() {
            out.push_str(&format!("  - Recommendation: {}\n", nk.recommendation));
        }
    }
    out.push('\n');
    out
}

fn render_skills(skills: &[Skill]) -> String {
    if skills.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Role Skills\n\n");
    for skill in skills {
        out.push_str(&format!(
            "- {} v{} (quality {:.2}, {} samples)\n",
            skill.name, skill.version, skill.quality_score, skill.sample_size
        ));
    }
    out.push('\n');
    out
}

fn render_similar(decisions: &[Decision]) -> String {
    if decisions.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Similar Past Decisions\n\n");
    for d in decisions {
        let outcome = d.outcome.as_deref().unwrap_or("pending");
        out.push_str(&format!(
            "- {} ({}, confidence {:.2}) [{}]\n",
            d.statement, outcome, d.confidence, d.id
        ));
    }
    out.push('\n');
    out
}

fn render_chain(chain: &[crate::graph::CausalLink]) -> String {
    if chain.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Causal Chain\n\n");
    for link in chain {
        out.push_str(&format!(
            "- {} -{}-> {}\n",
            link.from_id, link.edge_type, link.to_id
        ));
    }
    out.push('\n');
    out
}

fn render_session(session: &SessionContext) -> String {
    let mut out = String::from("## Session Context\n\n");
    out.push_str(&format!("- Task: {}\n", session.task));
    if let Some(focus) = &session.focus {
        out.push_str(&format!("- Focus: {}\n", focus));
    }
    if let Some(plan) = &session.current_plan {
        out.push_str(&format!("- Current plan: {}\n", plan));
    }
    for constraint in &session.constraints {
        out.push_str(&format!("- Constraint: {}\n", constraint));
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;
    use crate::context::plan::PlanContextBuilder;
    use crate::graph::Severity;

    fn manager() -> (
        tempfile::TempDir,
        ContextManager,
        Arc<GraphStore>,
        Arc<CalibrationEngine>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(GraphStore::in_memory(Namespace::default()).unwrap());
        let calibration = Arc::new(CalibrationEngine::open(dir.path().join("cal")).unwrap());
        (
            dir,
            ContextManager::new(graph.clone(), calibration.clone()),
            graph,
            calibration,
        )
    }

    fn request(max_tokens: usize) -> DecisionContextRequest {
        DecisionContextRequest {
            statement: "Add new index".to_string(),
            module: "database".to_string(),
            confidence: 0.95,
            max_tokens,
            include_chains: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_calibration_section_flags_overconfidence() {
        let (_dir, manager, _graph, calibration) = manager();
        // alpha=9, beta=3 -> mean 0.75; caller confidence 0.95 -> gap 0.20.
        for _ in 0..8 {
            calibration.update_from_outcome("database", "success").unwrap();
        }
        for _ in 0..2 {
            calibration.update_from_outcome("database", "failure").unwrap();
        }

        let ctx = manager.build_decision_context(&request(1500)).unwrap();
        assert!(ctx.compact_context.contains("overconfident"));
        assert!(ctx.compact_context.contains("+0.20"));
        assert_eq!(ctx.sections_included[0].name, "calibration");
    }

    #[test]
    fn test_minimum_budget_yields_nonempty_context() {
        let (_dir, manager, _graph, _calibration) = manager();
        let ctx = manager.build_decision_context(&request(256)).unwrap();
        assert!(!ctx.compact_context.is_empty());
        assert!(ctx.total_tokens <= 256);
    }

    #[test]
    fn test_budget_exhaustion_sets_truncated() {
        let (_dir, manager, graph, _calibration) = manager();
        for i in 0..5 {
            let mut d = crate::graph::Decision::new(
                format!("add index variant {} with a fairly long statement body", i),
                vec!["alt".into()],
                0.7,
            )
            .with_module("database");
            d.outcome = Some("success".into());
            graph.add_decision(&d).unwrap();
        }

        let mut req = request(8000);
        req.max_tokens = 100;
        let ctx = manager.build_decision_context(&req).unwrap();
        assert!(ctx.truncated);
        assert!(ctx.total_tokens <= 100);
        // Calibration (highest priority) still made it in.
        assert!(ctx
            .sections_included
            .iter()
            .any(|s| s.name == "calibration"));
    }

    #[test]
    fn test_nk_alerts_match_statement_keywords() {
        let (_dir, manager, graph, _calibration) = manager();
        graph
            .add_negative_knowledge(&NegativeKnowledge::new(
                "partial index on hot table",
                "locks writers",
                "database",
                Severity::High,
            ))
            .unwrap();
        graph
            .add_negative_knowledge(&NegativeKnowledge::new(
                "unrelated topic entirely",
                "n/a",
                "database",
                Severity::Low,
            ))
            .unwrap();

        let mut req = request(2000);
        req.statement = "Create a partial index for lookups".to_string();
        let ctx = manager.build_decision_context(&req).unwrap();
        assert_eq!(ctx.negative_knowledge_alerts.len(), 1);
        assert!(ctx.compact_context.contains("partial index on hot table"));
    }

    #[test]
    fn test_session_and_docshot_sections() {
        let (_dir, manager, _graph, _calibration) = manager();
        let mut req = request(2000);
        let mut session = SessionContext::new("sess-1", "migrate billing", 7);
        session.constraints = vec!["no downtime".into()];
        req.session_context = Some(session);
        req.doc_shot = Some(DocShotRef {
            doc_shot_id: "docshot_abc123def456".into(),
            doc_count: 3,
        });

        let ctx = manager.build_decision_context(&req).unwrap();
        assert!(ctx.compact_context.contains("migrate billing"));
        assert!(ctx.compact_context.contains("no downtime"));
        assert!(ctx.compact_context.contains("docshot_abc123def456"));
        let names: Vec<&str> = ctx.sections_included.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.last(), Some(&"doc_shot"));
    }

    #[test]
    fn test_total_tokens_matches_sections() {
        let (_dir, manager, _graph, _calibration) = manager();
        let ctx = manager.build_decision_context(&request(1500)).unwrap();
        let sum: usize = ctx.sections_included.iter().map(|s| s.tokens).sum();
        assert_eq!(ctx.total_tokens, sum);
        assert_eq!(ctx.total_tokens, ctx.compact_context.len() / 4);
    }

    #[test]
    fn test_plan_context_rendering() {
        let (_dir, manager, graph, calibration) = manager();
        for _ in 0..4 {
            calibration.update_from_outcome("auth", "success").unwrap();
        }
        let mut failed = crate::graph::Decision::new("custom jwt", vec!["alt".into()], 0.9)
            .with_module("auth");
        failed.outcome = Some("failure".into());
        graph.add_decision(&failed).unwrap();

        let builder = PlanContextBuilder::new(graph, calibration);
        let plan_context = builder.build_plan_context("auth", None, 1500).unwrap();
        let ctx = manager.build_plan_context(&plan_context, 1500, None).unwrap();
        assert!(ctx.compact_context.starts_with("## Team Calibration"));
        assert!(ctx.compact_context.contains("custom jwt"));
        assert!(!ctx.truncated);
    }
}
