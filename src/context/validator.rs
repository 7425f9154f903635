//! Mid-plan validation: scan plan steps against negative knowledge,
//! antipatterns, past failures, and calibration before execution starts.

use regex::RegexBuilder;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::calibration::CalibrationEngine;
use crate::error::Result;
use crate::graph::{now_ts, GraphStore, Severity};

/// NK entries scanned per validation run.
const NK_SCAN_LIMIT: usize = 20;

/// AntiPatterns scanned per validation run.
const AP_SCAN_LIMIT: usize = 20;

/// Content words that must overlap for an NK warning.
const NK_MIN_OVERLAP: usize = 2;

/// Keywords checked per step for past failures.
const MAX_STEP_KEYWORDS: usize = 3;

/// Team confidence gap that triggers the calibration warning.
const OVERCONFIDENCE_GAP: f64 = 0.15;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "is", "are", "be", "this", "that", "with", "from", "to", "in",
    "for", "of", "by", "at", "will", "should",
];

/// What a warning was raised about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    NegativeKnowledge,
    Antipattern,
    PastFailure,
    Calibration,
}

/// Warning severity bands reported by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    High,
    Medium,
    Low,
}

impl From<Severity> for WarningSeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical | Severity::High => Self::High,
            Severity::Medium => Self::Medium,
            Severity::Low => Self::Low,
        }
    }
}

/// A warning about one plan step.
#[derive(Debug, Clone, Serialize)]
pub struct PlanWarning {
    pub step: usize,
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub severity: WarningSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub confidence: f64,
}

/// Structured validation result.
#[derive(Debug, Clone, Serialize)]
pub struct PlanValidation {
    pub total_steps: usize,
    pub warnings_count: usize,
    pub high_severity: usize,
    pub medium_severity: usize,
    pub low_severity: usize,
    pub warnings: Vec<PlanWarning>,
    pub can_proceed: bool,
    pub timestamp: i64,
}

/// Validates plan steps against graph knowledge.
pub struct PlanValidator {
    graph: Arc<GraphStore>,
    calibration: Arc<CalibrationEngine>,
}

impl PlanValidator {
    pub fn new(graph: Arc<GraphStore>, calibration: Arc<CalibrationEngine>) -> Self {
        Self { graph, calibration }
    }

    /// Validate every step and return the structured result. Warnings are
    /// sorted most severe first; `can_proceed` is false iff any high-severity
    /// warning exists.
    pub fn validate_plan(&self, steps: &[String], domain: Option<&str>) -> Result<PlanValidation> {
        let mut warnings = Vec::new();

        let nk_entries = self.graph.list_negative_knowledge(domain, NK_SCAN_LIMIT)?;
        let antipatterns = self.graph.list_antipatterns(AP_SCAN_LIMIT, None)?;
        let team_gap = match domain {
            Some(domain) => self.team_confidence_gap(domain)?,
            None => None,
        };

        for (index, step) in steps.iter().enumerate() {
            let step_number = index + 1;
            if step.trim().is_empty() {
                continue;
            }
            self.check_negative_knowledge(step_number, step, &nk_entries, &mut warnings);
            self.check_antipatterns(step_number, step, &antipatterns, &mut warnings);
            self.check_past_failures(step_number, step, &mut warnings)?;
            if let (Some(gap), Some(domain)) = (team_gap, domain) {
                if gap > OVERCONFIDENCE_GAP {
                    warnings.push(PlanWarning {
                        step: step_number,
                        kind: WarningKind::Calibration,
                        severity: WarningSeverity::Low,
                        message: format!(
                            "Domain '{}' shows an overconfidence bias of {:.0}%",
                            domain,
                            gap * 100.0
                        ),
                        suggestion: Some(format!(
                            "The team tends to underestimate effort in {}. Pad estimates.",
                            domain
                        )),
                        confidence: 0.8,
                    });
                }
            }
        }

        warnings.sort_by_key(|w| w.severity);
        let count_of = |severity: WarningSeverity| {
            warnings.iter().filter(|w| w.severity == severity).count()
        };
        let high = count_of(WarningSeverity::High);
        let medium = count_of(WarningSeverity::Medium);
        let low = count_of(WarningSeverity::Low);

        tracing::info!(
            target: "membria::validator",
            steps = steps.len(),
            warnings = warnings.len(),
            "plan validated"
        );

        Ok(PlanValidation {
            total_steps: steps.len(),
            warnings_count: warnings.len(),
            high_severity: high,
            medium_severity: medium,
            low_severity: low,
            can_proceed: high == 0,
            warnings,
            timestamp: now_ts(),
        })
    }

    fn check_negative_knowledge(
        &self,
        step_number: usize,
        step: &str,
        entries: &[crate::graph::NegativeKnowledge],
        warnings: &mut Vec<PlanWarning>,
    ) {
        let step_words = content_words(step);
        for nk in entries {
            let nk_words = content_words(&nk.hypothesis);
            let overlap: Vec<&String> = step_words.intersection(&nk_words).collect();
            if overlap.len() >= NK_MIN_OVERLAP {
                let matched: Vec<&str> = overlap.iter().map(|s| s.as_str()).collect();
                warnings.push(PlanWarning {
                    step: step_number,
                    kind: WarningKind::NegativeKnowledge,
                    severity: nk.severity.into(),
                    message: format!(
                        "Step mentions '{}' - known issue: {}",
                        matched.join(" "),
                        nk.hypothesis
                    ),
                    suggestion: Some(if nk.recommendation.is_empty() {
                        format!("Recommendation: {}", nk.conclusion)
                    } else {
                        format!("Recommendation: {}", nk.recommendation)
                    }),
                    confidence: (overlap.len() as f64 / 3.0).min(1.0),
                });
            }
        }
    }

    fn check_antipatterns(
        &self,
        step_number: usize,
        step: &str,
        antipatterns: &[crate::graph::AntiPattern],
        warnings: &mut Vec<PlanWarning>,
    ) {
        for ap in antipatterns {
            if ap.regex_pattern.is_empty() {
                continue;
            }
            let regex = match RegexBuilder::new(&ap.regex_pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(regex) => regex,
                Err(_) => {
                    tracing::warn!(
                        target: "membria::validator",
                        pattern = %ap.regex_pattern,
                        "invalid antipattern regex"
                    );
                    continue;
                }
            };
            if regex.is_match(step) {
                let severity = if ap.removal_rate > 0.70 {
                    WarningSeverity::High
                } else if ap.removal_rate > 0.50 {
                    WarningSeverity::Medium
                } else {
                    WarningSeverity::Low
                };
                warnings.push(PlanWarning {
                    step: step_number,
                    kind: WarningKind::Antipattern,
                    severity,
                    message: format!(
                        "Step matches antipattern: {} ({:.0}% removal rate)",
                        ap.name,
                        ap.removal_rate * 100.0
                    ),
                    suggestion: Some(
                        "This pattern is commonly removed or fixed in similar projects".to_string(),
                    ),
                    confidence: ap.removal_rate,
                });
            }
        }
    }

    fn check_past_failures(
        &self,
        step_number: usize,
        step: &str,
        warnings: &mut Vec<PlanWarning>,
    ) -> Result<()> {
        for keyword in extract_keywords(step, MAX_STEP_KEYWORDS) {
            for (decision_id, statement, module) in
                self.graph.failed_decisions_matching(&keyword, 3)?
            {
                warnings.push(PlanWarning {
                    step: step_number,
                    kind: WarningKind::PastFailure,
                    severity: WarningSeverity::Medium,
                    message: format!(
                        "Similar approach failed before: '{}' ({})",
                        statement, decision_id
                    ),
                    suggestion: Some(format!(
                        "Consider why it failed last time in the {} domain",
                        module
                    )),
                    confidence: 0.7,
                });
            }
        }
        Ok(())
    }

    fn team_confidence_gap(&self, domain: &str) -> Result<Option<f64>> {
        let Some(profile) = self.calibration.get_profile(domain) else {
            return Ok(None);
        };
        let Some(avg_confidence) = self.graph.average_confidence(domain)? else {
            return Ok(None);
        };
        Ok(Some(avg_confidence - profile.mean_success_rate))
    }
}

fn content_words(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Deduplicated keywords of length > 3, stop-words dropped.
fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    content_words(text)
        .into_iter()
        .filter(|w| w.len() > 3)
        .take(max_keywords)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;
    use crate::graph::{AntiPattern, Decision, NegativeKnowledge};

    fn validator() -> (
        tempfile::TempDir,
        PlanValidator,
        Arc<GraphStore>,
        Arc<CalibrationEngine>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(GraphStore::in_memory(Namespace::default()).unwrap());
        let calibration = Arc::new(CalibrationEngine::open(dir.path().join("cal")).unwrap());
        (
            dir,
            PlanValidator::new(graph.clone(), calibration.clone()),
            graph,
            calibration,
        )
    }

    #[test]
    fn test_nk_blocks_known_failure() {
        let (_dir, validator, graph, _calibration) = validator();
        graph
            .add_negative_knowledge(
                &NegativeKnowledge::new(
                    "custom JWT implementation",
                    "token refresh edge cases",
                    "auth",
                    Severity::High,
                )
                .with_recommendation("use established library"),
            )
            .unwrap();

        let steps = vec![
            "Implement custom JWT library".to_string(),
            "Add login form".to_string(),
        ];
        let result = validator.validate_plan(&steps, Some("auth")).unwrap();

        assert_eq!(result.total_steps, 2);
        assert_eq!(result.high_severity, 1);
        assert!(!result.can_proceed);
        let warning = &result.warnings[0];
        assert_eq!(warning.step, 1);
        assert_eq!(warning.kind, WarningKind::NegativeKnowledge);
        assert_eq!(warning.severity, WarningSeverity::High);
        assert!(warning.suggestion.as_deref().unwrap().contains("established library"));
        // Step 2 produced nothing.
        assert!(result.warnings.iter().all(|w| w.step == 1));
    }

    #[test]
    fn test_antipattern_severity_bands() {
        let (_dir, validator, graph, _calibration) = validator();
        graph
            .add_antipattern(
                &AntiPattern::new("god object", r"god\s+object").with_removal_rate(0.9),
            )
            .unwrap();
        graph
            .add_antipattern(
                &AntiPattern::new("sleepy retry", r"sleep\(\d+\)").with_removal_rate(0.6),
            )
            .unwrap();
        graph
            .add_antipattern(
                &AntiPattern::new("long enum", r"enum with \d+ variants").with_removal_rate(0.3),
            )
            .unwrap();

        let steps = vec![
            "Refactor the God Object in session handling".to_string(),
            "retry using sleep(5) in a loop".to_string(),
            "model states as enum with 40 variants".to_string(),
        ];
        let result = validator.validate_plan(&steps, None).unwrap();
        assert_eq!(result.high_severity, 1);
        assert_eq!(result.medium_severity, 1);
        assert_eq!(result.low_severity, 1);
        assert!(!result.can_proceed);
        // Sorted most severe first.
        assert_eq!(result.warnings[0].severity, WarningSeverity::High);
        assert_eq!(result.warnings[2].severity, WarningSeverity::Low);
    }

    #[test]
    fn test_invalid_regex_is_skipped() {
        let (_dir, validator, graph, _calibration) = validator();
        graph
            .add_antipattern(&AntiPattern::new("broken", r"([unclosed").with_removal_rate(0.9))
            .unwrap();
        let result = validator
            .validate_plan(&["anything at all".to_string()], None)
            .unwrap();
        assert_eq!(result.warnings_count, 0);
        assert!(result.can_proceed);
    }

    #[test]
    fn test_past_failure_warning() {
        let (_dir, validator, graph, _calibration) = validator();
        let mut failed = Decision::new("migrate sessions to memcached", vec!["alt".into()], 0.8)
            .with_module("cache");
        failed.outcome = Some("failure".into());
        failed.resolved_at = Some(now_ts());
        graph.add_decision(&failed).unwrap();

        let result = validator
            .validate_plan(&["move sessions into memcached cluster".to_string()], None)
            .unwrap();
        assert_eq!(result.medium_severity, 1);
        assert_eq!(result.warnings[0].kind, WarningKind::PastFailure);
        assert!(result.can_proceed);
    }

    #[test]
    fn test_overconfidence_warning() {
        let (_dir, validator, graph, _calibration) = validator();
        // Posterior mean stays at the prior (0.5) after one failure: alpha=1, beta=2 -> 1/3.
        _calibration.update_from_outcome("api", "failure").unwrap();
        let mut d = Decision::new("ship the api rewrite", vec!["alt".into()], 0.95).with_module("api");
        d.outcome = Some("failure".into());
        graph.add_decision(&d).unwrap();

        let result = validator
            .validate_plan(&["step one".to_string()], Some("api"))
            .unwrap();
        assert_eq!(result.low_severity, 1);
        assert_eq!(result.warnings[0].kind, WarningKind::Calibration);
        assert!(result.can_proceed);
    }

    #[test]
    fn test_empty_steps_skipped() {
        let (_dir, validator, _graph, _calibration) = validator();
        let result = validator
            .validate_plan(&["".to_string(), "   ".to_string()], None)
            .unwrap();
        assert_eq!(result.total_steps, 2);
        assert_eq!(result.warnings_count, 0);
        assert!(result.can_proceed);
    }

    #[test]
    fn test_keyword_extraction() {
        let keywords = extract_keywords("Implement the custom JWT token flow", 3);
        assert!(keywords.len() <= 3);
        assert!(keywords.iter().all(|k| k.len() > 3));
        assert!(!keywords.contains(&"the".to_string()));
    }
}
