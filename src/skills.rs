//! Skill generation: condensing a domain's patterns, calibration, and
//! negative knowledge into a versioned markdown procedure.

use serde::Serialize;
use std::sync::Arc;

use crate::calibration::{CalibrationEngine, CalibrationProfile};
use crate::error::Result;
use crate::graph::{now_ts, GraphStore, NegativeKnowledge, Skill};
use crate::patterns::{Pattern, PatternExtractor};

/// Patterns required before a skill is generated.
const MIN_PATTERNS: usize = 3;

/// Success-rate bands for pattern partitioning.
const GREEN_THRESHOLD: f64 = 0.75;
const RED_THRESHOLD: f64 = 0.50;

/// NK entries quoted in the Known Failures section.
const MAX_NK_ENTRIES: usize = 5;

/// Default lifetime and review horizon for generated skills.
const SKILL_TTL_DAYS: i64 = 720;
const REVIEW_AFTER_DAYS: i64 = 90;

/// Readiness report for one domain.
#[derive(Debug, Clone, Serialize)]
pub struct SkillReadiness {
    pub domain: String,
    pub patterns: usize,
    pub has_calibration: bool,
    pub ready: bool,
    pub reason: String,
}

/// Generates procedural knowledge from team decision outcomes.
pub struct SkillGenerator {
    graph: Arc<GraphStore>,
    calibration: Arc<CalibrationEngine>,
    extractor: PatternExtractor,
}

impl SkillGenerator {
    pub fn new(graph: Arc<GraphStore>, calibration: Arc<CalibrationEngine>) -> Self {
        let extractor = PatternExtractor::new(graph.clone());
        Self {
            graph,
            calibration,
            extractor,
        }
    }

    /// Generate and persist a skill for one domain. Returns `None` when the
    /// domain has too few patterns or no calibration profile yet.
    pub fn generate_skill_for_domain(
        &self,
        domain: &str,
        min_sample_size: usize,
    ) -> Result<Option<Skill>> {
        let patterns = self
            .extractor
            .extract_patterns_for_domain(domain, min_sample_size)?;
        if patterns.len() < MIN_PATTERNS {
            tracing::info!(
                target: "membria::skills",
                domain,
                patterns = patterns.len(),
                "insufficient patterns for skill generation"
            );
            return Ok(None);
        }

        let Some(profile) = self.calibration.get_profile(domain) else {
            tracing::warn!(target: "membria::skills", domain, "no calibration profile");
            return Ok(None);
        };

        let negative_knowledge = self.graph.list_negative_knowledge(Some(domain), MAX_NK_ENTRIES)?;
        let procedure = render_procedure(domain, &patterns, &negative_knowledge, &profile);
        let quality_score = Skill::quality_score(profile.mean_success_rate, profile.sample_size);
        let version = self.graph.max_skill_version(domain)? + 1;
        let now = now_ts();

        let skill = Skill {
            id: format!("sk-{}-v{}", domain, version),
            domain: domain.to_string(),
            name: format!("{}_recommendation", domain),
            version,
            success_rate: profile.mean_success_rate,
            confidence: profile.mean_success_rate,
            sample_size: profile.sample_size,
            procedure,
            green_zone: zone(&patterns, |r| r > GREEN_THRESHOLD),
            yellow_zone: zone(&patterns, |r| (RED_THRESHOLD..=GREEN_THRESHOLD).contains(&r)),
            red_zone: zone(&patterns, |r| r < RED_THRESHOLD),
            quality_score,
            generated_from_decisions: patterns
                .iter()
                .flat_map(|p| p.supporting_decisions.iter().cloned())
                .collect(),
            created_at: now,
            last_updated: now,
            next_review: now + REVIEW_AFTER_DAYS * 86_400,
            ttl_days: Some(SKILL_TTL_DAYS),
            is_active: true,
        };

        self.graph.add_skill(&skill)?;
        tracing::info!(
            target: "membria::skills",
            skill_id = %skill.id,
            quality = quality_score,
            "skill generated"
        );
        Ok(Some(skill))
    }

    /// Generate skills for several domains; unready domains yield `None`.
    pub fn generate_skills_for_domains(
        &self,
        domains: &[String],
        min_sample_size: usize,
    ) -> Result<Vec<(String, Option<Skill>)>> {
        let mut results = Vec::with_capacity(domains.len());
        for domain in domains {
            let skill = self.generate_skill_for_domain(domain, min_sample_size)?;
            results.push((domain.clone(), skill));
        }
        Ok(results)
    }

    /// Whether each domain has enough material for a skill.
    pub fn skill_readiness(&self, domains: &[String]) -> Result<Vec<SkillReadiness>> {
        let mut readiness = Vec::with_capacity(domains.len());
        for domain in domains {
            let patterns = self.extractor.extract_patterns_for_domain(domain, 1)?.len();
            let has_calibration = self.calibration.get_profile(domain).is_some();
            let ready = patterns >= MIN_PATTERNS && has_calibration;
            let reason = if !has_calibration {
                "no calibration data (need at least one finalized outcome)".to_string()
            } else if patterns < MIN_PATTERNS {
                format!("need {} more patterns", MIN_PATTERNS - patterns)
            } else {
                "ready".to_string()
            };
            readiness.push(SkillReadiness {
                domain: domain.clone(),
                patterns,
                has_calibration,
                ready,
                reason,
            });
        }
        Ok(readiness)
    }
}

fn zone(patterns: &[Pattern], predicate: impl Fn(f64) -> bool) -> Vec<String> {
    patterns
        .iter()
        .filter(|p| predicate(p.success_rate))
        .map(|p| p.statement.clone())
        .collect()
}

fn render_procedure(
    domain: &str,
    patterns: &[Pattern],
    negative_knowledge: &[NegativeKnowledge],
    profile: &CalibrationProfile,
) -> String {
    let mut out = format!("# {} Decision Procedure\n\n", title_case(domain));

    out.push_str("## Team Experience\n\n");
    out.push_str(&format!(
        "Based on {} decisions in this domain:\n",
        profile.sample_size
    ));
    out.push_str(&format!(
        "- Success rate: {:.0}%\n",
        profile.mean_success_rate * 100.0
    ));
    out.push_str(&format!("- Trend: {}\n\n", profile.trend));

    let sections: [(&str, &dyn Fn(f64) -> bool); 3] = [
        ("## Strongly Recommend\n\n", &|r| r > GREEN_THRESHOLD),
        ("## Consider Carefully\n\n", &|r| {
            (RED_THRESHOLD..=GREEN_THRESHOLD).contains(&r)
        }),
        ("## Avoid\n\n", &|r| r < RED_THRESHOLD),
    ];
    for (heading, predicate) in sections {
        let members: Vec<&Pattern> = patterns
            .iter()
            .filter(|p| predicate(p.success_rate))
            .collect();
        if members.is_empty() {
            continue;
        }
        out.push_str(heading);
        for p in members {
            out.push_str(&format!(
                "- **{}** ({:.0}% success, {} decisions)\n",
                p.statement,
                p.success_rate * 100.0,
                p.sample_size
            ));
        }
        out.push('\n');
    }

    if !negative_knowledge.is_empty() {
        out.push_str("## Known Failures\n\n");
        for nk in negative_knowledge.iter().take(MAX_NK_ENTRIES) {
            if nk.hypothesis.is_empty() || nk.conclusion.is_empty() {
                continue;
            }
            out.push_str(&format!("- {}: {}\n", nk.hypothesis, nk.conclusion));
        }
        out.push('\n');
    }

    out
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;
    use crate::graph::{Decision, Severity};

    fn setup(with_calibration: bool) -> (tempfile::TempDir, SkillGenerator, Arc<GraphStore>) {
        let dir = tempfile::tempdir().unwrap();
        let graph = Arc::new(GraphStore::in_memory(Namespace::default()).unwrap());
        let calibration = Arc::new(CalibrationEngine::open(dir.path().join("cal")).unwrap());

        // Three stable patterns with distinct success rates.
        let rows = [
            ("use postgres", "success", 3, 0),
            ("cache reads in redis", "success", 2, 1),
            ("hand-rolled migrations", "failure", 0, 3),
        ];
        for (stmt, _, successes, failures) in rows {
            for i in 0..(successes + failures) {
                let mut d = Decision::new(stmt, vec!["alt".into()], 0.7).with_module("database");
                d.outcome = Some(if i < successes { "success" } else { "failure" }.to_string());
                graph.add_decision(&d).unwrap();
            }
        }
        if with_calibration {
            for _ in 0..8 {
                calibration.update_from_outcome("database", "success").unwrap();
            }
            for _ in 0..2 {
                calibration.update_from_outcome("database", "failure").unwrap();
            }
        }
        let generator = SkillGenerator::new(graph.clone(), calibration);
        (dir, generator, graph)
    }

    #[test]
    fn test_generates_versioned_skill() {
        let (_dir, generator, graph) = setup(true);
        let skill = generator
            .generate_skill_for_domain("database", 3)
            .unwrap()
            .unwrap();
        assert_eq!(skill.id, "sk-database-v1");
        assert_eq!(skill.version, 1);
        assert_eq!(skill.green_zone, vec!["use postgres"]);
        assert_eq!(skill.yellow_zone, vec!["cache reads in redis"]);
        assert_eq!(skill.red_zone, vec!["hand-rolled migrations"]);
        assert_eq!(skill.ttl_days, Some(720));
        assert_eq!(skill.next_review, skill.created_at + 90 * 86_400);

        // Quality follows the documented formula.
        let expected = skill.success_rate * (1.0 - 1.0 / (skill.sample_size as f64).sqrt());
        assert!((skill.quality_score - expected).abs() < 1e-9);

        // Next generation bumps the version.
        let next = generator
            .generate_skill_for_domain("database", 3)
            .unwrap()
            .unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(graph.max_skill_version("database").unwrap(), 2);
    }

    #[test]
    fn test_procedure_sections() {
        let (_dir, generator, graph) = setup(true);
        graph
            .add_negative_knowledge(&NegativeKnowledge::new(
                "orm-generated DDL in prod",
                "write migrations by hand",
                "database",
                Severity::High,
            ))
            .unwrap();
        let skill = generator
            .generate_skill_for_domain("database", 3)
            .unwrap()
            .unwrap();
        assert!(skill.procedure.contains("# Database Decision Procedure"));
        assert!(skill.procedure.contains("## Team Experience"));
        assert!(skill.procedure.contains("## Strongly Recommend"));
        assert!(skill.procedure.contains("## Consider Carefully"));
        assert!(skill.procedure.contains("## Avoid"));
        assert!(skill.procedure.contains("## Known Failures"));
        assert!(skill.procedure.contains("orm-generated DDL in prod"));
    }

    #[test]
    fn test_no_calibration_no_skill() {
        let (_dir, generator, _graph) = setup(false);
        assert!(generator
            .generate_skill_for_domain("database", 3)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_too_few_patterns_no_skill() {
        let (_dir, generator, _graph) = setup(true);
        // min_sample_size 4 filters every group out.
        assert!(generator
            .generate_skill_for_domain("database", 4)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_readiness_report() {
        let (_dir, generator, _graph) = setup(true);
        let report = generator
            .skill_readiness(&["database".to_string(), "ghost".to_string()])
            .unwrap();
        assert!(report[0].ready);
        assert_eq!(report[0].reason, "ready");
        assert!(!report[1].ready);
        assert!(report[1].reason.contains("no calibration"));
    }
}
