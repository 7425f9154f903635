//! Read-only analytics over the decision graph.
//!
//! A fixed library of aggregate queries consumed by other core components
//! (context manager, skill generator, plan builder). External callers never
//! reach these directly. Optional node properties (`actual_success_rate`,
//! similarity scores) are treated as nullable throughout.

use rusqlite::params;
use serde::Serialize;

use crate::error::Result;
use crate::graph::store::GraphStore;
use crate::graph::types::{now_ts, EdgeType};

/// Success rate aggregated per module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSuccessRate {
    pub module: String,
    pub successes: i64,
    pub total: i64,
    pub success_rate: f64,
}

/// Calibration bucket: decisions grouped by 1/10-width confidence bands.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceBucket {
    pub confidence_bucket: f64,
    pub successes: i64,
    pub total: i64,
    pub actual_rate: Option<f64>,
    pub calibration_status: String,
}

/// Rework statistics for one decision.
#[derive(Debug, Clone, Serialize)]
pub struct ReworkStat {
    pub decision_id: String,
    pub statement: String,
    pub module: String,
    pub confidence: f64,
    pub rework_count: i64,
    pub avg_days_to_rework: Option<f64>,
}

/// Prevention value of one NK entry.
#[derive(Debug, Clone, Serialize)]
pub struct PreventionStat {
    pub nk_id: String,
    pub hypothesis: String,
    pub severity: String,
    pub domain: String,
    pub decisions_prevented: i64,
    pub recommendation: String,
}

/// Learned failures per domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainFailures {
    pub domain: String,
    pub failure_count: i64,
    pub failures: Vec<String>,
}

/// One step of a decision's causal chain.
#[derive(Debug, Clone, Serialize)]
pub struct CausalLink {
    pub edge_type: String,
    pub from_id: String,
    pub to_id: String,
}

/// Per-session decision counts.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDecisionCount {
    pub engram_id: String,
    pub session_id: String,
    pub decision_count: i64,
    pub failure_count: i64,
}

/// One point of a 7-day-window trend series.
#[derive(Debug, Clone, Serialize)]
pub struct TrendPoint {
    pub window_start: i64,
    pub total: i64,
    pub value: Option<f64>,
}

/// A past planning session in one domain.
#[derive(Debug, Clone, Serialize)]
pub struct PastPlan {
    pub engram_id: String,
    pub session_id: String,
    pub decision_count: i64,
    pub success_count: i64,
    pub created_at: i64,
}

/// Node and edge counts for the whole graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphStatistics {
    pub decisions: i64,
    pub code_changes: i64,
    pub outcomes: i64,
    pub negative_knowledge: i64,
    pub antipatterns: i64,
    pub engrams: i64,
    pub skills: i64,
    pub documents: i64,
    pub session_contexts: i64,
    pub edges: i64,
}

const SEVEN_DAYS: i64 = 7 * 86_400;

impl GraphStore {
    /// Success rate of resolved decisions by module, highest first.
    pub fn success_rate_by_module(&self) -> Result<Vec<ModuleSuccessRate>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT module,
                        SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END) AS successes,
                        COUNT(*) AS total
                 FROM decisions
                 WHERE outcome IS NOT NULL
                   AND tenant_id = ?1 AND team_id = ?2 AND project_id = ?3
                 GROUP BY module",
            )?;
            let mut rows: Vec<ModuleSuccessRate> = stmt
                .query_map(params![ns.tenant_id, ns.team_id, ns.project_id], |row| {
                    let successes: i64 = row.get(1)?;
                    let total: i64 = row.get(2)?;
                    Ok(ModuleSuccessRate {
                        module: row.get(0)?,
                        successes,
                        total,
                        success_rate: if total > 0 {
                            successes as f64 / total as f64
                        } else {
                            0.0
                        },
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            rows.sort_by(|a, b| {
                b.success_rate
                    .partial_cmp(&a.success_rate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            Ok(rows)
        })
    }

    /// Confidence vs. observed success, in 1/10-width buckets.
    pub fn success_rate_by_confidence_bucket(&self) -> Result<Vec<ConfidenceBucket>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ROUND(confidence * 10) / 10.0 AS bucket,
                        SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END) AS successes,
                        COUNT(*) AS total,
                        AVG(actual_success_rate) AS actual_rate
                 FROM decisions
                 WHERE outcome IS NOT NULL
                   AND tenant_id = ?1 AND team_id = ?2 AND project_id = ?3
                 GROUP BY bucket
                 ORDER BY bucket DESC",
            )?;
            let rows = stmt
                .query_map(params![ns.tenant_id, ns.team_id, ns.project_id], |row| {
                    let bucket: f64 = row.get(0)?;
                    let actual_rate: Option<f64> = row.get(3)?;
                    let status = match actual_rate {
                        None => "unknown".to_string(),
                        Some(rate) if (bucket - rate).abs() < 0.05 => "well-calibrated".to_string(),
                        Some(rate) if bucket > rate => "overconfident".to_string(),
                        Some(_) => "underconfident".to_string(),
                    };
                    Ok(ConfidenceBucket {
                        confidence_bucket: bucket,
                        successes: row.get(1)?,
                        total: row.get(2)?,
                        actual_rate,
                        calibration_status: status,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// Decisions ordered by how often they were reworked.
    pub fn decisions_by_rework_count(&self) -> Result<Vec<ReworkStat>> {
        self.rework_stats(None)
    }

    /// Rework rate among decisions captured with confidence in 0.6..=0.7.
    pub fn low_confidence_rework_stats(&self) -> Result<Vec<ReworkStat>> {
        self.rework_stats(Some((0.6, 0.7)))
    }

    fn rework_stats(&self, confidence_band: Option<(f64, f64)>) -> Result<Vec<ReworkStat>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT d.id, d.statement, d.module, d.confidence,
                        COUNT(e.id) AS rework_count,
                        AVG(CAST(json_extract(e.properties, '$.days_to_revert') AS REAL)) AS avg_days
                 FROM decisions d
                 JOIN edges e ON e.edge_type = 'REWORKED_BY' AND e.from_id = d.id
                   AND e.tenant_id = d.tenant_id AND e.team_id = d.team_id
                   AND e.project_id = d.project_id
                 WHERE d.tenant_id = ?1 AND d.team_id = ?2 AND d.project_id = ?3",
            );
            if confidence_band.is_some() {
                sql.push_str(" AND d.confidence >= ?4 AND d.confidence <= ?5");
            }
            sql.push_str(" GROUP BY d.id ORDER BY rework_count DESC");

            let map_row = |row: &rusqlite::Row| -> rusqlite::Result<ReworkStat> {
                Ok(ReworkStat {
                    decision_id: row.get(0)?,
                    statement: row.get(1)?,
                    module: row.get(2)?,
                    confidence: row.get(3)?,
                    rework_count: row.get(4)?,
                    avg_days_to_rework: row.get(5)?,
                })
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = if let Some((lo, hi)) = confidence_band {
                stmt.query_map(
                    params![ns.tenant_id, ns.team_id, ns.project_id, lo, hi],
                    map_row,
                )?
                .filter_map(|r| r.ok())
                .collect()
            } else {
                stmt.query_map(params![ns.tenant_id, ns.team_id, ns.project_id], map_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            };
            Ok(rows)
        })
    }

    /// How many decisions each NK entry has prevented.
    pub fn negative_knowledge_prevention_value(&self) -> Result<Vec<PreventionStat>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT nk.id, nk.hypothesis, nk.severity, nk.domain,
                        COUNT(e.id) AS prevented, nk.recommendation
                 FROM negative_knowledge nk
                 JOIN edges e ON e.edge_type = 'PREVENTED' AND e.from_id = nk.id
                   AND e.tenant_id = nk.tenant_id AND e.team_id = nk.team_id
                   AND e.project_id = nk.project_id
                 WHERE nk.tenant_id = ?1 AND nk.team_id = ?2 AND nk.project_id = ?3
                 GROUP BY nk.id
                 ORDER BY prevented DESC",
            )?;
            let rows = stmt
                .query_map(params![ns.tenant_id, ns.team_id, ns.project_id], |row| {
                    Ok(PreventionStat {
                        nk_id: row.get(0)?,
                        hypothesis: row.get(1)?,
                        severity: row.get(2)?,
                        domain: row.get(3)?,
                        decisions_prevented: row.get(4)?,
                        recommendation: row.get(5)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// NK domains with no prevention edges yet: knowledge that exists but has
    /// never blocked anything.
    pub fn prevention_gaps(&self) -> Result<Vec<String>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT nk.domain
                 FROM negative_knowledge nk
                 LEFT JOIN edges e ON e.edge_type = 'PREVENTED' AND e.from_id = nk.id
                   AND e.tenant_id = nk.tenant_id AND e.team_id = nk.team_id
                   AND e.project_id = nk.project_id
                 WHERE nk.tenant_id = ?1 AND nk.team_id = ?2 AND nk.project_id = ?3
                 GROUP BY nk.domain
                 HAVING COUNT(e.id) = 0",
            )?;
            let rows = stmt
                .query_map(params![ns.tenant_id, ns.team_id, ns.project_id], |row| {
                    row.get(0)
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// What the team has learned not to do, grouped by domain.
    pub fn learned_failures_by_domain(&self) -> Result<Vec<DomainFailures>> {
        let nk = self.list_negative_knowledge(None, 200)?;
        let mut by_domain: std::collections::BTreeMap<String, Vec<String>> = Default::default();
        for entry in nk {
            by_domain
                .entry(entry.domain)
                .or_default()
                .push(entry.hypothesis);
        }
        let mut rows: Vec<DomainFailures> = by_domain
            .into_iter()
            .map(|(domain, failures)| DomainFailures {
                domain,
                failure_count: failures.len() as i64,
                failures,
            })
            .collect();
        rows.sort_by(|a, b| b.failure_count.cmp(&a.failure_count));
        Ok(rows)
    }

    /// Antipattern ids triggered by code changes, with trigger counts.
    pub fn antipatterns_triggered_in_changes(&self) -> Result<Vec<(String, i64)>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT to_id, COUNT(*) AS triggers
                 FROM edges
                 WHERE edge_type = 'TRIGGERED'
                   AND tenant_id = ?1 AND team_id = ?2 AND project_id = ?3
                 GROUP BY to_id
                 ORDER BY triggers DESC",
            )?;
            let rows = stmt
                .query_map(params![ns.tenant_id, ns.team_id, ns.project_id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// Full causal chain for a decision: implementations, reworks, outcomes,
    /// and NK entries caused by those outcomes.
    pub fn get_causal_chain(&self, decision_id: &str) -> Result<Vec<CausalLink>> {
        let mut chain = Vec::new();
        for edge_type in [EdgeType::ImplementedIn, EdgeType::ReworkedBy] {
            for target in self.edge_targets(edge_type, decision_id)? {
                chain.push(CausalLink {
                    edge_type: edge_type.as_str().to_string(),
                    from_id: decision_id.to_string(),
                    to_id: target,
                });
            }
        }
        // CodeChange -> Outcome -> NegativeKnowledge, one hop at a time.
        let implemented: Vec<String> = chain
            .iter()
            .filter(|l| l.edge_type == "IMPLEMENTED_IN")
            .map(|l| l.to_id.clone())
            .collect();
        for change_id in implemented {
            for outcome_id in self.edge_targets(EdgeType::ResultedIn, &change_id)? {
                chain.push(CausalLink {
                    edge_type: "RESULTED_IN".to_string(),
                    from_id: change_id.clone(),
                    to_id: outcome_id.clone(),
                });
                for nk_id in self.edge_targets(EdgeType::Caused, &outcome_id)? {
                    chain.push(CausalLink {
                        edge_type: "CAUSED".to_string(),
                        from_id: outcome_id.clone(),
                        to_id: nk_id,
                    });
                }
            }
        }
        Ok(chain)
    }

    /// Decisions grouped by the engram (session) that produced them, with
    /// failure counts. High-risk sessions are those with any failures.
    pub fn decisions_per_session(&self) -> Result<Vec<SessionDecisionCount>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.session_id,
                        COUNT(d.id) AS decision_count,
                        SUM(CASE WHEN d.outcome = 'failure' THEN 1 ELSE 0 END) AS failures
                 FROM engrams e
                 JOIN decisions d ON d.engram_id = e.id
                   AND d.tenant_id = e.tenant_id AND d.team_id = e.team_id
                   AND d.project_id = e.project_id
                 WHERE e.tenant_id = ?1 AND e.team_id = ?2 AND e.project_id = ?3
                 GROUP BY e.id
                 ORDER BY decision_count DESC",
            )?;
            let rows = stmt
                .query_map(params![ns.tenant_id, ns.team_id, ns.project_id], |row| {
                    Ok(SessionDecisionCount {
                        engram_id: row.get(0)?,
                        session_id: row.get(1)?,
                        decision_count: row.get(2)?,
                        failure_count: row.get(3)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// Sessions whose decisions failed at least once.
    pub fn high_risk_sessions(&self) -> Result<Vec<SessionDecisionCount>> {
        Ok(self
            .decisions_per_session()?
            .into_iter()
            .filter(|s| s.failure_count > 0)
            .collect())
    }

    /// Success rate in 7-day windows over resolved decisions.
    pub fn success_rate_over_time(&self) -> Result<Vec<TrendPoint>> {
        self.windowed_trend(
            "SUM(CASE WHEN outcome = 'success' THEN 1.0 ELSE 0.0 END) / COUNT(*)",
            "outcome IS NOT NULL",
        )
    }

    /// Average captured confidence in 7-day windows.
    pub fn confidence_trend(&self) -> Result<Vec<TrendPoint>> {
        self.windowed_trend("AVG(confidence)", "1=1")
    }

    fn windowed_trend(&self, aggregate: &str, filter: &str) -> Result<Vec<TrendPoint>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT (created_at / {SEVEN_DAYS}) * {SEVEN_DAYS} AS window_start,
                        COUNT(*) AS total,
                        {aggregate} AS value
                 FROM decisions
                 WHERE {filter}
                   AND tenant_id = ?1 AND team_id = ?2 AND project_id = ?3
                 GROUP BY window_start
                 ORDER BY window_start"
            ))?;
            let rows = stmt
                .query_map(params![ns.tenant_id, ns.team_id, ns.project_id], |row| {
                    Ok(TrendPoint {
                        window_start: row.get(0)?,
                        total: row.get(1)?,
                        value: row.get(2)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// Decisions older than a day with no outcome recorded yet.
    pub fn decisions_without_outcome(&self) -> Result<Vec<String>> {
        let ns = self.namespace().clone();
        let cutoff = now_ts() - 86_400;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.id FROM decisions d
                 LEFT JOIN outcomes o ON o.decision_id = d.id
                   AND o.tenant_id = d.tenant_id AND o.team_id = d.team_id
                   AND o.project_id = d.project_id
                 WHERE d.outcome IS NULL AND d.created_at < ?1
                   AND d.tenant_id = ?2 AND d.team_id = ?3 AND d.project_id = ?4
                 GROUP BY d.id
                 HAVING COUNT(o.id) = 0",
            )?;
            let rows = stmt
                .query_map(
                    params![cutoff, ns.tenant_id, ns.team_id, ns.project_id],
                    |row| row.get(0),
                )?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// Node and edge counts for the whole namespace.
    pub fn graph_statistics(&self) -> Result<GraphStatistics> {
        let ns = self.namespace().clone();
        let count = |table: &str| -> Result<i64> {
            self.with_conn(|conn| {
                conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {table}
                         WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3"
                    ),
                    params![ns.tenant_id, ns.team_id, ns.project_id],
                    |row| row.get(0),
                )
            })
        };
        Ok(GraphStatistics {
            decisions: count("decisions")?,
            code_changes: count("code_changes")?,
            outcomes: count("outcomes")?,
            negative_knowledge: count("negative_knowledge")?,
            antipatterns: count("antipatterns")?,
            engrams: count("engrams")?,
            skills: count("skills")?,
            documents: count("documents")?,
            session_contexts: count("session_contexts")?,
            edges: count("edges")?,
        })
    }

    /// Recent engrams whose decisions touched a domain, with success counts.
    pub fn past_plans_for_domain(&self, domain: &str, limit: usize) -> Result<Vec<PastPlan>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.session_id, COUNT(d.id) AS decisions,
                        SUM(CASE WHEN d.outcome = 'success' THEN 1 ELSE 0 END) AS successes,
                        e.created_at
                 FROM engrams e
                 JOIN decisions d ON d.engram_id = e.id AND d.module = ?1
                   AND d.tenant_id = e.tenant_id AND d.team_id = e.team_id
                   AND d.project_id = e.project_id
                 WHERE e.tenant_id = ?2 AND e.team_id = ?3 AND e.project_id = ?4
                 GROUP BY e.id
                 ORDER BY e.created_at DESC
                 LIMIT ?5",
            )?;
            let rows = stmt
                .query_map(
                    params![domain, ns.tenant_id, ns.team_id, ns.project_id, limit as i64],
                    |row| {
                        Ok(PastPlan {
                            engram_id: row.get(0)?,
                            session_id: row.get(1)?,
                            decision_count: row.get(2)?,
                            success_count: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// Average stated confidence of resolved decisions in a domain.
    pub fn average_confidence(&self, domain: &str) -> Result<Option<f64>> {
        let ns = self.namespace().clone();
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT AVG(confidence) FROM decisions
                 WHERE module = ?1 AND outcome IS NOT NULL
                   AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                params![domain, ns.tenant_id, ns.team_id, ns.project_id],
                |row| row.get(0),
            )
        })
    }

    /// Failed decisions in a domain whose statement contains a keyword.
    pub fn failed_decisions_matching(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<(String, String, String)>> {
        let ns = self.namespace().clone();
        let pattern = format!("%{}%", keyword.replace('%', "").replace('_', ""));
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, statement, module FROM decisions
                 WHERE outcome = 'failure' AND statement LIKE ?1
                   AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4
                 ORDER BY resolved_at DESC
                 LIMIT ?5",
            )?;
            let rows = stmt
                .query_map(
                    params![pattern, ns.tenant_id, ns.team_id, ns.project_id, limit as i64],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;
    use crate::graph::types::*;
    use serde_json::json;

    fn seeded_store() -> GraphStore {
        let s = GraphStore::in_memory(Namespace::default()).unwrap();
        for (stmt, module, outcome, confidence) in [
            ("use postgres", "database", Some("success"), 0.9),
            ("use postgres", "database", Some("success"), 0.8),
            ("custom orm layer", "database", Some("failure"), 0.65),
            ("jwt middleware", "auth", Some("success"), 0.7),
        ] {
            let mut d = Decision::new(stmt, vec!["alt".into()], confidence).with_module(module);
            d.outcome = outcome.map(String::from);
            d.resolved_at = Some(now_ts());
            s.add_decision(&d).unwrap();
        }
        s
    }

    #[test]
    fn test_success_rate_by_module() {
        let s = seeded_store();
        let rates = s.success_rate_by_module().unwrap();
        assert_eq!(rates.len(), 2);
        // auth (1/1) sorts above database (2/3)
        assert_eq!(rates[0].module, "auth");
        assert_eq!(rates[0].total, 1);
        let db = &rates[1];
        assert_eq!(db.module, "database");
        assert_eq!(db.successes, 2);
        assert_eq!(db.total, 3);
        assert!((db.success_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_buckets() {
        let s = seeded_store();
        let buckets = s.success_rate_by_confidence_bucket().unwrap();
        assert!(!buckets.is_empty());
        // No actual_success_rate recorded anywhere -> status unknown.
        assert!(buckets.iter().all(|b| b.calibration_status == "unknown"));
    }

    #[test]
    fn test_rework_counting() {
        let s = seeded_store();
        let d = s.get_decisions(10, Some("database")).unwrap().remove(0);
        s.create_relationship(
            EdgeType::ReworkedBy,
            "Decision",
            &d.id,
            "CodeChange",
            "cc_1",
            json!({"days_to_revert": 3.0, "reason": "regression"}),
        )
        .unwrap();
        s.create_relationship(
            EdgeType::ReworkedBy,
            "Decision",
            &d.id,
            "CodeChange",
            "cc_2",
            json!({"days_to_revert": 5.0, "reason": "perf"}),
        )
        .unwrap();

        let stats = s.decisions_by_rework_count().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].rework_count, 2);
        assert_eq!(stats[0].avg_days_to_rework, Some(4.0));
    }

    #[test]
    fn test_prevention_value_and_gaps() {
        let s = seeded_store();
        let nk1 = NegativeKnowledge::new("custom jwt", "use a library", "auth", Severity::High);
        let nk2 = NegativeKnowledge::new("orm everywhere", "raw sql ok", "database", Severity::Medium);
        s.add_negative_knowledge(&nk1).unwrap();
        s.add_negative_knowledge(&nk2).unwrap();
        s.create_relationship(
            EdgeType::Prevented,
            "NegativeKnowledge",
            &nk1.id,
            "Decision",
            "dec_blocked",
            json!({"blocked_at": now_ts()}),
        )
        .unwrap();

        let value = s.negative_knowledge_prevention_value().unwrap();
        assert_eq!(value.len(), 1);
        assert_eq!(value[0].decisions_prevented, 1);

        let gaps = s.prevention_gaps().unwrap();
        assert_eq!(gaps, vec!["database".to_string()]);
    }

    #[test]
    fn test_causal_chain() {
        let s = seeded_store();
        s.create_relationship(EdgeType::ImplementedIn, "Decision", "dec_x", "CodeChange", "cc_1", json!({}))
            .unwrap();
        s.create_relationship(EdgeType::ResultedIn, "CodeChange", "cc_1", "Outcome", "out_1", json!({}))
            .unwrap();
        s.create_relationship(EdgeType::Caused, "Outcome", "out_1", "NegativeKnowledge", "nk_1", json!({}))
            .unwrap();

        let chain = s.get_causal_chain("dec_x").unwrap();
        let types: Vec<&str> = chain.iter().map(|l| l.edge_type.as_str()).collect();
        assert_eq!(types, vec!["IMPLEMENTED_IN", "RESULTED_IN", "CAUSED"]);
    }

    #[test]
    fn test_sessions_and_risk() {
        let s = seeded_store();
        let engram = Engram::new("sess-1");
        s.add_engram(&engram).unwrap();
        let mut d = Decision::new("risky change", vec!["alt".into()], 0.4);
        d.engram_id = Some(engram.id.clone());
        d.outcome = Some("failure".into());
        s.add_decision(&d).unwrap();

        let sessions = s.decisions_per_session().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].decision_count, 1);
        assert_eq!(s.high_risk_sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_graph_statistics() {
        let s = seeded_store();
        let stats = s.graph_statistics().unwrap();
        assert_eq!(stats.decisions, 4);
        assert_eq!(stats.outcomes, 0);
    }

    #[test]
    fn test_failed_decisions_matching() {
        let s = seeded_store();
        let hits = s.failed_decisions_matching("orm", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1.contains("orm"));
        assert!(s.failed_decisions_matching("postgres", 5).unwrap().is_empty());
    }

    #[test]
    fn test_trends() {
        let s = seeded_store();
        let success = s.success_rate_over_time().unwrap();
        assert_eq!(success.len(), 1);
        assert!((success[0].value.unwrap() - 0.75).abs() < 1e-9);
        let confidence = s.confidence_trend().unwrap();
        assert_eq!(confidence[0].total, 4);
    }
}
