//! Pattern extraction: condensing a domain's resolved decisions into
//! success-rate statistics grouped by normalized statement.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::graph::GraphStore;

/// Decisions scanned per extraction run.
const SCAN_LIMIT: usize = 200;

/// Default minimum decisions per pattern group.
pub const DEFAULT_MIN_SAMPLE_SIZE: usize = 3;

/// A recurring decision statement with its observed success rate.
#[derive(Debug, Clone, Serialize)]
pub struct Pattern {
    pub statement: String,
    pub success_rate: f64,
    pub sample_size: usize,
    pub supporting_decisions: Vec<String>,
}

/// Lowercase and collapse whitespace so trivially-different statements group.
pub fn normalize_statement(statement: &str) -> String {
    statement
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Aggregates decisions-by-module into success-rate patterns.
pub struct PatternExtractor {
    graph: Arc<GraphStore>,
}

impl PatternExtractor {
    pub fn new(graph: Arc<GraphStore>) -> Self {
        Self { graph }
    }

    /// Patterns for one domain, highest success rate first (ties broken by
    /// sample size). Groups below `min_sample_size` are dropped.
    pub fn extract_patterns_for_domain(
        &self,
        domain: &str,
        min_sample_size: usize,
    ) -> Result<Vec<Pattern>> {
        let decisions = self.graph.get_decisions(SCAN_LIMIT, Some(domain))?;

        struct Group {
            successes: usize,
            total: usize,
            ids: Vec<String>,
        }
        // BTreeMap keeps grouping deterministic across runs.
        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        for decision in decisions {
            let Some(outcome) = &decision.outcome else {
                continue;
            };
            let key = normalize_statement(&decision.statement);
            let group = groups.entry(key).or_insert(Group {
                successes: 0,
                total: 0,
                ids: Vec::new(),
            });
            group.total += 1;
            if outcome == "success" {
                group.successes += 1;
            }
            group.ids.push(decision.id);
        }

        let mut patterns: Vec<Pattern> = groups
            .into_iter()
            .filter(|(_, g)| g.total >= min_sample_size)
            .map(|(statement, g)| Pattern {
                statement,
                success_rate: g.successes as f64 / g.total as f64,
                sample_size: g.total,
                supporting_decisions: g.ids,
            })
            .collect();

        patterns.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.sample_size.cmp(&a.sample_size))
        });
        Ok(patterns)
    }
}
