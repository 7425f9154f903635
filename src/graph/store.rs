//! Embedded graph store with typed accessors.
//!
//! The store wraps one SQLite connection behind a mutex. Connection state is
//! explicit: every public method refuses with [`Error::NotConnected`] until
//! [`GraphStore::connect`] succeeds, and no partial writes occur. The
//! namespace triple from the configuration is injected into every read and
//! write; user-supplied text is sanitized before parameter binding.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::Namespace;
use crate::error::{Error, Result};
use crate::graph::schema::{initialize_schema, migration_history};
use crate::graph::types::*;
use crate::sanitize::{
    sanitize_list, sanitize_text, MAX_EVIDENCE_LEN, MAX_FILE_PATH_LEN, MAX_NAME_LEN,
    MAX_STATEMENT_LEN,
};

/// Where the graph database lives.
#[derive(Debug, Clone)]
enum GraphTarget {
    File(PathBuf),
    Memory,
}

/// Health snapshot returned by [`GraphStore::health_check`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphHealth {
    pub status: String,
    pub connected: bool,
    pub path: String,
}

/// Typed client over the embedded property graph.
pub struct GraphStore {
    conn: Mutex<Option<Connection>>,
    namespace: Namespace,
    target: GraphTarget,
}

impl GraphStore {
    /// Create a disconnected store for a database file. Call
    /// [`GraphStore::connect`] before use.
    pub fn new(path: impl AsRef<Path>, namespace: Namespace) -> Self {
        Self {
            conn: Mutex::new(None),
            namespace,
            target: GraphTarget::File(path.as_ref().to_path_buf()),
        }
    }

    /// Create a connected in-memory store (for testing).
    pub fn in_memory(namespace: Namespace) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(None),
            namespace,
            target: GraphTarget::Memory,
        };
        store.connect()?;
        Ok(store)
    }

    /// Open the database and initialize the schema.
    pub fn connect(&self) -> Result<()> {
        let conn = match &self.target {
            GraphTarget::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
            GraphTarget::Memory => Connection::open_in_memory()?,
        };
        initialize_schema(&conn).map_err(|e| Error::QueryFailed(e.to_string()))?;

        let mut guard = self
            .conn
            .lock()
            .map_err(|_| Error::query("connection mutex poisoned"))?;
        *guard = Some(conn);
        tracing::info!(target: "membria::graph", "connected to graph store");
        Ok(())
    }

    /// Drop the connection; subsequent calls fail with `NotConnected`.
    pub fn disconnect(&self) {
        if let Ok(mut guard) = self.conn.lock() {
            *guard = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Check graph health and connectivity.
    pub fn health_check(&self) -> GraphHealth {
        let path = match &self.target {
            GraphTarget::File(p) => p.display().to_string(),
            GraphTarget::Memory => ":memory:".to_string(),
        };
        if !self.is_connected() {
            return GraphHealth {
                status: "disconnected".to_string(),
                connected: false,
                path,
            };
        }
        match self.with_conn(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))) {
            Ok(_) => GraphHealth {
                status: "healthy".to_string(),
                connected: true,
                path,
            },
            Err(e) => {
                tracing::warn!(target: "membria::graph", error = %e, "health check failed");
                GraphHealth {
                    status: "error".to_string(),
                    connected: true,
                    path,
                }
            }
        }
    }

    /// Applied schema migrations, oldest first.
    pub fn migration_history(&self) -> Result<Vec<(i32, String)>> {
        self.with_conn(migration_history)
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| Error::query("connection mutex poisoned"))?;
        let conn = guard.as_ref().ok_or(Error::NotConnected)?;
        f(conn).map_err(|e| {
            tracing::error!(target: "membria::graph", error = %e, "query failed");
            Error::QueryFailed(e.to_string())
        })
    }

    fn ns(&self) -> (&str, &str, &str) {
        (
            &self.namespace.tenant_id,
            &self.namespace.team_id,
            &self.namespace.project_id,
        )
    }

    // ==================== Decisions ====================

    /// Add a decision node.
    pub fn add_decision(&self, decision: &Decision) -> Result<()> {
        if !(0.0..=1.0).contains(&decision.confidence) {
            return Err(Error::invariant("confidence must be within 0..=1"));
        }
        let (tenant, team, project) = self.ns();
        let statement = sanitize_text(&decision.statement, MAX_STATEMENT_LEN);
        let alternatives =
            serde_json::to_string(&sanitize_list(&decision.alternatives, 200))?;
        let embedding = decision.embedding.as_ref().map(embedding_blob);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO decisions (
                    id, statement, alternatives, confidence, module, created_at, created_by,
                    outcome, resolved_at, actual_success_rate, engram_id, commit_sha,
                    memory_type, memory_subject, ttl_days, last_verified_at, is_active,
                    deprecated_reason, source, role_id, assignment_id, embedding,
                    tenant_id, team_id, project_id
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25)",
                params![
                    decision.id,
                    statement,
                    alternatives,
                    decision.confidence,
                    sanitize_text(&decision.module, MAX_NAME_LEN),
                    decision.created_at,
                    sanitize_text(&decision.created_by, MAX_NAME_LEN),
                    decision.outcome,
                    decision.resolved_at,
                    decision.actual_success_rate,
                    decision.engram_id,
                    decision.commit_sha,
                    decision.memory_type,
                    decision.memory_subject,
                    decision.ttl_days,
                    decision.last_verified_at,
                    decision.is_active,
                    decision.deprecated_reason,
                    decision.source,
                    decision.role_id,
                    decision.assignment_id,
                    embedding,
                    tenant,
                    team,
                    project,
                ],
            )?;
            Ok(())
        })?;
        tracing::info!(target: "membria::graph", decision_id = %decision.id, "added decision");
        Ok(())
    }

    /// Get a decision by id.
    pub fn get_decision(&self, id: &str) -> Result<Option<Decision>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {DECISION_COLUMNS} FROM decisions
                     WHERE id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4"
                ),
                params![id, tenant, team, project],
                decision_from_row,
            )
            .optional()
        })
    }

    /// Recent decisions, optionally filtered by module.
    pub fn get_decisions(&self, limit: usize, module: Option<&str>) -> Result<Vec<Decision>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {DECISION_COLUMNS} FROM decisions
                 WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3"
            );
            if module.is_some() {
                sql.push_str(" AND module = ?4");
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ?");
            let mut stmt = conn.prepare(&sql)?;
            let limit = limit as i64;
            let rows = if let Some(module) = module {
                stmt.query_map(params![tenant, team, project, module, limit], decision_from_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            } else {
                stmt.query_map(params![tenant, team, project, limit], decision_from_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            };
            Ok(rows)
        })
    }

    /// Set outcome fields on a decision (outcome tracker only).
    pub fn set_decision_outcome(
        &self,
        decision_id: &str,
        outcome: &str,
        resolved_at: i64,
        actual_success_rate: Option<f64>,
    ) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE decisions SET outcome = ?1, resolved_at = ?2, actual_success_rate = ?3
                 WHERE id = ?4 AND tenant_id = ?5 AND team_id = ?6 AND project_id = ?7",
                params![outcome, resolved_at, actual_success_rate, decision_id, tenant, team, project],
            )
        })?;
        if updated == 0 {
            // Outcomes can arrive for decisions captured elsewhere; tolerated.
            tracing::debug!(target: "membria::graph", decision_id, "no decision row to resolve");
        }
        Ok(())
    }

    /// Apply memory-lifecycle updates to a decision.
    pub fn update_decision_memory(&self, decision_id: &str, update: &MemoryUpdate) -> Result<bool> {
        let (tenant, team, project) = self.ns();
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE decisions SET
                    memory_type = COALESCE(?1, memory_type),
                    memory_subject = COALESCE(?2, memory_subject),
                    ttl_days = COALESCE(?3, ttl_days),
                    last_verified_at = COALESCE(?4, last_verified_at),
                    is_active = COALESCE(?5, is_active),
                    deprecated_reason = COALESCE(?6, deprecated_reason)
                 WHERE id = ?7 AND tenant_id = ?8 AND team_id = ?9 AND project_id = ?10",
                params![
                    update.memory_type,
                    update.memory_subject,
                    update.ttl_days,
                    update.last_verified_at,
                    update.is_active,
                    update.deprecated_reason,
                    decision_id,
                    tenant,
                    team,
                    project,
                ],
            )
        })?;
        Ok(updated > 0)
    }

    // ==================== Engrams ====================

    pub fn add_engram(&self, engram: &Engram) -> Result<()> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO engrams (
                    id, session_id, commit_sha, branch, created_at, decisions_extracted,
                    files_changed, intent, agent_type, agent_model, session_duration_sec,
                    total_tokens, tenant_id, team_id, project_id
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                params![
                    engram.id,
                    engram.session_id,
                    engram.commit_sha,
                    engram.branch,
                    engram.created_at,
                    engram.decisions_extracted,
                    engram.files_changed,
                    engram.intent,
                    engram.agent_type,
                    engram.agent_model,
                    engram.session_duration_sec,
                    engram.total_tokens,
                    tenant,
                    team,
                    project,
                ],
            )?;
            Ok(())
        })
    }

    /// Link engrams sharing a session id to that session context.
    pub fn link_engram_session_context(&self, session_id: &str) -> Result<u64> {
        let (tenant, team, project) = self.ns();
        let engram_ids: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM engrams
                 WHERE session_id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
            )?;
            let ids = stmt
                .query_map(params![session_id, tenant, team, project], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(ids)
        })?;

        let mut linked = 0;
        for engram_id in engram_ids {
            self.create_relationship(
                EdgeType::CapturedIn,
                "Engram",
                &engram_id,
                "SessionContext",
                session_id,
                json!({}),
            )?;
            linked += 1;
        }
        Ok(linked)
    }

    // ==================== Code changes ====================

    pub fn add_code_change(&self, change: &CodeChange) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let files = serde_json::to_string(&sanitize_list(&change.files_changed, MAX_FILE_PATH_LEN))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO code_changes (
                    id, commit_sha, files_changed, timestamp, author, decision_id, outcome,
                    reverted_by, days_to_revert, lines_added, lines_removed,
                    tenant_id, team_id, project_id
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                params![
                    change.id,
                    change.commit_sha,
                    files,
                    change.timestamp,
                    sanitize_text(&change.author, MAX_NAME_LEN),
                    change.decision_id,
                    change.outcome,
                    change.reverted_by,
                    change.days_to_revert,
                    change.lines_added,
                    change.lines_removed,
                    tenant,
                    team,
                    project,
                ],
            )?;
            Ok(())
        })
    }

    // ==================== Outcomes ====================

    pub fn add_outcome(&self, outcome: &Outcome) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let signals = serde_json::to_string(&outcome.signals)?;
        let lessons = serde_json::to_string(&outcome.lessons_learned)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO outcomes (
                    id, decision_id, status, evidence, measured_at, performance_impact,
                    reliability, maintenance_cost, code_change_id, commit_sha, pr_number,
                    pr_url, submitted_at, merged_at, completed_at, final_status, final_score,
                    lessons_learned, signals, ttl_days, is_active, deprecated_reason,
                    created_at, tenant_id, team_id, project_id
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26)",
                params![
                    outcome.id,
                    outcome.decision_id,
                    outcome.status.to_string(),
                    sanitize_text(&outcome.evidence, MAX_EVIDENCE_LEN),
                    outcome.measured_at,
                    outcome.performance_impact,
                    outcome.reliability,
                    outcome.maintenance_cost,
                    outcome.code_change_id,
                    outcome.commit_sha,
                    outcome.pr_number,
                    outcome.pr_url,
                    outcome.submitted_at,
                    outcome.merged_at,
                    outcome.completed_at,
                    outcome.final_status,
                    outcome.final_score,
                    lessons,
                    signals,
                    outcome.ttl_days,
                    outcome.is_active,
                    outcome.deprecated_reason,
                    outcome.created_at,
                    tenant,
                    team,
                    project,
                ],
            )?;
            Ok(())
        })
    }

    /// Persist the mutable fields of an outcome. Errors if the row is gone.
    pub fn update_outcome(&self, outcome: &Outcome) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let signals = serde_json::to_string(&outcome.signals)?;
        let lessons = serde_json::to_string(&outcome.lessons_learned)?;
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE outcomes SET
                    status = ?1, evidence = ?2, commit_sha = ?3, pr_number = ?4, pr_url = ?5,
                    submitted_at = ?6, merged_at = ?7, completed_at = ?8, final_status = ?9,
                    final_score = ?10, lessons_learned = ?11, signals = ?12, measured_at = ?13
                 WHERE id = ?14 AND tenant_id = ?15 AND team_id = ?16 AND project_id = ?17",
                params![
                    outcome.status.to_string(),
                    sanitize_text(&outcome.evidence, MAX_EVIDENCE_LEN),
                    outcome.commit_sha,
                    outcome.pr_number,
                    outcome.pr_url,
                    outcome.submitted_at,
                    outcome.merged_at,
                    outcome.completed_at,
                    outcome.final_status,
                    outcome.final_score,
                    lessons,
                    signals,
                    outcome.measured_at,
                    outcome.id,
                    tenant,
                    team,
                    project,
                ],
            )
        })?;
        if updated == 0 {
            return Err(Error::not_found("Outcome", &outcome.id));
        }
        Ok(())
    }

    pub fn get_outcome(&self, id: &str) -> Result<Option<Outcome>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {OUTCOME_COLUMNS} FROM outcomes
                     WHERE id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4"
                ),
                params![id, tenant, team, project],
                outcome_from_row,
            )
            .optional()
        })
    }

    pub fn list_outcomes(
        &self,
        limit: usize,
        status: Option<OutcomeStatus>,
        decision_id: Option<&str>,
    ) -> Result<Vec<Outcome>> {
        let (tenant, team, project) = self.ns();
        let status_str = status.map(|s| s.to_string());
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {OUTCOME_COLUMNS} FROM outcomes
                 WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3"
            );
            let mut argn = 4;
            if status_str.is_some() {
                sql.push_str(&format!(" AND status = ?{argn}"));
                argn += 1;
            }
            if decision_id.is_some() {
                sql.push_str(&format!(" AND decision_id = ?{argn}"));
                argn += 1;
            }
            sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ?{argn}"));

            let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(tenant.to_string()),
                Box::new(team.to_string()),
                Box::new(project.to_string()),
            ];
            if let Some(s) = &status_str {
                args.push(Box::new(s.clone()));
            }
            if let Some(d) = decision_id {
                args.push(Box::new(d.to_string()));
            }
            args.push(Box::new(limit as i64));
            let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(arg_refs.as_slice(), outcome_from_row)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// The existing outcome for a `(decision, commit)` pair, if any.
    /// Keeps repeated webhook deliveries from duplicating outcomes.
    pub fn find_outcome_for_commit(
        &self,
        decision_id: &str,
        commit_sha: &str,
    ) -> Result<Option<Outcome>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {OUTCOME_COLUMNS} FROM outcomes
                     WHERE decision_id = ?1 AND commit_sha = ?2
                       AND tenant_id = ?3 AND team_id = ?4 AND project_id = ?5
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![decision_id, commit_sha, tenant, team, project],
                outcome_from_row,
            )
            .optional()
        })
    }

    /// The most recent open (non-completed) outcome for a decision.
    pub fn find_open_outcome(&self, decision_id: &str) -> Result<Option<Outcome>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {OUTCOME_COLUMNS} FROM outcomes
                     WHERE decision_id = ?1 AND status != 'completed'
                       AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![decision_id, tenant, team, project],
                outcome_from_row,
            )
            .optional()
        })
    }

    // ==================== Negative knowledge ====================

    pub fn add_negative_knowledge(&self, nk: &NegativeKnowledge) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let embedding = nk.embedding.as_ref().map(embedding_blob);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO negative_knowledge (
                    id, hypothesis, conclusion, evidence, domain, severity, discovered_at,
                    expires_at, blocks_pattern, recommendation, source, memory_type,
                    memory_subject, ttl_days, is_active, deprecated_reason, embedding,
                    tenant_id, team_id, project_id
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
                params![
                    nk.id,
                    sanitize_text(&nk.hypothesis, MAX_STATEMENT_LEN),
                    sanitize_text(&nk.conclusion, MAX_STATEMENT_LEN),
                    sanitize_text(&nk.evidence, MAX_EVIDENCE_LEN),
                    sanitize_text(&nk.domain, MAX_NAME_LEN),
                    nk.severity.to_string(),
                    nk.discovered_at,
                    nk.expires_at,
                    nk.blocks_pattern,
                    sanitize_text(&nk.recommendation, MAX_STATEMENT_LEN),
                    nk.source,
                    nk.memory_type,
                    nk.memory_subject,
                    nk.ttl_days,
                    nk.is_active,
                    nk.deprecated_reason,
                    embedding,
                    tenant,
                    team,
                    project,
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_negative_knowledge(
        &self,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<NegativeKnowledge>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {NK_COLUMNS} FROM negative_knowledge
                 WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3
                   AND is_active = 1"
            );
            if domain.is_some() {
                sql.push_str(" AND domain = ?4");
            }
            // critical > high > medium > low, then most recent
            sql.push_str(
                " ORDER BY CASE severity
                    WHEN 'critical' THEN 0 WHEN 'high' THEN 1
                    WHEN 'medium' THEN 2 ELSE 3 END,
                  discovered_at DESC LIMIT ?",
            );
            let mut stmt = conn.prepare(&sql)?;
            let limit = limit as i64;
            let rows = if let Some(domain) = domain {
                stmt.query_map(params![tenant, team, project, domain, limit], nk_from_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            } else {
                stmt.query_map(params![tenant, team, project, limit], nk_from_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            };
            Ok(rows)
        })
    }

    pub fn get_negative_knowledge(&self, id: &str) -> Result<Option<NegativeKnowledge>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {NK_COLUMNS} FROM negative_knowledge
                     WHERE id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4"
                ),
                params![id, tenant, team, project],
                nk_from_row,
            )
            .optional()
        })
    }

    pub fn update_negative_knowledge_memory(
        &self,
        nk_id: &str,
        update: &MemoryUpdate,
    ) -> Result<bool> {
        let (tenant, team, project) = self.ns();
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE negative_knowledge SET
                    memory_type = COALESCE(?1, memory_type),
                    memory_subject = COALESCE(?2, memory_subject),
                    ttl_days = COALESCE(?3, ttl_days),
                    is_active = COALESCE(?4, is_active),
                    deprecated_reason = COALESCE(?5, deprecated_reason)
                 WHERE id = ?6 AND tenant_id = ?7 AND team_id = ?8 AND project_id = ?9",
                params![
                    update.memory_type,
                    update.memory_subject,
                    update.ttl_days,
                    update.is_active,
                    update.deprecated_reason,
                    nk_id,
                    tenant,
                    team,
                    project,
                ],
            )
        })?;
        Ok(updated > 0)
    }

    // ==================== AntiPatterns ====================

    pub fn add_antipattern(&self, ap: &AntiPattern) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let keywords = serde_json::to_string(&sanitize_list(&ap.keywords, MAX_NAME_LEN))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO antipatterns (
                    id, name, category, severity, repos_affected, occurrence_count,
                    removal_rate, avg_days_to_removal, keywords, regex_pattern,
                    example_bad, example_good, first_seen, recommendation,
                    tenant_id, team_id, project_id
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
                params![
                    ap.id,
                    sanitize_text(&ap.name, MAX_NAME_LEN),
                    ap.category,
                    ap.severity.to_string(),
                    ap.repos_affected,
                    ap.occurrence_count,
                    ap.removal_rate,
                    ap.avg_days_to_removal,
                    keywords,
                    ap.regex_pattern,
                    ap.example_bad,
                    ap.example_good,
                    ap.first_seen,
                    sanitize_text(&ap.recommendation, MAX_STATEMENT_LEN),
                    tenant,
                    team,
                    project,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_antipattern(&self, id: &str) -> Result<Option<AntiPattern>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {AP_COLUMNS} FROM antipatterns
                     WHERE id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4"
                ),
                params![id, tenant, team, project],
                antipattern_from_row,
            )
            .optional()
        })
    }

    /// AntiPatterns ordered by removal rate, highest first.
    pub fn list_antipatterns(
        &self,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<AntiPattern>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {AP_COLUMNS} FROM antipatterns
                 WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3"
            );
            if category.is_some() {
                sql.push_str(" AND category = ?4");
            }
            sql.push_str(" ORDER BY removal_rate DESC LIMIT ?");
            let mut stmt = conn.prepare(&sql)?;
            let limit = limit as i64;
            let rows = if let Some(category) = category {
                stmt.query_map(
                    params![tenant, team, project, category, limit],
                    antipattern_from_row,
                )?
                .filter_map(|r| r.ok())
                .collect()
            } else {
                stmt.query_map(params![tenant, team, project, limit], antipattern_from_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            };
            Ok(rows)
        })
    }

    // ==================== Documents & DocShots ====================

    pub fn add_document(&self, doc: &Document) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let metadata = doc
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m))
            .transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO documents (
                    id, file_path, content, doc_type, updated_at, metadata,
                    tenant_id, team_id, project_id
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    doc.id,
                    sanitize_text(&doc.file_path, MAX_FILE_PATH_LEN),
                    doc.content,
                    doc.doc_type,
                    doc.updated_at,
                    metadata,
                    tenant,
                    team,
                    project,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, file_path, content, doc_type, updated_at, metadata FROM documents
                 WHERE id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                params![id, tenant, team, project],
                document_from_row,
            )
            .optional()
        })
    }

    pub fn get_documents(
        &self,
        doc_types: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, file_path, content, doc_type, updated_at, metadata FROM documents
                 WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3",
            );
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(tenant.to_string()),
                Box::new(team.to_string()),
                Box::new(project.to_string()),
            ];
            if let Some(types) = doc_types {
                if !types.is_empty() {
                    let placeholders: Vec<String> =
                        (0..types.len()).map(|i| format!("?{}", i + 4)).collect();
                    sql.push_str(&format!(" AND doc_type IN ({})", placeholders.join(",")));
                    for t in types {
                        args.push(Box::new(t.clone()));
                    }
                }
            }
            sql.push_str(&format!(" ORDER BY updated_at DESC LIMIT ?{}", args.len() + 1));
            args.push(Box::new(limit as i64));
            let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(arg_refs.as_slice(), document_from_row)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// Link a decision to a content-addressed document snapshot.
    ///
    /// Creates the DocShot node if needed, a `USES_DOCSHOT` edge from the
    /// decision, `INCLUDES` edges to each document, and per-document
    /// `DOCUMENTS` edges carrying the snapshot id and document timestamp.
    pub fn link_decision_docs(
        &self,
        decision_id: &str,
        doc_shot_id: &str,
        docs: &[(String, i64)],
        fetched_at: i64,
    ) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO doc_shots (id, doc_count, created_at, tenant_id, team_id, project_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET doc_count = excluded.doc_count",
                params![doc_shot_id, docs.len() as i64, fetched_at, tenant, team, project],
            )?;
            Ok(())
        })?;

        self.create_relationship(
            EdgeType::UsesDocshot,
            "Decision",
            decision_id,
            "DocShot",
            doc_shot_id,
            json!({ "fetched_at": fetched_at, "doc_count": docs.len() }),
        )?;
        for (doc_id, updated_at) in docs {
            self.create_relationship(
                EdgeType::Includes,
                "DocShot",
                doc_shot_id,
                "Document",
                doc_id,
                json!({}),
            )?;
            self.create_relationship(
                EdgeType::Documents,
                "Decision",
                decision_id,
                "Document",
                doc_id,
                json!({ "doc_shot_id": doc_shot_id, "doc_updated_at": updated_at }),
            )?;
        }
        Ok(())
    }

    // ==================== Skills ====================

    pub fn add_skill(&self, skill: &Skill) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let green = serde_json::to_string(&skill.green_zone)?;
        let yellow = serde_json::to_string(&skill.yellow_zone)?;
        let red = serde_json::to_string(&skill.red_zone)?;
        let sources = serde_json::to_string(&skill.generated_from_decisions)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO skills (
                    id, domain, name, version, success_rate, confidence, sample_size,
                    procedure, green_zone, yellow_zone, red_zone, quality_score,
                    generated_from_decisions, created_at, last_updated, next_review,
                    ttl_days, is_active, tenant_id, team_id, project_id
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
                params![
                    skill.id,
                    skill.domain,
                    skill.name,
                    skill.version,
                    skill.success_rate,
                    skill.confidence,
                    skill.sample_size,
                    skill.procedure,
                    green,
                    yellow,
                    red,
                    skill.quality_score,
                    sources,
                    skill.created_at,
                    skill.last_updated,
                    skill.next_review,
                    skill.ttl_days,
                    skill.is_active,
                    tenant,
                    team,
                    project,
                ],
            )?;
            Ok(())
        })?;
        for decision_id in &skill.generated_from_decisions {
            self.create_relationship(
                EdgeType::GeneratedFrom,
                "Skill",
                &skill.id,
                "Decision",
                decision_id,
                json!({}),
            )?;
        }
        Ok(())
    }

    pub fn list_skills(&self, domain: Option<&str>, limit: usize) -> Result<Vec<Skill>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {SKILL_COLUMNS} FROM skills
                 WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3 AND is_active = 1"
            );
            if domain.is_some() {
                sql.push_str(" AND domain = ?4");
            }
            sql.push_str(" ORDER BY quality_score DESC, version DESC LIMIT ?");
            let mut stmt = conn.prepare(&sql)?;
            let limit = limit as i64;
            let rows = if let Some(domain) = domain {
                stmt.query_map(params![tenant, team, project, domain, limit], skill_from_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            } else {
                stmt.query_map(params![tenant, team, project, limit], skill_from_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            };
            Ok(rows)
        })
    }

    pub fn get_skill(&self, id: &str) -> Result<Option<Skill>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {SKILL_COLUMNS} FROM skills
                     WHERE id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4"
                ),
                params![id, tenant, team, project],
                skill_from_row,
            )
            .optional()
        })
    }

    /// Highest version of any skill in a domain, 0 when none exist.
    pub fn max_skill_version(&self, domain: &str) -> Result<i64> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM skills
                 WHERE domain = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                params![domain, tenant, team, project],
                |row| row.get(0),
            )
        })
    }

    // ==================== Workspaces / Projects / Profiles / Roles ====================

    pub fn upsert_workspace(&self, id: &str, name: &str, description: Option<&str>) -> Result<()> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO workspaces (id, name, description, created_at, tenant_id, team_id, project_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, description = excluded.description",
                params![id, sanitize_text(name, MAX_NAME_LEN), description, now_ts(), tenant, team, project],
            )?;
            Ok(())
        })
    }

    pub fn upsert_project(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        workspace_id: Option<&str>,
        constraints: &[String],
    ) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let constraints = serde_json::to_string(&sanitize_list(constraints, 200))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, description, workspace_id, constraints, created_at,
                                       tenant_id, team_id, project_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, description = excluded.description,
                    workspace_id = excluded.workspace_id, constraints = excluded.constraints",
                params![
                    id,
                    sanitize_text(name, MAX_NAME_LEN),
                    description,
                    workspace_id,
                    constraints,
                    now_ts(),
                    tenant,
                    team,
                    project
                ],
            )?;
            Ok(())
        })
    }

    /// Stable project-level constraints, used by the plan context builder.
    pub fn get_project_constraints(&self, project_node_id: Option<&str>) -> Result<Vec<String>> {
        let (tenant, team, project) = self.ns();
        let raw: Option<String> = self.with_conn(|conn| {
            if let Some(id) = project_node_id {
                conn.query_row(
                    "SELECT constraints FROM projects
                     WHERE id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                    params![id, tenant, team, project],
                    |row| row.get(0),
                )
                .optional()
            } else {
                conn.query_row(
                    "SELECT constraints FROM projects
                     WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3
                     ORDER BY created_at DESC LIMIT 1",
                    params![tenant, team, project],
                    |row| row.get(0),
                )
                .optional()
            }
        })?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn upsert_profile(&self, name: &str, config_path: &str) -> Result<Profile> {
        let (tenant, team, project) = self.ns();
        let profile = Profile {
            id: format!("profile_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            name: sanitize_text(name, MAX_NAME_LEN),
            config_path: sanitize_text(config_path, MAX_FILE_PATH_LEN),
            created_at: now_ts(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, name, config_path, created_at, tenant_id, team_id, project_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(name, tenant_id, team_id, project_id)
                 DO UPDATE SET config_path = excluded.config_path",
                params![profile.id, profile.name, profile.config_path, profile.created_at, tenant, team, project],
            )?;
            Ok(())
        })?;
        // The stored row may predate this call; read back the canonical id.
        self.get_profile(&profile.name)?
            .ok_or_else(|| Error::not_found("Profile", name))
    }

    pub fn get_profile(&self, name: &str) -> Result<Option<Profile>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, config_path, created_at FROM profiles
                 WHERE name = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                params![name, tenant, team, project],
                |row| {
                    Ok(Profile {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        config_path: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn upsert_role(
        &self,
        name: &str,
        description: Option<&str>,
        prompt_path: Option<&str>,
    ) -> Result<Role> {
        let (tenant, team, project) = self.ns();
        let role = Role {
            id: format!("role_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            name: sanitize_text(name, MAX_NAME_LEN),
            description: description.map(|d| sanitize_text(d, MAX_STATEMENT_LEN)),
            prompt_path: prompt_path.map(|p| sanitize_text(p, MAX_FILE_PATH_LEN)),
            created_at: now_ts(),
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO roles (id, name, description, prompt_path, created_at,
                                    tenant_id, team_id, project_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(name, tenant_id, team_id, project_id) DO UPDATE SET
                    description = excluded.description, prompt_path = excluded.prompt_path",
                params![role.id, role.name, role.description, role.prompt_path, role.created_at, tenant, team, project],
            )?;
            Ok(())
        })?;
        self.get_role(&role.name)?
            .ok_or_else(|| Error::not_found("Role", name))
    }

    pub fn get_role(&self, name: &str) -> Result<Option<Role>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, description, prompt_path, created_at FROM roles
                 WHERE name = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                params![name, tenant, team, project],
                |row| {
                    Ok(Role {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        prompt_path: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    fn role_edge_type(kind: RoleLinkKind) -> EdgeType {
        match kind {
            RoleLinkKind::DocShot => EdgeType::RoleUsesDocshot,
            RoleLinkKind::Skill => EdgeType::RoleUsesSkill,
            RoleLinkKind::NegativeKnowledge => EdgeType::RoleUsesNk,
        }
    }

    pub fn link_role(&self, role_name: &str, kind: RoleLinkKind, target_id: &str) -> Result<()> {
        let role = self
            .get_role(role_name)?
            .ok_or_else(|| Error::not_found("Role", role_name))?;
        self.create_relationship(
            Self::role_edge_type(kind),
            "Role",
            &role.id,
            kind.target_label(),
            target_id,
            json!({}),
        )
    }

    pub fn unlink_role(&self, role_name: &str, kind: RoleLinkKind, target_id: &str) -> Result<bool> {
        let role = self
            .get_role(role_name)?
            .ok_or_else(|| Error::not_found("Role", role_name))?;
        let (tenant, team, project) = self.ns();
        let edge_type = Self::role_edge_type(kind);
        let deleted = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM edges
                 WHERE edge_type = ?1 AND from_id = ?2 AND to_id = ?3
                   AND tenant_id = ?4 AND team_id = ?5 AND project_id = ?6",
                params![edge_type.as_str(), role.id, target_id, tenant, team, project],
            )
        })?;
        Ok(deleted > 0)
    }

    /// Ids of everything a role is linked to, grouped by link kind.
    pub fn get_role_links(&self, role_name: &str) -> Result<RoleLinks> {
        let role = self
            .get_role(role_name)?
            .ok_or_else(|| Error::not_found("Role", role_name))?;
        Ok(RoleLinks {
            doc_shots: self.edge_targets(EdgeType::RoleUsesDocshot, &role.id)?,
            skills: self.edge_targets(EdgeType::RoleUsesSkill, &role.id)?,
            negative_knowledge: self.edge_targets(EdgeType::RoleUsesNk, &role.id)?,
        })
    }

    // ==================== Squads & Assignments ====================

    /// Create a squad. Duplicate names within the namespace conflict.
    pub fn create_squad(
        &self,
        name: &str,
        project_id: &str,
        strategy: SquadStrategy,
    ) -> Result<Squad> {
        let (tenant, team, project) = self.ns();
        let squad = Squad::new(sanitize_text(name, MAX_NAME_LEN), project_id, strategy);
        let result = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO squads (id, name, project_ref, strategy, created_at,
                                     tenant_id, team_id, project_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![squad.id, squad.name, squad.project_id, squad.strategy.to_string(), squad.created_at, tenant, team, project],
            )?;
            Ok(())
        });
        match result {
            Ok(()) => Ok(squad),
            Err(Error::QueryFailed(msg)) if msg.contains("UNIQUE") => {
                Err(Error::Conflict(format!("Squad {} already exists", name)))
            }
            Err(e) => Err(e),
        }
    }

    pub fn add_assignment(
        &self,
        squad_id: &str,
        role_name: &str,
        profile_name: &str,
        position: i64,
    ) -> Result<Assignment> {
        let role = self
            .get_role(role_name)?
            .ok_or_else(|| Error::not_found("Role", role_name))?;
        let profile = self
            .get_profile(profile_name)?
            .ok_or_else(|| Error::not_found("Profile", profile_name))?;
        let (tenant, team, project) = self.ns();
        let assignment = Assignment::new(squad_id, &role.id, &profile.id, position);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO assignments (id, squad_id, role_id, profile_id, position, created_at,
                                          tenant_id, team_id, project_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    assignment.id,
                    assignment.squad_id,
                    assignment.role_id,
                    assignment.profile_id,
                    assignment.position,
                    assignment.created_at,
                    tenant,
                    team,
                    project
                ],
            )?;
            Ok(())
        })?;
        self.create_relationship(
            EdgeType::Assigns,
            "Squad",
            squad_id,
            "Assignment",
            &assignment.id,
            json!({}),
        )?;
        self.create_relationship(
            EdgeType::PlaysRole,
            "Assignment",
            &assignment.id,
            "Role",
            &role.id,
            json!({}),
        )?;
        self.create_relationship(
            EdgeType::UsesProfile,
            "Assignment",
            &assignment.id,
            "Profile",
            &profile.id,
            json!({}),
        )?;
        Ok(assignment)
    }

    pub fn list_squads(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<Squad>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, name, project_ref, strategy, created_at FROM squads
                 WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3",
            );
            if project_id.is_some() {
                sql.push_str(" AND project_ref = ?4");
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ?");
            let mut stmt = conn.prepare(&sql)?;
            let limit = limit as i64;
            let map_row = |row: &rusqlite::Row| -> rusqlite::Result<Squad> {
                let strategy_str: String = row.get(3)?;
                Ok(Squad {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    project_id: row.get(2)?,
                    strategy: SquadStrategy::parse(&strategy_str).unwrap_or(SquadStrategy::Single),
                    created_at: row.get(4)?,
                })
            };
            let rows = if let Some(pid) = project_id {
                stmt.query_map(params![tenant, team, project, pid, limit], map_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            } else {
                stmt.query_map(params![tenant, team, project, limit], map_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            };
            Ok(rows)
        })
    }

    pub fn list_assignments(&self, squad_id: &str) -> Result<Vec<Assignment>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, squad_id, role_id, profile_id, position, created_at FROM assignments
                 WHERE squad_id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4
                 ORDER BY position",
            )?;
            let rows = stmt
                .query_map(params![squad_id, tenant, team, project], |row| {
                    Ok(Assignment {
                        id: row.get(0)?,
                        squad_id: row.get(1)?,
                        role_id: row.get(2)?,
                        profile_id: row.get(3)?,
                        position: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    // ==================== Session contexts ====================

    pub fn upsert_session_context(&self, sc: &SessionContext) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let constraints = serde_json::to_string(&sanitize_list(&sc.constraints, 200))?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_contexts (
                    session_id, task, focus, current_plan, constraints, doc_shot_id,
                    created_at, expires_at, is_active, tenant_id, team_id, project_id
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                 ON CONFLICT(session_id, tenant_id, team_id, project_id) DO UPDATE SET
                    task = excluded.task, focus = excluded.focus,
                    current_plan = excluded.current_plan, constraints = excluded.constraints,
                    doc_shot_id = excluded.doc_shot_id, expires_at = excluded.expires_at,
                    is_active = excluded.is_active",
                params![
                    sc.session_id,
                    sanitize_text(&sc.task, MAX_STATEMENT_LEN),
                    sc.focus,
                    sc.current_plan,
                    constraints,
                    sc.doc_shot_id,
                    sc.created_at,
                    sc.expires_at,
                    sc.is_active,
                    tenant,
                    team,
                    project,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session_context(&self, session_id: &str) -> Result<Option<SessionContext>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT session_id, task, focus, current_plan, constraints, doc_shot_id,
                        created_at, expires_at, is_active
                 FROM session_contexts
                 WHERE session_id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                params![session_id, tenant, team, project],
                session_context_from_row,
            )
            .optional()
        })
    }

    pub fn list_session_contexts(
        &self,
        limit: usize,
        active_only: bool,
    ) -> Result<Vec<SessionContext>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT session_id, task, focus, current_plan, constraints, doc_shot_id,
                        created_at, expires_at, is_active
                 FROM session_contexts
                 WHERE tenant_id = ?1 AND team_id = ?2 AND project_id = ?3",
            );
            if active_only {
                sql.push_str(" AND is_active = 1");
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ?4");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![tenant, team, project, limit as i64],
                    session_context_from_row,
                )?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    pub fn deactivate_session_context(&self, session_id: &str) -> Result<bool> {
        let (tenant, team, project) = self.ns();
        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE session_contexts SET is_active = 0
                 WHERE session_id = ?1 AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                params![session_id, tenant, team, project],
            )
        })?;
        Ok(updated > 0)
    }

    // ==================== TTL sweeps ====================

    fn deactivate_expired(&self, table: &str, origin_column: &str, now_ts: i64) -> Result<u64> {
        let (tenant, team, project) = self.ns();
        let count = self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "UPDATE {table} SET is_active = 0, deprecated_reason = 'ttl_expired'
                     WHERE (is_active IS NULL OR is_active = 1)
                       AND ttl_days IS NOT NULL
                       AND {origin_column} IS NOT NULL
                       AND ({origin_column} + ttl_days * 86400) < ?1
                       AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4"
                ),
                params![now_ts, tenant, team, project],
            )
        })?;
        Ok(count as u64)
    }

    /// Deactivate decisions whose TTL has elapsed. Returns the count.
    pub fn deactivate_expired_decisions(&self, now_ts: i64) -> Result<u64> {
        self.deactivate_expired("decisions", "created_at", now_ts)
    }

    pub fn deactivate_expired_outcomes(&self, now_ts: i64) -> Result<u64> {
        self.deactivate_expired("outcomes", "created_at", now_ts)
    }

    pub fn deactivate_expired_negative_knowledge(&self, now_ts: i64) -> Result<u64> {
        self.deactivate_expired("negative_knowledge", "discovered_at", now_ts)
    }

    pub fn deactivate_expired_skills(&self, now_ts: i64) -> Result<u64> {
        self.deactivate_expired("skills", "created_at", now_ts)
    }

    /// Session contexts expire on their precomputed `expires_at`.
    pub fn deactivate_expired_session_contexts(&self, now_ts: i64) -> Result<u64> {
        let (tenant, team, project) = self.ns();
        let count = self.with_conn(|conn| {
            conn.execute(
                "UPDATE session_contexts SET is_active = 0
                 WHERE (is_active IS NULL OR is_active = 1)
                   AND expires_at < ?1
                   AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                params![now_ts, tenant, team, project],
            )
        })?;
        Ok(count as u64)
    }

    // ==================== Relationships ====================

    /// Create (or refresh) a typed relationship between two nodes.
    pub fn create_relationship(
        &self,
        edge_type: EdgeType,
        from_label: &str,
        from_id: &str,
        to_label: &str,
        to_id: &str,
        properties: Value,
    ) -> Result<()> {
        let (tenant, team, project) = self.ns();
        let props = serde_json::to_string(&properties)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO edges (edge_type, from_label, from_id, to_label, to_id,
                                    created_at, properties, tenant_id, team_id, project_id)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
                 ON CONFLICT(edge_type, from_id, to_id, tenant_id, team_id, project_id)
                 DO UPDATE SET properties = excluded.properties",
                params![
                    edge_type.as_str(),
                    from_label,
                    from_id,
                    to_label,
                    to_id,
                    now_ts(),
                    props,
                    tenant,
                    team,
                    project
                ],
            )?;
            Ok(())
        })
    }

    /// Target ids of edges of one type leaving a node.
    pub fn edge_targets(&self, edge_type: EdgeType, from_id: &str) -> Result<Vec<String>> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT to_id FROM edges
                 WHERE edge_type = ?1 AND from_id = ?2
                   AND tenant_id = ?3 AND team_id = ?4 AND project_id = ?5
                 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map(params![edge_type.as_str(), from_id, tenant, team, project], |row| {
                    row.get(0)
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    /// Count edges of one type, optionally restricted to one source node.
    pub fn edge_count(&self, edge_type: EdgeType, from_id: Option<&str>) -> Result<u64> {
        let (tenant, team, project) = self.ns();
        self.with_conn(|conn| {
            let count: i64 = if let Some(from_id) = from_id {
                conn.query_row(
                    "SELECT COUNT(*) FROM edges
                     WHERE edge_type = ?1 AND from_id = ?2
                       AND tenant_id = ?3 AND team_id = ?4 AND project_id = ?5",
                    params![edge_type.as_str(), from_id, tenant, team, project],
                    |row| row.get(0),
                )?
            } else {
                conn.query_row(
                    "SELECT COUNT(*) FROM edges
                     WHERE edge_type = ?1
                       AND tenant_id = ?2 AND team_id = ?3 AND project_id = ?4",
                    params![edge_type.as_str(), tenant, team, project],
                    |row| row.get(0),
                )?
            };
            Ok(count as u64)
        })
    }

    // ==================== Raw queries ====================

    /// Read-only escape hatch: run a query with positional parameters and
    /// return rows as JSON objects keyed by column name. Used by the
    /// analytics layer; not exposed to external callers.
    pub fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Value>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let column_names: Vec<String> =
                stmt.column_names().iter().map(|s| s.to_string()).collect();
            let rows = stmt
                .query_map(args, |row| {
                    let mut obj = serde_json::Map::new();
                    for (i, name) in column_names.iter().enumerate() {
                        obj.insert(name.clone(), value_ref_to_json(row.get_ref(i)?));
                    }
                    Ok(Value::Object(obj))
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    // ==================== Semantic similarity ====================

    /// Decisions similar to a statement. Ranks by Euclidean distance over
    /// stored embeddings when a query embedding is supplied and embeddings
    /// exist; otherwise degrades to module + keyword matching.
    pub fn find_similar_decisions(
        &self,
        statement: &str,
        module: Option<&str>,
        query_embedding: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<Decision>> {
        if let Some(query_vec) = query_embedding {
            let candidates = self.get_decisions(200, module)?;
            let mut scored: Vec<(f64, Decision)> = candidates
                .into_iter()
                .filter_map(|d| {
                    let emb = d.embedding.as_ref()?;
                    if emb.len() != query_vec.len() {
                        return None;
                    }
                    let dist = euclidean_distance(emb, query_vec);
                    Some((dist, d))
                })
                .collect();
            if !scored.is_empty() {
                scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
                return Ok(scored.into_iter().take(limit).map(|(_, d)| d).collect());
            }
        }

        // Keyword fallback: any decision whose statement shares a content word.
        let words: Vec<String> = statement
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| !w.is_empty())
            .collect();
        let candidates = self.get_decisions(100, module)?;
        let mut matched: Vec<Decision> = candidates
            .into_iter()
            .filter(|d| {
                let hay = d.statement.to_lowercase();
                words.iter().any(|w| hay.contains(w.as_str()))
            })
            .collect();
        matched.truncate(limit);
        Ok(matched)
    }
}

/// Which kind of artifact a role link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleLinkKind {
    DocShot,
    Skill,
    NegativeKnowledge,
}

impl RoleLinkKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "doc_shot" | "docshot" => Some(Self::DocShot),
            "skill" => Some(Self::Skill),
            "negative_knowledge" | "nk" => Some(Self::NegativeKnowledge),
            _ => None,
        }
    }

    fn target_label(&self) -> &'static str {
        match self {
            Self::DocShot => "DocShot",
            Self::Skill => "Skill",
            Self::NegativeKnowledge => "NegativeKnowledge",
        }
    }
}

/// Linked artifact ids for one role.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RoleLinks {
    pub doc_shots: Vec<String>,
    pub skills: Vec<String>,
    pub negative_knowledge: Vec<String>,
}

/// Partial memory-lifecycle update applied to decisions or NK entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub memory_type: Option<String>,
    pub memory_subject: Option<String>,
    pub ttl_days: Option<i64>,
    pub last_verified_at: Option<i64>,
    pub is_active: Option<bool>,
    pub deprecated_reason: Option<String>,
}

fn embedding_blob(embedding: &Vec<f32>) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(bytes: Vec<u8>) -> Vec<f32> {
    bytes
        .chunks(4)
        .filter_map(|chunk| chunk.try_into().ok().map(f32::from_le_bytes))
        .collect()
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(hex::encode(b)),
    }
}

const DECISION_COLUMNS: &str = "id, statement, alternatives, confidence, module, created_at, created_by,
    outcome, resolved_at, actual_success_rate, engram_id, commit_sha, memory_type,
    memory_subject, ttl_days, last_verified_at, is_active, deprecated_reason, source,
    role_id, assignment_id, embedding";

fn decision_from_row(row: &rusqlite::Row) -> rusqlite::Result<Decision> {
    let alternatives: String = row.get(2)?;
    let embedding: Option<Vec<u8>> = row.get(21)?;
    Ok(Decision {
        id: row.get(0)?,
        statement: row.get(1)?,
        alternatives: serde_json::from_str(&alternatives).unwrap_or_default(),
        confidence: row.get(3)?,
        module: row.get(4)?,
        created_at: row.get(5)?,
        created_by: row.get(6)?,
        outcome: row.get(7)?,
        resolved_at: row.get(8)?,
        actual_success_rate: row.get(9)?,
        engram_id: row.get(10)?,
        commit_sha: row.get(11)?,
        memory_type: row.get(12)?,
        memory_subject: row.get(13)?,
        ttl_days: row.get(14)?,
        last_verified_at: row.get(15)?,
        is_active: row.get(16)?,
        deprecated_reason: row.get(17)?,
        source: row.get(18)?,
        role_id: row.get(19)?,
        assignment_id: row.get(20)?,
        embedding: embedding.map(blob_to_embedding),
    })
}

const OUTCOME_COLUMNS: &str = "id, decision_id, status, evidence, measured_at, performance_impact,
    reliability, maintenance_cost, code_change_id, commit_sha, pr_number, pr_url,
    submitted_at, merged_at, completed_at, final_status, final_score, lessons_learned,
    signals, ttl_days, is_active, deprecated_reason, created_at";

fn outcome_from_row(row: &rusqlite::Row) -> rusqlite::Result<Outcome> {
    let status_str: String = row.get(2)?;
    let lessons: String = row.get(17)?;
    let signals: String = row.get(18)?;
    Ok(Outcome {
        id: row.get(0)?,
        decision_id: row.get(1)?,
        status: OutcomeStatus::parse(&status_str).unwrap_or(OutcomeStatus::Pending),
        evidence: row.get(3)?,
        measured_at: row.get(4)?,
        performance_impact: row.get(5)?,
        reliability: row.get(6)?,
        maintenance_cost: row.get(7)?,
        code_change_id: row.get(8)?,
        commit_sha: row.get(9)?,
        pr_number: row.get(10)?,
        pr_url: row.get(11)?,
        submitted_at: row.get(12)?,
        merged_at: row.get(13)?,
        completed_at: row.get(14)?,
        final_status: row.get(15)?,
        final_score: row.get(16)?,
        lessons_learned: serde_json::from_str(&lessons).unwrap_or_default(),
        signals: serde_json::from_str(&signals).unwrap_or_default(),
        ttl_days: row.get(19)?,
        is_active: row.get(20)?,
        deprecated_reason: row.get(21)?,
        created_at: row.get(22)?,
    })
}

const NK_COLUMNS: &str = "id, hypothesis, conclusion, evidence, domain, severity, discovered_at,
    expires_at, blocks_pattern, recommendation, source, memory_type, memory_subject,
    ttl_days, is_active, deprecated_reason, embedding";

fn nk_from_row(row: &rusqlite::Row) -> rusqlite::Result<NegativeKnowledge> {
    let severity_str: String = row.get(5)?;
    let embedding: Option<Vec<u8>> = row.get(16)?;
    Ok(NegativeKnowledge {
        id: row.get(0)?,
        hypothesis: row.get(1)?,
        conclusion: row.get(2)?,
        evidence: row.get(3)?,
        domain: row.get(4)?,
        severity: Severity::parse(&severity_str).unwrap_or(Severity::Medium),
        discovered_at: row.get(6)?,
        expires_at: row.get(7)?,
        blocks_pattern: row.get(8)?,
        recommendation: row.get(9)?,
        source: row.get(10)?,
        memory_type: row.get(11)?,
        memory_subject: row.get(12)?,
        ttl_days: row.get(13)?,
        is_active: row.get(14)?,
        deprecated_reason: row.get(15)?,
        embedding: embedding.map(blob_to_embedding),
    })
}

const AP_COLUMNS: &str = "id, name, category, severity, repos_affected, occurrence_count,
    removal_rate, avg_days_to_removal, keywords, regex_pattern, example_bad,
    example_good, first_seen, recommendation";

fn antipattern_from_row(row: &rusqlite::Row) -> rusqlite::Result<AntiPattern> {
    let severity_str: String = row.get(3)?;
    let keywords: String = row.get(8)?;
    Ok(AntiPattern {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        severity: Severity::parse(&severity_str).unwrap_or(Severity::Medium),
        repos_affected: row.get(4)?,
        occurrence_count: row.get(5)?,
        removal_rate: row.get(6)?,
        avg_days_to_removal: row.get(7)?,
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        regex_pattern: row.get(9)?,
        example_bad: row.get(10)?,
        example_good: row.get(11)?,
        first_seen: row.get(12)?,
        recommendation: row.get(13)?,
    })
}

const SKILL_COLUMNS: &str = "id, domain, name, version, success_rate, confidence, sample_size,
    procedure, green_zone, yellow_zone, red_zone, quality_score,
    generated_from_decisions, created_at, last_updated, next_review, ttl_days, is_active";

fn skill_from_row(row: &rusqlite::Row) -> rusqlite::Result<Skill> {
    let green: String = row.get(8)?;
    let yellow: String = row.get(9)?;
    let red: String = row.get(10)?;
    let sources: String = row.get(12)?;
    Ok(Skill {
        id: row.get(0)?,
        domain: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        success_rate: row.get(4)?,
        confidence: row.get(5)?,
        sample_size: row.get(6)?,
        procedure: row.get(7)?,
        green_zone: serde_json::from_str(&green).unwrap_or_default(),
        yellow_zone: serde_json::from_str(&yellow).unwrap_or_default(),
        red_zone: serde_json::from_str(&red).unwrap_or_default(),
        quality_score: row.get(11)?,
        generated_from_decisions: serde_json::from_str(&sources).unwrap_or_default(),
        created_at: row.get(13)?,
        last_updated: row.get(14)?,
        next_review: row.get(15)?,
        ttl_days: row.get(16)?,
        is_active: row.get(17)?,
    })
}

fn document_from_row(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let metadata: Option<String> = row.get(5)?;
    Ok(Document {
        id: row.get(0)?,
        file_path: row.get(1)?,
        content: row.get(2)?,
        doc_type: row.get(3)?,
        updated_at: row.get(4)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

fn session_context_from_row(row: &rusqlite::Row) -> rusqlite::Result<SessionContext> {
    let constraints: String = row.get(4)?;
    Ok(SessionContext {
        session_id: row.get(0)?,
        task: row.get(1)?,
        focus: row.get(2)?,
        current_plan: row.get(3)?,
        constraints: serde_json::from_str(&constraints).unwrap_or_default(),
        doc_shot_id: row.get(5)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
        is_active: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GraphStore {
        GraphStore::in_memory(Namespace::default()).unwrap()
    }

    #[test]
    fn test_not_connected_refuses() {
        let s = GraphStore::new("/tmp/never-opened.db", Namespace::default());
        let d = Decision::new("x", vec!["y".into()], 0.5);
        assert!(matches!(s.add_decision(&d), Err(Error::NotConnected)));
        assert!(!s.is_connected());
    }

    #[test]
    fn test_disconnect_then_refuse() {
        let s = store();
        s.disconnect();
        assert!(matches!(s.get_decision("dec_x"), Err(Error::NotConnected)));
    }

    #[test]
    fn test_add_and_get_decision_roundtrip() {
        let s = store();
        let d = Decision::new(
            "Use PostgreSQL for user database",
            vec!["MongoDB".into(), "SQLite".into()],
            0.85,
        )
        .with_module("database");
        s.add_decision(&d).unwrap();

        let got = s.get_decision(&d.id).unwrap().unwrap();
        assert_eq!(got.statement, d.statement);
        assert_eq!(got.alternatives, d.alternatives);
        assert_eq!(got.confidence, 0.85);
        assert_eq!(got.module, "database");
        assert!(got.is_active);
    }

    #[test]
    fn test_decision_confidence_invariant() {
        let s = store();
        let d = Decision::new("bad", vec!["alt".into()], 1.5);
        assert!(matches!(s.add_decision(&d), Err(Error::Invariant(_))));
        assert!(s.get_decision(&d.id).unwrap().is_none());
    }

    #[test]
    fn test_statement_sanitized_on_write() {
        let s = store();
        let long = "x".repeat(500);
        let d = Decision::new(&long, vec!["alt".into()], 0.5);
        s.add_decision(&d).unwrap();
        let got = s.get_decision(&d.id).unwrap().unwrap();
        assert_eq!(got.statement.len(), 400);
    }

    #[test]
    fn test_namespace_isolation() {
        let path = tempfile::tempdir().unwrap();
        let db = path.path().join("graph.db");
        let a = GraphStore::new(&db, Namespace::new("t1", "team", "p"));
        a.connect().unwrap();
        let b = GraphStore::new(&db, Namespace::new("t2", "team", "p"));
        b.connect().unwrap();

        let d = Decision::new("tenant one only", vec!["alt".into()], 0.5);
        a.add_decision(&d).unwrap();

        assert!(a.get_decision(&d.id).unwrap().is_some());
        assert!(b.get_decision(&d.id).unwrap().is_none());
    }

    #[test]
    fn test_outcome_roundtrip_with_signals() {
        let s = store();
        let mut o = Outcome::new("dec_123");
        o.add_signal(SignalType::PrCreated, SignalValence::Positive, "PR #1");
        s.add_outcome(&o).unwrap();

        o.status = OutcomeStatus::Submitted;
        o.submitted_at = Some(now_ts());
        s.update_outcome(&o).unwrap();

        let got = s.get_outcome(&o.id).unwrap().unwrap();
        assert_eq!(got.status, OutcomeStatus::Submitted);
        assert_eq!(got.signals.len(), 1);
        assert_eq!(got.signals[0].signal_type, SignalType::PrCreated);
    }

    #[test]
    fn test_update_missing_outcome_conflicts() {
        let s = store();
        let o = Outcome::new("dec_ghost");
        assert!(matches!(s.update_outcome(&o), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_ttl_sweep_decisions() {
        let s = store();
        let mut expired = Decision::new("old", vec!["alt".into()], 0.5).with_ttl_days(1);
        expired.created_at = now_ts() - 2 * 86_400;
        let fresh = Decision::new("new", vec!["alt".into()], 0.5).with_ttl_days(30);
        s.add_decision(&expired).unwrap();
        s.add_decision(&fresh).unwrap();

        let count = s.deactivate_expired_decisions(now_ts()).unwrap();
        assert_eq!(count, 1);

        let old = s.get_decision(&expired.id).unwrap().unwrap();
        assert!(!old.is_active);
        assert_eq!(old.deprecated_reason.as_deref(), Some("ttl_expired"));
        assert!(s.get_decision(&fresh.id).unwrap().unwrap().is_active);

        // Sweeps are idempotent.
        assert_eq!(s.deactivate_expired_decisions(now_ts()).unwrap(), 0);
    }

    #[test]
    fn test_ttl_sweep_session_contexts() {
        let s = store();
        let mut sc = SessionContext::new("sess-old", "task", 1);
        sc.created_at = now_ts() - 2 * 86_400;
        sc.expires_at = sc.created_at + 86_400;
        s.upsert_session_context(&sc).unwrap();

        assert_eq!(s.deactivate_expired_session_contexts(now_ts()).unwrap(), 1);
        assert!(!s.get_session_context("sess-old").unwrap().unwrap().is_active);
        assert_eq!(s.deactivate_expired_session_contexts(now_ts()).unwrap(), 0);
    }

    #[test]
    fn test_create_relationship_idempotent() {
        let s = store();
        s.create_relationship(EdgeType::SimilarTo, "Decision", "dec_a", "Decision", "dec_b", json!({"similarity_score": 0.9}))
            .unwrap();
        s.create_relationship(EdgeType::SimilarTo, "Decision", "dec_a", "Decision", "dec_b", json!({"similarity_score": 0.95}))
            .unwrap();
        assert_eq!(s.edge_count(EdgeType::SimilarTo, Some("dec_a")).unwrap(), 1);
    }

    #[test]
    fn test_squad_duplicate_name_conflicts() {
        let s = store();
        s.create_squad("alpha", "proj-1", SquadStrategy::LeadReview).unwrap();
        let err = s.create_squad("alpha", "proj-1", SquadStrategy::Single);
        assert!(matches!(err, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_role_profile_assignment_flow() {
        let s = store();
        s.upsert_role("architect", Some("designs things"), None).unwrap();
        s.upsert_profile("fast", "/profiles/fast.toml").unwrap();
        let squad = s.create_squad("alpha", "proj-1", SquadStrategy::ParallelArbiter).unwrap();

        let asg = s.add_assignment(&squad.id, "architect", "fast", 0).unwrap();
        let listed = s.list_assignments(&squad.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, asg.id);
        assert_eq!(s.edge_count(EdgeType::Assigns, Some(&squad.id)).unwrap(), 1);
    }

    #[test]
    fn test_assignment_missing_role_conflicts() {
        let s = store();
        s.upsert_profile("fast", "/p.toml").unwrap();
        let squad = s.create_squad("alpha", "proj-1", SquadStrategy::Single).unwrap();
        let err = s.add_assignment(&squad.id, "ghost", "fast", 0);
        assert!(matches!(err, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_role_links() {
        let s = store();
        s.upsert_role("reviewer", None, None).unwrap();
        s.link_role("reviewer", RoleLinkKind::Skill, "sk-db-v1").unwrap();
        s.link_role("reviewer", RoleLinkKind::NegativeKnowledge, "nk_1").unwrap();

        let links = s.get_role_links("reviewer").unwrap();
        assert_eq!(links.skills, vec!["sk-db-v1"]);
        assert_eq!(links.negative_knowledge, vec!["nk_1"]);
        assert!(links.doc_shots.is_empty());

        assert!(s.unlink_role("reviewer", RoleLinkKind::Skill, "sk-db-v1").unwrap());
        assert!(s.get_role_links("reviewer").unwrap().skills.is_empty());
    }

    #[test]
    fn test_link_decision_docs() {
        let s = store();
        let doc = Document::new("README.md", "# hello");
        s.add_document(&doc).unwrap();
        let shot = doc_shot_id(&[(doc.id.clone(), doc.updated_at)]);
        s.link_decision_docs("dec_1", &shot, &[(doc.id.clone(), doc.updated_at)], now_ts())
            .unwrap();

        assert_eq!(s.edge_count(EdgeType::UsesDocshot, Some("dec_1")).unwrap(), 1);
        assert_eq!(s.edge_count(EdgeType::Includes, Some(&shot)).unwrap(), 1);
        assert_eq!(s.edge_count(EdgeType::Documents, Some("dec_1")).unwrap(), 1);
    }

    #[test]
    fn test_similar_decisions_keyword_fallback() {
        let s = store();
        for (stmt, module) in [
            ("Add index on users table", "database"),
            ("Use Redis for caching", "cache"),
            ("Add composite index for lookups", "database"),
        ] {
            s.add_decision(&Decision::new(stmt, vec!["alt".into()], 0.7).with_module(module))
                .unwrap();
        }
        let similar = s
            .find_similar_decisions("create index for query speed", None, None, 10)
            .unwrap();
        assert_eq!(similar.len(), 2);
        assert!(similar.iter().all(|d| d.statement.contains("index")));
    }

    #[test]
    fn test_similar_decisions_embedding_ranking() {
        let s = store();
        let mut near = Decision::new("near", vec!["alt".into()], 0.5);
        near.embedding = Some(vec![1.0, 0.0]);
        let mut far = Decision::new("far", vec!["alt".into()], 0.5);
        far.embedding = Some(vec![0.0, 10.0]);
        s.add_decision(&near).unwrap();
        s.add_decision(&far).unwrap();

        let similar = s
            .find_similar_decisions("anything", None, Some(&[1.0, 0.1]), 2)
            .unwrap();
        assert_eq!(similar[0].statement, "near");
    }

    #[test]
    fn test_memory_update() {
        let s = store();
        let d = Decision::new("keep me", vec!["alt".into()], 0.5);
        s.add_decision(&d).unwrap();
        let update = MemoryUpdate {
            ttl_days: Some(90),
            memory_type: Some("episodic".into()),
            ..Default::default()
        };
        assert!(s.update_decision_memory(&d.id, &update).unwrap());
        let got = s.get_decision(&d.id).unwrap().unwrap();
        assert_eq!(got.ttl_days, Some(90));
        assert_eq!(got.memory_type.as_deref(), Some("episodic"));
        assert!(!s.update_decision_memory("dec_ghost", &update).unwrap());
    }

    #[test]
    fn test_session_context_upsert_and_list() {
        let s = store();
        let sc = SessionContext::new("sess-1", "build feature", 7);
        s.upsert_session_context(&sc).unwrap();
        let mut sc2 = sc.clone();
        sc2.task = "build feature v2".into();
        s.upsert_session_context(&sc2).unwrap();

        let got = s.get_session_context("sess-1").unwrap().unwrap();
        assert_eq!(got.task, "build feature v2");
        assert_eq!(s.list_session_contexts(10, true).unwrap().len(), 1);
    }

    #[test]
    fn test_health_check() {
        let s = store();
        assert_eq!(s.health_check().status, "healthy");
        s.disconnect();
        assert_eq!(s.health_check().status, "disconnected");
    }

    #[test]
    fn test_raw_query_returns_json_rows() {
        let s = store();
        let d = Decision::new("raw", vec!["alt".into()], 0.5);
        s.add_decision(&d).unwrap();
        let rows = s
            .query("SELECT id, confidence FROM decisions", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(d.id));
    }

    #[test]
    fn test_skill_version_tracking() {
        let s = store();
        assert_eq!(s.max_skill_version("database").unwrap(), 0);
        let skill = Skill {
            id: "sk-database-v1".into(),
            domain: "database".into(),
            name: "database_recommendation".into(),
            version: 1,
            success_rate: 0.8,
            confidence: 0.8,
            sample_size: 10,
            procedure: "# Database Decision Procedure".into(),
            green_zone: vec!["use postgres".into()],
            yellow_zone: vec![],
            red_zone: vec![],
            quality_score: Skill::quality_score(0.8, 10),
            generated_from_decisions: vec!["dec_1".into()],
            created_at: now_ts(),
            last_updated: now_ts(),
            next_review: now_ts() + 90 * 86_400,
            ttl_days: Some(720),
            is_active: true,
        };
        s.add_skill(&skill).unwrap();
        assert_eq!(s.max_skill_version("database").unwrap(), 1);
        assert_eq!(s.list_skills(Some("database"), 10).unwrap().len(), 1);
        assert_eq!(s.edge_count(EdgeType::GeneratedFrom, Some("sk-database-v1")).unwrap(), 1);
    }
}
