//! Tool implementations behind the JSON-RPC dispatcher.
//!
//! Each tool has a typed params record deserialized from the (already
//! schema-validated) arguments and returns a JSON result. Conflicts and
//! validation failures surface as typed errors that the dispatcher maps to
//! JSON-RPC codes.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::calibration::CalibrationEngine;
use crate::config::MembriaConfig;
use crate::context::{
    ContextManager, DecisionContextRequest, DocShotRef, PlanContextBuilder, PlanValidator,
};
use crate::error::{Error, Result};
use crate::graph::{
    doc_shot_id, now_ts, Decision, Document, EdgeType, Engram, GraphStore, NegativeKnowledge,
    OutcomeStatus, RoleLinkKind, SessionContext, Severity, SquadStrategy,
};
use crate::outcome::OutcomeTracker;
use crate::storage::EngramStorage;

fn parse<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| Error::validation(e.to_string()))
}

/// Default session-context lifetime.
const SESSION_TTL_DAYS: i64 = 7;

/// Shared backend services for every tool.
pub struct ToolHandler {
    pub graph: Arc<GraphStore>,
    pub calibration: Arc<CalibrationEngine>,
    pub tracker: Arc<OutcomeTracker>,
    pub context: ContextManager,
    pub plan_builder: PlanContextBuilder,
    pub plan_validator: PlanValidator,
    pub storage: Arc<EngramStorage>,
    pub config: MembriaConfig,
}

impl ToolHandler {
    pub fn new(
        graph: Arc<GraphStore>,
        calibration: Arc<CalibrationEngine>,
        tracker: Arc<OutcomeTracker>,
        storage: Arc<EngramStorage>,
        config: MembriaConfig,
    ) -> Self {
        Self {
            context: ContextManager::new(graph.clone(), calibration.clone()),
            plan_builder: PlanContextBuilder::new(graph.clone(), calibration.clone()),
            plan_validator: PlanValidator::new(graph.clone(), calibration.clone()),
            graph,
            calibration,
            tracker,
            storage,
            config,
        }
    }

    // ==================== Decision & outcome tools ====================

    pub fn capture_decision(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Context {
            module: Option<String>,
        }
        #[derive(Deserialize)]
        struct Params {
            statement: String,
            alternatives: Vec<String>,
            confidence: Option<f64>,
            context: Option<Context>,
        }
        let params: Params = parse(args)?;
        if params.alternatives.is_empty() {
            return Err(Error::validation("alternatives must be non-empty"));
        }
        let confidence = params.confidence.unwrap_or(0.5);
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::validation("confidence must be within 0..=1"));
        }
        let module = params
            .context
            .and_then(|c| c.module)
            .unwrap_or_else(|| "general".to_string());

        let decision = Decision::new(params.statement, params.alternatives, confidence)
            .with_module(module)
            .with_source("tool_server");
        self.graph.add_decision(&decision)?;

        Ok(json!({
            "decision_id": decision.id,
            "statement": decision.statement,
            "confidence": decision.confidence,
            "module": decision.module,
            "status": "pending",
        }))
    }

    pub fn record_outcome(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            decision_id: String,
            final_status: String,
            final_score: Option<f64>,
            decision_domain: Option<String>,
        }
        let params: Params = parse(args)?;
        let final_score = params.final_score.unwrap_or(0.5);
        let domain = params.decision_domain.as_deref().unwrap_or("general");

        let outcome = match self.graph.find_open_outcome(&params.decision_id)? {
            Some(outcome) => outcome,
            None => self.tracker.create_outcome(&params.decision_id)?,
        };
        let outcome = self.tracker.finalize_outcome(
            &outcome.id,
            &params.final_status,
            final_score,
            Vec::new(),
            Some(domain),
        )?;

        let guidance = self.calibration.confidence_guidance(domain, final_score);
        Ok(json!({
            "outcome_id": outcome.id,
            "decision_id": params.decision_id,
            "final_status": params.final_status,
            "final_score": final_score,
            "calibration_impact": {
                "domain": domain,
                "sample_size": guidance.sample_size,
                "success_rate": guidance.mean_success_rate,
            }
        }))
    }

    pub fn get_calibration(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            domain: Option<String>,
            confidence: Option<f64>,
        }
        let params: Params = parse(args)?;
        let guidance = self.calibration.confidence_guidance(
            params.domain.as_deref().unwrap_or("general"),
            params.confidence.unwrap_or(0.5),
        );
        Ok(serde_json::to_value(guidance)?)
    }

    // ==================== Context & plan tools ====================

    pub fn get_decision_context(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            statement: String,
            module: Option<String>,
            confidence: Option<f64>,
            max_tokens: Option<usize>,
            session_id: Option<String>,
            role: Option<String>,
        }
        let params: Params = parse(args)?;
        let module = params.module.unwrap_or_else(|| "general".to_string());
        let confidence = params.confidence.unwrap_or(0.5);

        // Role links pull that role's skills and negative knowledge into the
        // payload; an unknown role degrades to no links rather than failing.
        let mut role_skills = Vec::new();
        let mut role_negative_knowledge = Vec::new();
        if let Some(role) = &params.role {
            if let Ok(links) = self.graph.get_role_links(role) {
                for skill_id in &links.skills {
                    if let Some(skill) = self.graph.get_skill(skill_id)? {
                        role_skills.push(skill);
                    }
                }
                for nk_id in &links.negative_knowledge {
                    if let Some(nk) = self.graph.get_negative_knowledge(nk_id)? {
                        role_negative_knowledge.push(nk);
                    }
                }
            }
        }

        let session_context = match &params.session_id {
            Some(session_id) => self.graph.get_session_context(session_id)?,
            None => None,
        };
        // A session pinned to a DocShot carries that snapshot into context.
        let doc_shot = match session_context.as_ref().and_then(|s| s.doc_shot_id.clone()) {
            Some(doc_shot_id) => {
                let doc_count = self
                    .graph
                    .edge_count(EdgeType::Includes, Some(&doc_shot_id))?
                    as usize;
                Some(DocShotRef {
                    doc_shot_id,
                    doc_count,
                })
            }
            None => None,
        };

        let request = DecisionContextRequest {
            statement: params.statement.clone(),
            module: module.clone(),
            confidence,
            max_tokens: params.max_tokens.unwrap_or(2000),
            include_chains: true,
            doc_shot,
            session_context,
            role_skills,
            role_negative_knowledge,
        };
        let assembled = self.context.build_decision_context(&request)?;
        let guidance = self.calibration.confidence_guidance(&module, confidence);

        Ok(json!({
            "decision_statement": params.statement,
            "module": module,
            "your_confidence": confidence,
            "calibration_context": guidance,
            "past_precedents": assembled.similar_decisions,
            "negative_knowledge": assembled.negative_knowledge_alerts,
            "compact_context": assembled.compact_context,
            "total_tokens": assembled.total_tokens,
            "truncated": assembled.truncated,
            "sections_included": assembled.sections_included,
        }))
    }

    pub fn get_plan_context(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            domain: String,
            scope: Option<String>,
            max_tokens: Option<usize>,
        }
        let params: Params = parse(args)?;
        let max_tokens = params.max_tokens.unwrap_or(1500);

        let plan_context =
            self.plan_builder
                .build_plan_context(&params.domain, params.scope.as_deref(), max_tokens)?;
        let compact = self.context.build_plan_context(&plan_context, max_tokens, None)?;

        Ok(json!({
            "domain": plan_context.domain,
            "formatted": plan_context.formatted,
            "total_tokens": compact.total_tokens,
            "compact_context": compact.compact_context,
            "compact_truncated": compact.truncated,
            "sections_included": compact.sections_included,
            "past_plans": plan_context.past_plans,
            "failed_approaches": plan_context.failed_approaches,
            "successful_patterns": plan_context.successful_patterns,
            "calibration": plan_context.calibration,
            "constraints": plan_context.constraints,
            "recommendations": plan_context.recommendations,
        }))
    }

    pub fn validate_plan(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            steps: Vec<String>,
            domain: Option<String>,
        }
        let params: Params = parse(args)?;
        if params.steps.is_empty() {
            return Err(Error::validation("steps must be non-empty"));
        }
        let validation = self
            .plan_validator
            .validate_plan(&params.steps, params.domain.as_deref())?;
        Ok(serde_json::to_value(validation)?)
    }

    pub fn record_plan(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            plan_steps: Vec<String>,
            domain: String,
            plan_confidence: Option<f64>,
            duration_estimate: Option<String>,
            warnings_shown: Option<i64>,
            warnings_heeded: Option<i64>,
        }
        let params: Params = parse(args)?;
        if params.plan_steps.is_empty() {
            return Err(Error::validation("plan_steps must be non-empty"));
        }
        let plan_confidence = params.plan_confidence.unwrap_or(0.5);

        let mut engram = Engram::new(format!("plan-{}", now_ts()));
        engram.intent = Some(format!("plan for {}", params.domain));
        engram.decisions_extracted = params.plan_steps.len() as i64;
        self.graph.add_engram(&engram)?;
        self.storage.save_engram(&engram)?;

        let mut recorded = Vec::with_capacity(params.plan_steps.len());
        for (index, step) in params.plan_steps.iter().enumerate() {
            let mut decision = Decision::new(step.clone(), vec!["alternative approach".to_string()], plan_confidence)
                .with_module(params.domain.clone())
                .with_source("record_plan");
            decision.engram_id = Some(engram.id.clone());
            self.graph.add_decision(&decision)?;
            self.graph.create_relationship(
                crate::graph::EdgeType::MadeIn,
                "Decision",
                &decision.id,
                "Engram",
                &engram.id,
                json!({"confidence_given": plan_confidence}),
            )?;
            recorded.push(json!({
                "step": index + 1,
                "description": step,
                "decision_id": decision.id,
            }));
        }

        Ok(json!({
            "engram_id": engram.id,
            "domain": params.domain,
            "plan_steps": params.plan_steps.len(),
            "plan_confidence": plan_confidence,
            "duration_estimate": params.duration_estimate,
            "warnings_impact": {
                "shown": params.warnings_shown.unwrap_or(0),
                "heeded": params.warnings_heeded.unwrap_or(0),
            },
            "decisions_recorded": recorded,
            "status": "recorded",
        }))
    }

    // ==================== Session-context tools ====================

    pub fn session_context_store(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            session_id: String,
            task: String,
            focus: Option<String>,
            current_plan: Option<String>,
            #[serde(default)]
            constraints: Vec<String>,
            doc_shot_id: Option<String>,
            ttl_days: Option<i64>,
        }
        let params: Params = parse(args)?;
        let mut session =
            SessionContext::new(params.session_id, params.task, params.ttl_days.unwrap_or(SESSION_TTL_DAYS));
        session.focus = params.focus;
        session.current_plan = params.current_plan;
        session.constraints = params.constraints;
        session.doc_shot_id = params.doc_shot_id;
        self.graph.upsert_session_context(&session)?;
        self.graph.link_engram_session_context(&session.session_id)?;

        Ok(json!({
            "status": "success",
            "session_id": session.session_id,
            "expires_at": session.expires_at,
        }))
    }

    pub fn session_context_retrieve(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            session_id: String,
        }
        let params: Params = parse(args)?;
        match self.graph.get_session_context(&params.session_id)? {
            Some(session) => Ok(json!({"status": "success", "session_context": session})),
            None => Err(Error::not_found("SessionContext", &params.session_id)),
        }
    }

    pub fn session_context_delete(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            session_id: String,
        }
        let params: Params = parse(args)?;
        let deactivated = self.graph.deactivate_session_context(&params.session_id)?;
        if !deactivated {
            return Err(Error::not_found("SessionContext", &params.session_id));
        }
        Ok(json!({"status": "success", "session_id": params.session_id}))
    }

    // ==================== Docs tools ====================

    pub fn docs_add(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            file_path: String,
            content: String,
            doc_type: Option<String>,
        }
        let params: Params = parse(args)?;
        let mut doc = Document::new(params.file_path, params.content);
        if let Some(doc_type) = params.doc_type {
            doc.doc_type = doc_type;
        }
        self.graph.add_document(&doc)?;
        Ok(json!({"status": "success", "doc_id": doc.id}))
    }

    pub fn docs_get(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            doc_id: String,
        }
        let params: Params = parse(args)?;
        match self.graph.get_document(&params.doc_id)? {
            Some(doc) => Ok(json!({"status": "success", "document": doc})),
            None => Err(Error::not_found("Document", &params.doc_id)),
        }
    }

    pub fn docs_list(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            doc_types: Option<Vec<String>>,
            limit: Option<usize>,
        }
        let params: Params = parse(args)?;
        let docs = self
            .graph
            .get_documents(params.doc_types.as_deref(), params.limit.unwrap_or(20))?;
        let summaries: Vec<Value> = docs
            .iter()
            .map(|d| {
                json!({
                    "id": d.id,
                    "file_path": d.file_path,
                    "doc_type": d.doc_type,
                    "updated_at": d.updated_at,
                })
            })
            .collect();
        Ok(json!({"documents": summaries}))
    }

    pub fn fetch_docs(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            doc_types: Option<Vec<String>>,
            limit: Option<usize>,
        }
        let params: Params = parse(args)?;
        let docs = self
            .graph
            .get_documents(params.doc_types.as_deref(), params.limit.unwrap_or(20))?;
        let pairs: Vec<(String, i64)> = docs.iter().map(|d| (d.id.clone(), d.updated_at)).collect();
        let shot_id = doc_shot_id(&pairs);
        Ok(json!({
            "doc_shot_id": shot_id,
            "documents": docs,
        }))
    }

    pub fn docshot_link(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            decision_id: String,
            doc_ids: Vec<String>,
        }
        let params: Params = parse(args)?;
        let mut pairs = Vec::with_capacity(params.doc_ids.len());
        for doc_id in &params.doc_ids {
            let doc = self
                .graph
                .get_document(doc_id)?
                .ok_or_else(|| Error::not_found("Document", doc_id))?;
            pairs.push((doc.id, doc.updated_at));
        }
        let shot_id = doc_shot_id(&pairs);
        self.graph
            .link_decision_docs(&params.decision_id, &shot_id, &pairs, now_ts())?;
        Ok(json!({
            "status": "success",
            "doc_shot_id": shot_id,
            "doc_count": pairs.len(),
        }))
    }

    pub fn md_xtract(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            content: String,
            max_sections: Option<usize>,
        }
        let params: Params = parse(args)?;
        let max_sections = params.max_sections.unwrap_or(50);

        let mut sections = Vec::new();
        let mut code_blocks = Vec::new();
        let mut in_fence = false;
        let mut fence = String::new();
        for line in params.content.lines() {
            if line.trim_start().starts_with("```") {
                if in_fence {
                    code_blocks.push(fence.clone());
                    fence.clear();
                }
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                fence.push_str(line);
                fence.push('\n');
            } else if line.starts_with('#') && sections.len() < max_sections {
                sections.push(line.trim_start_matches('#').trim().to_string());
            }
        }
        Ok(json!({"sections": sections, "code_blocks": code_blocks}))
    }

    // ==================== Squad & role tools ====================

    pub fn squad_create(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            project_id: String,
            strategy: String,
        }
        let params: Params = parse(args)?;
        let strategy = SquadStrategy::parse(&params.strategy)
            .ok_or_else(|| Error::validation(format!("unknown strategy: {}", params.strategy)))?;
        let squad = self
            .graph
            .create_squad(&params.name, &params.project_id, strategy)?;
        Ok(json!({"status": "success", "squad_id": squad.id}))
    }

    pub fn assignment_add(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            squad_id: String,
            role: String,
            profile: String,
            position: Option<i64>,
        }
        let params: Params = parse(args)?;
        let assignment = self.graph.add_assignment(
            &params.squad_id,
            &params.role,
            &params.profile,
            params.position.unwrap_or(0),
        )?;
        Ok(json!({"status": "success", "assignment_id": assignment.id}))
    }

    pub fn squad_list(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            project_id: Option<String>,
            limit: Option<usize>,
        }
        let params: Params = parse(args)?;
        let squads = self
            .graph
            .list_squads(params.project_id.as_deref(), params.limit.unwrap_or(20))?;
        Ok(json!({"squads": squads}))
    }

    pub fn squad_assignments(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            squad_id: String,
        }
        let params: Params = parse(args)?;
        let assignments = self.graph.list_assignments(&params.squad_id)?;
        Ok(json!({"assignments": assignments}))
    }

    pub fn role_upsert(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            description: Option<String>,
            prompt_path: Option<String>,
        }
        let params: Params = parse(args)?;
        let role = self.graph.upsert_role(
            &params.name,
            params.description.as_deref(),
            params.prompt_path.as_deref(),
        )?;
        Ok(json!({"status": "success", "role_id": role.id}))
    }

    pub fn role_get(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            name: String,
        }
        let params: Params = parse(args)?;
        let role = self
            .graph
            .get_role(&params.name)?
            .ok_or_else(|| Error::not_found("Role", &params.name))?;
        let links = self.graph.get_role_links(&params.name)?;
        Ok(json!({"status": "success", "role": role, "links": links}))
    }

    pub fn role_link(&self, args: Value) -> Result<Value> {
        let (name, kind, target_id) = role_link_params(args)?;
        self.graph.link_role(&name, kind, &target_id)?;
        Ok(json!({"status": "success"}))
    }

    pub fn role_unlink(&self, args: Value) -> Result<Value> {
        let (name, kind, target_id) = role_link_params(args)?;
        let removed = self.graph.unlink_role(&name, kind, &target_id)?;
        Ok(json!({"status": if removed { "success" } else { "not_linked" }}))
    }

    // ==================== Read-only accessors ====================

    pub fn outcome_get(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            outcome_id: String,
        }
        let params: Params = parse(args)?;
        match self.tracker.get_outcome(&params.outcome_id)? {
            Some(outcome) => Ok(json!({"status": "success", "outcome": outcome})),
            None => Err(Error::not_found("Outcome", &params.outcome_id)),
        }
    }

    pub fn outcome_list(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            status: Option<String>,
            limit: Option<usize>,
        }
        let params: Params = parse(args)?;
        let status = params.status.as_deref().and_then(OutcomeStatus::parse);
        let outcomes = self
            .tracker
            .list_outcomes(params.limit.unwrap_or(10), status, None)?;
        Ok(json!({"outcomes": outcomes}))
    }

    pub fn skills_list(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            domain: Option<String>,
            limit: Option<usize>,
        }
        let params: Params = parse(args)?;
        let skills = self
            .graph
            .list_skills(params.domain.as_deref(), params.limit.unwrap_or(20))?;
        Ok(json!({"skills": skills}))
    }

    pub fn skills_get(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            skill_id: String,
        }
        let params: Params = parse(args)?;
        match self.graph.get_skill(&params.skill_id)? {
            Some(skill) => Ok(json!({"status": "success", "skill": skill})),
            None => Err(Error::not_found("Skill", &params.skill_id)),
        }
    }

    pub fn antipatterns_list(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            category: Option<String>,
            limit: Option<usize>,
        }
        let params: Params = parse(args)?;
        let antipatterns = self
            .graph
            .list_antipatterns(params.limit.unwrap_or(20), params.category.as_deref())?;
        Ok(json!({"antipatterns": antipatterns}))
    }

    pub fn antipatterns_get(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            pattern_id: String,
        }
        let params: Params = parse(args)?;
        match self.graph.get_antipattern(&params.pattern_id)? {
            Some(pattern) => Ok(json!({"status": "success", "antipattern": pattern})),
            None => Err(Error::not_found("AntiPattern", &params.pattern_id)),
        }
    }

    // ==================== Operational tools ====================

    pub fn health(&self, _args: Value) -> Result<Value> {
        let graph = self.graph.health_check();
        let pending = self.storage.pending_count().unwrap_or(0);
        Ok(json!({
            "status": if graph.connected { "ok" } else { "degraded" },
            "graph": graph,
            "pending_signals": pending,
        }))
    }

    pub fn migrations_status(&self, _args: Value) -> Result<Value> {
        let applied = self.graph.migration_history()?;
        let current = applied.last().map(|(v, _)| *v).unwrap_or(0);
        let applied: Vec<Value> = applied
            .into_iter()
            .map(|(version, applied_at)| json!({"version": version, "applied_at": applied_at}))
            .collect();
        Ok(json!({"current_version": current, "applied": applied}))
    }

    pub fn logs_tail(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            lines: Option<usize>,
        }
        let params: Params = parse(args)?;
        let wanted = params.lines.unwrap_or(50);
        let path = self.config.log_dir().join("daemon.log");
        let lines: Vec<String> = match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let all: Vec<&str> = raw.lines().collect();
                let start = all.len().saturating_sub(wanted);
                all[start..].iter().map(|l| l.to_string()).collect()
            }
            Err(_) => Vec::new(),
        };
        Ok(json!({"lines": lines}))
    }

    // ==================== Memory tools (feature-flagged) ====================

    pub fn memory_store(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            memory_type: String,
            payload: Value,
            ttl_days: Option<i64>,
        }
        let params: Params = parse(args)?;
        match params.memory_type.as_str() {
            "decision" => {
                let statement = params.payload["statement"].as_str().unwrap_or_default();
                if statement.is_empty() {
                    return Err(Error::validation("payload.statement required"));
                }
                let alternatives: Vec<String> = params.payload["alternatives"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                let confidence = params.payload["confidence"].as_f64().unwrap_or(0.5);
                let module = params.payload["module"].as_str().unwrap_or("general");
                let mut decision = Decision::new(statement, alternatives, confidence)
                    .with_module(module)
                    .with_source("memory_store");
                decision.memory_type = Some("decision".into());
                decision.ttl_days = params.ttl_days;
                if decision.alternatives.is_empty() {
                    decision.alternatives = vec!["unspecified".into()];
                }
                self.graph.add_decision(&decision)?;
                Ok(json!({"status": "success", "item_id": decision.id}))
            }
            "negative_knowledge" => {
                let hypothesis = params.payload["hypothesis"].as_str().unwrap_or_default();
                if hypothesis.is_empty() {
                    return Err(Error::validation("payload.hypothesis required"));
                }
                let severity = params.payload["severity"]
                    .as_str()
                    .and_then(Severity::parse)
                    .unwrap_or(Severity::Medium);
                let mut nk = NegativeKnowledge::new(
                    hypothesis,
                    params.payload["conclusion"].as_str().unwrap_or_default(),
                    params.payload["domain"].as_str().unwrap_or("general"),
                    severity,
                )
                .with_recommendation(
                    params.payload["recommendation"].as_str().unwrap_or_default(),
                )
                .with_evidence(params.payload["evidence"].as_str().unwrap_or_default());
                nk.memory_type = Some("negative_knowledge".into());
                nk.ttl_days = params.ttl_days;
                self.graph.add_negative_knowledge(&nk)?;
                Ok(json!({"status": "success", "item_id": nk.id}))
            }
            other => Err(Error::validation(format!("unknown memory_type: {}", other))),
        }
    }

    pub fn memory_retrieve(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            memory_type: String,
            domain: Option<String>,
            limit: Option<usize>,
        }
        let params: Params = parse(args)?;
        let limit = params.limit.unwrap_or(5);
        match params.memory_type.as_str() {
            "decision" => {
                let domain = params
                    .domain
                    .ok_or_else(|| Error::validation("domain required for decision memory"))?;
                let items = self.graph.get_decisions(limit, Some(&domain))?;
                Ok(json!({"status": "success", "items": items}))
            }
            "negative_knowledge" => {
                let items = self
                    .graph
                    .list_negative_knowledge(params.domain.as_deref(), limit)?;
                Ok(json!({"status": "success", "items": items}))
            }
            other => Err(Error::validation(format!("unknown memory_type: {}", other))),
        }
    }

    pub fn memory_delete(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Params {
            memory_type: String,
            item_id: String,
            reason: Option<String>,
        }
        let params: Params = parse(args)?;
        let update = crate::graph::MemoryUpdate {
            is_active: Some(false),
            deprecated_reason: Some(params.reason.unwrap_or_else(|| "manual_delete".into())),
            ..Default::default()
        };
        let removed = match params.memory_type.as_str() {
            "decision" => self.graph.update_decision_memory(&params.item_id, &update)?,
            "negative_knowledge" => self
                .graph
                .update_negative_knowledge_memory(&params.item_id, &update)?,
            other => return Err(Error::validation(format!("unknown memory_type: {}", other))),
        };
        Ok(json!({
            "status": if removed { "success" } else { "failed" },
            "item_id": params.item_id,
        }))
    }

    pub fn memory_list(&self, args: Value) -> Result<Value> {
        self.memory_retrieve(args)
    }
}

fn role_link_params(args: Value) -> Result<(String, RoleLinkKind, String)> {
    #[derive(Deserialize)]
    struct Params {
        name: String,
        kind: String,
        target_id: String,
    }
    let params: Params = parse(args)?;
    let kind = RoleLinkKind::parse(&params.kind)
        .ok_or_else(|| Error::validation(format!("unknown link kind: {}", params.kind)))?;
    Ok((params.name, kind, params.target_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Namespace;

    pub(crate) fn handler() -> (tempfile::TempDir, ToolHandler) {
        let dir = tempfile::tempdir().unwrap();
        let config = MembriaConfig::new(dir.path()).with_memory_tools(true);
        let graph = Arc::new(GraphStore::in_memory(Namespace::default()).unwrap());
        let calibration = Arc::new(CalibrationEngine::open(config.calibration_dir()).unwrap());
        let tracker = Arc::new(OutcomeTracker::new(graph.clone(), calibration.clone()));
        let storage = Arc::new(EngramStorage::open(config.engram_dir(), 1000, 5000).unwrap());
        (
            dir,
            ToolHandler::new(graph, calibration, tracker, storage, config),
        )
    }

    #[test]
    fn test_capture_decision_writes_node() {
        let (_dir, handler) = handler();
        let result = handler
            .capture_decision(json!({
                "statement": "Use PostgreSQL for user database",
                "alternatives": ["MongoDB", "SQLite"],
                "confidence": 0.85,
                "context": {"module": "database"}
            }))
            .unwrap();
        let decision_id = result["decision_id"].as_str().unwrap();
        assert!(decision_id.starts_with("dec_"));
        assert_eq!(result["module"], "database");
        assert_eq!(result["status"], "pending");

        let stored = handler.graph.get_decision(decision_id).unwrap().unwrap();
        assert_eq!(stored.confidence, 0.85);
    }

    #[test]
    fn test_capture_decision_module_defaults_to_general() {
        let (_dir, handler) = handler();
        let result = handler
            .capture_decision(json!({"statement": "x", "alternatives": ["y"]}))
            .unwrap();
        assert_eq!(result["module"], "general");
    }

    #[test]
    fn test_capture_decision_empty_alternatives_rejected() {
        let (_dir, handler) = handler();
        let err = handler
            .capture_decision(json!({"statement": "x", "alternatives": []}))
            .unwrap_err();
        assert_eq!(err.json_rpc_code(), -32602);
    }

    #[test]
    fn test_record_outcome_updates_calibration() {
        let (_dir, handler) = handler();
        let captured = handler
            .capture_decision(json!({
                "statement": "Use PostgreSQL",
                "alternatives": ["MongoDB"],
                "confidence": 0.85,
                "context": {"module": "database"}
            }))
            .unwrap();
        let decision_id = captured["decision_id"].as_str().unwrap();

        let result = handler
            .record_outcome(json!({
                "decision_id": decision_id,
                "final_status": "success",
                "final_score": 0.9,
                "decision_domain": "database"
            }))
            .unwrap();
        assert_eq!(result["calibration_impact"]["sample_size"], 1);
        let rate = result["calibration_impact"]["success_rate"].as_f64().unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_plan_links_engram() {
        let (_dir, handler) = handler();
        let result = handler
            .record_plan(json!({
                "plan_steps": ["add table", "add index"],
                "domain": "database",
                "plan_confidence": 0.7
            }))
            .unwrap();
        assert_eq!(result["plan_steps"], 2);
        let engram_id = result["engram_id"].as_str().unwrap();
        assert!(engram_id.starts_with("eng_"));
        let recorded = result["decisions_recorded"].as_array().unwrap();
        assert_eq!(recorded.len(), 2);
        // Every step decision is linked to the engram.
        for entry in recorded {
            let decision_id = entry["decision_id"].as_str().unwrap();
            let stored = handler.graph.get_decision(decision_id).unwrap().unwrap();
            assert_eq!(stored.engram_id.as_deref(), Some(engram_id));
        }
        assert!(handler.storage.load_engram(engram_id).unwrap().is_some());
    }

    #[test]
    fn test_session_context_roundtrip() {
        let (_dir, handler) = handler();
        handler
            .session_context_store(json!({
                "session_id": "sess-1",
                "task": "migrate billing",
                "constraints": ["no downtime"],
                "ttl_days": 2
            }))
            .unwrap();
        let result = handler
            .session_context_retrieve(json!({"session_id": "sess-1"}))
            .unwrap();
        assert_eq!(result["session_context"]["task"], "migrate billing");

        handler
            .session_context_delete(json!({"session_id": "sess-1"}))
            .unwrap();
        let stored = handler.graph.get_session_context("sess-1").unwrap().unwrap();
        assert!(!stored.is_active);

        let err = handler
            .session_context_retrieve(json!({"session_id": "ghost"}))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_docs_and_docshot_flow() {
        let (_dir, handler) = handler();
        let a = handler
            .docs_add(json!({"file_path": "README.md", "content": "# readme"}))
            .unwrap();
        let b = handler
            .docs_add(json!({"file_path": "DESIGN.md", "content": "# design", "doc_type": "design"}))
            .unwrap();
        let doc_a = a["doc_id"].as_str().unwrap();
        let doc_b = b["doc_id"].as_str().unwrap();

        let listed = handler.docs_list(json!({})).unwrap();
        assert_eq!(listed["documents"].as_array().unwrap().len(), 2);

        let linked = handler
            .docshot_link(json!({"decision_id": "dec_1", "doc_ids": [doc_a, doc_b]}))
            .unwrap();
        assert_eq!(linked["doc_count"], 2);
        let shot_id = linked["doc_shot_id"].as_str().unwrap();
        assert!(shot_id.starts_with("docshot_"));

        // fetch_docs computes the same id for the same document set.
        let fetched = handler.fetch_docs(json!({})).unwrap();
        assert_eq!(fetched["doc_shot_id"].as_str().unwrap(), shot_id);
    }

    #[test]
    fn test_md_xtract() {
        let (_dir, handler) = handler();
        let content = "# Title\n\ntext\n\n```rust\nfn main() {}\n```\n\n## Section Two\n";
        let result = handler.md_xtract(json!({"content": content})).unwrap();
        assert_eq!(result["sections"], json!(["Title", "Section Two"]));
        assert_eq!(result["code_blocks"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_squad_flow() {
        let (_dir, handler) = handler();
        handler.role_upsert(json!({"name": "architect"})).unwrap();
        let created = handler
            .squad_create(json!({"name": "alpha", "project_id": "p1", "strategy": "red_team"}))
            .unwrap();
        let squad_id = created["squad_id"].as_str().unwrap();

        // Profile must exist before an assignment binds it.
        handler.graph.upsert_profile("fast", "/p.toml").unwrap();
        handler
            .assignment_add(json!({"squad_id": squad_id, "role": "architect", "profile": "fast"}))
            .unwrap();
        let assignments = handler
            .squad_assignments(json!({"squad_id": squad_id}))
            .unwrap();
        assert_eq!(assignments["assignments"].as_array().unwrap().len(), 1);

        let duplicate = handler
            .squad_create(json!({"name": "alpha", "project_id": "p1", "strategy": "single"}))
            .unwrap_err();
        assert!(matches!(duplicate, Error::Conflict(_)));
    }

    #[test]
    fn test_memory_tools() {
        let (_dir, handler) = handler();
        let stored = handler
            .memory_store(json!({
                "memory_type": "negative_knowledge",
                "payload": {
                    "hypothesis": "custom JWT implementation",
                    "conclusion": "use a library",
                    "domain": "auth",
                    "severity": "high"
                },
                "ttl_days": 365
            }))
            .unwrap();
        let item_id = stored["item_id"].as_str().unwrap().to_string();
        assert!(item_id.starts_with("nk_"));

        let items = handler
            .memory_retrieve(json!({"memory_type": "negative_knowledge", "domain": "auth"}))
            .unwrap();
        assert_eq!(items["items"].as_array().unwrap().len(), 1);

        handler
            .memory_delete(json!({"memory_type": "negative_knowledge", "item_id": item_id}))
            .unwrap();
        let items = handler
            .memory_retrieve(json!({"memory_type": "negative_knowledge", "domain": "auth"}))
            .unwrap();
        assert!(items["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_health_and_migrations() {
        let (_dir, handler) = handler();
        let health = handler.health(json!({})).unwrap();
        assert_eq!(health["status"], "ok");
        let migrations = handler.migrations_status(json!({})).unwrap();
        assert_eq!(migrations["current_version"], crate::graph::SCHEMA_VERSION);
    }
}
