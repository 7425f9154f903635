//! Entity records and relationship types for the decision-memory graph.
//!
//! Every persistent entity carries the namespace triple when written; the
//! records here hold only domain fields. Cross-entity references are opaque
//! ids traversed through graph queries, never in-memory pointers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Current epoch seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// A recorded choice among alternatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub statement: String,
    pub alternatives: Vec<String>,
    pub confidence: f64,
    pub module: String,
    pub created_at: i64,
    pub created_by: String,
    /// `success|failure|partial|pending`, set by the outcome tracker
    pub outcome: Option<String>,
    pub resolved_at: Option<i64>,
    pub actual_success_rate: Option<f64>,
    pub engram_id: Option<String>,
    pub commit_sha: Option<String>,
    pub memory_type: Option<String>,
    pub memory_subject: Option<String>,
    pub ttl_days: Option<i64>,
    pub last_verified_at: Option<i64>,
    pub is_active: bool,
    pub deprecated_reason: Option<String>,
    pub source: Option<String>,
    pub role_id: Option<String>,
    pub assignment_id: Option<String>,
    /// Optional embedding for semantic similarity ranking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Decision {
    /// Create a decision with a fresh `dec_` id.
    pub fn new(statement: impl Into<String>, alternatives: Vec<String>, confidence: f64) -> Self {
        Self {
            id: format!("dec_{}", short_uuid()),
            statement: statement.into(),
            alternatives,
            confidence,
            module: "general".to_string(),
            created_at: now_ts(),
            created_by: "agent".to_string(),
            outcome: None,
            resolved_at: None,
            actual_success_rate: None,
            engram_id: None,
            commit_sha: None,
            memory_type: None,
            memory_subject: None,
            ttl_days: None,
            last_verified_at: None,
            is_active: true,
            deprecated_reason: None,
            source: None,
            role_id: None,
            assignment_id: None,
            embedding: None,
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn with_ttl_days(mut self, ttl_days: i64) -> Self {
        self.ttl_days = Some(ttl_days);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A commit-level change, optionally linked back to a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChange {
    pub id: String,
    pub commit_sha: String,
    pub files_changed: Vec<String>,
    pub timestamp: i64,
    pub author: String,
    pub decision_id: Option<String>,
    pub outcome: Option<String>,
    pub reverted_by: Option<String>,
    pub days_to_revert: Option<f64>,
    pub lines_added: i64,
    pub lines_removed: i64,
}

impl CodeChange {
    pub fn new(commit_sha: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: format!("cc_{}", short_uuid()),
            commit_sha: commit_sha.into(),
            files_changed: Vec::new(),
            timestamp: now_ts(),
            author: author.into(),
            decision_id: None,
            outcome: None,
            reverted_by: None,
            days_to_revert: None,
            lines_added: 0,
            lines_removed: 0,
        }
    }
}

/// Outcome lifecycle states. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Pending,
    Submitted,
    Merged,
    Completed,
}

impl OutcomeStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "merged" => Some(Self::Merged),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Submitted => write!(f, "submitted"),
            Self::Merged => write!(f, "merged"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Tagged event contributing to an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    PrCreated,
    PrMerged,
    CiPassed,
    CiFailed,
    Incident,
    PerformanceOk,
    PerformancePoor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalValence {
    Positive,
    Negative,
    Neutral,
}

/// A signal appended to an outcome. Signals are aggregated inside the
/// outcome record, not materialized as graph nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub valence: SignalValence,
    pub timestamp: i64,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<HashMap<String, Value>>,
}

/// The observable consequence of implementing a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub decision_id: String,
    pub status: OutcomeStatus,
    pub evidence: String,
    pub measured_at: Option<i64>,
    pub performance_impact: Option<f64>,
    pub reliability: Option<f64>,
    pub maintenance_cost: Option<f64>,
    pub code_change_id: Option<String>,
    pub commit_sha: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub submitted_at: Option<i64>,
    pub merged_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub final_status: Option<String>,
    pub final_score: Option<f64>,
    pub lessons_learned: Vec<String>,
    pub signals: Vec<Signal>,
    pub ttl_days: Option<i64>,
    pub is_active: bool,
    pub deprecated_reason: Option<String>,
    pub created_at: i64,
}

impl Outcome {
    /// Create a pending outcome for a decision.
    pub fn new(decision_id: impl Into<String>) -> Self {
        let decision_id = decision_id.into();
        let suffix = &Uuid::new_v4().simple().to_string()[..8];
        Self {
            id: format!("outcome_{}_{}", decision_id, suffix),
            decision_id,
            status: OutcomeStatus::Pending,
            evidence: String::new(),
            measured_at: None,
            performance_impact: None,
            reliability: None,
            maintenance_cost: None,
            code_change_id: None,
            commit_sha: None,
            pr_number: None,
            pr_url: None,
            submitted_at: None,
            merged_at: None,
            completed_at: None,
            final_status: None,
            final_score: None,
            lessons_learned: Vec::new(),
            signals: Vec::new(),
            ttl_days: None,
            is_active: true,
            deprecated_reason: None,
            created_at: now_ts(),
        }
    }

    /// Append a signal, assigning a monotonic arrival timestamp.
    pub fn add_signal(
        &mut self,
        signal_type: SignalType,
        valence: SignalValence,
        description: impl Into<String>,
    ) -> &mut Signal {
        let mut ts = now_ts();
        if let Some(last) = self.signals.last() {
            if ts <= last.timestamp {
                ts = last.timestamp + 1;
            }
        }
        self.signals.push(Signal {
            signal_type,
            valence,
            timestamp: ts,
            description: description.into(),
            severity: None,
            metrics: None,
        });
        self.signals.last_mut().unwrap()
    }

    pub fn positive_signal_count(&self) -> usize {
        self.signals
            .iter()
            .filter(|s| s.valence == SignalValence::Positive)
            .count()
    }

    pub fn negative_signal_count(&self) -> usize {
        self.signals
            .iter()
            .filter(|s| s.valence == SignalValence::Negative)
            .count()
    }

    /// Heuristic success estimate: 0.5 baseline, +/- 0.1 per signal, clamped.
    pub fn estimate_success(&self) -> f64 {
        let positive = self.positive_signal_count() as f64;
        let negative = self.negative_signal_count() as f64;
        (0.5 + 0.1 * positive - 0.1 * negative).clamp(0.0, 1.0)
    }
}

/// Warning severity, shared by NK entries, antipatterns, and plan warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A learned-not-to-do entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegativeKnowledge {
    pub id: String,
    pub hypothesis: String,
    pub conclusion: String,
    pub evidence: String,
    pub domain: String,
    pub severity: Severity,
    pub discovered_at: i64,
    pub expires_at: Option<i64>,
    pub blocks_pattern: Option<String>,
    pub recommendation: String,
    pub source: String,
    pub memory_type: Option<String>,
    pub memory_subject: Option<String>,
    pub ttl_days: Option<i64>,
    pub is_active: bool,
    pub deprecated_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl NegativeKnowledge {
    pub fn new(
        hypothesis: impl Into<String>,
        conclusion: impl Into<String>,
        domain: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: format!("nk_{}", short_uuid()),
            hypothesis: hypothesis.into(),
            conclusion: conclusion.into(),
            evidence: String::new(),
            domain: domain.into(),
            severity,
            discovered_at: now_ts(),
            expires_at: None,
            blocks_pattern: None,
            recommendation: String::new(),
            source: "manual".to_string(),
            memory_type: None,
            memory_subject: None,
            ttl_days: None,
            is_active: true,
            deprecated_reason: None,
            embedding: None,
        }
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }
}

/// Reusable detection rule ordered by historical removal rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiPattern {
    pub id: String,
    pub name: String,
    pub category: String,
    pub severity: Severity,
    pub repos_affected: i64,
    pub occurrence_count: i64,
    pub removal_rate: f64,
    pub avg_days_to_removal: Option<f64>,
    pub keywords: Vec<String>,
    pub regex_pattern: String,
    pub example_bad: Option<String>,
    pub example_good: Option<String>,
    pub first_seen: i64,
    pub recommendation: String,
}

impl AntiPattern {
    pub fn new(name: impl Into<String>, regex_pattern: impl Into<String>) -> Self {
        Self {
            id: format!("ap_{}", short_uuid()),
            name: name.into(),
            category: "general".to_string(),
            severity: Severity::Medium,
            repos_affected: 0,
            occurrence_count: 0,
            removal_rate: 0.0,
            avg_days_to_removal: None,
            keywords: Vec::new(),
            regex_pattern: regex_pattern.into(),
            example_bad: None,
            example_good: None,
            first_seen: now_ts(),
            recommendation: String::new(),
        }
    }

    pub fn with_removal_rate(mut self, rate: f64) -> Self {
        self.removal_rate = rate;
        self
    }
}

/// Session snapshot metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engram {
    pub id: String,
    pub session_id: String,
    pub commit_sha: Option<String>,
    pub branch: Option<String>,
    pub created_at: i64,
    pub agent_type: Option<String>,
    pub agent_model: Option<String>,
    pub session_duration_sec: Option<i64>,
    pub total_tokens: Option<i64>,
    pub decisions_extracted: i64,
    pub files_changed: i64,
    pub intent: Option<String>,
}

impl Engram {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: format!("eng_{}", short_uuid()),
            session_id: session_id.into(),
            commit_sha: None,
            branch: None,
            created_at: now_ts(),
            agent_type: None,
            agent_model: None,
            session_duration_sec: None,
            total_tokens: None,
            decisions_extracted: 0,
            files_changed: 0,
            intent: None,
        }
    }
}

/// A generated procedure for one domain, versioned and quality-scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub domain: String,
    pub name: String,
    pub version: i64,
    pub success_rate: f64,
    pub confidence: f64,
    pub sample_size: i64,
    pub procedure: String,
    pub green_zone: Vec<String>,
    pub yellow_zone: Vec<String>,
    pub red_zone: Vec<String>,
    pub quality_score: f64,
    pub generated_from_decisions: Vec<String>,
    pub created_at: i64,
    pub last_updated: i64,
    pub next_review: i64,
    pub ttl_days: Option<i64>,
    pub is_active: bool,
}

impl Skill {
    /// Quality from success rate and sample size. Below three samples the
    /// score is pinned at 0.5.
    pub fn quality_score(success_rate: f64, sample_size: i64) -> f64 {
        if sample_size < 3 {
            return 0.5;
        }
        success_rate * (1.0 - 1.0 / (sample_size as f64).sqrt())
    }
}

/// A stored text artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub file_path: String,
    pub content: String,
    pub doc_type: String,
    pub updated_at: i64,
    pub metadata: Option<HashMap<String, Value>>,
}

impl Document {
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("doc_{}", short_uuid()),
            file_path: file_path.into(),
            content: content.into(),
            doc_type: "markdown".to_string(),
            updated_at: now_ts(),
            metadata: None,
        }
    }
}

/// Compute a content-addressed DocShot id from `(doc_id, updated_at)` pairs.
///
/// The pairs are serialized as `id:updated_at`, sorted, joined with `|`, and
/// hashed; the id is deterministic for a given document set.
pub fn doc_shot_id(docs: &[(String, i64)]) -> String {
    use sha1::{Digest, Sha1};

    let mut entries: Vec<String> = docs
        .iter()
        .map(|(id, updated_at)| format!("{}:{}", id, updated_at))
        .collect();
    entries.sort();
    let payload = entries.join("|");

    let digest = Sha1::digest(payload.as_bytes());
    format!("docshot_{}", &hex::encode(digest)[..12])
}

/// Short-lived working memory keyed by session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub task: String,
    pub focus: Option<String>,
    pub current_plan: Option<String>,
    pub constraints: Vec<String>,
    pub doc_shot_id: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub is_active: bool,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, task: impl Into<String>, ttl_days: i64) -> Self {
        let created_at = now_ts();
        Self {
            session_id: session_id.into(),
            task: task.into(),
            focus: None,
            current_plan: None,
            constraints: Vec::new(),
            doc_shot_id: None,
            created_at,
            expires_at: created_at + ttl_days * 86_400,
            is_active: true,
        }
    }
}

/// Squad composition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SquadStrategy {
    LeadReview,
    ParallelArbiter,
    RedTeam,
    Single,
}

impl SquadStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lead_review" => Some(Self::LeadReview),
            "parallel_arbiter" => Some(Self::ParallelArbiter),
            "red_team" => Some(Self::RedTeam),
            "single" => Some(Self::Single),
            _ => None,
        }
    }
}

impl std::fmt::Display for SquadStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeadReview => write!(f, "lead_review"),
            Self::ParallelArbiter => write!(f, "parallel_arbiter"),
            Self::RedTeam => write!(f, "red_team"),
            Self::Single => write!(f, "single"),
        }
    }
}

/// An agent role definition, optionally linked to DocShots, Skills, and NK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub prompt_path: Option<String>,
    pub created_at: i64,
}

/// A stored agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub config_path: String,
    pub created_at: i64,
}

/// A team of assignments under one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Squad {
    pub id: String,
    pub name: String,
    pub project_id: String,
    pub strategy: SquadStrategy,
    pub created_at: i64,
}

impl Squad {
    pub fn new(name: impl Into<String>, project_id: impl Into<String>, strategy: SquadStrategy) -> Self {
        Self {
            id: format!("squad_{}", short_uuid()),
            name: name.into(),
            project_id: project_id.into(),
            strategy,
            created_at: now_ts(),
        }
    }
}

/// Binding of one role to one profile within a squad, ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub squad_id: String,
    pub role_id: String,
    pub profile_id: String,
    pub position: i64,
    pub created_at: i64,
}

impl Assignment {
    pub fn new(
        squad_id: impl Into<String>,
        role_id: impl Into<String>,
        profile_id: impl Into<String>,
        position: i64,
    ) -> Self {
        Self {
            id: format!("asg_{}", short_uuid()),
            squad_id: squad_id.into(),
            role_id: role_id.into(),
            profile_id: profile_id.into(),
            position,
            created_at: now_ts(),
        }
    }
}

/// Typed relationship vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    MadeIn,
    ImplementedIn,
    ReworkedBy,
    ResultedIn,
    Caused,
    Prevented,
    Triggered,
    SimilarTo,
    UsesDocshot,
    Includes,
    Documents,
    Assigns,
    PlaysRole,
    UsesProfile,
    RoleUsesDocshot,
    RoleUsesSkill,
    RoleUsesNk,
    GeneratedFrom,
    CapturedIn,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MadeIn => "MADE_IN",
            Self::ImplementedIn => "IMPLEMENTED_IN",
            Self::ReworkedBy => "REWORKED_BY",
            Self::ResultedIn => "RESULTED_IN",
            Self::Caused => "CAUSED",
            Self::Prevented => "PREVENTED",
            Self::Triggered => "TRIGGERED",
            Self::SimilarTo => "SIMILAR_TO",
            Self::UsesDocshot => "USES_DOCSHOT",
            Self::Includes => "INCLUDES",
            Self::Documents => "DOCUMENTS",
            Self::Assigns => "ASSIGNS",
            Self::PlaysRole => "PLAYS_ROLE",
            Self::UsesProfile => "USES_PROFILE",
            Self::RoleUsesDocshot => "ROLE_USES_DOCSHOT",
            Self::RoleUsesSkill => "ROLE_USES_SKILL",
            Self::RoleUsesNk => "ROLE_USES_NK",
            Self::GeneratedFrom => "GENERATED_FROM",
            Self::CapturedIn => "CAPTURED_IN",
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
