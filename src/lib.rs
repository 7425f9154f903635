//! # membria-core
//!
//! A causal decision-memory engine for AI coding agents: capture decisions,
//! track their downstream outcomes (commits, PRs, CI, incidents), learn
//! calibration from observed success rates, and inject compact graph-derived
//! context back into future decisions.
//!
//! ## Core Components
//!
//! - **Graph**: the property graph of decisions, outcomes, negative
//!   knowledge, antipatterns, engrams, skills, and orchestration records
//! - **Outcome**: the per-outcome state machine fed by webhook events
//! - **Calibration**: per-domain Beta posteriors with trend detection
//! - **Context**: token-budgeted decision/plan context assembly and
//!   plan validation
//! - **Server**: the JSON-RPC tool server over line-delimited stdio
//!
//! ## Example
//!
//! ```rust,ignore
//! use membria_core::config::Namespace;
//! use membria_core::graph::{Decision, GraphStore};
//!
//! let store = GraphStore::in_memory(Namespace::default())?;
//! let decision = Decision::new("Use PostgreSQL", vec!["MongoDB".into()], 0.85)
//!     .with_module("database");
//! store.add_decision(&decision)?;
//! ```

pub mod calibration;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod outcome;
pub mod patterns;
pub mod sanitize;
pub mod server;
pub mod skills;
pub mod storage;
pub mod webhook;

// Re-exports for convenience
pub use calibration::{CalibrationEngine, CalibrationProfile, ConfidenceGuidance, Trend};
pub use config::{MembriaConfig, Namespace};
pub use context::{
    AssembledContext, ContextManager, DecisionContextRequest, PlanContext, PlanContextBuilder,
    PlanValidation, PlanValidator,
};
pub use error::{Error, Result};
pub use graph::{
    doc_shot_id, AntiPattern, CodeChange, Decision, Document, EdgeType, Engram, GraphStore,
    NegativeKnowledge, Outcome, OutcomeStatus, SessionContext, Severity, Signal, SignalType,
    SignalValence, Skill, Squad, SquadStrategy,
};
pub use outcome::{OutcomeTracker, SuccessCheck};
pub use patterns::{Pattern, PatternExtractor};
pub use server::{BackgroundWorkers, MembriaServer, ToolHandler, WorkerIntervals};
pub use skills::{SkillGenerator, SkillReadiness};
pub use storage::{EngramStorage, PendingSignal};
pub use webhook::{extract_decision_id, WebhookHandler, WebhookResponse};
