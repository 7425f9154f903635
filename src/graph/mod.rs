//! Causal decision-memory graph.
//!
//! The graph module provides persistent storage for the decision graph:
//!
//! - **types**: entity records (Decision, Outcome, NegativeKnowledge, ...)
//!   and the typed relationship vocabulary
//! - **schema**: embedded schema with a migration ledger
//! - **store**: typed accessors with namespace injection and TTL sweeps
//! - **analytics**: the fixed read-only aggregate query library
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

mod analytics;
mod schema;
mod store;
mod types;

pub use analytics::{
    CausalLink, ConfidenceBucket, DomainFailures, GraphStatistics, ModuleSuccessRate, PastPlan,
    PreventionStat, ReworkStat, SessionDecisionCount, TrendPoint,
};
pub use schema::{
    get_schema_version, initialize_schema, is_initialized, migration_history, SCHEMA_VERSION,
};
pub use store::{GraphHealth, GraphStore, MemoryUpdate, RoleLinkKind, RoleLinks};
pub use types::{
    doc_shot_id, now_ts, AntiPattern, Assignment, CodeChange, Decision, Document, EdgeType, Engram,
    NegativeKnowledge, Outcome, OutcomeStatus, Profile, Role, SessionContext, Severity, Signal,
    SignalType, SignalValence, Skill, Squad, SquadStrategy,
};
